//! Decoding strategies

use std::fmt;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use crate::{AnalysisError, Decoder, Disassembly, EvmDecoder};

/// Available decoding strategies.
#[derive(Copy, Clone, ValueEnum, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Linear sweep over the whole buffer
    #[default]
    Linear,
    /// Recursive descent from offset 0, following resolvable jumps
    Recursive,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linear => write!(f, "Linear sweep"),
            Strategy::Recursive => write!(f, "Recursive descent"),
        }
    }
}

impl Strategy {
    /// Run the selected strategy on `image` using `decoder`.
    pub fn run(&self, image: &[u8], decoder: &dyn Decoder) -> Result<Disassembly, AnalysisError> {
        match self {
            Strategy::Linear    => linear::run(image, decoder),
            Strategy::Recursive => recursive::run(image, decoder),
        }
    }

    /// Return all available strategies
    pub fn all() -> &'static [Strategy] {
        &[Strategy::Linear, Strategy::Recursive]
    }
}

/// Decompile `bytes` with a linear sweep.
///
/// Fails only on empty input. A PUSH whose operand runs past the end of the
/// buffer ends decoding without being emitted; the result is then partial and
/// [`Disassembly::undecoded_bytes`] is non-zero.
pub fn decompile(bytes: &[u8]) -> Result<Disassembly, AnalysisError> {
    Strategy::Linear.run(bytes, &EvmDecoder)
}

pub mod linear;
pub mod recursive;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpCode;

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::Linear.to_string(), "Linear sweep");
        assert_eq!(Strategy::Recursive.to_string(), "Recursive descent");
        assert_eq!(Strategy::default(), Strategy::Linear);
    }

    #[test]
    fn test_linear_strategy() {
        // PUSH1 0x01, PUSH1 0x02, ADD
        let bytes = [0x60, 0x01, 0x60, 0x02, 0x01];

        let result = decompile(&bytes).unwrap();
        let offsets: Vec<_> = result.iter().map(|i| i.offset).collect();
        let opcodes: Vec<_> = result.iter().map(|i| i.opcode).collect();

        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(opcodes, vec![OpCode::PUSH1, OpCode::PUSH1, OpCode::ADD]);
        assert!(result.get(2).unwrap().operand.is_empty());
    }

    #[test]
    fn test_strategies_reject_empty_input() {
        for strategy in Strategy::all() {
            let err = strategy.run(&[], &EvmDecoder).unwrap_err();
            assert!(matches!(err, AnalysisError::EmptyInput));
        }
    }
}
