//! Linear-sweep decoding strategy

use std::time::Instant;

use crate::{AnalysisError, Decoder, Disassembly};

/// Linear-sweep decoding
///
/// Walks the buffer from offset 0, one instruction at a time. PUSH operands
/// are consumed whole, so data bytes inside an operand are never mistaken for
/// opcodes. Decoding stops at the first instruction the decoder rejects (a
/// PUSH whose operand runs to the end of `image`).
///
/// # Arguments
/// * `image` - The bytecode to decode
/// * `decoder` - The decoder to use
///
/// # Returns
/// The instructions in ascending offset order
pub fn run(image: &[u8], decoder: &dyn Decoder) -> Result<Disassembly, AnalysisError> {
    if image.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }

    let start_time = Instant::now();
    let mut instructions = Vec::with_capacity(image.len() / 2);
    let mut at = 0;

    while at < image.len() {
        match decoder.decode(image, at) {
            Some(insn) => {
                at = insn.end();
                instructions.push(insn);
            }
            None => {
                log::debug!(
                    "Truncated instruction at 0x{:x}, leaving {} trailing bytes undecoded",
                    at,
                    image.len() - at
                );
                break;
            }
        }
    }

    let undecoded = image.len().saturating_sub(at);

    log::debug!(
        "Linear sweep decoded {} instructions from {} bytes in {:?}",
        instructions.len(),
        image.len(),
        start_time.elapsed()
    );

    Ok(Disassembly::new(instructions, undecoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EvmDecoder, OpCode};

    #[test]
    fn test_truncated_push_is_dropped() {
        // PUSH1 with no operand byte
        let result = run(&[0x60], &EvmDecoder).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.undecoded_bytes(), 1);

        // ADD, then PUSH3 with one of three operand bytes
        let result = run(&[0x01, 0x62, 0xaa], &EvmDecoder).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(0).unwrap().opcode, OpCode::ADD);
        assert_eq!(result.undecoded_bytes(), 2);
    }

    #[test]
    fn test_trailing_push_is_truncated() {
        // PUSH1 0x01 at the very end of the buffer is not emitted
        let result = run(&[0x60, 0x01], &EvmDecoder).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.undecoded_bytes(), 2);

        let result = run(&[0x60, 0x01, 0x00], &EvmDecoder).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.undecoded_bytes(), 0);
    }

    #[test]
    fn test_operand_bytes_are_not_opcodes() {
        // PUSH2 0x5b56 hides a JUMPDEST and a JUMP inside its operand
        let result = run(&[0x61, 0x5b, 0x56, 0x00], &EvmDecoder).unwrap();
        let opcodes: Vec<_> = result.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![OpCode::PUSH2, OpCode::STOP]);
        assert_eq!(result.count(OpCode::JUMPDEST), 0);
    }

    #[test]
    fn test_size_accounting() {
        let bytes = [0x7f; 40];
        let result = run(&bytes, &EvmDecoder).unwrap();
        // one PUSH32 (33 bytes) then a PUSH32 with 6 bytes left
        assert_eq!(result.len(), 1);
        assert_eq!(result.decoded_bytes() + result.undecoded_bytes(), bytes.len());
    }
}
