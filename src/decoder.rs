//! EVM instruction decoder.

use std::fmt;

use crate::{Decoder, Instruction, OpCode, Offset};

/// Decoder for EVM bytecode.
///
/// Holds no state: every call reads the opcode byte at `at` and, for PUSH1..PUSH32,
/// exactly the declared number of operand bytes. A PUSH whose operand reaches
/// the last byte of the buffer is treated as truncated and not decoded, so
/// `[PUSH1, 0x01]` on its own yields nothing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvmDecoder;

impl EvmDecoder {
    pub fn new() -> Self {
        EvmDecoder
    }
}

impl fmt::Display for EvmDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmDecoder")
    }
}

impl Decoder for EvmDecoder {
    fn decode(&self, image: &[u8], at: Offset) -> Option<Instruction> {
        let opcode = OpCode(*image.get(at)?);

        let operand = match opcode.push_operand_size() {
            Some(size) => {
                let start = at + 1;
                let end = start.checked_add(size)?;
                if end >= image.len() {
                    log::trace!(
                        "{} at 0x{:x} runs to the end of the buffer ({} operand bytes, {} left)",
                        opcode,
                        at,
                        size,
                        image.len().saturating_sub(start)
                    );
                    return None;
                }
                image[start..end].to_vec()
            }
            None => Vec::new(),
        };

        Some(Instruction {
            offset: at,
            opcode,
            operand,
        })
    }
}
