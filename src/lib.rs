//! Core IR, traits, and dispatch for the EVM flowgraph decompiler.
//!
//! This library turns raw EVM bytecode into a structured instruction stream and
//! rebuilds program structure on top of it: a node-per-instruction control-flow
//! graph, basic blocks, loops, dominators and entry-to-exit paths. It never
//! executes anything; opcodes and raw operand bytes are all it looks at.
//!
//! # Basic Usage
//!
//! ```rust
//! use evm_flowgraph::{
//!     analysis::{analyze, AnalysisOptions},
//!     format::OutputFormat,
//!     parse_hex,
//! };
//!
//! // PUSH1 0x04, JUMP, JUMPDEST(unreached), JUMPDEST, PUSH1 0, DUP1, RETURN
//! let bytecode = parse_hex("0x6004565b5b600080f3").unwrap();
//!
//! let analysis = analyze(&bytecode, &AnalysisOptions::default()).unwrap();
//! assert_eq!(analysis.disassembly.len(), 7);
//! assert_eq!(analysis.paths.as_ref().map(|p| p.len()), Some(2));
//!
//! let text = OutputFormat::Text.get_formatter(None).format(&analysis).unwrap();
//! assert!(text.contains("JUMPDEST"));
//! ```

pub mod analysis;
pub mod blocks;
pub mod cfg;
pub mod decoder;
pub mod dominators;
pub mod format;
pub mod index;
pub mod loops;
pub mod opcode;
pub mod paths;
pub mod strategy;
mod large_tests;

pub use crate::analysis::{analyze, analyze_batch, Analysis, AnalysisOptions};
pub use crate::blocks::{create_blocks, Block};
pub use crate::cfg::{ControlFlowGraph, EdgeKind, Node, NodeId, ReversedGraph};
pub use crate::decoder::EvmDecoder;
pub use crate::dominators::DominatorTree;
pub use crate::index::{ExecutionTree, InstructionIndex, JumpSite};
pub use crate::loops::{detect_loops, Loop};
pub use crate::opcode::OpCode;
pub use crate::paths::{find_all_paths, Path, PathOptions, PathSet};
pub use crate::strategy::{decompile, Strategy};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte position of an opcode within the bytecode buffer.
pub type Offset = usize;

/// Widest operand an EVM instruction carries (PUSH32).
pub const MAX_OPERAND_SIZE: usize = 32;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    /// Position of the opcode byte in the original buffer
    pub offset: Offset,
    /// The opcode
    pub opcode: OpCode,
    /// Literal bytes following a PUSH opcode, empty for everything else
    #[serde(with = "hex")]
    pub operand: Vec<u8>,
}

impl Instruction {
    pub fn new(offset: Offset, opcode: OpCode, operand: Vec<u8>) -> Self {
        Self {
            offset,
            opcode,
            operand,
        }
    }

    /// Encoded size: the opcode byte plus its operand.
    pub fn size(&self) -> usize {
        1 + self.operand.len()
    }

    /// Offset of the first byte after this instruction.
    pub fn end(&self) -> Offset {
        self.offset + self.size()
    }

    /// The operand read as a big-endian unsigned integer, if it is non-empty
    /// and fits in an [`Offset`].
    pub fn operand_value(&self) -> Option<Offset> {
        be_to_offset(&self.operand)
    }

    /// Lowercase hex of the operand, without a `0x` prefix.
    pub fn operand_hex(&self) -> String {
        hex::encode(&self.operand)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operand.is_empty() {
            write!(f, "{:06x}  {}", self.offset, self.opcode)
        } else {
            write!(f, "{:06x}  {:<8} 0x{}", self.offset, self.opcode, self.operand_hex())
        }
    }
}

/// Decode a big-endian byte string into an offset. Empty input and values
/// wider than `usize` yield `None`.
pub(crate) fn be_to_offset(bytes: &[u8]) -> Option<Offset> {
    if bytes.is_empty() {
        return None;
    }
    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => return Some(0),
    };
    if significant.len() > std::mem::size_of::<Offset>() {
        return None;
    }
    Some(
        significant
            .iter()
            .fold(0, |acc: Offset, b| (acc << 8) | *b as Offset),
    )
}

/// Literal value an instruction works with: its own operand, or for an
/// operand-less instruction the operand of an immediately preceding PUSH.
///
/// Real bytecode never carries a JUMP target inline; it is pushed first
/// (`PUSH2 0x0123 JUMP`). Anything more indirect than that yields `None`.
pub(crate) fn effective_operand<'a>(
    insn: &'a Instruction,
    previous: Option<&'a Instruction>,
) -> Option<&'a [u8]> {
    if !insn.operand.is_empty() {
        return Some(&insn.operand);
    }
    let previous = previous?;
    if previous.end() != insn.offset {
        return None;
    }
    if previous.opcode == OpCode::PUSH0 {
        return Some(&[0]);
    }
    if previous.opcode.is_push() {
        return Some(&previous.operand);
    }
    None
}

/// Statically known jump target of a JUMP/JUMPI, see [`effective_operand`].
pub(crate) fn jump_target(insn: &Instruction, previous: Option<&Instruction>) -> Option<Offset> {
    effective_operand(insn, previous).and_then(be_to_offset)
}

/// Decoder trait: turns the bytes at one offset into an instruction.
pub trait Decoder: Send + Sync {
    /// Decode a single instruction at offset `at`.
    ///
    /// # Returns
    /// `None` when `at` is past the end of `image` or the instruction's
    /// operand would run past the end.
    fn decode(&self, image: &[u8], at: Offset) -> Option<Instruction>;
}

/// Ordered instruction stream produced by a decoding strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disassembly {
    instructions: Vec<Instruction>,
    /// Input bytes not covered by any emitted instruction
    undecoded: usize,
}

impl Disassembly {
    /// Wrap an instruction list that is already in ascending offset order.
    pub fn new(instructions: Vec<Instruction>, undecoded: usize) -> Self {
        Self {
            instructions,
            undecoded,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Bytes of the input that no instruction covers. For a linear sweep this
    /// is the truncated trailing PUSH, if any.
    pub fn undecoded_bytes(&self) -> usize {
        self.undecoded
    }

    /// Total bytes covered by the decoded instructions.
    pub fn decoded_bytes(&self) -> usize {
        self.instructions.iter().map(Instruction::size).sum()
    }

    /// Instruction at list position `index`.
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// List position of the instruction whose opcode sits at `offset`.
    pub fn position(&self, offset: Offset) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |insn| insn.offset)
            .ok()
    }

    /// Instruction whose opcode sits at `offset`.
    pub fn at_offset(&self, offset: Offset) -> Option<&Instruction> {
        self.position(offset).map(|i| &self.instructions[i])
    }

    /// All instructions with the given opcode, in offset order.
    pub fn filter_by_opcode(&self, opcode: OpCode) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter().filter(move |insn| insn.opcode == opcode)
    }

    pub fn count(&self, opcode: OpCode) -> usize {
        self.filter_by_opcode(opcode).count()
    }

    pub fn has_selfdestruct(&self) -> bool {
        self.count(OpCode::SELFDESTRUCT) > 0
    }

    /// Jumps, jump destinations and terminal instructions.
    pub fn control_flow(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions
            .iter()
            .filter(|insn| insn.opcode.is_control_flow())
    }

    /// See [`match_function_signature`].
    pub fn match_function_signature(&self, hex_signature: &str) -> bool {
        match_function_signature(&self.instructions, hex_signature)
    }
}

impl AsRef<[Instruction]> for Disassembly {
    fn as_ref(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl<'a> IntoIterator for &'a Disassembly {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

/// Heuristic ABI fingerprint: does any CALL instruction carry an operand
/// whose first four bytes equal `hex_signature`?
///
/// The signature may have a `0x` prefix and is compared case-insensitively.
/// A match says nothing about the actual call target.
pub fn match_function_signature(instructions: &[Instruction], hex_signature: &str) -> bool {
    let wanted = hex_signature.trim();
    let wanted = wanted
        .strip_prefix("0x")
        .or_else(|| wanted.strip_prefix("0X"))
        .unwrap_or(wanted)
        .to_ascii_lowercase();

    instructions
        .iter()
        .filter(|insn| insn.opcode == OpCode::CALL && insn.operand.len() >= 4)
        .any(|insn| hex::encode(&insn.operand[..4]) == wanted)
}

/// Parse hex-encoded bytecode. Accepts an optional `0x` prefix and ignores
/// whitespace.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, AnalysisError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(compact)?)
}

/// Error type for decompilation and analysis
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Zero-length bytecode
    #[error("Cannot decompile an empty byte buffer")]
    EmptyInput,

    /// Graph construction was handed an empty instruction list
    #[error("Cannot build a control-flow graph from zero instructions")]
    NoInstructions,

    /// Instruction offsets are not strictly ascending
    #[error("Instruction offsets must be strictly ascending: 0x{previous:x} is followed by 0x{offset:x}")]
    UnorderedInstructions { previous: Offset, offset: Offset },

    /// Malformed hex input
    #[error("Invalid hex input: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Output serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl From<serde_json::Error> for AnalysisError {
    fn from(e: serde_json::Error) -> Self {
        AnalysisError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for AnalysisError {
    fn from(e: csv::Error) -> Self {
        AnalysisError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(offset: Offset, operand: &[u8]) -> Instruction {
        let opcode = OpCode(0x5f + operand.len() as u8);
        Instruction::new(offset, opcode, operand.to_vec())
    }

    #[test]
    fn test_instruction_size_and_value() {
        let insn = push(0x10, &[0x01, 0x02]);
        assert_eq!(insn.size(), 3);
        assert_eq!(insn.end(), 0x13);
        assert_eq!(insn.operand_value(), Some(0x0102));
        assert_eq!(insn.operand_hex(), "0102");
        assert_eq!(insn.to_string(), "000010  PUSH2    0x0102");

        let add = Instruction::new(0x13, OpCode::ADD, Vec::new());
        assert_eq!(add.size(), 1);
        assert_eq!(add.operand_value(), None);
        assert_eq!(add.to_string(), "000013  ADD");
    }

    #[test]
    fn test_big_endian_decoding() {
        assert_eq!(be_to_offset(&[]), None);
        assert_eq!(be_to_offset(&[0, 0, 0]), Some(0));

        let mut wide = [0u8; 32];
        wide[31] = 0x2a;
        assert_eq!(be_to_offset(&wide), Some(0x2a));

        wide[0] = 0x01;
        assert_eq!(be_to_offset(&wide), None);
    }

    #[test]
    fn test_disassembly_accessors() {
        let disasm = Disassembly::new(
            vec![
                push(0, &[0x01]),
                push(2, &[0x02]),
                Instruction::new(4, OpCode::ADD, Vec::new()),
                Instruction::new(5, OpCode::SELFDESTRUCT, Vec::new()),
            ],
            0,
        );

        assert_eq!(disasm.len(), 4);
        assert_eq!(disasm.position(4), Some(2));
        assert_eq!(disasm.position(3), None);
        assert_eq!(disasm.at_offset(2).map(|i| i.operand.clone()), Some(vec![0x02]));
        assert_eq!(disasm.get(2).map(|i| i.opcode), Some(OpCode::ADD));
        assert_eq!(disasm.count(OpCode::PUSH1), 2);
        assert!(disasm.has_selfdestruct());
        assert_eq!(disasm.control_flow().count(), 1);
        assert_eq!(disasm.decoded_bytes(), 6);
    }

    #[test]
    fn test_match_function_signature() {
        let instructions = vec![
            Instruction::new(0, OpCode::CALL, vec![0xa9, 0x05, 0x9c, 0xbb, 0x00]),
            Instruction::new(6, OpCode::CALL, vec![0x12]),
            Instruction::new(8, OpCode::PUSH4, vec![0x70, 0xa0, 0x82, 0x31]),
        ];

        assert!(match_function_signature(&instructions, "0xa9059cbb"));
        assert!(match_function_signature(&instructions, "A9059CBB"));
        // PUSH4 operands are not CALL operands
        assert!(!match_function_signature(&instructions, "70a08231"));
        assert!(!match_function_signature(&[], "a9059cbb"));
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x6001").unwrap(), vec![0x60, 0x01]);
        assert_eq!(parse_hex(" 60 01\n").unwrap(), vec![0x60, 0x01]);
        assert!(parse_hex("").unwrap().is_empty());
        assert!(matches!(parse_hex("0x6"), Err(AnalysisError::InvalidHex(_))));
        assert!(matches!(parse_hex("zz"), Err(AnalysisError::InvalidHex(_))));
    }

    #[test]
    fn test_instruction_json_round_trip() {
        let insn = push(7, &[0xde, 0xad]);
        let json = serde_json::to_string(&insn).unwrap();
        assert_eq!(json, r#"{"offset":7,"opcode":"PUSH2","operand":"dead"}"#);
        let back: Instruction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, insn);
    }
}
