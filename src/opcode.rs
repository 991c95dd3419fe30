//! EVM opcode table.
//!
//! `OpCode` is a thin wrapper over the raw byte. Every query is total over
//! `0x00..=0xff`: bytes the EVM leaves undefined still get a stable name
//! (`"UNKNOWN"`) because deployed bytecode legally carries them behind
//! runtime-revert boundaries and inside data sections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Mnemonics indexed by opcode byte. `None` marks an undefined opcode.
const MNEMONICS: [Option<&str>; 256] = [
    /* 0x00 */ Some("STOP"),
    /* 0x01 */ Some("ADD"),
    /* 0x02 */ Some("MUL"),
    /* 0x03 */ Some("SUB"),
    /* 0x04 */ Some("DIV"),
    /* 0x05 */ Some("SDIV"),
    /* 0x06 */ Some("MOD"),
    /* 0x07 */ Some("SMOD"),
    /* 0x08 */ Some("ADDMOD"),
    /* 0x09 */ Some("MULMOD"),
    /* 0x0a */ Some("EXP"),
    /* 0x0b */ Some("SIGNEXTEND"),
    /* 0x0c */ None,
    /* 0x0d */ None,
    /* 0x0e */ None,
    /* 0x0f */ None,
    /* 0x10 */ Some("LT"),
    /* 0x11 */ Some("GT"),
    /* 0x12 */ Some("SLT"),
    /* 0x13 */ Some("SGT"),
    /* 0x14 */ Some("EQ"),
    /* 0x15 */ Some("ISZERO"),
    /* 0x16 */ Some("AND"),
    /* 0x17 */ Some("OR"),
    /* 0x18 */ Some("XOR"),
    /* 0x19 */ Some("NOT"),
    /* 0x1a */ Some("BYTE"),
    /* 0x1b */ Some("SHL"),
    /* 0x1c */ Some("SHR"),
    /* 0x1d */ Some("SAR"),
    /* 0x1e */ None,
    /* 0x1f */ None,
    /* 0x20 */ Some("SHA3"),
    /* 0x21 */ None,
    /* 0x22 */ None,
    /* 0x23 */ None,
    /* 0x24 */ None,
    /* 0x25 */ None,
    /* 0x26 */ None,
    /* 0x27 */ None,
    /* 0x28 */ None,
    /* 0x29 */ None,
    /* 0x2a */ None,
    /* 0x2b */ None,
    /* 0x2c */ None,
    /* 0x2d */ None,
    /* 0x2e */ None,
    /* 0x2f */ None,
    /* 0x30 */ Some("ADDRESS"),
    /* 0x31 */ Some("BALANCE"),
    /* 0x32 */ Some("ORIGIN"),
    /* 0x33 */ Some("CALLER"),
    /* 0x34 */ Some("CALLVALUE"),
    /* 0x35 */ Some("CALLDATALOAD"),
    /* 0x36 */ Some("CALLDATASIZE"),
    /* 0x37 */ Some("CALLDATACOPY"),
    /* 0x38 */ Some("CODESIZE"),
    /* 0x39 */ Some("CODECOPY"),
    /* 0x3a */ Some("GASPRICE"),
    /* 0x3b */ Some("EXTCODESIZE"),
    /* 0x3c */ Some("EXTCODECOPY"),
    /* 0x3d */ Some("RETURNDATASIZE"),
    /* 0x3e */ Some("RETURNDATACOPY"),
    /* 0x3f */ Some("EXTCODEHASH"),
    /* 0x40 */ Some("BLOCKHASH"),
    /* 0x41 */ Some("COINBASE"),
    /* 0x42 */ Some("TIMESTAMP"),
    /* 0x43 */ Some("NUMBER"),
    /* 0x44 */ Some("PREVRANDAO"),
    /* 0x45 */ Some("GASLIMIT"),
    /* 0x46 */ Some("CHAINID"),
    /* 0x47 */ Some("SELFBALANCE"),
    /* 0x48 */ Some("BASEFEE"),
    /* 0x49 */ Some("BLOBHASH"),
    /* 0x4a */ Some("BLOBBASEFEE"),
    /* 0x4b */ None,
    /* 0x4c */ None,
    /* 0x4d */ None,
    /* 0x4e */ None,
    /* 0x4f */ None,
    /* 0x50 */ Some("POP"),
    /* 0x51 */ Some("MLOAD"),
    /* 0x52 */ Some("MSTORE"),
    /* 0x53 */ Some("MSTORE8"),
    /* 0x54 */ Some("SLOAD"),
    /* 0x55 */ Some("SSTORE"),
    /* 0x56 */ Some("JUMP"),
    /* 0x57 */ Some("JUMPI"),
    /* 0x58 */ Some("PC"),
    /* 0x59 */ Some("MSIZE"),
    /* 0x5a */ Some("GAS"),
    /* 0x5b */ Some("JUMPDEST"),
    /* 0x5c */ Some("TLOAD"),
    /* 0x5d */ Some("TSTORE"),
    /* 0x5e */ Some("MCOPY"),
    /* 0x5f */ Some("PUSH0"),
    /* 0x60 */ Some("PUSH1"),
    /* 0x61 */ Some("PUSH2"),
    /* 0x62 */ Some("PUSH3"),
    /* 0x63 */ Some("PUSH4"),
    /* 0x64 */ Some("PUSH5"),
    /* 0x65 */ Some("PUSH6"),
    /* 0x66 */ Some("PUSH7"),
    /* 0x67 */ Some("PUSH8"),
    /* 0x68 */ Some("PUSH9"),
    /* 0x69 */ Some("PUSH10"),
    /* 0x6a */ Some("PUSH11"),
    /* 0x6b */ Some("PUSH12"),
    /* 0x6c */ Some("PUSH13"),
    /* 0x6d */ Some("PUSH14"),
    /* 0x6e */ Some("PUSH15"),
    /* 0x6f */ Some("PUSH16"),
    /* 0x70 */ Some("PUSH17"),
    /* 0x71 */ Some("PUSH18"),
    /* 0x72 */ Some("PUSH19"),
    /* 0x73 */ Some("PUSH20"),
    /* 0x74 */ Some("PUSH21"),
    /* 0x75 */ Some("PUSH22"),
    /* 0x76 */ Some("PUSH23"),
    /* 0x77 */ Some("PUSH24"),
    /* 0x78 */ Some("PUSH25"),
    /* 0x79 */ Some("PUSH26"),
    /* 0x7a */ Some("PUSH27"),
    /* 0x7b */ Some("PUSH28"),
    /* 0x7c */ Some("PUSH29"),
    /* 0x7d */ Some("PUSH30"),
    /* 0x7e */ Some("PUSH31"),
    /* 0x7f */ Some("PUSH32"),
    /* 0x80 */ Some("DUP1"),
    /* 0x81 */ Some("DUP2"),
    /* 0x82 */ Some("DUP3"),
    /* 0x83 */ Some("DUP4"),
    /* 0x84 */ Some("DUP5"),
    /* 0x85 */ Some("DUP6"),
    /* 0x86 */ Some("DUP7"),
    /* 0x87 */ Some("DUP8"),
    /* 0x88 */ Some("DUP9"),
    /* 0x89 */ Some("DUP10"),
    /* 0x8a */ Some("DUP11"),
    /* 0x8b */ Some("DUP12"),
    /* 0x8c */ Some("DUP13"),
    /* 0x8d */ Some("DUP14"),
    /* 0x8e */ Some("DUP15"),
    /* 0x8f */ Some("DUP16"),
    /* 0x90 */ Some("SWAP1"),
    /* 0x91 */ Some("SWAP2"),
    /* 0x92 */ Some("SWAP3"),
    /* 0x93 */ Some("SWAP4"),
    /* 0x94 */ Some("SWAP5"),
    /* 0x95 */ Some("SWAP6"),
    /* 0x96 */ Some("SWAP7"),
    /* 0x97 */ Some("SWAP8"),
    /* 0x98 */ Some("SWAP9"),
    /* 0x99 */ Some("SWAP10"),
    /* 0x9a */ Some("SWAP11"),
    /* 0x9b */ Some("SWAP12"),
    /* 0x9c */ Some("SWAP13"),
    /* 0x9d */ Some("SWAP14"),
    /* 0x9e */ Some("SWAP15"),
    /* 0x9f */ Some("SWAP16"),
    /* 0xa0 */ Some("LOG0"),
    /* 0xa1 */ Some("LOG1"),
    /* 0xa2 */ Some("LOG2"),
    /* 0xa3 */ Some("LOG3"),
    /* 0xa4 */ Some("LOG4"),
    /* 0xa5 */ None,
    /* 0xa6 */ None,
    /* 0xa7 */ None,
    /* 0xa8 */ None,
    /* 0xa9 */ None,
    /* 0xaa */ None,
    /* 0xab */ None,
    /* 0xac */ None,
    /* 0xad */ None,
    /* 0xae */ None,
    /* 0xaf */ None,
    /* 0xb0 */ None,
    /* 0xb1 */ None,
    /* 0xb2 */ None,
    /* 0xb3 */ None,
    /* 0xb4 */ None,
    /* 0xb5 */ None,
    /* 0xb6 */ None,
    /* 0xb7 */ None,
    /* 0xb8 */ None,
    /* 0xb9 */ None,
    /* 0xba */ None,
    /* 0xbb */ None,
    /* 0xbc */ None,
    /* 0xbd */ None,
    /* 0xbe */ None,
    /* 0xbf */ None,
    /* 0xc0 */ None,
    /* 0xc1 */ None,
    /* 0xc2 */ None,
    /* 0xc3 */ None,
    /* 0xc4 */ None,
    /* 0xc5 */ None,
    /* 0xc6 */ None,
    /* 0xc7 */ None,
    /* 0xc8 */ None,
    /* 0xc9 */ None,
    /* 0xca */ None,
    /* 0xcb */ None,
    /* 0xcc */ None,
    /* 0xcd */ None,
    /* 0xce */ None,
    /* 0xcf */ None,
    /* 0xd0 */ None,
    /* 0xd1 */ None,
    /* 0xd2 */ None,
    /* 0xd3 */ None,
    /* 0xd4 */ None,
    /* 0xd5 */ None,
    /* 0xd6 */ None,
    /* 0xd7 */ None,
    /* 0xd8 */ None,
    /* 0xd9 */ None,
    /* 0xda */ None,
    /* 0xdb */ None,
    /* 0xdc */ None,
    /* 0xdd */ None,
    /* 0xde */ None,
    /* 0xdf */ None,
    /* 0xe0 */ None,
    /* 0xe1 */ None,
    /* 0xe2 */ None,
    /* 0xe3 */ None,
    /* 0xe4 */ None,
    /* 0xe5 */ None,
    /* 0xe6 */ None,
    /* 0xe7 */ None,
    /* 0xe8 */ None,
    /* 0xe9 */ None,
    /* 0xea */ None,
    /* 0xeb */ None,
    /* 0xec */ None,
    /* 0xed */ None,
    /* 0xee */ None,
    /* 0xef */ None,
    /* 0xf0 */ Some("CREATE"),
    /* 0xf1 */ Some("CALL"),
    /* 0xf2 */ Some("CALLCODE"),
    /* 0xf3 */ Some("RETURN"),
    /* 0xf4 */ Some("DELEGATECALL"),
    /* 0xf5 */ Some("CREATE2"),
    /* 0xf6 */ None,
    /* 0xf7 */ None,
    /* 0xf8 */ None,
    /* 0xf9 */ None,
    /* 0xfa */ Some("STATICCALL"),
    /* 0xfb */ None,
    /* 0xfc */ None,
    /* 0xfd */ Some("REVERT"),
    /* 0xfe */ Some("INVALID"),
    /* 0xff */ Some("SELFDESTRUCT"),
];

/// Placeholder name for bytes with no assigned instruction.
pub const UNKNOWN_NAME: &str = "UNKNOWN";

/// A single EVM instruction byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpCode(pub u8);

/// Broad instruction families, following the layout of the opcode space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpCategory {
    /// STOP and the arithmetic range (0x00-0x0b)
    Arithmetic,
    /// Comparison and bitwise logic (0x10-0x1d)
    Comparison,
    /// SHA3 / KECCAK256
    Keccak,
    /// Call environment queries (0x30-0x3f)
    Environment,
    /// Block information (0x40-0x4a)
    Block,
    /// Stack, memory and storage access
    StackMemoryStorage,
    /// JUMP, JUMPI, PC and JUMPDEST
    Flow,
    /// PUSH0..PUSH32
    Push,
    /// DUP1..DUP16
    Dup,
    /// SWAP1..SWAP16
    Swap,
    /// LOG0..LOG4
    Log,
    /// CREATE, the CALL family, RETURN, REVERT, SELFDESTRUCT
    System,
    /// The designated INVALID instruction (0xfe)
    Invalid,
    /// Unassigned byte
    Unknown,
}

impl OpCategory {
    /// Same spelling as the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            OpCategory::Arithmetic => "arithmetic",
            OpCategory::Comparison => "comparison",
            OpCategory::Keccak => "keccak",
            OpCategory::Environment => "environment",
            OpCategory::Block => "block",
            OpCategory::StackMemoryStorage => "stack_memory_storage",
            OpCategory::Flow => "flow",
            OpCategory::Push => "push",
            OpCategory::Dup => "dup",
            OpCategory::Swap => "swap",
            OpCategory::Log => "log",
            OpCategory::System => "system",
            OpCategory::Invalid => "invalid",
            OpCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OpCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of stack items an instruction consumes and produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackEffect {
    pub pops: u8,
    pub pushes: u8,
}

impl StackEffect {
    const fn new(pops: u8, pushes: u8) -> Self {
        Self { pops, pushes }
    }

    /// Net change in stack height.
    pub fn delta(&self) -> i16 {
        self.pushes as i16 - self.pops as i16
    }
}

/// Error returned when a mnemonic does not name an opcode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown opcode mnemonic: {0}")]
pub struct ParseOpCodeError(pub String);

impl OpCode {
    pub const STOP: OpCode = OpCode(0x00);
    pub const ADD: OpCode = OpCode(0x01);
    pub const MUL: OpCode = OpCode(0x02);
    pub const SUB: OpCode = OpCode(0x03);
    pub const LT: OpCode = OpCode(0x10);
    pub const GT: OpCode = OpCode(0x11);
    pub const EQ: OpCode = OpCode(0x14);
    pub const ISZERO: OpCode = OpCode(0x15);
    pub const SHR: OpCode = OpCode(0x1c);
    pub const SHA3: OpCode = OpCode(0x20);
    pub const CALLVALUE: OpCode = OpCode(0x34);
    pub const CALLDATALOAD: OpCode = OpCode(0x35);
    pub const CALLDATASIZE: OpCode = OpCode(0x36);
    pub const POP: OpCode = OpCode(0x50);
    pub const MLOAD: OpCode = OpCode(0x51);
    pub const MSTORE: OpCode = OpCode(0x52);
    pub const SLOAD: OpCode = OpCode(0x54);
    pub const SSTORE: OpCode = OpCode(0x55);
    pub const JUMP: OpCode = OpCode(0x56);
    pub const JUMPI: OpCode = OpCode(0x57);
    pub const PC: OpCode = OpCode(0x58);
    pub const GAS: OpCode = OpCode(0x5a);
    pub const JUMPDEST: OpCode = OpCode(0x5b);
    pub const PUSH0: OpCode = OpCode(0x5f);
    pub const PUSH1: OpCode = OpCode(0x60);
    pub const PUSH2: OpCode = OpCode(0x61);
    pub const PUSH4: OpCode = OpCode(0x63);
    pub const PUSH32: OpCode = OpCode(0x7f);
    pub const DUP1: OpCode = OpCode(0x80);
    pub const SWAP1: OpCode = OpCode(0x90);
    pub const CREATE: OpCode = OpCode(0xf0);
    pub const CALL: OpCode = OpCode(0xf1);
    pub const CALLCODE: OpCode = OpCode(0xf2);
    pub const RETURN: OpCode = OpCode(0xf3);
    pub const DELEGATECALL: OpCode = OpCode(0xf4);
    pub const CREATE2: OpCode = OpCode(0xf5);
    pub const STATICCALL: OpCode = OpCode(0xfa);
    pub const REVERT: OpCode = OpCode(0xfd);
    pub const INVALID: OpCode = OpCode(0xfe);
    pub const SELFDESTRUCT: OpCode = OpCode(0xff);

    /// Raw byte value.
    #[inline]
    pub fn byte(self) -> u8 {
        self.0
    }

    /// Mnemonic for this opcode, `"UNKNOWN"` for unassigned bytes.
    pub fn name(self) -> &'static str {
        MNEMONICS[self.0 as usize].unwrap_or(UNKNOWN_NAME)
    }

    /// True when the byte has an assigned instruction (0xfe counts as assigned).
    pub fn is_defined(self) -> bool {
        MNEMONICS[self.0 as usize].is_some()
    }

    /// PUSH1..PUSH32. PUSH0 carries no operand and is not included.
    #[inline]
    pub fn is_push(self) -> bool {
        (0x60..=0x7f).contains(&self.0)
    }

    /// Operand width in bytes for PUSH1..PUSH32 (1..=32).
    #[inline]
    pub fn push_operand_size(self) -> Option<usize> {
        if self.is_push() {
            Some((self.0 - Self::PUSH1.0) as usize + 1)
        } else {
            None
        }
    }

    /// JUMP or JUMPI.
    #[inline]
    pub fn is_jump(self) -> bool {
        self == Self::JUMP || self == Self::JUMPI
    }

    /// CALL, CALLCODE, DELEGATECALL or STATICCALL.
    #[inline]
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Self::CALL | Self::CALLCODE | Self::DELEGATECALL | Self::STATICCALL
        )
    }

    /// RETURN, REVERT or SELFDESTRUCT.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::RETURN | Self::REVERT | Self::SELFDESTRUCT)
    }

    #[inline]
    pub fn is_jumpdest(self) -> bool {
        self == Self::JUMPDEST
    }

    /// Instructions that shape control flow: jumps, jump destinations and
    /// the terminal instructions.
    pub fn is_control_flow(self) -> bool {
        self.is_jump() || self.is_jumpdest() || self.is_terminal()
    }

    /// Instructions after which execution never falls through to the next
    /// byte. Used by recursive descent; wider than [`OpCode::is_terminal`].
    pub fn halts(self) -> bool {
        self.is_terminal()
            || matches!(self, Self::STOP | Self::INVALID | Self::JUMP)
            || !self.is_defined()
    }

    pub fn category(self) -> OpCategory {
        if !self.is_defined() {
            return OpCategory::Unknown;
        }
        match self.0 {
            0x00..=0x0b => OpCategory::Arithmetic,
            0x10..=0x1d => OpCategory::Comparison,
            0x20 => OpCategory::Keccak,
            0x30..=0x3f => OpCategory::Environment,
            0x40..=0x4a => OpCategory::Block,
            0x56 | 0x57 | 0x58 | 0x5b => OpCategory::Flow,
            0x50..=0x5e => OpCategory::StackMemoryStorage,
            0x5f..=0x7f => OpCategory::Push,
            0x80..=0x8f => OpCategory::Dup,
            0x90..=0x9f => OpCategory::Swap,
            0xa0..=0xa4 => OpCategory::Log,
            0xfe => OpCategory::Invalid,
            _ => OpCategory::System,
        }
    }

    /// Stack inputs and outputs, or `None` for unassigned bytes.
    pub fn stack_effect(self) -> Option<StackEffect> {
        let effect = match self.0 {
            0x00 | 0x5b | 0xfe => StackEffect::new(0, 0),
            0x08 | 0x09 => StackEffect::new(3, 1),
            0x01..=0x0b => StackEffect::new(2, 1),
            0x15 | 0x19 => StackEffect::new(1, 1),
            0x10..=0x1d => StackEffect::new(2, 1),
            0x20 => StackEffect::new(2, 1),
            0x31 | 0x35 | 0x3b | 0x3f => StackEffect::new(1, 1),
            0x37 | 0x39 | 0x3e => StackEffect::new(3, 0),
            0x3c => StackEffect::new(4, 0),
            0x30..=0x3f => StackEffect::new(0, 1),
            0x40 | 0x49 => StackEffect::new(1, 1),
            0x41..=0x4a => StackEffect::new(0, 1),
            0x50 => StackEffect::new(1, 0),
            0x51 | 0x54 | 0x5c => StackEffect::new(1, 1),
            0x52 | 0x53 | 0x55 | 0x5d => StackEffect::new(2, 0),
            0x56 => StackEffect::new(1, 0),
            0x57 => StackEffect::new(2, 0),
            0x58 | 0x59 | 0x5a => StackEffect::new(0, 1),
            0x5e => StackEffect::new(3, 0),
            0x5f..=0x7f => StackEffect::new(0, 1),
            0x80..=0x8f => {
                let n = self.0 - 0x7f;
                StackEffect::new(n, n + 1)
            }
            0x90..=0x9f => {
                let n = self.0 - 0x8e;
                StackEffect::new(n, n)
            }
            0xa0..=0xa4 => StackEffect::new(self.0 - 0xa0 + 2, 0),
            0xf0 => StackEffect::new(3, 1),
            0xf1 | 0xf2 => StackEffect::new(7, 1),
            0xf3 | 0xfd => StackEffect::new(2, 0),
            0xf4 | 0xfa => StackEffect::new(6, 1),
            0xf5 => StackEffect::new(4, 1),
            0xff => StackEffect::new(1, 0),
            _ => return None,
        };
        Some(effect)
    }
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        OpCode(byte)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.0
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match MNEMONICS[self.0 as usize] {
            Some(name) => f.pad(name),
            None => f.pad(&format!("{}(0x{:02x})", UNKNOWN_NAME, self.0)),
        }
    }
}

impl FromStr for OpCode {
    type Err = ParseOpCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();

        if let Some(hex) = upper
            .strip_prefix("UNKNOWN(0X")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return u8::from_str_radix(hex, 16)
                .map(OpCode)
                .map_err(|_| ParseOpCodeError(s.to_string()));
        }

        let wanted = match upper.as_str() {
            "KECCAK256" => "SHA3",
            "DIFFICULTY" => "PREVRANDAO",
            "SUICIDE" => "SELFDESTRUCT",
            other => other,
        };

        MNEMONICS
            .iter()
            .position(|name| *name == Some(wanted))
            .map(|byte| OpCode(byte as u8))
            .ok_or_else(|| ParseOpCodeError(s.to_string()))
    }
}

impl Serialize for OpCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
