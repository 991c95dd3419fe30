//! JSON and JSON Lines output formatters

use serde::Serialize;
use serde_json::json;

use crate::analysis::Analysis;
use crate::cfg::{ControlFlowGraph, NodeId};
use crate::{AnalysisError, Instruction};
use super::{hex_offset, AnalysisFormatter};

/// Serializable instruction for JSON output
#[derive(Serialize)]
struct InstructionJson<'a> {
    /// Offset of the opcode byte
    offset: String,
    opcode: String,
    /// Operand as hex, empty for non-PUSH instructions
    operand: String,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
}

/// Serializable basic block for JSON output
#[derive(Serialize)]
struct BlockJson {
    start: String,
    /// Offsets of the instructions in the block
    instructions: Vec<String>,
    successors: Vec<String>,
}

#[derive(Serialize)]
struct LoopJson {
    header: String,
    exit: Option<String>,
    nodes: Vec<String>,
    bounds: Vec<String>,
    invariants: Vec<String>,
}

#[derive(Serialize)]
struct PathsJson {
    count: usize,
    truncated: bool,
    paths: Vec<Vec<String>>,
}

/// Serializable analysis for JSON output
#[derive(Serialize)]
struct AnalysisJson<'a> {
    strategy: String,
    undecoded_bytes: usize,
    instructions: Vec<InstructionJson<'a>>,
    exits: Vec<String>,
    dangling_jumps: Vec<String>,
    blocks: Vec<BlockJson>,
    loops: Vec<LoopJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paths: Option<PathsJson>,
}

impl AnalysisFormatter for super::JsonFormatter {
    fn format(&self, analysis: &Analysis) -> Result<String, AnalysisError> {
        let cfg = analysis.cfg.as_ref();

        let document = AnalysisJson {
            strategy: analysis.strategy.to_string(),
            undecoded_bytes: analysis.disassembly.undecoded_bytes(),
            instructions: analysis.disassembly.iter().map(instruction_to_json).collect(),
            exits: cfg
                .map(|cfg| node_offsets(cfg, cfg.exits()))
                .unwrap_or_default(),
            dangling_jumps: analysis
                .index
                .dangling_jumps()
                .map(|jump| hex_offset(jump.offset))
                .collect(),
            blocks: analysis
                .blocks
                .iter()
                .filter_map(|block| cfg.map(|cfg| block_to_json(cfg, block)))
                .collect(),
            loops: analysis
                .loops
                .iter()
                .filter_map(|found| cfg.map(|cfg| loop_to_json(cfg, found)))
                .collect(),
            paths: analysis.paths.as_ref().map(|paths| PathsJson {
                count: paths.len(),
                truncated: paths.truncated,
                paths: cfg
                    .map(|cfg| paths.iter().map(|p| node_offsets(cfg, p.nodes())).collect())
                    .unwrap_or_default(),
            }),
        };

        Ok(serde_json::to_string_pretty(&document)?)
    }
}

impl AnalysisFormatter for super::JsonLinesFormatter {
    fn format(&self, analysis: &Analysis) -> Result<String, AnalysisError> {
        let mut output = String::new();
        let mut push = |value: serde_json::Value| -> Result<(), AnalysisError> {
            output.push_str(&serde_json::to_string(&value)?);
            output.push('\n');
            Ok(())
        };

        push(json!({
            "type": "summary",
            "strategy": analysis.strategy.to_string(),
            "instructions": analysis.disassembly.len(),
            "undecoded_bytes": analysis.disassembly.undecoded_bytes(),
            "blocks": analysis.blocks.len(),
            "loops": analysis.loops.len(),
            "paths": analysis.paths.as_ref().map(|p| p.len()),
        }))?;

        for insn in analysis.disassembly.iter() {
            let mut record = serde_json::to_value(instruction_to_json(insn))?;
            record["type"] = json!("instruction");
            push(record)?;
        }

        let Some(cfg) = analysis.cfg.as_ref() else {
            return Ok(output);
        };

        for block in &analysis.blocks {
            let mut record = serde_json::to_value(block_to_json(cfg, block))?;
            record["type"] = json!("block");
            push(record)?;
        }

        for found in &analysis.loops {
            let mut record = serde_json::to_value(loop_to_json(cfg, found))?;
            record["type"] = json!("loop");
            push(record)?;
        }

        if let Some(paths) = &analysis.paths {
            for (i, path) in paths.iter().enumerate() {
                push(json!({
                    "type": "path",
                    "index": i,
                    "nodes": node_offsets(cfg, path.nodes()),
                }))?;
            }
        }

        Ok(output)
    }
}

fn instruction_to_json(insn: &Instruction) -> InstructionJson<'static> {
    InstructionJson {
        offset: hex_offset(insn.offset),
        opcode: insn.opcode.to_string(),
        operand: insn.operand_hex(),
        size: insn.size(),
        category: insn.opcode.is_defined().then(|| insn.opcode.category().as_str()),
    }
}

fn node_offsets(cfg: &ControlFlowGraph, nodes: &[NodeId]) -> Vec<String> {
    nodes.iter().map(|id| hex_offset(cfg.offset(*id))).collect()
}

fn block_to_json(cfg: &ControlFlowGraph, block: &crate::Block) -> BlockJson {
    BlockJson {
        start: hex_offset(block.start),
        instructions: node_offsets(cfg, &block.nodes),
        successors: block.succs.iter().map(|succ| hex_offset(*succ)).collect(),
    }
}

fn loop_to_json(cfg: &ControlFlowGraph, found: &crate::Loop) -> LoopJson {
    LoopJson {
        header: hex_offset(cfg.offset(found.header)),
        exit: found.exit.map(|e| hex_offset(cfg.offset(e))),
        nodes: node_offsets(cfg, &found.nodes),
        bounds: found.bounds.iter().map(|b| hex_offset(*b)).collect(),
        invariants: found.invariants.clone(),
    }
}
