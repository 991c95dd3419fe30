//! CSV output formatter

use std::collections::HashMap;

use serde::Serialize;

use crate::analysis::Analysis;
use crate::cfg::NodeId;
use crate::AnalysisError;
use super::{hex_offset, AnalysisFormatter};

/// One CSV row per instruction
#[derive(Serialize)]
struct InstructionRow {
    offset: String,
    block: String,
    opcode: String,
    operand: String,
    size: usize,
    category: &'static str,
    /// Header offset of the first loop containing the instruction
    in_loop: String,
    is_exit: bool,
}

impl AnalysisFormatter for super::CsvFormatter {
    fn format(&self, analysis: &Analysis) -> Result<String, AnalysisError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut block_of: HashMap<NodeId, usize> = HashMap::new();
        for block in &analysis.blocks {
            for id in &block.nodes {
                block_of.insert(*id, block.start);
            }
        }

        let mut loop_of: HashMap<NodeId, NodeId> = HashMap::new();
        for found in &analysis.loops {
            for id in &found.nodes {
                loop_of.entry(*id).or_insert(found.header);
            }
        }

        let cfg = analysis.cfg.as_ref();
        for (position, insn) in analysis.disassembly.iter().enumerate() {
            // Node ids follow instruction order
            let id = NodeId(position);

            writer.serialize(InstructionRow {
                offset: hex_offset(insn.offset),
                block: block_of.get(&id).map(|start| hex_offset(*start)).unwrap_or_default(),
                opcode: insn.opcode.to_string(),
                operand: insn.operand_hex(),
                size: insn.size(),
                category: insn.opcode.category().as_str(),
                in_loop: match (cfg, loop_of.get(&id)) {
                    (Some(cfg), Some(header)) => hex_offset(cfg.offset(*header)),
                    _ => String::new(),
                },
                is_exit: cfg.map_or(false, |cfg| cfg.is_exit(id)),
            })?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AnalysisError::Serialization(format!("CSV flush error: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| AnalysisError::Serialization(format!("CSV is not UTF-8: {}", e)))
    }
}
