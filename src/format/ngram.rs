//! N-gram output formatter for opcode fingerprinting

use std::collections::HashMap;
use serde_json::json;

use crate::analysis::Analysis;
use crate::{AnalysisError, Instruction};
use super::{AnalysisFormatter, NgramFormatter};

impl NgramFormatter {
    fn token(&self, insn: &Instruction) -> String {
        if self.params.include_operands && !insn.operand.is_empty() {
            format!("{}_{}", insn.opcode, insn.operand_hex())
        } else {
            insn.opcode.to_string()
        }
    }

    /// Count every window of `n` consecutive instructions, most frequent
    /// first. Ties are broken alphabetically so output is stable.
    pub fn count(&self, instructions: &[Instruction]) -> Vec<(String, usize)> {
        let n = self.params.n;
        if n == 0 || instructions.len() < n {
            return Vec::new();
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for window in instructions.windows(n) {
            let ngram = window
                .iter()
                .map(|insn| self.token(insn))
                .collect::<Vec<_>>()
                .join(" ");
            *counts.entry(ngram).or_insert(0) += 1;
        }

        let mut ngrams: Vec<(String, usize)> = counts.into_iter().collect();
        ngrams.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ngrams
    }
}

impl AnalysisFormatter for NgramFormatter {
    fn format(&self, analysis: &Analysis) -> Result<String, AnalysisError> {
        let instructions = analysis.disassembly.instructions();
        let n = self.params.n;

        if n == 0 || instructions.len() < n {
            return Ok(json!({
                "n": n,
                "include_operands": self.params.include_operands,
                "ngrams": [],
                "warning": format!("Not enough instructions for {}-grams (found {})",
                                n, instructions.len())
            })
            .to_string());
        }

        let ngrams = self.count(instructions);
        let windows = instructions.len() - n + 1;

        let result = json!({
            "n": n,
            "include_operands": self.params.include_operands,
            "total_instructions": instructions.len(),
            "unique_ngrams": ngrams.len(),
            "ngrams": ngrams.into_iter().map(|(sequence, count)| {
                json!({
                    "sequence": sequence,
                    "count": count,
                    "percentage": count as f64 / windows as f64 * 100.0
                })
            }).collect::<Vec<_>>()
        });

        Ok(serde_json::to_string_pretty(&result)?)
    }
}
