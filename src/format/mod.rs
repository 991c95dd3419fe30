//! Output format module implementation

mod json;
mod csv;
mod ngram;

pub use self::json::*;
pub use self::csv::*;
pub use self::ngram::*;

use crate::analysis::Analysis;
use crate::{AnalysisError, Offset};
use std::fmt;
use std::str::FromStr;
use clap::ValueEnum;

/// Supported output formats for analysis results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text listing grouped by block (default)
    #[default]
    Text,
    /// JSON document
    Json,
    /// JSON Lines (one record per instruction, block, loop or path)
    #[value(name = "jsonl", alias = "jsonlines")]
    JsonLines,
    /// CSV, one row per instruction
    Csv,
    /// Opcode n-gram histogram for fingerprinting
    Ngram,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Ngram => write!(f, "ngram"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            "ngram" | "ngrams" => Ok(OutputFormat::Ngram),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
            OutputFormat::Ngram,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self, ngram_params: Option<NgramParams>) -> Box<dyn AnalysisFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
            OutputFormat::Ngram => Box::new(NgramFormatter::new(ngram_params.unwrap_or_default())),
        }
    }
}

/// Parameters for n-gram generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NgramParams {
    /// Number of consecutive instructions per n-gram
    pub n: usize,
    /// Append PUSH operands to mnemonics
    pub include_operands: bool,
}

impl Default for NgramParams {
    fn default() -> Self {
        Self {
            n: 3,
            include_operands: false,
        }
    }
}

/// Formatter trait for analysis output
pub trait AnalysisFormatter {
    /// Render one analysis result
    fn format(&self, analysis: &Analysis) -> Result<String, AnalysisError>;
}

/// Format analysis as a plain text listing
pub struct TextFormatter;

/// Format analysis as one JSON document
pub struct JsonFormatter;

/// Format analysis as JSON Lines
pub struct JsonLinesFormatter;

/// Format instructions as CSV
pub struct CsvFormatter;

/// Format instructions as opcode n-grams
pub struct NgramFormatter {
    params: NgramParams,
}

impl NgramFormatter {
    pub fn new(params: NgramParams) -> Self {
        Self { params }
    }
}

impl Default for NgramFormatter {
    fn default() -> Self {
        Self::new(NgramParams::default())
    }
}

pub(crate) fn hex_offset(offset: Offset) -> String {
    format!("0x{:x}", offset)
}

fn join_offsets(offsets: impl IntoIterator<Item = Offset>) -> String {
    offsets
        .into_iter()
        .map(|o| format!("0x{:06x}", o))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AnalysisFormatter for TextFormatter {
    fn format(&self, analysis: &Analysis) -> Result<String, AnalysisError> {
        let mut output = String::new();
        let disassembly = &analysis.disassembly;

        output.push_str(&format!(
            "{}: {} instructions, {} bytes undecoded\n\n",
            analysis.strategy,
            disassembly.len(),
            disassembly.undecoded_bytes()
        ));

        let Some(cfg) = analysis.cfg.as_ref() else {
            output.push_str("No instructions decoded\n");
            return Ok(output);
        };

        for block in &analysis.blocks {
            output.push_str(&format!("Block at 0x{:06x}:\n", block.start));
            for id in &block.nodes {
                let marker = if cfg.is_exit(*id) { "  ; exit" } else { "" };
                output.push_str(&format!("  {}{}\n", cfg.instruction(*id), marker));
            }

            if block.succs.is_empty() {
                output.push_str("  No successors\n");
            } else {
                output.push_str(&format!("  Successors: {}\n", join_offsets(block.succs.iter().copied())));
            }
            output.push('\n');
        }

        let dangling: Vec<Offset> = analysis.index.dangling_jumps().map(|j| j.offset).collect();
        if !dangling.is_empty() {
            output.push_str(&format!("Dangling jumps: {}\n\n", join_offsets(dangling)));
        }

        output.push_str(&format!("Loops: {}\n", analysis.loops.len()));
        for found in &analysis.loops {
            output.push_str(&format!(
                "  header 0x{:06x}, {} nodes, exit {}",
                cfg.offset(found.header),
                found.len(),
                found
                    .exit
                    .map(|e| format!("0x{:06x}", cfg.offset(e)))
                    .unwrap_or_else(|| "none".to_string())
            ));
            if !found.bounds.is_empty() {
                output.push_str(&format!(", bounds [{}]", join_offsets(found.bounds.iter().copied())));
            }
            if !found.invariants.is_empty() {
                output.push_str(&format!(", invariants [{}]", found.invariants.join(", ")));
            }
            output.push('\n');
        }

        if let Some(paths) = &analysis.paths {
            output.push_str(&format!(
                "\nPaths: {}{}\n",
                paths.len(),
                if paths.truncated { " (truncated)" } else { "" }
            ));
            for path in paths {
                output.push_str(&format!(
                    "  {}\n",
                    path.nodes()
                        .iter()
                        .map(|id| format!("0x{:x}", cfg.offset(*id)))
                        .collect::<Vec<_>>()
                        .join(" -> ")
                ));
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze, AnalysisOptions};

    pub(crate) fn sample_analysis() -> Analysis {
        // 0: JUMPDEST  1: PUSH1 0x01  3: ADD  4: PUSH1 0x00  6: JUMPI -> 0  7: RETURN
        let bytes = [0x5b, 0x60, 0x01, 0x01, 0x60, 0x00, 0x57, 0xf3];
        analyze(&bytes, &AnalysisOptions::default()).unwrap()
    }

    #[test]
    fn test_text_formatter() {
        let analysis = sample_analysis();
        let result = TextFormatter.format(&analysis).unwrap();

        assert!(result.starts_with("Linear sweep: 6 instructions, 0 bytes undecoded"));
        assert!(result.contains("Block at 0x000000:"));
        assert!(result.contains("  000001  PUSH1    0x01"));
        assert!(result.contains("Successors: 0x000007, 0x000000"));
        assert!(result.contains("000007  RETURN  ; exit"));
        assert!(result.contains("Loops: 1"));
        assert!(result.contains("invariants [0x01]"));
        assert!(result.contains("Paths: 2"));
        assert!(result.contains("0x0 -> 0x1 -> 0x3 -> 0x4 -> 0x6 -> 0x7"));
    }

    #[test]
    fn test_text_formatter_empty() {
        let analysis = analyze(&[0x60], &AnalysisOptions::default()).unwrap();
        let result = TextFormatter.format(&analysis).unwrap();
        assert!(result.contains("0 instructions, 1 bytes undecoded"));
        assert!(result.contains("No instructions decoded"));
    }

    #[test]
    fn test_format_round_trips_through_str() {
        for format in OutputFormat::available_formats() {
            assert_eq!(format.to_string().parse::<OutputFormat>(), Ok(*format));
        }
        assert_eq!("JSONLines".parse::<OutputFormat>(), Ok(OutputFormat::JsonLines));
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn test_every_formatter_handles_sample() {
        let analysis = sample_analysis();
        for format in OutputFormat::available_formats() {
            let output = format.get_formatter(None).format(&analysis).unwrap();
            assert!(!output.is_empty(), "{} produced no output", format);
        }
    }
}
