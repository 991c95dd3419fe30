//! End-to-end pipeline: bytes to instructions, graph, blocks, loops and paths.

use std::time::Instant;

use rayon::prelude::*;

use crate::blocks::{create_blocks, Block};
use crate::cfg::ControlFlowGraph;
use crate::decoder::EvmDecoder;
use crate::index::InstructionIndex;
use crate::loops::{detect_loops, Loop};
use crate::paths::{find_all_paths, PathOptions, PathSet};
use crate::strategy::Strategy;
use crate::{AnalysisError, Disassembly};

/// Knobs for [`analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub strategy: Strategy,
    /// Run the path enumerator
    pub enumerate_paths: bool,
    pub path_options: PathOptions,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            enumerate_paths: true,
            path_options: PathOptions::default()
                .with_max_paths(10_000)
                .with_max_steps(1_000_000),
        }
    }
}

/// Everything derived from one bytecode buffer.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub strategy: Strategy,
    pub disassembly: Disassembly,
    /// `None` when nothing decoded, e.g. a lone truncated PUSH
    pub cfg: Option<ControlFlowGraph>,
    pub index: InstructionIndex,
    pub blocks: Vec<Block>,
    pub loops: Vec<Loop>,
    /// `None` unless [`AnalysisOptions::enumerate_paths`] is set
    pub paths: Option<PathSet>,
}

impl Analysis {
    /// Bytes covered plus bytes left undecoded, always the input length.
    pub fn input_len(&self) -> usize {
        self.disassembly.decoded_bytes() + self.disassembly.undecoded_bytes()
    }
}

/// Decompile `bytes` and run every structural pass over the result.
///
/// Only empty input is an error. Truncated code, dangling jumps and
/// disconnected regions show up in the shape of the result.
pub fn analyze(bytes: &[u8], options: &AnalysisOptions) -> Result<Analysis, AnalysisError> {
    let start = Instant::now();
    let disassembly = options.strategy.run(bytes, &EvmDecoder)?;
    let index = InstructionIndex::new(disassembly.instructions());

    let mut analysis = Analysis {
        strategy: options.strategy,
        disassembly,
        cfg: None,
        index,
        blocks: Vec::new(),
        loops: Vec::new(),
        paths: options.enumerate_paths.then(PathSet::default),
    };

    if analysis.disassembly.is_empty() {
        log::warn!("No instructions decoded from {} bytes", bytes.len());
        return Ok(analysis);
    }

    let cfg = ControlFlowGraph::from_disassembly(&analysis.disassembly)?;

    analysis.blocks = create_blocks(&cfg);
    analysis.loops = detect_loops(&cfg);
    if options.enumerate_paths {
        analysis.paths = Some(find_all_paths(&cfg, &analysis.loops, &options.path_options));
    }
    analysis.cfg = Some(cfg);

    log::info!(
        "Analyzed {} bytes: {} instructions, {} blocks, {} loops in {:?}",
        bytes.len(),
        analysis.disassembly.len(),
        analysis.blocks.len(),
        analysis.loops.len(),
        start.elapsed()
    );

    Ok(analysis)
}

/// Analyze independent contracts in parallel. Results keep the input order
/// and one failure does not affect the others.
pub fn analyze_batch<B>(contracts: &[B], options: &AnalysisOptions) -> Vec<Result<Analysis, AnalysisError>>
where
    B: AsRef<[u8]> + Sync,
{
    log::debug!("Analyzing {} contracts", contracts.len());
    contracts
        .par_iter()
        .map(|bytes| analyze(bytes.as_ref(), options))
        .collect()
}
