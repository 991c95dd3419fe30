use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use evm_flowgraph::{
    analysis::{analyze, analyze_batch, AnalysisOptions},
    format::{NgramParams, OutputFormat},
    parse_hex, PathOptions, Strategy,
};
use tracing_subscriber::EnvFilter;

/// Decompile EVM bytecode and print its control-flow structure
#[derive(Parser, Debug)]
#[command(name = "evmflow", version)]
struct Args {
    /// Bytecode as a hex string (0x...) or a path to a file holding hex
    input: String,

    /// Decoding strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Linear)]
    strategy: Strategy,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip path enumeration
    #[arg(long)]
    no_paths: bool,

    /// Stop path enumeration after this many paths
    #[arg(long, default_value_t = 10_000)]
    max_paths: usize,

    /// Stop path enumeration after this many node visits
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: usize,

    /// Instructions per n-gram (ngram format only)
    #[arg(long, default_value_t = 3)]
    ngram_size: usize,

    /// Include PUSH operands in n-grams
    #[arg(long)]
    ngram_operands: bool,

    /// Treat the input file as one contract per line and analyze them in parallel
    #[arg(long)]
    batch: bool,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let options = AnalysisOptions {
        strategy: args.strategy,
        enumerate_paths: !args.no_paths,
        path_options: PathOptions::default()
            .with_max_paths(args.max_paths)
            .with_max_steps(args.max_steps),
    };
    let formatter = args.format.get_formatter(Some(NgramParams {
        n: args.ngram_size,
        include_operands: args.ngram_operands,
    }));

    let text = read_input(&args.input)?;
    let rendered = if args.batch {
        let contracts = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .enumerate()
            .map(|(i, line)| parse_hex(line).with_context(|| format!("Invalid hex on contract {}", i + 1)))
            .collect::<Result<Vec<_>>>()?;

        let mut sections = Vec::with_capacity(contracts.len());
        for (i, result) in analyze_batch(&contracts, &options).into_iter().enumerate() {
            match result {
                Ok(analysis) => sections.push(formatter.format(&analysis)?),
                Err(e) => log::warn!("Contract {} skipped: {}", i + 1, e),
            }
        }
        sections.join("\n")
    } else {
        let bytes = parse_hex(&text).context("Input is not valid hex")?;
        let analysis = analyze(&bytes, &options).context("Analysis failed")?;
        formatter.format(&analysis)?
    };

    match &args.output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", rendered),
    }

    Ok(())
}

/// The argument itself when it looks like hex, otherwise the contents of the
/// file it names.
fn read_input(input: &str) -> Result<String> {
    let path = Path::new(input);
    if !input.starts_with("0x") && path.is_file() {
        return fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()));
    }
    if input.trim().is_empty() {
        bail!("No bytecode given");
    }
    Ok(input.to_string())
}
