//! CLI entrypoint for the QuickAlloc harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use quickalloc_core::log::to_jsonl;
use quickalloc_harness::{SizeClassReport, StressOptions, load_config, stress};

/// Inspection and stress tooling for QuickAlloc.
#[derive(Debug, Parser)]
#[command(name = "quickalloc-harness")]
#[command(about = "Size-class inspection and concurrent stress runs for QuickAlloc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the size-class table a configuration produces.
    SizeClasses {
        /// JSON configuration file (fields default when missing).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overlay `QUICKALLOC_*` environment variables on the defaults.
        #[arg(long)]
        from_env: bool,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a seeded concurrent malloc/realloc/free workload.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Operations per thread.
        #[arg(long, default_value_t = 10_000)]
        iterations: usize,
        /// Largest request size in bytes.
        #[arg(long, default_value_t = 4096)]
        max_size: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0x5EED")]
        seed: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        from_env: bool,
        /// Output report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write the instance's lifecycle records as JSONL.
        #[arg(long)]
        log_output: Option<PathBuf>,
    },
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|err| format!("invalid seed {raw:?}: {err}"))
}

fn emit(text: &str, output: Option<PathBuf>) -> std::io::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, text)?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::SizeClasses {
            config,
            from_env,
            output,
        } => {
            let config = load_config(config.as_deref(), from_env)?;
            let report = SizeClassReport::build(&config)?;
            emit(&report.to_json()?, output)?;
        }
        Command::Stress {
            threads,
            iterations,
            max_size,
            seed,
            config,
            from_env,
            output,
            log_output,
        } => {
            let config = load_config(config.as_deref(), from_env)?;
            let options = StressOptions {
                threads,
                iterations,
                max_size,
                seed: parse_seed(&seed)?,
            };
            eprintln!(
                "Stress: {threads} threads x {iterations} ops, max_size={max_size}, seed={:#x}",
                options.seed
            );
            let (report, alloc) = stress::run_stress(config, options)?;
            emit(&report.to_json()?, output)?;
            if let Some(path) = log_output {
                std::fs::write(&path, to_jsonl(&alloc.drain_lifecycle_logs())?)?;
                eprintln!("Wrote {}", path.display());
            }
            if !report.passed {
                return Err(format!("stress run found {} violations", report.violation_count).into());
            }
        }
    }
    Ok(())
}
