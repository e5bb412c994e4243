// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands off to Layer 2.
//
//   sentmtl describe --config exp.json [--vocab vocab.json]
//   sentmtl probe    --config exp.json [--batch-size 4]
//                    [--seq-len 12] [--metrics-dir metrics]
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, DescribeArgs, ProbeArgs};

#[derive(Parser, Debug)]
#[command(
    name = "sentmtl",
    version = "0.1.0",
    about = "Build a multi-task sentence encoder from a config and probe its task heads."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Describe(args) => run_describe(args),
            Commands::Probe(args)    => run_probe(args),
        }
    }
}

fn run_describe(args: DescribeArgs) -> Result<()> {
    use crate::application::build_use_case::BuildUseCase;

    let summary = BuildUseCase::new(args.config, args.vocab).execute()?;
    println!("{summary}");
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    use crate::application::probe_use_case::ProbeUseCase;

    tracing::info!("Probing tasks from config: {}", args.config);
    let rows = ProbeUseCase::new(args.into()).execute()?;

    println!("{:<16} {:<24} {:>10} {:>10} {:>10}", "task", "kind", "loss", "primary", "secondary");
    let cell = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |x| format!("{x:.4}"));
    for r in &rows {
        println!(
            "{:<16} {:<24} {:>10} {:>10.4} {:>10}",
            r.task,
            r.kind,
            cell(r.loss),
            r.primary,
            cell(r.secondary)
        );
    }
    Ok(())
}
