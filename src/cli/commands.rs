// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Two subcommands:
//   describe — build the module graph and print its summary
//   probe    — build, then forward one synthetic batch per
//              task and log the metrics
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::probe_use_case::ProbeConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the model from a config file and print the module graph
    Describe(DescribeArgs),

    /// Build the model and run one random batch through every task
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// JSON experiment config
    #[arg(long)]
    pub config: String,

    /// JSON vocabulary { "tokens": [...], "chars": [...] };
    /// a synthetic one is generated when omitted
    #[arg(long)]
    pub vocab: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// JSON experiment config
    #[arg(long)]
    pub config: String,

    /// JSON vocabulary; synthetic when omitted
    #[arg(long)]
    pub vocab: Option<String>,

    /// Sentences per batch
    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    /// Maximum sentence length in words
    #[arg(long, default_value_t = 12)]
    pub seq_len: usize,

    /// Where task_metrics.csv is appended
    #[arg(long, default_value = "metrics")]
    pub metrics_dir: String,

    /// Seed for the synthetic vocabulary and batches
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// The application layer never sees clap types.
impl From<ProbeArgs> for ProbeConfig {
    fn from(a: ProbeArgs) -> Self {
        ProbeConfig {
            config_path: a.config,
            vocab_path:  a.vocab,
            batch_size:  a.batch_size,
            seq_len:     a.seq_len,
            metrics_dir: a.metrics_dir,
            seed:        a.seed,
        }
    }
}
