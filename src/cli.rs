//! clap-based command-line surface.
//!
//! The binary takes no required arguments; every flag overrides the
//! corresponding `atb.toml` value for this invocation only.

use clap::Parser;
use std::path::PathBuf;

use crate::config::AtbConfig;

/// Batch driver for the AutoTruckBuilder configuration build service.
#[derive(Debug, Parser)]
#[command(name = "atb-batch", version, about)]
pub struct Cli {
    /// Directory containing the spec sheets to process.
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Directory build artifacts are written to.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of jobs in flight at once.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Attempts per network-calling stage before a job fails.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Disable TLS certificate verification (debug only).
    #[arg(long, default_value_t = false)]
    pub insecure: bool,

    /// Enable verbose output.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Fold the command-line overrides into the loaded configuration.
    pub fn apply_to(&self, config: &mut AtbConfig) {
        if let Some(dir) = &self.input_dir {
            config.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if let Some(n) = self.max_retries {
            config.max_attempts = n;
        }
        if self.insecure {
            config.tls.skip_verify = true;
        }
    }
}
