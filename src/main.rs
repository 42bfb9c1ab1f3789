mod auth;
mod cli;
mod config;
mod error;
mod limiter;
mod orchestrator;
mod remote;
mod report;
mod sink;
mod source;
mod state_machine;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::{CredentialManager, HttpAuthEndpoint};
use crate::cli::Cli;
use crate::config::AtbConfig;
use crate::limiter::JobLimiter;
use crate::orchestrator::Orchestrator;
use crate::remote::{http_client, BuildClient};
use crate::ui::ProgressBoard;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    // Quiet the HTTP internals unless explicitly requested via RUST_LOG.
    let default = if verbose {
        "atb_batch=debug,hyper=warn,reqwest=warn"
    } else {
        "info,hyper=warn,reqwest=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = AtbConfig::load().context("failed to load atb.toml")?;
    cli.apply_to(&mut config);

    info!(mode = %config.tls.mode(), "TLS verify");

    let sheets = source::pick_spec_sheets(&config.input_dir)?;
    if sheets.is_empty() {
        println!("No spec sheets found in '{}'.", config.input_dir.display());
        return Ok(true);
    }
    let vms = source::read_vms_filter(&config.input_dir);

    let http = http_client(&config.tls)?;
    let endpoint = HttpAuthEndpoint::new(
        http.clone(),
        config.auth_url.clone(),
        config.client_id.clone(),
        config.client_secret.clone(),
    );
    let creds = Arc::new(CredentialManager::new(endpoint));
    let build = Arc::new(BuildClient::new(http, config.base_url.clone()));
    let limiter = Arc::new(JobLimiter::new(config.concurrency));
    let board = Arc::new(ProgressBoard::new());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        }
    });

    let orchestrator = Arc::new(Orchestrator::new(
        build, creds, limiter, board, config, vms, cancel,
    ));
    let summary = orchestrator.run(sheets).await;

    println!("{}", summary.render());
    let failed = summary.total - summary.succeeded();
    if failed > 0 {
        eprintln!("⚠ {failed} job(s) failed. Check the log above.");
    }
    Ok(failed == 0)
}
