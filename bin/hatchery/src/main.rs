//! hatchery deploys, upgrades and verifies EVM smart contracts from compiled artifacts.

mod cli;
mod config;
mod report;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use cli::Cli;
use config::HatcheryConfig;
use hatchery_deploy::{
    ArtifactDir, DeploymentLedger, EtherscanVerifier, JsonRpcChainClient, Orchestrator,
    ProcessEnv, cancel_pair,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = HatcheryConfig::load(cli.config.as_deref(), &cli.overrides())?;

    // Placeholders are resolved before connecting so a missing value never reaches the chain.
    let mut request = cli.command.request(&config);
    request
        .resolve_placeholders(&ProcessEnv)
        .context("Failed to resolve deployment arguments")?;

    tracing::info!(
        network = %config.network,
        rpc_url = %config.rpc_url,
        artifacts = %config.artifacts.display(),
        "Loaded configuration"
    );

    let client = JsonRpcChainClient::connect(config.rpc_url()?, config.from).await?;
    let chain_id = client.chain_id();

    let artifacts = ArtifactDir::new(&config.artifacts);
    let verifier = EtherscanVerifier::new(
        config.explorer_url()?,
        config.explorer.api_key.clone(),
        artifacts.clone(),
    )?
    .with_chain_id(chain_id);

    let orchestrator = Orchestrator::new(client, artifacts)
        .with_verifier(verifier)
        .with_settings(config.settings());

    let (handle, mut cancel) = cancel_pair();
    if let Some(timeout) = config.run_timeout() {
        cancel = cancel.with_timeout(timeout);
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling the run...");
            handle.cancel();
        }
    });

    let outcome = orchestrator.run(request, cancel).await;

    println!("{}", report::render(&outcome, outcome.exit));

    if config.ledger {
        let ledger = DeploymentLedger::for_network(&config.ledger_dir, &outcome.network);
        match ledger.append(&outcome) {
            Ok(()) => tracing::info!(path = %ledger.path().display(), "Outcome recorded"),
            Err(e) => tracing::warn!(
                path = %ledger.path().display(),
                error = %format!("{e:#}"),
                "Failed to record outcome"
            ),
        }
    }

    Ok(outcome.exit.into())
}
