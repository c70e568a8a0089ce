//! `debugmode-operator` entry point.
//!
//! Loads the configuration, installs the subscriber and runs the dispatcher
//! against the local ecosystem until Ctrl+C.

use anyhow::Context;
use debugmode_operator::config::OperatorConfig;
use debugmode_operator::local::LocalEcosystem;
use debugmode_operator::{local_dispatcher, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::load().context("failed to load operator configuration")?;
    logging::init(&config.log_level);

    tracing::info!(
        namespace = %config.namespace,
        ecosystem_root = %config.ecosystem_root.display(),
        poll_interval = ?config.poll_interval(),
        "debugmode-operator v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let ecosystem = LocalEcosystem::open(&config.ecosystem_root, &config.namespace)
        .context("failed to open local ecosystem")?;
    let dispatcher = local_dispatcher(&config, &ecosystem);

    // Shutdown coordination via watch channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await;

    tracing::info!("debugmode-operator exiting cleanly");
    Ok(())
}
