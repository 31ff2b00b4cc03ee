use anyhow::Result;
use kafka_mirror_core::MirrorEngine;
use tracing::{error, info};

pub async fn run(config_path: &str, topics: Vec<String>, timeout_secs: Option<u64>) -> Result<()> {
    let config = super::load_config(config_path, topics, timeout_secs)?;

    let engine = MirrorEngine::new(config)?;
    info!(
        "Mirroring topics: {}",
        engine.run_config().topics.to_specs().join(", ")
    );

    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let summary = engine.run().await?;

    info!(
        "Mirror stopped after forwarding {} record(s)",
        summary.metrics.records_forwarded
    );
    Ok(())
}
