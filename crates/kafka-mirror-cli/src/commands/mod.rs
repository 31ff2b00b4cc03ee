pub mod plan;
pub mod run;

use anyhow::Result;
use kafka_mirror_core::Config;
use tracing::info;

/// Load the configuration file and apply command line overrides.
pub fn load_config(
    config_path: &str,
    topics: Vec<String>,
    timeout_secs: Option<u64>,
) -> Result<Config> {
    info!("Loading configuration from: {}", config_path);
    let mut config = Config::from_file(config_path)?;

    if !topics.is_empty() {
        config.topics = topics;
    }
    if let Some(timeout_secs) = timeout_secs {
        config.mirror.timeout_secs = timeout_secs;
    }

    Ok(config)
}
