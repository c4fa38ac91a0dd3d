//! # Node Runtime Library
//!
//! Process bootstrap for the gossip node. The entry point is the `main.rs`
//! binary; configuration loading lives here so it can be tested.

use std::path::Path;

use anyhow::{Context, Result};
use tangle_gossip::adapters::TomlConfigProvider;
use tangle_gossip::GossipConfig;
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "TANGLE_GOSSIP_CONFIG";
/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "TANGLE_GOSSIP_PORT";
/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "gossip.toml";

/// Loads the config at `path`, falling back to defaults when the file does
/// not exist, then applies the listen port override.
pub fn load_config(path: &Path, port_override: Option<&str>) -> Result<GossipConfig> {
    let mut config = if path.exists() {
        let provider = TomlConfigProvider::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        provider.into_config()
    } else {
        info!(path = %path.display(), "no config file, using defaults");
        GossipConfig::default()
    };

    if let Some(port) = port_override {
        match port.parse() {
            Ok(port) => config.listen_port = port,
            Err(_) => warn!(%port, "{PORT_ENV} is not a valid port, ignoring"),
        }
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}
