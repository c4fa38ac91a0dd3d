//! TOML configuration loading.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::domain::GossipConfig;
use crate::events::ConfigError;

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    network: NetworkSection,
    #[serde(default)]
    protocol: ProtocolSection,
    #[serde(default)]
    requester: RequesterSection,
    #[serde(default)]
    solidifier: SolidifierSection,
    #[serde(default)]
    pipeline: PipelineSection,
    #[serde(default)]
    node: NodeSection,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSection {
    listen_address: Option<String>,
    listen_port: Option<u16>,
    neighbors: Option<Vec<String>>,
    reconnect_interval_secs: Option<u64>,
    max_neighbors: Option<usize>,
    auto_tethering: Option<bool>,
    send_queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ProtocolSection {
    mwm: Option<u8>,
    coordinator_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RequesterSection {
    interval_ms: Option<u64>,
    activation_threshold: Option<usize>,
    max_requested_transactions: Option<usize>,
    p_remove_request: Option<f64>,
    recent_request_ttl_secs: Option<u64>,
    tips_interval_ms: Option<u64>,
    queue_stats_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SolidifierSection {
    interval_ms: Option<u64>,
    solidification_queue_capacity: Option<usize>,
    broadcast_queue_capacity: Option<usize>,
    max_traversal: Option<usize>,
    broadcast_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSection {
    queue_capacity: Option<usize>,
    p_reply_milestone: Option<f64>,
    seen_cache_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSection {
    shutdown_grace_secs: Option<u64>,
}

/// TOML-based configuration provider.
///
/// Every key is optional and falls back to [`GossipConfig::default`].
///
/// # Config File Format
///
/// ```toml
/// [network]
/// listen_address = "0.0.0.0"
/// listen_port = 15600
/// neighbors = ["tcp://10.0.0.2:15600"]
/// max_neighbors = 5
/// auto_tethering = false
///
/// [protocol]
/// mwm = 14
/// coordinator_address = "<98 hex characters>"
///
/// [requester]
/// interval_ms = 100
/// activation_threshold = 50
///
/// [solidifier]
/// interval_ms = 500
/// max_traversal = 300000
///
/// [pipeline]
/// p_reply_milestone = 0.02
/// seen_cache_capacity = 150000
///
/// [node]
/// shutdown_grace_secs = 10
/// ```
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    config: GossipConfig,
}

impl TomlConfigProvider {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses and validates a config from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let defaults = GossipConfig::default();

        let ConfigFile {
            network,
            protocol,
            requester,
            solidifier,
            pipeline,
            node,
        } = file;

        let config = GossipConfig {
            listen_address: network.listen_address.unwrap_or(defaults.listen_address),
            listen_port: network.listen_port.unwrap_or(defaults.listen_port),
            neighbors: network.neighbors.unwrap_or(defaults.neighbors),
            reconnect_interval_secs: network
                .reconnect_interval_secs
                .unwrap_or(defaults.reconnect_interval_secs),
            max_neighbors: network.max_neighbors.unwrap_or(defaults.max_neighbors),
            auto_tethering: network.auto_tethering.unwrap_or(defaults.auto_tethering),
            send_queue_capacity: network
                .send_queue_capacity
                .unwrap_or(defaults.send_queue_capacity),

            mwm: protocol.mwm.unwrap_or(defaults.mwm),
            coordinator_address: protocol
                .coordinator_address
                .unwrap_or(defaults.coordinator_address),

            requester_interval_ms: requester.interval_ms.unwrap_or(defaults.requester_interval_ms),
            requester_activation_threshold: requester
                .activation_threshold
                .unwrap_or(defaults.requester_activation_threshold),
            max_requested_transactions: requester
                .max_requested_transactions
                .unwrap_or(defaults.max_requested_transactions),
            p_remove_request: requester.p_remove_request.unwrap_or(defaults.p_remove_request),
            recent_request_ttl_secs: requester
                .recent_request_ttl_secs
                .unwrap_or(defaults.recent_request_ttl_secs),
            tips_interval_ms: requester.tips_interval_ms.unwrap_or(defaults.tips_interval_ms),
            queue_stats_interval_ms: requester
                .queue_stats_interval_ms
                .unwrap_or(defaults.queue_stats_interval_ms),

            solidifier_interval_ms: solidifier
                .interval_ms
                .unwrap_or(defaults.solidifier_interval_ms),
            solidification_queue_capacity: solidifier
                .solidification_queue_capacity
                .unwrap_or(defaults.solidification_queue_capacity),
            broadcast_queue_capacity: solidifier
                .broadcast_queue_capacity
                .unwrap_or(defaults.broadcast_queue_capacity),
            max_solidity_traversal: solidifier
                .max_traversal
                .unwrap_or(defaults.max_solidity_traversal),
            broadcast_interval_ms: solidifier
                .broadcast_interval_ms
                .unwrap_or(defaults.broadcast_interval_ms),

            pipeline_queue_capacity: pipeline
                .queue_capacity
                .unwrap_or(defaults.pipeline_queue_capacity),
            p_reply_milestone: pipeline.p_reply_milestone.unwrap_or(defaults.p_reply_milestone),
            seen_cache_capacity: pipeline
                .seen_cache_capacity
                .unwrap_or(defaults.seen_cache_capacity),

            shutdown_grace_secs: node.shutdown_grace_secs.unwrap_or(defaults.shutdown_grace_secs),
        };
        config.validate()?;

        Ok(Self { config })
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn into_config(self) -> GossipConfig {
        self.config
    }
}
