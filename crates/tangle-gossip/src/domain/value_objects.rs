//! Value objects for gossip configuration and per-neighbor counters.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::entities::HASH_BYTES;
use crate::events::ConfigError;

/// Gossip layer configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct GossipConfig {
    /// Address the router listens on
    pub listen_address: String,
    /// Port the router listens on (0 = any free port)
    pub listen_port: u16,
    /// Wanted neighbors as `tcp://host:port`
    pub neighbors: Vec<String>,
    /// Delay between dial attempts to disconnected wanted neighbors
    pub reconnect_interval_secs: u64,
    /// Maximum number of connected neighbors
    pub max_neighbors: usize,
    /// Accept peers that are not in `neighbors`
    pub auto_tethering: bool,
    /// Minimum weight magnitude peers must agree on and received
    /// transaction hashes must reach (trailing zero bits)
    pub mwm: u8,
    /// Coordinator address as 98 hex characters
    pub coordinator_address: String,
    /// Outbound frames queued per neighbor
    pub send_queue_capacity: usize,

    pub requester_interval_ms: u64,
    /// Pending requests needed before the requester worker sends anything
    pub requester_activation_threshold: usize,
    pub max_requested_transactions: usize,
    /// Chance of dropping a handed-out non-milestone request
    pub p_remove_request: f64,
    /// Age after which a handed-out request is asked for again
    pub recent_request_ttl_secs: u64,

    pub tips_interval_ms: u64,
    pub queue_stats_interval_ms: u64,

    pub solidifier_interval_ms: u64,
    pub solidification_queue_capacity: usize,
    pub broadcast_queue_capacity: usize,
    /// Bound on visited transactions per background solidity check
    pub max_solidity_traversal: usize,
    pub broadcast_interval_ms: u64,

    pub pipeline_queue_capacity: usize,
    /// Chance of answering a random tip request with the latest milestone
    pub p_reply_milestone: f64,
    /// Recently seen transaction payloads remembered by the pipeline
    pub seen_cache_capacity: usize,

    /// Grace period for in-flight ticks on shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 15600,
            neighbors: Vec::new(),
            reconnect_interval_secs: 60,
            max_neighbors: 5,
            auto_tethering: false,
            mwm: 14,
            coordinator_address: "00".repeat(HASH_BYTES),
            send_queue_capacity: 100,
            requester_interval_ms: 100,
            requester_activation_threshold: 50,
            max_requested_transactions: 10_000,
            p_remove_request: 0.01,
            recent_request_ttl_secs: 30,
            tips_interval_ms: 5_000,
            queue_stats_interval_ms: 10_000,
            solidifier_interval_ms: 500,
            solidification_queue_capacity: 10_000,
            broadcast_queue_capacity: 10_000,
            max_solidity_traversal: 300_000,
            broadcast_interval_ms: 100,
            pipeline_queue_capacity: 10_000,
            p_reply_milestone: 0.02,
            seen_cache_capacity: 150_000,
            shutdown_grace_secs: 10,
        }
    }
}

impl GossipConfig {
    /// Config for tests: loopback, any port, fast timers, no proof of work.
    pub fn for_testing() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 0,
            mwm: 0,
            reconnect_interval_secs: 1,
            auto_tethering: true,
            requester_interval_ms: 20,
            tips_interval_ms: 200,
            solidifier_interval_ms: 20,
            broadcast_interval_ms: 20,
            shutdown_grace_secs: 1,
            ..Self::default()
        }
    }

    /// Checks capacities, intervals, probabilities and the coordinator address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("max_neighbors", self.max_neighbors),
            ("send_queue_capacity", self.send_queue_capacity),
            ("max_requested_transactions", self.max_requested_transactions),
            ("solidification_queue_capacity", self.solidification_queue_capacity),
            ("broadcast_queue_capacity", self.broadcast_queue_capacity),
            ("max_solidity_traversal", self.max_solidity_traversal),
            ("pipeline_queue_capacity", self.pipeline_queue_capacity),
            ("seen_cache_capacity", self.seen_cache_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        let intervals = [
            ("reconnect_interval_secs", self.reconnect_interval_secs),
            ("requester_interval_ms", self.requester_interval_ms),
            ("tips_interval_ms", self.tips_interval_ms),
            ("queue_stats_interval_ms", self.queue_stats_interval_ms),
            ("solidifier_interval_ms", self.solidifier_interval_ms),
            ("broadcast_interval_ms", self.broadcast_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        for (name, p) in [
            ("p_remove_request", self.p_remove_request),
            ("p_reply_milestone", self.p_reply_milestone),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!("{name} must be within [0, 1]")));
            }
        }

        for uri in &self.neighbors {
            uri.parse::<NeighborUri>()?;
        }
        self.coordinator_bytes()?;
        Ok(())
    }

    /// Parsed wanted neighbors.
    pub fn neighbor_uris(&self) -> Result<Vec<NeighborUri>, ConfigError> {
        self.neighbors.iter().map(|uri| uri.parse()).collect()
    }

    /// Decodes the coordinator address.
    pub fn coordinator_bytes(&self) -> Result<[u8; HASH_BYTES], ConfigError> {
        let bytes = hex::decode(&self.coordinator_address)
            .map_err(|e| ConfigError::Invalid(format!("coordinator_address: {e}")))?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            ConfigError::Invalid(format!(
                "coordinator_address must be {HASH_BYTES} bytes, got {}",
                b.len()
            ))
        })
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn recent_request_ttl(&self) -> Duration {
        Duration::from_secs(self.recent_request_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// A wanted neighbor, written as `tcp://host:port`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NeighborUri {
    pub host: String,
    pub port: u16,
}

impl NeighborUri {
    /// `host:port`, the form neighbors are identified by once connected.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for NeighborUri {
    type Err = ConfigError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Invalid(format!("neighbor {uri:?}: {reason}"));
        let rest = uri
            .strip_prefix("tcp://")
            .ok_or_else(|| invalid("only tcp:// is supported"))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;
        if port == 0 {
            return Err(invalid("port must be positive"));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for NeighborUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// Per-neighbor traffic counters.
///
/// Each counter is independent, so relaxed atomics are enough.
#[derive(Debug, Default)]
pub struct NeighborMetrics {
    all_transactions: AtomicU64,
    invalid_transactions: AtomicU64,
    stale_transactions: AtomicU64,
    new_transactions: AtomicU64,
    random_transaction_requests: AtomicU64,
    sent_transactions: AtomicU64,
    dropped_send_packets: AtomicU64,
}

/// Point-in-time copy of [`NeighborMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeighborMetricsSnapshot {
    pub all_transactions: u64,
    pub invalid_transactions: u64,
    pub stale_transactions: u64,
    pub new_transactions: u64,
    pub random_transaction_requests: u64,
    pub sent_transactions: u64,
    pub dropped_send_packets: u64,
}

impl NeighborMetrics {
    pub fn incr_all_transactions(&self) {
        self.all_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_invalid_transactions(&self) {
        self.invalid_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_stale_transactions(&self) {
        self.stale_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_new_transactions(&self) {
        self.new_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_random_transaction_requests(&self) {
        self.random_transaction_requests
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sent_transactions(&self) {
        self.sent_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dropped_send_packets(&self) {
        self.dropped_send_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NeighborMetricsSnapshot {
        NeighborMetricsSnapshot {
            all_transactions: self.all_transactions.load(Ordering::Relaxed),
            invalid_transactions: self.invalid_transactions.load(Ordering::Relaxed),
            stale_transactions: self.stale_transactions.load(Ordering::Relaxed),
            new_transactions: self.new_transactions.load(Ordering::Relaxed),
            random_transaction_requests: self.random_transaction_requests.load(Ordering::Relaxed),
            sent_transactions: self.sent_transactions.load(Ordering::Relaxed),
            dropped_send_packets: self.dropped_send_packets.load(Ordering::Relaxed),
        }
    }
}
