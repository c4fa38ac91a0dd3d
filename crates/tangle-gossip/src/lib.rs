//! # Tangle Gossip
//!
//! Peer gossip layer of a tangle node: moves transactions between neighbors
//! over a small binary protocol, requests missing ancestors and relays new
//! transactions to the other neighbors, again once their ancestry is solid.
//!
//! ## Data Flow
//!
//! ```text
//! socket ──→ MessageReader ──→ Neighbor ──gossip──→ TransactionProcessingPipeline
//!                                  ↑                        │ store
//!                                  │                        ↓
//!      send queue ←── TransactionGossiper ←── TransactionSolidifier ──missing──→ TransactionRequester
//!           ↑                                        │ solid
//!           └──────────── TransactionBroadcaster ←───┘
//! ```
//!
//! ## Layout
//!
//! - `domain`: wire format, handshake rules, bounded queues, config
//! - `neighbor`: per-connection read state machine and send queue
//! - `service`: requester, solidifier, pipeline and the periodic workers
//! - `adapters`: tokio TCP router, TOML config, in-memory tangle

pub mod adapters;
pub mod domain;
pub mod events;
pub mod neighbor;
pub mod ports;
pub mod service;

pub use domain::*;
pub use events::{ConfigError, GossipError, NeighborError, ProtocolError, StoreError};
pub use service::{GossipNode, NodePorts};
