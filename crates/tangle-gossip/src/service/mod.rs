//! Service layer: the workers that move transactions between neighbors and
//! the tangle.

pub mod broadcaster;
pub mod gossip;
pub mod node;
pub mod pipeline;
pub mod requester;
pub mod requester_worker;
pub mod scheduler;
pub mod solidifier;
pub mod tips_requester;

pub use broadcaster::TransactionBroadcaster;
pub use gossip::TransactionGossiper;
pub use node::{GossipNode, NodePorts};
pub use pipeline::TransactionProcessingPipeline;
pub use requester::{RequesterConfig, TransactionRequester};
pub use requester_worker::TransactionRequesterWorker;
pub use scheduler::{spawn_periodic, ScheduledTask};
pub use solidifier::TransactionSolidifier;
pub use tips_requester::{QueueStats, TipsRequester};
