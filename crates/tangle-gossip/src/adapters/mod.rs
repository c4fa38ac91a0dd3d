//! Adapters: TCP router, TOML config and the in-memory tangle.

pub mod config;
pub mod memory;
pub mod router;

pub use config::TomlConfigProvider;
pub use memory::InMemoryTangle;
pub use router::NeighborRouter;
