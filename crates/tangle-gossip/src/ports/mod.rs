//! Ports layer: traits at the hexagon's edges.

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
