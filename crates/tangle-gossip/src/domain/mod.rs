//! Domain layer: pure types and logic, no I/O.

pub mod bounded_queue;
pub mod entities;
pub mod handshake;
pub mod protocol;
pub mod seen_cache;
pub mod value_objects;

pub use bounded_queue::*;
pub use entities::*;
pub use handshake::*;
pub use protocol::*;
pub use seen_cache::*;
pub use value_objects::*;
