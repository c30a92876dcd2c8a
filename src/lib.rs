//! msgvault - Multi-client message board with encryption at rest
//!
//! This library provides the server core: a bounded connection queue, a
//! fixed worker pool, the shared encrypted message store and the
//! per-connection menu protocol.

pub mod vault;

pub use vault::{MessageServer, ServerConfig};
