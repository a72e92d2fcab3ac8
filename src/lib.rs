//! Drover - Primary-Replica Replication Manager for MySQL
//!
//! Drover fronts a fleet of MySQL servers with a thin coordination layer:
//! one node plays primary, commits client writes locally, and pushes every
//! operation to its replicas over HTTP. Replicas apply what they receive,
//! probe the primary for liveness, and elect a replacement when it goes
//! quiet.
//!
//! # Architecture
//!
//! Writes favor availability over strict consistency. The primary answers
//! the client as soon as its own commit lands; replicas catch up through
//! per-peer FIFO queues with bounded retries, and an operation that
//! exhausts its retries is logged and dropped. Cluster agreement rides on
//! a monotonically increasing epoch: promotions require a strictly higher
//! epoch, stale epochs are rejected on the wire, and a deposed primary
//! steps down the moment it observes a newer one.
//!
//! # Features
//!
//! - Local-commit-then-fan-out write path with per-peer FIFO ordering
//! - Bounded retry with exponential backoff per replication task
//! - Primary health probing with a consecutive-failure threshold
//! - Round-based elections, deterministic lowest-id winner
//! - Epoch-tagged replication traffic guarding against stale primaries
//! - HTTP API for writes, replication, elections, and introspection

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod network;
pub mod operation;
pub mod replication;
pub mod state;

pub use config::DroverConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::DroverConfig;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{MySqlAdapter, StorageAdapter};
    pub use crate::operation::Operation;
    pub use crate::replication::Replicator;
    pub use crate::state::{PeerDirectory, Role, RoleState};
}
