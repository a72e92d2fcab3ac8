//! Network Module
//!
//! HTTP communication between nodes.

mod client;

pub use client::PeerClient;
