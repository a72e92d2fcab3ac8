//! HTTP API Module
//!
//! One axum server per node carrying the client-facing write endpoints,
//! the replica ingest endpoints, and the election traffic.

mod http;

pub use http::{AppState, HttpServer};
