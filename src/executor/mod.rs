//! Storage Adapter Module
//!
//! Applies replicated operations against the backing MySQL server. The
//! coordination core only ever talks to the [`StorageAdapter`] trait;
//! SQL rendering and identifier validation stay behind this boundary.

mod mysql;
pub mod sql;

pub use mysql::MySqlAdapter;

use async_trait::async_trait;

use crate::operation::Operation;
use crate::Result;

/// Contract between the coordination core and the datastore
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Apply an operation, returning the number of rows affected
    async fn apply_operation(&self, operation: &Operation) -> Result<u64>;

    /// Create a database schema
    async fn create_schema(&self, name: &str) -> Result<()>;

    /// Drop a database schema
    async fn drop_schema(&self, name: &str) -> Result<()>;

    /// Check that the datastore is reachable
    async fn health_check(&self) -> Result<bool>;
}
