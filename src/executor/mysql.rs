//! MySQL Storage Adapter
//!
//! Applies operations against a MySQL server through a server-level
//! connection pool. Operations name schema-qualified objects, so no
//! database is selected on the pool itself.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::operation::Operation;

use super::sql;
use super::StorageAdapter;

/// MySQL-backed storage adapter
pub struct MySqlAdapter {
    /// Server-level connection pool
    pool: Option<MySqlPool>,
    /// Whether this is a mock adapter (for testing)
    is_mock: bool,
}

impl MySqlAdapter {
    /// Connect to the MySQL server
    ///
    /// Establishes at least one connection eagerly; an unreachable server
    /// fails here, which the caller treats as fatal at startup.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}:{}",
            config.user, config.password, config.host, config.port
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&url)
            .await?;

        Ok(Self {
            pool: Some(pool),
            is_mock: false,
        })
    }

    /// Create a mock adapter for testing
    pub fn new_mock() -> Self {
        Self {
            pool: None,
            is_mock: true,
        }
    }

    fn pool(&self) -> Result<&MySqlPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| Error::Database(sqlx::Error::Configuration("no connection pool".into())))
    }

    async fn execute(&self, statement: &str) -> Result<u64> {
        if self.is_mock {
            return Ok(0);
        }

        let result = sqlx::query(statement)
            .execute(self.pool()?)
            .await
            .map_err(|e| {
                let head: String = statement.chars().take(80).collect();
                Error::QueryExecution(format!("'{}': {}", head, e))
            })?;

        Ok(result.rows_affected())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

#[async_trait]
impl StorageAdapter for MySqlAdapter {
    async fn apply_operation(&self, operation: &Operation) -> Result<u64> {
        let statement = sql::render_operation(operation);
        tracing::debug!(kind = operation.kind(), target = %operation.target(), "applying operation");
        self.execute(&statement).await
    }

    async fn create_schema(&self, name: &str) -> Result<()> {
        self.apply_operation(&Operation::CreateSchema { schema: name.to_string() })
            .await
            .map(|_| ())
    }

    async fn drop_schema(&self, name: &str) -> Result<()> {
        self.apply_operation(&Operation::DropSchema { schema: name.to_string() })
            .await
            .map(|_| ())
    }

    async fn health_check(&self) -> Result<bool> {
        if self.is_mock {
            return Ok(true);
        }

        let result: (i32,) = sqlx::query_as("SELECT 1").fetch_one(self.pool()?).await?;
        Ok(result.0 == 1)
    }
}
