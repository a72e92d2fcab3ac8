//! Replicated Operations
//!
//! An [`Operation`] is the unit of replication: the primary applies it
//! locally, then fans the same value out to every replica. The core treats
//! it as opaque data; rendering it into SQL is the storage adapter's job.

use serde::{Deserialize, Serialize};

/// A mutating operation applied locally and replicated to peers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Create a database schema
    CreateSchema { schema: String },

    /// Drop a database schema
    DropSchema { schema: String },

    /// Create a table within a schema; `definition` is the column list
    CreateRelation {
        schema: String,
        table: String,
        definition: String,
    },

    /// Insert a row; `values` is the value list
    Insert {
        schema: String,
        table: String,
        values: String,
    },

    /// Update rows matching `predicate` with `assignments`
    Update {
        schema: String,
        table: String,
        assignments: String,
        predicate: String,
    },

    /// Delete rows matching `predicate`
    Delete {
        schema: String,
        table: String,
        predicate: String,
    },
}

impl Operation {
    /// Get the operation kind for logging and dispatch
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateSchema { .. } => "create_schema",
            Operation::DropSchema { .. } => "drop_schema",
            Operation::CreateRelation { .. } => "create_relation",
            Operation::Insert { .. } => "insert",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }

    /// Get the schema this operation targets
    pub fn schema(&self) -> &str {
        match self {
            Operation::CreateSchema { schema }
            | Operation::DropSchema { schema }
            | Operation::CreateRelation { schema, .. }
            | Operation::Insert { schema, .. }
            | Operation::Update { schema, .. }
            | Operation::Delete { schema, .. } => schema,
        }
    }

    /// Get the table this operation targets, if any
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::CreateSchema { .. } | Operation::DropSchema { .. } => None,
            Operation::CreateRelation { table, .. }
            | Operation::Insert { table, .. }
            | Operation::Update { table, .. }
            | Operation::Delete { table, .. } => Some(table),
        }
    }

    /// Short human-readable target for log lines, e.g. "app.users"
    pub fn target(&self) -> String {
        match self.table() {
            Some(table) => format!("{}.{}", self.schema(), table),
            None => self.schema().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let op = Operation::Insert {
            schema: "app".into(),
            table: "users".into(),
            values: "1, 'alice'".into(),
        };
        assert_eq!(op.kind(), "insert");
        assert_eq!(Operation::CreateSchema { schema: "app".into() }.kind(), "create_schema");
    }

    #[test]
    fn test_target() {
        let op = Operation::Delete {
            schema: "app".into(),
            table: "users".into(),
            predicate: "id = 1".into(),
        };
        assert_eq!(op.target(), "app.users");
        assert_eq!(Operation::DropSchema { schema: "app".into() }.target(), "app");
        assert_eq!(op.table(), Some("users"));
    }
}
