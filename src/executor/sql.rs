//! SQL Rendering and Validation
//!
//! Renders an [`Operation`] into a single MySQL statement. Identifiers are
//! validated and backtick-quoted; free-form fragments (value lists,
//! assignments, predicates) are rejected if they could terminate the
//! statement or open a comment. Validation runs before an operation is
//! committed or accepted from a peer, so nothing unchecked reaches the
//! connection pool.

use crate::operation::Operation;
use crate::{Error, Result};

/// MySQL's identifier length limit
const MAX_IDENTIFIER_LEN: usize = 64;

/// Tokens that would let a fragment escape its statement
const FORBIDDEN_TOKENS: [&str; 3] = [";", "--", "/*"];

/// Validate a schema or table identifier
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("identifier cannot be empty".into()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Validation(format!(
            "identifier '{}' exceeds {} characters",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Validation(format!(
            "identifier '{}' may only contain [A-Za-z0-9_]",
            name
        )));
    }
    Ok(())
}

/// Validate a free-form SQL fragment (values, assignments, predicate)
pub fn validate_fragment(label: &str, fragment: &str) -> Result<()> {
    if fragment.trim().is_empty() {
        return Err(Error::Validation(format!("{} cannot be empty", label)));
    }
    for token in FORBIDDEN_TOKENS {
        if fragment.contains(token) {
            return Err(Error::Validation(format!(
                "{} must not contain '{}'",
                label, token
            )));
        }
    }
    Ok(())
}

/// Validate every identifier and fragment an operation carries
pub fn validate_operation(operation: &Operation) -> Result<()> {
    match operation {
        Operation::CreateSchema { schema } | Operation::DropSchema { schema } => {
            validate_identifier(schema)
        }
        Operation::CreateRelation { schema, table, definition } => {
            validate_identifier(schema)?;
            validate_identifier(table)?;
            validate_fragment("definition", definition)
        }
        Operation::Insert { schema, table, values } => {
            validate_identifier(schema)?;
            validate_identifier(table)?;
            validate_fragment("values", values)
        }
        Operation::Update { schema, table, assignments, predicate } => {
            validate_identifier(schema)?;
            validate_identifier(table)?;
            validate_fragment("set", assignments)?;
            validate_fragment("where", predicate)
        }
        Operation::Delete { schema, table, predicate } => {
            validate_identifier(schema)?;
            validate_identifier(table)?;
            validate_fragment("where", predicate)
        }
    }
}

/// Render an operation into a MySQL statement
///
/// Assumes the operation has passed [`validate_operation`].
pub fn render_operation(operation: &Operation) -> String {
    match operation {
        Operation::CreateSchema { schema } => {
            format!("CREATE DATABASE IF NOT EXISTS `{}`", schema)
        }
        Operation::DropSchema { schema } => {
            format!("DROP DATABASE IF EXISTS `{}`", schema)
        }
        Operation::CreateRelation { schema, table, definition } => {
            format!("CREATE TABLE IF NOT EXISTS `{}`.`{}` ({})", schema, table, definition)
        }
        Operation::Insert { schema, table, values } => {
            format!("INSERT INTO `{}`.`{}` VALUES ({})", schema, table, values)
        }
        Operation::Update { schema, table, assignments, predicate } => {
            format!("UPDATE `{}`.`{}` SET {} WHERE {}", schema, table, assignments, predicate)
        }
        Operation::Delete { schema, table, predicate } => {
            format!("DELETE FROM `{}`.`{}` WHERE {}", schema, table, predicate)
        }
    }
}
