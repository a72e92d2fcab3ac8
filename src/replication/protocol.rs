//! Peer Wire Protocol
//!
//! JSON bodies exchanged between nodes: replication of operations,
//! election candidacy and outcome notices, and the role/health shapes
//! peers read from each other. Every replication and election body is
//! tagged with the sender's epoch and node id so stale senders can be
//! rejected.

use serde::{Deserialize, Serialize};

use crate::operation::Operation;
use crate::state::Role;
use crate::{Error, Result};

/// Schema create/drop pushed to a replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateSchemaRequest {
    pub name: String,
    pub epoch: u64,
    pub origin: String,
}

/// Table creation pushed to a replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRelationRequest {
    pub dbname: String,
    pub table: String,
    /// Column definition list
    pub schema: String,
    pub epoch: u64,
    pub origin: String,
}

/// Row mutation pushed to a replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateMutationRequest {
    pub dbname: String,
    pub table: String,
    pub kind: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    pub epoch: u64,
    pub origin: String,
}

/// Kind discriminator for row mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl ReplicateMutationRequest {
    /// Convert the wire form back into an operation
    pub fn into_operation(self) -> Result<Operation> {
        build_mutation(
            self.dbname,
            self.table,
            self.kind,
            self.values,
            self.set,
            self.where_clause,
        )
    }
}

/// Build a mutation operation from its wire fields
///
/// Shared by the replica-facing and client-facing mutate endpoints, which
/// carry the same field vocabulary.
pub fn build_mutation(
    dbname: String,
    table: String,
    kind: MutationKind,
    values: Option<String>,
    set: Option<String>,
    where_clause: Option<String>,
) -> Result<Operation> {
    match kind {
        MutationKind::Insert => {
            let values =
                values.ok_or_else(|| Error::Validation("insert requires values".into()))?;
            Ok(Operation::Insert { schema: dbname, table, values })
        }
        MutationKind::Update => {
            let assignments =
                set.ok_or_else(|| Error::Validation("update requires set".into()))?;
            let predicate =
                where_clause.ok_or_else(|| Error::Validation("update requires where".into()))?;
            Ok(Operation::Update { schema: dbname, table, assignments, predicate })
        }
        MutationKind::Delete => {
            let predicate =
                where_clause.ok_or_else(|| Error::Validation("delete requires where".into()))?;
            Ok(Operation::Delete { schema: dbname, table, predicate })
        }
    }
}

/// Outbound body for any replicated operation
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReplicateBody {
    Schema(ReplicateSchemaRequest),
    Relation(ReplicateRelationRequest),
    Mutation(ReplicateMutationRequest),
}

/// Encode an operation into its endpoint path and wire body
pub fn encode_operation(
    operation: &Operation,
    epoch: u64,
    origin: &str,
) -> (&'static str, ReplicateBody) {
    let origin = origin.to_string();
    match operation {
        Operation::CreateSchema { schema } => (
            "/replicate/schema",
            ReplicateBody::Schema(ReplicateSchemaRequest {
                name: schema.clone(),
                epoch,
                origin,
            }),
        ),
        Operation::DropSchema { schema } => (
            "/replicate/schema-drop",
            ReplicateBody::Schema(ReplicateSchemaRequest {
                name: schema.clone(),
                epoch,
                origin,
            }),
        ),
        Operation::CreateRelation { schema, table, definition } => (
            "/replicate/relation",
            ReplicateBody::Relation(ReplicateRelationRequest {
                dbname: schema.clone(),
                table: table.clone(),
                schema: definition.clone(),
                epoch,
                origin,
            }),
        ),
        Operation::Insert { schema, table, values } => (
            "/replicate/mutate",
            ReplicateBody::Mutation(ReplicateMutationRequest {
                dbname: schema.clone(),
                table: table.clone(),
                kind: MutationKind::Insert,
                values: Some(values.clone()),
                set: None,
                where_clause: None,
                epoch,
                origin,
            }),
        ),
        Operation::Update { schema, table, assignments, predicate } => (
            "/replicate/mutate",
            ReplicateBody::Mutation(ReplicateMutationRequest {
                dbname: schema.clone(),
                table: table.clone(),
                kind: MutationKind::Update,
                values: None,
                set: Some(assignments.clone()),
                where_clause: Some(predicate.clone()),
                epoch,
                origin,
            }),
        ),
        Operation::Delete { schema, table, predicate } => (
            "/replicate/mutate",
            ReplicateBody::Mutation(ReplicateMutationRequest {
                dbname: schema.clone(),
                table: table.clone(),
                kind: MutationKind::Delete,
                values: None,
                set: None,
                where_clause: Some(predicate.clone()),
                epoch,
                origin,
            }),
        ),
    }
}

/// Acknowledgement for an applied operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAck {
    pub message: String,
    pub rows_affected: u64,
}

/// Candidacy broadcast during an election round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidacyRequest {
    pub epoch: u64,
    pub candidate_id: String,
    pub candidate_address: String,
}

/// A peer's answer to a candidacy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidacyResponse {
    pub accepted: bool,
    pub epoch: u64,
    pub node_id: String,
}

/// Election outcome broadcast to accepting peers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRequest {
    pub epoch: u64,
    pub winner_id: String,
    pub winner_address: String,
}

/// Role report served at `/role`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    pub node_id: String,
    pub role: Role,
    pub epoch: u64,
}

/// Liveness report served at `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub role: Role,
}
