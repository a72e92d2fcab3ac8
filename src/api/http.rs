//! HTTP API Server
//!
//! Every node serves the same router: client-facing write endpoints that
//! only the primary honors, replica ingest endpoints fed by the primary's
//! fan-out, election traffic, and introspection. Schema for the bodies
//! lives in [`crate::replication::protocol`] where both sides share it.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::executor::{sql, StorageAdapter};
use crate::operation::Operation;
use crate::replication::protocol::{
    build_mutation, CandidacyRequest, CandidacyResponse, HealthResponse, MutationKind,
    OperationAck, OutcomeRequest, ReplicateMutationRequest, ReplicateRelationRequest,
    ReplicateSchemaRequest, RoleResponse,
};
use crate::replication::{Replicator, StatsSnapshot};
use crate::state::{ElectionCoordinator, PeerDirectory, PeerRef, PrimaryRef, Role, RoleState};

/// Shared application state
pub struct AppState {
    /// Node ID
    pub node_id: String,
    /// Role and epoch of this node
    pub role: Arc<RoleState>,
    /// Peer registry and primary pointer
    pub directory: Arc<PeerDirectory>,
    /// Storage backend
    pub adapter: Arc<dyn StorageAdapter>,
    /// Fan-out queues toward the replicas
    pub replicator: Arc<Replicator>,
    /// Election coordinator
    pub election: Arc<ElectionCoordinator>,
    /// Process start time, for uptime reporting
    pub started_at: Instant,
}

/// HTTP API server
pub struct HttpServer {
    bind_address: String,
    cors_enabled: bool,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(bind_address: String, cors_enabled: bool, state: Arc<AppState>) -> Self {
        Self {
            bind_address,
            cors_enabled,
            state,
        }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let router = Router::new()
            // Client-facing writes, honored by the primary only
            .route("/schema", post(handle_create_schema))
            .route("/schema-drop", post(handle_drop_schema))
            .route("/relation", post(handle_create_relation))
            .route("/mutate", post(handle_mutate))
            // Replica ingest
            .route("/replicate/schema", post(handle_replicate_schema))
            .route("/replicate/schema-drop", post(handle_replicate_schema_drop))
            .route("/replicate/relation", post(handle_replicate_relation))
            .route("/replicate/mutate", post(handle_replicate_mutate))
            // Election traffic
            .route("/election/candidacy", post(handle_candidacy))
            .route("/election/outcome", post(handle_outcome))
            // Introspection
            .route("/health", get(handle_health))
            .route("/role", get(handle_role))
            .route("/status", get(handle_status))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Serve until the token is cancelled
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let app = Self::create_router(Arc::clone(&self.state), self.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        tracing::info!(address = %self.bind_address, "http api listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Schema create/drop request
#[derive(Debug, Deserialize, Serialize)]
pub struct SchemaRequest {
    pub name: String,
}

/// Table creation request
#[derive(Debug, Deserialize, Serialize)]
pub struct RelationRequest {
    pub dbname: String,
    pub table: String,
    /// Column definition list
    pub schema: String,
}

/// Row mutation request
#[derive(Debug, Deserialize, Serialize)]
pub struct MutateRequest {
    pub dbname: String,
    pub table: String,
    pub kind: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
}

/// Node status report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub node_id: String,
    pub role: Role,
    pub epoch: u64,
    pub primary: Option<PrimaryRef>,
    pub peers: Vec<PeerRef>,
    pub replication: StatsSnapshot,
    pub uptime_seconds: u64,
}

/// Plain acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(error: Error) -> Response {
    let (status, code) = match &error {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        Error::NotPrimary(_) => (StatusCode::MISDIRECTED_REQUEST, "NOT_PRIMARY"),
        Error::NoPrimary => (StatusCode::SERVICE_UNAVAILABLE, "NO_PRIMARY"),
        Error::StaleEpoch { .. } => (StatusCode::CONFLICT, "STALE_EPOCH"),
        Error::Database(_) | Error::QueryExecution(_) | Error::Schema(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

fn respond(result: Result<OperationAck>) -> Response {
    match result {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(error) => error_response(error),
    }
}

fn ack_message(operation: &Operation) -> String {
    match operation {
        Operation::CreateSchema { schema } => format!("schema {} created", schema),
        Operation::DropSchema { schema } => format!("schema {} dropped", schema),
        Operation::CreateRelation { schema, table, .. } => {
            format!("relation {}.{} created", schema, table)
        }
        Operation::Insert { .. } | Operation::Update { .. } | Operation::Delete { .. } => {
            format!("{} applied to {}", operation.kind(), operation.target())
        }
    }
}

// ============ Client Write Handlers ============

/// Reject client writes unless this node is the primary.
async fn require_primary(state: &AppState) -> Result<()> {
    if state.role.is_primary() {
        return Ok(());
    }
    match state.directory.primary().await {
        Some(primary) if primary.id != state.node_id => Err(Error::NotPrimary(primary.address)),
        _ => Err(Error::NoPrimary),
    }
}

/// Commit an operation locally, then queue it for every replica.
///
/// The client gets its answer as soon as the local commit lands; replica
/// delivery is asynchronous and retried by the replicator.
async fn apply_client_write(state: &AppState, operation: Operation) -> Result<OperationAck> {
    require_primary(state).await?;
    sql::validate_operation(&operation)?;

    let rows_affected = state.adapter.apply_operation(&operation).await?;
    let ack = OperationAck {
        message: ack_message(&operation),
        rows_affected,
    };

    state.replicator.dispatch(operation);

    Ok(ack)
}

async fn handle_create_schema(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SchemaRequest>,
) -> Response {
    respond(apply_client_write(&state, Operation::CreateSchema { schema: req.name }).await)
}

async fn handle_drop_schema(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SchemaRequest>,
) -> Response {
    respond(apply_client_write(&state, Operation::DropSchema { schema: req.name }).await)
}

async fn handle_create_relation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RelationRequest>,
) -> Response {
    let operation = Operation::CreateRelation {
        schema: req.dbname,
        table: req.table,
        definition: req.schema,
    };
    respond(apply_client_write(&state, operation).await)
}

async fn handle_mutate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MutateRequest>,
) -> Response {
    let operation = match build_mutation(
        req.dbname,
        req.table,
        req.kind,
        req.values,
        req.set,
        req.where_clause,
    ) {
        Ok(operation) => operation,
        Err(error) => return error_response(error),
    };
    respond(apply_client_write(&state, operation).await)
}

// ============ Replica Ingest Handlers ============

/// Apply an operation pushed by the primary.
///
/// The claimed epoch gates the write: a stale epoch is rejected so a
/// deposed primary cannot keep writing, and a higher epoch steps this
/// node down and repoints it at the message's origin.
async fn apply_replicated(
    state: &AppState,
    epoch: u64,
    origin: &str,
    operation: Operation,
) -> Result<OperationAck> {
    match state.role.admit_epoch(epoch) {
        Err(current) => {
            return Err(Error::StaleEpoch {
                claimed: epoch,
                current,
            });
        }
        Ok(true) => {
            tracing::info!(epoch, origin, "observed higher epoch on replication stream");
            if let Some(peer) = state.directory.get_peer(origin).await {
                state.directory.set_primary(&peer.id, &peer.address).await;
            }
        }
        Ok(false) => {}
    }

    sql::validate_operation(&operation)?;
    let rows_affected = state.adapter.apply_operation(&operation).await?;
    state.directory.record_contact(origin).await;

    tracing::debug!(
        origin,
        kind = operation.kind(),
        target = %operation.target(),
        "applied replicated operation"
    );

    Ok(OperationAck {
        message: ack_message(&operation),
        rows_affected,
    })
}

async fn handle_replicate_schema(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplicateSchemaRequest>,
) -> Response {
    let operation = Operation::CreateSchema { schema: req.name };
    respond(apply_replicated(&state, req.epoch, &req.origin, operation).await)
}

async fn handle_replicate_schema_drop(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplicateSchemaRequest>,
) -> Response {
    let operation = Operation::DropSchema { schema: req.name };
    respond(apply_replicated(&state, req.epoch, &req.origin, operation).await)
}

async fn handle_replicate_relation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplicateRelationRequest>,
) -> Response {
    let operation = Operation::CreateRelation {
        schema: req.dbname,
        table: req.table,
        definition: req.schema,
    };
    respond(apply_replicated(&state, req.epoch, &req.origin, operation).await)
}

async fn handle_replicate_mutate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplicateMutationRequest>,
) -> Response {
    let epoch = req.epoch;
    let origin = req.origin.clone();
    let operation = match req.into_operation() {
        Ok(operation) => operation,
        Err(error) => return error_response(error),
    };
    respond(apply_replicated(&state, epoch, &origin, operation).await)
}

// ============ Election Handlers ============

async fn handle_candidacy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CandidacyRequest>,
) -> Json<CandidacyResponse> {
    Json(state.election.evaluate_candidacy(&req))
}

async fn handle_outcome(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OutcomeRequest>,
) -> Response {
    match state.election.handle_outcome(&req).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: format!("outcome for epoch {} applied", req.epoch),
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

// ============ Introspection Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let healthy = state.adapter.health_check().await.unwrap_or(false);
    let body = Json(HealthResponse {
        healthy,
        node_id: state.node_id.clone(),
        role: state.role.role(),
    });

    if healthy {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

async fn handle_role(State(state): State<Arc<AppState>>) -> Json<RoleResponse> {
    let snapshot = state.role.snapshot();
    Json(RoleResponse {
        node_id: state.node_id.clone(),
        role: snapshot.role,
        epoch: snapshot.epoch,
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.role.snapshot();
    Json(StatusResponse {
        node_id: state.node_id.clone(),
        role: snapshot.role,
        epoch: snapshot.epoch,
        primary: state.directory.primary().await,
        peers: state.directory.peers().await,
        replication: state.replicator.stats(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MySqlAdapter;
    use crate::health::HealthView;
    use crate::network::PeerClient;
    use crate::replication::RetryPolicy;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        state: Arc<AppState>,
        health: Arc<HealthView>,
    }

    async fn build_node(node_id: &str, role: Role) -> Fixture {
        let directory = Arc::new(PeerDirectory::new(
            node_id.to_string(),
            "http://127.0.0.1:1".to_string(),
        ));
        let role_state = Arc::new(RoleState::new(role));
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MySqlAdapter::new_mock());
        let cancel = CancellationToken::new();
        let replicator = Arc::new(
            Replicator::start(
                Arc::clone(&directory),
                Arc::clone(&role_state),
                PeerClient::new(),
                RetryPolicy::default(),
                8,
                &cancel,
            )
            .await,
        );
        let health = Arc::new(HealthView::new());
        let election = Arc::new(ElectionCoordinator::new(
            Arc::clone(&directory),
            Arc::clone(&role_state),
            PeerClient::new(),
            Arc::clone(&health),
            Duration::from_millis(200),
            1,
        ));
        let state = Arc::new(AppState {
            node_id: node_id.to_string(),
            role: role_state,
            directory,
            adapter,
            replicator,
            election,
            started_at: Instant::now(),
        });
        let router = HttpServer::create_router(Arc::clone(&state), false);
        Fixture {
            router,
            state,
            health,
        }
    }

    async fn read_response(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        read_response(router.clone().oneshot(request).await.unwrap()).await
    }

    async fn get_path(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        read_response(router.clone().oneshot(request).await.unwrap()).await
    }

    #[tokio::test]
    async fn test_role_and_health_endpoints() {
        let fx = build_node("node-1", Role::Primary).await;

        let (status, body) = get_path(&fx.router, "/role").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodeId"], "node-1");
        assert_eq!(body["role"], "primary");
        assert_eq!(body["epoch"], 0);

        let (status, body) = get_path(&fx.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
        assert_eq!(body["nodeId"], "node-1");
    }

    #[tokio::test]
    async fn test_primary_applies_client_writes() {
        let fx = build_node("node-1", Role::Primary).await;

        let (status, body) =
            post_json(&fx.router, "/schema", serde_json::json!({ "name": "app" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rowsAffected"], 0);
        assert!(body["message"].as_str().unwrap().contains("app"));

        let (status, _) = post_json(
            &fx.router,
            "/relation",
            serde_json::json!({
                "dbname": "app",
                "table": "users",
                "schema": "id INT PRIMARY KEY, name VARCHAR(80)"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post_json(
            &fx.router,
            "/mutate",
            serde_json::json!({
                "dbname": "app",
                "table": "users",
                "kind": "insert",
                "values": "1, 'alice'"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("insert"));
    }

    #[tokio::test]
    async fn test_replica_rejects_client_writes() {
        let fx = build_node("node-2", Role::Replica).await;
        fx.state
            .directory
            .add_peer("node-1".into(), "http://10.0.0.1:7420".into())
            .await;
        fx.state
            .directory
            .set_primary("node-1", "http://10.0.0.1:7420")
            .await;

        let (status, body) =
            post_json(&fx.router, "/schema", serde_json::json!({ "name": "app" })).await;
        assert_eq!(status, StatusCode::MISDIRECTED_REQUEST);
        assert_eq!(body["code"], "NOT_PRIMARY");
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("http://10.0.0.1:7420"));
    }

    #[tokio::test]
    async fn test_writes_unavailable_without_primary() {
        let fx = build_node("node-2", Role::Replica).await;

        let (status, body) = post_json(
            &fx.router,
            "/mutate",
            serde_json::json!({
                "dbname": "app",
                "table": "users",
                "kind": "delete",
                "where": "id = 1"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "NO_PRIMARY");
    }

    #[tokio::test]
    async fn test_rejects_malformed_requests() {
        let fx = build_node("node-1", Role::Primary).await;

        let (status, body) = post_json(
            &fx.router,
            "/schema",
            serde_json::json!({ "name": "bad;name" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (status, _) = post_json(
            &fx.router,
            "/mutate",
            serde_json::json!({
                "dbname": "app",
                "table": "users",
                "kind": "insert",
                "values": "1); DROP TABLE users; --"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Update without a predicate never reaches the database.
        let (status, body) = post_json(
            &fx.router,
            "/mutate",
            serde_json::json!({
                "dbname": "app",
                "table": "users",
                "kind": "update",
                "set": "name = 'bob'"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_replicate_applies_operations() {
        let fx = build_node("node-2", Role::Replica).await;

        let (status, body) = post_json(
            &fx.router,
            "/replicate/schema",
            serde_json::json!({ "name": "app", "epoch": 0, "origin": "node-1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rowsAffected"], 0);

        let (status, _) = post_json(
            &fx.router,
            "/replicate/mutate",
            serde_json::json!({
                "dbname": "app",
                "table": "users",
                "kind": "update",
                "set": "name = 'bob'",
                "where": "id = 1",
                "epoch": 0,
                "origin": "node-1"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_replicate_rejects_stale_epoch() {
        let fx = build_node("node-2", Role::Replica).await;
        fx.state.role.observe_epoch(5);

        let (status, body) = post_json(
            &fx.router,
            "/replicate/schema",
            serde_json::json!({ "name": "app", "epoch": 3, "origin": "node-9" }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "STALE_EPOCH");
        assert!(body["error"].as_str().unwrap().contains('5'));
    }

    #[tokio::test]
    async fn test_replicate_higher_epoch_steps_down_and_repoints() {
        let fx = build_node("node-1", Role::Primary).await;
        fx.state.role.try_promote(2);
        fx.state
            .directory
            .add_peer("node-3".into(), "http://10.0.0.3:7420".into())
            .await;

        let (status, _) = post_json(
            &fx.router,
            "/replicate/schema",
            serde_json::json!({ "name": "app", "epoch": 7, "origin": "node-3" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert!(!fx.state.role.is_primary());
        assert_eq!(fx.state.role.epoch(), 7);
        assert_eq!(fx.state.directory.primary().await.unwrap().id, "node-3");
    }

    #[tokio::test]
    async fn test_candidacy_endpoint() {
        let fx = build_node("node-2", Role::Replica).await;

        let request = serde_json::json!({
            "epoch": 1,
            "candidateId": "node-3",
            "candidateAddress": "http://10.0.0.3:7420"
        });

        // The primary still looks reachable, so the node declines.
        let (status, body) = post_json(&fx.router, "/election/candidacy", request.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], false);

        fx.health.record(false);
        let (_, body) = post_json(&fx.router, "/election/candidacy", request).await;
        assert_eq!(body["accepted"], true);
        assert_eq!(body["nodeId"], "node-2");
    }

    #[tokio::test]
    async fn test_outcome_endpoint() {
        let fx = build_node("node-2", Role::Replica).await;
        fx.state
            .directory
            .add_peer("node-1".into(), "http://10.0.0.1:7420".into())
            .await;

        let outcome = serde_json::json!({
            "epoch": 2,
            "winnerId": "node-1",
            "winnerAddress": "http://10.0.0.1:7420"
        });

        let (status, _) = post_json(&fx.router, "/election/outcome", outcome.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fx.state.role.epoch(), 2);
        assert_eq!(fx.state.directory.primary().await.unwrap().id, "node-1");

        // Replaying the same outcome is stale.
        let (status, body) = post_json(&fx.router, "/election/outcome", outcome).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "STALE_EPOCH");
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let fx = build_node("node-1", Role::Primary).await;
        fx.state
            .directory
            .add_peer("node-2".into(), "http://10.0.0.2:7420".into())
            .await;

        let (status, body) = get_path(&fx.router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodeId"], "node-1");
        assert_eq!(body["role"], "primary");
        assert_eq!(body["epoch"], 0);
        assert_eq!(body["peers"].as_array().unwrap().len(), 1);
        assert_eq!(body["replication"]["dispatched"], 0);
    }
}
