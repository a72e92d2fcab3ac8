//! Primary Election
//!
//! Round-based election with a deterministic winner. A replica that has
//! lost contact with the primary proposes itself at a higher epoch; peers
//! accept when they also consider the primary gone, and the lowest node id
//! in the accepting set becomes the new primary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::error::{Error, Result};
use crate::health::HealthView;
use crate::network::PeerClient;
use crate::replication::protocol::{
    CandidacyRequest, CandidacyResponse, OutcomeRequest, RoleResponse,
};
use crate::state::{PeerDirectory, RoleState};

/// How a single election round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundOutcome {
    /// This node collected the winning candidacy and promoted itself
    Won,
    /// Another node is primary now, either elected or discovered
    Deferred,
    /// The configured primary answered a probe mid-election
    PrimaryAlive,
    /// No remote peer accepted, retry at a higher epoch
    NoAccepts,
}

/// Clears the in-progress flag when an election ends, on every exit path.
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Election coordinator drives candidacy rounds and answers the
/// candidacy and outcome requests of other nodes.
pub struct ElectionCoordinator {
    /// Peer registry and primary pointer
    directory: Arc<PeerDirectory>,
    /// Local role and epoch
    role: Arc<RoleState>,
    /// HTTP client for peer calls
    client: PeerClient,
    /// Last probe verdict on the primary, gates candidacy acceptance
    health: Arc<HealthView>,
    /// Per-round timeout for peer calls
    round_timeout: Duration,
    /// Rounds to attempt before giving up
    max_rounds: u32,
    /// Guards against overlapping elections on this node
    in_progress: AtomicBool,
    /// Elections triggered on this node
    elections_started: AtomicU64,
}

impl ElectionCoordinator {
    /// Create a new election coordinator
    pub fn new(
        directory: Arc<PeerDirectory>,
        role: Arc<RoleState>,
        client: PeerClient,
        health: Arc<HealthView>,
        round_timeout: Duration,
        max_rounds: u32,
    ) -> Self {
        Self {
            directory,
            role,
            client,
            health,
            round_timeout,
            max_rounds,
            in_progress: AtomicBool::new(false),
            elections_started: AtomicU64::new(0),
        }
    }

    /// Whether an election is currently running on this node
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Number of elections this node has initiated
    pub fn elections_started(&self) -> u64 {
        self.elections_started.load(Ordering::SeqCst)
    }

    /// Run an election. Returns once the cluster has a primary again or
    /// every round has been exhausted; concurrent triggers are ignored
    /// while a run is in flight.
    pub async fn start_election(&self) {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("election already in progress, ignoring trigger");
            return;
        }
        let _guard = InProgressGuard(&self.in_progress);
        self.elections_started.fetch_add(1, Ordering::SeqCst);

        let base_epoch = self.role.epoch();
        tracing::info!(epoch = base_epoch, "starting election");

        for round in 1..=self.max_rounds {
            let candidate_epoch = base_epoch + u64::from(round);
            match self.run_round(candidate_epoch, round).await {
                RoundOutcome::Won | RoundOutcome::Deferred | RoundOutcome::PrimaryAlive => return,
                RoundOutcome::NoAccepts => {
                    tracing::info!(
                        epoch = candidate_epoch,
                        round,
                        "no peer accepted candidacy, retrying at a higher epoch"
                    );
                }
            }
        }

        tracing::warn!(
            rounds = self.max_rounds,
            "election abandoned, remaining a replica"
        );
    }

    async fn run_round(&self, epoch: u64, round: u32) -> RoundOutcome {
        // A primary that answers a probe mid-election ends the election.
        if let Some(primary) = self.directory.primary().await {
            if primary.id != self.directory.node_id()
                && self
                    .client
                    .check_health(&primary.address, self.round_timeout)
                    .await
                    .is_ok()
            {
                self.health.record(true);
                self.directory.record_contact(&primary.id).await;
                tracing::info!(primary = %primary.id, "primary answered during election, aborting");
                return RoundOutcome::PrimaryAlive;
            }
        }

        // A peer may already follow, or be, a primary at a higher epoch.
        if let Some((peer_id, address, peer_epoch)) = self.discover_existing_primary().await {
            self.role.observe_epoch(peer_epoch);
            self.directory.set_primary(&peer_id, &address).await;
            self.health.record(true);
            tracing::info!(
                primary = %peer_id,
                epoch = peer_epoch,
                "discovered a primary at a higher epoch, deferring"
            );
            return RoundOutcome::Deferred;
        }

        let request = CandidacyRequest {
            epoch,
            candidate_id: self.directory.node_id().to_string(),
            candidate_address: self.directory.node_address().to_string(),
        };

        let peers = self.directory.peers().await;
        tracing::info!(epoch, round, peers = peers.len(), "broadcasting candidacy");

        let polls = join_all(peers.iter().map(|peer| {
            let client = self.client.clone();
            let request = request.clone();
            let id = peer.id.clone();
            let address = peer.address.clone();
            let timeout = self.round_timeout;
            async move {
                let result = client
                    .post_json::<_, CandidacyResponse>(
                        &address,
                        "/election/candidacy",
                        &request,
                        timeout,
                    )
                    .await;
                (id, result)
            }
        }))
        .await;

        // The initiator counts as accepting its own candidacy.
        let mut accepted_ids = vec![self.directory.node_id().to_string()];
        let mut remote_accepts = 0usize;
        for (peer_id, result) in polls {
            match result {
                Ok(response) if response.accepted => {
                    self.directory.record_contact(&peer_id).await;
                    remote_accepts += 1;
                    accepted_ids.push(response.node_id);
                }
                Ok(response) => {
                    self.directory.record_contact(&peer_id).await;
                    tracing::debug!(
                        peer = %peer_id,
                        peer_epoch = response.epoch,
                        "candidacy rejected"
                    );
                }
                Err(error) => {
                    tracing::debug!(peer = %peer_id, %error, "candidacy request failed");
                }
            }
        }

        if remote_accepts == 0 {
            return RoundOutcome::NoAccepts;
        }

        accepted_ids.sort();
        let winner_id = accepted_ids[0].clone();

        if winner_id == self.directory.node_id() {
            if !self.role.try_promote(epoch) {
                // A higher epoch appeared while the round was in flight.
                tracing::info!(epoch, "promotion overtaken by a higher epoch, deferring");
                return RoundOutcome::Deferred;
            }
            self.directory
                .set_primary(self.directory.node_id(), self.directory.node_address())
                .await;
            tracing::info!(epoch, "won election, promoted to primary");
            self.broadcast_outcome(epoch, &winner_id, self.directory.node_address(), &accepted_ids)
                .await;
            RoundOutcome::Won
        } else {
            let Some(winner) = self.directory.get_peer(&winner_id).await else {
                tracing::warn!(winner = %winner_id, "winning node is not a registered peer");
                return RoundOutcome::NoAccepts;
            };
            // The winner learns it won from the outcome notice.
            self.broadcast_outcome(epoch, &winner.id, &winner.address, &accepted_ids)
                .await;
            self.role.observe_epoch(epoch);
            self.directory.set_primary(&winner.id, &winner.address).await;
            self.health.record(true);
            tracing::info!(winner = %winner.id, epoch, "election won by peer, repointing");
            RoundOutcome::Deferred
        }
    }

    /// Poll every peer's `/role` looking for a primary ahead of us.
    async fn discover_existing_primary(&self) -> Option<(String, String, u64)> {
        let local_epoch = self.role.epoch();
        let peers = self.directory.peers().await;

        let polls = join_all(peers.iter().map(|peer| {
            let client = self.client.clone();
            let id = peer.id.clone();
            let address = peer.address.clone();
            let timeout = self.round_timeout;
            async move {
                let result = client
                    .get_json::<RoleResponse>(&address, "/role", timeout)
                    .await;
                (id, address, result)
            }
        }))
        .await;

        for (peer_id, address, result) in polls {
            if let Ok(report) = result {
                self.directory.record_contact(&peer_id).await;
                self.directory.mark_role(&peer_id, report.role).await;
                if report.role.is_primary() && report.epoch > local_epoch {
                    return Some((peer_id, address, report.epoch));
                }
            }
        }
        None
    }

    /// Push the result of a won round to every other accepting peer.
    async fn broadcast_outcome(
        &self,
        epoch: u64,
        winner_id: &str,
        winner_address: &str,
        accepted_ids: &[String],
    ) {
        let request = OutcomeRequest {
            epoch,
            winner_id: winner_id.to_string(),
            winner_address: winner_address.to_string(),
        };

        let mut recipients = Vec::new();
        for id in accepted_ids {
            if id == self.directory.node_id() {
                continue;
            }
            if let Some(peer) = self.directory.get_peer(id).await {
                recipients.push(peer);
            }
        }

        let sends = join_all(recipients.iter().map(|peer| {
            let client = self.client.clone();
            let request = request.clone();
            let id = peer.id.clone();
            let address = peer.address.clone();
            let timeout = self.round_timeout;
            async move {
                let result = client
                    .post_json::<_, serde_json::Value>(
                        &address,
                        "/election/outcome",
                        &request,
                        timeout,
                    )
                    .await;
                (id, result)
            }
        }))
        .await;

        for (peer_id, result) in sends {
            if let Err(error) = result {
                tracing::warn!(peer = %peer_id, %error, "failed to deliver election outcome");
            }
        }
    }

    /// Answer another node's candidacy. Accepted only when this node is a
    /// replica, the proposed epoch is ahead of ours, and our own probes
    /// say the primary is gone.
    pub fn evaluate_candidacy(&self, request: &CandidacyRequest) -> CandidacyResponse {
        let snapshot = self.role.snapshot();
        let primary_reachable = self.health.primary_reachable();
        let accepted =
            !snapshot.is_primary() && request.epoch > snapshot.epoch && !primary_reachable;

        if accepted {
            tracing::info!(
                candidate = %request.candidate_id,
                epoch = request.epoch,
                "accepting candidacy"
            );
        } else {
            tracing::debug!(
                candidate = %request.candidate_id,
                epoch = request.epoch,
                current_epoch = snapshot.epoch,
                role = %snapshot.role,
                primary_reachable,
                "rejecting candidacy"
            );
        }

        CandidacyResponse {
            accepted,
            epoch: snapshot.epoch,
            node_id: self.directory.node_id().to_string(),
        }
    }

    /// Apply an election outcome announced by the initiating node.
    pub async fn handle_outcome(&self, request: &OutcomeRequest) -> Result<()> {
        let snapshot = self.role.snapshot();
        if request.epoch <= snapshot.epoch {
            return Err(Error::StaleEpoch {
                claimed: request.epoch,
                current: snapshot.epoch,
            });
        }

        if request.winner_id == self.directory.node_id() {
            if self.role.try_promote(request.epoch) {
                self.directory
                    .set_primary(self.directory.node_id(), self.directory.node_address())
                    .await;
                tracing::info!(epoch = request.epoch, "promoted to primary by election outcome");
            }
        } else {
            self.role.observe_epoch(request.epoch);
            self.directory
                .set_primary(&request.winner_id, &request.winner_address)
                .await;
            self.health.record(true);
            tracing::info!(
                primary = %request.winner_id,
                epoch = request.epoch,
                "repointed to elected primary"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::Mutex;

    struct PeerSim {
        node_id: String,
        role: Role,
        epoch: u64,
        accept: bool,
        healthy: bool,
        candidacies: Mutex<Vec<CandidacyRequest>>,
        outcomes: Mutex<Vec<OutcomeRequest>>,
    }

    impl PeerSim {
        fn new(node_id: &str) -> Self {
            Self {
                node_id: node_id.to_string(),
                role: Role::Replica,
                epoch: 0,
                accept: true,
                healthy: true,
                candidacies: Mutex::new(Vec::new()),
                outcomes: Mutex::new(Vec::new()),
            }
        }

        fn candidacy_epochs(&self) -> Vec<u64> {
            self.candidacies.lock().unwrap().iter().map(|c| c.epoch).collect()
        }

        fn recorded_outcomes(&self) -> Vec<OutcomeRequest> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    async fn sim_health(State(sim): State<Arc<PeerSim>>) -> StatusCode {
        if sim.healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    async fn sim_role(State(sim): State<Arc<PeerSim>>) -> Json<RoleResponse> {
        Json(RoleResponse {
            node_id: sim.node_id.clone(),
            role: sim.role,
            epoch: sim.epoch,
        })
    }

    async fn sim_candidacy(
        State(sim): State<Arc<PeerSim>>,
        Json(request): Json<CandidacyRequest>,
    ) -> Json<CandidacyResponse> {
        let accepted = sim.accept && request.epoch > sim.epoch;
        sim.candidacies.lock().unwrap().push(request);
        Json(CandidacyResponse {
            accepted,
            epoch: sim.epoch,
            node_id: sim.node_id.clone(),
        })
    }

    async fn sim_outcome(
        State(sim): State<Arc<PeerSim>>,
        Json(request): Json<OutcomeRequest>,
    ) -> Json<serde_json::Value> {
        sim.outcomes.lock().unwrap().push(request);
        Json(serde_json::json!({ "message": "acknowledged" }))
    }

    async fn spawn_sim(sim: Arc<PeerSim>) -> String {
        let app = Router::new()
            .route("/health", get(sim_health))
            .route("/role", get(sim_role))
            .route("/election/candidacy", post(sim_candidacy))
            .route("/election/outcome", post(sim_outcome))
            .with_state(sim);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Bind and drop a listener so the port refuses connections.
    async fn dead_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    struct Fixture {
        directory: Arc<PeerDirectory>,
        role: Arc<RoleState>,
        health: Arc<HealthView>,
        coordinator: ElectionCoordinator,
    }

    fn build_coordinator(node_id: &str, max_rounds: u32) -> Fixture {
        let directory = Arc::new(PeerDirectory::new(
            node_id.to_string(),
            "http://127.0.0.1:1".to_string(),
        ));
        let role = Arc::new(RoleState::new(Role::Replica));
        let health = Arc::new(HealthView::new());
        let coordinator = ElectionCoordinator::new(
            Arc::clone(&directory),
            Arc::clone(&role),
            PeerClient::new(),
            Arc::clone(&health),
            Duration::from_millis(500),
            max_rounds,
        );
        Fixture {
            directory,
            role,
            health,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_candidacy_evaluation_rules() {
        let fx = build_coordinator("node-2", 3);

        let request = CandidacyRequest {
            epoch: 1,
            candidate_id: "node-3".into(),
            candidate_address: "http://10.0.0.3:7420".into(),
        };

        // Reachable primary means no acceptance.
        assert!(!fx.coordinator.evaluate_candidacy(&request).accepted);

        // Unreachable primary and a higher epoch is accepted.
        fx.health.record(false);
        let response = fx.coordinator.evaluate_candidacy(&request);
        assert!(response.accepted);
        assert_eq!(response.epoch, 0);
        assert_eq!(response.node_id, "node-2");

        // Epoch must be strictly ahead of ours.
        fx.role.observe_epoch(1);
        assert!(!fx.coordinator.evaluate_candidacy(&request).accepted);

        // A primary never accepts a candidacy.
        fx.role.try_promote(5);
        let behind = CandidacyRequest { epoch: 9, ..request.clone() };
        assert!(!fx.coordinator.evaluate_candidacy(&behind).accepted);
    }

    #[tokio::test]
    async fn test_wins_election_with_lowest_id() {
        let fx = build_coordinator("node-2", 3);
        let dead_primary = dead_address().await;
        let sim = Arc::new(PeerSim::new("node-3"));
        let sim_addr = spawn_sim(Arc::clone(&sim)).await;

        fx.directory.add_peer("node-1".into(), dead_primary.clone()).await;
        fx.directory.add_peer("node-3".into(), sim_addr).await;
        fx.directory.set_primary("node-1", &dead_primary).await;
        fx.health.record(false);

        fx.coordinator.start_election().await;

        assert!(fx.role.is_primary());
        assert_eq!(fx.role.epoch(), 1);
        assert_eq!(fx.directory.primary().await.unwrap().id, "node-2");
        assert_eq!(fx.coordinator.elections_started(), 1);
        assert!(!fx.coordinator.in_progress());

        let outcomes = sim.recorded_outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].winner_id, "node-2");
        assert_eq!(outcomes[0].epoch, 1);
    }

    #[tokio::test]
    async fn test_defers_to_lower_id_acceptor() {
        let fx = build_coordinator("node-3", 3);
        let dead_primary = dead_address().await;
        let sim = Arc::new(PeerSim::new("node-2"));
        let sim_addr = spawn_sim(Arc::clone(&sim)).await;

        fx.directory.add_peer("node-1".into(), dead_primary.clone()).await;
        fx.directory.add_peer("node-2".into(), sim_addr.clone()).await;
        fx.directory.set_primary("node-1", &dead_primary).await;
        fx.health.record(false);

        fx.coordinator.start_election().await;

        // node-2 sorts ahead of node-3, so the initiator repoints instead.
        assert!(!fx.role.is_primary());
        assert_eq!(fx.role.epoch(), 1);
        let primary = fx.directory.primary().await.unwrap();
        assert_eq!(primary.id, "node-2");
        assert_eq!(primary.address, sim_addr);

        let outcomes = sim.recorded_outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].winner_id, "node-2");
    }

    #[tokio::test]
    async fn test_aborts_when_primary_answers() {
        let fx = build_coordinator("node-2", 3);
        let primary = Arc::new(PeerSim::new("node-1"));
        let primary_addr = spawn_sim(Arc::clone(&primary)).await;
        let other = Arc::new(PeerSim::new("node-3"));
        let other_addr = spawn_sim(Arc::clone(&other)).await;

        fx.directory.add_peer("node-1".into(), primary_addr.clone()).await;
        fx.directory.add_peer("node-3".into(), other_addr).await;
        fx.directory.set_primary("node-1", &primary_addr).await;
        fx.health.record(false);

        fx.coordinator.start_election().await;

        assert!(!fx.role.is_primary());
        assert_eq!(fx.role.epoch(), 0);
        assert!(fx.health.primary_reachable());
        assert!(other.candidacy_epochs().is_empty());
    }

    #[tokio::test]
    async fn test_adopts_discovered_primary() {
        let fx = build_coordinator("node-3", 3);
        let dead_primary = dead_address().await;
        let mut promoted = PeerSim::new("node-2");
        promoted.role = Role::Primary;
        promoted.epoch = 5;
        let promoted = Arc::new(promoted);
        let promoted_addr = spawn_sim(Arc::clone(&promoted)).await;

        fx.directory.add_peer("node-1".into(), dead_primary.clone()).await;
        fx.directory.add_peer("node-2".into(), promoted_addr.clone()).await;
        fx.directory.set_primary("node-1", &dead_primary).await;
        fx.health.record(false);

        fx.coordinator.start_election().await;

        assert!(!fx.role.is_primary());
        assert_eq!(fx.role.epoch(), 5);
        let primary = fx.directory.primary().await.unwrap();
        assert_eq!(primary.id, "node-2");
        assert_eq!(primary.address, promoted_addr);
        // Adopted without ever asking for votes.
        assert!(promoted.candidacy_epochs().is_empty());
    }

    #[tokio::test]
    async fn test_exhausts_rounds_when_rejected() {
        let fx = build_coordinator("node-2", 2);
        let dead_primary = dead_address().await;
        let mut rejecting = PeerSim::new("node-3");
        rejecting.accept = false;
        let rejecting = Arc::new(rejecting);
        let rejecting_addr = spawn_sim(Arc::clone(&rejecting)).await;

        fx.directory.add_peer("node-1".into(), dead_primary.clone()).await;
        fx.directory.add_peer("node-3".into(), rejecting_addr).await;
        fx.directory.set_primary("node-1", &dead_primary).await;
        fx.health.record(false);

        fx.coordinator.start_election().await;

        // Still a replica at the original epoch, one candidacy per round.
        assert!(!fx.role.is_primary());
        assert_eq!(fx.role.epoch(), 0);
        assert_eq!(rejecting.candidacy_epochs(), vec![1, 2]);
        assert!(rejecting.recorded_outcomes().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_once() {
        let fx = build_coordinator("node-2", 1);
        let dead_primary = dead_address().await;
        fx.directory.add_peer("node-1".into(), dead_primary.clone()).await;
        fx.directory.set_primary("node-1", &dead_primary).await;
        fx.health.record(false);

        tokio::join!(fx.coordinator.start_election(), fx.coordinator.start_election());

        assert_eq!(fx.coordinator.elections_started(), 1);
        assert!(!fx.coordinator.in_progress());
    }

    #[tokio::test]
    async fn test_outcome_promotes_named_winner() {
        let fx = build_coordinator("node-1", 3);
        let outcome = OutcomeRequest {
            epoch: 3,
            winner_id: "node-1".into(),
            winner_address: "http://127.0.0.1:1".into(),
        };

        fx.coordinator.handle_outcome(&outcome).await.unwrap();
        assert!(fx.role.is_primary());
        assert_eq!(fx.role.epoch(), 3);
        assert!(fx.directory.primary_is_self().await);

        // Replaying the same outcome is stale now.
        let err = fx.coordinator.handle_outcome(&outcome).await.unwrap_err();
        assert!(matches!(err, Error::StaleEpoch { claimed: 3, current: 3 }));
    }

    #[tokio::test]
    async fn test_outcome_repoints_losers() {
        let fx = build_coordinator("node-3", 3);
        fx.directory
            .add_peer("node-2".into(), "http://10.0.0.2:7420".into())
            .await;
        fx.health.record(false);

        let outcome = OutcomeRequest {
            epoch: 2,
            winner_id: "node-2".into(),
            winner_address: "http://10.0.0.2:7420".into(),
        };
        fx.coordinator.handle_outcome(&outcome).await.unwrap();

        assert!(!fx.role.is_primary());
        assert_eq!(fx.role.epoch(), 2);
        assert_eq!(fx.directory.primary().await.unwrap().id, "node-2");
        // The new primary is presumed reachable until probed again.
        assert!(fx.health.primary_reachable());

        let stale = OutcomeRequest {
            epoch: 1,
            winner_id: "node-9".into(),
            winner_address: "http://10.0.0.9:7420".into(),
        };
        assert!(fx.coordinator.handle_outcome(&stale).await.is_err());
        assert_eq!(fx.directory.primary().await.unwrap().id, "node-2");
    }
}
