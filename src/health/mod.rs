//! Primary Health Monitoring
//!
//! Replicas probe the primary's `/health` endpoint on a fixed interval.
//! A run of consecutive failures marks the primary unreachable and
//! triggers an election.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::network::PeerClient;
use crate::state::{ElectionCoordinator, PeerDirectory, RoleState};

/// Counts consecutive probe failures against a threshold.
#[derive(Debug)]
pub struct FailureTracker {
    threshold: u32,
    consecutive: u32,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    /// Record a failed probe. Returns true once the streak reaches the
    /// threshold.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive >= self.threshold
    }

    /// Clear the streak, after a successful probe or a primary change.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Shared verdict of the most recent primary probe.
///
/// Candidacy evaluation consults this: a node only backs a candidate when
/// its own probes say the primary is gone. Starts reachable so a node
/// that has not probed yet never endorses an election.
#[derive(Debug)]
pub struct HealthView {
    primary_reachable: AtomicBool,
}

impl HealthView {
    pub fn new() -> Self {
        Self {
            primary_reachable: AtomicBool::new(true),
        }
    }

    pub fn record(&self, reachable: bool) {
        self.primary_reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn primary_reachable(&self) -> bool {
        self.primary_reachable.load(Ordering::SeqCst)
    }
}

impl Default for HealthView {
    fn default() -> Self {
        Self::new()
    }
}

/// Background loop probing the current primary.
pub struct HealthMonitor {
    directory: Arc<PeerDirectory>,
    role: Arc<RoleState>,
    client: PeerClient,
    view: Arc<HealthView>,
    election: Arc<ElectionCoordinator>,
    probe_interval: Duration,
    probe_timeout: Duration,
    tracker: FailureTracker,
    cancel: CancellationToken,
}

impl HealthMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<PeerDirectory>,
        role: Arc<RoleState>,
        client: PeerClient,
        view: Arc<HealthView>,
        election: Arc<ElectionCoordinator>,
        probe_interval: Duration,
        probe_timeout: Duration,
        failure_threshold: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            directory,
            role,
            client,
            view,
            election,
            probe_interval,
            probe_timeout,
            tracker: FailureTracker::new(failure_threshold),
            cancel,
        }
    }

    /// Probe loop. Primaries sit idle; replicas probe the primary pointer
    /// every interval and run an election inline when the failure streak
    /// crosses the threshold. Runs until the token is cancelled.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_target: Option<String> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("health monitor stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if self.role.is_primary() {
                self.tracker.reset();
                continue;
            }

            let Some(primary) = self.directory.primary().await else {
                continue;
            };
            if primary.id == self.directory.node_id() {
                continue;
            }

            // A repoint restarts the failure streak.
            if last_target.as_deref() != Some(primary.id.as_str()) {
                self.tracker.reset();
                last_target = Some(primary.id.clone());
            }

            match self
                .client
                .check_health(&primary.address, self.probe_timeout)
                .await
            {
                Ok(()) => {
                    self.view.record(true);
                    self.tracker.reset();
                    self.directory.record_contact(&primary.id).await;
                    tracing::trace!(primary = %primary.id, "primary probe ok");
                }
                Err(error) => {
                    self.view.record(false);
                    let crossed = self.tracker.record_failure();
                    tracing::warn!(
                        primary = %primary.id,
                        failures = self.tracker.consecutive(),
                        %error,
                        "primary probe failed"
                    );
                    if crossed {
                        tracing::error!(
                            primary = %primary.id,
                            "primary unreachable, triggering election"
                        );
                        self.tracker.reset();
                        self.election.start_election().await;
                    }
                }
            }
        }
    }
}
