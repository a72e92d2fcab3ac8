//! Replication Fan-Out
//!
//! One bounded FIFO queue and one worker task per peer. Dispatch stamps
//! the primary's current epoch on the task, enqueues a copy for every
//! peer, and returns without waiting; the commit path never blocks on a
//! replica. Workers retry each task with exponential backoff up to the
//! configured attempt cap, then drop it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::network::PeerClient;
use crate::operation::Operation;
use crate::state::{PeerDirectory, RoleState};

use super::protocol::{self, OperationAck};
use super::task::{ReplicationTask, TaskOutcome};
use super::RetryPolicy;

/// Counters across all peers
#[derive(Debug, Default)]
pub struct ReplicationStats {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl ReplicationStats {
    fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of the replication counters
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Fans committed operations out to every registered peer
pub struct Replicator {
    role: Arc<RoleState>,
    /// Peer id -> that peer's task queue
    queues: HashMap<String, mpsc::Sender<ReplicationTask>>,
    stats: Arc<ReplicationStats>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Replicator {
    /// Spawn one worker per registered peer and return the dispatcher
    pub async fn start(
        directory: Arc<PeerDirectory>,
        role: Arc<RoleState>,
        client: PeerClient,
        policy: RetryPolicy,
        queue_capacity: usize,
        shutdown: &CancellationToken,
    ) -> Self {
        let cancel = shutdown.child_token();
        let stats = Arc::new(ReplicationStats::default());
        let tracker = TaskTracker::new();
        let mut queues = HashMap::new();

        for peer in directory.peers().await {
            let (tx, rx) = mpsc::channel(queue_capacity);
            let worker = PeerWorker {
                peer_id: peer.id.clone(),
                address: peer.address.clone(),
                origin: directory.node_id().to_string(),
                client: client.clone(),
                policy: policy.clone(),
                directory: Arc::clone(&directory),
                stats: Arc::clone(&stats),
                cancel: cancel.clone(),
            };
            tracker.spawn(worker.run(rx));
            queues.insert(peer.id, tx);
        }

        Self {
            role,
            queues,
            stats,
            tracker,
            cancel,
        }
    }

    /// Queue an operation for delivery to every peer
    ///
    /// Stamps the current epoch and returns immediately. A full peer queue
    /// drops that peer's copy with an error log; like retry exhaustion,
    /// the drop is final.
    pub fn dispatch(&self, operation: Operation) {
        let epoch = self.role.epoch();
        for (peer_id, sender) in &self.queues {
            let task = ReplicationTask::new(operation.clone(), epoch);
            let task_id = task.id;
            self.stats.record_dispatched();
            match sender.try_send(task) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.record_failed();
                    tracing::error!(
                        peer = %peer_id,
                        task = %task_id,
                        kind = operation.kind(),
                        "replication queue full, dropping task"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.stats.record_failed();
                    tracing::debug!(peer = %peer_id, "replication queue closed, dropping task");
                }
            }
        }
    }

    /// Number of peers with a live queue
    pub fn peer_count(&self) -> usize {
        self.queues.len()
    }

    /// Current counter values
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Abort in-flight retries and wait for every worker to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Drains one peer's queue, a single task in flight at a time
struct PeerWorker {
    peer_id: String,
    address: String,
    origin: String,
    client: PeerClient,
    policy: RetryPolicy,
    directory: Arc<PeerDirectory>,
    stats: Arc<ReplicationStats>,
    cancel: CancellationToken,
}

impl PeerWorker {
    async fn run(self, mut rx: mpsc::Receiver<ReplicationTask>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                maybe_task = rx.recv() => match maybe_task {
                    Some(task) => self.deliver(task).await,
                    None => break,
                },
            }
        }
        tracing::debug!(peer = %self.peer_id, "replication worker stopped");
    }

    /// Deliver one task, retrying with exponential backoff
    async fn deliver(&self, mut task: ReplicationTask) {
        let (path, body) = protocol::encode_operation(&task.operation, task.epoch, &self.origin);
        loop {
            task.attempt += 1;
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.client.post_json::<_, OperationAck>(
                    &self.address,
                    path,
                    &body,
                    self.policy.attempt_timeout,
                ) => result,
            };

            match attempt {
                Ok(ack) => {
                    task.outcome = TaskOutcome::Delivered;
                    self.stats.record_delivered();
                    self.directory.record_contact(&self.peer_id).await;
                    tracing::info!(
                        peer = %self.peer_id,
                        task = %task.id,
                        kind = task.operation.kind(),
                        attempts = task.attempt,
                        rows = ack.rows_affected,
                        "replication delivered"
                    );
                    return;
                }
                Err(e) if task.attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_delay(task.attempt);
                    tracing::warn!(
                        peer = %self.peer_id,
                        task = %task.id,
                        attempt = task.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "replication attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    task.outcome = TaskOutcome::Failed;
                    self.stats.record_failed();
                    tracing::error!(
                        peer = %self.peer_id,
                        task = %task.id,
                        kind = task.operation.kind(),
                        attempts = task.attempt,
                        error = %e,
                        "replication failed, dropping task"
                    );
                    return;
                }
            }
        }
    }
}
