//! Replication Tasks

use serde::Serialize;
use uuid::Uuid;

use crate::operation::Operation;

/// Delivery state of a replication task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    /// Queued or mid-retry
    Pending,
    /// Peer acknowledged the operation
    Delivered,
    /// Retries exhausted; the task is dropped and never resurrected
    Failed,
}

/// One operation queued for delivery to one peer
///
/// The target peer is implied by which queue holds the task; retry timing
/// comes from the worker's backoff sleep rather than a stored deadline.
#[derive(Debug, Clone)]
pub struct ReplicationTask {
    /// Task id for log correlation
    pub id: Uuid,
    /// Operation to deliver
    pub operation: Operation,
    /// Epoch the primary held when the operation committed
    pub epoch: u64,
    /// Delivery attempts made so far
    pub attempt: u32,
    /// Current delivery state
    pub outcome: TaskOutcome,
}

impl ReplicationTask {
    /// Create a pending task for an operation committed at `epoch`
    pub fn new(operation: Operation, epoch: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            epoch,
            attempt: 0,
            outcome: TaskOutcome::Pending,
        }
    }
}
