//! Node Role State
//!
//! Tracks the role this node currently plays and the epoch it believes the
//! cluster is in. Promotions and epoch observations are atomic with respect
//! to each other; readers always see a consistent (role, epoch) pair.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts writes and fans them out to replicas
    Primary,
    /// Applies replicated operations and probes the primary
    #[default]
    Replica,
}

impl Role {
    /// Whether this is the primary role
    pub fn is_primary(&self) -> bool {
        matches!(self, Role::Primary)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

/// A consistent view of the node's role and epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub role: Role,
    pub epoch: u64,
}

impl RoleSnapshot {
    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }
}

/// Guarded role and epoch for this node
///
/// Epochs only move forward: [`try_promote`](RoleState::try_promote) and
/// [`observe_epoch`](RoleState::observe_epoch) both require a strictly
/// higher epoch and are no-ops otherwise. Neither is ever called while
/// holding the lock across an await point; the guard is synchronous.
pub struct RoleState {
    inner: Mutex<RoleSnapshot>,
}

impl RoleState {
    /// Create role state with the configured startup role at epoch 0
    pub fn new(role: Role) -> Self {
        Self {
            inner: Mutex::new(RoleSnapshot { role, epoch: 0 }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoleSnapshot> {
        // A poisoned lock still holds a valid (role, epoch) pair
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a consistent snapshot of role and epoch
    pub fn snapshot(&self) -> RoleSnapshot {
        *self.lock()
    }

    /// Get the current role
    pub fn role(&self) -> Role {
        self.lock().role
    }

    /// Get the current epoch
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Check whether this node currently believes it is primary
    pub fn is_primary(&self) -> bool {
        self.lock().role == Role::Primary
    }

    /// Promote this node to primary at `new_epoch`
    ///
    /// Succeeds only if `new_epoch` is strictly greater than the current
    /// epoch. Duplicate promotions for the same epoch are rejected, which
    /// makes the call idempotent when an election outcome is delivered
    /// more than once.
    pub fn try_promote(&self, new_epoch: u64) -> bool {
        let mut state = self.lock();
        if new_epoch > state.epoch {
            state.role = Role::Primary;
            state.epoch = new_epoch;
            true
        } else {
            false
        }
    }

    /// Adopt a remote primary's higher epoch and become (or stay) replica
    ///
    /// This is both the repoint path for replicas learning of a new primary
    /// and the step-down path for a stale primary that discovers it has
    /// been superseded. Returns false (no change) unless `new_epoch` is
    /// strictly greater than the current epoch.
    pub fn observe_epoch(&self, new_epoch: u64) -> bool {
        let mut state = self.lock();
        if new_epoch > state.epoch {
            state.role = Role::Replica;
            state.epoch = new_epoch;
            true
        } else {
            false
        }
    }

    /// Admit an epoch claimed by a peer message, in one atomic step
    ///
    /// Lower epochs are rejected with the current epoch, equal epochs pass
    /// untouched, higher epochs are adopted the same way
    /// [`observe_epoch`](RoleState::observe_epoch) does. Returns Ok(true)
    /// when the claim moved the epoch forward.
    pub fn admit_epoch(&self, claimed: u64) -> std::result::Result<bool, u64> {
        let mut state = self.lock();
        if claimed < state.epoch {
            return Err(state.epoch);
        }
        if claimed > state.epoch {
            state.role = Role::Replica;
            state.epoch = claimed;
            return Ok(true);
        }
        Ok(false)
    }
}
