//! Cluster State Module
//!
//! Tracks this node's role and epoch, the peer directory with the
//! current primary pointer, and the election coordinator that reassigns
//! the primary role when it goes quiet.

mod directory;
mod election;
mod role;

pub use directory::{PeerDirectory, PeerRef, PrimaryRef};
pub use election::ElectionCoordinator;
pub use role::{Role, RoleSnapshot, RoleState};
