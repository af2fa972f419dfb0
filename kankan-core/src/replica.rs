//! Narrow replication contract used by the sync layer.
//!
//! Sessions never touch the CRDT library directly: they exchange state
//! vectors and updates through [`Replica`], and every committed change is
//! reported to observers together with the [`Origin`] that produced it.

use std::fmt;
use uuid::Uuid;

use crate::error::DocumentError;

/// Encoding of an update that carries no structs and no deletions.
pub const EMPTY_UPDATE: [u8; 2] = [0, 0];

/// Returns true when `update` has nothing to integrate.
pub fn is_empty_update(update: &[u8]) -> bool {
    update.is_empty() || update == EMPTY_UPDATE
}

/// Per-session marker attached to updates that arrived over the network.
///
/// A fresh tag is minted for every session, so no remote update can ever
/// carry a tag equal to the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkTag(Uuid);

impl NetworkTag {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NetworkTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NetworkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:{}", self.0)
    }
}

/// Where a committed change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A transaction run by this process.
    Local,
    /// Replayed from the durable store while loading.
    Persistence,
    /// Applied from a peer's update message.
    Remote(NetworkTag),
}

impl Origin {
    /// True if this change was applied by the session owning `tag`.
    pub fn is_network(&self, tag: NetworkTag) -> bool {
        matches!(self, Origin::Remote(t) if *t == tag)
    }
}

/// Merge contract of a replicated document.
///
/// Implementations must make `apply` idempotent and order-independent;
/// convergence of the sync protocol relies on nothing else.
pub trait Replica: Send + Sync {
    /// Encoded summary of every operation already integrated.
    fn state_vector(&self) -> Vec<u8>;

    /// Operations not summarized by `remote_vector`.
    fn diff(&self, remote_vector: &[u8]) -> Result<Vec<u8>, DocumentError>;

    /// Integrate `update`, notifying observers with `origin`.
    fn apply(&self, update: &[u8], origin: Origin) -> Result<(), DocumentError>;

    /// The full document state as a single update.
    fn encode_state(&self) -> Vec<u8>;
}
