pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::models::{DiscoveryEntity, MatchEntity, MatchStatus};
use crate::dao::storage::StorageResult;

/// Membership-index edit applied together with a match write.
///
/// Backends fold these into the same request as the match document wherever
/// the underlying store allows it; where it does not, the membership write
/// follows the match write and a failed tail is repaired by the
/// reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    /// Point the user's active-match entry at the given match.
    Set {
        /// User whose pointer is updated.
        user_id: Uuid,
        /// Match the user now belongs to.
        match_id: Uuid,
    },
    /// Remove the user's active-match entry.
    Clear {
        /// User whose pointer is removed.
        user_id: Uuid,
    },
}

impl MembershipChange {
    /// Shorthand for a pointer assignment.
    pub fn set(user_id: Uuid, match_id: Uuid) -> Self {
        Self::Set { user_id, match_id }
    }

    /// Shorthand for a pointer removal.
    pub fn clear(user_id: Uuid) -> Self {
        Self::Clear { user_id }
    }
}

/// Change event published by a store after a successful mutation.
///
/// Delivery is at-least-once with no ordering guarantee across distinct
/// matches; events for a single match are published in write order.
#[derive(Debug, Clone)]
pub enum StoreChange {
    /// A match document was created or updated; carries the full document.
    MatchWritten(MatchEntity),
    /// A match document was removed.
    MatchDeleted {
        /// Identifier of the deleted match.
        id: Uuid,
        /// Type label the match carried, for waiting-list bookkeeping.
        match_type: String,
    },
    /// An immutable discovery event was appended.
    DiscoveryAppended(DiscoveryEntity),
}

/// Broadcast hub every backend uses to publish its change feed.
pub struct ChangeHub {
    sender: broadcast::Sender<StoreChange>,
}

impl ChangeHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.sender.subscribe()
    }

    /// Publish a change to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, change: StoreChange) {
        let _ = self.sender.send(change);
    }
}

/// Abstraction over the persistence layer for matches, the membership index,
/// and the discovery log.
///
/// Updates and deletes are conditional on the document revision the caller
/// read; a lost race surfaces as [`crate::dao::storage::StorageError::WriteConflict`]
/// and the caller re-reads before retrying.
pub trait MatchStore: Send + Sync {
    /// Create a fresh match document (revision 0).
    fn insert_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a match document by id.
    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>>;
    /// Conditionally replace a match document and apply the membership edits
    /// as one logical unit. `entity.revision` must equal the stored revision;
    /// the store bumps it on success.
    fn update_match(
        &self,
        entity: MatchEntity,
        memberships: Vec<MembershipChange>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Conditionally remove a match document and apply the membership edits.
    /// Removing an already-absent match is not an error.
    fn delete_match(
        &self,
        id: Uuid,
        expected_revision: u64,
        memberships: Vec<MembershipChange>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Matches still in `matching` status with the given type label.
    fn query_waiting(&self, match_type: String)
    -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>>;
    /// All matches currently in the given status; used by the sweep.
    fn query_by_status(
        &self,
        status: MatchStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>>;
    /// Active-match pointer for the user, if any.
    fn membership(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Option<Uuid>>>;
    /// Overwrite the user's active-match pointer outside of a match write;
    /// used by the create saga and by membership repair.
    fn write_membership(
        &self,
        user_id: Uuid,
        match_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Append an immutable discovery event.
    fn append_discovery(&self, event: DiscoveryEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Discovery log of a match, in append order.
    fn list_discoveries(
        &self,
        match_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<DiscoveryEntity>>>;
    /// Every match the user ever appeared in, newest first; powers history views.
    fn user_matches(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>>;
    /// Subscribe to the change feed of this store.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
    /// Cheap connectivity probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Attempt to re-establish a dropped backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
