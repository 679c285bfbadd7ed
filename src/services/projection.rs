//! Live view projection: turns the store change feed into immutable
//! snapshots fanned out to SSE watchers.
//!
//! Projections are derived only, keyed per match id, and never merged, so
//! out-of-order delivery across different matches cannot cross-contaminate
//! state. Redundant notifications (identical document content) are dropped
//! before they reach subscribers.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{match_store::StoreChange, models::MatchEntity, models::MatchStatus},
    dto::{
        common::{DiscoverySnapshot, MatchSnapshot},
        sse::{
            DiscoveryScoredEvent, MatchRemovedEvent, MatchUpdatedEvent, ServerEvent,
            WaitingRemovedEvent, WaitingUpdatedEvent,
        },
    },
    services::lifecycle,
    state::{SharedState, capacity},
};

/// Event name of the initial snapshot on a match stream.
pub const SNAPSHOT_EVENT: &str = "snapshot";
/// Event name of the initial joinable list on a waiting stream.
pub const WAITING_LIST_EVENT: &str = "waiting_list";
/// Event name for match snapshot updates on a match stream.
pub const MATCH_UPDATED_EVENT: &str = "match_updated";
/// Event name sent when a watched match is deleted.
pub const MATCH_REMOVED_EVENT: &str = "match_removed";
/// Event name for discovery notifications on a match stream.
pub const DISCOVERY_EVENT: &str = "discovery";
/// Event name for joinable-match updates on a waiting stream.
pub const WAITING_UPDATED_EVENT: &str = "waiting_updated";
/// Event name sent when a match leaves the watched waiting list.
pub const WAITING_REMOVED_EVENT: &str = "waiting_removed";

/// Per-match content hashes used to drop redundant notifications.
#[derive(Default)]
pub struct ProjectionCache {
    hashes: HashMap<Uuid, u64>,
}

impl ProjectionCache {
    /// Fresh cache with no observed documents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the document and report whether its content actually changed.
    ///
    /// The revision counter is excluded from the hash: a conditional-write
    /// bump that left the content identical, or an at-least-once redelivery,
    /// is redundant for viewers.
    pub fn observe(&mut self, entity: &MatchEntity) -> bool {
        let hash = content_hash(entity);
        !matches!(self.hashes.insert(entity.id, hash), Some(previous) if previous == hash)
    }

    /// Drop the bookkeeping for a deleted match.
    pub fn forget(&mut self, match_id: Uuid) {
        self.hashes.remove(&match_id);
    }
}

fn content_hash(entity: &MatchEntity) -> u64 {
    // Hash the viewer-facing projection (remaining time pinned) so revision
    // bumps and storage-only fields do not count as changes.
    let snapshot = MatchSnapshot::from_entity(entity, Some(Duration::ZERO));
    let serialized = serde_json::to_string(&snapshot).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}

/// Snapshot of a stored entity with the remaining play time derived now.
pub fn snapshot_of(state: &SharedState, entity: &MatchEntity) -> MatchSnapshot {
    let remaining = lifecycle::remaining_time(state.config(), entity, SystemTime::now());
    MatchSnapshot::from_entity(entity, remaining)
}

/// Fan one change event out to the keyed hubs.
pub fn handle_change(state: &SharedState, cache: &mut ProjectionCache, change: StoreChange) {
    match change {
        StoreChange::MatchWritten(entity) => {
            if !cache.observe(&entity) {
                return;
            }
            let snapshot = snapshot_of(state, &entity);

            match ServerEvent::json(
                MATCH_UPDATED_EVENT.to_string(),
                &MatchUpdatedEvent(snapshot.clone()),
            ) {
                Ok(event) => state.sse().broadcast_match(entity.id, event),
                Err(err) => warn!(error = %err, "failed to serialise match update"),
            }

            // The waiting list of this type only cares whether the match is
            // still joinable.
            let joinable =
                entity.status == MatchStatus::Matching && !capacity::is_match_full(&entity);
            let waiting_event = if joinable {
                ServerEvent::json(
                    WAITING_UPDATED_EVENT.to_string(),
                    &WaitingUpdatedEvent(snapshot),
                )
            } else {
                ServerEvent::json(
                    WAITING_REMOVED_EVENT.to_string(),
                    &WaitingRemovedEvent {
                        match_id: entity.id,
                    },
                )
            };
            match waiting_event {
                Ok(event) => state.sse().broadcast_waiting(&entity.match_type, event),
                Err(err) => warn!(error = %err, "failed to serialise waiting update"),
            }
        }
        StoreChange::MatchDeleted { id, match_type } => {
            cache.forget(id);
            if let Ok(event) = ServerEvent::json(
                MATCH_REMOVED_EVENT.to_string(),
                &MatchRemovedEvent { match_id: id },
            ) {
                state.sse().broadcast_match(id, event);
            }
            if let Ok(event) = ServerEvent::json(
                WAITING_REMOVED_EVENT.to_string(),
                &WaitingRemovedEvent { match_id: id },
            ) {
                state.sse().broadcast_waiting(&match_type, event);
            }
            state.sse().prune_match(id);
        }
        StoreChange::DiscoveryAppended(discovery) => {
            let snapshot: DiscoverySnapshot = (&discovery).into();
            match ServerEvent::json(DISCOVERY_EVENT.to_string(), &DiscoveryScoredEvent(snapshot)) {
                Ok(event) => state.sse().broadcast_match(discovery.match_id, event),
                Err(err) => warn!(error = %err, "failed to serialise discovery event"),
            }
        }
    }
}

/// Consume the store change feed until the process shuts down, resubscribing
/// whenever the storage backend is swapped by the supervisor.
pub async fn run(state: SharedState) {
    let mut degraded = state.degraded_watcher();
    let mut cache = ProjectionCache::new();

    loop {
        let Some(store) = state.match_store().await else {
            if degraded.changed().await.is_err() {
                return;
            }
            continue;
        };

        let mut changes = store.subscribe();
        loop {
            match changes.recv().await {
                Ok(change) => handle_change(&state, &mut cache, change),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "projection lagged behind the change feed");
                }
                Err(RecvError::Closed) => break,
            }
        }

        sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::memory_state};

    fn entity() -> MatchEntity {
        MatchEntity::new("2v2".into(), 2, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn cache_drops_redundant_notifications() {
        let mut cache = ProjectionCache::new();
        let mut m = entity();

        assert!(cache.observe(&m), "first sight is fresh");
        assert!(!cache.observe(&m), "replayed delivery is redundant");

        // A revision bump without content change is still redundant.
        m.revision += 1;
        assert!(!cache.observe(&m));

        // Real content changes get through.
        m.team1.players.insert(Uuid::new_v4(), 0);
        m.team1.current_players = 1;
        assert!(cache.observe(&m));
    }

    #[test]
    fn cache_is_keyed_per_match() {
        let mut cache = ProjectionCache::new();
        let a = entity();
        let b = entity();

        assert!(cache.observe(&a));
        // A different match with identical content is its own projection.
        assert!(cache.observe(&b));
        assert!(!cache.observe(&a));

        cache.forget(a.id);
        assert!(cache.observe(&a), "forgotten matches are fresh again");
    }

    #[tokio::test]
    async fn match_events_reach_only_their_watchers() {
        let state = memory_state(AppConfig::default()).await;
        let mut cache = ProjectionCache::new();
        let watched = entity();
        let other = entity();

        let mut rx = state.sse().subscribe_match(watched.id);
        let mut other_rx = state.sse().subscribe_match(other.id);

        handle_change(&state, &mut cache, StoreChange::MatchWritten(watched.clone()));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event.as_deref(), Some(MATCH_UPDATED_EVENT));
        assert!(other_rx.try_recv().is_err());

        // Deletion notifies watchers and clears the cache entry.
        handle_change(
            &state,
            &mut cache,
            StoreChange::MatchDeleted {
                id: watched.id,
                match_type: watched.match_type.clone(),
            },
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event.as_deref(), Some(MATCH_REMOVED_EVENT));
    }

    #[tokio::test]
    async fn waiting_stream_tracks_joinability() {
        let state = memory_state(AppConfig::default()).await;
        let mut cache = ProjectionCache::new();
        let mut m = entity();

        let mut rx = state.sse().subscribe_waiting("2v2");

        handle_change(&state, &mut cache, StoreChange::MatchWritten(m.clone()));
        assert_eq!(
            rx.try_recv().unwrap().event.as_deref(),
            Some(WAITING_UPDATED_EVENT)
        );

        // Fill both teams: the match must drop off the waiting list.
        for number in crate::dao::models::TeamNumber::ALL {
            let team = m.team_mut(number);
            for _ in 0..2 {
                team.players.insert(Uuid::new_v4(), 0);
                team.current_players += 1;
            }
        }
        m.revision += 1;
        handle_change(&state, &mut cache, StoreChange::MatchWritten(m));
        assert_eq!(
            rx.try_recv().unwrap().event.as_deref(),
            Some(WAITING_REMOVED_EVENT)
        );
    }
}
