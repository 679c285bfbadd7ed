use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::dao::{
    match_store::{ChangeHub, MatchStore, MembershipChange, StoreChange},
    models::{DiscoveryEntity, MatchEntity, MatchStatus},
    storage::{StorageError, StorageResult},
};

const CHANGE_FEED_CAPACITY: usize = 64;

/// In-process [`MatchStore`] holding all tables behind one lock.
#[derive(Clone)]
pub struct MemoryMatchStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    tables: RwLock<Tables>,
    changes: ChangeHub,
}

#[derive(Default)]
struct Tables {
    matches: HashMap<Uuid, MatchEntity>,
    memberships: HashMap<Uuid, Uuid>,
    discoveries: Vec<DiscoveryEntity>,
}

impl Tables {
    fn apply_memberships(&mut self, edits: Vec<MembershipChange>) {
        for edit in edits {
            match edit {
                MembershipChange::Set { user_id, match_id } => {
                    self.memberships.insert(user_id, match_id);
                }
                MembershipChange::Clear { user_id } => {
                    self.memberships.remove(&user_id);
                }
            }
        }
    }
}

impl MemoryMatchStore {
    /// Fresh store with empty tables.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(Tables::default()),
                changes: ChangeHub::new(CHANGE_FEED_CAPACITY),
            }),
        }
    }
}

impl Default for MemoryMatchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchStore for MemoryMatchStore {
    fn insert_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            tables.matches.insert(entity.id, entity.clone());
            // Published while the write lock is held so per-match events keep
            // write order.
            inner.changes.publish(StoreChange::MatchWritten(entity));
            Ok(())
        })
    }

    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables.matches.get(&id).cloned())
        })
    }

    fn update_match(
        &self,
        mut entity: MatchEntity,
        memberships: Vec<MembershipChange>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let stored = tables
                .matches
                .get(&entity.id)
                .ok_or(StorageError::MatchMissing { id: entity.id })?;

            if stored.revision != entity.revision {
                return Err(StorageError::WriteConflict {
                    id: entity.id,
                    expected: entity.revision,
                    actual: stored.revision,
                });
            }

            entity.revision += 1;
            tables.matches.insert(entity.id, entity.clone());
            tables.apply_memberships(memberships);
            inner.changes.publish(StoreChange::MatchWritten(entity));
            Ok(())
        })
    }

    fn delete_match(
        &self,
        id: Uuid,
        expected_revision: u64,
        memberships: Vec<MembershipChange>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let Some(stored) = tables.matches.get(&id) else {
                // Already gone; apply the pointer edits anyway so a replayed
                // delete still clears its members.
                tables.apply_memberships(memberships);
                return Ok(());
            };

            if stored.revision != expected_revision {
                return Err(StorageError::WriteConflict {
                    id,
                    expected: expected_revision,
                    actual: stored.revision,
                });
            }

            let match_type = stored.match_type.clone();
            tables.matches.remove(&id);
            tables.apply_memberships(memberships);
            inner.changes.publish(StoreChange::MatchDeleted { id, match_type });
            Ok(())
        })
    }

    fn query_waiting(
        &self,
        match_type: String,
    ) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.tables.read().await;
            let mut waiting: Vec<MatchEntity> = tables
                .matches
                .values()
                .filter(|m| m.status == MatchStatus::Matching && m.match_type == match_type)
                .cloned()
                .collect();
            waiting.sort_by_key(|m| m.created_at);
            Ok(waiting)
        })
    }

    fn query_by_status(
        &self,
        status: MatchStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.tables.read().await;
            let mut found: Vec<MatchEntity> = tables
                .matches
                .values()
                .filter(|m| m.status == status)
                .cloned()
                .collect();
            found.sort_by_key(|m| m.created_at);
            Ok(found)
        })
    }

    fn membership(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables.memberships.get(&user_id).copied())
        })
    }

    fn write_membership(
        &self,
        user_id: Uuid,
        match_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            match match_id {
                Some(id) => tables.memberships.insert(user_id, id),
                None => tables.memberships.remove(&user_id),
            };
            Ok(())
        })
    }

    fn append_discovery(&self, event: DiscoveryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            tables.discoveries.push(event.clone());
            inner.changes.publish(StoreChange::DiscoveryAppended(event));
            Ok(())
        })
    }

    fn list_discoveries(
        &self,
        match_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<DiscoveryEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables
                .discoveries
                .iter()
                .filter(|d| d.match_id == match_id)
                .cloned()
                .collect())
        })
    }

    fn user_matches(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.tables.read().await;
            let mut involved: Vec<MatchEntity> = tables
                .matches
                .values()
                .filter(|m| m.member_team(user_id).is_some())
                .cloned()
                .collect();
            involved.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(involved)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn sample_match() -> MatchEntity {
        MatchEntity::new("2v2".into(), 2, SystemTime::now())
    }

    #[tokio::test]
    async fn update_requires_matching_revision() {
        let store = MemoryMatchStore::new();
        let entity = sample_match();
        let id = entity.id;
        store.insert_match(entity).await.unwrap();

        let mut first = store.find_match(id).await.unwrap().unwrap();
        let second = first.clone();

        let user = Uuid::new_v4();
        first.team1.players.insert(user, 0);
        first.team1.current_players = 1;
        store
            .update_match(first, vec![MembershipChange::set(user, id)])
            .await
            .unwrap();

        // The second writer still holds revision 0 and must lose.
        let err = store.update_match(second, Vec::new()).await.unwrap_err();
        assert!(err.is_conflict());

        let reread = store.find_match(id).await.unwrap().unwrap();
        assert_eq!(reread.revision, 1);
        assert_eq!(reread.team1.current_players, 1);
        assert_eq!(store.membership(user).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn delete_is_conditional_but_idempotent() {
        let store = MemoryMatchStore::new();
        let entity = sample_match();
        let id = entity.id;
        store.insert_match(entity).await.unwrap();

        let err = store.delete_match(id, 7, Vec::new()).await.unwrap_err();
        assert!(err.is_conflict());

        store.delete_match(id, 0, Vec::new()).await.unwrap();
        assert!(store.find_match(id).await.unwrap().is_none());

        // Replaying the delete is fine.
        store.delete_match(id, 0, Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn query_waiting_filters_status_and_type() {
        let store = MemoryMatchStore::new();
        let waiting = sample_match();
        let waiting_id = waiting.id;
        store.insert_match(waiting).await.unwrap();

        let mut playing = sample_match();
        playing.status = MatchStatus::Playing;
        store.insert_match(playing).await.unwrap();

        let other_type = MatchEntity::new("3v3".into(), 3, SystemTime::now());
        store.insert_match(other_type).await.unwrap();

        let found = store.query_waiting("2v2".into()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, waiting_id);
    }

    #[tokio::test]
    async fn change_feed_reports_writes_in_order() {
        let store = MemoryMatchStore::new();
        let mut feed = store.subscribe();

        let entity = sample_match();
        let id = entity.id;
        store.insert_match(entity).await.unwrap();
        let mut updated = store.find_match(id).await.unwrap().unwrap();
        updated.status = MatchStatus::Playing;
        store.update_match(updated, Vec::new()).await.unwrap();

        match feed.recv().await.unwrap() {
            StoreChange::MatchWritten(m) => assert_eq!(m.revision, 0),
            other => panic!("unexpected change: {other:?}"),
        }
        match feed.recv().await.unwrap() {
            StoreChange::MatchWritten(m) => {
                assert_eq!(m.revision, 1);
                assert_eq!(m.status, MatchStatus::Playing);
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }
}
