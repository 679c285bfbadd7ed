use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Client, Collection, Database, bson::doc, options::IndexOptions};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoDiscoveryDocument, MongoMatchDocument, MongoMembershipDocument, doc_id, status_label,
        uuid_as_binary,
    },
};
use crate::dao::{
    match_store::{ChangeHub, MatchStore, MembershipChange, StoreChange},
    models::{DiscoveryEntity, MatchEntity, MatchStatus},
    storage::{StorageError, StorageResult},
};

const MATCH_COLLECTION_NAME: &str = "matches";
const MEMBERSHIP_COLLECTION_NAME: &str = "user_matches";
const DISCOVERY_COLLECTION_NAME: &str = "discoveries";
const CHANGE_FEED_CAPACITY: usize = 64;

/// MongoDB-backed [`MatchStore`].
#[derive(Clone)]
pub struct MongoMatchStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    // Change feed published by this process after each successful write; a
    // multi-instance deployment would tail a change stream instead.
    changes: ChangeHub,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoMatchStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
            changes: ChangeHub::new(CHANGE_FEED_CAPACITY),
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let matches = database.collection::<MongoMatchDocument>(MATCH_COLLECTION_NAME);
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"status": 1, "match_type": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("match_status_type_idx".to_owned()))
                    .build(),
            )
            .build();
        matches
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: MATCH_COLLECTION_NAME,
                index: "status,match_type",
                source,
            })?;

        let discoveries = database.collection::<MongoDiscoveryDocument>(DISCOVERY_COLLECTION_NAME);
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"match_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("discovery_match_idx".to_owned()))
                    .build(),
            )
            .build();
        discoveries
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: DISCOVERY_COLLECTION_NAME,
                index: "match_id",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn match_collection(&self) -> Collection<MongoMatchDocument> {
        self.database()
            .await
            .collection::<MongoMatchDocument>(MATCH_COLLECTION_NAME)
    }

    async fn membership_collection(&self) -> Collection<MongoMembershipDocument> {
        self.database()
            .await
            .collection::<MongoMembershipDocument>(MEMBERSHIP_COLLECTION_NAME)
    }

    async fn discovery_collection(&self) -> Collection<MongoDiscoveryDocument> {
        self.database()
            .await
            .collection::<MongoDiscoveryDocument>(DISCOVERY_COLLECTION_NAME)
    }

    /// Membership pointers follow the match write; the sweep repairs a tail
    /// that never landed.
    async fn apply_memberships(&self, edits: Vec<MembershipChange>) -> StorageResult<()> {
        let collection = self.membership_collection().await;
        for edit in edits {
            match edit {
                MembershipChange::Set { user_id, match_id } => {
                    let document = MongoMembershipDocument { user_id, match_id };
                    collection
                        .replace_one(doc_id(user_id), &document)
                        .upsert(true)
                        .await
                        .map_err(|source| MongoDaoError::WriteMembership { user_id, source })?;
                }
                MembershipChange::Clear { user_id } => {
                    collection
                        .delete_one(doc_id(user_id))
                        .await
                        .map_err(|source| MongoDaoError::WriteMembership { user_id, source })?;
                }
            }
        }
        Ok(())
    }

    async fn insert_match_inner(&self, entity: MatchEntity) -> StorageResult<()> {
        let id = entity.id;
        let document: MongoMatchDocument = entity.clone().into();
        self.match_collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveMatch { id, source })?;
        self.inner.changes.publish(StoreChange::MatchWritten(entity));
        Ok(())
    }

    async fn find_match_inner(&self, id: Uuid) -> StorageResult<Option<MatchEntity>> {
        let document = self
            .match_collection()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadMatch { id, source })?;

        document.map(|doc| doc.try_into().map_err(Into::into)).transpose()
    }

    async fn update_match_inner(
        &self,
        entity: MatchEntity,
        memberships: Vec<MembershipChange>,
    ) -> StorageResult<()> {
        let id = entity.id;
        let expected = entity.revision;
        let mut next = entity;
        next.revision += 1;
        let document: MongoMatchDocument = next.clone().into();

        let collection = self.match_collection().await;
        let filter = doc! {"_id": uuid_as_binary(id), "revision": expected as i64};
        let replaced = collection
            .find_one_and_replace(filter, &document)
            .await
            .map_err(|source| MongoDaoError::SaveMatch { id, source })?;

        if replaced.is_none() {
            // Either the revision moved under us or the document is gone.
            let current = collection
                .find_one(doc_id(id))
                .await
                .map_err(|source| MongoDaoError::LoadMatch { id, source })?;
            return match current {
                Some(doc) => Err(StorageError::WriteConflict {
                    id,
                    expected,
                    actual: doc.stored_revision(),
                }),
                None => Err(StorageError::MatchMissing { id }),
            };
        }

        self.apply_memberships(memberships).await?;
        self.inner.changes.publish(StoreChange::MatchWritten(next));
        Ok(())
    }

    async fn delete_match_inner(
        &self,
        id: Uuid,
        expected_revision: u64,
        memberships: Vec<MembershipChange>,
    ) -> StorageResult<()> {
        let collection = self.match_collection().await;
        let filter = doc! {"_id": uuid_as_binary(id), "revision": expected_revision as i64};
        let removed = collection
            .find_one_and_delete(filter)
            .await
            .map_err(|source| MongoDaoError::DeleteMatch { id, source })?;

        let Some(removed) = removed else {
            let current = collection
                .find_one(doc_id(id))
                .await
                .map_err(|source| MongoDaoError::LoadMatch { id, source })?;
            return match current {
                Some(doc) => Err(StorageError::WriteConflict {
                    id,
                    expected: expected_revision,
                    actual: doc.stored_revision(),
                }),
                // Already gone; still clear the pointers.
                None => self.apply_memberships(memberships).await,
            };
        };

        let entity: MatchEntity = removed.try_into()?;
        self.apply_memberships(memberships).await?;
        self.inner.changes.publish(StoreChange::MatchDeleted {
            id,
            match_type: entity.match_type,
        });
        Ok(())
    }

    async fn collect_matches(
        &self,
        filter: mongodb::bson::Document,
    ) -> StorageResult<Vec<MatchEntity>> {
        let documents: Vec<MongoMatchDocument> = self
            .match_collection()
            .await
            .find(filter)
            .sort(doc! {"created_at": 1})
            .await
            .map_err(|source| MongoDaoError::QueryMatches { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryMatches { source })?;

        documents
            .into_iter()
            .map(|doc| doc.try_into().map_err(Into::into))
            .collect()
    }
}

impl MatchStore for MongoMatchStore {
    fn insert_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_match_inner(entity).await })
    }

    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_match_inner(id).await })
    }

    fn update_match(
        &self,
        entity: MatchEntity,
        memberships: Vec<MembershipChange>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_match_inner(entity, memberships).await })
    }

    fn delete_match(
        &self,
        id: Uuid,
        expected_revision: u64,
        memberships: Vec<MembershipChange>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_match_inner(id, expected_revision, memberships).await })
    }

    fn query_waiting(
        &self,
        match_type: String,
    ) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .collect_matches(doc! {
                    "status": status_label(MatchStatus::Matching),
                    "match_type": match_type,
                })
                .await
        })
    }

    fn query_by_status(
        &self,
        status: MatchStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .collect_matches(doc! {"status": status_label(status)})
                .await
        })
    }

    fn membership(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .membership_collection()
                .await
                .find_one(doc_id(user_id))
                .await
                .map_err(|source| MongoDaoError::LoadMembership { user_id, source })?;
            Ok(document.map(|doc| doc.match_id))
        })
    }

    fn write_membership(
        &self,
        user_id: Uuid,
        match_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let edit = match match_id {
                Some(match_id) => MembershipChange::set(user_id, match_id),
                None => MembershipChange::clear(user_id),
            };
            store.apply_memberships(vec![edit]).await
        })
    }

    fn append_discovery(&self, event: DiscoveryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let id = event.id;
            let document: MongoDiscoveryDocument = event.clone().into();
            store
                .discovery_collection()
                .await
                .insert_one(&document)
                .await
                .map_err(|source| MongoDaoError::SaveDiscovery { id, source })?;
            store
                .inner
                .changes
                .publish(StoreChange::DiscoveryAppended(event));
            Ok(())
        })
    }

    fn list_discoveries(
        &self,
        match_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<DiscoveryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let documents: Vec<MongoDiscoveryDocument> = store
                .discovery_collection()
                .await
                .find(doc! {"match_id": uuid_as_binary(match_id)})
                .sort(doc! {"occurred_at": 1})
                .await
                .map_err(|source| MongoDaoError::LoadDiscoveries { match_id, source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::LoadDiscoveries { match_id, source })?;

            documents
                .into_iter()
                .map(|doc| doc.try_into().map_err(Into::into))
                .collect()
        })
    }

    fn user_matches(&self, user_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let member_key_1 = format!("team1.players.{user_id}");
            let member_key_2 = format!("team2.players.{user_id}");
            let mut involved = store
                .collect_matches(doc! {"$or": [
                    {member_key_1: {"$exists": true}},
                    {member_key_2: {"$exists": true}},
                ]})
                .await?;
            involved.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(involved)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.reconnect().await.map_err(Into::into) })
    }
}
