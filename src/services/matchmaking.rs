//! Matchmaking orchestration: create, join, leave, cancel.
//!
//! No store primitive spans the match document and the membership index
//! atomically, so every capacity-affecting mutation follows the same
//! discipline: re-read the match, apply the capacity ledger, write
//! conditionally on the revision that was read, and retry with jittered
//! backoff when the write loses. A join that keeps losing falls back to
//! alternate waiting matches before giving up with `NoMatchAvailable`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        match_store::{MatchStore, MembershipChange},
        models::{DiscoveryEntity, MatchEntity, MatchStatus},
        storage::StorageError,
    },
    dto::validation::players_per_side,
    error::ServiceError,
    services::lifecycle,
    state::{SharedState, capacity},
};

/// Delay before the next optimistic retry, jittered so colliding writers
/// spread out instead of re-colliding in lockstep.
pub(crate) fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let stretched = base.saturating_mul(1 << attempt.min(4));
    let jitter_ms = rand::rng().random_range(0..=stretched.as_millis() as u64 / 2 + 1);
    stretched + Duration::from_millis(jitter_ms)
}

/// Create a match with two empty teams sized from the type label, then join
/// the creator to team 1.
///
/// Two physical writes: the empty match shell, then the creator's slot claim
/// (which carries the membership pointer). A failed second write reaps the
/// shell best-effort; the reconciliation sweep covers whatever remains.
pub async fn create_match(
    state: &SharedState,
    match_type: &str,
    user_id: Uuid,
) -> Result<MatchEntity, ServiceError> {
    let per_side = players_per_side(match_type).ok_or_else(|| {
        ServiceError::InvalidInput(format!("unknown match type `{match_type}`"))
    })?;

    let store = state.require_match_store().await?;
    ensure_not_queued(state, user_id).await?;

    let shell = MatchEntity::new(match_type.to_owned(), per_side, SystemTime::now());
    let match_id = shell.id;
    store.insert_match(shell.clone()).await?;

    match try_claim_slot(state, &store, shell, user_id).await {
        Ok(entity) => {
            info!(%match_id, %user_id, match_type, "match created");
            Ok(entity)
        }
        Err(err) => {
            if let Err(cleanup) = store.delete_match(match_id, 0, Vec::new()).await {
                warn!(%match_id, error = %cleanup, "could not reap empty shell; sweep will");
            }
            Err(err)
        }
    }
}

/// Waiting matches of the given type that still have an open slot.
///
/// The full-match filter defends against stale query results: a match may
/// have filled between the index read and now.
pub async fn find_joinable(
    state: &SharedState,
    match_type: &str,
) -> Result<Vec<MatchEntity>, ServiceError> {
    let store = state.require_match_store().await?;
    let waiting = store.query_waiting(match_type.to_owned()).await?;
    Ok(waiting
        .into_iter()
        .filter(|m| m.status == MatchStatus::Matching && !capacity::is_match_full(m))
        .collect())
}

/// Join the given match, falling back to alternate waiting matches of the
/// same type when the slot is lost to a race.
pub async fn join_match(
    state: &SharedState,
    match_id: Uuid,
    user_id: Uuid,
) -> Result<MatchEntity, ServiceError> {
    let store = state.require_match_store().await?;
    ensure_not_queued(state, user_id).await?;

    let first = store
        .find_match(match_id)
        .await?
        .ok_or(ServiceError::MatchNotFound(match_id))?;
    let match_type = first.match_type.clone();

    let mut tried: Vec<Uuid> = Vec::new();
    let mut candidate = Some(first);

    for _ in 0..state.config().join_attempt_limit() {
        let Some(entity) = candidate.take() else { break };
        let target_id = entity.id;
        tried.push(target_id);

        match try_claim_slot(state, &store, entity, user_id).await {
            Ok(_) => {
                lifecycle::try_start(state, &store, target_id).await?;
                let joined = store
                    .find_match(target_id)
                    .await?
                    .ok_or(ServiceError::MatchNotFound(target_id))?;
                info!(match_id = %target_id, %user_id, "player joined");
                return Ok(joined);
            }
            Err(ServiceError::CapacityExceeded) => {
                debug!(match_id = %target_id, %user_id, "lost the slot; trying an alternate");
                candidate = find_joinable(state, &match_type)
                    .await?
                    .into_iter()
                    .find(|m| !tried.contains(&m.id));
            }
            Err(err) => return Err(err),
        }
    }

    Err(ServiceError::NoMatchAvailable)
}

/// Leave a match that has not started yet. The last player out deletes the
/// match entirely; otherwise the decremented team is written back.
pub async fn leave_match(
    state: &SharedState,
    match_id: Uuid,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_match_store().await?;
    let retry_limit = state.config().conflict_retry_limit();

    let mut entity = store
        .find_match(match_id)
        .await?
        .ok_or(ServiceError::MatchNotFound(match_id))?;

    for attempt in 0..=retry_limit {
        if entity.status != MatchStatus::Matching {
            return Err(ServiceError::MatchInProgress);
        }
        let number = entity
            .member_team(user_id)
            .ok_or(ServiceError::MemberNotFound)?;
        let remaining = capacity::apply_leave(entity.team(number), user_id)
            .map_err(|_| ServiceError::MemberNotFound)?;

        let mut next = entity.clone();
        *next.team_mut(number) = remaining;

        let outcome = if next.player_count() == 0 {
            store
                .delete_match(match_id, entity.revision, vec![MembershipChange::clear(user_id)])
                .await
        } else {
            store
                .update_match(next, vec![MembershipChange::clear(user_id)])
                .await
        };

        match outcome {
            Ok(()) => {
                info!(%match_id, %user_id, "player left");
                return Ok(());
            }
            Err(StorageError::WriteConflict { .. }) if attempt < retry_limit => {
                sleep(jittered_backoff(state.config().backoff_base(), attempt)).await;
                entity = store
                    .find_match(match_id)
                    .await?
                    .ok_or(ServiceError::MatchNotFound(match_id))?;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict)
}

/// Cancel a waiting match. A sole member deletes it outright (it never left
/// matching and lost its last player); with teammates still queued the match
/// transitions to `cancelled`, is kept for history, and everyone's
/// active-match pointer is cleared.
pub async fn cancel_match(
    state: &SharedState,
    match_id: Uuid,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_match_store().await?;
    let retry_limit = state.config().conflict_retry_limit();

    let mut entity = store
        .find_match(match_id)
        .await?
        .ok_or(ServiceError::MatchNotFound(match_id))?;

    for attempt in 0..=retry_limit {
        if entity.status != MatchStatus::Matching {
            return Err(ServiceError::MatchInProgress);
        }
        entity
            .member_team(user_id)
            .ok_or(ServiceError::MemberNotFound)?;

        let outcome = if entity.player_count() == 1 {
            store
                .delete_match(match_id, entity.revision, vec![MembershipChange::clear(user_id)])
                .await
        } else {
            let status = crate::state::lifecycle::next_status(
                entity.status,
                crate::state::lifecycle::LifecycleEvent::Cancelled,
            )?;
            let memberships: Vec<MembershipChange> =
                entity.members().map(MembershipChange::clear).collect();
            let mut next = entity.clone();
            next.status = status;
            next.ended_at = Some(SystemTime::now());
            store.update_match(next, memberships).await
        };

        match outcome {
            Ok(()) => {
                info!(%match_id, %user_id, "match cancelled");
                return Ok(());
            }
            Err(StorageError::WriteConflict { .. }) if attempt < retry_limit => {
                sleep(jittered_backoff(state.config().backoff_base(), attempt)).await;
                entity = store
                    .find_match(match_id)
                    .await?
                    .ok_or(ServiceError::MatchNotFound(match_id))?;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict)
}

/// Match the user is currently part of, reconciled against the authoritative
/// match document rather than trusted from the index alone. Stale pointers
/// (finished matches, failed saga tails) are repaired on the spot.
pub async fn check_user_active_match(
    state: &SharedState,
    user_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let store = state.require_match_store().await?;

    let Some(match_id) = store.membership(user_id).await? else {
        return Ok(None);
    };

    match store.find_match(match_id).await? {
        Some(entity) if entity.status.is_active() && entity.member_team(user_id).is_some() => {
            Ok(Some(match_id))
        }
        _ => {
            debug!(%user_id, %match_id, "clearing stale active-match pointer");
            store.write_membership(user_id, None).await?;
            Ok(None)
        }
    }
}

/// Full state of one match plus its discovery log, for the detail view.
pub async fn match_detail(
    state: &SharedState,
    match_id: Uuid,
) -> Result<(MatchEntity, Vec<DiscoveryEntity>), ServiceError> {
    let store = state.require_match_store().await?;
    let entity = store
        .find_match(match_id)
        .await?
        .ok_or(ServiceError::MatchNotFound(match_id))?;
    let discoveries = store.list_discoveries(match_id).await?;
    Ok((entity, discoveries))
}

/// Every match the user appeared in, newest first, terminal ones included.
pub async fn match_history(
    state: &SharedState,
    user_id: Uuid,
) -> Result<Vec<MatchEntity>, ServiceError> {
    let store = state.require_match_store().await?;
    Ok(store.user_matches(user_id).await?)
}

/// Reject callers that already belong to an active match.
async fn ensure_not_queued(state: &SharedState, user_id: Uuid) -> Result<(), ServiceError> {
    if let Some(active) = check_user_active_match(state, user_id).await? {
        return Err(ServiceError::AlreadyInMatch(active));
    }
    Ok(())
}

/// One slot claim against the entity as read: pick the team, apply the
/// ledger, write conditionally, and re-read on conflict until the retry
/// budget runs out. Exhaustion surfaces as `CapacityExceeded` so the caller
/// can fall back to an alternate match.
async fn try_claim_slot(
    state: &SharedState,
    store: &Arc<dyn MatchStore>,
    mut entity: MatchEntity,
    user_id: Uuid,
) -> Result<MatchEntity, ServiceError> {
    let retry_limit = state.config().conflict_retry_limit();

    for attempt in 0..=retry_limit {
        if entity.status != MatchStatus::Matching {
            return Err(ServiceError::CapacityExceeded);
        }
        let number =
            capacity::pick_team_to_join(&entity).ok_or(ServiceError::CapacityExceeded)?;
        let claimed = capacity::apply_join(entity.team(number), user_id)
            .map_err(|_| ServiceError::CapacityExceeded)?;

        let mut next = entity.clone();
        *next.team_mut(number) = claimed;

        match store
            .update_match(next.clone(), vec![MembershipChange::set(user_id, entity.id)])
            .await
        {
            Ok(()) => {
                // Mirror the revision bump the store performed.
                next.revision += 1;
                return Ok(next);
            }
            Err(StorageError::WriteConflict { .. }) if attempt < retry_limit => {
                sleep(jittered_backoff(state.config().backoff_base(), attempt)).await;
                match store.find_match(entity.id).await? {
                    Some(fresh) => entity = fresh,
                    // Deleted under us; the caller treats it like a full match.
                    None => return Err(ServiceError::CapacityExceeded),
                }
            }
            Err(StorageError::MatchMissing { .. }) => return Err(ServiceError::CapacityExceeded),
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::CapacityExceeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::models::TeamNumber, state::memory_state};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.set_backoff_base(Duration::from_millis(1));
        config
    }

    #[tokio::test]
    async fn scenario_fill_a_2v2_until_it_starts() {
        let state = memory_state(test_config()).await;
        let store = state.require_match_store().await.unwrap();
        let (u1, u2, u3, u4) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let created = create_match(&state, "2v2", u1).await.unwrap();
        assert_eq!(created.status, MatchStatus::Matching);
        assert_eq!(created.team1.current_players, 1);
        assert_eq!(created.team2.current_players, 0);
        assert_eq!(store.membership(u1).await.unwrap(), Some(created.id));

        join_match(&state, created.id, u2).await.unwrap();
        join_match(&state, created.id, u3).await.unwrap();
        let after_three = store.find_match(created.id).await.unwrap().unwrap();
        assert!(after_three.team1.is_full());
        assert_eq!(after_three.status, MatchStatus::Matching);

        let full = join_match(&state, created.id, u4).await.unwrap();
        assert_eq!(full.status, MatchStatus::Playing);
        assert!(full.started_at.is_some());
        assert!(full.team1.is_consistent() && full.team2.is_consistent());
    }

    #[tokio::test]
    async fn scenario_last_slot_race_has_one_winner() {
        let state = memory_state(test_config()).await;
        let store = state.require_match_store().await.unwrap();
        let creator = Uuid::new_v4();
        let created = create_match(&state, "1v1", creator).await.unwrap();

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (res_a, res_b) = tokio::join!(
            join_match(&state, created.id, a),
            join_match(&state, created.id, b),
        );

        let winners = [&res_a, &res_b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one racer claims the last slot");

        let loser = if res_a.is_ok() { res_b } else { res_a };
        assert!(matches!(loser.unwrap_err(), ServiceError::NoMatchAvailable));

        let settled = store.find_match(created.id).await.unwrap().unwrap();
        assert_eq!(settled.team2.current_players, 1);
        assert!(settled.team2.is_consistent());
        assert_eq!(settled.status, MatchStatus::Playing);
    }

    #[tokio::test]
    async fn race_loser_falls_back_to_an_alternate_match() {
        let state = memory_state(test_config()).await;
        let first = create_match(&state, "1v1", Uuid::new_v4()).await.unwrap();
        let _second = create_match(&state, "1v1", Uuid::new_v4()).await.unwrap();

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (res_a, res_b) = tokio::join!(
            join_match(&state, first.id, a),
            join_match(&state, first.id, b),
        );

        let (joined_a, joined_b) = (res_a.unwrap(), res_b.unwrap());
        assert_ne!(joined_a.id, joined_b.id, "the loser moved to the alternate");
        assert_eq!(joined_a.status, MatchStatus::Playing);
        assert_eq!(joined_b.status, MatchStatus::Playing);
    }

    #[tokio::test]
    async fn scenario_sole_creator_leaving_deletes_the_match() {
        let state = memory_state(test_config()).await;
        let store = state.require_match_store().await.unwrap();
        let user = Uuid::new_v4();

        let created = create_match(&state, "2v2", user).await.unwrap();
        leave_match(&state, created.id, user).await.unwrap();

        assert!(store.find_match(created.id).await.unwrap().is_none());
        assert_eq!(store.membership(user).await.unwrap(), None);
        assert_eq!(check_user_active_match(&state, user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn a_user_cannot_queue_twice() {
        let state = memory_state(test_config()).await;
        let user = Uuid::new_v4();
        let created = create_match(&state, "2v2", user).await.unwrap();

        let err = create_match(&state, "2v2", user).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyInMatch(id) if id == created.id));

        let other = create_match(&state, "2v2", Uuid::new_v4()).await.unwrap();
        let err = join_match(&state, other.id, user).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyInMatch(_)));
    }

    #[tokio::test]
    async fn leaving_a_playing_match_is_rejected() {
        let state = memory_state(test_config()).await;
        let u1 = Uuid::new_v4();
        let created = create_match(&state, "1v1", u1).await.unwrap();
        let playing = join_match(&state, created.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(playing.status, MatchStatus::Playing);

        let err = leave_match(&state, created.id, u1).await.unwrap_err();
        assert!(matches!(err, ServiceError::MatchInProgress));
    }

    #[tokio::test]
    async fn leaving_a_match_you_are_not_in_is_rejected() {
        let state = memory_state(test_config()).await;
        let created = create_match(&state, "2v2", Uuid::new_v4()).await.unwrap();

        let err = leave_match(&state, created.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::MemberNotFound));

        let err = leave_match(&state, Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::MatchNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_with_teammates_keeps_history_and_clears_pointers() {
        let state = memory_state(test_config()).await;
        let store = state.require_match_store().await.unwrap();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

        let created = create_match(&state, "2v2", u1).await.unwrap();
        join_match(&state, created.id, u2).await.unwrap();

        cancel_match(&state, created.id, u1).await.unwrap();

        let cancelled = store.find_match(created.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, MatchStatus::Cancelled);
        assert!(cancelled.ended_at.is_some());
        // Members stay on the teams for history, but nobody is queued anymore.
        assert_eq!(cancelled.player_count(), 2);
        assert_eq!(store.membership(u1).await.unwrap(), None);
        assert_eq!(store.membership(u2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_joinable_hides_full_matches() {
        let state = memory_state(test_config()).await;
        let open = create_match(&state, "1v1", Uuid::new_v4()).await.unwrap();

        // A full-but-still-matching match can show up in a stale index read;
        // simulate one directly in the store.
        let store = state.require_match_store().await.unwrap();
        let mut stale = MatchEntity::new("1v1".into(), 1, SystemTime::now());
        for number in TeamNumber::ALL {
            let team = stale.team_mut(number);
            team.players.insert(Uuid::new_v4(), 0);
            team.current_players = 1;
        }
        store.insert_match(stale).await.unwrap();

        let joinable = find_joinable(&state, "1v1").await.unwrap();
        assert_eq!(joinable.len(), 1);
        assert_eq!(joinable[0].id, open.id);
    }

    #[tokio::test]
    async fn reconnect_probe_repairs_a_stale_pointer() {
        let state = memory_state(test_config()).await;
        let store = state.require_match_store().await.unwrap();
        let user = Uuid::new_v4();

        // Pointer at a match that no longer exists (failed saga tail).
        store.write_membership(user, Some(Uuid::new_v4())).await.unwrap();
        assert_eq!(check_user_active_match(&state, user).await.unwrap(), None);
        assert_eq!(store.membership(user).await.unwrap(), None);

        // Pointer at a live match round-trips.
        let created = create_match(&state, "2v2", user).await.unwrap();
        assert_eq!(
            check_user_active_match(&state, user).await.unwrap(),
            Some(created.id)
        );
    }

    #[tokio::test]
    async fn create_match_rejects_unknown_type_labels() {
        let state = memory_state(test_config()).await;
        for label in ["2v3", "duel", "0v0", "10v10"] {
            let err = create_match(&state, label, Uuid::new_v4()).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)), "{label}");
        }
    }
}
