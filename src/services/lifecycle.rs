//! Lifecycle controller: drives matches through the status machine.
//!
//! The `matching -> playing` trigger can fire from several places at once
//! (the joining request, the change-feed listener, a replayed notification);
//! the store's conditional write guarantees exactly one of them lands, so
//! exactly one auto-end timer is scheduled. The timer itself is only an
//! optimisation; the reconciliation sweep finishes overdue matches whose
//! timer was lost with its process.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        match_store::{MatchStore, MembershipChange, StoreChange},
        models::{MatchEntity, MatchStatus, TeamNumber},
        storage::StorageError,
    },
    error::ServiceError,
    services::scoring,
    state::{SharedState, capacity, lifecycle},
};

/// Why a playing match is being finished.
#[derive(Debug, Clone, Copy)]
pub enum FinishCause {
    /// The configured playing duration elapsed (timer or sweep).
    Expired,
    /// Explicit settlement call.
    Settled {
        /// Administrative winner correction, logged when present.
        winner_override: Option<TeamNumber>,
    },
}

impl FinishCause {
    fn event(self) -> lifecycle::LifecycleEvent {
        match self {
            FinishCause::Expired => lifecycle::LifecycleEvent::Expired,
            FinishCause::Settled { .. } => lifecycle::LifecycleEvent::Settled,
        }
    }
}

/// Start the match if both teams are full; safe to call from any observer.
///
/// Returns without error when there is nothing to do: the match is gone,
/// not full yet, or already past matching (a duplicate fire).
pub async fn try_start(
    state: &SharedState,
    store: &Arc<dyn MatchStore>,
    match_id: Uuid,
) -> Result<(), ServiceError> {
    let retry_limit = state.config().conflict_retry_limit();

    for _ in 0..=retry_limit {
        let Some(entity) = store.find_match(match_id).await? else {
            return Ok(());
        };
        if entity.status != MatchStatus::Matching || !capacity::is_match_full(&entity) {
            return Ok(());
        }

        let status = lifecycle::next_status(entity.status, lifecycle::LifecycleEvent::TeamsFilled)?;
        let mut next = entity;
        next.status = status;
        next.started_at = Some(SystemTime::now());

        match store.update_match(next.clone(), Vec::new()).await {
            Ok(()) => {
                let duration = state.config().match_duration(&next.match_type);
                info!(%match_id, match_type = %next.match_type, ?duration, "match started");
                spawn_auto_end(state.clone(), match_id, duration);
                return Ok(());
            }
            // Another observer may have started it; re-read and re-check.
            Err(StorageError::WriteConflict { .. }) => continue,
            Err(StorageError::MatchMissing { .. }) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }

    // Persistent conflicts mean someone else is making progress; the
    // change-feed listener or the sweep will pick the match up again.
    debug!(%match_id, "start attempt kept losing races; leaving it to the next trigger");
    Ok(())
}

/// Schedule the auto-end timer for a freshly started match.
pub fn spawn_auto_end(state: SharedState, match_id: Uuid, duration: Duration) {
    tokio::spawn(async move {
        sleep(duration).await;
        match finish_match(&state, match_id, FinishCause::Expired).await {
            Ok(_) => info!(%match_id, "match auto-ended after its duration elapsed"),
            // Settled or cancelled before the timer fired.
            Err(ServiceError::MatchNotPlaying) | Err(ServiceError::MatchNotFound(_)) => {
                debug!(%match_id, "auto-end timer found nothing to finish")
            }
            Err(err) => warn!(%match_id, error = %err, "auto-end failed; sweep will retry"),
        }
    });
}

/// Transition a playing match to finished, persist the winner, freeze scores,
/// and clear every member's active-match pointer.
pub async fn finish_match(
    state: &SharedState,
    match_id: Uuid,
    cause: FinishCause,
) -> Result<MatchEntity, ServiceError> {
    let store = state.require_match_store().await?;
    let retry_limit = state.config().conflict_retry_limit();

    for attempt in 0..=retry_limit {
        let entity = store
            .find_match(match_id)
            .await?
            .ok_or(ServiceError::MatchNotFound(match_id))?;

        if entity.status != MatchStatus::Playing {
            return Err(ServiceError::MatchNotPlaying);
        }

        let status = lifecycle::next_status(entity.status, cause.event())?;
        let winner = match cause {
            FinishCause::Settled {
                winner_override: Some(overridden),
            } => {
                warn!(%match_id, winner = %overridden, "administrative winner override applied");
                overridden
            }
            _ => scoring::winner(&entity),
        };

        let memberships: Vec<MembershipChange> =
            entity.members().map(MembershipChange::clear).collect();

        let mut next = entity;
        next.status = status;
        next.ended_at = Some(SystemTime::now());
        next.winning_team = Some(winner);

        match store.update_match(next.clone(), memberships).await {
            Ok(()) => {
                next.revision += 1;
                info!(%match_id, winner = %winner, "match finished");
                return Ok(next);
            }
            Err(StorageError::WriteConflict { .. }) if attempt < retry_limit => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict)
}

/// Seconds of play left; `None` unless the match is currently playing.
pub fn remaining_time(
    config: &AppConfig,
    entity: &MatchEntity,
    now: SystemTime,
) -> Option<Duration> {
    if entity.status != MatchStatus::Playing {
        return None;
    }
    let started_at = entity.started_at?;
    let duration = config.match_duration(&entity.match_type);
    let elapsed = now.duration_since(started_at).unwrap_or_default();
    Some(duration.saturating_sub(elapsed))
}

/// React to store change events: any write that leaves a match full while
/// still matching triggers the playing transition, independent of which
/// request caused the write.
pub async fn run_listener(state: SharedState) {
    let mut degraded = state.degraded_watcher();

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
                Ok(StoreChange::MatchWritten(entity))
                    if entity.status == MatchStatus::Matching
                        && capacity::is_match_full(&entity) =>
                {
                    if let Err(err) = try_start(&state, &store, entity.id).await {
                        warn!(match_id = %entity.id, error = %err, "change-fed start failed");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // At-least-once is fine: the sweep backstops anything missed.
                    debug!(skipped, "lifecycle listener lagged behind the change feed");
                }
                Err(RecvError::Closed) => break,
            }
        }

        // The store was replaced or dropped; wait before resubscribing.
        sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{config::AppConfig, dao::models::TeamNumber, state::memory_state};

    async fn full_2v2(state: &SharedState) -> Uuid {
        let store = state.require_match_store().await.unwrap();
        let mut entity = MatchEntity::new("2v2".into(), 2, SystemTime::now());
        for number in TeamNumber::ALL {
            for _ in 0..2 {
                let team = entity.team_mut(number);
                team.players.insert(Uuid::new_v4(), 0);
                team.current_players += 1;
            }
        }
        let id = entity.id;
        store.insert_match(entity).await.unwrap();
        id
    }

    #[tokio::test]
    async fn try_start_moves_a_full_match_to_playing() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();
        let id = full_2v2(&state).await;

        try_start(&state, &store, id).await.unwrap();

        let started = store.find_match(id).await.unwrap().unwrap();
        assert_eq!(started.status, MatchStatus::Playing);
        assert!(started.started_at.is_some());
    }

    #[tokio::test]
    async fn try_start_is_idempotent() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();
        let id = full_2v2(&state).await;

        try_start(&state, &store, id).await.unwrap();
        let first = store.find_match(id).await.unwrap().unwrap();

        // A second observer concluding "now full" must not double-write.
        try_start(&state, &store, id).await.unwrap();
        let second = store.find_match(id).await.unwrap().unwrap();

        assert_eq!(first.started_at, second.started_at);
        assert_eq!(first.revision, second.revision);
    }

    #[tokio::test]
    async fn try_start_ignores_partial_matches() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();
        let entity = MatchEntity::new("2v2".into(), 2, SystemTime::now());
        let id = entity.id;
        store.insert_match(entity).await.unwrap();

        try_start(&state, &store, id).await.unwrap();
        let unchanged = store.find_match(id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, MatchStatus::Matching);
        assert!(unchanged.started_at.is_none());
    }

    #[tokio::test]
    async fn finish_clears_memberships_and_sets_winner() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();
        let id = full_2v2(&state).await;
        try_start(&state, &store, id).await.unwrap();

        let playing = store.find_match(id).await.unwrap().unwrap();
        let member = playing.members().next().unwrap();
        store.write_membership(member, Some(id)).await.unwrap();

        let finished = finish_match(&state, id, FinishCause::Expired).await.unwrap();
        assert_eq!(finished.status, MatchStatus::Finished);
        assert!(finished.ended_at.is_some());
        // Scores are level, so team 1 takes the tie.
        assert_eq!(finished.winning_team, Some(TeamNumber::One));
        assert_eq!(store.membership(member).await.unwrap(), None);
    }

    #[tokio::test]
    async fn finish_rejects_non_playing_matches() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();
        let id = full_2v2(&state).await;

        let err = finish_match(&state, id, FinishCause::Expired).await.unwrap_err();
        assert!(matches!(err, ServiceError::MatchNotPlaying));

        try_start(&state, &store, id).await.unwrap();
        finish_match(&state, id, FinishCause::Expired).await.unwrap();

        // Settling twice surfaces the illegal timing.
        let err = finish_match(
            &state,
            id,
            FinishCause::Settled {
                winner_override: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::MatchNotPlaying));
    }

    #[test]
    fn remaining_time_is_derived_not_stored() {
        let config = AppConfig::default();
        let now = SystemTime::now();
        let mut entity = MatchEntity::new("2v2".into(), 2, now);

        assert_eq!(remaining_time(&config, &entity, now), None);

        entity.status = MatchStatus::Playing;
        entity.started_at = Some(now);
        let left = remaining_time(&config, &entity, now + Duration::from_secs(600)).unwrap();
        assert_eq!(left, Duration::from_secs(3000));

        // Past the duration the projection clamps at zero.
        let left = remaining_time(&config, &entity, now + Duration::from_secs(7200)).unwrap();
        assert_eq!(left, Duration::ZERO);
    }
}
