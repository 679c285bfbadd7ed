//! Reconciliation sweep: the correctness backstop behind timers and sagas.
//!
//! Stateless and safe to run from any instance. Each pass reaps match shells
//! that never gained a member (a create saga whose second write failed) and
//! finishes playing matches whose auto-end timer died with its process.

use std::time::SystemTime;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::{
    dao::{models::MatchStatus, storage::StorageError},
    error::ServiceError,
    services::lifecycle::{self, FinishCause},
    state::SharedState,
};

/// What a single sweep pass repaired.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Empty matching-status shells that were deleted.
    pub orphans_reaped: usize,
    /// Overdue playing matches that were finished.
    pub overdue_finished: usize,
}

/// Run the sweep forever at the configured interval.
pub async fn run(state: SharedState) {
    let mut ticker = interval(state.config().sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match sweep_once(&state).await {
            Ok(report) if report != SweepReport::default() => {
                info!(
                    orphans = report.orphans_reaped,
                    overdue = report.overdue_finished,
                    "reconciliation sweep repaired matches"
                );
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "reconciliation sweep failed"),
        }
    }
}

/// One reconciliation pass; skipped silently while degraded.
pub async fn sweep_once(state: &SharedState) -> Result<SweepReport, ServiceError> {
    let Some(store) = state.match_store().await else {
        return Ok(SweepReport::default());
    };

    let now = SystemTime::now();
    let mut report = SweepReport::default();

    for orphan in store.query_by_status(MatchStatus::Matching).await? {
        if orphan.player_count() > 0 {
            continue;
        }
        let age = now.duration_since(orphan.created_at).unwrap_or_default();
        if age < state.config().orphan_grace() {
            continue;
        }

        match store.delete_match(orphan.id, orphan.revision, Vec::new()).await {
            Ok(()) => {
                info!(match_id = %orphan.id, "reaped orphaned match shell");
                report.orphans_reaped += 1;
            }
            // Someone touched it since we read it; leave it for the next pass.
            Err(StorageError::WriteConflict { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }

    for playing in store.query_by_status(MatchStatus::Playing).await? {
        let Some(started_at) = playing.started_at else {
            warn!(match_id = %playing.id, "playing match without a start timestamp");
            continue;
        };
        let elapsed = now.duration_since(started_at).unwrap_or_default();
        if elapsed < state.config().match_duration(&playing.match_type) {
            continue;
        }

        match lifecycle::finish_match(state, playing.id, FinishCause::Expired).await {
            Ok(_) => {
                info!(match_id = %playing.id, "finished overdue match");
                report.overdue_finished += 1;
            }
            // A timer or a concurrent sweep got there first.
            Err(ServiceError::MatchNotPlaying) | Err(ServiceError::MatchNotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::models::{MatchEntity, TeamNumber},
        services::{matchmaking, scoring},
        state::memory_state,
    };

    #[tokio::test]
    async fn reaps_only_aged_empty_shells() {
        let mut config = AppConfig::default();
        config.set_orphan_grace(Duration::ZERO);
        let state = memory_state(config).await;
        let store = state.require_match_store().await.unwrap();

        // Orphan: a shell whose creator join never landed.
        let shell = MatchEntity::new("2v2".into(), 2, SystemTime::UNIX_EPOCH);
        let shell_id = shell.id;
        store.insert_match(shell).await.unwrap();

        // Healthy waiting match with a member; must survive.
        let occupied = matchmaking::create_match(&state, "2v2", Uuid::new_v4())
            .await
            .unwrap();

        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.orphans_reaped, 1);
        assert!(store.find_match(shell_id).await.unwrap().is_none());
        assert!(store.find_match(occupied.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn grace_period_protects_fresh_shells() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();

        let shell = MatchEntity::new("2v2".into(), 2, SystemTime::now());
        let shell_id = shell.id;
        store.insert_match(shell).await.unwrap();

        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.orphans_reaped, 0);
        assert!(store.find_match(shell_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn finishes_overdue_matches_with_the_score_winner() {
        let mut config = AppConfig::default();
        config.set_default_match_duration(Duration::ZERO);
        let state = memory_state(config).await;
        let store = state.require_match_store().await.unwrap();

        // A playing 2v2 whose auto-end timer died with its process: the
        // match sits in the store with no task watching it.
        let (u1, u2, u3, u4) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut entity = MatchEntity::new("2v2".into(), 2, SystemTime::now());
        for user in [u1, u2] {
            entity.team1.players.insert(user, 0);
            entity.team1.current_players += 1;
        }
        for user in [u3, u4] {
            entity.team2.players.insert(user, 0);
            entity.team2.current_players += 1;
        }
        entity.status = MatchStatus::Playing;
        entity.started_at = Some(SystemTime::now());
        let id = entity.id;
        store.insert_match(entity).await.unwrap();
        for user in [u1, u2, u3, u4] {
            store.write_membership(user, Some(id)).await.unwrap();
        }

        // Team 1 scores 120, team 2 scores 95.
        scoring::record_discovery(&state, id, TeamNumber::One, u1, "a".into(), 70)
            .await
            .unwrap();
        scoring::record_discovery(&state, id, TeamNumber::One, u2, "b".into(), 50)
            .await
            .unwrap();
        scoring::record_discovery(&state, id, TeamNumber::Two, u3, "c".into(), 95)
            .await
            .unwrap();

        // Duration zero: the match is overdue the moment the sweep looks.
        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.overdue_finished, 1);

        let finished = store.find_match(id).await.unwrap().unwrap();
        assert_eq!(finished.status, MatchStatus::Finished);
        assert_eq!(finished.winning_team, Some(TeamNumber::One));
        assert_eq!(finished.team1.score, 120);
        assert_eq!(finished.team2.score, 95);
        // Everyone is free to queue again.
        for user in [u1, u2, u3, u4] {
            assert_eq!(store.membership(user).await.unwrap(), None);
        }

        // A second pass finds nothing left to repair.
        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
