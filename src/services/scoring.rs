//! Score aggregation and settlement.
//!
//! Discovery events are append-only and never mutated; only the derived
//! aggregates (team score, member score) ride the optimistic-retry write.
//! An event that lands just as the match finishes stays in the log but no
//! longer moves the frozen aggregates.

use std::time::SystemTime;

use tokio::time::sleep;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        models::{DiscoveryEntity, MatchEntity, MatchStatus, TeamNumber},
        storage::StorageError,
    },
    error::ServiceError,
    services::{lifecycle, matchmaking::jittered_backoff},
    state::SharedState,
};

/// Deterministic winner: strictly higher aggregate score, ties to team 1.
pub fn winner(entity: &MatchEntity) -> TeamNumber {
    if entity.team2.score > entity.team1.score {
        TeamNumber::Two
    } else {
        TeamNumber::One
    }
}

/// Append a discovery event and credit its points to the team aggregate and
/// the member's individual score.
pub async fn record_discovery(
    state: &SharedState,
    match_id: Uuid,
    team: TeamNumber,
    user_id: Uuid,
    treasure_ref: String,
    points: i64,
) -> Result<DiscoveryEntity, ServiceError> {
    let store = state.require_match_store().await?;
    let retry_limit = state.config().conflict_retry_limit();

    let entity = store
        .find_match(match_id)
        .await?
        .ok_or(ServiceError::MatchNotFound(match_id))?;
    if entity.status != MatchStatus::Playing {
        return Err(ServiceError::MatchNotPlaying);
    }
    if !entity.team(team).players.contains_key(&user_id) {
        return Err(ServiceError::MemberNotFound);
    }

    // The immutable event is written exactly once, before the aggregate
    // update loop, so a lost write race can never duplicate it.
    let event = DiscoveryEntity {
        id: Uuid::new_v4(),
        match_id,
        team,
        user_id,
        treasure_ref,
        points,
        occurred_at: SystemTime::now(),
    };
    store.append_discovery(event.clone()).await?;

    let mut entity = entity;
    for attempt in 0..=retry_limit {
        if entity.status != MatchStatus::Playing {
            // Finished while we were racing; the event stands in the log but
            // the aggregates are frozen.
            return Err(ServiceError::MatchNotPlaying);
        }

        let mut next = entity.clone();
        {
            let slot = next.team_mut(team);
            slot.score += points;
            if let Some(individual) = slot.players.get_mut(&user_id) {
                *individual += points;
            }
        }

        match store.update_match(next, Vec::new()).await {
            Ok(()) => {
                info!(%match_id, %user_id, team = %team, points, "discovery recorded");
                return Ok(event);
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

/// Finish the match and persist the winner; `winner_override` exists for
/// administrative correction and is logged by the lifecycle controller.
pub async fn settle(
    state: &SharedState,
    match_id: Uuid,
    winner_override: Option<TeamNumber>,
) -> Result<MatchEntity, ServiceError> {
    lifecycle::finish_match(
        state,
        match_id,
        lifecycle::FinishCause::Settled { winner_override },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::memory_state};

    fn scored_match(team1_score: i64, team2_score: i64) -> MatchEntity {
        let mut entity = MatchEntity::new("2v2".into(), 2, SystemTime::now());
        entity.team1.score = team1_score;
        entity.team2.score = team2_score;
        entity
    }

    #[test]
    fn winner_takes_strictly_higher_score() {
        assert_eq!(winner(&scored_match(120, 95)), TeamNumber::One);
        assert_eq!(winner(&scored_match(40, 41)), TeamNumber::Two);
    }

    #[test]
    fn winner_resolves_ties_to_team_one() {
        assert_eq!(winner(&scored_match(0, 0)), TeamNumber::One);
        assert_eq!(winner(&scored_match(77, 77)), TeamNumber::One);
    }

    #[test]
    fn winner_is_deterministic_across_reruns() {
        let entity = scored_match(120, 95);
        let first = winner(&entity);
        for _ in 0..10 {
            assert_eq!(winner(&entity), first);
        }
    }

    #[tokio::test]
    async fn record_discovery_updates_both_aggregates() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();

        let mut entity = MatchEntity::new("1v1".into(), 1, SystemTime::now());
        let player = Uuid::new_v4();
        entity.team1.players.insert(player, 0);
        entity.team1.current_players = 1;
        entity.status = MatchStatus::Playing;
        entity.started_at = Some(SystemTime::now());
        let id = entity.id;
        store.insert_match(entity).await.unwrap();

        record_discovery(&state, id, TeamNumber::One, player, "cache-42".into(), 30)
            .await
            .unwrap();
        record_discovery(&state, id, TeamNumber::One, player, "cache-43".into(), 12)
            .await
            .unwrap();

        let updated = store.find_match(id).await.unwrap().unwrap();
        assert_eq!(updated.team1.score, 42);
        assert_eq!(updated.team1.players[&player], 42);

        let log = store.list_discoveries(id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].treasure_ref, "cache-42");
    }

    #[tokio::test]
    async fn record_discovery_rejects_wrong_timing_and_membership() {
        let state = memory_state(AppConfig::default()).await;
        let store = state.require_match_store().await.unwrap();

        let mut entity = MatchEntity::new("1v1".into(), 1, SystemTime::now());
        let player = Uuid::new_v4();
        entity.team1.players.insert(player, 0);
        entity.team1.current_players = 1;
        let id = entity.id;
        store.insert_match(entity).await.unwrap();

        // Still matching: discoveries are not accepted yet.
        let err = record_discovery(&state, id, TeamNumber::One, player, "early".into(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MatchNotPlaying));

        let mut playing = store.find_match(id).await.unwrap().unwrap();
        playing.status = MatchStatus::Playing;
        playing.started_at = Some(SystemTime::now());
        store.update_match(playing, Vec::new()).await.unwrap();

        // A stranger cannot score for a team they are not on.
        let err = record_discovery(&state, id, TeamNumber::One, Uuid::new_v4(), "x".into(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MemberNotFound));

        // Nothing was appended along the way.
        assert!(store.list_discoveries(id).await.unwrap().is_empty());
    }
}
