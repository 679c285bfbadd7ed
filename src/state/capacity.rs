//! Capacity ledger: pure functions over team state, no I/O.
//!
//! Every capacity-affecting mutation in the service layer re-reads the match
//! and runs through these functions immediately before a conditional write;
//! a cached `can_join` answer is never trusted across an await point.

use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{MatchEntity, TeamEntity, TeamNumber};

/// Typed failures raised by ledger mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityError {
    /// The team is full, or the user is already on it.
    #[error("team has no open slot for this player")]
    CapacityExceeded,
    /// Leave targeted a user that is not on the team.
    #[error("player is not a member of this team")]
    MemberNotFound,
}

/// True iff the team has a spare slot and the user is not already on it.
pub fn can_join(team: &TeamEntity, user_id: Uuid) -> bool {
    team.current_players < team.max_players && !team.players.contains_key(&user_id)
}

/// First team (by team number) with spare capacity; `None` when both are
/// full. Team 1 always fills before team 2 so placement is deterministic.
pub fn pick_team_to_join(entity: &MatchEntity) -> Option<TeamNumber> {
    TeamNumber::ALL
        .into_iter()
        .find(|number| !entity.team(*number).is_full())
}

/// New team state with the player added and the member count incremented.
pub fn apply_join(team: &TeamEntity, user_id: Uuid) -> Result<TeamEntity, CapacityError> {
    if !can_join(team, user_id) {
        return Err(CapacityError::CapacityExceeded);
    }

    let mut next = team.clone();
    next.players.insert(user_id, 0);
    next.current_players += 1;
    Ok(next)
}

/// New team state with the player removed and the member count decremented.
pub fn apply_leave(team: &TeamEntity, user_id: Uuid) -> Result<TeamEntity, CapacityError> {
    let mut next = team.clone();
    if next.players.shift_remove(&user_id).is_none() {
        return Err(CapacityError::MemberNotFound);
    }
    next.current_players -= 1;
    Ok(next)
}

/// Both teams at capacity; the trigger condition for the playing transition.
pub fn is_match_full(entity: &MatchEntity) -> bool {
    entity.team1.is_full() && entity.team2.is_full()
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn match_2v2() -> MatchEntity {
        MatchEntity::new("2v2".into(), 2, SystemTime::now())
    }

    fn join(entity: &mut MatchEntity, number: TeamNumber, user: Uuid) {
        *entity.team_mut(number) = apply_join(entity.team(number), user).unwrap();
    }

    #[test]
    fn can_join_rejects_full_team_and_existing_member() {
        let mut entity = match_2v2();
        let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(can_join(&entity.team1, u1));
        join(&mut entity, TeamNumber::One, u1);
        assert!(!can_join(&entity.team1, u1), "joining twice is not allowed");

        join(&mut entity, TeamNumber::One, u2);
        assert!(!can_join(&entity.team1, u3), "team is at capacity");
    }

    #[test]
    fn pick_team_fills_team_one_first() {
        let mut entity = match_2v2();
        assert_eq!(pick_team_to_join(&entity), Some(TeamNumber::One));

        join(&mut entity, TeamNumber::One, Uuid::new_v4());
        assert_eq!(pick_team_to_join(&entity), Some(TeamNumber::One));

        join(&mut entity, TeamNumber::One, Uuid::new_v4());
        assert_eq!(pick_team_to_join(&entity), Some(TeamNumber::Two));

        join(&mut entity, TeamNumber::Two, Uuid::new_v4());
        join(&mut entity, TeamNumber::Two, Uuid::new_v4());
        assert_eq!(pick_team_to_join(&entity), None);
        assert!(is_match_full(&entity));
    }

    #[test]
    fn apply_join_keeps_count_and_members_in_lockstep() {
        let entity = match_2v2();
        let user = Uuid::new_v4();
        let team = apply_join(&entity.team1, user).unwrap();

        assert_eq!(team.current_players, 1);
        assert!(team.players.contains_key(&user));
        assert!(team.is_consistent());
        // The input team is untouched.
        assert_eq!(entity.team1.current_players, 0);
    }

    #[test]
    fn apply_join_on_full_team_is_capacity_exceeded() {
        let mut entity = match_2v2();
        join(&mut entity, TeamNumber::One, Uuid::new_v4());
        join(&mut entity, TeamNumber::One, Uuid::new_v4());

        let err = apply_join(&entity.team1, Uuid::new_v4()).unwrap_err();
        assert_eq!(err, CapacityError::CapacityExceeded);
    }

    #[test]
    fn apply_leave_removes_member_or_fails() {
        let mut entity = match_2v2();
        let user = Uuid::new_v4();
        join(&mut entity, TeamNumber::One, user);

        let err = apply_leave(&entity.team1, Uuid::new_v4()).unwrap_err();
        assert_eq!(err, CapacityError::MemberNotFound);

        let team = apply_leave(&entity.team1, user).unwrap();
        assert_eq!(team.current_players, 0);
        assert!(team.is_consistent());
    }
}
