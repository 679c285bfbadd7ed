use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a match document.
///
/// Transitions are validated by [`crate::state::lifecycle`]; `Finished` and
/// `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Waiting for both teams to fill up.
    Matching,
    /// Both teams full, scores accumulating until the timer or settlement.
    Playing,
    /// Terminal: winner determined, scores frozen.
    Finished,
    /// Terminal: abandoned before play started; retained for history.
    Cancelled,
}

impl MatchStatus {
    /// A user may belong to at most one match in an active status.
    pub fn is_active(self) -> bool {
        matches!(self, MatchStatus::Matching | MatchStatus::Playing)
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Finished | MatchStatus::Cancelled)
    }
}

/// Identifies one of the two team slots of a match.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum TeamNumber {
    /// First team; fills first and wins score ties.
    One,
    /// Second team.
    Two,
}

impl TeamNumber {
    /// Both slots in fill order.
    pub const ALL: [TeamNumber; 2] = [TeamNumber::One, TeamNumber::Two];
}

impl From<TeamNumber> for u8 {
    fn from(value: TeamNumber) -> Self {
        match value {
            TeamNumber::One => 1,
            TeamNumber::Two => 2,
        }
    }
}

impl TryFrom<u8> for TeamNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TeamNumber::One),
            2 => Ok(TeamNumber::Two),
            other => Err(format!("team number must be 1 or 2, got {other}")),
        }
    }
}

impl std::fmt::Display for TeamNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "team{}", u8::from(*self))
    }
}

/// Team slot persisted inside a match document and shared across layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamEntity {
    /// Which of the two slots this is.
    pub number: TeamNumber,
    /// Capacity derived from the match type at creation time.
    pub max_players: u32,
    /// Stored member count; must always equal `players.len()`.
    pub current_players: u32,
    /// Member id mapped to the individual score accumulated from discoveries.
    pub players: IndexMap<Uuid, i64>,
    /// Aggregate team score; non-decreasing while the match is playing.
    pub score: i64,
}

impl TeamEntity {
    /// Empty slot with the given capacity.
    pub fn empty(number: TeamNumber, max_players: u32) -> Self {
        Self {
            number,
            max_players,
            current_players: 0,
            players: IndexMap::new(),
            score: 0,
        }
    }

    /// True when no further player fits.
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    /// Structural invariant: the stored count mirrors the member map and
    /// never exceeds the capacity.
    pub fn is_consistent(&self) -> bool {
        self.current_players as usize == self.players.len()
            && self.current_players <= self.max_players
    }
}

/// Aggregate match document persisted by the storage layer.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchEntity {
    /// Primary key of the match.
    pub id: Uuid,
    /// Team-size descriptor, e.g. `"2v2"`.
    pub match_type: String,
    /// Current lifecycle status.
    pub status: MatchStatus,
    /// Creation timestamp (epoch milliseconds in the document layout).
    #[serde_as(as = "TimestampMilliSeconds")]
    pub created_at: SystemTime,
    /// Set exactly once when the match transitions to playing.
    #[serde_as(as = "Option<TimestampMilliSeconds>")]
    #[serde(default)]
    pub started_at: Option<SystemTime>,
    /// Set when the match reaches a terminal status.
    #[serde_as(as = "Option<TimestampMilliSeconds>")]
    #[serde(default)]
    pub ended_at: Option<SystemTime>,
    /// Winning team, present iff status is finished.
    #[serde(default)]
    pub winning_team: Option<TeamNumber>,
    /// First team slot.
    pub team1: TeamEntity,
    /// Second team slot.
    pub team2: TeamEntity,
    /// Monotonic revision used for conditional writes; bumped by the store on
    /// every successful update.
    pub revision: u64,
}

impl MatchEntity {
    /// Fresh match in `matching` status with two empty teams of `per_side` capacity.
    pub fn new(match_type: String, per_side: u32, created_at: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            match_type,
            status: MatchStatus::Matching,
            created_at,
            started_at: None,
            ended_at: None,
            winning_team: None,
            team1: TeamEntity::empty(TeamNumber::One, per_side),
            team2: TeamEntity::empty(TeamNumber::Two, per_side),
            revision: 0,
        }
    }

    /// Borrow the slot for the given team number.
    pub fn team(&self, number: TeamNumber) -> &TeamEntity {
        match number {
            TeamNumber::One => &self.team1,
            TeamNumber::Two => &self.team2,
        }
    }

    /// Mutably borrow the slot for the given team number.
    pub fn team_mut(&mut self, number: TeamNumber) -> &mut TeamEntity {
        match number {
            TeamNumber::One => &mut self.team1,
            TeamNumber::Two => &mut self.team2,
        }
    }

    /// Both slots in fill order.
    pub fn teams(&self) -> [&TeamEntity; 2] {
        [&self.team1, &self.team2]
    }

    /// Total member count across both teams.
    pub fn player_count(&self) -> u32 {
        self.team1.current_players + self.team2.current_players
    }

    /// Every member id across both teams.
    pub fn members(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.team1.players.keys().chain(self.team2.players.keys()).copied()
    }

    /// Which team the user belongs to, if any.
    pub fn member_team(&self, user_id: Uuid) -> Option<TeamNumber> {
        if self.team1.players.contains_key(&user_id) {
            Some(TeamNumber::One)
        } else if self.team2.players.contains_key(&user_id) {
            Some(TeamNumber::Two)
        } else {
            None
        }
    }
}

/// Append-only record of a player scoring a find during a playing match.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryEntity {
    /// Generated identifier of the event.
    pub id: Uuid,
    /// Match the discovery was scored in.
    pub match_id: Uuid,
    /// Team credited with the points.
    pub team: TeamNumber,
    /// Player who completed the find.
    pub user_id: Uuid,
    /// Opaque reference to the treasure that was found.
    pub treasure_ref: String,
    /// Points awarded to the team and the player.
    pub points: i64,
    /// When the find happened.
    #[serde_as(as = "TimestampMilliSeconds")]
    pub occurred_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_number_round_trips_through_u8() {
        for number in TeamNumber::ALL {
            let raw: u8 = number.into();
            assert_eq!(TeamNumber::try_from(raw).unwrap(), number);
        }
        assert!(TeamNumber::try_from(0).is_err());
        assert!(TeamNumber::try_from(3).is_err());
    }

    #[test]
    fn new_match_is_empty_and_matching() {
        let entity = MatchEntity::new("2v2".into(), 2, SystemTime::now());
        assert_eq!(entity.status, MatchStatus::Matching);
        assert_eq!(entity.player_count(), 0);
        assert!(entity.team1.is_consistent());
        assert!(entity.team2.is_consistent());
        assert!(entity.started_at.is_none());
        assert!(entity.winning_team.is_none());
    }

    #[test]
    fn member_team_finds_the_owning_slot() {
        let mut entity = MatchEntity::new("2v2".into(), 2, SystemTime::now());
        let user = Uuid::new_v4();
        entity.team2.players.insert(user, 0);
        entity.team2.current_players = 1;
        assert_eq!(entity.member_team(user), Some(TeamNumber::Two));
        assert_eq!(entity.member_team(Uuid::new_v4()), None);
    }
}
