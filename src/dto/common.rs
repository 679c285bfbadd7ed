use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{DiscoveryEntity, MatchEntity, MatchStatus, TeamEntity},
    dto::format_system_time,
};

/// One member of a team with the score they contributed so far.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct MemberSnapshot {
    /// Stable user identifier.
    pub user_id: Uuid,
    /// Points this member scored through discoveries.
    pub individual_score: i64,
}

/// Immutable view of a team slot.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct TeamSnapshot {
    /// Slot number (1 or 2).
    pub number: u8,
    /// Capacity of the slot.
    pub max_players: u32,
    /// Members currently on the team.
    pub current_players: u32,
    /// Aggregate team score.
    pub score: i64,
    /// Members in join order.
    pub members: Vec<MemberSnapshot>,
}

impl From<&TeamEntity> for TeamSnapshot {
    fn from(team: &TeamEntity) -> Self {
        Self {
            number: team.number.into(),
            max_players: team.max_players,
            current_players: team.current_players,
            score: team.score,
            members: team
                .players
                .iter()
                .map(|(user_id, individual_score)| MemberSnapshot {
                    user_id: *user_id,
                    individual_score: *individual_score,
                })
                .collect(),
        }
    }
}

/// Immutable view of a match served to REST and SSE consumers.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct MatchSnapshot {
    /// Match identifier.
    pub id: Uuid,
    /// Team-size descriptor, e.g. `"2v2"`.
    pub match_type: String,
    /// Current lifecycle status.
    pub status: MatchStatus,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Start of play, present once the match left matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// End of play, present once the match is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Winning slot number, present iff finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_team: Option<u8>,
    /// Both team slots in fill order.
    pub teams: Vec<TeamSnapshot>,
    /// Seconds of play left, present only while playing; derived, not stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
}

impl MatchSnapshot {
    /// Build a snapshot from the stored entity plus the derived remaining time.
    pub fn from_entity(entity: &MatchEntity, remaining: Option<Duration>) -> Self {
        Self {
            id: entity.id,
            match_type: entity.match_type.clone(),
            status: entity.status,
            created_at: format_system_time(entity.created_at),
            started_at: entity.started_at.map(format_system_time),
            ended_at: entity.ended_at.map(format_system_time),
            winning_team: entity.winning_team.map(Into::into),
            teams: entity.teams().into_iter().map(Into::into).collect(),
            remaining_seconds: (entity.status == MatchStatus::Playing)
                .then(|| remaining.unwrap_or_default().as_secs()),
        }
    }
}

/// Immutable view of a discovery event.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct DiscoverySnapshot {
    /// Event identifier.
    pub id: Uuid,
    /// Team credited with the points.
    pub team: u8,
    /// Player who completed the find.
    pub user_id: Uuid,
    /// Opaque reference to the found treasure.
    pub treasure_ref: String,
    /// Points awarded.
    pub points: i64,
    /// When the find happened (RFC 3339).
    pub occurred_at: String,
}

impl From<&DiscoveryEntity> for DiscoverySnapshot {
    fn from(event: &DiscoveryEntity) -> Self {
        Self {
            id: event.id,
            team: event.team.into(),
            user_id: event.user_id,
            treasure_ref: event.treasure_ref.clone(),
            points: event.points,
            occurred_at: format_system_time(event.occurred_at),
        }
    }
}
