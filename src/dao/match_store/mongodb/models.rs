use std::collections::HashMap;

use indexmap::IndexMap;
use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{DiscoveryEntity, MatchEntity, MatchStatus, TeamEntity, TeamNumber};

/// Team slot as embedded in the match document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTeamDocument {
    number: i64,
    max_players: i64,
    current_players: i64,
    /// Member ids are serialised as strings because BSON map keys must be strings.
    players: HashMap<String, i64>,
    score: i64,
}

impl From<TeamEntity> for MongoTeamDocument {
    fn from(value: TeamEntity) -> Self {
        Self {
            number: u8::from(value.number) as i64,
            max_players: value.max_players as i64,
            current_players: value.current_players as i64,
            players: value
                .players
                .into_iter()
                .map(|(id, score)| (id.to_string(), score))
                .collect(),
            score: value.score,
        }
    }
}

impl TryFrom<MongoTeamDocument> for TeamEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoTeamDocument) -> Result<Self, Self::Error> {
        let number = TeamNumber::try_from(value.number as u8)
            .map_err(|context| MongoDaoError::Decode { context })?;

        let mut players = IndexMap::with_capacity(value.players.len());
        for (raw, score) in value.players {
            let id = Uuid::parse_str(&raw).map_err(|err| MongoDaoError::Decode {
                context: format!("invalid member id `{raw}`: {err}"),
            })?;
            players.insert(id, score);
        }

        Ok(Self {
            number,
            max_players: value.max_players as u32,
            current_players: value.current_players as u32,
            players,
            score: value.score,
        })
    }
}

/// Match document stored in the `matches` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMatchDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    match_type: String,
    status: MatchStatus,
    created_at: DateTime,
    started_at: Option<DateTime>,
    ended_at: Option<DateTime>,
    winning_team: Option<i64>,
    team1: MongoTeamDocument,
    team2: MongoTeamDocument,
    revision: i64,
}

impl MongoMatchDocument {
    /// Revision currently stored, used to report lost races.
    pub(super) fn stored_revision(&self) -> u64 {
        self.revision as u64
    }
}

impl From<MatchEntity> for MongoMatchDocument {
    fn from(value: MatchEntity) -> Self {
        Self {
            id: value.id,
            match_type: value.match_type,
            status: value.status,
            created_at: DateTime::from_system_time(value.created_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            ended_at: value.ended_at.map(DateTime::from_system_time),
            winning_team: value.winning_team.map(|t| u8::from(t) as i64),
            team1: value.team1.into(),
            team2: value.team2.into(),
            revision: value.revision as i64,
        }
    }
}

impl TryFrom<MongoMatchDocument> for MatchEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoMatchDocument) -> Result<Self, Self::Error> {
        let winning_team = value
            .winning_team
            .map(|raw| {
                TeamNumber::try_from(raw as u8).map_err(|context| MongoDaoError::Decode { context })
            })
            .transpose()?;

        Ok(Self {
            id: value.id,
            match_type: value.match_type,
            status: value.status,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(|t| t.to_system_time()),
            ended_at: value.ended_at.map(|t| t.to_system_time()),
            winning_team,
            team1: value.team1.try_into()?,
            team2: value.team2.try_into()?,
            revision: value.revision as u64,
        })
    }
}

/// Active-match pointer stored in the `user_matches` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMembershipDocument {
    #[serde(rename = "_id")]
    pub user_id: Uuid,
    pub match_id: Uuid,
}

/// Discovery event stored in the `discoveries` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoDiscoveryDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    match_id: Uuid,
    team: i64,
    user_id: Uuid,
    treasure_ref: String,
    points: i64,
    occurred_at: DateTime,
}

impl From<DiscoveryEntity> for MongoDiscoveryDocument {
    fn from(value: DiscoveryEntity) -> Self {
        Self {
            id: value.id,
            match_id: value.match_id,
            team: u8::from(value.team) as i64,
            user_id: value.user_id,
            treasure_ref: value.treasure_ref,
            points: value.points,
            occurred_at: DateTime::from_system_time(value.occurred_at),
        }
    }
}

impl TryFrom<MongoDiscoveryDocument> for DiscoveryEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoDiscoveryDocument) -> Result<Self, Self::Error> {
        let team = TeamNumber::try_from(value.team as u8)
            .map_err(|context| MongoDaoError::Decode { context })?;

        Ok(Self {
            id: value.id,
            match_id: value.match_id,
            team,
            user_id: value.user_id,
            treasure_ref: value.treasure_ref,
            points: value.points,
            occurred_at: value.occurred_at.to_system_time(),
        })
    }
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}

/// Status label as stored in the `status` field, for query filters.
pub fn status_label(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Matching => "matching",
        MatchStatus::Playing => "playing",
        MatchStatus::Finished => "finished",
        MatchStatus::Cancelled => "cancelled",
    }
}
