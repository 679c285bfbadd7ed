use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dto::{
    common::{DiscoverySnapshot, MatchSnapshot},
    validation::validate_match_type,
};

/// Payload used to queue up a brand-new match.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateMatchRequest {
    /// Team-size descriptor, e.g. `"2v2"`.
    pub match_type: String,
}

impl Validate for CreateMatchRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_match_type(&self.match_type) {
            errors.add("match_type", e);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Discovery reported by the treasure subsystem while a match is playing.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RecordDiscoveryRequest {
    /// Slot number (1 or 2) the scoring player belongs to.
    #[validate(range(min = 1, max = 2))]
    pub team: u8,
    /// Opaque reference to the found treasure.
    #[validate(length(min = 1, max = 256))]
    pub treasure_ref: String,
    /// Points awarded for the find.
    #[validate(range(min = 1))]
    pub points: i64,
}

/// Administrative settlement payload.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SettleMatchRequest {
    /// Optional winner correction; when absent the winner is computed from scores.
    #[serde(default)]
    #[validate(range(min = 1, max = 2))]
    pub winner_override: Option<u8>,
}

/// Position report from the companion location feed.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ReportLocationRequest {
    /// Latitude in degrees.
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    /// Longitude in degrees.
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

/// Answer to the active-match reconnect probe.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActiveMatchResponse {
    /// Match the user currently belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<Uuid>,
}

/// Full match view including its discovery log.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchDetailResponse {
    /// Current state of the match.
    pub snapshot: MatchSnapshot,
    /// Discovery events in append order.
    pub discoveries: Vec<DiscoverySnapshot>,
}

/// Joinable matches for a given type.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinableMatchesResponse {
    /// Matches still waiting for players, oldest first.
    pub matches: Vec<MatchSnapshot>,
}

/// Matches the user appeared in, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchHistoryResponse {
    /// Snapshot per match, including terminal ones.
    pub matches: Vec<MatchSnapshot>,
}
