use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::common::{DiscoverySnapshot, MatchSnapshot};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// Optional SSE event name.
    pub event: Option<String>,
    /// Serialised JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast whenever a watched match document changes.
pub struct MatchUpdatedEvent(pub MatchSnapshot);

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a watched match is deleted.
pub struct MatchRemovedEvent {
    /// Identifier of the removed match.
    pub match_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial payload of a waiting-list stream: every joinable match right now.
pub struct WaitingListEvent {
    /// Joinable matches, oldest first.
    pub matches: Vec<MatchSnapshot>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast when a waiting match of the watched type appears or changes.
pub struct WaitingUpdatedEvent(pub MatchSnapshot);

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a match leaves the watched waiting list (filled, cancelled,
/// or deleted).
pub struct WaitingRemovedEvent {
    /// Identifier of the match that left the list.
    pub match_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast on a match stream when a discovery is scored.
pub struct DiscoveryScoredEvent(pub DiscoverySnapshot);
