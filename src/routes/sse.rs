use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::Sse,
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{
        sse::{MatchUpdatedEvent, ServerEvent, WaitingListEvent},
        validation::players_per_side,
    },
    error::AppError,
    services::{matchmaking, projection, sse_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/matches/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses((status = 200, description = "Per-match event stream", content_type = "text/event-stream", body = String))
)]
/// Stream one match's snapshot followed by its live updates.
pub async fn match_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    // Subscribe before the initial read so no update slips between the two.
    let receiver = state.sse().subscribe_match(id);
    let (entity, _) = matchmaking::match_detail(&state, id).await?;

    let snapshot = projection::snapshot_of(&state, &entity);
    let initial = ServerEvent::json(
        projection::SNAPSHOT_EVENT.to_string(),
        &MatchUpdatedEvent(snapshot),
    )
    .map_err(|err| AppError::Internal(err.to_string()))?;

    info!(match_id = %id, "new match SSE connection");
    Ok(sse_service::to_sse_stream(vec![initial], receiver))
}

#[utoipa::path(
    get,
    path = "/matches/waiting/{match_type}/events",
    tag = "sse",
    params(("match_type" = String, Path, description = "Team-size descriptor, e.g. 2v2")),
    responses((status = 200, description = "Waiting-list event stream", content_type = "text/event-stream", body = String))
)]
/// Stream the joinable matches of a type followed by membership changes.
pub async fn waiting_stream(
    State(state): State<SharedState>,
    Path(match_type): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    if players_per_side(&match_type).is_none() {
        return Err(AppError::BadRequest(format!(
            "unknown match type `{match_type}`"
        )));
    }

    let receiver = state.sse().subscribe_waiting(&match_type);
    let waiting = matchmaking::find_joinable(&state, &match_type).await?;
    let initial = ServerEvent::json(
        projection::WAITING_LIST_EVENT.to_string(),
        &WaitingListEvent {
            matches: waiting
                .iter()
                .map(|entity| projection::snapshot_of(&state, entity))
                .collect(),
        },
    )
    .map_err(|err| AppError::Internal(err.to_string()))?;

    info!(%match_type, "new waiting-list SSE connection");
    Ok(sse_service::to_sse_stream(vec![initial], receiver))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/matches/{id}/events", get(match_stream))
        .route("/matches/waiting/{match_type}/events", get(waiting_stream))
}
