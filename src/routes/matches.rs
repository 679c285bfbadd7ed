use std::time::SystemTime;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dao::models::TeamNumber,
    dto::{
        common::{DiscoverySnapshot, MatchSnapshot},
        matches::{
            ActiveMatchResponse, CreateMatchRequest, JoinableMatchesResponse,
            MatchDetailResponse, MatchHistoryResponse, RecordDiscoveryRequest,
            ReportLocationRequest, SettleMatchRequest,
        },
        validation::players_per_side,
    },
    error::AppError,
    services::{
        identity::AuthedUser,
        location_guard::{self, GeoPosition},
        matchmaking, projection, scoring,
    },
    state::SharedState,
};

/// Routes exposing the matchmaking and lifecycle command surface.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/matches", post(create_match))
        .route("/matches/joinable/{match_type}", get(list_joinable))
        .route("/matches/{id}", get(get_match))
        .route("/matches/{id}/join", post(join_match))
        .route("/matches/{id}/leave", post(leave_match))
        .route("/matches/{id}/cancel", post(cancel_match))
        .route("/matches/{id}/discoveries", post(record_discovery))
        .route("/matches/{id}/settle", post(settle_match))
        .route("/me/active-match", get(active_match))
        .route("/me/history", get(match_history))
        .route("/locations", post(report_location))
}

/// Queue up a new match and claim the creator's slot on team 1.
#[utoipa::path(
    post,
    path = "/matches",
    tag = "matches",
    request_body = CreateMatchRequest,
    responses(
        (status = 200, description = "Match created", body = MatchSnapshot)
    )
)]
pub async fn create_match(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Valid(Json(payload)): Valid<Json<CreateMatchRequest>>,
) -> Result<Json<MatchSnapshot>, AppError> {
    let entity = matchmaking::create_match(&state, &payload.match_type, user_id).await?;
    Ok(Json(projection::snapshot_of(&state, &entity)))
}

/// List waiting matches of a type that still have open slots.
#[utoipa::path(
    get,
    path = "/matches/joinable/{match_type}",
    tag = "matches",
    params(("match_type" = String, Path, description = "Team-size descriptor, e.g. 2v2")),
    responses(
        (status = 200, description = "Joinable matches", body = JoinableMatchesResponse)
    )
)]
pub async fn list_joinable(
    State(state): State<SharedState>,
    Path(match_type): Path<String>,
) -> Result<Json<JoinableMatchesResponse>, AppError> {
    if players_per_side(&match_type).is_none() {
        return Err(AppError::BadRequest(format!(
            "unknown match type `{match_type}`"
        )));
    }

    let matches = matchmaking::find_joinable(&state, &match_type).await?;
    Ok(Json(JoinableMatchesResponse {
        matches: matches
            .iter()
            .map(|entity| projection::snapshot_of(&state, entity))
            .collect(),
    }))
}

/// Full match state including the discovery log.
#[utoipa::path(
    get,
    path = "/matches/{id}",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses(
        (status = 200, description = "Match detail", body = MatchDetailResponse)
    )
)]
pub async fn get_match(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchDetailResponse>, AppError> {
    let (entity, discoveries) = matchmaking::match_detail(&state, id).await?;
    Ok(Json(MatchDetailResponse {
        snapshot: projection::snapshot_of(&state, &entity),
        discoveries: discoveries.iter().map(Into::into).collect(),
    }))
}

/// Claim a slot in the given match, falling back to alternates on races.
#[utoipa::path(
    post,
    path = "/matches/{id}/join",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses(
        (status = 200, description = "Joined match (possibly an alternate)", body = MatchSnapshot)
    )
)]
pub async fn join_match(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchSnapshot>, AppError> {
    let entity = matchmaking::join_match(&state, id, user_id).await?;
    Ok(Json(projection::snapshot_of(&state, &entity)))
}

/// Leave a waiting match; the last player out deletes it.
#[utoipa::path(
    post,
    path = "/matches/{id}/leave",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses(
        (status = 204, description = "Left the match")
    )
)]
pub async fn leave_match(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    matchmaking::leave_match(&state, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Cancel a waiting match for everyone still queued in it.
#[utoipa::path(
    post,
    path = "/matches/{id}/cancel",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses(
        (status = 204, description = "Match cancelled")
    )
)]
pub async fn cancel_match(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    matchmaking::cancel_match(&state, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record a discovery scored by the calling player while the match plays.
#[utoipa::path(
    post,
    path = "/matches/{id}/discoveries",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    request_body = RecordDiscoveryRequest,
    responses(
        (status = 200, description = "Discovery recorded", body = DiscoverySnapshot)
    )
)]
pub async fn record_discovery(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<RecordDiscoveryRequest>>,
) -> Result<Json<DiscoverySnapshot>, AppError> {
    let team = TeamNumber::try_from(payload.team).map_err(AppError::BadRequest)?;
    let event = scoring::record_discovery(
        &state,
        id,
        team,
        user_id,
        payload.treasure_ref,
        payload.points,
    )
    .await?;
    Ok(Json((&event).into()))
}

/// Finish a playing match now, optionally overriding the computed winner.
#[utoipa::path(
    post,
    path = "/matches/{id}/settle",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    request_body = SettleMatchRequest,
    responses(
        (status = 200, description = "Match settled", body = MatchSnapshot)
    )
)]
pub async fn settle_match(
    State(state): State<SharedState>,
    AuthedUser(_user_id): AuthedUser,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SettleMatchRequest>>,
) -> Result<Json<MatchSnapshot>, AppError> {
    let winner_override = payload
        .winner_override
        .map(TeamNumber::try_from)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let entity = scoring::settle(&state, id, winner_override).await?;
    Ok(Json(projection::snapshot_of(&state, &entity)))
}

/// Match the caller currently belongs to; used on client reconnect.
#[utoipa::path(
    get,
    path = "/me/active-match",
    tag = "matches",
    responses(
        (status = 200, description = "Active match lookup", body = ActiveMatchResponse)
    )
)]
pub async fn active_match(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
) -> Result<Json<ActiveMatchResponse>, AppError> {
    let match_id = matchmaking::check_user_active_match(&state, user_id).await?;
    Ok(Json(ActiveMatchResponse { match_id }))
}

/// Every match the caller appeared in, newest first.
#[utoipa::path(
    get,
    path = "/me/history",
    tag = "matches",
    responses(
        (status = 200, description = "Match history", body = MatchHistoryResponse)
    )
)]
pub async fn match_history(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
) -> Result<Json<MatchHistoryResponse>, AppError> {
    let matches = matchmaking::match_history(&state, user_id).await?;
    Ok(Json(MatchHistoryResponse {
        matches: matches
            .iter()
            .map(|entity| projection::snapshot_of(&state, entity))
            .collect(),
    }))
}

/// Feed a position report through the movement plausibility guard.
#[utoipa::path(
    post,
    path = "/locations",
    tag = "matches",
    request_body = ReportLocationRequest,
    responses(
        (status = 204, description = "Position accepted"),
        (status = 400, description = "Position rejected as implausible")
    )
)]
pub async fn report_location(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Valid(Json(payload)): Valid<Json<ReportLocationRequest>>,
) -> Result<StatusCode, AppError> {
    location_guard::report_position(
        &state,
        user_id,
        GeoPosition {
            latitude: payload.latitude,
            longitude: payload.longitude,
            recorded_at: SystemTime::now(),
        },
    )?;
    Ok(StatusCode::NO_CONTENT)
}
