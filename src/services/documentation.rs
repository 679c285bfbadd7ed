use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Treasure Match Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::matches::create_match,
        crate::routes::matches::list_joinable,
        crate::routes::matches::get_match,
        crate::routes::matches::join_match,
        crate::routes::matches::leave_match,
        crate::routes::matches::cancel_match,
        crate::routes::matches::record_discovery,
        crate::routes::matches::settle_match,
        crate::routes::matches::active_match,
        crate::routes::matches::match_history,
        crate::routes::matches::report_location,
        crate::routes::sse::match_stream,
        crate::routes::sse::waiting_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::common::MatchSnapshot,
            crate::dto::common::TeamSnapshot,
            crate::dto::common::MemberSnapshot,
            crate::dto::common::DiscoverySnapshot,
            crate::dto::matches::CreateMatchRequest,
            crate::dto::matches::RecordDiscoveryRequest,
            crate::dto::matches::SettleMatchRequest,
            crate::dto::matches::ReportLocationRequest,
            crate::dto::matches::ActiveMatchResponse,
            crate::dto::matches::MatchDetailResponse,
            crate::dto::matches::JoinableMatchesResponse,
            crate::dto::matches::MatchHistoryResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "matches", description = "Matchmaking and match lifecycle commands"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
