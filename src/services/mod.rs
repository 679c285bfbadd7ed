/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Session-token resolution and the authenticated-user extractor.
pub mod identity;
/// Match lifecycle controller: start trigger, auto-end timer, settlement edge.
pub mod lifecycle;
/// Movement plausibility guard for the location feed.
pub mod location_guard;
/// Core matchmaking orchestration: create, join, leave, cancel.
pub mod matchmaking;
/// Live view projection fanning store changes out to watchers.
pub mod projection;
/// Score aggregation and settlement.
pub mod scoring;
/// Server-Sent Events response plumbing.
pub mod sse_service;
/// Storage reconnection supervisor.
pub mod storage_supervisor;
/// Reconciliation sweep repairing orphans and overdue matches.
pub mod sweep;
