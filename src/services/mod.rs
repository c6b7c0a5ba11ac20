/// Engine notifications to SSE events.
pub mod event_service;
/// Health check service.
pub mod health_service;
/// Match operations: lock, engine call, commit.
pub mod match_service;
/// Rehydration and drift repair of stored matches.
pub mod reconciler;
/// Delivery of deferred signals.
pub mod scheduler;
/// Server-Sent Events streaming service.
pub mod sse_service;
