/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Background task keeping a host's player fed from the queue.
pub mod playback_monitor;
/// Voted playback queue sessions.
pub mod queue_service;
/// Multiplayer quiz lifecycle.
pub mod quiz_service;
/// Server-Sent Events streams over session and quiz records.
pub mod sse_service;
/// Tree store connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Caller profiles and streaming account links.
pub mod user_service;

#[cfg(test)]
pub(crate) mod testing;
