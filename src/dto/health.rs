use serde::Serialize;
use utoipa::ToSchema;

/// Payload of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` while the tree store is unreachable.
    pub status: &'static str,
    /// Whether the last store ping succeeded.
    pub store_reachable: bool,
    /// RFC 3339 server time, for client clock skew checks.
    pub server_time: String,
}

impl HealthResponse {
    pub fn new(degraded: bool, store_reachable: bool) -> Self {
        Self {
            status: if degraded { "degraded" } else { "ok" },
            store_reachable,
            server_time: super::server_time(),
        }
    }
}
