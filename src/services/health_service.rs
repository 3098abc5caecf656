use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the tree store and report whether the backend is serving from it.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store_reachable = match state.require_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        Err(_) => {
            warn!("storage unavailable (degraded mode)");
            false
        }
    };

    HealthResponse::new(state.is_degraded(), store_reachable)
}
