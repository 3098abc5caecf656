use axum::{Json, Router, extract::State, routing::put};
use axum_valid::Valid;

use crate::{
    dto::user::{Caller, LinkProviderRequest, SuccessResponse},
    error::AppError,
    services::user_service,
    state::SharedState,
};

/// Per-user endpoints.
pub fn router() -> Router<SharedState> {
    Router::new().route("/me/provider-link", put(link_provider))
}

/// Store the caller's streaming account credentials; required before hosting a session.
#[utoipa::path(
    put,
    path = "/me/provider-link",
    tag = "users",
    params(("x-user-id" = String, Header, description = "Caller identity")),
    request_body = LinkProviderRequest,
    responses((status = 200, description = "Account linked", body = SuccessResponse))
)]
pub async fn link_provider(
    State(state): State<SharedState>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<LinkProviderRequest>>,
) -> Result<Json<SuccessResponse>, AppError> {
    user_service::link_provider(&state, &caller, payload).await?;
    Ok(Json(SuccessResponse::ok()))
}
