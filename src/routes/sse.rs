use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dto::user::Caller, error::AppError, services::sse_service, state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "sse",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Session SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream session snapshots to a participant until the session is removed.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = sse_service::subscribe_session(&state, &id, &caller).await?;
    info!(session_id = %id, user_id = %caller.user_id, "New session SSE connection");
    Ok(sse_service::to_sse_stream(&state, events))
}

#[utoipa::path(
    get,
    path = "/quizzes/{id}/events",
    tag = "sse",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    responses((status = 200, description = "Quiz SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream quiz snapshots to a participant until the quiz is removed.
pub async fn quiz_stream(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = sse_service::subscribe_quiz(&state, &id, &caller).await?;
    info!(quiz_id = %id, user_id = %caller.user_id, "New quiz SSE connection");
    Ok(sse_service::to_sse_stream(&state, events))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions/{id}/events", get(session_stream))
        .route("/quizzes/{id}/events", get(quiz_stream))
}
