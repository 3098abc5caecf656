use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::{
        queue::{
            AdvanceQueueResponse, CreateSessionResponse, EnqueueTrackRequest, EnqueueTrackResponse,
            SearchTracksQuery, SearchTracksResponse, SelectDeviceRequest, SessionView, VoteResponse,
        },
        user::{Caller, SuccessResponse},
    },
    error::AppError,
    playback::{PlaybackDevice, PlaybackState},
    services::queue_service,
    state::SharedState,
};

/// Queue session endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/join", post(join_session))
        .route("/sessions/{id}/search", get(search_tracks))
        .route("/sessions/{id}/queue", post(enqueue_track))
        .route("/sessions/{id}/queue/{item_id}/vote", post(vote_for_track))
        .route("/sessions/{id}/devices", get(list_devices))
        .route("/sessions/{id}/device", put(select_device))
        .route("/sessions/{id}/playback", get(playback_state))
        .route("/sessions/{id}/advance", post(advance_queue))
        .route("/sessions/{id}/end", post(end_session))
}

/// Create a session hosted by the caller, or return the one they already host.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    params(("x-user-id" = String, Header, description = "Caller identity")),
    responses(
        (status = 200, description = "Session created or rejoined", body = CreateSessionResponse),
        (status = 409, description = "No linked streaming account", body = crate::error::ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    caller: Caller,
) -> Result<Json<CreateSessionResponse>, AppError> {
    Ok(Json(queue_service::create_session(&state, &caller).await?))
}

/// Read a session the caller participates in.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Session snapshot", body = SessionView),
        (status = 404, description = "Session ended and removed", body = crate::error::ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(queue_service::get_session(&state, &id, &caller).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/join",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Joined", body = SuccessResponse))
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<SuccessResponse>, AppError> {
    queue_service::join_session(&state, &id, &caller).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// Search tracks to suggest, through the host's streaming account.
#[utoipa::path(
    get,
    path = "/sessions/{id}/search",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier"),
        SearchTracksQuery
    ),
    responses(
        (status = 200, description = "Matching tracks", body = SearchTracksResponse),
        (status = 400, description = "Blank query", body = crate::error::ErrorBody)
    )
)]
pub async fn search_tracks(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<SearchTracksQuery>,
    caller: Caller,
) -> Result<Json<SearchTracksResponse>, AppError> {
    Ok(Json(
        queue_service::search_tracks(&state, &id, &caller, &query.q).await?,
    ))
}

/// Suggest a track for the queue.
#[utoipa::path(
    post,
    path = "/sessions/{id}/queue",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    request_body = EnqueueTrackRequest,
    responses((status = 200, description = "Track queued", body = EnqueueTrackResponse))
)]
pub async fn enqueue_track(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<EnqueueTrackRequest>>,
) -> Result<Json<EnqueueTrackResponse>, AppError> {
    Ok(Json(
        queue_service::enqueue_track(&state, &id, &caller, payload.track).await?,
    ))
}

/// Toggle the caller's vote on a queued track.
#[utoipa::path(
    post,
    path = "/sessions/{id}/queue/{item_id}/vote",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier"),
        ("item_id" = String, Path, description = "Queue item identifier")
    ),
    responses(
        (status = 200, description = "Vote toggled", body = VoteResponse),
        (status = 404, description = "Track no longer queued", body = crate::error::ErrorBody)
    )
)]
pub async fn vote_for_track(
    State(state): State<SharedState>,
    Path((id, item_id)): Path<(String, String)>,
    caller: Caller,
) -> Result<Json<VoteResponse>, AppError> {
    Ok(Json(
        queue_service::vote_for_track(&state, &id, &item_id, &caller).await?,
    ))
}

/// Devices available on the host's streaming account.
#[utoipa::path(
    get,
    path = "/sessions/{id}/devices",
    tag = "playback",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Active devices", body = [PlaybackDevice]))
)]
pub async fn list_devices(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<Vec<PlaybackDevice>>, AppError> {
    Ok(Json(queue_service::list_devices(&state, &id, &caller).await?))
}

/// Select the playback device; the backend then keeps it fed from the queue.
#[utoipa::path(
    put,
    path = "/sessions/{id}/device",
    tag = "playback",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    request_body = SelectDeviceRequest,
    responses((status = 200, description = "Device selected", body = SuccessResponse))
)]
pub async fn select_device(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<SelectDeviceRequest>>,
) -> Result<Json<SuccessResponse>, AppError> {
    queue_service::select_device(&state, &id, &caller, payload).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// What the host's player is doing; `null` when nothing is loaded.
#[utoipa::path(
    get,
    path = "/sessions/{id}/playback",
    tag = "playback",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Playback state", body = PlaybackState))
)]
pub async fn playback_state(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<Option<PlaybackState>>, AppError> {
    Ok(Json(queue_service::playback_state(&state, &id, &caller).await?))
}

/// Play the next track of the queue.
#[utoipa::path(
    post,
    path = "/sessions/{id}/advance",
    tag = "playback",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Queue advanced, or reported empty", body = AdvanceQueueResponse))
)]
pub async fn advance_queue(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<AdvanceQueueResponse>, AppError> {
    Ok(Json(queue_service::advance_queue(&state, &id, &caller).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Session ended", body = SuccessResponse))
)]
pub async fn end_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<SuccessResponse>, AppError> {
    queue_service::end_session(&state, &id, &caller).await?;
    Ok(Json(SuccessResponse::ok()))
}
