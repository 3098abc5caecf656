use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::{
        quiz::{
            AdvanceQuestionRequest, CreateQuizResponse, QuizStateView, SetGeneratingRequest,
            SetTracksRequest, StoreQuestionsRequest, SubmitAnswerRequest, SubmitAnswerResponse,
        },
        user::{Caller, SuccessResponse},
    },
    error::AppError,
    services::quiz_service,
    state::SharedState,
};

/// Quiz endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/quizzes", post(create_quiz))
        .route("/quizzes/{id}", get(get_quiz_state))
        .route("/quizzes/{id}/join", post(join_quiz))
        .route("/quizzes/{id}/tracks", put(set_participant_tracks))
        .route("/quizzes/{id}/generating", put(set_generating))
        .route("/quizzes/{id}/questions", post(generate_questions))
        .route("/quizzes/{id}/start", post(start_quiz))
        .route("/quizzes/{id}/answers", post(submit_answer))
        .route("/quizzes/{id}/advance", post(advance_question))
        .route("/quizzes/{id}/end", post(end_quiz))
}

/// Create a quiz hosted by the caller, or return the one they already host.
#[utoipa::path(
    post,
    path = "/quizzes",
    tag = "quizzes",
    params(("x-user-id" = String, Header, description = "Caller identity")),
    responses((status = 200, description = "Quiz created or rejoined", body = CreateQuizResponse))
)]
pub async fn create_quiz(
    State(state): State<SharedState>,
    caller: Caller,
) -> Result<Json<CreateQuizResponse>, AppError> {
    Ok(Json(quiz_service::create_quiz(&state, &caller).await?))
}

/// Full quiz state, including the derived phase and, once over, the winners.
#[utoipa::path(
    get,
    path = "/quizzes/{id}",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    responses(
        (status = 200, description = "Quiz snapshot", body = QuizStateView),
        (status = 404, description = "Quiz ended and removed", body = crate::error::ErrorBody)
    )
)]
pub async fn get_quiz_state(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<QuizStateView>, AppError> {
    Ok(Json(quiz_service::get_quiz_state(&state, &id, &caller).await?))
}

#[utoipa::path(
    post,
    path = "/quizzes/{id}/join",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    responses((status = 200, description = "Joined", body = SuccessResponse))
)]
pub async fn join_quiz(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<SuccessResponse>, AppError> {
    quiz_service::join_quiz(&state, &id, &caller).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// Set the tracks a participant contributes; returns the ids kept.
#[utoipa::path(
    put,
    path = "/quizzes/{id}/tracks",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    request_body = SetTracksRequest,
    responses((status = 200, description = "Tracks stored", body = [String]))
)]
pub async fn set_participant_tracks(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<SetTracksRequest>>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(
        quiz_service::set_participant_tracks(&state, &id, &caller, payload).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/quizzes/{id}/generating",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    request_body = SetGeneratingRequest,
    responses(
        (status = 200, description = "Flag updated", body = SuccessResponse),
        (status = 409, description = "Generation already running", body = crate::error::ErrorBody)
    )
)]
pub async fn set_generating(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
    Json(payload): Json<SetGeneratingRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    quiz_service::set_generating(&state, &id, &caller, payload.status).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// Store generated questions under the generation guard.
#[utoipa::path(
    post,
    path = "/quizzes/{id}/questions",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    request_body = StoreQuestionsRequest,
    responses(
        (status = 200, description = "Questions stored", body = SuccessResponse),
        (status = 409, description = "Already stored or being generated", body = crate::error::ErrorBody)
    )
)]
pub async fn generate_questions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<StoreQuestionsRequest>>,
) -> Result<Json<SuccessResponse>, AppError> {
    let questions = payload.questions.into_iter().map(Into::into).collect();
    quiz_service::generate_questions(&state, &id, &caller, questions).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/quizzes/{id}/start",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    responses((status = 200, description = "Quiz started", body = SuccessResponse))
)]
pub async fn start_quiz(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<SuccessResponse>, AppError> {
    quiz_service::start_quiz(&state, &id, &caller).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// Answer the open question. Only the first answer per question counts.
#[utoipa::path(
    post,
    path = "/quizzes/{id}/answers",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    request_body = SubmitAnswerRequest,
    responses((status = 200, description = "Answer recorded", body = SubmitAnswerResponse))
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<SubmitAnswerResponse>, AppError> {
    Ok(Json(
        quiz_service::submit_answer(&state, &id, &caller, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/quizzes/{id}/advance",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    request_body = AdvanceQuestionRequest,
    responses((status = 200, description = "Moved to the question, or finished", body = SuccessResponse))
)]
pub async fn advance_question(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
    Json(payload): Json<AdvanceQuestionRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    quiz_service::advance_question(&state, &id, &caller, payload.new_index).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/quizzes/{id}/end",
    tag = "quizzes",
    params(
        ("x-user-id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Quiz identifier")
    ),
    responses((status = 200, description = "Quiz ended", body = SuccessResponse))
)]
pub async fn end_quiz(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<SuccessResponse>, AppError> {
    quiz_service::end_quiz(&state, &id, &caller).await?;
    Ok(Json(SuccessResponse::ok()))
}
