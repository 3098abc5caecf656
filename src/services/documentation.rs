use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Crowdtune Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::user::link_provider,
        crate::routes::session::create_session,
        crate::routes::session::get_session,
        crate::routes::session::join_session,
        crate::routes::session::search_tracks,
        crate::routes::session::enqueue_track,
        crate::routes::session::vote_for_track,
        crate::routes::session::list_devices,
        crate::routes::session::select_device,
        crate::routes::session::playback_state,
        crate::routes::session::advance_queue,
        crate::routes::session::end_session,
        crate::routes::quiz::create_quiz,
        crate::routes::quiz::get_quiz_state,
        crate::routes::quiz::join_quiz,
        crate::routes::quiz::set_participant_tracks,
        crate::routes::quiz::set_generating,
        crate::routes::quiz::generate_questions,
        crate::routes::quiz::start_quiz,
        crate::routes::quiz::submit_answer,
        crate::routes::quiz::advance_question,
        crate::routes::quiz::end_quiz,
        crate::routes::sse::session_stream,
        crate::routes::sse::quiz_stream,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::dto::health::HealthResponse,
            crate::dto::user::LinkProviderRequest,
            crate::dto::user::SuccessResponse,
            crate::dto::queue::TrackInput,
            crate::dto::queue::SearchTracksResponse,
            crate::dto::queue::EnqueueTrackRequest,
            crate::dto::queue::EnqueueTrackResponse,
            crate::dto::queue::CreateSessionResponse,
            crate::dto::queue::QueueItemView,
            crate::dto::queue::SessionView,
            crate::dto::queue::VoteResponse,
            crate::dto::queue::SelectDeviceRequest,
            crate::dto::queue::AdvanceQueueResponse,
            crate::dto::quiz::CreateQuizResponse,
            crate::dto::quiz::SetTracksRequest,
            crate::dto::quiz::SetGeneratingRequest,
            crate::dto::quiz::QuestionInput,
            crate::dto::quiz::StoreQuestionsRequest,
            crate::dto::quiz::SubmitAnswerRequest,
            crate::dto::quiz::SubmitAnswerResponse,
            crate::dto::quiz::AdvanceQuestionRequest,
            crate::dto::quiz::QuizStateView,
            crate::dto::phase::VisibleQuizPhase,
            crate::dto::phase::QuizPhaseSnapshot,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::RecordRemoved,
            crate::playback::PlaybackDevice,
            crate::playback::PlayingTrack,
            crate::playback::PlaybackState,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "users", description = "Caller profile and streaming account link"),
        (name = "sessions", description = "Voted playback queue sessions"),
        (name = "playback", description = "Device selection and queue advancement"),
        (name = "quizzes", description = "Multiplayer music quiz"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/me/provider-link",
            "/sessions",
            "/sessions/{id}/queue/{item_id}/vote",
            "/sessions/{id}/events",
            "/quizzes/{id}/answers",
            "/quizzes/{id}/events",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
