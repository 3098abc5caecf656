//! Multiplayer quiz: lobby, question generation, answers, scoring and progression.
//!
//! The phase is derived from the stored record on every call. Writes that several clients
//! may race on (answer slots, scores, the question index, the generation flag) go through
//! single-path atomic updates.

use std::{collections::HashSet, time::Duration};

use indexmap::IndexMap;
use rand::{rng, seq::SliceRandom};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        repository::{HostingSlot, UserRepository},
        tree::{TransactionOutcome, TransactionStep, TreePath},
    },
    dto::{
        quiz::{
            CreateQuizResponse, QuizStateView, SetTracksRequest, SubmitAnswerRequest,
            SubmitAnswerResponse,
        },
        user::Caller,
    },
    error::ServiceError,
    services::user_service::{self, ANONYMOUS},
    state::{
        QuizRepository, SharedState, now_millis,
        quiz::{Question, QuizSession},
        state_machine::{QuizEvent, QuizPhase},
    },
};

fn field(keys: &[&str]) -> Result<TreePath, ServiceError> {
    Ok(TreePath::from_keys(keys)?)
}

fn ensure_host(quiz: &QuizSession, caller: &Caller, action: &str) -> Result<(), ServiceError> {
    if quiz.is_host(&caller.user_id) {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(format!(
            "Only the host can {action}."
        )))
    }
}

fn ensure_participant(quiz: &QuizSession, caller: &Caller) -> Result<(), ServiceError> {
    if quiz.is_participant(&caller.user_id) {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(
            "You are not a participant of this quiz.".into(),
        ))
    }
}

fn ensure_live(quiz: &QuizSession) -> Result<(), ServiceError> {
    if quiz.is_ended {
        Err(ServiceError::FailedPrecondition("The quiz has ended.".into()))
    } else {
        Ok(())
    }
}

fn conflict(what: &str) -> ServiceError {
    ServiceError::Internal(format!("Failed to update {what} due to conflicting data."))
}

/// Create a quiz hosted by the caller, or hand back the one they already host.
pub async fn create_quiz(
    state: &SharedState,
    caller: &Caller,
) -> Result<CreateQuizResponse, ServiceError> {
    user_service::remember_display_name(state, caller).await?;
    let users = state.users().await?;
    let quizzes = state.quizzes().await?;

    if let Some(existing) = users.hosting(&caller.user_id, HostingSlot::Quiz).await? {
        if let Some(quiz) = quizzes.find(&existing).await?
            && !quiz.is_ended
            && quiz.is_host(&caller.user_id)
        {
            info!(quiz_id = %existing, user_id = %caller.user_id, "host rejoined quiz");
            return Ok(CreateQuizResponse { quiz_id: existing });
        }
    }

    let quiz_id = quizzes
        .create(&QuizSession::new(&caller.user_id, now_millis()))
        .await?;
    users
        .set_hosting(&caller.user_id, HostingSlot::Quiz, Some(&quiz_id))
        .await?;

    info!(quiz_id = %quiz_id, host = %caller.user_id, "quiz created");
    Ok(CreateQuizResponse { quiz_id })
}

/// Add the caller to the quiz. Rejoining is always allowed; new players only before the start.
pub async fn join_quiz(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
) -> Result<(), ServiceError> {
    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    ensure_live(&quiz)?;
    user_service::remember_display_name(state, caller).await?;

    if quiz.is_participant(&caller.user_id) {
        return Ok(());
    }
    if quiz.started || quiz.is_quiz_over {
        return Err(ServiceError::FailedPrecondition(
            "The quiz has already started.".into(),
        ));
    }

    quizzes
        .update_fields(
            quiz_id,
            vec![
                (field(&["participants", caller.user_id.as_str()])?, Value::Bool(true)),
                (field(&["scores", caller.user_id.as_str()])?, json!(0)),
            ],
        )
        .await?;
    info!(quiz_id, user_id = %caller.user_id, "participant joined quiz");
    Ok(())
}

/// Record the tracks a participant contributes, keeping a random sample when too many are sent.
pub async fn set_participant_tracks(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
    request: SetTracksRequest,
) -> Result<Vec<String>, ServiceError> {
    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    if caller.user_id != request.user_id && !quiz.is_host(&caller.user_id) {
        return Err(ServiceError::PermissionDenied(
            "Only the host can set another participant's tracks.".into(),
        ));
    }
    if !quiz.is_participant(&request.user_id) {
        return Err(ServiceError::PermissionDenied(format!(
            "`{}` is not a participant of this quiz.",
            request.user_id
        )));
    }
    ensure_live(&quiz)?;

    let mut seen = HashSet::new();
    let mut track_ids: Vec<String> = request
        .track_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect();
    if track_ids.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "At least one track id is required.".into(),
        ));
    }
    let sample = state.config().quiz_track_sample;
    if track_ids.len() > sample {
        track_ids.shuffle(&mut rng());
        track_ids.truncate(sample);
    }

    quizzes
        .update_fields(
            quiz_id,
            vec![(field(&["isrcs", request.user_id.as_str()])?, json!(track_ids))],
        )
        .await?;
    debug!(quiz_id, user_id = %request.user_id, count = track_ids.len(), "participant tracks stored");
    Ok(track_ids)
}

/// Raise or clear the generation flag. Raising it is a test-and-set: a second generator is
/// turned away while the first one runs.
pub async fn set_generating(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
    status: bool,
) -> Result<(), ServiceError> {
    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    ensure_host(&quiz, caller, "generate questions")?;
    ensure_live(&quiz)?;
    let flag = field(&["isGeneratingQuestions"])?;

    if !status {
        quizzes
            .update_fields(quiz_id, vec![(flag, Value::Bool(false))])
            .await?;
        debug!(quiz_id, "question generation flag cleared");
        return Ok(());
    }

    let phase = QuizPhase::derive(&quiz);
    if phase != QuizPhase::Generating {
        phase.compute_transition(QuizEvent::BeginGeneration)?;
    }

    let outcome = quizzes
        .atomic_update(
            quiz_id,
            &flag,
            Box::new(|current| match current {
                Some(Value::Bool(true)) => TransactionStep::Abort,
                _ => TransactionStep::Set(Value::Bool(true)),
            }),
        )
        .await?;
    match outcome {
        TransactionOutcome::Committed(_) => {
            debug!(quiz_id, "question generation flag raised");
            Ok(())
        }
        TransactionOutcome::Aborted(_) => Err(ServiceError::FailedPrecondition(
            "Questions are already being generated.".into(),
        )),
        TransactionOutcome::Conflicted => Err(conflict("the generation flag")),
    }
}

/// Store the quiz questions. They are written once and never replaced.
pub async fn store_questions(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
    questions: Vec<Question>,
) -> Result<(), ServiceError> {
    if questions.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "At least one question is required.".into(),
        ));
    }
    for (index, question) in questions.iter().enumerate() {
        question
            .check()
            .map_err(|reason| ServiceError::InvalidArgument(format!("question {index}: {reason}")))?;
    }

    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    ensure_host(&quiz, caller, "store questions")?;
    ensure_live(&quiz)?;

    let count = questions.len();
    let value = serde_json::to_value(&questions)
        .map_err(|err| ServiceError::Internal(format!("failed to encode questions: {err}")))?;
    let outcome = quizzes
        .atomic_update(
            quiz_id,
            &field(&["questions"])?,
            Box::new(move |current| match current {
                Some(_) => TransactionStep::Abort,
                None => TransactionStep::Set(value.clone()),
            }),
        )
        .await?;

    match outcome {
        TransactionOutcome::Committed(_) => {
            info!(quiz_id, count, "quiz questions stored");
            Ok(())
        }
        TransactionOutcome::Aborted(_) => Err(ServiceError::FailedPrecondition(
            "Questions were already stored for this quiz.".into(),
        )),
        TransactionOutcome::Conflicted => Err(conflict("the questions")),
    }
}

/// Guarded generation: raise the flag, store the questions, then clear the flag whatever
/// the store outcome.
pub async fn generate_questions(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
    questions: Vec<Question>,
) -> Result<(), ServiceError> {
    set_generating(state, quiz_id, caller, true).await?;
    let stored = store_questions(state, quiz_id, caller, questions).await;
    if let Err(err) = set_generating(state, quiz_id, caller, false).await {
        warn!(quiz_id, error = %err, "failed to clear the question generation flag");
    }
    stored
}

/// Open the first question.
pub async fn start_quiz(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
) -> Result<(), ServiceError> {
    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    ensure_host(&quiz, caller, "start the quiz")?;
    ensure_live(&quiz)?;
    if quiz.questions.is_empty() {
        return Err(ServiceError::FailedPrecondition(
            "Store questions before starting the quiz.".into(),
        ));
    }
    QuizPhase::derive(&quiz).compute_transition(QuizEvent::Start)?;

    quizzes
        .update_fields(
            quiz_id,
            vec![
                (field(&["started"])?, Value::Bool(true)),
                (field(&["currentQuestionIndex"])?, json!(0)),
            ],
        )
        .await?;
    info!(quiz_id, questions = quiz.questions.len(), "quiz started");
    Ok(())
}

/// Record the caller's answer to the open question.
///
/// The first submission wins the answer slot and is the only one that can score; a repeated
/// submission reports the stored answer's correctness.
pub async fn submit_answer(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
    request: SubmitAnswerRequest,
) -> Result<SubmitAnswerResponse, ServiceError> {
    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    ensure_participant(&quiz, caller)?;
    ensure_live(&quiz)?;
    if !quiz.started || quiz.is_quiz_over {
        return Err(ServiceError::FailedPrecondition(
            "The quiz is not in progress.".into(),
        ));
    }
    if quiz.current_question_index != Some(request.question_index) {
        return Err(ServiceError::FailedPrecondition(format!(
            "Question {} is not open for answers.",
            request.question_index
        )));
    }
    let Some(question) = quiz.question(request.question_index) else {
        return Err(ServiceError::FailedPrecondition(format!(
            "Question {} does not exist.",
            request.question_index
        )));
    };
    if !question.offers(&request.option) {
        return Err(ServiceError::InvalidArgument(
            "The option is not one of the question's options.".into(),
        ));
    }

    let index = request.question_index.to_string();
    let option = request.option.clone();
    let outcome = quizzes
        .atomic_update(
            quiz_id,
            &field(&["answers", index.as_str(), caller.user_id.as_str()])?,
            Box::new(move |current| match current {
                Some(_) => TransactionStep::Abort,
                None => TransactionStep::Set(Value::from(option.clone())),
            }),
        )
        .await?;

    let is_correct = match outcome {
        TransactionOutcome::Committed(_) => {
            let is_correct = request.option == question.answer;
            if is_correct
                && let Err(err) = award_point(&quizzes, quiz_id, &caller.user_id).await
            {
                release_answer(&quizzes, quiz_id, &index, &caller.user_id, &request.option).await;
                return Err(err);
            }
            debug!(quiz_id, user_id = %caller.user_id, index = %index, is_correct, "answer recorded");
            is_correct
        }
        TransactionOutcome::Aborted(stored) => {
            debug!(quiz_id, user_id = %caller.user_id, index = %index, "duplicate answer ignored");
            stored.as_ref().and_then(Value::as_str) == Some(question.answer.as_str())
        }
        TransactionOutcome::Conflicted => return Err(conflict("the answer")),
    };

    Ok(SubmitAnswerResponse {
        success: true,
        is_correct,
    })
}

/// Free the answer slot again after its point could not be recorded, so a retry can score.
async fn release_answer(
    quizzes: &QuizRepository,
    quiz_id: &str,
    index: &str,
    user_id: &str,
    option: &str,
) {
    let path = match field(&["answers", index, user_id]) {
        Ok(path) => path,
        Err(err) => {
            warn!(quiz_id, user_id, error = %err, "cannot address answer slot");
            return;
        }
    };
    let option = option.to_string();
    let outcome = quizzes
        .atomic_update(
            quiz_id,
            &path,
            Box::new(move |current| match current.and_then(Value::as_str) {
                Some(stored) if stored == option => TransactionStep::Remove,
                _ => TransactionStep::Abort,
            }),
        )
        .await;
    match outcome {
        Ok(TransactionOutcome::Committed(_)) => {
            debug!(quiz_id, user_id, index, "answer released after failed scoring");
        }
        Ok(_) => warn!(quiz_id, user_id, index, "answer slot changed before it could be released"),
        Err(err) => warn!(quiz_id, user_id, index, error = %err, "failed to release answer slot"),
    }
}

async fn award_point(
    quizzes: &QuizRepository,
    quiz_id: &str,
    user_id: &str,
) -> Result<(), ServiceError> {
    let outcome = quizzes
        .atomic_update(
            quiz_id,
            &field(&["scores", user_id])?,
            Box::new(|current| {
                let score = current.and_then(Value::as_u64).unwrap_or(0);
                TransactionStep::Set(json!(score + 1))
            }),
        )
        .await?;
    if outcome.is_committed() {
        Ok(())
    } else {
        Err(conflict("the score"))
    }
}

/// Move from the current question to `new_index`, or finish the quiz past the last one.
///
/// Repeating the move that already happened is accepted, so duplicate host clicks and
/// concurrent host clients advance exactly once.
pub async fn advance_question(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
    new_index: usize,
) -> Result<(), ServiceError> {
    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    ensure_host(&quiz, caller, "advance the quiz")?;
    ensure_live(&quiz)?;

    let count = quiz.questions.len();
    if quiz.is_quiz_over {
        return if new_index >= count {
            Ok(())
        } else {
            Err(ServiceError::FailedPrecondition("The quiz is over.".into()))
        };
    }
    if !quiz.started {
        return Err(ServiceError::FailedPrecondition(
            "The quiz has not started.".into(),
        ));
    }

    let current = quiz.current_question_index.unwrap_or(0);
    if new_index == current {
        return Ok(());
    }
    if new_index != current + 1 {
        return Err(ServiceError::FailedPrecondition(format!(
            "Cannot move from question {current} to question {new_index}."
        )));
    }

    let phase = QuizPhase::derive(&quiz);
    if new_index >= count {
        phase.compute_transition(QuizEvent::Finish)?;
        quizzes
            .update_fields(
                quiz_id,
                vec![
                    (field(&["isQuizOver"])?, Value::Bool(true)),
                    (field(&["started"])?, Value::Bool(false)),
                ],
            )
            .await?;
        info!(quiz_id, "quiz finished");
        return Ok(());
    }
    phase.compute_transition(QuizEvent::NextQuestion)?;

    let outcome = quizzes
        .atomic_update(
            quiz_id,
            &field(&["currentQuestionIndex"])?,
            Box::new(move |stored| {
                if stored.and_then(Value::as_u64) == Some(current as u64) {
                    TransactionStep::Set(json!(new_index))
                } else {
                    TransactionStep::Abort
                }
            }),
        )
        .await?;

    match outcome {
        TransactionOutcome::Committed(_) => {
            info!(quiz_id, question = new_index, "quiz advanced");
            Ok(())
        }
        TransactionOutcome::Aborted(stored)
            if stored.as_ref().and_then(Value::as_u64) == Some(new_index as u64) =>
        {
            debug!(quiz_id, question = new_index, "quiz already advanced");
            Ok(())
        }
        TransactionOutcome::Aborted(_) => Err(ServiceError::FailedPrecondition(
            "The quiz moved on in the meantime.".into(),
        )),
        TransactionOutcome::Conflicted => Err(conflict("the question index")),
    }
}

/// Snapshot of the quiz for one of its participants.
pub async fn get_quiz_state(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
) -> Result<QuizStateView, ServiceError> {
    let quiz = state.quizzes().await?.get(quiz_id).await?;
    ensure_participant(&quiz, caller)?;

    let usernames = usernames(&state.users().await?, &quiz).await?;
    Ok(QuizStateView::new(quiz_id, quiz, usernames))
}

/// Display name of every participant, in participant order.
pub async fn usernames(
    users: &UserRepository,
    quiz: &QuizSession,
) -> Result<IndexMap<String, String>, ServiceError> {
    let mut usernames = IndexMap::with_capacity(quiz.participants.len());
    for participant in quiz.participants.keys() {
        let name = users.username(participant).await?;
        usernames.insert(
            participant.clone(),
            name.unwrap_or_else(|| ANONYMOUS.to_string()),
        );
    }
    Ok(usernames)
}

/// Mark the quiz ended, then remove it once clients had time to notice.
pub async fn end_quiz(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
) -> Result<(), ServiceError> {
    let quizzes = state.quizzes().await?;
    let quiz = quizzes.get(quiz_id).await?;
    ensure_host(&quiz, caller, "end the quiz")?;

    quizzes
        .update_fields(quiz_id, vec![(field(&["isEnded"])?, Value::Bool(true))])
        .await?;
    schedule_removal(quizzes, quiz_id, state.config().removal_delay);
    info!(quiz_id, "quiz ended");

    state
        .users()
        .await?
        .set_hosting(&caller.user_id, HostingSlot::Quiz, None)
        .await?;
    Ok(())
}

fn schedule_removal(quizzes: QuizRepository, quiz_id: &str, delay: Duration) {
    let quiz_id = quiz_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match quizzes.remove(&quiz_id).await {
            Ok(()) => debug!(quiz_id = %quiz_id, "ended quiz removed"),
            Err(err) => warn!(quiz_id = %quiz_id, error = %err, "failed to remove ended quiz"),
        }
    });
}
