use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{
        phase::QuizPhaseSnapshot,
        validation::{validate_non_blank, validate_record_key},
    },
    state::{
        quiz::{Question, QuizSession, winners},
        state_machine::QuizPhase,
    },
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizResponse {
    pub quiz_id: String,
}

/// Track ids a participant contributes for question generation.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SetTracksRequest {
    #[validate(custom(function = "validate_record_key"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "at least one track is required"))]
    pub track_ids: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetGeneratingRequest {
    pub status: bool,
}

/// Question as submitted by the generator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct QuestionInput {
    #[validate(custom(function = "validate_non_blank"))]
    pub question: String,
    #[validate(length(equal = 4, message = "a question needs exactly four options"))]
    pub options: Vec<String>,
    #[validate(custom(function = "validate_non_blank"))]
    pub answer: String,
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            question: value.question,
            options: value.options,
            answer: value.answer,
        }
    }
}

impl From<Question> for QuestionInput {
    fn from(value: Question) -> Self {
        Self {
            question: value.question,
            options: value.options,
            answer: value.answer,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct StoreQuestionsRequest {
    #[validate(length(min = 1, message = "at least one question is required"), nested)]
    pub questions: Vec<QuestionInput>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub question_index: usize,
    #[validate(custom(function = "validate_non_blank"))]
    pub option: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    pub success: bool,
    pub is_correct: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceQuestionRequest {
    pub new_index: usize,
}

/// Full quiz snapshot served to participants.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuizStateView {
    pub id: String,
    pub host_user_id: String,
    pub participants: Vec<String>,
    /// Display name per participant, in participant order.
    #[schema(value_type = Object)]
    pub usernames: IndexMap<String, String>,
    pub started: bool,
    pub is_generating_questions: bool,
    pub questions: Vec<QuestionInput>,
    pub current_question_index: Option<usize>,
    /// Option picked by each user for the current question.
    pub current_question_answers: BTreeMap<String, String>,
    pub answers: BTreeMap<String, BTreeMap<String, String>>,
    pub scores: BTreeMap<String, u32>,
    pub isrcs: BTreeMap<String, Vec<String>>,
    pub is_quiz_over: bool,
    pub is_ended: bool,
    pub phase: QuizPhaseSnapshot,
    /// Users sharing the top score; only present once the quiz is over.
    pub winners: Option<Vec<String>>,
}

impl QuizStateView {
    pub fn new(id: &str, quiz: QuizSession, usernames: IndexMap<String, String>) -> Self {
        let phase = QuizPhase::derive(&quiz);
        let current_question_answers = quiz
            .current_question_index
            .and_then(|index| quiz.answers_for(index).cloned())
            .unwrap_or_default();
        let mut scores = quiz.scores;
        for participant in quiz.participants.keys() {
            scores.entry(participant.clone()).or_insert(0);
        }
        let winners = quiz.is_quiz_over.then(|| winners(&scores));

        Self {
            id: id.to_string(),
            host_user_id: quiz.host_user_id,
            participants: quiz.participants.into_keys().collect(),
            usernames,
            started: quiz.started,
            is_generating_questions: quiz.is_generating_questions,
            questions: quiz.questions.into_iter().map(Into::into).collect(),
            current_question_index: quiz.current_question_index,
            current_question_answers,
            answers: quiz.answers,
            scores,
            isrcs: quiz.isrcs,
            is_quiz_over: quiz.is_quiz_over,
            is_ended: quiz.is_ended,
            phase: phase.into(),
            winners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question_input() -> QuestionInput {
        QuestionInput {
            question: "Who sang it?".into(),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            answer: "B".into(),
        }
    }

    #[test]
    fn test_validate_store_questions_request() {
        let request = StoreQuestionsRequest {
            questions: vec![question_input()],
        };
        assert!(request.validate().is_ok());

        let mut short = question_input();
        short.options.pop();
        let request = StoreQuestionsRequest {
            questions: vec![short],
        };
        assert!(request.validate().is_err());

        let request = StoreQuestionsRequest { questions: vec![] };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_set_tracks_request() {
        let request = SetTracksRequest {
            user_id: "u1".into(),
            track_ids: vec!["isrc1".into()],
        };
        assert!(request.validate().is_ok());

        let request = SetTracksRequest {
            user_id: "u/1".into(),
            track_ids: vec!["isrc1".into()],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn view_exposes_winners_only_when_over() {
        let mut quiz = QuizSession::new("host", 0);
        quiz.scores.insert("host".into(), 2);
        let view = QuizStateView::new("q1", quiz.clone(), IndexMap::new());
        assert_eq!(view.winners, None);

        quiz.is_quiz_over = true;
        let view = QuizStateView::new("q1", quiz, IndexMap::new());
        assert_eq!(view.winners, Some(vec!["host".to_string()]));
        assert_eq!(view.phase, QuizPhase::Final.into());
    }

    #[test]
    fn participants_without_points_score_zero() {
        let mut quiz = QuizSession::new("host", 0);
        quiz.participants.insert("guest".into(), true);
        quiz.scores.clear();
        quiz.is_quiz_over = true;

        let view = QuizStateView::new("q1", quiz, IndexMap::new());
        assert_eq!(view.scores.get("guest"), Some(&0));
        assert_eq!(view.winners, Some(vec!["guest".to_string(), "host".to_string()]));
    }
}
