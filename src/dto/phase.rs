use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::QuizPhase;

/// Quiz phase as exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleQuizPhase {
    /// Players join and contribute tracks.
    Lobby,
    /// Questions are being generated.
    Generating,
    /// The current question is open for answers.
    InProgress,
    /// Everyone answered; scores are shown.
    ShowingScores,
    /// Quiz finished.
    Final,
}

impl From<QuizPhase> for VisibleQuizPhase {
    fn from(value: QuizPhase) -> Self {
        match value {
            QuizPhase::Lobby => VisibleQuizPhase::Lobby,
            QuizPhase::Generating => VisibleQuizPhase::Generating,
            QuizPhase::InProgress(_) => VisibleQuizPhase::InProgress,
            QuizPhase::ShowingScores(_) => VisibleQuizPhase::ShowingScores,
            QuizPhase::Final => VisibleQuizPhase::Final,
        }
    }
}

/// Phase together with the question it refers to, when any.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizPhaseSnapshot {
    pub phase: VisibleQuizPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
}

impl From<QuizPhase> for QuizPhaseSnapshot {
    fn from(value: QuizPhase) -> Self {
        let question_index = match value {
            QuizPhase::InProgress(index) | QuizPhase::ShowingScores(index) => Some(index),
            _ => None,
        };
        Self {
            phase: value.into(),
            question_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn snapshot_carries_the_question_only_while_playing() {
        let showing = QuizPhaseSnapshot::from(QuizPhase::ShowingScores(2));
        assert_eq!(
            serde_json::to_value(showing).unwrap(),
            json!({"phase": "showing_scores", "questionIndex": 2})
        );
        assert_eq!(
            serde_json::to_value(QuizPhaseSnapshot::from(QuizPhase::Lobby)).unwrap(),
            json!({"phase": "lobby"})
        );
    }
}
