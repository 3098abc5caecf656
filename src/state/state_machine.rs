use thiserror::Error;

use crate::state::quiz::QuizSession;

/// Phases a quiz moves through.
///
/// The phase is never stored: it is derived from the quiz record on every read, so concurrent
/// clients that see the same record agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizPhase {
    /// Players join and contribute tracks.
    Lobby,
    /// The host is generating questions.
    Generating,
    /// Question `n` is open for answers.
    InProgress(usize),
    /// Every participant answered question `n`; scores are shown until the host advances.
    ShowingScores(usize),
    /// All questions were played.
    Final,
}

/// Events that move a quiz between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizEvent {
    /// Host starts generating questions.
    BeginGeneration,
    /// Generation finished, whether or not questions were stored.
    GenerationFinished,
    /// Host starts the quiz at the first question.
    Start,
    /// The last outstanding answer for the current question arrived.
    AllAnswered,
    /// Host moves on to the next question.
    NextQuestion,
    /// Host moves past the last question.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the quiz was in when the event was received.
    pub from: QuizPhase,
    /// The event that cannot be applied from this phase.
    pub event: QuizEvent,
}

impl QuizPhase {
    /// Derive the phase from a quiz record.
    pub fn derive(quiz: &QuizSession) -> Self {
        if quiz.is_quiz_over {
            return QuizPhase::Final;
        }
        if quiz.started {
            let index = quiz.current_question_index.unwrap_or(0);
            return if quiz.all_answered(index) {
                QuizPhase::ShowingScores(index)
            } else {
                QuizPhase::InProgress(index)
            };
        }
        if quiz.is_generating_questions {
            QuizPhase::Generating
        } else {
            QuizPhase::Lobby
        }
    }

    /// Compute the phase reached by applying `event`, if the transition is valid.
    pub fn compute_transition(self, event: QuizEvent) -> Result<QuizPhase, InvalidTransition> {
        let next = match (self, event) {
            (QuizPhase::Lobby, QuizEvent::BeginGeneration) => QuizPhase::Generating,
            (QuizPhase::Generating, QuizEvent::GenerationFinished) => QuizPhase::Lobby,
            (QuizPhase::Lobby, QuizEvent::Start) => QuizPhase::InProgress(0),
            (QuizPhase::InProgress(index), QuizEvent::AllAnswered) => {
                QuizPhase::ShowingScores(index)
            }
            (QuizPhase::ShowingScores(index), QuizEvent::NextQuestion) => {
                QuizPhase::InProgress(index + 1)
            }
            (QuizPhase::ShowingScores(_), QuizEvent::Finish) => QuizPhase::Final,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::quiz::Question;

    fn quiz_with_guest() -> QuizSession {
        let mut quiz = QuizSession::new("host", 0);
        quiz.participants.insert("guest".into(), true);
        quiz.questions = vec![
            Question {
                question: "q1".into(),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                answer: "a".into(),
            };
            2
        ];
        quiz
    }

    fn answer(quiz: &mut QuizSession, index: usize, user: &str) {
        quiz.answers
            .entry(index.to_string())
            .or_default()
            .insert(user.into(), "a".into());
    }

    #[test]
    fn full_happy_path_through_quiz() {
        let mut phase = QuizPhase::Lobby;
        for (event, expected) in [
            (QuizEvent::BeginGeneration, QuizPhase::Generating),
            (QuizEvent::GenerationFinished, QuizPhase::Lobby),
            (QuizEvent::Start, QuizPhase::InProgress(0)),
            (QuizEvent::AllAnswered, QuizPhase::ShowingScores(0)),
            (QuizEvent::NextQuestion, QuizPhase::InProgress(1)),
            (QuizEvent::AllAnswered, QuizPhase::ShowingScores(1)),
            (QuizEvent::Finish, QuizPhase::Final),
        ] {
            phase = phase.compute_transition(event).unwrap();
            assert_eq!(phase, expected);
        }
    }

    #[test]
    fn cannot_start_while_generating_or_advance_mid_question() {
        let err = QuizPhase::Generating
            .compute_transition(QuizEvent::Start)
            .unwrap_err();
        assert_eq!(err.from, QuizPhase::Generating);

        assert!(
            QuizPhase::InProgress(0)
                .compute_transition(QuizEvent::NextQuestion)
                .is_err()
        );
        assert!(QuizPhase::Final.compute_transition(QuizEvent::Start).is_err());
    }

    #[test]
    fn derive_follows_the_record() {
        let mut quiz = quiz_with_guest();
        assert_eq!(QuizPhase::derive(&quiz), QuizPhase::Lobby);

        quiz.is_generating_questions = true;
        assert_eq!(QuizPhase::derive(&quiz), QuizPhase::Generating);

        quiz.is_generating_questions = false;
        quiz.started = true;
        quiz.current_question_index = Some(0);
        assert_eq!(QuizPhase::derive(&quiz), QuizPhase::InProgress(0));

        answer(&mut quiz, 0, "host");
        assert_eq!(QuizPhase::derive(&quiz), QuizPhase::InProgress(0));
        answer(&mut quiz, 0, "guest");
        assert_eq!(QuizPhase::derive(&quiz), QuizPhase::ShowingScores(0));

        quiz.current_question_index = Some(1);
        assert_eq!(QuizPhase::derive(&quiz), QuizPhase::InProgress(1));

        quiz.is_quiz_over = true;
        quiz.started = false;
        assert_eq!(QuizPhase::derive(&quiz), QuizPhase::Final);
    }
}
