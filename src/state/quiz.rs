//! Quiz record stored under `quizzes/{id}`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::dao::repository::Record;

/// Number of options every question offers.
pub const OPTIONS_PER_QUESTION: usize = 4;

/// One multiple-choice question. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

impl Question {
    /// Check the shape of a question before it is stored.
    pub fn check(&self) -> Result<(), &'static str> {
        if self.question.trim().is_empty() {
            return Err("question text is empty");
        }
        if self.options.len() != OPTIONS_PER_QUESTION {
            return Err("a question needs exactly four options");
        }
        if self.options.iter().any(|option| option.trim().is_empty()) {
            return Err("options must not be empty");
        }
        let distinct: HashSet<&str> = self.options.iter().map(String::as_str).collect();
        if distinct.len() != self.options.len() {
            return Err("options must be distinct");
        }
        if !self.options.contains(&self.answer) {
            return Err("the answer must be one of the options");
        }
        Ok(())
    }

    pub fn offers(&self, option: &str) -> bool {
        self.options.iter().any(|candidate| candidate == option)
    }
}

/// Multiplayer quiz owned by a host.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    pub host_user_id: String,
    #[serde(default)]
    pub participants: BTreeMap<String, bool>,
    pub created_at: i64,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub is_generating_questions: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub current_question_index: Option<usize>,
    /// Selected option per question index, then per user.
    #[serde(default)]
    pub answers: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub scores: BTreeMap<String, u32>,
    /// Track ids each participant contributed for question generation.
    #[serde(default)]
    pub isrcs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub is_quiz_over: bool,
    #[serde(default)]
    pub is_ended: bool,
}

impl Record for QuizSession {
    const COLLECTION: &'static str = "quizzes";
}

impl QuizSession {
    pub fn new(host_user_id: &str, created_at: i64) -> Self {
        Self {
            host_user_id: host_user_id.to_string(),
            participants: BTreeMap::from([(host_user_id.to_string(), true)]),
            created_at,
            started: false,
            is_generating_questions: false,
            questions: Vec::new(),
            current_question_index: None,
            answers: BTreeMap::new(),
            scores: BTreeMap::from([(host_user_id.to_string(), 0)]),
            isrcs: BTreeMap::new(),
            is_quiz_over: false,
            is_ended: false,
        }
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_user_id == user_id
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.contains_key(user_id)
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Answers recorded for question `index`.
    pub fn answers_for(&self, index: usize) -> Option<&BTreeMap<String, String>> {
        self.answers.get(&index.to_string())
    }

    /// Whether every participant has answered question `index`.
    pub fn all_answered(&self, index: usize) -> bool {
        let Some(answers) = self.answers_for(index) else {
            return false;
        };
        !self.participants.is_empty()
            && self
                .participants
                .keys()
                .all(|participant| answers.contains_key(participant))
    }

    pub fn score_of(&self, user_id: &str) -> u32 {
        self.scores.get(user_id).copied().unwrap_or(0)
    }
}

/// Every user sharing the highest score, including a tie at zero. Empty without scores.
pub fn winners(scores: &BTreeMap<String, u32>) -> Vec<String> {
    let Some(best) = scores.values().copied().max() else {
        return Vec::new();
    };
    scores
        .iter()
        .filter(|(_, score)| **score == best)
        .map(|(user, _)| user.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Question {
        Question {
            question: "Who sang it?".into(),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            answer: "C".into(),
        }
    }

    #[test]
    fn question_shape_is_checked() {
        assert!(question().check().is_ok());

        let mut missing_answer = question();
        missing_answer.answer = "E".into();
        assert!(missing_answer.check().is_err());

        let mut duplicate = question();
        duplicate.options[1] = "A".into();
        assert!(duplicate.check().is_err());

        let mut three = question();
        three.options.pop();
        assert!(three.check().is_err());
    }

    #[test]
    fn all_answered_needs_every_participant() {
        let mut quiz = QuizSession::new("host", 0);
        quiz.participants.insert("guest".into(), true);
        assert!(!quiz.all_answered(0));

        quiz.answers
            .entry("0".into())
            .or_default()
            .insert("host".into(), "A".into());
        assert!(!quiz.all_answered(0));

        quiz.answers
            .entry("0".into())
            .or_default()
            .insert("guest".into(), "B".into());
        assert!(quiz.all_answered(0));
        assert!(!quiz.all_answered(1));
    }

    #[test]
    fn winners_include_every_tied_leader() {
        let scores = BTreeMap::from([
            ("a".to_string(), 2),
            ("b".to_string(), 3),
            ("c".to_string(), 3),
        ]);
        assert_eq!(winners(&scores), ["b", "c"]);
        let nobody_scored = BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 0)]);
        assert_eq!(winners(&nobody_scored), ["a", "b"]);
        assert!(winners(&BTreeMap::new()).is_empty());
    }
}
