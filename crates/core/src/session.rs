//! Durable per-learner session state.
//!
//! A `Session` is the unit of persistence for the flow controller: one
//! learner's progress through one topic. The struct is serialized whole into
//! the session store on every processed turn, so everything needed to resume
//! after a process restart lives here. Sub-topic content is deliberately not
//! part of the state; it is re-fetched from the content provider on resume.

use crate::quiz::TopicLimits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of staged explanation messages per sub-topic: definition,
/// mechanism, then example.
pub const EXPLANATION_STEPS: u8 = 3;

/// Minimum answer score for a concept to count as learned.
pub const PASS_THRESHOLD: f32 = 0.6;

/// The phase of the per-session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Intro,
    Learning,
    Question,
    Feedback,
    NextConceptCheck,
    Quiz,
    Complete,
}

impl Stage {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Learning => "learning",
            Self::Question => "question",
            Self::Feedback => "feedback",
            Self::NextConceptCheck => "next-concept-check",
            Self::Quiz => "quiz",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One learner's durable progress through one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub student_id: String,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_complete: bool,
    pub stage: Stage,
    /// 0-based cursor into the ordered sub-topic list. Always in
    /// `[0, subtopic_count]`; reaching the count implies `is_complete`.
    pub subtopic_index: usize,
    /// Position within the current sub-topic's staged explanation,
    /// `0..=EXPLANATION_STEPS`.
    pub explanation_step: u8,
    pub waiting_for_answer: bool,
    pub current_question: Option<String>,
    /// Titles of sub-topics passed so far. Append-only, no duplicates.
    pub concepts_learned: Vec<String>,
    /// One score in `[0.0, 1.0]` per evaluated answer. Append-only.
    pub concept_scores: Vec<f32>,
    /// One score per graded quiz, kept apart from concept scores so quiz
    /// difficulty selection only looks at quiz history.
    pub quiz_scores: Vec<f32>,
    pub total_interactions: u32,
    pub auto_quiz: bool,
    pub quiz_frequency: u32,
    pub max_conversations: u32,
}

impl Session {
    pub fn new(
        session_id: String,
        student_id: &str,
        topic: &str,
        limits: TopicLimits,
        auto_quiz: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            student_id: student_id.to_string(),
            topic: topic.to_string(),
            started_at: now,
            updated_at: now,
            is_complete: false,
            stage: Stage::Intro,
            subtopic_index: 0,
            explanation_step: 0,
            waiting_for_answer: false,
            current_question: None,
            concepts_learned: Vec::new(),
            concept_scores: Vec::new(),
            quiz_scores: Vec::new(),
            total_interactions: 0,
            auto_quiz,
            quiz_frequency: limits.quiz_frequency,
            max_conversations: limits.max_conversations,
        }
    }

    /// Records a freshly asked comprehension question. Keeps
    /// `waiting_for_answer` and `current_question` in lockstep.
    pub fn ask_question(&mut self, question: String) {
        self.stage = Stage::Question;
        self.current_question = Some(question);
        self.waiting_for_answer = true;
    }

    /// Takes the pending question, clearing `waiting_for_answer` and
    /// `current_question` in the same step.
    pub fn resolve_answer(&mut self) -> Option<String> {
        self.waiting_for_answer = false;
        self.current_question.take()
    }

    pub fn mark_learned(&mut self, title: &str) {
        if !self.concepts_learned.iter().any(|c| c == title) {
            self.concepts_learned.push(title.to_string());
        }
    }

    /// Moves the session to its terminal state. One-way.
    pub fn complete(&mut self) {
        self.is_complete = true;
        self.stage = Stage::Complete;
        self.waiting_for_answer = false;
        self.current_question = None;
    }

    /// Average over all recorded scores, concept checks and quizzes alike.
    pub fn average_score(&self) -> f32 {
        let (sum, n) = self
            .concept_scores
            .iter()
            .chain(self.quiz_scores.iter())
            .fold((0.0f32, 0u32), |(s, n), v| (s + v, n + 1));
        if n == 0 { 0.0 } else { sum / n as f32 }
    }

    pub fn average_quiz_score(&self) -> Option<f32> {
        if self.quiz_scores.is_empty() {
            None
        } else {
            Some(self.quiz_scores.iter().sum::<f32>() / self.quiz_scores.len() as f32)
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            total_interactions: self.total_interactions,
            concepts_learned: self.concepts_learned.len(),
            quizzes_taken: self.quiz_scores.len(),
            average_score: self.average_score(),
            duration_minutes: (Utc::now() - self.started_at).num_seconds() as f64 / 60.0,
        }
    }
}

/// Summary statistics computed when a session completes.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_interactions: u32,
    pub concepts_learned: usize,
    pub quizzes_taken: usize,
    pub average_score: f32,
    pub duration_minutes: f64,
}

/// One request/response exchange, appended to the session history and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn: u32,
    pub user_text: Option<String>,
    pub assistant_text: String,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
}
