//! Quiz scheduling policy for the auto-quiz variant flow.
//!
//! Session limits are derived once, at session start, from the volume of
//! content the topic carries: larger topics allow longer sessions but quiz
//! more often. The exact curve is a project choice (see DESIGN.md); the
//! requirement is only that both mappings are monotonic and clamped.

use crate::session::{Session, Stage};
use serde::{Deserialize, Serialize};

/// Bounds on the per-topic conversation budget.
pub const MIN_CONVERSATIONS: u32 = 8;
pub const MAX_CONVERSATIONS: u32 = 50;

const MIN_QUIZ_FREQUENCY: u32 = 3;
const MAX_QUIZ_FREQUENCY: u32 = 8;

/// Per-topic session limits computed from content volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicLimits {
    pub max_conversations: u32,
    pub quiz_frequency: u32,
}

impl TopicLimits {
    /// Derives limits from the number of content chunks a topic has.
    ///
    /// `max_conversations` grows with content while `quiz_frequency`
    /// shrinks, so big topics get checked more often. Eight turns per chunk
    /// leaves room for the full explain/check/feedback cycle plus a few side
    /// questions per concept.
    pub fn from_chunk_count(chunks: usize) -> Self {
        let chunks = chunks as u32;
        let max_conversations = (chunks * 8).clamp(MIN_CONVERSATIONS, MAX_CONVERSATIONS);
        let quiz_frequency = (20 / chunks.max(1)).clamp(MIN_QUIZ_FREQUENCY, MAX_QUIZ_FREQUENCY);
        Self {
            max_conversations,
            quiz_frequency,
        }
    }
}

/// Quiz difficulty, chosen from the running average of prior quiz scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizDifficulty {
    Easy,
    Medium,
    Hard,
}

impl QuizDifficulty {
    pub fn from_average(average: Option<f32>) -> Self {
        match average {
            None => Self::Medium,
            Some(avg) if avg < 0.5 => Self::Easy,
            Some(avg) if avg < 0.8 => Self::Medium,
            Some(_) => Self::Hard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

/// Whether this turn should interrupt the flow with an automatic quiz.
pub fn should_auto_quiz(session: &Session) -> bool {
    session.auto_quiz
        && session.quiz_frequency > 0
        && session.total_interactions % session.quiz_frequency == 0
        && session.total_interactions > 2
        && session.stage != Stage::Quiz
        && !session.concepts_learned.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(
            TopicLimits::from_chunk_count(0),
            TopicLimits {
                max_conversations: MIN_CONVERSATIONS,
                quiz_frequency: MAX_QUIZ_FREQUENCY
            }
        );
        assert_eq!(
            TopicLimits::from_chunk_count(100),
            TopicLimits {
                max_conversations: MAX_CONVERSATIONS,
                quiz_frequency: MIN_QUIZ_FREQUENCY
            }
        );
    }

    #[test]
    fn more_content_means_longer_sessions_and_more_frequent_quizzes() {
        let mut prev = TopicLimits::from_chunk_count(1);
        for chunks in 2..40 {
            let next = TopicLimits::from_chunk_count(chunks);
            assert!(next.max_conversations >= prev.max_conversations);
            assert!(next.quiz_frequency <= prev.quiz_frequency);
            prev = next;
        }
    }

    #[test]
    fn difficulty_tracks_quiz_average() {
        assert_eq!(QuizDifficulty::from_average(None), QuizDifficulty::Medium);
        assert_eq!(
            QuizDifficulty::from_average(Some(0.3)),
            QuizDifficulty::Easy
        );
        assert_eq!(
            QuizDifficulty::from_average(Some(0.6)),
            QuizDifficulty::Medium
        );
        assert_eq!(
            QuizDifficulty::from_average(Some(0.9)),
            QuizDifficulty::Hard
        );
    }

    #[test]
    fn auto_quiz_requires_every_trigger_condition() {
        let mut s = Session::new(
            "s-1".to_string(),
            "student-1",
            "Cells",
            TopicLimits {
                max_conversations: 20,
                quiz_frequency: 4,
            },
            true,
        );
        s.stage = Stage::Learning;
        s.total_interactions = 4;
        s.concepts_learned.push("Cell Structure".to_string());
        assert!(should_auto_quiz(&s));

        // Off-cycle turn.
        s.total_interactions = 5;
        assert!(!should_auto_quiz(&s));

        // Too early, even on-cycle.
        s.total_interactions = 0;
        assert!(!should_auto_quiz(&s));

        // Already in a quiz.
        s.total_interactions = 8;
        s.stage = Stage::Quiz;
        assert!(!should_auto_quiz(&s));

        // Nothing covered yet.
        s.stage = Stage::Learning;
        s.concepts_learned.clear();
        assert!(!should_auto_quiz(&s));

        // Variant flow disabled.
        s.concepts_learned.push("Cell Structure".to_string());
        s.auto_quiz = false;
        assert!(!should_auto_quiz(&s));
    }
}
