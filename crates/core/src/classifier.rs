//! Answer/intent classification over free-text user input.
//!
//! Every text-to-signal interpretation in the flow lives here: whether the
//! user wants to stop, whether an utterance is a side question, and how well
//! an answer matches the expected understanding. Each operation is a single
//! generation call with a constrained-vocabulary prompt, backed by a
//! deterministic, side-effect-free fallback so a backend outage degrades the
//! experience instead of blocking the flow.

use crate::generation::GenerationService;
use crate::prompts;
use std::sync::Arc;
use tracing::warn;

const END_KEYWORDS: [&str; 5] = ["end", "stop", "finish", "done", "exit"];
const QUESTION_KEYWORDS: [&str; 4] = ["what", "how", "why", "explain"];

/// When the controller is awaiting an answer, replies at most this many
/// words long are treated as answer attempts rather than side questions.
const TERSE_REPLY_WORDS: usize = 8;

pub struct IntentClassifier {
    service: Arc<dyn GenerationService>,
}

impl IntentClassifier {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    /// Whether the user wants to end the session.
    pub async fn wants_to_end(&self, user_text: &str) -> bool {
        let prompt = prompts::end_intent(user_text);
        match self
            .service
            .generate(prompts::CLASSIFIER_INSTRUCTION, &prompt)
            .await
        {
            Ok(reply) => reply.to_uppercase().contains("YES"),
            Err(err) => {
                warn!(error = %err, "end-intent classification failed, using keyword fallback");
                Self::end_intent_fallback(user_text)
            }
        }
    }

    /// Whether the input is a question that needs an educational answer.
    pub async fn is_question(&self, user_text: &str) -> bool {
        if user_text.trim().len() < 3 {
            return false;
        }
        let prompt = prompts::is_question(user_text);
        match self
            .service
            .generate(prompts::CLASSIFIER_INSTRUCTION, &prompt)
            .await
        {
            Ok(reply) => reply.to_uppercase().contains("YES"),
            Err(err) => {
                warn!(error = %err, "question classification failed, using keyword fallback");
                Self::is_question_fallback(user_text)
            }
        }
    }

    /// Scores a free-text answer against the question and content context,
    /// clamped to `[0.0, 1.0]`. Unparseable or failed evaluations score a
    /// neutral 0.5.
    pub async fn score_answer(&self, question: &str, answer: &str, context: &str) -> f32 {
        let prompt = prompts::answer_score(question, answer, context);
        match self
            .service
            .generate(prompts::EVALUATOR_INSTRUCTION, &prompt)
            .await
        {
            Ok(reply) => Self::parse_score(&reply),
            Err(err) => {
                warn!(error = %err, "answer scoring failed, using neutral score");
                0.5
            }
        }
    }

    /// A short reply without a question mark while an answer is pending is
    /// an answer attempt, not a side question.
    pub fn is_terse_reply(text: &str) -> bool {
        !text.contains('?') && text.split_whitespace().count() <= TERSE_REPLY_WORDS
    }

    fn end_intent_fallback(text: &str) -> bool {
        let lower = text.to_lowercase();
        END_KEYWORDS.iter().any(|kw| lower.contains(kw))
    }

    fn is_question_fallback(text: &str) -> bool {
        let lower = text.to_lowercase();
        text.contains('?') || QUESTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
    }

    fn parse_score(reply: &str) -> f32 {
        reply
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .filter(|token| !token.is_empty())
            .find_map(|token| token.parse::<f32>().ok())
            .map(|score| score.clamp(0.0, 1.0))
            .unwrap_or(0.5)
    }
}
