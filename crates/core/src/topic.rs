use serde::{Deserialize, Serialize};

/// One content unit within a topic, supplied by the content provider.
///
/// Sub-topics are immutable from the controller's point of view. They are
/// fetched fresh on session start and again on resume, and are never
/// persisted with the session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTopic {
    pub title: String,
    pub body: String,
}

impl SubTopic {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Returns the slice of the body text covered by explanation step
    /// `step` out of `of`, split on sentence boundaries.
    pub fn fragment(&self, step: u8, of: u8) -> String {
        let sentences: Vec<&str> = self
            .body
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if sentences.is_empty() {
            return self.body.clone();
        }
        let of = of.max(1) as usize;
        let step = (step.max(1) as usize).min(of);
        let per = sentences.len().div_ceil(of);
        let start = (step - 1) * per;
        if start >= sentences.len() {
            // Fewer sentences than steps; repeat the tail rather than go silent.
            return sentences[sentences.len() - 1].to_string();
        }
        sentences[start..(start + per).min(sentences.len())].join(" ")
    }
}

/// A ranked search hit from the content provider, used to ground answers to
/// side questions. The `id` feeds the `sources` field of replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
}
