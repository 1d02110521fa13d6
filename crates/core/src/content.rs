//! Contract for the external content store.

use crate::topic::{Passage, SubTopic};
use anyhow::Result;
use async_trait::async_trait;

/// Defines the contract for any source of topic material.
///
/// The controller only ever reads: an ordered sub-topic list to drive the
/// staged explanation flow, and ranked passages to ground answers to side
/// questions. Implementations live outside the core (the service ships a
/// Postgres-backed one).
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Returns the ordered list of sub-topics for a topic. An empty list
    /// means the topic has no study material.
    async fn list_subtopics(&self, topic: &str) -> Result<Vec<SubTopic>>;

    /// Returns up to `limit` passages relevant to a free-text query.
    async fn search(&self, topic: &str, query: &str, limit: usize) -> Result<Vec<Passage>>;
}

/// A `ContentProvider` backed by a fixed in-memory list, for development and
/// integration testing without a database.
pub struct MockContentProvider {
    subtopics: Vec<SubTopic>,
}

impl MockContentProvider {
    pub fn new() -> Self {
        Self::with_subtopics(vec![
            SubTopic::new(
                "Core Definitions",
                "Every topic rests on a handful of definitions. Definitions name the moving parts. Naming the parts makes the rest discussable.",
            ),
            SubTopic::new(
                "How It Works",
                "The mechanism connects the parts. Each part feeds the next in order. The order is what produces the overall behaviour.",
            ),
            SubTopic::new(
                "Worked Example",
                "An example makes the mechanism concrete. Walking through one case end to end shows the parts in motion. The same walk applies to new cases.",
            ),
            SubTopic::new(
                "Common Pitfalls",
                "Most mistakes come from skipping a definition. A skipped definition hides a moving part. Reviewing the definitions usually resolves the confusion.",
            ),
        ])
    }

    pub fn with_subtopics(subtopics: Vec<SubTopic>) -> Self {
        Self { subtopics }
    }
}

impl Default for MockContentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentProvider for MockContentProvider {
    async fn list_subtopics(&self, _topic: &str) -> Result<Vec<SubTopic>> {
        Ok(self.subtopics.clone())
    }

    async fn search(&self, _topic: &str, query: &str, limit: usize) -> Result<Vec<Passage>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<Passage> = self
            .subtopics
            .iter()
            .filter(|st| {
                st.title.to_lowercase().contains(&needle)
                    || st.body.to_lowercase().contains(&needle)
            })
            .map(|st| Passage {
                id: st.title.clone(),
                text: st.body.clone(),
            })
            .collect();
        if hits.is_empty() {
            // Fall back to the front of the list rather than returning nothing.
            hits = self
                .subtopics
                .iter()
                .map(|st| Passage {
                    id: st.title.clone(),
                    text: st.body.clone(),
                })
                .collect();
        }
        hits.truncate(limit);
        Ok(hits)
    }
}
