//! The session flow controller.
//!
//! Owns the per-session state machine and decides, for every incoming turn,
//! which of the possible actions to take: keep explaining, ask a
//! comprehension question, grade an answer, field a side question, trigger a
//! quiz, or end the session. The controller talks to three collaborators
//! through trait objects: the content provider for material, the generation
//! service for replies and classification signals, and the session store for
//! durability.
//!
//! Concurrency model: the in-memory session cache is the only shared mutable
//! resource. The outer map lock is held just long enough to fetch or insert
//! an entry; the per-session lock is held for the whole turn, so turns for
//! one session are serialized in arrival order while unrelated sessions
//! proceed in parallel. State is persisted only after the reply is fully
//! computed, so an abandoned turn never leaves a torn record behind.

use crate::{
    classifier::IntentClassifier,
    content::ContentProvider,
    error::FlowError,
    generation::GenerationService,
    prompts,
    quiz::{self, QuizDifficulty, TopicLimits},
    session::{EXPLANATION_STEPS, PASS_THRESHOLD, Session, Stage, Turn},
    store::SessionStore,
    topic::SubTopic,
};
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of one processed turn, returned to the transport layer.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub reply: String,
    pub topic: String,
    pub session_id: String,
    pub stage: Stage,
    pub is_complete: bool,
    pub interaction_count: u32,
    pub sources: Vec<String>,
    pub session_summary: Option<String>,
}

/// Lightweight view of a session's current state, for transports attaching
/// to an existing session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub topic: String,
    pub stage: Stage,
    pub is_complete: bool,
    pub interaction_count: u32,
}

/// Cached per-session state: the durable session plus the sub-topic list,
/// which is fetched fresh on start and on resume rather than persisted.
struct SessionEntry {
    session: Session,
    subtopics: Vec<SubTopic>,
}

type RoutedReply = (String, Vec<String>, Option<String>);

pub struct FlowController {
    content: Arc<dyn ContentProvider>,
    generation: Arc<dyn GenerationService>,
    store: Arc<dyn SessionStore>,
    classifier: IntentClassifier,
    /// Enables the automatic quiz variant flow for newly started sessions.
    auto_quiz: bool,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionEntry>>>>,
}

impl FlowController {
    pub fn new(
        content: Arc<dyn ContentProvider>,
        generation: Arc<dyn GenerationService>,
        store: Arc<dyn SessionStore>,
        auto_quiz: bool,
    ) -> Self {
        let classifier = IntentClassifier::new(generation.clone());
        Self {
            content,
            generation,
            store,
            classifier,
            auto_quiz,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a new session for a topic, generating a session id when the
    /// caller does not supply one. A topic without study material completes
    /// immediately with an explanatory message.
    pub async fn start_session(
        &self,
        topic: &str,
        student_id: &str,
        session_id: Option<String>,
    ) -> Result<TurnOutput, FlowError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let subtopics = match self.load_subtopics(topic).await {
            Ok(list) => list,
            Err(err) => {
                info!(%topic, %err, "completing session at start");
                Vec::new()
            }
        };

        let limits = TopicLimits::from_chunk_count(subtopics.len());
        let mut session = Session::new(session_id.clone(), student_id, topic, limits, self.auto_quiz);
        info!(
            %session_id,
            %topic,
            subtopics = subtopics.len(),
            max_conversations = limits.max_conversations,
            quiz_frequency = limits.quiz_frequency,
            "starting revision session"
        );

        let (reply, sources) = if subtopics.is_empty() {
            (Self::no_content_reply(&mut session), Vec::new())
        } else {
            let fallback = format!(
                "Welcome! Today we are revising \"{}\" across {} concepts, one small step at a time. Ready to start with the first concept?",
                topic,
                subtopics.len()
            );
            let intro = self
                .generate_or(prompts::topic_introduction(topic, subtopics.len()), fallback)
                .await;
            let sources = subtopics.iter().map(|st| st.title.clone()).collect();
            (intro, sources)
        };

        let turn = Turn {
            turn: 0,
            user_text: None,
            assistant_text: reply.clone(),
            stage: session.stage,
            timestamp: Utc::now(),
        };
        self.persist(&session, &turn).await;

        let output = Self::output(&session, reply, sources, None);
        self.sessions
            .lock()
            .await
            .insert(session_id, Arc::new(Mutex::new(SessionEntry { session, subtopics })));
        Ok(output)
    }

    /// Processes one turn for an existing session, routing the optional user
    /// text to the correct transition.
    pub async fn process_turn(
        &self,
        session_id: &str,
        user_text: Option<&str>,
    ) -> Result<TurnOutput, FlowError> {
        let entry = self.entry(session_id).await?;
        let mut entry = entry.lock().await;
        let SessionEntry { session, subtopics } = &mut *entry;

        if session.is_complete {
            // Terminal sessions tolerate further queries as no-ops.
            let summary = Self::summary_text(session);
            return Ok(Self::output(session, summary.clone(), Vec::new(), Some(summary)));
        }

        session.total_interactions += 1;
        session.updated_at = Utc::now();

        let trimmed = user_text.map(str::trim).filter(|t| !t.is_empty());
        let (reply, sources, summary) = self.route_turn(session, subtopics.as_slice(), trimmed).await;

        let turn = Turn {
            turn: session.total_interactions,
            user_text: trimmed.map(str::to_string),
            assistant_text: reply.clone(),
            stage: session.stage,
            timestamp: Utc::now(),
        };
        self.persist(session, &turn).await;

        Ok(Self::output(session, reply, sources, summary))
    }

    /// Current state of a session without processing a turn.
    pub async fn session_snapshot(&self, session_id: &str) -> Result<SessionSnapshot, FlowError> {
        let entry = self.entry(session_id).await?;
        let entry = entry.lock().await;
        Ok(SessionSnapshot {
            session_id: entry.session.session_id.clone(),
            topic: entry.session.topic.clone(),
            stage: entry.session.stage,
            is_complete: entry.session.is_complete,
            interaction_count: entry.session.total_interactions,
        })
    }

    /// Routes one turn through the transition table, in priority order.
    async fn route_turn(
        &self,
        session: &mut Session,
        subtopics: &[SubTopic],
        user_text: Option<&str>,
    ) -> RoutedReply {
        // 1. End intent wins over everything so the exit path is always
        //    available, whatever state the session is in.
        if let Some(text) = user_text {
            if self.classifier.wants_to_end(text).await {
                info!(session_id = %session.session_id, "end intent detected");
                let summary = Self::finish(session);
                return (summary.clone(), Vec::new(), Some(summary));
            }
        }

        // Conversation budget derived from the topic's content volume.
        if session.total_interactions >= session.max_conversations {
            info!(
                session_id = %session.session_id,
                max_conversations = session.max_conversations,
                "conversation budget exhausted"
            );
            let summary = Self::finish(session);
            return (summary.clone(), Vec::new(), Some(summary));
        }

        // 2. Side questions interrupt, get answered from retrieved content,
        //    and return to the interrupted stage. A short, terse reply while
        //    an answer is pending is an answer attempt, not a question.
        if let Some(text) = user_text {
            let answer_attempt = session.waiting_for_answer && IntentClassifier::is_terse_reply(text);
            if !answer_attempt && self.classifier.is_question(text).await {
                return self.answer_user_question(session, text).await;
            }
        }

        // 3. A pending comprehension question claims the user text as its
        //    answer.
        if session.waiting_for_answer {
            match user_text {
                Some(text) => return self.evaluate_answer(session, subtopics, text).await,
                None => {
                    let question = session.current_question.clone().unwrap_or_default();
                    return (
                        format!("No rush! Whenever you're ready: {question}"),
                        Vec::new(),
                        None,
                    );
                }
            }
        }

        // Variant flow: grade a quiz in progress, or trigger a new one.
        if session.stage == Stage::Quiz {
            return self.evaluate_quiz(session, user_text).await;
        }
        if quiz::should_auto_quiz(session) {
            return self.generate_quiz(session).await;
        }

        // 4.-6. Stage table.
        match session.stage {
            Stage::Intro => self.begin_learning(session, subtopics).await,
            Stage::Learning => self.continue_learning(session, subtopics).await,
            // The answer flag was lost somewhere; re-ask rather than regress
            // to the explanation steps.
            Stage::Question => self.ask_check_question(session, subtopics).await,
            Stage::Feedback | Stage::NextConceptCheck => {
                self.advance_concept(session, subtopics).await
            }
            Stage::Quiz | Stage::Complete => {
                // Quiz is handled above and Complete short-circuits in
                // process_turn; keep the summary reply as a safety net.
                let summary = Self::summary_text(session);
                (summary.clone(), Vec::new(), Some(summary))
            }
        }
    }

    /// Answers a side question from retrieved passages without touching the
    /// session's stage, so the flow resumes exactly where it was.
    async fn answer_user_question(&self, session: &mut Session, text: &str) -> RoutedReply {
        let passages = match self.content.search(&session.topic, text, 3).await {
            Ok(passages) => passages,
            Err(err) => {
                warn!(session_id = %session.session_id, error = %err, "content search failed");
                Vec::new()
            }
        };
        let context = passages
            .iter()
            .map(|p| prompts::excerpt(&p.text, 300))
            .collect::<Vec<_>>()
            .join("\n");
        let fallback = if context.is_empty() {
            format!(
                "Good question! I don't have material on that to hand, but let's keep it in mind as we revise {}. Ready to continue learning?",
                session.topic
            )
        } else {
            format!(
                "Good question! From the material: {} Does that help? Ready to continue learning?",
                prompts::excerpt(&context, 300)
            )
        };
        let reply = self
            .generate_or(prompts::user_question_response(text, &context), fallback)
            .await;
        let sources = passages.into_iter().map(|p| p.id).collect();
        (reply, sources, None)
    }

    /// Grades the answer to the pending comprehension question and moves the
    /// session to feedback.
    async fn evaluate_answer(
        &self,
        session: &mut Session,
        subtopics: &[SubTopic],
        text: &str,
    ) -> RoutedReply {
        let question = session.resolve_answer().unwrap_or_default();
        let concept = subtopics.get(session.subtopic_index);
        let concept_title = concept
            .map(|st| st.title.clone())
            .unwrap_or_else(|| session.topic.clone());
        let context = concept.map(|st| st.body.as_str()).unwrap_or_default();

        let score = self.classifier.score_answer(&question, text, context).await;
        session.concept_scores.push(score);
        let passed = score >= PASS_THRESHOLD;
        if passed {
            session.mark_learned(&concept_title);
        }
        session.stage = Stage::Feedback;
        info!(
            session_id = %session.session_id,
            concept = %concept_title,
            score,
            passed,
            "answer evaluated"
        );

        let fallback = if passed {
            format!("Nice work, that's right about {concept_title}. Great! Let's move to the next concept.")
        } else {
            format!("Close! Have another look at {concept_title} as we go. No worries! Let's continue to the next concept.")
        };
        let reply = self
            .generate_or(prompts::answer_feedback(text, passed, &concept_title), fallback)
            .await;
        (reply, Vec::new(), None)
    }

    /// First transition out of the intro: enter learning and deliver the
    /// first explanation step.
    async fn begin_learning(&self, session: &mut Session, subtopics: &[SubTopic]) -> RoutedReply {
        if subtopics.get(session.subtopic_index).is_none() {
            return (Self::no_content_reply(session), Vec::new(), None);
        }
        session.stage = Stage::Learning;
        session.explanation_step = 0;
        self.explain_step(session, subtopics).await
    }

    /// Advances the staged explanation, switching to a comprehension
    /// question once all steps are delivered.
    async fn continue_learning(&self, session: &mut Session, subtopics: &[SubTopic]) -> RoutedReply {
        if subtopics.get(session.subtopic_index).is_none() {
            return (Self::no_content_reply(session), Vec::new(), None);
        }
        if session.explanation_step < EXPLANATION_STEPS {
            self.explain_step(session, subtopics).await
        } else {
            self.ask_check_question(session, subtopics).await
        }
    }

    async fn explain_step(&self, session: &mut Session, subtopics: &[SubTopic]) -> RoutedReply {
        let Some(st) = subtopics.get(session.subtopic_index) else {
            return (Self::no_content_reply(session), Vec::new(), None);
        };
        session.explanation_step += 1;
        let step = session.explanation_step;
        let fallback = format!(
            "{} ({}, step {} of {}): {}",
            st.title,
            session.topic,
            step,
            EXPLANATION_STEPS,
            st.fragment(step, EXPLANATION_STEPS)
        );
        let reply = self
            .generate_or(
                prompts::step_explanation(&st.title, &st.body, step, EXPLANATION_STEPS),
                fallback,
            )
            .await;
        (reply, vec![st.title.clone()], None)
    }

    async fn ask_check_question(&self, session: &mut Session, subtopics: &[SubTopic]) -> RoutedReply {
        let Some(st) = subtopics.get(session.subtopic_index) else {
            return (Self::no_content_reply(session), Vec::new(), None);
        };
        let fallback = format!("Quick check: in your own words, what is {}?", st.title);
        let question = self
            .generate_or(prompts::check_question(&st.title, &st.body), fallback)
            .await;
        session.ask_question(question.clone());
        (question, vec![st.title.clone()], None)
    }

    /// Post-feedback advance, through the next-concept-check decision point:
    /// either introduce the next concept or complete the session. The
    /// decision resolves within the turn, so sessions never rest here.
    async fn advance_concept(&self, session: &mut Session, subtopics: &[SubTopic]) -> RoutedReply {
        // A feedback stage with no recorded score for the current concept
        // (e.g. a resume race) counts as an evaluation of 0.0.
        if session.concept_scores.len() <= session.subtopic_index {
            warn!(
                session_id = %session.session_id,
                subtopic_index = session.subtopic_index,
                "missing score record at feedback, recording 0.0"
            );
            session.concept_scores.push(0.0);
        }

        session.stage = Stage::NextConceptCheck;
        session.subtopic_index += 1;
        match subtopics.get(session.subtopic_index) {
            None => {
                let summary = Self::finish(session);
                (summary.clone(), Vec::new(), Some(summary))
            }
            Some(next) => {
                session.explanation_step = 0;
                session.stage = Stage::Learning;
                let progress =
                    format!("{} of {} concepts done", session.subtopic_index, subtopics.len());
                let fallback = format!("Now let's learn about {}.", next.title);
                let reply = self
                    .generate_or(prompts::next_concept_transition(&next.title, &progress), fallback)
                    .await;
                (reply, vec![next.title.clone()], None)
            }
        }
    }

    /// Interrupts the flow with an automatic quiz over recently learned
    /// concepts, at a difficulty chosen from prior quiz performance.
    async fn generate_quiz(&self, session: &mut Session) -> RoutedReply {
        let difficulty = QuizDifficulty::from_average(session.average_quiz_score());
        let recent: Vec<String> = session
            .concepts_learned
            .iter()
            .rev()
            .take(3)
            .rev()
            .cloned()
            .collect();
        let concepts = if recent.is_empty() {
            vec![session.topic.clone()]
        } else {
            recent
        };
        session.stage = Stage::Quiz;
        info!(
            session_id = %session.session_id,
            difficulty = difficulty.as_str(),
            "triggering automatic quiz"
        );
        let fallback = format!(
            "Quiz time! In a few sentences each, explain: {}.",
            concepts.join(", ")
        );
        let reply = self
            .generate_or(
                prompts::auto_quiz(&session.topic, &concepts, difficulty.as_str()),
                fallback,
            )
            .await;
        (reply, Vec::new(), None)
    }

    /// Grades submitted quiz answers. Poor performance routes to a remedial
    /// feedback stage, otherwise straight back to learning.
    async fn evaluate_quiz(&self, session: &mut Session, user_text: Option<&str>) -> RoutedReply {
        let Some(text) = user_text else {
            return (
                "Take your time! Send your quiz answers whenever you're ready.".to_string(),
                Vec::new(),
                None,
            );
        };
        let question = format!("A short quiz about {}", session.topic);
        let score = self.classifier.score_answer(&question, text, "").await;
        session.quiz_scores.push(score);
        let remedial = score <= 0.5;
        session.stage = if remedial { Stage::Feedback } else { Stage::Learning };
        info!(session_id = %session.session_id, score, remedial, "quiz graded");

        let fallback = if remedial {
            "Good effort! Let's slow down and revisit the tricky parts before moving on.".to_string()
        } else {
            "Well done on the quiz! Let's keep going.".to_string()
        };
        let reply = self
            .generate_or(prompts::quiz_feedback(text, &session.topic, remedial), fallback)
            .await;
        (reply, Vec::new(), None)
    }

    /// Fetches the sub-topic list, treating an empty result as missing
    /// content.
    async fn load_subtopics(&self, topic: &str) -> Result<Vec<SubTopic>, FlowError> {
        let subtopics = self.content.list_subtopics(topic).await.map_err(|err| {
            warn!(%topic, error = %err, "content provider failed listing subtopics");
            FlowError::ContentUnavailable(topic.to_string())
        })?;
        if subtopics.is_empty() {
            return Err(FlowError::ContentUnavailable(topic.to_string()));
        }
        Ok(subtopics)
    }

    /// Returns the cached entry for a session, restoring it from the store
    /// (and re-fetching content) on a cold cache.
    async fn entry(&self, session_id: &str) -> Result<Arc<Mutex<SessionEntry>>, FlowError> {
        if let Some(entry) = self.sessions.lock().await.get(session_id) {
            return Ok(entry.clone());
        }

        let session = self
            .store
            .load_session(session_id)
            .await
            .map_err(FlowError::PersistenceFailure)?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;
        info!(%session_id, topic = %session.topic, "restored session from store");
        let subtopics = self.load_subtopics(&session.topic).await.unwrap_or_default();

        let entry = Arc::new(Mutex::new(SessionEntry { session, subtopics }));
        let mut cache = self.sessions.lock().await;
        // Another turn may have restored the same session concurrently; the
        // first inserted entry wins.
        Ok(cache.entry(session_id.to_string()).or_insert(entry).clone())
    }

    /// Generates a tutoring reply, degrading to the deterministic fallback
    /// when the backend fails, times out, or returns nothing.
    async fn generate_or(&self, prompt: String, fallback: String) -> String {
        match self.generation.generate(prompts::TUTOR_INSTRUCTION, &prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => fallback,
            Err(err) => {
                warn!(error = %err, "generation service failure, using fallback reply");
                fallback
            }
        }
    }

    /// Write-through persistence of the turn and the full session state.
    /// Failures are logged; the in-memory state stays authoritative and the
    /// next turn retries the full upsert.
    async fn persist(&self, session: &Session, turn: &Turn) {
        if let Err(err) = self.store.upsert_session(session).await {
            warn!(
                session_id = %session.session_id,
                error = %FlowError::PersistenceFailure(err),
                "failed to persist session state"
            );
        }
        if let Err(err) = self.store.append_turn(&session.session_id, turn).await {
            warn!(
                session_id = %session.session_id,
                error = %FlowError::PersistenceFailure(err),
                "failed to persist conversation turn"
            );
        }
    }

    fn finish(session: &mut Session) -> String {
        session.complete();
        Self::summary_text(session)
    }

    fn summary_text(session: &Session) -> String {
        let stats = session.stats();
        format!(
            "Excellent work! You completed your revision of {} with {} interactions. You learned {} concepts with an average score of {:.0}% over {:.1} minutes. Keep up the great learning!",
            session.topic,
            stats.total_interactions,
            stats.concepts_learned,
            stats.average_score * 100.0,
            stats.duration_minutes
        )
    }

    fn no_content_reply(session: &mut Session) -> String {
        warn!(
            session_id = %session.session_id,
            topic = %session.topic,
            "no study material available, completing session"
        );
        session.complete();
        format!(
            "There is no study material available for \"{}\" yet. Please pick another topic and start a new session.",
            session.topic
        )
    }

    fn output(
        session: &Session,
        reply: String,
        sources: Vec<String>,
        session_summary: Option<String>,
    ) -> TurnOutput {
        TurnOutput {
            reply,
            topic: session.topic.clone(),
            session_id: session.session_id.clone(),
            stage: session.stage,
            is_complete: session.is_complete,
            interaction_count: session.total_interactions,
            sources,
            session_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MockContentProvider;
    use crate::store::MemorySessionStore;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    /// Scripted generation backend. Classification and scoring replies are
    /// configurable; content generation always fails so tutoring replies
    /// come from the deterministic fallbacks.
    struct StubGeneration {
        end: &'static str,
        question: &'static str,
        score: &'static str,
    }

    impl StubGeneration {
        fn tutoring() -> Self {
            Self { end: "NO", question: "NO", score: "0.9" }
        }
    }

    #[async_trait]
    impl GenerationService for StubGeneration {
        async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String> {
            if system_instruction == prompts::CLASSIFIER_INSTRUCTION {
                if prompt.contains("end or stop") {
                    Ok(self.end.to_string())
                } else {
                    Ok(self.question.to_string())
                }
            } else if system_instruction == prompts::EVALUATOR_INSTRUCTION {
                Ok(self.score.to_string())
            } else {
                Err(anyhow!("content generation offline"))
            }
        }
    }

    struct FailingGeneration;

    #[async_trait]
    impl GenerationService for FailingGeneration {
        async fn generate(&self, _system_instruction: &str, _prompt: &str) -> Result<String> {
            Err(anyhow!("backend unavailable"))
        }
    }

    fn cells_subtopics() -> Vec<SubTopic> {
        vec![
            SubTopic::new(
                "Cell Structure",
                "Cells are the basic unit of life. Organelles divide the work inside a cell. The membrane controls what enters and leaves.",
            ),
            SubTopic::new(
                "Cell Division",
                "Cells reproduce by dividing. Mitosis copies the nucleus first. The rest of the cell then splits in two.",
            ),
        ]
    }

    fn controller_with(
        subtopics: Vec<SubTopic>,
        generation: Arc<dyn GenerationService>,
        auto_quiz: bool,
    ) -> (FlowController, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let content = Arc::new(MockContentProvider::with_subtopics(subtopics));
        (
            FlowController::new(content, generation, store.clone(), auto_quiz),
            store,
        )
    }

    async fn stored(store: &MemorySessionStore, session_id: &str) -> Session {
        store
            .load_session(session_id)
            .await
            .unwrap()
            .expect("session should be persisted")
    }

    #[tokio::test]
    async fn start_then_first_continue_enters_learning() {
        let (fc, store) =
            controller_with(cells_subtopics(), Arc::new(StubGeneration::tutoring()), false);

        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        assert_eq!(started.stage, Stage::Intro);
        assert_eq!(started.interaction_count, 0);
        assert!(!started.is_complete);
        assert!(!started.session_id.is_empty());

        let turn = fc.process_turn(&started.session_id, None).await.unwrap();
        assert_eq!(turn.stage, Stage::Learning);
        assert_eq!(turn.interaction_count, 1);

        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.subtopic_index, 0);
        assert_eq!(s.explanation_step, 1);
    }

    #[tokio::test]
    async fn fourth_continue_asks_a_check_question() {
        let (fc, store) =
            controller_with(cells_subtopics(), Arc::new(StubGeneration::tutoring()), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();

        for _ in 0..3 {
            let turn = fc.process_turn(&started.session_id, None).await.unwrap();
            assert_eq!(turn.stage, Stage::Learning);
        }
        let turn = fc.process_turn(&started.session_id, None).await.unwrap();
        assert_eq!(turn.stage, Stage::Question);

        let s = stored(&store, &started.session_id).await;
        assert!(s.waiting_for_answer);
        assert!(s.current_question.as_deref().is_some_and(|q| !q.is_empty()));
        assert_eq!(s.explanation_step, 3);
    }

    #[tokio::test]
    async fn passing_answer_records_concept_then_advances() {
        let (fc, store) =
            controller_with(cells_subtopics(), Arc::new(StubGeneration::tutoring()), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        for _ in 0..4 {
            fc.process_turn(&started.session_id, None).await.unwrap();
        }

        // Stub scores every answer 0.9, above the pass threshold.
        let turn = fc
            .process_turn(&started.session_id, Some("organelles divide the work"))
            .await
            .unwrap();
        assert_eq!(turn.stage, Stage::Feedback);

        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.concepts_learned, vec!["Cell Structure"]);
        assert_eq!(s.concept_scores.len(), 1);
        assert!(!s.waiting_for_answer);
        assert!(s.current_question.is_none());

        let turn = fc.process_turn(&started.session_id, None).await.unwrap();
        assert_eq!(turn.stage, Stage::Learning);
        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.subtopic_index, 1);
        assert_eq!(s.explanation_step, 0);
    }

    #[tokio::test]
    async fn failing_answer_is_not_marked_learned() {
        let r#gen = Arc::new(StubGeneration { end: "NO", question: "NO", score: "0.3" });
        let (fc, store) = controller_with(cells_subtopics(), r#gen, false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        for _ in 0..4 {
            fc.process_turn(&started.session_id, None).await.unwrap();
        }

        let turn = fc
            .process_turn(&started.session_id, Some("not sure at all"))
            .await
            .unwrap();
        assert_eq!(turn.stage, Stage::Feedback);

        let s = stored(&store, &started.session_id).await;
        assert!(s.concepts_learned.is_empty());
        assert_eq!(s.concept_scores, vec![0.3]);
    }

    #[tokio::test]
    async fn end_intent_completes_from_any_stage() {
        // With the backend down the deterministic keyword fallback handles
        // the exit path.
        let (fc, store) = controller_with(cells_subtopics(), Arc::new(FailingGeneration), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        fc.process_turn(&started.session_id, None).await.unwrap();

        let turn = fc
            .process_turn(&started.session_id, Some("I want to stop"))
            .await
            .unwrap();
        assert_eq!(turn.stage, Stage::Complete);
        assert!(turn.is_complete);
        let summary = turn.session_summary.expect("summary expected");
        assert!(summary.contains("2 interactions"));
        assert!(summary.contains("0 concepts"));

        // Completion is one-way and later queries are no-ops.
        let after = fc.process_turn(&started.session_id, None).await.unwrap();
        assert!(after.is_complete);
        assert_eq!(after.interaction_count, 2);
        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.total_interactions, 2);
        assert!(s.is_complete);
    }

    #[tokio::test]
    async fn topic_without_content_completes_on_start() {
        let (fc, store) = controller_with(Vec::new(), Arc::new(StubGeneration::tutoring()), false);
        let started = fc.start_session("Empty", "student-1", None).await.unwrap();
        assert!(started.is_complete);
        assert_eq!(started.stage, Stage::Complete);
        assert_eq!(started.interaction_count, 0);
        assert!(started.reply.contains("no study material"));

        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.subtopic_index, 0);
    }

    #[tokio::test]
    async fn side_question_does_not_disturb_the_flow() {
        let r#gen = Arc::new(StubGeneration { end: "NO", question: "YES", score: "0.9" });
        let (fc, store) = controller_with(cells_subtopics(), r#gen, false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        fc.process_turn(&started.session_id, None).await.unwrap();

        let turn = fc
            .process_turn(&started.session_id, Some("what is an organelle exactly?"))
            .await
            .unwrap();
        assert_eq!(turn.stage, Stage::Learning);
        assert!(!turn.sources.is_empty());

        // The explanation cursor did not move while the question was handled.
        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.explanation_step, 1);
    }

    #[tokio::test]
    async fn terse_reply_to_pending_question_is_graded_not_interrupted() {
        // The classifier would call anything a question; the terse-reply
        // guard must keep short answers on the grading path.
        let r#gen = Arc::new(StubGeneration { end: "NO", question: "YES", score: "0.9" });
        let (fc, store) = controller_with(cells_subtopics(), r#gen, false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        for _ in 0..4 {
            fc.process_turn(&started.session_id, None).await.unwrap();
        }

        let turn = fc
            .process_turn(&started.session_id, Some("the membrane"))
            .await
            .unwrap();
        assert_eq!(turn.stage, Stage::Feedback);
        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.concept_scores.len(), 1);
    }

    #[tokio::test]
    async fn completing_both_concepts_finishes_the_session() {
        let (fc, _store) =
            controller_with(cells_subtopics(), Arc::new(StubGeneration::tutoring()), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();

        // First concept: three steps, question, answer, advance.
        for _ in 0..4 {
            fc.process_turn(&started.session_id, None).await.unwrap();
        }
        fc.process_turn(&started.session_id, Some("an answer")).await.unwrap();
        fc.process_turn(&started.session_id, None).await.unwrap();
        // Second concept runs the same cycle.
        for _ in 0..4 {
            fc.process_turn(&started.session_id, None).await.unwrap();
        }
        fc.process_turn(&started.session_id, Some("another answer")).await.unwrap();
        let turn = fc.process_turn(&started.session_id, None).await.unwrap();

        assert!(turn.is_complete);
        assert_eq!(turn.stage, Stage::Complete);
        let summary = turn.session_summary.expect("summary expected");
        assert!(summary.contains("2 concepts"));
    }

    #[tokio::test]
    async fn progress_counters_never_regress() {
        let (fc, store) =
            controller_with(cells_subtopics(), Arc::new(StubGeneration::tutoring()), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();

        let mut last_interactions = 0;
        let mut last_index = 0;
        for i in 0..8 {
            let user_text = if i == 4 { Some("an answer") } else { None };
            let turn = fc.process_turn(&started.session_id, user_text).await.unwrap();
            assert!(turn.interaction_count > last_interactions);
            last_interactions = turn.interaction_count;
            let s = stored(&store, &started.session_id).await;
            assert!(s.subtopic_index >= last_index);
            last_index = s.subtopic_index;
        }
    }

    #[tokio::test]
    async fn session_resumes_from_store_on_cold_cache() {
        let store = Arc::new(MemorySessionStore::new());
        let content = Arc::new(MockContentProvider::with_subtopics(cells_subtopics()));
        let generation: Arc<dyn GenerationService> = Arc::new(StubGeneration::tutoring());

        let fc = FlowController::new(content.clone(), generation.clone(), store.clone(), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        fc.process_turn(&started.session_id, None).await.unwrap();
        fc.process_turn(&started.session_id, None).await.unwrap();
        let before = stored(&store, &started.session_id).await;

        // A fresh controller simulates a process restart sharing the store.
        let resumed = FlowController::new(content, generation, store.clone(), false);
        let snapshot = resumed.session_snapshot(&started.session_id).await.unwrap();
        assert_eq!(snapshot.stage, before.stage);
        assert_eq!(snapshot.interaction_count, before.total_interactions);

        // Replaying zero turns changed nothing.
        let after = stored(&store, &started.session_id).await;
        assert_eq!(after, before);

        let turn = resumed.process_turn(&started.session_id, None).await.unwrap();
        assert_eq!(turn.interaction_count, before.total_interactions + 1);
        assert_eq!(turn.stage, Stage::Learning);
    }

    #[tokio::test]
    async fn unknown_session_is_reported_not_invented() {
        let (fc, _store) =
            controller_with(cells_subtopics(), Arc::new(StubGeneration::tutoring()), false);
        let err = fc.process_turn("missing-id", None).await.unwrap_err();
        assert!(matches!(err, FlowError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn conversation_budget_completes_stalled_sessions() {
        // One chunk derives a budget of MIN_CONVERSATIONS turns. A learner
        // who never answers the check question still burns through it.
        let one = vec![SubTopic::new(
            "Only Concept",
            "First the idea. Then the mechanism. Then an example.",
        )];
        let (fc, _store) = controller_with(one, Arc::new(StubGeneration::tutoring()), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();

        let mut completed_at = None;
        for i in 1..=quiz::MIN_CONVERSATIONS {
            let turn = fc.process_turn(&started.session_id, None).await.unwrap();
            if turn.is_complete {
                completed_at = Some(i);
                break;
            }
        }
        assert_eq!(completed_at, Some(quiz::MIN_CONVERSATIONS));
    }

    fn five_subtopics() -> Vec<SubTopic> {
        (1..=5)
            .map(|i| {
                SubTopic::new(
                    format!("Concept {i}"),
                    "First the idea. Then the mechanism. Then an example.",
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn auto_quiz_triggers_on_cycle_and_routes_back_to_learning() {
        // Five chunks derive quiz_frequency 4; the first on-cycle turn with
        // a covered concept is turn 8.
        let (fc, store) =
            controller_with(five_subtopics(), Arc::new(StubGeneration::tutoring()), true);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();

        for i in 1..=7 {
            let user_text = if i == 5 { Some("an answer") } else { None };
            let turn = fc.process_turn(&started.session_id, user_text).await.unwrap();
            assert_ne!(turn.stage, Stage::Quiz, "quiz fired early at turn {i}");
        }
        let turn = fc.process_turn(&started.session_id, None).await.unwrap();
        assert_eq!(turn.stage, Stage::Quiz);

        // Good quiz answers route straight back to learning.
        let turn = fc
            .process_turn(&started.session_id, Some("answers to all three"))
            .await
            .unwrap();
        assert_eq!(turn.stage, Stage::Learning);
        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.quiz_scores.len(), 1);
    }

    #[tokio::test]
    async fn poor_quiz_performance_routes_to_remedial_feedback() {
        let r#gen = Arc::new(StubGeneration { end: "NO", question: "NO", score: "0.2" });
        let (fc, store) = controller_with(five_subtopics(), r#gen, true);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();

        for i in 1..=7 {
            let user_text = if i == 5 { Some("an answer") } else { None };
            fc.process_turn(&started.session_id, user_text).await.unwrap();
        }
        // Turn 8 would normally quiz, but a 0.2-scored answer at turn 5
        // leaves no concept covered, so the trigger must hold off.
        let turn = fc.process_turn(&started.session_id, None).await.unwrap();
        assert_ne!(turn.stage, Stage::Quiz);

        let s = stored(&store, &started.session_id).await;
        assert!(s.concepts_learned.is_empty());
        assert!(s.quiz_scores.is_empty());
    }

    #[tokio::test]
    async fn poor_quiz_submission_is_remediated() {
        // Pass the concept check (0.9), then fail the quiz (0.2).
        struct SplitScores;
        #[async_trait]
        impl GenerationService for SplitScores {
            async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String> {
                if system_instruction == prompts::CLASSIFIER_INSTRUCTION {
                    Ok("NO".to_string())
                } else if system_instruction == prompts::EVALUATOR_INSTRUCTION {
                    if prompt.contains("A short quiz about") {
                        Ok("0.2".to_string())
                    } else {
                        Ok("0.9".to_string())
                    }
                } else {
                    Err(anyhow!("content generation offline"))
                }
            }
        }

        let (fc, store) = controller_with(five_subtopics(), Arc::new(SplitScores), true);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        for i in 1..=7 {
            let user_text = if i == 5 { Some("an answer") } else { None };
            fc.process_turn(&started.session_id, user_text).await.unwrap();
        }
        let turn = fc.process_turn(&started.session_id, None).await.unwrap();
        assert_eq!(turn.stage, Stage::Quiz);

        let turn = fc
            .process_turn(&started.session_id, Some("wrong answers"))
            .await
            .unwrap();
        assert_eq!(turn.stage, Stage::Feedback);
        let s = stored(&store, &started.session_id).await;
        assert_eq!(s.quiz_scores, vec![0.2]);
    }

    #[tokio::test]
    async fn overflowed_explanation_step_never_regresses_to_learning() {
        // A stored session with a corrupt cursor past the step maximum must
        // re-ask its question on resume, not fall back into the explanation.
        let store = Arc::new(MemorySessionStore::new());
        let content = Arc::new(MockContentProvider::with_subtopics(cells_subtopics()));
        let generation: Arc<dyn GenerationService> = Arc::new(StubGeneration::tutoring());

        let mut session = Session::new(
            "corrupt-1".to_string(),
            "student-1",
            "Cells",
            TopicLimits::from_chunk_count(2),
            false,
        );
        session.stage = Stage::Question;
        session.explanation_step = EXPLANATION_STEPS + 2;
        session.total_interactions = 4;
        store.upsert_session(&session).await.unwrap();

        let fc = FlowController::new(content, generation, store.clone(), false);
        let turn = fc.process_turn("corrupt-1", None).await.unwrap();
        assert_eq!(turn.stage, Stage::Question);

        let s = stored(&store, "corrupt-1").await;
        assert!(s.waiting_for_answer);
        assert!(s.current_question.is_some());
    }

    #[tokio::test]
    async fn turn_history_is_appended_per_turn() {
        let (fc, store) =
            controller_with(cells_subtopics(), Arc::new(StubGeneration::tutoring()), false);
        let started = fc.start_session("Cells", "student-1", None).await.unwrap();
        fc.process_turn(&started.session_id, None).await.unwrap();
        fc.process_turn(&started.session_id, Some("go on")).await.unwrap();

        let turns = store.turns(&started.session_id);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].turn, 0);
        assert_eq!(turns[2].user_text.as_deref(), Some("go on"));
        assert!(turns.iter().all(|t| !t.assistant_text.is_empty()));
    }
}
