//! API Models
//!
//! This module defines the request and response shapes of the REST API,
//! annotated with `utoipa` schemas for the generated OpenAPI documentation.

use chrono::{DateTime, Utc};
use edubot_core::flow::TurnOutput;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct StartRevisionPayload {
    #[schema(example = "Cell Structure and Functions")]
    pub topic: String,
    #[schema(example = "student_001")]
    pub student_id: String,
    /// Optional caller-supplied session id; one is generated when absent.
    pub session_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ContinueRevisionPayload {
    pub session_id: String,
    /// The learner's message. Absent for a plain "continue" turn.
    #[schema(example = "Why do cells divide?")]
    pub text: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct RevisionResponse {
    pub reply: String,
    pub topic: String,
    pub session_id: String,
    pub interaction_count: u32,
    pub is_complete: bool,
    #[schema(example = "learning")]
    pub stage: String,
    /// Content identifiers the reply was grounded on.
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<TurnOutput> for RevisionResponse {
    fn from(output: TurnOutput) -> Self {
        Self {
            reply: output.reply,
            topic: output.topic,
            session_id: output.session_id,
            interaction_count: output.interaction_count,
            is_complete: output.is_complete,
            stage: output.stage.as_str().to_string(),
            sources: output.sources,
            session_summary: output.session_summary,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct TopicInfo {
    pub topic: String,
    pub chunk_count: i64,
    pub description: String,
    pub max_conversations: u32,
    pub quiz_frequency: u32,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct TopicsResponse {
    pub topics: Vec<TopicInfo>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
