//! Defines the WebSocket message protocol between the client and the API server.

use serde::{Deserialize, Serialize};

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Binds the channel to an existing session. This must be the first message.
    #[serde(rename = "init")]
    Init {
        /// The unique identifier of the session to attach to.
        session_id: String,
    },
    /// One learner message, processed as one "continue" turn. `text` may be
    /// absent for a plain continue.
    #[serde(rename = "user_message")]
    UserMessage { text: Option<String> },
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the channel is bound and reports the session's current state.
    Initialized {
        session_id: String,
        topic: String,
        stage: String,
        interaction_count: u32,
        is_complete: bool,
    },
    /// The outcome of one processed turn.
    Turn {
        reply: String,
        interaction_count: u32,
        is_complete: bool,
        stage: String,
        sources: Vec<String>,
    },
    /// Terminal frame carrying the session summary; the channel closes after
    /// this.
    Summary { summary: String },
    /// Reports a fatal error to the client.
    Error { message: String },
}
