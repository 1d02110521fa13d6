use thiserror::Error;

/// Error taxonomy for the revision flow.
///
/// None of these terminate the process: `SessionNotFound` is surfaced to the
/// caller as a "please start a new session" reply, `ContentUnavailable`
/// completes the session with an explanatory message, and the remaining two
/// degrade to fallback behaviour and a logged warning.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no session found for id '{0}'")]
    SessionNotFound(String),
    #[error("no study material available for topic '{0}'")]
    ContentUnavailable(String),
    #[error("generation service failure: {0}")]
    GenerationServiceFailure(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(anyhow::Error),
}
