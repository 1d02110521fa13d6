//! Contract for the external text-generation backend.
//!
//! The backend is treated as a black box: the flow controller uses it both
//! for open-ended tutoring replies and, via the classifier, for
//! forced-format classification and scoring. Every call is bounded by a
//! timeout so a slow backend degrades to the deterministic fallbacks instead
//! of hanging the turn.

use crate::error::FlowError;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::time::Duration;

/// A generic client for the generation backend.
///
/// A turn makes at most two calls: one classification or scoring call and
/// one content-generation call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String>;
}

/// An implementation of `GenerationService` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    /// * `timeout` - Upper bound on any single generation request.
    pub fn new(config: OpenAIConfig, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout,
        }
    }
}

#[async_trait]
impl GenerationService for OpenAICompatibleClient {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_instruction)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                FlowError::GenerationServiceFailure(format!(
                    "request timed out after {:?}",
                    self.timeout
                ))
            })??;

        let content = response
            .choices
            .get(0)
            .context("No response choice from model")?
            .message
            .content
            .as_ref()
            .context("No content in model response")?;

        Ok(content.trim().to_string())
    }
}
