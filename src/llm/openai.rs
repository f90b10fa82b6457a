//! OpenAI-compatible chat provider.
//!
//! Works against any endpoint speaking the chat-completions protocol (a
//! local Ollama instance by default, the OpenAI API, or a compatible
//! gateway) through the async-openai client with a configurable base URL.

use super::{LlmError, Message, ModelProvider};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Duration;
use tracing::debug;

/// Sampling temperature for synthesis. Kept at zero: the contract asks for
/// one exact command line, not creative variation.
const SYNTHESIS_TEMPERATURE: f32 = 0.0;

/// Chat provider for an OpenAI-compatible endpoint.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
}

impl OpenAiProvider {
    /// Create a provider for `base_url` using `api_key` and `model`.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str, model: &str, request_timeout: Duration) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout,
        }
    }

    fn build_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            let m = match msg.role.as_str() {
                "system" => ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| LlmError::Api(e.to_string()))?
                    .into(),
                "assistant" => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| LlmError::Api(e.to_string()))?
                    .into(),
                _ => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| LlmError::Api(e.to_string()))?
                    .into(),
            };
            out.push(m);
        }
        Ok(out)
    }
}

/// Classify an async-openai error into the transport/content split the
/// synthesizer cares about.
fn classify_error(message: String) -> LlmError {
    let lower = message.to_lowercase();
    let transport = ["connect", "dns", "network", "timed out", "timeout"]
        .iter()
        .any(|needle| lower.contains(needle));
    if transport {
        LlmError::Network(message)
    } else {
        LlmError::Api(message)
    }
}

#[async_trait::async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(messages)?)
            .temperature(SYNTHESIS_TEMPERATURE)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        debug!(model = %self.model, messages = messages.len(), "sending chat completion request");

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))?
            .map_err(|e| classify_error(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyReply)
    }
}
