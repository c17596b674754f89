//! OpenAI-backed LLM client.

use super::{LlmClient, LlmRequest};
use crate::error::{OppsumError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;

/// Default timeout for OpenAI API requests (2 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Create an OpenAI client with configured timeout.
///
/// The HTTP-level timeout is the per-call LLM timeout: a request that
/// exceeds it surfaces as `LlmTimeout` and counts toward the retry budget.
pub fn create_client() -> Client<OpenAIConfig> {
    create_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create an OpenAI client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Client<OpenAIConfig> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to create HTTP client");

    Client::with_config(OpenAIConfig::default()).with_http_client(http_client)
}

/// Production [`LlmClient`] over the OpenAI chat completions API.
///
/// Requests are JSON-mode constrained; retry policy is applied by callers.
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            client: create_client(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: create_client_with_timeout(timeout),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, request: &LlmRequest) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.clone())
                .build()
                .map_err(|e| OppsumError::OpenAI(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.clone())
                .build()
                .map_err(|e| OppsumError::OpenAI(e.to_string()))?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_completion_tokens(request.max_output_tokens)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| OppsumError::OpenAI(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(map_openai_error)?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| OppsumError::OpenAI("Empty response from model".to_string()))
    }
}

/// Map provider errors onto the taxonomy: HTTP timeouts become `LlmTimeout`,
/// rate limiting becomes `RateLimit`, everything else stays an API error.
fn map_openai_error(err: OpenAIError) -> OppsumError {
    match err {
        OpenAIError::Reqwest(inner) if inner.is_timeout() => {
            OppsumError::LlmTimeout(inner.to_string())
        }
        OpenAIError::ApiError(api) => {
            if is_rate_limit_message(&api.message) {
                OppsumError::RateLimit(api.message)
            } else {
                OppsumError::OpenAI(api.message)
            }
        }
        other => OppsumError::OpenAI(other.to_string()),
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}
