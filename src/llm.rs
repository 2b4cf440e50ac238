//! LLM client (spec §6): structured-output generation over the `genai`
//! crate, with retry-with-feedback on schema failure and exponential
//! backoff with jitter on transient (rate limit/timeout) failure.

use crate::error::{Error, Result};
use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatRequest};
use genai::Client;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;

/// `generateObject` (spec §6): a chat turn constrained to return a single
/// JSON object. Implementations own their own retry policy; callers only
/// see the final decoded value or a classified [`Error`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_object(&self, system_prompt: &str, user_prompt: &str) -> Result<Value>;
}

/// Retry policy: `max_schema_retries` re-prompts with decode-error feedback
/// (the Instructor pattern); `max_transient_retries` retries a systemic
/// failure (rate limit, timeout) with exponential backoff and jitter.
pub struct RetryConfig {
    pub max_schema_retries: u32,
    pub max_transient_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_schema_retries: 2,
            max_transient_retries: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

pub struct GenAiClient {
    client: Client,
    model: String,
    retry: RetryConfig,
}

impl GenAiClient {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::default(),
            model: model.into(),
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn classify_service_error(message: String) -> Error {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            Error::LlmRateLimit(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Error::LlmTimeout(message)
        } else {
            Error::AiService(message)
        }
    }

    /// Pulls a JSON object out of a response that may wrap it in a fenced
    /// code block or surrounding commentary.
    fn extract_json(response: &str) -> &str {
        if let Some(start) = response.find("```json") {
            let after_fence = start + 7;
            if let Some(end_offset) = response[after_fence..].find("```") {
                return response[after_fence..after_fence + end_offset].trim();
            }
        }
        if let Some(start) = response.find('{') {
            if let Some(end) = response.rfind('}') {
                return response[start..=end].trim();
            }
        }
        response.trim()
    }

    async fn backoff_sleep(&self, attempt: u32) {
        let exp = self.retry.base_backoff.saturating_mul(1 << attempt.min(10));
        let capped = exp.min(self.retry.max_backoff);
        let jitter_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=capped.as_millis().max(1) as u64)
        };
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }

    async fn call_with_backoff(&self, history: &[ChatMessage]) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..=self.retry.max_transient_retries {
            let request = ChatRequest::new(history.to_vec());
            match self.client.exec_chat(&self.model, request, None).await {
                Ok(response) => {
                    return response.first_text().map(ToString::to_string).ok_or_else(|| {
                        Error::AiService("empty response from AI service".to_string())
                    });
                }
                Err(e) => {
                    let classified = Self::classify_service_error(e.to_string());
                    if !classified.is_systemic() || attempt == self.retry.max_transient_retries {
                        return Err(classified);
                    }
                    last_err = Some(classified);
                    self.backoff_sleep(attempt).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::AiService("exhausted transient retries".to_string())))
    }
}

#[async_trait]
impl LlmClient for GenAiClient {
    async fn generate_object(&self, system_prompt: &str, user_prompt: &str) -> Result<Value> {
        let mut history = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt.to_string()),
        ];

        let mut last_schema_error: Option<Error> = None;

        for schema_attempt in 0..=self.retry.max_schema_retries {
            if schema_attempt > 0 {
                let feedback = last_schema_error.as_ref().map_or_else(
                    || "the previous response was not valid JSON".to_string(),
                    ToString::to_string,
                );
                history.push(ChatMessage::user(format!(
                    "{feedback}\n\nPlease respond again with only the corrected JSON object."
                )));
            }

            let content_text = self.call_with_backoff(&history).await?;
            history.push(ChatMessage::assistant(content_text.clone()));

            let json_str = Self::extract_json(&content_text);
            match serde_json::from_str::<Value>(json_str) {
                Ok(value) => return Ok(value),
                Err(e) => last_schema_error = Some(Error::LlmSchemaError(e.to_string())),
            }
        }

        Err(last_schema_error
            .unwrap_or_else(|| Error::LlmSchemaError("exhausted schema retries".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_prefers_fenced_block() {
        let response = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(GenAiClient::extract_json(response), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let response = "sure, {\"a\": 1} is the answer";
        assert_eq!(GenAiClient::extract_json(response), "{\"a\": 1}");
    }

    #[test]
    fn classify_service_error_detects_rate_limit_and_timeout() {
        assert!(matches!(
            GenAiClient::classify_service_error("429 rate limit exceeded".into()),
            Error::LlmRateLimit(_)
        ));
        assert!(matches!(
            GenAiClient::classify_service_error("request timed out".into()),
            Error::LlmTimeout(_)
        ));
        assert!(matches!(
            GenAiClient::classify_service_error("invalid api key".into()),
            Error::AiService(_)
        ));
    }
}
