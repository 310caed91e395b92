//! Chat-completions client.
//!
//! Thin wrapper over the deployment-style chat API used for translation,
//! insight extraction, and the private chat. Failures are classified so
//! callers can surface typed warnings; there are no retries — a failed
//! item is abandoned and the pipeline moves on.

pub mod prompts;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// LLM call failures, classified for the warning counters.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection failed: {0}")]
    Connection(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM error: {0}")]
    Other(String),
}

impl LlmError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }

    /// Warning bucket for this failure.
    pub fn warning_kind(&self) -> crate::error::WarningKind {
        match self {
            Self::Connection(_) => crate::error::WarningKind::LlmConnection,
            Self::Timeout => crate::error::WarningKind::LlmTimeout,
            Self::Other(_) => crate::error::WarningKind::LlmOther,
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat-completion seam (dyn-compatible) so the pipeline workers can be
/// exercised without the network.
pub trait ChatApi: Send + Sync {
    /// Send a message list and return the assistant reply text.
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f32,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>>;
}

/// Deployment-style chat-completions client.
pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    model: String,
}

/// Default system preamble for single-prompt calls.
const ASSISTANT_PREAMBLE: &str = "You are a helpful AI meeting assistant. Provide concise, \
     actionable responses that help improve meeting productivity and understanding.";

impl LlmClient {
    pub fn new(endpoint: &str, api_key: &str, api_version: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("build HTTP client");

        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_version: api_version.to_string(),
            model: model.to_string(),
        }
    }

    /// Send a single user prompt with the default system preamble.
    pub async fn chat(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let messages = [
            ChatMessage::system(ASSISTANT_PREAMBLE),
            ChatMessage::user(prompt),
        ];
        self.chat_messages(&messages, max_tokens, temperature).await
    }

    /// Send a full message list.
    pub async fn chat_messages(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.model, self.api_version
        );

        debug!(
            model = %self.model,
            messages = messages.len(),
            "LLM chat request"
        );

        let body = ChatRequest {
            messages,
            max_tokens,
            temperature,
        };

        let resp = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(LlmError::Other(format!("API error {status}: {detail}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Other(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }
}

impl ChatApi for LlmClient {
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f32,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
        Box::pin(async move { self.chat_messages(&messages, max_tokens, temperature).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let m = ChatMessage::system("ctx");
        assert_eq!(m.role, "system");
        let m = ChatMessage::user("q");
        assert_eq!(m.role, "user");
        let m = ChatMessage::assistant("a");
        assert_eq!(m.role, "assistant");
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"choices":[{"message":{"content":"  translated text \n"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        let content = parsed.choices[0].message.content.as_deref().unwrap();
        assert_eq!(content.trim(), "translated text");
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let client = LlmClient::new("https://example.test/", "k", "v1", "gpt");
        assert_eq!(client.endpoint, "https://example.test");
    }
}
