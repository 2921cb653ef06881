//! Ollama chat client used as the text generator behind query intelligence.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mvr_core::{IntelligenceConfig, Result, RetrievalError, TextGenerator};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Text generator calling Ollama's `/api/chat` endpoint.
///
/// No API key is involved; the server is expected to be self-hosted.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    /// Create a generator for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Generator for the configured model, if one is set.
    pub fn from_config(config: &IntelligenceConfig) -> Result<Option<Self>> {
        match config.model.as_deref() {
            Some(model) => Self::new(
                config.base_url.as_str(),
                model,
                Duration::from_millis(config.request_timeout_ms),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    /// Model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options: ChatOptions { temperature: 0.0 },
        };

        let url = format!("{}/api/chat", self.base_url);
        debug!("Requesting completion from {} ({})", url, self.model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::provider(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RetrievalError::provider(format!(
                "Ollama returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            RetrievalError::provider(format!("Failed to parse Ollama response: {}", e))
        })?;

        Ok(chat.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> OllamaGenerator {
        OllamaGenerator::new(server.uri(), "llama3.2:3b", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_generate_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({ "model": "llama3.2:3b", "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2:3b",
                "message": { "role": "assistant", "content": "{\"language\": \"english\"}" },
                "done": true
            })))
            .mount(&server)
            .await;

        let reply = generator(&server).generate("detect the language").await.unwrap();
        assert_eq!(reply, "{\"language\": \"english\"}");
    }

    #[tokio::test]
    async fn test_http_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = generator(&server).generate("hello").await.unwrap_err();
        assert_eq!(err.error_code(), "PROVIDER_ERROR");
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn test_from_config_requires_model() {
        let mut config = IntelligenceConfig::default();
        assert!(OllamaGenerator::from_config(&config).unwrap().is_none());

        config.model = Some("qwen2.5:7b".to_string());
        config.base_url = "http://localhost:11434/".to_string();
        let generator = OllamaGenerator::from_config(&config).unwrap().unwrap();
        assert_eq!(generator.model(), "qwen2.5:7b");
        assert_eq!(generator.base_url, "http://localhost:11434");
    }
}
