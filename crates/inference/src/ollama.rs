use std::time::Duration;

use aiop_domain::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{build_user_text, Inference};

const EMBED_TIMEOUT: Duration = Duration::from_secs(60);
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// [`Inference`] backed by a local Ollama instance's `/api/embeddings`
/// and `/api/chat` endpoints, non-streaming.
pub struct OllamaInference {
    client: reqwest::Client,
    base_url: String,
    embed_model: String,
    chat_model: String,
    expected_embed_dim: usize,
}

impl OllamaInference {
    pub fn new(base_url: impl Into<String>, embed_model: impl Into<String>, chat_model: impl Into<String>, expected_embed_dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            embed_model: embed_model.into(),
            chat_model: chat_model.into(),
            expected_embed_dim,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize, Default)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
}

#[async_trait]
impl Inference for OllamaInference {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(EMBED_TIMEOUT)
            .json(&EmbedRequest { model: &self.embed_model, prompt: text })
            .send()
            .await
            .map_err(|e| Error::InferenceFailure(format!("embeddings request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::InferenceFailure(format!("embeddings returned HTTP {}", resp.status())));
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| Error::InferenceFailure(format!("embeddings response malformed: {e}")))?;

        if body.embedding.len() != self.expected_embed_dim {
            return Err(Error::InferenceFailure(format!(
                "expected {}-dim embedding, got {}",
                self.expected_embed_dim,
                body.embedding.len()
            )));
        }
        Ok(body.embedding)
    }

    async fn chat(&self, system_prompt: &str, user_prompt: &str, injected_memories: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let user_text = build_user_text(user_prompt, injected_memories);

        let payload = ChatRequest {
            model: &self.chat_model,
            stream: false,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: &user_text },
            ],
        };

        let resp = self
            .client
            .post(&url)
            .timeout(CHAT_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::InferenceFailure(format!("chat request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::InferenceFailure(format!("chat returned HTTP {}", resp.status())));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::InferenceFailure(format!("chat response malformed: {e}")))?;

        Ok(body.message.unwrap_or_default().content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_trailing_slash() {
        let inference = OllamaInference::new("http://127.0.0.1:11434/", "e", "c", 4);
        assert_eq!(inference.base_url, "http://127.0.0.1:11434");
    }
}
