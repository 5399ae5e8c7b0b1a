mod ollama;

pub use ollama::OllamaInference;

use aiop_domain::Result;
use async_trait::async_trait;

/// Embedding + chat backend used by the orchestrator. A trait rather than
/// a concrete client so the HTTP layer can be exercised against a scripted
/// double instead of a live Ollama instance.
#[async_trait]
pub trait Inference: Send + Sync {
    /// Embeds `text`, returning a vector of the backend's fixed dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Runs one non-streaming chat turn. `injected_memories`, when
    /// non-empty, is appended to the user prompt as a "RELEVANT MEMORY"
    /// block the model is told to use only if helpful.
    async fn chat(&self, system_prompt: &str, user_prompt: &str, injected_memories: &str) -> Result<String>;
}

/// Builds the `RELEVANT MEMORY` block appended to the user prompt when
/// retrieval found anything worth injecting. Shared by [`OllamaInference`]
/// and any other backend so the wire format stays consistent.
pub fn build_user_text(user_prompt: &str, injected_memories: &str) -> String {
    if injected_memories.trim().is_empty() {
        return user_prompt.to_string();
    }
    format!(
        "{user_prompt}\n\n----\nRELEVANT MEMORY (use only if helpful and consistent):\n{injected_memories}\n----"
    )
}

/// Scripted [`Inference`] double for tests: returns canned embeddings and
/// chat replies without making network calls.
#[derive(Debug, Clone, Default)]
pub struct FakeInference {
    pub embed_dim: usize,
    pub chat_reply: String,
}

impl FakeInference {
    pub fn new(embed_dim: usize, chat_reply: impl Into<String>) -> Self {
        Self { embed_dim, chat_reply: chat_reply.into() }
    }
}

#[async_trait]
impl Inference for FakeInference {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Deterministic, content-derived so tests can tell distinct
        // inputs apart without needing a real model.
        let seed = text.bytes().fold(0u32, |acc, b| acc.wrapping_add(b as u32));
        Ok((0..self.embed_dim).map(|i| ((seed as usize + i) % 997) as f32 / 997.0).collect())
    }

    async fn chat(&self, _system_prompt: &str, user_prompt: &str, injected_memories: &str) -> Result<String> {
        let _ = build_user_text(user_prompt, injected_memories);
        Ok(self.chat_reply.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_user_text_passes_through_without_memories() {
        assert_eq!(build_user_text("hello", ""), "hello");
        assert_eq!(build_user_text("hello", "   "), "hello");
    }

    #[test]
    fn build_user_text_appends_memory_block() {
        let text = build_user_text("hello", "fact one");
        assert!(text.starts_with("hello\n\n----\n"));
        assert!(text.contains("RELEVANT MEMORY"));
        assert!(text.trim_end().ends_with("----"));
    }

    #[tokio::test]
    async fn fake_inference_embeds_deterministically() {
        let inference = FakeInference::new(8, "ok");
        let a = inference.embed("hello").await.unwrap();
        let b = inference.embed("hello").await.unwrap();
        let c = inference.embed("goodbye").await.unwrap();
        assert_eq!(a.len(), 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn fake_inference_returns_scripted_reply() {
        let inference = FakeInference::new(4, "scripted answer");
        let reply = inference.chat("sys", "hi", "").await.unwrap();
        assert_eq!(reply, "scripted answer");
    }
}
