use async_trait::async_trait;

use crate::{ChatMessage, Result};

/// Text-completion backend used by synthesis and review.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one chat exchange and return the assistant's text.
    async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32)
        -> Result<String>;
}
