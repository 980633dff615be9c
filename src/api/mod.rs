mod author;
mod openai;

pub use author::SceneAuthor;
pub use openai::OpenAiClient;

use crate::error::Result;

/// One chat-completion call: a system role plus a single user message.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// An OpenAI-compatible chat backend.
pub trait ChatModel {
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String>;
}
