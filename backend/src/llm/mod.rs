mod openai;

#[cfg(test)]
pub mod fake;

pub use openai::{ClientBuildError, OpenAiClient};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Response contained no message content")]
    EmptyResponse,
}

/// A base64 image ready to be sent inline.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub content_type: String,
    pub data: String,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image(EncodedImage),
}

/// One user turn plus the decoding settings for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub parts: Vec<ContentPart>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            parts: vec![ContentPart::Text(prompt.into())],
            temperature,
            max_tokens,
        }
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, ContentPart::Image(_)))
            .count()
    }
}

/// Submit content, receive generated text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;

    fn model_name(&self) -> &str;
}
