pub mod gemini;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use gemini::{GeminiClient, GeminiConfig};

/// API credential for the generation service. Passed explicitly to every
/// call; never held in process-wide state.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        let visible: String = self.0.chars().take(5).collect();
        let hidden = self.0.chars().count().saturating_sub(5);
        format!("{visible}{}", "*".repeat(hidden))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub parts: Vec<String>,
    pub image: Option<InlineImage>,
}

impl GenerationRequest {
    pub fn text(model: &str, prompt: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            parts: vec![prompt.into()],
            image: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A text/vision generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<String, LlmError>;
}
