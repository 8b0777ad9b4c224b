//! Chapter illustration: provider seams, fallback tiers and the chain that
//! walks them.

mod backoff;
mod chain;
mod sources;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogSink;
use crate::model::LanguageModelError;
use crate::prompts::PromptError;

pub use backoff::{BackoffPolicy, ProviderHint, Sleeper, ThreadSleeper};
pub use chain::ImageChain;
pub use sources::{
    InferenceTier, PlaceholderTier, StockSearchTier, VisionTier, DEFAULT_PLACEHOLDER_URL,
    MAX_WARM_UPS, MIN_DATA_URL_LEN, MIN_INLINE_IMAGE_LEN, PROMPT_PLACEHOLDER, PROMPT_STOCK_LIBRARY,
};

/// What the chain knows about the chapter it is illustrating.
#[derive(Clone, Copy, Debug)]
pub struct ImageContext<'a> {
    pub chapter_title: &'a str,
    pub genre: &'a str,
    pub visual_style: &'a str,
}

impl<'a> ImageContext<'a> {
    pub fn new(chapter_title: &'a str, genre: &'a str, visual_style: &'a str) -> Self {
        Self {
            chapter_title,
            genre,
            visual_style,
        }
    }
}

/// A usable image reference plus the prompt that produced it and the tier
/// that delivered it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub reference: String,
    pub prompt: String,
    pub source: String,
}

/// Inline image payload returned by a multimodal model (base64 encoded).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InferenceResponse {
    Image { content_type: String, bytes: Vec<u8> },
    /// The model is cold; the endpoint suggests waiting before the next call.
    Loading { estimated_secs: Option<f64> },
}

#[derive(Debug, Error)]
pub enum ImageSourceError {
    #[error("{0}")]
    Provider(String),
    #[error("generation returned an empty payload ({len} bytes)")]
    EmptyPayload { len: usize },
    #[error("unexpected content type `{0}`")]
    UnexpectedContent(String),
    #[error("model is still loading")]
    StillLoading,
    #[error("prompt synthesis failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("failed to render image prompt: {0}")]
    Prompt(#[from] PromptError),
}

impl ImageSourceError {
    pub fn provider(error: impl std::fmt::Display) -> Self {
        Self::Provider(error.to_string())
    }
}

/// Multimodal model that renders a prompt into inline image bytes.
pub trait ImageModel: Send + Sync {
    fn render(&self, prompt: &str) -> Result<InlineImage, ImageSourceError>;
}

/// Hosted inference endpoint serving several text-to-image models.
pub trait InferenceEndpoint: Send + Sync {
    fn infer(&self, model_id: &str, prompt: &str) -> Result<InferenceResponse, ImageSourceError>;
}

/// Free-text image search returning ranked image URLs.
pub trait StockImageSearch: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<String>, ImageSourceError>;
}

/// Shared services a tier may use while attempting.
pub struct AttemptEnv<'a> {
    pub sink: &'a dyn LogSink,
    pub sleeper: &'a dyn Sleeper,
}

/// One ranked stage of the chain. `None` hands over to the next tier.
pub trait ImageSource: Send + Sync {
    fn label(&self) -> &str;

    fn attempt(&self, context: &ImageContext<'_>, env: &AttemptEnv<'_>) -> Option<ImageResult>;
}
