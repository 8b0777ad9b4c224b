use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::backoff::{BackoffPolicy, ProviderHint};
use super::{
    AttemptEnv, ImageContext, ImageModel, ImageResult, ImageSource, ImageSourceError,
    InferenceEndpoint, InferenceResponse, StockImageSearch,
};
use crate::logging::{LogLevel, LogRecord};
use crate::model::LanguageModel;
use crate::prompts::{PromptError, PromptRegistry, PromptTemplate, IMAGE_FALLBACK_PROMPT, IMAGE_PROMPT_PROMPT};

pub const DEFAULT_PLACEHOLDER_URL: &str =
    "https://placehold.co/1024x600/0a0a0a/333?text=Asset+Processing";
pub const PROMPT_STOCK_LIBRARY: &str = "Stock Library Asset";
pub const PROMPT_PLACEHOLDER: &str = "Safety Placeholder";

/// Inline payloads at or below this many base64 characters count as empty.
pub const MIN_INLINE_IMAGE_LEN: usize = 500;
/// Inference images whose data URL is at or below this length count as empty.
pub const MIN_DATA_URL_LEN: usize = 1000;
/// Warm-up waits allowed per inference tier before the wait counts as a failure.
pub const MAX_WARM_UPS: u32 = 3;

const MAX_PROMPT_WORDS: usize = 20;
const DEFAULT_MIME: &str = "image/png";

/// Text model writes a short scene prompt, multimodal model renders it.
pub struct VisionTier {
    label: String,
    text_model: Arc<dyn LanguageModel>,
    image_model: Arc<dyn ImageModel>,
    prompt_template: PromptTemplate,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl VisionTier {
    pub fn new(
        label: impl Into<String>,
        text_model: Arc<dyn LanguageModel>,
        image_model: Arc<dyn ImageModel>,
        prompts: &PromptRegistry,
    ) -> Result<Self, PromptError> {
        let prompt_template = prompts
            .get(IMAGE_PROMPT_PROMPT)
            .cloned()
            .ok_or_else(|| PromptError::NotFound(IMAGE_PROMPT_PROMPT.to_string()))?;
        Ok(Self {
            label: label.into(),
            text_model,
            image_model,
            prompt_template,
            max_attempts: 2,
            backoff: BackoffPolicy::vision(),
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn attempt_once(&self, context: &ImageContext<'_>) -> Result<ImageResult, ImageSourceError> {
        let request = self.prompt_template.render_with([
            ("image_style", context.visual_style),
            ("chapter_title", context.chapter_title),
            ("genre", context.genre),
        ])?;
        let prompt = condense_prompt(&self.text_model.invoke(&request)?);
        if prompt.is_empty() {
            return Err(ImageSourceError::Provider(
                "prompt synthesis returned no text".to_string(),
            ));
        }

        let image = self.image_model.render(&prompt)?;
        if image.data.len() <= MIN_INLINE_IMAGE_LEN {
            return Err(ImageSourceError::EmptyPayload {
                len: image.data.len(),
            });
        }

        let mime = image
            .mime_type
            .as_deref()
            .filter(|mime| !mime.trim().is_empty())
            .unwrap_or(DEFAULT_MIME);
        Ok(ImageResult {
            reference: format!("data:{mime};base64,{}", image.data),
            prompt,
            source: self.label.clone(),
        })
    }
}

impl ImageSource for VisionTier {
    fn label(&self) -> &str {
        &self.label
    }

    fn attempt(&self, context: &ImageContext<'_>, env: &AttemptEnv<'_>) -> Option<ImageResult> {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                env.sink.log(LogRecord::info(format!("Retrying {}...", self.label)));
            }
            match self.attempt_once(context) {
                Ok(result) => {
                    env.sink
                        .log(LogRecord::info("Visual asset generated successfully."));
                    return Some(result);
                }
                Err(err) => env.sink.log(LogRecord::warn(format!(
                    "{} attempt {}/{} failed: {}",
                    self.label, attempt, self.max_attempts, err
                ))),
            }
            if attempt < self.max_attempts {
                env.sleeper
                    .sleep(self.backoff.delay(attempt, ProviderHint::None));
            }
        }
        None
    }
}

/// One model on a hosted inference endpoint.
pub struct InferenceTier {
    label: String,
    endpoint: Arc<dyn InferenceEndpoint>,
    model_id: String,
    prompt_template: PromptTemplate,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl InferenceTier {
    pub fn new(
        label: impl Into<String>,
        endpoint: Arc<dyn InferenceEndpoint>,
        model_id: impl Into<String>,
        max_attempts: u32,
        prompts: &PromptRegistry,
    ) -> Result<Self, PromptError> {
        let prompt_template = prompts
            .get(IMAGE_FALLBACK_PROMPT)
            .cloned()
            .ok_or_else(|| PromptError::NotFound(IMAGE_FALLBACK_PROMPT.to_string()))?;
        Ok(Self {
            label: label.into(),
            endpoint,
            model_id: model_id.into(),
            prompt_template,
            max_attempts: max_attempts.max(1),
            backoff: BackoffPolicy::inference(),
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn accept(&self, response: InferenceResponse) -> Result<String, ImageSourceError> {
        match response {
            InferenceResponse::Image {
                content_type,
                bytes,
            } => {
                if !content_type.trim().to_ascii_lowercase().starts_with("image") {
                    return Err(ImageSourceError::UnexpectedContent(content_type));
                }
                let reference = data_url(&content_type, &bytes);
                if reference.len() <= MIN_DATA_URL_LEN {
                    return Err(ImageSourceError::EmptyPayload { len: bytes.len() });
                }
                Ok(reference)
            }
            InferenceResponse::Loading { .. } => Err(ImageSourceError::StillLoading),
        }
    }
}

impl ImageSource for InferenceTier {
    fn label(&self) -> &str {
        &self.label
    }

    fn attempt(&self, context: &ImageContext<'_>, env: &AttemptEnv<'_>) -> Option<ImageResult> {
        let prompt = match self.prompt_template.render_with([
            ("image_style", context.visual_style),
            ("genre", context.genre),
            ("chapter_title", context.chapter_title),
        ]) {
            Ok(prompt) => prompt,
            Err(err) => {
                env.sink.log(LogRecord::warn(format!("{}: {}", self.label, err)));
                return None;
            }
        };

        let mut attempt = 1;
        let mut warm_ups = 0;
        while attempt <= self.max_attempts {
            let outcome = match self.endpoint.infer(&self.model_id, &prompt) {
                Ok(InferenceResponse::Loading { estimated_secs }) if warm_ups < MAX_WARM_UPS => {
                    warm_ups += 1;
                    let wait = self
                        .backoff
                        .delay(attempt, ProviderHint::warming_up(estimated_secs));
                    env.sink.log(LogRecord::info(format!(
                        "Engine {} warming up... {}s",
                        self.model_id,
                        wait.as_secs_f64().ceil()
                    )));
                    env.sleeper.sleep(wait);
                    continue;
                }
                Ok(response) => self.accept(response),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(reference) => {
                    return Some(ImageResult {
                        reference,
                        prompt,
                        source: self.label.clone(),
                    })
                }
                Err(err @ ImageSourceError::EmptyPayload { .. }) => {
                    // Undersized image ends the tier.
                    env.sink.log(LogRecord::warn(format!("{}: {}", self.label, err)));
                    return None;
                }
                Err(err) => env.sink.log(LogRecord::warn(format!(
                    "{} attempt {}/{} failed: {}",
                    self.label, attempt, self.max_attempts, err
                ))),
            }

            if attempt < self.max_attempts {
                env.sleeper
                    .sleep(self.backoff.delay(attempt, ProviderHint::None));
            }
            attempt += 1;
        }
        None
    }
}

/// First hit of a free-text image search. Failures are not reported beyond a
/// debug line.
pub struct StockSearchTier {
    label: String,
    search: Arc<dyn StockImageSearch>,
}

impl StockSearchTier {
    pub fn new(label: impl Into<String>, search: Arc<dyn StockImageSearch>) -> Self {
        Self {
            label: label.into(),
            search,
        }
    }
}

impl ImageSource for StockSearchTier {
    fn label(&self) -> &str {
        &self.label
    }

    fn attempt(&self, context: &ImageContext<'_>, env: &AttemptEnv<'_>) -> Option<ImageResult> {
        let query = format!(
            "{} {} {}",
            context.genre.trim(),
            context.chapter_title.trim(),
            context.visual_style.trim()
        );
        match self.search.search(&query) {
            Ok(urls) => urls
                .into_iter()
                .map(|url| url.trim().to_string())
                .find(|url| !url.is_empty())
                .map(|reference| ImageResult {
                    reference,
                    prompt: PROMPT_STOCK_LIBRARY.to_string(),
                    source: self.label.clone(),
                }),
            Err(err) => {
                env.sink.log(LogRecord::new(
                    LogLevel::Debug,
                    format!("{} unavailable: {}", self.label, err),
                ));
                None
            }
        }
    }
}

/// Terminal tier; always produces a reference.
#[derive(Clone, Debug)]
pub struct PlaceholderTier {
    url: String,
}

impl PlaceholderTier {
    pub const LABEL: &'static str = "placeholder";

    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let url = if url.trim().is_empty() {
            DEFAULT_PLACEHOLDER_URL.to_string()
        } else {
            url.trim().to_string()
        };
        Self { url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn produce(&self) -> ImageResult {
        ImageResult {
            reference: self.url.clone(),
            prompt: PROMPT_PLACEHOLDER.to_string(),
            source: Self::LABEL.to_string(),
        }
    }
}

impl Default for PlaceholderTier {
    fn default() -> Self {
        Self::new(DEFAULT_PLACEHOLDER_URL)
    }
}

fn data_url(content_type: &str, bytes: &[u8]) -> String {
    let mime = content_type
        .split(';')
        .next()
        .map(str::trim)
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_MIME);
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Single line, at most twenty words.
fn condense_prompt(raw: &str) -> String {
    raw.split_whitespace()
        .take(MAX_PROMPT_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches('"')
        .trim()
        .to_string()
}
