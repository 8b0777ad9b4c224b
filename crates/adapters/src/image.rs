use std::sync::Arc;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use book_core::config::Config;
use book_core::{
    ImageChain, ImageModel, ImageSourceError, InferenceEndpoint, InferenceResponse, InferenceTier,
    InlineImage, LanguageModel, PlaceholderTier, PromptRegistry, StockSearchTier, VisionTier,
};

use crate::base_url::resolve_base_url;
use crate::error::AdapterError;
use crate::llm::{
    build_client, ensure_success, gemini_url, warn_on_finish_reason, GeminiRequest,
    GeminiRequestContent, GeminiRequestPart, GeminiResponse, GEMINI_BASE_URL,
};
use crate::search::LexicaSearch;

pub const SDXL_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";
pub const SD15_MODEL: &str = "runwayml/stable-diffusion-v1-5";
pub const TINY_SD_MODEL: &str = "segmind/tiny-sd";

const HF_BASE_URL: &str = "https://api-inference.huggingface.co";

/// Assembles the fallback tiers in their fixed order. The vision tier is only
/// added when a text model and an image model id are both available.
pub fn create_image_chain(
    config: &Config,
    text_model: Option<Arc<dyn LanguageModel>>,
    prompts: &PromptRegistry,
) -> Result<ImageChain, AdapterError> {
    let generation = &config.generation;
    let images = &config.image_provider;
    let prompt_error = |err: book_core::PromptError| AdapterError::InvalidConfig(err.to_string());

    let mut chain = ImageChain::new(PlaceholderTier::new(images.placeholder_url.as_str()));

    match text_model {
        Some(text_model)
            if generation.has_credential() && !generation.image_model.trim().is_empty() =>
        {
            let renderer = GeminiImageAdapter::new(
                &generation.api_key,
                &images.gemini_base_url,
                &generation.image_model,
                images.timeout,
            )?;
            let tier = VisionTier::new("Gemini Vision", text_model, Arc::new(renderer), prompts)
                .map_err(prompt_error)?;
            chain.push_tier(Box::new(tier));
        }
        _ => debug!("vision tier skipped: no text model or image model configured"),
    }

    let endpoint: Arc<dyn InferenceEndpoint> = Arc::new(HuggingFaceInference::new(
        &images.inference_base_url,
        generation.image_credential(),
        images.timeout,
    )?);
    for (label, model_id, attempts) in [
        ("Stable Diffusion XL", SDXL_MODEL, 2),
        ("Stable Diffusion 1.5", SD15_MODEL, 1),
        ("Tiny SD", TINY_SD_MODEL, 1),
    ] {
        let tier = InferenceTier::new(label, endpoint.clone(), model_id, attempts, prompts)
            .map_err(prompt_error)?;
        chain.push_tier(Box::new(tier));
    }

    let search = LexicaSearch::new(&images.stock_search_url, images.timeout)?;
    chain.push_tier(Box::new(StockSearchTier::new(
        "Lexica Media Library",
        Arc::new(search),
    )));

    Ok(chain)
}

/// Multimodal Gemini model returning the image as an inline base64 part.
pub struct GeminiImageAdapter {
    client: Client,
    url: String,
}

impl GeminiImageAdapter {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model_name: &str,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::invalid_config(
                "Gemini api_key must not be empty",
            ));
        }
        if model_name.trim().is_empty() {
            return Err(AdapterError::invalid_config(
                "image model must not be empty",
            ));
        }

        Ok(Self {
            client: build_client(timeout)?,
            url: gemini_url(
                &resolve_base_url(base_url, GEMINI_BASE_URL),
                model_name,
                api_key,
            ),
        })
    }

    fn send(&self, prompt: &str) -> Result<InlineImage, AdapterError> {
        let request = GeminiRequest {
            system_instruction: None,
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart { text: prompt }],
            }],
            generation_config: None,
        };

        let response = ensure_success(self.client.post(&self.url).json(&request).send()?)?;
        let parsed: GeminiResponse = response.json()?;
        parse_inline_image(parsed)
    }
}

impl ImageModel for GeminiImageAdapter {
    fn render(&self, prompt: &str) -> Result<InlineImage, ImageSourceError> {
        Ok(self.send(prompt)?)
    }
}

fn parse_inline_image(response: GeminiResponse) -> Result<InlineImage, AdapterError> {
    for candidate in response.candidates {
        warn_on_finish_reason(&candidate);

        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(inline_data) = part.inline_data {
                if !inline_data.data.trim().is_empty() {
                    return Ok(InlineImage {
                        mime_type: inline_data.mime_type,
                        data: inline_data.data,
                    });
                }
            }
        }
    }

    Err(AdapterError::EmptyResponse)
}

/// Hosted text-to-image inference (`POST {base}/models/{id}`).
pub struct HuggingFaceInference {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HuggingFaceInference {
    pub fn new(base_url: &str, token: Option<&str>, timeout: u64) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: resolve_base_url(base_url, HF_BASE_URL),
            token: token
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
        })
    }

    fn send(&self, model_id: &str, prompt: &str) -> Result<InferenceResponse, AdapterError> {
        let url = format!("{}/models/{}", self.base_url, model_id.trim());
        let mut request = self
            .client
            .post(&url)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .json(&InferenceRequest { inputs: prompt });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().unwrap_or_default();
            return Ok(InferenceResponse::Loading {
                estimated_secs: loading_estimate(&body),
            });
        }

        let response = ensure_success(response)?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes()?.to_vec();
        if bytes.is_empty() {
            warn!("inference endpoint returned an empty body for {model_id}");
        }
        Ok(InferenceResponse::Image {
            content_type,
            bytes,
        })
    }
}

impl InferenceEndpoint for HuggingFaceInference {
    fn infer(&self, model_id: &str, prompt: &str) -> Result<InferenceResponse, ImageSourceError> {
        Ok(self.send(model_id, prompt)?)
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoadingBody {
    #[serde(default)]
    estimated_time: Option<f64>,
}

/// `estimated_time` from a 503 body; anything unparsable yields `None`.
fn loading_estimate(body: &str) -> Option<f64> {
    serde_json::from_str::<LoadingBody>(body)
        .ok()
        .and_then(|body| body.estimated_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_image_is_taken_from_first_data_part() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"text":"Here is your image"},
            {"inlineData":{"mimeType":"image/jpeg","data":"QUJD"}}
        ]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        let image = parse_inline_image(parsed).unwrap();
        assert_eq!(image.mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(image.data, "QUJD");
    }

    #[test]
    fn text_only_reply_has_no_image() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"I cannot draw that."}]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(
            parse_inline_image(parsed),
            Err(AdapterError::EmptyResponse)
        ));
    }

    #[test]
    fn loading_estimate_reads_estimated_time() {
        assert_eq!(
            loading_estimate(r#"{"error":"Model is currently loading","estimated_time":31.5}"#),
            Some(31.5)
        );
        assert_eq!(loading_estimate(r#"{"error":"loading"}"#), None);
        assert_eq!(loading_estimate("<html>busy</html>"), None);
    }

    #[test]
    fn chain_without_text_model_starts_at_inference() {
        let config = Config::default();
        let prompts = PromptRegistry::new().unwrap();
        let chain = create_image_chain(&config, None, &prompts).unwrap();
        assert_eq!(
            chain.tier_labels(),
            [
                "Stable Diffusion XL",
                "Stable Diffusion 1.5",
                "Tiny SD",
                "Lexica Media Library",
                PlaceholderTier::LABEL,
            ]
        );
    }
}
