use std::time::Duration;

use log::warn;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use serde::{Deserialize, Serialize};

use book_core::config::{GenerationConfig, TextProviderConfig};
use book_core::{LanguageModel, LanguageModelError};

use crate::base_url::{check_base_url, resolve_base_url};
use crate::error::AdapterError;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Builds the text model named by `generation.model` on the provider chosen
/// by `text.interface_format`.
pub fn create_llm_adapter(
    text: &TextProviderConfig,
    generation: &GenerationConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let fmt = text.interface_format.trim().to_lowercase();
    let timeout = text.timeout.max(1);

    match fmt.as_str() {
        "" | "gemini" => Ok(Box::new(GeminiAdapter::new(
            &generation.api_key,
            &resolve_base_url(&text.base_url, GEMINI_BASE_URL),
            &generation.model,
            text.max_tokens,
            text.temperature,
            timeout,
        )?)),
        "openai" => Ok(Box::new(OpenAiLikeAdapter::new(
            check_base_url(&resolve_base_url(&text.base_url, OPENAI_BASE_URL)),
            optional_string(&generation.api_key),
            generation.model.clone(),
            text.max_tokens,
            text.temperature,
            timeout,
        )?)),
        "ollama" => Ok(Box::new(OpenAiLikeAdapter::new(
            check_base_url(&resolve_base_url(&text.base_url, OLLAMA_BASE_URL)),
            optional_string(&generation.api_key),
            generation.model.clone(),
            text.max_tokens,
            text.temperature,
            timeout,
        )?)),
        other => Err(AdapterError::InvalidConfig(format!(
            "unknown interface_format: {}",
            other
        ))),
    }
}

fn optional_string(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.trim().to_string())
    }
}

pub(crate) fn build_client(timeout: u64) -> Result<Client, AdapterError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout.max(1)))
        .build()?)
}

pub(crate) fn ensure_success(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, AdapterError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(AdapterError::HttpStatus { status, body })
}

struct OpenAiLikeAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    max_tokens: Option<u32>,
    temperature: f32,
}

impl OpenAiLikeAdapter {
    fn new(
        base_url: String,
        api_key: Option<String>,
        model_name: String,
        max_tokens: u32,
        temperature: f32,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::invalid_config("base_url must not be empty"));
        }

        if model_name.trim().is_empty() {
            return Err(AdapterError::invalid_config("model must not be empty"));
        }

        Ok(Self {
            client: build_client(timeout)?,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model_name,
            max_tokens: if max_tokens == 0 {
                None
            } else {
                Some(max_tokens)
            },
            temperature,
        })
    }

    fn send(&self, prompt: &str, system: Option<&str>) -> Result<String, AdapterError> {
        let body = chat_request(&self.model_name, prompt, system, self.max_tokens, self.temperature);

        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = ensure_success(request.json(&body).send()?)?;
        let parsed: ChatCompletionResponse = response.json()?;
        extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
    }
}

impl LanguageModel for OpenAiLikeAdapter {
    fn invoke_with_system(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        Ok(self.send(prompt, system_instruction)?)
    }
}

struct GeminiAdapter {
    client: Client,
    url: String,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiAdapter {
    fn new(
        api_key: &str,
        base_url: &str,
        model_name: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::invalid_config(
                "Gemini api_key must not be empty",
            ));
        }

        if model_name.trim().is_empty() {
            return Err(AdapterError::invalid_config(
                "Gemini model must not be empty",
            ));
        }

        Ok(Self {
            client: build_client(timeout)?,
            url: gemini_url(base_url, model_name, api_key),
            temperature,
            max_tokens,
        })
    }

    fn send(&self, prompt: &str, system: Option<&str>) -> Result<String, AdapterError> {
        let request = GeminiRequest {
            system_instruction: system
                .filter(|text| !text.trim().is_empty())
                .map(|text| GeminiSystemInstruction {
                    parts: vec![GeminiRequestPart { text }],
                }),
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart { text: prompt }],
            }],
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            }),
        };

        let response = ensure_success(self.client.post(&self.url).json(&request).send()?)?;
        let parsed: GeminiResponse = response.json()?;
        parse_gemini_text(parsed)
    }
}

impl LanguageModel for GeminiAdapter {
    fn invoke_with_system(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        Ok(self.send(prompt, system_instruction)?)
    }
}

pub(crate) fn gemini_url(base_url: &str, model_name: &str, api_key: &str) -> String {
    format!(
        "{base}/models/{model}:generateContent?key={api}",
        base = base_url.trim_end_matches('/'),
        model = model_name.trim(),
        api = api_key.trim()
    )
}

fn chat_request<'a>(
    model: &'a str,
    prompt: &'a str,
    system: Option<&'a str>,
    max_tokens: Option<u32>,
    temperature: f32,
) -> ChatCompletionRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.filter(|text| !text.trim().is_empty()) {
        messages.push(ChatMessageRequest {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessageRequest {
        role: "user",
        content: prompt,
    });

    ChatCompletionRequest {
        model,
        messages,
        max_tokens,
        temperature: Some(temperature),
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.and_then(|message| message.content))
        .find(|content| !content.trim().is_empty())
}

#[derive(Serialize)]
pub(crate) struct GeminiRequest<'a> {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub(crate) system_instruction: Option<GeminiSystemInstruction<'a>>,
    pub(crate) contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub(crate) generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
pub(crate) struct GeminiSystemInstruction<'a> {
    pub(crate) parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
pub(crate) struct GeminiRequestContent<'a> {
    pub(crate) role: &'static str,
    pub(crate) parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
pub(crate) struct GeminiRequestPart<'a> {
    pub(crate) text: &'a str,
}

#[derive(Serialize)]
pub(crate) struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiCandidate {
    #[serde(default)]
    pub(crate) content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiContent {
    #[serde(default)]
    pub(crate) parts: Vec<GeminiPart>,
}

/// One response part; parts carrying neither text nor inline data (function
/// calls, thoughts) deserialize with both fields empty.
#[derive(Debug, Deserialize)]
pub(crate) struct GeminiPart {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(rename = "inlineData", default)]
    pub(crate) inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiInlineData {
    #[serde(rename = "mimeType", default)]
    pub(crate) mime_type: Option<String>,
    #[serde(default)]
    pub(crate) data: String,
}

pub(crate) fn warn_on_finish_reason(candidate: &GeminiCandidate) {
    match candidate.finish_reason.as_deref() {
        Some("MAX_TOKENS") => warn!("Gemini response truncated due to max_tokens limit"),
        Some("SAFETY") => warn!("Gemini response blocked by safety filters"),
        Some("RECITATION") => warn!("Gemini response blocked due to recitation concerns"),
        _ => {}
    }
}

fn parse_gemini_text(response: GeminiResponse) -> Result<String, AdapterError> {
    for candidate in response.candidates {
        warn_on_finish_reason(&candidate);

        if let Some(content) = candidate.content {
            let mut text = String::new();
            for part in content.parts {
                if let Some(part_text) = part.text {
                    text.push_str(&part_text);
                }
            }
            if !text.trim().is_empty() {
                return Ok(text);
            }
        }
    }

    Err(AdapterError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_text_parts_are_joined() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"[\"A\","},{"text":" \"B\"]"}]},"finishReason":"STOP"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parse_gemini_text(parsed).unwrap(), "[\"A\", \"B\"]");
    }

    #[test]
    fn gemini_non_text_parts_are_skipped() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"functionCall":{"name":"lookup","args":{}}},
            {"text":"<p>Body</p>"}
        ]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parse_gemini_text(parsed).unwrap(), "<p>Body</p>");
    }

    #[test]
    fn gemini_without_text_is_empty() {
        let body = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"SAFETY"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(
            parse_gemini_text(parsed),
            Err(AdapterError::EmptyResponse)
        ));
    }

    #[test]
    fn gemini_request_carries_system_instruction() {
        let request = GeminiRequest {
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiRequestPart { text: "Be original." }],
            }),
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart { text: "Write." }],
            }],
            generation_config: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be original.");
        assert_eq!(json["contents"][0]["role"], "user");
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn chat_request_puts_system_message_first() {
        let request = chat_request("gpt-4o-mini", "Write.", Some("Be original."), None, 0.9);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Write.");
        assert!(json.get("max_tokens").is_none());

        let bare = chat_request("m", "Write.", Some("  "), Some(10), 0.5);
        let json = serde_json::to_value(&bare).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn choice_content_skips_blank_messages() {
        let body = r#"{"choices":[{"message":{"content":"  "}},{"message":{"content":"<p>Hi</p>"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(extract_choice_content(parsed).as_deref(), Some("<p>Hi</p>"));
    }

    #[test]
    fn unknown_interface_format_is_rejected() {
        let text = TextProviderConfig {
            interface_format: "carrier pigeon".into(),
            ..TextProviderConfig::default()
        };
        let generation = GenerationConfig {
            api_key: "key".into(),
            ..GenerationConfig::default()
        };
        assert!(matches!(
            create_llm_adapter(&text, &generation),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn gemini_requires_api_key() {
        let result = create_llm_adapter(&TextProviderConfig::default(), &GenerationConfig::default());
        assert!(matches!(result, Err(AdapterError::InvalidConfig(_))));
    }
}
