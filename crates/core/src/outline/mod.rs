use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, LanguageModelError};
use crate::prompts::{PromptError, PromptRegistry, OUTLINE_PROMPT};

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("authentication required: the text provider API key is empty")]
    CredentialMissing,
    #[error("`{field}` is required before an outline can be generated")]
    MissingField { field: &'static str },
    #[error("failed to render outline prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("provider returned a malformed outline: {reason}")]
    MalformedResponse { reason: String },
    #[error("outline request failed: {0}")]
    ProviderFailure(#[source] LanguageModelError),
}

/// Ordered chapter titles. Editable until handed to the assembler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outline {
    titles: Vec<String>,
}

impl Outline {
    pub fn new<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            titles: titles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn title(&self, index: usize) -> Option<&str> {
        self.titles.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    /// Returns `false` when `index` is out of range.
    pub fn rename(&mut self, index: usize, title: impl Into<String>) -> bool {
        match self.titles.get_mut(index) {
            Some(slot) => {
                *slot = title.into();
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, index: usize, title: impl Into<String>) {
        let index = index.min(self.titles.len());
        self.titles.insert(index, title.into());
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        if index < self.titles.len() {
            Some(self.titles.remove(index))
        } else {
            None
        }
    }

    pub fn into_titles(self) -> Vec<String> {
        self.titles
    }
}

pub struct OutlineService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> OutlineService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// One provider call; the caller decides whether to retry the whole step.
    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        config: &GenerationConfig,
    ) -> Result<Outline, OutlineError> {
        if !config.has_credential() {
            return Err(OutlineError::CredentialMissing);
        }
        if config.title.trim().is_empty() {
            return Err(OutlineError::MissingField { field: "title" });
        }
        if config.topic.trim().is_empty() {
            return Err(OutlineError::MissingField { field: "topic" });
        }

        let requested = config.requested_chapters();
        let prompt = self.prompts.format_with(
            OUTLINE_PROMPT,
            [
                ("genre", config.genre.trim().to_string()),
                ("title", config.title.trim().to_string()),
                ("topic", config.topic.trim().to_string()),
                ("target_audience", config.target_audience.trim().to_string()),
                ("language", config.language.trim().to_string()),
                ("chapter_count", requested.to_string()),
            ],
        )?;

        self.log(LogLevel::Info, "Booting creative engine...");
        let response = model
            .invoke(&prompt)
            .map_err(OutlineError::ProviderFailure)?;

        let mut titles = parse_outline(&response)?;
        let requested = requested as usize;
        if titles.len() > requested {
            self.log(
                LogLevel::Warn,
                format!(
                    "Provider returned {} chapter titles, keeping the first {}.",
                    titles.len(),
                    requested
                ),
            );
            titles.truncate(requested);
        } else if titles.len() < requested {
            self.log(
                LogLevel::Warn,
                format!(
                    "Provider returned {} chapter titles instead of {}; accepting the shorter outline.",
                    titles.len(),
                    requested
                ),
            );
        }

        self.log(LogLevel::Info, "Blueprint finalized.");
        Ok(Outline { titles })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

/// Removes markdown code fences (with or without a language tag).
pub fn strip_code_fences(text: &str) -> String {
    fence_regex().replace_all(text, "").trim().to_string()
}

/// Parses a provider reply into chapter titles. Blank titles are dropped; an
/// empty result is malformed.
pub fn parse_outline(response: &str) -> Result<Vec<String>, OutlineError> {
    let cleaned = strip_code_fences(response);
    if cleaned.is_empty() {
        return Err(OutlineError::MalformedResponse {
            reason: "empty response".to_string(),
        });
    }

    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&cleaned).map_err(|err| OutlineError::MalformedResponse {
            reason: format!("expected a JSON array of strings: {err}"),
        })?;

    let mut titles = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let serde_json::Value::String(title) = entry else {
            return Err(OutlineError::MalformedResponse {
                reason: format!("entry {} is not a string", index + 1),
            });
        };
        let title = title.trim();
        if !title.is_empty() {
            titles.push(title.to_string());
        }
    }

    if titles.is_empty() {
        return Err(OutlineError::MalformedResponse {
            reason: "no chapter titles in response".to_string(),
        });
    }

    Ok(titles)
}

fn fence_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"```[A-Za-z]*").expect("invalid code fence regex"))
}
