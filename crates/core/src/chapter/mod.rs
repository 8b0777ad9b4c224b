use thiserror::Error;

use crate::config::GenerationConfig;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, LanguageModelError};
use crate::outline::strip_code_fences;
use crate::prompts::{PromptError, PromptRegistry, AUTHOR_SYSTEM_PROMPT, CHAPTER_PROMPT};

pub const TARGET_WORDS: u32 = 800;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to render chapter prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("chapter request failed: {0}")]
    ProviderFailure(#[source] LanguageModelError),
    #[error("provider returned no text for chapter `{title}`")]
    EmptyResponse { title: String },
}

/// Drafts chapter bodies. The author system instruction is captured once and
/// sent unchanged with every request made through this writer.
pub struct ChapterWriter<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    system_instruction: String,
    target_words: u32,
}

impl<'a> ChapterWriter<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Result<Self, PromptError> {
        let system_instruction = prompts.text(AUTHOR_SYSTEM_PROMPT)?.trim().to_string();
        Ok(Self {
            prompts,
            sink,
            system_instruction,
            target_words: TARGET_WORDS,
        })
    }

    pub fn with_target_words(mut self, words: u32) -> Self {
        self.target_words = words.max(1);
        self
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn generate_chapter_text<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        chapter_title: &str,
        config: &GenerationConfig,
    ) -> Result<String, ContentError> {
        let prompt = self.prompts.format_with(
            CHAPTER_PROMPT,
            [
                ("chapter_title", chapter_title.trim().to_string()),
                ("book_title", config.title.trim().to_string()),
                ("genre", config.genre.trim().to_string()),
                ("pov", config.pov.trim().to_string()),
                ("tone", config.tone.trim().to_string()),
                ("style", config.style.trim().to_string()),
                ("language", config.language.trim().to_string()),
                ("word_count", self.target_words.to_string()),
            ],
        )?;

        let response = model
            .invoke_with_system(&prompt, Some(&self.system_instruction))
            .map_err(ContentError::ProviderFailure)?;

        let body = ensure_paragraph_markup(&strip_code_fences(&response));
        if body.is_empty() {
            self.sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("Provider returned an empty draft for \"{chapter_title}\"."),
            ));
            return Err(ContentError::EmptyResponse {
                title: chapter_title.to_string(),
            });
        }

        Ok(body)
    }
}

/// Wraps blank-line separated plain text in `<p>` tags. Text that already
/// carries paragraph markup is returned as is.
pub fn ensure_paragraph_markup(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() || text.to_ascii_lowercase().contains("<p") {
        return text.to_string();
    }

    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| format!("<p>{}</p>", escape_html(&paragraph.replace('\n', " "))))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogSink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        systems: Mutex<Vec<Option<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl LanguageModel for RecordingModel {
        fn invoke_with_system(
            &self,
            prompt: &str,
            system_instruction: Option<&str>,
        ) -> Result<String, LanguageModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.systems
                .lock()
                .unwrap()
                .push(system_instruction.map(str::to_string));
            Ok("<p>It rained.</p>".to_string())
        }
    }

    #[test]
    fn system_instruction_is_identical_across_chapters() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = NullLogSink;
        let writer = ChapterWriter::new(&prompts, &sink).unwrap();
        let model = RecordingModel::default();
        let config = GenerationConfig {
            title: "Test".into(),
            pov: "First Person".into(),
            ..GenerationConfig::default()
        };

        for title in ["One", "Two", "Three"] {
            writer.generate_chapter_text(&model, title, &config).unwrap();
        }

        let systems = model.systems.lock().unwrap();
        assert_eq!(systems.len(), 3);
        assert!(systems
            .iter()
            .all(|system| system.as_deref() == Some(writer.system_instruction())));
        assert!(writer.system_instruction().contains("ORIGINAL characters"));

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].contains("Write chapter \"Two\" for book \"Test\"."));
        assert!(prompts[1].contains("POV: First Person."));
        assert!(prompts[1].contains("~800 words"));
    }

    #[test]
    fn plain_text_is_wrapped_in_paragraphs() {
        let html = ensure_paragraph_markup("First line\ncontinues.\n\nSecond <quiet> one.");
        assert_eq!(
            html,
            "<p>First line continues.</p>\n<p>Second &lt;quiet&gt; one.</p>"
        );
    }

    #[test]
    fn existing_markup_is_kept() {
        let html = "<p>Already</p>\n<P>formatted</P>";
        assert_eq!(ensure_paragraph_markup(html), html);
    }

    #[test]
    fn fenced_html_is_unwrapped() {
        let body = ensure_paragraph_markup(&strip_code_fences("```html\n<p>Inside</p>\n```"));
        assert_eq!(body, "<p>Inside</p>");
    }
}
