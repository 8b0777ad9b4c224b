use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::imaging::ImageResult;

pub const SOURCE_NONE: &str = "none";
pub const SOURCE_USER_UPLOAD: &str = "user upload";
pub const PROMPT_NOT_GENERATED: &str = "Not Generated";
pub const PROMPT_USER_SUPPLIED: &str = "User Supplied";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    #[error("chapter {index} does not exist (book has {len} chapters)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Who the book is attributed to, as supplied by the identity provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterImage {
    /// Data URL or remote URL.
    pub reference: String,
    pub prompt: String,
    /// Provenance label of the tier or action that set the image.
    pub source: String,
}

impl From<ImageResult> for ChapterImage {
    fn from(result: ImageResult) -> Self {
        Self {
            reference: result.reference,
            prompt: result.prompt,
            source: result.source,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub body_html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ChapterImage>,
}

impl Chapter {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body_html: String::new(),
            image: None,
        }
    }

    pub fn image_reference(&self) -> &str {
        self.image
            .as_ref()
            .map(|image| image.reference.as_str())
            .unwrap_or_default()
    }

    pub fn image_prompt(&self) -> &str {
        self.image
            .as_ref()
            .map(|image| image.prompt.as_str())
            .unwrap_or(PROMPT_NOT_GENERATED)
    }

    pub fn image_source(&self) -> &str {
        self.image
            .as_ref()
            .map(|image| image.source.as_str())
            .unwrap_or(SOURCE_NONE)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub genre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Attribution>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn new(title: impl Into<String>, genre: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            genre: genre.into(),
            author: None,
            chapters: Vec::new(),
        }
    }

    pub fn with_author(mut self, author: Attribution) -> Self {
        self.author = Some(author);
        self
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    pub fn chapter_mut(&mut self, index: usize) -> Result<&mut Chapter, BookError> {
        let len = self.chapters.len();
        self.chapters
            .get_mut(index)
            .ok_or(BookError::IndexOutOfRange { index, len })
    }

    pub fn push_chapter(&mut self, chapter: Chapter) {
        self.chapters.push(chapter);
    }

    /// Direct user edit of a chapter body; no validation.
    pub fn replace_chapter_text(
        &mut self,
        index: usize,
        body_html: impl Into<String>,
    ) -> Result<(), BookError> {
        self.chapter_mut(index)?.body_html = body_html.into();
        Ok(())
    }

    /// Direct user replacement of a chapter image with their own asset.
    pub fn replace_chapter_image(
        &mut self,
        index: usize,
        reference: impl Into<String>,
    ) -> Result<(), BookError> {
        self.chapter_mut(index)?.image = Some(ChapterImage {
            reference: reference.into(),
            prompt: PROMPT_USER_SUPPLIED.to_string(),
            source: SOURCE_USER_UPLOAD.to_string(),
        });
        Ok(())
    }

    pub fn apply_image(&mut self, index: usize, result: ImageResult) -> Result<(), BookError> {
        self.chapter_mut(index)?.image = Some(result.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book() -> Book {
        let mut book = Book::new("Test", "Mystery");
        for title in ["One", "Two", "Three"] {
            let mut chapter = Chapter::new(title);
            chapter.body_html = format!("<p>{title}</p>");
            book.push_chapter(chapter);
        }
        book
    }

    #[test]
    fn chapter_without_image_reports_none() {
        let chapter = Chapter::new("Bare");
        assert_eq!(chapter.image_reference(), "");
        assert_eq!(chapter.image_source(), SOURCE_NONE);
        assert_eq!(chapter.image_prompt(), PROMPT_NOT_GENERATED);
    }

    #[test]
    fn text_edit_touches_only_one_chapter() {
        let mut book = sample_book();
        let before = book.clone();

        book.replace_chapter_text(1, "<p>Rewritten</p>").unwrap();

        assert_eq!(book.chapters[1].body_html, "<p>Rewritten</p>");
        assert_eq!(book.chapters[0], before.chapters[0]);
        assert_eq!(book.chapters[2], before.chapters[2]);
        assert_eq!(book.chapters[1].title, before.chapters[1].title);
    }

    #[test]
    fn user_image_sets_provenance() {
        let mut book = sample_book();
        book.replace_chapter_image(0, "data:image/png;base64,AAAA")
            .unwrap();
        assert_eq!(book.chapters[0].image_source(), SOURCE_USER_UPLOAD);
        assert_eq!(book.chapters[0].image_prompt(), PROMPT_USER_SUPPLIED);
        assert!(book.chapters[1].image.is_none());
    }

    #[test]
    fn out_of_range_edit_is_rejected() {
        let mut book = sample_book();
        assert_eq!(
            book.replace_chapter_text(3, "nope"),
            Err(BookError::IndexOutOfRange { index: 3, len: 3 })
        );
    }

    #[test]
    fn book_round_trips_through_json() {
        let mut book = sample_book().with_author(Attribution {
            display_name: "Ada".into(),
            avatar: None,
        });
        book.replace_chapter_image(2, "https://example.com/a.png")
            .unwrap();
        let json = serde_json::to_string(&book).unwrap();
        let parsed: Book = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, book);
    }
}
