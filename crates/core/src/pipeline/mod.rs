//! Outline to finished book, one chapter at a time.
//!
//! [`BookAssembler::assemble`] returns an [`AssemblyRun`], an iterator of
//! [`ProgressState`] snapshots. Each call to `next` performs at most one
//! provider step, so a caller sees progress between every suspension point
//! and can stop pulling (or raise the cancellation flag) between chapters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::book::{Book, BookError, Chapter};
use crate::chapter::{ChapterWriter, ContentError};
use crate::config::GenerationConfig;
use crate::imaging::{ImageChain, ImageContext, ImageResult};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::LanguageModel;
use crate::outline::Outline;
use crate::progress::{ActivityLogSink, AssemblyStage, ProgressState};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("authentication required: the text provider API key is empty")]
    CredentialMissing,
    #[error("the outline has no chapters")]
    EmptyOutline,
    #[error("chapter {chapter} (\"{title}\") failed: {source}")]
    Content {
        chapter: usize,
        title: String,
        #[source]
        source: ContentError,
    },
    #[error("assembly cancelled after {completed} chapters")]
    Cancelled { completed: usize },
    #[error("deadline passed after {completed} chapters")]
    DeadlineExceeded { completed: usize },
    #[error(transparent)]
    Book(#[from] BookError),
}

/// A halted run. The chapters finished before the failure are kept.
#[derive(Debug)]
pub struct AssemblyFailure {
    pub error: AssemblyError,
    pub book: Book,
}

/// Shared flag checked at every chapter boundary.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BookAssembler<'a> {
    model: &'a dyn LanguageModel,
    writer: &'a ChapterWriter<'a>,
    images: &'a ImageChain,
    sink: &'a dyn LogSink,
    cancellation: CancellationFlag,
    deadline: Option<Instant>,
}

impl<'a> BookAssembler<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        writer: &'a ChapterWriter<'a>,
        images: &'a ImageChain,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            model,
            writer,
            images,
            sink,
            cancellation: CancellationFlag::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// Starts a run over a snapshot of `outline`; later edits to the outline
    /// do not affect it.
    pub fn assemble(&self, outline: &Outline, config: &GenerationConfig) -> AssemblyRun<'_> {
        let titles = outline.titles().to_vec();
        AssemblyRun {
            assembler: self,
            progress: ProgressState::new(titles.len()),
            book: Book::new(config.title.trim(), config.genre.trim()),
            titles,
            config: config.clone(),
            activity: ActivityLogSink::new(self.sink),
            phase: Phase::Start,
            error: None,
        }
    }

    /// Drives a run to the end, reporting every snapshot to `on_progress`.
    pub fn assemble_with<F>(
        &self,
        outline: &Outline,
        config: &GenerationConfig,
        mut on_progress: F,
    ) -> Result<Book, AssemblyFailure>
    where
        F: FnMut(&ProgressState),
    {
        let mut run = self.assemble(outline, config);
        for progress in &mut run {
            on_progress(&progress);
        }
        run.into_outcome()
    }

    /// See [`regenerate_chapter_image`].
    pub fn regenerate_chapter_image(
        &self,
        book: &mut Book,
        index: usize,
        config: &GenerationConfig,
    ) -> Result<ImageResult, AssemblyError> {
        Ok(regenerate_chapter_image(
            self.images,
            self.sink,
            book,
            index,
            config,
        )?)
    }
}

/// Re-runs the image chain for one chapter of an existing book. Text and
/// the other chapters are untouched. No text model or credential is needed;
/// whatever tiers `images` holds are tried in order.
pub fn regenerate_chapter_image(
    images: &ImageChain,
    sink: &dyn LogSink,
    book: &mut Book,
    index: usize,
    config: &GenerationConfig,
) -> Result<ImageResult, BookError> {
    let title = book.chapter_mut(index)?.title.clone();
    sink.log(LogRecord::info(format!(
        "Regenerating visuals for: {title}..."
    )));

    let context = ImageContext::new(&title, &config.genre, &config.image_style);
    let result = images.acquire(&context, sink);
    book.apply_image(index, result.clone())?;

    sink.log(LogRecord::info(format!(
        "Asset synchronized for chapter {}",
        index + 1
    )));
    Ok(result)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Start,
    Begin(usize),
    Draft(usize),
    Finish,
    Done,
}

pub struct AssemblyRun<'r> {
    assembler: &'r BookAssembler<'r>,
    titles: Vec<String>,
    config: GenerationConfig,
    book: Book,
    progress: ProgressState,
    activity: ActivityLogSink<'r>,
    phase: Phase,
    error: Option<AssemblyError>,
}

impl<'r> AssemblyRun<'r> {
    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    pub fn stage(&self) -> AssemblyStage {
        self.progress.stage
    }

    pub fn error(&self) -> Option<&AssemblyError> {
        self.error.as_ref()
    }

    /// Finishes any remaining steps and hands over the book.
    pub fn into_outcome(mut self) -> Result<Book, AssemblyFailure> {
        while self.next().is_some() {}
        match self.error.take() {
            Some(error) => Err(AssemblyFailure {
                error,
                book: self.book,
            }),
            None => Ok(self.book),
        }
    }

    fn start(&mut self) -> ProgressState {
        if !self.config.has_credential() {
            return self.fail(AssemblyError::CredentialMissing);
        }
        if self.titles.is_empty() {
            return self.fail(AssemblyError::EmptyOutline);
        }
        self.log(
            LogLevel::Info,
            format!("Assembling {} chapters.", self.titles.len()),
        );
        self.begin(0)
    }

    fn begin(&mut self, index: usize) -> ProgressState {
        let completed = self.book.len();
        if self.assembler.cancellation.is_cancelled() {
            return self.fail(AssemblyError::Cancelled { completed });
        }
        if let Some(deadline) = self.assembler.deadline {
            if Instant::now() >= deadline {
                return self.fail(AssemblyError::DeadlineExceeded { completed });
            }
        }

        let total = self.titles.len();
        self.progress.current_chapter_index = index + 1;
        self.progress.percent_complete = index as f32 / total as f32 * 100.0;
        self.progress.stage = AssemblyStage::Running {
            chapter_index: index,
        };
        let message = format!("Drafting Chapter {}: {}...", index + 1, self.titles[index]);
        self.log(LogLevel::Info, message);

        self.phase = Phase::Draft(index);
        self.snapshot()
    }

    fn draft(&mut self, index: usize) -> ProgressState {
        let title = self.titles[index].clone();
        let writer = self.assembler.writer;

        let body = match writer.generate_chapter_text(self.assembler.model, &title, &self.config) {
            Ok(body) => body,
            Err(source) => {
                return self.fail(AssemblyError::Content {
                    chapter: index + 1,
                    title,
                    source,
                })
            }
        };

        let mut chapter = Chapter::new(title.clone());
        chapter.body_html = body;

        if self.config.include_images {
            let context = ImageContext::new(&title, &self.config.genre, &self.config.image_style);
            let result = self.assembler.images.acquire(&context, &self.activity);
            chapter.image = Some(result.into());
        }

        self.book.push_chapter(chapter);
        self.log(
            LogLevel::Info,
            format!("Chapter {} drafted: {}", index + 1, title),
        );

        self.phase = if index + 1 < self.titles.len() {
            Phase::Begin(index + 1)
        } else {
            Phase::Finish
        };
        self.snapshot()
    }

    fn finish(&mut self) -> ProgressState {
        self.progress.percent_complete = 100.0;
        self.progress.stage = AssemblyStage::Completed;
        self.log(LogLevel::Info, "Publication process finished.");
        self.phase = Phase::Done;
        self.snapshot()
    }

    fn fail(&mut self, error: AssemblyError) -> ProgressState {
        let message = error.to_string();
        self.log(LogLevel::Error, format!("System error: {message}"));
        self.progress.last_error = Some(message);
        self.progress.stage = AssemblyStage::Failed;
        self.error = Some(error);
        self.phase = Phase::Done;
        self.snapshot()
    }

    fn snapshot(&mut self) -> ProgressState {
        self.progress.log = self.activity.snapshot();
        self.progress.clone()
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.activity.log(LogRecord::new(level, message.into()));
    }
}

impl Iterator for AssemblyRun<'_> {
    type Item = ProgressState;

    fn next(&mut self) -> Option<ProgressState> {
        let progress = match self.phase {
            Phase::Done => return None,
            Phase::Start => self.start(),
            Phase::Begin(index) => self.begin(index),
            Phase::Draft(index) => self.draft(index),
            Phase::Finish => self.finish(),
        };
        Some(progress)
    }
}
