pub mod book;
pub mod chapter;
pub mod config;
pub mod imaging;
pub mod logging;
pub mod model;
pub mod outline;
pub mod pipeline;
pub mod progress;
pub mod prompts;

pub use book::{
    Attribution, Book, BookError, Chapter, ChapterImage, PROMPT_NOT_GENERATED,
    PROMPT_USER_SUPPLIED, SOURCE_NONE, SOURCE_USER_UPLOAD,
};
pub use chapter::{ChapterWriter, ContentError, TARGET_WORDS};
pub use config::{
    Config, ConfigError, ConfigStore, GenerationConfig, ImageProviderConfig, PromptConfig,
    TextProviderConfig, MAX_CHAPTERS, MIN_CHAPTERS,
};
pub use imaging::{
    AttemptEnv, BackoffPolicy, ImageChain, ImageContext, ImageModel, ImageResult, ImageSource,
    ImageSourceError, InferenceEndpoint, InferenceResponse, InferenceTier, InlineImage,
    PlaceholderTier, Sleeper, StockImageSearch, StockSearchTier, ThreadSleeper, VisionTier,
};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink, VecLogSink,
};
pub use model::{LanguageModel, LanguageModelError};
pub use outline::{Outline, OutlineError, OutlineService};
pub use pipeline::{
    regenerate_chapter_image, AssemblyError, AssemblyFailure, AssemblyRun, BookAssembler,
    CancellationFlag,
};
pub use progress::{ActivityEntry, ActivityLog, AssemblyStage, ProgressState, ACTIVITY_LOG_CAPACITY};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate};
