use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use book_adapters::{create_image_chain, create_llm_adapter, AdapterError};
use book_core::{
    regenerate_chapter_image, AssemblyError, Attribution, Book, BookAssembler, BookError,
    ChapterWriter, Config, ConfigStore, LanguageModel, LanguageModelError, LogLevel, LogRecord,
    LogSink, Outline, OutlineError, OutlineService, PromptError, PromptRegistry, StdoutLogSink,
};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let sink = StdoutLogSink::new();

    match cli.command {
        Command::Config(command) => handle_config(&cli.config, command, &sink),
        Command::Outline(command) => handle_outline(&cli.config, command, &sink),
        Command::Book(command) => handle_book(&cli.config, command, &sink),
    }
}

fn handle_config(
    config_path: &Path,
    command: ConfigCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::TestLlm => run_test_llm(config_path, sink),
    }
}

fn handle_outline(
    config_path: &Path,
    command: OutlineCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        OutlineCommand::Generate(args) => run_generate_outline(config_path, args, sink),
    }
}

fn handle_book(
    config_path: &Path,
    command: BookCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        BookCommand::Assemble(args) => run_assemble(config_path, args, sink),
        BookCommand::RegenImage(args) => run_regen_image(config_path, args, sink),
        BookCommand::SetText(args) => run_set_text(args, sink),
        BookCommand::SetImage(args) => run_set_image(args, sink),
        BookCommand::Show(args) => run_show(args),
    }
}

fn run_test_llm(config_path: &Path, sink: &dyn LogSink) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path)?;
    let config = store.config();

    sink.log(LogRecord::info(format!(
        "Testing text provider: {} ({})",
        config.generation.model, config.text_provider.interface_format
    )));
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!("Base URL: {}", config.text_provider.base_url),
    ));

    let adapter = create_llm_adapter(&config.text_provider, &config.generation)?;
    match adapter.invoke("Please reply 'OK'") {
        Ok(response) if response.trim().is_empty() => {
            sink.log(LogRecord::error("Provider test failed: empty reply"));
            Err(CliError::TestFailed(
                "text provider returned an empty reply".to_string(),
            ))
        }
        Ok(response) => {
            sink.log(LogRecord::info("Provider test succeeded."));
            sink.log(LogRecord::new(
                LogLevel::Debug,
                format!("Reply: {}", response.trim()),
            ));
            Ok(())
        }
        Err(err) => {
            sink.log(LogRecord::error(format!("Provider test failed: {err}")));
            Err(CliError::Model(err))
        }
    }
}

fn run_generate_outline(
    config_path: &Path,
    args: OutlineGenerateArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path)?;
    let config = store.config();
    let prompts = PromptRegistry::from_prompt_config(&config.prompts)?;
    let model = create_llm_adapter(&config.text_provider, &config.generation)?;

    let outline = OutlineService::new(&prompts, sink).generate(model.as_ref(), &config.generation)?;

    for (index, title) in outline.titles().iter().enumerate() {
        println!("{:>2}. {}", index + 1, title);
    }
    if let Some(path) = args.output {
        write_json(&path, &outline)?;
        sink.log(LogRecord::info(format!("Outline written to {}", path.display())));
    }

    Ok(())
}

fn run_assemble(
    config_path: &Path,
    args: AssembleArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path)?;
    let config = store.config();
    let generation = &config.generation;
    let prompts = PromptRegistry::from_prompt_config(&config.prompts)?;

    let model: Arc<dyn LanguageModel> =
        Arc::from(create_llm_adapter(&config.text_provider, generation)?);

    let outline = match &args.outline {
        Some(path) => {
            let outline: Outline = read_json(path)?;
            sink.log(LogRecord::info(format!(
                "Loaded outline with {} chapters from {}",
                outline.len(),
                path.display()
            )));
            outline
        }
        None => OutlineService::new(&prompts, sink).generate(model.as_ref(), generation)?,
    };

    let images = create_image_chain(config, Some(Arc::clone(&model)), &prompts)?;
    let writer = ChapterWriter::new(&prompts, sink)?;
    let mut assembler = BookAssembler::new(model.as_ref(), &writer, &images, sink);
    if let Some(deadline) = args.deadline_minutes.and_then(deadline_after) {
        assembler = assembler.with_deadline(deadline);
    }

    let author = args.author.as_ref().map(|name| Attribution {
        display_name: name.trim().to_string(),
        avatar: args.avatar.clone(),
    });

    let mut run = assembler.assemble(&outline, generation);
    for progress in &mut run {
        println!(
            "[{:>5.1}%] {}/{} {}",
            progress.percent_complete,
            progress.current_chapter_index,
            progress.total_chapters,
            progress.stage
        );
    }

    match run.into_outcome() {
        Ok(book) => {
            let book = attach_author(book, author);
            write_json(&args.output, &book)?;
            sink.log(LogRecord::info(format!(
                "Book with {} chapters written to {}",
                book.len(),
                args.output.display()
            )));
            Ok(())
        }
        Err(failure) => {
            let book = attach_author(failure.book, author);
            if !book.is_empty() {
                write_json(&args.output, &book)?;
                sink.log(LogRecord::warn(format!(
                    "Partial book with {} chapters written to {}",
                    book.len(),
                    args.output.display()
                )));
            }
            Err(CliError::Assembly(failure.error))
        }
    }
}

fn run_regen_image(
    config_path: &Path,
    args: RegenImageArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let index = chapter_index(args.chapter)?;
    let store = ConfigStore::open(config_path)?;
    let config = store.config();
    let prompts = PromptRegistry::from_prompt_config(&config.prompts)?;

    let images = create_image_chain(config, optional_text_model(config, sink), &prompts)?;

    let mut book: Book = read_json(&args.book)?;
    let result = regenerate_chapter_image(&images, sink, &mut book, index, &config.generation)?;
    write_json(&args.book, &book)?;

    println!("{} -> {} ({})", args.chapter, result.source, result.prompt);
    Ok(())
}

/// Text model for the vision tier, or `None` when the config cannot build one.
fn optional_text_model(config: &Config, sink: &dyn LogSink) -> Option<Arc<dyn LanguageModel>> {
    match create_llm_adapter(&config.text_provider, &config.generation) {
        Ok(model) => Some(Arc::from(model)),
        Err(err) => {
            sink.log(LogRecord::warn(format!(
                "Text provider unavailable, skipping the vision tier: {err}"
            )));
            None
        }
    }
}

fn run_set_text(args: SetTextArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let index = chapter_index(args.chapter)?;
    let mut book: Book = read_json(&args.book)?;
    let body = fs::read_to_string(&args.file).map_err(|source| CliError::Io {
        path: args.file.clone(),
        source,
    })?;

    book.replace_chapter_text(index, body)?;
    write_json(&args.book, &book)?;

    sink.log(LogRecord::info(format!(
        "Chapter {} text replaced.",
        args.chapter
    )));
    Ok(())
}

fn run_set_image(args: SetImageArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let index = chapter_index(args.chapter)?;
    let mut book: Book = read_json(&args.book)?;
    let bytes = fs::read(&args.image).map_err(|source| CliError::Io {
        path: args.image.clone(),
        source,
    })?;

    let reference = format!(
        "data:{};base64,{}",
        mime_for_path(&args.image),
        STANDARD.encode(bytes)
    );
    book.replace_chapter_image(index, reference)?;
    write_json(&args.book, &book)?;

    sink.log(LogRecord::info(format!(
        "Chapter {} image replaced with {}.",
        args.chapter,
        args.image.display()
    )));
    Ok(())
}

fn run_show(args: ShowArgs) -> Result<(), CliError> {
    let book: Book = read_json(&args.book)?;

    println!("{} ({})", book.title, book.genre);
    if let Some(author) = &book.author {
        println!("by {}", author.display_name);
    }
    for (index, chapter) in book.chapters.iter().enumerate() {
        println!("{:>2}. {}", index + 1, chapter.title);
        println!("    image source: {}", chapter.image_source());
        println!("    image prompt: {}", chapter.image_prompt());
    }

    Ok(())
}

fn attach_author(book: Book, author: Option<Attribution>) -> Book {
    match author {
        Some(author) if !author.display_name.is_empty() => book.with_author(author),
        _ => book,
    }
}

/// `None` when the deadline lies beyond what `Instant` can represent.
fn deadline_after(minutes: u64) -> Option<Instant> {
    Instant::now().checked_add(Duration::from_secs(minutes.saturating_mul(60)))
}

fn chapter_index(number: usize) -> Result<usize, CliError> {
    if number == 0 {
        Err(CliError::InvalidChapterNumber(number))
    } else {
        Ok(number - 1)
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let data = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    let serialized = serde_json::to_string_pretty(value).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, serialized).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] book_core::ConfigError),
    #[error("chapter numbers start at 1, got {0}")]
    InvalidChapterNumber(usize),
    #[error("failed to access `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid JSON in `{path}`: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("model call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error("outline generation failed: {0}")]
    Outline(#[from] OutlineError),
    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("{0}")]
    Book(#[from] BookError),
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(name = "bookctl", version, about = "AI book generator command line")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configuration checks
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Outline operations
    #[command(subcommand)]
    Outline(OutlineCommand),
    /// Book assembly and editing
    #[command(subcommand)]
    Book(BookCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Send one prompt to the configured text provider
    TestLlm,
}

#[derive(Subcommand)]
enum OutlineCommand {
    /// Generate chapter titles from the configured book details
    Generate(OutlineGenerateArgs),
}

#[derive(Subcommand)]
enum BookCommand {
    /// Draft every chapter of an outline into a book
    Assemble(AssembleArgs),
    /// Run the image chain again for one chapter
    RegenImage(RegenImageArgs),
    /// Replace a chapter body with the contents of a file
    SetText(SetTextArgs),
    /// Replace a chapter image with a local file
    SetImage(SetImageArgs),
    /// List chapters with image provenance
    Show(ShowArgs),
}

#[derive(Args)]
struct OutlineGenerateArgs {
    /// Save the outline as JSON
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct AssembleArgs {
    /// Use a saved outline instead of generating one
    #[arg(long, value_name = "FILE")]
    outline: Option<PathBuf>,
    #[arg(long, value_name = "FILE", default_value = "book.json")]
    output: PathBuf,
    /// Display name the book is attributed to
    #[arg(long, value_name = "NAME")]
    author: Option<String>,
    #[arg(long, value_name = "URL", requires = "author")]
    avatar: Option<String>,
    /// Stop at the next chapter boundary once this many minutes have passed
    #[arg(long, value_name = "MINUTES")]
    deadline_minutes: Option<u64>,
}

#[derive(Args)]
struct RegenImageArgs {
    #[arg(long, value_name = "FILE")]
    book: PathBuf,
    /// Chapter number, starting at 1
    #[arg(long, value_name = "N")]
    chapter: usize,
}

#[derive(Args)]
struct SetTextArgs {
    #[arg(long, value_name = "FILE")]
    book: PathBuf,
    /// Chapter number, starting at 1
    #[arg(long, value_name = "N")]
    chapter: usize,
    /// HTML body to store verbatim
    #[arg(long, value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
struct SetImageArgs {
    #[arg(long, value_name = "FILE")]
    book: PathBuf,
    /// Chapter number, starting at 1
    #[arg(long, value_name = "N")]
    chapter: usize,
    #[arg(long, value_name = "FILE")]
    image: PathBuf,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(long, value_name = "FILE")]
    book: PathBuf,
}
