use book_adapters::{
    create_llm_adapter, create_speech_adapter, load_voice_sample, AdapterError,
    CONNECTION_TEST_PROMPT,
};
use book_core::{
    export, BookPipeline, BookRun, ChapterProgress, ConfigStore, ExportError, ExportFormat,
    GenerationRequest, LanguageModel, LanguageModelError, LogLevel, LogRecord, LogSink,
    PipelineError, PromptError, PromptRegistry, RunFileError, SpeechError, SpeechSynthesizer,
    Stage, StageStream, StageUpdate, StdoutLogSink, RUN_FILE_NAME,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let sink = if cli.verbose {
        StdoutLogSink::with_min_level(LogLevel::Debug)
    } else {
        StdoutLogSink::new()
    };
    let context = Context {
        config_path: cli.config,
        output_dir: cli.output_dir,
        sink: &sink,
    };

    match cli.command {
        Command::Config(ConfigCommand::TestLlm(args)) => run_test_llm(&context, args),
        Command::Outline(args) => run_single_stage(&context, Stage::Outline, args),
        Command::PreSummary(args) => run_single_stage(&context, Stage::PreSummary, args.into()),
        Command::Review(args) => run_single_stage(&context, Stage::PreSummaryReview, args.into()),
        Command::Chapters(args) => run_chapters(&context, args),
        Command::Generate(args) => run_generate(&context, args),
        Command::Export(args) => run_export(&context, args),
        Command::Speech(args) => run_speech(&context, args),
    }
}

struct Context<'a> {
    config_path: PathBuf,
    output_dir: Option<PathBuf>,
    sink: &'a dyn LogSink,
}

impl Context<'_> {
    fn open_store(&self) -> Result<ConfigStore, CliError> {
        let mut store = ConfigStore::open(self.config_path.clone())?;
        store.ensure_recent_defaults();
        Ok(store)
    }

    fn output_dir(&self, store: &ConfigStore) -> Result<PathBuf, CliError> {
        if let Some(dir) = &self.output_dir {
            return Ok(dir.clone());
        }
        let configured = store.config().book.output_dir.trim();
        if configured.is_empty() {
            Err(CliError::MissingOutputDir)
        } else {
            Ok(PathBuf::from(configured))
        }
    }

    fn info(&self, message: impl Into<String>) {
        self.sink.log(LogRecord::new(LogLevel::Info, message));
    }

    fn debug(&self, message: impl Into<String>) {
        self.sink.log(LogRecord::new(LogLevel::Debug, message));
    }
}

/// Run context persisted between invocations in the output directory.
struct RunFile {
    path: PathBuf,
    run: BookRun,
}

impl RunFile {
    fn open(output_dir: &Path) -> Result<Self, CliError> {
        let path = output_dir.join(RUN_FILE_NAME);
        let run = if path.exists() {
            BookRun::load_from_path(&path)?
        } else {
            BookRun::default()
        };
        Ok(Self { path, run })
    }

    fn save(&self) -> Result<(), CliError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CliError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.run.save_to_path(&self.path)?;
        Ok(())
    }
}

fn run_test_llm(context: &Context<'_>, args: TestLlmArgs) -> Result<(), CliError> {
    let mut store = context.open_store()?;
    let selected = select_llm_interface(&store, args.interface)?;
    let profile = store
        .config()
        .get_llm_profile(&selected)
        .cloned()
        .ok_or_else(|| CliError::UnknownInterface(selected.clone()))?;

    context.info(format!("Testing LLM profile `{selected}`"));
    context.debug(format!(
        "model: {} | interface: {} | base url: {}",
        profile.model_name, profile.interface_format, profile.base_url
    ));

    let adapter = create_llm_adapter(store.config(), &selected)?;
    let request = GenerationRequest::new("", CONNECTION_TEST_PROMPT);
    match adapter.invoke(&request) {
        Ok(response) if response.trim().is_empty() => {
            context
                .sink
                .log(LogRecord::new(LogLevel::Error, "LLM test failed: empty response"));
            return Err(CliError::TestFailed(
                "LLM test failed: empty response".to_string(),
            ));
        }
        Ok(response) => {
            context.info("LLM test succeeded");
            context.debug(format!("reply: {response}"));
        }
        Err(err) => {
            context
                .sink
                .log(LogRecord::new(LogLevel::Error, format!("LLM test failed: {err}")));
            return Err(CliError::Model(err));
        }
    }

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_single_stage(
    context: &Context<'_>,
    stage: Stage,
    args: StageArgs,
) -> Result<(), CliError> {
    let mut store = context.open_store()?;
    let output_dir = context.output_dir(&store)?;
    let mut run_file = RunFile::open(&output_dir)?;
    if stage == Stage::Outline {
        let prompt = resolve_prompt(args.prompt, &store)?;
        run_file.run.set_prompt(prompt);
    }

    let selected = select_llm_interface(&store, args.llm_interface)?;
    context.info(format!("Using LLM interface `{selected}`"));
    let model = create_llm_adapter(store.config(), &selected)?;
    let profile = store.config().get_llm_profile(&selected);
    let settings = store.config().pipeline_settings(profile);
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let pipeline = BookPipeline::new(&prompts, context.sink).with_settings(settings);

    let result = if args.stream {
        let stream = match stage {
            Stage::Outline => pipeline.stream_outline(model.as_ref(), &mut run_file.run),
            Stage::PreSummary => pipeline.stream_pre_summary(model.as_ref(), &mut run_file.run),
            _ => pipeline.stream_review(model.as_ref(), &mut run_file.run),
        }?;
        print_stream(stream).map(|_| ())
    } else {
        let text = match stage {
            Stage::Outline => pipeline.generate_outline(model.as_ref(), &mut run_file.run),
            Stage::PreSummary => pipeline.generate_pre_summary(model.as_ref(), &mut run_file.run),
            _ => pipeline.review_pre_summary(model.as_ref(), &mut run_file.run),
        }?;
        println!("{text}");
        Ok(())
    };
    result?;

    run_file.save()?;
    context.info(format!("Saved {} to {}", stage, run_file.path.display()));
    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_chapters(context: &Context<'_>, args: ChapterArgs) -> Result<(), CliError> {
    let mut store = context.open_store()?;
    let output_dir = context.output_dir(&store)?;
    let mut run_file = RunFile::open(&output_dir)?;

    let selected = generate_chapters(context, &store, &mut run_file, args)?;

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_generate(context: &Context<'_>, args: GenerateArgs) -> Result<(), CliError> {
    let mut store = context.open_store()?;
    let output_dir = context.output_dir(&store)?;
    let mut run_file = RunFile::open(&output_dir)?;
    run_file.run.set_prompt(resolve_prompt(args.prompt, &store)?);

    let selected = select_llm_interface(&store, args.chapters.llm_interface.clone())?;
    let model = create_llm_adapter(store.config(), &selected)?;
    let settings = store
        .config()
        .pipeline_settings(store.config().get_llm_profile(&selected));
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let pipeline = BookPipeline::new(&prompts, context.sink).with_settings(settings);

    pipeline.generate_outline(model.as_ref(), &mut run_file.run)?;
    run_file.save()?;
    pipeline.generate_pre_summary(model.as_ref(), &mut run_file.run)?;
    run_file.save()?;

    let selected = generate_chapters(context, &store, &mut run_file, args.chapters)?;

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

/// Shared by `chapters` and `generate`; saves the run even when a chapter fails
/// so completed chapters are kept.
fn generate_chapters(
    context: &Context<'_>,
    store: &ConfigStore,
    run_file: &mut RunFile,
    args: ChapterArgs,
) -> Result<String, CliError> {
    let selected = select_llm_interface(store, args.llm_interface)?;
    context.info(format!("Using LLM interface `{selected}`"));
    let model = create_llm_adapter(store.config(), &selected)?;

    let mut settings = store
        .config()
        .pipeline_settings(store.config().get_llm_profile(&selected));
    if let Some(min_chars) = args.min_chars {
        settings.min_chapter_chars = min_chars.max(1);
    }
    if let Some(max_attempts) = args.max_attempts {
        settings.max_chapter_attempts = max_attempts.max(1);
    }

    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let pipeline = BookPipeline::new(&prompts, context.sink).with_settings(settings);

    let streaming = model.supports_streaming();
    let mut on_progress = |event: ChapterProgress<'_>| match event {
        ChapterProgress::Started { index, total, title } => {
            if streaming {
                println!("\nChapter: {title}\n");
            } else {
                context.info(format!("Writing chapter {}/{}: {}", index + 1, total, title));
            }
        }
        ChapterProgress::Fragment { text, .. } => {
            print!("{text}");
            let _ = io::stdout().flush();
        }
        ChapterProgress::Attempt {
            attempt, length, ..
        } => {
            if streaming {
                println!();
            }
            context.debug(format!("request {attempt}: {length} characters so far"));
        }
        ChapterProgress::Completed { .. } => {}
    };

    let outcome = pipeline
        .generate_chapters_with(model.as_ref(), &mut run_file.run, &mut on_progress)
        .map(|book| book.len());
    run_file.save()?;
    let chapters = outcome?;

    if !streaming {
        if let Some(text) = run_file.run.text(Stage::Chapters) {
            println!("{text}");
        }
    }
    context.info(format!(
        "Saved {} chapters to {}",
        chapters,
        run_file.path.display()
    ));
    Ok(selected)
}

fn run_export(context: &Context<'_>, args: ExportArgs) -> Result<(), CliError> {
    let store = context.open_store()?;
    let output_dir = context.output_dir(&store)?;
    let run_file = RunFile::open(&output_dir)?;

    let stage = args.section.stage();
    let text = run_file
        .run
        .text(stage)
        .ok_or(CliError::NothingToExport(stage))?;
    let bytes = export(args.section.title(), &text, args.format)?;

    let path = args
        .out
        .unwrap_or_else(|| output_dir.join(args.format.file_name(args.section.file_stem())));
    fs::write(&path, bytes).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })?;
    context.info(format!(
        "Exported {} to {} ({})",
        stage,
        path.display(),
        args.format.mime_type()
    ));
    println!("{}", path.display());
    Ok(())
}

fn run_speech(context: &Context<'_>, args: SpeechArgs) -> Result<(), CliError> {
    let store = context.open_store()?;
    let text = match (args.text, args.section) {
        (Some(text), _) => text,
        (None, section) => {
            let output_dir = context.output_dir(&store)?;
            let run_file = RunFile::open(&output_dir)?;
            let stage = section.stage();
            run_file
                .run
                .text(stage)
                .ok_or(CliError::NothingToExport(stage))?
        }
    };

    let voice = load_voice_sample(&args.voice)?;
    let synthesizer = create_speech_adapter(&store.config().speech)?;
    context.info(format!(
        "Synthesizing {} characters with voice {}",
        text.chars().count(),
        voice.file_name
    ));
    let audio = synthesizer.synthesize(&text, &voice)?;
    println!("{}", audio.url);

    if let Some(path) = args.download {
        let bytes = synthesizer.fetch_audio(&audio.url)?;
        fs::write(&path, bytes).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        })?;
        context.info(format!("Saved audio to {}", path.display()));
    }
    Ok(())
}

/// Echoes new text as it arrives; returns the completed stage output.
fn print_stream(stream: StageStream<'_>) -> Result<String, CliError> {
    let mut stdout = io::stdout();
    let mut printed = 0;
    for update in stream {
        match update? {
            StageUpdate::Partial(text) => {
                if let Some(new_text) = text.get(printed..) {
                    let _ = write!(stdout, "{new_text}");
                    let _ = stdout.flush();
                }
                printed = text.len();
            }
            StageUpdate::Complete(text) => {
                let _ = writeln!(stdout);
                return Ok(text);
            }
        }
    }
    Ok(String::new())
}

fn resolve_prompt(argument: Option<String>, store: &ConfigStore) -> Result<String, CliError> {
    normalize_preference(argument)
        .or_else(|| normalize_preference(Some(store.config().book.prompt.clone())))
        .ok_or(CliError::MissingPrompt)
}

fn select_llm_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<String, CliError> {
    if let Some(name) = normalize_preference(preferred) {
        if store.config().llm_profiles.contains_key(&name) {
            return Ok(name);
        }
        return Err(CliError::UnknownInterface(name));
    }

    if let Some(name) = store.last_llm_interface() {
        return Ok(name.to_string());
    }

    if let Some(name) = store.config().llm_profiles.keys().next() {
        return Ok(name.clone());
    }

    Err(CliError::MissingLlmProfile)
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] book_core::ConfigError),
    #[error("no LLM profile is configured in the config file")]
    MissingLlmProfile,
    #[error("no output directory: set `book.output_dir` in the config or pass --output-dir")]
    MissingOutputDir,
    #[error("no book prompt: pass --prompt or set `book.prompt` in the config")]
    MissingPrompt,
    #[error("no interface profile named `{0}`")]
    UnknownInterface(String),
    #[error("the {0} has not been generated yet")]
    NothingToExport(Stage),
    #[error("failed to write `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("run file error: {0}")]
    RunFile(#[from] RunFileError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("speech synthesis failed: {0}")]
    Speech(#[from] SpeechError),
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(
    name = "bookctl",
    version,
    about = "Draft a book from a single prompt: outline, pre-summary, chapters"
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Directory holding the run file and exports; overrides `book.output_dir`
    #[arg(long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Show debug-level progress, including rendered prompts
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configuration checks
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate the chapter outline from the book prompt (starts a new run)
    Outline(StageArgs),
    /// Generate the pre-summary from the prompt and outline
    PreSummary(FollowUpArgs),
    /// Ask for editorial feedback on the pre-summary
    Review(FollowUpArgs),
    /// Write every chapter of the outline
    Chapters(ChapterArgs),
    /// Outline, pre-summary and chapters in one go
    Generate(GenerateArgs),
    /// Export a generated section as txt, pdf or docx
    Export(ExportArgs),
    /// Read text aloud in a cloned voice
    Speech(SpeechArgs),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Send a test prompt through an LLM profile
    TestLlm(TestLlmArgs),
}

#[derive(Args)]
struct TestLlmArgs {
    /// Profile to test; defaults to the most recently used one
    #[arg(long)]
    interface: Option<String>,
}

#[derive(Args)]
struct StageArgs {
    /// Book prompt; defaults to `book.prompt` from the config
    #[arg(long, value_name = "TEXT")]
    prompt: Option<String>,
    /// LLM profile to use
    #[arg(long)]
    llm_interface: Option<String>,
    /// Print the response as it is generated
    #[arg(long)]
    stream: bool,
}

#[derive(Args)]
struct FollowUpArgs {
    /// LLM profile to use
    #[arg(long)]
    llm_interface: Option<String>,
    /// Print the response as it is generated
    #[arg(long)]
    stream: bool,
}

impl From<FollowUpArgs> for StageArgs {
    fn from(args: FollowUpArgs) -> Self {
        Self {
            prompt: None,
            llm_interface: args.llm_interface,
            stream: args.stream,
        }
    }
}

#[derive(Args)]
struct ChapterArgs {
    /// LLM profile to use
    #[arg(long)]
    llm_interface: Option<String>,
    /// Minimum characters per chapter; overrides `book.min_chapter_chars`
    #[arg(long, value_name = "N")]
    min_chars: Option<usize>,
    /// Maximum requests per chapter; overrides `book.max_chapter_attempts`
    #[arg(long, value_name = "N")]
    max_attempts: Option<usize>,
}

#[derive(Args)]
struct GenerateArgs {
    /// Book prompt; defaults to `book.prompt` from the config
    #[arg(long, value_name = "TEXT")]
    prompt: Option<String>,
    #[command(flatten)]
    chapters: ChapterArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum Section {
    Outline,
    PreSummary,
    Review,
    Book,
}

impl Section {
    fn stage(self) -> Stage {
        match self {
            Section::Outline => Stage::Outline,
            Section::PreSummary => Stage::PreSummary,
            Section::Review => Stage::PreSummaryReview,
            Section::Book => Stage::Chapters,
        }
    }

    fn file_stem(self) -> &'static str {
        match self {
            Section::Outline => "book_outline",
            Section::PreSummary => "book_pre_summary",
            Section::Review => "book_review",
            Section::Book => "book",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Section::Outline => "Book Outline",
            Section::PreSummary => "Pre-Summary",
            Section::Review => "Pre-Summary Review",
            Section::Book => "Book",
        }
    }
}

#[derive(Args)]
struct ExportArgs {
    /// Which generated text to export
    #[arg(long, value_enum, default_value = "book")]
    section: Section,
    /// txt, pdf or docx
    #[arg(long, default_value = "pdf")]
    format: ExportFormat,
    /// Destination file; defaults to the output directory
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct SpeechArgs {
    /// Reference recording of the voice (WAV or MP3)
    #[arg(long, value_name = "FILE")]
    voice: PathBuf,
    /// Text to read; defaults to the selected section of the current run
    #[arg(long, value_name = "TEXT")]
    text: Option<String>,
    /// Section of the current run to read when --text is absent
    #[arg(long, value_enum, default_value = "pre-summary")]
    section: Section,
    /// Also download the audio to this file
    #[arg(long, value_name = "FILE")]
    download: Option<PathBuf>,
}
