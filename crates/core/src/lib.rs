pub mod config;
pub mod export;
pub mod logging;
pub mod pipeline;
pub mod prompts;
pub mod speech;

pub use config::{
    BookConfig, Config, ConfigError, ConfigStore, LlmConfig, PromptConfig, RecentUsage,
    SpeechConfig,
};
pub use export::{export, ExportError, ExportFormat};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, StdoutLogSink, VecLogSink,
};
pub use pipeline::{
    parse_chapter_titles, Book, BookPipeline, BookRun, Chapter, ChapterProgress,
    GenerationRequest, LanguageModel, LanguageModelError, PipelineError, PipelineSettings,
    RunFileError, Stage, StageStream, StageUpdate, TextStream, RUN_FILE_NAME,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use speech::{
    AudioFormat, SpeechError, SpeechSynthesizer, SynthesizedAudio, VoiceSample,
};
