//! Outline → pre-summary → chapters, each stage feeding the next.
//!
//! Stages read their inputs from and write their outputs to an explicit
//! [`BookRun`]. Each stage checks that its prerequisites exist before issuing
//! any request, and fails fast on service errors. The chapter stage repeats
//! requests per chapter until the configured minimum length is reached, within
//! a bounded number of attempts.

use std::fmt;
use thiserror::Error;

use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{PromptError, PromptRegistry, PromptTemplate};

mod model;
mod outline;
mod run;
mod stream;

pub use model::{GenerationRequest, LanguageModel, LanguageModelError, TextStream};
pub use outline::parse_chapter_titles;
pub use run::{Book, BookRun, Chapter, RunFileError, RUN_FILE_NAME};
pub use stream::{StageStream, StageUpdate};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    Outline,
    PreSummary,
    PreSummaryReview,
    Chapters,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::PreSummary => "pre-summary",
            Self::PreSummaryReview => "pre-summary review",
            Self::Chapters => "chapters",
        }
    }

    pub fn prompt_key(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::PreSummary => "pre_summary",
            Self::PreSummaryReview => "pre_summary_review",
            Self::Chapters => "chapter",
        }
    }

    pub fn dependencies(&self) -> &'static [Stage] {
        match self {
            Self::Outline => &[],
            Self::PreSummary => &[Stage::Outline],
            Self::PreSummaryReview => &[Stage::PreSummary],
            Self::Chapters => &[Stage::Outline, Stage::PreSummary],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("the book prompt is empty")]
    EmptyPrompt,
    #[error("cannot generate {stage}: {dependency} has not been generated yet")]
    MissingPrerequisite { stage: Stage, dependency: Stage },
    #[error("failed to render prompt for stage {stage}: {source}")]
    Prompt {
        stage: Stage,
        #[source]
        source: PromptError,
    },
    #[error("language model invocation failed for stage {stage}: {source}")]
    Model {
        stage: Stage,
        #[source]
        source: LanguageModelError,
    },
    #[error("stage {stage} returned empty content")]
    EmptyResponse { stage: Stage },
    #[error("the outline contains no chapter titles")]
    NoChapterTitles,
    #[error(
        "chapter `{title}` reached only {length} of {required} characters after {attempts} attempts"
    )]
    LengthShortfall {
        title: String,
        attempts: usize,
        length: usize,
        required: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Minimum characters of accumulated content per chapter; at least 1.
    pub min_chapter_chars: usize,
    /// Upper bound on requests per chapter.
    pub max_chapter_attempts: usize,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_chapter_chars: 1000,
            max_chapter_attempts: 10,
            max_tokens: Some(1024),
            temperature: Some(0.7),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChapterProgress<'a> {
    Started {
        index: usize,
        total: usize,
        title: &'a str,
    },
    /// Streamed text of the request in flight; only from streaming models.
    Fragment { index: usize, text: &'a str },
    Attempt {
        index: usize,
        attempt: usize,
        length: usize,
    },
    Completed { index: usize, chapter: &'a Chapter },
}

struct ChapterInputs {
    prompt: String,
    outline: String,
    pre_summary: String,
}

/// Template arguments of a single-request stage, read from the run.
type StageArguments = fn(&BookRun) -> Vec<(&'static str, &str)>;

fn outline_arguments(run: &BookRun) -> Vec<(&'static str, &str)> {
    vec![("prompt", run.prompt().trim())]
}

fn pre_summary_arguments(run: &BookRun) -> Vec<(&'static str, &str)> {
    vec![
        ("prompt", run.prompt().trim()),
        ("outline", run.outline().unwrap_or_default()),
    ]
}

fn review_arguments(run: &BookRun) -> Vec<(&'static str, &str)> {
    vec![("pre_summary", run.pre_summary().unwrap_or_default())]
}

pub struct BookPipeline<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    settings: PipelineSettings,
}

impl<'a> BookPipeline<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn generate_outline<'r, M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        run: &'r mut BookRun,
    ) -> Result<&'r str, PipelineError> {
        self.single_request(model, run, Stage::Outline, outline_arguments)?;
        Ok(run.outline().unwrap_or_default())
    }

    pub fn generate_pre_summary<'r, M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        run: &'r mut BookRun,
    ) -> Result<&'r str, PipelineError> {
        self.single_request(model, run, Stage::PreSummary, pre_summary_arguments)?;
        Ok(run.pre_summary().unwrap_or_default())
    }

    pub fn review_pre_summary<'r, M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        run: &'r mut BookRun,
    ) -> Result<&'r str, PipelineError> {
        self.single_request(model, run, Stage::PreSummaryReview, review_arguments)?;
        Ok(run.review().unwrap_or_default())
    }

    pub fn stream_outline<'s, M: LanguageModel + ?Sized>(
        &'s self,
        model: &'s M,
        run: &'s mut BookRun,
    ) -> Result<StageStream<'s>, PipelineError> {
        self.stream_stage(model, run, Stage::Outline, outline_arguments)
    }

    pub fn stream_pre_summary<'s, M: LanguageModel + ?Sized>(
        &'s self,
        model: &'s M,
        run: &'s mut BookRun,
    ) -> Result<StageStream<'s>, PipelineError> {
        self.stream_stage(model, run, Stage::PreSummary, pre_summary_arguments)
    }

    pub fn stream_review<'s, M: LanguageModel + ?Sized>(
        &'s self,
        model: &'s M,
        run: &'s mut BookRun,
    ) -> Result<StageStream<'s>, PipelineError> {
        self.stream_stage(model, run, Stage::PreSummaryReview, review_arguments)
    }

    pub fn generate_chapters<'r, M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        run: &'r mut BookRun,
    ) -> Result<&'r Book, PipelineError> {
        self.generate_chapters_with(model, run, &mut |_: ChapterProgress<'_>| {})
    }

    /// Writes every chapter of the outline in order. Chapters completed before
    /// a failure stay in `run.book()`.
    pub fn generate_chapters_with<'r, M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        run: &'r mut BookRun,
        on_progress: &mut dyn FnMut(ChapterProgress<'_>),
    ) -> Result<&'r Book, PipelineError> {
        self.ensure_ready(run, Stage::Chapters)?;

        let inputs = ChapterInputs {
            prompt: run.prompt().trim().to_string(),
            outline: run.outline().unwrap_or_default().to_string(),
            pre_summary: run.pre_summary().unwrap_or_default().to_string(),
        };
        let titles = parse_chapter_titles(&inputs.outline);
        if titles.is_empty() {
            return Err(PipelineError::NoChapterTitles);
        }
        let template = self.template(Stage::Chapters)?;

        self.log(
            LogLevel::Info,
            format!(
                "Writing {} chapters (minimum {} characters, at most {} requests each)",
                titles.len(),
                self.settings.min_chapter_chars.max(1),
                self.settings.max_chapter_attempts.max(1)
            ),
        );

        let book = run.start_book();
        let mut previous_chapter = String::new();
        for (index, title) in titles.iter().enumerate() {
            on_progress(ChapterProgress::Started {
                index,
                total: titles.len(),
                title,
            });

            let content = self.write_chapter(
                model,
                template,
                &inputs,
                &previous_chapter,
                title,
                index,
                on_progress,
            )?;

            book.push(Chapter::new(title.clone(), content));
            if let Some(chapter) = book.chapters().last() {
                self.log(
                    LogLevel::Info,
                    format!(
                        "Chapter {}/{} `{}` complete ({} characters)",
                        index + 1,
                        titles.len(),
                        chapter.title,
                        chapter.char_count()
                    ),
                );
                on_progress(ChapterProgress::Completed { index, chapter });
                previous_chapter.clone_from(&chapter.content);
            }
        }

        Ok(book)
    }

    /// Outline, pre-summary and chapters in sequence.
    pub fn run_all<'r, M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        run: &'r mut BookRun,
    ) -> Result<&'r Book, PipelineError> {
        self.generate_outline(model, run)?;
        self.generate_pre_summary(model, run)?;
        self.generate_chapters(model, run)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_chapter<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        template: &PromptTemplate,
        inputs: &ChapterInputs,
        previous_chapter: &str,
        title: &str,
        index: usize,
        on_progress: &mut dyn FnMut(ChapterProgress<'_>),
    ) -> Result<String, PipelineError> {
        // Every chapter needs some content, even with a zero minimum.
        let required = self.settings.min_chapter_chars.max(1);
        let max_attempts = self.settings.max_chapter_attempts.max(1);
        let mut content = String::new();
        let mut length = 0;

        for attempt in 1..=max_attempts {
            let prompt = template
                .render_with([
                    ("prompt", inputs.prompt.as_str()),
                    ("outline", inputs.outline.as_str()),
                    ("pre_summary", inputs.pre_summary.as_str()),
                    ("previous_chapter", previous_chapter),
                    ("chapter_title", title),
                    ("chapter_so_far", content.as_str()),
                ])
                .map_err(|source| PipelineError::Prompt {
                    stage: Stage::Chapters,
                    source,
                })?;
            let request = self.request(template, prompt);

            self.log(
                LogLevel::Debug,
                format!(
                    "Chapter `{}` request {}/{}:\n{}",
                    title, attempt, max_attempts, request.prompt
                ),
            );

            let response = self.call(model, &request, Stage::Chapters, &mut |text: &str| {
                on_progress(ChapterProgress::Fragment { index, text })
            })?;

            let addition = response.trim();
            if addition.is_empty() {
                self.log(
                    LogLevel::Warn,
                    format!(
                        "Chapter `{}` request {}/{} returned no text",
                        title, attempt, max_attempts
                    ),
                );
            } else {
                if !content.is_empty() {
                    content.push_str("\n\n");
                }
                content.push_str(addition);
            }

            length = content.chars().count();
            on_progress(ChapterProgress::Attempt {
                index,
                attempt,
                length,
            });
            if length >= required {
                return Ok(content);
            }
        }

        self.log(
            LogLevel::Error,
            format!(
                "Chapter `{}` stopped at {} of {} characters after {} requests",
                title, length, required, max_attempts
            ),
        );
        Err(PipelineError::LengthShortfall {
            title: title.to_string(),
            attempts: max_attempts,
            length,
            required,
        })
    }

    fn single_request<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        run: &mut BookRun,
        stage: Stage,
        arguments: StageArguments,
    ) -> Result<(), PipelineError> {
        let request = self.stage_request(run, stage, arguments)?;
        self.log(LogLevel::Info, format!("Generating {}...", stage));
        self.log(
            LogLevel::Debug,
            format!("{} request:\n{}", stage, request.prompt),
        );

        let response = model
            .invoke(&request)
            .map_err(|source| PipelineError::Model { stage, source })?;
        let trimmed = response.trim();
        if trimmed.is_empty() {
            self.log(LogLevel::Warn, format!("{} response was empty", stage));
            return Err(PipelineError::EmptyResponse { stage });
        }

        run.set_text(stage, trimmed.to_string());
        self.log(
            LogLevel::Info,
            format!("{} ready ({} characters)", stage, trimmed.chars().count()),
        );
        Ok(())
    }

    fn stream_stage<'s, M: LanguageModel + ?Sized>(
        &'s self,
        model: &'s M,
        run: &'s mut BookRun,
        stage: Stage,
        arguments: StageArguments,
    ) -> Result<StageStream<'s>, PipelineError> {
        let request = self.stage_request(run, stage, arguments)?;
        self.log(LogLevel::Info, format!("Streaming {}...", stage));
        let fragments = model
            .stream(&request)
            .map_err(|source| PipelineError::Model { stage, source })?;
        Ok(StageStream::new(stage, fragments, run, self.sink))
    }

    fn stage_request(
        &self,
        run: &BookRun,
        stage: Stage,
        arguments: StageArguments,
    ) -> Result<GenerationRequest, PipelineError> {
        self.ensure_ready(run, stage)?;
        let template = self.template(stage)?;
        let prompt = template
            .render_with(arguments(run))
            .map_err(|source| PipelineError::Prompt { stage, source })?;
        Ok(self.request(template, prompt))
    }

    fn ensure_ready(&self, run: &BookRun, stage: Stage) -> Result<(), PipelineError> {
        if run.prompt().trim().is_empty() {
            return Err(PipelineError::EmptyPrompt);
        }
        for dependency in stage.dependencies() {
            if !run.has_output(*dependency) {
                self.log(
                    LogLevel::Warn,
                    format!("Generate the {} before the {}.", dependency, stage),
                );
                return Err(PipelineError::MissingPrerequisite {
                    stage,
                    dependency: *dependency,
                });
            }
        }
        Ok(())
    }

    fn template(&self, stage: Stage) -> Result<&'a PromptTemplate, PipelineError> {
        self.prompts
            .template(stage.prompt_key())
            .map_err(|source| PipelineError::Prompt { stage, source })
    }

    fn request(&self, template: &PromptTemplate, prompt: String) -> GenerationRequest {
        GenerationRequest {
            system: template.system().unwrap_or_default().to_string(),
            prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    /// One request; streamed when the model supports it, forwarding fragments.
    fn call<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &GenerationRequest,
        stage: Stage,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<String, PipelineError> {
        let to_error = |source| PipelineError::Model { stage, source };
        if !model.supports_streaming() {
            return model.invoke(request).map_err(to_error);
        }

        let mut text = String::new();
        for fragment in model.stream(request).map_err(to_error)? {
            let fragment = fragment.map_err(to_error)?;
            on_fragment(&fragment);
            text.push_str(&fragment);
        }
        Ok(text)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    struct ScriptedModel {
        responses: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<GenerationRequest>>,
        streaming: bool,
    }

    impl ScriptedModel {
        fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
                requests: Mutex::new(Vec::new()),
                streaming: false,
            }
        }

        fn streaming(mut self) -> Self {
            self.streaming = true;
            self
        }

        fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl LanguageModel for ScriptedModel {
        fn invoke(&self, request: &GenerationRequest) -> Result<String, LanguageModelError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses.lock().unwrap().pop_front().ok_or_else(|| {
                LanguageModelError::new(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "no more scripted responses",
                ))
            })
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        fn stream<'a>(
            &'a self,
            request: &GenerationRequest,
        ) -> Result<TextStream<'a>, LanguageModelError> {
            let text = self.invoke(request)?;
            let words: Vec<Result<String, LanguageModelError>> = text
                .split_inclusive(' ')
                .map(|word| Ok(word.to_string()))
                .collect();
            Ok(Box::new(words.into_iter()))
        }
    }

    fn settings(min_chapter_chars: usize, max_chapter_attempts: usize) -> PipelineSettings {
        PipelineSettings {
            min_chapter_chars,
            max_chapter_attempts,
            ..PipelineSettings::default()
        }
    }

    fn ready_run() -> BookRun {
        let mut run = BookRun::new("A children's story about a brave fox.");
        run.set_outline("Home\nJourney");
        run.set_pre_summary("A fox sets out.");
        run
    }

    #[test]
    fn outline_is_one_trimmed_request() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["  Home\nJourney \n"]);
        let mut run = BookRun::new("A brave fox.");

        let outline = pipeline.generate_outline(&model, &mut run).unwrap();
        assert_eq!(outline, "Home\nJourney");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system.starts_with("You are an expert book writer"));
        assert!(requests[0].prompt.contains("A brave fox."));
        assert_eq!(requests[0].max_tokens, Some(1024));
        assert_eq!(requests[0].temperature, Some(0.7));
    }

    #[test]
    fn empty_prompt_is_rejected_without_a_request() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["unused"]);
        let mut run = BookRun::new("   ");

        let err = pipeline.generate_outline(&model, &mut run).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyPrompt));
        assert!(model.requests().is_empty());
    }

    #[test]
    fn blank_outline_response_is_an_error() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["  \n "]);
        let mut run = BookRun::new("fox");

        let err = pipeline.generate_outline(&model, &mut run).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::EmptyResponse {
                stage: Stage::Outline
            }
        ));
        assert!(run.outline().is_none());
    }

    #[test]
    fn pre_summary_requires_outline() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["unused"]);
        let mut run = BookRun::new("fox");

        let err = pipeline.generate_pre_summary(&model, &mut run).unwrap_err();
        match err {
            PipelineError::MissingPrerequisite { stage, dependency } => {
                assert_eq!(stage, Stage::PreSummary);
                assert_eq!(dependency, Stage::Outline);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(model.requests().is_empty());
        assert!(sink.contains(LogLevel::Warn, "Generate the outline"));
    }

    #[test]
    fn review_requires_pre_summary() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["Solid premise."]);
        let mut run = BookRun::new("fox");
        run.set_outline("Home");

        assert!(matches!(
            pipeline.review_pre_summary(&model, &mut run),
            Err(PipelineError::MissingPrerequisite {
                dependency: Stage::PreSummary,
                ..
            })
        ));

        run.set_pre_summary("A fox sets out.");
        let review = pipeline.review_pre_summary(&model, &mut run).unwrap();
        assert_eq!(review, "Solid premise.");
        assert!(model.requests()[0].prompt.contains("A fox sets out."));
    }

    #[test]
    fn chapters_require_pre_summary() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["unused"]);
        let mut run = BookRun::new("fox");
        run.set_outline("Home");

        let err = pipeline.generate_chapters(&model, &mut run).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingPrerequisite {
                stage: Stage::Chapters,
                dependency: Stage::PreSummary
            }
        ));
    }

    #[test]
    fn chapter_accumulates_until_threshold() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink).with_settings(settings(20, 5));
        let model = ScriptedModel::new([
            "The den was warm.",
            "Then came dawn.",
            "The road was long and wide.",
        ]);
        let mut run = ready_run();

        let book = pipeline.generate_chapters(&model, &mut run).unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(
            book.chapters()[0].content,
            "The den was warm.\n\nThen came dawn."
        );
        assert_eq!(book.chapters()[1].content, "The road was long and wide.");

        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].prompt.contains("Chapter Content: The den was warm."));
        assert!(requests[2]
            .prompt
            .contains("Previous Chapter Content: The den was warm.\n\nThen came dawn."));
        assert!(requests[2].prompt.contains("chapter titled 'Journey'"));
    }

    #[test]
    fn shortfall_after_cap_keeps_completed_chapters() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink).with_settings(settings(10, 3));
        let model = ScriptedModel::new(["Long enough text.", "", "  ", "tiny"]);
        let mut run = ready_run();

        let err = pipeline.generate_chapters(&model, &mut run).unwrap_err();
        match err {
            PipelineError::LengthShortfall {
                title,
                attempts,
                length,
                required,
            } => {
                assert_eq!(title, "Journey");
                assert_eq!(attempts, 3);
                assert_eq!(length, 4);
                assert_eq!(required, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(model.requests().len(), 4);

        let book = run.book().expect("partial book retained");
        assert_eq!(book.len(), 1);
        assert_eq!(book.chapters()[0].title, "Home");
        assert!(sink.contains(LogLevel::Warn, "returned no text"));
    }

    #[test]
    fn zero_minimum_still_needs_chapter_text() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink).with_settings(settings(0, 3));
        let model = ScriptedModel::new([" ", "The den.", "Dawn."]);
        let mut run = ready_run();

        let book = pipeline.generate_chapters(&model, &mut run).unwrap();
        assert_eq!(book.chapters()[0].content, "The den.");
        assert_eq!(book.chapters()[1].content, "Dawn.");
        assert_eq!(model.requests().len(), 3);
    }

    #[test]
    fn each_streamed_stage_renders_its_own_inputs() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["A fox travels.", "Tighten the middle."]).streaming();
        let mut run = BookRun::new("A brave fox.");
        run.set_outline("Home\nJourney");

        pipeline
            .stream_pre_summary(&model, &mut run)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        pipeline
            .stream_review(&model, &mut run)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let requests = model.requests();
        assert!(requests[0].prompt.contains("A brave fox."));
        assert!(requests[0].prompt.contains("Home\nJourney"));
        assert!(requests[1].prompt.contains("A fox travels."));
        assert_eq!(run.review(), Some("Tighten the middle."));
    }

    #[test]
    fn model_failure_propagates_from_chapter_loop() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink).with_settings(settings(5, 3));
        let model = ScriptedModel::new(["Enough."]);
        let mut run = ready_run();

        let err = pipeline.generate_chapters(&model, &mut run).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Model {
                stage: Stage::Chapters,
                ..
            }
        ));
        assert_eq!(run.book().map(Book::len), Some(1));
    }

    #[test]
    fn threshold_counts_characters_not_bytes() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink).with_settings(settings(4, 2));
        let model = ScriptedModel::new(["狐狸", "回家了", "旅程开始"]);
        let mut run = ready_run();

        let book = pipeline.generate_chapters(&model, &mut run).unwrap();
        assert_eq!(book.chapters()[0].content, "狐狸\n\n回家了");
        assert_eq!(book.chapters()[1].content, "旅程开始");
    }

    #[test]
    fn progress_events_follow_generation() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink).with_settings(settings(3, 2));
        let model = ScriptedModel::new(["one two", "three four"]).streaming();
        let mut run = ready_run();

        let mut events = Vec::new();
        pipeline
            .generate_chapters_with(&model, &mut run, &mut |event: ChapterProgress<'_>| {
                events.push(match event {
                    ChapterProgress::Started { index, total, title } => {
                        format!("start {index}/{total} {title}")
                    }
                    ChapterProgress::Fragment { index, text } => format!("frag {index} {text}"),
                    ChapterProgress::Attempt {
                        index,
                        attempt,
                        length,
                    } => format!("attempt {index} {attempt} {length}"),
                    ChapterProgress::Completed { index, chapter } => {
                        format!("done {index} {}", chapter.title)
                    }
                })
            })
            .unwrap();

        assert_eq!(
            events,
            vec![
                "start 0/2 Home",
                "frag 0 one ",
                "frag 0 two",
                "attempt 0 1 7",
                "done 0 Home",
                "start 1/2 Journey",
                "frag 1 three ",
                "frag 1 four",
                "attempt 1 1 10",
                "done 1 Journey",
            ]
        );
    }

    #[test]
    fn streamed_outline_ends_with_complete_update() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["Home Journey "]).streaming();
        let mut run = BookRun::new("fox");

        let updates: Vec<StageUpdate> = pipeline
            .stream_outline(&model, &mut run)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(
            updates,
            vec![
                StageUpdate::Partial("Home ".into()),
                StageUpdate::Partial("Home Journey ".into()),
                StageUpdate::Complete("Home Journey".into()),
            ]
        );
        assert_eq!(run.outline(), Some("Home Journey"));
    }

    #[test]
    fn stream_reports_missing_prerequisite_up_front() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink);
        let model = ScriptedModel::new(["unused"]).streaming();
        let mut run = BookRun::new("fox");

        assert!(matches!(
            pipeline.stream_pre_summary(&model, &mut run),
            Err(PipelineError::MissingPrerequisite { .. })
        ));
        assert!(model.requests().is_empty());
    }

    #[test]
    fn run_all_is_deterministic_for_a_deterministic_model() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let pipeline = BookPipeline::new(&prompts, &sink).with_settings(settings(5, 2));

        let script = ["Home\nJourney", "A fox sets out.", "Den life.", "Long road."];
        let first_model = ScriptedModel::new(script);
        let second_model = ScriptedModel::new(script);
        let mut first = BookRun::new("fox");
        let mut second = BookRun::new("fox");

        let first_book = pipeline.run_all(&first_model, &mut first).unwrap().render();
        let second_book = pipeline.run_all(&second_model, &mut second).unwrap().render();
        assert_eq!(first_book, second_book);
        assert_eq!(
            first_book,
            "Chapter: Home\n\nDen life.\n\nChapter: Journey\n\nLong road."
        );
    }
}
