use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::Mutex;

use book_core::{
    export, BookPipeline, BookRun, ExportFormat, GenerationRequest, LanguageModel,
    LanguageModelError, LogLevel, PipelineError, PipelineSettings, PromptRegistry, Stage,
    StageUpdate, VecLogSink, RUN_FILE_NAME,
};
use tempfile::tempdir;

struct MockLanguageModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("mock mutex poisoned").clone()
    }

    fn assert_empty(&self) {
        let guard = self.responses.lock().expect("mock mutex poisoned");
        assert!(
            guard.is_empty(),
            "expected all mock responses to be consumed"
        );
    }
}

impl LanguageModel for MockLanguageModel {
    fn invoke(&self, request: &GenerationRequest) -> Result<String, LanguageModelError> {
        self.prompts
            .lock()
            .expect("mock mutex poisoned")
            .push(request.prompt.clone());
        let mut guard = self.responses.lock().expect("mock mutex poisoned");
        guard.pop_front().ok_or_else(|| {
            LanguageModelError::new(io::Error::new(
                io::ErrorKind::Other,
                "mock language model has no remaining responses",
            ))
        })
    }
}

fn fox_settings() -> PipelineSettings {
    PipelineSettings {
        min_chapter_chars: 60,
        ..PipelineSettings::default()
    }
}

#[test]
fn brave_fox_book_is_generated_and_exported() -> Result<(), Box<dyn std::error::Error>> {
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let pipeline = BookPipeline::new(&prompts, &sink).with_settings(fox_settings());

    let mock = MockLanguageModel::new([
        "Chapter 1: The Fox's Home\nChapter 2: The Journey\n",
        "A young fox leaves the safety of the den to find her lost brother.",
        "The den lay beneath the roots of an old oak.",
        "Every morning the fox watched the river from the hill above it.",
        "The road south was long, and the nights were cold and loud with owls.",
    ]);

    let mut run = BookRun::new("A children's story about a brave fox.");

    let outline = pipeline.generate_outline(&mock, &mut run)?;
    assert_eq!(outline, "Chapter 1: The Fox's Home\nChapter 2: The Journey");
    assert_eq!(mock.prompts().len(), 1);

    pipeline.generate_pre_summary(&mock, &mut run)?;
    let book = pipeline.generate_chapters(&mock, &mut run)?;

    assert_eq!(book.len(), 2);
    let titles: Vec<&str> = book.titles().collect();
    assert_eq!(
        titles,
        vec!["Chapter 1: The Fox's Home", "Chapter 2: The Journey"]
    );
    for chapter in book.chapters() {
        assert!(chapter.char_count() >= 60, "{} is too short", chapter.title);
    }
    assert_eq!(
        book.chapters()[0].content,
        "The den lay beneath the roots of an old oak.\n\n\
         Every morning the fox watched the river from the hill above it."
    );

    let rendered = book.render();
    assert!(rendered.starts_with("Chapter: Chapter 1: The Fox's Home\n\n"));
    assert!(rendered.contains("\n\nChapter: Chapter 2: The Journey\n\n"));
    mock.assert_empty();

    let sent = mock.prompts();
    assert_eq!(sent.len(), 5);
    assert!(sent[1].contains("Chapter 1: The Fox's Home\nChapter 2: The Journey"));
    assert!(sent[4].contains("chapter titled 'Chapter 2: The Journey'"));
    assert!(sent[4].contains("Every morning the fox watched the river"));

    let temp = tempdir()?;
    let run_path = temp.path().join(RUN_FILE_NAME);
    run.save_to_path(&run_path)?;
    let restored = BookRun::load_from_path(&run_path)?;
    assert_eq!(restored, run);

    for format in ExportFormat::ALL {
        let path = temp.path().join(format.file_name("book"));
        let text = restored.text(Stage::Chapters).unwrap_or_default();
        fs::write(&path, export("A brave fox", &text, format)?)?;
        assert!(fs::metadata(&path)?.len() > 0);
    }

    assert!(sink.contains(LogLevel::Info, "complete"));
    Ok(())
}

#[test]
fn stages_refuse_to_run_out_of_order() {
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let sink = VecLogSink::new();
    let pipeline = BookPipeline::new(&prompts, &sink);
    let mock = MockLanguageModel::new(["unused"]);
    let mut run = BookRun::new("A brave fox.");

    let err = pipeline
        .generate_pre_summary(&mock, &mut run)
        .expect_err("pre-summary before outline must fail");
    assert!(matches!(
        err,
        PipelineError::MissingPrerequisite {
            stage: Stage::PreSummary,
            dependency: Stage::Outline
        }
    ));

    let err = pipeline
        .generate_chapters(&mock, &mut run)
        .expect_err("chapters before outline must fail");
    assert!(matches!(
        err,
        PipelineError::MissingPrerequisite {
            dependency: Stage::Outline,
            ..
        }
    ));
    assert!(mock.prompts().is_empty());
}

#[test]
fn regenerating_the_outline_discards_later_stages() -> Result<(), Box<dyn std::error::Error>> {
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let pipeline = BookPipeline::new(&prompts, &sink);
    let mock = MockLanguageModel::new(["One\nTwo", "Summary.", "Three"]);
    let mut run = BookRun::new("fox");

    pipeline.generate_outline(&mock, &mut run)?;
    pipeline.generate_pre_summary(&mock, &mut run)?;
    assert!(run.has_output(Stage::PreSummary));

    pipeline.generate_outline(&mock, &mut run)?;
    assert_eq!(run.outline(), Some("Three"));
    assert!(!run.has_output(Stage::PreSummary));
    Ok(())
}

#[test]
fn chapter_that_never_reaches_length_fails_after_cap() -> Result<(), Box<dyn std::error::Error>> {
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let pipeline = BookPipeline::new(&prompts, &sink).with_settings(PipelineSettings {
        min_chapter_chars: 1000,
        max_chapter_attempts: 4,
        ..PipelineSettings::default()
    });
    let mock = MockLanguageModel::new(["short"; 4]);

    let mut run = BookRun::new("fox");
    run.set_outline("Only chapter");
    run.set_pre_summary("A fox.");

    let err = pipeline
        .generate_chapters(&mock, &mut run)
        .expect_err("chapter cannot reach the threshold");
    match err {
        PipelineError::LengthShortfall {
            title,
            attempts,
            length,
            required,
        } => {
            assert_eq!(title, "Only chapter");
            assert_eq!(attempts, 4);
            assert_eq!(length, "short\n\nshort\n\nshort\n\nshort".chars().count());
            assert_eq!(required, 1000);
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_empty();
    assert!(sink.contains(LogLevel::Error, "Only chapter"));
    Ok(())
}

#[test]
fn streamed_pre_summary_updates_the_run() -> Result<(), Box<dyn std::error::Error>> {
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let pipeline = BookPipeline::new(&prompts, &sink);
    let mock = MockLanguageModel::new(["  A fox sets out.  "]);

    let mut run = BookRun::new("fox");
    run.set_outline("Home");

    let mut stream = pipeline.stream_pre_summary(&mock, &mut run)?;
    assert_eq!(stream.stage(), Stage::PreSummary);
    let first = stream.next().expect("one fragment")?;
    assert_eq!(first, StageUpdate::Partial("  A fox sets out.  ".into()));
    let text = stream.finish()?;

    assert_eq!(text, "A fox sets out.");
    assert_eq!(run.pre_summary(), Some("A fox sets out."));
    Ok(())
}
