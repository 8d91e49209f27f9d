use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::Stage;

pub const RUN_FILE_NAME: &str = "book_run.json";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub content: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    pub fn render(&self) -> String {
        format!("Chapter: {}\n\n{}", self.title, self.content)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    chapters: Vec<Chapter>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.chapters.iter().map(|chapter| chapter.title.as_str())
    }

    pub(crate) fn push(&mut self, chapter: Chapter) {
        self.chapters.push(chapter);
    }

    /// Chapter blocks joined by a blank line.
    pub fn render(&self) -> String {
        self.chapters
            .iter()
            .map(Chapter::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromIterator<Chapter> for Book {
    fn from_iter<I: IntoIterator<Item = Chapter>>(iter: I) -> Self {
        Self {
            chapters: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunFileError {
    #[error("failed to read run file `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse run file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write run file `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialize run file `{path}`: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Everything one generation run has produced so far. Passed explicitly to
/// every stage; replacing an upstream output discards the outputs derived
/// from it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BookRun {
    prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    book: Option<Book>,
}

impl BookRun {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn outline(&self) -> Option<&str> {
        self.outline.as_deref()
    }

    pub fn pre_summary(&self) -> Option<&str> {
        self.pre_summary.as_deref()
    }

    pub fn review(&self) -> Option<&str> {
        self.review.as_deref()
    }

    pub fn book(&self) -> Option<&Book> {
        self.book.as_ref()
    }

    pub fn has_output(&self, stage: Stage) -> bool {
        match stage {
            Stage::Outline => self.outline.is_some(),
            Stage::PreSummary => self.pre_summary.is_some(),
            Stage::PreSummaryReview => self.review.is_some(),
            Stage::Chapters => self.book.is_some(),
        }
    }

    /// Text output of a stage; the chapter stage yields the rendered book.
    pub fn text(&self, stage: Stage) -> Option<String> {
        match stage {
            Stage::Outline => self.outline.clone(),
            Stage::PreSummary => self.pre_summary.clone(),
            Stage::PreSummaryReview => self.review.clone(),
            Stage::Chapters => self.book.as_ref().map(Book::render),
        }
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        *self = Self::new(prompt);
    }

    /// Supplies an outline produced elsewhere. Blank text clears it.
    pub fn set_outline(&mut self, outline: impl Into<String>) {
        self.set_text(Stage::Outline, outline.into());
    }

    /// Supplies a pre-summary produced elsewhere. Blank text clears it.
    pub fn set_pre_summary(&mut self, pre_summary: impl Into<String>) {
        self.set_text(Stage::PreSummary, pre_summary.into());
    }

    pub(crate) fn set_text(&mut self, stage: Stage, text: String) {
        let trimmed = text.trim();
        let value = (!trimmed.is_empty()).then(|| trimmed.to_string());
        match stage {
            Stage::Outline => {
                self.outline = value;
                self.pre_summary = None;
                self.review = None;
                self.book = None;
            }
            Stage::PreSummary => {
                self.pre_summary = value;
                self.review = None;
                self.book = None;
            }
            Stage::PreSummaryReview => self.review = value,
            Stage::Chapters => {}
        }
    }

    pub(crate) fn start_book(&mut self) -> &mut Book {
        self.book.insert(Book::new())
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, RunFileError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| RunFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| RunFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), RunFileError> {
        let path = path.as_ref();
        let serialized =
            serde_json::to_string_pretty(self).map_err(|source| RunFileError::Serialize {
                path: path.to_path_buf(),
                source,
            })?;
        fs::write(path, serialized).map_err(|source| RunFileError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
