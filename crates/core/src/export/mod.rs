//! Rendering of generated text into downloadable documents.

use std::fmt;
use std::io;
use std::str::FromStr;
use thiserror::Error;

mod docx;
mod pdf;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExportFormat {
    Text,
    Pdf,
    Docx,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [Self::Text, Self::Pdf, Self::Docx];

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Text => "text/plain; charset=utf-8",
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// `<stem>.<extension>`
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.extension())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Text),
            "pdf" => Ok(Self::Pdf),
            "docx" | "word" => Ok(Self::Docx),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: the document is empty")]
    EmptyDocument,
    #[error("unsupported export format `{0}` (expected txt, pdf or docx)")]
    UnknownFormat(String),
    #[error("failed to write docx archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to write document: {0}")]
    Io(#[from] io::Error),
}

/// Renders `text` as a document in `format`. `title` goes into the document
/// metadata only; the body is `text` line by line.
pub fn export(title: &str, text: &str, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    if text.trim().is_empty() {
        return Err(ExportError::EmptyDocument);
    }

    match format {
        ExportFormat::Text => Ok(text.as_bytes().to_vec()),
        ExportFormat::Pdf => Ok(pdf::render(title, text)),
        ExportFormat::Docx => docx::render(title, text),
    }
}
