use std::error::Error as StdError;
use std::fmt;
use std::iter;

/// One call to the text-generation service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationRequest {
    /// Instructional preamble sent as the system message.
    pub system: String,
    /// Rendered task template.
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Ordered text fragments of one streamed response. Concatenating every
/// fragment yields the full response. Finite and not restartable.
pub type TextStream<'a> = Box<dyn Iterator<Item = Result<String, LanguageModelError>> + 'a>;

pub trait LanguageModel: Send + Sync {
    fn invoke(&self, request: &GenerationRequest) -> Result<String, LanguageModelError>;

    /// Whether `stream` delivers more than one fragment per response.
    fn supports_streaming(&self) -> bool {
        false
    }

    fn stream<'a>(&'a self, request: &GenerationRequest) -> Result<TextStream<'a>, LanguageModelError> {
        let text = self.invoke(request)?;
        Ok(Box::new(iter::once(Ok(text))))
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn invoke(&self, request: &GenerationRequest) -> Result<String, LanguageModelError> {
        (**self).invoke(request)
    }

    fn supports_streaming(&self) -> bool {
        (**self).supports_streaming()
    }

    fn stream<'a>(&'a self, request: &GenerationRequest) -> Result<TextStream<'a>, LanguageModelError> {
        (**self).stream(request)
    }
}
