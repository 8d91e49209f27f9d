use crate::logging::{LogLevel, LogRecord, LogSink};

use super::model::TextStream;
use super::run::BookRun;
use super::{PipelineError, Stage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageUpdate {
    /// Everything received so far, untrimmed.
    Partial(String),
    /// The finished stage output, trimmed; already stored in the run.
    Complete(String),
}

/// Lazy progress of one single-request stage. Yields a `Partial` per received
/// fragment and ends with exactly one `Complete` or one error. Dropping it
/// early leaves the run untouched.
pub struct StageStream<'a> {
    stage: Stage,
    fragments: TextStream<'a>,
    run: &'a mut BookRun,
    sink: &'a dyn LogSink,
    text: String,
    finished: bool,
}

impl<'a> StageStream<'a> {
    pub(crate) fn new(
        stage: Stage,
        fragments: TextStream<'a>,
        run: &'a mut BookRun,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            stage,
            fragments,
            run,
            sink,
            text: String::new(),
            finished: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Drains the stream and returns the completed output.
    pub fn finish(mut self) -> Result<String, PipelineError> {
        let mut last = None;
        for update in self.by_ref() {
            last = Some(update?);
        }
        match last {
            Some(StageUpdate::Complete(text)) => Ok(text),
            _ => Err(PipelineError::EmptyResponse { stage: self.stage }),
        }
    }

    fn complete(&mut self) -> Result<StageUpdate, PipelineError> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            self.sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("{} stream ended without content", self.stage),
            ));
            return Err(PipelineError::EmptyResponse { stage: self.stage });
        }

        let output = trimmed.to_string();
        self.run.set_text(self.stage, output.clone());
        self.sink.log(LogRecord::new(
            LogLevel::Info,
            format!(
                "{} streamed ({} characters)",
                self.stage,
                output.chars().count()
            ),
        ));
        Ok(StageUpdate::Complete(output))
    }
}

impl Iterator for StageStream<'_> {
    type Item = Result<StageUpdate, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.fragments.next() {
                Some(Ok(fragment)) if fragment.is_empty() => continue,
                Some(Ok(fragment)) => {
                    self.text.push_str(&fragment);
                    return Some(Ok(StageUpdate::Partial(self.text.clone())));
                }
                Some(Err(source)) => {
                    self.finished = true;
                    return Some(Err(PipelineError::Model {
                        stage: self.stage,
                        source,
                    }));
                }
                None => {
                    self.finished = true;
                    return Some(self.complete());
                }
            }
        }
    }
}
