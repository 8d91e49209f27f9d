use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Destination for progress messages emitted by the generation services.
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

#[derive(Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _record: LogRecord) {}
}

/// Collects records in memory; used by tests to assert on emitted messages.
#[derive(Default)]
pub struct VecLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl VecLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|record| record.level == level && record.message.contains(needle))
    }
}

impl LogSink for VecLogSink {
    fn log(&self, record: LogRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record);
        }
    }
}

/// Prints records at or above `min_level`; warnings and errors go to stderr.
#[derive(Clone)]
pub struct StdoutLogSink {
    min_level: LogLevel,
}

impl Default for StdoutLogSink {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

impl StdoutLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl LogSink for StdoutLogSink {
    fn log(&self, record: LogRecord) {
        if record.level < self.min_level {
            return;
        }
        if record.level >= LogLevel::Warn {
            eprintln!("[{}] {}", record.level, record.message);
        } else {
            println!("[{}] {}", record.level, record.message);
        }
    }
}
