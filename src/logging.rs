//! Leveled, structured logging for pipeline events.
//!
//! The host configures a minimum [`LogLevel`] once; the [`Logger`] holds it and drops
//! anything below it before it reaches the [`LogSink`]. The default sink forwards to
//! `tracing`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::error::PurgeError;

/// Severity of a log record, from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug = 1,
    Info = 2,
    Notice = 3,
    Warning = 4,
    #[default]
    Error = 5,
    Critical = 6,
    Alert = 7,
    Emergency = 8,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Alert => "alert",
            LogLevel::Emergency => "emergency",
        }
    }

    /// Parse a level name. Unrecognised names map to `Emergency`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "notice" => LogLevel::Notice,
            "warning" | "warn" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "critical" => LogLevel::Critical,
            "alert" => LogLevel::Alert,
            _ => LogLevel::Emergency,
        }
    }

    /// Level for its numeric severity (1 = debug .. 8 = emergency).
    pub fn from_severity(severity: u8) -> Option<Self> {
        match severity {
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Notice),
            4 => Some(LogLevel::Warning),
            5 => Some(LogLevel::Error),
            6 => Some(LogLevel::Critical),
            7 => Some(LogLevel::Alert),
            8 => Some(LogLevel::Emergency),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(LogLevel::from_name(s))
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Severity(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Severity(n) => LogLevel::from_severity(n)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid log severity {}", n))),
            Repr::Name(name) => Ok(LogLevel::from_name(&name)),
        }
    }
}

/// Destination for log records that passed the level threshold.
pub trait LogSink: Send + Sync {
    fn record(&self, level: LogLevel, message: &str, context: &Value);
}

/// Sink that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, level: LogLevel, message: &str, context: &Value) {
        let severity = level.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(severity, context = %context, "{}", message),
            LogLevel::Info | LogLevel::Notice => {
                tracing::info!(severity, context = %context, "{}", message)
            }
            LogLevel::Warning => tracing::warn!(severity, context = %context, "{}", message),
            LogLevel::Error | LogLevel::Critical | LogLevel::Alert | LogLevel::Emergency => {
                tracing::error!(severity, context = %context, "{}", message)
            }
        }
    }
}

/// A captured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub context: Value,
}

/// Sink that keeps every record in memory, for assertions in tests.
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records at exactly `level`.
    pub fn at(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for RecordingSink {
    fn record(&self, level: LogLevel, message: &str, context: &Value) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
            context: context.clone(),
        });
    }
}

/// Level-filtered logger handed to the pipeline components.
#[derive(Clone)]
pub struct Logger {
    min_level: LogLevel,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(min_level: LogLevel, sink: Arc<dyn LogSink>) -> Self {
        Self { min_level, sink }
    }

    /// Logger writing to `tracing`.
    pub fn tracing(min_level: LogLevel) -> Self {
        Self::new(min_level, Arc::new(TracingSink))
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str, context: Value) {
        if self.enabled(level) {
            self.sink.record(level, message, &context);
        }
    }

    pub fn debug(&self, message: &str, context: Value) {
        self.log(LogLevel::Debug, message, context);
    }

    pub fn info(&self, message: &str, context: Value) {
        self.log(LogLevel::Info, message, context);
    }

    pub fn notice(&self, message: &str, context: Value) {
        self.log(LogLevel::Notice, message, context);
    }

    pub fn warning(&self, message: &str, context: Value) {
        self.log(LogLevel::Warning, message, context);
    }

    pub fn error(&self, message: &str, context: Value) {
        self.log(LogLevel::Error, message, context);
    }

    pub fn critical(&self, message: &str, context: Value) {
        self.log(LogLevel::Critical, message, context);
    }

    pub fn alert(&self, message: &str, context: Value) {
        self.log(LogLevel::Alert, message, context);
    }

    pub fn emergency(&self, message: &str, context: Value) {
        self.log(LogLevel::Emergency, message, context);
    }

    /// Log a pipeline error at error severity with its code and structured details.
    pub fn log_error(&self, message: &str, error: &PurgeError) {
        if !self.enabled(LogLevel::Error) {
            return;
        }
        self.error(message, error_context(error));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing(LogLevel::default())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

/// Structured context describing an error.
pub fn error_context(error: &PurgeError) -> Value {
    let data = match error {
        PurgeError::Validation(e) => json!({ "validation": e }),
        PurgeError::RateLimited { retry_after } => json!({ "retry_after": retry_after }),
        PurgeError::HttpStatus { status, body } => json!({ "status": status, "body": body }),
        PurgeError::Decode { status, .. } => json!({ "status": status }),
        PurgeError::Provider { response } => json!({ "response": response }),
        PurgeError::Persistence { operation, .. } => json!({ "operation": operation }),
        PurgeError::NothingQueued { rejected } => json!({ "errors": rejected }),
        PurgeError::StaleQueue { items, .. } => json!({ "items": items }),
        PurgeError::Encode(_) | PurgeError::Transport(_) | PurgeError::Config(_) => Value::Null,
    };

    json!({
        "code": error.code(),
        "error": error.to_string(),
        "data": data,
    })
}
