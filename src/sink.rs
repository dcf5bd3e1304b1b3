use std::sync::Mutex;

use tracing::Level;

use crate::error::SinkError;

/// A single emitted log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Destination for the records a consumer emits.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str) -> Result<(), SinkError>;
}

/// Forwards records to the `tracing` subscriber installed by the host.
#[derive(Clone, Debug)]
pub struct TracingSink {
    consumer: String,
}

impl TracingSink {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) -> Result<(), SinkError> {
        let consumer = self.consumer.as_str();
        // `tracing` needs the level at compile time.
        match level {
            Level::ERROR => tracing::error!(consumer, "{message}"),
            Level::WARN => tracing::warn!(consumer, "{message}"),
            Level::INFO => tracing::info!(consumer, "{message}"),
            Level::DEBUG => tracing::debug!(consumer, "{message}"),
            Level::TRACE => tracing::trace!(consumer, "{message}"),
        }
        Ok(())
    }
}

/// Keeps every record in memory. Used by tests and by embedders that want
/// to inspect what a consumer emitted.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
    unavailable: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every record with [`SinkError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            records: Mutex::default(),
            unavailable: Some(reason.into()),
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogRecord>> {
        // A poisoned lock only means another writer panicked mid-push.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, message: &str) -> Result<(), SinkError> {
        if let Some(reason) = &self.unavailable {
            return Err(SinkError::Unavailable(reason.clone()));
        }
        self.lock().push(LogRecord::new(level, message));
        Ok(())
    }
}
