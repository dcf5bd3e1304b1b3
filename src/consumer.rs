use std::sync::Arc;

use tracing::{instrument, Level};

use crate::batch::MessageBatch;
use crate::error::ConsumerError;
use crate::sink::{LogRecord, LogSink};

/// Stream and connection a consumer is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamBinding {
    /// Logical stream name, e.g. `workitems`.
    pub stream_name: String,
    /// Name of the setting that holds the connection string.
    pub connection: String,
}

impl StreamBinding {
    pub fn new(stream_name: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            connection: connection.into(),
        }
    }
}

/// Logs the first message of every batch it is handed.
pub struct BatchConsumer {
    binding: StreamBinding,
    sink: Arc<dyn LogSink>,
}

impl BatchConsumer {
    pub fn new(binding: StreamBinding, sink: Arc<dyn LogSink>) -> Self {
        Self { binding, sink }
    }

    pub fn binding(&self) -> &StreamBinding {
        &self.binding
    }

    #[instrument(name = "stream_trigger.handle", skip_all, fields(otel.name = %self.binding.stream_name, batch_len = batch.len()))]
    pub fn handle(&self, batch: &MessageBatch) -> Result<(), ConsumerError> {
        let record = self.record_for(batch)?;
        self.sink.log(record.level, &record.message)?;
        Ok(())
    }

    /// Builds the record for `batch` without emitting it.
    pub fn record_for(&self, batch: &MessageBatch) -> Result<LogRecord, ConsumerError> {
        let first = batch.first().ok_or(ConsumerError::EmptyBatch)?;
        Ok(LogRecord::new(
            Level::INFO,
            format!(
                "First {} triggered message: {first}",
                self.binding.stream_name
            ),
        ))
    }
}

impl std::fmt::Debug for BatchConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchConsumer")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}
