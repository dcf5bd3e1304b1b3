use std::sync::Arc;

use aws_sdk_kinesis::types::Record;
use tracing::instrument;

use crate::batch::MessageBatch;
use crate::consumer::BatchConsumer;
use crate::error::ConsumerError;

/// Hands fetched records to a [`BatchConsumer`] and logs the outcome.
///
/// Failures stop at the log line: the shard loop keeps running and nothing
/// is retried. [`BatchDispatcher::dispatch`] still hands the error back to
/// embedders that drive batches themselves.
#[derive(Clone, Debug)]
pub struct BatchDispatcher {
    consumer: Arc<BatchConsumer>,
    shard_id: Arc<String>,
}

impl BatchDispatcher {
    pub fn new(consumer: &Arc<BatchConsumer>, shard_id: &Arc<String>) -> Self {
        Self {
            consumer: consumer.clone(),
            shard_id: shard_id.clone(),
        }
    }

    #[instrument(name = "stream_trigger.dispatch", skip_all, fields(otel.name = format!("dispatch {}", self.consumer.binding().stream_name), shard_id = %self.shard_id))]
    pub fn dispatch_records(&self, records: Vec<Record>) {
        let batch = decode_records(records);
        if self.dispatch(&batch).is_err() {
            tracing::debug!(
                "[Stream] Dropped batch of {} records from shard {}",
                batch.len(),
                self.shard_id
            );
        }
    }

    pub fn dispatch(&self, batch: &MessageBatch) -> Result<(), ConsumerError> {
        let stream_name = &self.consumer.binding().stream_name;
        match self.consumer.handle(batch) {
            Ok(()) => {
                tracing::trace!(
                    "[Stream] {stream_name} batch of {} messages processed successfully",
                    batch.len()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("[Stream] {stream_name} batch processing error: {e}");
                Err(e)
            }
        }
    }
}

/// Decodes record payloads to text, keeping the order the shard returned
/// them in.
pub fn decode_records(records: Vec<Record>) -> MessageBatch {
    records
        .into_iter()
        .map(|record| match String::from_utf8(record.data.into_inner()) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    "[Stream] Record {} is not valid UTF-8, decoding lossily",
                    record.sequence_number
                );
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        })
        .collect()
}
