use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use aws::{ShardDetector, ShardProcessor};
use aws_config::BehaviorVersion;
use aws_sdk_kinesis::{config::Region, types::ShardIteratorType, Client};
use tokio::sync::mpsc;

mod aws;
mod batch;
mod config;
mod consumer;
mod dispatch;
mod error;
mod sink;
pub mod telemetry;
#[cfg(test)]
mod test_support;

pub use batch::MessageBatch;
pub use config::{
    ConnectionSettings, StreamTriggerConfig, TriggerManifest, USE_DEFAULT_CONNECTION,
};
pub use consumer::{BatchConsumer, StreamBinding};
pub use dispatch::{decode_records, BatchDispatcher};
pub use error::{ConfigError, ConsumerError, SinkError};
pub use sink::{LogRecord, LogSink, MemorySink, TracingSink};

/// Standalone host that polls each configured stream and feeds every
/// fetched batch to that stream's [`BatchConsumer`].
pub struct StreamTrigger {
    components: Vec<Component>,
}

#[derive(Clone, Debug)]
struct Component {
    consumer: Arc<BatchConsumer>,
    stream_name: Arc<String>,
    connection: ConnectionSettings,
    batch_size: u16,
    shard_idle_wait: Duration,
    detector_poll: Duration,
    shard_iterator_type: ShardIteratorType,
}

#[derive(Debug)]
enum TerminationReason {
    ExitRequested,
    Other(String),
}

impl StreamTrigger {
    /// Resolves every binding's connection setting up front so a bad
    /// manifest fails before any stream is touched.
    pub fn new(manifest: TriggerManifest, sink: Arc<dyn LogSink>) -> Result<Self> {
        let components = manifest
            .trigger
            .into_iter()
            .map(|config| {
                let binding = config.binding();
                let connection = ConnectionSettings::from_env(&binding.connection)?;
                Ok(Component {
                    stream_name: Arc::new(binding.stream_name.clone()),
                    consumer: Arc::new(BatchConsumer::new(binding, sink.clone())),
                    connection,
                    batch_size: config.batch_size(),
                    shard_idle_wait: config.shard_idle_wait(),
                    detector_poll: config.detector_poll(),
                    shard_iterator_type: config.shard_iterator_type(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { components })
    }

    pub async fn run(self) -> Result<()> {
        if self.components.is_empty() {
            anyhow::bail!("[Stream] No triggers configured");
        }

        let mut loops = Vec::with_capacity(self.components.len());
        for component in &self.components {
            let client = client_for(&component.connection).await;
            loops.push(Self::start_receive_loop(client, component));
        }

        let tr = tokio::select! {
            signal = tokio::signal::ctrl_c() => Ok(termination_on_signal(signal)),
            (tr, _, rest) = futures::future::select_all(loops) => {
                for handle in rest {
                    handle.abort();
                }
                tr
            }
        };

        match tr {
            Ok(TerminationReason::ExitRequested) => {
                tracing::info!("[Stream] Exiting");
                Ok(())
            }
            Ok(TerminationReason::Other(reason)) => {
                tracing::error!("[Stream] Fatal: {reason}");
                Err(anyhow::anyhow!(reason))
            }
            Err(e) => {
                tracing::error!("[Stream] Receive loop failed: {e}");
                Err(e.into())
            }
        }
    }

    fn start_receive_loop(
        client: Client,
        component: &Component,
    ) -> tokio::task::JoinHandle<TerminationReason> {
        let future = Self::receive(client, component.clone());
        tokio::task::spawn(future)
    }

    // This doesn't return a Result because we don't want a thoughtless `?` to exit the loop
    // and terminate the entire trigger.
    async fn receive(
        client: Client,
        Component {
            consumer,
            stream_name,
            connection: _,
            batch_size,
            shard_idle_wait,
            detector_poll,
            shard_iterator_type,
        }: Component,
    ) -> TerminationReason {
        let (tx_new_shard, mut rx_new_shard) = mpsc::channel(10);
        let (tx_shard_exit, rx_shard_exit) = mpsc::channel(10);

        let shard_detector = ShardDetector::new(
            &stream_name,
            detector_poll,
            &client,
            rx_shard_exit,
            tx_new_shard,
        );

        let mut detector_handle = tokio::spawn(shard_detector.poll_new_shards());

        tracing::info!("[Stream] Listening on {stream_name}");

        loop {
            tokio::select! {
                Some(shard_id) = rx_new_shard.recv() => {
                    let shard_id = Arc::new(shard_id);
                    let shard_processor = ShardProcessor::new(
                        BatchDispatcher::new(&consumer, &shard_id),
                        &tx_shard_exit,
                        &client,
                        &stream_name,
                        shard_id,
                        batch_size,
                        shard_idle_wait,
                        shard_iterator_type.clone(),
                    );
                    tokio::spawn(shard_processor.poll());
                },
                _ = &mut detector_handle => {
                    return TerminationReason::Other(format!("[Stream] Shard detector for {stream_name} exited. Trigger exiting."));
                }
                else => {
                    return TerminationReason::Other("[Stream] Unexpected failure in processing. Trigger exiting.".into());
                }
            }
        }
    }
}

fn termination_on_signal(signal: std::io::Result<()>) -> TerminationReason {
    match signal {
        Ok(()) => TerminationReason::ExitRequested,
        Err(e) => TerminationReason::Other(format!("[Stream] Could not listen for Ctrl-C: {e}")),
    }
}

async fn client_for(connection: &ConnectionSettings) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(endpoint_url) = &connection.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    if let Some(region) = &connection.region {
        loader = loader.region(Region::new(region.clone()));
    }
    Client::new(&loader.load().await)
}
