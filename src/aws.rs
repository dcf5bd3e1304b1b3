use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_kinesis::{
    error::SdkError,
    operation::{get_shard_iterator::GetShardIteratorError, list_shards::ListShardsError},
    types::{Record, ShardIteratorType},
    Client,
};
use tokio::sync::mpsc;

use crate::dispatch::BatchDispatcher;

pub struct New;
pub struct Ready;

/// How a shard processor stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShardExit {
    /// The shard was closed and read to its end.
    Closed(String),
    /// Polling gave up on a shard that may still be open; it can be claimed again.
    Released(String),
}

pub struct ShardPoller<'a, PollerState = New> {
    client: Client,
    stream_name: &'a str,
    shard_id: &'a str,
    shard_iterator_type: ShardIteratorType,
    shard_iterator: Option<String>,
    last_sequence_number: Option<String>,
    shard_record_limit: u16,
    _state: PhantomData<PollerState>,
}

impl<'a> ShardPoller<'a, New> {
    pub fn new(
        client: Client,
        stream_name: &'a str,
        shard_id: &'a str,
        shard_record_limit: u16,
        shard_iterator_type: ShardIteratorType,
    ) -> Self {
        Self {
            client,
            stream_name,
            shard_id,
            shard_iterator_type,
            shard_iterator: None,
            last_sequence_number: None,
            shard_record_limit,
            _state: PhantomData,
        }
    }

    pub async fn make_ready(mut self) -> anyhow::Result<ShardPoller<'a, Ready>> {
        self.shard_iterator = self.acquire_iterator().await?;

        Ok(ShardPoller {
            client: self.client,
            stream_name: self.stream_name,
            shard_id: self.shard_id,
            shard_iterator_type: self.shard_iterator_type,
            shard_iterator: self.shard_iterator,
            last_sequence_number: self.last_sequence_number,
            shard_record_limit: self.shard_record_limit,
            _state: PhantomData,
        })
    }
}

impl<PollerState> ShardPoller<'_, PollerState> {
    /// Starts after the last record read, or at the configured position when
    /// nothing has been read yet.
    async fn acquire_iterator(&self) -> Result<Option<String>, SdkError<GetShardIteratorError>> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(self.stream_name)
            .shard_id(self.shard_id);
        let request = match &self.last_sequence_number {
            Some(sequence_number) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(sequence_number),
            None => request.shard_iterator_type(self.shard_iterator_type.clone()),
        };
        request.send().await.map(|res| res.shard_iterator)
    }
}

impl ShardPoller<'_, Ready> {
    /// `false` once the shard has been closed and fully read.
    pub fn is_open(&self) -> bool {
        self.shard_iterator.is_some()
    }

    /// Fetches the next page of records. An expired iterator is replaced and
    /// reported as an empty fetch.
    pub async fn get_records(&mut self) -> anyhow::Result<Vec<Record>> {
        let Some(shard_iterator) = self.shard_iterator.clone() else {
            tracing::trace!("[Stream] Shard {} is closed", self.shard_id);
            return Ok(vec![]);
        };

        match self
            .client
            .get_records()
            .shard_iterator(shard_iterator)
            .limit(self.shard_record_limit.into())
            .send()
            .await
        {
            Ok(output) => {
                self.shard_iterator = output.next_shard_iterator;
                if let Some(last) = output.records.last() {
                    self.last_sequence_number = Some(last.sequence_number.clone());
                }
                Ok(output.records)
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|e| e.is_expired_iterator_exception()) =>
            {
                tracing::debug!(
                    "[Stream] Iterator for {} shard {} expired, renewing",
                    self.stream_name,
                    self.shard_id
                );
                self.shard_iterator = self.acquire_iterator().await?;
                Ok(vec![])
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Tracks which shards have been handed out so each one gets exactly one
/// processor, and closed shards are never picked up again.
#[derive(Debug, Default)]
pub struct ShardRegistry {
    active: HashSet<String>,
    finished: HashSet<String>,
}

impl ShardRegistry {
    /// Returns the shards in `listed` not yet seen, and marks them active.
    pub fn claim_new(&mut self, listed: impl IntoIterator<Item = String>) -> Vec<String> {
        listed
            .into_iter()
            .filter(|shard_id| !self.finished.contains(shard_id))
            .filter(|shard_id| self.active.insert(shard_id.clone()))
            .collect()
    }

    pub fn record_exit(&mut self, exit: ShardExit) {
        match exit {
            ShardExit::Closed(shard_id) => {
                self.active.remove(&shard_id);
                self.finished.insert(shard_id);
            }
            ShardExit::Released(shard_id) => {
                self.active.remove(&shard_id);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

pub struct ShardDetector {
    stream_name: Arc<String>,
    poll_interval: Duration,
    client: Client,
    rx_shard_exit: mpsc::Receiver<ShardExit>,
    tx_new_shard: mpsc::Sender<String>,
    registry: ShardRegistry,
}

impl ShardDetector {
    pub fn new(
        stream_name: &Arc<String>,
        poll_interval: Duration,
        client: &Client,
        rx_shard_exit: mpsc::Receiver<ShardExit>,
        tx_new_shard: mpsc::Sender<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.clone(),
            poll_interval,
            client: client.clone(),
            rx_shard_exit,
            tx_new_shard,
            registry: ShardRegistry::default(),
        }
    }

    /// Runs until the stream is gone or the receiving side of the new-shard
    /// channel is dropped.
    pub async fn poll_new_shards(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let listed = match self.list_shards().await {
                        Ok(listed) => listed,
                        Err(e) if e.as_service_error().is_some_and(|e| e.is_resource_not_found_exception()) => {
                            tracing::error!("[Stream] Stream {} does not exist", self.stream_name);
                            return;
                        }
                        Err(e) => {
                            tracing::warn!("[Stream] Failed to list shards of {}: {e:?}", self.stream_name);
                            continue;
                        }
                    };
                    for shard_id in self.registry.claim_new(listed) {
                        tracing::debug!("[Stream] New shard {shard_id} on {}", self.stream_name);
                        if self.tx_new_shard.send(shard_id).await.is_err() {
                            return;
                        }
                    }
                }
                Some(exit) = self.rx_shard_exit.recv() => {
                    tracing::debug!("[Stream] {exit:?} on {}", self.stream_name);
                    self.registry.record_exit(exit);
                    tracing::debug!(
                        "[Stream] {} shards still active on {}",
                        self.registry.active_count(),
                        self.stream_name
                    );
                }
            }
        }
    }

    async fn list_shards(&self) -> Result<Vec<String>, SdkError<ListShardsError>> {
        let mut shard_ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // The API rejects a stream name alongside a continuation token.
            let request = match next_token.take() {
                Some(token) => self.client.list_shards().next_token(token),
                None => self
                    .client
                    .list_shards()
                    .stream_name(self.stream_name.as_str()),
            };
            let output = request.send().await?;
            shard_ids.extend(
                output
                    .shards()
                    .iter()
                    .map(|shard| shard.shard_id().to_string()),
            );
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(shard_ids),
            }
        }
    }
}

pub struct ShardProcessor {
    dispatcher: BatchDispatcher,
    tx_shard_exit: mpsc::Sender<ShardExit>,
    client: Client,
    stream_name: Arc<String>,
    shard_id: Arc<String>,
    batch_size: u16,
    shard_idle_wait: Duration,
    shard_iterator_type: ShardIteratorType,
}

impl ShardProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: BatchDispatcher,
        tx_shard_exit: &mpsc::Sender<ShardExit>,
        client: &Client,
        stream_name: &Arc<String>,
        shard_id: Arc<String>,
        batch_size: u16,
        shard_idle_wait: Duration,
        shard_iterator_type: ShardIteratorType,
    ) -> Self {
        Self {
            dispatcher,
            tx_shard_exit: tx_shard_exit.clone(),
            client: client.clone(),
            stream_name: stream_name.clone(),
            shard_id,
            batch_size,
            shard_idle_wait,
            shard_iterator_type,
        }
    }

    pub async fn poll(self) {
        let poller = ShardPoller::new(
            self.client.clone(),
            &self.stream_name,
            &self.shard_id,
            self.batch_size,
            self.shard_iterator_type.clone(),
        );
        let mut poller = match poller.make_ready().await {
            Ok(poller) => poller,
            Err(e) => {
                tracing::warn!(
                    "[Stream] Could not get an iterator for shard {}, releasing it: {e:?}",
                    self.shard_id
                );
                self.report(ShardExit::Released(self.shard_id.to_string()))
                    .await;
                return;
            }
        };

        while poller.is_open() {
            match poller.get_records().await {
                // Empty fetches are never delivered to the consumer.
                Ok(records) if records.is_empty() => {
                    tokio::time::sleep(self.shard_idle_wait).await;
                }
                Ok(records) => self.dispatcher.dispatch_records(records),
                Err(e) => {
                    tracing::warn!(
                        "[Stream] Error fetching records from {} shard {}: {e:?}",
                        self.stream_name,
                        self.shard_id
                    );
                    tokio::time::sleep(self.shard_idle_wait).await;
                }
            }
        }

        tracing::debug!("[Stream] Shard {} closed", self.shard_id);
        self.report(ShardExit::Closed(self.shard_id.to_string()))
            .await;
    }

    async fn report(&self, exit: ShardExit) {
        if self.tx_shard_exit.send(exit).await.is_err() {
            tracing::trace!(
                "[Stream] Shard detector gone before {} stopped",
                self.shard_id
            );
        }
    }
}
