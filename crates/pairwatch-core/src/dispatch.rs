//! Batch dispatcher: drains the buffer in size/time bounded batches and runs
//! every event of a batch concurrently.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::buffer::BufferReceiver;
use crate::config::millis;
use crate::error::WatchError;
use crate::event::RawEvent;

/// Anything that consumes raw events coming out of the buffer.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RawEvent) -> Result<(), WatchError>;
}

/// Batching parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum events per batch.
    pub size: usize,
    /// How long to wait for the first event of a batch.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 10,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches: u64,
    pub events: u64,
    pub failures: u64,
    pub idle_ticks: u64,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
}

pub struct BatchDispatcher {
    config: BatchConfig,
    handler: Arc<dyn EventHandler>,
    stats: Arc<Mutex<DispatchStats>>,
}

impl BatchDispatcher {
    pub fn new(config: BatchConfig, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            config,
            handler,
            stats: Arc::new(Mutex::new(DispatchStats::default())),
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().unwrap().clone()
    }

    /// Drain `buffer` until it reports end of stream.
    ///
    /// A batch already taken off the buffer is always processed to completion.
    pub async fn run(&self, buffer: &mut BufferReceiver) {
        tracing::debug!(
            batch_size = self.config.size,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "dispatcher started"
        );
        while let Some(batch) = self.next_batch(buffer).await {
            if batch.is_empty() {
                self.stats.lock().unwrap().idle_ticks += 1;
                continue;
            }
            self.process_batch(batch).await;
        }
        tracing::debug!(stats = ?self.stats(), "dispatcher stopped");
    }

    /// Wait up to `timeout` for one event, then take whatever else is already
    /// queued, up to `size`. `Some(vec![])` is an idle tick, `None` end of
    /// stream.
    pub async fn next_batch(&self, buffer: &mut BufferReceiver) -> Option<Vec<RawEvent>> {
        let first = match tokio::time::timeout(self.config.timeout, buffer.next()).await {
            Err(_) => return Some(Vec::new()),
            Ok(None) => return None,
            Ok(Some(event)) => event,
        };

        let mut batch = Vec::with_capacity(self.config.size);
        batch.push(first);
        while batch.len() < self.config.size {
            match buffer.try_next() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        Some(batch)
    }

    /// Run the handler for every event concurrently. Failures are logged one
    /// by one and never abort the rest of the batch.
    pub async fn process_batch(&self, batch: Vec<RawEvent>) -> BatchReport {
        let results = join_all(batch.iter().map(|event| self.handler.handle(event))).await;

        let mut failed = 0;
        for (event, result) in batch.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                tracing::error!(
                    address = %event.address,
                    block = ?event.block_number(),
                    log_index = ?event.log_index(),
                    error = %e,
                    "error processing event"
                );
            }
        }

        let report = BatchReport {
            processed: batch.len(),
            failed,
        };
        let mut stats = self.stats.lock().unwrap();
        stats.batches += 1;
        stats.events += report.processed as u64;
        stats.failures += report.failed as u64;
        report
    }
}
