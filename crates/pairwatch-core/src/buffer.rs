//! Bounded backpressure buffer between the receive loop and the dispatcher.
//!
//! Never drops an event: a producer facing a full buffer first sleeps
//! `(occupancy / capacity)^2` seconds, then waits for a free slot. The
//! consumer side ends its stream once the shutdown token fires.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::event::RawEvent;

/// Occupancy ratio above which [`backpressure_delay`] yields a delay.
pub const PRESSURE_THRESHOLD: f64 = 0.9;

/// Buffer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 1_000 }
    }
}

/// Delay a producer applies before inserting into a buffer holding
/// `occupancy` of `capacity` items. `None` below the pressure threshold.
pub fn backpressure_delay(occupancy: usize, capacity: usize) -> Option<Duration> {
    if capacity == 0 {
        return None;
    }
    let ratio = occupancy as f64 / capacity as f64;
    if ratio > PRESSURE_THRESHOLD {
        Some(Duration::from_secs_f64(ratio * ratio))
    } else {
        None
    }
}

/// Create a buffer of `capacity` slots bound to `shutdown`.
///
/// # Panics
/// Panics if `capacity` is zero (`WatcherConfig::validate` rejects it).
pub fn channel(capacity: usize, shutdown: CancellationToken) -> (BufferSender, BufferReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        BufferSender {
            tx,
            shutdown: shutdown.clone(),
        },
        BufferReceiver { rx, shutdown },
    )
}

/// Producer half. Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct BufferSender {
    tx: mpsc::Sender<RawEvent>,
    shutdown: CancellationToken,
}

impl BufferSender {
    /// Enqueue `event`. Only a full buffer slows the producer down.
    ///
    /// Returns [`WatchError::BufferClosed`] if shutdown fires (or the
    /// consumer is gone) before a slot frees up.
    pub async fn push(&self, event: RawEvent) -> Result<(), WatchError> {
        let occupancy = self.len();
        let pressure = match self.tx.capacity() {
            0 => backpressure_delay(occupancy, self.capacity()),
            _ => None,
        };
        if let Some(delay) = pressure {
            tracing::debug!(
                occupancy,
                capacity = self.capacity(),
                delay_ms = delay.as_millis() as u64,
                "buffer under pressure"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(WatchError::BufferClosed),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(WatchError::BufferClosed),
            sent = self.tx.send(event) => sent.map_err(|_| WatchError::BufferClosed),
        }
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct BufferReceiver {
    rx: mpsc::Receiver<RawEvent>,
    shutdown: CancellationToken,
}

impl BufferReceiver {
    /// Wait for the next event. `None` means end of stream: shutdown fired or
    /// every producer is gone.
    pub async fn next(&mut self) -> Option<RawEvent> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Take an event only if one is already queued.
    pub fn try_next(&mut self) -> Option<RawEvent> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
