//! Output sink for decoded events.

use serde::Serialize;
use serde_json::Value;

use crate::event::DecodedEvent;

/// One reportable event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub event: DecodedEvent,
    pub token0_trusted: bool,
    pub token1_trusted: bool,
    pub block_number: Option<u64>,
    /// The raw log, attached outside clean mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl EventRecord {
    pub fn trusted(&self) -> bool {
        self.token0_trusted && self.token1_trusted
    }
}

/// Where event records end up.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: &EventRecord);
}

/// Emits records as `tracing` events under the `pairwatch::events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: &EventRecord) {
        let ev = &record.event;
        tracing::info!(
            target: "pairwatch::events",
            kind = ev.label(),
            address = %ev.address(),
            token0 = %ev.token0(),
            token1 = %ev.token1(),
            fee_tier = ?ev.fee_tier(),
            token0_trusted = record.token0_trusted,
            token1_trusted = record.token1_trusted,
            block = ?record.block_number,
            "{}",
            if record.trusted() { "trusted" } else { "new" }
        );
        if let Some(raw) = &record.raw {
            tracing::info!(target: "pairwatch::events", raw = %raw, "raw log");
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: std::sync::Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, record: &EventRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}
