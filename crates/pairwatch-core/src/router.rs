//! Address-keyed event router.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;

use crate::dispatch::EventHandler;
use crate::error::WatchError;
use crate::event::RawEvent;

/// Maps a log's source address to the handler for that contract.
///
/// Built once at start-up; logs from unknown addresses are ignored.
#[derive(Default)]
pub struct EventRouter {
    routes: HashMap<Address, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for logs emitted by `address`.
    pub fn route(mut self, address: Address, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.insert(address, handler);
        self
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.routes.keys()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Hand `event` to its handler, if any.
    pub async fn dispatch(&self, event: &RawEvent) -> Result<(), WatchError> {
        match self.routes.get(&event.address) {
            Some(handler) => handler.handle(event).await,
            None => {
                tracing::trace!(address = %event.address, "no route for log");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventHandler for EventRouter {
    async fn handle(&self, event: &RawEvent) -> Result<(), WatchError> {
        self.dispatch(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(AtomicU32);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &RawEvent) -> Result<(), WatchError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &RawEvent) -> Result<(), WatchError> {
            Err(WatchError::Malformed("boom".into()))
        }
    }

    fn log_from(address: Address) -> RawEvent {
        RawEvent {
            address,
            topics: vec![],
            data: Default::default(),
            block_number: None,
            log_index: None,
            transaction_hash: None,
            removed: false,
        }
    }

    #[tokio::test]
    async fn routes_checksummed_address_to_lowercase_log() {
        let v2 = Arc::new(Counter(AtomicU32::new(0)));
        let router = EventRouter::new().route(address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"), v2.clone());
        assert_eq!(router.len(), 1);

        let log: RawEvent = serde_json::from_value(serde_json::json!({
            "address": "0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f"
        }))
        .unwrap();
        router.dispatch(&log).await.unwrap();
        assert_eq!(v2.0.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_address_is_a_no_op() {
        let counter = Arc::new(Counter(AtomicU32::new(0)));
        let router = EventRouter::new().route(Address::repeat_byte(1), counter.clone());
        router.dispatch(&log_from(Address::repeat_byte(2))).await.unwrap();
        assert_eq!(counter.0.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let router = EventRouter::new().route(Address::repeat_byte(1), Arc::new(Failing));
        assert!(router.dispatch(&log_from(Address::repeat_byte(1))).await.is_err());
    }

    #[test]
    fn later_route_replaces_earlier() {
        let first = Arc::new(Counter(AtomicU32::new(0)));
        let router = EventRouter::new()
            .route(Address::repeat_byte(1), first)
            .route(Address::repeat_byte(2), Arc::new(Failing))
            .route(Address::repeat_byte(1), Arc::new(Failing));
        assert_eq!(router.len(), 2);
        let mut addresses: Vec<_> = router.addresses().copied().collect();
        addresses.sort();
        assert_eq!(addresses, vec![Address::repeat_byte(1), Address::repeat_byte(2)]);
    }
}
