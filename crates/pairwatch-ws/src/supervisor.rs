//! Connection lifecycle for one multiplexed log subscription.
//!
//! ```text
//! Disconnected → Connecting → Subscribing → Listening
//!       ↑                                       │
//!       └─────────────── error / close ─────────┘
//! ```
//!
//! One call to [`ConnectionSupervisor::run`] is one pass through the state
//! machine. Transport faults end the pass with an error; the caller decides
//! when to reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use pairwatch_core::buffer::BufferSender;
use pairwatch_core::config::SupervisorConfig;
use pairwatch_core::error::WatchError;
use pairwatch_core::event::{RawEvent, Subscription, SubscriptionSpec};
use pairwatch_core::policy::AdmissionController;
use pairwatch_core::request::{Inbound, JsonRpcError, RpcId, SubscriptionId};

use crate::transport::{Connection, Connector};

/// Where the supervisor currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Subscribing,
    Listening,
}

enum Reply {
    Subscribed(SubscriptionId),
    Rejected(JsonRpcError),
    Shutdown,
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    admission: Arc<AdmissionController>,
    spec: SubscriptionSpec,
    config: SupervisorConfig,
    next_id: AtomicU64,
    state: watch::Sender<SupervisorState>,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        admission: Arc<AdmissionController>,
        spec: SubscriptionSpec,
        config: SupervisorConfig,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            connector,
            admission,
            spec,
            config,
            next_id: AtomicU64::new(1),
            state,
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Connect, subscribe and forward notifications into `buffer`.
    ///
    /// Returns `Ok(())` only when `shutdown` fires. Any transport or
    /// non-throttling provider error closes the connection and is returned.
    pub async fn run(&self, buffer: &BufferSender, shutdown: &CancellationToken) -> Result<(), WatchError> {
        self.set_state(SupervisorState::Connecting);
        let connected = tokio::select! {
            _ = shutdown.cancelled() => None,
            res = self.connector.connect() => Some(res),
        };
        let mut conn = match connected {
            None => {
                self.set_state(SupervisorState::Disconnected);
                return Ok(());
            }
            Some(Err(e)) => {
                self.set_state(SupervisorState::Disconnected);
                return Err(e);
            }
            Some(Ok(conn)) => conn,
        };
        tracing::info!(url = self.connector.url(), "connected");

        let result = match self.subscribe(conn.as_mut(), shutdown).await {
            Ok(Some(subscription)) => self.listen(conn.as_mut(), &subscription, buffer, shutdown).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        conn.close().await;
        self.set_state(SupervisorState::Disconnected);
        match &result {
            Ok(()) => tracing::info!("connection closed on shutdown"),
            Err(e) => tracing::warn!(error = %e, "connection lost"),
        }
        result
    }

    /// Subscribing phase. `Ok(None)` means shutdown fired.
    async fn subscribe(
        &self,
        conn: &mut dyn Connection,
        shutdown: &CancellationToken,
    ) -> Result<Option<Subscription>, WatchError> {
        self.set_state(SupervisorState::Subscribing);
        loop {
            if !self.admission.acquire() {
                tracing::debug!(
                    stats = ?self.admission.stats(),
                    retry_ms = self.config.gate_retry_delay.as_millis() as u64,
                    "subscribe attempt denied by admission gate"
                );
                if !pause(shutdown, self.config.gate_retry_delay).await {
                    return Ok(None);
                }
                continue;
            }
            tracing::debug!(stats = ?self.admission.stats(), "subscribe attempt admitted");

            // An admitted attempt must always be reported back, or a HalfOpen
            // circuit never admits another attempt.
            let reply = match self.request_subscription(conn, shutdown).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.admission.report_failure();
                    return Err(e);
                }
            };

            let delay = match reply {
                Reply::Shutdown => return Ok(None),
                Reply::Subscribed(sub) => {
                    self.admission.report_success();
                    tracing::info!(
                        subscription = %sub,
                        addresses = self.spec.addresses.len(),
                        topics = self.spec.topics.len(),
                        "subscribed to logs"
                    );
                    return Ok(Some(Subscription {
                        id: sub,
                        spec: self.spec.clone(),
                    }));
                }
                Reply::Rejected(error) if error.is_rate_limit() => {
                    self.admission.report_failure();
                    tracing::warn!(
                        error = %error,
                        retry_ms = self.config.subscribe_rate_limit_delay.as_millis() as u64,
                        "subscribe rate limited by provider"
                    );
                    self.config.subscribe_rate_limit_delay
                }
                Reply::Rejected(error) => {
                    self.admission.report_failure();
                    tracing::warn!(
                        error = %error,
                        retry_ms = self.config.subscribe_error_delay.as_millis() as u64,
                        "subscribe rejected"
                    );
                    self.config.subscribe_error_delay
                }
            };
            if !pause(shutdown, delay).await {
                return Ok(None);
            }
        }
    }

    async fn request_subscription(
        &self,
        conn: &mut dyn Connection,
        shutdown: &CancellationToken,
    ) -> Result<Reply, WatchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::to_string(&self.spec.to_request(id))?;
        conn.send_text(request).await?;
        self.await_reply(conn, id, shutdown).await
    }

    async fn await_reply(
        &self,
        conn: &mut dyn Connection,
        id: u64,
        shutdown: &CancellationToken,
    ) -> Result<Reply, WatchError> {
        let deadline = tokio::time::sleep(self.config.subscribe_timeout);
        tokio::pin!(deadline);

        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return Ok(Reply::Shutdown),
                _ = &mut deadline => {
                    return Err(WatchError::ConnectTimeout {
                        ms: self.config.subscribe_timeout.as_millis() as u64,
                    })
                }
                frame = conn.next_text() => frame,
            };
            let text = match frame {
                None => return Err(WatchError::Disconnected("closed while subscribing".into())),
                Some(frame) => frame?,
            };

            match Inbound::parse(&text) {
                Ok(Inbound::Response { id: reply_id, result }) if is_reply_to(&reply_id, id) => {
                    let sub = serde_json::from_value::<SubscriptionId>(result)
                        .map_err(|e| WatchError::Malformed(format!("subscription id: {e}")))?;
                    return Ok(Reply::Subscribed(sub));
                }
                Ok(Inbound::Error { id: reply_id, error })
                    if reply_id.as_ref().map_or(true, |r| is_reply_to(r, id)) =>
                {
                    return Ok(Reply::Rejected(error));
                }
                Ok(_) => tracing::debug!("ignoring unrelated frame while subscribing"),
                Err(e) => tracing::warn!(error = %e, "skipping malformed message"),
            }
        }
    }

    /// Listening phase. Returns `Ok(())` on shutdown, `Err` on anything that
    /// should tear the connection down.
    async fn listen(
        &self,
        conn: &mut dyn Connection,
        subscription: &Subscription,
        buffer: &BufferSender,
        shutdown: &CancellationToken,
    ) -> Result<(), WatchError> {
        self.set_state(SupervisorState::Listening);
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                frame = conn.next_text() => frame,
            };
            let text = match frame {
                None => return Err(WatchError::Disconnected("stream ended".into())),
                Some(frame) => frame?,
            };

            match Inbound::parse(&text) {
                Ok(Inbound::Notification { subscription: sub, result }) => {
                    if sub != subscription.id {
                        tracing::debug!(subscription = %sub, "notification for unknown subscription");
                        continue;
                    }
                    let event: RawEvent = match serde_json::from_value(result) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed log");
                            continue;
                        }
                    };
                    if event.removed {
                        tracing::debug!(
                            address = %event.address,
                            block = ?event.block_number(),
                            "skipping removed log"
                        );
                        continue;
                    }
                    match buffer.push(event).await {
                        Ok(()) => {}
                        Err(WatchError::BufferClosed) if shutdown.is_cancelled() => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
                Ok(Inbound::Error { error, .. }) if error.is_rate_limit() => {
                    tracing::warn!(
                        error = %error,
                        pause_ms = self.config.listen_rate_limit_delay.as_millis() as u64,
                        "provider throttling notice"
                    );
                    if !pause(shutdown, self.config.listen_rate_limit_delay).await {
                        return Ok(());
                    }
                }
                Ok(Inbound::Error { error, .. }) => return Err(WatchError::Rpc(error)),
                Ok(Inbound::Response { id, .. }) => {
                    tracing::debug!(id = %id, "ignoring stray response");
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed message"),
            }
        }
    }

    fn set_state(&self, next: SupervisorState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "supervisor state");
        }
    }
}

fn is_reply_to(reply: &RpcId, id: u64) -> bool {
    match reply {
        RpcId::Number(n) => *n == id,
        RpcId::String(s) => s == &id.to_string(),
        RpcId::Null => false,
    }
}

/// Sleep for `delay` unless shutdown fires first. `false` means shutdown.
async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{notification, Frame, ScriptedConnector, Session};
    use pairwatch_core::buffer;
    use pairwatch_core::policy::{AdmissionConfig, CircuitState};
    use pairwatch_core::request::RATE_LIMIT_CODE;
    use pairwatch_core::network::{V2_PAIR_CREATED_TOPIC, V3_POOL_CREATED_TOPIC};
    use alloy_primitives::address;
    use tokio::time::Instant;

    fn spec() -> SubscriptionSpec {
        SubscriptionSpec {
            addresses: vec![
                address!("5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f"),
                address!("1f98431c8ad98523631ae4a59f267346ea31f984"),
            ],
            topics: vec![V2_PAIR_CREATED_TOPIC, V3_POOL_CREATED_TOPIC],
        }
    }

    fn supervisor(connector: &ScriptedConnector, admission: AdmissionConfig) -> ConnectionSupervisor {
        ConnectionSupervisor::new(
            Arc::new(connector.clone()),
            Arc::new(AdmissionController::new(admission)),
            spec(),
            SupervisorConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_notifications_until_disconnect() {
        let connector = ScriptedConnector::new([Session::Frames(vec![
            Frame::SubscribeOk("0xabc"),
            notification("0xabc", 1),
            notification("0xother", 2),
            Frame::Text("not json".into()),
            notification("0xabc", 3),
        ])]);
        let sup = supervisor(&connector, AdmissionConfig::default());
        let shutdown = CancellationToken::new();
        let (tx, mut rx) = buffer::channel(10, shutdown.clone());

        let err = sup.run(&tx, &shutdown).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(sup.state(), SupervisorState::Disconnected);
        assert_eq!(connector.closed(), 1);

        assert_eq!(rx.try_next().unwrap().block_number(), Some(1));
        assert_eq!(rx.try_next().unwrap().block_number(), Some(3));
        assert!(rx.try_next().is_none());

        let sent: serde_json::Value = serde_json::from_str(&connector.sent()[0]).unwrap();
        assert_eq!(sent["method"], "eth_subscribe");
        assert_eq!(sent["params"][0], "logs");
        assert_eq!(sent["params"][1]["address"].as_array().unwrap().len(), 2);
        assert_eq!(sent["params"][1]["topics"][0].as_array().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_removed_logs() {
        let removed = Frame::Text(
            serde_json::json!({
                "params": {
                    "subscription": "0xabc",
                    "result": {"address": "0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f", "removed": true}
                }
            })
            .to_string(),
        );
        let connector = ScriptedConnector::new([Session::Frames(vec![Frame::SubscribeOk("0xabc"), removed])]);
        let sup = supervisor(&connector, AdmissionConfig::default());
        let shutdown = CancellationToken::new();
        let (tx, rx) = buffer::channel(10, shutdown.clone());

        assert!(sup.run(&tx, &shutdown).await.is_err());
        assert!(rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_subscribe_reports_failure_and_retries() {
        let connector = ScriptedConnector::new([Session::Frames(vec![
            Frame::SubscribeErr(RATE_LIMIT_CODE),
            Frame::SubscribeOk("0x1"),
            Frame::Fail("reset by peer"),
        ])]);
        let sup = supervisor(&connector, AdmissionConfig::default());
        let shutdown = CancellationToken::new();
        let (tx, _rx) = buffer::channel(10, shutdown.clone());

        let started = Instant::now();
        let err = sup.run(&tx, &shutdown).await.unwrap_err();
        assert!(matches!(err, WatchError::WebSocket(msg) if msg == "reset by peer"));
        assert!(started.elapsed() >= SupervisorConfig::default().subscribe_rate_limit_delay);

        // Same connection, two subscribe requests.
        assert_eq!(connector.connects().len(), 1);
        assert_eq!(connector.sent().len(), 2);
        assert_eq!(sup.admission().stats().failure_streak, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_delays_subscribe_without_reconnecting() {
        let connector = ScriptedConnector::new([Session::Frames(vec![
            Frame::SubscribeErr(RATE_LIMIT_CODE),
            Frame::SubscribeOk("0x1"),
        ])]);
        let admission = AdmissionConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(20),
            ..AdmissionConfig::default()
        };
        let sup = supervisor(&connector, admission);
        let shutdown = CancellationToken::new();
        let (tx, _rx) = buffer::channel(10, shutdown.clone());

        let started = Instant::now();
        assert!(sup.run(&tx, &shutdown).await.is_err());

        // The first rejection opens the circuit. The gate then stays shut
        // until the recovery timeout, probing every gate_retry_delay.
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(connector.connects().len(), 1);
        assert_eq!(connector.sent().len(), 2);
        assert_eq!(sup.admission().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_half_open_attempt_reopens_circuit() {
        let connector = ScriptedConnector::new([
            Session::Frames(vec![Frame::SubscribeErr(RATE_LIMIT_CODE), Frame::Fail("reset by peer")]),
            Session::Frames(vec![Frame::SubscribeOk("0x2"), Frame::Hang]),
        ]);
        let admission = AdmissionConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(20),
            ..AdmissionConfig::default()
        };
        let sup = Arc::new(supervisor(&connector, admission));
        let shutdown = CancellationToken::new();
        let (tx, _rx) = buffer::channel(10, shutdown.clone());

        // The HalfOpen attempt dies on the wire, which must count as a failure.
        let err = sup.run(&tx, &shutdown).await.unwrap_err();
        assert!(matches!(err, WatchError::WebSocket(msg) if msg == "reset by peer"));
        assert_eq!(connector.sent().len(), 2);
        assert_eq!(sup.admission().state(), CircuitState::Open);

        let mut states = sup.watch_state();
        let task = {
            let sup = sup.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sup.run(&tx, &shutdown).await })
        };
        tokio::time::timeout(
            Duration::from_secs(60),
            states.wait_for(|s| *s == SupervisorState::Listening),
        )
        .await
        .expect("second connection never subscribed")
        .unwrap();

        assert_eq!(connector.sent().len(), 3);
        assert_eq!(sup.admission().state(), CircuitState::Closed);
        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn generic_listen_error_tears_down() {
        let connector = ScriptedConnector::new([Session::Frames(vec![
            Frame::SubscribeOk("0x1"),
            Frame::Text(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32000,"message":"boom"}}"#.into()),
            notification("0x1", 9),
        ])]);
        let sup = supervisor(&connector, AdmissionConfig::default());
        let shutdown = CancellationToken::new();
        let (tx, rx) = buffer::channel(10, shutdown.clone());

        let err = sup.run(&tx, &shutdown).await.unwrap_err();
        assert!(matches!(err, WatchError::Rpc(e) if e.code == -32000));
        assert!(rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_notice_pauses_without_closing() {
        let connector = ScriptedConnector::new([Session::Frames(vec![
            Frame::SubscribeOk("0x1"),
            Frame::Text(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32007,"message":"slow down"}}"#.into()),
            notification("0x1", 4),
        ])]);
        let sup = supervisor(&connector, AdmissionConfig::default());
        let shutdown = CancellationToken::new();
        let (tx, mut rx) = buffer::channel(10, shutdown.clone());

        let started = Instant::now();
        assert!(sup.run(&tx, &shutdown).await.is_err());
        assert!(started.elapsed() >= SupervisorConfig::default().listen_rate_limit_delay);
        assert_eq!(rx.try_next().unwrap().block_number(), Some(4));
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_timeout_is_a_transport_fault() {
        let connector = ScriptedConnector::new([Session::Frames(vec![Frame::Hang])]);
        let sup = supervisor(&connector, AdmissionConfig::default());
        let shutdown = CancellationToken::new();
        let (tx, _rx) = buffer::channel(10, shutdown.clone());

        let err = sup.run(&tx, &shutdown).await.unwrap_err();
        assert!(matches!(err, WatchError::ConnectTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_listening_returns_ok() {
        let connector = ScriptedConnector::new([Session::Frames(vec![Frame::SubscribeOk("0x1"), Frame::Hang])]);
        let sup = Arc::new(supervisor(&connector, AdmissionConfig::default()));
        let shutdown = CancellationToken::new();
        let (tx, _rx) = buffer::channel(10, shutdown.clone());

        let mut states = sup.watch_state();
        let task = {
            let sup = sup.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sup.run(&tx, &shutdown).await })
        };
        states
            .wait_for(|s| *s == SupervisorState::Listening)
            .await
            .unwrap();
        shutdown.cancel();

        assert!(task.await.unwrap().is_ok());
        assert_eq!(sup.state(), SupervisorState::Disconnected);
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_propagates() {
        let connector = ScriptedConnector::new([Session::Refuse]);
        let sup = supervisor(&connector, AdmissionConfig::default());
        let shutdown = CancellationToken::new();
        let (tx, _rx) = buffer::channel(10, shutdown.clone());

        assert!(sup.run(&tx, &shutdown).await.unwrap_err().is_transport());
        assert!(connector.sent().is_empty());
    }
}
