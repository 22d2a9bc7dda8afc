//! Scripted connector used by the supervisor and watcher tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use pairwatch_core::error::WatchError;

use crate::transport::{Connection, Connector};

/// One inbound step on a scripted connection.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Deliver this text verbatim.
    Text(String),
    /// Acknowledge the last request with this subscription id.
    SubscribeOk(&'static str),
    /// Answer the last request with a JSON-RPC error.
    SubscribeErr(i64),
    /// Fail the read with a transport error.
    Fail(&'static str),
    /// Never yield again.
    Hang,
}

/// What the next `connect()` does.
#[derive(Debug, Clone)]
pub enum Session {
    Refuse,
    Frames(Vec<Frame>),
}

#[derive(Debug, Default)]
pub struct Record {
    pub connects: Vec<Instant>,
    pub sent: Vec<String>,
    pub closed: usize,
}

/// Plays back one [`Session`] per connect. Once the script runs out every
/// further connection hangs.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    sessions: Arc<Mutex<VecDeque<Session>>>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedConnector {
    pub fn new(sessions: impl IntoIterator<Item = Session>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into_iter().collect())),
            record: Arc::default(),
        }
    }

    pub fn connects(&self) -> Vec<Instant> {
        self.record.lock().unwrap().connects.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.record.lock().unwrap().sent.clone()
    }

    pub fn closed(&self) -> usize {
        self.record.lock().unwrap().closed
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, WatchError> {
        self.record.lock().unwrap().connects.push(Instant::now());
        let session = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Session::Frames(vec![Frame::Hang]));
        match session {
            Session::Refuse => Err(WatchError::WebSocket("connection refused".into())),
            Session::Frames(frames) => Ok(Box::new(ScriptedConnection {
                frames: frames.into(),
                last_id: Value::Null,
                record: self.record.clone(),
            })),
        }
    }

    fn url(&self) -> &str {
        "ws://scripted"
    }
}

struct ScriptedConnection {
    frames: VecDeque<Frame>,
    last_id: Value,
    record: Arc<Mutex<Record>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send_text(&mut self, text: String) -> Result<(), WatchError> {
        if let Ok(req) = serde_json::from_str::<Value>(&text) {
            self.last_id = req["id"].clone();
        }
        self.record.lock().unwrap().sent.push(text);
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, WatchError>> {
        let frame = self.frames.pop_front()?;
        let text = match frame {
            Frame::Text(text) => text,
            Frame::SubscribeOk(sub) => {
                json!({"jsonrpc": "2.0", "id": self.last_id, "result": sub}).to_string()
            }
            Frame::SubscribeErr(code) => json!({
                "jsonrpc": "2.0",
                "id": self.last_id,
                "error": {"code": code, "message": "scripted error"}
            })
            .to_string(),
            Frame::Fail(msg) => return Some(Err(WatchError::WebSocket(msg.into()))),
            Frame::Hang => {
                self.frames.push_front(Frame::Hang);
                return std::future::pending().await;
            }
        };
        Some(Ok(text))
    }

    async fn close(&mut self) {
        self.record.lock().unwrap().closed += 1;
    }
}

/// A `PairCreated` notification for subscription `sub`.
pub fn notification(sub: &str, block: u64) -> Frame {
    Frame::Text(
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": sub,
                "result": {
                    "address": "0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f",
                    "topics": [],
                    "data": "0x",
                    "blockNumber": format!("{block:#x}"),
                    "logIndex": "0x0",
                    "removed": false
                }
            }
        })
        .to_string(),
    )
}
