//! Adaptive admission control: a sliding-window rate limiter fused with a
//! three-state circuit breaker.
//!
//! State transitions:
//! - `Closed` → `Open`:      failure streak reaches `failure_threshold`
//! - `Open` → `Half-Open`:   `recovery_timeout` has elapsed since the last failure
//! - `Half-Open` → `Closed`: the single probe succeeds
//! - `Half-Open` → `Open`:   the probe (or anything else) fails
//!
//! Each transition into `Open` multiplies the allowed rate by
//! `adaptive_factor` (floor 1); closing divides it again, capped at
//! `max_rate`.
//!
//! [`AdmissionController::acquire`] never sleeps. A denial is a synchronous
//! signal; the caller decides how long to wait.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::millis;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All requests rejected until `recovery_timeout` elapses.
    Open,
    /// One probe request allowed to test provider health.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the admission controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Requests allowed per window at start-up.
    pub initial_rate: u32,
    /// Upper bound the rate may recover to.
    pub max_rate: u32,
    /// Sliding window length.
    #[serde(rename = "window_ms", with = "millis")]
    pub window: Duration,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to stay open after the last failure.
    #[serde(rename = "recovery_timeout_ms", with = "millis")]
    pub recovery_timeout: Duration,
    /// Rate multiplier applied when opening, in `(0, 1)`.
    pub adaptive_factor: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            initial_rate: 10,
            max_rate: 15,
            window: Duration::from_millis(1_500),
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            adaptive_factor: 0.5,
        }
    }
}

/// Point-in-time view of the controller, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub state: CircuitState,
    pub current_rate: u32,
    pub in_window: usize,
    pub failure_streak: u32,
}

struct Inner {
    state: CircuitState,
    current_rate: u32,
    request_times: VecDeque<Instant>,
    failure_streak: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Thread-safe admission gate shared by every outbound request.
pub struct AdmissionController {
    config: AdmissionConfig,
    inner: Mutex<Inner>,
}

impl AdmissionController {
    /// Create a controller in `Closed` state at `initial_rate`.
    pub fn new(config: AdmissionConfig) -> Self {
        let initial = config.initial_rate.clamp(1, config.max_rate.max(1));
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                current_rate: initial,
                request_times: VecDeque::with_capacity(initial as usize),
                failure_streak: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
            config,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Try to admit one request. Returns immediately.
    pub fn acquire(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        while let Some(&oldest) = inner.request_times.front() {
            if now.duration_since(oldest) > self.config.window {
                inner.request_times.pop_front();
            } else {
                break;
            }
        }

        match inner.state {
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .map_or(true, |t| now.duration_since(t) > self.config.recovery_timeout);
                if !recovered {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = false;
                tracing::info!(rate = inner.current_rate, "admission circuit → half-open");
            }
            CircuitState::HalfOpen if inner.probe_in_flight => return false,
            _ => {}
        }

        if inner.request_times.len() >= inner.current_rate as usize {
            tracing::debug!(
                in_window = inner.request_times.len(),
                rate = inner.current_rate,
                "admission window full"
            );
            self.fail(&mut inner, now);
            return false;
        }

        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = true;
        }
        inner.request_times.push_back(now);
        true
    }

    /// Record a failed request (provider error, throttling, timeout).
    pub fn report_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.fail(&mut inner, Instant::now());
    }

    /// Record a successful request.
    pub fn report_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_streak = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.probe_in_flight = false;
            let raised = (f64::from(inner.current_rate) / self.config.adaptive_factor) as u32;
            inner.current_rate = raised.clamp(1, self.config.max_rate.max(1));
            tracing::info!(rate = inner.current_rate, "admission circuit → closed");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn current_rate(&self) -> u32 {
        self.inner.lock().unwrap().current_rate
    }

    pub fn stats(&self) -> AdmissionStats {
        let inner = self.inner.lock().unwrap();
        AdmissionStats {
            state: inner.state,
            current_rate: inner.current_rate,
            in_window: inner.request_times.len(),
            failure_streak: inner.failure_streak,
        }
    }

    fn fail(&self, inner: &mut Inner, now: Instant) {
        inner.failure_streak = inner.failure_streak.saturating_add(1);
        inner.last_failure = Some(now);

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_streak >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.probe_in_flight = false;
            let lowered = (f64::from(inner.current_rate) * self.config.adaptive_factor) as u32;
            inner.current_rate = lowered.max(1);
            tracing::warn!(
                failures = inner.failure_streak,
                rate = inner.current_rate,
                "admission circuit → open"
            );
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("stats", &self.stats())
            .finish()
    }
}
