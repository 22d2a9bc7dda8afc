//! Outermost retry loop with fixed or exponential backoff.
//!
//! The orchestrator owns its attempt counter; one instance drives one
//! logical operation. An attempt that stayed up for at least `reset_after`
//! counts as healthy and resets the backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::millis;
use crate::error::WatchError;

/// How long to wait between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Always wait the same delay.
    Fixed {
        #[serde(rename = "delay_ms", with = "millis")]
        delay: Duration,
    },
    /// `initial * multiplier^(attempt-1)`, capped at `max`, plus up to
    /// `jitter_fraction * delay` of random jitter.
    Exponential {
        #[serde(rename = "initial_ms", with = "millis")]
        initial: Duration,
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
        multiplier: f64,
        jitter_fraction: f64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Configuration for the retry orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff: BackoffPolicy,
    /// Consecutive failed attempts before giving up (`None` = never).
    pub max_attempts: Option<u32>,
    /// An attempt running at least this long resets the counter.
    #[serde(rename = "reset_after_ms", with = "millis")]
    pub reset_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: None,
            reset_after: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Base delay (no jitter) before the `attempt`-th retry (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
                ..
            } => {
                let exp = attempt.saturating_sub(1).min(63) as i32;
                let base_ms = initial.as_millis() as f64 * multiplier.powi(exp);
                let cap_ms = max.as_millis() as f64;
                Duration::from_millis(base_ms.min(cap_ms) as u64)
            }
        }
    }

    /// Delay including jitter. Never shorter than [`Self::base_delay`].
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        match self {
            Self::Exponential {
                jitter_fraction, ..
            } if *jitter_fraction > 0.0 => {
                let spread = base.as_secs_f64() * jitter_fraction;
                let jitter = rand::thread_rng().gen_range(0.0..=spread);
                base + Duration::from_secs_f64(jitter)
            }
            _ => base,
        }
    }
}

/// Re-invokes an operation until it succeeds, fails fatally, exhausts
/// `max_attempts`, or `shutdown` fires.
#[derive(Debug)]
pub struct RetryOrchestrator {
    config: RetryConfig,
    attempt: u32,
}

impl RetryOrchestrator {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Run `op` under the retry policy.
    ///
    /// `Ok(())` from `op` (or a fired `shutdown`) ends the loop. Fatal errors
    /// are returned as-is.
    pub async fn run<F, Fut>(&mut self, shutdown: &CancellationToken, mut op: F) -> Result<(), WatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), WatchError>>,
    {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let started = Instant::now();
            let err = match op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };
            if shutdown.is_cancelled() {
                return Ok(());
            }

            if started.elapsed() >= self.config.reset_after {
                self.attempt = 0;
            }
            self.attempt += 1;

            if let Some(max) = self.config.max_attempts {
                if self.attempt > max {
                    tracing::error!(attempts = self.attempt, error = %err, "retry budget exhausted");
                    return Err(WatchError::RetriesExhausted {
                        attempts: self.attempt,
                        last: Box::new(err),
                    });
                }
            }

            let delay = self.config.backoff.next_delay(self.attempt);
            tracing::warn!(
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "watcher failed, restarting"
            );

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn fixed(ms: u64) -> RetryConfig {
        RetryConfig {
            backoff: BackoffPolicy::Fixed {
                delay: Duration::from_millis(ms),
            },
            max_attempts: None,
            reset_after: Duration::from_secs(3600),
        }
    }

    #[test]
    fn exponential_delays() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        };
        assert_eq!(policy.next_delay(1), Duration::from_millis(100));
        assert_eq!(policy.next_delay(2), Duration::from_millis(200));
        assert_eq!(policy.next_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn exponential_delay_capped() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            multiplier: 10.0,
            jitter_fraction: 0.0,
        };
        assert_eq!(policy.next_delay(5), Duration::from_millis(500));
        assert_eq!(policy.next_delay(1_000), Duration::from_millis(500));
    }

    #[test]
    fn jitter_never_undercuts_base() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        };
        for attempt in 1..8 {
            let base = policy.base_delay(attempt);
            let d = policy.next_delay(attempt);
            assert!(d >= base, "attempt {attempt}: {d:?} < {base:?}");
            assert!(d <= base + base / 10 + Duration::from_millis(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reinvokes_after_configured_delay() {
        let shutdown = CancellationToken::new();
        let mut orchestrator = RetryOrchestrator::new(fixed(5_000));
        let calls = RefCell::new(Vec::new());

        let result = orchestrator
            .run(&shutdown, || {
                calls.borrow_mut().push(Instant::now());
                let n = calls.borrow().len();
                async move {
                    if n < 3 {
                        Err(WatchError::Disconnected("reset by peer".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        let calls = calls.into_inner();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let shutdown = CancellationToken::new();
        let mut orchestrator = RetryOrchestrator::new(fixed(10));
        let mut calls = 0;
        let result = orchestrator
            .run(&shutdown, || {
                calls += 1;
                async { Err(WatchError::Config("no factory address".into())) }
            })
            .await;
        assert!(matches!(result, Err(WatchError::Config(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let shutdown = CancellationToken::new();
        let mut orchestrator = RetryOrchestrator::new(RetryConfig {
            max_attempts: Some(2),
            ..fixed(10)
        });
        let mut calls = 0;
        let result = orchestrator
            .run(&shutdown, || {
                calls += 1;
                async { Err(WatchError::WebSocket("refused".into())) }
            })
            .await;
        match result {
            Err(WatchError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.is_transport());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn long_lived_attempt_resets_counter() {
        let shutdown = CancellationToken::new();
        let mut orchestrator = RetryOrchestrator::new(RetryConfig {
            max_attempts: Some(1),
            reset_after: Duration::from_secs(10),
            ..fixed(10)
        });
        let mut calls = 0u32;
        let result = orchestrator
            .run(&shutdown, || {
                calls += 1;
                let n = calls;
                async move {
                    match n {
                        // Each failure follows a long healthy run.
                        1..=3 => {
                            tokio::time::sleep(Duration::from_secs(20)).await;
                            Err(WatchError::Disconnected("eof".into()))
                        }
                        _ => Ok(()),
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_reinvocation() {
        let shutdown = CancellationToken::new();
        let mut orchestrator = RetryOrchestrator::new(fixed(60_000));
        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let mut calls = 0;
        let result = orchestrator
            .run(&shutdown, || {
                calls += 1;
                async { Err(WatchError::Disconnected("eof".into())) }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }
}
