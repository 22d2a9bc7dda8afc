//! Connection policies.
//!
//! ```text
//! subscribe attempt → [AdmissionController] → provider
//! supervisor error  → [RetryOrchestrator]   → reconnect after backoff
//! ```

pub mod admission;
pub mod retry;

pub use admission::{AdmissionConfig, AdmissionController, AdmissionStats, CircuitState};
pub use retry::{BackoffPolicy, RetryConfig, RetryOrchestrator};
