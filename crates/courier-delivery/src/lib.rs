//! Webhook delivery engine with reliability guarantees.
//!
//! Implements the delivery state machine over the status store and task
//! queue: classified outcomes feed a pure retry policy, per-host circuit
//! breakers stop hammering dead destinations, delayed retries are
//! re-enqueued tasks with an `eta`, and permanently failed deliveries land
//! in the dead-letter namespace. The compute side runs the pluggable
//! claim processor and feeds its results into delivery.
//!
//! ```text
//!  compute_queue ─▶ ComputeRunner ─▶ webhook_queue ─▶ WebhookDeliverer
//!                        │                                  │
//!                   task_status:*                    webhook_status:*
//!                                                    dead_letter:webhook:*
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod compute;
pub mod deliver;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod signature;
pub mod url_policy;

pub use circuit::{BreakerSnapshot, CircuitBreakerRegistry, CircuitConfig, CircuitState};
pub use client::{AttemptResult, ClientConfig, DeliveryClient, DeliveryOutcome, DeliveryRequest};
pub use compute::{ClaimProcessor, ComputeConfig, ComputeRunner, SummaryProcessor};
pub use deliver::WebhookDeliverer;
pub use error::{ComputeError, DeliveryError, Result};
pub use retry::{RetryDecision, RetryPolicy};
pub use url_policy::{UrlPolicy, UrlViolation};
