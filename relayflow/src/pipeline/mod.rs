//! Engine internals: worker pools, routing, retry scheduling and
//! counters.
//!
//! This module provides:
//! - Worker pools that drive stage instances
//! - The router that advances, retries and reports messages
//! - The backoff policies and the retry scheduler
//! - Run counters exposed as snapshots

mod metrics;
mod pool;
mod retry;
mod router;


pub use metrics::MetricsSnapshot;
pub use retry::BackoffPolicy;

pub(crate) use metrics::ForwarderMetrics;
pub(crate) use pool::spawn_pool;
pub(crate) use retry::{RetryScheduler, Scheduled};
pub(crate) use router::Router;
