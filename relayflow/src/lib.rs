//! # Relayflow
//!
//! An asynchronous message-forwarding pipeline engine.
//!
//! Relayflow moves payloads through an ordered chain of pluggable
//! stages and asynchronously reports one terminal outcome per message:
//!
//! - **Ordered stages**: each stage runs a pool of workers pulling
//!   from a shared bounded queue
//! - **Decoupled injection**: producers attach an opaque value and
//!   collect the outcome later from a report stream
//! - **Retries with backoff**: failed messages are re-dispatched to
//!   the failing stage without occupying a worker while they wait
//! - **Bounded memory**: a full intake pushes back on producers
//!   instead of buffering without limit
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relayflow::prelude::*;
//!
//! // Assemble a pipeline
//! let (forwarder, mut reports) = ForwarderBuilder::new(Config::default())
//!     .stage(Batcher::new(BatchConfig::new().with_limit(100)))
//!     .stage(HttpSender::new(HttpConfig::new("http://localhost:8080")))
//!     .run()?;
//!
//! // Inject a message and collect its outcome
//! forwarder.produce(payload, Options::new(), json!({"id": 42})).await?;
//! let report = reports.recv().await.unwrap();
//! assert!(report.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod forwarder;
pub mod message;
pub mod pipeline;
pub mod report;
pub mod stages;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::errors::{ConfigError, ProduceError};
    pub use crate::forwarder::{Forwarder, ForwarderBuilder};
    pub use crate::message::{Message, Options};
    pub use crate::pipeline::{BackoffPolicy, MetricsSnapshot};
    pub use crate::report::{Report, ReportStream};
    #[cfg(feature = "http")]
    pub use crate::stages::{HttpConfig, HttpSender};
    pub use crate::stages::{
        BatchConfig, Batcher, Done, FnStage, Passthrough, Stage, StageWorker,
    };
}
