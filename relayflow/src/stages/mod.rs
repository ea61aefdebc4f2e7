//! Stage traits and the built-in stages.
//!
//! Stages are the pluggable processing units of a relayflow pipeline.
//! Each stage contributes a pool of workers; every worker owns one
//! stage instance and processes one message at a time.

mod batch;
#[cfg(feature = "http")]
mod http;
mod passthrough;

pub use batch::{BatchConfig, Batcher, BATCH_GROUP_OPTION};
#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpSender, HTTP_ENDPOINT_OPTION, TRANSPORT_ERROR_CODE};
pub use passthrough::Passthrough;

use crate::message::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A factory for one pipeline stage.
///
/// The engine calls [`spawn`](Stage::spawn) once per worker when the
/// pipeline starts, so a stage type describes the pool while its
/// workers hold the per-worker state.
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage, used in logs and errors.
    fn name(&self) -> &str;

    /// Number of workers to run for this stage.
    fn workers(&self) -> usize {
        1
    }

    /// Builds the worker instance with the given pool-local id.
    fn spawn(&self, worker_id: usize) -> Box<dyn StageWorker>;
}

/// One worker of a stage pool.
///
/// A worker receives each message together with its [`Done`] handle
/// and must eventually resolve it, either inline or after holding the
/// message (a batcher resolves whole groups at once). Workers that can
/// hold messages report their earliest deadline via
/// [`next_flush`](StageWorker::next_flush); the engine calls
/// [`flush`](StageWorker::flush) when it passes.
#[async_trait]
pub trait StageWorker: Send {
    /// Processes one message. Ownership of both the message and its
    /// completion handle transfers to the worker.
    async fn process(&mut self, message: Message, done: Done);

    /// The earliest moment held work must be flushed, if any.
    fn next_flush(&self) -> Option<Instant> {
        None
    }

    /// Releases held work whose deadline has passed.
    async fn flush(&mut self) {}
}

/// Outcome of one processing attempt, raised by a [`Done`] handle.
#[derive(Debug)]
pub(crate) enum Completion {
    /// The worker resolved the attempt with a code and status.
    Resolved {
        message: Message,
        code: i32,
        status: String,
    },
    /// The worker dropped its handle without resolving it.
    Abandoned { sequence: u64, opaque: Value },
}

/// The completion handle for one processing attempt.
///
/// Resolving consumes the handle, so a worker can report each attempt
/// at most once; the compiler rejects a second call. A handle dropped
/// without being resolved raises a failure instead of leaving the
/// message in flight forever.
#[derive(Debug)]
pub struct Done {
    completions: mpsc::UnboundedSender<Completion>,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    sequence: u64,
    opaque: Value,
}

impl Done {
    pub(crate) fn attach(message: &Message, completions: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            completions,
            pending: Some(Pending {
                sequence: message.sequence(),
                opaque: message.opaque().clone(),
            }),
        }
    }

    /// Resolves the attempt. Code `0` means the stage succeeded and the
    /// message moves on; any other code triggers the retry path. The
    /// status is carried verbatim into the final report if this
    /// attempt turns out to be terminal.
    pub fn resolve(mut self, message: Message, code: i32, status: impl Into<String>) {
        self.pending = None;
        let completion = Completion::Resolved {
            message,
            code,
            status: status.into(),
        };
        if self.completions.send(completion).is_err() {
            debug!("completion channel closed; engine is stopping");
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            warn!(seq = pending.sequence, "completion handle dropped without resolving");
            let abandoned = Completion::Abandoned {
                sequence: pending.sequence,
                opaque: pending.opaque,
            };
            let _ = self.completions.send(abandoned);
        }
    }
}

/// A stage built from a closure, mostly useful for tests and
/// prototyping.
///
/// The closure runs synchronously inside the worker and receives full
/// ownership of the message and its handle.
pub struct FnStage<F>
where
    F: Fn(Message, Done) + Send + Sync + 'static,
{
    name: String,
    workers: usize,
    func: Arc<F>,
}

impl<F> FnStage<F>
where
    F: Fn(Message, Done) + Send + Sync + 'static,
{
    /// Creates a single-worker stage from a closure.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            workers: 1,
            func: Arc::new(func),
        }
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(Message, Done) + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .finish()
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(Message, Done) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn spawn(&self, _worker_id: usize) -> Box<dyn StageWorker> {
        Box::new(FnWorker {
            func: Arc::clone(&self.func),
        })
    }
}

struct FnWorker<F>
where
    F: Fn(Message, Done) + Send + Sync + 'static,
{
    func: Arc<F>,
}

#[async_trait]
impl<F> StageWorker for FnWorker<F>
where
    F: Fn(Message, Done) + Send + Sync + 'static,
{
    async fn process(&mut self, message: Message, done: Done) {
        (self.func)(message, done);
    }
}
