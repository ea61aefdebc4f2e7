//! A stage that forwards every message untouched.

use super::{Done, Stage, StageWorker};
use crate::message::Message;
use async_trait::async_trait;

/// Forwards every message with an immediate success.
///
/// Useful as a placeholder while wiring a pipeline and as a baseline
/// in benchmarks.
#[derive(Debug, Clone)]
pub struct Passthrough {
    workers: usize,
}

impl Passthrough {
    /// Creates a single-worker passthrough stage.
    #[must_use]
    pub fn new() -> Self {
        Self { workers: 1 }
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn spawn(&self, _worker_id: usize) -> Box<dyn StageWorker> {
        Box::new(PassthroughWorker)
    }
}

struct PassthroughWorker;

#[async_trait]
impl StageWorker for PassthroughWorker {
    async fn process(&mut self, message: Message, done: Done) {
        done.resolve(message, 0, "");
    }
}
