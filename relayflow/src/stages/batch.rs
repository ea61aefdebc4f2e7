//! A stage that accumulates messages into groups and completes them in
//! waves.
//!
//! Messages opt in with a `batch_group` option; everything else passes
//! straight through. A group completes when it reaches the configured
//! limit or when its time window elapses, whichever comes first. Every
//! held message is resolved individually, so each still produces its
//! own report downstream.

use super::{Done, Stage, StageWorker};
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Option key that assigns a message to a batch group.
pub const BATCH_GROUP_OPTION: &str = "batch_group";

/// Tuning for the batch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Messages held per group before the wave completes.
    pub limit: usize,
    /// Time window for a group, measured from its first message, in
    /// milliseconds.
    pub timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout_ms: 1000,
        }
    }
}

impl BatchConfig {
    /// Creates the default batch tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the group size limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the group time window.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = timeout;
        self
    }

    /// The group time window.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Accumulates messages keyed by their `batch_group` option.
#[derive(Debug, Clone)]
pub struct Batcher {
    config: BatchConfig,
    workers: usize,
}

impl Batcher {
    /// Creates a single-worker batcher.
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        Self { config, workers: 1 }
    }

    /// Sets the worker count.
    ///
    /// Groups live inside a worker, so with several workers messages
    /// of one group may land in different waves.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

impl Stage for Batcher {
    fn name(&self) -> &str {
        "batch"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn spawn(&self, _worker_id: usize) -> Box<dyn StageWorker> {
        Box::new(BatchWorker {
            config: self.config.clone(),
            groups: HashMap::new(),
        })
    }
}

struct Group {
    held: Vec<(Message, Done)>,
    deadline: Instant,
}

struct BatchWorker {
    config: BatchConfig,
    groups: HashMap<String, Group>,
}

impl BatchWorker {
    fn complete_wave(key: &str, group: Group) {
        debug!(group = key, count = group.held.len(), "completing batch wave");
        for (message, done) in group.held {
            done.resolve(message, 0, "");
        }
    }
}

#[async_trait]
impl StageWorker for BatchWorker {
    async fn process(&mut self, message: Message, done: Done) {
        let key = match message.option(BATCH_GROUP_OPTION).and_then(Value::as_str) {
            Some(key) => key.to_owned(),
            None => {
                done.resolve(message, 0, "");
                return;
            }
        };

        // The window starts when the group opens, not per message.
        let deadline = Instant::now() + self.config.timeout();
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| Group { held: Vec::new(), deadline });
        group.held.push((message, done));
        let full = group.held.len() >= self.config.limit.max(1);

        if full {
            if let Some(group) = self.groups.remove(&key) {
                Self::complete_wave(&key, group);
            }
        }
    }

    fn next_flush(&self) -> Option<Instant> {
        self.groups.values().map(|group| group.deadline).min()
    }

    async fn flush(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, group)| group.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            if let Some(group) = self.groups.remove(&key) {
                Self::complete_wave(&key, group);
            }
        }
    }
}
