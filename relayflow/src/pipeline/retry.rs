//! Retry decisions and the scheduler that holds messages between attempts.
//!
//! A failed message never occupies a worker while it waits. The router
//! hands it to the [`RetryScheduler`], which parks it in a time-ordered
//! heap and re-dispatches it to its stage once the backoff elapses.

use crate::config::Config;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Backoff policy for retry delays.
///
/// All policies are monotonic: the delay for attempt `n + 1` is never
/// shorter than the delay for attempt `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffPolicy {
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base
    Constant,
}

impl BackoffPolicy {
    /// Computes the raw delay before the `attempt`-th retry (1-based).
    ///
    /// The result is uncapped; callers clamp it to their configured
    /// maximum. Arithmetic saturates instead of overflowing.
    #[must_use]
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let base_ms = base.as_millis().min(u128::from(u64::MAX)) as u64;
        let attempt = attempt.max(1);
        let ms = match self {
            Self::Exponential => base_ms.saturating_mul(2u64.saturating_pow(attempt - 1)),
            Self::Linear => base_ms.saturating_mul(u64::from(attempt)),
            Self::Constant => base_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Outcome of a retry decision for a failed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RetryVerdict {
    /// Re-dispatch to the same stage after the delay.
    Backoff {
        /// 1-based attempt number about to be scheduled.
        attempt: u32,
        /// How long to park the message first.
        delay: Duration,
    },
    /// The budget for the current stage is spent.
    Exhausted,
}

/// Spends one retry from the message budget and prices the wait.
pub(crate) fn next_retry(message: &mut Message, config: &Config) -> RetryVerdict {
    if !message.consume_retry() {
        return RetryVerdict::Exhausted;
    }
    let attempt = config.retries - message.retries_left();
    let delay = config
        .backoff_policy
        .delay(config.backoff(), attempt)
        .min(config.max_backoff());
    RetryVerdict::Backoff { attempt, delay }
}

/// A message parked until its retry is due.
#[derive(Debug)]
pub(crate) struct Scheduled {
    due: Instant,
    sequence: u64,
    message: Message,
}

impl Scheduled {
    pub(crate) fn new(due: Instant, message: Message) -> Self {
        Self {
            due,
            sequence: message.sequence(),
            message,
        }
    }
}

// Ordered by due time, sequence as tie-breaker so the heap order is total.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for Scheduled {}

/// Parks failed messages and re-dispatches them when their backoff
/// elapses.
///
/// Runs as a single task. It sleeps until the earliest due time in the
/// heap, or indefinitely while the heap is empty, and wakes early when
/// the router schedules a new entry.
pub(crate) struct RetryScheduler {
    entries: mpsc::UnboundedReceiver<Scheduled>,
    stage_inbounds: Vec<mpsc::Sender<Message>>,
    heap: BinaryHeap<Reverse<Scheduled>>,
}

impl RetryScheduler {
    pub(crate) fn new(
        entries: mpsc::UnboundedReceiver<Scheduled>,
        stage_inbounds: Vec<mpsc::Sender<Message>>,
    ) -> Self {
        Self {
            entries,
            stage_inbounds,
            heap: BinaryHeap::new(),
        }
    }

    /// Runs until the scheduling channel closes. Entries still parked
    /// at that point are dropped with the heap.
    pub(crate) async fn run(mut self) {
        loop {
            let next_due = self.heap.peek().map(|Reverse(entry)| entry.due);
            let wait = async move {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                incoming = self.entries.recv() => match incoming {
                    Some(entry) => self.heap.push(Reverse(entry)),
                    None => break,
                },
                () = wait => self.dispatch_due().await,
            }
        }
    }

    /// Re-dispatches every entry whose due time has passed.
    async fn dispatch_due(&mut self) {
        let now = Instant::now();
        while self.heap.peek().is_some_and(|Reverse(entry)| entry.due <= now) {
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            let index = entry.message.stage_index();
            trace!(seq = entry.sequence, stage = index, "backoff elapsed; re-dispatching");
            match self.stage_inbounds.get(index) {
                Some(inbound) => {
                    if inbound.send(entry.message).await.is_err() {
                        trace!(seq = entry.sequence, "stage inbound closed; dropping retry");
                    }
                }
                None => warn!(seq = entry.sequence, stage = index, "no such stage; dropping retry"),
            }
        }
    }
}
