//! The router that moves resolved messages between stages.
//!
//! One task owns all routing decisions: advance on success, back off
//! and retry on failure, emit the report once an outcome is terminal.
//! Workers hand it completions over an unbounded channel so a worker
//! never blocks on routing; the channel is bounded in practice by the
//! number of messages in flight.

use crate::config::Config;
use crate::message::Message;
use crate::pipeline::metrics::ForwarderMetrics;
use crate::pipeline::retry::{self, RetryVerdict, Scheduled};
use crate::report::{self, Report};
use crate::stages::Completion;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

pub(crate) struct Router {
    pub(crate) completions: mpsc::UnboundedReceiver<Completion>,
    pub(crate) stage_inbounds: Vec<mpsc::Sender<Message>>,
    pub(crate) stage_names: Vec<String>,
    pub(crate) schedule: mpsc::UnboundedSender<Scheduled>,
    pub(crate) reports: mpsc::Sender<Report>,
    pub(crate) config: Config,
    pub(crate) in_flight: Arc<AtomicU64>,
    pub(crate) metrics: Arc<ForwarderMetrics>,
}

impl Router {
    /// Runs until every worker has dropped its completion sender.
    pub(crate) async fn run(mut self) {
        while let Some(completion) = self.completions.recv().await {
            match completion {
                Completion::Resolved { message, code, status } => {
                    self.route(message, code, status).await;
                }
                Completion::Abandoned { sequence, opaque } => {
                    warn!(seq = sequence, "message abandoned by its stage");
                    self.metrics.record_failed();
                    let report = Report {
                        opaque,
                        code: report::code::ABANDONED,
                        status: "completion dropped by stage".into(),
                    };
                    self.emit(report).await;
                }
            }
        }
        debug!("completion channel closed; router exiting");
    }

    async fn route(&self, mut message: Message, code: i32, status: String) {
        if code == report::code::SUCCESS {
            let next = message.stage_index() + 1;
            if next == self.stage_inbounds.len() {
                trace!(seq = message.sequence(), "message delivered");
                self.metrics.record_delivered();
                self.emit(Report { opaque: message.into_opaque(), code, status }).await;
            } else {
                message.advance(self.config.retries);
                self.forward(message).await;
            }
            return;
        }

        let stage = self.stage_name(message.stage_index()).to_owned();
        match retry::next_retry(&mut message, &self.config) {
            RetryVerdict::Backoff { attempt, delay } => {
                debug!(
                    seq = message.sequence(),
                    stage = %stage,
                    code,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                self.metrics.record_retried();
                let entry = Scheduled::new(Instant::now() + delay, message);
                if self.schedule.send(entry).is_err() {
                    // Only reachable while shutdown is tearing tasks down.
                    warn!("retry scheduler is gone; dropping message");
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
            RetryVerdict::Exhausted => {
                warn!(seq = message.sequence(), stage = %stage, code, "retries exhausted");
                self.metrics.record_failed();
                self.emit(Report { opaque: message.into_opaque(), code, status }).await;
            }
        }
    }

    async fn forward(&self, message: Message) {
        let index = message.stage_index();
        match self.stage_inbounds.get(index) {
            Some(inbound) => {
                if inbound.send(message).await.is_err() {
                    debug!("stage inbound closed; dropping message");
                }
            }
            None => warn!(stage = index, "no such stage; dropping message"),
        }
    }

    /// Emits the terminal report and retires the message from the
    /// in-flight gauge, in that order, so a drain that observes zero
    /// knows its reports are already in the channel.
    async fn emit(&self, report: Report) {
        if self.reports.send(report).await.is_err() {
            debug!("report stream dropped; discarding report");
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn stage_name(&self, index: usize) -> &str {
        self.stage_names.get(index).map_or("?", String::as_str)
    }
}
