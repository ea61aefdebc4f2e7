//! The forwarder facade: assemble a pipeline, inject messages, collect
//! reports.

use crate::config::Config;
use crate::errors::{ConfigError, ProduceError};
use crate::message::{Message, Options};
use crate::pipeline::{
    spawn_pool, ForwarderMetrics, MetricsSnapshot, RetryScheduler, Router, Scheduled,
};
use crate::report::ReportStream;
use crate::stages::{Completion, Stage};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// How often the drain loop re-checks the in-flight gauge.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Assembles a pipeline out of ordered stages.
///
/// Stages process messages in the order they are pushed. [`run`](Self::run)
/// consumes the builder, so a pipeline starts exactly once.
#[derive(Debug)]
pub struct ForwarderBuilder {
    config: Config,
    stages: Vec<Box<dyn Stage>>,
}

impl ForwarderBuilder {
    /// Creates a builder with the given engine config.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stages: Vec::new(),
        }
    }

    /// Appends a stage to the end of the pipeline.
    #[must_use]
    pub fn stage(self, stage: impl Stage + 'static) -> Self {
        self.boxed_stage(Box::new(stage))
    }

    /// Appends an already boxed stage.
    #[must_use]
    pub fn boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Starts the engine and hands back the producer facade and the
    /// report stream.
    ///
    /// Spawns the worker pools, the router and the retry scheduler on
    /// the current tokio runtime, so it must be called from within one.
    pub fn run(self) -> Result<(Forwarder, ReportStream), ConfigError> {
        self.config.validate()?;
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }
        for stage in &self.stages {
            if stage.workers() == 0 {
                return Err(ConfigError::ZeroWorkers { stage: stage.name().to_owned() });
            }
        }

        let queue_size = self.config.queue_size;
        let mut inbound_txs = Vec::with_capacity(self.stages.len());
        let mut inbound_rxs = Vec::with_capacity(self.stages.len());
        for _ in &self.stages {
            let (tx, rx) = mpsc::channel(queue_size);
            inbound_txs.push(tx);
            inbound_rxs.push(rx);
        }
        let (completion_tx, completion_rx) = mpsc::unbounded_channel::<Completion>();
        let (schedule_tx, schedule_rx) = mpsc::unbounded_channel::<Scheduled>();
        let (report_tx, report_rx) = mpsc::channel(queue_size);

        let in_flight = Arc::new(AtomicU64::new(0));
        let metrics = Arc::new(ForwarderMetrics::default());
        let stage_names: Vec<String> =
            self.stages.iter().map(|stage| stage.name().to_owned()).collect();
        let intake = inbound_txs[0].clone();

        let mut tasks = Vec::new();
        for (index, (stage, inbound)) in self.stages.iter().zip(inbound_rxs).enumerate() {
            tasks.extend(spawn_pool(index, stage.as_ref(), inbound, completion_tx.clone()));
        }

        let router = Router {
            completions: completion_rx,
            stage_inbounds: inbound_txs.clone(),
            stage_names: stage_names.clone(),
            schedule: schedule_tx,
            reports: report_tx,
            config: self.config.clone(),
            in_flight: Arc::clone(&in_flight),
            metrics: Arc::clone(&metrics),
        };
        tasks.push(tokio::spawn(router.run()));

        let scheduler = RetryScheduler::new(schedule_rx, inbound_txs);
        tasks.push(tokio::spawn(scheduler.run()));

        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            stages = stage_names.len(),
            queue_size,
            retries = self.config.retries,
            "forwarder running"
        );

        let forwarder = Forwarder {
            intake,
            config: self.config,
            run_id,
            stage_names,
            sequence: AtomicU64::new(0),
            in_flight,
            shutting_down: AtomicBool::new(false),
            metrics,
            tasks: Mutex::new(tasks),
        };
        Ok((forwarder, ReportStream::new(report_rx)))
    }
}

impl Default for ForwarderBuilder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// The producer-facing handle of a running pipeline.
///
/// Injection is decoupled from outcomes: `produce` returns as soon as
/// the intake queue accepts the message, and the terminal outcome
/// arrives later on the [`ReportStream`].
#[derive(Debug)]
pub struct Forwarder {
    intake: mpsc::Sender<Message>,
    config: Config,
    run_id: Uuid,
    stage_names: Vec<String>,
    sequence: AtomicU64,
    in_flight: Arc<AtomicU64>,
    shutting_down: AtomicBool,
    metrics: Arc<ForwarderMetrics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Forwarder {
    /// Shorthand for [`ForwarderBuilder::new`].
    #[must_use]
    pub fn builder(config: Config) -> ForwarderBuilder {
        ForwarderBuilder::new(config)
    }

    /// Injects a message, waiting while the intake queue is full.
    ///
    /// The backpressure wait can outlast a concurrently requested
    /// shutdown; messages accepted during the wait still drain.
    pub async fn produce(
        &self,
        payload: impl Into<Vec<u8>>,
        options: Options,
        opaque: Value,
    ) -> Result<(), ProduceError> {
        let message = self.next_message(payload.into(), options, opaque);
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ProduceError::ShutdownInProgress(Box::new(message)));
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.intake.send(message).await {
            Ok(()) => {
                self.metrics.record_produced();
                Ok(())
            }
            Err(SendError(message)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(ProduceError::ShutdownInProgress(Box::new(message)))
            }
        }
    }

    /// Injects a message without waiting; a full intake queue is
    /// reported as [`ProduceError::QueueFull`] with the message
    /// handed back.
    pub fn try_produce(
        &self,
        payload: impl Into<Vec<u8>>,
        options: Options,
        opaque: Value,
    ) -> Result<(), ProduceError> {
        let message = self.next_message(payload.into(), options, opaque);
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ProduceError::ShutdownInProgress(Box::new(message)));
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.intake.try_send(message) {
            Ok(()) => {
                self.metrics.record_produced();
                Ok(())
            }
            Err(TrySendError::Full(message)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.metrics.record_rejected();
                Err(ProduceError::QueueFull(Box::new(message)))
            }
            Err(TrySendError::Closed(message)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(ProduceError::ShutdownInProgress(Box::new(message)))
            }
        }
    }

    /// Stops the engine: refuses new messages, waits up to `grace` for
    /// in-flight messages to reach a terminal outcome, then tears the
    /// tasks down.
    ///
    /// Returns `true` when everything drained within the grace period.
    /// Messages still in flight after it are terminated without a
    /// report. The report stream ends once its buffered reports are
    /// consumed.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return self.in_flight() == 0;
        }
        info!(
            run_id = %self.run_id,
            in_flight = self.in_flight(),
            "shutdown requested; draining"
        );

        let deadline = tokio::time::Instant::now() + grace;
        while self.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let drained = self.in_flight() == 0;
        if !drained {
            warn!(
                run_id = %self.run_id,
                remaining = self.in_flight(),
                "grace period elapsed; force-terminating"
            );
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in &tasks {
            handle.abort();
        }
        for handle in tasks {
            let _ = handle.await;
        }

        info!(run_id = %self.run_id, drained, "forwarder stopped");
        drained
    }

    /// Messages accepted but not yet resolved into a report.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether a shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// A copy of the run counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The engine config this pipeline runs with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The unique id of this run, also attached to engine logs.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stage names in pipeline order.
    #[must_use]
    pub fn stages(&self) -> &[String] {
        &self.stage_names
    }

    fn next_message(&self, payload: Vec<u8>, options: Options, opaque: Value) -> Message {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut message = Message::new(sequence, payload, options, opaque);
        message.reset_retries(self.config.retries);
        message
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{Done, FnStage, Passthrough, StageWorker};
    use async_trait::async_trait;
    use serde_json::json;

    /// Takes one message and never resolves it, pinning a worker.
    #[derive(Debug)]
    struct StuckStage;

    impl Stage for StuckStage {
        fn name(&self) -> &str {
            "stuck"
        }

        fn spawn(&self, _worker_id: usize) -> Box<dyn StageWorker> {
            Box::new(StuckWorker)
        }
    }

    struct StuckWorker;

    #[async_trait]
    impl StageWorker for StuckWorker {
        async fn process(&mut self, _message: Message, done: Done) {
            let _held = done;
            std::future::pending::<()>().await;
        }
    }

    fn passthrough_pipeline(config: Config) -> (Forwarder, crate::report::ReportStream) {
        Forwarder::builder(config)
            .stage(Passthrough::new())
            .run()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_rejects_empty_pipeline() {
        let err = ForwarderBuilder::new(Config::default()).run().err().unwrap();
        assert_eq!(err, ConfigError::EmptyPipeline);
    }

    #[tokio::test]
    async fn test_run_rejects_zero_queue() {
        let err = ForwarderBuilder::new(Config::new().with_queue_size(0))
            .stage(Passthrough::new())
            .run()
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::ZeroQueueSize);
    }

    #[tokio::test]
    async fn test_run_rejects_zero_workers() {
        let stage = FnStage::new("hollow", |msg: Message, done: Done| {
            done.resolve(msg, 0, "");
        })
        .with_workers(0);
        let err = ForwarderBuilder::new(Config::default()).stage(stage).run().err().unwrap();
        assert_eq!(err, ConfigError::ZeroWorkers { stage: "hollow".into() });
    }

    #[tokio::test]
    async fn test_produce_and_collect_report() {
        let (forwarder, mut reports) = passthrough_pipeline(Config::default());

        forwarder.produce(b"hello".to_vec(), Options::new(), json!("tag")).await.unwrap();
        let report = reports.recv().await.unwrap();
        assert_eq!(report.opaque, json!("tag"));
        assert!(report.is_success());

        let metrics = forwarder.metrics();
        assert_eq!(metrics.produced, 1);
        assert_eq!(metrics.delivered, 1);
        assert_eq!(forwarder.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_try_produce_reports_full_queue() {
        // One queue slot and a worker that never resolves. The worker
        // is never polled before the first await in this test, so the
        // slot is still taken.
        let (forwarder, _reports) = ForwarderBuilder::new(Config::new().with_queue_size(1))
            .stage(StuckStage)
            .run()
            .unwrap();

        forwarder.try_produce(b"first".to_vec(), Options::new(), json!(0)).unwrap();
        let err = forwarder.try_produce(b"second".to_vec(), Options::new(), json!(1)).err().unwrap();

        assert!(err.is_full());
        let recovered = err.into_message();
        assert_eq!(recovered.payload(), b"second");
        assert_eq!(recovered.opaque(), &json!(1));

        let metrics = forwarder.metrics();
        assert_eq!(metrics.produced, 1);
        assert_eq!(metrics.rejected, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_idle_engine() {
        let (forwarder, mut reports) = passthrough_pipeline(Config::default());

        forwarder.produce(b"x".to_vec(), Options::new(), json!(0)).await.unwrap();
        assert_eq!(reports.recv().await.unwrap().code, 0);

        assert!(forwarder.shutdown(Duration::from_secs(1)).await);
        assert!(forwarder.is_shutting_down());
        assert_eq!(reports.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_force_terminates_after_grace() {
        let (forwarder, mut reports) = ForwarderBuilder::new(Config::default())
            .stage(StuckStage)
            .run()
            .unwrap();

        forwarder.produce(b"x".to_vec(), Options::new(), json!(0)).await.unwrap();
        tokio::task::yield_now().await;

        let drained = forwarder.shutdown(Duration::from_millis(100)).await;
        assert!(!drained);
        // The stuck message is terminated without a report.
        assert_eq!(reports.recv().await, None);
    }

    #[tokio::test]
    async fn test_produce_after_shutdown_is_rejected() {
        let (forwarder, _reports) = passthrough_pipeline(Config::default());
        assert!(forwarder.shutdown(Duration::ZERO).await);

        let err = forwarder
            .produce(b"late".to_vec(), Options::new(), json!(9))
            .await
            .err()
            .unwrap();
        assert!(!err.is_full());
        assert_eq!(err.message().payload(), b"late");

        let err = forwarder.try_produce(b"later".to_vec(), Options::new(), json!(10)).err().unwrap();
        assert!(matches!(err, ProduceError::ShutdownInProgress(_)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (forwarder, _reports) = passthrough_pipeline(Config::default());
        assert!(forwarder.shutdown(Duration::ZERO).await);
        assert!(forwarder.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_introspection_surface() {
        let config = Config::new().with_retries(7);
        let (forwarder, _reports) = ForwarderBuilder::new(config)
            .stage(Passthrough::new())
            .stage(Passthrough::new())
            .run()
            .unwrap();

        assert_eq!(forwarder.stages(), ["passthrough", "passthrough"]);
        assert_eq!(forwarder.config().retries, 7);
        assert!(!forwarder.run_id().is_nil());
    }
}
