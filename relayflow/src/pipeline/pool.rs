//! Worker pools that drive stage instances.
//!
//! All workers of a stage pull from one shared inbound queue, so a
//! slow worker never strands messages behind it. A worker owns its
//! stage instance exclusively; stages never synchronize their own
//! per-worker state.

use crate::message::Message;
use crate::stages::{Completion, Done, Stage, StageWorker};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Spawns the worker tasks for one stage.
pub(crate) fn spawn_pool(
    stage_index: usize,
    stage: &dyn Stage,
    inbound: mpsc::Receiver<Message>,
    completions: mpsc::UnboundedSender<Completion>,
) -> Vec<JoinHandle<()>> {
    let inbound = Arc::new(Mutex::new(inbound));
    let mut handles = Vec::with_capacity(stage.workers());
    for worker_id in 0..stage.workers() {
        let instance = stage.spawn(worker_id);
        let worker = Worker {
            stage_index,
            stage_name: stage.name().to_owned(),
            worker_id,
            instance,
            inbound: Arc::clone(&inbound),
            completions: completions.clone(),
        };
        handles.push(tokio::spawn(worker.run()));
    }
    handles
}

struct Worker {
    stage_index: usize,
    stage_name: String,
    worker_id: usize,
    instance: Box<dyn StageWorker>,
    inbound: Arc<Mutex<mpsc::Receiver<Message>>>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Worker {
    async fn run(mut self) {
        debug!(
            stage = %self.stage_name,
            index = self.stage_index,
            worker = self.worker_id,
            "worker started"
        );

        loop {
            let next = async {
                let mut inbound = self.inbound.lock().await;
                inbound.recv().await
            };

            // A worker holding batched work wakes itself for the flush
            // deadline even while the queue is idle.
            let received = match self.instance.next_flush() {
                Some(deadline) => tokio::select! {
                    message = next => message,
                    () = tokio::time::sleep_until(deadline) => {
                        self.instance.flush().await;
                        continue;
                    }
                },
                None => next.await,
            };

            let Some(message) = received else { break };
            trace!(
                stage = %self.stage_name,
                worker = self.worker_id,
                seq = message.sequence(),
                "processing message"
            );
            let done = Done::attach(&message, self.completions.clone());
            self.instance.process(message, done).await;
        }

        debug!(stage = %self.stage_name, worker = self.worker_id, "worker exiting");
    }
}
