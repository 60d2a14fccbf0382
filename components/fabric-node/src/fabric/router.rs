//! Per-topic router (C2): matches queued tasks to idle workers of that
//! topic, one task per idle worker, FIFO on both sides.

use crate::errors::FabricError;
use crate::fabric::bus::{OutboundFrame, WorkerBus, WorkerFrame};
use crate::fabric::task::{Reply, Task, WorkerId};
use crate::metrics::metrics::{TOPIC_IDLE_WORKERS, TOPIC_QUEUE_DEPTH};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// One router per topic, run as its own Tokio task. Owns the topic's queue
/// receiver, its idle-worker roster, and the bridging channels to the
/// dedicated bus thread - no lock needed, since a single task owns both the
/// roster and the queue.
pub struct Router {
    topic: String,
    queue_rx: mpsc::UnboundedReceiver<Task>,
    bus: WorkerBus,
    bus_inbound_rx: mpsc::UnboundedReceiver<WorkerFrame>,
    outbound_tx: mpsc::UnboundedSender<Reply>,
    idle: VecDeque<WorkerId>,
}

impl Router {
    pub fn new(
        topic: String,
        address: String,
        queue_rx: mpsc::UnboundedReceiver<Task>,
        outbound_tx: mpsc::UnboundedSender<Reply>,
    ) -> Result<Self, FabricError> {
        let (bus_inbound_tx, bus_inbound_rx) = mpsc::unbounded_channel();
        let bus = WorkerBus::bind(topic.clone(), address, bus_inbound_tx)?;
        Ok(Self {
            topic,
            queue_rx,
            bus,
            bus_inbound_rx,
            outbound_tx,
            idle: VecDeque::new(),
        })
    }

    #[instrument(name = "router::run", target = "fabric::router", skip_all, fields(topic = %self.topic), level = "debug")]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), FabricError> {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut pending: Option<Task> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(topic = %self.topic, "Router loop received cancellation, shutting down");
                    self.bus.shutdown();
                    return Ok(());
                }

                Some(task) = self.queue_rx.recv(), if pending.is_none() => {
                    pending = Some(task);
                }

                Some(frame) = self.bus_inbound_rx.recv() => {
                    self.handle_worker_frame(frame);
                }

                _ = heartbeat.tick() => {
                    TOPIC_IDLE_WORKERS.with_label_values(&[&self.topic]).set(self.idle.len() as f64);
                    TOPIC_QUEUE_DEPTH.with_label_values(&[&self.topic]).set(self.queue_rx.len() as f64);
                    tracing::info!(
                        topic = %self.topic,
                        idle_workers = self.idle.len(),
                        "Router heartbeat"
                    );
                }
            }

            // Dispatch rule: queue non-empty (`pending` holds the head of
            // the queue) AND idle roster non-empty.
            if pending.is_some() && !self.idle.is_empty() {
                let task = pending.take().expect("checked Some above");
                let worker_id = self.idle.pop_front().expect("checked non-empty above");
                let outbound = OutboundFrame {
                    worker_id,
                    client_id: task.client_id,
                    task_type: task.task_type,
                    payload: task.payload,
                };
                if let Err(e) = self.bus.send(outbound) {
                    tracing::error!(topic = %self.topic, error = %e, "Failed to dispatch task to worker");
                }
            }
        }
    }

    fn handle_worker_frame(&mut self, frame: WorkerFrame) {
        match frame {
            WorkerFrame::Handshake { worker_id } => {
                self.idle.push_back(worker_id);
            }
            WorkerFrame::Response { client_id, payload, .. } => {
                let reply = Reply { client_id, payload };
                if self.outbound_tx.send(reply).is_err() {
                    tracing::error!(topic = %self.topic, "Broker outbound channel closed while forwarding reply");
                }
            }
        }
    }
}
