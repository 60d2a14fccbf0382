//! Broker (C3): demultiplexes inbound requests by topic into per-topic
//! queues, and multiplexes replies from routers back to the RPC handler
//! that is waiting on them.

use crate::errors::FabricError;
use crate::fabric::task::{ClientId, InboundFrame, Reply, Task};
use crate::rpc::correlation::CorrelationTable;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Shared handle used by RPC handlers to submit work and by routers to be
/// registered as the per-topic queue destination. Cheap to clone (an `Arc`
/// wrapper around the unbounded senders).
#[derive(Clone)]
pub struct BrokerHandle {
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
}

impl BrokerHandle {
    pub fn submit(&self, frame: InboundFrame) -> Result<(), FabricError> {
        self.inbound_tx
            .send(frame)
            .map_err(|_| FabricError::InboundClosed)
    }
}

/// Owns the broker's two channel surfaces and the routing table shared with
/// every router task's outbound replies.
pub struct Broker {
    inbound_rx: mpsc::UnboundedReceiver<InboundFrame>,
    outbound_rx: mpsc::UnboundedReceiver<Reply>,
    outbound_tx: mpsc::UnboundedSender<Reply>,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Task>>>,
    correlation: Arc<CorrelationTable>,
}

impl Broker {
    pub fn new(correlation: Arc<CorrelationTable>) -> (Self, BrokerHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let broker = Self {
            inbound_rx,
            outbound_rx,
            outbound_tx,
            queues: Mutex::new(HashMap::new()),
            correlation,
        };
        (broker, BrokerHandle { inbound_tx })
    }

    /// Registers a topic's queue sender, owned by that topic's router. Must
    /// be called before the server starts admitting RPC traffic for the
    /// topic.
    pub fn register_topic(&self, topic: String, queue_tx: mpsc::UnboundedSender<Task>) {
        self.queues.lock().insert(topic, queue_tx);
    }

    /// The sender routers push completed replies onto.
    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<Reply> {
        self.outbound_tx.clone()
    }

    /// Drives the broker's cooperative loop until cancelled. A returned
    /// `Err` is a fatal fabric fault (see the design notes' fail-stop
    /// policy) - the caller is expected to end the server process.
    #[instrument(name = "broker::run", target = "fabric::broker", skip_all, level = "debug")]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), FabricError> {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Broker loop received cancellation, shutting down");
                    return Ok(());
                }
                maybe_frame = self.inbound_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => self.handle_inbound(frame),
                        None => return Err(FabricError::InboundClosed),
                    }
                }
                maybe_reply = self.outbound_rx.recv() => {
                    match maybe_reply {
                        Some(reply) => self.handle_outbound(reply),
                        None => return Err(FabricError::OutboundClosed),
                    }
                }
                _ = heartbeat.tick() => {
                    tracing::debug!(topics = self.queues.lock().len(), "Broker heartbeat");
                }
            }
        }
    }

    fn handle_inbound(&self, frame: InboundFrame) {
        let queue_tx = self.queues.lock().get(&frame.topic).cloned();
        match queue_tx {
            Some(tx) => {
                let task = Task {
                    client_id: frame.client_id,
                    task_type: frame.task_type,
                    payload: frame.payload,
                };
                if tx.send(task).is_err() {
                    tracing::error!(topic = %frame.topic, "Topic queue receiver dropped, router gone");
                }
            }
            None => {
                let reason = format!("{} is not a valid topic", frame.topic);
                self.reply_immediately(frame.client_id, crate::fabric::task::sentinel(reason));
            }
        }
    }

    fn handle_outbound(&self, reply: Reply) {
        self.reply_immediately(reply.client_id, reply.payload);
    }

    fn reply_immediately(&self, client_id: ClientId, payload: Vec<u8>) {
        if !self.correlation.complete(client_id, payload) {
            tracing::debug!(client_id, "Reply arrived for a cancelled or unknown call, dropping");
        }
    }
}
