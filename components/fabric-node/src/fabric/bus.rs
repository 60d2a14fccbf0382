//! The one link in the fabric that crosses a process boundary: a ZeroMQ
//! `ROUTER` socket facing a topic's worker processes (each a `DEALER`).
//!
//! The socket itself is blocking, so it is owned by a dedicated OS thread -
//! isolating blocking/external I/O behind a channel-fronted background
//! thread, keeping the async router task on the other side touching only
//! Tokio channels.

use crate::errors::BusError;
use crate::fabric::task::{ClientId, WorkerId};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

const POLL_TIMEOUT_MS: i64 = 200;

/// A frame received from a worker, already split into its two shapes: a bare
/// handshake (`[worker_id] ["HANDSHAKE"]`) announcing the worker is idle, or
/// a completed response (`[worker_id] ["RESPONSE"] [client_id] [payload]`).
#[derive(Debug)]
pub enum WorkerFrame {
    Handshake { worker_id: WorkerId },
    Response {
        worker_id: WorkerId,
        client_id: ClientId,
        payload: Vec<u8>,
    },
}

/// A task handed to a specific worker, addressed by its bus identity.
#[derive(Debug)]
pub struct OutboundFrame {
    pub worker_id: WorkerId,
    pub client_id: ClientId,
    pub task_type: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Handle to the background bus thread. Dropping this does not join the
/// thread; call [`WorkerBus::shutdown`] for an orderly stop.
pub struct WorkerBus {
    outbound_tx: crossbeam_channel::Sender<OutboundFrame>,
    thread: Option<JoinHandle<Result<(), BusError>>>,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl WorkerBus {
    /// Binds a ROUTER socket at `address` and starts its polling thread.
    /// Inbound worker frames are pushed onto `inbound_tx` as they arrive.
    pub fn bind(
        topic: String,
        address: String,
        inbound_tx: mpsc::UnboundedSender<WorkerFrame>,
    ) -> Result<Self, BusError> {
        let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded::<OutboundFrame>();
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_clone = stop.clone();

        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::ROUTER)?;
        socket.bind(&address)?;
        tracing::info!(topic = %topic, address = %address, "Router bound worker-facing bus endpoint");

        let thread = std::thread::Builder::new()
            .name(format!("fabric-bus-{topic}"))
            .spawn(move || run_bus_thread(socket, outbound_rx, inbound_tx, stop_clone))
            .expect("failed to spawn worker-bus thread");

        Ok(Self {
            outbound_tx,
            thread: Some(thread),
            stop,
        })
    }

    pub fn send(&self, frame: OutboundFrame) -> Result<(), BusError> {
        self.outbound_tx
            .send(frame)
            .map_err(|_| BusError::ChannelClosed)
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run_bus_thread(
    socket: zmq::Socket,
    outbound_rx: crossbeam_channel::Receiver<OutboundFrame>,
    inbound_tx: mpsc::UnboundedSender<WorkerFrame>,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> Result<(), BusError> {
    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
        while let Ok(frame) = outbound_rx.try_recv() {
            let parts: [&[u8]; 4] = [
                &frame.worker_id,
                &frame.client_id.to_be_bytes(),
                &frame.task_type,
                &frame.payload,
            ];
            if let Err(e) = socket.send_multipart(parts, 0) {
                tracing::error!(error = %e, "Failed to send frame to worker over bus");
            }
        }

        let poll_result = socket.poll(zmq::POLLIN, POLL_TIMEOUT_MS)?;
        if poll_result == 0 {
            continue;
        }

        let parts = socket.recv_multipart(0)?;
        match parse_worker_frame(parts) {
            Ok(frame) => {
                if inbound_tx.send(frame).is_err() {
                    return Err(BusError::ChannelClosed);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Dropping malformed worker frame"),
        }
    }
    Ok(())
}

fn parse_worker_frame(parts: Vec<Vec<u8>>) -> Result<WorkerFrame, BusError> {
    if parts.len() < 2 {
        return Err(BusError::MalformedFrame {
            expected: 2,
            got: parts.len(),
        });
    }
    let worker_id = parts[0].clone();
    match parts[1].as_slice() {
        b"HANDSHAKE" => Ok(WorkerFrame::Handshake { worker_id }),
        b"RESPONSE" => {
            if parts.len() != 4 {
                return Err(BusError::MalformedFrame {
                    expected: 4,
                    got: parts.len(),
                });
            }
            let client_id = u64::from_be_bytes(parts[2].as_slice().try_into().map_err(|_| {
                BusError::MalformedFrame {
                    expected: 8,
                    got: parts[2].len(),
                }
            })?);
            Ok(WorkerFrame::Response {
                worker_id,
                client_id,
                payload: parts[3].clone(),
            })
        }
        _ => Err(BusError::MalformedFrame {
            expected: 2,
            got: parts.len(),
        }),
    }
}
