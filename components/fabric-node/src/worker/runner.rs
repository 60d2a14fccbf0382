//! Worker (C1): an independent, single-threaded OS process that owns one
//! strategy instance and speaks the router's multipart protocol over a
//! blocking ZeroMQ `DEALER` socket. No async runtime here - matching the
//! design's "independent OS process, single-threaded, blocking I/O."

use crate::fabric::strategy::{self, Strategy};
use crate::fabric::task::sentinel;
use crate::helpers::load_config::TopicConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_TIMEOUT_MS: i64 = 5_000;

/// Runs the worker loop to completion (only returns on shutdown signal or
/// unrecoverable bus error). Intended to be the entire body of the `work`
/// CLI subcommand.
pub fn run(config: TopicConfig) -> anyhow::Result<()> {
    tracing::info!(
        topic = %config.target_topic,
        strategy = %config.strategy_name,
        "Worker process starting"
    );

    let mut strategy = strategy::construct(&config.strategy_name, &config.options)
        .map_err(|e| anyhow::anyhow!("failed to construct strategy: {e}"))?;

    let address = worker_connect_address(&config);
    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::DEALER)?;
    socket.connect(&address)?;
    tracing::info!(address = %address, "Worker connected to router bus endpoint");

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&shutdown))?;

    send_handshake(&socket)?;

    let mut tasks_processed: u64 = 0;
    while !shutdown.load(Ordering::Relaxed) {
        let poll_result = socket.poll(zmq::POLLIN, POLL_TIMEOUT_MS)?;
        if poll_result == 0 {
            continue;
        }

        let parts = socket.recv_multipart(0)?;
        if parts.len() != 3 {
            tracing::warn!(parts = parts.len(), "Dropping malformed task frame from router");
            continue;
        }
        let (client_id, task_type, payload) = (&parts[0], &parts[1], &parts[2]);

        let start = Instant::now();
        let reply_payload = match strategy.process(task_type, payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Strategy reported an error processing task");
                sentinel(e.to_string())
            }
        };
        let elapsed = start.elapsed();

        send_response(&socket, client_id, &reply_payload)?;
        send_handshake(&socket)?;

        tasks_processed += 1;
        tracing::debug!(
            tasks_processed,
            last_task_duration_ms = elapsed.as_millis() as u64,
            "Worker completed task"
        );
    }

    tracing::info!(tasks_processed, "Worker received shutdown signal, exiting");
    socket.set_linger(0).ok();
    Ok(())
}

fn worker_connect_address(config: &TopicConfig) -> String {
    match &config.zmq_tcp_address {
        Some(addr) => addr.replace("*", "localhost"),
        None => format!("ipc:///tmp/router2worker_{}.ipc", config.target_topic),
    }
}

fn send_handshake(socket: &zmq::Socket) -> anyhow::Result<()> {
    socket.send_multipart([b"HANDSHAKE".as_slice()], 0)?;
    Ok(())
}

/// Sends `(signal, client_id, payload)` as a single atomic multipart frame.
/// Neither side of this link uses the empty delimiter frame a `REQ`/`ROUTER`
/// pair would need; the router's `ROUTER` socket reads the leading frame as
/// the worker's identity directly, so adding one here would misalign every
/// field that follows.
fn send_response(socket: &zmq::Socket, client_id: &[u8], payload: &[u8]) -> anyhow::Result<()> {
    socket.send_multipart([b"RESPONSE".as_slice(), client_id, payload], 0)?;
    Ok(())
}

fn install_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    for sig in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        signal_hook::flag::register(sig, Arc::clone(&shutdown))?;
    }
    Ok(())
}

#[allow(dead_code)]
fn reserved_task_timeout(config: &TopicConfig) -> Option<Duration> {
    // task_timeout_secs is parsed and validated but intentionally not
    // enforced anywhere in the poll loop above (see DESIGN.md).
    config.task_timeout_secs.map(Duration::from_secs)
}
