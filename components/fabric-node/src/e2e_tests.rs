//! End-to-end tests driving the broker+router fabric directly against
//! in-process stub workers, bypassing both the gRPC transport and real OS
//! process spawning (see DESIGN.md's injectable-transport-seam note).

use crate::fabric::broker::Broker;
use crate::fabric::router::Router;
use crate::fabric::task::{decode_reply, InboundFrame};
use crate::rpc::correlation::CorrelationTable;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Disambiguates ipc socket paths across tests sharing a process, since the
/// pid alone repeats for every test in this binary.
static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_ipc_address(label: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ipc:///tmp/fabric-node-e2e-{label}-{}-{id}.ipc", std::process::id())
}

/// Spawns a blocking ZMQ DEALER thread that answers every task with
/// `behavior(task_type, payload)`, mirroring the real worker's HANDSHAKE/
/// RESPONSE protocol without going through `worker::runner`.
fn spawn_stub_worker(
    address: String,
    behavior: impl Fn(&[u8], &[u8]) -> Vec<u8> + Send + 'static,
) -> (Arc<AtomicBool>, std::thread::JoinHandle<()>) {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);

    let handle = std::thread::spawn(move || {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::DEALER).expect("failed to create DEALER socket");
        socket.connect(&address).expect("failed to connect stub worker");
        socket
            .send_multipart([b"HANDSHAKE".as_slice()], 0)
            .expect("failed to send initial handshake");

        while !stop_clone.load(Ordering::Relaxed) {
            let poll_result = socket.poll(zmq::POLLIN, 200).expect("poll failed");
            if poll_result == 0 {
                continue;
            }
            let parts = socket.recv_multipart(0).expect("recv failed");
            let (client_id, task_type, payload) = (&parts[0], &parts[1], &parts[2]);
            let reply = behavior(task_type, payload);
            socket
                .send_multipart([b"RESPONSE".as_slice(), client_id, &reply], 0)
                .expect("send response failed");
            socket
                .send_multipart([b"HANDSHAKE".as_slice()], 0)
                .expect("send handshake failed");
        }
    });

    (stop, handle)
}

/// Wires up a broker and a single topic's router, bound to a unique ipc
/// address so concurrent test runs don't collide.
async fn build_single_topic_fabric(
    topic: &str,
) -> (
    Broker,
    crate::fabric::broker::BrokerHandle,
    Arc<CorrelationTable>,
    String,
) {
    let correlation = CorrelationTable::new();
    let (broker, broker_handle) = Broker::new(Arc::clone(&correlation));
    let address = unique_ipc_address(topic);
    (broker, broker_handle, correlation, address)
}

async fn submit_and_await(
    broker_handle: &crate::fabric::broker::BrokerHandle,
    correlation: &Arc<CorrelationTable>,
    topic: &str,
    task_type: &[u8],
    payload: Vec<u8>,
) -> Result<Vec<u8>, String> {
    let (guard, rx) = correlation.register();
    let frame = InboundFrame {
        client_id: guard.client_id(),
        topic: topic.to_string(),
        task_type: task_type.to_vec(),
        payload,
    };
    broker_handle.submit(frame).expect("failed to submit to broker");
    let reply = rx.await.expect("broker dropped the reply channel");
    decode_reply(&reply).map(|p| p.to_vec())
}

#[tokio::test]
async fn s1_single_call_echoes_payload() {
    let (broker, broker_handle, correlation, address) = build_single_topic_fabric("t").await;
    let (queue_tx, queue_rx) = tokio::sync::mpsc::unbounded_channel();
    broker.register_topic("t".to_string(), queue_tx);

    let (stop, worker_handle) = spawn_stub_worker(address.clone(), |_task_type, payload| payload.to_vec());

    let cancel = CancellationToken::new();
    let router = Router::new("t".to_string(), address, queue_rx, broker.outbound_sender()).unwrap();
    let router_cancel = cancel.clone();
    let router_task = tokio::spawn(async move { router.run(router_cancel).await });
    let broker_cancel = cancel.clone();
    let broker_task = tokio::spawn(async move { broker.run(broker_cancel).await });

    // Give the stub worker a moment to complete its ZMQ connect + handshake.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let result = submit_and_await(&broker_handle, &correlation, "t", b"TEXT", b"hello".to_vec()).await;
    assert_eq!(result, Ok(b"hello".to_vec()));

    stop.store(true, Ordering::Relaxed);
    cancel.cancel();
    let _ = router_task.await;
    let _ = broker_task.await;
    worker_handle.join().unwrap();
}

#[tokio::test]
async fn s3_unknown_topic_returns_sentinel_with_topic_name() {
    let (broker, broker_handle, correlation, _address) = build_single_topic_fabric("t").await;
    let (_queue_tx, _queue_rx) = tokio::sync::mpsc::unbounded_channel::<crate::fabric::task::Task>();
    // Deliberately do not register topic "t" so it's unknown to the broker.

    let cancel = CancellationToken::new();
    let broker_cancel = cancel.clone();
    let broker_task = tokio::spawn(async move { broker.run(broker_cancel).await });

    let result = submit_and_await(&broker_handle, &correlation, "u", b"TEXT", b"hello".to_vec()).await;
    let err = result.expect_err("expected an unknown-topic sentinel reply");
    assert!(err.contains('u'));
    assert!(err.contains("not a valid topic"));

    cancel.cancel();
    let _ = broker_task.await;
}

#[tokio::test]
async fn s4_worker_error_surfaces_as_sentinel() {
    let (broker, broker_handle, correlation, address) = build_single_topic_fabric("t").await;
    let (queue_tx, queue_rx) = tokio::sync::mpsc::unbounded_channel();
    broker.register_topic("t".to_string(), queue_tx);

    let (stop, worker_handle) = spawn_stub_worker(address.clone(), |_task_type, payload| {
        if payload == b"boom" {
            crate::fabric::task::sentinel("strategy failed to process task: boom")
        } else {
            payload.to_vec()
        }
    });

    let cancel = CancellationToken::new();
    let router = Router::new("t".to_string(), address, queue_rx, broker.outbound_sender()).unwrap();
    let router_cancel = cancel.clone();
    let router_task = tokio::spawn(async move { router.run(router_cancel).await });
    let broker_cancel = cancel.clone();
    let broker_task = tokio::spawn(async move { broker.run(broker_cancel).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let result = submit_and_await(&broker_handle, &correlation, "t", b"TEXT", b"boom".to_vec()).await;
    let err = result.expect_err("expected a worker-error sentinel reply");
    assert!(err.starts_with("strategy failed to process task"));

    stop.store(true, Ordering::Relaxed);
    cancel.cancel();
    let _ = router_task.await;
    let _ = broker_task.await;
    worker_handle.join().unwrap();
}

#[tokio::test]
async fn s6_topic_isolation_keeps_topics_independent() {
    let correlation = CorrelationTable::new();
    let (broker, broker_handle) = Broker::new(Arc::clone(&correlation));

    let (queue_tx_a, queue_rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (queue_tx_b, queue_rx_b) = tokio::sync::mpsc::unbounded_channel();
    broker.register_topic("a".to_string(), queue_tx_a);
    broker.register_topic("b".to_string(), queue_tx_b);

    let address_a = unique_ipc_address("a");
    let address_b = unique_ipc_address("b");

    let (stop_a, worker_a) = spawn_stub_worker(address_a.clone(), |_t, _p| b"from-a".to_vec());
    let (stop_b, worker_b) = spawn_stub_worker(address_b.clone(), |_t, _p| b"from-b".to_vec());

    let cancel = CancellationToken::new();
    let router_a = Router::new("a".to_string(), address_a, queue_rx_a, broker.outbound_sender()).unwrap();
    let router_b = Router::new("b".to_string(), address_b, queue_rx_b, broker.outbound_sender()).unwrap();
    let cancel_a = cancel.clone();
    let cancel_b = cancel.clone();
    let router_a_task = tokio::spawn(async move { router_a.run(cancel_a).await });
    let router_b_task = tokio::spawn(async move { router_b.run(cancel_b).await });
    let broker_cancel = cancel.clone();
    let broker_task = tokio::spawn(async move { broker.run(broker_cancel).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let result_a = submit_and_await(&broker_handle, &correlation, "a", b"TEXT", Vec::new()).await;
    let result_b = submit_and_await(&broker_handle, &correlation, "b", b"TEXT", Vec::new()).await;
    assert_eq!(result_a, Ok(b"from-a".to_vec()));
    assert_eq!(result_b, Ok(b"from-b".to_vec()));

    stop_a.store(true, Ordering::Relaxed);
    stop_b.store(true, Ordering::Relaxed);
    cancel.cancel();
    let _ = router_a_task.await;
    let _ = router_b_task.await;
    let _ = broker_task.await;
    worker_a.join().unwrap();
    worker_b.join().unwrap();
}

#[tokio::test]
async fn fifo_per_topic_processes_queued_tasks_in_order() {
    let (broker, broker_handle, correlation, address) = build_single_topic_fabric("t").await;
    let (queue_tx, queue_rx) = tokio::sync::mpsc::unbounded_channel();
    broker.register_topic("t".to_string(), queue_tx);

    // Single worker, processes one task at a time; record arrival order.
    let order = Arc::new(parking_lot::Mutex::new(Vec::<u8>::new()));
    let order_clone = Arc::clone(&order);
    let (stop, worker_handle) = spawn_stub_worker(address.clone(), move |_task_type, payload| {
        order_clone.lock().push(payload[0]);
        payload.to_vec()
    });

    let cancel = CancellationToken::new();
    let router = Router::new("t".to_string(), address, queue_rx, broker.outbound_sender()).unwrap();
    let router_cancel = cancel.clone();
    let router_task = tokio::spawn(async move { router.run(router_cancel).await });
    let broker_cancel = cancel.clone();
    let broker_task = tokio::spawn(async move { broker.run(broker_cancel).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let first = submit_and_await(&broker_handle, &correlation, "t", b"TEXT", vec![1]);
    let second = submit_and_await(&broker_handle, &correlation, "t", b"TEXT", vec![2]);
    let (r1, r2) = tokio::join!(first, second);
    assert_eq!(r1, Ok(vec![1]));
    assert_eq!(r2, Ok(vec![2]));
    assert_eq!(*order.lock(), vec![1, 2]);

    stop.store(true, Ordering::Relaxed);
    cancel.cancel();
    let _ = router_task.await;
    let _ = broker_task.await;
    worker_handle.join().unwrap();
}
