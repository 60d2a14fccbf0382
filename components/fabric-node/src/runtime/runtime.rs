//! Server-process assembly: wires the broker, one router per configured
//! topic, and the RPC servicer onto a single Tokio runtime, then drives them
//! to completion under a shared cancellation token and shutdown broadcaster.

use crate::fabric::broker::Broker;
use crate::fabric::router::Router;
use crate::helpers::load_config::{Config, TopicConfig};
use crate::helpers::shutdown::Shutdown;
use crate::metrics::http::start_metrics_server;
use crate::proto::fabric::embedding_gateway_server::EmbeddingGatewayServer;
use crate::rpc::correlation::CorrelationTable;
use crate::rpc::servicer::FabricService;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::instrument;

/// Runs the fabric server to completion. Intended to be the entire body of
/// the `serve` CLI subcommand.
#[instrument(name = "runtime::run_server", target = "runtime::runtime", skip_all)]
pub async fn run_server(cfg: Config) -> Result<()> {
    tracing::info!("Starting fabric-node server");
    let cold_start = Instant::now();

    let shutdown = Shutdown::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        signal::ctrl_c()
            .await
            .expect("failed to listen for CTRL+C shutdown signal");
        tracing::info!("CTRL+C received, broadcasting shutdown to server components");
        shutdown_signal.trigger();
    });

    let cancel = CancellationToken::new();

    tokio::spawn({
        let metrics_addr = cfg.metrics_bind_address.clone();
        let mut shutdown_rx = shutdown.subscribe();
        async move {
            tokio::select! {
                res = start_metrics_server(&metrics_addr) => {
                    if let Err(e) = res {
                        tracing::error!(error = %e, "Metrics server exited with an error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Metrics server gracefully shutting down");
                }
            }
        }
    });

    let correlation = CorrelationTable::new();
    let (broker, broker_handle) = Broker::new(Arc::clone(&correlation));

    let mut router_handles = Vec::new();
    for topic in &cfg.embedder_model_configs {
        let (queue_tx, queue_rx) = tokio::sync::mpsc::unbounded_channel();
        broker.register_topic(topic.target_topic.clone(), queue_tx);

        let address = router_bind_address(topic);
        let router = Router::new(
            topic.target_topic.clone(),
            address,
            queue_rx,
            broker.outbound_sender(),
        )?;

        let router_cancel = cancel.clone();
        let topic_name = topic.target_topic.clone();
        router_handles.push(tokio::spawn(async move {
            if let Err(e) = router.run(router_cancel).await {
                tracing::error!(topic = %topic_name, error = %e, "Router exited with a fatal fabric error");
            }
        }));
    }

    let broker_cancel = cancel.clone();
    let broker_handle_task = tokio::spawn(async move {
        if let Err(e) = broker.run(broker_cancel).await {
            tracing::error!(error = %e, "Broker exited with a fatal fabric error");
        }
    });

    let service = FabricService::new(cfg.max_concurrent_requests, broker_handle, correlation);

    let addr = cfg.grpc_server_address.parse()?;
    let mut grpc_shutdown_rx = shutdown.subscribe();
    let grpc_cancel = cancel.clone();
    tracing::info!(server_addr = %addr, "Starting fabric-node gRPC server");

    let grpc_result = Server::builder()
        .add_service(EmbeddingGatewayServer::new(service))
        .serve_with_shutdown(addr, async move {
            grpc_shutdown_rx.recv().await.ok();
            grpc_cancel.cancel();
            tracing::info!("gRPC server received shutdown signal");
        })
        .await;

    cancel.cancel();
    shutdown.trigger();

    let _ = broker_handle_task.await;
    for handle in router_handles {
        let _ = handle.await;
    }

    grpc_result?;

    tracing::info!(
        startup_seconds = cold_start.elapsed().as_secs_f64(),
        "fabric-node server graceful shutdown complete"
    );
    Ok(())
}

fn router_bind_address(topic: &TopicConfig) -> String {
    match &topic.zmq_tcp_address {
        Some(addr) => addr.clone(),
        None => format!("ipc:///tmp/router2worker_{}.ipc", topic.target_topic),
    }
}
