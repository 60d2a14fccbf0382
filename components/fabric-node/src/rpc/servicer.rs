//! RPC Servicer (C4): the gRPC-facing half of the fabric. Each of the three
//! unary operations follows the same admit/register/submit/await/decode/
//! release contract; only the task_type tag and the payload codec differ.

use crate::fabric::broker::BrokerHandle;
use crate::fabric::task::{decode_reply, InboundFrame};
use crate::metrics::metrics::{
    observe_duration, ADMISSION_PERMITS_IN_USE, REQUESTS_ADMITTED, REQUESTS_COMPLETED,
    REQUESTS_FAILED, REQUEST_LATENCY_SECONDS,
};
use crate::proto::fabric::embedding_gateway_server::EmbeddingGateway;
use crate::proto::fabric::{
    Embedding, EmbeddingBatch, ScoreList, TextBatchEmbeddingRequest, TextBatchEmbeddingResponse,
    TextEmbeddingRequest, TextEmbeddingResponse, TextRerankRequest, TextRerankResponse,
};
use crate::rpc::correlation::CorrelationTable;
use prost::Message;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tonic::{Request, Response, Status};
use tracing::instrument;

const TASK_TYPE_TEXT: &[u8] = b"TEXT";
const TASK_TYPE_TEXT_BATCH: &[u8] = b"TEXT_BATCH";
const TASK_TYPE_RERANK: &[u8] = b"";

/// Keeps the in-use gauge in step with the admission semaphore: decrements
/// on every exit path out of `dispatch`, including early returns and
/// cancellation.
struct PermitMetricGuard;

impl Drop for PermitMetricGuard {
    fn drop(&mut self) {
        ADMISSION_PERMITS_IN_USE.dec();
    }
}

/// Shared server state reachable from any RPC handler invocation: the
/// admission semaphore, a handle to submit onto the broker's inbound
/// surface, and the reply-routing table the broker completes into.
#[derive(Clone)]
pub struct FabricService {
    admission: Arc<Semaphore>,
    broker: BrokerHandle,
    correlation: Arc<CorrelationTable>,
}

impl FabricService {
    pub fn new(max_concurrent_requests: usize, broker: BrokerHandle, correlation: Arc<CorrelationTable>) -> Self {
        let permits = (max_concurrent_requests as f64 * 0.7).floor() as usize;
        Self {
            admission: Arc::new(Semaphore::new(permits.max(1))),
            broker,
            correlation,
        }
    }

    /// Runs the shared admit/submit/await contract for one call, returning
    /// either the raw reply payload or the decoded sentinel reason.
    async fn dispatch(
        &self,
        topic: String,
        task_type: &'static [u8],
        payload: Vec<u8>,
        method: &'static str,
    ) -> Result<Result<Vec<u8>, String>, Status> {
        let start = Instant::now();
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| Status::internal("admission semaphore closed"))?;
        ADMISSION_PERMITS_IN_USE.inc();
        let _permit_metric = PermitMetricGuard;
        REQUESTS_ADMITTED.with_label_values(&[method]).inc();

        let (guard, rx) = self.correlation.register();
        let client_id = guard.client_id();

        let frame = InboundFrame {
            client_id,
            topic,
            task_type: task_type.to_vec(),
            payload,
        };
        if let Err(e) = self.broker.submit(frame) {
            REQUESTS_FAILED.with_label_values(&[method]).inc();
            return Err(Status::internal(format!("failed to submit to broker: {e}")));
        }

        let result = match rx.await {
            Ok(payload) => {
                REQUESTS_COMPLETED.with_label_values(&[method]).inc();
                Ok(decode_reply(&payload).map(|p| p.to_vec()))
            }
            Err(_) => {
                REQUESTS_FAILED.with_label_values(&[method]).inc();
                Err(Status::internal("broker dropped the reply channel before completing the call"))
            }
        };

        observe_duration(REQUEST_LATENCY_SECONDS.with_label_values(&[method]), start);
        // `guard` is dropped here, deregistering the correlation id
        // regardless of which branch above returned.
        result
    }
}

#[tonic::async_trait]
impl EmbeddingGateway for FabricService {
    #[instrument(name = "servicer::get_text_embedding", target = "rpc::servicer", skip_all, level = "debug")]
    async fn get_text_embedding(
        &self,
        request: Request<TextEmbeddingRequest>,
    ) -> Result<Response<TextEmbeddingResponse>, Status> {
        let req = request.into_inner();
        let payload = req.text.into_bytes();

        match self.dispatch(req.target_topic, TASK_TYPE_TEXT, payload, "get_text_embedding").await? {
            Ok(bytes) => {
                let embedding = Embedding::decode(bytes.as_slice())
                    .map_err(|e| Status::internal(format!("malformed worker reply: {e}")))?;
                Ok(Response::new(TextEmbeddingResponse {
                    status: true,
                    error: String::new(),
                    embedding: Some(embedding),
                }))
            }
            Err(reason) => Ok(Response::new(TextEmbeddingResponse {
                status: false,
                error: reason,
                embedding: None,
            })),
        }
    }

    #[instrument(name = "servicer::get_text_batch_embedding", target = "rpc::servicer", skip_all, level = "debug")]
    async fn get_text_batch_embedding(
        &self,
        request: Request<TextBatchEmbeddingRequest>,
    ) -> Result<Response<TextBatchEmbeddingResponse>, Status> {
        let req = request.into_inner();
        let payload = req.texts.join("\n").into_bytes();

        match self
            .dispatch(req.target_topic, TASK_TYPE_TEXT_BATCH, payload, "get_text_batch_embedding")
            .await?
        {
            Ok(bytes) => {
                let batch = EmbeddingBatch::decode(bytes.as_slice())
                    .map_err(|e| Status::internal(format!("malformed worker reply: {e}")))?;
                Ok(Response::new(TextBatchEmbeddingResponse {
                    status: true,
                    error: String::new(),
                    embeddings: batch.embeddings,
                }))
            }
            Err(reason) => Ok(Response::new(TextBatchEmbeddingResponse {
                status: false,
                error: reason,
                embeddings: Vec::new(),
            })),
        }
    }

    #[instrument(name = "servicer::get_text_rerank_scores", target = "rpc::servicer", skip_all, level = "debug")]
    async fn get_text_rerank_scores(
        &self,
        request: Request<TextRerankRequest>,
    ) -> Result<Response<TextRerankResponse>, Status> {
        let req = request.into_inner();
        let mut payload = req.query.into_bytes();
        payload.push(b'\0');
        payload.extend(req.corpus.join("\n").into_bytes());

        match self
            .dispatch(req.target_topic, TASK_TYPE_RERANK, payload, "get_text_rerank_scores")
            .await?
        {
            Ok(bytes) => {
                let scores = ScoreList::decode(bytes.as_slice())
                    .map_err(|e| Status::internal(format!("malformed worker reply: {e}")))?;
                Ok(Response::new(TextRerankResponse {
                    status: true,
                    error: String::new(),
                    scores: scores.scores,
                }))
            }
            Err(reason) => Ok(Response::new(TextRerankResponse {
                status: false,
                error: reason,
                scores: Vec::new(),
            })),
        }
    }
}
