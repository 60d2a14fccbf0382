//! Strategy registry.
//!
//! The fabric is generic over a single capability: turning `(task_type,
//! payload)` into a reply payload. Concrete model code (embedding, reranking)
//! is out of scope here - two reference strategies ship so the crate
//! compiles, runs, and can be exercised end-to-end in tests without a real
//! model.

use crate::errors::StrategyError;
use std::collections::HashMap;

/// A unit of work a worker process can execute. Implementations must not
/// block beyond the time it takes to produce a reply - the worker loop has
/// no concept of cancelling an in-flight call.
pub trait Strategy: Send {
    fn process(&mut self, task_type: &[u8], payload: &[u8]) -> Result<Vec<u8>, StrategyError>;
}

type Constructor = fn(&HashMap<String, toml::Value>) -> Result<Box<dyn Strategy>, StrategyError>;

fn registry() -> HashMap<&'static str, Constructor> {
    let mut m: HashMap<&'static str, Constructor> = HashMap::new();
    m.insert("echo", echo::construct);
    m.insert("fixed-dim-embedding", fixed_dim_embedding::construct);
    m
}

/// Whether `name` is a strategy this binary knows how to construct. Used by
/// config validation at startup so a typo in `strategy_name` is rejected
/// before any process is spawned, rather than surfacing as a worker crash.
pub fn is_known(name: &str) -> bool {
    registry().contains_key(name)
}

/// Construct a strategy instance by name from its configured options.
pub fn construct(
    name: &str,
    options: &HashMap<String, toml::Value>,
) -> Result<Box<dyn Strategy>, StrategyError> {
    let ctor = registry()
        .get(name)
        .copied()
        .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))?;
    ctor(options)
}

/// Round-trips the payload unchanged. Used by the stub/test harness and as
/// a minimal smoke-test strategy.
mod echo {
    use super::*;

    pub struct Echo;

    impl Strategy for Echo {
        fn process(&mut self, _task_type: &[u8], payload: &[u8]) -> Result<Vec<u8>, StrategyError> {
            Ok(payload.to_vec())
        }
    }

    pub fn construct(_options: &HashMap<String, toml::Value>) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(Box::new(Echo))
    }
}

/// Returns a deterministic dense vector of configurable dimensionality,
/// standing in for a real embedding model so tests exercise real
/// (de)serialization instead of a no-op passthrough.
mod fixed_dim_embedding {
    use super::*;
    use crate::proto::fabric::Embedding;
    use prost::Message;

    pub struct FixedDimEmbedding {
        dim: usize,
    }

    impl Strategy for FixedDimEmbedding {
        fn process(&mut self, _task_type: &[u8], payload: &[u8]) -> Result<Vec<u8>, StrategyError> {
            // Derive a stable-but-varying seed from the input so different
            // requests don't all map to the identical vector.
            let seed: u32 = payload.iter().fold(1u32, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u32));
            let dense_values: Vec<f32> = (0..self.dim)
                .map(|i| ((seed.wrapping_add(i as u32) % 1000) as f32) / 1000.0)
                .collect();
            let embedding = Embedding {
                dense_values,
                sparse_values: Default::default(),
            };
            Ok(embedding.encode_to_vec())
        }
    }

    pub fn construct(options: &HashMap<String, toml::Value>) -> Result<Box<dyn Strategy>, StrategyError> {
        let dim = options
            .get("dim")
            .and_then(|v| v.as_integer())
            .unwrap_or(384);
        if dim <= 0 {
            return Err(StrategyError::InvalidOptions(format!(
                "dim must be positive, got {dim}"
            )));
        }
        Ok(Box::new(FixedDimEmbedding { dim: dim as usize }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn echo_round_trips_payload() {
        let mut s = construct("echo", &HashMap::new()).unwrap();
        let out = s.process(b"TEXT", b"hello").unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn fixed_dim_embedding_respects_configured_dimension() {
        let mut options = HashMap::new();
        options.insert("dim".to_string(), toml::Value::Integer(8));
        let mut s = construct("fixed-dim-embedding", &options).unwrap();
        let out = s.process(b"TEXT", b"hello").unwrap();
        let embedding = crate::proto::fabric::Embedding::decode(out.as_slice()).unwrap();
        assert_eq!(embedding.dense_values.len(), 8);
    }

    #[test]
    fn unknown_strategy_name_is_rejected() {
        assert!(construct("does-not-exist", &HashMap::new()).is_err());
        assert!(!is_known("does-not-exist"));
    }
}
