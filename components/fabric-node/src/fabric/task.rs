//! Core data model shared by the broker, routers and workers.

/// Byte marker prefixing a sentinel error reply. Any reply payload starting
/// with this sequence is an in-band failure; everything after it is the
/// UTF-8 reason.
pub const SENTINEL_PREFIX: &[u8] = b"INTERNAL-ERROR:";

/// Builds a sentinel error payload from a human-readable reason.
pub fn sentinel(reason: impl AsRef<str>) -> Vec<u8> {
    let mut out = SENTINEL_PREFIX.to_vec();
    out.extend_from_slice(reason.as_ref().as_bytes());
    out
}

/// Splits a reply payload into `Ok(payload)` or `Err(reason)` depending on
/// whether it carries the sentinel prefix.
pub fn decode_reply(payload: &[u8]) -> Result<&[u8], String> {
    match payload.strip_prefix(SENTINEL_PREFIX) {
        Some(reason) => Err(String::from_utf8_lossy(reason).into_owned()),
        None => Ok(payload),
    }
}

/// Opaque handle identifying one in-flight RPC call inside the server
/// fabric. Never exposed to the external caller.
pub type ClientId = u64;

/// Opaque handle identifying one worker's bus endpoint, as seen by its
/// router. Mirrors the ZeroMQ ROUTER socket's own identity-frame bytes.
pub type WorkerId = Vec<u8>;

/// A unit of work flowing from the broker into a topic's router.
#[derive(Debug, Clone)]
pub struct Task {
    pub client_id: ClientId,
    pub task_type: Vec<u8>,
    pub payload: Vec<u8>,
}

/// A frame submitted by an RPC handler to the broker's inbound surface.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub client_id: ClientId,
    pub topic: String,
    pub task_type: Vec<u8>,
    pub payload: Vec<u8>,
}

/// A completed reply pushed from a router to the broker's outbound surface.
#[derive(Debug, Clone)]
pub struct Reply {
    pub client_id: ClientId,
    pub payload: Vec<u8>,
}
