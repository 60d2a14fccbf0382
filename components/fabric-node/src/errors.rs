//! Error taxonomy for the dispatch fabric, split by the component each
//! variant originates in so callers can match on failure domain instead of
//! string-sniffing.

/// Failures while loading or validating the fabric's configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("duplicate topic(s) found in embedder_model_configs: {0:?}")]
    DuplicateTopics(Vec<String>),

    #[error("invalid zmq address {address:?} for topic {topic:?}: must match tcp://*:<port> or ipc://...")]
    InvalidAddress { topic: String, address: String },

    #[error("port {port} for topic {topic:?} is already in use")]
    PortInUse { topic: String, port: u16 },

    #[error("unknown strategy {0:?} referenced by an embedder_model_configs entry")]
    UnknownStrategy(String),
}

/// Failures constructing a worker's strategy, or while the strategy runs.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("unknown strategy name: {0}")]
    UnknownStrategy(String),

    #[error("invalid strategy options: {0}")]
    InvalidOptions(String),

    #[error("strategy failed to process task: {0}")]
    ProcessingFailed(String),
}

/// Failures on the router<->worker ZeroMQ transport.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    #[error("malformed multipart frame: expected {expected} parts, got {got}")]
    MalformedFrame { expected: usize, got: usize },

    #[error("bridging channel to bus thread closed")]
    ChannelClosed,
}

/// Fatal faults inside the broker or a per-topic router loop. A fabric
/// error is never recovered in place - it propagates out and ends the
/// server process, matching the fail-stop policy in the design notes.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("broker inbound channel closed unexpectedly")]
    InboundClosed,

    #[error("broker outbound channel closed unexpectedly")]
    OutboundClosed,

    #[error("router for topic {0:?} lost its worker bus thread")]
    BusThreadLost(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Failures raised by the supervisor while spawning or watching child
/// processes.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn {role} process: {source}")]
    Spawn {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child process {role} ({pid}) exited with {status}")]
    ChildExited {
        role: String,
        pid: u32,
        status: std::process::ExitStatus,
    },
}
