use thiserror::Error;

/// Why an inbound line did not become a [`Telemetry`](crate::telemetry::Telemetry) value.
///
/// The receive loop never propagates these; they only surface from the pure
/// decode step so callers and tests can see why a sentence was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("line has no key=payload shape")]
    NoPayload,

    #[error("unknown telemetry key: {0}")]
    UnknownKey(String),

    #[error("malformed {key} sentence: expected {expected} fields, found {found}")]
    Arity {
        key: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("malformed {key} sentence: {field:?} is not a valid value")]
    InvalidValue { key: &'static str, field: String },
}

impl DecodeError {
    /// True for sentences whose key is known but whose payload is unusable.
    pub fn is_malformed(&self) -> bool {
        matches!(self, DecodeError::Arity { .. } | DecodeError::InvalidValue { .. })
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {port} at {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        #[source]
        source: serialport::Error,
    },

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialport error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("controls are disabled by the robot; refusing {0}")]
    ControlsDisabled(String),

    #[error("receiver is already running")]
    ReceiverRunning,

    #[error("failed to spawn receiver thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
