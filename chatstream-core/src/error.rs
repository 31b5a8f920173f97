use thiserror::Error;

/// Core error type for chatstream.
/// Config helpers may lean on `anyhow` internally, but public boundaries
/// expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Non-success status before any streaming began.
    #[error("stream request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("response has no readable body (status {status})")]
    MissingBody { status: u16 },

    /// Connect/send failure or an I/O failure mid-stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// An `error` event sent by the server inside an otherwise healthy stream.
    #[error("{0}")]
    Server(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    /// Stable short label, used as `error_kind` in telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Status { .. } => "status",
            Self::MissingBody { .. } => "missing_body",
            Self::Transport(_) => "transport",
            Self::Server(_) => "server",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, StreamError>;
