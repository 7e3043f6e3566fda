use thiserror::Error;

/// Core error type for classplan.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ClassplanError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Terminal failure of a generation stream, whether raised by the
    /// provider directly or delivered in-band via an `event: error` frame.
    #[error("{0}")]
    Generation(String),

    /// The server answered with a non-2xx status. The message comes from the
    /// structured JSON error body when present, else a generic one.
    #[error("{message}")]
    ServerStatus { status: u16, message: String },

    /// The request was sent but no response (or no further bytes) arrived.
    #[error("no response received from server")]
    NoResponse,

    /// Failure before the request was dispatched.
    #[error("request setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, ClassplanError>;
