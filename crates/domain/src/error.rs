/// Shared error type used across all loquat crates.
///
/// The variants encode the taxonomy the engine cares about:
/// - `Config` / `Auth` are fatal for the request and surfaced before any
///   network call; never retried automatically.
/// - `Http` / `Timeout` are transport failures; retryable by the caller.
/// - `Malformed` means the backend answered but with a shape the adapter
///   cannot use — kept distinct from transport errors so protocol drift is
///   diagnosable.
/// - Soft failures (tool discovery, prefetch, summarization) are absorbed
///   locally and never reach the caller as one of these.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("malformed response from {provider}: {message}")]
    Malformed { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a caller may meaningfully retry the request without changing
    /// its configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_) | Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
