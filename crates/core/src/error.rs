use thiserror::Error;

/// Failure to obtain the repository tree. Always fatal for the snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("repository host rate limited the request")]
    RateLimited,

    #[error("repository host requires authentication: {0}")]
    AuthRequired(String),

    #[error("invalid repository url: {0}")]
    InvalidUrl(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Error kinds surfaced by every generative or embedding model call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("model provider rate limited the request")]
    RateLimited,

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("model call failed: {0}")]
    Unknown(String),
}

impl ModelError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Unknown(error.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    #[error("model failed: {0}")]
    Model(#[from] ModelError),

    #[error("unknown snapshot: {0}")]
    UnknownSnapshot(String),

    #[error("snapshot {snapshot_id} is not ready ({state})")]
    NotReady {
        snapshot_id: String,
        state: crate::models::IndexingState,
    },

    #[error("query is empty")]
    EmptyQuery,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
