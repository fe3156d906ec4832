use thiserror::Error;

/// The embedding backend could not produce a vector.
#[derive(Debug, Clone, Error)]
#[error("embedding model unavailable: {0}")]
pub struct ModelUnavailable(pub String);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    ModelUnavailable(#[from] ModelUnavailable),

    #[error("document has no indexable text")]
    EmptyDocument,

    #[error("indexing cancelled before completion")]
    Cancelled,

    #[error("embedding dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector index is sealed; rebuild the session to index a new document")]
    IndexSealed,

    #[error("index snapshot metric {got} does not match configured metric {expected}")]
    MetricMismatch { expected: String, got: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("vector index has not been built yet")]
    IndexNotBuilt,

    #[error("vector index contains no entries")]
    IndexEmpty,

    #[error(transparent)]
    ModelUnavailable(#[from] ModelUnavailable),

    #[error("question is {tokens} tokens, limit is {limit}")]
    QueryTooLong { tokens: usize, limit: usize },

    #[error("query vector dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("generation backend unavailable after {attempts} attempts: {details}")]
    GenerationUnavailable { attempts: u32, details: String },
}

/// A single failed attempt against the generation backend. The grounded
/// generator retries these; only exhaustion becomes a [`QueryError`].
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

pub type Result<T, E = BuildError> = std::result::Result<T, E>;
