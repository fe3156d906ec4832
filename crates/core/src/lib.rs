pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod export;
pub mod generation;
pub mod index;
pub mod models;
pub mod retrieval;
pub mod session;

pub use chunking::{
    chunk_document, count_tokens, token_spans, truncate_at_token_boundary, ChunkingConfig,
    TokenSpan,
};
pub use config::{DistanceMetric, SessionConfig};
pub use embeddings::{Embedder, HashedNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{BuildError, GenerationError, ModelUnavailable, QueryError};
pub use export::{read_index_snapshot, SessionBundle};
pub use generation::{
    citation_key, GenerationClient, GroqChatClient, GroundedGenerator, GroundedPrompt,
    PhrasePatternDetector, RefusalDetector,
};
pub use index::{IndexEntry, IndexSnapshot, VectorIndex};
pub use models::{
    AskOutcome, ChatTurn, Chunk, Document, EvidenceItem, EvidenceRef, GroundedAnswer, Refusal,
    RefusalReason,
};
pub use retrieval::{normalized_score, retrieve};
pub use session::{CancelFlag, Session, SessionRegistry};
