use crate::chunking::{chunk_document, ChunkingConfig};
use crate::config::SessionConfig;
use crate::embeddings::Embedder;
use crate::error::{BuildError, QueryError};
use crate::export::SessionBundle;
use crate::generation::{GenerationClient, GroundedGenerator};
use crate::index::VectorIndex;
use crate::models::{AskOutcome, ChatTurn, Chunk, Document, EvidenceRef};
use crate::retrieval::retrieve;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Chunks embedded per batch during index build; cancellation is checked
/// between batches.
const EMBED_BATCH_SIZE: usize = 16;

/// Cooperative cancellation for a long-running index build. Cancelling
/// between embedding batches aborts the build with the index still unusable,
/// so partial state is never exposed to search.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The unit of isolation: one document, one vector index, one chat history.
/// Nothing is shared across sessions. Mutation (build, reindex, ask) takes
/// `&mut self`, so Rust's borrow rules enforce the single-writer discipline;
/// the sealed index itself is safe for concurrent reads.
pub struct Session<E: Embedder, C: GenerationClient> {
    id: Uuid,
    config: SessionConfig,
    document: Document,
    chunks: Vec<Chunk>,
    chunks_by_id: HashMap<String, Chunk>,
    index: VectorIndex,
    embedder: E,
    generator: GroundedGenerator<C>,
    history: Vec<ChatTurn>,
    created_at: DateTime<Utc>,
}

impl<E: Embedder, C: GenerationClient> Session<E, C> {
    /// Validate the configuration, chunk and embed the document, and seal the
    /// index. The session is not constructed until the index is complete, so
    /// `ask` can never observe a partial build.
    pub fn build(
        config: SessionConfig,
        document: Document,
        embedder: E,
        generator: GroundedGenerator<C>,
        cancel: &CancelFlag,
    ) -> Result<Self, BuildError> {
        config.validate()?;
        if embedder.model_id() != config.embedding_model_id {
            return Err(BuildError::InvalidConfig(format!(
                "embedder model {} does not match configured embedding_model_id {}",
                embedder.model_id(),
                config.embedding_model_id
            )));
        }

        let started = Instant::now();
        let chunks = chunk_document(&document, ChunkingConfig::from(&config))?;
        if chunks.is_empty() {
            return Err(BuildError::EmptyDocument);
        }

        let index = embed_and_index(&chunks, &embedder, &config, cancel)?;
        info!(
            document_id = %document.document_id,
            chunks = chunks.len(),
            ms = started.elapsed().as_millis() as u64,
            "index build complete"
        );

        let chunks_by_id = chunks
            .iter()
            .map(|chunk| (chunk.chunk_id.clone(), chunk.clone()))
            .collect();

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            document,
            chunks,
            chunks_by_id,
            index,
            embedder,
            generator,
            history: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Replace the session's document and index under exclusive access. The
    /// old index keeps serving until the replacement is fully built; a
    /// cancelled or failed rebuild leaves the session untouched.
    pub fn reindex(&mut self, document: Document, cancel: &CancelFlag) -> Result<(), BuildError> {
        let chunks = chunk_document(&document, ChunkingConfig::from(&self.config))?;
        if chunks.is_empty() {
            return Err(BuildError::EmptyDocument);
        }
        let index = embed_and_index(&chunks, &self.embedder, &self.config, cancel)?;

        self.chunks_by_id = chunks
            .iter()
            .map(|chunk| (chunk.chunk_id.clone(), chunk.clone()))
            .collect();
        self.chunks = chunks;
        self.index = index;
        self.document = document;
        Ok(())
    }

    /// Answer one question from the indexed document, recording the turn in
    /// chat history. A refusal is a normal turn; errors are not recorded.
    pub async fn ask(&mut self, question: &str) -> Result<AskOutcome, QueryError> {
        let evidence = retrieve(
            question,
            &self.config,
            &self.embedder,
            &self.index,
            &self.chunks_by_id,
        )?;

        let outcome = self
            .generator
            .generate(question, &evidence, &self.config)
            .await?;

        self.history.push(ChatTurn {
            question: question.to_string(),
            outcome: outcome.clone(),
            evidence: evidence.iter().map(EvidenceRef::from).collect(),
            asked_at: Utc::now(),
        });
        Ok(outcome)
    }

    /// Deterministic serialized view of the session for the export
    /// collaborator. Read-only: the bundle owns copies of everything.
    pub fn export(&self) -> SessionBundle {
        SessionBundle {
            session_id: self.id,
            exported_at: Utc::now(),
            config: self.config.clone(),
            document: self.document.clone(),
            chunks: self.chunks.clone(),
            index: self.index.snapshot(),
            history: self.history.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn embed_and_index<E: Embedder>(
    chunks: &[Chunk],
    embedder: &E,
    config: &SessionConfig,
    cancel: &CancelFlag,
) -> Result<VectorIndex, BuildError> {
    let mut index = VectorIndex::new(config.distance_metric, embedder.dimensions());

    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        for chunk in batch {
            let vector = embedder.embed(&chunk.text)?;
            index.insert(chunk.chunk_id.clone(), vector)?;
        }
    }

    index.seal();
    Ok(index)
}

/// Process-scoped map from session id to session. No ambient global state:
/// the hosting process owns the registry and tears sessions down explicitly.
#[derive(Default)]
pub struct SessionRegistry<E: Embedder, C: GenerationClient> {
    sessions: HashMap<Uuid, Session<E, C>>,
}

impl<E: Embedder, C: GenerationClient> SessionRegistry<E, C> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, session: Session<E, C>) -> Uuid {
        let id = session.id();
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&Session<E, C>> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Session<E, C>> {
        self.sessions.get_mut(id)
    }

    /// Tear down one session, dropping its document, index, and history.
    pub fn destroy(&mut self, id: &Uuid) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
