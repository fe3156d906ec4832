use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cleaned, extracted text of one upload. Produced by the parsing
/// collaborator; immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub source_filename: String,
    pub text: String,
    /// Byte offset into `text` where each page begins; always starts at 0.
    pub page_offsets: Vec<usize>,
    pub page_count: u32,
    pub extracted_at: DateTime<Utc>,
}

impl Document {
    pub fn new(source_filename: impl Into<String>, text: impl Into<String>, page_offsets: Vec<usize>) -> Self {
        let text = text.into();
        let page_offsets = if page_offsets.is_empty() {
            vec![0]
        } else {
            page_offsets
        };

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());

        Self {
            document_id: format!("{:x}", hasher.finalize()),
            source_filename: source_filename.into(),
            page_count: page_offsets.len() as u32,
            text,
            page_offsets,
            extracted_at: Utc::now(),
        }
    }

    pub fn single_page(source_filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(source_filename, text, vec![0])
    }

    /// 1-based page number containing the given byte offset.
    pub fn page_for_offset(&self, offset: usize) -> u32 {
        self.page_offsets.partition_point(|start| *start <= offset) as u32
    }
}

/// A contiguous token-bounded span of document text, the atomic unit of
/// retrieval. Created once during indexing, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: u64,
    pub token_count: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
}

/// One ranked retrieval hit. Ephemeral: constructed per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub chunk: Chunk,
    pub distance: f32,
    /// Normalized similarity in (0, 1], `1 / (1 + distance)`.
    pub score: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// Retrieval produced no evidence; the model was never called.
    NoEvidence,
    /// The model itself signalled that the context does not address the question.
    ModelDeclined,
    /// Not even a truncated best chunk fit the context budget.
    ContextOverflow,
}

/// An explicit "insufficient evidence" response. A valid conversational
/// outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refusal {
    pub reason: RefusalReason,
    pub message: String,
}

impl Refusal {
    pub fn new(reason: RefusalReason) -> Self {
        Self {
            reason,
            message: "I cannot answer based on the provided document.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub text: String,
    /// Chunk ids backing the answer, in evidence rank order.
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AskOutcome {
    Answer(GroundedAnswer),
    Refusal(Refusal),
}

impl AskOutcome {
    pub fn is_refusal(&self) -> bool {
        matches!(self, AskOutcome::Refusal(_))
    }
}

/// Provenance of one evidence item as recorded in chat history, without the
/// chunk text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub chunk_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub distance: f32,
    pub score: f32,
}

impl From<&EvidenceItem> for EvidenceRef {
    fn from(item: &EvidenceItem) -> Self {
        Self {
            chunk_id: item.chunk.chunk_id.clone(),
            page_start: item.chunk.page_start,
            page_end: item.chunk.page_end,
            distance: item.distance,
            score: item.score,
        }
    }
}

/// One question/outcome/evidence record in a session's chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub outcome: AskOutcome,
    pub evidence: Vec<EvidenceRef>,
    pub asked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_content_addressed() {
        let first = Document::single_page("a.txt", "same text");
        let second = Document::single_page("b.txt", "same text");
        assert_eq!(first.document_id, second.document_id);

        let third = Document::single_page("a.txt", "different text");
        assert_ne!(first.document_id, third.document_id);
    }

    #[test]
    fn page_lookup_uses_offset_boundaries() {
        let document = Document::new("doc.txt", "0123456789", vec![0, 4, 8]);
        assert_eq!(document.page_count, 3);
        assert_eq!(document.page_for_offset(0), 1);
        assert_eq!(document.page_for_offset(3), 1);
        assert_eq!(document.page_for_offset(4), 2);
        assert_eq!(document.page_for_offset(9), 3);
    }

    #[test]
    fn empty_page_offsets_default_to_one_page() {
        let document = Document::new("doc.txt", "text", Vec::new());
        assert_eq!(document.page_count, 1);
        assert_eq!(document.page_for_offset(2), 1);
    }
}
