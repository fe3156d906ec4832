use crate::config::SessionConfig;
use crate::error::BuildError;
use crate::models::{Chunk, Document};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl From<&SessionConfig> for ChunkingConfig {
    fn from(value: &SessionConfig) -> Self {
        Self {
            max_tokens: value.max_chunk_tokens,
            overlap_tokens: value.overlap_tokens,
        }
    }
}

/// Byte range of one whitespace-delimited token within the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// Fixed tokenizer used across chunking, retrieval, and prompt budgeting:
/// maximal runs of non-whitespace characters, with their byte spans.
pub fn token_spans(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut open: Option<usize> = None;

    for (index, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(start) = open.take() {
                spans.push(TokenSpan { start, end: index });
            }
        } else if open.is_none() {
            open = Some(index);
        }
    }

    if let Some(start) = open {
        spans.push(TokenSpan {
            start,
            end: text.len(),
        });
    }

    spans
}

pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate `text` to its first `max_tokens` tokens, never mid-token.
pub fn truncate_at_token_boundary(text: &str, max_tokens: usize) -> &str {
    let spans = token_spans(text);
    if spans.len() <= max_tokens {
        return text;
    }
    if max_tokens == 0 {
        return "";
    }
    &text[..spans[max_tokens - 1].end]
}

/// Split a document into token-bounded overlapping chunks with stable ids and
/// page/offset provenance. Pure function of text and config: windows of
/// `max_tokens` advance by `max_tokens - overlap_tokens`, the final window is
/// truncated to the remaining tokens, and every token lands in at least one
/// chunk.
pub fn chunk_document(
    document: &Document,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, BuildError> {
    if config.max_tokens == 0 || config.overlap_tokens >= config.max_tokens {
        return Err(BuildError::InvalidConfig(format!(
            "overlap_tokens {} must be smaller than max_tokens {}",
            config.overlap_tokens, config.max_tokens
        )));
    }

    let spans = token_spans(&document.text);
    if spans.is_empty() {
        return Ok(Vec::new());
    }

    let step = config.max_tokens - config.overlap_tokens;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0u64;

    loop {
        let end = (start + config.max_tokens).min(spans.len());
        let char_start = spans[start].start;
        let char_end = spans[end - 1].end;
        let text = document.text[char_start..char_end].to_string();

        chunks.push(Chunk {
            chunk_id: make_chunk_id(&document.document_id, ordinal, &text),
            document_id: document.document_id.clone(),
            ordinal,
            token_count: end - start,
            char_start,
            char_end,
            page_start: document.page_for_offset(char_start),
            page_end: document.page_for_offset(char_end.saturating_sub(1)),
            text,
        });

        if end == spans.len() {
            break;
        }
        start += step;
        ordinal += 1;
    }

    Ok(chunks)
}

fn make_chunk_id(document_id: &str, ordinal: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn words(count: usize) -> String {
        (0..count)
            .map(|index| format!("w{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn short_document_yields_one_chunk() {
        let document = Document::single_page("short.txt", "only a few words here");
        let chunks = chunk_document(
            &document,
            ChunkingConfig {
                max_tokens: 100,
                overlap_tokens: 20,
            },
        )
        .expect("chunking succeeds");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 5);
        assert_eq!(chunks[0].text, document.text);
    }

    #[test]
    fn windows_overlap_and_cover_all_tokens() {
        let document = Document::single_page("doc.txt", words(25));
        let config = ChunkingConfig {
            max_tokens: 10,
            overlap_tokens: 3,
        };
        let chunks = chunk_document(&document, config).expect("chunking succeeds");

        // step = 7, so windows start at token 0, 7, 14, 21.
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            assert!(chunk.token_count <= config.max_tokens);
        }
        for pair in chunks.windows(2) {
            let left: HashSet<&str> = pair[0].text.split_whitespace().collect();
            let right: HashSet<&str> = pair[1].text.split_whitespace().collect();
            assert!(left.intersection(&right).count() >= config.overlap_tokens);
        }

        let covered: HashSet<&str> = chunks
            .iter()
            .flat_map(|chunk| chunk.text.split_whitespace())
            .collect();
        let original: HashSet<&str> = document.text.split_whitespace().collect();
        assert_eq!(covered, original);
    }

    #[test]
    fn step_count_is_bounded() {
        let document = Document::single_page("doc.txt", words(1_000));
        let config = ChunkingConfig {
            max_tokens: 64,
            overlap_tokens: 16,
        };
        let chunks = chunk_document(&document, config).expect("chunking succeeds");

        let step = config.max_tokens - config.overlap_tokens;
        let bound = 1_000usize.div_ceil(step);
        assert!(chunks.len() <= bound);
    }

    #[test]
    fn chunk_ids_are_stable_across_rebuilds() {
        let document = Document::single_page("doc.txt", words(40));
        let config = ChunkingConfig {
            max_tokens: 16,
            overlap_tokens: 4,
        };
        let first = chunk_document(&document, config).expect("chunking succeeds");
        let second = chunk_document(&document, config).expect("chunking succeeds");

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
        }
    }

    #[test]
    fn page_provenance_follows_offsets() {
        let page_one = words(12);
        let text = format!("{page_one}\n{}", words(12));
        let boundary = page_one.len() + 1;
        let document = Document::new("doc.txt", text, vec![0, boundary]);

        let chunks = chunk_document(
            &document,
            ChunkingConfig {
                max_tokens: 8,
                overlap_tokens: 2,
            },
        )
        .expect("chunking succeeds");

        assert_eq!(chunks.first().map(|chunk| chunk.page_start), Some(1));
        assert_eq!(chunks.last().map(|chunk| chunk.page_end), Some(2));
        assert!(chunks
            .iter()
            .any(|chunk| chunk.page_start == 1 && chunk.page_end == 2));
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let document = Document::single_page("doc.txt", words(10));
        let result = chunk_document(
            &document,
            ChunkingConfig {
                max_tokens: 5,
                overlap_tokens: 5,
            },
        );
        assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let document = Document::single_page("empty.txt", "   \n\t  ");
        let chunks = chunk_document(
            &document,
            ChunkingConfig {
                max_tokens: 10,
                overlap_tokens: 2,
            },
        )
        .expect("chunking succeeds");
        assert!(chunks.is_empty());
    }

    #[test]
    fn truncation_never_splits_a_token() {
        let text = "alpha beta gamma delta";
        assert_eq!(truncate_at_token_boundary(text, 2), "alpha beta");
        assert_eq!(truncate_at_token_boundary(text, 10), text);
        assert_eq!(truncate_at_token_boundary(text, 0), "");
    }
}
