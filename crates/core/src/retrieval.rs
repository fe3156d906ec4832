use crate::chunking::count_tokens;
use crate::config::SessionConfig;
use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::index::VectorIndex;
use crate::models::{Chunk, EvidenceItem};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Similarity in `(0, 1]` derived from a non-negative distance.
pub fn normalized_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Embed the question, search the index, and apply the two-tier distance
/// filter.
///
/// Candidates farther than `distance_threshold` are dropped. If that would
/// eliminate every candidate, the single best one is retained anyway, unless
/// even it is farther than `absolute_distance_cutoff`, in which case the
/// evidence set is legitimately empty and the caller refuses.
pub fn retrieve<E: Embedder>(
    question: &str,
    config: &SessionConfig,
    embedder: &E,
    index: &VectorIndex,
    chunks: &HashMap<String, Chunk>,
) -> Result<Vec<EvidenceItem>, QueryError> {
    let question_tokens = count_tokens(question);
    if question_tokens > config.max_query_tokens {
        return Err(QueryError::QueryTooLong {
            tokens: question_tokens,
            limit: config.max_query_tokens,
        });
    }

    let query_vector = embedder.embed(question)?;
    let hits = index.search(&query_vector, config.retrieval_k)?;

    let mut candidates: Vec<(Chunk, f32)> = Vec::with_capacity(hits.len());
    for (chunk_id, distance) in hits {
        debug!(chunk_id = %chunk_id, distance, "retrieval score");
        match chunks.get(&chunk_id) {
            Some(chunk) => candidates.push((chunk.clone(), distance)),
            // A hit without chunk metadata degrades to reduced evidence
            // rather than aborting the query.
            None => warn!(chunk_id = %chunk_id, "index hit has no chunk metadata, skipping"),
        }
    }

    let mut kept: Vec<(Chunk, f32)> = candidates
        .iter()
        .filter(|(_, distance)| *distance <= config.distance_threshold)
        .cloned()
        .collect();

    if kept.is_empty() {
        if let Some((best_chunk, best_distance)) = candidates.first() {
            if *best_distance <= config.absolute_distance_cutoff {
                warn!(
                    chunk_id = %best_chunk.chunk_id,
                    distance = best_distance,
                    "distance threshold emptied candidates, keeping best"
                );
                kept.push((best_chunk.clone(), *best_distance));
            }
        }
    }

    let evidence: Vec<EvidenceItem> = kept
        .into_iter()
        .enumerate()
        .map(|(rank, (chunk, distance))| EvidenceItem {
            score: normalized_score(distance),
            chunk,
            distance,
            rank,
        })
        .collect();

    info!(
        requested_k = config.retrieval_k,
        returned = evidence.len(),
        "retrieval complete"
    );
    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistanceMetric;
    use crate::error::ModelUnavailable;

    struct FakeEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        fail: bool,
    }

    impl FakeEmbedder {
        fn new(vectors: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: vectors
                    .iter()
                    .map(|(text, vector)| (text.to_string(), vector.clone()))
                    .collect(),
                fail: false,
            }
        }
    }

    impl Embedder for FakeEmbedder {
        fn model_id(&self) -> &str {
            "fake"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, ModelUnavailable> {
            if self.fail {
                return Err(ModelUnavailable("backend down".to_string()));
            }
            Ok(self
                .vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0, 0.0]))
        }
    }

    fn chunk(chunk_id: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id.to_string(),
            document_id: "doc".to_string(),
            ordinal: 0,
            token_count: 3,
            char_start: 0,
            char_end: 10,
            page_start: 1,
            page_end: 1,
            text: format!("text of {chunk_id}"),
        }
    }

    fn fixture(vectors: &[(&str, Vec<f32>)]) -> (VectorIndex, HashMap<String, Chunk>) {
        let mut index = VectorIndex::new(DistanceMetric::SquaredL2, 2);
        let mut chunks = HashMap::new();
        for (chunk_id, vector) in vectors {
            index
                .insert(*chunk_id, vector.clone())
                .expect("insert succeeds");
            chunks.insert(chunk_id.to_string(), chunk(chunk_id));
        }
        index.seal();
        (index, chunks)
    }

    fn config() -> SessionConfig {
        SessionConfig {
            retrieval_k: 3,
            distance_threshold: 1.0,
            absolute_distance_cutoff: 4.0,
            ..Default::default()
        }
    }

    #[test]
    fn close_candidates_pass_the_threshold() {
        let (index, chunks) = fixture(&[
            ("near", vec![0.5, 0.0]),
            ("far", vec![9.0, 0.0]),
        ]);
        let embedder = FakeEmbedder::new(&[("question", vec![0.0, 0.0])]);

        let evidence =
            retrieve("question", &config(), &embedder, &index, &chunks).expect("retrieval succeeds");

        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].chunk.chunk_id, "near");
        assert_eq!(evidence[0].rank, 0);
        assert!(evidence[0].score > 0.0 && evidence[0].score <= 1.0);
    }

    #[test]
    fn fallback_keeps_single_best_when_threshold_empties_set() {
        // Both candidates fail the primary threshold (distance 1.0) but the
        // best is inside the absolute cutoff (4.0).
        let (index, chunks) = fixture(&[
            ("best", vec![1.5, 0.0]),
            ("worse", vec![3.0, 0.0]),
        ]);
        let embedder = FakeEmbedder::new(&[("question", vec![0.0, 0.0])]);

        let evidence =
            retrieve("question", &config(), &embedder, &index, &chunks).expect("retrieval succeeds");

        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].chunk.chunk_id, "best");
    }

    #[test]
    fn evidence_is_empty_past_the_absolute_cutoff() {
        let (index, chunks) = fixture(&[("off-topic", vec![5.0, 0.0])]);
        let embedder = FakeEmbedder::new(&[("question", vec![0.0, 0.0])]);

        let evidence =
            retrieve("question", &config(), &embedder, &index, &chunks).expect("retrieval succeeds");
        assert!(evidence.is_empty());
    }

    #[test]
    fn overlong_question_is_rejected_before_embedding() {
        let (index, chunks) = fixture(&[("a", vec![0.0, 0.0])]);
        let embedder = FakeEmbedder::new(&[]);
        let question = vec!["word"; 600].join(" ");

        let config = SessionConfig {
            max_query_tokens: 512,
            ..config()
        };
        let result = retrieve(&question, &config, &embedder, &index, &chunks);
        assert!(matches!(
            result,
            Err(QueryError::QueryTooLong { tokens: 600, limit: 512 })
        ));
    }

    #[test]
    fn embedder_failure_aborts_the_query() {
        let (index, chunks) = fixture(&[("a", vec![0.0, 0.0])]);
        let mut embedder = FakeEmbedder::new(&[]);
        embedder.fail = true;

        let result = retrieve("question", &config(), &embedder, &index, &chunks);
        assert!(matches!(result, Err(QueryError::ModelUnavailable(_))));
    }

    #[test]
    fn hit_without_chunk_metadata_is_skipped() {
        let (index, mut chunks) = fixture(&[
            ("kept", vec![0.1, 0.0]),
            ("orphaned", vec![0.2, 0.0]),
        ]);
        chunks.remove("orphaned");
        let embedder = FakeEmbedder::new(&[("question", vec![0.0, 0.0])]);

        let evidence =
            retrieve("question", &config(), &embedder, &index, &chunks).expect("retrieval succeeds");
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].chunk.chunk_id, "kept");
    }

    #[test]
    fn ranks_follow_ascending_distance() {
        let (index, chunks) = fixture(&[
            ("third", vec![0.9, 0.0]),
            ("first", vec![0.1, 0.0]),
            ("second", vec![0.5, 0.0]),
        ]);
        let embedder = FakeEmbedder::new(&[("question", vec![0.0, 0.0])]);

        let evidence =
            retrieve("question", &config(), &embedder, &index, &chunks).expect("retrieval succeeds");

        let ids: Vec<&str> = evidence
            .iter()
            .map(|item| item.chunk.chunk_id.as_str())
            .collect();
        assert_eq!(ids, ["first", "second", "third"]);
        assert!(evidence.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        assert!(evidence.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }
}
