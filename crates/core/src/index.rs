use crate::config::DistanceMetric;
use crate::error::{BuildError, QueryError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

/// Deterministic serialized form of a [`VectorIndex`]: ids, vectors, and the
/// metric identifier, sufficient for bit-faithful reload by the export
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub metric: DistanceMetric,
    pub dimensions: usize,
    pub entries: Vec<IndexEntry>,
}

/// In-memory, session-scoped nearest-neighbor index. Append-only during
/// build; sealing marks the build complete and gates all `search` calls.
/// After sealing the index is immutable, so concurrent reads need no locking.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metric: DistanceMetric,
    dimensions: usize,
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    sealed: bool,
}

impl VectorIndex {
    pub fn new(metric: DistanceMetric, dimensions: usize) -> Self {
        Self {
            metric,
            dimensions,
            entries: Vec::new(),
            positions: HashMap::new(),
            sealed: false,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Add one entry. Re-insertion with an existing id replaces the vector in
    /// place, keeping the original insertion position, so re-indexing the same
    /// document does not duplicate entries.
    pub fn insert(&mut self, chunk_id: impl Into<String>, vector: Vec<f32>) -> Result<(), BuildError> {
        if self.sealed {
            return Err(BuildError::IndexSealed);
        }
        if vector.len() != self.dimensions {
            return Err(BuildError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        let chunk_id = chunk_id.into();
        match self.positions.get(&chunk_id) {
            Some(position) => self.entries[*position].vector = vector,
            None => {
                self.positions.insert(chunk_id.clone(), self.entries.len());
                self.entries.push(IndexEntry { chunk_id, vector });
            }
        }
        Ok(())
    }

    /// Mark the build complete. Until then every `search` call is rejected,
    /// so a partially populated index is never exposed.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Up to `k` (chunk id, distance) pairs ordered by ascending distance,
    /// ties broken by insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, QueryError> {
        if !self.sealed {
            return Err(QueryError::IndexNotBuilt);
        }
        if self.entries.is_empty() {
            return Err(QueryError::IndexEmpty);
        }
        if query.len() != self.dimensions {
            return Err(QueryError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, self.metric_distance(query, &entry.vector)))
            .collect();

        scored.sort_by(|left, right| {
            left.1
                .total_cmp(&right.1)
                .then_with(|| left.0.cmp(&right.0))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, distance)| (self.entries[position].chunk_id.clone(), distance))
            .collect())
    }

    fn metric_distance(&self, left: &[f32], right: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::SquaredL2 => squared_l2(left, right),
            DistanceMetric::Cosine => cosine_distance(left, right),
        }
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            metric: self.metric,
            dimensions: self.dimensions,
            entries: self.entries.clone(),
        }
    }

    /// Rebuild a sealed, search-ready index from its serialized form. Fails
    /// fast if the snapshot's metric or dimension disagrees with the session
    /// configuration.
    pub fn from_snapshot(
        snapshot: IndexSnapshot,
        expected_metric: DistanceMetric,
        expected_dimensions: usize,
    ) -> Result<Self, BuildError> {
        if snapshot.metric != expected_metric {
            return Err(BuildError::MetricMismatch {
                expected: expected_metric.identifier().to_string(),
                got: snapshot.metric.identifier().to_string(),
            });
        }
        if snapshot.dimensions != expected_dimensions {
            return Err(BuildError::DimensionMismatch {
                expected: expected_dimensions,
                got: snapshot.dimensions,
            });
        }

        let mut index = Self::new(snapshot.metric, snapshot.dimensions);
        for entry in snapshot.entries {
            index.insert(entry.chunk_id, entry.vector)?;
        }
        index.seal();
        Ok(index)
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

/// `1 - cos(a, b)`, in `[0, 2]`. Zero-magnitude vectors are maximally distant.
fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let norm_left: f32 = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let norm_right: f32 = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm_left == 0.0 || norm_right == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_left * norm_right)
}
