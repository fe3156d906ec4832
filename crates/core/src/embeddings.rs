use crate::error::{BuildError, ModelUnavailable};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Maps text to a fixed-dimension dense vector. Implementations must be
/// deterministic: the same input yields the same vector, so re-querying is
/// reproducible. A backend failure surfaces as [`ModelUnavailable`] and aborts
/// the indexing or query operation in progress.
pub trait Embedder {
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, ModelUnavailable>;
}

/// Local hashed character-trigram embedder. Trigrams are FNV-1a hashed into a
/// fixed number of buckets and the result is L2-normalized, so identical text
/// embeds to an identical unit vector with no external model dependency.
#[derive(Debug, Clone)]
pub struct HashedNgramEmbedder {
    model_id: String,
    dimensions: usize,
}

impl HashedNgramEmbedder {
    /// Parse a model id of the form `char-ngram-<dimensions>`.
    pub fn from_model_id(model_id: &str) -> Result<Self, BuildError> {
        let dimensions = model_id
            .strip_prefix("char-ngram-")
            .and_then(|suffix| suffix.parse::<usize>().ok())
            .filter(|dims| *dims > 0)
            .ok_or_else(|| {
                BuildError::InvalidConfig(format!(
                    "unknown embedding model id: {model_id} (expected char-ngram-<dimensions>)"
                ))
            })?;

        Ok(Self {
            model_id: model_id.to_string(),
            dimensions,
        })
    }
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self {
            model_id: format!("char-ngram-{DEFAULT_EMBEDDING_DIMENSIONS}"),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for HashedNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ModelUnavailable> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        if chars.len() < 3 {
            let token: String = chars.iter().collect();
            let bucket = (fnv1a(&token) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        } else {
            for window in chars.windows(3) {
                let token = window.iter().collect::<String>();
                let bucket = (fnv1a(&token) % vector.len() as u64) as usize;
                vector[bucket] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}
