use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Distance metric fixed at index-build time. Mixing metrics within one
/// session is disallowed; snapshots record the identifier so a reload with a
/// different metric fails fast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    SquaredL2,
    Cosine,
}

impl DistanceMetric {
    pub fn identifier(&self) -> &'static str {
        match self {
            DistanceMetric::SquaredL2 => "squared_l2",
            DistanceMetric::Cosine => "cosine",
        }
    }

    pub fn parse(value: &str) -> Result<Self, BuildError> {
        match value {
            "squared_l2" | "l2" => Ok(DistanceMetric::SquaredL2),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(BuildError::InvalidConfig(format!(
                "unknown distance metric: {other}"
            ))),
        }
    }
}

/// Immutable per-session configuration, validated once at session build and
/// passed by reference to every component. Invalid combinations never reach
/// query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub embedding_model_id: String,
    pub distance_metric: DistanceMetric,
    pub retrieval_k: usize,
    /// Primary threshold: retrieved candidates farther than this are dropped.
    pub distance_threshold: f32,
    /// Hard cutoff for the safety fallback: if even the best candidate is
    /// farther than this, evidence is legitimately empty.
    pub absolute_distance_cutoff: f32,
    pub max_query_tokens: usize,
    pub max_context_tokens: usize,
    pub max_output_tokens: usize,
    pub generation_retry_count: u32,
    pub generation_model: String,
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 500,
            overlap_tokens: 100,
            embedding_model_id: "char-ngram-128".to_string(),
            distance_metric: DistanceMetric::Cosine,
            retrieval_k: 4,
            distance_threshold: 1.2,
            absolute_distance_cutoff: 1.6,
            max_query_tokens: 512,
            max_context_tokens: 2_000,
            max_output_tokens: 512,
            generation_retry_count: 3,
            generation_model: "llama-3.3-70b-versatile".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_chunk_tokens == 0 {
            return Err(BuildError::InvalidConfig(
                "max_chunk_tokens must be >= 1".to_string(),
            ));
        }
        if self.overlap_tokens >= self.max_chunk_tokens {
            return Err(BuildError::InvalidConfig(format!(
                "overlap_tokens {} must be smaller than max_chunk_tokens {}",
                self.overlap_tokens, self.max_chunk_tokens
            )));
        }
        if self.retrieval_k == 0 {
            return Err(BuildError::InvalidConfig(
                "retrieval_k must be >= 1".to_string(),
            ));
        }
        if !(self.distance_threshold > 0.0) {
            return Err(BuildError::InvalidConfig(
                "distance_threshold must be greater than 0".to_string(),
            ));
        }
        if self.absolute_distance_cutoff < self.distance_threshold {
            return Err(BuildError::InvalidConfig(format!(
                "absolute_distance_cutoff {} must be at least distance_threshold {}",
                self.absolute_distance_cutoff, self.distance_threshold
            )));
        }
        if self.max_query_tokens == 0
            || self.max_context_tokens == 0
            || self.max_output_tokens == 0
        {
            return Err(BuildError::InvalidConfig(
                "token limits must be positive".to_string(),
            ));
        }
        if self.generation_retry_count == 0 {
            return Err(BuildError::InvalidConfig(
                "generation_retry_count must be >= 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(BuildError::InvalidConfig(
                "request_timeout_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SessionConfig::default()
            .validate()
            .expect("default configuration should validate");
    }

    #[test]
    fn overlap_at_or_above_chunk_size_is_rejected() {
        let config = SessionConfig {
            max_chunk_tokens: 100,
            overlap_tokens: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cutoff_below_threshold_is_rejected() {
        let config = SessionConfig {
            distance_threshold: 1.0,
            absolute_distance_cutoff: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_count_is_rejected() {
        let config = SessionConfig {
            generation_retry_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn metric_identifier_round_trips() {
        for metric in [DistanceMetric::SquaredL2, DistanceMetric::Cosine] {
            let parsed = DistanceMetric::parse(metric.identifier()).expect("identifier parses");
            assert_eq!(parsed, metric);
        }
    }
}
