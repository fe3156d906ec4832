use crate::chunking::{count_tokens, truncate_at_token_boundary};
use crate::config::SessionConfig;
use crate::error::{BuildError, GenerationError, QueryError};
use crate::models::{AskOutcome, EvidenceItem, GroundedAnswer, Refusal, RefusalReason};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

const GROUNDED_SYSTEM_PROMPT: &str = "\
You are a document-grounded assistant.
Answer the question using ONLY the provided context.

If the context contains information that partially or fully answers the question:
- Answer using only that information.
- Be concise and factual.
- Clearly state if some details are not specified.

Only respond with: \"I cannot answer based on the provided document.\" IF AND ONLY IF:
- The context is completely unrelated to the question.

Rules:
- Do not use outside knowledge.
- Do not guess or infer missing details.
- Cite the bracketed chunk keys you used, e.g. [a1b2c3d4].

Answer format:
- Direct answer in 2-5 sentences.
- If applicable, add: \"The document does not specify ...\"
- End with citations in brackets.";

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Fully assembled prompt for one generation call.
#[derive(Debug, Clone)]
pub struct GroundedPrompt {
    pub system: String,
    pub context: String,
    pub question: String,
}

/// Seam to the generation backend. One call is one attempt; the grounded
/// generator owns the retry policy.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &GroundedPrompt,
        max_output_tokens: usize,
    ) -> Result<String, GenerationError>;
}

/// Predicate over model output deciding whether it is the model's own
/// refusal. Pluggable so the recognition heuristic can evolve without
/// touching the generator.
pub trait RefusalDetector: Send + Sync {
    fn is_refusal(&self, output: &str) -> bool;
}

/// Default detector matching the refusal phrases the grounded prompt asks
/// the model to use.
pub struct PhrasePatternDetector {
    patterns: Vec<Regex>,
}

impl PhrasePatternDetector {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }
}

impl Default for PhrasePatternDetector {
    fn default() -> Self {
        let patterns = [
            r"(?i)cannot answer based on the provided document",
            r"(?i)not (found|present) in the provided (document|context)",
            r"(?i)context (is|appears) (completely )?unrelated",
            r"(?i)does not contain (enough |sufficient |any )?(information|details)",
        ]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("refusal pattern compiles"))
        .collect();
        Self { patterns }
    }
}

impl RefusalDetector for PhrasePatternDetector {
    fn is_refusal(&self, output: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(output))
    }
}

/// Chat-completions client for the Groq OpenAI-compatible endpoint.
pub struct GroqChatClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GroqChatClient {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.groq.com/openai/v1/chat/completions";

    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        config: &SessionConfig,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: config.generation_model.clone(),
            client: reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()?,
        })
    }

    /// Read `GROQ_API_KEY` (and optional `GROQ_API_URL`) from the environment.
    pub fn from_env(config: &SessionConfig) -> Result<Self, BuildError> {
        let api_key = std::env::var("GROQ_API_KEY").map_err(|_| {
            BuildError::InvalidConfig("GROQ_API_KEY environment variable is required".to_string())
        })?;
        let endpoint =
            std::env::var("GROQ_API_URL").unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint, api_key, config)
    }
}

#[async_trait]
impl GenerationClient for GroqChatClient {
    async fn complete(
        &self,
        prompt: &GroundedPrompt,
        max_output_tokens: usize,
    ) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": 0.1,
                "max_tokens": max_output_tokens,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "system", "content": format!("Context:\n{}", prompt.context) },
                    { "role": "user", "content": format!("Question:\n{}", prompt.question) },
                ],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationError::BackendResponse {
                backend: "groq".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| GenerationError::BackendResponse {
                backend: "groq".to_string(),
                details: "response has no message content".to_string(),
            })
    }
}

/// Short key used in citation markers, both in the prompt and when matching
/// references in the model output.
pub fn citation_key(chunk_id: &str) -> &str {
    &chunk_id[..chunk_id.len().min(8)]
}

/// Decides between a grounded answer and an explicit refusal. Never calls the
/// backend on empty evidence, enforces the context token budget before each
/// call, and retries backend failures with bounded backoff.
pub struct GroundedGenerator<C: GenerationClient> {
    client: C,
    detector: Box<dyn RefusalDetector>,
}

impl<C: GenerationClient> GroundedGenerator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            detector: Box::new(PhrasePatternDetector::default()),
        }
    }

    pub fn with_detector(client: C, detector: Box<dyn RefusalDetector>) -> Self {
        Self { client, detector }
    }

    pub async fn generate(
        &self,
        question: &str,
        evidence: &[EvidenceItem],
        config: &SessionConfig,
    ) -> Result<AskOutcome, QueryError> {
        if evidence.is_empty() {
            info!("no evidence retrieved, refusing without a model call");
            return Ok(AskOutcome::Refusal(Refusal::new(RefusalReason::NoEvidence)));
        }

        let (context, included_ids) = match build_context(question, evidence, config) {
            Some(built) => built,
            None => {
                warn!("context budget too small for any evidence, refusing");
                return Ok(AskOutcome::Refusal(Refusal::new(
                    RefusalReason::ContextOverflow,
                )));
            }
        };

        let prompt = GroundedPrompt {
            system: GROUNDED_SYSTEM_PROMPT.to_string(),
            context,
            question: question.to_string(),
        };

        let attempts = config.generation_retry_count;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.client.complete(&prompt, config.max_output_tokens).await {
                Ok(output) => {
                    if self.detector.is_refusal(&output) {
                        info!("model declined to answer beyond the context");
                        return Ok(AskOutcome::Refusal(Refusal::new(
                            RefusalReason::ModelDeclined,
                        )));
                    }
                    let citations = cited_chunk_ids(&output, evidence, &included_ids);
                    return Ok(AskOutcome::Answer(GroundedAnswer {
                        text: output,
                        citations,
                    }));
                }
                Err(error) => {
                    warn!(attempt, total = attempts, error = %error, "generation attempt failed");
                    last_error = error.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    }
                }
            }
        }

        Err(QueryError::GenerationUnavailable {
            attempts,
            details: last_error,
        })
    }
}

/// Assemble the evidence context under the token budget. Lowest-ranked items
/// are dropped first; if even the top item overflows, its text is truncated
/// at a token boundary. Returns `None` when not a single evidence token fits.
fn build_context(
    question: &str,
    evidence: &[EvidenceItem],
    config: &SessionConfig,
) -> Option<(String, Vec<String>)> {
    let fixed_tokens = count_tokens(GROUNDED_SYSTEM_PROMPT) + count_tokens(question);
    let budget = config.max_context_tokens.checked_sub(fixed_tokens)?;

    let mut parts: Vec<String> = Vec::new();
    let mut included_ids: Vec<String> = Vec::new();
    let mut used_tokens = 0usize;

    for item in evidence {
        let segment = format_segment(item, &item.chunk.text);
        let segment_tokens = count_tokens(&segment);

        if used_tokens + segment_tokens <= budget {
            parts.push(segment);
            included_ids.push(item.chunk.chunk_id.clone());
            used_tokens += segment_tokens;
            continue;
        }

        if parts.is_empty() {
            // Even the best item overflows: keep as much of it as fits.
            let header_tokens = count_tokens(&format_segment(item, ""));
            let available = budget.checked_sub(header_tokens)?;
            if available == 0 {
                return None;
            }
            let truncated = truncate_at_token_boundary(&item.chunk.text, available);
            warn!(
                chunk_id = %item.chunk.chunk_id,
                kept_tokens = available,
                "truncating best evidence chunk to fit context budget"
            );
            parts.push(format_segment(item, truncated));
            included_ids.push(item.chunk.chunk_id.clone());
        }
        break;
    }

    if parts.is_empty() {
        return None;
    }
    Some((parts.join("\n\n"), included_ids))
}

fn format_segment(item: &EvidenceItem, text: &str) -> String {
    format!(
        "[{key}] pages {start}-{end}, score {score:.4}\n{text}",
        key = citation_key(&item.chunk.chunk_id),
        start = item.chunk.page_start,
        end = item.chunk.page_end,
        score = item.score,
    )
}

/// Chunk ids the model actually referenced, in evidence rank order. When the
/// output mentions no citation key at all, every included id is cited so the
/// answer is never presented without provenance.
fn cited_chunk_ids(output: &str, evidence: &[EvidenceItem], included_ids: &[String]) -> Vec<String> {
    let referenced: Vec<String> = evidence
        .iter()
        .filter(|item| included_ids.contains(&item.chunk.chunk_id))
        .filter(|item| output.contains(citation_key(&item.chunk.chunk_id)))
        .map(|item| item.chunk.chunk_id.clone())
        .collect();

    if referenced.is_empty() {
        included_ids.to_vec()
    } else {
        referenced
    }
}
