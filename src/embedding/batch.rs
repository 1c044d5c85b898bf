//! Token-budgeted batching with rate limiting and fallback for embedding providers.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbedTextMode, EmbeddingConfig};
use crate::error::{EmbeddingError, Result, StorylineError};
use crate::metrics::{get_metrics, Metrics};
use crate::model::Article;
use crate::vector::sentinel;

use super::EmbeddingProvider;

/// Upper bound on a single retry backoff.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff for the given zero-based retry attempt, capped at
/// [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    u32::try_from(attempt)
        .ok()
        .and_then(|exp| 2u32.checked_pow(exp))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

/// Check if an error is a rate limit error.
fn is_rate_limit_error(error: &StorylineError) -> bool {
    matches!(error, StorylineError::Embedding(EmbeddingError::RateLimited))
}

/// Estimated token count of a text: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Split items into consecutive batches under an item cap and a token budget.
///
/// Walks left to right. An item that would push the running estimate over
/// `max_tokens`, or arrives when the batch already holds `max_items`, closes
/// the current batch and opens the next one. An item larger than the whole
/// budget therefore travels alone.
pub fn plan_batches(token_counts: &[usize], max_items: usize, max_tokens: usize) -> Vec<Range<usize>> {
    let max_items = max_items.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut current_tokens = 0;

    for (i, &tokens) in token_counts.iter().enumerate() {
        let len = i - start;
        if len > 0 && (current_tokens + tokens > max_tokens || len >= max_items) {
            batches.push(start..i);
            start = i;
            current_tokens = tokens;
        } else {
            current_tokens += tokens;
        }
    }

    if start < token_counts.len() {
        batches.push(start..token_counts.len());
    }
    batches
}

/// Configuration for batch processing.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of texts per provider call
    pub max_items: usize,
    /// Estimated token budget per provider call
    pub max_tokens: usize,
    /// Output dimension requested from the provider
    pub dimension: usize,
    /// Which article fields are embedded
    pub text_mode: EmbedTextMode,
    /// Characters of article text submitted
    pub max_content_length: usize,
    /// Requests per second limit (0 = no limit)
    pub requests_per_second: u32,
    /// Maximum number of retries on rate limiting
    pub max_retries: usize,
    /// Base delay between retries
    pub retry_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

impl BatchConfig {
    /// Derive batch settings from the embedding configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_items: config.max_batch_size,
            max_tokens: config.max_batch_tokens,
            dimension: config.dimension,
            text_mode: config.text_mode,
            max_content_length: config.max_content_length,
            requests_per_second: config.requests_per_second,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Set the item cap.
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Set the token budget.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the output dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set rate limiting.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Summary of one batching run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Items submitted.
    pub items: usize,
    /// Planned batches.
    pub batches: usize,
    /// Batches that fell back to per-item calls.
    pub fallback_batches: usize,
    /// Items that received a sentinel vector.
    pub sentinel_items: usize,
}

/// Vectors in input order plus the run summary.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub stats: BatchStats,
}

/// Splits texts into provider calls and turns provider failures into
/// per-item retries and sentinel vectors.
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
    config: BatchConfig,
    metrics: Arc<Metrics>,
}

impl EmbeddingBatcher {
    /// Create a new batcher with the given provider and configuration.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: BatchConfig) -> Self {
        let rate_limiter = NonZeroU32::new(config.requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        Self {
            provider,
            rate_limiter,
            config,
            metrics: get_metrics(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Embed every text. Never fails: unrecoverable items get sentinel vectors.
    pub async fn embed_texts(&self, texts: &[String]) -> BatchOutput {
        let token_counts: Vec<usize> = texts.iter().map(|t| estimate_tokens(t)).collect();
        let plan = plan_batches(&token_counts, self.config.max_items, self.config.max_tokens);

        let mut stats = BatchStats {
            items: texts.len(),
            batches: plan.len(),
            ..Default::default()
        };
        let mut embeddings = Vec::with_capacity(texts.len());

        for (index, range) in plan.into_iter().enumerate() {
            let batch = &texts[range];
            tracing::debug!(batch = index, size = batch.len(), provider = self.provider.name(), "Embedding batch");

            match self.embed_batch(batch).await {
                Ok(vectors) => embeddings.extend(vectors),
                Err(e) if batch.len() > 1 => {
                    tracing::warn!(
                        batch = index,
                        size = batch.len(),
                        error = %e,
                        "Batch embedding failed, embedding items individually"
                    );
                    stats.fallback_batches += 1;
                    self.metrics.embedding_fallback_batches_total.inc();

                    for text in batch {
                        let vector = self.embed_single(text, &mut stats).await;
                        embeddings.push(vector);
                    }
                }
                Err(e) => {
                    tracing::warn!(batch = index, error = %e, "Embedding failed, using sentinel vector");
                    embeddings.push(self.sentinel(&mut stats));
                }
            }
        }

        if stats.sentinel_items > 0 || stats.fallback_batches > 0 {
            tracing::warn!(
                items = stats.items,
                fallback_batches = stats.fallback_batches,
                sentinel_items = stats.sentinel_items,
                "Embedding finished with fallbacks"
            );
        } else {
            tracing::info!(items = stats.items, batches = stats.batches, "Embedding finished");
        }

        BatchOutput { embeddings, stats }
    }

    /// Embed the articles that have no embedding yet, attaching the results.
    pub async fn embed_articles(&self, articles: &mut [Article]) -> BatchStats {
        let pending: Vec<usize> = articles
            .iter()
            .enumerate()
            .filter(|(_, a)| a.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        let texts: Vec<String> = pending
            .iter()
            .map(|&i| {
                articles[i].embed_text(self.config.text_mode, self.config.max_content_length)
            })
            .collect();

        let output = self.embed_texts(&texts).await;
        for (i, vector) in pending.into_iter().zip(output.embeddings) {
            articles[i].embedding = Some(vector);
        }
        output.stats
    }

    async fn embed_single(&self, text: &String, stats: &mut BatchStats) -> Vec<f32> {
        match self.embed_batch(std::slice::from_ref(text)).await {
            Ok(vectors) => match vectors.into_iter().next() {
                Some(vector) => vector,
                None => self.sentinel(stats),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Item embedding failed, using sentinel vector");
                self.sentinel(stats)
            }
        }
    }

    fn sentinel(&self, stats: &mut BatchStats) -> Vec<f32> {
        stats.sentinel_items += 1;
        self.metrics.embedding_sentinel_vectors_total.inc();
        sentinel(self.config.dimension)
    }

    /// One provider call, checked for count and dimension.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embed_with_retry(texts).await?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            }
            .into());
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.config.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.config.dimension,
                got: bad.len(),
            }
            .into());
        }
        Ok(vectors)
    }

    /// Call the provider, backing off exponentially while it reports rate limiting.
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;

        loop {
            // Wait for rate limiter if configured
            if let Some(ref limiter) = self.rate_limiter {
                limiter.until_ready().await;
            }

            self.metrics.embedding_requests_total.inc();
            let timer = Metrics::start_timer(&self.metrics.embedding_duration_seconds);
            let result = self.provider.embed(texts, self.config.dimension).await;
            drop(timer);

            match result {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) if is_rate_limit_error(&e) && attempt < self.config.max_retries => {
                    self.metrics.embedding_rate_limited_total.inc();
                    let delay = backoff_delay(self.config.retry_delay, attempt);

                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Embedding request rate limited, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if is_rate_limit_error(&e) {
                        self.metrics.embedding_rate_limited_total.inc();
                    }
                    return Err(e);
                }
            }
        }
    }
}
