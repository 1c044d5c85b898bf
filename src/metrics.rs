//! Prometheus-compatible metrics for storyline runs.
//!
//! Counters are process-global and cumulative across runs; per-run numbers
//! live in the run reports.

use prometheus::{
    self, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::model::EmbeddingSource;

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get or initialize the global metrics instance.
pub fn get_metrics() -> Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new())).clone()
}

/// Histogram buckets for run and request durations (in seconds).
fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ]
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("failed to create counter");
    registry
        .register(Box::new(counter.clone()))
        .expect("failed to register metric");
    counter
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Histogram {
    let histogram =
        Histogram::with_opts(HistogramOpts::new(name, help).buckets(default_duration_buckets()))
            .expect("failed to create histogram");
    registry
        .register(Box::new(histogram.clone()))
        .expect("failed to register metric");
    histogram
}

/// All storyline metrics.
pub struct Metrics {
    /// Prometheus registry for all metrics.
    pub registry: Registry,

    // =========================================================================
    // Embedding
    // =========================================================================
    /// Provider calls issued, retries included.
    pub embedding_requests_total: IntCounter,
    /// Provider calls answered with a rate-limit error.
    pub embedding_rate_limited_total: IntCounter,
    /// Batches that fell back to per-item calls.
    pub embedding_fallback_batches_total: IntCounter,
    /// Items that received a sentinel vector.
    pub embedding_sentinel_vectors_total: IntCounter,
    /// Provider call duration in seconds.
    pub embedding_duration_seconds: Histogram,

    // =========================================================================
    // Clustering
    // =========================================================================
    /// Clusters produced.
    pub clusters_formed_total: IntCounter,
    /// Items labelled as noise by the density strategy.
    pub cluster_noise_items_total: IntCounter,
    /// Clustering run duration in seconds.
    pub clustering_duration_seconds: Histogram,

    // =========================================================================
    // User embeddings
    // =========================================================================
    /// User embeddings produced, by source.
    pub user_embeddings_total: IntCounterVec,
    /// Users whose aggregation or upsert failed.
    pub user_embedding_failures_total: IntCounter,
    /// User embedding run duration in seconds.
    pub user_run_duration_seconds: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let embedding_requests_total = counter(
            &registry,
            "storyline_embedding_requests_total",
            "Total number of embedding provider calls",
        );
        let embedding_rate_limited_total = counter(
            &registry,
            "storyline_embedding_rate_limited_total",
            "Total number of rate-limited embedding provider calls",
        );
        let embedding_fallback_batches_total = counter(
            &registry,
            "storyline_embedding_fallback_batches_total",
            "Total number of batches retried item by item",
        );
        let embedding_sentinel_vectors_total = counter(
            &registry,
            "storyline_embedding_sentinel_vectors_total",
            "Total number of items given a sentinel embedding",
        );
        let embedding_duration_seconds = histogram(
            &registry,
            "storyline_embedding_duration_seconds",
            "Embedding provider call duration in seconds",
        );

        let clusters_formed_total = counter(
            &registry,
            "storyline_clusters_formed_total",
            "Total number of story clusters formed",
        );
        let cluster_noise_items_total = counter(
            &registry,
            "storyline_cluster_noise_items_total",
            "Total number of articles labelled as noise",
        );
        let clustering_duration_seconds = histogram(
            &registry,
            "storyline_clustering_duration_seconds",
            "Clustering run duration in seconds",
        );

        let user_embeddings_total = IntCounterVec::new(
            Opts::new(
                "storyline_user_embeddings_total",
                "Total number of user embeddings produced",
            ),
            &["source"],
        )
        .expect("failed to create counter");
        registry
            .register(Box::new(user_embeddings_total.clone()))
            .expect("failed to register metric");
        let user_embedding_failures_total = counter(
            &registry,
            "storyline_user_embedding_failures_total",
            "Total number of users whose embedding could not be produced or stored",
        );
        let user_run_duration_seconds = histogram(
            &registry,
            "storyline_user_run_duration_seconds",
            "User embedding run duration in seconds",
        );

        Self {
            registry,
            embedding_requests_total,
            embedding_rate_limited_total,
            embedding_fallback_batches_total,
            embedding_sentinel_vectors_total,
            embedding_duration_seconds,
            clusters_formed_total,
            cluster_noise_items_total,
            clustering_duration_seconds,
            user_embeddings_total,
            user_embedding_failures_total,
            user_run_duration_seconds,
        }
    }

    /// Count one produced user embedding.
    pub fn record_user_embedding(&self, source: EmbeddingSource) {
        self.user_embeddings_total
            .with_label_values(&[source_label(source)])
            .inc();
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Snapshot of the counters for serialization.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let by_source = |source| {
            self.user_embeddings_total
                .with_label_values(&[source_label(source)])
                .get()
        };
        MetricsSnapshot {
            embedding_requests_total: self.embedding_requests_total.get(),
            embedding_rate_limited_total: self.embedding_rate_limited_total.get(),
            embedding_fallback_batches_total: self.embedding_fallback_batches_total.get(),
            embedding_sentinel_vectors_total: self.embedding_sentinel_vectors_total.get(),
            clusters_formed_total: self.clusters_formed_total.get(),
            cluster_noise_items_total: self.cluster_noise_items_total.get(),
            user_embeddings_interactions: by_source(EmbeddingSource::Interactions),
            user_embeddings_section_preference: by_source(EmbeddingSource::SectionPreference),
            user_embeddings_global_mean: by_source(EmbeddingSource::GlobalMean),
            user_embedding_failures_total: self.user_embedding_failures_total.get(),
            clustering_duration: HistogramSnapshot::from_prometheus(
                &self.clustering_duration_seconds,
            ),
            user_run_duration: HistogramSnapshot::from_prometheus(&self.user_run_duration_seconds),
        }
    }

    /// Start a timer that records duration to a histogram when dropped.
    pub fn start_timer(histogram: &Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram: histogram.clone(),
            start: Instant::now(),
        }
    }
}

fn source_label(source: EmbeddingSource) -> &'static str {
    match source {
        EmbeddingSource::Interactions => "interactions",
        EmbeddingSource::SectionPreference => "section_preference",
        EmbeddingSource::GlobalMean => "global_mean",
    }
}

/// Timer that records duration to a histogram when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}

/// Snapshot of the storyline counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub embedding_requests_total: u64,
    pub embedding_rate_limited_total: u64,
    pub embedding_fallback_batches_total: u64,
    pub embedding_sentinel_vectors_total: u64,
    pub clusters_formed_total: u64,
    pub cluster_noise_items_total: u64,
    pub user_embeddings_interactions: u64,
    pub user_embeddings_section_preference: u64,
    pub user_embeddings_global_mean: u64,
    pub user_embedding_failures_total: u64,
    pub clustering_duration: HistogramSnapshot,
    pub user_run_duration: HistogramSnapshot,
}

/// Snapshot of a histogram for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub mean: Option<f64>,
}

impl HistogramSnapshot {
    /// Create a snapshot from a prometheus histogram.
    pub fn from_prometheus(h: &Histogram) -> Self {
        let sample_count = h.get_sample_count();
        let sample_sum = h.get_sample_sum();
        let mean = if sample_count > 0 {
            Some(sample_sum / sample_count as f64)
        } else {
            None
        };
        Self {
            count: sample_count,
            sum: sample_sum,
            mean,
        }
    }
}
