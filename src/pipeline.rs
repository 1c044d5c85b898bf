//! End-to-end runs: story clustering and user embedding generation.
//!
//! Each run fetches a fresh view from its collaborators and keeps no state
//! between runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clustering::{ArticleClusterer, ClustererFactory};
use crate::config::{ClusteringStrategy, Config, SectionMeanSource, UserEmbeddingConfig};
use crate::embedding::{create_batcher, BatchStats, EmbeddingBatcher};
use crate::error::{ConfigError, Result};
use crate::metrics::{get_metrics, Metrics};
use crate::model::{
    Cluster, EmbeddingSource, InteractionKind, ItemId, SectionId, SectionPreferences,
    UserEmbedding, UserId, UserInteractions,
};
use crate::store::{InteractionStore, ItemStore, ResultSink, SectionMeanStore};
use crate::users::{section_means_from_samples, EmbeddingContext, UserEmbeddingAggregator};

/// Summary of one clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRunReport {
    pub strategy: ClusteringStrategy,
    /// Unprocessed articles fetched.
    pub total_items: usize,
    /// Articles embedded during this run.
    pub embedded: usize,
    /// Articles that received a sentinel vector during this run.
    pub sentinel: usize,
    /// Articles placed in a cluster.
    pub clustered: usize,
    /// Valid articles left out of every cluster.
    pub noise: Vec<ItemId>,
    /// Articles skipped for lack of a usable embedding.
    pub filtered: Vec<ItemId>,
    pub clusters: Vec<Cluster>,
    /// Clusters the sink rejected.
    pub failed_upserts: usize,
}

impl ClusterRunReport {
    fn empty(strategy: ClusteringStrategy) -> Self {
        Self {
            strategy,
            total_items: 0,
            embedded: 0,
            sentinel: 0,
            clustered: 0,
            noise: Vec::new(),
            filtered: Vec::new(),
            clusters: Vec::new(),
            failed_upserts: 0,
        }
    }
}

/// Embeds unprocessed articles, clusters them and records the clusters.
pub struct ClusteringPipeline {
    items: Arc<dyn ItemStore>,
    sink: Arc<dyn ResultSink>,
    clusterer: Box<dyn ArticleClusterer>,
    batcher: Option<EmbeddingBatcher>,
    metrics: Arc<Metrics>,
}

impl ClusteringPipeline {
    pub fn new(
        items: Arc<dyn ItemStore>,
        sink: Arc<dyn ResultSink>,
        clusterer: Box<dyn ArticleClusterer>,
    ) -> Self {
        Self {
            items,
            sink,
            clusterer,
            batcher: None,
            metrics: get_metrics(),
        }
    }

    /// Build the clusterer and, if a provider is configured, the batcher.
    pub fn from_config(
        config: &Config,
        items: Arc<dyn ItemStore>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let clusterer = ClustererFactory::create(&config.clustering)?;
        let mut pipeline = Self::new(items, sink, clusterer);
        pipeline.batcher = create_batcher(&config.embedding)?;
        Ok(pipeline)
    }

    /// Embed articles lacking an embedding with this batcher.
    pub fn with_batcher(mut self, batcher: EmbeddingBatcher) -> Self {
        self.batcher = Some(batcher);
        self
    }

    pub async fn run(&self) -> Result<ClusterRunReport> {
        let _timer = Metrics::start_timer(&self.metrics.clustering_duration_seconds);
        let strategy = self.clusterer.strategy();

        let mut articles = self.items.fetch_unprocessed_items().await?;
        if articles.is_empty() {
            tracing::info!("No unprocessed articles found");
            return Ok(ClusterRunReport::empty(strategy));
        }

        let stats = match &self.batcher {
            Some(batcher) => batcher.embed_articles(&mut articles).await,
            None => {
                let missing = articles.iter().filter(|a| a.embedding.is_none()).count();
                if missing > 0 {
                    tracing::warn!(missing, "No embedding provider configured, articles without embeddings are skipped");
                }
                BatchStats::default()
            }
        };

        let outcome = self.clusterer.cluster(&articles)?;
        self.metrics
            .clusters_formed_total
            .inc_by(outcome.clusters.len() as u64);
        self.metrics
            .cluster_noise_items_total
            .inc_by(outcome.noise.len() as u64);

        let mut failed_upserts = 0;
        for cluster in &outcome.clusters {
            tracing::debug!(cluster_id = cluster.cluster_id, items = ?cluster.item_ids, "Cluster formed");
            if let Err(e) = self.sink.upsert_cluster_result(cluster).await {
                tracing::warn!(cluster_id = cluster.cluster_id, error = %e, "Failed to store cluster");
                failed_upserts += 1;
            }
        }

        let report = ClusterRunReport {
            strategy,
            total_items: articles.len(),
            embedded: stats.items,
            sentinel: stats.sentinel_items,
            clustered: outcome.clustered_items(),
            noise: outcome.noise,
            filtered: outcome.filtered,
            clusters: outcome.clusters,
            failed_upserts,
        };

        tracing::info!(
            strategy = self.clusterer.name(),
            total_items = report.total_items,
            embedded = report.embedded,
            clusters = report.clusters.len(),
            noise = report.noise.len(),
            filtered = report.filtered.len(),
            "Clustering run finished"
        );
        Ok(report)
    }
}

/// Summary of one bulk user embedding run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRunReport {
    pub total_users: usize,
    /// Embeddings built from interactions.
    pub interactions: usize,
    /// Embeddings built from section preferences.
    pub section_preference: usize,
    /// Embeddings set to the global mean.
    pub global_mean: usize,
    /// Users for whom no embedding could be built.
    pub skipped: usize,
    /// Users whose aggregation or upsert failed.
    pub failed: usize,
    /// Embeddings accepted by the sink.
    pub upserted: usize,
}

impl UserRunReport {
    fn count(&mut self, source: EmbeddingSource) {
        match source {
            EmbeddingSource::Interactions => self.interactions += 1,
            EmbeddingSource::SectionPreference => self.section_preference += 1,
            EmbeddingSource::GlobalMean => self.global_mean += 1,
        }
    }
}

/// Computes user interest embeddings in bulk or for a single user.
///
/// Both paths run the same per-user aggregation; the bulk path only batches
/// the lookups.
pub struct UserEmbeddingPipeline {
    items: Arc<dyn ItemStore>,
    interactions: Arc<dyn InteractionStore>,
    sections: Arc<dyn SectionMeanStore>,
    sink: Arc<dyn ResultSink>,
    aggregator: UserEmbeddingAggregator,
    config: UserEmbeddingConfig,
    reference_time: Option<DateTime<Utc>>,
    metrics: Arc<Metrics>,
}

impl UserEmbeddingPipeline {
    pub fn new(
        config: &UserEmbeddingConfig,
        items: Arc<dyn ItemStore>,
        interactions: Arc<dyn InteractionStore>,
        sections: Arc<dyn SectionMeanStore>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            items,
            interactions,
            sections,
            sink,
            aggregator: UserEmbeddingAggregator::from_config(config),
            config: config.clone(),
            reference_time: None,
            metrics: get_metrics(),
        }
    }

    /// Measure the lookback window from `now` instead of the current time.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    /// Start of the interaction lookback window.
    ///
    /// Fails when the window reaches past the representable date range.
    pub fn since(&self) -> Result<DateTime<Utc>> {
        let now = self.reference_time.unwrap_or_else(Utc::now);
        Duration::try_days(i64::from(self.config.lookback_days))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "users.lookback_days = {} reaches past the supported date range",
                    self.config.lookback_days
                ))
                .into()
            })
    }

    /// Compute and store embeddings for every user.
    pub async fn run_all(&self) -> Result<UserRunReport> {
        let _timer = Metrics::start_timer(&self.metrics.user_run_duration_seconds);

        let user_ids = self.interactions.fetch_user_ids().await?;
        let mut report = UserRunReport {
            total_users: user_ids.len(),
            ..Default::default()
        };
        if user_ids.is_empty() {
            tracing::info!("No users found");
            return Ok(report);
        }

        let since = self.since()?;
        let mut per_user: HashMap<UserId, UserInteractions> = HashMap::new();
        for kind in InteractionKind::ALL {
            let by_user = self.interactions.fetch_interactions(kind, since).await?;
            tracing::debug!(kind = %kind, users = by_user.len(), "Fetched interactions");
            for (user_id, item_ids) in by_user {
                per_user.entry(user_id).or_default().of_mut(kind).extend(item_ids);
            }
        }

        let item_ids = unique_item_ids(per_user.values());
        let context = self.build_context(&item_ids).await?;
        let preferences = self.interactions.fetch_section_preferences(&user_ids).await?;
        let no_preferences = SectionPreferences::new();

        let mut embeddings = Vec::with_capacity(user_ids.len());
        for user_id in &user_ids {
            let interactions = per_user.remove(user_id).unwrap_or_default();
            let user_preferences = preferences.get(user_id).unwrap_or(&no_preferences);

            match self
                .aggregator
                .aggregate(*user_id, &interactions, user_preferences, &context)
            {
                Ok(Some(embedding)) => {
                    report.count(embedding.source);
                    self.metrics.record_user_embedding(embedding.source);
                    embeddings.push(embedding);
                }
                Ok(None) => {
                    tracing::debug!(user_id, "No embedding computable for user");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Failed to compute user embedding");
                    self.metrics.user_embedding_failures_total.inc();
                    report.failed += 1;
                }
            }
        }

        for chunk in embeddings.chunks(self.config.upsert_batch_size.max(1)) {
            match self.sink.upsert_user_embeddings(chunk).await {
                Ok(()) => report.upserted += chunk.len(),
                Err(e) => {
                    tracing::warn!(users = chunk.len(), error = %e, "Failed to store user embeddings");
                    self.metrics
                        .user_embedding_failures_total
                        .inc_by(chunk.len() as u64);
                    report.failed += chunk.len();
                }
            }
        }

        tracing::info!(
            total_users = report.total_users,
            interactions = report.interactions,
            section_preference = report.section_preference,
            global_mean = report.global_mean,
            skipped = report.skipped,
            failed = report.failed,
            "User embedding run finished"
        );
        Ok(report)
    }

    /// Recompute and store one user's embedding.
    ///
    /// Returns `None`, and stores nothing, when no path yields a vector.
    pub async fn recalculate_user(&self, user_id: UserId) -> Result<Option<UserEmbedding>> {
        let since = self.since()?;
        let mut interactions = UserInteractions::default();
        for kind in InteractionKind::ALL {
            *interactions.of_mut(kind) = self
                .interactions
                .fetch_user_interactions(user_id, kind, since)
                .await?;
        }

        let item_ids = unique_item_ids(std::iter::once(&interactions));
        let context = self.build_context(&item_ids).await?;
        let preferences = self
            .interactions
            .fetch_section_preferences(&[user_id])
            .await?
            .remove(&user_id)
            .unwrap_or_default();

        let embedding = self
            .aggregator
            .aggregate(user_id, &interactions, &preferences, &context)?;

        match &embedding {
            Some(embedding) => {
                self.sink.upsert_user_embedding(embedding).await?;
                self.metrics.record_user_embedding(embedding.source);
                tracing::info!(user_id, source = ?embedding.source, "User embedding recalculated");
            }
            None => tracing::info!(user_id, "No embedding computable for user"),
        }
        Ok(embedding)
    }

    async fn build_context(&self, item_ids: &[ItemId]) -> Result<EmbeddingContext> {
        let embeddings = self.items.fetch_embeddings_by_ids(item_ids).await?;
        let sections = self.items.fetch_sections_by_ids(item_ids).await?;
        let section_means = self.section_means().await?;
        EmbeddingContext::new(embeddings, sections, section_means)
    }

    async fn section_means(&self) -> Result<HashMap<SectionId, Vec<f32>>> {
        match self.config.section_means {
            SectionMeanSource::Precomputed => self.sections.fetch_section_means().await,
            SectionMeanSource::Sampled => {
                let samples = self
                    .sections
                    .fetch_section_sample_item_ids(self.config.section_sample_size)
                    .await?;
                let sample_ids: Vec<ItemId> = samples
                    .values()
                    .flatten()
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let embeddings = self.items.fetch_embeddings_by_ids(&sample_ids).await?;
                let means = section_means_from_samples(&samples, &embeddings)?;
                tracing::debug!(sections = means.len(), "Computed section means from samples");
                Ok(means)
            }
        }
    }
}

fn unique_item_ids<'a>(interactions: impl Iterator<Item = &'a UserInteractions>) -> Vec<ItemId> {
    interactions
        .flat_map(|i| i.item_ids())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
