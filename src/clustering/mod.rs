//! Story clustering for articles.
//!
//! # Supported Strategies
//!
//! - **Threshold**: greedy anchor-based grouping on cosine similarity
//! - **Density**: HDBSCAN over L2-normalized embeddings, with noise
//!
//! Articles without a usable embedding are filtered out before either
//! strategy runs and are reported separately from noise.

mod density;
mod threshold;

pub use density::{DensityClusterer, HdbscanParams};
pub use threshold::ThresholdClusterer;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::{ClusteringConfig, ClusteringStrategy};
use crate::error::Result;
use crate::model::{Article, Cluster, ItemId};
use crate::vector::{check_dimension, l2_norm};

/// Result of one clustering pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOutcome {
    /// Strategy that produced the clusters.
    pub strategy: ClusteringStrategy,
    /// Clusters ordered by their first member's input position.
    pub clusters: Vec<Cluster>,
    /// Valid articles left out of every cluster, in input order.
    pub noise: Vec<ItemId>,
    /// Articles skipped for a missing or placeholder embedding, in input order.
    pub filtered: Vec<ItemId>,
}

impl ClusteringOutcome {
    /// Number of articles placed in a cluster.
    pub fn clustered_items(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }
}

/// Trait for clustering implementations.
pub trait ArticleClusterer: Send + Sync {
    /// Group articles into story clusters.
    fn cluster(&self, articles: &[Article]) -> Result<ClusteringOutcome>;

    /// Strategy implemented by this clusterer.
    fn strategy(&self) -> ClusteringStrategy;

    /// Get the name of this clusterer.
    fn name(&self) -> &str;
}

/// Factory for creating clusterers based on configuration.
pub struct ClustererFactory;

impl ClustererFactory {
    /// Create a clusterer based on configuration.
    pub fn create(config: &ClusteringConfig) -> Result<Box<dyn ArticleClusterer>> {
        match config.strategy {
            ClusteringStrategy::Threshold => Ok(Box::new(ThresholdClusterer::new(
                config.similarity_threshold,
            )?)),
            ClusteringStrategy::Density => {
                let params = HdbscanParams::from_config(config);
                Ok(Box::new(DensityClusterer::new(params)?))
            }
        }
    }
}

/// Articles with usable embeddings, split from the ones without.
pub(crate) struct ValidItems<'a> {
    pub ids: Vec<ItemId>,
    pub vectors: Vec<&'a [f32]>,
    pub filtered: Vec<ItemId>,
}

/// Separate usable embeddings from missing or placeholder ones.
///
/// All usable embeddings must share the first one's length.
pub(crate) fn partition_valid(articles: &[Article]) -> Result<ValidItems<'_>> {
    let mut valid = ValidItems {
        ids: Vec::with_capacity(articles.len()),
        vectors: Vec::with_capacity(articles.len()),
        filtered: Vec::new(),
    };

    for article in articles {
        match article.valid_embedding() {
            Some(embedding) => {
                if let Some(first) = valid.vectors.first() {
                    check_dimension(first.len(), embedding.len())?;
                }
                valid.ids.push(article.id);
                valid.vectors.push(embedding);
            }
            None => valid.filtered.push(article.id),
        }
    }

    if !valid.filtered.is_empty() {
        tracing::warn!(
            filtered = valid.filtered.len(),
            "Skipping articles without a usable embedding"
        );
    }
    Ok(valid)
}

/// Row-normalized `n x d` matrix of the given vectors.
pub(crate) fn normalized_matrix(vectors: &[&[f32]]) -> Array2<f64> {
    let dim = vectors.first().map_or(0, |v| v.len());
    let mut matrix = Array2::zeros((vectors.len(), dim));

    for (mut row, v) in matrix.rows_mut().into_iter().zip(vectors) {
        let norm = l2_norm(v);
        if norm > 0.0 {
            for (slot, x) in row.iter_mut().zip(v.iter()) {
                *slot = *x as f64 / norm;
            }
        }
    }
    matrix
}

/// Turn groups of input positions into clusters ordered by first member.
pub(crate) fn into_clusters(mut groups: Vec<Vec<usize>>, ids: &[ItemId]) -> Vec<Cluster> {
    for group in &mut groups {
        group.sort_unstable();
    }
    groups.retain(|g| !g.is_empty());
    groups.sort_by_key(|g| g[0]);

    groups
        .into_iter()
        .enumerate()
        .map(|(cluster_id, group)| Cluster {
            cluster_id,
            item_ids: group.into_iter().map(|i| ids[i]).collect(),
        })
        .collect()
}
