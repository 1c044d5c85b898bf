//! Greedy anchor-based clustering on cosine similarity.

use crate::config::ClusteringStrategy;
use crate::error::{ClusterError, Result};
use crate::model::Article;

use super::{into_clusters, normalized_matrix, partition_valid, ArticleClusterer, ClusteringOutcome};

/// Groups each unassigned article with every unassigned article whose cosine
/// similarity to it reaches the threshold.
///
/// Similarity is measured to the anchor only, so membership is not
/// transitive. Articles are scanned in input order and the first anchor to
/// reach a neighbour keeps it. Every valid article ends up in exactly one
/// cluster; articles without neighbours become singletons.
#[derive(Debug, Clone)]
pub struct ThresholdClusterer {
    threshold: f32,
}

impl ThresholdClusterer {
    /// Create a clusterer with a cosine similarity threshold in `[-1, 1]`.
    pub fn new(threshold: f32) -> Result<Self> {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ClusterError::InvalidParameter(format!(
                "similarity threshold must be within [-1, 1], got {}",
                threshold
            ))
            .into());
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl ArticleClusterer for ThresholdClusterer {
    fn cluster(&self, articles: &[Article]) -> Result<ClusteringOutcome> {
        let valid = partition_valid(articles)?;
        let n = valid.ids.len();

        let matrix = normalized_matrix(&valid.vectors);
        let similarities = matrix.dot(&matrix.t());
        let threshold = self.threshold as f64;

        let mut assigned = vec![false; n];
        let mut groups = Vec::new();

        for anchor in 0..n {
            if assigned[anchor] {
                continue;
            }
            assigned[anchor] = true;
            let mut group = vec![anchor];

            // Everything before the anchor is already assigned.
            for candidate in anchor + 1..n {
                if !assigned[candidate] && similarities[[anchor, candidate]] >= threshold {
                    assigned[candidate] = true;
                    group.push(candidate);
                }
            }
            groups.push(group);
        }

        let clusters = into_clusters(groups, &valid.ids);
        tracing::debug!(
            items = n,
            clusters = clusters.len(),
            threshold = self.threshold,
            "Threshold clustering finished"
        );

        Ok(ClusteringOutcome {
            strategy: ClusteringStrategy::Threshold,
            clusters,
            noise: Vec::new(),
            filtered: valid.filtered,
        })
    }

    fn strategy(&self) -> ClusteringStrategy {
        ClusteringStrategy::Threshold
    }

    fn name(&self) -> &str {
        "threshold"
    }
}
