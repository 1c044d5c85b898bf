//! Per-user interest vector aggregation.

use std::collections::{BTreeMap, HashMap};

use crate::config::UserEmbeddingConfig;
use crate::error::Result;
use crate::model::{
    EmbeddingSource, InteractionKind, ItemId, SectionId, SectionPreferences, UserEmbedding,
    UserId, UserInteractions,
};
use crate::vector::{is_sentinel, l2_normalize, mean, weighted_mean};

use super::ActionWeights;

/// Lookups shared by every user of a run.
///
/// The bulk path builds one context for all users; single-user
/// recalculation builds one holding only that user's items.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingContext {
    item_embeddings: HashMap<ItemId, Vec<f32>>,
    item_sections: HashMap<ItemId, SectionId>,
    section_means: BTreeMap<SectionId, Vec<f32>>,
    global_mean: Option<Vec<f32>>,
}

impl EmbeddingContext {
    /// Build a context, computing the global mean of the section means once.
    pub fn new(
        item_embeddings: HashMap<ItemId, Vec<f32>>,
        item_sections: HashMap<ItemId, SectionId>,
        section_means: impl IntoIterator<Item = (SectionId, Vec<f32>)>,
    ) -> Result<Self> {
        let section_means: BTreeMap<SectionId, Vec<f32>> = section_means
            .into_iter()
            .filter(|(_, v)| !is_sentinel(v))
            .collect();
        let means: Vec<&Vec<f32>> = section_means.values().collect();
        let global_mean = mean(&means)?;

        Ok(Self {
            item_embeddings,
            item_sections,
            section_means,
            global_mean,
        })
    }

    /// Usable embedding of an item.
    pub fn embedding(&self, item_id: ItemId) -> Option<&[f32]> {
        self.item_embeddings
            .get(&item_id)
            .map(Vec::as_slice)
            .filter(|v| !is_sentinel(v))
    }

    pub fn section(&self, item_id: ItemId) -> Option<SectionId> {
        self.item_sections.get(&item_id).copied()
    }

    pub fn section_mean(&self, section_id: SectionId) -> Option<&[f32]> {
        self.section_means.get(&section_id).map(Vec::as_slice)
    }

    /// Unweighted mean of all section means.
    pub fn global_mean(&self) -> Option<&[f32]> {
        self.global_mean.as_deref()
    }

    pub fn section_count(&self) -> usize {
        self.section_means.len()
    }
}

/// Combines weighted interactions into a user vector, falling back to
/// section preferences and then to the global mean.
#[derive(Debug, Clone)]
pub struct UserEmbeddingAggregator {
    weights: ActionWeights,
    normalize: bool,
}

impl Default for UserEmbeddingAggregator {
    fn default() -> Self {
        Self {
            weights: ActionWeights::default(),
            normalize: true,
        }
    }
}

impl UserEmbeddingAggregator {
    pub fn new(weights: ActionWeights, normalize: bool) -> Self {
        Self { weights, normalize }
    }

    pub fn from_config(config: &UserEmbeddingConfig) -> Self {
        Self::new(ActionWeights::from_config(config), config.normalize)
    }

    pub fn weights(&self) -> &ActionWeights {
        &self.weights
    }

    /// Compute one user's embedding. `Ok(None)` when no path yields a vector.
    pub fn aggregate(
        &self,
        user_id: UserId,
        interactions: &UserInteractions,
        preferences: &SectionPreferences,
        context: &EmbeddingContext,
    ) -> Result<Option<UserEmbedding>> {
        let result = match self.interaction_embedding(interactions, preferences, context)? {
            Some(vector) => Some((vector, EmbeddingSource::Interactions)),
            None => match self.section_preference_embedding(preferences, context)? {
                Some(vector) => Some((vector, EmbeddingSource::SectionPreference)),
                None => context
                    .global_mean()
                    .map(|v| (v.to_vec(), EmbeddingSource::GlobalMean)),
            },
        };

        Ok(result.map(|(vector, source)| {
            tracing::debug!(user_id, source = ?source, "User embedding computed");
            UserEmbedding {
                user_id,
                vector: self.postprocess(vector),
                source,
            }
        }))
    }

    /// Weighted mean of interacted items, weight = base weight x section preference.
    ///
    /// Items without a usable embedding or with a non-finite weight are
    /// skipped. Returns `None` when no item contributes positive total weight.
    pub fn interaction_embedding(
        &self,
        interactions: &UserInteractions,
        preferences: &SectionPreferences,
        context: &EmbeddingContext,
    ) -> Result<Option<Vec<f32>>> {
        let mut vectors = Vec::new();
        let mut weights = Vec::new();

        for kind in InteractionKind::ALL {
            let base = self.weights.weight(kind);
            for &item_id in interactions.of(kind) {
                let Some(embedding) = context.embedding(item_id) else {
                    continue;
                };
                let preference = context
                    .section(item_id)
                    .and_then(|section| preferences.get(&section))
                    .map_or(1.0, |p| *p as f64);
                let weight = base * preference;
                if !weight.is_finite() {
                    tracing::debug!(item_id, preference, "Skipping interaction with non-finite weight");
                    continue;
                }

                vectors.push(embedding);
                weights.push(weight);
            }
        }

        Ok(weighted_mean(&vectors, &weights)?)
    }

    /// Preference-weighted mean of section means for cold-start users.
    ///
    /// Sections with a non-positive or non-finite preference, or without a
    /// mean, are ignored.
    pub fn section_preference_embedding(
        &self,
        preferences: &SectionPreferences,
        context: &EmbeddingContext,
    ) -> Result<Option<Vec<f32>>> {
        let mut sections: Vec<(&SectionId, &f32)> =
            preferences.iter().filter(|(_, p)| p.is_finite() && **p > 0.0).collect();
        sections.sort_by_key(|(section, _)| **section);

        let mut vectors = Vec::with_capacity(sections.len());
        let mut weights = Vec::with_capacity(sections.len());
        for (section, preference) in sections {
            if let Some(section_mean) = context.section_mean(*section) {
                vectors.push(section_mean);
                weights.push(*preference as f64);
            }
        }

        Ok(weighted_mean(&vectors, &weights)?)
    }

    fn postprocess(&self, vector: Vec<f32>) -> Vec<f32> {
        if self.normalize {
            l2_normalize(&vector)
        } else {
            vector
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::l2_norm;

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{:?} != {:?}", a, b);
        }
    }

    fn context() -> EmbeddingContext {
        let embeddings = HashMap::from([
            (1, vec![3.0, 4.0]),
            (2, vec![0.0, 2.0]),
            (3, vec![0.0, 0.0]),
        ]);
        let sections = HashMap::from([(1, 10), (2, 20)]);
        let means = [(10, vec![1.0, 0.0]), (20, vec![0.0, 1.0]), (30, vec![1.0, 1.0])];
        EmbeddingContext::new(embeddings, sections, means).unwrap()
    }

    fn likes(ids: &[ItemId]) -> UserInteractions {
        UserInteractions {
            likes: ids.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_like_without_preferences_is_normalized_item() {
        let aggregator = UserEmbeddingAggregator::default();
        let result = aggregator
            .aggregate(7, &likes(&[1]), &SectionPreferences::new(), &context())
            .unwrap()
            .unwrap();

        assert_eq!(result.user_id, 7);
        assert_eq!(result.source, EmbeddingSource::Interactions);
        assert_close(&result.vector, &[0.6, 0.8]);
    }

    #[test]
    fn test_interaction_weights_and_preferences() {
        let aggregator = UserEmbeddingAggregator::new(ActionWeights::default(), false);
        let interactions = UserInteractions {
            likes: vec![1],
            scraps: vec![2],
            detail_views: vec![],
        };
        // like: 3 x pref(10)=2 -> 6, scrap: 5 x pref(20)=0.4 -> 2
        let preferences = SectionPreferences::from([(10, 2.0), (20, 0.4)]);

        let vector = aggregator
            .interaction_embedding(&interactions, &preferences, &context())
            .unwrap()
            .unwrap();
        assert_close(&vector, &[(6.0 * 3.0) / 8.0, (6.0 * 4.0 + 2.0 * 2.0) / 8.0]);
    }

    #[test]
    fn test_unresolvable_interactions_equal_no_interactions() {
        let aggregator = UserEmbeddingAggregator::default();
        let preferences = SectionPreferences::from([(20, 1.0)]);
        let ctx = context();

        // Item 3 is a sentinel, item 99 is unknown.
        let unresolved = UserInteractions {
            likes: vec![3],
            scraps: vec![99],
            detail_views: vec![3, 99],
        };
        let with = aggregator.aggregate(1, &unresolved, &preferences, &ctx).unwrap();
        let without = aggregator
            .aggregate(1, &UserInteractions::default(), &preferences, &ctx)
            .unwrap();

        assert_eq!(with, without);
        assert_eq!(with.unwrap().source, EmbeddingSource::SectionPreference);
    }

    #[test]
    fn test_non_finite_preferences_are_skipped() {
        let aggregator = UserEmbeddingAggregator::new(ActionWeights::default(), false);
        let interactions = UserInteractions {
            likes: vec![1, 2],
            ..Default::default()
        };
        let ctx = context();

        // Item 1 sits in section 10, whose preference is NaN.
        let preferences = SectionPreferences::from([(10, f32::NAN), (20, 1.0)]);
        let vector = aggregator
            .interaction_embedding(&interactions, &preferences, &ctx)
            .unwrap()
            .unwrap();
        assert_close(&vector, &[0.0, 2.0]);

        let preferences = SectionPreferences::from([(10, f32::INFINITY), (20, f32::NAN)]);
        let vector = aggregator
            .interaction_embedding(&interactions, &preferences, &ctx)
            .unwrap();
        assert!(vector.is_none());

        let cold = aggregator
            .section_preference_embedding(
                &SectionPreferences::from([(10, f32::NAN), (20, f32::INFINITY), (30, 2.0)]),
                &ctx,
            )
            .unwrap()
            .unwrap();
        assert_close(&cold, &[1.0, 1.0]);
        assert!(cold.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_cold_start_section_preferences() {
        let aggregator = UserEmbeddingAggregator::new(ActionWeights::default(), false);
        // Non-positive preferences and sections without a mean are ignored.
        let preferences = SectionPreferences::from([(10, 3.0), (20, 1.0), (30, 0.0), (40, 5.0), (50, -2.0)]);

        let result = aggregator
            .aggregate(1, &UserInteractions::default(), &preferences, &context())
            .unwrap()
            .unwrap();
        assert_eq!(result.source, EmbeddingSource::SectionPreference);
        assert_close(&result.vector, &[0.75, 0.25]);
    }

    #[test]
    fn test_cold_start_global_mean() {
        let aggregator = UserEmbeddingAggregator::new(ActionWeights::default(), false);
        let result = aggregator
            .aggregate(1, &UserInteractions::default(), &SectionPreferences::new(), &context())
            .unwrap()
            .unwrap();

        assert_eq!(result.source, EmbeddingSource::GlobalMean);
        assert_close(&result.vector, &[2.0 / 3.0, 2.0 / 3.0]);
        assert!(result.source.is_cold_start());
    }

    #[test]
    fn test_no_section_means_yields_none() {
        let aggregator = UserEmbeddingAggregator::default();
        let ctx = EmbeddingContext::new(HashMap::new(), HashMap::new(), Vec::new()).unwrap();

        let result = aggregator
            .aggregate(1, &likes(&[1]), &SectionPreferences::from([(10, 1.0)]), &ctx)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_every_path_is_normalized() {
        let aggregator = UserEmbeddingAggregator::default();
        let ctx = context();
        for preferences in [SectionPreferences::new(), SectionPreferences::from([(10, 1.0)])] {
            let result = aggregator
                .aggregate(1, &UserInteractions::default(), &preferences, &ctx)
                .unwrap()
                .unwrap();
            assert!((l2_norm(&result.vector) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let embeddings = HashMap::from([(1, vec![1.0, 0.0]), (2, vec![1.0, 0.0, 0.0])]);
        let ctx = EmbeddingContext::new(embeddings, HashMap::new(), Vec::new()).unwrap();

        let result = UserEmbeddingAggregator::default().aggregate(
            1,
            &likes(&[1, 2]),
            &SectionPreferences::new(),
            &ctx,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_context_ignores_sentinel_section_means() {
        let ctx = EmbeddingContext::new(
            HashMap::new(),
            HashMap::new(),
            [(1, vec![0.0, 0.0]), (2, vec![2.0, 4.0])],
        )
        .unwrap();
        assert_eq!(ctx.section_count(), 1);
        assert_eq!(ctx.global_mean(), Some(&[2.0, 4.0][..]));
    }
}
