//! Section mean vectors approximated from sampled articles.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::{ItemId, SectionId};
use crate::vector::{is_sentinel, mean};

/// Mean embedding per section over the sampled items that have one.
///
/// Sections none of whose samples carry a usable embedding are omitted.
pub fn section_means_from_samples(
    samples: &HashMap<SectionId, Vec<ItemId>>,
    embeddings: &HashMap<ItemId, Vec<f32>>,
) -> Result<HashMap<SectionId, Vec<f32>>> {
    let mut means = HashMap::with_capacity(samples.len());

    for (section, item_ids) in samples {
        let vectors: Vec<&Vec<f32>> = item_ids
            .iter()
            .filter_map(|id| embeddings.get(id))
            .filter(|v| !is_sentinel(v))
            .collect();

        match mean(&vectors)? {
            Some(section_mean) => {
                means.insert(*section, section_mean);
            }
            None => tracing::debug!(section, "No usable sample embeddings for section"),
        }
    }
    Ok(means)
}
