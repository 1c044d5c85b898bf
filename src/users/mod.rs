//! User interest embeddings.
//!
//! A user's vector is the weighted mean of the articles they liked, scrapped
//! or opened, each weighted by the interaction kind and the user's preference
//! for the article's section. Users without usable history fall back to
//! their section preferences over section mean vectors, then to the mean of
//! all section means.

mod aggregator;
mod section_means;
mod weights;

pub use aggregator::{EmbeddingContext, UserEmbeddingAggregator};
pub use section_means::section_means_from_samples;
pub use weights::ActionWeights;
