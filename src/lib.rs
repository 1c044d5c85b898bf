//! Storyline: article embedding, story clustering and user interest vectors
//!
//! Embeds news articles through a rate-limited, batching embedding client,
//! groups articles about the same story with either a similarity threshold
//! or HDBSCAN, and aggregates each user's interactions into an interest
//! vector with cold-start fallbacks.

pub mod clustering;
pub mod config;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod users;
pub mod utils;
pub mod vector;

pub use clustering::{ArticleClusterer, ClustererFactory, ClusteringOutcome};
pub use clustering::{DensityClusterer, HdbscanParams, ThresholdClusterer};
pub use config::{ClusteringStrategy, Config};
pub use embedding::{
    ApiEmbeddingProvider, BatchConfig, BatchOutput, BatchStats, EmbeddingBatcher,
    EmbeddingProvider,
};
pub use error::{Result, StorylineError};
pub use metrics::{get_metrics, Metrics, MetricsSnapshot};
pub use model::{
    Article, Cluster, EmbeddingSource, InteractionKind, InteractionRecord, ItemId, SectionId,
    SectionPreferences, UserEmbedding, UserId, UserInteractions,
};
pub use pipeline::{ClusterRunReport, ClusteringPipeline, UserEmbeddingPipeline, UserRunReport};
pub use store::{InteractionStore, ItemStore, MemoryStore, ResultSink, SectionMeanStore, Snapshot};
pub use users::{ActionWeights, EmbeddingContext, UserEmbeddingAggregator};
