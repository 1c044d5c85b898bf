//! Collaborator interfaces for the pipelines.
//!
//! Real deployments back these with a relational database and a warehouse;
//! the crate ships an in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    Article, Cluster, InteractionKind, ItemId, SectionId, SectionPreferences, UserEmbedding,
    UserId,
};

pub use crate::embedding::EmbeddingProvider;

/// Article storage.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Articles waiting for clustering.
    async fn fetch_unprocessed_items(&self) -> Result<Vec<Article>>;

    /// Stored embeddings of the given articles. Unknown ids are omitted.
    async fn fetch_embeddings_by_ids(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Vec<f32>>>;

    /// Section of the given articles. Articles without a section are omitted.
    async fn fetch_sections_by_ids(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, SectionId>>;
}

/// User interaction history and section preferences.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Every user that should receive an embedding.
    async fn fetch_user_ids(&self) -> Result<Vec<UserId>>;

    /// Interacted article ids per user since `since`, oldest first.
    async fn fetch_interactions(
        &self,
        kind: InteractionKind,
        since: DateTime<Utc>,
    ) -> Result<HashMap<UserId, Vec<ItemId>>>;

    /// One user's interacted article ids since `since`, oldest first.
    async fn fetch_user_interactions(
        &self,
        user_id: UserId,
        kind: InteractionKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<ItemId>>;

    /// Section preferences of the given users. Users without any are omitted.
    async fn fetch_section_preferences(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, SectionPreferences>>;
}

/// Sources of section mean vectors.
#[async_trait]
pub trait SectionMeanStore: Send + Sync {
    /// Up to `limit_per_section` article ids per section.
    async fn fetch_section_sample_item_ids(
        &self,
        limit_per_section: usize,
    ) -> Result<HashMap<SectionId, Vec<ItemId>>>;

    /// Precomputed section means.
    async fn fetch_section_means(&self) -> Result<HashMap<SectionId, Vec<f32>>>;
}

/// Destination of pipeline results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Insert or replace one user embedding.
    async fn upsert_user_embedding(&self, embedding: &UserEmbedding) -> Result<()>;

    /// Insert or replace a chunk of user embeddings in one call.
    async fn upsert_user_embeddings(&self, embeddings: &[UserEmbedding]) -> Result<()>;

    /// Record one story cluster.
    async fn upsert_cluster_result(&self, cluster: &Cluster) -> Result<()>;
}
