//! Embedding trait definitions.

use async_trait::async_trait;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning one vector of `dimension` values per text in
    /// input order.
    async fn embed(&self, texts: &[String], dimension: usize) -> crate::error::Result<Vec<Vec<f32>>>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "embedding-provider"
    }
}
