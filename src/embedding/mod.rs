//! Embedding module for article vectors.
//!
//! # Providers
//!
//! - [`ApiEmbeddingProvider`]: OpenAI-compatible API provider. Works with OpenAI
//!   and any endpoint that accepts the `dimensions` request field.
//!
//! # Batch Processing
//!
//! The [`EmbeddingBatcher`] wraps any embedding provider to handle:
//! - Batching under an item cap and an estimated token budget
//! - Rate limiting and retry with exponential backoff
//! - Per-item fallback when a batch call fails
//! - Sentinel vectors for items that cannot be embedded
//!
//! # Example
//!
//! ```rust,ignore
//! use storyline::embedding::{create_provider, BatchConfig, EmbeddingBatcher};
//!
//! let provider = create_provider(&config.embedding)?.expect("provider configured");
//! let batcher = EmbeddingBatcher::new(provider, BatchConfig::from_config(&config.embedding));
//!
//! let output = batcher.embed_texts(&["Rates rise again".to_string()]).await;
//! ```

mod api;
mod batch;
mod traits;

pub use api::ApiEmbeddingProvider;
pub use batch::{
    estimate_tokens, plan_batches, BatchConfig, BatchOutput, BatchStats, EmbeddingBatcher,
};
pub use traits::EmbeddingProvider;

use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::Result;

/// Create an embedding provider from configuration.
///
/// Returns `None` when the provider is `none`; callers then rely on stored
/// embeddings only.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider {
        EmbeddingProviderKind::None => Ok(None),
        EmbeddingProviderKind::Api => {
            let provider = ApiEmbeddingProvider::from_config(&config.api)?;
            Ok(Some(Arc::new(provider)))
        }
    }
}

/// Create a batcher from configuration, if a provider is configured.
pub fn create_batcher(config: &EmbeddingConfig) -> Result<Option<EmbeddingBatcher>> {
    Ok(create_provider(config)?
        .map(|provider| EmbeddingBatcher::new(provider, BatchConfig::from_config(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_none() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, EmbeddingProviderKind::None);
        assert!(create_provider(&config).unwrap().is_none());
        assert!(create_batcher(&config).unwrap().is_none());
    }

    #[test]
    fn test_create_provider_api_with_key() {
        let mut config = EmbeddingConfig::default();
        config.provider = EmbeddingProviderKind::Api;
        config.api.api_key = Some("test-key".to_string());

        let provider = create_provider(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "text-embedding-3-small");

        let batcher = create_batcher(&config).unwrap().unwrap();
        assert_eq!(batcher.config().max_items, 20);
    }
}
