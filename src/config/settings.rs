//! Configuration settings for storyline.

use crate::error::{ConfigError, Result};
use crate::vector::DEFAULT_DIMENSION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest accepted interaction lookback window, in days.
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub clustering: ClusteringConfig,
    pub users: UserEmbeddingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    ///
    /// Environment overrides are applied after the file is read.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("storyline.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("storyline/config.toml"))
                .unwrap_or_default(),
        ];

        let mut config = match config_paths.iter().find(|p| p.is_file()) {
            Some(path) => {
                tracing::info!("Loading config from: {}", path.display());
                Self::from_file(path)?
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path when given, otherwise from default locations.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let mut config = Self::from_file(path)?;
                config.apply_env_overrides(|name| std::env::var(name).ok())?;
                config.validate()?;
                Ok(config)
            }
            None => Self::load(),
        }
    }

    /// Apply `STORYLINE_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T> {
            value.trim().parse().map_err(|_| {
                ConfigError::Env {
                    name: name.to_string(),
                    value,
                }
                .into()
            })
        }

        if let Some(v) = lookup("STORYLINE_SIMILARITY_THRESHOLD") {
            self.clustering.similarity_threshold = parse("STORYLINE_SIMILARITY_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("STORYLINE_MAX_BATCH_SIZE") {
            self.embedding.max_batch_size = parse("STORYLINE_MAX_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("STORYLINE_MAX_CONTENT_LENGTH") {
            self.embedding.max_content_length = parse("STORYLINE_MAX_CONTENT_LENGTH", v)?;
        }
        if let Some(v) = lookup("STORYLINE_SECTION_SAMPLE_SIZE") {
            self.users.section_sample_size = parse("STORYLINE_SECTION_SAMPLE_SIZE", v)?;
        }
        if let Some(v) = lookup("STORYLINE_UPSERT_BATCH_SIZE") {
            self.users.upsert_batch_size = parse("STORYLINE_UPSERT_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("STORYLINE_LOOKBACK_DAYS") {
            self.users.lookback_days = parse("STORYLINE_LOOKBACK_DAYS", v)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let embedding = &self.embedding;
        if embedding.dimension == 0 {
            return Err(ConfigError::Invalid("embedding.dimension must be > 0".to_string()).into());
        }
        if embedding.max_batch_size == 0 {
            return Err(
                ConfigError::Invalid("embedding.max_batch_size must be > 0".to_string()).into(),
            );
        }
        if embedding.max_batch_tokens == 0 {
            return Err(
                ConfigError::Invalid("embedding.max_batch_tokens must be > 0".to_string()).into(),
            );
        }
        if embedding.provider == EmbeddingProviderKind::Api {
            if embedding.api.base_url.is_empty() {
                return Err(ConfigError::MissingField("embedding.api.base_url".to_string()).into());
            }
            if embedding.api.model.is_empty() {
                return Err(ConfigError::MissingField("embedding.api.model".to_string()).into());
            }
        }

        let clustering = &self.clustering;
        if !(-1.0..=1.0).contains(&clustering.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "clustering.similarity_threshold must be within [-1, 1], got {}",
                clustering.similarity_threshold
            ))
            .into());
        }
        if clustering.min_cluster_size < 2 {
            return Err(ConfigError::Invalid(format!(
                "clustering.min_cluster_size must be >= 2, got {}",
                clustering.min_cluster_size
            ))
            .into());
        }
        if clustering.min_samples < 1 {
            return Err(
                ConfigError::Invalid("clustering.min_samples must be >= 1".to_string()).into(),
            );
        }

        let users = &self.users;
        for (name, weight) in [
            ("users.like_weight", users.like_weight),
            ("users.scrap_weight", users.scrap_weight),
            ("users.detail_view_weight", users.detail_view_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, weight
                ))
                .into());
            }
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&users.lookback_days) {
            return Err(ConfigError::Invalid(format!(
                "users.lookback_days must be within [1, {}], got {}",
                MAX_LOOKBACK_DAYS, users.lookback_days
            ))
            .into());
        }
        if users.section_sample_size == 0 {
            return Err(
                ConfigError::Invalid("users.section_sample_size must be > 0".to_string()).into(),
            );
        }
        if users.upsert_batch_size == 0 {
            return Err(
                ConfigError::Invalid("users.upsert_batch_size must be > 0".to_string()).into(),
            );
        }

        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(ConfigError::Render)?)
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type: "none" or "api"
    pub provider: EmbeddingProviderKind,
    /// Output dimensionality requested from the provider
    pub dimension: usize,
    /// Maximum number of texts per provider call
    pub max_batch_size: usize,
    /// Estimated token budget per provider call
    pub max_batch_tokens: usize,
    /// Characters of article text submitted for embedding
    pub max_content_length: usize,
    /// Which article fields are embedded
    pub text_mode: EmbedTextMode,
    /// Retries for rate-limited calls
    pub max_retries: usize,
    /// Base delay between retries in milliseconds
    pub retry_delay_ms: u64,
    /// Requests per second limit (0 = no limit)
    pub requests_per_second: u32,
    /// API configuration
    pub api: ApiEmbeddingConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::None,
            dimension: DEFAULT_DIMENSION,
            max_batch_size: 20,
            max_batch_tokens: 18_000,
            max_content_length: 2000,
            text_mode: EmbedTextMode::Title,
            max_retries: 3,
            retry_delay_ms: 500,
            requests_per_second: 0,
            api: ApiEmbeddingConfig::default(),
        }
    }
}

/// Embedding provider enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Only precomputed embeddings are used.
    None,
    /// OpenAI-compatible HTTP API.
    Api,
}

/// Article fields submitted for embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedTextMode {
    /// Truncated, trimmed title.
    Title,
    /// Title followed by truncated content.
    TitleAndContent,
}

/// API embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEmbeddingConfig {
    /// Base URL for the embedding API
    pub base_url: String,
    /// Model name
    pub model: String,
    /// API key (loaded from OPENAI_API_KEY if not set)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Story clustering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Clustering strategy
    pub strategy: ClusteringStrategy,
    /// Minimum cosine similarity to the anchor for the threshold strategy
    pub similarity_threshold: f32,
    /// Minimum cluster size for the density strategy
    pub min_cluster_size: usize,
    /// Neighbours defining a core point for the density strategy
    pub min_samples: usize,
    /// Cluster selection method for the density strategy
    pub selection: ClusterSelection,
    /// Allow the density strategy to return the whole set as one cluster
    pub allow_single_cluster: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            strategy: ClusteringStrategy::Threshold,
            similarity_threshold: 0.9,
            min_cluster_size: 2,
            min_samples: 1,
            selection: ClusterSelection::Leaf,
            allow_single_cluster: false,
        }
    }
}

/// Clustering strategy enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringStrategy {
    /// Greedy anchor-based cosine threshold grouping
    Threshold,
    /// HDBSCAN over L2-normalized vectors
    Density,
}

/// HDBSCAN cluster selection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSelection {
    /// Leaves of the condensed tree
    Leaf,
    /// Excess of mass
    Eom,
}

/// User embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserEmbeddingConfig {
    /// Base weight of a like
    pub like_weight: f64,
    /// Base weight of a scrap
    pub scrap_weight: f64,
    /// Base weight of a detail view
    pub detail_view_weight: f64,
    /// Interaction lookback window in days
    pub lookback_days: u32,
    /// L2-normalize every produced user embedding
    pub normalize: bool,
    /// Where section mean vectors come from
    pub section_means: SectionMeanSource,
    /// Sampled articles per section when means are computed
    pub section_sample_size: usize,
    /// Rows per bulk upsert
    pub upsert_batch_size: usize,
}

impl Default for UserEmbeddingConfig {
    fn default() -> Self {
        Self {
            like_weight: 3.0,
            scrap_weight: 5.0,
            detail_view_weight: 2.0,
            lookback_days: 30,
            normalize: true,
            section_means: SectionMeanSource::Sampled,
            section_sample_size: 50,
            upsert_batch_size: 500,
        }
    }
}

/// Source of section mean vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionMeanSource {
    /// Average a bounded sample of each section's articles
    Sampled,
    /// Read means maintained by the store
    Precomputed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorylineError;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::None);
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.embedding.max_batch_size, 20);
        assert_eq!(config.clustering.strategy, ClusteringStrategy::Threshold);
        assert_eq!(config.clustering.selection, ClusterSelection::Leaf);
        assert_eq!(config.users.scrap_weight, 5.0);
        assert!(config.users.normalize);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [embedding]
            provider = "api"
            max_batch_size = 8
            text_mode = "title_and_content"

            [embedding.api]
            model = "text-embedding-3-large"

            [clustering]
            strategy = "density"
            selection = "eom"

            [users]
            lookback_days = 7
            section_means = "precomputed"
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Api);
        assert_eq!(config.embedding.max_batch_size, 8);
        assert_eq!(config.embedding.text_mode, EmbedTextMode::TitleAndContent);
        assert_eq!(config.embedding.api.model, "text-embedding-3-large");
        assert_eq!(config.clustering.strategy, ClusteringStrategy::Density);
        assert_eq!(config.clustering.selection, ClusterSelection::Eom);
        assert_eq!(config.users.lookback_days, 7);
        assert_eq!(config.users.section_means, SectionMeanSource::Precomputed);
        // Untouched fields keep defaults
        assert_eq!(config.users.like_weight, 3.0);
    }

    #[test]
    fn test_validate_missing_api_model() {
        let toml = r#"
            [embedding]
            provider = "api"

            [embedding.api]
            model = ""
        "#;

        let result = Config::from_str(toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("embedding.api.model"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        for toml in [
            "[clustering]\nsimilarity_threshold = 1.5",
            "[clustering]\nmin_cluster_size = 1",
            "[clustering]\nmin_samples = 0",
            "[embedding]\nmax_batch_size = 0",
            "[embedding]\nmax_batch_tokens = 0",
            "[users]\nscrap_weight = -1.0",
            "[users]\nupsert_batch_size = 0",
            "[users]\nlookback_days = 0",
            "[users]\nlookback_days = 36501",
            "[users]\nlookback_days = 4294967295",
        ] {
            assert!(Config::from_str(toml).is_err(), "accepted: {}", toml);
        }
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STORYLINE_SIMILARITY_THRESHOLD", "0.8"),
            ("STORYLINE_MAX_BATCH_SIZE", "5"),
            ("STORYLINE_LOOKBACK_DAYS", "14"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.clustering.similarity_threshold, 0.8);
        assert_eq!(config.embedding.max_batch_size, 5);
        assert_eq!(config.users.lookback_days, 14);
        assert_eq!(config.users.section_sample_size, 50);
    }

    #[test]
    fn test_env_lookback_out_of_range_rejected() {
        let mut config = Config::default();
        config
            .apply_env_overrides(|name| {
                (name == "STORYLINE_LOOKBACK_DAYS").then(|| u32::MAX.to_string())
            })
            .unwrap();

        assert_eq!(config.users.lookback_days, u32::MAX);
        assert!(matches!(
            config.validate(),
            Err(StorylineError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|name| {
            (name == "STORYLINE_MAX_BATCH_SIZE").then(|| "many".to_string())
        });
        let err = result.unwrap_err().to_string();
        assert!(err.contains("STORYLINE_MAX_BATCH_SIZE"));
        assert!(err.contains("many"));
    }

    #[test]
    fn test_from_file_and_toml_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[clustering]\nsimilarity_threshold = 0.85").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.clustering.similarity_threshold, 0.85);

        let rendered = config.to_toml().unwrap();
        let reparsed = Config::from_str(&rendered).unwrap();
        assert_eq!(reparsed.clustering.similarity_threshold, 0.85);
        assert_eq!(reparsed.users.upsert_batch_size, 500);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/storyline.toml");
        assert!(result.is_err());
    }
}
