//! Error types for storyline.

use thiserror::Error;

/// Main error type for storyline operations.
#[derive(Error, Debug)]
pub enum StorylineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {name}: {value}")]
    Env { name: String, value: String },
}

/// Embedding provider errors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Token limit exceeded: {0}")]
    TokenLimit(String),

    #[error("Expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("No embedding provider configured")]
    Disabled,
}

/// Clustering errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Vector shape errors. These indicate bad input data and are never recovered.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Weight count mismatch: {vectors} vectors, {weights} weights")]
    WeightCount { vectors: usize, weights: usize },
}

/// Collaborator store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for storyline operations.
pub type Result<T> = std::result::Result<T, StorylineError>;
