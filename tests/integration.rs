//! Integration tests for storyline.
//!
//! These tests run the clustering and user embedding pipelines end to end
//! against the in-memory store, with a deterministic embedding provider
//! standing in for the remote API.
//!
//! Run with:
//! ```bash
//! cargo test --test integration
//! ```

#[path = "integration/test_clustering_pipeline.rs"]
mod test_clustering_pipeline;

#[path = "integration/test_user_pipeline.rs"]
mod test_user_pipeline;
