//! CLI command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use storyline::{ClusteringPipeline, Config, MemoryStore, UserEmbeddingPipeline};

use super::output;

/// Overrides the `cluster` command applies on top of the loaded config.
#[derive(Debug, Clone, Default)]
pub struct ClusterOverrides {
    pub strategy: Option<storyline::ClusteringStrategy>,
    pub threshold: Option<f32>,
}

fn open_store(snapshot: &Path) -> Result<Arc<MemoryStore>> {
    let store = MemoryStore::from_file(snapshot)
        .with_context(|| format!("failed to load snapshot {}", snapshot.display()))?;
    Ok(Arc::new(store))
}

fn write_output(store: &MemoryStore, output: Option<PathBuf>) -> Result<()> {
    if let Some(path) = output {
        store
            .write_sink(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("Results written to {}", path.display());
    }
    Ok(())
}

/// Embed and cluster the snapshot's unprocessed articles.
pub async fn run_cluster(
    mut config: Config,
    snapshot: PathBuf,
    overrides: ClusterOverrides,
    output_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    if let Some(strategy) = overrides.strategy {
        config.clustering.strategy = strategy;
    }
    if let Some(threshold) = overrides.threshold {
        config.clustering.similarity_threshold = threshold;
    }
    config.validate()?;

    let store = open_store(&snapshot)?;
    let pipeline = ClusteringPipeline::from_config(&config, store.clone(), store.clone())?;
    let report = pipeline.run().await?;

    output::print_cluster_report(&report, json)?;
    write_output(&store, output_path)
}

/// Compute user embeddings for every user, or recalculate a single one.
pub async fn run_users(
    config: Config,
    snapshot: PathBuf,
    user: Option<i64>,
    output_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let store = open_store(&snapshot)?;
    let pipeline = UserEmbeddingPipeline::new(
        &config.users,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );

    match user {
        Some(user_id) => {
            let embedding = pipeline.recalculate_user(user_id).await?;
            output::print_user_embedding(user_id, embedding.as_ref(), json)?;
        }
        None => {
            let report = pipeline.run_all().await?;
            output::print_user_report(&report, json)?;
        }
    }
    write_output(&store, output_path)
}

/// Print the effective configuration.
pub fn run_show_config(config: &Config, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

/// Print the process-wide metrics collected during the command.
pub fn run_print_metrics(json: bool) -> Result<()> {
    output::print_metrics(&storyline::get_metrics(), json)
}
