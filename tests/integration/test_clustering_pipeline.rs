//! End-to-end clustering pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use storyline::config::{ClusteringConfig, ClusteringStrategy, Config};
use storyline::error::{EmbeddingError, StoreError, StorylineError};
use storyline::store::{MemoryStore, ResultSink, Snapshot};
use storyline::{
    Article, BatchConfig, Cluster, ClustererFactory, ClusteringPipeline, DensityClusterer,
    EmbeddingBatcher, EmbeddingProvider, HdbscanParams, ThresholdClusterer, UserEmbedding,
};

/// Provider that looks embeddings up by article title.
///
/// A batch containing an unknown title fails as a whole.
struct TitleProvider {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TitleProvider {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(title, v)| (title.to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for TitleProvider {
    async fn embed(&self, texts: &[String], _dimension: usize) -> storyline::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|text| {
                let title = text.lines().next().unwrap_or_default().trim();
                self.vectors.get(title).cloned().ok_or_else(|| {
                    StorylineError::from(EmbeddingError::Api(format!("unknown text: {}", title)))
                })
            })
            .collect()
    }

    fn name(&self) -> &str {
        "title-provider"
    }
}

/// Sink that rejects every write.
struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    async fn upsert_user_embedding(&self, _embedding: &UserEmbedding) -> storyline::Result<()> {
        Err(StoreError::Backend("unavailable".into()).into())
    }

    async fn upsert_user_embeddings(&self, _embeddings: &[UserEmbedding]) -> storyline::Result<()> {
        Err(StoreError::Backend("unavailable".into()).into())
    }

    async fn upsert_cluster_result(&self, _cluster: &Cluster) -> storyline::Result<()> {
        Err(StoreError::Backend("unavailable".into()).into())
    }
}

fn batcher(provider: Arc<TitleProvider>) -> EmbeddingBatcher {
    let config = BatchConfig::default()
        .with_dimension(3)
        .with_max_items(10);
    EmbeddingBatcher::new(provider, config)
}

/// Two stories plus one pre-embedded article and one the provider rejects.
fn news_store() -> (MemoryStore, Arc<TitleProvider>) {
    let store = MemoryStore::default();
    store.insert_article(Article::new(1, "quake-1", "Earthquake hits the coast"));
    store.insert_article(Article::new(2, "vote-1", "Parliament passes the budget"));
    store.insert_article(Article::new(3, "quake-2", "Aftershocks follow the quake"));
    store.insert_article(Article::new(4, "vote-2", "Budget vote analysis"));
    store.insert_article(Article::new(5, "weather", "").with_embedding(vec![0.0, 0.0, 1.0]));
    store.insert_article(Article::new(6, "mystery", "Provider cannot embed this"));

    let provider = Arc::new(TitleProvider::new(&[
        ("quake-1", vec![1.0, 0.0, 0.0]),
        ("vote-1", vec![0.0, 1.0, 0.0]),
        ("quake-2", vec![0.99, 0.1, 0.0]),
        ("vote-2", vec![0.1, 0.99, 0.0]),
    ]));
    (store, provider)
}

fn member_ids(clusters: &[Cluster]) -> Vec<Vec<i64>> {
    clusters.iter().map(|c| c.item_ids.clone()).collect()
}

#[tokio::test]
async fn test_threshold_pipeline_end_to_end() {
    let (store, provider) = news_store();
    let store = Arc::new(store);

    let pipeline = ClusteringPipeline::new(
        store.clone(),
        store.clone(),
        Box::new(ThresholdClusterer::new(0.9).unwrap()),
    )
    .with_batcher(batcher(provider.clone()));

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.strategy, ClusteringStrategy::Threshold);
    assert_eq!(report.total_items, 6);
    // Article 5 already carried an embedding.
    assert_eq!(report.embedded, 5);
    assert_eq!(report.sentinel, 1);
    assert_eq!(member_ids(&report.clusters), vec![vec![1, 3], vec![2, 4], vec![5]]);
    assert!(report.noise.is_empty());
    assert_eq!(report.filtered, vec![6]);
    assert_eq!(report.clustered, 5);
    assert_eq!(report.failed_upserts, 0);

    // One failed batch call, then one call per item.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 6);

    let stored = store.sink_contents();
    assert_eq!(stored.clusters, report.clusters);
}

#[tokio::test]
async fn test_processed_articles_are_not_clustered_again() {
    let (store, provider) = news_store();
    let store = Arc::new(store);

    let pipeline = ClusteringPipeline::new(
        store.clone(),
        store.clone(),
        Box::new(ThresholdClusterer::new(0.9).unwrap()),
    )
    .with_batcher(batcher(provider));

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.clusters.len(), 3);

    let second = pipeline.run().await.unwrap();
    // Only the filtered article remains unprocessed.
    assert_eq!(second.total_items, 1);
    assert!(second.clusters.is_empty());
    assert_eq!(second.filtered, vec![6]);
}

#[tokio::test]
async fn test_density_pipeline_reports_noise() {
    let store = Arc::new(MemoryStore::default());
    for (id, embedding) in [
        (1, vec![1.0, 0.0, 0.0]),
        (2, vec![0.0, 1.0, 0.0]),
        (3, vec![0.99, 0.1, 0.0]),
        (4, vec![-1.0, -1.0, 0.0]),
        (5, vec![0.1, 0.99, 0.0]),
        (6, vec![0.98, 0.05, 0.1]),
        (7, vec![0.05, 0.98, 0.1]),
    ] {
        store.insert_article(Article::new(id, format!("article {}", id), "").with_embedding(embedding));
    }
    store.insert_article(Article::new(8, "not embedded", ""));

    let clusterer = DensityClusterer::new(HdbscanParams::default()).unwrap();
    let pipeline = ClusteringPipeline::new(store.clone(), store.clone(), Box::new(clusterer));

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.strategy, ClusteringStrategy::Density);
    assert_eq!(member_ids(&report.clusters), vec![vec![1, 3, 6], vec![2, 5, 7]]);
    assert_eq!(report.noise, vec![4]);
    assert_eq!(report.filtered, vec![8]);
    assert_eq!(report.embedded, 0);
    assert_eq!(store.sink_contents().clusters.len(), 2);
}

#[tokio::test]
async fn test_failed_cluster_upserts_are_counted() {
    let (store, provider) = news_store();
    let store = Arc::new(store);

    let pipeline = ClusteringPipeline::new(
        store.clone(),
        Arc::new(FailingSink),
        Box::new(ThresholdClusterer::new(0.9).unwrap()),
    )
    .with_batcher(batcher(provider));

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.clusters.len(), 3);
    assert_eq!(report.failed_upserts, 3);
}

#[tokio::test]
async fn test_pipeline_from_config_without_provider() {
    let (store, _provider) = news_store();
    let store = Arc::new(store);

    let config = Config {
        clustering: ClusteringConfig {
            similarity_threshold: 0.5,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = ClusteringPipeline::from_config(&config, store.clone(), store.clone()).unwrap();

    let report = pipeline.run().await.unwrap();
    assert_eq!(member_ids(&report.clusters), vec![vec![5]]);
    assert_eq!(report.filtered, vec![1, 2, 3, 4, 6]);
}

#[tokio::test]
async fn test_empty_store_yields_empty_report() {
    let store = Arc::new(MemoryStore::default());
    let clusterer = ClustererFactory::create(&ClusteringConfig::default()).unwrap();
    let pipeline = ClusteringPipeline::new(store.clone(), store.clone(), clusterer);

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.total_items, 0);
    assert!(report.clusters.is_empty());
    assert!(store.sink_contents().clusters.is_empty());
}

#[tokio::test]
async fn test_snapshot_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("snapshot.json");
    let output_path = dir.path().join("results.json");

    std::fs::write(
        &snapshot_path,
        r#"{
            "articles": [
                {"id": 10, "title": "a", "embedding": [1.0, 0.0]},
                {"id": 11, "title": "b", "embedding": [0.98, 0.2]},
                {"id": 12, "title": "c", "embedding": [0.0, 1.0], "processed": true}
            ]
        }"#,
    )
    .unwrap();

    let store = Arc::new(MemoryStore::from_file(&snapshot_path).unwrap());
    let pipeline = ClusteringPipeline::new(
        store.clone(),
        store.clone(),
        Box::new(ThresholdClusterer::new(0.9).unwrap()),
    );
    let report = pipeline.run().await.unwrap();
    assert_eq!(member_ids(&report.clusters), vec![vec![10, 11]]);

    store.write_sink(&output_path).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
    assert_eq!(written["clusters"][0]["item_ids"], serde_json::json!([10, 11]));

    let reloaded = Snapshot::from_file(&snapshot_path).unwrap();
    assert_eq!(reloaded.articles.len(), 3);
}
