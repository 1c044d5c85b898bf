//! End-to-end user embedding pipeline tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use storyline::config::{SectionMeanSource, UserEmbeddingConfig};
use storyline::error::StoreError;
use storyline::store::{MemoryStore, ResultSink};
use storyline::vector::l2_normalize;
use storyline::{
    Article, Cluster, EmbeddingSource, InteractionKind, InteractionRecord, UserEmbedding,
    UserEmbeddingPipeline,
};

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

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap()
}

fn interaction(user_id: i64, item_id: i64, kind: InteractionKind, days_ago: i64) -> InteractionRecord {
    InteractionRecord {
        user_id,
        item_id,
        kind,
        timestamp: now() - Duration::days(days_ago),
    }
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-5, "{:?} != {:?}", a, b);
    }
}

/// Two sections and four users, one per embedding source path.
///
/// Section 10 mean is [0.5, 0, 0.5], section 20 mean is [0, 1, 0]; the
/// sentinel article 4 does not contribute to section 20.
fn user_store() -> MemoryStore {
    let store = MemoryStore::default();
    store.insert_article(Article::new(1, "a", "").with_section(10).with_embedding(vec![1.0, 0.0, 0.0]));
    store.insert_article(Article::new(2, "b", "").with_section(10).with_embedding(vec![0.0, 0.0, 1.0]));
    store.insert_article(Article::new(3, "c", "").with_section(20).with_embedding(vec![0.0, 1.0, 0.0]));
    store.insert_article(Article::new(4, "d", "").with_section(20).with_embedding(vec![0.0, 0.0, 0.0]));

    // Interactions within the window.
    store.record_interaction(interaction(100, 1, InteractionKind::Like, 2));
    store.record_interaction(interaction(100, 3, InteractionKind::Scrap, 5));

    // Only history is outside the window.
    store.record_interaction(interaction(200, 1, InteractionKind::Like, 40));
    store.set_preference(200, 20, 1.0);

    // No history, no preferences.
    store.add_user(300);

    // Only interacted with an article that has a placeholder embedding.
    store.record_interaction(interaction(400, 4, InteractionKind::DetailView, 1));
    store.set_preference(400, 10, 2.0);

    store
}

fn pipeline(store: &Arc<MemoryStore>, config: &UserEmbeddingConfig) -> UserEmbeddingPipeline {
    UserEmbeddingPipeline::new(config, store.clone(), store.clone(), store.clone(), store.clone())
        .with_reference_time(now())
}

#[tokio::test]
async fn test_bulk_run_covers_every_source() {
    let store = Arc::new(user_store());
    let config = UserEmbeddingConfig {
        upsert_batch_size: 3,
        ..Default::default()
    };

    let report = pipeline(&store, &config).run_all().await.unwrap();

    assert_eq!(report.total_users, 4);
    assert_eq!(report.interactions, 1);
    assert_eq!(report.section_preference, 2);
    assert_eq!(report.global_mean, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.upserted, 4);

    let stored = store.sink_contents();
    assert_eq!(stored.bulk_upserts, 2);

    let user = &stored.user_embeddings[&100];
    assert_eq!(user.source, EmbeddingSource::Interactions);
    assert_close(&user.vector, &l2_normalize(&[3.0 / 8.0, 5.0 / 8.0, 0.0]));

    let user = &stored.user_embeddings[&200];
    assert_eq!(user.source, EmbeddingSource::SectionPreference);
    assert_close(&user.vector, &[0.0, 1.0, 0.0]);

    let user = &stored.user_embeddings[&300];
    assert_eq!(user.source, EmbeddingSource::GlobalMean);
    assert_close(&user.vector, &l2_normalize(&[0.25, 0.5, 0.25]));

    let user = &stored.user_embeddings[&400];
    assert_eq!(user.source, EmbeddingSource::SectionPreference);
    assert_close(&user.vector, &l2_normalize(&[0.5, 0.0, 0.5]));
}

#[tokio::test]
async fn test_single_user_recalculation_matches_bulk() {
    let store = Arc::new(user_store());
    let config = UserEmbeddingConfig::default();
    let pipeline = pipeline(&store, &config);

    pipeline.run_all().await.unwrap();
    let bulk = store.sink_contents().user_embeddings;

    for user_id in [100, 200, 300, 400] {
        let single = pipeline.recalculate_user(user_id).await.unwrap().unwrap();
        assert_eq!(single.source, bulk[&user_id].source);
        assert_close(&single.vector, &bulk[&user_id].vector);
        assert_eq!(store.user_embedding(user_id).as_ref(), Some(&single));
    }
}

#[tokio::test]
async fn test_lookback_window_follows_reference_time() {
    let store = Arc::new(user_store());
    let config = UserEmbeddingConfig {
        lookback_days: 60,
        ..Default::default()
    };

    // User 200's like from 40 days ago is now inside the window.
    let embedding = pipeline(&store, &config).recalculate_user(200).await.unwrap().unwrap();
    assert_eq!(embedding.source, EmbeddingSource::Interactions);
    assert_close(&embedding.vector, &[1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn test_precomputed_section_means() {
    let store = Arc::new(user_store());
    store.set_section_mean(10, vec![0.0, 2.0, 0.0]);
    let config = UserEmbeddingConfig {
        section_means: SectionMeanSource::Precomputed,
        ..Default::default()
    };

    let embedding = pipeline(&store, &config).recalculate_user(400).await.unwrap().unwrap();
    assert_eq!(embedding.source, EmbeddingSource::SectionPreference);
    assert_close(&embedding.vector, &[0.0, 1.0, 0.0]);

    // Section 20 has no precomputed mean.
    let embedding = pipeline(&store, &config).recalculate_user(200).await.unwrap().unwrap();
    assert_eq!(embedding.source, EmbeddingSource::GlobalMean);
    assert_close(&embedding.vector, &[0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn test_user_without_any_path_is_skipped() {
    let store = Arc::new(MemoryStore::default());
    store.add_user(1);
    let config = UserEmbeddingConfig::default();
    let pipeline = pipeline(&store, &config);

    let report = pipeline.run_all().await.unwrap();
    assert_eq!(report.total_users, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.upserted, 0);
    assert_eq!(store.sink_contents().bulk_upserts, 0);

    assert!(pipeline.recalculate_user(1).await.unwrap().is_none());
    assert!(store.user_embedding(1).is_none());
}

#[tokio::test]
async fn test_per_user_failure_does_not_abort_run() {
    let store = Arc::new(user_store());
    // Mismatched dimension and no section, so section means are unaffected.
    store.insert_article(Article::new(9, "e", "").with_embedding(vec![1.0, 0.0]));
    store.record_interaction(interaction(500, 1, InteractionKind::Like, 1));
    store.record_interaction(interaction(500, 9, InteractionKind::Like, 1));

    let config = UserEmbeddingConfig::default();
    let pipeline = pipeline(&store, &config);

    let report = pipeline.run_all().await.unwrap();
    assert_eq!(report.total_users, 5);
    assert_eq!(report.failed, 1);
    assert_eq!(report.upserted, 4);
    assert!(store.user_embedding(500).is_none());

    assert!(pipeline.recalculate_user(500).await.is_err());
}

#[tokio::test]
async fn test_failed_bulk_upserts_are_counted() {
    let store = Arc::new(user_store());
    let config = UserEmbeddingConfig {
        upsert_batch_size: 2,
        ..Default::default()
    };
    let pipeline = UserEmbeddingPipeline::new(
        &config,
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(FailingSink),
    )
    .with_reference_time(now());

    let report = pipeline.run_all().await.unwrap();
    assert_eq!(report.upserted, 0);
    assert_eq!(report.failed, 4);
    assert!(pipeline.recalculate_user(100).await.is_err());
}
