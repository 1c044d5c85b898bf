//! In-memory store backed by a JSON snapshot.
//!
//! Implements every collaborator trait. Results written through
//! [`ResultSink`] are kept and can be inspected or dumped with
//! [`MemoryStore::sink_contents`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    Article, Cluster, InteractionKind, InteractionRecord, ItemId, SectionId, SectionPreferences,
    UserEmbedding, UserId,
};

use super::traits::{InteractionStore, ItemStore, ResultSink, SectionMeanStore};

/// Article plus its processing flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArticle {
    #[serde(flatten)]
    pub article: Article,
    /// Already clustered in an earlier run.
    #[serde(default)]
    pub processed: bool,
}

/// One user's preference for one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub user_id: UserId,
    pub section_id: SectionId,
    pub preference: f32,
}

/// A precomputed section mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionMeanRecord {
    pub section_id: SectionId,
    pub vector: Vec<f32>,
}

/// Serializable store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Users to embed in addition to those with interactions or preferences.
    pub users: Vec<UserId>,
    pub articles: Vec<StoredArticle>,
    pub interactions: Vec<InteractionRecord>,
    pub preferences: Vec<PreferenceRecord>,
    pub section_means: Vec<SectionMeanRecord>,
}

impl Snapshot {
    /// Load a snapshot from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Parse a snapshot from JSON.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Everything written through the sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkContents {
    /// Latest embedding per user.
    pub user_embeddings: BTreeMap<UserId, UserEmbedding>,
    /// Clusters in write order.
    pub clusters: Vec<Cluster>,
    /// Number of bulk upsert calls.
    pub bulk_upserts: usize,
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    snapshot: Arc<RwLock<Snapshot>>,
    sink: Arc<RwLock<SinkContents>>,
}

impl MemoryStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
            sink: Arc::new(RwLock::new(SinkContents::default())),
        }
    }

    /// Load a store from a JSON snapshot file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Snapshot::from_file(path)?))
    }

    /// Add an unprocessed article.
    pub fn insert_article(&self, article: Article) {
        self.snapshot.write().articles.push(StoredArticle {
            article,
            processed: false,
        });
    }

    /// Record an interaction.
    pub fn record_interaction(&self, record: InteractionRecord) {
        self.snapshot.write().interactions.push(record);
    }

    /// Set one section preference.
    pub fn set_preference(&self, user_id: UserId, section_id: SectionId, preference: f32) {
        let mut snapshot = self.snapshot.write();
        snapshot
            .preferences
            .retain(|p| !(p.user_id == user_id && p.section_id == section_id));
        snapshot.preferences.push(PreferenceRecord {
            user_id,
            section_id,
            preference,
        });
    }

    /// Register a user with no history.
    pub fn add_user(&self, user_id: UserId) {
        self.snapshot.write().users.push(user_id);
    }

    /// Set a precomputed section mean.
    pub fn set_section_mean(&self, section_id: SectionId, vector: Vec<f32>) {
        let mut snapshot = self.snapshot.write();
        snapshot.section_means.retain(|m| m.section_id != section_id);
        snapshot.section_means.push(SectionMeanRecord { section_id, vector });
    }

    /// Copy of everything written through the sink.
    pub fn sink_contents(&self) -> SinkContents {
        self.sink.read().clone()
    }

    /// Stored embedding of one user.
    pub fn user_embedding(&self, user_id: UserId) -> Option<UserEmbedding> {
        self.sink.read().user_embeddings.get(&user_id).cloned()
    }

    /// Write the sink contents as pretty JSON.
    pub fn write_sink(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.sink.read())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn fetch_unprocessed_items(&self) -> Result<Vec<Article>> {
        Ok(self
            .snapshot
            .read()
            .articles
            .iter()
            .filter(|a| !a.processed)
            .map(|a| a.article.clone())
            .collect())
    }

    async fn fetch_embeddings_by_ids(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Vec<f32>>> {
        let wanted: BTreeSet<ItemId> = ids.iter().copied().collect();
        Ok(self
            .snapshot
            .read()
            .articles
            .iter()
            .filter(|a| wanted.contains(&a.article.id))
            .filter_map(|a| a.article.embedding.clone().map(|e| (a.article.id, e)))
            .collect())
    }

    async fn fetch_sections_by_ids(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, SectionId>> {
        let wanted: BTreeSet<ItemId> = ids.iter().copied().collect();
        Ok(self
            .snapshot
            .read()
            .articles
            .iter()
            .filter(|a| wanted.contains(&a.article.id))
            .filter_map(|a| a.article.section_id.map(|s| (a.article.id, s)))
            .collect())
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn fetch_user_ids(&self) -> Result<Vec<UserId>> {
        let snapshot = self.snapshot.read();
        let users: BTreeSet<UserId> = snapshot
            .users
            .iter()
            .copied()
            .chain(snapshot.interactions.iter().map(|i| i.user_id))
            .chain(snapshot.preferences.iter().map(|p| p.user_id))
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn fetch_interactions(
        &self,
        kind: InteractionKind,
        since: DateTime<Utc>,
    ) -> Result<HashMap<UserId, Vec<ItemId>>> {
        let snapshot = self.snapshot.read();
        let mut records: Vec<&InteractionRecord> = snapshot
            .interactions
            .iter()
            .filter(|r| r.kind == kind && r.timestamp >= since)
            .collect();
        records.sort_by_key(|r| r.timestamp);

        let mut by_user: HashMap<UserId, Vec<ItemId>> = HashMap::new();
        for record in records {
            by_user.entry(record.user_id).or_default().push(record.item_id);
        }
        Ok(by_user)
    }

    async fn fetch_user_interactions(
        &self,
        user_id: UserId,
        kind: InteractionKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<ItemId>> {
        let snapshot = self.snapshot.read();
        let mut records: Vec<&InteractionRecord> = snapshot
            .interactions
            .iter()
            .filter(|r| r.user_id == user_id && r.kind == kind && r.timestamp >= since)
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records.into_iter().map(|r| r.item_id).collect())
    }

    async fn fetch_section_preferences(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, SectionPreferences>> {
        let wanted: BTreeSet<UserId> = user_ids.iter().copied().collect();
        let mut preferences: HashMap<UserId, SectionPreferences> = HashMap::new();
        for record in &self.snapshot.read().preferences {
            if wanted.contains(&record.user_id) {
                preferences
                    .entry(record.user_id)
                    .or_default()
                    .insert(record.section_id, record.preference);
            }
        }
        Ok(preferences)
    }
}

#[async_trait]
impl SectionMeanStore for MemoryStore {
    async fn fetch_section_sample_item_ids(
        &self,
        limit_per_section: usize,
    ) -> Result<HashMap<SectionId, Vec<ItemId>>> {
        let mut samples: HashMap<SectionId, Vec<ItemId>> = HashMap::new();
        for stored in &self.snapshot.read().articles {
            let article = &stored.article;
            let (Some(section), Some(_)) = (article.section_id, article.embedding.as_ref()) else {
                continue;
            };
            let sample = samples.entry(section).or_default();
            if sample.len() < limit_per_section {
                sample.push(article.id);
            }
        }
        Ok(samples)
    }

    async fn fetch_section_means(&self) -> Result<HashMap<SectionId, Vec<f32>>> {
        Ok(self
            .snapshot
            .read()
            .section_means
            .iter()
            .map(|m| (m.section_id, m.vector.clone()))
            .collect())
    }
}

#[async_trait]
impl ResultSink for MemoryStore {
    async fn upsert_user_embedding(&self, embedding: &UserEmbedding) -> Result<()> {
        self.sink
            .write()
            .user_embeddings
            .insert(embedding.user_id, embedding.clone());
        Ok(())
    }

    async fn upsert_user_embeddings(&self, embeddings: &[UserEmbedding]) -> Result<()> {
        let mut sink = self.sink.write();
        sink.bulk_upserts += 1;
        for embedding in embeddings {
            sink.user_embeddings.insert(embedding.user_id, embedding.clone());
        }
        Ok(())
    }

    async fn upsert_cluster_result(&self, cluster: &Cluster) -> Result<()> {
        let mut snapshot = self.snapshot.write();
        for stored in snapshot
            .articles
            .iter_mut()
            .filter(|a| cluster.item_ids.contains(&a.article.id))
        {
            stored.processed = true;
        }
        drop(snapshot);

        self.sink.write().clusters.push(cluster.clone());
        Ok(())
    }
}
