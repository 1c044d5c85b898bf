//! Core data model: articles, clusters, interactions and user embeddings.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EmbedTextMode;
use crate::utils::truncate_chars;
use crate::vector::is_sentinel;

/// Article identifier.
pub type ItemId = i64;
/// User identifier.
pub type UserId = i64;
/// Section (news category) identifier.
pub type SectionId = i64;

/// Preference weight per section for one user.
pub type SectionPreferences = HashMap<SectionId, f32>;

/// A news article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Stable identifier.
    pub id: ItemId,
    /// Headline.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// Section the article belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    /// Embedding, absent until computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Article {
    /// Create an article without an embedding.
    pub fn new(id: ItemId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
            section_id: None,
            embedding: None,
        }
    }

    /// Attach an embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Attach a section.
    pub fn with_section(mut self, section_id: SectionId) -> Self {
        self.section_id = Some(section_id);
        self
    }

    /// The embedding if present and not the all-zero placeholder.
    pub fn valid_embedding(&self) -> Option<&[f32]> {
        self.embedding
            .as_deref()
            .filter(|embedding| !is_sentinel(embedding))
    }

    /// Text submitted to the embedding provider.
    pub fn embed_text(&self, mode: EmbedTextMode, max_chars: usize) -> String {
        match mode {
            EmbedTextMode::Title => truncate_chars(&self.title, max_chars).trim().to_string(),
            EmbedTextMode::TitleAndContent => {
                format!("{}\n\n{}", self.title, truncate_chars(&self.content, max_chars))
            }
        }
    }
}

/// A group of articles covering one story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Position of the cluster within its run.
    pub cluster_id: usize,
    /// Member article ids in input order.
    pub item_ids: Vec<ItemId>,
}

impl Cluster {
    /// Number of member articles.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Clusters are never empty; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

/// Kind of user interaction with an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Scrap,
    DetailView,
}

impl InteractionKind {
    /// Every kind, in aggregation order.
    pub const ALL: [InteractionKind; 3] = [Self::Like, Self::Scrap, Self::DetailView];
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Like => "like",
            Self::Scrap => "scrap",
            Self::DetailView => "detail_view",
        };
        f.write_str(name)
    }
}

/// One interaction event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub kind: InteractionKind,
    pub timestamp: DateTime<Utc>,
}

/// Interacted article ids of one user, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInteractions {
    pub likes: Vec<ItemId>,
    pub scraps: Vec<ItemId>,
    pub detail_views: Vec<ItemId>,
}

impl UserInteractions {
    /// Ids for one kind.
    pub fn of(&self, kind: InteractionKind) -> &[ItemId] {
        match kind {
            InteractionKind::Like => &self.likes,
            InteractionKind::Scrap => &self.scraps,
            InteractionKind::DetailView => &self.detail_views,
        }
    }

    /// Mutable ids for one kind.
    pub fn of_mut(&mut self, kind: InteractionKind) -> &mut Vec<ItemId> {
        match kind {
            InteractionKind::Like => &mut self.likes,
            InteractionKind::Scrap => &mut self.scraps,
            InteractionKind::DetailView => &mut self.detail_views,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.likes.is_empty() && self.scraps.is_empty() && self.detail_views.is_empty()
    }

    /// All ids across kinds, with repeats.
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.likes
            .iter()
            .chain(&self.scraps)
            .chain(&self.detail_views)
            .copied()
    }
}

/// Which path produced a user embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    /// Weighted mean of interacted article embeddings.
    Interactions,
    /// Preference-weighted mean of section means.
    SectionPreference,
    /// Unweighted mean of all section means.
    GlobalMean,
}

impl EmbeddingSource {
    /// True for the two cold-start paths.
    pub fn is_cold_start(&self) -> bool {
        !matches!(self, Self::Interactions)
    }
}

/// Final, post-processed interest vector of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEmbedding {
    pub user_id: UserId,
    pub vector: Vec<f32>,
    pub source: EmbeddingSource,
}
