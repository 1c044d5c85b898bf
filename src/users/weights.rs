//! Base interaction weights.

use serde::{Deserialize, Serialize};

use crate::config::UserEmbeddingConfig;
use crate::model::InteractionKind;

/// Base weight of each interaction kind before section preference scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionWeights {
    pub like: f64,
    pub scrap: f64,
    pub detail_view: f64,
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            like: 3.0,
            scrap: 5.0,
            detail_view: 2.0,
        }
    }
}

impl ActionWeights {
    pub fn from_config(config: &UserEmbeddingConfig) -> Self {
        Self {
            like: config.like_weight,
            scrap: config.scrap_weight,
            detail_view: config.detail_view_weight,
        }
    }

    /// Base weight of one interaction kind.
    pub fn weight(&self, kind: InteractionKind) -> f64 {
        match kind {
            InteractionKind::Like => self.like,
            InteractionKind::Scrap => self.scrap,
            InteractionKind::DetailView => self.detail_view,
        }
    }
}
