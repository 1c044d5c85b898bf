//! Storage collaborators.

mod memory;
mod traits;

pub use memory::{MemoryStore, PreferenceRecord, SectionMeanRecord, Snapshot, SinkContents, StoredArticle};
pub use traits::{EmbeddingProvider, InteractionStore, ItemStore, ResultSink, SectionMeanStore};
