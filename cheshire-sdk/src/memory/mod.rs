//! Conversation Memory
//!
//! Two layers:
//! - Working memory: per-conversation state (history, active form)
//!   that lives for the process lifetime unless reset.
//! - Vector memory: long-term embedded memories searched by similarity,
//!   consumed through the `VectorMemory` trait.
//! - Procedural memory: the available tools and forms, embedded into the
//!   `procedural` collection whenever extensions change.

pub mod embeddings;
pub mod procedural;
pub mod vector;
pub mod working;

pub use embeddings::{Embedder, HashEmbedder, cosine_similarity};
pub use procedural::{PROCEDURAL_COLLECTION, ProceduralMemory, ProcedureKind};
pub use vector::{
    CollectionInfo, InMemoryVectorMemory, MemoryPoint, MetadataFilter, ScoredPoint, VectorMemory,
};
pub use working::{Role, TurnRecord, WorkingMemory, WorkingMemoryStore};

#[cfg(feature = "embeddings")]
pub use embeddings::FastEmbedder;
