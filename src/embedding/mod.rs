//! Embedding & indexing
//!
//! - EmbeddingProvider trait for abstraction
//! - HashEmbedder (built in) and FastEmbedProvider (`fastembed` feature)
//! - BatchEmbedder for ordered, checked batch encoding
//! - VectorIndex: exact scan or HNSW candidates, persisted with zstd
mod batch;
mod provider;
mod vector_index;

pub use batch::{BatchEmbedder, BatchResult};
#[cfg(feature = "fastembed")]
pub use provider::FastEmbedProvider;
pub use provider::{provider_from_config, tokenize, EmbeddingError, EmbeddingProvider, HashEmbedder};
pub use vector_index::{
    IndexBuildError, IndexCorruptError, IndexManifest, SearchHit, VectorIndex,
    INDEX_SCHEMA_VERSION,
};
