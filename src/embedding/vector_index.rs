/// Chunk vectors, nearest-neighbour search and persistence
use super::{BatchEmbedder, EmbeddingError};
use crate::chunking::Chunk;
use crate::config::{DistanceMetric, IndexConfig};
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Version of the persisted layout; older or newer layouts are rebuilt
pub const INDEX_SCHEMA_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const PAYLOAD_FILE: &str = "chunks.json.zst";
const HNSW_MAX_LAYER: usize = 16;
const ZSTD_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum IndexBuildError {
    #[error("Nothing to index: the repository produced no chunks")]
    NoChunks,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to persist index to {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize index: {0}")]
    Serialize(String),

    #[error("Index build was interrupted: {0}")]
    Interrupted(String),
}

#[derive(Error, Debug)]
pub enum IndexCorruptError {
    #[error("Missing index file: {path}")]
    Missing { path: PathBuf },

    #[error("Unsupported index schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Checksum mismatch for {path}")]
    Checksum { path: PathBuf },

    #[error("Cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Inconsistent index: {0}")]
    Inconsistent(String),
}

/// Written next to the payload; read first on load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub schema_version: u32,
    pub fingerprint: String,
    pub model: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub chunk_count: usize,
    pub file_count: usize,
    /// BLAKE3 of the compressed payload
    pub payload_checksum: String,
    pub created_at: DateTime<Utc>,
}

/// A chunk ranked against a query
#[derive(Debug, Clone)]
pub struct SearchHit<'a> {
    pub ordinal: usize,
    /// Lower is closer
    pub distance: f32,
    pub chunk: &'a Chunk,
}

enum Graph {
    Cosine(Hnsw<'static, f32, DistCosine>),
    L2(Hnsw<'static, f32, DistL2>),
}

impl Graph {
    fn build(chunks: &[Chunk], metric: DistanceMetric, config: &IndexConfig) -> Self {
        let max_elements = chunks.len().max(1);
        match metric {
            DistanceMetric::Cosine => {
                let graph = Hnsw::<f32, DistCosine>::new(
                    config.hnsw_m,
                    max_elements,
                    HNSW_MAX_LAYER,
                    config.hnsw_ef_construction,
                    DistCosine,
                );
                for (ordinal, chunk) in chunks.iter().enumerate() {
                    graph.insert((chunk.vector.as_slice(), ordinal));
                }
                Graph::Cosine(graph)
            }
            DistanceMetric::L2 => {
                let graph = Hnsw::<f32, DistL2>::new(
                    config.hnsw_m,
                    max_elements,
                    HNSW_MAX_LAYER,
                    config.hnsw_ef_construction,
                    DistL2,
                );
                for (ordinal, chunk) in chunks.iter().enumerate() {
                    graph.insert((chunk.vector.as_slice(), ordinal));
                }
                Graph::L2(graph)
            }
        }
    }

    fn candidates(&self, query: &[f32], knbn: usize, ef_search: usize) -> Vec<usize> {
        let neighbours = match self {
            Graph::Cosine(graph) => graph.search(query, knbn, ef_search),
            Graph::L2(graph) => graph.search(query, knbn, ef_search),
        };
        neighbours.into_iter().map(|n| n.d_id).collect()
    }
}

/// Chunk store plus HNSW graph
///
/// Small indexes are scanned exhaustively. Above `exact_search_threshold`
/// vectors the graph proposes candidates which are then re-scored exactly,
/// so ties and ordering never depend on graph internals.
pub struct VectorIndex {
    chunks: Vec<Chunk>,
    dimension: usize,
    model: String,
    metric: DistanceMetric,
    fingerprint: String,
    created_at: DateTime<Utc>,
    config: IndexConfig,
    graph: Option<Graph>,
}

impl VectorIndex {
    /// An index with no content; every search returns nothing
    pub fn empty(dimension: usize, model: &str, config: &IndexConfig) -> Self {
        Self {
            chunks: Vec::new(),
            dimension,
            model: model.to_string(),
            metric: config.metric,
            fingerprint: String::new(),
            created_at: Utc::now(),
            config: config.clone(),
            graph: None,
        }
    }

    /// Encode every chunk and build the search structures
    pub fn build(
        mut chunks: Vec<Chunk>,
        embedder: &BatchEmbedder,
        config: &IndexConfig,
    ) -> Result<Self, IndexBuildError> {
        if chunks.is_empty() {
            return Err(IndexBuildError::NoChunks);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let (vectors, _) = embedder.encode(&texts)?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.vector = vector;
        }

        let index = Self::from_parts(
            chunks,
            embedder.dimension(),
            embedder.model_name().to_string(),
            config,
            Utc::now(),
        );
        info!(
            "Built index: {} chunks from {} files ({}D, {})",
            index.len(),
            index.file_count(),
            index.dimension,
            index.metric.as_str()
        );
        Ok(index)
    }

    fn from_parts(
        chunks: Vec<Chunk>,
        dimension: usize,
        model: String,
        config: &IndexConfig,
        created_at: DateTime<Utc>,
    ) -> Self {
        let graph = (chunks.len() > config.exact_search_threshold)
            .then(|| Graph::build(&chunks, config.metric, config));
        if graph.is_some() {
            debug!("Constructed HNSW graph over {} vectors", chunks.len());
        }
        Self {
            chunks,
            dimension,
            model,
            metric: config.metric,
            fingerprint: String::new(),
            created_at,
            config: config.clone(),
            graph,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// The `k` nearest chunks, ascending by distance, ties by ordinal
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_>>, EmbeddingError> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let k = k.min(self.chunks.len());
        let candidates: Vec<usize> = match &self.graph {
            Some(graph) => {
                let knbn = (4 * k).max(self.config.ef_search).min(self.chunks.len());
                let found = graph.candidates(query, knbn, self.config.ef_search.max(knbn));
                if found.len() >= k {
                    found
                } else {
                    (0..self.chunks.len()).collect()
                }
            }
            None => (0..self.chunks.len()).collect(),
        };

        let mut hits: Vec<SearchHit<'_>> = candidates
            .into_iter()
            .filter_map(|ordinal| {
                self.chunks.get(ordinal).map(|chunk| SearchHit {
                    ordinal,
                    distance: distance(self.metric, query, &chunk.vector),
                    chunk,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        hits.dedup_by_key(|h| h.ordinal);
        hits.truncate(k);
        Ok(hits)
    }

    /// Write manifest and compressed payload into `dir`
    pub fn persist(&self, dir: &Path) -> Result<IndexManifest, IndexBuildError> {
        let payload = serde_json::to_vec(&self.chunks)
            .map_err(|e| IndexBuildError::Serialize(e.to_string()))?;
        let compressed =
            zstd::encode_all(&payload[..], ZSTD_LEVEL).map_err(|e| IndexBuildError::Persist {
                path: dir.join(PAYLOAD_FILE),
                source: e,
            })?;

        let manifest = IndexManifest {
            schema_version: INDEX_SCHEMA_VERSION,
            fingerprint: self.fingerprint.clone(),
            model: self.model.clone(),
            dimension: self.dimension,
            metric: self.metric,
            chunk_count: self.chunks.len(),
            file_count: self.file_count(),
            payload_checksum: blake3::hash(&compressed).to_hex().to_string(),
            created_at: self.created_at,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| IndexBuildError::Serialize(e.to_string()))?;

        // Payload first: a manifest only ever describes a complete payload
        let payload_path = dir.join(PAYLOAD_FILE);
        write_atomic(&payload_path, &compressed).map_err(|e| IndexBuildError::Persist {
            path: payload_path.clone(),
            source: e,
        })?;
        let manifest_path = dir.join(MANIFEST_FILE);
        write_atomic(&manifest_path, &manifest_bytes).map_err(|e| IndexBuildError::Persist {
            path: manifest_path.clone(),
            source: e,
        })?;

        info!(
            "Persisted index ({} chunks, {} bytes compressed) to {}",
            manifest.chunk_count,
            compressed.len(),
            dir.display()
        );
        Ok(manifest)
    }

    /// Read just the manifest of a persisted index
    pub fn read_manifest(dir: &Path) -> Result<IndexManifest, IndexCorruptError> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path).map_err(|_| IndexCorruptError::Missing { path: path.clone() })?;
        let manifest: IndexManifest =
            serde_json::from_slice(&bytes).map_err(|e| IndexCorruptError::Decode {
                path: path.clone(),
                message: e.to_string(),
            })?;
        if manifest.schema_version != INDEX_SCHEMA_VERSION {
            return Err(IndexCorruptError::SchemaVersion {
                found: manifest.schema_version,
                expected: INDEX_SCHEMA_VERSION,
            });
        }
        Ok(manifest)
    }

    /// Load a persisted index; the graph is rebuilt from stored vectors
    pub fn load(dir: &Path, config: &IndexConfig) -> Result<Self, IndexCorruptError> {
        let manifest = Self::read_manifest(dir)?;

        let payload_path = dir.join(PAYLOAD_FILE);
        let compressed = std::fs::read(&payload_path).map_err(|_| IndexCorruptError::Missing {
            path: payload_path.clone(),
        })?;
        if blake3::hash(&compressed).to_hex().as_str() != manifest.payload_checksum {
            return Err(IndexCorruptError::Checksum { path: payload_path });
        }

        let payload = zstd::decode_all(&compressed[..]).map_err(|e| IndexCorruptError::Decode {
            path: payload_path.clone(),
            message: e.to_string(),
        })?;
        let chunks: Vec<Chunk> =
            serde_json::from_slice(&payload).map_err(|e| IndexCorruptError::Decode {
                path: payload_path.clone(),
                message: e.to_string(),
            })?;

        if chunks.len() != manifest.chunk_count {
            return Err(IndexCorruptError::Inconsistent(format!(
                "manifest lists {} chunks, payload has {}",
                manifest.chunk_count,
                chunks.len()
            )));
        }
        if let Some(bad) = chunks.iter().find(|c| c.vector.len() != manifest.dimension) {
            return Err(IndexCorruptError::Inconsistent(format!(
                "chunk {} has {} dimensions, expected {}",
                bad.id,
                bad.vector.len(),
                manifest.dimension
            )));
        }

        let mut config = config.clone();
        config.metric = manifest.metric;
        let index = Self::from_parts(
            chunks,
            manifest.dimension,
            manifest.model,
            &config,
            manifest.created_at,
        )
        .with_fingerprint(manifest.fingerprint);
        info!("Loaded index ({} chunks) from {}", index.len(), dir.display());
        Ok(index)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, ordinal: usize) -> Option<&Chunk> {
        self.chunks.get(ordinal)
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Distinct source files represented in the index
    pub fn file_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.source_path.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Get vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }
}

fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                1.0
            } else {
                1.0 - dot / (norm_a * norm_b)
            }
        }
        DistanceMetric::L2 => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::chunk;
    use crate::config::ChunkingConfig;
    use crate::embedding::{EmbeddingProvider, HashEmbedder};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn embedder() -> BatchEmbedder {
        BatchEmbedder::new(Arc::new(HashEmbedder::new(64).unwrap()), 16)
    }

    fn sample_chunks(count: usize) -> Vec<Chunk> {
        let cfg = ChunkingConfig {
            chunk_size: 64,
            overlap: 0,
            structural: false,
        };
        let text: String = (0..count)
            .map(|i| format!("topic{:04} alpha{} beta{}\n", i, i % 7, i % 11))
            .collect();
        chunk("notes.txt", &text, &cfg)
    }

    #[test]
    fn test_build_and_search() {
        let chunks = sample_chunks(20);
        let index = VectorIndex::build(chunks, &embedder(), &IndexConfig::default()).unwrap();
        assert!(!index.is_empty());
        assert_eq!(index.dimension(), 64);
        assert_eq!(index.file_count(), 1);
        assert!(!index.has_graph());

        let target = index.chunk(3).unwrap().text.clone();
        let query = embedder().encode_query(&target).unwrap();
        let hits = index.search(&query, 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].ordinal, 3);
        assert!(hits[0].distance < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_no_chunks() {
        let result = VectorIndex::build(Vec::new(), &embedder(), &IndexConfig::default());
        assert!(matches!(result, Err(IndexBuildError::NoChunks)));

        let empty = VectorIndex::empty(64, "hash-v1", &IndexConfig::default());
        assert!(empty.search(&vec![0.0; 64], 5).unwrap().is_empty());
    }

    #[test]
    fn test_k_clamped_and_dimension_checked() {
        let index = VectorIndex::build(sample_chunks(4), &embedder(), &IndexConfig::default()).unwrap();
        let query = embedder().encode_query("alpha").unwrap();
        assert_eq!(index.search(&query, 100).unwrap().len(), index.len());
        assert!(index.search(&query, 0).unwrap().is_empty());
        assert!(matches!(
            index.search(&[1.0; 3], 2),
            Err(EmbeddingError::DimensionMismatch { expected: 64, actual: 3 })
        ));
    }

    #[test]
    fn test_ties_break_by_ordinal() {
        let cfg = ChunkingConfig {
            chunk_size: 32,
            overlap: 0,
            structural: false,
        };
        // Identical passages produce identical vectors
        let text = "same words here\n".repeat(8);
        let chunks = chunk("dup.txt", &text, &cfg);
        let index = VectorIndex::build(chunks, &embedder(), &IndexConfig::default()).unwrap();
        let query = embedder().encode_query("same words here").unwrap();
        let ordinals: Vec<usize> = index.search(&query, 4).unwrap().iter().map(|h| h.ordinal).collect();
        let mut sorted = ordinals.clone();
        sorted.sort();
        assert_eq!(ordinals, sorted);
    }

    #[test]
    fn test_hnsw_path_rescored() {
        let config = IndexConfig {
            exact_search_threshold: 10,
            ..IndexConfig::default()
        };
        let index = VectorIndex::build(sample_chunks(300), &embedder(), &config).unwrap();
        assert!(index.has_graph());

        let target = index.chunk(42).unwrap().text.clone();
        let query = embedder().encode_query(&target).unwrap();
        let first = index.search(&query, 5).unwrap();
        let second = index.search(&query, 5).unwrap();
        assert_eq!(first[0].ordinal, 42);
        let ords = |hits: &[SearchHit<'_>]| hits.iter().map(|h| h.ordinal).collect::<Vec<_>>();
        assert_eq!(ords(&first), ords(&second));
    }

    #[test]
    fn test_l2_metric() {
        let config = IndexConfig {
            metric: DistanceMetric::L2,
            ..IndexConfig::default()
        };
        let index = VectorIndex::build(sample_chunks(10), &embedder(), &config).unwrap();
        let query = HashEmbedder::new(64).unwrap().embed(&index.chunk(1).unwrap().text).unwrap();
        let hits = index.search(&query, 1).unwrap();
        assert_eq!(hits[0].ordinal, 1);
        assert_eq!(index.metric(), DistanceMetric::L2);
    }

    #[test]
    fn test_persist_and_load() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::build(sample_chunks(30), &embedder(), &IndexConfig::default())
            .unwrap()
            .with_fingerprint("abc123");
        let manifest = index.persist(temp.path()).unwrap();
        assert_eq!(manifest.chunk_count, index.len());

        let loaded = VectorIndex::load(temp.path(), &IndexConfig::default()).unwrap();
        assert_eq!(loaded.fingerprint(), "abc123");
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.chunk(7).unwrap().text, index.chunk(7).unwrap().text);

        let query = embedder().encode_query("topic0007").unwrap();
        let a: Vec<usize> = index.search(&query, 5).unwrap().iter().map(|h| h.ordinal).collect();
        let b: Vec<usize> = loaded.search(&query, 5).unwrap().iter().map(|h| h.ordinal).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_detects_corruption() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            VectorIndex::load(temp.path(), &IndexConfig::default()),
            Err(IndexCorruptError::Missing { .. })
        ));

        let index = VectorIndex::build(sample_chunks(5), &embedder(), &IndexConfig::default()).unwrap();
        index.persist(temp.path()).unwrap();

        // Flip the payload
        let payload = temp.path().join(PAYLOAD_FILE);
        let mut bytes = std::fs::read(&payload).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&payload, &bytes).unwrap();
        assert!(matches!(
            VectorIndex::load(temp.path(), &IndexConfig::default()),
            Err(IndexCorruptError::Checksum { .. })
        ));

        // Future schema
        index.persist(temp.path()).unwrap();
        let manifest_path = temp.path().join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&manifest_path).unwrap();
        std::fs::write(
            &manifest_path,
            text.replace("\"schema_version\": 1", "\"schema_version\": 99"),
        )
        .unwrap();
        assert!(matches!(
            VectorIndex::load(temp.path(), &IndexConfig::default()),
            Err(IndexCorruptError::SchemaVersion { found: 99, .. })
        ));

        std::fs::write(&manifest_path, "{ not json").unwrap();
        assert!(matches!(
            VectorIndex::load(temp.path(), &IndexConfig::default()),
            Err(IndexCorruptError::Decode { .. })
        ));
    }
}
