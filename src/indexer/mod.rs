//! Open-or-build for repository indexes
//!
//! The fingerprint of a repository snapshot decides everything: an index
//! already held in memory for it is shared, a persisted index whose manifest
//! carries it is loaded, and anything else is rebuilt and persisted.
//! Concurrent callers asking for the same fingerprint wait on one build.
//! Only the latest snapshot of each repository stays cached in memory.

use crate::chunking;
use crate::config::{expand_path, ChunkingConfig, Config, FingerprintMode, IndexConfig};
use crate::embedding::{
    provider_from_config, BatchEmbedder, IndexBuildError, IndexCorruptError, VectorIndex,
};
use crate::error::Result;
use crate::repository::Repository;
use crate::storage::{IndexParams, IndexStore, Snapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Where the index of a handle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    Built,
    Loaded,
}

/// A file the build passed over
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub skipped: Vec<SkippedFile>,
    pub chunk_count: usize,
    pub duration_ms: u64,
    pub persisted: bool,
}

/// A ready-to-search index for one repository snapshot
#[derive(Clone)]
pub struct IndexHandle {
    pub index: Arc<VectorIndex>,
    pub origin: IndexOrigin,
    pub fingerprint: String,
    pub report: BuildReport,
}

pub struct Indexer {
    chunking: ChunkingConfig,
    index_config: IndexConfig,
    fingerprint_mode: FingerprintMode,
    embedder: BatchEmbedder,
    store: Option<IndexStore>,
    /// Repository root -> fingerprint and the cell holding its index
    cells: Mutex<HashMap<PathBuf, (String, Arc<OnceCell<IndexHandle>>)>>,
    builds: AtomicUsize,
}

impl Indexer {
    /// Indexer with an explicit embedder; `store = None` keeps indexes in memory only
    pub fn new(config: &Config, embedder: BatchEmbedder, store: Option<IndexStore>) -> Self {
        Self {
            chunking: config.chunking.clone(),
            index_config: config.index.clone(),
            fingerprint_mode: config.index.fingerprint,
            embedder,
            store,
            cells: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Indexer using the configured embedding provider and index directory
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = provider_from_config(&config.embedding)?;
        let embedder = BatchEmbedder::new(provider, config.embedding.batch_size);
        let store = IndexStore::new(expand_path(&config.storage.index_dir)?)?;
        Ok(Self::new(config, embedder, Some(store)))
    }

    pub fn embedder(&self) -> &BatchEmbedder {
        &self.embedder
    }

    pub fn store(&self) -> Option<&IndexStore> {
        self.store.as_ref()
    }

    /// Number of full builds this indexer has run
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Fingerprint of the repository as it is now
    pub fn fingerprint(&self, repo: &Repository) -> String {
        compute_fingerprint(
            repo,
            self.fingerprint_mode,
            &self.chunking,
            &self.embedder,
            &self.index_config,
        )
    }

    /// Reuse, load or build the index for the current repository snapshot
    pub async fn open_or_build(&self, repo: &Repository, force: bool) -> Result<IndexHandle> {
        let fingerprint = {
            let repo = repo.clone();
            let mode = self.fingerprint_mode;
            let chunking = self.chunking.clone();
            let embedder = self.embedder.clone();
            let index_config = self.index_config.clone();
            tokio::task::spawn_blocking(move || {
                compute_fingerprint(&repo, mode, &chunking, &embedder, &index_config)
            })
            .await
            .map_err(|e| IndexBuildError::Interrupted(e.to_string()))?
        };
        debug!("Repository fingerprint: {}", fingerprint);

        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            let reusable = match cells.get(repo.root()) {
                Some((cached, cell)) if !force && *cached == fingerprint => Some(cell.clone()),
                _ => None,
            };
            match reusable {
                Some(cell) => cell,
                None => {
                    let cell = Arc::new(OnceCell::new());
                    let superseded = cells.insert(
                        repo.root().to_path_buf(),
                        (fingerprint.clone(), cell.clone()),
                    );
                    if superseded.is_some() {
                        debug!("Dropping cached index of {}", repo.root().display());
                    }
                    cell
                }
            }
        };

        let handle = cell
            .get_or_try_init(|| self.load_or_build(repo, fingerprint.clone(), force))
            .await?;
        Ok(handle.clone())
    }

    async fn load_or_build(
        &self,
        repo: &Repository,
        fingerprint: String,
        force: bool,
    ) -> Result<IndexHandle> {
        let dir = self.store.as_ref().map(|s| s.dir_for(repo.root()));

        if let (Some(dir), false) = (dir.clone(), force) {
            let index_config = self.index_config.clone();
            let expected = fingerprint.clone();
            let loaded =
                tokio::task::spawn_blocking(move || load_matching(&dir, &expected, &index_config))
                    .await
                    .map_err(|e| IndexBuildError::Interrupted(e.to_string()))?;

            match loaded {
                Ok(Some(index)) => {
                    return Ok(IndexHandle {
                        report: BuildReport {
                            files_indexed: index.file_count(),
                            chunk_count: index.len(),
                            persisted: true,
                            ..BuildReport::default()
                        },
                        index: Arc::new(index),
                        origin: IndexOrigin::Loaded,
                        fingerprint,
                    });
                }
                Ok(None) => info!("Persisted index is stale; rebuilding"),
                Err(IndexCorruptError::Missing { .. }) => debug!("No persisted index found"),
                Err(e) => warn!("Persisted index unusable ({}); rebuilding", e),
            }
        }

        // A forced rebuild starts from an empty directory
        if let (Some(store), true) = (&self.store, force) {
            if let Err(e) = store.remove(repo.root()) {
                warn!("Failed to clear persisted index: {}", e);
            }
        }

        let (index, report) = {
            let repo = repo.clone();
            let chunking = self.chunking.clone();
            let index_config = self.index_config.clone();
            let embedder = self.embedder.clone();
            let fingerprint = fingerprint.clone();
            tokio::task::spawn_blocking(move || {
                let (index, mut report) = build_index(&repo, &chunking, &index_config, &embedder)?;
                let index = index.with_fingerprint(fingerprint);
                if let Some(dir) = dir {
                    if index.is_empty() {
                        debug!("Empty index is not persisted");
                    } else {
                        match index.persist(&dir) {
                            Ok(_) => report.persisted = true,
                            Err(e) => warn!("Failed to persist index: {}", e),
                        }
                    }
                }
                Ok::<_, IndexBuildError>((index, report))
            })
            .await
            .map_err(|e| IndexBuildError::Interrupted(e.to_string()))??
        };
        self.builds.fetch_add(1, Ordering::SeqCst);

        Ok(IndexHandle {
            index: Arc::new(index),
            origin: IndexOrigin::Built,
            fingerprint,
            report,
        })
    }
}

/// The persisted index in `dir`, if its manifest carries `fingerprint`
fn load_matching(
    dir: &Path,
    fingerprint: &str,
    index_config: &IndexConfig,
) -> std::result::Result<Option<VectorIndex>, IndexCorruptError> {
    let manifest = VectorIndex::read_manifest(dir)?;
    if manifest.fingerprint != fingerprint {
        return Ok(None);
    }
    VectorIndex::load(dir, index_config).map(Some)
}

fn compute_fingerprint(
    repo: &Repository,
    mode: FingerprintMode,
    chunking: &ChunkingConfig,
    embedder: &BatchEmbedder,
    index_config: &IndexConfig,
) -> String {
    Snapshot::capture(repo, mode).fingerprint(IndexParams {
        chunking,
        model: embedder.model_name(),
        dimension: embedder.dimension(),
        metric: index_config.metric,
    })
}

/// Chunk every indexable file and encode the result
fn build_index(
    repo: &Repository,
    chunking: &ChunkingConfig,
    index_config: &IndexConfig,
    embedder: &BatchEmbedder,
) -> std::result::Result<(VectorIndex, BuildReport), IndexBuildError> {
    let start = Instant::now();
    let files = repo.files();
    let mut report = BuildReport {
        files_seen: files.len(),
        ..BuildReport::default()
    };
    info!("Indexing {} files under {}", files.len(), repo.root().display());

    let mut chunks = Vec::new();
    for file in &files {
        let bytes = match std::fs::read(&file.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read {}: {}", file.relative, e);
                report.skipped.push(SkippedFile {
                    path: file.relative.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        match chunking::chunk_bytes(&file.relative, &bytes, chunking) {
            Ok(file_chunks) if file_chunks.is_empty() => {
                report.skipped.push(SkippedFile {
                    path: file.relative.clone(),
                    reason: "no content".to_string(),
                });
            }
            Ok(file_chunks) => {
                report.files_indexed += 1;
                chunks.extend(file_chunks);
            }
            Err(e) => {
                debug!("Skipping {}", e);
                report.skipped.push(SkippedFile {
                    path: file.relative.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    report.chunk_count = chunks.len();

    let index = match VectorIndex::build(chunks, embedder, index_config) {
        Ok(index) => index,
        Err(IndexBuildError::NoChunks) => {
            info!("Repository has no indexable content");
            VectorIndex::empty(embedder.dimension(), embedder.model_name(), index_config)
        }
        Err(e) => return Err(e),
    };

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Index ready: {} chunks from {} files ({} skipped) in {}ms",
        report.chunk_count,
        report.files_indexed,
        report.skipped.len(),
        report.duration_ms
    );
    Ok((index, report))
}
