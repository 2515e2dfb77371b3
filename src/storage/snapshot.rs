//! Repository snapshots and index fingerprints

use crate::config::{ChunkingConfig, DistanceMetric, FingerprintMode};
use crate::repository::Repository;
use std::time::UNIX_EPOCH;

/// Bumped whenever chunking or index layout changes meaning
const FINGERPRINT_VERSION: &str = "codepal-index-v1";

/// One file as seen by the fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub path: String,
    pub size: u64,
    /// Nanoseconds since the epoch (metadata mode)
    pub modified_ns: Option<u128>,
    /// BLAKE3 of the content (content mode)
    pub content_hash: Option<String>,
}

/// The indexable files of a repository at one point in time
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub mode: FingerprintMode,
    pub entries: Vec<SnapshotEntry>,
}

/// Everything besides file state that changes what an index contains
#[derive(Debug, Clone, Copy)]
pub struct IndexParams<'a> {
    pub chunking: &'a ChunkingConfig,
    pub model: &'a str,
    pub dimension: usize,
    pub metric: DistanceMetric,
}

impl Snapshot {
    pub fn capture(repo: &Repository, mode: FingerprintMode) -> Self {
        let entries = repo
            .files()
            .into_iter()
            .map(|file| {
                let (modified_ns, content_hash) = match mode {
                    FingerprintMode::Metadata => (
                        file.modified
                            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                            .map(|d| d.as_nanos()),
                        None,
                    ),
                    FingerprintMode::Content => {
                        let hash = match std::fs::read(&file.path) {
                            Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
                            Err(e) => {
                                tracing::warn!("Cannot hash {}: {}", file.relative, e);
                                "unreadable".to_string()
                            }
                        };
                        (None, Some(hash))
                    }
                };
                SnapshotEntry {
                    path: file.relative,
                    size: file.size,
                    modified_ns,
                    content_hash,
                }
            })
            .collect();

        Self { mode, entries }
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Hex BLAKE3 over the snapshot and the index parameters
    pub fn fingerprint(&self, params: IndexParams<'_>) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        hasher.update(b"\n");

        for entry in &self.entries {
            let line = format!(
                "{}\0{}\0{}\0{}\n",
                entry.path,
                entry.size,
                entry.modified_ns.map(|n| n.to_string()).unwrap_or_default(),
                entry.content_hash.as_deref().unwrap_or_default()
            );
            hasher.update(line.as_bytes());
        }

        let params_line = format!(
            "chunk_size={} overlap={} structural={} model={} dimension={} metric={}\n",
            params.chunking.chunk_size,
            params.chunking.overlap,
            params.chunking.structural,
            params.model,
            params.dimension,
            params.metric.as_str()
        );
        hasher.update(params_line.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use std::fs;
    use tempfile::TempDir;

    fn params(chunking: &ChunkingConfig) -> IndexParams<'_> {
        IndexParams {
            chunking,
            model: "hash-v1",
            dimension: 384,
            metric: DistanceMetric::Cosine,
        }
    }

    fn repo_with(files: &[(&str, &str)]) -> (TempDir, Repository) {
        let temp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = temp.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        let repo = Repository::open(temp.path(), RepositoryConfig::default()).unwrap();
        (temp, repo)
    }

    #[test]
    fn test_fingerprint_stable_without_changes() {
        let (_temp, repo) = repo_with(&[("a.py", "x = 1\n"), ("lib/b.rs", "fn b() {}\n")]);
        let chunking = ChunkingConfig::default();

        for mode in [FingerprintMode::Metadata, FingerprintMode::Content] {
            let first = Snapshot::capture(&repo, mode).fingerprint(params(&chunking));
            let second = Snapshot::capture(&repo, mode).fingerprint(params(&chunking));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_fingerprint_tracks_content_and_params() {
        let (temp, repo) = repo_with(&[("a.py", "x = 1\n")]);
        let chunking = ChunkingConfig::default();
        let before = Snapshot::capture(&repo, FingerprintMode::Content).fingerprint(params(&chunking));

        fs::write(temp.path().join("a.py"), "x = 2\n").unwrap();
        let after = Snapshot::capture(&repo, FingerprintMode::Content).fingerprint(params(&chunking));
        assert_ne!(before, after);

        let smaller = ChunkingConfig {
            chunk_size: 500,
            ..ChunkingConfig::default()
        };
        let resized = Snapshot::capture(&repo, FingerprintMode::Content).fingerprint(params(&smaller));
        assert_ne!(after, resized);

        let mut l2 = params(&chunking);
        l2.metric = DistanceMetric::L2;
        assert_ne!(after, Snapshot::capture(&repo, FingerprintMode::Content).fingerprint(l2));
    }

    #[test]
    fn test_new_file_changes_fingerprint() {
        let (temp, repo) = repo_with(&[("a.py", "x = 1\n")]);
        let chunking = ChunkingConfig::default();
        let before = Snapshot::capture(&repo, FingerprintMode::Metadata);
        fs::write(temp.path().join("b.py"), "y = 1\n").unwrap();
        let after = Snapshot::capture(&repo, FingerprintMode::Metadata);

        assert_eq!(after.file_count(), 2);
        assert_ne!(before.fingerprint(params(&chunking)), after.fingerprint(params(&chunking)));
    }
}
