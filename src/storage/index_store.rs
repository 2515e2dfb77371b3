//! On-disk layout of persisted indexes
//!
//! Each repository gets its own directory named after the BLAKE3 hash of its
//! canonical root, so two checkouts never share an index.

use crate::error::{CodePalError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory holding one persisted index per repository
#[derive(Debug, Clone)]
pub struct IndexStore {
    base_path: PathBuf,
}

impl IndexStore {
    /// Create the store, making the base directory if needed
    pub fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path).map_err(|e| CodePalError::Io {
            source: e,
            context: format!("Failed to create index directory: {}", base_path.display()),
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory for a repository root (not created)
    pub fn dir_for(&self, root: &Path) -> PathBuf {
        let hash = blake3::hash(root.to_string_lossy().as_bytes());
        self.base_path.join(&hash.to_hex()[..16])
    }

    /// Delete the persisted index of a repository, if any
    pub fn remove(&self, root: &Path) -> Result<()> {
        let dir = self.dir_for(root);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| CodePalError::Io {
                source: e,
                context: format!("Failed to remove index directory: {}", dir.display()),
            })?;
        }
        Ok(())
    }

    /// Total bytes persisted for a repository
    pub fn stored_size(&self, root: &Path) -> u64 {
        let Ok(entries) = fs::read_dir(self.dir_for(root)) else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}

/// Write `data` next to `path` under a temporary name, sync, then rename
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Format size as human-readable string
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
