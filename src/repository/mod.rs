//! Repository root, path containment and the indexable file walk
//!
//! Every path a tool receives is resolved here. Resolution is lexical first
//! (so `..` cannot climb out before the filesystem is touched) and then
//! canonical through the deepest existing ancestor, which also catches
//! symlinks that point outside the root.

use crate::config::RepositoryConfig;
use crate::error::{CodePalError, Result};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

/// A requested path resolved to a location outside the repository root
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("path escapes the repository root: {requested}")]
pub struct PathEscapeError {
    pub requested: String,
}

/// One indexable file
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub path: PathBuf,
    /// Root-relative path with `/` separators
    pub relative: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// A read-only repository snapshot rooted at a canonical directory
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    config: RepositoryConfig,
}

impl Repository {
    /// Open a repository; the root must be an existing directory
    pub fn open(root: &Path, config: RepositoryConfig) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|_| CodePalError::RepositoryNotFound {
                path: root.to_path_buf(),
            })?;
        if !root.is_dir() {
            return Err(CodePalError::RepositoryNotFound { path: root });
        }
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Resolve a tool argument to an absolute path inside the root
    pub fn resolve(&self, requested: &str) -> std::result::Result<PathBuf, PathEscapeError> {
        let trimmed = requested.trim();
        let candidate = if trimmed.is_empty() {
            self.root.clone()
        } else {
            let path = Path::new(trimmed);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.root.join(path)
            }
        };

        let resolved = resolve_via_ancestors(&normalize_lexically(&candidate));
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(PathEscapeError {
                requested: requested.to_string(),
            })
        }
    }

    /// Root-relative display form of an absolute path inside the root
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if joined.is_empty() {
            ".".to_string()
        } else {
            joined
        }
    }

    /// Whether a directory name is never descended into
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.config.ignore_dirs.iter().any(|d| d == name)
    }

    /// Whether a file name has one of the indexed extensions
    pub fn is_supported(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let dotted = format!(".{}", ext.to_lowercase());
        self.config.extensions.iter().any(|e| e.to_lowercase() == dotted)
    }

    /// Walk the repository and return indexable files sorted by relative path
    pub fn files(&self) -> Vec<RepoFile> {
        let max_size = self.config.max_file_size_bytes();
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                if name.starts_with('.') {
                    return false;
                }
                !(entry.file_type().is_dir() && self.is_ignored_dir(&name))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_supported(entry.path()) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.len() > max_size {
                tracing::debug!(
                    "Skipping {} ({} bytes exceeds limit)",
                    entry.path().display(),
                    metadata.len()
                );
                continue;
            }
            files.push(RepoFile {
                relative: self.relative(entry.path()),
                path: entry.path().to_path_buf(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
            });
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        files
    }

    /// Relative paths of indexable files whose file name equals `name`
    pub fn find_by_name(&self, name: &str) -> Vec<String> {
        self.files()
            .into_iter()
            .filter(|f| f.relative.rsplit('/').next() == Some(name))
            .map(|f| f.relative)
            .collect()
    }
}

/// Collapse `.` and `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and re-attach the missing tail
fn resolve_via_ancestors(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut suffix = PathBuf::new();
    while !existing.exists() {
        if let Some(parent) = existing.parent() {
            if let Some(name) = existing.file_name() {
                suffix = PathBuf::from(name).join(&suffix);
            }
            existing = parent;
        } else {
            break;
        }
    }
    let base = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    if suffix.as_os_str().is_empty() {
        base
    } else {
        base.join(&suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Repository) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("api")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("main.py"), "print('hi')\n").unwrap();
        fs::write(root.join("api/routes.py"), "def a():\n    pass\n").unwrap();
        fs::write(root.join("api/logo.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join(".git/config"), "[core]").unwrap();
        fs::write(root.join(".env.py"), "SECRET=1").unwrap();
        let repo = Repository::open(root, RepositoryConfig::default()).unwrap();
        (temp, repo)
    }

    #[test]
    fn test_files_respect_filters() {
        let (_temp, repo) = fixture();
        let files: Vec<String> = repo.files().into_iter().map(|f| f.relative).collect();
        assert_eq!(files, vec!["api/routes.py", "main.py"]);
    }

    #[test]
    fn test_resolve_inside_root() {
        let (_temp, repo) = fixture();
        let path = repo.resolve("api/routes.py").unwrap();
        assert!(path.ends_with("api/routes.py"));
        assert_eq!(repo.resolve(".").unwrap(), repo.root());
        assert_eq!(repo.resolve("").unwrap(), repo.root());
        // Not existing yet is still contained
        assert!(repo.resolve("api/new_file.py").is_ok());
        // `..` that stays inside is fine
        assert!(repo.resolve("api/../main.py").unwrap().ends_with("main.py"));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let (_temp, repo) = fixture();
        assert!(repo.resolve("../outside.txt").is_err());
        assert!(repo.resolve("api/../../etc/passwd").is_err());
        assert!(repo.resolve("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let (temp, repo) = fixture();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        let err = repo.resolve("link/secret.txt").unwrap_err();
        assert_eq!(err.requested, "link/secret.txt");
    }

    #[test]
    fn test_relative_and_find_by_name() {
        let (_temp, repo) = fixture();
        let abs = repo.resolve("api/routes.py").unwrap();
        assert_eq!(repo.relative(&abs), "api/routes.py");
        assert_eq!(repo.find_by_name("routes.py"), vec!["api/routes.py"]);
        assert!(repo.find_by_name("missing.py").is_empty());
    }

    #[test]
    fn test_open_missing_root() {
        let result = Repository::open(Path::new("/definitely/not/here"), RepositoryConfig::default());
        assert!(matches!(result, Err(CodePalError::RepositoryNotFound { .. })));
    }
}
