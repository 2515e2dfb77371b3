use super::{parse_args, Tool, ToolContext, ToolError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::warn;
use walkdir::WalkDir;

fn default_directory() -> String {
    ".".to_string()
}

#[derive(Deserialize)]
struct Params {
    #[serde(default = "default_directory", alias = "path")]
    directory_path: String,
    #[serde(default)]
    depth: Option<usize>,
}

/// Directory listing with per-extension counts
pub struct DirectoryListTool;

impl Tool for DirectoryListTool {
    fn name(&self) -> &'static str {
        "directory_list"
    }

    fn description(&self) -> &'static str {
        "List the subdirectories and files of a repository directory"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory_path": {"type": "string", "description": "Directory relative to the repository root (default \".\")"},
                "depth": {"type": "integer", "description": "How many levels to descend (default 1)"}
            },
            "required": []
        })
    }

    fn run(&self, arguments: &Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_args(self.name(), arguments)?;
        let dir = ctx.existing_path(&params.directory_path)?;
        if !dir.is_dir() {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                message: format!("{} is not a directory", params.directory_path),
            });
        }
        let depth = params.depth.unwrap_or(1).clamp(1, ctx.config.max_list_depth.max(1));
        let relative = ctx.repo.relative(&dir);

        let mut directories = Vec::new();
        let mut files = Vec::new();
        let mut extensions: BTreeMap<String, usize> = BTreeMap::new();

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.')
                    && !(entry.file_type().is_dir() && ctx.repo.is_ignored_dir(&name))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let shown = entry
                .path()
                .strip_prefix(&dir)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if entry.file_type().is_dir() {
                directories.push(format!("{}/", shown));
            } else {
                let ext = entry
                    .path()
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                    .unwrap_or_else(|| "(none)".to_string());
                *extensions.entry(ext).or_default() += 1;
                let marker = if ctx.repo.is_supported(entry.path()) {
                    ""
                } else {
                    " (not indexed)"
                };
                files.push(format!("{}{}", shown, marker));
            }
        }
        directories.sort();
        files.sort();

        let mut out = format!("Directory: {} (depth {})\n", relative, depth);
        if directories.is_empty() && files.is_empty() {
            out.push_str("\nDirectory is empty.\n");
            return Ok(out);
        }

        let total = directories.len() + files.len();
        let mut budget = ctx.config.max_list_entries;
        for (title, entries) in [("Subdirectories", &directories), ("Files", &files)] {
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{} ({}):", title, entries.len());
            for entry in entries.iter().take(budget) {
                let _ = writeln!(out, "  {}", entry);
            }
            budget = budget.saturating_sub(entries.len());
        }
        if total > ctx.config.max_list_entries {
            let _ = writeln!(
                out,
                "[truncated: {} more entries not shown]",
                total - ctx.config.max_list_entries
            );
        }

        if !extensions.is_empty() {
            let counts: Vec<String> = extensions
                .iter()
                .map(|(ext, n)| format!("{} {}", ext, n))
                .collect();
            let _ = writeln!(out, "\nFile types: {}", counts.join(", "));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::toolset;
    use super::super::RepoTool;
    use super::*;
    use std::fs;

    fn fixture() -> Vec<(&'static str, &'static str)> {
        vec![
            ("main.py", "print('hi')\n"),
            ("api/routes.py", "def a():\n    pass\n"),
            ("api/models/user.py", "class User:\n    pass\n"),
            ("docs/guide.md", "# Guide\n"),
            ("node_modules/pkg/index.js", "x"),
            (".git/config", "[core]"),
        ]
    }

    #[test]
    fn test_lists_top_level() {
        let (_temp, tools) = toolset(&fixture());
        let out = tools.run(RepoTool::DirectoryList, &json!({})).unwrap();
        assert!(out.starts_with("Directory: . (depth 1)"), "{out}");
        assert!(out.contains("Subdirectories (2):\n  api/\n  docs/\n"), "{out}");
        assert!(out.contains("Files (1):\n  main.py\n"), "{out}");
        assert!(!out.contains("node_modules"));
        assert!(!out.contains(".git"));
    }

    #[test]
    fn test_depth_is_capped() {
        let (temp, tools) = toolset(&fixture());
        fs::create_dir_all(temp.path().join("a/b/c/d/e")).unwrap();
        let out = tools
            .run(RepoTool::DirectoryList, &json!({"directory_path": "a", "depth": 10}))
            .unwrap();
        assert!(out.starts_with("Directory: a (depth 3)"), "{out}");
        assert!(out.contains("b/c/d/"));
        assert!(!out.contains("b/c/d/e/"));
    }

    #[test]
    fn test_extension_counts() {
        let (_temp, tools) = toolset(&fixture());
        let out = tools
            .run(RepoTool::DirectoryList, &json!({"directory_path": "api", "depth": 2}))
            .unwrap();
        assert!(out.contains("models/user.py"), "{out}");
        assert!(out.contains("File types: .py 2"), "{out}");
    }

    #[test]
    fn test_empty_directory() {
        let (temp, tools) = toolset(&fixture());
        fs::create_dir_all(temp.path().join("scratch")).unwrap();
        let out = tools
            .run(RepoTool::DirectoryList, &json!({"directory_path": "scratch"}))
            .unwrap();
        assert_eq!(out, "Directory: scratch (depth 1)\n\nDirectory is empty.\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let (temp, tools) = toolset(&fixture());
        let locked = temp.path().join("locked");
        fs::create_dir_all(locked.join("inner")).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let out = tools
            .run(RepoTool::DirectoryList, &json!({"depth": 2}))
            .unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(out.contains("  locked/\n"), "{out}");
        assert!(out.contains("api/routes.py"), "{out}");
    }

    #[test]
    fn test_escape_and_missing() {
        let (_temp, tools) = toolset(&fixture());
        let err = tools
            .run(RepoTool::DirectoryList, &json!({"directory_path": "../.."}))
            .unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
        let err = tools
            .run(RepoTool::DirectoryList, &json!({"directory_path": "nowhere"}))
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }
}
