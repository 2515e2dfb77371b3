//! Repository tools available to the agent
//!
//! The set is closed: [`RepoTool`] names every tool and dispatches to its
//! [`Tool`] implementation. Tools read the repository through a shared
//! [`ToolContext`] and never write.

mod directory_list;
mod file_read;
mod file_search;
mod structural_parse;

pub use directory_list::DirectoryListTool;
pub use file_read::FileReadTool;
pub use file_search::{FileSearchTool, NO_CONTENT_INDEXED};
pub use structural_parse::StructuralParseTool;

use crate::config::ToolsConfig;
use crate::embedding::{BatchEmbedder, EmbeddingError, VectorIndex};
use crate::repository::{PathEscapeError, Repository};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Suggestions offered with a missing file
const MAX_SUGGESTIONS: usize = 5;

/// Bytes inspected for NUL when deciding whether a file is text
const BINARY_PROBE_BYTES: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error(transparent)]
    PathEscape(#[from] PathEscapeError),

    #[error("not found: {path}{}", render_suggestions(.suggestions))]
    NotFound {
        path: String,
        suggestions: Vec<String>,
    },

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("{path} is not UTF-8 text")]
    Decode { path: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("search failed: {0}")]
    Search(#[from] EmbeddingError),
}

fn render_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {})", suggestions.join(", "))
    }
}

/// Everything a tool may look at
pub struct ToolContext {
    pub repo: Repository,
    pub index: Arc<VectorIndex>,
    pub embedder: BatchEmbedder,
    pub config: ToolsConfig,
}

impl ToolContext {
    /// Resolve a path argument, mapping a missing target to `NotFound` with
    /// same-named files as suggestions
    pub(crate) fn existing_path(
        &self,
        requested: &str,
    ) -> Result<std::path::PathBuf, ToolError> {
        let path = self.repo.resolve(requested)?;
        if path.exists() {
            return Ok(path);
        }
        let suggestions = Path::new(requested.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| {
                self.repo
                    .find_by_name(name)
                    .into_iter()
                    .take(MAX_SUGGESTIONS)
                    .collect()
            })
            .unwrap_or_default();
        Err(ToolError::NotFound {
            path: requested.to_string(),
            suggestions,
        })
    }

    /// Read at most `max_file_bytes` of a text file.
    ///
    /// Returns the decoded prefix and the file's full size. A multi-byte
    /// character cut by the cap is dropped rather than reported as invalid.
    pub(crate) fn read_text(&self, path: &Path) -> Result<(String, u64), ToolError> {
        let display = self.repo.relative(path);
        let io_err = |source| ToolError::Io {
            path: display.clone(),
            source,
        };

        let file = std::fs::File::open(path).map_err(io_err)?;
        let size = file.metadata().map_err(io_err)?.len();
        let mut bytes = Vec::new();
        file.take(self.config.max_file_bytes as u64)
            .read_to_end(&mut bytes)
            .map_err(io_err)?;

        let probe = &bytes[..bytes.len().min(BINARY_PROBE_BYTES)];
        if probe.contains(&0) {
            return Err(ToolError::Decode { path: display });
        }

        let truncated = (bytes.len() as u64) < size;
        match String::from_utf8(bytes) {
            Ok(text) => Ok((text, size)),
            Err(e) if truncated && e.utf8_error().error_len().is_none() => {
                let valid = e.utf8_error().valid_up_to();
                let mut bytes = e.into_bytes();
                bytes.truncate(valid);
                String::from_utf8(bytes)
                    .map(|text| (text, size))
                    .map_err(|_| ToolError::Decode { path: display })
            }
            Err(_) => Err(ToolError::Decode { path: display }),
        }
    }
}

/// One tool's contract
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// One line shown to the model
    fn description(&self) -> &'static str;

    /// JSON shape of the arguments object
    fn parameters(&self) -> Value;

    fn run(&self, arguments: &Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// The closed set of repository tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoTool {
    FileSearch,
    FileRead,
    StructuralParse,
    DirectoryList,
}

impl RepoTool {
    pub const ALL: [RepoTool; 4] = [
        RepoTool::FileSearch,
        RepoTool::FileRead,
        RepoTool::StructuralParse,
        RepoTool::DirectoryList,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name.trim())
    }

    pub fn name(self) -> &'static str {
        self.implementation().name()
    }

    pub fn implementation(self) -> &'static dyn Tool {
        match self {
            RepoTool::FileSearch => &FileSearchTool,
            RepoTool::FileRead => &FileReadTool,
            RepoTool::StructuralParse => &StructuralParseTool,
            RepoTool::DirectoryList => &DirectoryListTool,
        }
    }
}

impl fmt::Display for RepoTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tool description as rendered into prompts
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// The tools bound to one repository and index; cheap to clone
#[derive(Clone)]
pub struct ToolSet {
    ctx: Arc<ToolContext>,
}

impl ToolSet {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn get(&self, name: &str) -> Option<RepoTool> {
        RepoTool::from_name(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        RepoTool::ALL.iter().map(|t| t.name()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        RepoTool::ALL
            .iter()
            .map(|t| {
                let tool = t.implementation();
                ToolSpec {
                    name: tool.name(),
                    description: tool.description(),
                    parameters: tool.parameters(),
                }
            })
            .collect()
    }

    pub fn run(&self, tool: RepoTool, arguments: &Value) -> Result<String, ToolError> {
        tool.implementation().run(arguments, &self.ctx)
    }
}

/// Deserialize a tool's arguments object into its typed parameters
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, ToolError> {
    let value = match arguments {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Longest prefix of `text` within `max` bytes, on a char boundary
pub(crate) fn truncate_at(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}


#[cfg(test)]
mod tests {
    use super::test_support::toolset;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_names_round_trip() {
        for tool in RepoTool::ALL {
            assert_eq!(RepoTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(RepoTool::from_name("rm_rf"), None);
    }

    #[test]
    fn test_specs_describe_every_tool() {
        let (_temp, tools) = toolset(&[("a.py", "x = 1\n")]);
        let specs = tools.specs();
        assert_eq!(specs.len(), 4);
        for spec in specs {
            assert!(!spec.description.is_empty());
            assert_eq!(spec.parameters["type"], "object");
        }
    }

    #[test]
    fn test_missing_file_suggests_same_name() {
        let (_temp, tools) = toolset(&[("pkg/util.py", "def f():\n    pass\n")]);
        let err = tools
            .run(RepoTool::FileRead, &json!({"file_path": "util.py"}))
            .unwrap_err();
        match err {
            ToolError::NotFound { suggestions, .. } => assert_eq!(suggestions, vec!["pkg/util.py"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncate_at_char_boundary() {
        assert_eq!(truncate_at("héllo", 2), "h");
        assert_eq!(truncate_at("abc", 10), "abc");
    }
}
