use super::{parse_args, truncate_at, Tool, ToolContext, ToolError};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct Params {
    #[serde(alias = "path")]
    file_path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

/// Read a file, or a line range of it
pub struct FileReadTool;

impl FileReadTool {
    fn invalid(&self, message: impl Into<String>) -> ToolError {
        ToolError::InvalidArguments {
            tool: self.name().to_string(),
            message: message.into(),
        }
    }
}

impl Tool for FileReadTool {
    fn name(&self) -> &'static str {
        "file_read"
    }

    fn description(&self) -> &'static str {
        "Read the contents of a repository file, optionally limited to a line range"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path relative to the repository root"},
                "start_line": {"type": "integer", "description": "First line, 1-based"},
                "end_line": {"type": "integer", "description": "Last line, inclusive"}
            },
            "required": ["file_path"]
        })
    }

    fn run(&self, arguments: &Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_args(self.name(), arguments)?;
        let path = ctx.existing_path(&params.file_path)?;
        if !path.is_file() {
            return Err(self.invalid(format!("{} is not a file", params.file_path)));
        }
        let relative = ctx.repo.relative(&path);
        let (text, size) = ctx.read_text(&path)?;

        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let total = lines.len();
        let start = params.start_line.unwrap_or(1).max(1);
        let end = params.end_line.unwrap_or(total).min(total);
        if total > 0 && start > total {
            return Err(self.invalid(format!(
                "start_line {} is past the end of {} ({} lines)",
                start, relative, total
            )));
        }
        if start > end && total > 0 {
            return Err(self.invalid(format!("start_line {} is after end_line {}", start, end)));
        }

        let body: String = if total == 0 {
            String::new()
        } else {
            lines[start - 1..end].concat()
        };
        let range_note = if total == 0 {
            "empty file".to_string()
        } else if start == 1 && end == total {
            format!("{} lines", total)
        } else {
            format!("lines {}-{} of {}", start, end, total)
        };

        let cap = ctx.config.max_read_bytes;
        let shown = truncate_at(&body, cap);
        let mut out = format!("File: {} ({})\n\n{}", relative, range_note, shown);
        if shown.len() < body.len() {
            out.push_str(&format!(
                "\n[truncated: showing {} of {} bytes; request a line range to read further]",
                shown.len(),
                body.len()
            ));
        } else if (text.len() as u64) < size {
            out.push_str(&format!(
                "\n[truncated: only the first {} of {} bytes were read from disk]",
                text.len(),
                size
            ));
        }
        Ok(out)
    }
}
