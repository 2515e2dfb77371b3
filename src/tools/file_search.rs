use super::{parse_args, truncate_at, Tool, ToolContext, ToolError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write;

pub const NO_CONTENT_INDEXED: &str =
    "No content is indexed for this repository, so semantic search has nothing to return.";

#[derive(Deserialize)]
struct Params {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

/// Semantic search over the indexed chunks
pub struct FileSearchTool;

impl Tool for FileSearchTool {
    fn name(&self) -> &'static str {
        "file_search"
    }

    fn description(&self) -> &'static str {
        "Find code passages related to a natural-language query using semantic search"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"},
                "k": {"type": "integer", "description": "Number of results (default 5)"}
            },
            "required": ["query"]
        })
    }

    fn run(&self, arguments: &Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_args(self.name(), arguments)?;
        let query = params.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                message: "query must not be empty".to_string(),
            });
        }
        if ctx.index.is_empty() {
            return Ok(NO_CONTENT_INDEXED.to_string());
        }

        let k = params
            .k
            .unwrap_or(ctx.config.search_k)
            .clamp(1, ctx.config.max_search_k.max(1));
        let vector = ctx.embedder.encode_query(query)?;
        let hits = ctx.index.search(&vector, k)?;
        if hits.is_empty() {
            return Ok(format!("No relevant passages found for \"{}\".", query));
        }

        let mut out = format!("Found {} result(s) for \"{}\":\n", hits.len(), query);
        for (rank, hit) in hits.iter().enumerate() {
            let chunk = hit.chunk;
            let _ = write!(
                out,
                "\n{}. {} (lines {}-{}, bytes {}-{}, distance {:.4})\n",
                rank + 1,
                chunk.source_path,
                chunk.start_line,
                chunk.end_line,
                chunk.start_offset,
                chunk.end_offset,
                hit.distance
            );
            let snippet = truncate_at(chunk.text.trim(), ctx.config.snippet_chars);
            for line in snippet.lines() {
                let _ = writeln!(out, "   {}", line);
            }
            if snippet.len() < chunk.text.trim().len() {
                out.push_str("   ...\n");
            }
        }
        Ok(out)
    }
}
