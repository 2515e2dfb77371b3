use super::{parse_args, Tool, ToolContext, ToolError};
use crate::parsing::{self, DeclKind, Declaration, ParseOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write;

const SUPPORTED: &str = "python, rust, javascript, typescript, go";

#[derive(Deserialize)]
struct Params {
    #[serde(alias = "path")]
    file_path: String,
}

/// Outline of a source file's declarations
pub struct StructuralParseTool;

impl Tool for StructuralParseTool {
    fn name(&self) -> &'static str {
        "structural_parse"
    }

    fn description(&self) -> &'static str {
        "List the functions, classes, types and imports declared in a source file with their line ranges"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path relative to the repository root"}
            },
            "required": ["file_path"]
        })
    }

    fn run(&self, arguments: &Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: Params = parse_args(self.name(), arguments)?;
        let path = ctx.existing_path(&params.file_path)?;
        if !path.is_file() {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                message: format!("{} is not a file", params.file_path),
            });
        }
        let relative = ctx.repo.relative(&path);
        let (text, _) = ctx.read_text(&path)?;
        Ok(render(&relative, &parsing::parse_file(&path, &text)))
    }
}

fn render(relative: &str, outcome: &ParseOutcome) -> String {
    match outcome {
        ParseOutcome::Unsupported { language } => format!(
            "Structural parsing is not available for {} files ({}). Supported languages: {}.",
            language, relative, SUPPORTED
        ),
        ParseOutcome::ParseFailed { language, reason } => {
            format!("Could not parse {} as {}: {}", relative, language, reason)
        }
        ParseOutcome::Parsed {
            language,
            declarations,
            partial,
        } => {
            let mut out = format!("File: {}\nLanguage: {}\n", relative, language);
            if *partial {
                out.push_str("Note: the file has syntax errors; declarations are best effort.\n");
            }
            if declarations.is_empty() {
                out.push_str("\nNo declarations found.\n");
                return out;
            }
            let _ = writeln!(out, "\nDeclarations ({}):", declarations.len());
            for decl in declarations {
                let _ = writeln!(out, "{}", render_declaration(decl));
            }
            out
        }
    }
}

fn render_declaration(decl: &Declaration) -> String {
    let indent = if decl.top_level { "  " } else { "    " };
    let lines = if decl.start_line == decl.end_line {
        format!("line {}", decl.start_line)
    } else {
        format!("lines {}-{}", decl.start_line, decl.end_line)
    };
    if decl.kind == DeclKind::Import {
        format!("{}{} ({})", indent, decl.name, lines)
    } else {
        format!("{}{} {} ({})", indent, decl.kind, decl.name, lines)
    }
}
