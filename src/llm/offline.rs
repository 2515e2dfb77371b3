//! Deterministic heuristic planner used when no model service is configured
//!
//! Selection picks the narrowest tool for the question: read or outline a
//! file the question names, list a directory for layout questions, and fall
//! back to semantic search followed by reading the best hit. Synthesis
//! summarises the observations (module docstrings, declaration lists,
//! search hits) without any model.

use super::{CompletionRequest, LanguageModel, LlmError, Phase};
use crate::agent::{InvocationResult, ToolInvocation};
use crate::parsing::{self, DeclKind, ParseOutcome};
use crate::tools::{RepoTool, NO_CONTENT_INDEXED};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

const KNOWN_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "php", "rb", "go",
    "rs", "swift", "kt", "scala", "r", "m", "mm", "sh", "bash", "zsh", "sql", "html", "css",
    "scss", "sass", "xml", "json", "yaml", "yml", "toml", "ini", "cfg", "md", "txt", "rst",
    "tex",
];

const STRUCTURE_WORDS: &[&str] = &[
    "function", "functions", "class", "classes", "method", "methods", "import", "imports",
    "struct", "structs", "enum", "enums", "trait", "traits", "interface", "interfaces",
    "declarations", "declared", "defined", "defines", "outline", "structure",
];

const LAYOUT_WORDS: &[&str] = &[
    "directory", "directories", "folder", "folders", "layout", "tree", "organized",
    "organised",
];

/// Hits summarised from a search observation
const MAX_SUMMARY_HITS: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct OfflinePlanner;

impl OfflinePlanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LanguageModel for OfflinePlanner {
    fn name(&self) -> &str {
        "offline"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let reply = match request.phase {
            Phase::Select => match next_step(&request.question, &request.invocations) {
                Some((tool, arguments, thought)) => json!({
                    "action": "tool",
                    "tool": tool.name(),
                    "arguments": arguments,
                    "thought": thought,
                }),
                None => json!({
                    "action": "answer",
                    "answer": synthesize(&request.question, &request.invocations),
                }),
            },
            Phase::Synthesize => {
                return Ok(synthesize(&request.question, &request.invocations));
            }
        };
        Ok(reply.to_string())
    }
}

fn words(question: &str) -> Vec<String> {
    question
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn mentions_any(question: &str, vocabulary: &[&str]) -> bool {
    words(question).iter().any(|w| vocabulary.contains(&w.as_str()))
}

fn file_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?:[A-Za-z0-9_.\-]+/)*[A-Za-z0-9_\-][A-Za-z0-9_.\-]*\.([A-Za-z0-9]+)").ok()
        })
        .as_ref()
}

fn directory_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)\b(?:the\s+)?([A-Za-z0-9_./\-]+?)/?\s+(?:directory|folder)\b").ok()
        })
        .as_ref()
}

/// First file path in the question with a known extension
fn mentioned_file(question: &str) -> Option<String> {
    file_pattern()?
        .captures_iter(question)
        .find(|c| {
            c.get(1)
                .map(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str().to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .and_then(|c| c.get(0))
        .map(|m| m.as_str().trim_start_matches("./").to_string())
}

fn mentioned_directory(question: &str) -> Option<String> {
    directory_pattern()?
        .captures(question)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('/').to_string())
        .filter(|d| {
            !matches!(
                d.as_str(),
                "the" | "this" | "project" | "repository" | "repo" | "root" | "code"
            )
        })
}

fn file_tool(question: &str) -> RepoTool {
    if mentions_any(question, STRUCTURE_WORDS) {
        RepoTool::StructuralParse
    } else {
        RepoTool::FileRead
    }
}

fn already_called(invocations: &[ToolInvocation], tool: RepoTool, arguments: &Value) -> bool {
    invocations
        .iter()
        .any(|inv| inv.tool_name == tool.name() && &inv.arguments == arguments)
}

/// The next call to make, or `None` once the evidence is enough to answer
fn next_step(
    question: &str,
    invocations: &[ToolInvocation],
) -> Option<(RepoTool, Value, String)> {
    let candidate = match invocations.last() {
        None => first_step(question),
        Some(last) => follow_up(question, last),
    }?;
    if already_called(invocations, candidate.0, &candidate.1) {
        None
    } else {
        Some(candidate)
    }
}

fn first_step(question: &str) -> Option<(RepoTool, Value, String)> {
    if let Some(file) = mentioned_file(question) {
        let tool = file_tool(question);
        return Some((
            tool,
            json!({ "file_path": file }),
            format!("The question names {}; {} it directly", file, tool),
        ));
    }
    if mentions_any(question, LAYOUT_WORDS) {
        let dir = mentioned_directory(question).unwrap_or_else(|| ".".to_string());
        return Some((
            RepoTool::DirectoryList,
            json!({ "directory_path": dir, "depth": 2 }),
            "The question is about layout".to_string(),
        ));
    }
    Some((
        RepoTool::FileSearch,
        json!({ "query": question }),
        "No file is named; search by meaning".to_string(),
    ))
}

fn follow_up(question: &str, last: &ToolInvocation) -> Option<(RepoTool, Value, String)> {
    let tool = RepoTool::from_name(&last.tool_name)?;
    match (&last.result, tool) {
        (InvocationResult::Error(error), RepoTool::FileRead | RepoTool::StructuralParse) => {
            let suggestion = first_suggestion(error)?;
            Some((
                tool,
                json!({ "file_path": suggestion }),
                format!("Retry with the suggested path {}", suggestion),
            ))
        }
        (InvocationResult::Output(output), RepoTool::FileSearch) => {
            let hit = search_hits(output).into_iter().next()?;
            Some((
                file_tool(question),
                json!({ "file_path": hit.path }),
                format!("Inspect the best search hit {}", hit.path),
            ))
        }
        _ => None,
    }
}

fn first_suggestion(error: &str) -> Option<String> {
    let (_, rest) = error.split_once("(did you mean: ")?;
    let list = rest.strip_suffix(')').unwrap_or(rest);
    list.split(", ").next().map(str::to_string).filter(|s| !s.is_empty())
}

struct Hit {
    path: String,
    lines: String,
}

/// Ranked hits from a `file_search` observation
fn search_hits(output: &str) -> Vec<Hit> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = PATTERN
        .get_or_init(|| Regex::new(r"^\d+\. (.+) \(lines (\d+-\d+), bytes").ok())
        .as_ref()
    else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|c| {
            Some(Hit {
                path: c.get(1)?.as_str().to_string(),
                lines: c.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Answer text built from the observations alone
pub(crate) fn synthesize(question: &str, invocations: &[ToolInvocation]) -> String {
    if invocations.is_empty() {
        return "I did not gather any evidence for this question.".to_string();
    }

    let mut specific = Vec::new();
    let mut general = Vec::new();
    let mut failures = Vec::new();

    for inv in invocations {
        let Some(tool) = RepoTool::from_name(&inv.tool_name) else {
            continue;
        };
        match &inv.result {
            InvocationResult::Error(error) => {
                failures.push(format!("The {} call failed: {}", tool, error));
            }
            InvocationResult::Output(output) => match tool {
                RepoTool::FileSearch => {
                    if output.trim() == NO_CONTENT_INDEXED {
                        return "No content is indexed for this repository, so there is nothing \
                                to search or read. Add supported source files and ask again."
                            .to_string();
                    }
                    general.push(summarize_search(output));
                }
                RepoTool::FileRead => specific.push(summarize_read(question, output)),
                RepoTool::StructuralParse => specific.push(summarize_outline(question, output)),
                RepoTool::DirectoryList => specific.push(summarize_listing(output)),
            },
        }
    }

    // A failure is only worth reporting when nothing later recovered from it
    let mut parts = specific;
    parts.extend(general);
    if parts.is_empty() {
        parts = failures;
    }
    parts.join("\n\n")
}

fn summarize_search(output: &str) -> String {
    let hits = search_hits(output);
    if hits.is_empty() {
        return "The search found no relevant passages.".to_string();
    }
    let mut seen: Vec<(String, String)> = Vec::new();
    for hit in hits {
        if seen.iter().any(|(path, _)| *path == hit.path) {
            continue;
        }
        seen.push((hit.path, hit.lines));
        if seen.len() == MAX_SUMMARY_HITS {
            break;
        }
    }
    let listed: Vec<String> = seen
        .iter()
        .map(|(path, lines)| format!("{} (lines {})", path, lines))
        .collect();
    format!("The most relevant code is in {}.", listed.join(", "))
}

/// Split a `file_read` observation into its path and content
fn read_parts(output: &str) -> Option<(&str, &str)> {
    let (header, content) = output.split_once("\n\n")?;
    let path = header.strip_prefix("File: ")?;
    let path = path.rsplit_once(" (").map(|(p, _)| p).unwrap_or(path);
    let content = content
        .split("\n[truncated:")
        .next()
        .unwrap_or(content);
    Some((path, content))
}

fn summarize_read(question: &str, output: &str) -> String {
    let Some((path, content)) = read_parts(output) else {
        return output.lines().next().unwrap_or_default().to_string();
    };

    let summary = parsing::module_summary(content);
    let outline = match parsing::parse_file(Path::new(path), content) {
        ParseOutcome::Parsed { declarations, .. } => declarations
            .into_iter()
            .filter(|d| d.top_level && d.kind != DeclKind::Import)
            .map(|d| format!("{} {}", d.kind, d.name))
            .collect::<Vec<_>>(),
        _ => Vec::new(),
    };

    let mut answer = match summary {
        Some(summary) => format!("{}: {}", path, summary),
        None => {
            let first = content
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("(empty)");
            format!(
                "{} has no module docstring or header comment; it begins with `{}`.",
                path, first
            )
        }
    };
    if !outline.is_empty() && !mentions_any(question, &["docstring"]) {
        answer.push_str(&format!("\nIt defines {}.", outline.join(", ")));
    }
    answer
}

/// One declaration line of a `structural_parse` observation
struct OutlineEntry {
    kind: String,
    name: String,
    lines: String,
}

fn outline_entries(output: &str) -> (String, Vec<OutlineEntry>) {
    let path = output
        .lines()
        .find_map(|l| l.strip_prefix("File: "))
        .unwrap_or("the file")
        .to_string();
    let entries = output
        .lines()
        .skip_while(|l| !l.starts_with("Declarations ("))
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            let (decl, lines) = line.rsplit_once(" (")?;
            let lines = lines.strip_suffix(')')?.to_string();
            let (kind, name) = match decl.split_once(' ') {
                Some((kind, name))
                    if kind != DeclKind::Import.as_str()
                        && ALL_KINDS.iter().any(|k| k.as_str() == kind) =>
                {
                    (kind.to_string(), name.to_string())
                }
                _ => (DeclKind::Import.as_str().to_string(), decl.to_string()),
            };
            Some(OutlineEntry { kind, name, lines })
        })
        .collect();
    (path, entries)
}

const ALL_KINDS: [DeclKind; 13] = [
    DeclKind::Function,
    DeclKind::Method,
    DeclKind::Class,
    DeclKind::Struct,
    DeclKind::Enum,
    DeclKind::Trait,
    DeclKind::Interface,
    DeclKind::Impl,
    DeclKind::Type,
    DeclKind::Constant,
    DeclKind::Module,
    DeclKind::Macro,
    DeclKind::Import,
];

fn plural(kind: &str, n: usize) -> String {
    match (kind, n) {
        (k, 1) => k.to_string(),
        ("class", _) => "classes".to_string(),
        (k, _) => format!("{}s", k),
    }
}

fn summarize_outline(question: &str, output: &str) -> String {
    if !output.starts_with("File: ") {
        return output.trim().to_string();
    }
    let (path, entries) = outline_entries(output);
    if entries.is_empty() {
        return format!("{} declares no functions, classes or other named items.", path);
    }

    let question_words = words(question);
    let asked: Vec<&str> = ALL_KINDS
        .iter()
        .map(DeclKind::as_str)
        .filter(|kind| {
            question_words
                .iter()
                .any(|w| w == *kind || *w == plural(kind, 2))
        })
        .collect();

    let selected: Vec<&OutlineEntry> = entries
        .iter()
        .filter(|e| asked.is_empty() || asked.contains(&e.kind.as_str()))
        .collect();
    if selected.is_empty() {
        return format!(
            "{} declares no {}.",
            path,
            asked
                .iter()
                .map(|k| plural(k, 2))
                .collect::<Vec<_>>()
                .join(" or ")
        );
    }

    let label = match asked.as_slice() {
        [only] => plural(only, selected.len()),
        _ => plural("declaration", selected.len()),
    };
    let mut answer = format!("{} defines {} {}:", path, selected.len(), label);
    for entry in selected {
        if asked.len() == 1 {
            answer.push_str(&format!("\n- {} ({})", entry.name, entry.lines));
        } else {
            answer.push_str(&format!("\n- {} {} ({})", entry.kind, entry.name, entry.lines));
        }
    }
    answer
}

fn summarize_listing(output: &str) -> String {
    let mut lines = output.lines();
    let header = lines.next().unwrap_or_default();
    let dir = header
        .strip_prefix("Directory: ")
        .and_then(|h| h.rsplit_once(" (").map(|(d, _)| d))
        .unwrap_or(".");
    let dir_label = if dir == "." {
        "The repository root".to_string()
    } else {
        dir.to_string()
    };

    let mut subdirs = Vec::new();
    let mut files = Vec::new();
    let mut types = None;
    let mut section = "";
    for line in lines {
        if line.starts_with("Subdirectories (") {
            section = "dirs";
        } else if line.starts_with("Files (") {
            section = "files";
        } else if let Some(t) = line.strip_prefix("File types: ") {
            types = Some(t.to_string());
        } else if let Some(entry) = line.strip_prefix("  ") {
            match section {
                "dirs" if entry.matches('/').count() == 1 => subdirs.push(entry.to_string()),
                "files" if !entry.contains('/') => files.push(entry.to_string()),
                _ => {}
            }
        }
    }

    if subdirs.is_empty() && files.is_empty() {
        return format!("{} is empty.", dir_label);
    }
    let mut answer = format!(
        "{} contains {} top-level director{} and {} top-level file{}.",
        dir_label,
        subdirs.len(),
        if subdirs.len() == 1 { "y" } else { "ies" },
        files.len(),
        if files.len() == 1 { "" } else { "s" }
    );
    if !subdirs.is_empty() {
        answer.push_str(&format!("\nDirectories: {}", subdirs.join(", ")));
    }
    if !files.is_empty() {
        answer.push_str(&format!("\nFiles: {}", files.join(", ")));
    }
    if let Some(types) = types {
        answer.push_str(&format!("\nFile types: {}", types));
    }
    answer
}
