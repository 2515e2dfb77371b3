//! Language detection and tree-sitter grammar registry

use serde::{Deserialize, Serialize};
use std::path::Path;

/// A language with a bundled tree-sitter grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    Rust,
    JavaScript,
    TypeScript,
    Go,
}

impl Lang {
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Rust => "rust",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect a parseable language from the file extension
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "py" | "pyi" => Some(Lang::Python),
        "rs" => Some(Lang::Rust),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Language tag stored on chunks; covers every indexed extension
pub fn language_tag(path: &Path) -> &'static str {
    if let Some(lang) = detect_language(path) {
        return lang.id();
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "r" => "r",
        "m" | "mm" => "objective-c",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "html" => "html",
        "css" | "scss" | "sass" => "css",
        "xml" => "xml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "ini" | "cfg" => "ini",
        "md" => "markdown",
        "rst" => "restructuredtext",
        "tex" => "latex",
        _ => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
        assert_eq!(detect_language(Path::new("app.PY")), Some(Lang::Python));
        assert_eq!(detect_language(Path::new("web/index.ts")), Some(Lang::TypeScript));
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn test_language_tag_falls_back() {
        assert_eq!(language_tag(Path::new("a.go")), "go");
        assert_eq!(language_tag(Path::new("notes.md")), "markdown");
        assert_eq!(language_tag(Path::new("conf.yml")), "yaml");
        assert_eq!(language_tag(Path::new("LICENSE")), "text");
    }

    #[test]
    fn test_grammars_load() {
        for lang in [Lang::Python, Lang::Rust, Lang::JavaScript, Lang::TypeScript, Lang::Go] {
            let mut parser = tree_sitter::Parser::new();
            assert!(parser.set_language(&lang.grammar()).is_ok(), "{lang}");
        }
    }
}
