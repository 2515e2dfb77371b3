//! Declaration extraction with tree-sitter
//!
//! One contract serves both the chunker (top-level split points) and the
//! `structural_parse` tool (a readable outline of a file).

mod languages;

pub use languages::{detect_language, language_tag, Lang};

use serde::Serialize;
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Kind of a named declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Trait,
    Interface,
    Impl,
    Type,
    Constant,
    Module,
    Macro,
    Import,
}

impl DeclKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclKind::Function => "function",
            DeclKind::Method => "method",
            DeclKind::Class => "class",
            DeclKind::Struct => "struct",
            DeclKind::Enum => "enum",
            DeclKind::Trait => "trait",
            DeclKind::Interface => "interface",
            DeclKind::Impl => "impl",
            DeclKind::Type => "type",
            DeclKind::Constant => "constant",
            DeclKind::Module => "module",
            DeclKind::Macro => "macro",
            DeclKind::Import => "import",
        }
    }
}

impl std::fmt::Display for DeclKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named declaration with its location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclKind,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    /// Where attached comments, attributes and decorators begin
    pub leading_byte: usize,
    /// Direct child of the file rather than a member of a class or impl
    pub top_level: bool,
}

/// Result of asking for a file's declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed {
        language: Lang,
        declarations: Vec<Declaration>,
        /// The tree contained syntax errors; declarations are best effort
        partial: bool,
    },
    Unsupported {
        language: String,
    },
    ParseFailed {
        language: Lang,
        reason: String,
    },
}

impl ParseOutcome {
    /// Byte offsets where top-level declarations (with their leading
    /// comments) begin, sorted and deduplicated
    pub fn top_level_starts(&self) -> Vec<usize> {
        let ParseOutcome::Parsed { declarations, .. } = self else {
            return Vec::new();
        };
        let mut starts: Vec<usize> = declarations
            .iter()
            .filter(|d| d.top_level && d.kind != DeclKind::Import)
            .map(|d| d.leading_byte)
            .collect();
        starts.sort_unstable();
        starts.dedup();
        starts
    }
}

/// Parse a file by extension
pub fn parse_file(path: &Path, source: &str) -> ParseOutcome {
    match detect_language(path) {
        Some(lang) => parse_source(lang, source),
        None => ParseOutcome::Unsupported {
            language: language_tag(path).to_string(),
        },
    }
}

/// Parse source text in a known language
pub fn parse_source(lang: Lang, source: &str) -> ParseOutcome {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&lang.grammar()) {
        return ParseOutcome::ParseFailed {
            language: lang,
            reason: format!("grammar could not be loaded: {}", e),
        };
    }
    let Some(tree) = parser.parse(source, None) else {
        return ParseOutcome::ParseFailed {
            language: lang,
            reason: "parser returned no tree".to_string(),
        };
    };

    let root = tree.root_node();
    let mut extractor = Extractor {
        source,
        lang,
        declarations: Vec::new(),
    };
    for child in named_children(root) {
        extractor.visit(child, child, false);
    }

    let partial = root.has_error();
    if partial && extractor.declarations.is_empty() {
        return ParseOutcome::ParseFailed {
            language: lang,
            reason: "syntax errors and no recognisable declarations".to_string(),
        };
    }

    extractor
        .declarations
        .sort_by_key(|d| (d.start_byte, d.end_byte));
    ParseOutcome::Parsed {
        language: lang,
        declarations: extractor.declarations,
        partial,
    }
}

fn named_children(node: Node<'_>) -> impl Iterator<Item = Node<'_>> {
    let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..count).filter_map(move |i| node.named_child(i))
}

struct Extractor<'s> {
    source: &'s str,
    lang: Lang,
    declarations: Vec<Declaration>,
}

impl<'s> Extractor<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        self.source.get(node.byte_range()).unwrap_or("")
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|n| self.text(n).to_string())
    }

    fn name_of(&self, node: Node<'_>) -> String {
        self.field_text(node, "name")
            .unwrap_or_else(|| "<anonymous>".to_string())
    }

    /// `node` decides the kind and name; `span` is the full extent
    /// (e.g. a decorated or exported wrapper around the definition)
    fn push(&mut self, name: String, kind: DeclKind, span: Node<'_>, nested: bool) {
        let range = span.byte_range();
        let leading_byte = if nested {
            range.start
        } else {
            leading_start(span)
        };
        self.declarations.push(Declaration {
            name,
            kind,
            start_line: span.start_position().row + 1,
            end_line: span.end_position().row + 1,
            start_byte: range.start,
            end_byte: range.end,
            leading_byte,
            top_level: !nested,
        });
    }

    fn import(&mut self, span: Node<'_>, nested: bool) {
        let name = one_line(self.text(span), 80);
        self.push(name, DeclKind::Import, span, nested);
    }

    fn visit(&mut self, node: Node<'_>, span: Node<'_>, nested: bool) {
        match self.lang {
            Lang::Python => self.visit_python(node, span, nested),
            Lang::Rust => self.visit_rust(node, span, nested),
            Lang::JavaScript | Lang::TypeScript => self.visit_js(node, span, nested),
            Lang::Go => self.visit_go(node, span, nested),
        }
    }

    fn visit_body(&mut self, node: Node<'_>) {
        let body = node.child_by_field_name("body").or_else(|| {
            named_children(node).find(|c| {
                matches!(
                    c.kind(),
                    "declaration_list" | "class_body" | "block" | "object_type"
                )
            })
        });
        if let Some(body) = body {
            for member in named_children(body) {
                self.visit(member, member, true);
            }
        }
    }

    fn visit_python(&mut self, node: Node<'_>, span: Node<'_>, nested: bool) {
        match node.kind() {
            "function_definition" => {
                let kind = if nested {
                    DeclKind::Method
                } else {
                    DeclKind::Function
                };
                self.push(self.name_of(node), kind, span, nested);
            }
            "class_definition" => {
                self.push(self.name_of(node), DeclKind::Class, span, nested);
                self.visit_body(node);
            }
            "decorated_definition" => {
                if let Some(def) = node.child_by_field_name("definition") {
                    self.visit_python(def, span, nested);
                }
            }
            "import_statement" | "import_from_statement" if !nested => {
                self.import(span, nested);
            }
            _ => {}
        }
    }

    fn visit_rust(&mut self, node: Node<'_>, span: Node<'_>, nested: bool) {
        match node.kind() {
            "function_item" | "function_signature_item" => {
                let kind = if nested {
                    DeclKind::Method
                } else {
                    DeclKind::Function
                };
                self.push(self.name_of(node), kind, span, nested);
            }
            "struct_item" | "union_item" => {
                self.push(self.name_of(node), DeclKind::Struct, span, nested)
            }
            "enum_item" => self.push(self.name_of(node), DeclKind::Enum, span, nested),
            "trait_item" => {
                self.push(self.name_of(node), DeclKind::Trait, span, nested);
                self.visit_body(node);
            }
            "impl_item" => {
                let ty = self
                    .field_text(node, "type")
                    .unwrap_or_else(|| "<unknown>".to_string());
                let name = match self.field_text(node, "trait") {
                    Some(tr) => format!("{} for {}", tr, ty),
                    None => ty,
                };
                self.push(name, DeclKind::Impl, span, nested);
                self.visit_body(node);
            }
            "type_item" => self.push(self.name_of(node), DeclKind::Type, span, nested),
            "const_item" | "static_item" => {
                self.push(self.name_of(node), DeclKind::Constant, span, nested)
            }
            "mod_item" => self.push(self.name_of(node), DeclKind::Module, span, nested),
            "macro_definition" => self.push(self.name_of(node), DeclKind::Macro, span, nested),
            "use_declaration" if !nested => self.import(span, nested),
            _ => {}
        }
    }

    fn visit_js(&mut self, node: Node<'_>, span: Node<'_>, nested: bool) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                self.push(self.name_of(node), DeclKind::Function, span, nested)
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.push(self.name_of(node), DeclKind::Class, span, nested);
                self.visit_body(node);
            }
            "method_definition" | "method_signature" | "abstract_method_signature" if nested => {
                self.push(self.name_of(node), DeclKind::Method, span, nested)
            }
            "interface_declaration" => {
                self.push(self.name_of(node), DeclKind::Interface, span, nested)
            }
            "type_alias_declaration" => {
                self.push(self.name_of(node), DeclKind::Type, span, nested)
            }
            "enum_declaration" => self.push(self.name_of(node), DeclKind::Enum, span, nested),
            "export_statement" => {
                if let Some(decl) = node.child_by_field_name("declaration") {
                    self.visit_js(decl, span, nested);
                }
            }
            "lexical_declaration" | "variable_declaration" if !nested => {
                for declarator in named_children(node) {
                    let is_function = declarator
                        .child_by_field_name("value")
                        .map(|v| {
                            matches!(
                                v.kind(),
                                "arrow_function" | "function_expression" | "function"
                            )
                        })
                        .unwrap_or(false);
                    if declarator.kind() == "variable_declarator" && is_function {
                        self.push(self.name_of(declarator), DeclKind::Function, span, nested);
                    }
                }
            }
            "import_statement" if !nested => self.import(span, nested),
            _ => {}
        }
    }

    fn visit_go(&mut self, node: Node<'_>, span: Node<'_>, nested: bool) {
        match node.kind() {
            "function_declaration" => {
                self.push(self.name_of(node), DeclKind::Function, span, nested)
            }
            "method_declaration" => self.push(self.name_of(node), DeclKind::Method, span, nested),
            "type_declaration" => {
                for spec in named_children(node) {
                    if !matches!(spec.kind(), "type_spec" | "type_alias") {
                        continue;
                    }
                    let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
                        Some("struct_type") => DeclKind::Struct,
                        Some("interface_type") => DeclKind::Interface,
                        _ => DeclKind::Type,
                    };
                    self.push(self.name_of(spec), kind, span, nested);
                }
            }
            "const_declaration" => {
                for spec in named_children(node).filter(|s| s.kind() == "const_spec") {
                    self.push(self.name_of(spec), DeclKind::Constant, span, nested);
                }
            }
            "import_declaration" => self.import(span, nested),
            _ => {}
        }
    }
}

/// Extend a top-level node backwards over directly attached comments,
/// attributes and decorators
fn leading_start(node: Node<'_>) -> usize {
    let mut start = node.start_byte();
    let mut row = node.start_position().row;
    let mut current = node;
    while let Some(prev) = current.prev_named_sibling() {
        let attached = matches!(
            prev.kind(),
            "comment" | "line_comment" | "block_comment" | "attribute_item" | "decorator"
        );
        if !attached || prev.end_position().row + 1 < row {
            break;
        }
        start = prev.start_byte();
        row = prev.start_position().row;
        current = prev;
    }
    start
}

/// Collapse whitespace and cap the length of a single-line label
fn one_line(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let cut: String = collapsed.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

/// A file's leading docstring or header comment, first paragraph only
pub fn module_summary(source: &str) -> Option<String> {
    let mut lines = source
        .lines()
        .map(str::trim)
        .skip_while(|l| l.is_empty() || l.starts_with("#!") || l.contains("-*- coding"))
        .peekable();
    let first = *lines.peek()?;

    let mut collected: Vec<String> = Vec::new();
    if let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| first.starts_with(q)) {
        let mut first_line = true;
        for line in lines {
            let mut text = line;
            if first_line {
                text = &text[quote.len()..];
                first_line = false;
            }
            if let Some(end) = text.find(quote) {
                collected.push(text[..end].to_string());
                break;
            }
            collected.push(text.to_string());
        }
    } else if first.starts_with("/*") {
        for line in lines {
            let done = line.contains("*/");
            let text = line
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .split("*/")
                .next()
                .unwrap_or("")
                .trim_start_matches('*')
                .trim();
            collected.push(text.to_string());
            if done {
                break;
            }
        }
    } else if is_line_comment(first) {
        for line in lines.take_while(|l| is_line_comment(l)) {
            let text = line
                .trim_start_matches("//!")
                .trim_start_matches("///")
                .trim_start_matches("//")
                .trim_start_matches('#')
                .trim();
            collected.push(text.to_string());
        }
    } else {
        return None;
    }

    let paragraph: Vec<&str> = collected
        .iter()
        .map(|s| s.trim())
        .skip_while(|s| s.is_empty())
        .take_while(|s| !s.is_empty())
        .collect();
    if paragraph.is_empty() {
        return None;
    }
    Some(one_line(&paragraph.join(" "), 300))
}

fn is_line_comment(line: &str) -> bool {
    line.starts_with("//")
        || line == "#"
        || (line.starts_with("# ") && !line.starts_with("#["))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(outcome: &ParseOutcome) -> Vec<(String, DeclKind)> {
        match outcome {
            ParseOutcome::Parsed { declarations, .. } => declarations
                .iter()
                .map(|d| (d.name.clone(), d.kind))
                .collect(),
            other => panic!("expected a parse, got {:?}", other),
        }
    }

    #[test]
    fn test_python_declarations() {
        let source = r#""""User routes."""
import os
from flask import Flask

@app.route("/")
def index():
    return "ok"

class UserService:
    def get(self, user_id):
        return user_id

    @staticmethod
    def create():
        pass
"#;
        let outcome = parse_source(Lang::Python, source);
        let found = names(&outcome);
        assert!(found.contains(&("index".to_string(), DeclKind::Function)));
        assert!(found.contains(&("UserService".to_string(), DeclKind::Class)));
        assert!(found.contains(&("get".to_string(), DeclKind::Method)));
        assert!(found.contains(&("create".to_string(), DeclKind::Method)));
        assert!(found.contains(&("from flask import Flask".to_string(), DeclKind::Import)));

        let ParseOutcome::Parsed { declarations, partial, .. } = &outcome else {
            unreachable!()
        };
        assert!(!partial);
        let index = declarations.iter().find(|d| d.name == "index").unwrap();
        // Decorator belongs to the function span
        assert_eq!(index.start_line, 5);
        assert_eq!(index.end_line, 7);
    }

    #[test]
    fn test_rust_declarations() {
        let source = r#"use std::fmt;

/// A point
#[derive(Debug)]
pub struct Point { x: i32 }

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { Ok(()) }
}

pub trait Shape { fn area(&self) -> f64; }

const LIMIT: usize = 3;
macro_rules! twice { ($e:expr) => { $e * 2 }; }
mod inner {}
fn main() {}
"#;
        let outcome = parse_source(Lang::Rust, source);
        let found = names(&outcome);
        assert!(found.contains(&("Point".to_string(), DeclKind::Struct)));
        assert!(found.contains(&("fmt::Display for Point".to_string(), DeclKind::Impl)));
        assert!(found.contains(&("fmt".to_string(), DeclKind::Method)));
        assert!(found.contains(&("Shape".to_string(), DeclKind::Trait)));
        assert!(found.contains(&("area".to_string(), DeclKind::Method)));
        assert!(found.contains(&("LIMIT".to_string(), DeclKind::Constant)));
        assert!(found.contains(&("twice".to_string(), DeclKind::Macro)));
        assert!(found.contains(&("inner".to_string(), DeclKind::Module)));
        assert!(found.contains(&("main".to_string(), DeclKind::Function)));

        // Doc comment and attribute travel with the struct
        let ParseOutcome::Parsed { declarations, .. } = &outcome else {
            unreachable!()
        };
        let point = declarations.iter().find(|d| d.name == "Point").unwrap();
        assert_eq!(&source[point.leading_byte..point.leading_byte + 11], "/// A point");
    }

    #[test]
    fn test_javascript_and_typescript() {
        let js = "import x from './x';\nexport function handler(req) {}\nconst add = (a, b) => a + b;\nclass Cart { total() { return 0; } }\n";
        let found = names(&parse_source(Lang::JavaScript, js));
        assert!(found.contains(&("handler".to_string(), DeclKind::Function)));
        assert!(found.contains(&("add".to_string(), DeclKind::Function)));
        assert!(found.contains(&("Cart".to_string(), DeclKind::Class)));
        assert!(found.contains(&("total".to_string(), DeclKind::Method)));

        let ts = "export interface User { id: number }\ntype Id = string;\nenum Color { Red }\n";
        let found = names(&parse_source(Lang::TypeScript, ts));
        assert!(found.contains(&("User".to_string(), DeclKind::Interface)));
        assert!(found.contains(&("Id".to_string(), DeclKind::Type)));
        assert!(found.contains(&("Color".to_string(), DeclKind::Enum)));
    }

    #[test]
    fn test_go_declarations() {
        let source = "package main\n\nimport \"fmt\"\n\ntype Server struct{}\n\ntype Handler interface{}\n\nfunc (s *Server) Start() {}\n\nfunc main() { fmt.Println() }\n";
        let found = names(&parse_source(Lang::Go, source));
        assert!(found.contains(&("Server".to_string(), DeclKind::Struct)));
        assert!(found.contains(&("Handler".to_string(), DeclKind::Interface)));
        assert!(found.contains(&("Start".to_string(), DeclKind::Method)));
        assert!(found.contains(&("main".to_string(), DeclKind::Function)));
    }

    #[test]
    fn test_unsupported_and_failed() {
        let outcome = parse_file(Path::new("notes.md"), "# Title\n");
        assert_eq!(
            outcome,
            ParseOutcome::Unsupported {
                language: "markdown".to_string()
            }
        );

        let outcome = parse_source(Lang::Python, ")))(((:::");
        assert!(matches!(outcome, ParseOutcome::ParseFailed { .. }));
    }

    #[test]
    fn test_top_level_starts_skip_members() {
        let source = "class A:\n    def m(self):\n        pass\n\ndef f():\n    pass\n";
        let outcome = parse_source(Lang::Python, source);
        assert_eq!(outcome.top_level_starts(), vec![0, source.find("def f").unwrap()]);
    }

    #[test]
    fn test_module_summary() {
        assert_eq!(
            module_summary("#!/usr/bin/env python\n\"\"\"Handles user login.\n\nMore detail.\n\"\"\"\nimport os\n"),
            Some("Handles user login.".to_string())
        );
        assert_eq!(
            module_summary("//! Vector index over chunks\n//! with HNSW.\n\nuse x;\n"),
            Some("Vector index over chunks with HNSW.".to_string())
        );
        assert_eq!(
            module_summary("/**\n * Cart utilities.\n */\nexport {}\n"),
            Some("Cart utilities.".to_string())
        );
        assert_eq!(module_summary("import os\n"), None);
        assert_eq!(module_summary("#[derive(Debug)]\nstruct A;\n"), None);
    }
}
