//! Syntax-aware chunking with bundled tree-sitter grammars.
//!
//! Declarations (functions, methods, classes and similar) that fit under the
//! ceiling become one chunk each. Oversized containers are descended so their
//! members become chunks with the container's name in their scope. Lines not
//! covered by any declaration are gathered into `module` chunks.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::BTreeSet;
use tree_sitter::{Node, Parser};

use super::{ChunkDraft, ChunkingError, ChunkingStrategy, Language, SourceFile};

pub const STRATEGY_NAME: &str = "grammar";

/// Declarations shorter than this are left to the surrounding module chunk
const MIN_NODE_CHARS: usize = 50;

const JAVA_KINDS: &[&str] = &[
    "method_declaration",
    "constructor_declaration",
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
];
const PYTHON_KINDS: &[&str] = &["function_definition", "class_definition", "decorated_definition"];
/// Boundary kinds that only wrap another declaration; they add no scope level
const WRAPPER_KINDS: &[&str] = &["decorated_definition"];
const TYPESCRIPT_KINDS: &[&str] = &[
    "function_declaration",
    "method_definition",
    "class_declaration",
    "abstract_class_declaration",
    "interface_declaration",
    "type_alias_declaration",
    "enum_declaration",
];
const JAVASCRIPT_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "method_definition",
    "class_declaration",
];
const RUST_KINDS: &[&str] = &[
    "function_item",
    "impl_item",
    "struct_item",
    "enum_item",
    "trait_item",
    "mod_item",
    "macro_definition",
];
const GO_KINDS: &[&str] = &["function_declaration", "method_declaration", "type_declaration"];

const IMPORT_KINDS: &[&str] = &[
    "import_declaration",
    "import_statement",
    "import_from_statement",
    "use_declaration",
];

fn boundary_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Java => JAVA_KINDS,
        Language::Python => PYTHON_KINDS,
        Language::TypeScript => TYPESCRIPT_KINDS,
        Language::JavaScript => JAVASCRIPT_KINDS,
        Language::Rust => RUST_KINDS,
        Language::Go => GO_KINDS,
        _ => &[],
    }
}

fn grammar(language: Language, tsx: bool) -> Option<tree_sitter::Language> {
    let grammar = match language {
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::TypeScript if tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        _ => return None,
    };
    Some(grammar)
}

/// One declaration selected for emission
struct Region {
    start_byte: usize,
    end_byte: usize,
    start_row: usize,
    end_row: usize,
    kind: String,
    scope: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GrammarChunker {
    max_chars: usize,
    min_gap_chars: usize,
}

impl GrammarChunker {
    #[inline]
    pub fn new(max_chars: usize, min_gap_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            min_gap_chars,
        }
    }

    /// Parse and chunk `content`; `tsx` selects the TSX dialect for TypeScript
    pub fn chunk_source(
        &self,
        language: Language,
        tsx: bool,
        content: &str,
    ) -> Result<Vec<ChunkDraft>, ChunkingError> {
        let grammar = grammar(language, tsx).ok_or(ChunkingError::Unsupported {
            strategy: STRATEGY_NAME,
            language,
        })?;

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| ChunkingError::Parse(format!("Failed to load {} grammar: {}", language, e)))?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| ChunkingError::Parse(format!("Failed to parse {} source", language)))?;
        let root = tree.root_node();

        let kinds = boundary_kinds(language);
        let mut regions = self.collect_regions(root, content, kinds);
        if regions.is_empty() {
            return Err(ChunkingError::NoBoundaries);
        }
        regions.sort_by_key(|region| region.start_byte);

        let imports = collect_imports(root, content);
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        let mut drafts: Vec<ChunkDraft> = regions
            .iter()
            .map(|region| {
                let text = &content[line_start(content, region.start_byte)..region.end_byte];
                ChunkDraft {
                    text: text.to_string(),
                    contextualized: None,
                    start_line: region.start_row as u32 + 1,
                    end_line: region.end_row as u32 + 1,
                    node_kind: region.kind.clone(),
                    scope: region.scope.clone(),
                    imports: imports.clone(),
                    signatures: first_line(text).into_iter().collect(),
                }
            })
            .collect();

        drafts.extend(self.gap_chunks(&lines, &regions));
        drafts.sort_by_key(|draft| draft.start_line);
        Ok(drafts)
    }

    /// Iterative walk selecting the declarations to emit
    fn collect_regions(&self, root: Node<'_>, content: &str, kinds: &[&str]) -> Vec<Region> {
        let mut regions = Vec::new();
        let mut stack: Vec<(Node<'_>, Vec<String>)> = vec![(root, Vec::new())];

        while let Some((node, scope)) = stack.pop() {
            if kinds.contains(&node.kind()) {
                let text = &content[line_start(content, node.start_byte())..node.end_byte()];
                let chars = text.chars().count();

                if chars <= self.max_chars {
                    if chars >= MIN_NODE_CHARS {
                        regions.push(region_for(node, scope));
                    }
                    continue;
                }

                if has_boundary_descendant(node, kinds) {
                    let mut inner = scope;
                    if !WRAPPER_KINDS.contains(&node.kind()) {
                        inner.push(node_name(node, content));
                    }
                    push_children(&mut stack, node, &inner);
                } else {
                    // split later on line boundaries by the dispatcher
                    regions.push(region_for(node, scope));
                }
                continue;
            }

            push_children(&mut stack, node, &scope);
        }

        regions
    }

    /// Runs of lines no declaration covers, kept when they carry enough text
    fn gap_chunks(&self, lines: &[&str], regions: &[Region]) -> Vec<ChunkDraft> {
        let covered: BTreeSet<usize> = regions
            .iter()
            .flat_map(|region| region.start_row..=region.end_row)
            .collect();

        let mut drafts = Vec::new();
        let mut run_start: Option<usize> = None;

        for row in 0..=lines.len() {
            let is_gap = row < lines.len() && !covered.contains(&row);
            match (is_gap, run_start) {
                (true, None) => run_start = Some(row),
                (false, Some(start)) => {
                    let text = lines[start..row].concat();
                    if text.trim().chars().count() >= self.min_gap_chars.max(1) {
                        drafts.push(ChunkDraft {
                            text,
                            start_line: start as u32 + 1,
                            end_line: row as u32,
                            node_kind: "module".to_string(),
                            ..ChunkDraft::default()
                        });
                    }
                    run_start = None;
                }
                _ => {}
            }
        }

        drafts
    }
}

fn region_for(node: Node<'_>, scope: Vec<String>) -> Region {
    Region {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start_row: node.start_position().row,
        end_row: node.end_position().row,
        kind: node.kind().to_string(),
        scope,
    }
}

/// Push named children so they pop in source order
fn push_children<'t>(stack: &mut Vec<(Node<'t>, Vec<String>)>, node: Node<'t>, scope: &[String]) {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    for child in children.into_iter().rev() {
        stack.push((child, scope.to_vec()));
    }
}

fn has_boundary_descendant(node: Node<'_>, kinds: &[&str]) -> bool {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let mut cursor = current.walk();
        for child in current.named_children(&mut cursor) {
            if kinds.contains(&child.kind()) {
                return true;
            }
            stack.push(child);
        }
    }
    false
}

/// Declared name of a container, falling back to its node kind
fn node_name(node: Node<'_>, content: &str) -> String {
    let text_of = |n: Node<'_>| content.get(n.byte_range()).map(str::to_string);

    if let Some(name) = node.child_by_field_name("name").and_then(text_of) {
        return name;
    }
    // rust impl blocks name the implementing type
    if let Some(name) = node.child_by_field_name("type").and_then(text_of) {
        return name;
    }
    // python decorators wrap the real definition
    if let Some(definition) = node.child_by_field_name("definition") {
        return node_name(definition, content);
    }

    let mut cursor = node.walk();
    let spec_name = node
        .named_children(&mut cursor)
        .find(|child| child.kind() == "type_spec")
        .and_then(|spec| spec.child_by_field_name("name"))
        .and_then(text_of);

    spec_name.unwrap_or_else(|| node.kind().to_string())
}

/// Top-level import statements, one line each
fn collect_imports(root: Node<'_>, content: &str) -> Vec<String> {
    let mut cursor = root.walk();
    root.named_children(&mut cursor)
        .filter(|child| IMPORT_KINDS.contains(&child.kind()))
        .filter_map(|child| content.get(child.byte_range()))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

fn line_start(content: &str, byte: usize) -> usize {
    content[..byte].rfind('\n').map_or(0, |index| index + 1)
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ChunkingStrategy for GrammarChunker {
    fn name(&self) -> &'static str {
        STRATEGY_NAME
    }

    fn supports(&self, language: Language) -> bool {
        !boundary_kinds(language).is_empty()
    }

    async fn chunk(&self, file: &SourceFile<'_>) -> Result<Vec<ChunkDraft>, ChunkingError> {
        let tsx = file
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tsx"));
        self.chunk_source(file.language, tsx, file.content)
    }
}
