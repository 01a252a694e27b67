use super::*;

const RUST_FUNCTIONS: &str = r#"use std::fmt;

fn greet(name: &str) -> String {
    format!("Hello, {}! Welcome aboard.", name)
}

fn farewell(name: &str) -> String {
    format!("Goodbye, {}! See you soon.", name)
}
"#;

const RUST_IMPL: &str = r#"struct Counter {
    value: u64,
}

impl Counter {
    pub fn increment(&mut self) -> u64 {
        self.value += 1;
        self.value
    }

    pub fn reset(&mut self) -> u64 {
        let previous = self.value;
        self.value = 0;
        previous
    }
}
"#;

#[test]
fn rust_functions_become_chunks() {
    let drafts = GrammarChunker::new(2000, 100)
        .chunk_source(Language::Rust, false, RUST_FUNCTIONS)
        .expect("should chunk rust");

    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].node_kind, "function_item");
    assert_eq!(drafts[0].start_line, 3);
    assert_eq!(drafts[0].end_line, 5);
    assert_eq!(drafts[0].signatures, vec!["fn greet(name: &str) -> String {".to_string()]);
    assert_eq!(drafts[0].imports, vec!["use std::fmt;".to_string()]);
    assert!(drafts[1].text.starts_with("fn farewell"));
    assert!(drafts.iter().all(|d| d.scope.is_empty()));
}

#[test]
fn oversized_container_is_descended_with_scope() {
    let drafts = GrammarChunker::new(150, 20)
        .chunk_source(Language::Rust, false, RUST_IMPL)
        .expect("should chunk rust");

    let methods: Vec<_> = drafts.iter().filter(|d| d.node_kind == "function_item").collect();
    assert_eq!(methods.len(), 2);
    for method in &methods {
        assert_eq!(method.scope, vec!["Counter".to_string()]);
        assert!(method.text.chars().count() <= 150);
    }
    assert!(methods[0].text.starts_with("    pub fn increment"));

    // the short struct and the impl header are gathered into a module chunk
    let module = drafts
        .iter()
        .find(|d| d.node_kind == "module")
        .expect("should emit module chunk");
    assert_eq!(module.start_line, 1);
    assert!(module.text.contains("struct Counter"));
    assert!(module.text.contains("impl Counter {"));

    let starts: Vec<u32> = drafts.iter().map(|d| d.start_line).collect();
    let mut sorted = starts.clone();
    sorted.sort_unstable();
    assert_eq!(starts, sorted);
}

#[test]
fn oversized_leaf_is_emitted_whole() {
    let mut source = String::from("def compute(values):\n");
    for i in 0..10 {
        source.push_str(&format!("    values.append({} * {})\n", i, i));
    }
    source.push_str("    return values\n");

    let drafts = GrammarChunker::new(60, 100)
        .chunk_source(Language::Python, false, &source)
        .expect("should chunk python");

    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].node_kind, "function_definition");
    assert!(drafts[0].text.chars().count() > 60);
}

#[test]
fn decorated_class_adds_one_scope_level() {
    let source = "@dataclass\nclass Account:\n    def deposit(self, amount):\n        self.balance += amount\n        return self.balance\n\n    def withdraw(self, amount):\n        self.balance -= amount\n        return self.balance\n";
    let drafts = GrammarChunker::new(120, 100)
        .chunk_source(Language::Python, false, source)
        .expect("should chunk python");

    let methods: Vec<_> = drafts
        .iter()
        .filter(|d| d.node_kind == "function_definition")
        .collect();
    assert_eq!(methods.len(), 2);
    for method in methods {
        assert_eq!(method.scope, vec!["Account".to_string()]);
    }
}

#[test]
fn small_class_kept_together() {
    let source = "class Greeter:\n    @staticmethod\n    def greet(name):\n        return \"hello \" + name\n";
    let drafts = GrammarChunker::new(2000, 100)
        .chunk_source(Language::Python, false, source)
        .expect("should chunk python");

    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].node_kind, "class_definition");
    assert_eq!(drafts[0].signatures, vec!["class Greeter:".to_string()]);
}

#[test]
fn no_declarations_reports_no_boundaries() {
    let result = GrammarChunker::new(2000, 100).chunk_source(Language::Python, false, "x = 1\ny = 2\n");
    assert_eq!(result, Err(ChunkingError::NoBoundaries));
}

#[test]
fn java_class_with_imports() {
    let source = r#"package demo;

import java.util.List;

public class Inventory {
    public int count(List<String> items) {
        return items.size();
    }
}
"#;
    let drafts = GrammarChunker::new(2000, 100)
        .chunk_source(Language::Java, false, source)
        .expect("should chunk java");

    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].node_kind, "class_declaration");
    assert_eq!(drafts[0].start_line, 5);
    assert_eq!(drafts[0].imports, vec!["import java.util.List;".to_string()]);
}

#[test]
fn go_module_level_code_is_kept() {
    let source = r#"package main

import "fmt"

var greeting = "a fairly long greeting string that pads the module section"

func main() {
	fmt.Println(greeting, "and some more words here")
}
"#;
    let drafts = GrammarChunker::new(2000, 20)
        .chunk_source(Language::Go, false, source)
        .expect("should chunk go");

    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].node_kind, "module");
    assert_eq!(drafts[0].start_line, 1);
    assert!(drafts[0].text.contains("var greeting"));
    assert_eq!(drafts[1].node_kind, "function_declaration");
    assert_eq!(drafts[1].imports, vec!["import \"fmt\"".to_string()]);
}

#[tokio::test]
async fn tsx_files_use_tsx_dialect() {
    let content = "export function App() {\n  return <div className=\"greeting\">hello world</div>;\n}\n";
    let file = SourceFile {
        path: std::path::Path::new("/project/web/App.tsx"),
        display_path: "web/App.tsx",
        language: Language::TypeScript,
        content,
    };

    let drafts = GrammarChunker::new(2000, 100)
        .chunk(&file)
        .await
        .expect("should chunk tsx");
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].node_kind, "function_declaration");
    assert!(drafts[0].text.starts_with("export function App"));
}

#[test]
fn supports_only_bundled_grammars() {
    let chunker = GrammarChunker::new(2000, 100);
    assert!(chunker.supports(Language::Java));
    assert!(chunker.supports(Language::Go));
    assert!(!chunker.supports(Language::Json));
    assert!(!chunker.supports(Language::Markdown));
    assert!(matches!(
        chunker.chunk_source(Language::Yaml, false, "a: 1\n"),
        Err(ChunkingError::Unsupported { .. })
    ));
}
