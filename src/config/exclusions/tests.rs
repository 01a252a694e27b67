use super::*;
use tempfile::TempDir;

const MAX: u64 = 1024 * 1024;

#[test]
fn defaults_exclude_build_outputs() {
    let rules = ExclusionRules::defaults(MAX);
    assert!(rules.is_excluded_dir(Path::new("node_modules")));
    assert!(rules.is_excluded_dir(Path::new("services/api/target")));
    assert!(rules.is_excluded_path(Path::new("web/app.min.js")));
    assert!(!rules.is_excluded_path(Path::new("src/main.rs")));
    assert!(!rules.is_excluded_dir(Path::new("src")));
    assert_eq!(rules.source(), &ExclusionSource::Defaults);
}

#[test]
fn hidden_paths_always_excluded() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join(IGNORE_FILE_NAME), "generated\n")
        .expect("should write ignore file");
    let rules = ExclusionRules::resolve(temp_dir.path(), &[], MAX).expect("should resolve");

    assert!(rules.is_excluded_dir(Path::new(".cache")));
    assert!(rules.is_excluded_path(Path::new("src/.env.py")));
    assert!(rules.is_excluded_path(Path::new(".code-rag/files.db")));
}

#[test]
fn override_file_replaces_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join(IGNORE_FILE_NAME),
        "# project exclusions\n\ngenerated\n*.snap\nsrc/legacy\n",
    )
    .expect("should write ignore file");

    let rules = ExclusionRules::resolve(temp_dir.path(), &[], MAX).expect("should resolve");

    // default-only entries are no longer active
    assert!(!rules.is_excluded_dir(Path::new("build")));
    assert!(!rules.is_excluded_path(Path::new("build/a.py")));
    // override entries are
    assert!(rules.is_excluded_dir(Path::new("generated")));
    assert!(rules.is_excluded_path(Path::new("generated/b.py")));
    assert!(rules.is_excluded_path(Path::new("tests/__snapshots__/x.snap")));
    assert!(rules.is_excluded_dir(Path::new("src/legacy")));
    assert!(rules.is_excluded_path(Path::new("src/legacy/old.java")));
    assert!(!rules.is_excluded_path(Path::new("src/legacy_new/new.java")));
    assert_eq!(
        rules.source(),
        &ExclusionSource::OverrideFile(temp_dir.path().join(IGNORE_FILE_NAME))
    );
}

#[test]
fn extra_fragments_are_additive() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let rules = ExclusionRules::resolve(temp_dir.path(), &["fixtures".to_string()], MAX)
        .expect("should resolve");

    assert!(rules.is_excluded_dir(Path::new("fixtures")));
    assert!(rules.is_excluded_dir(Path::new("node_modules")));
}

#[test]
fn oversized_files_excluded() {
    let rules = ExclusionRules::defaults(2048);
    assert!(!rules.is_excluded_file(Path::new("src/a.py"), 2048));
    assert!(rules.is_excluded_file(Path::new("src/a.py"), 2049));
}

#[test]
fn generated_names_always_excluded() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join(IGNORE_FILE_NAME), "# nothing\n")
        .expect("should write ignore file");
    let rules = ExclusionRules::resolve(temp_dir.path(), &[], MAX).expect("should resolve");

    assert!(rules.is_excluded_path(Path::new("types/index.d.ts")));
    assert!(rules.is_excluded_path(Path::new("proto/user_pb2.py")));
    assert!(rules.is_excluded_path(Path::new("api/user.pb.go")));
    assert!(rules.is_excluded_path(Path::new("src/schema.generated.ts")));
    assert!(!rules.is_excluded_path(Path::new("src/generator.ts")));
}

#[test]
fn generated_content_heuristic() {
    assert!(looks_generated(
        "//\n// This file was generated by JAXB Reference Implementation\n//\npackage a;\n"
    ));
    assert!(looks_generated(
        "// Code generated by protoc-gen-go. DO NOT EDIT.\npackage api\n"
    ));
    assert!(looks_generated(
        "import javax.annotation.processing.Generated;\n@Generated(\"tool\")\nclass A {}\n"
    ));
    assert!(!looks_generated("def generate_report():\n    return 1\n"));

    let mut late_marker = "x = 1\n".repeat(GENERATED_HEADER_LINES);
    late_marker.push_str("// Code generated by tool. DO NOT EDIT.\n");
    assert!(!looks_generated(&late_marker));
}

#[test]
fn slash_fragments_match_whole_components() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join(IGNORE_FILE_NAME), "gen/proto\n")
        .expect("should write ignore file");
    let rules = ExclusionRules::resolve(temp_dir.path(), &[], MAX).expect("should resolve");

    assert!(rules.is_excluded_path(Path::new("gen/proto/a.py")));
    assert!(rules.is_excluded_path(Path::new("services/gen/proto/a.py")));
    assert!(rules.is_excluded_dir(Path::new("services/gen/proto")));
    assert!(!rules.is_excluded_path(Path::new("services/legacygen/proto/a.py")));
    assert!(!rules.is_excluded_path(Path::new("gen/protocol/a.py")));
}
