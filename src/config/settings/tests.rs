use super::*;
use serial_test::serial;
use std::collections::HashMap;
use tempfile::TempDir;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 7101);
    assert_eq!(config.chunking.max_chunk_size, 2000);
    assert_eq!(config.indexing.max_file_size, 1024 * 1024);
    assert!(config.indexing.extensions.contains(&".py".to_string()));
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.min_chunk_size = 500;
    invalid_config.chunking.max_chunk_size = 400;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::MaxChunkSizeTooSmall(400, 500))
    ));

    let mut invalid_config = config.clone();
    invalid_config.indexing.extensions.push("py".to_string());
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidExtension(ext)) if ext == "py"
    ));

    let mut invalid_config = config;
    invalid_config.chunking.external_command = Some(Vec::new());
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::EmptyExternalCommand)
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_file_uses_section_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join(CONFIG_FILE_NAME),
        "[server]\nport = 9000\n\n[embedding]\nprovider = \"hashing\"\n",
    )
    .expect("should write config");

    let config = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn missing_file_yields_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.server, ServerConfig::default());
    assert_eq!(config.pid_file_path(), temp_dir.path().join("server.pid"));
}

#[test]
fn invalid_file_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join(CONFIG_FILE_NAME),
        "[ollama]\nprotocol = \"gopher\"\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    config.watcher.enabled = false;
    config.chunking.external_command =
        Some(vec!["node".to_string(), "chunker_batch.mjs".to_string()]);
    config.save().expect("should save config");

    let reloaded = Config::load(temp_dir.path()).expect("should reload config");
    assert_eq!(reloaded, config);
}

#[test]
fn environment_overrides() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[
            ("CODE_RAG_HOST", "0.0.0.0"),
            ("CODE_RAG_PORT", "7200"),
            ("CODE_RAG_OFFLINE", "1"),
            ("CODE_RAG_WATCH", "false"),
            ("CODE_RAG_WATCH_DEBOUNCE", "0.5"),
            ("CODE_RAG_WATCH_MAX_BATCH", "25"),
        ]))
        .expect("should apply overrides");

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 7200);
    assert!(config.embedding.offline);
    assert!(!config.watcher.enabled);
    assert_eq!(config.watcher.debounce_ms, 500);
    assert_eq!(config.watcher.max_batch_size, 25);
    assert_eq!(config.watcher.git_settle_ms, 3000);
}

#[test]
fn invalid_environment_value() {
    let mut config = Config::default();
    let result = config.apply_overrides(lookup_from(&[("CODE_RAG_PORT", "seventy")]));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidEnvironment { name, .. }) if name == "CODE_RAG_PORT"
    ));
}

#[test]
#[serial]
fn config_dir_honours_home_override() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::set_var("CODE_RAG_HOME", temp_dir.path()) };
    let dir = Config::config_dir();
    // SAFETY: as above
    unsafe { std::env::remove_var("CODE_RAG_HOME") };

    assert_eq!(dir.expect("should resolve dir"), temp_dir.path());
}
