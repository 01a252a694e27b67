// Configuration management module
// TOML settings plus per-project exclusion rules

pub mod exclusions;
pub mod settings;

pub use exclusions::{ExclusionRules, ExclusionSource, IGNORE_FILE_NAME};
pub use settings::{
    Config, ConfigError, EmbeddingConfig, EmbeddingProvider, IndexingConfig, OllamaConfig,
    ServerConfig, WatcherConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("Configuration file: {}", config.config_file_path().display());
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
