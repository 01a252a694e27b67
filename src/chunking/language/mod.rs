#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Source language, detected from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    JavaScript,
    TypeScript,
    Python,
    Rust,
    Go,
    Json,
    Xml,
    Yaml,
    Markdown,
    Properties,
    Gradle,
    Toml,
    Unknown,
}

/// Coarse content category used by the scoped search tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Code,
    Documentation,
    Config,
}

impl Language {
    pub const ALL: [Self; 14] = [
        Self::Java,
        Self::JavaScript,
        Self::TypeScript,
        Self::Python,
        Self::Rust,
        Self::Go,
        Self::Json,
        Self::Xml,
        Self::Yaml,
        Self::Markdown,
        Self::Properties,
        Self::Gradle,
        Self::Toml,
        Self::Unknown,
    ];

    #[inline]
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(Self::Unknown, Self::from_extension)
    }

    /// Map a bare extension (no leading dot, any case) to a language
    #[inline]
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "java" => Self::Java,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "py" => Self::Python,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "json" => Self::Json,
            "xml" => Self::Xml,
            "yaml" | "yml" => Self::Yaml,
            "md" => Self::Markdown,
            "properties" => Self::Properties,
            "gradle" => Self::Gradle,
            "toml" => Self::Toml,
            _ => Self::Unknown,
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Python => "python",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Yaml => "yaml",
            Self::Markdown => "markdown",
            Self::Properties => "properties",
            Self::Gradle => "gradle",
            Self::Toml => "toml",
            Self::Unknown => "unknown",
        }
    }

    #[inline]
    pub fn category(self) -> Category {
        match self {
            Self::Yaml | Self::Markdown => Category::Documentation,
            Self::Json | Self::Xml | Self::Properties | Self::Gradle | Self::Toml => {
                Category::Config
            }
            Self::Java
            | Self::JavaScript
            | Self::TypeScript
            | Self::Python
            | Self::Rust
            | Self::Go
            | Self::Unknown => Category::Code,
        }
    }
}

impl fmt::Display for Language {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|language| language.as_str() == wanted)
            .ok_or_else(|| format!("unknown language: {}", s))
    }
}

impl Category {
    pub const ALL: [Self; 3] = [Self::Code, Self::Documentation, Self::Config];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Documentation => "documentation",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for Category {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}
