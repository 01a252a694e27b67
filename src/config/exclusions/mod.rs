//! Exclusion rules for directory traversal.
//!
//! A project may ship a `.ragignore` file at its root. When present it
//! replaces the built-in default list entirely. Hidden paths, oversized
//! files and generated-file name patterns are excluded no matter which
//! list is active.

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use fancy_regex::Regex;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

pub const IGNORE_FILE_NAME: &str = ".ragignore";

/// Built-in exclusion fragments, in `.ragignore` syntax
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    "vendor",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    "coverage",
    ".gradle",
    ".idea",
    ".vscode",
    ".git",
    "*.min.js",
    "*.min.css",
    "*.map",
    "*.lock",
    "*.pyc",
    "*.class",
    "*.jar",
];

const GENERATED_NAME_SUFFIXES: &[&str] = &[
    ".d.ts",
    "_pb2.py",
    "_pb2_grpc.py",
    ".pb.go",
    ".g.dart",
];

const GENERATED_NAME_INFIXES: &[&str] = &[".generated.", "_generated."];

/// How many leading lines the content heuristic inspects
const GENERATED_HEADER_LINES: usize = 40;

static GENERATED_HEADER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)@Generated\b|generated by (?:JAXB|the protocol buffer compiler)|\bCode generated\b.*\bDO NOT EDIT\b|<auto-generated",
    )
    .map_err(|e| warn!("Generated-code pattern failed to compile: {}", e))
    .ok()
});

/// Where the active fragment list came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionSource {
    Defaults,
    OverrideFile(PathBuf),
}

impl fmt::Display for ExclusionSource {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => write!(f, "built-in defaults"),
            Self::OverrideFile(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    /// Equal to one path component
    Component(String),
    /// `*.ext` style file-name suffix
    Suffix(String),
    /// Contains `/`; matched against the root-relative path on component boundaries
    PathPart(String),
}

impl Fragment {
    fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        if let Some(suffix) = trimmed.strip_prefix('*') {
            return (!suffix.is_empty()).then(|| Self::Suffix(suffix.to_string()));
        }
        let unslashed = trimmed.trim_matches('/');
        if unslashed.is_empty() {
            return None;
        }
        if unslashed.contains('/') {
            Some(Self::PathPart(unslashed.to_string()))
        } else {
            Some(Self::Component(unslashed.to_string()))
        }
    }

    fn matches(&self, relative: &str, components: &[&str]) -> bool {
        match self {
            Self::Component(name) => components.iter().any(|c| c == name),
            Self::Suffix(suffix) => components.last().is_some_and(|c| c.ends_with(suffix.as_str())),
            Self::PathPart(part) => {
                relative == part
                    || relative.starts_with(&format!("{}/", part))
                    || relative.ends_with(&format!("/{}", part))
                    || relative.contains(&format!("/{}/", part))
            }
        }
    }
}

/// The resolved rule set for one indexing pass
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    fragments: Vec<Fragment>,
    source: ExclusionSource,
    max_file_size: u64,
}

impl ExclusionRules {
    /// Built-in defaults only
    #[inline]
    pub fn defaults(max_file_size: u64) -> Self {
        Self {
            fragments: DEFAULT_EXCLUSIONS
                .iter()
                .filter_map(|raw| Fragment::parse(raw))
                .collect(),
            source: ExclusionSource::Defaults,
            max_file_size,
        }
    }

    /// Resolve the active rules for `root`: `.ragignore` replaces the
    /// defaults, `extra` fragments are added on top of whichever list wins.
    #[inline]
    pub fn resolve(root: &Path, extra: &[String], max_file_size: u64) -> Result<Self> {
        let ignore_path = root.join(IGNORE_FILE_NAME);

        let mut rules = if ignore_path.is_file() {
            let content = std::fs::read_to_string(&ignore_path).with_context(|| {
                format!("Failed to read exclusion file: {}", ignore_path.display())
            })?;
            let fragments: Vec<Fragment> = content.lines().filter_map(Fragment::parse).collect();
            debug!(
                "Loaded {} exclusion fragments from {}",
                fragments.len(),
                ignore_path.display()
            );
            Self {
                fragments,
                source: ExclusionSource::OverrideFile(ignore_path),
                max_file_size,
            }
        } else {
            Self::defaults(max_file_size)
        };

        rules
            .fragments
            .extend(extra.iter().filter_map(|raw| Fragment::parse(raw)));
        Ok(rules)
    }

    #[inline]
    pub fn source(&self) -> &ExclusionSource {
        &self.source
    }

    #[inline]
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Whether a directory (relative to the project root) should be pruned
    #[inline]
    pub fn is_excluded_dir(&self, relative: &Path) -> bool {
        let components = normal_components(relative);
        if components.is_empty() {
            return false;
        }
        if components.iter().any(|c| is_hidden(c)) {
            return true;
        }
        let joined = components.join("/");
        self.fragments
            .iter()
            .any(|fragment| !matches!(fragment, Fragment::Suffix(_)) && fragment.matches(&joined, &components))
    }

    /// Whether a file (relative to the project root) is out of scope by path alone
    #[inline]
    pub fn is_excluded_path(&self, relative: &Path) -> bool {
        let components = normal_components(relative);
        let Some(file_name) = components.last() else {
            return true;
        };
        if components.iter().any(|c| is_hidden(c)) || is_generated_name(file_name) {
            return true;
        }
        let joined = components.join("/");
        self.fragments
            .iter()
            .any(|fragment| fragment.matches(&joined, &components))
    }

    /// Path rules plus the size ceiling
    #[inline]
    pub fn is_excluded_file(&self, relative: &Path, size: u64) -> bool {
        size > self.max_file_size || self.is_excluded_path(relative)
    }
}

fn normal_components(path: &Path) -> Vec<&str> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect()
}

fn is_hidden(component: &str) -> bool {
    component.starts_with('.') && component != "." && component != ".."
}

/// File-name patterns produced by code generators
#[inline]
pub fn is_generated_name(file_name: &str) -> bool {
    GENERATED_NAME_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
        || GENERATED_NAME_INFIXES
            .iter()
            .any(|infix| file_name.contains(infix))
}

/// Content heuristic for generated sources (JAXB, protoc, `DO NOT EDIT` headers)
#[inline]
pub fn looks_generated(content: &str) -> bool {
    let Some(pattern) = GENERATED_HEADER.as_ref() else {
        return false;
    };
    content
        .lines()
        .take(GENERATED_HEADER_LINES)
        .any(|line| pattern.is_match(line).unwrap_or(false))
}
