
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chunking::Language;
use crate::config::ExclusionRules;

/// A file in scope for indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleFile {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the project root, `/`-separated
    pub relative: String,
    pub language: Language,
    pub size: u64,
}

impl EligibleFile {
    #[inline]
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Whether the file name ends with one of `extensions` (case-insensitive)
#[inline]
pub fn has_indexed_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
}

/// Root-relative, `/`-separated form of `path`
#[inline]
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Check a single file against the path, extension and size rules
#[inline]
pub fn eligible_file(
    root: &Path,
    path: &Path,
    rules: &ExclusionRules,
    extensions: &[String],
) -> Option<EligibleFile> {
    if !has_indexed_extension(path, extensions) {
        return None;
    }
    let relative = path.strip_prefix(root).ok()?;
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() || rules.is_excluded_file(relative, metadata.len()) {
        return None;
    }
    Some(EligibleFile {
        path: path.to_path_buf(),
        relative: relative_path(root, path),
        language: Language::from_path(path),
        size: metadata.len(),
    })
}

/// Enumerate eligible files under `subtree`, sorted by path
///
/// # Arguments
/// * `root` - Canonical project root; exclusions are evaluated relative to it
/// * `subtree` - Directory to walk, inside `root`
/// * `rules` - Active exclusion rules
/// * `extensions` - Indexed file extensions, each starting with `.`
#[inline]
pub fn collect_eligible(
    root: &Path,
    subtree: &Path,
    rules: &ExclusionRules,
    extensions: &[String],
) -> Vec<EligibleFile> {
    let walker = WalkDir::new(subtree)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            entry
                .path()
                .strip_prefix(root)
                .map_or(true, |relative| !rules.is_excluded_dir(relative))
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(file) = eligible_file(root, entry.path(), rules, extensions) {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Found {} eligible files under {}", files.len(), subtree.display());
    files
}
