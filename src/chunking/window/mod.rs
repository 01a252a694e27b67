//! Last-resort chunker: regex line boundaries where a language has them,
//! YAML document separators, otherwise overlapping line windows.


use async_trait::async_trait;
use fancy_regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use super::{ChunkDraft, ChunkingConfig, ChunkingError, ChunkingStrategy, Language, SourceFile};

pub const STRATEGY_NAME: &str = "window";

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| warn!("Boundary pattern failed to compile: {}", e))
        .ok()
}

static JAVA_BOUNDARY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(
        r"^\s*(?:@\w+(?:\([^)]*\))?\s*)*(?:(?:public|private|protected|static|final|abstract|sealed|synchronized|native|default)\s+)*(?:(?:class|interface|enum|record)\s+\w+|[\w<>\[\],.? ]+\s+\w+\s*\([^;]*$)",
    )
});

static SCRIPT_BOUNDARY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(
        r"^\s*(?:export\s+)?(?:default\s+)?(?:(?:async\s+)?function\*?\s*\w*\s*\(|(?:abstract\s+)?class\s+\w+|interface\s+\w+|type\s+\w+\s*=|enum\s+\w+|(?:const|let|var)\s+\w+\s*=\s*(?:async\s*)?(?:\([^)]*\)|\w+)\s*=>)",
    )
});

static PYTHON_BOUNDARY: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"^(?:@\w|(?:async\s+)?def\s+\w+|class\s+\w+)"));

static RUST_BOUNDARY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(
        r"^\s*(?:#\[|(?:pub(?:\([^)]*\))?\s+)?(?:(?:async|const|unsafe|extern)\s+)*(?:fn|struct|enum|trait|impl|mod|macro_rules!)\b)",
    )
});

static GO_BOUNDARY: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"^(?:func|type)\s"));

static MARKDOWN_BOUNDARY: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"^#{1,6}\s"));

fn boundary_pattern(language: Language) -> Option<&'static Regex> {
    let pattern = match language {
        Language::Java => &JAVA_BOUNDARY,
        Language::JavaScript | Language::TypeScript => &SCRIPT_BOUNDARY,
        Language::Python => &PYTHON_BOUNDARY,
        Language::Rust => &RUST_BOUNDARY,
        Language::Go => &GO_BOUNDARY,
        Language::Markdown => &MARKDOWN_BOUNDARY,
        _ => return None,
    };
    pattern.as_ref()
}

/// Line-based fallback chunker; accepts every language
#[derive(Debug, Clone)]
pub struct WindowChunker {
    max_chars: usize,
    min_chars: usize,
    overlap_lines: usize,
}

impl WindowChunker {
    #[inline]
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_chars: config.max_chunk_size.max(1),
            min_chars: config.min_chunk_size,
            overlap_lines: config.overlap_lines,
        }
    }

    /// Synchronous core, shared with callers that need a guaranteed result
    #[inline]
    pub fn chunk_text(&self, language: Language, content: &str) -> Vec<ChunkDraft> {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        if lines.is_empty() {
            return vec![ChunkDraft {
                text: content.to_string(),
                start_line: 1,
                end_line: 1,
                node_kind: "file".to_string(),
                ..ChunkDraft::default()
            }];
        }

        if content.chars().count() <= self.max_chars {
            return vec![make_draft(&lines, 0, lines.len(), "file")];
        }

        let segments = if language == Language::Yaml {
            yaml_documents(&lines)
        } else if let Some(pattern) = boundary_pattern(language) {
            boundary_segments(&lines, pattern)
        } else {
            vec![(0, lines.len())]
        };

        if segments.len() <= 1 {
            return self.windows(&lines, 0, lines.len(), "window");
        }

        let kind = if language == Language::Yaml {
            "document"
        } else {
            "block"
        };
        self.pack_segments(&lines, &segments, kind)
    }

    /// Greedily merge consecutive segments up to the ceiling; window oversized ones
    fn pack_segments(&self, lines: &[&str], segments: &[(usize, usize)], kind: &str) -> Vec<ChunkDraft> {
        let mut drafts = Vec::new();
        let mut group: Option<(usize, usize)> = None;
        let mut group_chars = 0;

        for &(start, end) in segments {
            let seg_chars = count_chars(&lines[start..end]);

            if seg_chars > self.max_chars {
                if let Some((g_start, g_end)) = group.take() {
                    drafts.push(make_draft(lines, g_start, g_end, kind));
                    group_chars = 0;
                }
                drafts.extend(self.windows(lines, start, end, kind));
                continue;
            }

            match group {
                Some((g_start, _)) if group_chars + seg_chars <= self.max_chars => {
                    group = Some((g_start, end));
                    group_chars += seg_chars;
                }
                Some((g_start, g_end)) => {
                    drafts.push(make_draft(lines, g_start, g_end, kind));
                    group = Some((start, end));
                    group_chars = seg_chars;
                }
                None => {
                    group = Some((start, end));
                    group_chars = seg_chars;
                }
            }
        }

        if let Some((g_start, g_end)) = group {
            // fold a tiny trailing group into its predecessor when it still fits
            let fits_previous = drafts.last().is_some_and(|prev: &ChunkDraft| {
                prev.text.chars().count() + group_chars <= self.max_chars
                    && prev.end_line as usize == g_start
            });
            if group_chars < self.min_chars && fits_previous {
                if let Some(prev) = drafts.last_mut() {
                    prev.text.push_str(&lines[g_start..g_end].concat());
                    prev.end_line = g_end as u32;
                }
            } else {
                drafts.push(make_draft(lines, g_start, g_end, kind));
            }
        }

        drafts.retain(|draft| !draft.text.trim().is_empty());
        drafts
    }

    /// Overlapping windows over `lines[start..end]`, each within the ceiling
    fn windows(&self, lines: &[&str], start: usize, end: usize, kind: &str) -> Vec<ChunkDraft> {
        let mut drafts = Vec::new();
        let mut window_start = start;

        while window_start < end {
            let mut window_end = window_start;
            let mut chars = 0;
            while window_end < end {
                let line_chars = lines[window_end].chars().count();
                if chars + line_chars > self.max_chars && window_end > window_start {
                    break;
                }
                chars += line_chars;
                window_end += 1;
            }

            drafts.push(make_draft(lines, window_start, window_end, kind));

            if window_end >= end {
                break;
            }
            let rewind = self.overlap_lines.min(window_end - window_start - 1);
            window_start = window_end - rewind;
        }

        drafts
    }
}

fn count_chars(lines: &[&str]) -> usize {
    lines.iter().map(|line| line.chars().count()).sum()
}

/// Draft over `lines[start..end]` (0-based, end exclusive)
fn make_draft(lines: &[&str], start: usize, end: usize, kind: &str) -> ChunkDraft {
    ChunkDraft {
        text: lines[start..end].concat(),
        start_line: start as u32 + 1,
        end_line: end.max(start + 1) as u32,
        node_kind: kind.to_string(),
        ..ChunkDraft::default()
    }
}

fn boundary_segments(lines: &[&str], pattern: &Regex) -> Vec<(usize, usize)> {
    let mut starts = vec![0];
    let mut previous_match: Option<usize> = None;

    for (index, line) in lines.iter().enumerate() {
        if !pattern.is_match(line).unwrap_or(false) {
            continue;
        }
        // decorators and attributes stay with the item that follows them
        let attached = previous_match
            .is_some_and(|prev| prev + 1 == index && is_prefix_line(lines[prev]));
        if !attached && index > 0 {
            starts.push(index);
        }
        previous_match = Some(index);
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| (start, starts.get(i + 1).copied().unwrap_or(lines.len())))
        .collect()
}

fn is_prefix_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('@') || trimmed.starts_with("#[")
}

fn yaml_documents(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (index, line) in lines.iter().enumerate() {
        if line.trim_end() == "---" && index > start {
            segments.push((start, index));
            start = index;
        }
    }
    segments.push((start, lines.len()));
    segments
}

#[async_trait]
impl ChunkingStrategy for WindowChunker {
    fn name(&self) -> &'static str {
        STRATEGY_NAME
    }

    fn supports(&self, _language: Language) -> bool {
        true
    }

    async fn chunk(&self, file: &SourceFile<'_>) -> Result<Vec<ChunkDraft>, ChunkingError> {
        let drafts = self.chunk_text(file.language, file.content);
        if drafts.is_empty() {
            return Err(ChunkingError::Empty);
        }
        Ok(drafts)
    }
}
