
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::chunking::Language;
use crate::config::ExclusionSource;

/// What happened to one file during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Re-chunked and re-embedded
    Indexed {
        chunks: usize,
        strategy: &'static str,
        demoted: bool,
    },
    /// Content hash matched the stored record
    Unchanged,
    /// Out of scope (generated content or no longer eligible); stored data dropped
    Excluded,
    /// File vanished; stored data dropped
    Removed,
    /// Recorded and skipped; previously stored data left as it was
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub reason: String,
}

/// Aggregate summary of one indexing pass
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub target: PathBuf,
    pub eligible: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub excluded: usize,
    pub removed: usize,
    pub failed: Vec<FileFailure>,
    pub chunks: usize,
    /// Files that needed a fallback chunker
    pub demoted: usize,
    pub languages: BTreeMap<Language, usize>,
    pub cleared: bool,
    /// Stopped early; stale cleanup was skipped
    pub cancelled: bool,
    /// Processing was capped below the eligible count
    pub limited: bool,
    pub exclusion_source: ExclusionSource,
    pub elapsed: Duration,
}

impl IndexReport {
    #[inline]
    pub fn new(target: PathBuf, exclusion_source: ExclusionSource) -> Self {
        Self {
            target,
            eligible: 0,
            indexed: 0,
            unchanged: 0,
            excluded: 0,
            removed: 0,
            failed: Vec::new(),
            chunks: 0,
            demoted: 0,
            languages: BTreeMap::new(),
            cleared: false,
            cancelled: false,
            limited: false,
            exclusion_source,
            elapsed: Duration::ZERO,
        }
    }

    /// Fold one file's outcome into the totals
    #[inline]
    pub fn record(&mut self, path: &str, language: Language, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Indexed {
                chunks, demoted, ..
            } => {
                self.indexed += 1;
                self.chunks += chunks;
                *self.languages.entry(language).or_insert(0) += chunks;
                if *demoted {
                    self.demoted += 1;
                }
            }
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Excluded => self.excluded += 1,
            FileOutcome::Removed => self.removed += 1,
            FileOutcome::Failed(reason) => self.failed.push(FileFailure {
                path: path.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Files looked at, whatever the outcome
    #[inline]
    pub fn processed(&self) -> usize {
        self.indexed + self.unchanged + self.excluded + self.failed.len()
    }

    /// Nothing was written during the pass
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.indexed == 0 && self.removed == 0 && self.excluded == 0 && !self.cleared
    }

    #[inline]
    pub fn files_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.processed() as f64 / seconds
        } else {
            0.0
        }
    }

    /// One-line summary used in logs
    #[inline]
    pub fn summary_line(&self) -> String {
        format!(
            "{} indexed, {} unchanged, {} removed, {} excluded, {} failed, {} chunks in {:.1}s",
            self.indexed,
            self.unchanged,
            self.removed,
            self.excluded,
            self.failed.len(),
            self.chunks,
            self.elapsed.as_secs_f64()
        )
    }
}
