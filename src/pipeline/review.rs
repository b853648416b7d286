//! Documents needing a human look.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::counter::Clock;

/// One document that could not be fully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewEntry {
    /// Full path of the document
    pub file_path: PathBuf,
    /// File name only
    pub file_name: String,
    /// Short error label
    pub error_kind: String,
    /// Human-readable detail
    pub error_detail: String,
    /// When the entry was added, `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
}

/// Collected review entries for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManualReviewList {
    entries: Vec<ReviewEntry>,
    #[serde(skip)]
    clock: Clock,
}

impl ManualReviewList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty list stamping entries from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: Vec::new(),
            clock,
        }
    }

    /// Add an entry.
    pub fn add(&mut self, path: &Path, kind: impl Into<String>, detail: impl Into<String>) {
        let entry = ReviewEntry {
            file_path: path.to_path_buf(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            error_kind: kind.into(),
            error_detail: detail.into(),
            timestamp: self.clock.timestamp(),
        };
        log::warn!(
            "Manual review: {} ({}: {})",
            entry.file_name,
            entry.error_kind,
            entry.error_detail
        );
        self.entries.push(entry);
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[ReviewEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Append the entries of another list.
    pub fn extend(&mut self, other: ManualReviewList) {
        self.entries.extend(other.entries);
    }
}

impl fmt::Display for ManualReviewList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "No documents need manual review");
        }
        writeln!(f, "{} document issue(s) need manual review:", self.entries.len())?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "{}. {}", i + 1, entry.file_name)?;
            writeln!(f, "   path:   {}", entry.file_path.display())?;
            writeln!(f, "   kind:   {}", entry.error_kind)?;
            writeln!(f, "   detail: {}", entry.error_detail)?;
            writeln!(f, "   time:   {}", entry.timestamp)?;
        }
        Ok(())
    }
}
