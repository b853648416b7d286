//! Issue-number stamping.
//!
//! Letters carry an issue number such as `〔2025〕第104期` in their header.
//! The year and the sequence number are rewritten in place through the run
//! patcher, so the original formatting of both digits groups is kept even
//! when the digits are split across runs.

use regex::Regex;
use serde::Serialize;

use super::RunPatcher;
use crate::counter::Sequence;
use crate::error::{Error, Result};
use crate::model::{Document, ReplacementSpan};

/// A regex locating an issue number, with `year` and `number` groups.
#[derive(Debug, Clone)]
pub struct NumberingPattern {
    regex: Regex,
    sequence: Sequence,
}

impl NumberingPattern {
    /// Notification letters: `〔YYYY〕第N期`, numbered from sequence A.
    pub fn notification() -> Self {
        Self {
            regex: Regex::new(r"〔(?P<year>\d{4})〕第(?P<number>\d+)期").unwrap(),
            sequence: Sequence::A,
        }
    }

    /// Rectification orders: `…责字[YYYY]N号`, numbered from sequence B.
    pub fn rectification() -> Self {
        Self {
            regex: Regex::new(r"责字\[(?P<year>\d{4})\](?P<number>\d+)号").unwrap(),
            sequence: Sequence::B,
        }
    }

    /// Custom pattern. It must define `year` and `number` capture groups.
    pub fn custom(pattern: &str, sequence: Sequence) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| Error::Other(e.to_string()))?;
        let names: Vec<_> = regex.capture_names().flatten().collect();
        if !names.contains(&"year") || !names.contains(&"number") {
            return Err(Error::Other(format!(
                "Numbering pattern needs `year` and `number` groups: {}",
                pattern
            )));
        }
        Ok(Self { regex, sequence })
    }

    /// Counter sequence this pattern is numbered from.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Index of the first paragraph containing an issue number.
    pub fn locate(&self, document: &Document) -> Option<usize> {
        document
            .paragraphs
            .iter()
            .position(|p| self.regex.is_match(&p.text()))
    }

    /// Span of a named group in `text`.
    fn group_span(&self, text: &str, group: &str) -> Option<(ReplacementSpan, String)> {
        let caps = self.regex.captures(text)?;
        let m = caps.name(group)?;
        Some((ReplacementSpan::new(m.start(), m.end()), m.as_str().to_string()))
    }

    /// Rewrite the first issue number in the document.
    ///
    /// Returns `Ok(None)` when the document has no issue number.
    pub fn stamp(&self, document: &mut Document, year: i32, number: u64) -> Result<Option<Stamp>> {
        let Some(index) = self.locate(document) else {
            log::warn!("No issue number found");
            return Ok(None);
        };
        let patcher = RunPatcher::new();
        let paragraph = &mut document.paragraphs[index];

        let (year_span, old_year) = self
            .group_span(&paragraph.text(), "year")
            .ok_or_else(|| Error::NotFound("issue year".into()))?;
        patcher.patch_span(paragraph, year_span, &year.to_string());

        // Offsets are recomputed: the year rewrite may have shifted them.
        let (number_span, old_number) = self
            .group_span(&paragraph.text(), "number")
            .ok_or_else(|| Error::NotFound("issue number".into()))?;
        patcher.patch_span(paragraph, number_span, &number.to_string());

        log::info!(
            "Issue number rewritten: {}/{} -> {}/{}",
            old_year,
            old_number,
            year,
            number
        );

        Ok(Some(Stamp {
            paragraph_index: index,
            old_year,
            old_number,
            year,
            number,
        }))
    }
}

/// Outcome of a successful [`NumberingPattern::stamp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stamp {
    /// Paragraph holding the issue number
    pub paragraph_index: usize,
    /// Year text before stamping
    pub old_year: String,
    /// Number text before stamping
    pub old_number: String,
    /// Year written
    pub year: i32,
    /// Number written
    pub number: u64,
}
