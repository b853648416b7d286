//! Template field substitution.
//!
//! A [`FieldRule`] finds the current value of a field (company name, dates,
//! vulnerability description) with a regex and swaps it for the value
//! supplied in [`FieldValues`]. When the regex has a capture group, only the
//! first group is replaced; otherwise the whole match is.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Serialize;

use super::RunPatcher;
use crate::error::{Error, Result};
use crate::model::{Document, ReplacementSpan};

/// Field name for the company in the letter title.
pub const COMPANY: &str = "company";
/// Field name for the vulnerability description.
pub const VULNERABILITY: &str = "vulnerability";
/// Field name for the rectification deadline.
pub const DEADLINE: &str = "deadline";
/// Field name for the issue date.
pub const ISSUE_DATE: &str = "issue_date";

/// Values to write, keyed by field name.
pub type FieldValues = BTreeMap<String, String>;

/// Locates one template field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    /// Field name, looked up in [`FieldValues`]
    pub field: String,
    /// Pattern for the current field text
    pub pattern: Regex,
    /// Restrict the search to one paragraph (0-indexed)
    pub paragraph: Option<usize>,
}

impl FieldRule {
    /// Create a rule searching every paragraph.
    pub fn new(field: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            field: field.into(),
            pattern: Regex::new(pattern).map_err(|e| Error::Other(e.to_string()))?,
            paragraph: None,
        })
    }

    /// Restrict the rule to a single paragraph.
    pub fn in_paragraph(mut self, index: usize) -> Self {
        self.paragraph = Some(index);
        self
    }

    /// Rules for the standard notification letter layout.
    pub fn letter_defaults() -> Vec<Self> {
        let company = r"[\p{Han}]+(?:集团)?(?:股份)?(?:有限)?公司";
        vec![
            Self::new(COMPANY, &format!("关于({})", company))
                .unwrap()
                .in_paragraph(3),
            Self::new(COMPANY, &format!("({})：", company))
                .unwrap()
                .in_paragraph(5),
            Self::new(VULNERABILITY, r"存在.+?漏洞").unwrap().in_paragraph(6),
            Self::new(DEADLINE, r"(20\d{2}年\d+月\d+日)前")
                .unwrap()
                .in_paragraph(6),
            Self::new(ISSUE_DATE, r"20\d{2}年\d+月\d+日")
                .unwrap()
                .in_paragraph(13),
        ]
    }

    /// Span of the replaceable text in `text`.
    fn find(&self, text: &str) -> Option<ReplacementSpan> {
        let caps = self.pattern.captures(text)?;
        let m = caps.get(1).or_else(|| caps.get(0))?;
        Some(ReplacementSpan::new(m.start(), m.end()))
    }
}

/// Which fields were written and which were not found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldReport {
    /// `(field, paragraph index)` for each applied rule
    pub applied: Vec<(String, usize)>,
    /// Fields whose rule matched nothing
    pub missing: Vec<String>,
}

/// Apply every rule that has a value.
///
/// A rule whose text is not found is recorded in `missing` and skipped.
pub fn apply_fields(document: &mut Document, rules: &[FieldRule], values: &FieldValues) -> FieldReport {
    let patcher = RunPatcher::new().preserve_hyperlinks(true);
    let mut report = FieldReport::default();

    for rule in rules {
        let Some(value) = values.get(&rule.field) else {
            continue;
        };

        let indices: Vec<usize> = match rule.paragraph {
            Some(i) if i < document.paragraph_count() => vec![i],
            Some(_) => Vec::new(),
            None => (0..document.paragraph_count()).collect(),
        };

        let applied = indices.into_iter().find(|&i| {
            let paragraph = &mut document.paragraphs[i];
            match rule.find(&paragraph.text()) {
                Some(span) => patcher.patch_span(paragraph, span, value),
                None => false,
            }
        });

        match applied {
            Some(i) => {
                log::debug!("Field {} written in paragraph {}", rule.field, i);
                report.applied.push((rule.field.clone(), i));
            }
            None => {
                log::warn!("Field {} not found", rule.field);
                report.missing.push(rule.field.clone());
            }
        }
    }

    report
}

/// Format a date the way letters print it: `2025年3月7日`.
pub fn format_letter_date(date: NaiveDate) -> String {
    format!("{}年{}月{}日", date.year(), date.month(), date.day())
}
