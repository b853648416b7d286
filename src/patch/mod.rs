//! Format-preserving text replacement across runs.
//!
//! A target substring may be split over several runs, each with its own
//! formatting. [`patch`] rewrites only the runs that overlap the target and
//! leaves every other run untouched:
//!
//! - the first affected run receives the whole replacement text, so its
//!   format styles the new text;
//! - later affected runs keep only the part outside the target (possibly
//!   nothing; the empty run is kept so its format survives);
//! - unaffected runs are not modified at all.
//!
//! # Example
//!
//! ```
//! use docstamp::model::{Paragraph, RunFormat};
//! use docstamp::patch::patch;
//!
//! let mut para = Paragraph::from_runs([
//!     ("AB", RunFormat::tagged("plain")),
//!     ("C—X", RunFormat::tagged("bold")),
//!     ("YZ", RunFormat::tagged("plain")),
//! ]);
//! assert!(patch(&mut para, "C—X", "Q"));
//! assert_eq!(para.text(), "ABQYZ");
//! assert_eq!(para.runs[1].text, "Q");
//! ```

pub mod fields;
pub mod numbering;

pub use fields::{apply_fields, format_letter_date, FieldReport, FieldRule, FieldValues};
pub use numbering::{NumberingPattern, Stamp};

use crate::error::{Error, Result};
use crate::model::{Paragraph, ReplacementSpan};

/// Replace the first occurrence of `old_text` in the paragraph.
///
/// Returns `false` without touching the paragraph when `old_text` does not
/// occur verbatim. Calling again with the same `old_text` after a successful
/// patch normally returns `false`; treat that as "already patched".
pub fn patch(paragraph: &mut Paragraph, old_text: &str, new_text: &str) -> bool {
    RunPatcher::new().patch(paragraph, old_text, new_text)
}

/// Configurable run patcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunPatcher {
    preserve_hyperlinks: bool,
}

impl RunPatcher {
    /// Create a patcher with default behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse replacements that would rewrite a hyperlink run.
    pub fn preserve_hyperlinks(mut self, preserve: bool) -> Self {
        self.preserve_hyperlinks = preserve;
        self
    }

    /// Replace the first occurrence of `old_text`. See [`patch`].
    pub fn patch(&self, paragraph: &mut Paragraph, old_text: &str, new_text: &str) -> bool {
        let Some(span) = paragraph.find_span(old_text) else {
            return false;
        };
        self.patch_span(paragraph, span, new_text)
    }

    /// Like [`RunPatcher::patch`] but reports absence as [`Error::NotFound`].
    pub fn apply(&self, paragraph: &mut Paragraph, old_text: &str, new_text: &str) -> Result<()> {
        if self.patch(paragraph, old_text, new_text) {
            Ok(())
        } else {
            Err(Error::NotFound(old_text.to_string()))
        }
    }

    /// Replace the text covered by `span`, which must have been computed
    /// from the paragraph's current state.
    pub fn patch_span(&self, paragraph: &mut Paragraph, span: ReplacementSpan, new_text: &str) -> bool {
        if span.start >= span.end || span.end > paragraph.text_len() {
            return false;
        }
        let text = paragraph.text();
        if !text.is_char_boundary(span.start) || !text.is_char_boundary(span.end) {
            return false;
        }

        let affected = paragraph.affected_runs(&span);
        let Some(&(first, _)) = affected.first() else {
            return false;
        };

        if self.preserve_hyperlinks
            && affected
                .iter()
                .any(|(index, _)| paragraph.runs[*index].is_hyperlink())
        {
            log::warn!("Skipping replacement inside a hyperlink: {:?}", new_text);
            return false;
        }

        for (index, local) in affected {
            let run = &mut paragraph.runs[index];
            let head = &run.text[..local.start];
            let tail = &run.text[local.end..];
            run.text = if index == first {
                format!("{}{}{}", head, new_text, tail)
            } else {
                format!("{}{}", head, tail)
            };
        }

        true
    }
}
