//! Paragraph and run-level types.
//!
//! A paragraph is a flat, ordered list of runs. Character offsets are never
//! stored: they are derived from run lengths every time they are needed, so
//! a mutation can never leave a stale offset behind.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::Drawing;

/// A paragraph of text content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    /// Formatted text runs, in reading order
    pub runs: Vec<Run>,

    /// Paragraph-level decoration and spacing
    #[serde(default)]
    pub style: ParagraphStyle,

    /// Drawing objects anchored to this paragraph
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drawings: Vec<Drawing>,
}

impl Paragraph {
    /// Create a new empty paragraph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a paragraph with a single plain run.
    pub fn with_text(text: impl Into<String>) -> Self {
        let mut p = Self::new();
        p.add_text(text);
        p
    }

    /// Create a paragraph from `(text, format)` pieces.
    pub fn from_runs<I, S>(runs: I) -> Self
    where
        I: IntoIterator<Item = (S, RunFormat)>,
        S: Into<String>,
    {
        Self {
            runs: runs
                .into_iter()
                .map(|(text, format)| Run::with_format(text, format))
                .collect(),
            ..Default::default()
        }
    }

    /// Add plain text to the paragraph.
    pub fn add_text(&mut self, text: impl Into<String>) {
        self.runs.push(Run::new(text));
    }

    /// Add a formatted run.
    pub fn add_run(&mut self, run: Run) {
        self.runs.push(run);
    }

    /// Concatenated text of all runs.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Total text length in bytes.
    pub fn text_len(&self) -> usize {
        self.runs.iter().map(|r| r.text.len()).sum()
    }

    /// Byte range each run occupies in [`Paragraph::text`].
    pub fn run_ranges(&self) -> Vec<Range<usize>> {
        let mut offset = 0;
        self.runs
            .iter()
            .map(|run| {
                let start = offset;
                offset += run.text.len();
                start..offset
            })
            .collect()
    }

    /// Locate the first occurrence of `needle` in the paragraph text.
    ///
    /// Empty needles never match.
    pub fn find_span(&self, needle: &str) -> Option<ReplacementSpan> {
        if needle.is_empty() {
            return None;
        }
        let start = self.text().find(needle)?;
        Some(ReplacementSpan::new(start, start + needle.len()))
    }

    /// Runs overlapping `span`, as `(run index, local range)` pairs.
    pub fn affected_runs(&self, span: &ReplacementSpan) -> Vec<(usize, Range<usize>)> {
        self.run_ranges()
            .into_iter()
            .enumerate()
            .filter_map(|(index, range)| span.local_to(&range).map(|local| (index, local)))
            .collect()
    }

    /// Whether the paragraph has no visible text and holds no picture.
    pub fn is_blank(&self) -> bool {
        self.runs.iter().all(|r| r.text.trim().is_empty()) && !self.has_picture()
    }

    /// Whether any anchored drawing is a picture.
    pub fn has_picture(&self) -> bool {
        self.drawings.iter().any(Drawing::is_picture)
    }

    /// Whether a picture with the given resource id is anchored here.
    pub fn has_picture_of(&self, resource_id: &str) -> bool {
        self.drawings
            .iter()
            .any(|d| d.resource_id() == Some(resource_id))
    }

    /// Whether a floating vector shape (no picture) is anchored here.
    pub fn has_floating_shape(&self) -> bool {
        self.drawings
            .iter()
            .any(|d| d.is_vector_shape() && d.is_floating())
    }

    /// Anchor a drawing to the paragraph, returning its index.
    pub fn insert_drawing(&mut self, drawing: Drawing) -> usize {
        self.drawings.push(drawing);
        self.drawings.len() - 1
    }

    /// Check whether any run is a hyperlink.
    pub fn has_hyperlink(&self) -> bool {
        self.runs.iter().any(Run::is_hyperlink)
    }
}

/// A contiguous fragment of text sharing one format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// The text content
    pub text: String,

    /// Character formatting, treated as opaque by the patcher
    #[serde(default)]
    pub format: RunFormat,

    /// Hyperlink target if this run sits inside a link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<String>,
}

impl Run {
    /// Create a new run with default formatting.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Create a run with explicit formatting.
    pub fn with_format(text: impl Into<String>, format: RunFormat) -> Self {
        Self {
            text: text.into(),
            format,
            hyperlink: None,
        }
    }

    /// Create a bold run.
    pub fn bold(text: impl Into<String>) -> Self {
        Self::with_format(
            text,
            RunFormat {
                bold: true,
                ..Default::default()
            },
        )
    }

    /// Mark this run as part of a hyperlink.
    pub fn linked(mut self, target: impl Into<String>) -> Self {
        self.hyperlink = Some(target.into());
        self
    }

    /// Check if this run is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Check if this run is part of a hyperlink.
    pub fn is_hyperlink(&self) -> bool {
        self.hyperlink.is_some()
    }
}

/// Character formatting of a run.
///
/// The well-known fields exist for display and tests; `raw` carries the
/// source document's property payload verbatim so nothing is lost when the
/// document model collaborator writes the run back out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFormat {
    /// Bold text
    #[serde(default)]
    pub bold: bool,

    /// Italic text
    #[serde(default)]
    pub italic: bool,

    /// Underlined text
    #[serde(default)]
    pub underline: bool,

    /// Font name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,

    /// Font size in points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,

    /// Text color (hex format, e.g., "#FF0000")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Opaque source formatting payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl RunFormat {
    /// Formatting identified only by an opaque tag.
    pub fn tagged(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            ..Default::default()
        }
    }
}

/// Paragraph styling properties relevant to layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParagraphStyle {
    /// Border/rule decoration drawn with the paragraph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<Border>,

    /// Start this paragraph on a new page
    #[serde(default)]
    pub page_break_before: bool,

    /// Space before paragraph in points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_before: Option<f32>,

    /// Space after paragraph in points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_after: Option<f32>,

    /// Line height in points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f32>,
}

/// Which edge of the paragraph carries a border line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Border {
    /// Rule above the paragraph
    Top,
    /// Rule below the paragraph
    Bottom,
    /// Box around the paragraph
    Box,
}

/// Half-open byte range `[start, end)` into a paragraph's text.
///
/// Only valid for the paragraph state it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacementSpan {
    /// Inclusive start offset
    pub start: usize,
    /// Exclusive end offset
    pub end: usize,
}

impl ReplacementSpan {
    /// Create a span.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Span length in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether a run occupying `range` overlaps this span.
    pub fn overlaps(&self, range: &Range<usize>) -> bool {
        range.start < self.end && range.end > self.start
    }

    /// The overlap expressed relative to `range.start`, if any.
    pub fn local_to(&self, range: &Range<usize>) -> Option<Range<usize>> {
        if !self.overlaps(range) {
            return None;
        }
        let local_start = self.start.saturating_sub(range.start);
        let local_end = self.end.min(range.end) - range.start;
        Some(local_start..local_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(pieces: &[&str]) -> Paragraph {
        Paragraph::from_runs(
            pieces
                .iter()
                .enumerate()
                .map(|(i, t)| (*t, RunFormat::tagged(format!("r{i}")))),
        )
    }

    #[test]
    fn test_paragraph_text() {
        let mut p = Paragraph::new();
        p.add_text("Hello ");
        p.add_run(Run::bold("world"));
        p.add_text("!");

        assert_eq!(p.text(), "Hello world!");
        assert_eq!(p.text_len(), 12);
    }

    #[test]
    fn test_run_ranges_follow_lengths() {
        let p = split(&["AB", "C—X", "YZ"]);
        // '—' is three bytes in UTF-8
        assert_eq!(p.run_ranges(), vec![0..2, 2..7, 7..9]);
    }

    #[test]
    fn test_affected_runs() {
        let p = split(&["AB", "C—X", "YZ"]);
        let span = p.find_span("BC").unwrap();
        assert_eq!(span, ReplacementSpan::new(1, 3));
        assert_eq!(p.affected_runs(&span), vec![(0, 1..2), (1, 0..1)]);
    }

    #[test]
    fn test_find_span_rejects_empty() {
        let p = split(&["AB"]);
        assert!(p.find_span("").is_none());
        assert!(p.find_span("ab").is_none());
    }

    #[test]
    fn test_blank_detection() {
        assert!(Paragraph::with_text("  \t").is_blank());
        assert!(Paragraph::new().is_blank());
        assert!(!Paragraph::with_text("x").is_blank());

        let mut p = Paragraph::new();
        p.insert_drawing(Drawing::picture("seal", 1.0, 1.0));
        assert!(!p.is_blank());
    }

    #[test]
    fn test_span_local_range() {
        let span = ReplacementSpan::new(3, 8);
        assert_eq!(span.local_to(&(0..4)), Some(3..4));
        assert_eq!(span.local_to(&(4..6)), Some(0..2));
        assert_eq!(span.local_to(&(6..10)), Some(0..2));
        assert_eq!(span.local_to(&(8..10)), None);
        assert_eq!(span.local_to(&(0..3)), None);
    }
}
