//! Page separator detection.
//!
//! Letters close each page with a horizontal rule. Depending on how the
//! template was authored the rule is typed text (a row of dashes or box
//! drawing glyphs), a paragraph border, or a floating line shape. A
//! paragraph showing any of the three signals is a separator; the last one
//! on a page is that page's marker.

use std::collections::BTreeMap;

use regex::Regex;

use crate::model::{Document, Paragraph};
use crate::oracle::PageMeasurement;

/// Which separator signals a paragraph shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeparatorSignals {
    /// Text is a row of rule glyphs
    pub rule_glyph: bool,
    /// Paragraph carries a border decoration
    pub border: bool,
    /// A floating vector shape without picture is anchored here
    pub floating_shape: bool,
}

impl SeparatorSignals {
    /// Whether any signal is present.
    pub fn any(&self) -> bool {
        self.rule_glyph || self.border || self.floating_shape
    }
}

/// Recognises separator paragraphs.
#[derive(Debug, Clone)]
pub struct SeparatorDetector {
    rule_glyphs: Regex,
}

impl SeparatorDetector {
    /// Create a detector with the default glyph pattern: three or more of
    /// `- _ = ─ ━ — – ═ ＿ －` and nothing else but whitespace.
    pub fn new() -> Self {
        Self {
            rule_glyphs: Regex::new(r"^\s*[-_=─━—–═＿－]{3,}\s*$").unwrap(),
        }
    }

    /// Signals shown by one paragraph.
    pub fn signals(&self, paragraph: &Paragraph) -> SeparatorSignals {
        SeparatorSignals {
            rule_glyph: self.rule_glyphs.is_match(&paragraph.text()),
            border: paragraph.style.border.is_some(),
            floating_shape: paragraph.has_floating_shape(),
        }
    }

    /// Whether the paragraph is a separator.
    pub fn is_separator(&self, paragraph: &Paragraph) -> bool {
        self.signals(paragraph).any()
    }

    /// Marker paragraph of every page that has one, keyed by page.
    ///
    /// When several paragraphs on a page show a signal, the last one wins.
    pub fn markers(&self, document: &Document, measurement: &PageMeasurement) -> BTreeMap<u32, usize> {
        let mut markers = BTreeMap::new();
        for (index, paragraph) in document.paragraphs.iter().enumerate() {
            let Some(page) = measurement.page_of(index) else {
                break;
            };
            if self.is_separator(paragraph) {
                markers.insert(page, index);
            }
        }
        markers
    }
}

impl Default for SeparatorDetector {
    fn default() -> Self {
        Self::new()
    }
}
