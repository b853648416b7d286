//! Single-column flow paginator.
//!
//! Estimates pagination directly from the JSON snapshot. Each paragraph
//! takes `lines * line_height` plus spacing plus the height of its inline
//! drawings; floating drawings take no flow space. A paragraph that does not
//! fit on the current page moves to the next one, and a paragraph taller
//! than a page spills over as many pages as it needs.

use std::path::Path;

use super::{LayoutHandle, LayoutOracle, PageMeasurement};
use crate::error::{Error, Result};
use crate::model::{Document, Paragraph};

/// Page geometry for [`FlowOracle`].
///
/// The defaults describe an A4 official letter: 225 mm of body height,
/// 22 lines of 28 full-width characters.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOptions {
    /// Usable body height per page, in points
    pub page_height_pt: f32,
    /// Default line height, in points
    pub line_height_pt: f32,
    /// Full-width characters per line
    pub chars_per_line: f32,
}

impl FlowOptions {
    /// Create flow options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the usable page height.
    pub fn with_page_height(mut self, points: f32) -> Self {
        self.page_height_pt = points;
        self
    }

    /// Set the default line height.
    pub fn with_line_height(mut self, points: f32) -> Self {
        self.line_height_pt = points;
        self
    }

    /// Set the number of full-width characters per line.
    pub fn with_chars_per_line(mut self, chars: f32) -> Self {
        self.chars_per_line = chars;
        self
    }
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            page_height_pt: 637.8,
            line_height_pt: 28.9,
            chars_per_line: 28.0,
        }
    }
}

/// Oracle paginating snapshots with a flow model.
#[derive(Debug, Clone, Default)]
pub struct FlowOracle {
    options: FlowOptions,
}

impl FlowOracle {
    /// Create a flow oracle with default geometry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flow oracle with custom geometry.
    pub fn with_options(options: FlowOptions) -> Self {
        Self { options }
    }

    /// Paginate an in-memory document.
    pub fn paginate(&self, document: &Document) -> PageMeasurement {
        let page_height = self.options.page_height_pt.max(1.0);
        let mut page: u32 = 1;
        let mut cursor = 0.0f32;
        let mut paragraph_pages = Vec::with_capacity(document.paragraph_count());

        for paragraph in &document.paragraphs {
            let height = self.paragraph_height(paragraph);

            if cursor > 0.0 && (paragraph.style.page_break_before || cursor + height > page_height) {
                page += 1;
                cursor = 0.0;
            }
            paragraph_pages.push(page);

            cursor += height;
            while cursor > page_height {
                page += 1;
                cursor -= page_height;
            }
        }

        PageMeasurement::new(page, paragraph_pages)
    }

    /// Flow height of one paragraph, in points.
    pub fn paragraph_height(&self, paragraph: &Paragraph) -> f32 {
        let line_height = paragraph
            .style
            .line_height
            .unwrap_or(self.options.line_height_pt);
        let inline: f32 = paragraph.drawings.iter().map(|d| d.flow_height_pt()).sum();

        let width = text_width(&paragraph.text());
        let lines = if width == 0.0 && inline > 0.0 {
            0.0
        } else {
            (width / self.options.chars_per_line.max(1.0)).ceil().max(1.0)
        };

        lines * line_height
            + inline
            + paragraph.style.space_before.unwrap_or(0.0)
            + paragraph.style.space_after.unwrap_or(0.0)
    }
}

/// Width of `text` in full-width character units.
fn text_width(text: &str) -> f32 {
    text.trim_end()
        .chars()
        .map(|c| if c.is_ascii() { 0.5 } else { 1.0 })
        .sum()
}

impl LayoutOracle for FlowOracle {
    fn open(&self, path: &Path) -> Result<Box<dyn LayoutHandle>> {
        let document =
            Document::load(path).map_err(|e| Error::oracle_unavailable(path, e.to_string()))?;
        Ok(Box::new(FlowHandle {
            measurement: self.paginate(&document),
        }))
    }

    fn name(&self) -> &str {
        "flow"
    }
}

struct FlowHandle {
    measurement: PageMeasurement,
}

impl LayoutHandle for FlowHandle {
    fn total_pages(&self) -> Result<u32> {
        Ok(self.measurement.total_pages)
    }

    fn paragraph_count(&self) -> Result<usize> {
        Ok(self.measurement.paragraph_count())
    }

    fn page_of(&self, index: usize) -> Result<u32> {
        self.measurement
            .page_of(index)
            .ok_or_else(|| Error::Oracle(format!("no paragraph {}", index)))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
