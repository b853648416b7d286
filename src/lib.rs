//! # docstamp
//!
//! Format-preserving batch rewriting of notification letters.
//!
//! The library rewrites text inside a document without touching the
//! formatting of the surrounding runs, stamps issue numbers from a persisted
//! counter store, and anchors a confirmation picture on every page after the
//! first while proving, through a layout oracle, that the pagination did not
//! move.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docstamp::{place::Asset, Docstamp};
//!
//! fn main() -> docstamp::Result<()> {
//!     let rewriter = Docstamp::new()
//!         .with_store("config.json")
//!         .with_notification_numbering()
//!         .with_asset(Asset::from_file("confirm.png")?)
//!         .build();
//!
//!     let mut review = docstamp::pipeline::ManualReviewList::new();
//!     let report = rewriter.rewrite("letter.json".as_ref(), &mut review)?;
//!     println!("{} pictures inserted", report.inserted());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Run-span patching**: replacements keep the formatting of every run
//! - **Layout-verified placement**: shrinking search with a single fallback
//! - **Counter store**: merged, atomic, year-rollover aware
//! - **Batch worker**: background thread with progress over a channel

pub mod counter;
pub mod error;
pub mod model;
pub mod oracle;
pub mod patch;
pub mod pipeline;
pub mod place;

// Re-export commonly used types
pub use counter::{Clock, CounterOptions, CounterStore, Counters, Sequence};
pub use error::{Error, Result};
pub use model::{Document, Drawing, ImageResource, Paragraph, Run, RunFormat};
pub use oracle::{
    CommandOracle, FlowOracle, LayoutHandle, LayoutOracle, OracleClient, PageMeasurement,
};
pub use patch::{patch, NumberingPattern, RunPatcher, Stamp};
pub use pipeline::{
    spawn_batch, BatchHandle, BatchReport, DocumentReport, ManualReviewList, PipelineOptions,
    ProgressEvent, Rewriter,
};
pub use place::{AnchorHint, Asset, PlacementEngine, PlacementOptions, PlacementResult};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default counter store file name.
pub const DEFAULT_STORE: &str = "config.json";

/// Paginate a document snapshot with the built-in flow oracle.
///
/// # Example
///
/// ```no_run
/// let m = docstamp::measure_file("letter.json").unwrap();
/// println!("{} pages", m.total_pages);
/// ```
pub fn measure_file<P: AsRef<Path>>(path: P) -> Result<PageMeasurement> {
    OracleClient::new(FlowOracle::new()).measure(path.as_ref())
}

/// Stamp the issue number of one document and advance its counter.
///
/// Returns `Ok(None)` when the document has no issue number; the counter
/// is left alone in that case.
pub fn stamp_file<P: AsRef<Path>>(
    path: P,
    pattern: &NumberingPattern,
    store: &CounterStore,
) -> Result<Option<Stamp>> {
    let path = path.as_ref();
    let mut document = Document::load(path)?;
    let counters = store.load()?;

    let stamp = pattern.stamp(
        &mut document,
        counters.period_key,
        counters.get(pattern.sequence()),
    )?;
    if stamp.is_some() {
        document.save(path)?;
        store.advance(pattern.sequence())?;
    }
    Ok(stamp)
}

/// Place a picture into one document with the built-in flow oracle.
pub fn place_file<P: AsRef<Path>>(path: P, asset: &Asset) -> Result<PlacementResult> {
    let client = OracleClient::new(FlowOracle::new());
    let engine = PlacementEngine::new(&client);
    engine.place(path.as_ref(), asset, &AnchorHint::default())
}

/// Builder for a configured [`Rewriter`].
///
/// # Example
///
/// ```no_run
/// use docstamp::Docstamp;
///
/// let rewriter = Docstamp::new()
///     .with_store("/srv/letters/config.json")
///     .with_rectification_numbering()
///     .with_field("company", "某某科技有限公司")
///     .without_backups()
///     .build();
/// ```
pub struct Docstamp {
    oracle: Option<Arc<dyn LayoutOracle>>,
    store: PathBuf,
    counter_options: CounterOptions,
    options: PipelineOptions,
}

impl Docstamp {
    /// Create a builder with the flow oracle and `config.json` as store.
    pub fn new() -> Self {
        Self {
            oracle: None,
            store: PathBuf::from(DEFAULT_STORE),
            counter_options: CounterOptions::default(),
            options: PipelineOptions::default(),
        }
    }

    /// Measure with `oracle` instead of the flow oracle.
    pub fn with_oracle<O: LayoutOracle + 'static>(mut self, oracle: O) -> Self {
        self.oracle = Some(Arc::new(oracle));
        self
    }

    /// Set the counter store file.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = path.into();
        self
    }

    /// Set counter store options.
    pub fn with_counter_options(mut self, options: CounterOptions) -> Self {
        self.counter_options = options;
        self
    }

    /// Stamp `〔YYYY〕第N期` numbers from sequence A.
    pub fn with_notification_numbering(mut self) -> Self {
        self.options = self.options.with_numbering(NumberingPattern::notification());
        self
    }

    /// Stamp `[YYYY]N号` numbers from sequence B.
    pub fn with_rectification_numbering(mut self) -> Self {
        self.options = self.options.with_numbering(NumberingPattern::rectification());
        self
    }

    /// Write a template field.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.with_field(field, value);
        self
    }

    /// Place `asset` into notification letters.
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.options = self.options.with_asset(asset);
        self
    }

    /// Set placement options.
    pub fn with_placement(mut self, placement: PlacementOptions) -> Self {
        self.options = self.options.with_placement(placement);
        self
    }

    /// Skip document backups.
    pub fn without_backups(mut self) -> Self {
        self.options = self.options.with_backups(false);
        self
    }

    /// Replace all pipeline options.
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the rewriter.
    pub fn build(self) -> Rewriter {
        let client = match self.oracle {
            Some(oracle) => OracleClient::from_arc(oracle),
            None => OracleClient::new(FlowOracle::new()),
        };
        let store = CounterStore::with_options(self.store, self.counter_options);
        Rewriter::new(Arc::new(client), Arc::new(store), self.options)
    }
}

impl Default for Docstamp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn fixed() -> CounterOptions {
        CounterOptions::new().with_clock(Clock::Fixed(
            NaiveDate::from_ymd_opt(2025, 1, 2)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        ))
    }

    fn rectification_order() -> Document {
        let mut paragraphs: Vec<Paragraph> = (0..6)
            .map(|i| Paragraph::with_text(format!("正文{}", i)))
            .collect();
        paragraphs[0] = Paragraph::with_text("网信责字[2024]88号");
        Document::from_paragraphs(paragraphs)
    }

    #[test]
    fn test_builder() {
        let rewriter = Docstamp::new()
            .with_store("/tmp/store.json")
            .with_notification_numbering()
            .with_field("company", "某某公司")
            .without_backups()
            .build();

        assert_eq!(rewriter.store().path(), Path::new("/tmp/store.json"));
        assert!(!rewriter.options().backups);
        assert_eq!(
            rewriter.options().numbering.as_ref().map(|n| n.sequence()),
            Some(Sequence::A)
        );
        assert_eq!(rewriter.options().fields.get("company").unwrap(), "某某公司");
    }

    #[test]
    fn test_place_file_with_flow_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("letter.json");
        let mut paragraphs: Vec<Paragraph> = (0..24)
            .map(|i| Paragraph::with_text(format!("正文{}", i)))
            .collect();
        paragraphs.extend([Paragraph::new(), Paragraph::new(), Paragraph::new()]);
        paragraphs.extend([
            Paragraph::with_text("正文24"),
            Paragraph::with_text("────────────"),
            Paragraph::with_text("抄送"),
            Paragraph::with_text("印发"),
        ]);
        Document::from_paragraphs(paragraphs).save(&path).unwrap();

        let asset = Asset::new("confirm", ImageResource::with_dimensions("image/png", 350, 200));
        let result = place_file(&path, &asset).unwrap();

        assert!(result.verified);
        assert_eq!(result.measurement.total_pages, 2);
        assert_eq!(result.inserted_count, 1);
        assert!(Document::load(&path)
            .unwrap()
            .paragraphs
            .iter()
            .any(|p| p.has_picture_of("confirm")));
    }

    #[test]
    fn test_stamp_file_advances_counter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("order.json");
        rectification_order().save(&path).unwrap();
        let store = CounterStore::with_options(dir.path().join("config.json"), fixed());

        let stamp = stamp_file(&path, &NumberingPattern::rectification(), &store)
            .unwrap()
            .unwrap();
        assert_eq!(stamp.number, 235);
        assert_eq!(stamp.old_number, "88");
        assert_eq!(store.peek(Sequence::B).unwrap(), 236);
        assert_eq!(store.peek(Sequence::A).unwrap(), 104);

        let saved = Document::load(&path).unwrap();
        assert_eq!(saved.paragraphs[0].text(), "网信责字[2025]235号");
    }

    #[test]
    fn test_stamp_file_without_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("order.json");
        Document::from_paragraphs(vec![Paragraph::with_text("无编号")])
            .save(&path)
            .unwrap();
        let store = CounterStore::with_options(dir.path().join("config.json"), fixed());

        assert!(stamp_file(&path, &NumberingPattern::notification(), &store)
            .unwrap()
            .is_none());
        assert_eq!(store.peek(Sequence::A).unwrap(), 104);
    }

    #[test]
    fn test_measure_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = measure_file(dir.path().join("nope.json"));
        assert!(matches!(result, Err(Error::OracleUnavailable { .. })));
    }
}
