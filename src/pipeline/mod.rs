//! Per-document rewrite pipeline and the batch worker.
//!
//! A [`Rewriter`] takes one persisted document through the whole job:
//! backup, validation, template fields, issue number, picture placement,
//! re-validation, and finally the counter advance. Any error restores the
//! backup, so a document is either fully rewritten or left as it was.
//! Problems that do not invalidate the document (no issue number, pages
//! without a picture) land in the [`ManualReviewList`] instead.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docstamp::counter::CounterStore;
//! use docstamp::oracle::{FlowOracle, OracleClient};
//! use docstamp::patch::NumberingPattern;
//! use docstamp::pipeline::{ManualReviewList, PipelineOptions, Rewriter};
//!
//! fn main() -> docstamp::Result<()> {
//!     let rewriter = Rewriter::new(
//!         Arc::new(OracleClient::new(FlowOracle::new())),
//!         Arc::new(CounterStore::open("config.json")),
//!         PipelineOptions::new().with_numbering(NumberingPattern::notification()),
//!     );
//!     let mut review = ManualReviewList::new();
//!     let report = rewriter.rewrite("letter.json".as_ref(), &mut review)?;
//!     println!("issued {:?}", report.issued);
//!     Ok(())
//! }
//! ```

mod backup;
mod batch;
mod review;

pub use backup::{cleanup_backups, create_backup, list_backups, recover_from_backup};
pub use batch::{run_batch, spawn_batch, BatchHandle, BatchReport, ProgressEvent};
pub use review::{ManualReviewList, ReviewEntry};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::counter::CounterStore;
use crate::error::{Error, Result};
use crate::model::Document;
use crate::oracle::OracleClient;
use crate::patch::{apply_fields, FieldReport, FieldRule, FieldValues, NumberingPattern, Stamp};
use crate::place::{
    wait_for_exclusive, AnchorHint, Asset, FileAccessGate, PageOutcome, PlacementEngine,
    PlacementOptions, PlacementResult,
};

/// Keywords marking a notification letter.
pub const NOTIFICATION_KEYWORDS: &[&str] = &[
    "通报",
    "网络安全",
    "漏洞",
    "安全事件",
    "安全通告",
    "风险提示",
    "安全预警",
    "威胁情报",
    "安全公告",
];

/// Paragraphs scanned for notification keywords.
pub const NOTIFICATION_SCAN_PARAGRAPHS: usize = 10;

/// Options for a [`Rewriter`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Issue-number pattern; `None` leaves numbers alone
    pub numbering: Option<NumberingPattern>,
    /// Template field values
    pub fields: FieldValues,
    /// Rules locating the template fields
    pub field_rules: Vec<FieldRule>,
    /// Picture to place; `None` skips placement
    pub asset: Option<Asset>,
    /// Paragraph hints for placement
    pub hint: AnchorHint,
    /// Placement search options
    pub placement: PlacementOptions,
    /// Place pictures into notification letters only
    pub notification_only: bool,
    /// Back documents up before rewriting
    pub backups: bool,
    /// Backups kept per document
    pub keep_backups: usize,
    /// Minimum paragraphs of a valid document
    pub min_paragraphs: usize,
    /// Minimum non-blank paragraphs of a valid document
    pub min_content_paragraphs: usize,
}

impl PipelineOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp issue numbers with `pattern`.
    pub fn with_numbering(mut self, pattern: NumberingPattern) -> Self {
        self.numbering = Some(pattern);
        self
    }

    /// Write a template field.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Replace the field rules.
    pub fn with_field_rules(mut self, rules: Vec<FieldRule>) -> Self {
        self.field_rules = rules;
        self
    }

    /// Place `asset` into each document.
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Set placement hints.
    pub fn with_hint(mut self, hint: AnchorHint) -> Self {
        self.hint = hint;
        self
    }

    /// Set placement options.
    pub fn with_placement(mut self, placement: PlacementOptions) -> Self {
        self.placement = placement;
        self
    }

    /// Place into every document, not only notification letters.
    pub fn place_everywhere(mut self) -> Self {
        self.notification_only = false;
        self
    }

    /// Enable or disable backups.
    pub fn with_backups(mut self, enabled: bool) -> Self {
        self.backups = enabled;
        self
    }

    /// Set how many backups are kept per document.
    pub fn keep_backups(mut self, keep: usize) -> Self {
        self.keep_backups = keep;
        self
    }

    /// Set the validation thresholds.
    pub fn with_validation(mut self, min_paragraphs: usize, min_content_paragraphs: usize) -> Self {
        self.min_paragraphs = min_paragraphs;
        self.min_content_paragraphs = min_content_paragraphs;
        self
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            numbering: None,
            fields: FieldValues::new(),
            field_rules: FieldRule::letter_defaults(),
            asset: None,
            hint: AnchorHint::default(),
            placement: PlacementOptions::default(),
            notification_only: true,
            backups: true,
            keep_backups: 3,
            min_paragraphs: 5,
            min_content_paragraphs: 3,
        }
    }
}

/// What happened to one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    /// Document path
    pub path: PathBuf,
    /// Issue number written, if any
    pub stamp: Option<Stamp>,
    /// Counter value consumed by the stamp
    pub issued: Option<u64>,
    /// Template fields written and missing
    pub fields: FieldReport,
    /// Whether the document reads as a notification letter
    pub notification: bool,
    /// Placement outcome, when placement ran
    pub placement: Option<PlacementResult>,
    /// Why placement could not run at all
    pub placement_error: Option<String>,
    /// Backup taken before the rewrite
    pub backup: Option<PathBuf>,
}

impl DocumentReport {
    fn new(path: &Path, backup: Option<PathBuf>) -> Self {
        Self {
            path: path.to_path_buf(),
            stamp: None,
            issued: None,
            fields: FieldReport::default(),
            notification: false,
            placement: None,
            placement_error: None,
            backup,
        }
    }

    /// Pictures inserted into the document.
    pub fn inserted(&self) -> usize {
        self.placement.as_ref().map_or(0, |p| p.inserted_count)
    }
}

/// Rewrites documents one at a time.
#[derive(Debug, Clone)]
pub struct Rewriter {
    client: Arc<OracleClient>,
    store: Arc<CounterStore>,
    options: PipelineOptions,
}

impl Rewriter {
    /// Create a rewriter.
    pub fn new(client: Arc<OracleClient>, store: Arc<CounterStore>, options: PipelineOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    /// Pipeline options.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Counter store in use.
    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Rewrite the document at `path`.
    ///
    /// On error the document is restored from its backup and an entry is
    /// added to `review`.
    pub fn rewrite(&self, path: &Path, review: &mut ManualReviewList) -> Result<DocumentReport> {
        log::info!("Rewriting {}", path.display());

        let backup = if self.options.backups {
            match create_backup(path, &self.store.options().clock) {
                Ok(b) => Some(b),
                Err(e) => {
                    review.add(path, e.kind(), format!("backup failed: {}", e));
                    return Err(e);
                }
            }
        } else {
            None
        };

        match self.rewrite_inner(path, review, DocumentReport::new(path, backup.clone())) {
            Ok(report) => {
                if backup.is_some() {
                    if let Err(e) = cleanup_backups(path, self.options.keep_backups) {
                        log::warn!("Backup cleanup failed for {}: {}", path.display(), e);
                    }
                }
                Ok(report)
            }
            Err(e) => {
                log::error!("Rewrite of {} failed: {}", path.display(), e);
                if let Some(b) = &backup {
                    if let Err(re) = recover_from_backup(path, b) {
                        log::error!("Could not restore {}: {}", path.display(), re);
                    }
                }
                review.add(path, e.kind(), e.to_string());
                Err(e)
            }
        }
    }

    fn rewrite_inner(
        &self,
        path: &Path,
        review: &mut ManualReviewList,
        mut report: DocumentReport,
    ) -> Result<DocumentReport> {
        let mut document = Document::load(path)?;
        validate_document(&document, self.options.min_paragraphs, self.options.min_content_paragraphs)?;

        report.fields = apply_fields(&mut document, &self.options.field_rules, &self.options.fields);

        let mut consumed = None;
        if let Some(pattern) = &self.options.numbering {
            let counters = self.store.load()?;
            let number = counters.get(pattern.sequence());
            match pattern.stamp(&mut document, counters.period_key, number)? {
                Some(stamp) => {
                    consumed = Some((pattern.sequence(), number));
                    report.stamp = Some(stamp);
                }
                None => review.add(path, "not_found", "No issue number in document"),
            }
        }

        wait_for_exclusive(&FileAccessGate, path, &self.options.placement.wait)?;
        document.save(path)?;

        report.notification = is_notification_document(&document);
        if let Some(asset) = &self.options.asset {
            if report.notification || !self.options.notification_only {
                self.place(path, asset, review, &mut report);
            } else {
                log::info!("{} is not a notification letter, no picture placed", path.display());
            }
        }

        let saved = Document::load(path)?;
        validate_document(&saved, self.options.min_paragraphs, self.options.min_content_paragraphs)?;

        if let Some((sequence, expected)) = consumed {
            let issued = self.store.advance(sequence)?;
            if issued != expected {
                log::warn!(
                    "Counter {} moved during rewrite: stamped {}, advanced from {}",
                    sequence,
                    expected,
                    issued
                );
                review.add(
                    path,
                    "counter_moved",
                    format!(
                        "Stamped number {} but counter {} was at {}; the number may be a duplicate",
                        expected, sequence, issued
                    ),
                );
            }
            report.issued = Some(expected);
        }

        Ok(report)
    }

    fn place(&self, path: &Path, asset: &Asset, review: &mut ManualReviewList, report: &mut DocumentReport) {
        let engine = PlacementEngine::new(&self.client).with_options(self.options.placement.clone());
        match engine.place(path, asset, &self.options.hint) {
            Ok(result) => {
                for outcome in result.pages.iter().filter(|o| o.is_skipped()) {
                    review.add(path, outcome_kind(outcome), describe(outcome));
                }
                if !result.verified {
                    review.add(path, "unverified", "Placement was not checked against the layout");
                }
                if result.dirty {
                    review.add(
                        path,
                        "restore_failed",
                        "A rejected picture could not be rolled back and is still in the file",
                    );
                }
                report.placement = Some(result);
            }
            Err(e) => {
                review.add(path, e.kind(), e.to_string());
                report.placement_error = Some(e.to_string());
            }
        }
    }
}

fn outcome_kind(outcome: &PageOutcome) -> String {
    match outcome {
        PageOutcome::NoCandidate { .. } => "no_candidate".to_string(),
        PageOutcome::Exhausted { .. } => "size_exhausted".to_string(),
        PageOutcome::Contention { .. } => "resource_contention".to_string(),
        PageOutcome::Failed { kind, .. } => kind.clone(),
        PageOutcome::Inserted { .. } | PageOutcome::AlreadyPresent { .. } => "ok".to_string(),
    }
}

fn describe(outcome: &PageOutcome) -> String {
    match outcome {
        PageOutcome::NoCandidate { page } => format!("Page {}: no blank paragraph to anchor on", page),
        PageOutcome::Exhausted { page, attempts } => {
            format!("Page {}: no size kept the layout after {} attempts", page, attempts)
        }
        PageOutcome::Contention { page, waited_ms } => {
            format!("Page {}: document busy for {}ms", page, waited_ms)
        }
        PageOutcome::Failed { page, reason, .. } => format!("Page {}: {}", page, reason),
        other => format!("Page {}", other.page()),
    }
}

/// First notification keyword found in the opening paragraphs.
pub fn notification_keyword(document: &Document) -> Option<&'static str> {
    let head: String = document
        .paragraphs
        .iter()
        .take(NOTIFICATION_SCAN_PARAGRAPHS)
        .map(|p| p.text())
        .collect::<Vec<_>>()
        .join("\n");
    NOTIFICATION_KEYWORDS.iter().copied().find(|k| head.contains(k))
}

/// Whether the document reads as a notification letter.
pub fn is_notification_document(document: &Document) -> bool {
    notification_keyword(document).is_some()
}

/// Check that a document has enough structure to be a letter.
pub fn validate_document(document: &Document, min_paragraphs: usize, min_content: usize) -> Result<()> {
    let total = document.paragraph_count();
    if total < min_paragraphs {
        return Err(Error::InvalidDocument(format!(
            "{} paragraphs, at least {} expected",
            total, min_paragraphs
        )));
    }
    let content = document.paragraphs.iter().filter(|p| !p.is_blank()).count();
    if content < min_content {
        return Err(Error::InvalidDocument(format!(
            "{} non-blank paragraphs, at least {} expected",
            content, min_content
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{Clock, CounterOptions, Sequence};
    use crate::model::{ImageResource, Paragraph};
    use crate::oracle::{LayoutHandle, LayoutOracle, PageMeasurement, ScriptStep, ScriptedOracle};
    use crate::place::WaitPolicy;
    use std::sync::atomic::{AtomicBool, Ordering};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn clock() -> Clock {
        Clock::Fixed(
            NaiveDate::from_ymd_opt(2025, 3, 7)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        )
    }

    fn letter(title: &str) -> Document {
        let mut paragraphs: Vec<Paragraph> = (0..10)
            .map(|i| Paragraph::with_text(format!("正文{}", i)))
            .collect();
        paragraphs[0] = Paragraph::with_text(title);
        let mut number = Paragraph::new();
        for run in ["〔20", "24〕第", "7期"] {
            number.add_text(run);
        }
        paragraphs[1] = number;
        paragraphs[6] = Paragraph::new();
        paragraphs[7] = Paragraph::new();
        Document::from_paragraphs(paragraphs)
    }

    struct Fixture {
        dir: TempDir,
        oracle: ScriptedOracle,
        rewriter: Rewriter,
    }

    fn fixture(options: PipelineOptions) -> Fixture {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::new(vec![ScriptStep::Measure(PageMeasurement::new(
            2,
            vec![1, 1, 1, 1, 1, 2, 2, 2, 2, 2],
        ))]);
        let store = CounterStore::with_options(
            dir.path().join("config.json"),
            CounterOptions::new().with_clock(clock()),
        );
        let rewriter = Rewriter::new(
            Arc::new(OracleClient::new(oracle.clone())),
            Arc::new(store),
            options
                .with_numbering(NumberingPattern::notification())
                .with_asset(Asset::new(
                    "confirm",
                    ImageResource::with_dimensions("image/png", 350, 200),
                ))
                .with_placement(PlacementOptions::new().with_wait_policy(WaitPolicy::immediate())),
        );
        Fixture {
            dir,
            oracle,
            rewriter,
        }
    }

    #[test]
    fn test_notification_detection() {
        assert_eq!(notification_keyword(&letter("关于网络安全漏洞的通报")), Some("通报"));
        assert!(!is_notification_document(&letter("会议纪要")));

        let mut late = letter("会议纪要");
        late.paragraphs[9] = Paragraph::with_text("安全预警");
        assert!(is_notification_document(&late));
        late.paragraphs.insert(0, Paragraph::new());
        assert!(!is_notification_document(&late));
    }

    #[test]
    fn test_validation_thresholds() {
        assert!(validate_document(&letter("x"), 5, 3).is_ok());

        let short = Document::from_paragraphs(vec![Paragraph::with_text("a"); 4]);
        assert!(matches!(validate_document(&short, 5, 3), Err(Error::InvalidDocument(_))));

        let blank = Document::from_paragraphs(vec![Paragraph::new(); 8]);
        assert!(matches!(validate_document(&blank, 5, 3), Err(Error::InvalidDocument(_))));
    }

    #[test]
    fn test_rewrite_stamps_places_and_advances() {
        let fx = fixture(PipelineOptions::new());
        let path = fx.dir.path().join("letter.json");
        letter("关于网络安全漏洞的通报").save(&path).unwrap();

        let mut review = ManualReviewList::new();
        let report = fx.rewriter.rewrite(&path, &mut review).unwrap();

        assert_eq!(report.issued, Some(104));
        assert!(report.notification);
        assert_eq!(report.inserted(), 1);
        assert!(review.is_empty(), "{}", review);

        let saved = Document::load(&path).unwrap();
        assert_eq!(saved.paragraphs[1].text(), "〔2025〕第104期");
        assert!(saved.paragraphs[7].has_picture_of("confirm"));
        assert_eq!(fx.rewriter.store().peek(Sequence::A).unwrap(), 105);
        assert!(fx.oracle.opens() >= 2);
        assert_eq!(list_backups(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_non_notification_gets_no_picture() {
        let fx = fixture(PipelineOptions::new());
        let path = fx.dir.path().join("minutes.json");
        letter("会议纪要").save(&path).unwrap();

        let mut review = ManualReviewList::new();
        let report = fx.rewriter.rewrite(&path, &mut review).unwrap();

        assert!(!report.notification);
        assert!(report.placement.is_none());
        assert_eq!(report.issued, Some(104));
        assert_eq!(fx.oracle.opens(), 0);
    }

    #[test]
    fn test_missing_issue_number_keeps_counter() {
        let fx = fixture(PipelineOptions::new());
        let path = fx.dir.path().join("letter.json");
        let mut doc = letter("网络安全通报");
        doc.paragraphs[1] = Paragraph::with_text("无编号");
        doc.save(&path).unwrap();

        let mut review = ManualReviewList::new();
        let report = fx.rewriter.rewrite(&path, &mut review).unwrap();

        assert!(report.stamp.is_none());
        assert!(report.issued.is_none());
        assert_eq!(review.entries()[0].error_kind, "not_found");
        assert_eq!(fx.rewriter.store().peek(Sequence::A).unwrap(), 104);
    }

    /// Takes a number from the shared store the first time the layout
    /// engine opens a document, as another process would.
    struct CompetingWriter {
        inner: ScriptedOracle,
        store: CounterStore,
        fired: AtomicBool,
    }

    impl LayoutOracle for CompetingWriter {
        fn open(&self, path: &Path) -> Result<Box<dyn LayoutHandle>> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.store.advance(Sequence::A)?;
            }
            self.inner.open(path)
        }
    }

    #[test]
    fn test_counter_moved_during_rewrite_is_reviewed() {
        let fx = fixture(PipelineOptions::new());
        let competing = CompetingWriter {
            inner: fx.oracle.clone(),
            store: CounterStore::with_options(
                fx.dir.path().join("config.json"),
                CounterOptions::new().with_clock(clock()),
            ),
            fired: AtomicBool::new(false),
        };
        let rewriter = Rewriter::new(
            Arc::new(OracleClient::new(competing)),
            Arc::new(CounterStore::with_options(
                fx.dir.path().join("config.json"),
                CounterOptions::new().with_clock(clock()),
            )),
            fx.rewriter.options().clone(),
        );
        let path = fx.dir.path().join("letter.json");
        letter("关于网络安全漏洞的通报").save(&path).unwrap();

        let mut review = ManualReviewList::new();
        let report = rewriter.rewrite(&path, &mut review).unwrap();

        assert_eq!(report.issued, Some(104));
        assert_eq!(review.len(), 1);
        assert_eq!(review.entries()[0].error_kind, "counter_moved");
        assert_eq!(rewriter.store().peek(Sequence::A).unwrap(), 106);
    }

    #[test]
    fn test_invalid_document_is_restored_and_reported() {
        let fx = fixture(PipelineOptions::new());
        let path = fx.dir.path().join("stub.json");
        let stub = Document::from_paragraphs(vec![Paragraph::with_text("〔2024〕第7期")]);
        stub.save(&path).unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut review = ManualReviewList::new();
        let err = fx.rewriter.rewrite(&path, &mut review).unwrap_err();

        assert!(matches!(err, Error::InvalidDocument(_)));
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(review.entries()[0].error_kind, "invalid_document");
        assert_eq!(fx.rewriter.store().peek(Sequence::A).unwrap(), 104);
    }

    #[test]
    fn test_corrupt_store_restores_document() {
        let fx = fixture(PipelineOptions::new());
        let path = fx.dir.path().join("letter.json");
        letter("网络安全通报").save(&path).unwrap();
        let before = std::fs::read(&path).unwrap();
        std::fs::write(fx.dir.path().join("config.json"), "{not json").unwrap();

        let mut review = ManualReviewList::new();
        let err = fx.rewriter.rewrite(&path, &mut review).unwrap_err();

        assert!(matches!(err, Error::ConfigCorrupt(_)));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_oracle_unavailable_is_not_fatal() {
        let fx = fixture(PipelineOptions::new());
        let path = fx.dir.path().join("letter.json");
        letter("网络安全通报").save(&path).unwrap();

        let rewriter = Rewriter::new(
            Arc::new(OracleClient::new(ScriptedOracle::new(Vec::new()))),
            Arc::new(CounterStore::with_options(
                fx.dir.path().join("other.json"),
                CounterOptions::new().with_clock(clock()),
            )),
            fx.rewriter.options().clone(),
        );

        let mut review = ManualReviewList::new();
        let report = rewriter.rewrite(&path, &mut review).unwrap();

        assert!(report.placement.is_none());
        assert!(report.placement_error.is_some());
        assert_eq!(report.issued, Some(104));
        assert_eq!(review.entries()[0].error_kind, "oracle_unavailable");
    }
}
