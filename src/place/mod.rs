//! Layout-aware picture placement.
//!
//! For every page from the second on, the engine picks a blank paragraph,
//! anchors the picture there, persists the document and asks the layout
//! oracle how it paginates. An attempt is kept only when the total page
//! count and the page of every separator marker are unchanged from the
//! initial measurement; otherwise the document is restored byte for byte
//! and the picture is retried smaller. When the floor is reached, one
//! fallback attempt first shrinks the other pictures of the document.
//!
//! Failures on one page (contention, exhausted search, oracle hiccups) are
//! recorded in the [`PlacementResult`] and do not abort the remaining
//! pages. The exception is a failed rollback: the file then holds a
//! rejected picture, the result is marked `dirty` and placement stops.
//!
//! # Example
//!
//! ```no_run
//! use docstamp::oracle::{FlowOracle, OracleClient};
//! use docstamp::place::{AnchorHint, Asset, PlacementEngine};
//!
//! fn main() -> docstamp::Result<()> {
//!     let client = OracleClient::new(FlowOracle::new());
//!     let asset = Asset::from_file("confirm.png")?;
//!     let result = PlacementEngine::new(&client).place(
//!         "letter.json".as_ref(),
//!         &asset,
//!         &AnchorHint::default(),
//!     )?;
//!     println!("{} pictures inserted", result.inserted_count);
//!     Ok(())
//! }
//! ```

mod access;
mod candidate;
mod search;
mod separator;

pub use access::{wait_for_exclusive, AccessGate, FileAccessGate, ScriptedGate, WaitPolicy};
pub use candidate::{candidates_on_page, select_candidate, TRAILING_EXCLUDED};
pub use search::{AssetSize, SearchStep, SizeSearch};
pub use separator::{SeparatorDetector, SeparatorSignals};

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Document, Drawing, ImageResource};
use crate::oracle::{OracleClient, PageMeasurement, ESTIMATED_PARAGRAPHS_PER_PAGE};

/// Options for the placement search.
#[derive(Debug, Clone)]
pub struct PlacementOptions {
    /// Starting picture width in inches
    pub nominal_width: f32,
    /// Width removed after each rejected attempt, in inches
    pub decrement: f32,
    /// Smallest width tried, in inches
    pub floor: f32,
    /// Fraction the fallback shrinks other pictures by
    pub fallback_shrink: f32,
    /// First page that receives a picture (1-indexed)
    pub first_page: u32,
    /// Backoff used while waiting for write access
    pub wait: WaitPolicy,
    /// Paragraphs per page assumed when the document cannot be measured
    pub estimate_per_page: usize,
}

impl PlacementOptions {
    /// Create placement options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the nominal width.
    pub fn with_nominal_width(mut self, width: f32) -> Self {
        self.nominal_width = width;
        self
    }

    /// Set the shrink decrement.
    pub fn with_decrement(mut self, decrement: f32) -> Self {
        self.decrement = decrement;
        self
    }

    /// Set the width floor.
    pub fn with_floor(mut self, floor: f32) -> Self {
        self.floor = floor;
        self
    }

    /// Set the fallback shrink fraction (0.1 shrinks by 10 %).
    pub fn with_fallback_shrink(mut self, fraction: f32) -> Self {
        self.fallback_shrink = fraction;
        self
    }

    /// Set the first page.
    pub fn with_first_page(mut self, page: u32) -> Self {
        self.first_page = page;
        self
    }

    /// Set the write-access wait policy.
    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            nominal_width: 3.5,
            decrement: 0.05,
            floor: 1.0,
            fallback_shrink: 0.10,
            first_page: 2,
            wait: WaitPolicy::default(),
            estimate_per_page: ESTIMATED_PARAGRAPHS_PER_PAGE,
        }
    }
}

/// Caller hints for paragraph choice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorHint {
    /// Overrides [`PlacementOptions::first_page`]
    pub first_page: Option<u32>,
    /// Preferred paragraph per page, used when it is a valid candidate
    pub preferred: BTreeMap<u32, usize>,
}

impl AnchorHint {
    /// Start placement at `page`.
    pub fn starting_at(page: u32) -> Self {
        Self {
            first_page: Some(page),
            ..Default::default()
        }
    }

    /// Prefer paragraph `index` on `page`.
    pub fn prefer(mut self, page: u32, index: usize) -> Self {
        self.preferred.insert(page, index);
        self
    }
}

/// The picture to place.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    /// Resource id the picture is stored under
    pub id: String,
    /// Image data and pixel size
    pub resource: ImageResource,
}

impl Asset {
    /// Create an asset.
    pub fn new(id: impl Into<String>, resource: ImageResource) -> Self {
        Self {
            id: id.into(),
            resource,
        }
    }

    /// Load an image file; the id is derived from file name and size, so
    /// the same file is recognised across runs.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let resource = ImageResource::from_file(path)?;
        Ok(Self::new(resource.signature(), resource))
    }

    /// Picture size at `width` inches.
    pub fn size_at(&self, width: f32) -> AssetSize {
        AssetSize::from_width(width, self.resource.aspect_ratio())
    }
}

/// What happened on one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    /// The picture was anchored
    Inserted {
        /// Page (1-indexed)
        page: u32,
        /// Paragraph receiving the picture
        paragraph: usize,
        /// Accepted size
        size: AssetSize,
        /// Rejected attempts before acceptance
        attempts: u32,
        /// Whether the fallback attempt was the accepted one
        fallback: bool,
    },
    /// The page already holds this picture
    AlreadyPresent {
        /// Page (1-indexed)
        page: u32,
    },
    /// No blank paragraph qualifies
    NoCandidate {
        /// Page (1-indexed)
        page: u32,
    },
    /// Every size, fallback included, changed the layout
    Exhausted {
        /// Page (1-indexed)
        page: u32,
        /// Attempts made
        attempts: u32,
    },
    /// The document stayed locked
    Contention {
        /// Page (1-indexed)
        page: u32,
        /// Time spent waiting
        waited_ms: u64,
    },
    /// Any other failure
    Failed {
        /// Page (1-indexed)
        page: u32,
        /// Error label, see [`Error::kind`]
        kind: String,
        /// Error message
        reason: String,
    },
}

impl PageOutcome {
    /// Page this outcome belongs to.
    pub fn page(&self) -> u32 {
        match self {
            PageOutcome::Inserted { page, .. }
            | PageOutcome::AlreadyPresent { page }
            | PageOutcome::NoCandidate { page }
            | PageOutcome::Exhausted { page, .. }
            | PageOutcome::Contention { page, .. }
            | PageOutcome::Failed { page, .. } => *page,
        }
    }

    /// Whether the page counts as skipped.
    pub fn is_skipped(&self) -> bool {
        !matches!(
            self,
            PageOutcome::Inserted { .. } | PageOutcome::AlreadyPresent { .. }
        )
    }

    fn from_error(page: u32, error: &Error) -> Self {
        match error {
            Error::ResourceContention { waited_ms, .. } => PageOutcome::Contention {
                page,
                waited_ms: *waited_ms,
            },
            other => PageOutcome::Failed {
                page,
                kind: other.kind().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result of placing a picture into one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementResult {
    /// Pictures inserted
    pub inserted_count: usize,
    /// Size of the last accepted insertion
    pub final_size: Option<AssetSize>,
    /// Pages that received no picture for a reason other than duplication
    pub skipped_pages: usize,
    /// Pages that already held the picture
    pub already_present: usize,
    /// Fallback attempts made, accepted or not
    pub fallback_attempts: usize,
    /// Whether every insertion was checked against the layout oracle
    pub verified: bool,
    /// Per-page outcomes in page order
    pub pages: Vec<PageOutcome>,
    /// Pagination after the last accepted change
    pub measurement: PageMeasurement,
    /// A rejected attempt could not be rolled back; the file on disk
    /// holds an unaccepted picture
    pub dirty: bool,
}

impl PlacementResult {
    fn new(measurement: PageMeasurement, verified: bool) -> Self {
        Self {
            inserted_count: 0,
            final_size: None,
            skipped_pages: 0,
            already_present: 0,
            fallback_attempts: 0,
            verified,
            pages: Vec::new(),
            measurement,
            dirty: false,
        }
    }

    fn record(&mut self, outcome: PageOutcome) {
        match &outcome {
            PageOutcome::Inserted { size, .. } => {
                self.inserted_count += 1;
                self.final_size = Some(*size);
            }
            PageOutcome::AlreadyPresent { .. } => self.already_present += 1,
            _ => self.skipped_pages += 1,
        }
        self.pages.push(outcome);
    }
}

/// The placement search over one persisted document.
pub struct PlacementEngine<'a> {
    client: &'a OracleClient,
    options: PlacementOptions,
    detector: SeparatorDetector,
    gate: Box<dyn AccessGate + 'a>,
}

impl<'a> PlacementEngine<'a> {
    /// Create an engine measuring through `client`.
    pub fn new(client: &'a OracleClient) -> Self {
        Self {
            client,
            options: PlacementOptions::default(),
            detector: SeparatorDetector::new(),
            gate: Box::new(FileAccessGate),
        }
    }

    /// Set placement options.
    pub fn with_options(mut self, options: PlacementOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the write-access probe.
    pub fn with_gate<G: AccessGate + 'a>(mut self, gate: G) -> Self {
        self.gate = Box::new(gate);
        self
    }

    /// Placement options.
    pub fn options(&self) -> &PlacementOptions {
        &self.options
    }

    /// Place `asset` into the document persisted at `path`.
    ///
    /// Returns an error only when the document cannot be read or the
    /// initial measurement fails; the file is untouched in both cases.
    pub fn place(&self, path: &Path, asset: &Asset, hint: &AnchorHint) -> Result<PlacementResult> {
        let original = std::fs::read(path)?;
        let document = Document::from_json(&original)?;

        match self.client.check_path(path) {
            Ok(_) => {}
            Err(Error::PathTooLong { len, limit, .. }) => {
                log::warn!(
                    "Path is {} characters (limit {}), placing without verification: {}",
                    len,
                    limit,
                    path.display()
                );
                return self.place_unverified(path, document, asset, hint);
            }
            Err(e) => return Err(e),
        }

        let baseline = self.client.measure(path)?;
        let markers: Vec<(usize, u32)> = self
            .detector
            .markers(&document, &baseline)
            .into_iter()
            .map(|(page, index)| (index, page))
            .collect();

        let mut state = PlacementState {
            document,
            persisted: original,
            current: baseline.clone(),
            dirty: false,
        };
        let mut result = PlacementResult::new(baseline.clone(), true);

        for page in self.first_page(hint)..=baseline.total_pages {
            let outcome = self.place_on_page(path, asset, hint, page, &baseline, &markers, &mut state, &mut result);
            match &outcome {
                PageOutcome::Inserted { .. } | PageOutcome::AlreadyPresent { .. } => {}
                skipped => log::warn!("Page {} skipped: {:?}", page, skipped),
            }
            result.record(outcome);
            if state.dirty {
                log::error!(
                    "{} still holds a rejected picture from page {}, stopping",
                    path.display(),
                    page
                );
                break;
            }
        }

        result.measurement = state.current;
        result.dirty = state.dirty;
        log::info!(
            "Placed {} picture(s) in {} ({} skipped, {} already present)",
            result.inserted_count,
            path.display(),
            result.skipped_pages,
            result.already_present
        );
        Ok(result)
    }

    fn first_page(&self, hint: &AnchorHint) -> u32 {
        hint.first_page.unwrap_or(self.options.first_page).max(1)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_on_page(
        &self,
        path: &Path,
        asset: &Asset,
        hint: &AnchorHint,
        page: u32,
        baseline: &PageMeasurement,
        markers: &[(usize, u32)],
        state: &mut PlacementState,
        result: &mut PlacementResult,
    ) -> PageOutcome {
        if state
            .current
            .paragraphs_on(page)
            .into_iter()
            .filter_map(|i| state.document.paragraph(i))
            .any(|p| p.has_picture_of(&asset.id))
        {
            log::debug!("Page {} already holds {}", page, asset.id);
            return PageOutcome::AlreadyPresent { page };
        }

        let Some(paragraph) = select_candidate(
            &state.document,
            &state.current,
            page,
            &self.detector,
            hint.preferred.get(&page).copied(),
        ) else {
            return PageOutcome::NoCandidate { page };
        };

        let mut search = SizeSearch::new(self.options.nominal_width, self.options.decrement, self.options.floor);
        loop {
            let (width, fallback) = match search.next() {
                SearchStep::Try(width) => (width, false),
                SearchStep::Fallback(width) => (width, true),
                SearchStep::Exhausted => {
                    let error = Error::SizeExhausted {
                        page,
                        floor: self.options.floor,
                    };
                    log::warn!("{}", error);
                    return PageOutcome::Exhausted {
                        page,
                        attempts: search.attempts + 1,
                    };
                }
            };
            if fallback {
                result.fallback_attempts += 1;
            }

            let size = asset.size_at(width);
            let snapshot = state.document.clone();
            if fallback {
                shrink_other_pictures(&mut state.document, &asset.id, 1.0 - self.options.fallback_shrink);
            }
            insert_picture(&mut state.document, asset, paragraph, size);

            let bytes = match self.write(path, &state.document) {
                Ok(bytes) => bytes,
                Err(e) => {
                    if let Err(restore) = self.revert(path, state, snapshot) {
                        return PageOutcome::from_error(page, &restore);
                    }
                    return PageOutcome::from_error(page, &e);
                }
            };

            match self.client.measure(path) {
                Ok(m) if layout_preserved(baseline, &m, markers) => {
                    log::info!(
                        "Page {}: picture at {:.2}in in paragraph {} after {} rejection(s){}",
                        page,
                        width,
                        paragraph,
                        search.attempts,
                        if fallback { " (fallback)" } else { "" }
                    );
                    state.persisted = bytes;
                    state.current = m;
                    return PageOutcome::Inserted {
                        page,
                        paragraph,
                        size,
                        attempts: search.attempts,
                        fallback,
                    };
                }
                Ok(m) => {
                    log::debug!(
                        "Page {}: {:.2}in rejected ({} pages, baseline {})",
                        page,
                        width,
                        m.total_pages,
                        baseline.total_pages
                    );
                    if let Err(e) = self.revert(path, state, snapshot) {
                        return PageOutcome::from_error(page, &e);
                    }
                    search.reject();
                }
                Err(e) => {
                    if let Err(restore) = self.revert(path, state, snapshot) {
                        log::warn!("Page {}: measurement failed: {}", page, e);
                        return PageOutcome::from_error(page, &restore);
                    }
                    return PageOutcome::from_error(page, &e);
                }
            }
        }
    }

    /// Insert at nominal size on estimated pages, without measuring.
    fn place_unverified(
        &self,
        path: &Path,
        mut document: Document,
        asset: &Asset,
        hint: &AnchorHint,
    ) -> Result<PlacementResult> {
        let estimate = PageMeasurement::estimate(document.paragraph_count(), self.options.estimate_per_page);
        let mut result = PlacementResult::new(estimate.clone(), false);
        let size = asset.size_at(self.options.nominal_width);

        for page in self.first_page(hint)..=estimate.total_pages {
            let on_page = estimate.paragraphs_on(page);
            let outcome = if on_page.iter().any(|&i| document.paragraphs[i].has_picture_of(&asset.id)) {
                PageOutcome::AlreadyPresent { page }
            } else {
                match select_candidate(
                    &document,
                    &estimate,
                    page,
                    &self.detector,
                    hint.preferred.get(&page).copied(),
                ) {
                    Some(paragraph) => {
                        insert_picture(&mut document, asset, paragraph, size);
                        PageOutcome::Inserted {
                            page,
                            paragraph,
                            size,
                            attempts: 0,
                            fallback: false,
                        }
                    }
                    None => PageOutcome::NoCandidate { page },
                }
            };
            result.record(outcome);
        }

        if result.inserted_count > 0 {
            self.write(path, &document)?;
        }
        log::warn!(
            "Placed {} unverified picture(s) in {}",
            result.inserted_count,
            path.display()
        );
        Ok(result)
    }

    /// Wait for write access, then persist. Returns the bytes written.
    fn write(&self, path: &Path, document: &Document) -> Result<Vec<u8>> {
        let bytes = document.to_json()?;
        self.write_bytes(path, &bytes)?;
        Ok(bytes)
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        wait_for_exclusive(self.gate.as_ref(), path, &self.options.wait)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Drop a rejected attempt: reset the document to `snapshot` and put
    /// the last accepted bytes back. A failure leaves `state` dirty.
    fn revert(&self, path: &Path, state: &mut PlacementState, snapshot: Document) -> Result<()> {
        state.document = snapshot;
        let restored = self.restore(path, state);
        if restored.is_err() {
            state.dirty = true;
        }
        restored
    }

    /// Put the last accepted bytes back on disk.
    fn restore(&self, path: &Path, state: &PlacementState) -> Result<()> {
        let restored = self.write_bytes(path, &state.persisted);
        if let Err(e) = &restored {
            log::warn!("Could not restore {}: {}", path.display(), e);
        }
        restored
    }
}

/// Mutable state carried from page to page.
struct PlacementState {
    /// In-memory document matching `persisted`
    document: Document,
    /// Bytes of the last accepted state, as on disk
    persisted: Vec<u8>,
    /// Pagination of the last accepted state
    current: PageMeasurement,
    /// The file no longer matches `persisted`
    dirty: bool,
}

/// Whether `measured` keeps the page count and every marker's page.
fn layout_preserved(baseline: &PageMeasurement, measured: &PageMeasurement, markers: &[(usize, u32)]) -> bool {
    measured.total_pages == baseline.total_pages
        && markers
            .iter()
            .all(|&(index, page)| measured.page_of(index) == Some(page))
}

fn insert_picture(document: &mut Document, asset: &Asset, paragraph: usize, size: AssetSize) {
    document
        .resources
        .entry(asset.id.clone())
        .or_insert_with(|| asset.resource.clone());
    if let Some(p) = document.paragraph_mut(paragraph) {
        p.insert_drawing(Drawing::picture(asset.id.clone(), size.width, size.height));
    }
}

fn shrink_other_pictures(document: &mut Document, keep_id: &str, factor: f32) {
    let mut shrunk = 0;
    for picture in document.pictures_mut() {
        if picture.resource_id() != Some(keep_id) {
            picture.scale(factor);
            shrunk += 1;
        }
    }
    log::debug!("Fallback shrank {} other picture(s) by {:.0}%", shrunk, (1.0 - factor) * 100.0);
}
