//! Integration tests for layout-verified picture placement.

use std::path::Path;

use tempfile::TempDir;

use docstamp::model::{Document, Drawing, ImageResource, Paragraph};
use docstamp::oracle::{FlowOracle, OracleClient, PageMeasurement, ScriptStep, ScriptedOracle};
use docstamp::place::{
    AnchorHint, Asset, PageOutcome, PlacementEngine, PlacementOptions, ScriptedGate,
    SeparatorDetector, WaitPolicy,
};

fn text(n: usize) -> Paragraph {
    Paragraph::with_text(format!("第{}段正文", n))
}

fn rule() -> Paragraph {
    Paragraph::with_text("────────────")
}

fn page_break(mut p: Paragraph) -> Paragraph {
    p.style.page_break_before = true;
    p
}

fn asset() -> Asset {
    // 1.75:1, so 3.5in wide is 2in (144pt) tall
    Asset::new("confirm", ImageResource::with_dimensions("image/png", 350, 200))
}

fn options() -> PlacementOptions {
    PlacementOptions::new().with_wait_policy(WaitPolicy::immediate())
}

/// Page 1 is full; page 2 has plenty of room; page 3 starts on a break.
fn roomy_letter() -> Document {
    let mut paragraphs: Vec<Paragraph> = (0..22).map(text).collect();
    paragraphs.extend([
        text(22),
        text(23),
        Paragraph::new(),
        Paragraph::new(),
        Paragraph::new(),
        text(24),
        rule(),
        text(25),
        text(26),
    ]);
    paragraphs.extend([
        page_break(text(27)),
        Paragraph::new(),
        Paragraph::new(),
        text(28),
        rule(),
        text(29),
        text(30),
    ]);
    Document::from_paragraphs(paragraphs)
}

/// Page 2 has two spare lines, so only a small picture fits.
fn tight_letter() -> Document {
    let mut paragraphs: Vec<Paragraph> = (0..22).map(text).collect();
    paragraphs.extend((22..30).map(text));
    paragraphs.extend([Paragraph::new(), Paragraph::new(), Paragraph::new()]);
    paragraphs.extend((30..36).map(text));
    paragraphs.extend([rule(), text(36), text(37)]);
    paragraphs.extend([page_break(text(38)), text(39), text(40)]);
    Document::from_paragraphs(paragraphs)
}

fn layout(path: &Path) -> (PageMeasurement, Vec<(u32, usize)>) {
    let doc = Document::load(path).unwrap();
    let m = FlowOracle::new().paginate(&doc);
    let markers = SeparatorDetector::new().markers(&doc, &m).into_iter().collect();
    (m, markers)
}

fn page_outcome(outcomes: &[PageOutcome], page: u32) -> &PageOutcome {
    outcomes.iter().find(|o| o.page() == page).unwrap()
}

#[test]
fn test_roomy_pages_take_nominal_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letter.json");
    roomy_letter().save(&path).unwrap();
    let (before, markers_before) = layout(&path);
    assert_eq!(before.total_pages, 3);

    let client = OracleClient::new(FlowOracle::new());
    let result = PlacementEngine::new(&client)
        .with_options(options())
        .place(&path, &asset(), &AnchorHint::default())
        .unwrap();

    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.skipped_pages, 0);
    assert!(result.verified);
    assert!(!result.dirty);
    match page_outcome(&result.pages, 2) {
        PageOutcome::Inserted { size, attempts, .. } => {
            assert_eq!(*attempts, 0);
            assert!((size.width - 3.5).abs() < 1e-6);
            assert!((size.height - 2.0).abs() < 1e-6);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let (after, markers_after) = layout(&path);
    assert_eq!(after.total_pages, before.total_pages);
    assert_eq!(markers_after, markers_before);
    assert_eq!(result.measurement, after);
}

#[test]
fn test_tight_page_shrinks_until_layout_holds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letter.json");
    tight_letter().save(&path).unwrap();
    let (before, markers_before) = layout(&path);
    assert_eq!(before.total_pages, 3);

    let client = OracleClient::new(FlowOracle::new());
    let result = PlacementEngine::new(&client)
        .with_options(options())
        .place(&path, &asset(), &AnchorHint::default())
        .unwrap();

    match page_outcome(&result.pages, 2) {
        PageOutcome::Inserted {
            size,
            attempts,
            fallback,
            ..
        } => {
            assert!(*attempts > 0);
            assert!(size.width < 3.5 && size.width >= 1.0);
            assert!(!fallback);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    // Page 3 has no blank paragraph.
    assert!(matches!(
        page_outcome(&result.pages, 3),
        PageOutcome::NoCandidate { page: 3 }
    ));

    let (after, markers_after) = layout(&path);
    assert_eq!(after.total_pages, before.total_pages);
    assert_eq!(markers_after, markers_before);
}

#[test]
fn test_second_run_finds_pictures_present() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letter.json");
    roomy_letter().save(&path).unwrap();

    let client = OracleClient::new(FlowOracle::new());
    let engine = PlacementEngine::new(&client).with_options(options());
    engine.place(&path, &asset(), &AnchorHint::default()).unwrap();
    let once = std::fs::read(&path).unwrap();

    let again = engine.place(&path, &asset(), &AnchorHint::default()).unwrap();
    assert_eq!(again.inserted_count, 0);
    assert_eq!(again.already_present, 2);
    assert_eq!(again.skipped_pages, 0);
    assert_eq!(std::fs::read(&path).unwrap(), once);
}

#[test]
fn test_exhausted_search_makes_one_fallback_and_reverts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letter.json");
    let mut doc = Document::from_paragraphs((0..10).map(text).collect());
    doc.paragraphs[6] = Paragraph::new();
    doc.paragraphs[7] = Paragraph::new();
    doc.add_resource("logo", ImageResource::with_dimensions("image/png", 100, 100));
    doc.paragraphs[1].insert_drawing(Drawing::picture("logo", 2.0, 2.0));
    doc.save(&path).unwrap();
    let original = std::fs::read(&path).unwrap();

    // Every measurement after the baseline reports an extra page.
    let oracle = ScriptedOracle::new(vec![
        ScriptStep::Measure(PageMeasurement::new(2, vec![1, 1, 1, 1, 1, 2, 2, 2, 2, 2])),
        ScriptStep::Measure(PageMeasurement::new(3, vec![1, 1, 1, 1, 1, 2, 2, 2, 2, 3])),
    ]);
    let client = OracleClient::new(oracle.clone());
    let result = PlacementEngine::new(&client)
        .with_options(
            options()
                .with_nominal_width(3.5)
                .with_decrement(0.05)
                .with_floor(1.0),
        )
        .place(&path, &asset(), &AnchorHint::default())
        .unwrap();

    assert_eq!(result.skipped_pages, 1);
    assert_eq!(result.inserted_count, 0);
    assert_eq!(result.fallback_attempts, 1);
    assert!(matches!(
        result.pages[0],
        PageOutcome::Exhausted { page: 2, attempts: 52 }
    ));
    // Baseline, 51 regular sizes and the fallback
    assert_eq!(oracle.opens(), 53);
    assert_eq!(oracle.closes(), 53);
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[test]
fn test_failed_rollback_marks_result_dirty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letter.json");
    let mut doc = Document::from_paragraphs((0..10).map(text).collect());
    doc.paragraphs[6] = Paragraph::new();
    doc.paragraphs[7] = Paragraph::new();
    doc.save(&path).unwrap();

    // The engine dies after the picture is written, and the file is
    // locked by the time the engine tries to put it back.
    let oracle = ScriptedOracle::new(vec![
        ScriptStep::Measure(PageMeasurement::new(2, vec![1, 1, 1, 1, 1, 2, 2, 2, 2, 2])),
        ScriptStep::Unavailable("engine crashed".into()),
    ]);
    let gate = ScriptedGate::free_for(1);
    let client = OracleClient::new(oracle);
    let result = PlacementEngine::new(&client)
        .with_options(options())
        .with_gate(gate.clone())
        .place(&path, &asset(), &AnchorHint::default())
        .unwrap();

    assert!(result.dirty);
    assert_eq!(result.inserted_count, 0);
    assert!(matches!(
        result.pages[0],
        PageOutcome::Contention { page: 2, .. }
    ));
    assert_eq!(gate.probes(), 2);
    assert!(Document::load(&path)
        .unwrap()
        .paragraphs
        .iter()
        .any(|p| p.has_picture_of("confirm")));
}

#[test]
fn test_long_path_places_without_verification() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letter.json");
    roomy_letter().save(&path).unwrap();

    let oracle = ScriptedOracle::new(Vec::new());
    let client = OracleClient::new(oracle.clone()).with_max_path_len(8);
    let result = PlacementEngine::new(&client)
        .with_options(options())
        .place(&path, &asset(), &AnchorHint::default())
        .unwrap();

    assert!(!result.verified);
    assert!(result.inserted_count > 0);
    assert_eq!(oracle.opens(), 0);
    assert!(Document::load(&path)
        .unwrap()
        .paragraphs
        .iter()
        .any(|p| p.has_picture_of("confirm")));
}

#[test]
fn test_unavailable_oracle_leaves_file_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letter.json");
    roomy_letter().save(&path).unwrap();
    let original = std::fs::read(&path).unwrap();

    let client = OracleClient::new(ScriptedOracle::new(vec![ScriptStep::Unavailable(
        "engine missing".into(),
    )]));
    let err = PlacementEngine::new(&client)
        .with_options(options())
        .place(&path, &asset(), &AnchorHint::default())
        .unwrap_err();

    assert_eq!(err.kind(), "oracle_unavailable");
    assert_eq!(std::fs::read(&path).unwrap(), original);
}
