//! Candidate paragraph selection.

use std::cmp::Reverse;

use super::separator::SeparatorDetector;
use crate::model::Document;
use crate::oracle::PageMeasurement;

/// Trailing paragraphs of a page that are never candidates.
pub const TRAILING_EXCLUDED: usize = 2;

/// Blank paragraphs on `page` that may receive the picture, in body order.
///
/// Excludes separator paragraphs (every signal, the page's marker included)
/// and the last [`TRAILING_EXCLUDED`] paragraphs of the page.
pub fn candidates_on_page(
    document: &Document,
    measurement: &PageMeasurement,
    page: u32,
    detector: &SeparatorDetector,
) -> Vec<usize> {
    let on_page: Vec<usize> = measurement
        .paragraphs_on(page)
        .into_iter()
        .filter(|&i| i < document.paragraph_count())
        .collect();
    let keep = on_page.len().saturating_sub(TRAILING_EXCLUDED);

    on_page[..keep]
        .iter()
        .copied()
        .filter(|&i| {
            let p = &document.paragraphs[i];
            p.is_blank() && p.drawings.is_empty() && !detector.is_separator(p)
        })
        .collect()
}

/// Pick the paragraph for `page`.
///
/// A `preferred` index wins when it is a valid candidate. Otherwise the
/// candidate closest to the midpoint of the page's paragraph range is
/// chosen, ties going to the later paragraph.
pub fn select_candidate(
    document: &Document,
    measurement: &PageMeasurement,
    page: u32,
    detector: &SeparatorDetector,
    preferred: Option<usize>,
) -> Option<usize> {
    let candidates = candidates_on_page(document, measurement, page, detector);

    if let Some(index) = preferred {
        if candidates.contains(&index) {
            return Some(index);
        }
        log::debug!("Preferred paragraph {} is not a candidate on page {}", index, page);
    }

    let on_page = measurement.paragraphs_on(page);
    let (first, last) = (*on_page.first()?, *on_page.last()?);
    // Doubled to stay in integers: |2i - (first + last)|
    let span = first + last;

    candidates
        .into_iter()
        .min_by_key(|&i| ((2 * i).abs_diff(span), Reverse(i)))
}
