//! Document model types.
//!
//! This module defines the in-memory representation the rewriting core works
//! on: a flat list of paragraphs, each an ordered list of formatted runs plus
//! anchored drawings. Parsing and writing the on-disk office format belongs
//! to an outside collaborator; here documents travel as JSON snapshots.

mod document;
mod drawing;
mod paragraph;
mod resource;

pub use document::{Document, Metadata};
pub use drawing::{Anchor, Drawing, DrawingKind, POINTS_PER_INCH};
pub use paragraph::{Border, Paragraph, ParagraphStyle, ReplacementSpan, Run, RunFormat};
pub use resource::{detect_mime_type, ImageResource};
