//! Document-level types and snapshot I/O.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Drawing, ImageResource, Paragraph};
use crate::error::{Error, Result};

/// A letter document: paragraphs in body order plus embedded images.
///
/// The document is persisted as a JSON snapshot. Serialization is
/// deterministic (ordered maps, fixed field order), so restoring a clone and
/// saving again reproduces the previous bytes exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Body paragraphs
    pub paragraphs: Vec<Paragraph>,

    /// Embedded images keyed by resource id
    #[serde(default)]
    pub resources: BTreeMap<String, ImageResource>,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from paragraphs.
    pub fn from_paragraphs(paragraphs: Vec<Paragraph>) -> Self {
        Self {
            paragraphs,
            ..Default::default()
        }
    }

    /// Load a document snapshot from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_json(&data)
    }

    /// Parse a document snapshot.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidDocument(e.to_string()))
    }

    /// Serialize the snapshot.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Write the snapshot to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    /// Number of paragraphs.
    pub fn paragraph_count(&self) -> usize {
        self.paragraphs.len()
    }

    /// Get a paragraph by index.
    pub fn paragraph(&self, index: usize) -> Option<&Paragraph> {
        self.paragraphs.get(index)
    }

    /// Get a mutable paragraph by index.
    pub fn paragraph_mut(&mut self, index: usize) -> Option<&mut Paragraph> {
        self.paragraphs.get_mut(index)
    }

    /// Add a paragraph to the end of the body.
    pub fn add_paragraph(&mut self, paragraph: Paragraph) {
        self.paragraphs.push(paragraph);
    }

    /// Add an image resource.
    pub fn add_resource(&mut self, id: impl Into<String>, resource: ImageResource) {
        self.resources.insert(id.into(), resource);
    }

    /// Get a resource by ID.
    pub fn get_resource(&self, id: &str) -> Option<&ImageResource> {
        self.resources.get(id)
    }

    /// Check if the document has any paragraphs.
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    /// Plain text of the whole body, one paragraph per line.
    pub fn plain_text(&self) -> String {
        self.paragraphs
            .iter()
            .map(|p| p.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All picture drawings in the body, mutably.
    pub fn pictures_mut(&mut self) -> impl Iterator<Item = &mut Drawing> {
        self.paragraphs
            .iter_mut()
            .flat_map(|p| p.drawings.iter_mut())
            .filter(|d| d.is_picture())
    }

    /// Count of picture drawings in the body.
    pub fn picture_count(&self) -> usize {
        self.paragraphs
            .iter()
            .flat_map(|p| p.drawings.iter())
            .filter(|d| d.is_picture())
            .count()
    }
}

/// Document metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Document title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Source file the snapshot was produced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Creation date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Last modification date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}
