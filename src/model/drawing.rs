//! Drawing objects anchored to paragraphs.

use serde::{Deserialize, Serialize};

/// Points per inch.
pub const POINTS_PER_INCH: f32 = 72.0;

/// A drawing object (picture or vector shape) anchored to a paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    /// What the drawing shows
    pub kind: DrawingKind,

    /// How the drawing participates in text flow
    #[serde(default)]
    pub anchor: Anchor,

    /// Width in inches
    pub width: f32,

    /// Height in inches
    pub height: f32,
}

impl Drawing {
    /// Create an inline picture drawing.
    pub fn picture(resource_id: impl Into<String>, width: f32, height: f32) -> Self {
        Self {
            kind: DrawingKind::Picture {
                resource_id: resource_id.into(),
            },
            anchor: Anchor::Inline,
            width,
            height,
        }
    }

    /// Create an inline vector shape drawing.
    pub fn shape(preset: impl Into<String>, width: f32, height: f32) -> Self {
        Self {
            kind: DrawingKind::Shape {
                preset: preset.into(),
            },
            anchor: Anchor::Inline,
            width,
            height,
        }
    }

    /// Make the drawing float over the text.
    pub fn floating(mut self) -> Self {
        self.anchor = Anchor::Floating;
        self
    }

    /// Check if this drawing is a picture.
    pub fn is_picture(&self) -> bool {
        matches!(self.kind, DrawingKind::Picture { .. })
    }

    /// Check if this drawing is a vector shape without picture content.
    pub fn is_vector_shape(&self) -> bool {
        matches!(self.kind, DrawingKind::Shape { .. })
    }

    /// Check if this drawing floats over the text.
    pub fn is_floating(&self) -> bool {
        self.anchor == Anchor::Floating
    }

    /// Resource id for pictures.
    pub fn resource_id(&self) -> Option<&str> {
        match &self.kind {
            DrawingKind::Picture { resource_id } => Some(resource_id),
            DrawingKind::Shape { .. } => None,
        }
    }

    /// Height this drawing adds to the text flow, in points.
    pub fn flow_height_pt(&self) -> f32 {
        match self.anchor {
            Anchor::Inline => self.height * POINTS_PER_INCH,
            Anchor::Floating => 0.0,
        }
    }

    /// Scale both dimensions, keeping the aspect ratio.
    pub fn scale(&mut self, factor: f32) {
        self.width *= factor;
        self.height *= factor;
    }
}

/// Drawing content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawingKind {
    /// A raster picture backed by a document resource
    Picture {
        /// Resource ID
        resource_id: String,
    },
    /// A vector shape (line, rectangle, ...)
    Shape {
        /// Shape preset name (e.g. "line")
        preset: String,
    },
}

/// How a drawing is positioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// Occupies space in the line it sits on
    #[default]
    Inline,
    /// Positioned relative to the paragraph, outside the text flow
    Floating,
}
