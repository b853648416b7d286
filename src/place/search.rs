//! Shrinking size search.
//!
//! The search walks down from the nominal width in fixed decrements until
//! the floor, then allows one fallback attempt at the last width. Widths are
//! computed from the attempt count rather than by repeated subtraction, so
//! the floor is hit exactly.

use serde::{Deserialize, Serialize};

const EPSILON: f32 = 1e-4;

/// Picture size in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetSize {
    /// Width in inches
    pub width: f32,
    /// Height in inches
    pub height: f32,
}

impl AssetSize {
    /// Size for `width` at the given width/height aspect ratio.
    pub fn from_width(width: f32, aspect_ratio: f32) -> Self {
        let aspect = if aspect_ratio > 0.0 { aspect_ratio } else { 1.0 };
        Self {
            width,
            height: width / aspect,
        }
    }
}

/// What the search wants tried next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchStep {
    /// Insert at this width
    Try(f32),
    /// Shrink the other pictures, then insert at this width
    Fallback(f32),
    /// Nothing left to try
    Exhausted,
}

/// State of one page's size search.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeSearch {
    /// Width the next attempt uses
    pub candidate_size: f32,
    /// Rejected regular attempts so far
    pub attempts: u32,
    /// Whether the fallback attempt has been handed out
    pub fallback_used: bool,
    exhausted: bool,
    nominal: f32,
    decrement: f32,
    floor: f32,
}

impl SizeSearch {
    /// Start a search at `nominal`.
    pub fn new(nominal: f32, decrement: f32, floor: f32) -> Self {
        Self {
            candidate_size: nominal,
            attempts: 0,
            fallback_used: false,
            exhausted: false,
            nominal,
            decrement,
            floor,
        }
    }

    /// The next step, without changing state.
    pub fn next(&self) -> SearchStep {
        if self.exhausted {
            SearchStep::Exhausted
        } else if self.fallback_used {
            SearchStep::Fallback(self.candidate_size)
        } else {
            SearchStep::Try(self.candidate_size)
        }
    }

    /// Record that the current step was rejected.
    pub fn reject(&mut self) {
        if self.exhausted {
            return;
        }
        if self.fallback_used {
            self.exhausted = true;
            return;
        }

        let next = self.nominal - (self.attempts + 1) as f32 * self.decrement;
        if self.decrement > 0.0 && next >= self.floor - EPSILON {
            self.attempts += 1;
            self.candidate_size = next.max(self.floor);
        } else {
            self.attempts += 1;
            self.fallback_used = true;
        }
    }

    /// Whether the search has nothing left to try.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
