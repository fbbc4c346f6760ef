//! Justified-row layout math shared by the mosaic engine.
//!
//! A server row arrives "pre-wrap": a contiguous run of items with their natural
//! dimensions. [`layout_row`] turns it into wrapped sub-lines that exactly fill
//! the window width:
//!
//! - [`limit_ratio`] optionally clamps extreme aspect ratios to 2:1
//! - [`break_lines`] picks the sub-line lengths with a badness-minimising DP
//! - [`normalize_sub_rows`] rescales every sub-line to the window width
//!
//! The input row is never mutated; callers can keep it in a cache and re-run the
//! pipeline under a different width without a network round-trip.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod line_breaker;
pub mod normalizer;

pub use line_breaker::break_lines;
pub use normalizer::{normalize_sub_rows, SubRow};

/// Nominal height of every row before wrapping.
pub const DEFAULT_FIXED_BIG_ROW_HEIGHT: f64 = 2400.0;
/// Padding applied on each side of an item.
pub const DEFAULT_PADDING_PIXEL: f64 = 1.0;

fn default_row_height() -> f64 {
    DEFAULT_FIXED_BIG_ROW_HEIGHT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayElement {
    pub display_width: f64,
    pub display_height: f64,
    #[serde(default)]
    pub display_top_pixel_accumulated: f64,
}

impl DisplayElement {
    pub fn new(display_width: f64, display_height: f64) -> Self {
        Self {
            display_width,
            display_height,
            display_top_pixel_accumulated: 0.0,
        }
    }
}

/// A dataset-contiguous band of items sharing one nominal vertical slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub start: usize,
    pub end: usize,
    #[serde(default = "default_row_height")]
    pub row_height: f64,
    pub display_elements: Vec<DisplayElement>,
    #[serde(default)]
    pub top_pixel_accumulated: f64,
    pub row_index: usize,
    #[serde(default)]
    pub offset: f64,
}

impl Row {
    /// Top edge with the per-row drift applied.
    pub fn top(&self) -> f64 {
        self.top_pixel_accumulated + self.offset
    }

    pub fn bottom(&self) -> f64 {
        self.top_pixel_accumulated + self.row_height + self.offset
    }

    /// Index one past the last item carried by this row.
    pub fn item_end(&self) -> usize {
        self.start + self.display_elements.len()
    }

    /// Rejects geometry the layout pipeline cannot work with.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.end < self.start {
            return Err(LayoutError::InvertedRange {
                row: self.row_index,
                start: self.start,
                end: self.end,
            });
        }
        for (position, element) in self.display_elements.iter().enumerate() {
            let ok = |v: f64| v.is_finite() && v > 0.0;
            if !ok(element.display_width) || !ok(element.display_height) {
                return Err(LayoutError::InvalidDimensions {
                    row: self.row_index,
                    position,
                    width: element.display_width,
                    height: element.display_height,
                });
            }
        }
        Ok(())
    }
}

/// A laid-out row together with its drift against the nominal height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowWithOffset {
    pub row: Row,
    pub offset: f64,
    pub window_width: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("row {row}: start {start} is after end {end}")]
    InvertedRange { row: usize, start: usize, end: usize },
    #[error("row {row}: element {position} has invalid size {width}x{height}")]
    InvalidDimensions {
        row: usize,
        position: usize,
        width: f64,
        height: f64,
    },
}

/// Parameters that fully determine a row's geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOptions {
    pub window_width: f64,
    pub sub_row_height_scale: f64,
    pub limit_ratio: bool,
    /// The dataset's final row keeps its last sub-line at nominal height.
    pub is_last_row: bool,
    pub fixed_big_row_height: f64,
    pub padding_pixel: f64,
}

impl LayoutOptions {
    pub fn new(window_width: f64, sub_row_height_scale: f64) -> Self {
        Self {
            window_width,
            sub_row_height_scale,
            limit_ratio: false,
            is_last_row: false,
            fixed_big_row_height: DEFAULT_FIXED_BIG_ROW_HEIGHT,
            padding_pixel: DEFAULT_PADDING_PIXEL,
        }
    }

    pub fn sub_row_height(&self) -> f64 {
        (self.window_width / 2.0).min(self.sub_row_height_scale).round()
    }
}

/// Clamp every element to at most 2:1 in either orientation.
pub fn limit_ratio(elements: &mut [DisplayElement]) {
    for element in elements {
        if element.display_width > element.display_height * 2.0 {
            element.display_width = element.display_height * 2.0;
        } else if element.display_height > element.display_width * 2.0 {
            element.display_height = element.display_width * 2.0;
        }
    }
}

/// Run the full wrap pipeline on a copy of `source`.
pub fn layout_row(source: &Row, options: &LayoutOptions) -> RowWithOffset {
    let mut row = source.clone();

    if options.limit_ratio {
        limit_ratio(&mut row.display_elements);
    }

    row.top_pixel_accumulated = row.row_index as f64 * options.fixed_big_row_height;

    let sub_row_height = options.sub_row_height();
    let widths: Vec<f64> = row
        .display_elements
        .iter()
        .map(|e| (e.display_width * sub_row_height / e.display_height).round())
        .collect();
    let lines = break_lines(&widths, options.window_width, options.padding_pixel);

    let total_height = normalize_sub_rows(
        &mut row.display_elements,
        &lines,
        options.window_width,
        options.is_last_row,
        sub_row_height,
        options.padding_pixel,
    );

    let offset = total_height - options.fixed_big_row_height;
    row.row_height = total_height;
    row.offset = offset;

    RowWithOffset {
        row,
        offset,
        window_width: options.window_width,
    }
}
