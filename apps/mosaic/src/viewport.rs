//! Visible-row selection and scroll drift correction.
//!
//! Row positions are approximate: a row is placed at `row_index * fixed` and
//! only learns its real height once laid out. Every frame therefore compares
//! the rows it shows against what the previous frame showed and moves
//! `scroll_top` by however much the content under the user moved.

use std::collections::{BTreeMap, HashMap};

use mosaic_layout::Row;
use tracing::trace;

use crate::session::SessionState;

/// Result of one recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportFrame {
    pub visible_rows: Vec<Row>,
    pub scroll_top: f64,
    /// How far `scroll_top` moved to keep content still.
    pub scroll_shift: f64,
    pub location_index: usize,
    pub last_row_bottom: Option<f64>,
    /// Row the frame ran out of before reaching the end of the range.
    pub next_row: Option<usize>,
}

/// Frame-independent inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportParams {
    pub buffer_height: f64,
    pub fixed_big_row_height: f64,
}

/// Rows whose drifted extent overlaps `[start, end)`, ordered by drifted top.
pub fn find_rows_in_range<'a, I>(rows: I, start: f64, end: f64) -> Vec<Row>
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut found: Vec<Row> = rows
        .into_iter()
        .filter(|row| row.bottom() >= start && row.top() < end)
        .cloned()
        .collect();
    found.sort_by(|a, b| a.top().total_cmp(&b.top()));
    found
}

/// Prefer the rows the last frame showed; fall back to the live store when
/// nothing carried over or the carried-over rows moved since.
pub fn current_visible_rows(
    last_visible: &HashMap<usize, Row>,
    rows: &BTreeMap<usize, Row>,
    start: f64,
    end: f64,
) -> Vec<Row> {
    let carried = find_rows_in_range(last_visible.values(), start, end);
    let Some(last) = carried.last() else {
        return find_rows_in_range(rows.values(), start, end);
    };

    let extra_shift = match rows.get(&last.row_index) {
        Some(live) => live.offset - last.offset,
        None => 0.0,
    };
    if extra_shift == 0.0 && rows.contains_key(&last.row_index) {
        return carried;
    }
    trace!(row = last.row_index, extra_shift, "visible rows shifted");
    find_rows_in_range(rows.values(), start + extra_shift, end + extra_shift)
}

/// Range selection can miss partially covered edge rows; add the neighbours.
pub fn append_and_prepend(visible: &mut Vec<Row>, rows: &BTreeMap<usize, Row>) {
    let Some(last) = visible.last() else {
        return;
    };
    if let Some(next) = rows.get(&(last.row_index + 1)) {
        visible.push(next.clone());
    }
    let first = visible[0].row_index;
    if let Some(prev) = first.checked_sub(1).and_then(|i| rows.get(&i)) {
        visible.insert(0, prev.clone());
    }
}

/// While an anchor is pending only the anchored row is shown.
pub fn filter_for_anchor(visible: &mut Vec<Row>, anchor: &mut Option<usize>) {
    let Some(target) = *anchor else {
        return;
    };
    visible.retain(|row| row.row_index == target);
    if !visible.is_empty() {
        *anchor = None;
    }
}

/// Shift needed to keep the last carried-over row where the user saw it.
pub fn scroll_correction(visible: &[Row], last_visible: &HashMap<usize, Row>) -> f64 {
    visible
        .iter()
        .rev()
        .find_map(|row| {
            last_visible
                .get(&row.row_index)
                .map(|known| row.offset - known.offset)
        })
        .unwrap_or(0.0)
}

/// Global index of the first element whose bottom reaches `scroll_top`.
pub fn location_index(visible: &[Row], scroll_top: f64) -> Option<usize> {
    let row = visible.iter().find(|row| row.bottom() >= scroll_top)?;
    let top = row.top();
    row.display_elements
        .iter()
        .position(|e| top + e.display_top_pixel_accumulated + e.display_height >= scroll_top)
        .map(|i| row.start + i)
}

/// Row to fetch when nothing laid out overlaps `[start, end)`.
///
/// Starts at `nominal` and walks past laid-out rows whose drifted extent lies
/// entirely on one side of the range, in a single direction. `None` when the
/// walk runs off the dataset or reverses.
pub fn row_to_fill(
    rows: &BTreeMap<usize, Row>,
    row_length: usize,
    nominal: usize,
    start: f64,
    end: f64,
) -> Option<usize> {
    let last = row_length.checked_sub(1)?;
    let mut index = nominal.min(last);
    let mut forward = None;
    loop {
        let Some(row) = rows.get(&index) else {
            return Some(index);
        };
        let down = if row.bottom() < start {
            true
        } else if row.top() >= end {
            false
        } else {
            return None;
        };
        if forward.is_some_and(|f| f != down) {
            return None;
        }
        forward = Some(down);
        index = if down {
            (index < last).then_some(index + 1)?
        } else {
            index.checked_sub(1)?
        };
    }
}

pub fn max_scroll_top(row_length: usize, fixed_big_row_height: f64, viewport_height: f64) -> f64 {
    (row_length as f64 * fixed_big_row_height - viewport_height).max(0.0)
}

/// Recompute the visible set for the current scroll position and update the
/// session in place.
pub fn update_visible_rows(state: &mut SessionState, params: ViewportParams) -> ViewportFrame {
    let start = state.scroll_top - params.buffer_height;
    let end = state.scroll_top + state.viewport_height + params.buffer_height;

    let mut visible = current_visible_rows(&state.last_visible_rows, &state.rows, start, end);
    let mut scroll_shift = 0.0;

    if !visible.is_empty() {
        append_and_prepend(&mut visible, &state.rows);
        filter_for_anchor(&mut visible, &mut state.anchor);

        let shift = scroll_correction(&visible, &state.last_visible_rows);
        if shift != 0.0 {
            let bound = max_scroll_top(
                state.row_length,
                params.fixed_big_row_height,
                state.viewport_height,
            );
            let corrected = (state.scroll_top + shift).clamp(0.0, bound);
            scroll_shift = corrected - state.scroll_top;
            state.scroll_top = corrected;
        }
    }

    state.last_visible_rows = visible
        .iter()
        .map(|row| (row.row_index, row.clone()))
        .collect();

    if let Some(index) = location_index(&visible, state.scroll_top) {
        state.location_index = index;
    }

    let mut next_row = None;
    let last_row_bottom = visible.last().map(|last| {
        let bottom = last.bottom();
        if bottom <= end && last.item_end() < state.data_length() {
            next_row = Some(last.row_index + 1);
        }
        bottom
    });
    if let Some(bottom) = last_row_bottom {
        state.last_row_bottom = bottom;
    }

    ViewportFrame {
        visible_rows: visible,
        scroll_top: state.scroll_top,
        scroll_shift,
        location_index: state.location_index,
        last_row_bottom,
        next_row,
    }
}
