//! Request bookkeeping: at most one outstanding request per row, batch or
//! thumbnail, and a bounded memory of which batches are still wanted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;

use tracing::debug;

/// Why a row request was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSkip {
    EmptyDataset,
    InFlight,
    AlreadyLaidOut,
    AnchorConflict { anchor: usize },
}

#[derive(Debug)]
pub struct PrefetchScheduler {
    rows_in_flight: HashSet<usize>,
    batches_in_flight: HashSet<usize>,
    batches_fetched: HashSet<usize>,
    batch_window: VecDeque<usize>,
    batch_window_capacity: usize,
    singles_in_flight: HashSet<usize>,
    images_in_flight: HashMap<usize, usize>,
    worker_count: usize,
}

impl PrefetchScheduler {
    pub fn new(batch_window_capacity: usize, worker_count: usize) -> Self {
        Self {
            rows_in_flight: HashSet::new(),
            batches_in_flight: HashSet::new(),
            batches_fetched: HashSet::new(),
            batch_window: VecDeque::with_capacity(batch_window_capacity),
            batch_window_capacity: batch_window_capacity.max(1),
            singles_in_flight: HashSet::new(),
            images_in_flight: HashMap::new(),
            worker_count: worker_count.max(1),
        }
    }

    /// Decide whether row `index` should be fetched. On success the clamped
    /// index is returned and marked in flight.
    pub fn admit_row(
        &mut self,
        index: usize,
        row_length: usize,
        anchor: Option<usize>,
        laid_out: impl Fn(usize) -> bool,
    ) -> Result<usize, RowSkip> {
        if row_length == 0 {
            return Err(RowSkip::EmptyDataset);
        }
        let index = index.min(row_length - 1);
        if self.rows_in_flight.contains(&index) {
            return Err(RowSkip::InFlight);
        }
        if laid_out(index) {
            return Err(RowSkip::AlreadyLaidOut);
        }
        if let Some(anchor) = anchor {
            if anchor != index {
                return Err(RowSkip::AnchorConflict { anchor });
            }
        }
        self.rows_in_flight.insert(index);
        Ok(index)
    }

    /// Returns false when the row was not (or no longer) in flight.
    pub fn finish_row(&mut self, index: usize) -> bool {
        self.rows_in_flight.remove(&index)
    }

    pub fn row_in_flight(&self, index: usize) -> bool {
        self.rows_in_flight.contains(&index)
    }

    /// Admit a batch, pushing it into the recency window and evicting the
    /// oldest wanted batch when the window is full.
    pub fn admit_batch(&mut self, batch: usize) -> bool {
        if self.batches_fetched.contains(&batch) || self.batches_in_flight.contains(&batch) {
            return false;
        }
        if self.batch_window.len() >= self.batch_window_capacity {
            if let Some(evicted) = self.batch_window.pop_front() {
                debug!(batch = evicted, "batch evicted from window");
            }
        }
        self.batch_window.push_back(batch);
        self.batches_in_flight.insert(batch);
        true
    }

    /// Settle a batch response. Returns whether its payload should be applied;
    /// batches evicted from the window while in flight are dropped and may be
    /// requested again later.
    pub fn finish_batch(&mut self, batch: usize) -> bool {
        self.batches_in_flight.remove(&batch);
        let wanted = self.batch_window.contains(&batch);
        if wanted {
            self.batches_fetched.insert(batch);
        }
        wanted
    }

    /// A failed batch leaves the window so the next frame retries it.
    pub fn fail_batch(&mut self, batch: usize) {
        self.batches_in_flight.remove(&batch);
        self.batch_window.retain(|b| *b != batch);
    }

    pub fn batch_window_capacity(&self) -> usize {
        self.batch_window_capacity
    }

    pub fn batch_fetched(&self, batch: usize) -> bool {
        self.batches_fetched.contains(&batch)
    }

    pub fn admit_single(&mut self, index: usize) -> bool {
        self.singles_in_flight.insert(index)
    }

    pub fn finish_single(&mut self, index: usize) {
        self.singles_in_flight.remove(&index);
    }

    pub fn worker_for(&self, index: usize) -> usize {
        index % self.worker_count
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns the worker the thumbnail job should go to, or `None` when one
    /// is already outstanding for `index`.
    pub fn admit_image(&mut self, index: usize) -> Option<usize> {
        if self.images_in_flight.contains_key(&index) {
            return None;
        }
        let worker = self.worker_for(index);
        self.images_in_flight.insert(index, worker);
        Some(worker)
    }

    pub fn finish_image(&mut self, index: usize) -> bool {
        self.images_in_flight.remove(&index).is_some()
    }

    pub fn image_in_flight(&self, index: usize) -> bool {
        self.images_in_flight.contains_key(&index)
    }

    /// Remove and return every in-flight thumbnail outside `[start, end)` with
    /// the worker that owns it, so the caller can send aborts.
    pub fn take_images_outside(&mut self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut leaving: Vec<(usize, usize)> = self
            .images_in_flight
            .iter()
            .filter(|(index, _)| **index < start || **index >= end)
            .map(|(index, worker)| (*index, *worker))
            .collect();
        leaving.sort_unstable();
        for (index, _) in &leaving {
            self.images_in_flight.remove(index);
        }
        leaving
    }

    /// Every in-flight thumbnail, cleared. Used on generation change.
    pub fn take_all_images(&mut self) -> Vec<(usize, usize)> {
        let mut all: Vec<(usize, usize)> = self.images_in_flight.drain().collect();
        all.sort_unstable();
        all
    }

    /// Forget every queue at once.
    pub fn reset(&mut self) {
        self.rows_in_flight.clear();
        self.batches_in_flight.clear();
        self.batches_fetched.clear();
        self.batch_window.clear();
        self.singles_in_flight.clear();
        self.images_in_flight.clear();
    }
}

/// Batches covering `[first_start, last_end)` with one batch of slack on
/// either side, clamped to the dataset.
///
/// The span never holds more than `max_batches`, so admitting it cannot evict
/// its own members from the batch window. When it would, the slack goes first
/// and then the batches past the top of the frame.
pub fn batches_for_rows(
    first_start: usize,
    last_end: usize,
    batch_size: usize,
    data_length: usize,
    max_batches: usize,
) -> Option<RangeInclusive<usize>> {
    if data_length == 0 || batch_size == 0 || max_batches == 0 {
        return None;
    }
    let last_batch = (data_length - 1) / batch_size;
    let first = first_start / batch_size;
    let from = first.saturating_sub(1);
    let to = (last_end / batch_size + 1).min(last_batch);
    if from > to {
        return None;
    }
    if to - from < max_batches {
        return Some(from..=to);
    }
    let to = (last_end / batch_size)
        .min(last_batch)
        .min(first + max_batches - 1);
    (first <= to).then_some(first..=to)
}
