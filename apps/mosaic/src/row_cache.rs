//! Pre-wrap rows as the server sent them, keyed by row index.
//!
//! Entries go in and come out as clones so a caller laying out (and therefore
//! mutating) a row can never corrupt what the next re-layout starts from.

use std::collections::HashMap;

use mosaic_layout::Row;

#[derive(Debug, Default)]
pub struct RowCache {
    rows: HashMap<usize, Row>,
}

impl RowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, row_index: usize) -> Option<Row> {
        self.rows.get(&row_index).cloned()
    }

    pub fn set(&mut self, row_index: usize, row: &Row) {
        self.rows.insert(row_index, row.clone());
    }

    pub fn contains(&self, row_index: usize) -> bool {
        self.rows.contains_key(&row_index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop everything; called when the dataset generation changes.
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
