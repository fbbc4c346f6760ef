use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use mosaic_layout::Row;
use mosaic_sdk::ItemRecord;

/// Which gallery surface a session belongs to. The main timeline and a
/// secondary page (album, share) keep fully independent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationId {
    Main,
    Sub,
}

impl fmt::Display for IsolationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationId::Main => f.write_str("main"),
            IsolationId::Sub => f.write_str("sub"),
        }
    }
}

/// One dataset generation: a fixed ordering of items under a server timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub timestamp: u64,
    pub data_length: usize,
    pub token: String,
}

impl Generation {
    pub fn row_length(&self, row_item_count: usize) -> usize {
        self.data_length.div_ceil(row_item_count.max(1))
    }
}

/// Everything the viewport and prefetch logic reads or writes for one surface.
#[derive(Debug)]
pub struct SessionState {
    pub isolation_id: IsolationId,
    pub generation: Option<Generation>,
    pub row_length: usize,
    pub window_width: f64,
    pub viewport_height: f64,
    pub scroll_top: f64,
    /// Laid-out rows for the current width.
    pub rows: BTreeMap<usize, Row>,
    /// Rows exactly as shown by the previous frame.
    pub last_visible_rows: HashMap<usize, Row>,
    pub anchor: Option<usize>,
    pub location_index: usize,
    pub last_row_bottom: f64,
    pub items: HashMap<usize, ItemRecord>,
    pub thumbnails_ready: HashSet<usize>,
}

impl SessionState {
    pub fn new(isolation_id: IsolationId, window_width: f64, viewport_height: f64) -> Self {
        Self {
            isolation_id,
            generation: None,
            row_length: 0,
            window_width,
            viewport_height,
            scroll_top: 0.0,
            rows: BTreeMap::new(),
            last_visible_rows: HashMap::new(),
            anchor: None,
            location_index: 0,
            last_row_bottom: 0.0,
            items: HashMap::new(),
            thumbnails_ready: HashSet::new(),
        }
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.generation.as_ref().map(|g| g.timestamp)
    }

    pub fn data_length(&self) -> usize {
        self.generation.as_ref().map(|g| g.data_length).unwrap_or(0)
    }

    pub fn is_current(&self, timestamp: u64) -> bool {
        self.timestamp() == Some(timestamp)
    }

    /// Swap in a new generation and forget every derived structure with it.
    /// Width, viewport height and isolation id survive.
    pub fn reset_generation(&mut self, generation: Option<Generation>, row_item_count: usize) {
        self.row_length = generation
            .as_ref()
            .map(|g| g.row_length(row_item_count))
            .unwrap_or(0);
        self.generation = generation;
        self.scroll_top = 0.0;
        self.rows.clear();
        self.last_visible_rows.clear();
        self.anchor = None;
        self.location_index = 0;
        self.last_row_bottom = 0.0;
        self.items.clear();
        self.thumbnails_ready.clear();
    }

    pub fn is_last_row(&self, row_index: usize) -> bool {
        self.row_length > 0 && row_index + 1 == self.row_length
    }
}
