use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageBuffer, ImageEncoder, Rgba};
use mosaic_engine::config::EngineConfig;
use mosaic_engine::{EngineEvent, GalleryEngine, IsolationId};
use mosaic_layout::{layout_row, DisplayElement, Row};
use mosaic_sdk::{ApiError, GalleryApi, ItemRecord, StatusCode, ThumbnailScope};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

const DATA_LENGTH: usize = 40;
const ROW_ITEMS: usize = 4;
const IDLE: Duration = Duration::from_millis(150);

struct FakeGallery {
    row_calls: Mutex<Vec<(usize, u64)>>,
    data_calls: Mutex<Vec<(usize, usize)>>,
    /// Row answers for this timestamp (or this row) wait for a gate permit.
    gated_timestamp: Option<u64>,
    gated_row: Option<usize>,
    gate: Semaphore,
    /// Rows whose next fetch returns a malformed payload.
    fail_once: Mutex<HashSet<usize>>,
    short_rows: bool,
    png: Vec<u8>,
}

impl FakeGallery {
    fn base() -> Self {
        let buffer = ImageBuffer::from_pixel(64, 32, Rgba([10u8, 20, 30, 255]));
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(&buffer, 64, 32, ColorType::Rgba8)
            .expect("encode png");
        Self {
            row_calls: Mutex::new(Vec::new()),
            data_calls: Mutex::new(Vec::new()),
            gated_timestamp: None,
            gated_row: None,
            gate: Semaphore::new(0),
            fail_once: Mutex::new(HashSet::new()),
            short_rows: false,
            png,
        }
    }

    fn new() -> Arc<Self> {
        Arc::new(Self::base())
    }

    fn with_gate(gated_timestamp: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            gated_timestamp,
            ..Self::base()
        })
    }

    fn row_fetches(&self, index: usize) -> usize {
        self.row_calls
            .lock()
            .iter()
            .filter(|(i, _)| *i == index)
            .count()
    }

    fn fetched_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.row_calls.lock().iter().map(|(i, _)| *i).collect();
        rows.sort_unstable();
        rows
    }
}

/// Generation 2 has wide items so its layout differs from generation 1.
fn fake_row(index: usize, timestamp: u64) -> Row {
    let start = index * ROW_ITEMS;
    let count = ROW_ITEMS.min(DATA_LENGTH - start);
    let width = if timestamp == 2 { 200.0 } else { 100.0 };
    Row {
        start,
        end: start + count,
        row_height: 400.0,
        display_elements: (0..count)
            .map(|_| DisplayElement::new(width, 100.0))
            .collect(),
        top_pixel_accumulated: 0.0,
        row_index: index,
        offset: 0.0,
    }
}

/// Four 8:1 items per row. Every item gets its own line, so a row lays out
/// at 208 px against the nominal 400.
fn short_row(index: usize) -> Row {
    let mut row = fake_row(index, 1);
    for element in &mut row.display_elements {
        element.display_width = 800.0;
    }
    row
}

#[async_trait]
impl GalleryApi for FakeGallery {
    async fn get_rows(
        &self,
        index: usize,
        timestamp: u64,
        _window_width: f64,
        token: &str,
    ) -> Result<Row, ApiError> {
        if token == "bad" {
            return Err(ApiError::Unauthorized {
                status: StatusCode::UNAUTHORIZED,
            });
        }
        if self.gated_timestamp == Some(timestamp) || self.gated_row == Some(index) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.row_calls.lock().push((index, timestamp));
        if self.fail_once.lock().remove(&index) {
            return Err(ApiError::Schema(format!("row {index}: missing displayElements")));
        }
        if self.short_rows {
            return Ok(short_row(index));
        }
        Ok(fake_row(index, timestamp))
    }

    async fn get_data(
        &self,
        timestamp: u64,
        start: usize,
        end: usize,
        _token: &str,
    ) -> Result<Vec<ItemRecord>, ApiError> {
        self.data_calls.lock().push((start, end));
        (start..end.min(DATA_LENGTH))
            .map(|i| {
                serde_json::from_value(serde_json::json!({
                    "abstractData": {"id": format!("{i:02}ffee"), "objType": "image"},
                    "timestamp": timestamp,
                    "token": format!("item-{i}")
                }))
                .map_err(|err| ApiError::Schema(err.to_string()))
            })
            .collect()
    }

    async fn get_thumbnail(
        &self,
        _hash: &str,
        _token: &str,
        _scope: &ThumbnailScope,
    ) -> Result<Bytes, ApiError> {
        Ok(Bytes::from(self.png.clone()))
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        fixed_big_row_height: 400.0,
        padding_pixel: 1.0,
        sub_row_height_scale: 100.0,
        limit_ratio: false,
        row_item_count: ROW_ITEMS,
        batch_size: 8,
        batch_window: 6,
        buffer_height: 0.0,
        image_workers: 2,
        device_pixel_ratio: 1.0,
        ..EngineConfig::default()
    }
}

fn engine(api: Arc<FakeGallery>, viewport_height: f64) -> GalleryEngine {
    GalleryEngine::new(config(), api, IsolationId::Main, 400.0, viewport_height)
}

fn row_indices(rows: &[Row]) -> Vec<usize> {
    rows.iter().map(|r| r.row_index).collect()
}

#[tokio::test]
async fn first_frame_loads_row_metadata_and_thumbnails() {
    let api = FakeGallery::new();
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");

    let (frame, events) = engine.settle(IDLE).await;

    assert_eq!(row_indices(&frame.visible_rows), vec![0]);
    assert_eq!(api.fetched_rows(), vec![0]);
    assert!(engine.item(3).is_some());
    assert_eq!(engine.item(3).map(|r| r.token.as_str()), Some("item-3"));

    let mut thumbnails: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::ThumbnailReady { index, thumbnail } => {
                assert_eq!((thumbnail.width, thumbnail.height), (64, 32));
                Some(*index)
            }
            _ => None,
        })
        .collect();
    thumbnails.sort_unstable();
    assert_eq!(thumbnails, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn tall_viewport_fills_by_fetching_one_row_at_a_time() {
    let api = FakeGallery::new();
    let mut engine = engine(api.clone(), 1000.0);
    engine.open_generation(1, DATA_LENGTH, "tok");

    let (frame, _) = engine.settle(IDLE).await;

    assert_eq!(row_indices(&frame.visible_rows), vec![0, 1, 2]);
    assert_eq!(api.fetched_rows(), vec![0, 1, 2]);
    assert_eq!(frame.next_row, None);
}

#[tokio::test]
async fn duplicate_row_requests_share_one_fetch() {
    let api = FakeGallery::new();
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");

    engine.request_row(5);
    engine.request_row(5);
    engine.settle(IDLE).await;
    engine.request_row(5);
    engine.settle(IDLE).await;

    assert_eq!(api.row_fetches(5), 1);
}

#[tokio::test]
async fn scrolling_far_fetches_the_nominal_row() {
    let api = FakeGallery::new();
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");
    engine.settle(IDLE).await;

    engine.set_scroll_top(2000.0);
    let (frame, _) = engine.settle(IDLE).await;

    assert_eq!(row_indices(&frame.visible_rows), vec![5]);
    assert_eq!(frame.scroll_top, 2000.0);
    assert_eq!(frame.location_index, 20);
    assert_eq!(api.fetched_rows(), vec![0, 5]);
}

#[tokio::test]
async fn answers_from_an_old_generation_are_dropped() {
    let api = FakeGallery::with_gate(Some(1));
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");
    engine.recompute();

    engine.open_generation(2, DATA_LENGTH, "tok");
    engine.settle(IDLE).await;
    api.gate.add_permits(1);
    let (_, events) = engine.settle(IDLE).await;

    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::RowReady { .. })));
    assert_eq!(api.row_fetches(0), 2);
    let expected = layout_row(&fake_row(0, 2), &engine.layout_options(0)).row;
    assert_eq!(engine.state().rows.get(&0), Some(&expected));
    assert_eq!(engine.cached_rows(), 1);
}

#[tokio::test]
async fn jump_anchors_the_frame_on_the_target_row() {
    let api = FakeGallery::new();
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");

    engine.jump_to(22);
    let (frame, _) = engine.settle(IDLE).await;

    assert_eq!(row_indices(&frame.visible_rows), vec![5]);
    assert_eq!(engine.state().anchor, None);
    assert_eq!(frame.scroll_top, 2000.0);
    assert_eq!(api.fetched_rows(), vec![5]);
    assert!(api.data_calls.lock().contains(&(22, 23)));
}

#[tokio::test]
async fn resize_relayouts_from_cache_without_refetching() {
    let api = FakeGallery::new();
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");
    engine.settle(IDLE).await;
    assert_eq!(engine.state().rows.get(&0).map(|r| r.row_height), Some(400.0));

    engine.set_window_width(300.0);
    let (frame, _) = engine.settle(IDLE).await;

    assert_eq!(api.row_fetches(0), 1);
    let expected = layout_row(&fake_row(0, 1), &engine.layout_options(0)).row;
    assert_eq!(expected.row_height, 300.0);
    assert_eq!(engine.state().rows.get(&0), Some(&expected));
    // Shrinking rows pull the next one into view.
    assert_eq!(row_indices(&frame.visible_rows), vec![0, 1]);
    assert_eq!(frame.scroll_top, 0.0);
}

#[tokio::test]
async fn rejected_token_is_reported_and_nothing_is_shown() {
    let api = FakeGallery::new();
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "bad");

    let (frame, events) = engine.settle(IDLE).await;

    assert!(frame.visible_rows.is_empty());
    assert!(events.contains(&EngineEvent::Unauthorized));
    assert!(engine.state().rows.is_empty());
}

#[tokio::test]
async fn short_rows_that_drift_above_the_range_do_not_blank_the_frame() {
    let api = Arc::new(FakeGallery {
        short_rows: true,
        ..FakeGallery::base()
    });
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");
    engine.settle(IDLE).await;
    assert_eq!(api.fetched_rows(), vec![0, 1]);

    // Row 5 lands at [1808, 2016], short of the range; row 6 covers it.
    engine.set_scroll_top(2100.0);
    let (frame, _) = engine.settle(IDLE).await;

    let row5 = engine.state().rows.get(&5).map(|r| (r.top(), r.bottom()));
    assert_eq!(row5, Some((1808.0, 2016.0)));
    assert_eq!(row_indices(&frame.visible_rows), vec![5, 6]);
    assert_eq!(frame.scroll_top, 2100.0);
    assert_eq!(api.fetched_rows(), vec![0, 1, 5, 6]);

    let (again, _) = engine.settle(IDLE).await;
    assert_eq!(row_indices(&again.visible_rows), vec![5, 6]);
    assert_eq!(api.fetched_rows(), vec![0, 1, 5, 6]);
}

#[tokio::test]
async fn malformed_row_is_not_cached_and_is_fetched_again() {
    let api = Arc::new(FakeGallery {
        fail_once: Mutex::new(HashSet::from([0])),
        ..FakeGallery::base()
    });
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");

    let (frame, events) = engine.settle(IDLE).await;
    assert!(frame.visible_rows.is_empty());
    assert!(events.is_empty());
    assert!(engine.state().rows.is_empty());
    assert_eq!(engine.cached_rows(), 0);
    assert_eq!(api.row_fetches(0), 1);

    let (frame, events) = engine.settle(IDLE).await;
    assert_eq!(api.row_fetches(0), 2);
    assert_eq!(row_indices(&frame.visible_rows), vec![0]);
    assert!(events.contains(&EngineEvent::RowReady { row_index: 0 }));
    assert_eq!(engine.cached_rows(), 1);
}

#[tokio::test]
async fn rows_other_than_the_pending_anchor_are_dropped() {
    let api = Arc::new(FakeGallery {
        gated_row: Some(5),
        ..FakeGallery::base()
    });
    let mut engine = engine(api.clone(), 300.0);
    engine.open_generation(1, DATA_LENGTH, "tok");
    engine.recompute();
    engine.jump_to(22);

    // Row 0 answers while the jump target is still held back.
    let (frame, events) = engine.settle(IDLE).await;
    assert_eq!(api.row_fetches(0), 1);
    assert!(frame.visible_rows.is_empty());
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::RowReady { .. })));
    assert!(engine.state().rows.is_empty());
    assert_eq!(engine.cached_rows(), 0);
    assert_eq!(engine.state().anchor, Some(5));

    api.gate.add_permits(1);
    let (frame, _) = engine.settle(IDLE).await;
    assert_eq!(row_indices(&frame.visible_rows), vec![5]);
    assert_eq!(engine.state().anchor, None);
    assert_eq!(engine.state().rows.keys().copied().collect::<Vec<_>>(), vec![5]);
    assert_eq!(engine.cached_rows(), 1);
}
