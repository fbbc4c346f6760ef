use std::sync::Arc;
use std::time::Duration;

use mosaic_layout::{layout_row, LayoutOptions, Row};
use mosaic_sdk::{GalleryApi, ItemRecord, ThumbnailScope};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::prefetch::{batches_for_rows, PrefetchScheduler};
use crate::row_cache::RowCache;
use crate::session::{Generation, IsolationId, SessionState};
use crate::thumbnail::{Thumbnail, ThumbnailSpec};
use crate::viewport::{self, ViewportFrame, ViewportParams};
use crate::worker::{
    DataOrigin, DataRequest, DataResponse, DataWorker, FetchMethod, ImageJob, ImagePool,
    ImageRequest, ImageResponse,
};

/// Something the presentation layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RowReady { row_index: usize },
    ItemsReady { start: usize, count: usize },
    ThumbnailReady { index: usize, thumbnail: Thumbnail },
    /// The server rejected a token; a fresh one has to come from outside.
    Unauthorized,
}

/// Single-threaded owner of one gallery surface.
///
/// All layout and viewport work happens synchronously on the caller's task;
/// network and decode work is handed to the workers and comes back through
/// [`GalleryEngine::next_events`].
pub struct GalleryEngine {
    config: EngineConfig,
    state: SessionState,
    cache: RowCache,
    scheduler: PrefetchScheduler,
    data_worker: DataWorker,
    images: ImagePool,
    data_rx: mpsc::UnboundedReceiver<DataResponse>,
    image_rx: mpsc::UnboundedReceiver<ImageResponse>,
    scope: ThumbnailScope,
    album_mode: bool,
    pending_recompute: bool,
}

impl GalleryEngine {
    /// Spawns the workers; must be called inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn GalleryApi>,
        isolation_id: IsolationId,
        window_width: f64,
        viewport_height: f64,
    ) -> Self {
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let (image_tx, image_rx) = mpsc::unbounded_channel();
        let data_worker = DataWorker::spawn(api.clone(), data_tx);
        let images = ImagePool::spawn(config.image_workers, api, image_tx);
        let scheduler = PrefetchScheduler::new(config.batch_window, images.len());
        Self {
            state: SessionState::new(isolation_id, window_width, viewport_height),
            cache: RowCache::new(),
            scheduler,
            data_worker,
            images,
            data_rx,
            image_rx,
            scope: ThumbnailScope::default(),
            album_mode: false,
            pending_recompute: false,
            config,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn item(&self, index: usize) -> Option<&ItemRecord> {
        self.state.items.get(&index)
    }

    pub fn cached_rows(&self) -> usize {
        self.cache.len()
    }

    pub fn pending_recompute(&self) -> bool {
        self.pending_recompute
    }

    /// Switch to a new dataset generation. Cache, queues and derived state
    /// are dropped together; outstanding thumbnails are aborted.
    pub fn open_generation(&mut self, timestamp: u64, data_length: usize, token: impl Into<String>) {
        self.abort_all_images();
        self.scheduler.reset();
        self.cache.clear();
        self.state.reset_generation(
            Some(Generation {
                timestamp,
                data_length,
                token: token.into(),
            }),
            self.config.row_item_count,
        );
        info!(
            isolation = %self.state.isolation_id,
            timestamp,
            data_length,
            rows = self.state.row_length,
            "generation opened"
        );
        self.pending_recompute = true;
    }

    pub fn close_generation(&mut self) {
        self.abort_all_images();
        self.scheduler.reset();
        self.cache.clear();
        self.state.reset_generation(None, self.config.row_item_count);
        self.pending_recompute = false;
    }

    /// Album/share context for thumbnail requests. Album mode uses cover
    /// hashes and fills thumbnail boxes.
    pub fn set_thumbnail_scope(&mut self, scope: ThumbnailScope, album_mode: bool) {
        self.scope = scope;
        self.album_mode = album_mode;
    }

    pub fn set_scroll_top(&mut self, scroll_top: f64) {
        self.state.scroll_top = scroll_top.max(0.0);
        self.pending_recompute = true;
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.state.viewport_height = height.max(0.0);
        self.pending_recompute = true;
    }

    pub fn set_window_width(&mut self, width: f64) {
        if width == self.state.window_width {
            return;
        }
        self.state.window_width = width;
        self.relayout();
    }

    pub fn set_sub_row_height_scale(&mut self, scale: f64) {
        if scale == self.config.sub_row_height_scale {
            return;
        }
        self.config.sub_row_height_scale = scale;
        self.relayout();
    }

    pub fn set_limit_ratio(&mut self, limit_ratio: bool) {
        if limit_ratio == self.config.limit_ratio {
            return;
        }
        self.config.limit_ratio = limit_ratio;
        self.relayout();
    }

    /// Scroll so that `item` is shown, anchoring the frame on its row.
    pub fn jump_to(&mut self, item: usize) {
        let row_length = self.state.row_length;
        if row_length == 0 {
            return;
        }
        let item = item.min(self.state.data_length().saturating_sub(1));
        let row_index = (item / self.config.row_item_count.max(1)).min(row_length - 1);
        self.state.anchor = Some(row_index);
        self.state.scroll_top = row_index as f64 * self.config.fixed_big_row_height;
        self.state.location_index = item;
        debug!(item, row = row_index, "jump");

        if !self.state.items.contains_key(&item) && self.scheduler.admit_single(item) {
            self.send_data_request(FetchMethod::Single, item, item, item + 1);
        }
        self.request_row(row_index);
        self.pending_recompute = true;
    }

    pub fn layout_options(&self, row_index: usize) -> LayoutOptions {
        LayoutOptions {
            window_width: self.state.window_width,
            sub_row_height_scale: self.config.sub_row_height_scale,
            limit_ratio: self.config.limit_ratio,
            is_last_row: self.state.is_last_row(row_index),
            fixed_big_row_height: self.config.fixed_big_row_height,
            padding_pixel: self.config.padding_pixel,
        }
    }

    /// Re-run layout for every laid-out row from its cached source.
    fn relayout(&mut self) {
        let indices: Vec<usize> = self.state.rows.keys().copied().collect();
        for index in indices {
            match self.cache.get(index) {
                Some(raw) => self.install_row(index, &raw),
                None => {
                    self.state.rows.remove(&index);
                }
            }
        }
        debug!(
            width = self.state.window_width,
            rows = self.state.rows.len(),
            "relayout from cache"
        );
        self.pending_recompute = true;
    }

    fn install_row(&mut self, index: usize, raw: &Row) {
        let laid_out = layout_row(raw, &self.layout_options(index));
        self.state.rows.insert(index, laid_out.row);
    }

    /// Ask for row `index` unless it is already there or on its way.
    pub fn request_row(&mut self, index: usize) {
        let Some(token) = self.state.generation.as_ref().map(|g| g.token.clone()) else {
            return;
        };
        let timestamp = self.state.timestamp().unwrap_or_default();
        let rows = &self.state.rows;
        let admitted =
            self.scheduler
                .admit_row(index, self.state.row_length, self.state.anchor, |i| {
                    rows.contains_key(&i)
                });
        let index = match admitted {
            Ok(index) => index,
            Err(skip) => {
                trace!(row = index, ?skip, "row request skipped");
                return;
            }
        };

        if let Some(raw) = self.cache.get(index) {
            self.scheduler.finish_row(index);
            self.install_row(index, &raw);
            self.pending_recompute = true;
            return;
        }

        let request = DataRequest::FetchRow {
            index,
            timestamp,
            token,
            options: self.layout_options(index),
        };
        match self.data_worker.send(request) {
            Ok(()) => debug!(row = index, "row requested"),
            Err(err) => {
                self.scheduler.finish_row(index);
                warn!(row = index, error = %err, "row request not sent");
            }
        }
    }

    fn send_data_request(&mut self, method: FetchMethod, key: usize, start: usize, end: usize) {
        let Some(generation) = self.state.generation.as_ref() else {
            return;
        };
        let request = DataRequest::FetchData {
            method,
            key,
            start,
            end,
            timestamp: generation.timestamp,
            token: generation.token.clone(),
        };
        if let Err(err) = self.data_worker.send(request) {
            warn!(?method, key, error = %err, "metadata request not sent");
            match method {
                FetchMethod::Batch => self.scheduler.fail_batch(key),
                FetchMethod::Single => self.scheduler.finish_single(key),
            }
        }
    }

    /// Recompute the visible window and queue whatever it is missing.
    pub fn recompute(&mut self) -> ViewportFrame {
        self.pending_recompute = false;
        let params = ViewportParams {
            buffer_height: self.config.buffer_height,
            fixed_big_row_height: self.config.fixed_big_row_height,
        };
        let frame = viewport::update_visible_rows(&mut self.state, params);

        if frame.visible_rows.is_empty() {
            let nominal = (self.state.scroll_top / self.config.fixed_big_row_height).floor();
            let buffer = self.config.buffer_height;
            let start = self.state.scroll_top - buffer;
            let end = self.state.scroll_top + self.state.viewport_height + buffer;
            if let Some(index) = viewport::row_to_fill(
                &self.state.rows,
                self.state.row_length,
                nominal as usize,
                start,
                end,
            ) {
                self.request_row(index);
            }
        }
        if let Some(next) = frame.next_row {
            self.request_row(next);
        }
        self.prefetch_items(&frame.visible_rows);
        frame
    }

    fn prefetch_items(&mut self, visible: &[Row]) {
        let (Some(first), Some(last)) = (visible.first(), visible.last()) else {
            return;
        };
        let (item_start, item_end) = (first.start, last.item_end());
        let data_length = self.state.data_length();
        let batch_size = self.config.batch_size;

        let capacity = self.scheduler.batch_window_capacity();
        if let Some(span) = batches_for_rows(item_start, item_end, batch_size, data_length, capacity)
        {
            for batch in span {
                if self.scheduler.admit_batch(batch) {
                    let start = batch * batch_size;
                    let end = ((batch + 1) * batch_size).min(data_length);
                    self.send_data_request(FetchMethod::Batch, batch, start, end);
                }
            }
        }

        for (index, worker) in self.scheduler.take_images_outside(item_start, item_end) {
            trace!(index, "thumbnail left window");
            if let Err(err) = self.images.send(worker, ImageRequest::ProcessAbort { index }) {
                warn!(index, error = %err, "thumbnail abort not sent");
            }
        }

        let Some(timestamp) = self.state.timestamp() else {
            return;
        };
        for row in visible {
            for (offset, element) in row.display_elements.iter().enumerate() {
                let index = row.start + offset;
                if self.state.thumbnails_ready.contains(&index) {
                    continue;
                }
                let Some(record) = self.state.items.get(&index) else {
                    continue;
                };
                let Some(hash) = record.abstract_data.thumbnail_hash() else {
                    continue;
                };
                let job = ImageJob {
                    index,
                    timestamp,
                    hash: hash.to_string(),
                    token: record.token.clone(),
                    scope: self.scope.clone(),
                    spec: ThumbnailSpec {
                        display_width: element.display_width,
                        display_height: element.display_height,
                        device_pixel_ratio: self.config.device_pixel_ratio,
                        album_mode: self.album_mode,
                        limit_ratio: self.config.limit_ratio,
                    },
                };
                let Some(worker) = self.scheduler.admit_image(index) else {
                    continue;
                };
                if let Err(err) = self
                    .images
                    .send(worker, ImageRequest::ProcessSmallImage(job))
                {
                    self.scheduler.finish_image(index);
                    warn!(index, error = %err, "thumbnail request not sent");
                }
            }
        }
    }

    fn abort_all_images(&mut self) {
        for (index, worker) in self.scheduler.take_all_images() {
            if let Err(err) = self.images.send(worker, ImageRequest::ProcessAbort { index }) {
                warn!(index, error = %err, "thumbnail abort not sent");
            }
        }
    }

    pub fn handle_data_response(&mut self, response: DataResponse) -> Vec<EngineEvent> {
        match response {
            DataResponse::RowFetched {
                index,
                timestamp,
                raw,
                laid_out,
                options,
            } => {
                if !self.state.is_current(timestamp) {
                    debug!(row = index, timestamp, "stale row dropped");
                    return Vec::new();
                }
                self.scheduler.finish_row(index);
                if let Some(anchor) = self.state.anchor {
                    if anchor != index {
                        debug!(row = index, anchor, "row conflicts with anchor, dropped");
                        return Vec::new();
                    }
                }
                self.cache.set(index, &raw);
                if options == self.layout_options(index) {
                    self.state.rows.insert(index, laid_out.row);
                } else {
                    // Width or scale changed while the row was in flight.
                    self.install_row(index, &raw);
                }
                self.pending_recompute = true;
                vec![EngineEvent::RowReady { row_index: index }]
            }
            DataResponse::DataReturned {
                method,
                key,
                start,
                timestamp,
                records,
            } => {
                if !self.state.is_current(timestamp) {
                    debug!(?method, key, timestamp, "stale metadata dropped");
                    return Vec::new();
                }
                let wanted = match method {
                    FetchMethod::Batch => self.scheduler.finish_batch(key),
                    FetchMethod::Single => {
                        self.scheduler.finish_single(key);
                        true
                    }
                };
                if !wanted {
                    debug!(batch = key, "batch left window, dropped");
                    // Ask again if the frame still covers it.
                    self.pending_recompute = true;
                    return Vec::new();
                }
                let count = records.len();
                for (offset, record) in records.into_iter().enumerate() {
                    self.state.items.insert(start + offset, record);
                }
                self.pending_recompute = true;
                vec![EngineEvent::ItemsReady { start, count }]
            }
            DataResponse::RowFailed {
                index,
                timestamp,
                reason,
            } => {
                if self.state.is_current(timestamp) {
                    self.scheduler.finish_row(index);
                    warn!(row = index, %reason, "row will be retried");
                }
                Vec::new()
            }
            DataResponse::DataFailed {
                method,
                key,
                timestamp,
                reason,
            } => {
                if self.state.is_current(timestamp) {
                    self.release_data(method, key);
                    warn!(?method, key, %reason, "metadata will be retried");
                }
                Vec::new()
            }
            DataResponse::Unauthorized { timestamp, origin } => {
                if !self.state.is_current(timestamp) {
                    return Vec::new();
                }
                match origin {
                    DataOrigin::Row(index) => {
                        self.scheduler.finish_row(index);
                    }
                    DataOrigin::Data { method, key } => self.release_data(method, key),
                }
                warn!(?origin, "token rejected");
                vec![EngineEvent::Unauthorized]
            }
        }
    }

    fn release_data(&mut self, method: FetchMethod, key: usize) {
        match method {
            FetchMethod::Batch => self.scheduler.fail_batch(key),
            FetchMethod::Single => self.scheduler.finish_single(key),
        }
    }

    pub fn handle_image_response(&mut self, response: ImageResponse) -> Vec<EngineEvent> {
        match response {
            ImageResponse::SmallImageProcessed {
                index,
                timestamp,
                thumbnail,
            } => {
                if !self.state.is_current(timestamp) || !self.scheduler.finish_image(index) {
                    trace!(index, "thumbnail no longer wanted");
                    return Vec::new();
                }
                self.state.thumbnails_ready.insert(index);
                vec![EngineEvent::ThumbnailReady { index, thumbnail }]
            }
            ImageResponse::ImageFailed {
                index,
                timestamp,
                reason,
            } => {
                if self.state.is_current(timestamp) {
                    self.scheduler.finish_image(index);
                    debug!(index, %reason, "thumbnail failed");
                }
                Vec::new()
            }
            ImageResponse::Unauthorized { index, timestamp } => {
                if !self.state.is_current(timestamp) {
                    return Vec::new();
                }
                self.scheduler.finish_image(index);
                warn!(index, "item token rejected");
                vec![EngineEvent::Unauthorized]
            }
        }
    }

    /// Wait for the next worker answer and apply it. `None` once every worker
    /// has gone away.
    pub async fn next_events(&mut self) -> Option<Vec<EngineEvent>> {
        tokio::select! {
            Some(response) = self.data_rx.recv() => Some(self.handle_data_response(response)),
            Some(response) = self.image_rx.recv() => Some(self.handle_image_response(response)),
            else => None,
        }
    }

    /// Apply every answer that is already waiting without blocking.
    pub fn drain_ready(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(response) = self.data_rx.try_recv() {
            events.extend(self.handle_data_response(response));
        }
        while let Ok(response) = self.image_rx.try_recv() {
            events.extend(self.handle_image_response(response));
        }
        events
    }

    /// Recompute, then keep applying answers and recomputing whenever one of
    /// them changed the inputs, until no answer arrives for `idle`.
    pub async fn settle(&mut self, idle: Duration) -> (ViewportFrame, Vec<EngineEvent>) {
        let mut frame = self.recompute();
        let mut events = Vec::new();
        while let Ok(Some(batch)) = tokio::time::timeout(idle, self.next_events()).await {
            events.extend(batch);
            events.extend(self.drain_ready());
            if self.pending_recompute {
                frame = self.recompute();
            }
        }
        (frame, events)
    }
}
