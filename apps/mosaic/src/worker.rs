//! Background workers and the typed messages exchanged with them.
//!
//! One data worker fetches rows and metadata and runs row layout. A fixed pool
//! of image workers fetches and decodes thumbnails; jobs are routed to a worker
//! by item index and can be aborted individually. Neither side shares state
//! with the engine: every result comes back as a [`DataResponse`] or
//! [`ImageResponse`] carrying the index or batch it answers.

use std::collections::HashMap;
use std::sync::Arc;

use mosaic_layout::{layout_row, LayoutOptions, Row, RowWithOffset};
use mosaic_sdk::{ApiError, GalleryApi, ItemRecord, ThumbnailScope};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::thumbnail::{decode_thumbnail, Thumbnail, ThumbnailSpec};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("{0} worker is no longer running")]
    Closed(&'static str),
    #[error("no image worker {0}")]
    UnknownWorker(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMethod {
    /// A `batch_size` slice keyed by batch number.
    Batch,
    /// One item keyed by its index.
    Single,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataRequest {
    FetchRow {
        index: usize,
        timestamp: u64,
        token: String,
        options: LayoutOptions,
    },
    FetchData {
        method: FetchMethod,
        key: usize,
        start: usize,
        end: usize,
        timestamp: u64,
        token: String,
    },
}

/// Which request an unauthorized answer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Row(usize),
    Data { method: FetchMethod, key: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataResponse {
    RowFetched {
        index: usize,
        timestamp: u64,
        /// The row exactly as the server sent it, for the row cache.
        raw: Row,
        laid_out: RowWithOffset,
        options: LayoutOptions,
    },
    DataReturned {
        method: FetchMethod,
        key: usize,
        start: usize,
        timestamp: u64,
        records: Vec<ItemRecord>,
    },
    RowFailed {
        index: usize,
        timestamp: u64,
        reason: String,
    },
    DataFailed {
        method: FetchMethod,
        key: usize,
        timestamp: u64,
        reason: String,
    },
    Unauthorized {
        timestamp: u64,
        origin: DataOrigin,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub index: usize,
    pub timestamp: u64,
    pub hash: String,
    /// The item's own bearer token.
    pub token: String,
    pub scope: ThumbnailScope,
    pub spec: ThumbnailSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageRequest {
    ProcessSmallImage(ImageJob),
    ProcessAbort { index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageResponse {
    SmallImageProcessed {
        index: usize,
        timestamp: u64,
        thumbnail: Thumbnail,
    },
    ImageFailed {
        index: usize,
        timestamp: u64,
        reason: String,
    },
    Unauthorized {
        index: usize,
        timestamp: u64,
    },
}

pub struct DataWorker {
    tx: mpsc::UnboundedSender<DataRequest>,
    task: JoinHandle<()>,
}

impl DataWorker {
    pub fn spawn(
        api: Arc<dyn GalleryApi>,
        responses: mpsc::UnboundedSender<DataResponse>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DataRequest>();
        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let api = api.clone();
                let responses = responses.clone();
                tokio::spawn(async move {
                    let response = handle_data_request(api.as_ref(), request).await;
                    let _ = responses.send(response);
                });
            }
        });
        Self { tx, task }
    }

    pub fn send(&self, request: DataRequest) -> Result<(), WorkerError> {
        self.tx.send(request).map_err(|_| WorkerError::Closed("data"))
    }
}

impl Drop for DataWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_data_request(api: &dyn GalleryApi, request: DataRequest) -> DataResponse {
    match request {
        DataRequest::FetchRow {
            index,
            timestamp,
            token,
            options,
        } => match api
            .get_rows(index, timestamp, options.window_width, &token)
            .await
        {
            Ok(raw) => {
                let laid_out = layout_row(&raw, &options);
                DataResponse::RowFetched {
                    index,
                    timestamp,
                    raw,
                    laid_out,
                    options,
                }
            }
            Err(err) if err.is_unauthorized() => DataResponse::Unauthorized {
                timestamp,
                origin: DataOrigin::Row(index),
            },
            Err(err) => {
                warn!(row = index, error = %err, "row fetch failed");
                DataResponse::RowFailed {
                    index,
                    timestamp,
                    reason: err.to_string(),
                }
            }
        },
        DataRequest::FetchData {
            method,
            key,
            start,
            end,
            timestamp,
            token,
        } => match api.get_data(timestamp, start, end, &token).await {
            Ok(records) => DataResponse::DataReturned {
                method,
                key,
                start,
                timestamp,
                records,
            },
            Err(err) if err.is_unauthorized() => DataResponse::Unauthorized {
                timestamp,
                origin: DataOrigin::Data { method, key },
            },
            Err(err) => {
                warn!(?method, key, error = %err, "metadata fetch failed");
                DataResponse::DataFailed {
                    method,
                    key,
                    timestamp,
                    reason: err.to_string(),
                }
            }
        },
    }
}

struct ImageWorker {
    tx: mpsc::UnboundedSender<ImageRequest>,
    task: JoinHandle<()>,
}

/// Fixed set of thumbnail workers.
pub struct ImagePool {
    workers: Vec<ImageWorker>,
}

impl ImagePool {
    pub fn spawn(
        count: usize,
        api: Arc<dyn GalleryApi>,
        responses: mpsc::UnboundedSender<ImageResponse>,
    ) -> Self {
        let workers = (0..count.max(1))
            .map(|id| {
                let (tx, rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(run_image_worker(id, rx, api.clone(), responses.clone()));
                ImageWorker { tx, task }
            })
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn send(&self, worker: usize, request: ImageRequest) -> Result<(), WorkerError> {
        let handle = self
            .workers
            .get(worker)
            .ok_or(WorkerError::UnknownWorker(worker))?;
        handle
            .tx
            .send(request)
            .map_err(|_| WorkerError::Closed("image"))
    }
}

impl Drop for ImagePool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.task.abort();
        }
    }
}

type JobTable = Arc<Mutex<HashMap<usize, (u64, CancellationToken)>>>;

async fn run_image_worker(
    id: usize,
    mut rx: mpsc::UnboundedReceiver<ImageRequest>,
    api: Arc<dyn GalleryApi>,
    responses: mpsc::UnboundedSender<ImageResponse>,
) {
    let jobs: JobTable = Arc::new(Mutex::new(HashMap::new()));
    let mut seq = 0u64;

    while let Some(request) = rx.recv().await {
        match request {
            ImageRequest::ProcessSmallImage(job) => {
                seq += 1;
                let job_seq = seq;
                let cancel = CancellationToken::new();
                if let Some((_, previous)) = jobs.lock().insert(job.index, (job_seq, cancel.clone()))
                {
                    previous.cancel();
                }

                let jobs = jobs.clone();
                let api = api.clone();
                let responses = responses.clone();
                tokio::spawn(async move {
                    let index = job.index;
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => None,
                        response = process_small_image(api.as_ref(), job) => Some(response),
                    };
                    {
                        let mut jobs = jobs.lock();
                        if matches!(jobs.get(&index), Some((s, _)) if *s == job_seq) {
                            jobs.remove(&index);
                        }
                    }
                    match outcome {
                        Some(response) => {
                            let _ = responses.send(response);
                        }
                        None => debug!(worker = id, index, "thumbnail cancelled"),
                    }
                });
            }
            ImageRequest::ProcessAbort { index } => {
                if let Some((_, cancel)) = jobs.lock().remove(&index) {
                    cancel.cancel();
                }
            }
        }
    }

    for (_, (_, cancel)) in jobs.lock().drain() {
        cancel.cancel();
    }
}

async fn process_small_image(api: &dyn GalleryApi, job: ImageJob) -> ImageResponse {
    let ImageJob {
        index,
        timestamp,
        hash,
        token,
        scope,
        spec,
    } = job;

    let bytes = match api.get_thumbnail(&hash, &token, &scope).await {
        Ok(bytes) => bytes,
        Err(ApiError::Unauthorized { .. }) => {
            return ImageResponse::Unauthorized { index, timestamp };
        }
        Err(err) => {
            warn!(index, %hash, error = %err, "thumbnail fetch failed");
            return ImageResponse::ImageFailed {
                index,
                timestamp,
                reason: err.to_string(),
            };
        }
    };

    match tokio::task::spawn_blocking(move || decode_thumbnail(&bytes, &spec)).await {
        Ok(Ok(thumbnail)) => ImageResponse::SmallImageProcessed {
            index,
            timestamp,
            thumbnail,
        },
        Ok(Err(err)) => {
            warn!(index, %hash, error = %err, "thumbnail decode failed");
            ImageResponse::ImageFailed {
                index,
                timestamp,
                reason: err.to_string(),
            }
        }
        Err(err) => ImageResponse::ImageFailed {
            index,
            timestamp,
            reason: err.to_string(),
        },
    }
}
