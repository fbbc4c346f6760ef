//! Asynchronous client for the gallery read endpoints.
//!
//! The engine only needs three calls: a pre-wrap row layout, a slice of item
//! metadata, and a compressed thumbnail. Authorization is an opaque bearer
//! token supplied by the caller; refreshing it is somebody else's job, so a
//! rejected token surfaces as [`ApiError::Unauthorized`] and is never retried.

use async_trait::async_trait;
use bytes::Bytes;
use mosaic_layout::Row;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

mod records;

pub use records::{ItemData, ItemRecord, ObjectKind};
pub use reqwest::StatusCode;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unauthorized: {status}")]
    Unauthorized { status: StatusCode },
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("response failed validation: {0}")]
    Schema(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// Album/share context forwarded with thumbnail requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThumbnailScope {
    pub album_id: Option<String>,
    pub share_id: Option<String>,
}

#[async_trait]
pub trait GalleryApi: Send + Sync + 'static {
    /// Pre-wrap layout input for one row of the dataset generation.
    async fn get_rows(
        &self,
        index: usize,
        timestamp: u64,
        window_width: f64,
        token: &str,
    ) -> Result<Row, ApiError>;

    /// Metadata for items `[start, end)`.
    async fn get_data(
        &self,
        timestamp: u64,
        start: usize,
        end: usize,
        token: &str,
    ) -> Result<Vec<ItemRecord>, ApiError>;

    /// Encoded thumbnail bytes for `hash`, authorized with the item's own token.
    async fn get_thumbnail(
        &self,
        hash: &str,
        token: &str,
        scope: &ThumbnailScope,
    ) -> Result<Bytes, ApiError>;
}

#[derive(Clone)]
pub struct GalleryClient {
    http: Client,
    base_url: String,
}

impl GalleryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let res = check_status(request.send().await?).await?;
        Ok(res.text().await?)
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized { status });
    }
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::UnexpectedStatus { status, body })
}

/// `ab12…` is stored under `ab/ab12….jpg`.
pub fn thumbnail_path(hash: &str) -> String {
    let prefix = hash.get(0..2).unwrap_or(hash);
    format!("/object/compressed/{prefix}/{hash}.jpg")
}

#[async_trait]
impl GalleryApi for GalleryClient {
    async fn get_rows(
        &self,
        index: usize,
        timestamp: u64,
        window_width: f64,
        token: &str,
    ) -> Result<Row, ApiError> {
        let url = format!(
            "{}/get/get-rows?index={}&timestamp={}&window_width={}",
            self.base_url,
            index,
            timestamp,
            window_width.round() as i64
        );
        debug!(row = index, timestamp, "requesting row layout");
        let body = self.get_text(self.http.get(url).bearer_auth(token)).await?;
        let row: Row =
            serde_json::from_str(&body).map_err(|err| ApiError::Schema(err.to_string()))?;
        row.validate()
            .map_err(|err| ApiError::Schema(err.to_string()))?;
        Ok(row)
    }

    async fn get_data(
        &self,
        timestamp: u64,
        start: usize,
        end: usize,
        token: &str,
    ) -> Result<Vec<ItemRecord>, ApiError> {
        let url = format!(
            "{}/get/get-data?timestamp={}&start={}&end={}",
            self.base_url, timestamp, start, end
        );
        debug!(start, end, timestamp, "requesting item metadata");
        let body = self.get_text(self.http.get(url).bearer_auth(token)).await?;
        serde_json::from_str(&body).map_err(|err| ApiError::Schema(err.to_string()))
    }

    async fn get_thumbnail(
        &self,
        hash: &str,
        token: &str,
        scope: &ThumbnailScope,
    ) -> Result<Bytes, ApiError> {
        let url = format!("{}{}", self.base_url, thumbnail_path(hash));
        let mut request = self.http.get(url).bearer_auth(token);
        if let Some(album_id) = &scope.album_id {
            request = request.header("x-album-id", album_id);
        }
        if let Some(share_id) = &scope.share_id {
            request = request.header("x-share-id", share_id);
        }
        let res = check_status(request.send().await?).await?;
        Ok(res.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_path_uses_two_char_prefix() {
        assert_eq!(thumbnail_path("abcdef"), "/object/compressed/ab/abcdef.jpg");
    }

    #[test]
    fn base_url_is_normalized() {
        let client = GalleryClient::new("http://localhost:5673/");
        assert_eq!(client.base_url(), "http://localhost:5673");
    }
}
