use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Image,
    Video,
    Album,
}

/// Flat item payload as returned by `get-data`. Only the fields the engine
/// needs are typed; anything else the server adds is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemData {
    pub id: String,
    pub obj_type: ObjectKind,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub thumbhash: Option<Vec<u8>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ItemData {
    /// Hash of the file whose thumbnail represents this item, if any.
    pub fn thumbnail_hash(&self) -> Option<&str> {
        match self.obj_type {
            ObjectKind::Image | ObjectKind::Video => Some(self.id.as_str()),
            ObjectKind::Album => self.cover.as_deref(),
        }
    }

    pub fn is_album(&self) -> bool {
        self.obj_type == ObjectKind::Album
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub abstract_data: ItemData,
    pub timestamp: u64,
    /// Per-item bearer token for thumbnail requests.
    pub token: String,
}
