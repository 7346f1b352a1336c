use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::TagList;

/// The three stored renditions of every photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Full,
    Medium,
    Small,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Full, Resolution::Medium, Resolution::Small];

    pub fn dir_name(self) -> &'static str {
        match self {
            Resolution::Full => "full",
            Resolution::Medium => "medium",
            Resolution::Small => "small",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A photo row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: i64,
    pub filename: String,
    /// Internal id of the uploading device.
    pub device_id: i64,
    /// Linked account at upload time, 0 when anonymous.
    pub user_id: i64,
    pub width: i32,
    pub height: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at: String,
    pub description: String,
    pub tags: TagList,
    pub visible: bool,
    pub root_id: i64,
    pub is_root: bool,
    pub animation_filename: Option<String>,
}

/// Where a photo sits in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRole {
    Singleton,
    Anchor,
    Member { root_id: i64 },
}

impl Photo {
    pub fn chain_role(&self) -> ChainRole {
        if self.is_root {
            ChainRole::Anchor
        } else if self.root_id > 0 {
            ChainRole::Member {
                root_id: self.root_id,
            }
        } else {
            ChainRole::Singleton
        }
    }

    /// Id of the anchor this photo's set is keyed by (itself when unchained).
    pub fn set_root(&self) -> i64 {
        match self.chain_role() {
            ChainRole::Member { root_id } => root_id,
            ChainRole::Anchor | ChainRole::Singleton => self.id,
        }
    }
}

/// Caller-supplied metadata for a new photo.
#[derive(Debug, Clone, Default)]
pub struct NewPhoto {
    pub device_id: i64,
    pub user_id: i64,
    pub root_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub description: String,
    pub tags: TagList,
}

/// Result of writing the three renditions of an upload.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct PhotoPatch {
    pub description: Option<String>,
    pub tags: Option<TagList>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// Visible-photo listing filter. `device_id`/`user_id` restrict to an owner
/// and are OR-ed together when both are set.
#[derive(Debug, Clone, Default)]
pub struct PhotoFilter {
    pub bounds: Option<BoundingBox>,
    pub device_id: Option<i64>,
    pub user_id: Option<i64>,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoSummary {
    pub id: i64,
    pub uri: String,
    pub small_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_uri: Option<String>,
    pub width: i32,
    pub height: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at: String,
    pub description: String,
    pub tags: TagList,
    pub root_id: i64,
    pub is_root: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: i64,
    pub uri: String,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDeleteRequest {
    pub photo_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDeleteResponse {
    pub id: i64,
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRotateRequest {
    pub photo_id: i64,
    pub degrees: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRotateResponse {
    pub id: i64,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUpdateRequest {
    pub photo_id: i64,
    pub description: Option<String>,
    pub tags: Option<TagList>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PhotoListRequest {
    pub bounds: Option<BoundingBox>,
    #[serde(default)]
    pub mine: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoListResponse {
    pub items: Vec<PhotoSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotosetResponse {
    pub root_id: i64,
    pub photos: Vec<PhotoSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_uri: Option<String>,
    pub likes: i64,
    pub dislikes: i64,
    pub your_likes: i64,
}
