use chrono::Utc;
use rusqlite::{Connection, Row, ToSql};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ImageConfig;
use crate::constants::{DESCRIPTION_MAX_CHARS, LIST_LIMIT_MAX, PHOTO_EXTENSION};
use crate::database::{
    execute_query, fetch_all, fetch_one, get_connection, insert_returning_id, queries,
    with_transaction, DbPool,
};
use crate::error::{AppError, AppResult};
use crate::models::{
    BoundingBox, NewPhoto, Photo, PhotoFilter, PhotoPatch, PhotoSummary, Resolution, StoredImage,
};
use crate::processor::ImageService;
use crate::utils::datetime::format_datetime;

pub(crate) fn map_photo_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        filename: row.get(1)?,
        device_id: row.get(2)?,
        user_id: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        accuracy: row.get(8)?,
        captured_at: row.get(9)?,
        description: row.get(10)?,
        tags: row.get(11)?,
        visible: row.get::<_, i64>(12)? != 0,
        root_id: row.get(13)?,
        is_root: row.get::<_, i64>(14)? != 0,
        animation_filename: row.get(15)?,
    })
}

fn check_description(description: &str) -> AppResult<()> {
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(AppError::BadRequest(format!(
            "Description longer than {} characters",
            DESCRIPTION_MAX_CHARS
        )));
    }
    Ok(())
}

fn check_location(latitude: f64, longitude: f64) -> AppResult<()> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::BadRequest(format!(
            "Location out of range: {}, {}",
            latitude, longitude
        )));
    }
    Ok(())
}

fn bounds_clause(bounds: &BoundingBox, params: &mut Vec<Box<dyn ToSql>>) -> String {
    params.push(Box::new(bounds.south));
    params.push(Box::new(bounds.north));
    params.push(Box::new(bounds.west));
    params.push(Box::new(bounds.east));

    // A box whose west edge lies east of its east edge spans the antimeridian
    if bounds.west <= bounds.east {
        "latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?".to_string()
    } else {
        "latitude BETWEEN ? AND ? AND (longitude >= ? OR longitude <= ?)".to_string()
    }
}

/// Photo rows and the renditions behind them.
pub struct PhotoStore {
    pool: DbPool,
    images: Arc<dyn ImageService>,
    config: ImageConfig,
}

impl PhotoStore {
    pub fn new(pool: DbPool, images: Arc<dyn ImageService>, config: &ImageConfig) -> Self {
        Self {
            pool,
            images,
            config: config.clone(),
        }
    }

    pub fn images(&self) -> &Arc<dyn ImageService> {
        &self.images
    }

    pub fn insert(&self, conn: &Connection, meta: &NewPhoto, image: &StoredImage) -> AppResult<i64> {
        check_description(&meta.description)?;
        check_location(meta.latitude, meta.longitude)?;

        let captured_at = format_datetime(&image.captured_at.unwrap_or_else(Utc::now));
        let width = image.width as i64;
        let height = image.height as i64;

        insert_returning_id(
            conn,
            queries::photos::INSERT,
            &[
                &image.filename,
                &meta.device_id,
                &meta.user_id,
                &width,
                &height,
                &meta.latitude,
                &meta.longitude,
                &meta.accuracy,
                &captured_at,
                &meta.description,
                &meta.tags,
                &meta.root_id,
            ],
        )
    }

    /// Any photo row, hidden ones included.
    pub fn get(&self, conn: &Connection, id: i64) -> AppResult<Option<Photo>> {
        fetch_one(conn, queries::photos::SELECT_BY_ID, &[&id], map_photo_row)
    }

    pub fn get_visible(&self, conn: &Connection, id: i64) -> AppResult<Photo> {
        self.get(conn, id)?
            .filter(|photo| photo.visible)
            .ok_or(AppError::PhotoNotFound(id))
    }

    /// Visible photos, newest capture first.
    pub fn list_visible(&self, conn: &Connection, filter: &PhotoFilter) -> AppResult<Vec<Photo>> {
        let mut clauses = vec!["visible = 1".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(bounds) = &filter.bounds {
            clauses.push(bounds_clause(bounds, &mut params));
        }

        match (filter.device_id, filter.user_id) {
            (Some(device_id), Some(user_id)) => {
                clauses.push("(deviceid = ? OR (userid = ? AND userid != 0))".to_string());
                params.push(Box::new(device_id));
                params.push(Box::new(user_id));
            }
            (Some(device_id), None) => {
                clauses.push("deviceid = ?".to_string());
                params.push(Box::new(device_id));
            }
            (None, Some(user_id)) => {
                clauses.push("userid = ? AND userid != 0".to_string());
                params.push(Box::new(user_id));
            }
            (None, None) => {}
        }

        let limit = filter.limit.clamp(1, LIST_LIMIT_MAX);
        params.push(Box::new(limit));

        let sql = format!(
            "SELECT {} FROM photo WHERE {} ORDER BY captured_at DESC, id DESC LIMIT ?",
            queries::photos::COLUMNS,
            clauses.join(" AND ")
        );
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        fetch_all(conn, &sql, &param_refs, map_photo_row)
    }

    pub fn update_fields(&self, conn: &mut Connection, id: i64, patch: &PhotoPatch) -> AppResult<Photo> {
        if let Some(description) = &patch.description {
            check_description(description)?;
        }

        with_transaction(conn, |tx| {
            self.get_visible(tx, id)?;

            if let Some(description) = &patch.description {
                execute_query(tx, queries::photos::UPDATE_DESCRIPTION, &[description, &id])?;
            }
            if let Some(tags) = &patch.tags {
                execute_query(tx, queries::photos::UPDATE_TAGS, &[tags, &id])?;
            }

            self.get_visible(tx, id)
        })
    }

    /// Marks a photo invisible and strips its chain pointers. Files stay on
    /// disk until [`remove_files`](Self::remove_files) runs.
    pub fn soft_delete(&self, conn: &Connection, id: i64) -> AppResult<()> {
        let changed = execute_query(conn, queries::photos::HIDE, &[&id])?;
        if changed == 0 {
            return Err(AppError::PhotoNotFound(id));
        }
        Ok(())
    }

    /// Best-effort removal of a deleted photo's renditions.
    pub async fn remove_files(&self, photo: &Photo) {
        if let Err(e) = self.images.remove(&photo.filename).await {
            warn!("Failed to remove files of photo {}: {}", photo.id, e);
        }
    }

    /// Rotates all three renditions, then swaps the stored dimensions.
    ///
    /// Renditions are rewritten full, medium, small. A failure after the
    /// first one leaves the photo with mixed orientations, which is reported
    /// as `PartialRotation` and the stored dimensions are left alone.
    pub async fn rotate(&self, photo: &Photo, degrees: i32) -> AppResult<Photo> {
        if degrees != 90 && degrees != -90 {
            return Err(AppError::BadRequest(format!(
                "Rotation must be 90 or -90 degrees, got {}",
                degrees
            )));
        }

        let mut rotated = Vec::with_capacity(Resolution::ALL.len());
        for resolution in Resolution::ALL {
            if let Err(e) = self.images.rotate(&photo.filename, resolution, degrees).await {
                if rotated.is_empty() {
                    return Err(e);
                }
                return Err(AppError::PartialRotation {
                    photo_id: photo.id,
                    rotated,
                    failed: resolution,
                    reason: e.to_string(),
                });
            }
            rotated.push(resolution);
        }

        let conn = get_connection(&self.pool)?;
        execute_query(
            &conn,
            queries::photos::UPDATE_DIMENSIONS,
            &[&photo.height, &photo.width, &photo.id],
        )?;

        info!("Rotated photo {} by {} degrees", photo.id, degrees);
        self.get_visible(&conn, photo.id)
    }

    pub fn photo_uri(&self, filename: &str, resolution: Resolution) -> String {
        format!(
            "{}/photos/{}/{}.{}",
            self.config.public_base_url.trim_end_matches('/'),
            resolution.dir_name(),
            filename,
            PHOTO_EXTENSION
        )
    }

    pub fn animation_uri(&self, name: &str) -> String {
        format!(
            "{}/animations/{}",
            self.config.public_base_url.trim_end_matches('/'),
            name
        )
    }

    pub fn summary(&self, photo: &Photo) -> PhotoSummary {
        let animation_uri = if photo.is_root {
            photo.animation_filename.as_deref().map(|name| self.animation_uri(name))
        } else {
            None
        };

        PhotoSummary {
            id: photo.id,
            uri: self.photo_uri(&photo.filename, Resolution::Full),
            small_uri: self.photo_uri(&photo.filename, Resolution::Small),
            animation_uri,
            width: photo.width,
            height: photo.height,
            latitude: photo.latitude,
            longitude: photo.longitude,
            accuracy: photo.accuracy,
            captured_at: photo.captured_at.clone(),
            description: photo.description.clone(),
            tags: photo.tags.clone(),
            root_id: photo.root_id,
            is_root: photo.is_root,
        }
    }
}
