use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::debug;

use crate::auth::{authorize_owner, AppState, Caller, RequestIdentity};
use crate::database::get_connection;
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthLevel, NewPhoto, PhotoDeleteRequest, PhotoDeleteResponse, PhotoFilter, PhotoListRequest,
    PhotoListResponse, PhotoPatch, PhotoRotateRequest, PhotoRotateResponse, PhotoSummary,
    PhotoUpdateRequest, Resolution, TagList, UploadResponse,
};

use super::parse_id;

const DEFAULT_LIST_LIMIT: i64 = 100;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/photo/upload",
            post(upload_photo).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/photo/delete", post(delete_photo))
        .route("/photo/rotate", post(rotate_photo))
        .route("/photo/update", post(update_photo))
        .route("/photo/list", post(list_photos))
        .route("/photo/:id", get(get_photo))
}

#[derive(Default)]
struct UploadForm {
    root_id: i64,
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy: f64,
    description: String,
    tags: TagList,
    bytes: Option<Vec<u8>>,
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::BadRequest(format!("Field {} must be numeric", field)))
}

fn multipart_error(e: MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge(limit);
    }
    AppError::BadRequest(format!("Invalid multipart body: {}", e.body_text()))
}

async fn read_upload_form(mut multipart: Multipart, limit: usize) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_lowercase();

        if name == "file" || name == "image" || name == "photo" {
            let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
            form.bytes = Some(bytes.to_vec());
            continue;
        }

        let value = field.text().await.map_err(|e| multipart_error(e, limit))?;

        match name.as_str() {
            "rootid" => form.root_id = parse_number(&name, &value)?,
            "latitude" | "lat" => form.latitude = Some(parse_number(&name, &value)?),
            "longitude" | "lon" | "lng" => form.longitude = Some(parse_number(&name, &value)?),
            "accuracy" => form.accuracy = parse_number(&name, &value)?,
            "description" => form.description = value,
            "tags" => {
                form.tags = TagList::parse(&value)
                    .map_err(|e| AppError::BadRequest(format!("Invalid tags: {}", e)))?
            }
            _ => debug!("Ignoring upload field {}", name),
        }
    }

    Ok(form)
}

async fn upload_photo(
    State(state): State<AppState>,
    identity: RequestIdentity,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let (device, level) = {
        let conn = get_connection(&state.pool)?;
        let device = state
            .identity
            .lookup_device(&conn, &identity.credentials)?
            .ok_or(AppError::UnknownDevice)?;
        let level =
            state
                .identity
                .resolve_and_link(&conn, &identity.credentials, &identity.client_ip)?;
        (device, level)
    };

    let form = read_upload_form(multipart, state.config.images.max_upload_bytes).await?;
    let (Some(latitude), Some(longitude)) = (form.latitude, form.longitude) else {
        return Err(AppError::BadRequest("Location is required".to_string()));
    };
    let bytes = form
        .bytes
        .ok_or_else(|| AppError::BadRequest("No image uploaded".to_string()))?;

    let user_id = match level {
        AuthLevel::User(user_id) => user_id,
        _ => device.user_id,
    };
    let meta = NewPhoto {
        device_id: device.id,
        user_id,
        root_id: form.root_id,
        latitude,
        longitude,
        accuracy: form.accuracy,
        description: form.description,
        tags: form.tags,
    };

    let stored = state.photos.images().ingest(bytes).await?;
    let photo = state.photosets.add_photo(meta, stored).await?;

    Ok(Json(UploadResponse {
        id: photo.id,
        uri: state.photos.photo_uri(&photo.filename, Resolution::Full),
        width: photo.width,
        height: photo.height,
    }))
}

async fn delete_photo(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<PhotoDeleteRequest>,
) -> AppResult<Json<PhotoDeleteResponse>> {
    let photo = {
        let conn = get_connection(&state.pool)?;
        state.photos.get_visible(&conn, request.photo_id)?
    };
    authorize_owner(caller.level, &photo)?;

    let deleted = state.photosets.delete_photo(photo.id).await?;

    Ok(Json(PhotoDeleteResponse {
        id: deleted.id,
        deleted: true,
    }))
}

async fn rotate_photo(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<PhotoRotateRequest>,
) -> AppResult<Json<PhotoRotateResponse>> {
    let photo = {
        let conn = get_connection(&state.pool)?;
        state.photos.get_visible(&conn, request.photo_id)?
    };
    authorize_owner(caller.level, &photo)?;

    let rotated = state.photos.rotate(&photo, request.degrees).await?;

    // Frames of the set animation changed
    if rotated.is_root || rotated.root_id > 0 {
        state.photosets.recompute_logged(rotated.set_root()).await;
    }

    Ok(Json(PhotoRotateResponse {
        id: rotated.id,
        width: rotated.width,
        height: rotated.height,
    }))
}

async fn update_photo(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<PhotoUpdateRequest>,
) -> AppResult<Json<PhotoSummary>> {
    let mut conn = get_connection(&state.pool)?;
    let photo = state.photos.get_visible(&conn, request.photo_id)?;
    authorize_owner(caller.level, &photo)?;

    let patch = PhotoPatch {
        description: request.description,
        tags: request.tags,
    };
    let updated = state.photos.update_fields(&mut conn, photo.id, &patch)?;

    Ok(Json(state.photos.summary(&updated)))
}

async fn list_photos(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<PhotoListRequest>,
) -> AppResult<Json<PhotoListResponse>> {
    let mut filter = PhotoFilter {
        bounds: request.bounds,
        limit: request.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        ..PhotoFilter::default()
    };

    if request.mine {
        match caller.level {
            AuthLevel::User(user_id) => filter.user_id = Some(user_id),
            AuthLevel::Device(device_id) => filter.device_id = Some(device_id),
            AuthLevel::TrustedNetwork | AuthLevel::Anonymous => return Err(AppError::UnknownOwner),
        }
    }

    let conn = get_connection(&state.pool)?;
    let items = state
        .photos
        .list_visible(&conn, &filter)?
        .iter()
        .map(|photo| state.photos.summary(photo))
        .collect();

    Ok(Json(PhotoListResponse { items }))
}

async fn get_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PhotoSummary>> {
    let id = parse_id(&id)?;
    let conn = get_connection(&state.pool)?;
    let photo = state.photos.get_visible(&conn, id)?;

    Ok(Json(state.photos.summary(&photo)))
}
