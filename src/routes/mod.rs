mod devices;
mod photos;
mod photosets;
mod users;

use axum::Router;
use crate::auth::AppState;
use crate::config::Config;
use crate::error::{AppError, AppResult};

pub fn api_router(config: &Config) -> Router<AppState> {
    Router::new()
        .merge(devices::router())
        .merge(photos::router(config.images.max_upload_bytes))
        .merge(photosets::router())
        .merge(users::router())
}

/// Path ids arrive as text so that a malformed one is a `BadRequest`
/// rather than the framework's plain-text rejection.
fn parse_id(raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid id: {}", raw)))
}
