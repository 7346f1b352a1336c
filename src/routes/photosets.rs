use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::auth::{AppState, Caller};
use crate::database::get_connection;
use crate::error::AppResult;
use crate::models::{AuthLevel, LikeRequest, LikeSummary, PhotosetResponse};

use super::parse_id;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/photoset/:id", get(get_photoset))
        .route("/photoset/like", post(like_photoset))
}

async fn get_photoset(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> AppResult<Json<PhotosetResponse>> {
    let id = parse_id(&id)?;
    let conn = get_connection(&state.pool)?;

    let (root_id, members) = state.photosets.get_photoset(&conn, id)?;
    let animation_uri = members
        .iter()
        .find(|photo| photo.id == root_id && photo.is_root)
        .and_then(|anchor| anchor.animation_filename.as_deref())
        .map(|name| state.photos.animation_uri(name));

    let user_id = match caller.level {
        AuthLevel::User(user_id) => Some(user_id),
        _ => None,
    };
    let likes = state.likes.summary(&conn, root_id, user_id)?;

    Ok(Json(PhotosetResponse {
        root_id,
        photos: members.iter().map(|photo| state.photos.summary(photo)).collect(),
        animation_uri,
        likes: likes.likes,
        dislikes: likes.dislikes,
        your_likes: likes.your_likes,
    }))
}

async fn like_photoset(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<LikeRequest>,
) -> AppResult<Json<LikeSummary>> {
    let mut conn = get_connection(&state.pool)?;
    let summary = state
        .likes
        .toggle(&mut conn, caller.level, request.root_id, request.direction)?;

    Ok(Json(summary))
}
