use axum::{extract::State, routing::post, Json, Router};

use crate::auth::identity::map_user_row;
use crate::auth::{link_user_to_device, AppState, RequestIdentity, RequireUser};
use crate::database::{execute_query, fetch_one, get_connection, queries, with_transaction};
use crate::error::{AppError, AppResult};
use crate::models::{
    CodeCheckRequest, CodeCheckResponse, CodeRequest, CodeSentResponse, ProfileRequest,
    ProfileResponse,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/code/request", post(request_code))
        .route("/user/code/check", post(check_code))
        .route("/user/profile", post(update_profile))
}

async fn request_code(
    State(state): State<AppState>,
    Json(request): Json<CodeRequest>,
) -> AppResult<Json<CodeSentResponse>> {
    // The code itself only ever travels by mail
    state.validation.issue_or_fetch_code(&request.email).await?;

    Ok(Json(CodeSentResponse { sent: true }))
}

async fn check_code(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(request): Json<CodeCheckRequest>,
) -> AppResult<Json<CodeCheckResponse>> {
    let mut conn = get_connection(&state.pool)?;
    let validated = state
        .validation
        .check_code(&mut conn, &request.email, &request.code)?;

    if let Some(device) = state
        .identity
        .lookup_device(&conn, &identity.credentials)?
    {
        link_user_to_device(&conn, validated.user_id, &device)?;
    }

    Ok(Json(CodeCheckResponse {
        hash: validated.hash,
    }))
}

async fn update_profile(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Json(request): Json<ProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = get_connection(&state.pool)?;

    let (user, device_count) = with_transaction(&mut conn, |tx| {
        if let Some(display_name) = &request.display_name {
            execute_query(
                tx,
                queries::users::UPDATE_DISPLAY_NAME,
                &[&display_name.trim(), &user_id],
            )?;
        }
        if let Some(allow_mailing) = request.allow_mailing {
            execute_query(
                tx,
                queries::users::UPDATE_ALLOW_MAILING,
                &[&allow_mailing, &user_id],
            )?;
        }

        let user = fetch_one(tx, queries::users::SELECT_BY_ID, &[&user_id], map_user_row)?
            .ok_or(AppError::UnknownUser)?;
        let device_count: i64 = fetch_one(
            tx,
            queries::devices::COUNT_FOR_USER,
            &[&user_id],
            |row| row.get(0),
        )?
        .unwrap_or(0);

        Ok((user, device_count))
    })?;

    Ok(Json(ProfileResponse {
        email: user.email,
        display_name: user.display_name,
        allow_mailing: user.allow_mailing,
        device_count,
    }))
}
