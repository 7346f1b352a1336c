use axum::{extract::State, routing::post, Json, Router};

use crate::auth::{AppState, RequestIdentity};
use crate::database::get_connection;
use crate::error::AppResult;
use crate::models::DeviceRegisterResponse;

pub fn router() -> Router<AppState> {
    Router::new().route("/device/register", post(register_device))
}

async fn register_device(
    State(state): State<AppState>,
    identity: RequestIdentity,
) -> AppResult<Json<DeviceRegisterResponse>> {
    let mut conn = get_connection(&state.pool)?;
    let device = state
        .identity
        .register_device(&mut conn, &identity.client_ip)?;

    Ok(Json(DeviceRegisterResponse {
        device_id: device.device_id,
        device_hash: device.device_hash,
    }))
}
