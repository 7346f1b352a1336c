use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::auth::{AppState, IdentityResolver, ValidationCodeManager};
use crate::config::Config;
use crate::constants::{ANIMATIONS_DIR, PHOTOS_DIR};
use crate::database::DbPool;
use crate::logging::request_logger;
use crate::mail::Mailer;
use crate::photos::{LikeLedger, PhotoStore, PhotosetEngine};
use crate::processor::ImageService;
use crate::routes::api_router;
use crate::VERSION;

#[derive(Serialize)]
struct HealthcheckResponse {
    status: String,
    version: String,
}

async fn healthcheck() -> Json<HealthcheckResponse> {
    Json(HealthcheckResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
    })
}

/// Wires the services together over one storage handle.
pub fn build_state(
    config: Arc<Config>,
    pool: DbPool,
    images: Arc<dyn ImageService>,
    mailer: Arc<dyn Mailer>,
) -> AppState {
    let photos = Arc::new(PhotoStore::new(pool.clone(), images, &config.images));
    let photosets = Arc::new(PhotosetEngine::new(pool.clone(), photos.clone()));

    AppState {
        identity: Arc::new(IdentityResolver::new(&config.security)),
        validation: Arc::new(ValidationCodeManager::new(
            pool.clone(),
            mailer,
            config.validation.clone(),
        )),
        photos,
        photosets,
        likes: Arc::new(LikeLedger::new()),
        config,
        pool,
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/healthcheck", get(healthcheck))
        .merge(api_router(&state.config));

    let files = Router::new()
        .nest_service("/photos", ServeDir::new(&*PHOTOS_DIR))
        .nest_service("/animations", ServeDir::new(&*ANIMATIONS_DIR));

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/files", files)
        .layer(middleware::from_fn(request_logger))
        .layer(cors)
        .with_state(state)
}
