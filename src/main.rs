use photoset_api::app::{build_state, create_app};
use photoset_api::config::{load_config, save_default_config, Config};
use photoset_api::constants::{ANIMATIONS_DIR, CONFIG_PATH, DATA_DIR, PHOTOS_DIR};
use photoset_api::database::{create_pool, init_database, run_migrations};
use photoset_api::logging::{init_logging, install_panic_hook};
use photoset_api::mail::build_mailer;
use photoset_api::models::Resolution;
use photoset_api::photos::PhotosetEngine;
use photoset_api::processor::regenerator::regenerate_missing_animations;
use photoset_api::processor::ImageCrateService;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

fn init_directories() {
    std::fs::create_dir_all(&*DATA_DIR).ok();
    for resolution in Resolution::ALL {
        std::fs::create_dir_all(PHOTOS_DIR.join(resolution.dir_name())).ok();
    }
    std::fs::create_dir_all(&*ANIMATIONS_DIR).ok();
}

fn start_background_tasks(config: Arc<Config>, engine: Arc<PhotosetEngine>) {
    tokio::spawn(async move {
        let report = regenerate_missing_animations(&config.regenerate, engine).await;
        if report.failed > 0 {
            warn!("{} photoset animations could not be rebuilt", report.failed);
        }
    });
}

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--init-config") {
        match save_default_config(&CONFIG_PATH) {
            Ok(_) => {
                println!("Default configuration saved to {:?}", *CONFIG_PATH);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Failed to save default configuration: {}", e);
                std::process::exit(1);
            }
        }
    }

    init_logging();
    install_panic_hook();

    let config = Arc::new(load_config(&CONFIG_PATH));

    init_directories();

    let pool = create_pool().expect("Failed to create database pool");

    {
        let conn = pool.get().expect("Failed to get connection");
        init_database(&conn).expect("Failed to initialize database");
        run_migrations(&conn).expect("Failed to migrate database");
    }

    let mailer = build_mailer(&config.mail).expect("Failed to build mailer");
    let images = Arc::new(ImageCrateService::new(
        &PHOTOS_DIR,
        &ANIMATIONS_DIR,
        &config.images,
    ));

    let state = build_state(Arc::clone(&config), pool, images, mailer);

    // Sets left without an animation by an earlier crash
    start_background_tasks(Arc::clone(&config), Arc::clone(&state.photosets));

    let app = create_app(state);

    let ip = config
        .server
        .host
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
    let addr = SocketAddr::new(ip, config.server.port);
    info!("Starting photoset API on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed");
}
