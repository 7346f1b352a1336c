#![cfg(test)]

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::extract::ConnectInfo;
use axum::Extension;
use axum::Router;
use axum_test::TestServer;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::app::{build_state, create_app};
use crate::auth::extractors::{
    DEVICE_HASH_HEADER, DEVICE_ID_HEADER, USERNAME_HEADER, USER_HASH_HEADER,
};
use crate::auth::AppState;
use crate::config::Config;
use crate::database::{create_pool_at, init_database, run_migrations, DbPool};
use crate::error::{AppError, AppResult};
use crate::mail::Mailer;
use crate::models::{Device, Photo, Resolution, StoredImage};
use crate::photos::map_photo_row;
use crate::processor::ImageService;

/// Create a throwaway on-disk SQLite database with full schema applied.
/// Every pooled connection sees the same data.
pub fn create_test_db() -> DbPool {
    let path = tempfile::Builder::new()
        .prefix("photoset-test-")
        .suffix(".sqlite")
        .tempfile()
        .expect("Failed to create test database file")
        .into_temp_path()
        .keep()
        .expect("Failed to keep test database file");

    let pool = create_pool_at(&path).expect("Failed to create test database pool");

    let conn = pool.get().expect("Failed to get connection from pool");
    init_database(&conn).expect("Failed to initialize test database schema");
    run_migrations(&conn).expect("Failed to migrate test database");

    pool
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: DbPool,
    pub images: Arc<FakeImageService>,
    pub mailer: Arc<RecordingMailer>,
}

/// Create the full router over a test database and fake collaborators.
pub fn create_test_app(config: Config) -> TestApp {
    let pool = create_test_db();
    let images = Arc::new(FakeImageService::default());
    let mailer = Arc::new(RecordingMailer::default());

    let state = build_state(Arc::new(config), pool.clone(), images.clone(), mailer.clone());
    let router = create_app(state.clone());

    TestApp {
        router,
        state,
        pool,
        images,
        mailer,
    }
}

/// Test server whose requests arrive from `peer` as the TCP remote address
pub fn server_from(router: Router, peer: &str) -> TestServer {
    let ip: IpAddr = peer.parse().expect("valid peer address");
    let router = router.layer(Extension(ConnectInfo(SocketAddr::new(ip, 40_000))));
    TestServer::new(router).expect("Failed to start test server")
}

/// Test fixture: a registered device, optionally linked to a user
pub fn create_test_device(pool: &DbPool, user_id: i64) -> Device {
    let conn = pool.get().expect("Failed to get connection");
    conn.execute(
        "INSERT INTO device (deviceip, userid) VALUES ('127.0.0.1', ?)",
        [user_id],
    )
    .expect("Failed to insert test device");

    let id = conn.last_insert_rowid();
    let device = Device {
        id,
        device_id: id + 1000,
        device_hash: Uuid::new_v4().simple().to_string(),
        user_id,
        device_ip: "127.0.0.1".to_string(),
    };

    conn.execute(
        "UPDATE device SET deviceid = ?, devicehash = ? WHERE id = ?",
        rusqlite::params![device.device_id, device.device_hash, id],
    )
    .expect("Failed to set device credentials");

    device
}

/// Test fixture: a validated account, returns its id and bearer hash
pub fn create_validated_user(pool: &DbPool, email: &str) -> (i64, String) {
    let conn = pool.get().expect("Failed to get connection");
    let hash = Uuid::new_v4().simple().to_string();

    conn.execute(
        "INSERT INTO photouser (email, hash, validationcode, validated) VALUES (?, ?, '00000', 1)",
        rusqlite::params![email, hash],
    )
    .expect("Failed to insert test user");

    (conn.last_insert_rowid(), hash)
}

#[derive(Debug, Clone)]
pub struct PhotoSpec {
    pub device_id: i64,
    pub user_id: i64,
    pub root_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub width: i32,
    pub height: i32,
    pub captured_at: &'static str,
}

impl Default for PhotoSpec {
    fn default() -> Self {
        Self {
            device_id: 1,
            user_id: 0,
            root_id: 0,
            latitude: 0.0,
            longitude: 0.0,
            width: 640,
            height: 480,
            captured_at: "2024-01-01T00:00:00.000Z",
        }
    }
}

/// Test fixture: a photo row written directly, bypassing chain logic
pub fn create_test_photo(pool: &DbPool, spec: PhotoSpec) -> Photo {
    let conn = pool.get().expect("Failed to get connection");
    let filename = Uuid::new_v4().simple().to_string();

    conn.execute(
        "INSERT INTO photo (filename, deviceid, userid, width, height, latitude, longitude, captured_at, rootid)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            filename,
            spec.device_id,
            spec.user_id,
            spec.width,
            spec.height,
            spec.latitude,
            spec.longitude,
            spec.captured_at,
            spec.root_id
        ],
    )
    .expect("Failed to insert test photo");

    let id = conn.last_insert_rowid();
    conn.query_row(
        "SELECT id, filename, deviceid, userid, width, height, latitude, longitude, accuracy,
                captured_at, description, tags, visible, rootid, isroot, animationfilename
           FROM photo WHERE id = ?",
        [id],
        map_photo_row,
    )
    .expect("Failed to read back test photo")
}

/// An ingest result captured `minute` minutes after a fixed base time
pub fn stored_image(minute: u32) -> StoredImage {
    let base = Utc
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid base time");

    StoredImage {
        filename: Uuid::new_v4().simple().to_string(),
        width: 640,
        height: 480,
        captured_at: Some(base + ChronoDuration::minutes(minute as i64)),
    }
}

/// Checks the chain invariants over every photo row.
pub fn assert_chain_invariants(conn: &Connection) {
    let mut stmt = conn
        .prepare(
            "SELECT id, filename, deviceid, userid, width, height, latitude, longitude, accuracy,
                    captured_at, description, tags, visible, rootid, isroot, animationfilename
               FROM photo",
        )
        .unwrap();
    let photos: Vec<Photo> = stmt
        .query_map([], map_photo_row)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    let by_id: HashMap<i64, &Photo> = photos.iter().map(|p| (p.id, p)).collect();

    let mut followers: HashMap<i64, usize> = HashMap::new();
    for photo in photos.iter().filter(|p| p.visible && p.root_id > 0) {
        assert!(!photo.is_root, "photo {} is both anchor and member", photo.id);
        let root = by_id
            .get(&photo.root_id)
            .unwrap_or_else(|| panic!("photo {} points at missing {}", photo.id, photo.root_id));
        assert!(root.visible, "photo {} points at hidden {}", photo.id, root.id);
        assert!(root.is_root, "photo {} points at non-anchor {}", photo.id, root.id);
        *followers.entry(root.id).or_default() += 1;
    }

    for photo in &photos {
        if !photo.visible {
            assert!(!photo.is_root, "hidden photo {} is an anchor", photo.id);
            continue;
        }
        if photo.is_root {
            assert_eq!(photo.root_id, 0, "anchor {} has a rootid", photo.id);
            assert!(
                followers.get(&photo.id).copied().unwrap_or(0) >= 1,
                "anchor {} has no members",
                photo.id
            );
        } else {
            assert!(
                photo.animation_filename.is_none(),
                "non-anchor {} carries an animation",
                photo.id
            );
        }
    }
}

/// `ImageService` that records calls instead of touching the filesystem
#[derive(Default)]
pub struct FakeImageService {
    compose_calls: Mutex<Vec<(Vec<String>, String)>>,
    rotations: Mutex<Vec<(String, Resolution, i32)>>,
    removed: Mutex<Vec<String>>,
    removed_animations: Mutex<Vec<String>>,
    animation_events: Mutex<Vec<String>>,
    fail_compose: AtomicBool,
    fail_rotation_at: Mutex<Option<Resolution>>,
    compose_delay: Mutex<Duration>,
    active_composes: AtomicUsize,
    max_active_composes: AtomicUsize,
}

impl FakeImageService {
    pub fn set_fail_compose(&self, fail: bool) {
        self.fail_compose.store(fail, Ordering::SeqCst);
    }

    pub fn set_compose_delay(&self, delay: Duration) {
        *self.compose_delay.lock().unwrap() = delay;
    }

    pub fn fail_rotation_at(&self, resolution: Resolution) {
        *self.fail_rotation_at.lock().unwrap() = Some(resolution);
    }

    /// Successful compositions as (frames, anchor filename)
    pub fn compose_calls(&self) -> Vec<(Vec<String>, String)> {
        self.compose_calls.lock().unwrap().clone()
    }

    pub fn last_compose(&self) -> Option<(Vec<String>, String)> {
        self.compose_calls.lock().unwrap().last().cloned()
    }

    pub fn max_concurrent_compose(&self) -> usize {
        self.max_active_composes.load(Ordering::SeqCst)
    }

    pub fn rotations(&self) -> Vec<(String, Resolution, i32)> {
        self.rotations.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn removed_animations(&self) -> Vec<String> {
        self.removed_animations.lock().unwrap().clone()
    }

    /// Animation writes and removals in the order they happened
    pub fn animation_events(&self) -> Vec<String> {
        self.animation_events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageService for FakeImageService {
    async fn ingest(&self, bytes: Vec<u8>) -> AppResult<StoredImage> {
        if bytes.is_empty() {
            return Err(AppError::Image("empty upload".to_string()));
        }
        Ok(StoredImage {
            filename: Uuid::new_v4().simple().to_string(),
            width: 640,
            height: 480,
            captured_at: None,
        })
    }

    async fn rotate(&self, filename: &str, resolution: Resolution, degrees: i32) -> AppResult<()> {
        if *self.fail_rotation_at.lock().unwrap() == Some(resolution) {
            return Err(AppError::Image(format!("cannot rotate {}", resolution)));
        }
        self.rotations
            .lock()
            .unwrap()
            .push((filename.to_string(), resolution, degrees));
        Ok(())
    }

    async fn compose_animation(&self, frames: &[String], anchor: &str) -> AppResult<String> {
        let active = self.active_composes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_composes.fetch_max(active, Ordering::SeqCst);

        let delay = *self.compose_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active_composes.fetch_sub(1, Ordering::SeqCst);

        if self.fail_compose.load(Ordering::SeqCst) {
            return Err(AppError::Image("codec failure".to_string()));
        }

        self.compose_calls
            .lock()
            .unwrap()
            .push((frames.to_vec(), anchor.to_string()));
        let name = format!("{}.gif", anchor);
        self.animation_events
            .lock()
            .unwrap()
            .push(format!("composed {}", name));
        Ok(name)
    }

    async fn remove(&self, filename: &str) -> AppResult<()> {
        self.removed.lock().unwrap().push(filename.to_string());
        Ok(())
    }

    async fn remove_animation(&self, name: &str) -> AppResult<()> {
        self.removed_animations.lock().unwrap().push(name.to_string());
        self.animation_events
            .lock()
            .unwrap()
            .push(format!("removed {}", name));
        Ok(())
    }
}

/// `Mailer` that keeps (email, code) pairs
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_code(&self, email: &str, code: &str, _subject: &str) -> AppResult<()> {
        if self.fail {
            return Err(AppError::Mail("relay unreachable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}

/// Attach device credentials the way the app sends them
pub fn with_device(request: axum_test::TestRequest, device: &Device) -> axum_test::TestRequest {
    request
        .add_header(
            HeaderName::from_static(DEVICE_ID_HEADER),
            HeaderValue::from(device.device_id),
        )
        .add_header(
            HeaderName::from_static(DEVICE_HASH_HEADER),
            HeaderValue::from_str(&device.device_hash).unwrap(),
        )
}

/// Attach account credentials the way the app sends them
pub fn with_user(request: axum_test::TestRequest, email: &str, hash: &str) -> axum_test::TestRequest {
    request
        .add_header(
            HeaderName::from_static(USERNAME_HEADER),
            HeaderValue::from_str(email).unwrap(),
        )
        .add_header(
            HeaderName::from_static(USER_HASH_HEADER),
            HeaderValue::from_str(hash).unwrap(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_db() {
        let pool = create_test_db();
        let conn = pool.get().unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='photo'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_connections_share_one_database() {
        let pool = create_test_db();
        let photo = create_test_photo(&pool, PhotoSpec::default());

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        for conn in [&a, &b] {
            let found: i64 = conn
                .query_row("SELECT COUNT(*) FROM photo WHERE id = ?", [photo.id], |row| row.get(0))
                .unwrap();
            assert_eq!(found, 1);
        }
        assert_chain_invariants(&a);
    }

    #[test]
    fn test_create_test_app() {
        let app = create_test_app(Config::default());
        assert!(app.mailer.sent().is_empty());
    }
}
