use once_cell::sync::Lazy;
use std::path::PathBuf;

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("PHOTOSET_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/data"))
});

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("config.yaml"));
pub static DATABASE_PATH: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("database.sqlite"));
pub static PHOTOS_DIR: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("photos"));
pub static ANIMATIONS_DIR: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("animations"));

/// Upper bound (exclusive) for validation codes; codes are zero-padded to 5 digits.
pub const VALIDATION_CODE_RANGE: u32 = 99_999;
pub const VALIDATION_CODE_WIDTH: usize = 5;
pub const USER_HASH_LENGTH: usize = 43;

pub const DESCRIPTION_MAX_CHARS: usize = 400;
pub const LIST_LIMIT_MAX: i64 = 500;

pub const DEFAULT_DEVICE_ID_OFFSET: i64 = 1000;
pub const DEFAULT_MAX_RETRIES: i64 = 5;
pub const DEFAULT_MEDIUM_SIZE: u32 = 1024;
pub const DEFAULT_SMALL_SIZE: u32 = 256;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_FRAME_DELAY_MS: u32 = 500;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub const PHOTO_EXTENSION: &str = "jpg";
pub const ANIMATION_EXTENSION: &str = "gif";
