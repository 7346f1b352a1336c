use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{Delay, DynamicImage, Frame};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::config::ImageConfig;
use crate::constants::{ANIMATION_EXTENSION, PHOTO_EXTENSION};
use crate::error::{AppError, AppResult};
use crate::models::{Resolution, StoredImage};
use crate::utils::datetime::parse_datetime;

/// Storage and transformation of photo renditions and set animations.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Decodes an upload and writes all three resolutions under a fresh name.
    async fn ingest(&self, bytes: Vec<u8>) -> AppResult<StoredImage>;

    /// Rotates one stored resolution in place. `degrees` is 90 or -90.
    async fn rotate(&self, filename: &str, resolution: Resolution, degrees: i32) -> AppResult<()>;

    /// Writes an animation of `frames` in the given order, named after the
    /// anchor, and returns the stored animation name.
    async fn compose_animation(&self, frames: &[String], anchor: &str) -> AppResult<String>;

    async fn remove(&self, filename: &str) -> AppResult<()>;

    async fn remove_animation(&self, name: &str) -> AppResult<()>;
}

pub fn animation_name(anchor: &str) -> String {
    format!("{}.{}", anchor, ANIMATION_EXTENSION)
}

fn image_error(e: image::ImageError) -> AppError {
    AppError::Image(e.to_string())
}

async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Image task failed: {}", e)))?
}

fn read_capture_time(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    parse_datetime(&field.display_value().to_string())
}

/// Writes through a sibling temp file so readers never see a partial file.
/// The temp file is removed when writing fails.
fn write_atomically<F>(path: &Path, write: F) -> AppResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> AppResult<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let written = File::create(&temp_path)
        .map_err(AppError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            Ok(())
        });

    if let Err(e) = written {
        let _ = remove_if_present(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn write_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> AppResult<()> {
    write_atomically(path, |writer| {
        JpegEncoder::new_with_quality(writer, quality)
            .encode_image(&image.to_rgb8())
            .map_err(image_error)
    })
}

fn write_gif(path: &Path, frames: Vec<Frame>) -> AppResult<()> {
    write_atomically(path, |writer| {
        let mut encoder = GifEncoder::new(writer);
        encoder.set_repeat(Repeat::Infinite).map_err(image_error)?;
        encoder.encode_frames(frames).map_err(image_error)
    })
}

fn remove_if_present(path: &Path) -> AppResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `ImageService` over the local filesystem using the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageCrateService {
    photos_dir: PathBuf,
    animations_dir: PathBuf,
    config: ImageConfig,
}

impl ImageCrateService {
    pub fn new(photos_dir: &Path, animations_dir: &Path, config: &ImageConfig) -> Self {
        Self {
            photos_dir: photos_dir.to_path_buf(),
            animations_dir: animations_dir.to_path_buf(),
            config: config.clone(),
        }
    }

    pub fn photo_path(&self, filename: &str, resolution: Resolution) -> PathBuf {
        self.photos_dir
            .join(resolution.dir_name())
            .join(format!("{}.{}", filename, PHOTO_EXTENSION))
    }

    pub fn animation_path(&self, name: &str) -> PathBuf {
        self.animations_dir.join(name)
    }

    fn ingest_blocking(&self, bytes: &[u8]) -> AppResult<StoredImage> {
        let image = image::load_from_memory(bytes).map_err(image_error)?;
        let filename = Uuid::new_v4().simple().to_string();

        let written = self.write_renditions(&image, &filename);
        if let Err(e) = written {
            for resolution in Resolution::ALL {
                let _ = remove_if_present(&self.photo_path(&filename, resolution));
            }
            return Err(e);
        }

        Ok(StoredImage {
            filename,
            width: image.width(),
            height: image.height(),
            captured_at: read_capture_time(bytes),
        })
    }

    fn write_renditions(&self, image: &DynamicImage, filename: &str) -> AppResult<()> {
        let quality = self.config.quality;
        write_jpeg(image, &self.photo_path(filename, Resolution::Full), quality)?;

        let medium = image.thumbnail(self.config.medium_size, self.config.medium_size);
        write_jpeg(&medium, &self.photo_path(filename, Resolution::Medium), quality)?;

        let small = medium.thumbnail(self.config.small_size, self.config.small_size);
        write_jpeg(&small, &self.photo_path(filename, Resolution::Small), quality)?;

        Ok(())
    }

    fn rotate_blocking(&self, filename: &str, resolution: Resolution, degrees: i32) -> AppResult<()> {
        let path = self.photo_path(filename, resolution);
        let image = image::open(&path).map_err(image_error)?;

        let rotated = match degrees {
            90 => image.rotate90(),
            -90 => image.rotate270(),
            other => {
                return Err(AppError::BadRequest(format!(
                    "Unsupported rotation: {}",
                    other
                )))
            }
        };

        write_jpeg(&rotated, &path, self.config.quality)
    }

    fn compose_blocking(&self, frames: &[String], anchor: &str) -> AppResult<String> {
        if frames.is_empty() {
            return Err(AppError::Image("No frames to compose".to_string()));
        }

        let delay = Delay::from_numer_denom_ms(self.config.animation_frame_delay_ms, 1);
        let mut size: Option<(u32, u32)> = None;
        let mut encoded = Vec::with_capacity(frames.len());

        for filename in frames {
            let image = image::open(self.photo_path(filename, Resolution::Medium))
                .map_err(image_error)?;
            let (width, height) = *size.get_or_insert((image.width(), image.height()));

            let buffer = if image.width() == width && image.height() == height {
                image.to_rgba8()
            } else {
                image.resize_exact(width, height, FilterType::Triangle).to_rgba8()
            };
            encoded.push(Frame::from_parts(buffer, 0, 0, delay));
        }

        let name = animation_name(anchor);
        write_gif(&self.animation_path(&name), encoded)?;

        debug!("Composed {} from {} frames", name, frames.len());
        Ok(name)
    }
}

#[async_trait]
impl ImageService for ImageCrateService {
    async fn ingest(&self, bytes: Vec<u8>) -> AppResult<StoredImage> {
        let service = self.clone();
        blocking(move || service.ingest_blocking(&bytes)).await
    }

    async fn rotate(&self, filename: &str, resolution: Resolution, degrees: i32) -> AppResult<()> {
        let service = self.clone();
        let filename = filename.to_string();
        blocking(move || service.rotate_blocking(&filename, resolution, degrees)).await
    }

    async fn compose_animation(&self, frames: &[String], anchor: &str) -> AppResult<String> {
        let service = self.clone();
        let frames = frames.to_vec();
        let anchor = anchor.to_string();
        blocking(move || service.compose_blocking(&frames, &anchor)).await
    }

    async fn remove(&self, filename: &str) -> AppResult<()> {
        for resolution in Resolution::ALL {
            match tokio::fs::remove_file(self.photo_path(filename, resolution)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn remove_animation(&self, name: &str) -> AppResult<()> {
        let path = self.animation_path(name);
        blocking(move || remove_if_present(&path)).await
    }
}
