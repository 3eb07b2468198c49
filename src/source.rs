//! Source Image - Loading and Read-Only Bitmap
//!
//! The decoded bitmap is written once by the load step and shared read-only
//! (preview and export may both hold it). A failed load never touches the
//! previously loaded image.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;
use uuid::Uuid;

use crate::geometry::Size;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Failed to read image: {0}")]
    Io(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Image has zero width or height")]
    EmptyImage,

    #[error("Nothing to load")]
    NoOrigin,

    #[error("Load task failed: {0}")]
    TaskFailed(String),
}

impl From<image::ImageError> for LoadError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => LoadError::Io(io.to_string()),
            other => LoadError::Decode(other.to_string()),
        }
    }
}

/// Decoded logo with both its true and on-screen pixel sizes.
#[derive(Clone)]
pub struct SourceImage {
    id: Uuid,
    pixels: Arc<RgbaImage>,
    display: Size,
}

impl SourceImage {
    /// `display` defaults to the natural size.
    pub fn new(pixels: RgbaImage, display: Option<Size>) -> Result<Self, LoadError> {
        let (w, h) = pixels.dimensions();
        if w == 0 || h == 0 {
            return Err(LoadError::EmptyImage);
        }
        let natural = Size::new(f64::from(w), f64::from(h));
        let display = display.filter(|d| !d.is_empty()).unwrap_or(natural);
        Ok(Self {
            id: Uuid::new_v4(),
            pixels: Arc::new(pixels),
            display,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn natural_size(&self) -> Size {
        let (w, h) = self.pixels.dimensions();
        Size::new(f64::from(w), f64::from(h))
    }

    pub fn display_size(&self) -> Size {
        self.display
    }

    /// `(natural / display)` per axis.
    pub fn scale_factors(&self) -> (f64, f64) {
        let n = self.natural_size();
        (n.width / self.display.width, n.height / self.display.height)
    }

    /// Same bitmap and identity, new on-screen size.
    pub fn with_display(&self, display: Size) -> Self {
        Self {
            id: self.id,
            pixels: Arc::clone(&self.pixels),
            display: if display.is_empty() { self.display } else { display },
        }
    }
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.pixels.dimensions();
        f.debug_struct("SourceImage")
            .field("id", &self.id)
            .field("natural", &(w, h))
            .field("display", &self.display)
            .finish()
    }
}

#[derive(Clone)]
pub enum ImageOrigin {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl fmt::Debug for ImageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageOrigin::Path(p) => f.debug_tuple("Path").field(p).finish(),
            ImageOrigin::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

pub fn decode(origin: &ImageOrigin, display: Option<Size>) -> Result<SourceImage, LoadError> {
    let img = match origin {
        ImageOrigin::Path(path) => image::open(path)?,
        ImageOrigin::Bytes(bytes) => image::load_from_memory(bytes)?,
    };
    SourceImage::new(img.to_rgba8(), display)
}

#[derive(Debug, Clone, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded(Arc<SourceImage>),
    Failed(LoadError),
}

impl LoadState {
    pub fn image(&self) -> Option<&Arc<SourceImage>> {
        match self {
            LoadState::Loaded(img) => Some(img),
            _ => None,
        }
    }
}

/// One-shot load of an uploaded logo with explicit retry.
#[derive(Debug, Default)]
pub struct SourceSlot {
    origin: Option<ImageOrigin>,
    display: Option<Size>,
    state: LoadState,
    attempts: u32,
}

impl SourceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records what to load and moves to `Loading`.
    pub fn begin(&mut self, origin: ImageOrigin, display: Option<Size>) {
        self.origin = Some(origin);
        self.display = display;
        self.attempts = 0;
        self.state = LoadState::Loading;
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&mut self) -> &LoadState {
        let result = match &self.origin {
            Some(origin) => decode(origin, self.display),
            None => Err(LoadError::NoOrigin),
        };
        self.finish(result)
    }

    /// Decodes on the blocking pool; the slot stays `Loading` meanwhile.
    pub async fn load_async(&mut self) -> &LoadState {
        let Some(origin) = self.origin.clone() else {
            return self.finish(Err(LoadError::NoOrigin));
        };
        self.state = LoadState::Loading;
        let display = self.display;
        let result = tokio::task::spawn_blocking(move || decode(&origin, display))
            .await
            .unwrap_or_else(|e| Err(LoadError::TaskFailed(e.to_string())));
        self.finish(result)
    }

    /// Re-issues a failed load. Other states are returned unchanged.
    pub fn retry(&mut self) -> &LoadState {
        if matches!(self.state, LoadState::Failed(_)) {
            tracing::info!(attempt = self.attempts + 1, "retrying image load");
            self.state = LoadState::Loading;
            return self.load();
        }
        &self.state
    }

    fn finish(&mut self, result: Result<SourceImage, LoadError>) -> &LoadState {
        self.attempts += 1;
        self.state = match result {
            Ok(img) => {
                tracing::debug!(image = ?img, "image loaded");
                LoadState::Loaded(Arc::new(img))
            }
            Err(e) => {
                tracing::warn!(error = %e, attempts = self.attempts, "image load failed");
                LoadState::Failed(e)
            }
        };
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Arc<[u8]> {
        let img = RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf.into()
    }

    #[test]
    fn test_scale_factors() {
        let img = SourceImage::new(RgbaImage::new(2000, 1000), Some(Size::new(500.0, 250.0))).unwrap();
        assert_eq!(img.scale_factors(), (4.0, 4.0));
        let same = img.with_display(Size::new(1000.0, 500.0));
        assert_eq!(same.id(), img.id());
        assert_eq!(same.scale_factors(), (2.0, 2.0));
    }

    #[test]
    fn test_empty_image_rejected() {
        assert_eq!(SourceImage::new(RgbaImage::new(0, 10), None).unwrap_err(), LoadError::EmptyImage);
    }

    #[test]
    fn test_load_from_bytes() {
        let mut slot = SourceSlot::new();
        slot.begin(ImageOrigin::Bytes(png_bytes(40, 20)), None);
        let state = slot.load();
        let img = state.image().unwrap();
        assert_eq!(img.natural_size(), Size::new(40.0, 20.0));
        assert_eq!(img.display_size(), Size::new(40.0, 20.0));
    }

    #[test]
    fn test_failed_load_then_retry() {
        let mut slot = SourceSlot::new();
        slot.begin(ImageOrigin::Bytes(Arc::from(&b"not an image"[..])), None);
        assert!(matches!(slot.load(), LoadState::Failed(LoadError::Decode(_))));
        assert!(matches!(slot.retry(), LoadState::Failed(_)));
        assert_eq!(slot.attempts(), 2);
    }

    #[test]
    fn test_retry_is_noop_when_loaded() {
        let mut slot = SourceSlot::new();
        slot.begin(ImageOrigin::Bytes(png_bytes(4, 4)), None);
        slot.load();
        slot.retry();
        assert_eq!(slot.attempts(), 1);
    }

    #[tokio::test]
    async fn test_load_async() {
        let mut slot = SourceSlot::new();
        slot.begin(ImageOrigin::Bytes(png_bytes(8, 6)), Some(Size::new(4.0, 3.0)));
        let state = slot.load_async().await;
        assert_eq!(state.image().unwrap().scale_factors(), (2.0, 2.0));
    }

    #[test]
    fn test_missing_file() {
        let mut slot = SourceSlot::new();
        slot.begin(ImageOrigin::Path(PathBuf::from("/nonexistent/logo.png")), None);
        assert!(matches!(slot.load(), LoadState::Failed(LoadError::Io(_))));
    }
}
