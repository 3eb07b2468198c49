//! Crop Engine - Aspect-Locked Cropping
//!
//! Owns the working crop rectangle for one source image. Regions are kept in
//! the image's display-pixel space; the exporter maps them to natural pixels.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::CropCoverage;
use crate::events::{ChangeBus, ChangeEvent, ChangeSource};
use crate::geometry::{clamp, CardGeometry, Size};

/// Slack allowed when comparing a requested size to the image bounds.
const BOUNDS_EPSILON: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CropError {
    #[error("Invalid crop region {width}x{height} for image {image_width}x{image_height}")]
    InvalidRegion {
        width: f64,
        height: f64,
        image_width: f64,
        image_height: f64,
    },

    #[error("No image loaded for cropping")]
    NoImage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropMode {
    Full,
    #[default]
    Fit,
    Center,
    /// Aspect lock released; the current rectangle is kept as-is.
    Free,
}

/// Coordinate space a `CropRegion` is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropSpace {
    #[default]
    DisplayPixels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRegion {
    pub source_image_id: Uuid,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub aspect_locked: bool,
    #[serde(default)]
    pub space: CropSpace,
}

impl CropRegion {
    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn rect(&self) -> CropRect {
        CropRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// User-requested rectangle, before clamping and aspect enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Largest rectangle of aspect `aspect` that fits `bounds`, scaled by
/// `percent` and centered. Returns `(x, y, width, height)`.
pub fn centered_rect(bounds: Size, aspect: f64, percent: f64) -> (f64, f64, f64, f64) {
    let percent = clamp(percent, 0.0, 1.0);
    let (max_w, max_h) = if bounds.aspect() > aspect {
        (bounds.height * aspect, bounds.height)
    } else {
        (bounds.width, bounds.width / aspect)
    };
    let w = max_w * percent;
    let h = max_h * percent;
    ((bounds.width - w) / 2.0, (bounds.height - h) / 2.0, w, h)
}

#[derive(Debug)]
struct ImageFrame {
    id: Uuid,
    display: Size,
}

#[derive(Debug)]
pub struct CropEngine {
    aspect: f64,
    coverage: CropCoverage,
    mode: CropMode,
    image: Option<ImageFrame>,
    region: Option<CropRegion>,
    bus: ChangeBus,
}

impl CropEngine {
    pub fn new(geometry: &CardGeometry, coverage: CropCoverage, bus: ChangeBus) -> Self {
        Self {
            aspect: geometry.aspect_ratio(),
            coverage,
            mode: CropMode::default(),
            image: None,
            region: None,
            bus,
        }
    }

    pub fn region(&self) -> Option<&CropRegion> {
        self.region.as_ref()
    }

    pub fn mode(&self) -> CropMode {
        self.mode
    }

    pub fn display_size(&self) -> Option<Size> {
        self.image.as_ref().map(|f| f.display)
    }

    /// Centers an aspect-locked rectangle covering `width_percent` of the
    /// largest card-shaped rectangle that fits the image. Resets the mode.
    pub fn initialize_crop(
        &mut self,
        image_id: Uuid,
        display: Size,
        width_percent: f64,
    ) -> Result<CropRegion, CropError> {
        if display.is_empty() || !(width_percent > 0.0) {
            tracing::warn!(width_percent, "rejected initial crop");
            return Err(CropError::InvalidRegion {
                width: display.width * width_percent,
                height: display.height * width_percent,
                image_width: display.width,
                image_height: display.height,
            });
        }
        let (x, y, width, height) = centered_rect(display, self.aspect, width_percent);
        let region = CropRegion {
            source_image_id: image_id,
            x,
            y,
            width,
            height,
            aspect_locked: true,
            space: CropSpace::DisplayPixels,
        };
        self.image = Some(ImageFrame { id: image_id, display });
        self.mode = CropMode::default();
        self.commit(region, "initialize_crop")
    }

    /// Re-centers using the coverage of `mode`. `Free` keeps the current
    /// rectangle and only releases the aspect lock.
    pub fn set_mode(&mut self, mode: CropMode) -> Result<CropRegion, CropError> {
        let frame = self.image.as_ref().ok_or(CropError::NoImage)?;
        let percent = match mode {
            CropMode::Full => self.coverage.full,
            CropMode::Fit => self.coverage.fit,
            CropMode::Center => self.coverage.center,
            CropMode::Free => {
                let mut region = self.region.clone().ok_or(CropError::NoImage)?;
                region.aspect_locked = false;
                self.mode = mode;
                return self.commit(region, "set_mode");
            }
        };
        let (x, y, width, height) = centered_rect(frame.display, self.aspect, percent);
        let region = CropRegion {
            source_image_id: frame.id,
            x,
            y,
            width,
            height,
            aspect_locked: true,
            space: CropSpace::DisplayPixels,
        };
        self.mode = mode;
        self.commit(region, "set_mode")
    }

    /// Applies a user resize/move. On rejection the previous region stays.
    pub fn update_region(&mut self, requested: CropRect) -> Result<CropRegion, CropError> {
        let frame = self.image.as_ref().ok_or(CropError::NoImage)?;
        let current = self.region.as_ref().ok_or(CropError::NoImage)?;
        let bounds = frame.display;

        // a locked region derives its height from the width
        let too_small = !(requested.width > 0.0 && requested.height > 0.0);
        let too_large = requested.width > bounds.width + BOUNDS_EPSILON
            || (!current.aspect_locked && requested.height > bounds.height + BOUNDS_EPSILON);
        if too_small || too_large {
            tracing::warn!(
                width = requested.width,
                height = requested.height,
                "rejected crop region"
            );
            return Err(CropError::InvalidRegion {
                width: requested.width,
                height: requested.height,
                image_width: bounds.width,
                image_height: bounds.height,
            });
        }

        let (mut width, mut height) = (
            requested.width.min(bounds.width),
            requested.height.min(bounds.height),
        );
        if current.aspect_locked {
            height = width / self.aspect;
            if height > bounds.height {
                height = bounds.height;
                width = height * self.aspect;
            }
        }

        let region = CropRegion {
            source_image_id: current.source_image_id,
            x: clamp(requested.x, 0.0, bounds.width - width),
            y: clamp(requested.y, 0.0, bounds.height - height),
            width,
            height,
            aspect_locked: current.aspect_locked,
            space: current.space,
        };
        self.commit(region, "update_region")
    }

    /// Rescales the region when the on-screen size of the image changes.
    pub fn rescale_display(&mut self, display: Size) -> Result<Option<CropRegion>, CropError> {
        let frame = self.image.as_mut().ok_or(CropError::NoImage)?;
        if display.is_empty() {
            return Err(CropError::InvalidRegion {
                width: display.width,
                height: display.height,
                image_width: display.width,
                image_height: display.height,
            });
        }
        let sx = display.width / frame.display.width;
        let sy = display.height / frame.display.height;
        frame.display = display;
        let Some(current) = self.region.clone() else {
            return Ok(None);
        };
        let mut region = CropRegion {
            x: current.x * sx,
            y: current.y * sy,
            width: current.width * sx,
            height: current.height * sy,
            ..current
        };
        if region.aspect_locked {
            region.width = region.width.min(display.width);
            region.height = region.width / self.aspect;
            if region.height > display.height {
                region.height = display.height;
                region.width = region.height * self.aspect;
            }
        }
        region.x = clamp(region.x, 0.0, display.width - region.width);
        region.y = clamp(region.y, 0.0, display.height - region.height);
        self.commit(region, "rescale_display").map(Some)
    }

    /// Back to the default mode's centered region.
    pub fn reset(&mut self) -> Result<CropRegion, CropError> {
        self.set_mode(CropMode::default())
    }

    /// Drops the image and region, e.g. before a new upload.
    pub fn clear(&mut self) {
        self.image = None;
        if self.region.take().is_some() {
            self.bus.emit(ChangeEvent::new(ChangeSource::Crop, "clear"));
        }
    }

    fn commit(&mut self, region: CropRegion, operation: &'static str) -> Result<CropRegion, CropError> {
        tracing::debug!(
            operation,
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            locked = region.aspect_locked,
            "crop updated"
        );
        self.region = Some(region.clone());
        self.bus.emit(ChangeEvent::new(ChangeSource::Crop, operation));
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CropEngine {
        CropEngine::new(&CardGeometry::cr80(), CropCoverage::default(), ChangeBus::new())
    }

    #[test]
    fn test_initialize_square_image() {
        let mut e = engine();
        let r = e.initialize_crop(Uuid::new_v4(), Size::new(1200.0, 1200.0), 0.95).unwrap();
        assert!((r.width - 1140.0).abs() < 1e-9);
        assert!((r.aspect() - 85.6 / 54.0).abs() < 1e-9);
        assert!((r.x - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_initialize_wide_image_limited_by_height() {
        let mut e = engine();
        let r = e.initialize_crop(Uuid::new_v4(), Size::new(4000.0, 1000.0), 1.0).unwrap();
        assert!((r.height - 1000.0).abs() < 1e-9);
        assert!((r.y).abs() < 1e-9);
    }

    #[test]
    fn test_set_mode_recenters() {
        let mut e = engine();
        e.initialize_crop(Uuid::new_v4(), Size::new(1000.0, 1000.0), 0.5).unwrap();
        let full = e.set_mode(CropMode::Full).unwrap();
        assert!((full.width - 980.0).abs() < 1e-9);
        let center = e.set_mode(CropMode::Center).unwrap();
        assert!((center.width - 680.0).abs() < 1e-9);
        assert!(((center.x + center.width / 2.0) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_free_mode_unlocks_and_keeps_rect() {
        let mut e = engine();
        let before = e.initialize_crop(Uuid::new_v4(), Size::new(800.0, 600.0), 0.8).unwrap();
        let free = e.set_mode(CropMode::Free).unwrap();
        assert!(!free.aspect_locked);
        assert_eq!(free.rect(), before.rect());

        let r = e
            .update_region(CropRect { x: 10.0, y: 10.0, width: 300.0, height: 300.0 })
            .unwrap();
        assert_eq!(r.width, r.height);
    }

    #[test]
    fn test_update_region_enforces_aspect_and_bounds() {
        let mut e = engine();
        e.initialize_crop(Uuid::new_v4(), Size::new(1000.0, 800.0), 0.8).unwrap();
        let r = e
            .update_region(CropRect { x: 900.0, y: -50.0, width: 400.0, height: 10.0 })
            .unwrap();
        assert!((r.aspect() - 85.6 / 54.0).abs() < 1e-3);
        assert!(r.x + r.width <= 1000.0 + 1e-9);
        assert!(r.y >= 0.0);
    }

    #[test]
    fn test_update_region_rejects_and_keeps_previous() {
        let mut e = engine();
        let before = e.initialize_crop(Uuid::new_v4(), Size::new(1000.0, 800.0), 0.8).unwrap();
        let err = e.update_region(CropRect { x: 0.0, y: 0.0, width: 0.0, height: 100.0 });
        assert!(matches!(err, Err(CropError::InvalidRegion { .. })));
        let err = e.update_region(CropRect { x: 0.0, y: 0.0, width: 1200.0, height: 100.0 });
        assert!(err.is_err());
        assert_eq!(e.region(), Some(&before));
    }

    #[test]
    fn test_locked_update_ignores_oversized_height() {
        let mut e = engine();
        e.initialize_crop(Uuid::new_v4(), Size::new(900.0, 700.0), 0.8).unwrap();
        let r = e
            .update_region(CropRect { x: 0.0, y: 0.0, width: 100.0, height: 701.0 })
            .unwrap();
        assert_eq!(r.width, 100.0);
        assert!((r.height - 100.0 / (85.6 / 54.0)).abs() < 1e-9);
    }

    #[test]
    fn test_free_update_rejects_oversized_height() {
        let mut e = engine();
        e.initialize_crop(Uuid::new_v4(), Size::new(900.0, 700.0), 0.8).unwrap();
        let before = e.set_mode(CropMode::Free).unwrap();
        let err = e.update_region(CropRect { x: 0.0, y: 0.0, width: 100.0, height: 701.0 });
        assert!(matches!(err, Err(CropError::InvalidRegion { .. })));
        assert_eq!(e.region(), Some(&before));
    }

    #[test]
    fn test_initialize_rejects_degenerate_percent() {
        let mut e = engine();
        for pct in [0.0, -0.5, f64::NAN] {
            let err = e.initialize_crop(Uuid::new_v4(), Size::new(800.0, 600.0), pct);
            assert!(matches!(err, Err(CropError::InvalidRegion { .. })), "{}", pct);
        }
        assert!(e.region().is_none());
    }

    #[test]
    fn test_set_mode_without_image() {
        let mut e = engine();
        assert_eq!(e.set_mode(CropMode::Full), Err(CropError::NoImage));
    }

    #[test]
    fn test_rescale_display_keeps_lock() {
        let mut e = engine();
        e.initialize_crop(Uuid::new_v4(), Size::new(1000.0, 1000.0), 0.9).unwrap();
        let r = e.rescale_display(Size::new(500.0, 500.0)).unwrap().unwrap();
        assert!((r.width - 450.0).abs() < 1e-9);
        assert!((r.aspect() - 85.6 / 54.0).abs() < 1e-9);
    }

    #[test]
    fn test_rescale_display_squeezed_stays_inside() {
        let mut e = engine();
        e.initialize_crop(Uuid::new_v4(), Size::new(1000.0, 1000.0), 1.0).unwrap();
        let r = e.rescale_display(Size::new(1000.0, 300.0)).unwrap().unwrap();
        assert!((r.height - 300.0).abs() < 1e-9);
        assert!((r.aspect() - 85.6 / 54.0).abs() < 1e-9);
        assert!(r.y >= 0.0 && r.x + r.width <= 1000.0 + 1e-9);
    }
}
