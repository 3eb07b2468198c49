//! Engine Tunables
//!
//! Product- or deployment-specific constants. Nothing in the engines
//! hard-codes these; every value below has a serde default so product files
//! only name what they override.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{clamp, NormRect, Point};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Grid size must be positive, got {0}")]
    InvalidGridSize(f64),

    #[error("Snap threshold must not be negative, got {0}")]
    InvalidSnapThreshold(f64),

    #[error("Range `{0}` is inverted: min {1} > max {2}")]
    InvertedRange(&'static str, f64, f64),

    #[error("Drag bounds are empty")]
    EmptyDragBounds,

    #[error("Crop coverage `{0}` must be in (0, 1], got {1}")]
    InvalidCoverage(&'static str, f64),
}

/// Closed interval used for clamping scalar controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        clamp(v, self.min, self.max)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Anchor coordinates for each corner/center preset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetTable {
    #[serde(default = "default_center")]
    pub center: Point,
    #[serde(default = "default_top_left")]
    pub top_left: Point,
    #[serde(default = "default_top_right")]
    pub top_right: Point,
    #[serde(default = "default_bottom_left")]
    pub bottom_left: Point,
    #[serde(default = "default_bottom_right")]
    pub bottom_right: Point,
}

fn default_center() -> Point { Point::new(0.5, 0.5) }
fn default_top_left() -> Point { Point::new(0.25, 0.30) }
fn default_top_right() -> Point { Point::new(0.75, 0.30) }
fn default_bottom_left() -> Point { Point::new(0.25, 0.70) }
fn default_bottom_right() -> Point { Point::new(0.75, 0.70) }

impl Default for PresetTable {
    fn default() -> Self {
        Self {
            center: default_center(),
            top_left: default_top_left(),
            top_right: default_top_right(),
            bottom_left: default_bottom_left(),
            bottom_right: default_bottom_right(),
        }
    }
}

/// Fraction of the usable image area each crop mode covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropCoverage {
    #[serde(default = "default_cov_full")]
    pub full: f64,
    #[serde(default = "default_cov_fit")]
    pub fit: f64,
    #[serde(default = "default_cov_center")]
    pub center: f64,
}

fn default_cov_full() -> f64 { 0.98 }
fn default_cov_fit() -> f64 { 0.85 }
fn default_cov_center() -> f64 { 0.68 }

impl Default for CropCoverage {
    fn default() -> Self {
        Self {
            full: default_cov_full(),
            fit: default_cov_fit(),
            center: default_cov_center(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineTunables {
    /// Grid pitch in normalized card units.
    #[serde(default = "default_grid_size")]
    pub grid_size: f64,
    /// Maximum distance from a grid line at which soft snap engages.
    #[serde(default = "default_snap_threshold")]
    pub snap_threshold: f64,
    #[serde(default = "default_scale_range")]
    pub scale_range: Range,
    #[serde(default = "default_opacity_range")]
    pub opacity_range: Range,
    /// Outer limit for the logo anchor; intersected with the safe zone at use.
    #[serde(default = "default_drag_bounds")]
    pub drag_bounds: NormRect,
    #[serde(default)]
    pub presets: PresetTable,
    #[serde(default)]
    pub crop_coverage: CropCoverage,
    /// Logo width at scale 1.0, as a fraction of the trim width.
    #[serde(default = "default_logo_base_width")]
    pub logo_base_width: f64,
    /// Largest raster surface the exporter will allocate.
    #[serde(default = "default_max_surface_pixels")]
    pub max_surface_pixels: u64,
    #[serde(default = "default_aspect_tolerance")]
    pub aspect_tolerance: f64,
}

fn default_grid_size() -> f64 { 0.05 }
fn default_snap_threshold() -> f64 { 0.015 }
fn default_scale_range() -> Range { Range::new(0.5, 1.5) }
fn default_opacity_range() -> Range { Range::new(0.0, 1.0) }
fn default_drag_bounds() -> NormRect { NormRect::new(0.15, 0.20, 0.85, 0.80) }
fn default_logo_base_width() -> f64 { 0.30 }
fn default_max_surface_pixels() -> u64 { 16_384 * 16_384 }
fn default_aspect_tolerance() -> f64 { 1e-3 }

impl Default for EngineTunables {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            snap_threshold: default_snap_threshold(),
            scale_range: default_scale_range(),
            opacity_range: default_opacity_range(),
            drag_bounds: default_drag_bounds(),
            presets: PresetTable::default(),
            crop_coverage: CropCoverage::default(),
            logo_base_width: default_logo_base_width(),
            max_surface_pixels: default_max_surface_pixels(),
            aspect_tolerance: default_aspect_tolerance(),
        }
    }
}

impl EngineTunables {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.grid_size > 0.0) {
            return Err(ConfigError::InvalidGridSize(self.grid_size));
        }
        if !(self.snap_threshold >= 0.0) {
            return Err(ConfigError::InvalidSnapThreshold(self.snap_threshold));
        }
        for (name, r) in [("scaleRange", self.scale_range), ("opacityRange", self.opacity_range)] {
            if !(r.min <= r.max) {
                return Err(ConfigError::InvertedRange(name, r.min, r.max));
            }
        }
        if !(self.drag_bounds.width() > 0.0 && self.drag_bounds.height() > 0.0) {
            return Err(ConfigError::EmptyDragBounds);
        }
        let cov = &self.crop_coverage;
        for (name, v) in [("full", cov.full), ("fit", cov.fit), ("center", cov.center)] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(ConfigError::InvalidCoverage(name, v));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(EngineTunables::default().validate(), Ok(()));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let t: EngineTunables = serde_json::from_str(r#"{"gridSize": 0.1}"#).unwrap();
        assert_eq!(t.grid_size, 0.1);
        assert_eq!(t.snap_threshold, 0.015);
        assert_eq!(t.presets.top_left, Point::new(0.25, 0.30));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let t = EngineTunables {
            scale_range: Range::new(2.0, 1.0),
            ..Default::default()
        };
        assert!(matches!(t.validate(), Err(ConfigError::InvertedRange("scaleRange", ..))));
    }
}
