//! Card Geometry - Shared Coordinate Frame
//!
//! Physical card model in millimeters plus the normalized zone rectangles
//! derived from it. Normalized space maps the trim edge to [0,1] on both axes;
//! the bleed rectangle therefore extends slightly outside that range.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MM_PER_INCH: f64 = 25.4;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Card dimensions must be positive, got {0}x{1} mm")]
    NonPositiveSize(f64, f64),

    #[error("Bleed must not be negative, got {0} mm")]
    NegativeBleed(f64),

    #[error("Safe zone {0} mm must be >= 0 and below {1} mm")]
    SafeZoneOutOfRange(f64, f64),

    #[error("Corner radius must not be negative, got {0} mm")]
    NegativeCornerRadius(f64),
}

/// Width/height pair, in whatever unit the owner documents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in normalized card space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl NormRect {
    pub const UNIT: NormRect = NormRect {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 1.0,
        max_y: 1.0,
    };

    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn contains_rect(&self, other: &NormRect) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Overlap of two rectangles, `None` when they do not intersect.
    pub fn intersect(&self, other: &NormRect) -> Option<NormRect> {
        let r = NormRect {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        };
        (r.min_x <= r.max_x && r.min_y <= r.max_y).then_some(r)
    }

    pub fn clamp_point(&self, p: Point) -> Point {
        Point {
            x: clamp(p.x, self.min_x, self.max_x),
            y: clamp(p.y, self.min_y, self.max_y),
        }
    }
}

/// `max(lo, min(hi, v))`; NaN collapses to `lo`.
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        return lo;
    }
    lo.max(hi.min(v))
}

pub fn mm_to_px(mm: f64, dpi: u32) -> f64 {
    mm / MM_PER_INCH * f64::from(dpi)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCardGeometry {
    width_mm: f64,
    height_mm: f64,
    #[serde(default)]
    bleed_mm: f64,
    #[serde(default)]
    safe_zone_mm: f64,
    #[serde(default)]
    corner_radius_mm: f64,
}

impl TryFrom<RawCardGeometry> for CardGeometry {
    type Error = GeometryError;

    fn try_from(raw: RawCardGeometry) -> Result<Self, Self::Error> {
        CardGeometry::new(
            raw.width_mm,
            raw.height_mm,
            raw.bleed_mm,
            raw.safe_zone_mm,
            raw.corner_radius_mm,
        )
    }
}

/// Physical card substrate. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCardGeometry")]
pub struct CardGeometry {
    width_mm: f64,
    height_mm: f64,
    bleed_mm: f64,
    safe_zone_mm: f64,
    corner_radius_mm: f64,
}

impl CardGeometry {
    pub fn new(
        width_mm: f64,
        height_mm: f64,
        bleed_mm: f64,
        safe_zone_mm: f64,
        corner_radius_mm: f64,
    ) -> Result<Self, GeometryError> {
        if !(width_mm > 0.0 && height_mm > 0.0) {
            return Err(GeometryError::NonPositiveSize(width_mm, height_mm));
        }
        if !(bleed_mm >= 0.0) {
            return Err(GeometryError::NegativeBleed(bleed_mm));
        }
        let limit = width_mm.min(height_mm) / 2.0;
        if !(safe_zone_mm >= 0.0 && safe_zone_mm < limit) {
            return Err(GeometryError::SafeZoneOutOfRange(safe_zone_mm, limit));
        }
        if !(corner_radius_mm >= 0.0) {
            return Err(GeometryError::NegativeCornerRadius(corner_radius_mm));
        }
        Ok(Self {
            width_mm,
            height_mm,
            bleed_mm,
            safe_zone_mm,
            corner_radius_mm,
        })
    }

    /// ISO/IEC 7810 ID-1 (CR80) card with 2 mm bleed and 3 mm safe zone.
    pub fn cr80() -> Self {
        Self {
            width_mm: 85.6,
            height_mm: 54.0,
            bleed_mm: 2.0,
            safe_zone_mm: 3.0,
            corner_radius_mm: 3.18,
        }
    }

    pub fn width_mm(&self) -> f64 {
        self.width_mm
    }

    pub fn height_mm(&self) -> f64 {
        self.height_mm
    }

    pub fn bleed_mm(&self) -> f64 {
        self.bleed_mm
    }

    pub fn safe_zone_mm(&self) -> f64 {
        self.safe_zone_mm
    }

    pub fn corner_radius_mm(&self) -> f64 {
        self.corner_radius_mm
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width_mm / self.height_mm
    }

    /// Safe-zone margin as a fraction of each axis, `(x, y)`.
    pub fn safe_zone_percent(&self) -> (f64, f64) {
        (self.safe_zone_mm / self.width_mm, self.safe_zone_mm / self.height_mm)
    }

    /// Bleed margin as a fraction of each axis, `(x, y)`.
    pub fn bleed_percent(&self) -> (f64, f64) {
        (self.bleed_mm / self.width_mm, self.bleed_mm / self.height_mm)
    }

    pub fn trim_rect(&self) -> NormRect {
        NormRect::UNIT
    }

    pub fn safe_zone_rect(&self) -> NormRect {
        let (sx, sy) = self.safe_zone_percent();
        NormRect::new(sx, sy, 1.0 - sx, 1.0 - sy)
    }

    pub fn bleed_rect(&self) -> NormRect {
        let (bx, by) = self.bleed_percent();
        NormRect::new(-bx, -by, 1.0 + bx, 1.0 + by)
    }

    /// Trim size in whole pixels at `dpi`.
    pub fn trim_px(&self, dpi: u32) -> (u32, u32) {
        (
            mm_to_px(self.width_mm, dpi).round() as u32,
            mm_to_px(self.height_mm, dpi).round() as u32,
        )
    }

    /// Trim plus bleed on every side, in whole pixels at `dpi`.
    pub fn bleed_px(&self, dpi: u32) -> (u32, u32) {
        (
            mm_to_px(self.width_mm + 2.0 * self.bleed_mm, dpi).round() as u32,
            mm_to_px(self.height_mm + 2.0 * self.bleed_mm, dpi).round() as u32,
        )
    }
}

impl Default for CardGeometry {
    fn default() -> Self {
        Self::cr80()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr80_aspect() {
        let g = CardGeometry::cr80();
        assert!((g.aspect_ratio() - 1.5852).abs() < 1e-3);
    }

    #[test]
    fn test_safe_zone_rect_inside_trim() {
        let g = CardGeometry::cr80();
        let safe = g.safe_zone_rect();
        assert!(g.trim_rect().contains_rect(&safe));
        assert!((safe.min_x - 3.0 / 85.6).abs() < 1e-12);
        assert!((safe.max_y - (1.0 - 3.0 / 54.0)).abs() < 1e-12);
    }

    #[test]
    fn test_bleed_rect_outside_trim() {
        let g = CardGeometry::cr80();
        assert!(g.bleed_rect().contains_rect(&g.trim_rect()));
    }

    #[test]
    fn test_safe_zone_invariant_rejected() {
        assert!(matches!(
            CardGeometry::new(85.6, 54.0, 2.0, 27.0, 0.0),
            Err(GeometryError::SafeZoneOutOfRange(..))
        ));
        assert!(CardGeometry::new(85.6, 54.0, 2.0, 26.9, 0.0).is_ok());
        assert!(CardGeometry::new(0.0, 54.0, 2.0, 3.0, 0.0).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: CardGeometry = serde_json::from_str(
            r#"{"widthMm": 85.6, "heightMm": 54.0, "bleedMm": 2.0, "safeZoneMm": 3.0}"#,
        )
        .unwrap();
        assert_eq!(ok.bleed_mm(), 2.0);

        let bad = serde_json::from_str::<CardGeometry>(
            r#"{"widthMm": 85.6, "heightMm": 54.0, "safeZoneMm": 40.0}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_pixel_sizes_at_300_dpi() {
        let g = CardGeometry::cr80();
        assert_eq!(g.trim_px(300), (1011, 638));
        assert_eq!(g.bleed_px(300), (1058, 685));
    }

    #[test]
    fn test_clamp_nan() {
        assert_eq!(clamp(f64::NAN, 0.2, 0.8), 0.2);
        assert_eq!(clamp(5.0, 0.2, 0.8), 0.8);
    }
}
