//! Placement Engine - Logo Position, Scale and Blending
//!
//! Interactive tool semantics: every input is clamped into range, nothing
//! here returns an error. The anchor is a tagged variant so a preset can
//! never carry stale custom coordinates.

use serde::{Deserialize, Serialize};

use crate::config::{EngineTunables, PresetTable, Range};
use crate::events::{ChangeBus, ChangeEvent, ChangeSource};
use crate::geometry::{clamp, CardGeometry, NormRect, Point, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    /// Logo covers the whole card including bleed; has no anchor.
    Full,
}

impl Preset {
    pub fn anchor_point(&self, table: &PresetTable) -> Option<Point> {
        match self {
            Preset::Center => Some(table.center),
            Preset::TopLeft => Some(table.top_left),
            Preset::TopRight => Some(table.top_right),
            Preset::BottomLeft => Some(table.bottom_left),
            Preset::BottomRight => Some(table.bottom_right),
            Preset::Full => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Anchor {
    Preset { preset: Preset },
    Custom { x: f64, y: f64 },
}

/// Flat view of the anchor, for display and manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Full,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConfig {
    pub anchor: Anchor,
    pub scale: f64,
    pub opacity: f64,
    pub blend_mode: BlendMode,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            anchor: Anchor::Preset { preset: Preset::Center },
            scale: 1.0,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
        }
    }
}

impl PlacementConfig {
    pub fn mode(&self) -> PlacementMode {
        match self.anchor {
            Anchor::Custom { .. } => PlacementMode::Custom,
            Anchor::Preset { preset } => match preset {
                Preset::Center => PlacementMode::Center,
                Preset::TopLeft => PlacementMode::TopLeft,
                Preset::TopRight => PlacementMode::TopRight,
                Preset::BottomLeft => PlacementMode::BottomLeft,
                Preset::BottomRight => PlacementMode::BottomRight,
                Preset::Full => PlacementMode::Full,
            },
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self.anchor, Anchor::Preset { preset: Preset::Full })
    }

    /// Anchor in normalized card space; `None` for `Full`.
    pub fn position(&self, presets: &PresetTable) -> Option<Point> {
        match self.anchor {
            Anchor::Preset { preset } => preset.anchor_point(presets),
            Anchor::Custom { x, y } => Some(Point::new(x, y)),
        }
    }
}

/// `round(v / grid) * grid` when within `threshold`, else `v`.
pub fn snap(v: f64, grid: f64, threshold: f64) -> f64 {
    if !(grid > 0.0) {
        return v;
    }
    let nearest = (v / grid).round() * grid;
    if (v - nearest).abs() <= threshold {
        nearest
    } else {
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragConstraint {
    pub bounds: NormRect,
    pub grid_size: f64,
    pub snap_threshold: f64,
}

impl DragConstraint {
    /// Tunable drag bounds intersected with the card's safe zone.
    pub fn for_card(geometry: &CardGeometry, tunables: &EngineTunables) -> Self {
        let safe = geometry.safe_zone_rect();
        let bounds = tunables.drag_bounds.intersect(&safe).unwrap_or(safe);
        Self {
            bounds,
            grid_size: tunables.grid_size,
            snap_threshold: tunables.snap_threshold,
        }
    }

    /// Clamp into bounds, then soft-snap. A snap target outside the bounds
    /// is discarded so the rectangle stays the hard limit.
    pub fn constrain(&self, p: Point) -> Point {
        Point::new(
            self.constrain_axis(p.x, self.bounds.min_x, self.bounds.max_x),
            self.constrain_axis(p.y, self.bounds.min_y, self.bounds.max_y),
        )
    }

    fn constrain_axis(&self, v: f64, lo: f64, hi: f64) -> f64 {
        let candidate = clamp(v, lo, hi);
        let snapped = snap(candidate, self.grid_size, self.snap_threshold);
        if snapped >= lo && snapped <= hi {
            snapped
        } else {
            candidate
        }
    }
}

/// Pointer capture for one drag gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    canvas: Size,
    /// Anchor minus pointer, in normalized units.
    offset: Point,
    last: Option<Point>,
    inert: bool,
}

impl DragSession {
    pub fn last_position(&self) -> Option<Point> {
        self.last
    }

    pub fn is_inert(&self) -> bool {
        self.inert
    }
}

fn to_normalized(pointer: Point, canvas: Size) -> Point {
    Point::new(pointer.x / canvas.width, pointer.y / canvas.height)
}

#[derive(Debug)]
pub struct PlacementEngine {
    config: PlacementConfig,
    constraint: DragConstraint,
    presets: PresetTable,
    scale_range: Range,
    opacity_range: Range,
    attached: bool,
    bus: ChangeBus,
}

impl PlacementEngine {
    pub fn new(geometry: &CardGeometry, tunables: &EngineTunables, bus: ChangeBus) -> Self {
        Self {
            config: PlacementConfig::default(),
            constraint: DragConstraint::for_card(geometry, tunables),
            presets: tunables.presets,
            scale_range: tunables.scale_range,
            opacity_range: tunables.opacity_range,
            attached: false,
            bus,
        }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    pub fn constraint(&self) -> &DragConstraint {
        &self.constraint
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    pub fn position(&self) -> Option<Point> {
        self.config.position(&self.presets)
    }

    /// Starts a fresh config for a newly loaded logo.
    pub fn attach(&mut self) -> PlacementConfig {
        self.attached = true;
        self.commit(self.initial_config(), "attach")
    }

    /// `PlacementConfig::default()` with scale and opacity pulled into the
    /// product's ranges.
    pub fn initial_config(&self) -> PlacementConfig {
        let base = PlacementConfig::default();
        PlacementConfig {
            scale: self.scale_range.clamp(base.scale),
            opacity: clamp(self.opacity_range.clamp(base.opacity), 0.0, 1.0),
            ..base
        }
    }

    pub fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            self.bus.emit(ChangeEvent::new(ChangeSource::Placement, "detach"));
        }
    }

    /// Attached, every scalar in range, and an anchor resolvable unless `Full`.
    pub fn is_complete(&self) -> bool {
        let c = &self.config;
        self.attached
            && self.scale_range.contains(c.scale)
            && self.opacity_range.contains(c.opacity)
            && (c.is_full() || self.position().is_some_and(|p| p.x.is_finite() && p.y.is_finite()))
    }

    pub fn apply_preset(&mut self, preset: Preset) -> PlacementConfig {
        let next = PlacementConfig {
            anchor: Anchor::Preset { preset },
            ..self.config
        };
        self.commit(next, "apply_preset")
    }

    /// Explicit reposition; always switches to `Custom`.
    pub fn set_position(&mut self, p: Point) -> PlacementConfig {
        if self.config.is_full() {
            return self.config;
        }
        let p = self.constraint.bounds.clamp_point(p);
        self.commit_position(p, "set_position")
    }

    pub fn begin_drag(&self, pointer: Point, canvas: Size) -> DragSession {
        let anchor = self.position();
        let inert = self.config.is_full() || canvas.is_empty() || anchor.is_none();
        let offset = match anchor {
            Some(a) if !inert => {
                let at = to_normalized(pointer, canvas);
                Point::new(a.x - at.x, a.y - at.y)
            }
            _ => Point::new(0.0, 0.0),
        };
        DragSession {
            canvas,
            offset,
            last: None,
            inert,
        }
    }

    pub fn update_drag(&mut self, session: &mut DragSession, pointer: Point) -> PlacementConfig {
        if session.inert || self.config.is_full() {
            return self.config;
        }
        let at = to_normalized(pointer, session.canvas);
        let raw = Point::new(at.x + session.offset.x, at.y + session.offset.y);
        let p = self.constraint.constrain(raw);
        session.last = Some(p);
        self.commit_position(p, "update_drag")
    }

    /// Commits the last drag position, re-snapped. A drag that never moved
    /// leaves the config untouched.
    pub fn end_drag(&mut self, session: DragSession) -> PlacementConfig {
        if session.inert || self.config.is_full() {
            return self.config;
        }
        match session.last {
            Some(last) => {
                let p = self.constraint.constrain(last);
                self.commit_position(p, "end_drag")
            }
            None => self.config,
        }
    }

    /// One grid step in `direction`, then clamped. No snapping.
    pub fn nudge(&mut self, direction: Direction) -> PlacementConfig {
        let Some(p) = self.position().filter(|_| !self.config.is_full()) else {
            return self.config;
        };
        let step = self.constraint.grid_size;
        let moved = match direction {
            Direction::Up => Point::new(p.x, p.y - step),
            Direction::Down => Point::new(p.x, p.y + step),
            Direction::Left => Point::new(p.x - step, p.y),
            Direction::Right => Point::new(p.x + step, p.y),
        };
        let p = self.constraint.bounds.clamp_point(moved);
        self.commit_position(p, "nudge")
    }

    pub fn set_scale(&mut self, value: f64) -> PlacementConfig {
        let next = PlacementConfig {
            scale: self.scale_range.clamp(value),
            ..self.config
        };
        self.commit(next, "set_scale")
    }

    pub fn set_opacity(&mut self, value: f64) -> PlacementConfig {
        let next = PlacementConfig {
            opacity: clamp(self.opacity_range.clamp(value), 0.0, 1.0),
            ..self.config
        };
        self.commit(next, "set_opacity")
    }

    pub fn set_blend_mode(&mut self, blend_mode: BlendMode) -> PlacementConfig {
        let next = PlacementConfig {
            blend_mode,
            ..self.config
        };
        self.commit(next, "set_blend_mode")
    }

    pub fn reset(&mut self) -> PlacementConfig {
        self.commit(self.initial_config(), "reset")
    }

    /// Normalized rectangle the logo occupies on the card.
    ///
    /// Anchored modes center a box of `logo_base_width * scale` trim widths on
    /// the anchor. `Full` covers the bleed rectangle, then applies scale about
    /// the card center.
    pub fn footprint(&self, geometry: &CardGeometry, base_width: f64, logo_aspect: f64) -> NormRect {
        footprint(&self.config, &self.presets, geometry, base_width, logo_aspect)
    }

    fn commit_position(&mut self, p: Point, operation: &'static str) -> PlacementConfig {
        let next = PlacementConfig {
            anchor: Anchor::Custom { x: p.x, y: p.y },
            ..self.config
        };
        self.commit(next, operation)
    }

    fn commit(&mut self, next: PlacementConfig, operation: &'static str) -> PlacementConfig {
        tracing::debug!(
            operation,
            mode = ?next.mode(),
            scale = next.scale,
            opacity = next.opacity,
            blend = ?next.blend_mode,
            "placement updated"
        );
        self.config = next;
        self.bus.emit(ChangeEvent::new(ChangeSource::Placement, operation));
        next
    }
}

pub fn footprint(
    config: &PlacementConfig,
    presets: &PresetTable,
    geometry: &CardGeometry,
    base_width: f64,
    logo_aspect: f64,
) -> NormRect {
    let card_aspect = geometry.aspect_ratio();
    let logo_aspect = if logo_aspect > 0.0 && logo_aspect.is_finite() {
        logo_aspect
    } else {
        card_aspect
    };

    let (center, w, h) = match config.position(presets) {
        Some(anchor) => {
            let w = base_width * config.scale;
            (anchor, w, w * card_aspect / logo_aspect)
        }
        None => {
            let bleed = geometry.bleed_rect();
            // compare in millimeters, normalized units are anisotropic
            let bleed_aspect = bleed.width() * card_aspect / bleed.height();
            let (w, h) = if logo_aspect > bleed_aspect {
                (bleed.height() * logo_aspect / card_aspect, bleed.height())
            } else {
                (bleed.width(), bleed.width() * card_aspect / logo_aspect)
            };
            (Point::new(0.5, 0.5), w * config.scale, h * config.scale)
        }
    };

    NormRect::new(
        center.x - w / 2.0,
        center.y - h / 2.0,
        center.x + w / 2.0,
        center.y + h / 2.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PlacementEngine {
        let mut e = PlacementEngine::new(
            &CardGeometry::cr80(),
            &EngineTunables::default(),
            ChangeBus::new(),
        );
        e.attach();
        e
    }

    #[test]
    fn test_snap_within_threshold() {
        assert!((snap(0.502, 0.05, 0.03) - 0.5).abs() < 1e-12);
        assert_eq!(snap(0.52, 0.05, 0.01), 0.52);
    }

    #[test]
    fn test_snap_idempotent() {
        for i in 0..200 {
            let v = i as f64 * 0.0053;
            let once = snap(v, 0.05, 0.015);
            assert_eq!(snap(once, 0.05, 0.015), once);
        }
    }

    #[test]
    fn test_preset_positions() {
        let mut e = engine();
        e.apply_preset(Preset::BottomRight);
        assert_eq!(e.position(), Some(Point::new(0.75, 0.70)));
        assert_eq!(e.config().mode(), PlacementMode::BottomRight);
        e.apply_preset(Preset::Full);
        assert_eq!(e.position(), None);
    }

    #[test]
    fn test_drag_is_relative_to_grab_point() {
        let mut e = engine();
        let canvas = Size::new(1000.0, 1000.0);
        // grab 100px right of the centered anchor
        let mut s = e.begin_drag(Point::new(600.0, 500.0), canvas);
        let c = e.update_drag(&mut s, Point::new(632.0, 500.0));
        let Anchor::Custom { x, y } = c.anchor else {
            panic!("expected custom anchor");
        };
        assert!((x - 0.532).abs() < 1e-9);
        assert!((y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_end_drag_resnaps_committed_value() {
        let mut e = engine();
        let canvas = Size::new(1000.0, 1000.0);
        let mut s = e.begin_drag(Point::new(500.0, 500.0), canvas);
        e.update_drag(&mut s, Point::new(612.0, 500.0));
        let c = e.end_drag(s);
        assert_eq!(c.mode(), PlacementMode::Custom);
        let p = c.position(e.presets()).unwrap();
        assert!((p.x - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_click_without_move_keeps_preset() {
        let mut e = engine();
        e.apply_preset(Preset::TopRight);
        let s = e.begin_drag(Point::new(10.0, 10.0), Size::new(100.0, 100.0));
        let c = e.end_drag(s);
        assert_eq!(c.mode(), PlacementMode::TopRight);
    }

    #[test]
    fn test_nudge_steps_and_clamps() {
        let mut e = engine();
        let c = e.nudge(Direction::Right);
        assert!((c.position(e.presets()).unwrap().x - 0.55).abs() < 1e-9);
        for _ in 0..20 {
            e.nudge(Direction::Up);
        }
        assert!((e.position().unwrap().y - 0.20).abs() < 1e-9);
    }

    #[test]
    fn test_full_mode_ignores_drag_and_nudge() {
        let mut e = engine();
        e.apply_preset(Preset::Full);
        let before = *e.config();
        let mut s = e.begin_drag(Point::new(1.0, 1.0), Size::new(100.0, 100.0));
        assert!(s.is_inert());
        e.update_drag(&mut s, Point::new(90.0, 90.0));
        e.nudge(Direction::Left);
        e.set_position(Point::new(0.3, 0.3));
        assert_eq!(*e.config(), before);
        assert_eq!(e.set_scale(1.2).scale, 1.2);
    }

    #[test]
    fn test_setters_clamp() {
        let mut e = engine();
        assert_eq!(e.set_scale(9.0).scale, 1.5);
        assert_eq!(e.set_scale(0.1).scale, 0.5);
        assert_eq!(e.set_opacity(-1.0).opacity, 0.0);
        assert_eq!(e.set_opacity(f64::NAN).opacity, 0.0);
        assert_eq!(e.set_blend_mode(BlendMode::Screen).blend_mode, BlendMode::Screen);
        assert!(e.is_complete());
    }

    #[test]
    fn test_attach_and_reset_respect_narrow_ranges() {
        let tunables = EngineTunables {
            scale_range: Range::new(0.5, 0.9),
            opacity_range: Range::new(0.0, 0.8),
            ..EngineTunables::default()
        };
        let mut e = PlacementEngine::new(&CardGeometry::cr80(), &tunables, ChangeBus::new());
        let start = e.attach();
        assert_eq!((start.scale, start.opacity), (0.9, 0.8));
        assert!(e.is_complete());

        e.set_scale(0.6);
        let reset = e.reset();
        assert_eq!((reset.scale, reset.opacity), (0.9, 0.8));
        assert!(e.is_complete());
    }

    #[test]
    fn test_constraint_never_snaps_outside_bounds() {
        let c = DragConstraint {
            bounds: NormRect::new(0.16, 0.16, 0.84, 0.84),
            grid_size: 0.05,
            snap_threshold: 0.02,
        };
        let p = c.constrain(Point::new(0.0, 0.9));
        assert_eq!(p, Point::new(0.16, 0.84));
    }

    #[test]
    fn test_footprint_anchored() {
        let e = engine();
        let g = CardGeometry::cr80();
        let r = e.footprint(&g, 0.3, g.aspect_ratio());
        assert!((r.width() - 0.3).abs() < 1e-9);
        assert!((r.height() - 0.3).abs() < 1e-9);
        assert!(((r.min_x + r.max_x) / 2.0 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_footprint_full_covers_bleed() {
        let mut e = engine();
        e.apply_preset(Preset::Full);
        let g = CardGeometry::cr80();
        let r = e.footprint(&g, 0.3, 1.0);
        let bleed = g.bleed_rect();
        assert!(r.min_x <= bleed.min_x + 1e-9 && r.max_x >= bleed.max_x - 1e-9);
        assert!(r.min_y <= bleed.min_y + 1e-9 && r.max_y >= bleed.max_y - 1e-9);
    }
}
