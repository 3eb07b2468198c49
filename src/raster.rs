//! Raster Exporter - Print-Ready Logo Rasterization
//!
//! CRITICAL: export checks the validation gate first and again before
//! returning. An artifact is produced whole or not at all.
//!
//! Crop regions arrive in display pixels; the exporter maps them into the
//! source's natural pixel grid so output resolution follows the asset, not
//! the preview.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{EngineTunables, PresetTable};
use crate::crop::CropRegion;
use crate::geometry::{mm_to_px, CardGeometry, NormRect, MM_PER_INCH};
use crate::hashing::{manifest_hash, sha256_hex};
use crate::placement::{footprint, BlendMode, PlacementConfig};
use crate::print::PrintSpec;
use crate::source::SourceImage;
use crate::validation::ValidationGate;
use crate::ENGINE_VERSION;

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];
const PAPER_WHITE: [u8; 4] = [255, 255, 255, 255];
const TRIM_GUIDE: [u8; 4] = [220, 40, 40, 255];
const SAFE_GUIDE: [u8; 4] = [40, 120, 220, 255];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExportError {
    #[error("Export requires a validated design")]
    NotValidated,

    #[error("Source image is not loaded")]
    SourceNotLoaded,

    #[error("Crop region belongs to image {crop}, loaded image is {loaded}")]
    SourceMismatch { crop: Uuid, loaded: Uuid },

    #[error("Crop region is empty after scaling ({width}x{height})")]
    EmptyCropRegion { width: f64, height: f64 },

    #[error("Cannot allocate a {width}x{height} raster surface")]
    SurfaceAllocationFailed { width: u64, height: u64 },

    #[error("Export cancelled")]
    Cancelled,

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Export task failed: {0}")]
    TaskFailed(String),
}

/// Shared cancellation flag, checked once per output row.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancels the token when dropped unless disarmed.
struct CancelOnDrop(Option<CancelToken>);

impl CancelOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Opaque backdrop the blend mode is evaluated against. Transparent when unset.
    #[serde(default)]
    pub background: Option<[u8; 4]>,
}

/// Immutable result of one successful export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    id: Uuid,
    png: Vec<u8>,
    output_width_px: u32,
    output_height_px: u32,
    source_aspect: f64,
    card_aspect: f64,
    effective_dpi: f64,
    generated_at: DateTime<Utc>,
    sha256: String,
    validated_revision: u64,
    crop: CropRegion,
    placement: PlacementConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub id: Uuid,
    pub engine_version: String,
    pub output_width_px: u32,
    pub output_height_px: u32,
    pub source_aspect: f64,
    pub card_aspect: f64,
    pub effective_dpi: f64,
    pub generated_at: DateTime<Utc>,
    pub sha256: String,
    pub validated_revision: u64,
    pub crop: CropRegion,
    pub placement: PlacementConfig,
}

impl ExportArtifact {
    pub fn id(&self) -> Uuid { self.id }
    pub fn png(&self) -> &[u8] { &self.png }
    pub fn output_width_px(&self) -> u32 { self.output_width_px }
    pub fn output_height_px(&self) -> u32 { self.output_height_px }
    /// Display-space aspect of the crop the user validated.
    pub fn source_aspect(&self) -> f64 { self.source_aspect }
    pub fn effective_dpi(&self) -> f64 { self.effective_dpi }
    pub fn generated_at(&self) -> DateTime<Utc> { self.generated_at }
    pub fn sha256(&self) -> &str { &self.sha256 }

    pub fn into_png(self) -> Vec<u8> {
        self.png
    }

    pub fn to_base64(&self) -> String {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &self.png)
    }

    pub fn manifest(&self) -> ExportManifest {
        ExportManifest {
            id: self.id,
            engine_version: ENGINE_VERSION.to_string(),
            output_width_px: self.output_width_px,
            output_height_px: self.output_height_px,
            source_aspect: self.source_aspect,
            card_aspect: self.card_aspect,
            effective_dpi: self.effective_dpi,
            generated_at: self.generated_at,
            sha256: self.sha256.clone(),
            validated_revision: self.validated_revision,
            crop: self.crop.clone(),
            placement: self.placement,
        }
    }

    pub fn manifest_hash(&self) -> Result<String, serde_json::Error> {
        manifest_hash(&self.manifest())
    }
}

// --- Blending ---

/// Separable blend function `B(cb, cs)` on straight [0,1] channels.
pub fn blend_channel(mode: BlendMode, cb: f32, cs: f32) -> f32 {
    match mode {
        BlendMode::Normal => cs,
        BlendMode::Multiply => cb * cs,
        BlendMode::Screen => cb + cs - cb * cs,
        // hard-light with operands swapped
        BlendMode::Overlay => {
            if cb <= 0.5 {
                2.0 * cb * cs
            } else {
                1.0 - 2.0 * (1.0 - cb) * (1.0 - cs)
            }
        }
    }
}

/// Source-over of `src` onto `dst` (straight alpha), with `mode` applied
/// where the backdrop is present.
pub fn composite_pixel(dst: [u8; 4], src: [u8; 4], opacity: f64, mode: BlendMode) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0) as f32;
    let a_s = f32::from(src[3]) / 255.0 * opacity;
    if a_s <= 0.0 {
        return dst;
    }
    let a_b = f32::from(dst[3]) / 255.0;
    let a_o = a_s + a_b * (1.0 - a_s);

    let mut out = [0u8; 4];
    for i in 0..3 {
        let cs = f32::from(src[i]) / 255.0;
        let cb = f32::from(dst[i]) / 255.0;
        let mixed = (1.0 - a_b) * cs + a_b * blend_channel(mode, cb, cs);
        let c = (a_s * mixed + a_b * (1.0 - a_s) * cb) / a_o;
        out[i] = to_u8(c);
    }
    out[3] = to_u8(a_o);
    out
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

// --- Surfaces ---

/// Crop mapped into natural pixels plus the output size.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SurfacePlan {
    src_x: u32,
    src_y: u32,
    src_w: u32,
    src_h: u32,
    out_w: u32,
    out_h: u32,
}

impl SurfacePlan {
    fn compute(source: &SourceImage, crop: &CropRegion) -> Result<Self, ExportError> {
        let (sx, sy) = source.scale_factors();
        let nx = crop.x * sx;
        let ny = crop.y * sy;
        let nw = crop.width * sx;
        let nh = crop.height * sy;

        // one uniform factor keeps the display-space aspect when the preview
        // was stretched anisotropically
        let s = sx.max(sy);
        let out_w = (crop.width * s).round();
        let out_h = (crop.height * s).round();
        let finite = [nx, ny, nw, nh, out_w, out_h].iter().all(|v| v.is_finite());
        if !finite || out_w < 1.0 || out_h < 1.0 || nw <= 0.0 || nh <= 0.0 {
            return Err(ExportError::EmptyCropRegion { width: nw, height: nh });
        }

        let (iw, ih) = source.pixels().dimensions();
        let src_x = (nx.round().max(0.0) as u32).min(iw - 1);
        let src_y = (ny.round().max(0.0) as u32).min(ih - 1);
        let src_w = (nw.round() as u32).clamp(1, iw - src_x);
        let src_h = (nh.round() as u32).clamp(1, ih - src_y);

        Ok(Self {
            src_x,
            src_y,
            src_w,
            src_h,
            out_w: out_w as u32,
            out_h: out_h as u32,
        })
    }

    /// Logo pixels at output size, written into a fallibly reserved layer.
    /// Resampling is bilinear over the natural-pixel source rectangle.
    fn sample(&self, source: &SourceImage) -> Result<RgbaImage, ExportError> {
        let pixels = source.pixels();
        let mut layer = allocate_surface(self.out_w, self.out_h, TRANSPARENT)?;
        if (self.src_w, self.src_h) == (self.out_w, self.out_h) {
            for (x, y, px) in layer.enumerate_pixels_mut() {
                *px = *pixels.get_pixel(self.src_x + x, self.src_y + y);
            }
            return Ok(layer);
        }

        let kx = f64::from(self.src_w) / f64::from(self.out_w);
        let ky = f64::from(self.src_h) / f64::from(self.out_h);
        let max_x = f64::from(self.src_w - 1);
        let max_y = f64::from(self.src_h - 1);
        for (x, y, px) in layer.enumerate_pixels_mut() {
            let u = ((f64::from(x) + 0.5) * kx - 0.5).clamp(0.0, max_x);
            let v = ((f64::from(y) + 0.5) * ky - 0.5).clamp(0.0, max_y);
            *px = Rgba(self.bilinear(pixels, u, v));
        }
        Ok(layer)
    }

    /// `(u, v)` relative to the source rectangle's top-left.
    fn bilinear(&self, pixels: &RgbaImage, u: f64, v: f64) -> [u8; 4] {
        let (x0, y0) = (u.floor() as u32, v.floor() as u32);
        let x1 = (x0 + 1).min(self.src_w - 1);
        let y1 = (y0 + 1).min(self.src_h - 1);
        let (fx, fy) = (u - f64::from(x0), v - f64::from(y0));
        let at = |x: u32, y: u32| pixels.get_pixel(self.src_x + x, self.src_y + y).0;
        let (p00, p10, p01, p11) = (at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1));

        let mut out = [0u8; 4];
        for i in 0..4 {
            let top = f64::from(p00[i]) * (1.0 - fx) + f64::from(p10[i]) * fx;
            let bottom = f64::from(p01[i]) * (1.0 - fx) + f64::from(p11[i]) * fx;
            out[i] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

fn allocate_surface(width: u32, height: u32, fill: [u8; 4]) -> Result<RgbaImage, ExportError> {
    let failed = || ExportError::SurfaceAllocationFailed {
        width: u64::from(width),
        height: u64::from(height),
    };
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(failed)?;
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| failed())?;
    for _ in 0..(len / 4) {
        buf.extend_from_slice(&fill);
    }
    RgbaImage::from_raw(width, height, buf).ok_or_else(failed)
}

/// Draws `layer` onto `surface` with its top-left at `(ox, oy)`, clipping
/// to the surface.
fn composite_layer(
    surface: &mut RgbaImage,
    layer: &RgbaImage,
    ox: i64,
    oy: i64,
    opacity: f64,
    mode: BlendMode,
    cancel: &CancelToken,
) -> Result<(), ExportError> {
    let (sw, sh) = (i64::from(surface.width()), i64::from(surface.height()));
    for ly in 0..layer.height() {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let y = oy + i64::from(ly);
        if y < 0 || y >= sh {
            continue;
        }
        for lx in 0..layer.width() {
            let x = ox + i64::from(lx);
            if x < 0 || x >= sw {
                continue;
            }
            let dst = surface.get_pixel_mut(x as u32, y as u32);
            *dst = Rgba(composite_pixel(dst.0, layer.get_pixel(lx, ly).0, opacity, mode));
        }
    }
    Ok(())
}

fn draw_outline(surface: &mut RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32, thickness: u32, color: [u8; 4]) {
    let (w, h) = surface.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let (x1, y1) = (x1.min(w - 1), y1.min(h - 1));
    for t in 0..thickness {
        for x in x0..=x1 {
            for y in [y0.saturating_add(t), y1.saturating_sub(t)] {
                if y < h {
                    surface.put_pixel(x, y, Rgba(color));
                }
            }
        }
        for y in y0..=y1 {
            for x in [x0.saturating_add(t), x1.saturating_sub(t)] {
                if x < w {
                    surface.put_pixel(x, y, Rgba(color));
                }
            }
        }
    }
}

/// Fails when the gate saw an edit after `revision` was read.
fn ensure_unchanged(gate: &ValidationGate, revision: u64) -> Result<(), ExportError> {
    if gate.revision() != revision {
        tracing::warn!("design edited during export, discarding result");
        return Err(ExportError::NotValidated);
    }
    Ok(())
}

pub fn encode_png(surface: RgbaImage) -> Result<Vec<u8>, ExportError> {
    let mut png = Vec::new();
    DynamicImage::ImageRgba8(surface)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ExportError::Encode(e.to_string()))?;
    Ok(png)
}

// --- Exporter ---

#[derive(Debug, Clone)]
pub struct RasterExporter {
    max_surface_pixels: u64,
    logo_base_width: f64,
    presets: PresetTable,
    filter: FilterType,
}

impl RasterExporter {
    pub fn new(tunables: &EngineTunables) -> Self {
        Self {
            max_surface_pixels: tunables.max_surface_pixels,
            logo_base_width: tunables.logo_base_width,
            presets: tunables.presets,
            filter: FilterType::Triangle,
        }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    fn check_surface(&self, width: u32, height: u32) -> Result<(), ExportError> {
        let pixels = u64::from(width) * u64::from(height);
        if width == 0 || height == 0 || pixels > self.max_surface_pixels {
            tracing::warn!(width, height, limit = self.max_surface_pixels, "surface too large");
            return Err(ExportError::SurfaceAllocationFailed {
                width: u64::from(width),
                height: u64::from(height),
            });
        }
        Ok(())
    }

    pub fn export(
        &self,
        gate: &ValidationGate,
        source: Option<&SourceImage>,
        crop: &CropRegion,
        placement: &PlacementConfig,
        geometry: &CardGeometry,
        options: &ExportOptions,
    ) -> Result<ExportArtifact, ExportError> {
        self.export_with_cancel(gate, source, crop, placement, geometry, options, &CancelToken::new())
    }

    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip_all, fields(crop_w = crop.width, crop_h = crop.height))]
    pub fn export_with_cancel(
        &self,
        gate: &ValidationGate,
        source: Option<&SourceImage>,
        crop: &CropRegion,
        placement: &PlacementConfig,
        geometry: &CardGeometry,
        options: &ExportOptions,
        cancel: &CancelToken,
    ) -> Result<ExportArtifact, ExportError> {
        // MANDATORY: no artifact without a validated design.
        let revision = gate.ensure_validated().map_err(|_| ExportError::NotValidated)?;

        let source = source.ok_or(ExportError::SourceNotLoaded)?;
        if crop.source_image_id != source.id() {
            return Err(ExportError::SourceMismatch {
                crop: crop.source_image_id,
                loaded: source.id(),
            });
        }

        let plan = SurfacePlan::compute(source, crop)?;
        self.check_surface(plan.out_w, plan.out_h)?;

        let logo = plan.sample(source)?;
        let mut surface = allocate_surface(plan.out_w, plan.out_h, options.background.unwrap_or(TRANSPARENT))?;
        composite_layer(&mut surface, &logo, 0, 0, placement.opacity, placement.blend_mode, cancel)?;

        let png = encode_png(surface)?;
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        ensure_unchanged(gate, revision)?;

        let rect = footprint(placement, &self.presets, geometry, self.logo_base_width, crop.aspect());
        let printed_inches = rect.width() * geometry.width_mm() / MM_PER_INCH;
        let effective_dpi = if printed_inches > 0.0 {
            f64::from(plan.out_w) / printed_inches
        } else {
            0.0
        };

        let artifact = ExportArtifact {
            id: Uuid::new_v4(),
            sha256: sha256_hex(&png),
            png,
            output_width_px: plan.out_w,
            output_height_px: plan.out_h,
            source_aspect: crop.aspect(),
            card_aspect: geometry.aspect_ratio(),
            effective_dpi,
            generated_at: Utc::now(),
            validated_revision: revision,
            crop: crop.clone(),
            placement: *placement,
        };
        tracing::info!(
            id = %artifact.id,
            width = artifact.output_width_px,
            height = artifact.output_height_px,
            bytes = artifact.png.len(),
            "export complete"
        );
        Ok(artifact)
    }

    /// Runs the export on the blocking pool. Dropping the returned future
    /// cancels the work; a cancelled export yields nothing.
    #[allow(clippy::too_many_arguments)]
    pub async fn export_async(
        &self,
        gate: Arc<ValidationGate>,
        source: Option<Arc<SourceImage>>,
        crop: CropRegion,
        placement: PlacementConfig,
        geometry: CardGeometry,
        options: ExportOptions,
    ) -> Result<ExportArtifact, ExportError> {
        gate.ensure_validated().map_err(|_| ExportError::NotValidated)?;

        let token = CancelToken::new();
        let guard = CancelOnDrop(Some(token.clone()));
        let exporter = self.clone();
        let result = tokio::task::spawn_blocking(move || {
            exporter.export_with_cancel(
                &gate,
                source.as_deref(),
                &crop,
                &placement,
                &geometry,
                &options,
                &token,
            )
        })
        .await
        .map_err(|e| ExportError::TaskFailed(e.to_string()))?;
        guard.disarm();
        result
    }

    /// Bleed-sized card preview at the print DPI with the logo placed and
    /// optional trim/safe-zone guides. Not gated.
    #[allow(clippy::too_many_arguments)]
    pub fn render_proof(
        &self,
        source: &SourceImage,
        crop: &CropRegion,
        placement: &PlacementConfig,
        geometry: &CardGeometry,
        print: &PrintSpec,
        guides: bool,
        options: &ExportOptions,
    ) -> Result<RgbaImage, ExportError> {
        let dpi = print.dpi;
        let (cw, ch) = geometry.bleed_px(dpi);
        self.check_surface(cw, ch)?;
        let mut card = allocate_surface(cw, ch, options.background.unwrap_or(PAPER_WHITE))?;

        let plan = SurfacePlan::compute(source, crop)?;
        let logo = plan.sample(source)?;

        let bleed_px = mm_to_px(geometry.bleed_mm(), dpi);
        let trim_w = mm_to_px(geometry.width_mm(), dpi);
        let trim_h = mm_to_px(geometry.height_mm(), dpi);
        let to_px = |r: &NormRect| {
            (
                bleed_px + r.min_x * trim_w,
                bleed_px + r.min_y * trim_h,
                bleed_px + r.max_x * trim_w,
                bleed_px + r.max_y * trim_h,
            )
        };

        let rect = footprint(placement, &self.presets, geometry, self.logo_base_width, crop.aspect());
        let (lx0, ly0, lx1, ly1) = to_px(&rect);
        let lw = (lx1 - lx0).round().max(1.0) as u32;
        let lh = (ly1 - ly0).round().max(1.0) as u32;
        self.check_surface(lw, lh)?;
        let placed = imageops::resize(&logo, lw, lh, self.filter);
        composite_layer(
            &mut card,
            &placed,
            lx0.round() as i64,
            ly0.round() as i64,
            placement.opacity,
            placement.blend_mode,
            &CancelToken::new(),
        )?;

        if guides {
            let thickness = (dpi / 150).max(1);
            for (r, color) in [(geometry.trim_rect(), TRIM_GUIDE), (geometry.safe_zone_rect(), SAFE_GUIDE)] {
                let (x0, y0, x1, y1) = to_px(&r);
                draw_outline(
                    &mut card,
                    x0.round().max(0.0) as u32,
                    y0.round().max(0.0) as u32,
                    x1.round().max(0.0) as u32,
                    y1.round().max(0.0) as u32,
                    thickness,
                    color,
                );
            }
        }
        Ok(card)
    }
}

impl Default for RasterExporter {
    fn default() -> Self {
        Self::new(&EngineTunables::default())
    }
}
