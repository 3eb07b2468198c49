//! Edit Session - Single Entry Point
//!
//! Wires one logo-editing interaction together: source image, crop and
//! placement engines, the validation gate subscribed to their change bus,
//! and the exporter. User controls arrive as `EditCommand`s.

use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crop::{CropEngine, CropError, CropMode, CropRect, CropRegion};
use crate::events::{ChangeBus, ChangeEvent, ChangeSource};
use crate::geometry::{CardGeometry, Point, Size};
use crate::placement::{BlendMode, Direction, DragSession, PlacementConfig, PlacementEngine, Preset};
use crate::products::{ProductError, ProductProfile};
use crate::raster::{ExportArtifact, ExportError, ExportOptions, RasterExporter};
use crate::source::{ImageOrigin, LoadError, LoadState, SourceImage, SourceSlot};
use crate::validation::{
    GateError, ValidationGate, ValidationInput, ValidationReport, ValidationState, Validator,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Crop(#[from] CropError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error("No drag in progress")]
    NoActiveDrag,
}

/// Every user-facing control, as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EditCommand {
    SelectCropMode { mode: CropMode },
    UpdateCrop { rect: CropRect },
    ApplyPreset { preset: Preset },
    BeginDrag { pointer: Point, canvas: Size },
    UpdateDrag { pointer: Point },
    EndDrag,
    Nudge { direction: Direction },
    SetPosition { position: Point },
    SetScale { value: f64 },
    SetOpacity { value: f64 },
    SetBlendMode { mode: BlendMode },
    ToggleGuides,
    Reset,
    Validate,
}

#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Crop(CropRegion),
    Placement(PlacementConfig),
    Guides(bool),
    Reset {
        crop: Option<CropRegion>,
        placement: PlacementConfig,
    },
    Validated(ValidationReport),
}

pub struct EditSession {
    profile: ProductProfile,
    bus: ChangeBus,
    gate: Arc<ValidationGate>,
    validator: Validator,
    crop: CropEngine,
    placement: PlacementEngine,
    exporter: RasterExporter,
    slot: SourceSlot,
    source: Option<Arc<SourceImage>>,
    drag: Option<DragSession>,
    guides_visible: bool,
}

impl EditSession {
    pub fn new(profile: ProductProfile) -> Result<Self, SessionError> {
        profile.check()?;

        let bus = ChangeBus::new();
        let gate = Arc::new(ValidationGate::new());
        bus.subscribe(gate.clone());

        let geometry = &profile.geometry;
        let tunables = &profile.tunables;
        Ok(Self {
            crop: CropEngine::new(geometry, tunables.crop_coverage, bus.clone()),
            placement: PlacementEngine::new(geometry, tunables, bus.clone()),
            exporter: RasterExporter::new(tunables),
            validator: Validator::new(profile.failure_mode),
            slot: SourceSlot::new(),
            source: None,
            drag: None,
            guides_visible: true,
            gate,
            bus,
            profile,
        })
    }

    pub fn profile(&self) -> &ProductProfile {
        &self.profile
    }

    pub fn geometry(&self) -> &CardGeometry {
        &self.profile.geometry
    }

    pub fn state(&self) -> ValidationState {
        self.gate.state()
    }

    pub fn gate(&self) -> &Arc<ValidationGate> {
        &self.gate
    }

    /// Extra observers, e.g. a preview cache.
    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn source(&self) -> Option<&Arc<SourceImage>> {
        self.source.as_ref()
    }

    pub fn load_state(&self) -> &LoadState {
        self.slot.state()
    }

    pub fn crop_region(&self) -> Option<&CropRegion> {
        self.crop.region()
    }

    pub fn crop_mode(&self) -> CropMode {
        self.crop.mode()
    }

    pub fn placement(&self) -> &PlacementEngine {
        &self.placement
    }

    pub fn placement_config(&self) -> &PlacementConfig {
        self.placement.config()
    }

    pub fn guides_visible(&self) -> bool {
        self.guides_visible
    }

    // --- Source image ---

    /// Loads and adopts a new logo. On failure the current image, crop and
    /// placement are kept.
    pub fn load_image(&mut self, origin: ImageOrigin, display: Option<Size>) -> Result<Arc<SourceImage>, SessionError> {
        self.slot.begin(origin, display);
        self.slot.load();
        self.adopt_loaded()
    }

    pub async fn load_image_async(
        &mut self,
        origin: ImageOrigin,
        display: Option<Size>,
    ) -> Result<Arc<SourceImage>, SessionError> {
        self.slot.begin(origin, display);
        self.slot.load_async().await;
        self.adopt_loaded()
    }

    /// Re-issues a failed load. Existing work is untouched until it succeeds.
    pub fn retry_load(&mut self) -> Result<Arc<SourceImage>, SessionError> {
        self.slot.retry();
        self.adopt_loaded()
    }

    /// Adopts an image decoded elsewhere.
    pub fn attach_source(&mut self, image: SourceImage) -> Result<Arc<SourceImage>, SessionError> {
        let image = Arc::new(image);
        self.install(image.clone())?;
        Ok(image)
    }

    /// On-screen size of the logo changed; the crop follows.
    pub fn set_display_size(&mut self, display: Size) -> Result<(), SessionError> {
        let source = self.source.clone().ok_or(ExportError::SourceNotLoaded)?;
        self.crop.rescale_display(display)?;
        self.source = Some(Arc::new(source.with_display(display)));
        self.bus.emit(ChangeEvent::new(ChangeSource::Source, "set_display_size"));
        Ok(())
    }

    fn adopt_loaded(&mut self) -> Result<Arc<SourceImage>, SessionError> {
        match self.slot.state() {
            LoadState::Loaded(image) => {
                let image = image.clone();
                let already = self.source.as_ref().is_some_and(|s| s.id() == image.id());
                if !already {
                    self.install(image.clone())?;
                }
                Ok(image)
            }
            LoadState::Failed(e) => Err(e.clone().into()),
            LoadState::Idle | LoadState::Loading => Err(LoadError::NoOrigin.into()),
        }
    }

    fn install(&mut self, image: Arc<SourceImage>) -> Result<(), SessionError> {
        let coverage = self.profile.tunables.crop_coverage.fit;
        self.crop.initialize_crop(image.id(), image.display_size(), coverage)?;
        self.placement.attach();
        self.drag = None;
        tracing::info!(image = ?image, "source image installed");
        self.source = Some(image);
        self.bus.emit(ChangeEvent::new(ChangeSource::Source, "install"));
        Ok(())
    }

    // --- Commands ---

    pub fn apply(&mut self, command: EditCommand) -> Result<CommandOutcome, SessionError> {
        use CommandOutcome as Out;

        let outcome = match command {
            EditCommand::SelectCropMode { mode } => Out::Crop(self.crop.set_mode(mode)?),
            EditCommand::UpdateCrop { rect } => Out::Crop(self.crop.update_region(rect)?),
            EditCommand::ApplyPreset { preset } => {
                self.drag = None;
                Out::Placement(self.placement.apply_preset(preset))
            }
            EditCommand::BeginDrag { pointer, canvas } => {
                self.drag = Some(self.placement.begin_drag(pointer, canvas));
                Out::Placement(*self.placement.config())
            }
            EditCommand::UpdateDrag { pointer } => {
                let session = self.drag.as_mut().ok_or(SessionError::NoActiveDrag)?;
                Out::Placement(self.placement.update_drag(session, pointer))
            }
            EditCommand::EndDrag => {
                let session = self.drag.take().ok_or(SessionError::NoActiveDrag)?;
                Out::Placement(self.placement.end_drag(session))
            }
            // an explicit reposition ends any drag in flight
            EditCommand::Nudge { direction } => {
                self.drag = None;
                Out::Placement(self.placement.nudge(direction))
            }
            EditCommand::SetPosition { position } => {
                self.drag = None;
                Out::Placement(self.placement.set_position(position))
            }
            EditCommand::SetScale { value } => Out::Placement(self.placement.set_scale(value)),
            EditCommand::SetOpacity { value } => Out::Placement(self.placement.set_opacity(value)),
            EditCommand::SetBlendMode { mode } => Out::Placement(self.placement.set_blend_mode(mode)),
            EditCommand::ToggleGuides => {
                self.guides_visible = !self.guides_visible;
                Out::Guides(self.guides_visible)
            }
            EditCommand::Reset => self.reset()?,
            EditCommand::Validate => Out::Validated(self.validate()?),
        };
        Ok(outcome)
    }

    pub fn reset(&mut self) -> Result<CommandOutcome, SessionError> {
        self.drag = None;
        let crop = match self.crop.display_size() {
            Some(_) => Some(self.crop.reset()?),
            None => None,
        };
        let placement = self.placement.reset();
        Ok(CommandOutcome::Reset { crop, placement })
    }

    pub fn validate(&mut self) -> Result<ValidationReport, SessionError> {
        let input = ValidationInput {
            source: self.source.as_deref(),
            crop: self.crop.region(),
            placement: self.placement.config(),
            placement_complete: self.placement.is_complete(),
            geometry: &self.profile.geometry,
            tunables: &self.profile.tunables,
            print: &self.profile.print,
        };
        Ok(self.gate.validate(&self.validator, &input)?)
    }

    // --- Output ---

    pub fn export(&self, options: &ExportOptions) -> Result<ExportArtifact, SessionError> {
        self.gate.ensure_validated().map_err(|_| ExportError::NotValidated)?;
        let crop = self
            .crop
            .region()
            .ok_or(ExportError::EmptyCropRegion { width: 0.0, height: 0.0 })?;
        Ok(self.exporter.export(
            &self.gate,
            self.source.as_deref(),
            crop,
            self.placement.config(),
            &self.profile.geometry,
            options,
        )?)
    }

    /// Snapshot of the validated state exported off-thread. Dropping the
    /// future abandons the export.
    pub async fn export_async(&self, options: ExportOptions) -> Result<ExportArtifact, SessionError> {
        self.gate.ensure_validated().map_err(|_| ExportError::NotValidated)?;
        let crop = self
            .crop
            .region()
            .cloned()
            .ok_or(ExportError::EmptyCropRegion { width: 0.0, height: 0.0 })?;
        Ok(self
            .exporter
            .export_async(
                self.gate.clone(),
                self.source.clone(),
                crop,
                *self.placement.config(),
                self.profile.geometry.clone(),
                options,
            )
            .await?)
    }

    /// Card-sized preview at the product DPI, with guides when visible.
    pub fn render_proof(&self, options: &ExportOptions) -> Result<RgbaImage, SessionError> {
        let source = self.source.as_ref().ok_or(ExportError::SourceNotLoaded)?;
        let crop = self
            .crop
            .region()
            .ok_or(ExportError::EmptyCropRegion { width: 0.0, height: 0.0 })?;
        Ok(self.exporter.render_proof(
            source,
            crop,
            self.placement.config(),
            &self.profile.geometry,
            &self.profile.print,
            self.guides_visible,
            options,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn session_with_image(w: u32, h: u32) -> EditSession {
        let mut s = EditSession::new(ProductProfile::cr80()).unwrap();
        let img = RgbaImage::from_pixel(w, h, Rgba([0, 128, 255, 255]));
        s.attach_source(SourceImage::new(img, None).unwrap()).unwrap();
        s
    }

    #[test]
    fn test_install_creates_crop_and_placement() {
        let s = session_with_image(400, 300);
        assert!(s.crop_region().is_some());
        assert!(s.placement().is_complete());
        assert_eq!(s.crop_mode(), CropMode::Fit);
        assert_eq!(s.state(), ValidationState::Editing);
    }

    #[test]
    fn test_toggle_guides_keeps_validation() {
        let mut s = session_with_image(400, 300);
        s.apply(EditCommand::Validate).unwrap();
        s.apply(EditCommand::ToggleGuides).unwrap();
        assert!(!s.guides_visible());
        assert_eq!(s.state(), ValidationState::Validated);
    }

    #[test]
    fn test_update_drag_without_begin() {
        let mut s = session_with_image(400, 300);
        assert!(matches!(
            s.apply(EditCommand::UpdateDrag { pointer: Point::new(1.0, 1.0) }),
            Err(SessionError::NoActiveDrag)
        ));
    }

    #[test]
    fn test_preset_mid_drag_cancels_the_drag() {
        let canvas = Size::new(1000.0, 631.0);
        let moves: [EditCommand; 3] = [
            EditCommand::ApplyPreset { preset: Preset::BottomRight },
            EditCommand::SetPosition { position: Point::new(0.6, 0.4) },
            EditCommand::Nudge { direction: Direction::Right },
        ];
        for reposition in moves {
            let mut s = session_with_image(400, 300);
            s.apply(EditCommand::BeginDrag { pointer: Point::new(500.0, 315.5), canvas }).unwrap();
            s.apply(EditCommand::UpdateDrag { pointer: Point::new(300.0, 250.0) }).unwrap();
            let expected = match s.apply(reposition.clone()).unwrap() {
                CommandOutcome::Placement(config) => config,
                other => panic!("unexpected outcome {:?}", other),
            };

            assert!(matches!(s.apply(EditCommand::EndDrag), Err(SessionError::NoActiveDrag)));
            assert_eq!(*s.placement_config(), expected, "{:?}", reposition);
        }
    }

    #[test]
    fn test_failed_load_keeps_existing_work() {
        let mut s = session_with_image(400, 300);
        s.apply(EditCommand::SetScale { value: 1.3 }).unwrap();
        let crop_before = s.crop_region().cloned();
        let id_before = s.source().map(|i| i.id());

        let err = s.load_image(ImageOrigin::Bytes(Arc::from(&b"garbage"[..])), None);
        assert!(matches!(err, Err(SessionError::Load(LoadError::Decode(_)))));
        assert_eq!(s.crop_region().cloned(), crop_before);
        assert_eq!(s.source().map(|i| i.id()), id_before);
        assert_eq!(s.placement_config().scale, 1.3);

        assert!(s.retry_load().is_err());
        assert_eq!(s.crop_region().cloned(), crop_before);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut s = session_with_image(400, 300);
        s.apply(EditCommand::SelectCropMode { mode: CropMode::Center }).unwrap();
        s.apply(EditCommand::ApplyPreset { preset: Preset::TopLeft }).unwrap();
        s.apply(EditCommand::SetOpacity { value: 0.2 }).unwrap();
        s.apply(EditCommand::Reset).unwrap();
        assert_eq!(*s.placement_config(), PlacementConfig::default());
        assert_eq!(s.crop_mode(), CropMode::Fit);
    }

    #[test]
    fn test_render_proof_dimensions() {
        let s = session_with_image(200, 200);
        let proof = s.render_proof(&ExportOptions::default()).unwrap();
        assert_eq!(proof.dimensions(), s.geometry().bleed_px(300));
    }

    #[test]
    fn test_display_resize_invalidates_and_rescales() {
        let mut s = session_with_image(800, 800);
        s.validate().unwrap();
        let before = s.crop_region().unwrap().width;
        s.set_display_size(Size::new(400.0, 400.0)).unwrap();
        assert_eq!(s.state(), ValidationState::Editing);
        assert!((s.crop_region().unwrap().width - before / 2.0).abs() < 1e-9);
        assert_eq!(s.source().unwrap().scale_factors(), (2.0, 2.0));
    }

    #[test]
    fn test_command_json_shape() {
        let cmd: EditCommand =
            serde_json::from_str(r#"{"command": "nudge", "direction": "left"}"#).unwrap();
        assert_eq!(cmd, EditCommand::Nudge { direction: Direction::Left });
    }
}
