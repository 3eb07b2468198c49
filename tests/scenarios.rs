//! End-to-end editing scenarios against the CR80 card.

use cardlogo_core::{
    config::{CropCoverage, EngineTunables},
    events::ChangeBus,
    products::ProductProfile,
    CardGeometry, CropEngine, EditCommand, EditSession, ExportError, ExportOptions,
    PlacementEngine, Point, Preset, SessionError, Size, SourceImage, ValidationState,
};
use image::{Rgba, RgbaImage};
use uuid::Uuid;

const CANVAS: Size = Size { width: 1000.0, height: 631.0 };

fn approx(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() < eps
}

/// Pointer on the preview canvas that sits exactly on `p`.
fn pointer_at(p: Point) -> Point {
    Point::new(p.x * CANVAS.width, p.y * CANVAS.height)
}

#[test]
fn scenario_square_logo_initial_crop() {
    let geometry = CardGeometry::cr80();
    let mut crop = CropEngine::new(&geometry, CropCoverage::default(), ChangeBus::new());

    let region = crop
        .initialize_crop(Uuid::new_v4(), Size::new(1200.0, 1200.0), 0.95)
        .unwrap();

    assert!(approx(region.aspect(), 1.585, 1e-3));
    let expected_area = 0.95 * 0.95 * (1200.0 * 1200.0 / geometry.aspect_ratio());
    assert!(approx(region.area(), expected_area, 1e-6));
    assert!(approx(region.x + region.width / 2.0, 600.0, 1e-9));
    assert!(approx(region.y + region.height / 2.0, 600.0, 1e-9));
    assert!(region.aspect_locked);
}

#[test]
fn scenario_drag_into_corner_stops_at_wall() {
    let geometry = CardGeometry::cr80();
    let mut placement = PlacementEngine::new(&geometry, &EngineTunables::default(), ChangeBus::new());
    placement.attach();
    placement.apply_preset(Preset::TopLeft);

    let start = placement.position().unwrap();
    let mut drag = placement.begin_drag(pointer_at(start), CANVAS);
    placement.update_drag(&mut drag, pointer_at(Point::new(0.02, 0.02)));
    placement.end_drag(drag);

    let p = placement.position().unwrap();
    assert!(approx(p.x, 0.15, 1e-9), "x = {}", p.x);
    assert!(approx(p.y, 0.20, 1e-9), "y = {}", p.y);
}

#[test]
fn scenario_soft_snap_to_grid() {
    let geometry = CardGeometry::cr80();
    let tunables = EngineTunables {
        grid_size: 0.05,
        snap_threshold: 0.03,
        ..EngineTunables::default()
    };
    let mut placement = PlacementEngine::new(&geometry, &tunables, ChangeBus::new());
    placement.attach();

    let start = placement.position().unwrap();
    let mut drag = placement.begin_drag(pointer_at(start), CANVAS);
    placement.update_drag(&mut drag, pointer_at(Point::new(0.502, 0.698)));
    placement.end_drag(drag);

    let p = placement.position().unwrap();
    assert!(approx(p.x, 0.50, 1e-9), "x = {}", p.x);
    assert!(approx(p.y, 0.70, 1e-9), "y = {}", p.y);
}

#[test]
fn scenario_default_threshold_leaves_off_grid_positions() {
    let geometry = CardGeometry::cr80();
    let mut placement = PlacementEngine::new(&geometry, &EngineTunables::default(), ChangeBus::new());
    placement.attach();

    let start = placement.position().unwrap();
    let mut drag = placement.begin_drag(pointer_at(start), CANVAS);
    placement.update_drag(&mut drag, pointer_at(Point::new(0.532, 0.468)));
    placement.end_drag(drag);

    let p = placement.position().unwrap();
    assert!(approx(p.x, 0.532, 1e-9));
    assert!(approx(p.y, 0.468, 1e-9));
}

#[test]
fn scenario_export_without_validation_is_refused() {
    let mut session = EditSession::new(ProductProfile::cr80()).unwrap();
    let img = RgbaImage::from_pixel(640, 480, Rgba([20, 40, 60, 255]));
    session.attach_source(SourceImage::new(img, None).unwrap()).unwrap();
    session.apply(EditCommand::ApplyPreset { preset: Preset::BottomLeft }).unwrap();

    assert_eq!(session.state(), ValidationState::Editing);
    let result = session.export(&ExportOptions::default());
    assert!(matches!(result, Err(SessionError::Export(ExportError::NotValidated))));

    session.apply(EditCommand::Validate).unwrap();
    let artifact = session.export(&ExportOptions::default()).unwrap();
    assert!(artifact.output_width_px() > 0);
    assert_eq!(artifact.manifest().placement.anchor, session.placement_config().anchor);
}
