//! CardLogo Core - Logo Placement and Print-Safe Rasterization
//!
//! # The Five Rules (Non-Negotiable)
//! 1. The Card Is the Frame
//! 2. The Safe Zone Is a Wall, the Grid Is a Suggestion
//! 3. Any Edit Voids Validation
//! 4. Export Only What Was Validated
//! 5. Natural Pixels, Not Preview Pixels

pub mod geometry;
pub mod config;
pub mod print;
pub mod products;
pub mod events;
pub mod source;
pub mod crop;
pub mod placement;
pub mod validation;
pub mod hashing;
pub mod raster;
pub mod session;

pub use geometry::{CardGeometry, NormRect, Point, Size};
pub use config::EngineTunables;
pub use products::{ProductProfile, ProductRegistry};
pub use crop::{CropEngine, CropMode, CropRect, CropRegion, CropError};
pub use placement::{
    Anchor, BlendMode, Direction, DragConstraint, DragSession, PlacementConfig, PlacementEngine,
    PlacementMode, Preset,
};
pub use validation::{GateError, ValidationGate, ValidationReport, ValidationState};
pub use raster::{ExportArtifact, ExportError, ExportOptions, RasterExporter};
pub use source::{ImageOrigin, LoadState, SourceImage};
pub use session::{CommandOutcome, EditCommand, EditSession, SessionError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_ENGINE_VERSION: &str = "1.0.0";
