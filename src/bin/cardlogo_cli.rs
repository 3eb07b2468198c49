//! CardLogo CLI - Bridge interface for order tooling
//!
//! Commands: products, geometry, export, proof
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when validation or export is refused

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::Level;

use cardlogo_core::{
    placement::DragConstraint,
    print::PrintSpec,
    products::{ProductError, BUILTIN_PRODUCT},
    raster::encode_png, BlendMode, CropMode,
    EditCommand, EditSession, ExportOptions, ImageOrigin, Preset, ProductRegistry, SessionError, Size,
};

#[derive(Parser)]
#[command(name = "cardlogo-cli")]
#[command(about = "CardLogo CLI - logo placement and print export for business cards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to product profiles directory
    #[arg(short = 'd', long, default_value = "products")]
    products_dir: PathBuf,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List available products
    Products,

    /// Show card geometry, zones and drag limits
    Geometry {
        #[arg(short, long, default_value = BUILTIN_PRODUCT)]
        product: String,
    },

    /// Validate a design and export the print-ready logo
    Export {
        #[command(flatten)]
        design: DesignArgs,

        /// Output PNG path
        #[arg(short, long)]
        out: PathBuf,

        /// Include the PNG as base64 in the JSON output
        #[arg(long)]
        inline: bool,
    },

    /// Render a card proof with the logo placed
    Proof {
        #[command(flatten)]
        design: DesignArgs,

        /// Output PNG path
        #[arg(short, long)]
        out: PathBuf,

        /// Hide trim and safe-zone guides
        #[arg(long)]
        no_guides: bool,
    },
}

#[derive(Args)]
struct DesignArgs {
    #[arg(short, long, default_value = BUILTIN_PRODUCT)]
    product: String,

    /// Logo image file
    #[arg(short, long)]
    image: PathBuf,

    /// Display size the crop was made at, e.g. 600x400
    #[arg(long, value_parser = parse_size)]
    display: Option<Size>,

    #[arg(long, value_parser = parse_enum::<CropMode>)]
    crop_mode: Option<CropMode>,

    #[arg(long, value_parser = parse_enum::<Preset>)]
    preset: Option<Preset>,

    #[arg(long)]
    scale: Option<f64>,

    #[arg(long)]
    opacity: Option<f64>,

    #[arg(long, value_parser = parse_enum::<BlendMode>)]
    blend: Option<BlendMode>,

    /// JSON array of edit commands applied after the flags above
    #[arg(long)]
    commands: Option<String>,

    /// Override the product's print DPI
    #[arg(long)]
    dpi: Option<u32>,

    /// Backdrop color as RRGGBBAA hex
    #[arg(long, value_parser = parse_rgba)]
    background: Option<[u8; 4]>,
}

fn parse_enum<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s.split_once('x').ok_or("expected WIDTHxHEIGHT")?;
    let w: f64 = w.trim().parse().map_err(|e| format!("width: {}", e))?;
    let h: f64 = h.trim().parse().map_err(|e| format!("height: {}", e))?;
    Ok(Size::new(w, h))
}

fn parse_rgba(s: &str) -> Result<[u8; 4], String> {
    let s = s.trim_start_matches('#');
    if s.len() != 8 {
        return Err("expected 8 hex digits".to_string());
    }
    let mut out = [0u8; 4];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|e| e.to_string())?;
    }
    Ok(out)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => println!(r#"{{"success": false, "error": "{}"}}"#, e),
    }
}

fn fail(error: impl std::fmt::Display, code: u8) -> ExitCode {
    print_json(&serde_json::json!({
        "success": false,
        "error": error.to_string(),
    }));
    ExitCode::from(code)
}

/// Loads the logo and replays the requested edits.
fn build_session(registry: &ProductRegistry, design: &DesignArgs) -> Result<EditSession, SessionError> {
    let mut profile = registry.get(&design.product)?.clone();
    if let Some(dpi) = design.dpi {
        let min = profile.print.min_effective_dpi.min(dpi);
        profile.print = PrintSpec::from_user(dpi, min).map_err(ProductError::from)?;
    }
    let mut session = EditSession::new(profile)?;
    session.load_image(ImageOrigin::Path(design.image.clone()), design.display)?;

    let mut commands = vec![];
    if let Some(mode) = design.crop_mode {
        commands.push(EditCommand::SelectCropMode { mode });
    }
    if let Some(preset) = design.preset {
        commands.push(EditCommand::ApplyPreset { preset });
    }
    if let Some(value) = design.scale {
        commands.push(EditCommand::SetScale { value });
    }
    if let Some(value) = design.opacity {
        commands.push(EditCommand::SetOpacity { value });
    }
    if let Some(mode) = design.blend {
        commands.push(EditCommand::SetBlendMode { mode });
    }
    for command in commands {
        session.apply(command)?;
    }
    Ok(session)
}

fn replay_json(session: &mut EditSession, json: &str) -> Result<(), String> {
    let commands: Vec<EditCommand> = serde_json::from_str(json).map_err(|e| format!("Invalid commands: {}", e))?;
    for command in commands {
        session.apply(command).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let registry = match ProductRegistry::load_from_dir(&cli.products_dir) {
        Ok(r) => r,
        Err(e) => return fail(format!("Failed to load products: {}", e), 1),
    };

    match cli.command {
        Commands::Products => {
            let products: Vec<_> = registry
                .list()
                .iter()
                .map(|p| serde_json::json!({
                    "id": p.id,
                    "name": p.name,
                    "widthMm": p.geometry.width_mm(),
                    "heightMm": p.geometry.height_mm(),
                    "dpi": p.print.dpi,
                    "deprecated": p.deprecated,
                }))
                .collect();
            print_json(&serde_json::Value::Array(products));
            ExitCode::SUCCESS
        }

        Commands::Geometry { product } => {
            let profile = match registry.get(&product) {
                Ok(p) => p,
                Err(e) => return fail(e, 1),
            };
            let g = &profile.geometry;
            let (trim_w, trim_h) = g.trim_px(profile.print.dpi);
            let (bleed_w, bleed_h) = g.bleed_px(profile.print.dpi);
            print_json(&serde_json::json!({
                "product": profile.id,
                "geometry": g,
                "aspectRatio": g.aspect_ratio(),
                "safeZoneRect": g.safe_zone_rect(),
                "bleedRect": g.bleed_rect(),
                "dragConstraint": DragConstraint::for_card(g, &profile.tunables),
                "trimPx": [trim_w, trim_h],
                "bleedPx": [bleed_w, bleed_h],
            }));
            ExitCode::SUCCESS
        }

        Commands::Export { design, out, inline } => {
            let mut session = match build_session(&registry, &design) {
                Ok(s) => s,
                Err(e) => return fail(e, 1),
            };
            if let Some(json) = &design.commands {
                if let Err(e) = replay_json(&mut session, json) {
                    return fail(e, 1);
                }
            }

            let report = match session.validate() {
                Ok(r) => r,
                Err(e) => return fail(e, 2),
            };
            let options = ExportOptions { background: design.background };
            let artifact = match session.export(&options) {
                Ok(a) => a,
                Err(e) => return fail(e, 2),
            };
            if let Err(e) = std::fs::write(&out, artifact.png()) {
                return fail(format!("Failed to write {}: {}", out.display(), e), 1);
            }

            let manifest_hash = match artifact.manifest_hash() {
                Ok(h) => h,
                Err(e) => return fail(e, 1),
            };
            let mut output = serde_json::json!({
                "success": true,
                "path": out,
                "manifest": artifact.manifest(),
                "manifestHash": manifest_hash,
                "validation": report,
            });
            if inline {
                output["dataBase64"] = serde_json::Value::String(artifact.to_base64());
            }
            print_json(&output);
            ExitCode::SUCCESS
        }

        Commands::Proof { design, out, no_guides } => {
            let mut session = match build_session(&registry, &design) {
                Ok(s) => s,
                Err(e) => return fail(e, 1),
            };
            if let Some(json) = &design.commands {
                if let Err(e) = replay_json(&mut session, json) {
                    return fail(e, 1);
                }
            }
            if no_guides && session.guides_visible() {
                if let Err(e) = session.apply(EditCommand::ToggleGuides) {
                    return fail(e, 1);
                }
            }

            let options = ExportOptions { background: design.background };
            let proof = match session.render_proof(&options) {
                Ok(p) => p,
                Err(e) => return fail(e, 1),
            };
            let (width, height) = proof.dimensions();
            let png = match encode_png(proof) {
                Ok(p) => p,
                Err(e) => return fail(e, 1),
            };
            if let Err(e) = std::fs::write(&out, &png) {
                return fail(format!("Failed to write {}: {}", out.display(), e), 1);
            }
            print_json(&serde_json::json!({
                "success": true,
                "path": out,
                "widthPx": width,
                "heightPx": height,
                "guides": session.guides_visible(),
            }));
            ExitCode::SUCCESS
        }
    }
}
