//! Product Profiles - Card Substrates as Contracts
//!
//! A profile pins the physical geometry, the engine tunables and the print
//! settings for one product type. Profiles are JSON files; the built-in
//! CR80 profile is always available.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, EngineTunables};
use crate::geometry::CardGeometry;
use crate::print::{PrintError, PrintSpec};
use crate::validation::FailureMode;
use crate::ENGINE_VERSION;

pub type ProductId = String;

pub const BUILTIN_PRODUCT: &str = "cr80";

#[derive(Debug, Error)]
pub enum ProductError {
    #[error("Product not found: {0}")]
    NotFound(String),

    #[error("Product {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Invalid tunables: {0}")]
    Tunables(#[from] ConfigError),

    #[error("Invalid print settings: {0}")]
    Print(#[from] PrintError),

    #[error("Failed to read products: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductProfile {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_min_version")]
    pub engine_min_version: String,
    #[serde(default)]
    pub deprecated: bool,
    pub geometry: CardGeometry,
    #[serde(default)]
    pub tunables: EngineTunables,
    #[serde(default)]
    pub print: PrintSpec,
    /// Whether advisory validation warnings block export.
    #[serde(default)]
    pub failure_mode: FailureMode,
}

fn default_min_version() -> String {
    crate::MIN_ENGINE_VERSION.to_string()
}

impl ProductProfile {
    pub fn cr80() -> Self {
        Self {
            id: BUILTIN_PRODUCT.to_string(),
            name: "Standard business card (CR80)".to_string(),
            description: "ISO/IEC 7810 ID-1, 85.6 x 54.0 mm".to_string(),
            engine_min_version: default_min_version(),
            deprecated: false,
            geometry: CardGeometry::cr80(),
            tunables: EngineTunables::default(),
            print: PrintSpec::default(),
            failure_mode: FailureMode::default(),
        }
    }

    /// Engine version, tunables and print settings all usable.
    pub fn check(&self) -> Result<(), ProductError> {
        let engine = semver::Version::parse(ENGINE_VERSION)?;
        let min = semver::Version::parse(&self.engine_min_version)?;
        if engine < min {
            return Err(ProductError::EngineVersionMismatch(
                self.id.clone(),
                self.engine_min_version.clone(),
                ENGINE_VERSION.to_string(),
            ));
        }
        self.tunables.validate()?;
        PrintSpec::from_product(self.print.dpi, self.print.min_effective_dpi)?;
        Ok(())
    }
}

/// Product registry - loads and caches profiles
pub struct ProductRegistry {
    products: HashMap<ProductId, ProductProfile>,
}

impl ProductRegistry {
    /// Registry holding only the built-in profile.
    pub fn new() -> Self {
        let mut products = HashMap::new();
        let builtin = ProductProfile::cr80();
        products.insert(builtin.id.clone(), builtin);
        Self { products }
    }

    /// Built-ins plus every `*.json` profile in `dir`. Unreadable or invalid
    /// files are skipped with a warning; a missing directory is not an error.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ProductError> {
        let mut registry = Self::new();
        if !dir.exists() {
            return Ok(registry);
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<ProductProfile>(&s).map_err(|e| e.to_string()));
            match parsed {
                Ok(profile) => {
                    tracing::debug!(id = %profile.id, path = %path.display(), "loaded product");
                    registry.register(profile);
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping product file");
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Result<&ProductProfile, ProductError> {
        self.products
            .get(id)
            .ok_or_else(|| ProductError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<&ProductProfile> {
        let mut list: Vec<_> = self.products.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn register(&mut self, profile: ProductProfile) {
        self.products.insert(profile.id.clone(), profile);
    }
}

impl Default for ProductRegistry {
    fn default() -> Self {
        Self::new()
    }
}
