//! Print Authority System
//!
//! Defines where the output resolution for proofs and resolution checks
//! comes from, so callers never branch on "did the user override this".

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrintError {
    #[error("DPI must be between 72 and 1200, got {0}")]
    DpiOutOfRange(u32),

    #[error("Minimum effective DPI {0} exceeds target DPI {1}")]
    MinimumAboveTarget(u32, u32),
}

/// PrintAuthority determines where print specifications come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintAuthority {
    /// System defaults (fallback)
    #[default]
    System,
    /// Product-profile specifications
    Product,
    /// User-provided overrides (with validation)
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSpec {
    #[serde(default)]
    pub authority: PrintAuthority,
    /// Resolution proofs are rendered at.
    pub dpi: u32,
    /// Below this effective resolution the logo is flagged as soft.
    pub min_effective_dpi: u32,
}

impl Default for PrintSpec {
    fn default() -> Self {
        Self {
            authority: PrintAuthority::System,
            dpi: 300,
            min_effective_dpi: 200,
        }
    }
}

impl PrintSpec {
    pub fn from_product(dpi: u32, min_effective_dpi: u32) -> Result<Self, PrintError> {
        Self::checked(PrintAuthority::Product, dpi, min_effective_dpi)
    }

    pub fn from_user(dpi: u32, min_effective_dpi: u32) -> Result<Self, PrintError> {
        Self::checked(PrintAuthority::User, dpi, min_effective_dpi)
    }

    fn checked(authority: PrintAuthority, dpi: u32, min_effective_dpi: u32) -> Result<Self, PrintError> {
        if !(72..=1200).contains(&dpi) {
            return Err(PrintError::DpiOutOfRange(dpi));
        }
        if min_effective_dpi > dpi {
            return Err(PrintError::MinimumAboveTarget(min_effective_dpi, dpi));
        }
        Ok(Self {
            authority,
            dpi,
            min_effective_dpi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_dpi_bounds() {
        assert_eq!(PrintSpec::from_user(50, 50), Err(PrintError::DpiOutOfRange(50)));
        let spec = PrintSpec::from_user(600, 300).unwrap();
        assert_eq!(spec.authority, PrintAuthority::User);
    }

    #[test]
    fn test_minimum_above_target() {
        assert!(matches!(
            PrintSpec::from_product(300, 400),
            Err(PrintError::MinimumAboveTarget(400, 300))
        ));
    }
}
