//! Validation Gate - Edit/Validate State Machine
//!
//! The gate holds a single bit of trust: "what is on screen was confirmed".
//! It subscribes to the engines' change bus, so any committed edit drops it
//! back to `Editing` without the caller doing anything.
//!
//! Advisory rules produce structured violations; the product's failure
//! mode decides whether they block.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineTunables;
use crate::crop::CropRegion;
use crate::events::{ChangeEvent, ChangeObserver};
use crate::geometry::{CardGeometry, MM_PER_INCH};
use crate::placement::{footprint, PlacementConfig};
use crate::print::PrintSpec;
use crate::source::SourceImage;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GateError {
    #[error("Nothing to validate: no crop region or crop region has zero area")]
    NothingToValidate,

    #[error("Placement is incomplete")]
    PlacementIncomplete,

    #[error("Design has not been validated since the last edit")]
    NotValidated,

    #[error("Validation blocked: {0}")]
    Blocked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    Editing,
    Validated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    Block,
    #[default]
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub violations: Vec<ValidationViolation>,
    pub revision: u64,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn has_warnings(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Warning)
    }
}

/// Everything a rule may look at. Borrowed from the session for one call.
pub struct ValidationInput<'a> {
    pub source: Option<&'a SourceImage>,
    pub crop: Option<&'a CropRegion>,
    pub placement: &'a PlacementConfig,
    pub placement_complete: bool,
    pub geometry: &'a CardGeometry,
    pub tunables: &'a EngineTunables,
    pub print: &'a PrintSpec,
}

impl ValidationInput<'_> {
    fn logo_aspect(&self) -> f64 {
        self.crop.map(|c| c.aspect()).unwrap_or(1.0)
    }
}

/// Advisory rule - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

/// Flags logos that would print below the product's minimum effective DPI.
pub struct EffectiveResolutionRule;

impl ValidationRule for EffectiveResolutionRule {
    fn name(&self) -> &'static str { "effective_resolution" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        let (Some(source), Some(crop)) = (input.source, input.crop) else {
            return vec![];
        };
        let (sx, _) = source.scale_factors();
        let natural_width_px = crop.width * sx;
        let rect = footprint(
            input.placement,
            &input.tunables.presets,
            input.geometry,
            input.tunables.logo_base_width,
            input.logo_aspect(),
        );
        let printed_inches = rect.width() * input.geometry.width_mm() / MM_PER_INCH;
        if !(printed_inches > 0.0) {
            return vec![];
        }
        let dpi = natural_width_px / printed_inches;
        let min = f64::from(input.print.min_effective_dpi);
        if dpi < min {
            vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Warning,
                message: "Logo resolution is low for print".to_string(),
                expected: Some(format!("{} dpi minimum", input.print.min_effective_dpi)),
                actual: Some(format!("{:.0} dpi", dpi)),
                remediation: vec![
                    "Upload a higher resolution logo".to_string(),
                    "Reduce the logo scale".to_string(),
                ],
            }]
        } else {
            vec![]
        }
    }
}

/// Flags anchored logos whose box crosses the safe-zone margin.
pub struct SafeZoneRule;

impl ValidationRule for SafeZoneRule {
    fn name(&self) -> &'static str { "logo_in_safe_zone" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        if input.placement.is_full() {
            return vec![];
        }
        let rect = footprint(
            input.placement,
            &input.tunables.presets,
            input.geometry,
            input.tunables.logo_base_width,
            input.logo_aspect(),
        );
        let safe = input.geometry.safe_zone_rect();
        if safe.contains_rect(&rect) {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Warning,
            message: "Logo extends past the safe zone and may be trimmed".to_string(),
            expected: Some(format!(
                "inside [{:.3}, {:.3}]x[{:.3}, {:.3}]",
                safe.min_x, safe.max_x, safe.min_y, safe.max_y
            )),
            actual: Some(format!(
                "[{:.3}, {:.3}]x[{:.3}, {:.3}]",
                rect.min_x, rect.max_x, rect.min_y, rect.max_y
            )),
            remediation: vec![
                "Move the logo toward the center".to_string(),
                "Reduce the logo scale".to_string(),
            ],
        }]
    }
}

/// Validator orchestrates advisory rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
    failure_mode: FailureMode,
}

impl Validator {
    pub fn new(failure_mode: FailureMode) -> Self {
        Self {
            rules: vec![Box::new(EffectiveResolutionRule), Box::new(SafeZoneRule)],
            failure_mode,
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn run(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        self.rules.iter().flat_map(|r| r.validate(input)).collect()
    }

    /// Violations that stop the transition under the current failure mode.
    fn blocking<'v>(&self, violations: &'v [ValidationViolation]) -> Vec<&'v ValidationViolation> {
        violations
            .iter()
            .filter(|v| match self.failure_mode {
                FailureMode::Block => v.severity != ViolationSeverity::Info,
                FailureMode::Warn => v.severity == ViolationSeverity::Error,
            })
            .collect()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(FailureMode::default())
    }
}

/// Two-state gate. `revision` counts committed edits so a validation racing
/// an edit can never win.
#[derive(Debug, Default)]
pub struct ValidationGate {
    validated: AtomicBool,
    revision: AtomicU64,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ValidationState {
        if self.validated.load(Ordering::SeqCst) {
            ValidationState::Validated
        } else {
            ValidationState::Editing
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// `Editing -> Validated`. Requires a non-empty crop and a complete
    /// placement; advisory rules may also block depending on policy.
    pub fn validate(
        &self,
        validator: &Validator,
        input: &ValidationInput<'_>,
    ) -> Result<ValidationReport, GateError> {
        let revision = self.revision();

        match input.crop {
            Some(crop) if !crop.is_empty() => {}
            _ => {
                tracing::warn!("validate rejected: nothing to validate");
                return Err(GateError::NothingToValidate);
            }
        }
        if !input.placement_complete {
            tracing::warn!("validate rejected: placement incomplete");
            return Err(GateError::PlacementIncomplete);
        }

        let violations = validator.run(input);
        let blocking = validator.blocking(&violations);
        if !blocking.is_empty() {
            let messages: Vec<_> = blocking
                .iter()
                .map(|v| format!("{}: {}", v.rule, v.message))
                .collect();
            return Err(GateError::Blocked(messages.join("; ")));
        }

        if self.revision() != revision {
            return Err(GateError::NotValidated);
        }
        self.validated.store(true, Ordering::SeqCst);
        tracing::info!(revision, warnings = violations.len(), "design validated");

        Ok(ValidationReport {
            violations,
            revision,
            validated_at: Utc::now(),
        })
    }

    /// `Validated -> Editing`. Driven by the change bus.
    pub fn invalidate(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        if self.validated.swap(false, Ordering::SeqCst) {
            tracing::debug!("validation reset by edit");
        }
    }

    /// Current revision if validated, for callers about to export.
    pub fn ensure_validated(&self) -> Result<u64, GateError> {
        let revision = self.revision();
        match self.state() {
            ValidationState::Validated => Ok(revision),
            ValidationState::Editing => Err(GateError::NotValidated),
        }
    }
}

impl ChangeObserver for ValidationGate {
    fn on_change(&self, _event: &ChangeEvent) {
        self.invalidate();
    }
}
