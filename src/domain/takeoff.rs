//! Quantity takeoff request and result types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TakeoffError;

/// Types of measurements in a construction takeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementCategory {
    Count,
    Linear,
    Area,
    Volume,
}

impl MeasurementCategory {
    /// Units that are semantically consistent with this category.
    pub fn canonical_units(&self) -> &'static [&'static str] {
        match self {
            Self::Count => &["ea", "pcs"],
            Self::Linear => &["LF", "m"],
            Self::Area => &["SF", "m²"],
            Self::Volume => &["CF", "CY"],
        }
    }

    pub fn accepts_unit(&self, unit: &str) -> bool {
        self.canonical_units().contains(&unit)
    }
}

/// A single measurable item extracted from a blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeoffItem {
    /// Name of the item, e.g. `Interior Door 3'-0" x 6'-8"`.
    pub name: String,
    pub category: MeasurementCategory,
    pub quantity: f64,
    /// Unit of measurement (ea, LF, SF, CF, ...).
    pub unit: String,
    /// Location on the blueprint, e.g. `Floor 1, Room 101`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Confidence in the measurement, 0-1. Reflects drawing clarity, not
    /// scale-detection confidence.
    #[serde(default = "default_item_confidence")]
    pub confidence: f64,
}

fn default_item_confidence() -> f64 {
    0.8
}

impl TakeoffItem {
    pub fn validate(&self) -> Result<(), TakeoffError> {
        if self.quantity < 0.0 || !self.quantity.is_finite() {
            return Err(TakeoffError::Inference(format!(
                "item '{}' has invalid quantity {}",
                self.name, self.quantity
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(TakeoffError::Inference(format!(
                "item '{}' has out-of-range confidence {}",
                self.name, self.confidence
            )));
        }
        if !self.category.accepts_unit(&self.unit) {
            return Err(TakeoffError::Inference(format!(
                "item '{}' pairs unit '{}' with category {:?}",
                self.name, self.unit, self.category
            )));
        }
        Ok(())
    }
}

/// Complete takeoff result from a blueprint analysis.
///
/// `summary` is advisory; the item list is ground truth. A `BTreeMap` keeps
/// serialization order stable so identical analyses produce identical JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TakeoffResult {
    #[serde(default)]
    pub items: Vec<TakeoffItem>,
    #[serde(default)]
    pub summary: BTreeMap<String, f64>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub scale_used: Option<String>,
    #[serde(default = "default_page_count")]
    pub page_count: usize,
}

fn default_page_count() -> usize {
    1
}

impl TakeoffResult {
    pub fn validate(&self) -> Result<(), TakeoffError> {
        for item in &self.items {
            item.validate()?;
        }
        Ok(())
    }
}

/// Request to perform a takeoff analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeoffRequest {
    /// URL of the blueprint PDF or image.
    pub blueprint_url: String,
    /// Manual scale override, e.g. `1/4" = 1'-0"`. When present, scale
    /// inference is never invoked.
    #[serde(default)]
    pub scale: Option<String>,
    #[serde(default = "default_auto_detect")]
    pub auto_detect_scale: bool,
    /// Specific elements to prioritize, e.g. `["doors", "electrical"]`.
    #[serde(default)]
    pub focus_areas: Option<Vec<String>>,
}

fn default_auto_detect() -> bool {
    true
}

impl TakeoffRequest {
    pub fn validate(&self) -> Result<(), TakeoffError> {
        if self.blueprint_url.trim().is_empty() {
            return Err(TakeoffError::Validation(
                "blueprint_url is required".to_string(),
            ));
        }
        url::Url::parse(&self.blueprint_url).map_err(|e| {
            TakeoffError::Validation(format!("blueprint_url is not a valid URL: {e}"))
        })?;
        Ok(())
    }
}
