//! Blueprint source material: raw bytes, rendered pages, and scale metadata.

use serde::{Deserialize, Serialize};

use crate::error::TakeoffError;

/// Media kind of a fetched blueprint, sniffed from its leading bytes.
///
/// Classification is total: every byte sequence maps to exactly one kind,
/// and only the signature prefix is ever inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Pdf,
    Png,
    Jpeg,
    Unknown,
}

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

impl MediaKind {
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF") {
            Self::Pdf
        } else if bytes.starts_with(&PNG_MAGIC) {
            Self::Png
        } else if bytes.starts_with(&[0xFF, 0xD8]) {
            Self::Jpeg
        } else {
            Self::Unknown
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Unknown => "application/octet-stream",
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, Self::Pdf)
    }
}

/// A fetched blueprint, alive only for the duration of one request.
#[derive(Debug, Clone)]
pub struct BlueprintSource {
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
}

impl BlueprintSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        let kind = MediaKind::sniff(&bytes);
        Self { bytes, kind }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// One raster page produced by the renderer (or the raw input itself for
/// non-PDF sources).
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// PNG-encoded image bytes (or the untouched input for pass-through).
    pub png: Vec<u8>,
    /// 1-based page number.
    pub number: usize,
    pub width_px: Option<u32>,
    pub height_px: Option<u32>,
}

/// Metadata about a PDF: page count plus first-page geometry in native
/// points (72 per inch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PdfInfo {
    pub page_count: usize,
    pub width: u32,
    pub height: u32,
}

/// How a scale value was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleSource {
    /// Read directly off the drawing (title block, graphic scale).
    Auto,
    /// Supplied by the caller. Never produced by inference.
    Manual,
    /// Estimated from standard element sizes.
    Inferred,
}

/// Information about a blueprint's measurement scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleInfo {
    /// Human-readable scale, e.g. `1/4" = 1'-0"`.
    pub scale_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixels_per_foot: Option<f64>,
    /// Confidence in the detection, 0-1.
    #[serde(default = "default_scale_confidence")]
    pub confidence: f64,
    #[serde(default = "default_scale_source")]
    pub source: ScaleSource,
}

fn default_scale_confidence() -> f64 {
    0.5
}

fn default_scale_source() -> ScaleSource {
    ScaleSource::Manual
}

/// Result of asking the vision model to read the scale off a drawing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleDetection {
    pub detected: bool,
    #[serde(default)]
    pub scale_info: Option<ScaleInfo>,
    /// Free-text justification of how the scale was determined.
    pub reasoning: String,
}

impl ScaleDetection {
    pub fn validate(&self) -> Result<(), TakeoffError> {
        if let Some(info) = &self.scale_info {
            if !(0.0..=1.0).contains(&info.confidence) {
                return Err(TakeoffError::Inference(format!(
                    "scale '{}' has out-of-range confidence {}",
                    info.scale_string, info.confidence
                )));
            }
        }
        Ok(())
    }

    /// Inference can never claim the scale was caller-supplied; coerce any
    /// `manual` provenance coming back from the model to `inferred`.
    pub fn normalized(mut self) -> Self {
        if let Some(info) = self.scale_info.as_mut() {
            if info.source == ScaleSource::Manual {
                info.source = ScaleSource::Inferred;
            }
        }
        self
    }
}
