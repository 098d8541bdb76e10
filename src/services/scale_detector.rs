//! Scale detection: ask the vision model to read the measurement scale off
//! a single blueprint page.

use serde_json::json;
use tracing::debug;

use crate::domain::ScaleDetection;
use crate::error::TakeoffError;
use crate::services::tools::ToolRegistry;
use crate::services::vision::{ImageAttachment, PromptPart, VisionModel, VisionPrompt};

const SCALE_INSTRUCTIONS: &str = r#"You are an expert at reading architectural drawings and identifying scale notations.

Your task is to find and interpret the scale of a blueprint.

## Where to Look for Scale

1. **Title Block** - Usually bottom right corner, contains project info and scale
2. **Graphic Scale** - A bar scale showing distance measurements
3. **Near North Arrow** - Scale notation often placed nearby
4. **Drawing Labels** - Individual drawings may have their own scale

## Common Architectural Scales

- 1/4" = 1'-0" (Quarter inch scale, most common for floor plans)
- 1/8" = 1'-0" (Eighth inch scale, for larger buildings)
- 1/2" = 1'-0" (Half inch scale, for details)
- 1" = 1'-0" (Full scale, for details)
- 3/4" = 1'-0" (Three-quarter inch scale)
- 1" = 10' (Engineering scale)
- 1" = 20' (Site plans)

## Metric Scales

- 1:50 (similar to 1/4" = 1'-0")
- 1:100 (similar to 1/8" = 1'-0")
- 1:200 (site plans)

## Verification Methods

1. Check if standard elements match expected sizes:
   - Standard doors: 3'-0" wide, 6'-8" or 7'-0" tall
   - Standard windows: 3'-0" x 4'-0" common
   - Interior walls: typically 4-1/2" to 5" thick (2x4 + drywall)

2. Look for dimension strings on the drawing

## Output

- If you find a clear scale notation, confidence should be high (0.8-1.0)
- If inferring from standard elements, confidence should be medium (0.5-0.7)
- If uncertain, confidence should be low (0.2-0.4)

Always explain your reasoning."#;

/// JSON schema the detection answer must satisfy.
fn scale_detection_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "detected": {"type": "boolean"},
            "scale_info": {
                "type": ["object", "null"],
                "properties": {
                    "scale_string": {"type": "string"},
                    "pixels_per_foot": {"type": ["number", "null"]},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                    "source": {"type": "string", "enum": ["auto", "manual", "inferred"]}
                },
                "required": ["scale_string"]
            },
            "reasoning": {"type": "string"}
        },
        "required": ["detected", "reasoning"]
    })
}

/// Detect the scale from a blueprint page image.
///
/// Failures here are the caller's to soften: the pipeline treats them as
/// "no scale detected" rather than aborting.
pub async fn detect_scale(
    vision: &dyn VisionModel,
    image: &[u8],
    media_type: &'static str,
) -> Result<ScaleDetection, TakeoffError> {
    let prompt = VisionPrompt {
        instructions: SCALE_INSTRUCTIONS.to_string(),
        parts: vec![
            PromptPart::Text(
                "Analyze this architectural drawing and identify the scale.".to_string(),
            ),
            PromptPart::Image(ImageAttachment {
                data: image.to_vec(),
                media_type,
            }),
        ],
        schema_name: "scale_detection",
        schema: scale_detection_schema(),
    };

    // Scale detection never uses tools; the registry stays empty.
    let output = vision.submit(prompt, &ToolRegistry::new()).await?;

    let detection: ScaleDetection = serde_json::from_value(output)
        .map_err(|e| TakeoffError::Inference(format!("malformed scale detection: {e}")))?;
    detection.validate()?;

    debug!(detected = detection.detected, "Scale detection finished");
    Ok(detection.normalized())
}
