//! Takeoff extraction agent: the vision model walks every page image and
//! produces the structured quantity takeoff, calling back into the tool
//! registry for scale, focus hints, and geometry arithmetic.

use futures::channel::mpsc::UnboundedSender;
use serde_json::json;
use tracing::debug;

use crate::domain::{RenderedPage, TakeoffResult};
use crate::error::TakeoffError;
use crate::services::tools::takeoff_tools;
use crate::services::vision::{ImageAttachment, PromptPart, VisionModel, VisionPrompt};

const TAKEOFF_INSTRUCTIONS: &str = r#"You are an expert construction estimator analyzing architectural blueprints.

Your task is to perform a quantity takeoff - extracting all measurable items from the blueprint.

## Measurement Categories

1. **COUNT** - Individual items (doors, windows, fixtures, outlets)
   - Units: ea (each), pcs (pieces)

2. **LINEAR** - Length measurements (walls, pipes, trim)
   - Units: LF (linear feet), m (meters)

3. **AREA** - Surface measurements (floors, walls, roofing)
   - Units: SF (square feet), m² (square meters)

4. **VOLUME** - Cubic measurements (concrete, excavation)
   - Units: CF (cubic feet), CY (cubic yards)

## Instructions

1. Carefully examine the blueprint image(s)
2. Identify and count all relevant construction elements
3. Use the provided scale to calculate real-world dimensions
4. Group similar items together
5. Note the location of items when identifiable
6. Provide confidence scores based on clarity of the drawing

## Scale Usage

Call the get_scale tool to learn which scale applies. If a scale is provided,
use it for all linear, area, and volume calculations. Common scales:
- 1/4" = 1'-0" (1 inch on drawing = 4 feet real)
- 1/8" = 1'-0" (1 inch on drawing = 8 feet real)

Use the calculate_area, calculate_linear_total, and calculate_volume tools
for arithmetic instead of estimating mentally.

## Output Requirements

- Be thorough - capture every identifiable element
- Be accurate - use the scale correctly
- Be organized - group by category and type
- Be honest - use lower confidence for unclear items"#;

/// JSON schema for the final takeoff result.
fn takeoff_result_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "category": {"type": "string", "enum": ["count", "linear", "area", "volume"]},
                        "quantity": {"type": "number", "minimum": 0},
                        "unit": {"type": "string"},
                        "location": {"type": ["string", "null"]},
                        "notes": {"type": ["string", "null"]},
                        "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "required": ["name", "category", "quantity", "unit"]
                }
            },
            "summary": {
                "type": "object",
                "additionalProperties": {"type": "number"}
            },
            "notes": {"type": "array", "items": {"type": "string"}},
            "scale_used": {"type": ["string", "null"]},
            "page_count": {"type": "integer"}
        },
        "required": ["items"]
    })
}

fn build_prompt(pages: &[RenderedPage], media_type: &'static str) -> VisionPrompt {
    let mut parts = vec![PromptPart::Text(
        "Analyze this blueprint and perform a complete quantity takeoff.".to_string(),
    )];
    for page in pages {
        parts.push(PromptPart::Image(ImageAttachment {
            data: page.png.clone(),
            media_type,
        }));
        if pages.len() > 1 {
            parts.push(PromptPart::Text(format!(
                "(Page {} of {})",
                page.number,
                pages.len()
            )));
        }
    }

    VisionPrompt {
        instructions: TAKEOFF_INSTRUCTIONS.to_string(),
        parts,
        schema_name: "takeoff_result",
        schema: takeoff_result_schema(),
    }
}

/// Run the extraction agent over the full page set. When `chunks` is given,
/// partial model text is forwarded through it (display-only).
pub async fn extract(
    vision: &dyn VisionModel,
    pages: &[RenderedPage],
    media_type: &'static str,
    scale: Option<String>,
    focus_areas: Option<Vec<String>>,
    chunks: Option<UnboundedSender<String>>,
) -> Result<TakeoffResult, TakeoffError> {
    let prompt = build_prompt(pages, media_type);
    let tools = takeoff_tools(scale.clone(), focus_areas);

    let output = match chunks {
        Some(sender) => vision.submit_stream(prompt, &tools, sender).await?,
        None => vision.submit(prompt, &tools).await?,
    };

    let mut result: TakeoffResult = serde_json::from_value(output)
        .map_err(|e| TakeoffError::Inference(format!("malformed takeoff result: {e}")))?;

    // The pipeline, not the model, is authoritative for these two fields
    result.page_count = pages.len().max(1);
    if result.scale_used.is_none() {
        result.scale_used = scale;
    }

    result.validate()?;
    debug!(items = result.items.len(), pages = result.page_count, "Extraction finished");
    Ok(result)
}
