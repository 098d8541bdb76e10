//! Callback tools the vision model may invoke mid-reasoning.
//!
//! A closed, name-keyed registry: context queries answering "what scale" and
//! "what to focus on", plus pure geometry calculators so the model offloads
//! arithmetic instead of approximating it.

use serde::Deserialize;
use serde_json::{json, Value};

/// Outcome of a tool dispatch. Errors are fed back to the model as tool
/// errors; they never abort the extraction.
pub type ToolOutcome = Result<Value, String>;

type Handler = Box<dyn Fn(&Value) -> ToolOutcome + Send + Sync>;

pub struct ToolDef {
    pub name: &'static str,
    description: &'static str,
    parameters: Value,
    handler: Handler,
}

/// Fixed set of named capabilities exposed to one extraction run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        mut self,
        name: &'static str,
        description: &'static str,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(&Value) -> ToolOutcome + Send + Sync + 'static,
    {
        self.tools.push(ToolDef {
            name,
            description,
            parameters,
            handler: Box::new(handler),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in chat-completions function format.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    pub fn dispatch(&self, name: &str, args: &Value) -> ToolOutcome {
        match self.tools.iter().find(|t| t.name == name) {
            Some(tool) => (tool.handler)(args),
            None => Err(format!("unknown tool: {name}")),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the takeoff tool set. `scale` and `focus_areas` are the values
/// resolved for this request; the closures capture them so the model sees
/// request-specific answers.
pub fn takeoff_tools(scale: Option<String>, focus_areas: Option<Vec<String>>) -> ToolRegistry {
    ToolRegistry::new()
        .register(
            "get_scale",
            "Get the scale to use for measurements.",
            json!({"type": "object", "properties": {}}),
            move |_args| {
                let answer = match &scale {
                    Some(s) => format!("Use scale: {s}"),
                    None => "No scale provided. Estimate dimensions based on standard \
                             construction elements (doors are typically 3' wide, 6'8\" tall)."
                        .to_string(),
                };
                Ok(Value::String(answer))
            },
        )
        .register(
            "get_focus_areas",
            "Get any specific areas to focus on.",
            json!({"type": "object", "properties": {}}),
            move |_args| {
                let answer = match &focus_areas {
                    Some(areas) if !areas.is_empty() => {
                        format!("Focus on these elements: {}", areas.join(", "))
                    }
                    _ => "Analyze all visible construction elements.".to_string(),
                };
                Ok(Value::String(answer))
            },
        )
        .register(
            "calculate_area",
            "Calculate area from length and width.",
            json!({
                "type": "object",
                "properties": {
                    "length": {"type": "number"},
                    "width": {"type": "number"}
                },
                "required": ["length", "width"]
            }),
            |args| {
                #[derive(Deserialize)]
                struct Args {
                    length: f64,
                    width: f64,
                }
                let a: Args = parse_args(args)?;
                Ok(json!(round2(a.length * a.width)))
            },
        )
        .register(
            "calculate_linear_total",
            "Calculate total linear measurement from segments.",
            json!({
                "type": "object",
                "properties": {
                    "segments": {"type": "array", "items": {"type": "number"}}
                },
                "required": ["segments"]
            }),
            |args| {
                #[derive(Deserialize)]
                struct Args {
                    segments: Vec<f64>,
                }
                let a: Args = parse_args(args)?;
                Ok(json!(round2(a.segments.iter().sum())))
            },
        )
        .register(
            "calculate_volume",
            "Calculate volume from dimensions.",
            json!({
                "type": "object",
                "properties": {
                    "length": {"type": "number"},
                    "width": {"type": "number"},
                    "depth": {"type": "number"}
                },
                "required": ["length", "width", "depth"]
            }),
            |args| {
                #[derive(Deserialize)]
                struct Args {
                    length: f64,
                    width: f64,
                    depth: f64,
                }
                let a: Args = parse_args(args)?;
                Ok(json!(round2(a.length * a.width * a.depth)))
            },
        )
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| format!("invalid tool arguments: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_rounds_to_two_decimals() {
        let tools = takeoff_tools(None, None);
        let result = tools
            .dispatch("calculate_area", &json!({"length": 12.333, "width": 3.0}))
            .unwrap();
        assert_eq!(result, json!(37.0));

        let result = tools
            .dispatch("calculate_area", &json!({"length": 1.234, "width": 1.0}))
            .unwrap();
        assert_eq!(result, json!(1.23));
    }

    #[test]
    fn linear_total_sums_segments() {
        let tools = takeoff_tools(None, None);
        let result = tools
            .dispatch(
                "calculate_linear_total",
                &json!({"segments": [10.5, 20.25, 0.255]}),
            )
            .unwrap();
        assert_eq!(result, json!(31.01));
    }

    #[test]
    fn volume_multiplies_three_dimensions() {
        let tools = takeoff_tools(None, None);
        let result = tools
            .dispatch(
                "calculate_volume",
                &json!({"length": 2.0, "width": 3.0, "depth": 0.5}),
            )
            .unwrap();
        assert_eq!(result, json!(3.0));
    }

    #[test]
    fn get_scale_answers_with_resolved_scale() {
        let tools = takeoff_tools(Some("1/4\" = 1'-0\"".into()), None);
        let result = tools.dispatch("get_scale", &json!({})).unwrap();
        assert_eq!(result, json!("Use scale: 1/4\" = 1'-0\""));
    }

    #[test]
    fn get_scale_falls_back_to_standard_elements() {
        let tools = takeoff_tools(None, None);
        let result = tools.dispatch("get_scale", &json!({})).unwrap();
        let text = result.as_str().unwrap();
        assert!(text.contains("No scale provided"));
        assert!(text.contains("standard"));
    }

    #[test]
    fn get_focus_areas_lists_hints_or_defaults() {
        let tools = takeoff_tools(None, Some(vec!["doors".into(), "windows".into()]));
        let result = tools.dispatch("get_focus_areas", &json!({})).unwrap();
        assert_eq!(result, json!("Focus on these elements: doors, windows"));

        let tools = takeoff_tools(None, None);
        let result = tools.dispatch("get_focus_areas", &json!({})).unwrap();
        assert_eq!(result, json!("Analyze all visible construction elements."));
    }

    #[test]
    fn unknown_tools_report_an_error_without_panicking() {
        let tools = takeoff_tools(None, None);
        let err = tools.dispatch("delete_everything", &json!({})).unwrap_err();
        assert!(err.contains("unknown tool"));
    }

    #[test]
    fn malformed_arguments_are_a_tool_error() {
        let tools = takeoff_tools(None, None);
        let err = tools
            .dispatch("calculate_area", &json!({"length": "wide"}))
            .unwrap_err();
        assert!(err.contains("invalid tool arguments"));
    }

    #[test]
    fn definitions_cover_the_full_registry() {
        let tools = takeoff_tools(None, None);
        let defs = tools.definitions();
        assert_eq!(defs.len(), 5);
        let names: Vec<&str> = defs
            .iter()
            .map(|d| d["function"]["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"get_scale"));
        assert!(names.contains(&"calculate_volume"));
    }
}
