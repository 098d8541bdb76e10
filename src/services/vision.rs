//! Vision model capability.
//!
//! The reasoning engine is an external collaborator: submit a prompt with
//! attached page images, a JSON schema for the final answer, and a tool
//! registry the model may call mid-turn; receive a structured result. The
//! streaming variant additionally forwards partial text as it arrives.
//!
//! The production implementation speaks the OpenAI-compatible
//! chat-completions protocol. Tests inject deterministic stubs.

use async_trait::async_trait;
use base64::Engine;
use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TakeoffError;
use crate::services::tools::ToolRegistry;

/// Maximum reason/act iterations before the turn is abandoned.
const MAX_TOOL_ITERATIONS: usize = 8;

/// Maximum tokens per model response.
const MAX_TOKENS: u32 = 8192;

/// One image attached to a prompt.
pub struct ImageAttachment {
    pub data: Vec<u8>,
    pub media_type: &'static str,
}

/// Ordered prompt content: interleaved text and images, mirroring how pages
/// are presented to the model.
pub enum PromptPart {
    Text(String),
    Image(ImageAttachment),
}

/// A prompt plus the schema the final structured answer must satisfy.
pub struct VisionPrompt {
    /// System-level instruction set.
    pub instructions: String,
    pub parts: Vec<PromptPart>,
    /// Name of the output schema, used for response_format bookkeeping.
    pub schema_name: &'static str,
    /// JSON schema of the expected structured output.
    pub schema: Value,
}

/// Black-box reasoning capability.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Run the prompt to completion and return the structured result.
    async fn submit(
        &self,
        prompt: VisionPrompt,
        tools: &ToolRegistry,
    ) -> Result<Value, TakeoffError>;

    /// Like [`submit`], but forwards partial output text through `chunks` as
    /// it arrives. Chunk delivery is best-effort; the returned value is the
    /// only source of truth.
    async fn submit_stream(
        &self,
        prompt: VisionPrompt,
        tools: &ToolRegistry,
        chunks: UnboundedSender<String>,
    ) -> Result<Value, TakeoffError>;
}

/// Client for an OpenAI-compatible chat-completions endpoint with vision
/// and function-calling support.
pub struct OpenAiVisionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiVisionClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        timeout_seconds: u64,
    ) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        tracing::info!(base_url = base_url, model = model, "Vision client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
        })
    }

    fn api_key(&self) -> Result<&str, TakeoffError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| TakeoffError::Inference("AI API key not configured".to_string()))
    }

    fn build_messages(prompt: &VisionPrompt) -> Vec<Value> {
        let mut content = Vec::new();
        for part in &prompt.parts {
            match part {
                PromptPart::Text(text) => {
                    content.push(json!({"type": "text", "text": text}));
                }
                PromptPart::Image(image) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
                    let data_url = format!("data:{};base64,{}", image.media_type, encoded);
                    content.push(json!({
                        "type": "image_url",
                        "image_url": {"url": data_url, "detail": "high"}
                    }));
                }
            }
        }

        vec![
            json!({"role": "system", "content": prompt.instructions}),
            json!({"role": "user", "content": content}),
        ]
    }

    fn request_body(&self, prompt: &VisionPrompt, messages: &[Value], tools: &ToolRegistry, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_completion_tokens": MAX_TOKENS,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": prompt.schema_name,
                    "schema": prompt.schema,
                }
            },
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.definitions());
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, TakeoffError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key()?))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| TakeoffError::Inference(format!("model unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TakeoffError::Inference(format!(
                "model API error {status}: {text}"
            )));
        }

        Ok(response)
    }

    /// Run executed tool calls back into the conversation.
    fn apply_tool_calls(
        messages: &mut Vec<Value>,
        tools: &ToolRegistry,
        calls: &[CompletedToolCall],
        assistant_text: &str,
    ) {
        let call_msgs: Vec<Value> = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {"name": c.name, "arguments": c.arguments}
                })
            })
            .collect();

        let mut assistant = json!({"role": "assistant", "tool_calls": call_msgs});
        if !assistant_text.is_empty() {
            assistant["content"] = json!(assistant_text);
        }
        messages.push(assistant);

        for call in calls {
            let args: Value =
                serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));

            debug!(tool = %call.name, "Dispatching tool call");
            let content = match tools.dispatch(&call.name, &args) {
                Ok(value) => match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool call failed");
                    format!("error: {e}")
                }
            };

            messages.push(json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": content,
            }));
        }
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionClient {
    async fn submit(
        &self,
        prompt: VisionPrompt,
        tools: &ToolRegistry,
    ) -> Result<Value, TakeoffError> {
        let mut messages = Self::build_messages(&prompt);

        for _iteration in 0..MAX_TOOL_ITERATIONS {
            let body = self.request_body(&prompt, &messages, tools, false);
            let response: ChatResponse = self
                .post(&body)
                .await?
                .json()
                .await
                .map_err(|e| TakeoffError::Inference(format!("malformed model response: {e}")))?;

            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| TakeoffError::Inference("model returned no choices".to_string()))?;

            let text = choice.message.content.unwrap_or_default();
            let calls: Vec<CompletedToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|c| CompletedToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect();

            if calls.is_empty() {
                return parse_structured(&text);
            }
            Self::apply_tool_calls(&mut messages, tools, &calls, &text);
        }

        Err(TakeoffError::Inference(format!(
            "model did not produce a final answer within {MAX_TOOL_ITERATIONS} iterations"
        )))
    }

    async fn submit_stream(
        &self,
        prompt: VisionPrompt,
        tools: &ToolRegistry,
        chunks: UnboundedSender<String>,
    ) -> Result<Value, TakeoffError> {
        let mut messages = Self::build_messages(&prompt);

        for _iteration in 0..MAX_TOOL_ITERATIONS {
            let body = self.request_body(&prompt, &messages, tools, true);
            let response = self.post(&body).await?;

            let turn = read_stream_turn(response, &chunks).await?;

            if turn.tool_calls.is_empty() {
                return parse_structured(&turn.text);
            }
            Self::apply_tool_calls(&mut messages, tools, &turn.tool_calls, &turn.text);
        }

        Err(TakeoffError::Inference(format!(
            "model did not produce a final answer within {MAX_TOOL_ITERATIONS} iterations"
        )))
    }
}

struct CompletedToolCall {
    id: String,
    name: String,
    arguments: String,
}

struct StreamTurn {
    text: String,
    tool_calls: Vec<CompletedToolCall>,
}

/// Consume one streamed completion: forward text deltas, assemble tool-call
/// fragments by index.
async fn read_stream_turn(
    response: reqwest::Response,
    chunks: &UnboundedSender<String>,
) -> Result<StreamTurn, TakeoffError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut text = String::new();
    let mut partial_calls: Vec<CompletedToolCall> = Vec::new();

    while let Some(next) = stream.next().await {
        let bytes = next.map_err(|e| TakeoffError::Inference(format!("stream error: {e}")))?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                continue;
            }

            let chunk: StreamChunk = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable stream chunk");
                    continue;
                }
            };

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    // Best-effort: a closed receiver just stops delivery
                    chunks.unbounded_send(content.clone()).ok();
                    text.push_str(&content);
                }
                for delta in choice.delta.tool_calls.unwrap_or_default() {
                    while partial_calls.len() <= delta.index {
                        partial_calls.push(CompletedToolCall {
                            id: String::new(),
                            name: String::new(),
                            arguments: String::new(),
                        });
                    }
                    let call = &mut partial_calls[delta.index];
                    if let Some(id) = delta.id {
                        call.id = id;
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            call.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            call.arguments.push_str(&arguments);
                        }
                    }
                }
            }
        }
    }

    Ok(StreamTurn {
        text,
        tool_calls: partial_calls,
    })
}

/// Parse the model's final text into the structured result. The text may be
/// bare JSON or JSON wrapped in markdown fences.
fn parse_structured(text: &str) -> Result<Value, TakeoffError> {
    let json_str = extract_json_object(text)
        .map_err(|e| TakeoffError::Inference(format!("{e}: {text}")))?;
    serde_json::from_str(&json_str)
        .map_err(|e| TakeoffError::Inference(format!("model output is not valid JSON: {e}")))
}

/// Extract a JSON object from a response that might contain markdown fences
/// or surrounding prose.
fn extract_json_object(text: &str) -> Result<String, String> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Ok(text[json_start..json_start + end].trim().to_string());
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            return Ok(text[start..=end].to_string());
        }
    }

    Err("no JSON object found in model output".to_string())
}

// Chat-completions wire types

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize, Default)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
