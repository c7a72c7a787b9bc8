//! Language model abstraction and the hosted providers the agent can talk to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{QuillError, Result};
use crate::message::{Role, ToolCall, Turn};
use crate::tool::ToolSpec;

/// Result of a chat completion request: text, tool calls, or both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            content: None,
            tool_calls: vec![call],
        }
    }
}

/// Minimal abstraction around a chat completion provider. `turns` starts with
/// the system turn when the agent has a system prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<ModelCompletion>;
}

/// Builds the provider named in the model config.
pub fn build_model(cfg: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    match cfg.provider.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Ok(Arc::new(GeminiClient::from_config(cfg)?)),
        "openai" => Ok(Arc::new(OpenAIClient::from_config(cfg)?)),
        other => Err(QuillError::Config(format!(
            "unknown model provider `{other}` (expected `gemini` or `openai`)"
        ))),
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> QuillError {
    warn!(provider, %status, "model request rejected");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return QuillError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    QuillError::LanguageModel(format!("{provider} request failed with {}: {body}", status))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|err| QuillError::LanguageModel(format!("http client error: {err}")))
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
    temperature: Option<f32>,
}

impl GeminiClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .gemini
            .api_key
            .clone()
            .or_else(|| cfg.api_key.clone())
            .ok_or_else(|| {
                QuillError::LanguageModel("missing Gemini API key in model config".into())
            })?;
        let endpoint = cfg
            .gemini
            .endpoint
            .clone()
            .or_else(|| cfg.base_url.clone())
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Ok(Self {
            http: http_client()?,
            model: cfg.model.clone(),
            api_key,
            endpoint,
            temperature: cfg.temperature,
        })
    }

    fn to_contents(&self, turns: &[Turn]) -> Vec<GeminiContent> {
        turns
            .iter()
            .filter_map(|turn| match turn.role {
                Role::System => None,
                Role::User => Some(GeminiContent {
                    role: "user".into(),
                    parts: vec![GeminiPart::text(&turn.content)],
                }),
                Role::Assistant => {
                    let mut parts = Vec::with_capacity(2);
                    if turn.tool_call.is_none() || !turn.content.is_empty() {
                        parts.push(GeminiPart::text(&turn.content));
                    }
                    if let Some(call) = &turn.tool_call {
                        parts.push(GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                name: call.name.clone(),
                                args: call.arguments.clone(),
                            }),
                            ..GeminiPart::default()
                        });
                    }
                    Some(GeminiContent {
                        role: "model".into(),
                        parts,
                    })
                }
                Role::Tool => {
                    let key = if turn.is_error { "error" } else { "result" };
                    Some(GeminiContent {
                        role: "user".into(),
                        parts: vec![GeminiPart {
                            function_response: Some(GeminiFunctionResponse {
                                name: turn.tool_name.clone().unwrap_or_default(),
                                response: json!({ key: turn.content }),
                            }),
                            ..GeminiPart::default()
                        }],
                    })
                }
            })
            .collect()
    }

    fn to_tools(&self, tools: &[ToolSpec]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let mut decl = json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                if !tool.parameters.is_empty() {
                    decl["parameters"] = tool.to_json_schema();
                }
                decl
            })
            .collect();
        Some(json!([{ "functionDeclarations": declarations }]))
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete_chat(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<ModelCompletion> {
        let mut payload = json!({
            "contents": self.to_contents(turns),
        });
        if let Some(system) = turns.iter().find(|t| t.role == Role::System) {
            payload["systemInstruction"] = json!({ "parts": [{ "text": system.content }] });
        }
        if let Some(tools) = self.to_tools(tools) {
            payload["tools"] = tools;
        }
        if let Some(temperature) = self.temperature {
            payload["generationConfig"] = json!({ "temperature": temperature });
        }

        debug!(model = %self.model, turns = turns.len(), "sending Gemini request");
        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.endpoint.trim_end_matches('/'),
                self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| QuillError::LanguageModel(format!("Gemini request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "gemini"));
        }

        let parsed: GeminiResponse = resp.json().await.map_err(|err| {
            QuillError::LanguageModel(format!("Gemini response parse error: {err}"))
        })?;

        Ok(parsed.into_completion())
    }
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    temperature: Option<f32>,
}

impl OpenAIClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .openai
            .api_key
            .clone()
            .or_else(|| cfg.api_key.clone())
            .ok_or_else(|| {
                QuillError::LanguageModel("missing OpenAI API key in model config".into())
            })?;
        let base_url = cfg
            .openai
            .endpoint
            .clone()
            .or_else(|| cfg.base_url.clone())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            http: http_client()?,
            model: cfg.model.clone(),
            api_key,
            base_url,
            organization: cfg.openai.organization.clone(),
            temperature: cfg.temperature,
        })
    }

    fn to_openai_messages(&self, turns: &[Turn]) -> Vec<OpenAiMessage> {
        turns
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string();

                let tool_calls = turn.tool_call.as_ref().map(|call| {
                    vec![OpenAiToolCall {
                        id: call.id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: call.name.clone(),
                            arguments: serialize_tool_arguments(&call.arguments),
                        },
                    }]
                });

                OpenAiMessage {
                    role,
                    content: if tool_calls.is_some() && turn.content.is_empty() {
                        None
                    } else {
                        Some(turn.content.clone())
                    },
                    tool_call_id: turn.tool_call_id.clone(),
                    tool_calls,
                }
            })
            .collect()
    }

    fn to_openai_tools(&self, tools: &[ToolSpec]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }

        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: Some(tool.to_json_schema()),
                    },
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<ModelCompletion> {
        let mut payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(turns),
        });
        if let Some(tools) = self.to_openai_tools(tools) {
            payload["tools"] = serde_json::to_value(tools)?;
            payload["tool_choice"] = Value::String("auto".to_string());
        }
        if let Some(temperature) = self.temperature {
            payload["temperature"] = json!(temperature);
        }

        debug!(model = %self.model, turns = turns.len(), "sending OpenAI request");
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| QuillError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            QuillError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| QuillError::LanguageModel("OpenAI returned no choices".into()))?;

        let tool_calls = first
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone())),
                name: call.function.name,
            })
            .collect();

        Ok(ModelCompletion {
            content: first.message.content.filter(|text| !text.is_empty()),
            tool_calls,
        })
    }
}

/// A deterministic model used for tests and demos. Each scripted response is
/// either a JSON directive (`{"action":"respond",...}` /
/// `{"action":"call_tool",...}`) or plain text taken as the final answer.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|queue| queue.len()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(&self, _turns: &[Turn], _tools: &[ToolSpec]) -> Result<ModelCompletion> {
        let raw = {
            let mut locked = self
                .responses
                .lock()
                .map_err(|_| QuillError::LanguageModel("stub model poisoned".into()))?;
            locked.pop_front().ok_or_else(|| {
                QuillError::LanguageModel("StubModel ran out of scripted responses".into())
            })?
        };

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion::text(content)),
            Ok(StubDirective::CallTool { name, arguments }) => {
                Ok(ModelCompletion::tool_call(ToolCall::new(name, arguments)))
            }
            Err(_) => Ok(ModelCompletion::text(raw)),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

impl GeminiPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

impl GeminiResponse {
    fn into_completion(self) -> ModelCompletion {
        let parts = self
            .candidates
            .into_iter()
            .next()
            .map(|candidate| candidate.content.parts)
            .unwrap_or_default();

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(text) = part.text {
                content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall::new(call.name, call.args));
            }
        }

        ModelCompletion {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}
