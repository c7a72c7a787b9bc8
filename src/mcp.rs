//! MCP (Model Context Protocol) client.
//!
//! Tools published by an MCP server are listed once at startup and registered
//! in the [`ToolRegistry`] next to the built-in tools, so the agent calls them
//! like any other tool.
//!
//! # Transport Types
//! - **Stdio**: launch the server as a subprocess and exchange newline-delimited
//!   JSON-RPC over its stdin/stdout
//! - **HTTP**: POST JSON-RPC to a server URL (plain JSON or SSE-framed replies)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::McpServerConfig;
use crate::error::{QuillError, Result};
use crate::tool::{ParamSpec, Tool, ToolArguments, ToolRegistry};

const PROTOCOL_VERSION: &str = "2024-11-05";

// ─────────────────────────────────────────────────────────────────────────────
// MCP Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC request; `id` is absent for notifications.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request; the transport assigns the id.
    pub fn call(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(0),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result payload, or the server's error as [`QuillError::Mcp`].
    fn into_result(self, method: &str) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(QuillError::Mcp(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            )));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Tool definition published by a server.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        #[serde(default)]
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Flattens the content items into the text handed to the model.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.clone(),
                ContentItem::Image { mime_type, .. } => format!(
                    "[image: {}]",
                    mime_type.as_deref().unwrap_or("image/png")
                ),
                ContentItem::Resource { resource } => match resource.get("text") {
                    Some(Value::String(text)) => text.clone(),
                    _ => format!(
                        "[resource: {}]",
                        resource.get("uri").and_then(Value::as_str).unwrap_or("unknown")
                    ),
                },
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: String,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response carrying the same id.
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is expected.
    async fn notify(&self, notification: JsonRpcRequest) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Transport
// ─────────────────────────────────────────────────────────────────────────────

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            request_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
        }
    }

    async fn post(&self, body: &JsonRpcRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            builder = builder.header("mcp-session-id", session);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| QuillError::Mcp(format!("HTTP request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(QuillError::Mcp(format!(
                "MCP server answered {} to {}",
                response.status(),
                body.method
            )));
        }

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }
        Ok(response)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = Some(id);

        let response = self.post(&request).await?;
        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| QuillError::Mcp(format!("Failed to read response: {e}")))?;

        if is_sse {
            body.lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .find_map(|data| match_response(data.trim(), id))
                .ok_or_else(|| QuillError::Mcp(format!("no response to request {id} in event stream")))
        } else {
            serde_json::from_str(&body)
                .map_err(|e| QuillError::Mcp(format!("Failed to parse response: {e}")))
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        self.post(&notification).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio Transport
// ─────────────────────────────────────────────────────────────────────────────

pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    request_id: AtomicU64,
}

impl StdioTransport {
    /// Launch the server process with piped stdin/stdout.
    pub fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| QuillError::Mcp(format!("Failed to spawn MCP server `{command}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| QuillError::Mcp("MCP server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| QuillError::Mcp("MCP server stdout not available".into()))?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(stdout),
            request_id: AtomicU64::new(1),
        })
    }

    async fn write_line(&self, message: &JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| QuillError::Mcp(format!("Failed to write to MCP server: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| QuillError::Mcp(format!("Failed to flush: {e}")))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = Some(id);

        // Hold the reader for the whole exchange so responses are not stolen.
        let mut stdout = self.stdout.lock().await;
        self.write_line(&request).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| QuillError::Mcp(format!("Failed to read from MCP server: {e}")))?;
            if read == 0 {
                return Err(QuillError::Mcp(format!(
                    "MCP server closed its output before answering {}",
                    request.method
                )));
            }
            match match_response(line.trim(), id) {
                Some(response) => return Ok(response),
                None => debug!(line = line.trim(), "skipping MCP output line"),
            }
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        self.write_line(&notification).await
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut child) = self.child.lock().await.take() {
            child
                .kill()
                .await
                .map_err(|e| QuillError::Mcp(format!("Failed to kill MCP server: {e}")))?;
        }
        Ok(())
    }
}

/// Parses `raw` as the response to request `id`; anything else (server
/// notifications, requests, log noise, other ids) yields `None`.
fn match_response(raw: &str, id: u64) -> Option<JsonRpcResponse> {
    let value: Value = serde_json::from_str(raw).ok()?;
    if value.get("method").is_some() || value.get("id").and_then(Value::as_u64) != Some(id) {
        return None;
    }
    serde_json::from_value(value).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct McpClient {
    name: String,
    transport: Arc<dyn McpTransport>,
    server_info: Option<ServerInfo>,
}

impl McpClient {
    pub fn new(name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            server_info: None,
        }
    }

    /// Builds the transport described by `cfg` and performs the handshake.
    pub async fn connect(cfg: &McpServerConfig) -> Result<Self> {
        let transport: Arc<dyn McpTransport> = match (&cfg.command, &cfg.url) {
            (Some(command), None) => Arc::new(StdioTransport::spawn(command, &cfg.args, &cfg.env)?),
            (None, Some(url)) => Arc::new(HttpTransport::new(url.clone())),
            _ => {
                return Err(QuillError::Config(format!(
                    "MCP server `{}` needs exactly one of `command` or `url`",
                    cfg.name
                )))
            }
        };

        let mut client = Self::new(cfg.name.clone(), transport);
        client.initialize().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.server_info.is_none() {
            let request = JsonRpcRequest::call(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "quill",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            );
            let result = self.transport.request(request).await?.into_result("initialize")?;
            let result: InitializeResult = serde_json::from_value(result)
                .map_err(|e| QuillError::Mcp(format!("Failed to parse initialize result: {e}")))?;

            self.transport
                .notify(JsonRpcRequest::notification("notifications/initialized"))
                .await?;

            info!(
                server = %self.name,
                remote = %result.server_info.name,
                protocol = %result.protocol_version,
                "MCP server initialized"
            );
            self.server_info = Some(result.server_info);
        }

        self.server_info
            .as_ref()
            .ok_or_else(|| QuillError::Mcp("Server info not available".into()))
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        self.initialize().await?;
        let result = self
            .transport
            .request(JsonRpcRequest::call("tools/list", None))
            .await?
            .into_result("tools/list")?;
        let result: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| QuillError::Mcp(format!("Failed to parse tools/list result: {e}")))?;
        Ok(result.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.initialize().await?;
        let request = JsonRpcRequest::call(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        );
        let result = self.transport.request(request).await?.into_result("tools/call")?;
        serde_json::from_value(result)
            .map_err(|e| QuillError::Mcp(format!("Failed to parse tools/call result: {e}")))
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry Integration
// ─────────────────────────────────────────────────────────────────────────────

/// A connected server whose tools can be registered with a [`ToolRegistry`].
#[derive(Clone)]
pub struct McpTools {
    client: Arc<Mutex<McpClient>>,
    prefix: Option<String>,
}

impl McpTools {
    pub fn new(client: McpClient) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub async fn connect(cfg: &McpServerConfig) -> Result<Self> {
        Ok(Self::new(McpClient::connect(cfg).await?).with_prefix(cfg.prefix.clone()))
    }

    /// Registers every tool the server lists. Returns how many were added.
    pub async fn register_tools(&self, registry: &mut ToolRegistry) -> Result<usize> {
        let definitions = self.client.lock().await.list_tools().await?;

        let mut count = 0;
        for definition in definitions {
            let name = match &self.prefix {
                Some(prefix) => format!("{prefix}_{}", definition.name),
                None => definition.name.clone(),
            };
            let description = definition
                .description
                .unwrap_or_else(|| format!("MCP tool: {}", definition.name));

            registry.register(McpToolWrapper {
                name,
                description,
                parameters: ParamSpec::from_json_schema(&definition.input_schema),
                client: Arc::clone(&self.client),
                remote_name: definition.name,
            })?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn close(&self) -> Result<()> {
        let client = self.client.lock().await;
        if let Err(err) = client.close().await {
            warn!(server = %client.name(), error = %err, "failed to close MCP server");
            return Err(err);
        }
        Ok(())
    }
}

struct McpToolWrapper {
    name: String,
    description: String,
    parameters: Vec<ParamSpec>,
    client: Arc<Mutex<McpClient>>,
    remote_name: String,
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        self.parameters.clone()
    }

    async fn call(&self, args: ToolArguments) -> Result<String> {
        let result = self
            .client
            .lock()
            .await
            .call_tool(&self.remote_name, args.into_value())
            .await?;

        let text = result.to_text();
        if result.is_error {
            return Err(QuillError::tool(&self.name, text));
        }
        Ok(text)
    }
}
