use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{QuillError, Result};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Type a tool parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }

    fn from_schema_type(raw: Option<&str>) -> Self {
        match raw {
            Some("string") => ParamType::String,
            Some("integer") => ParamType::Integer,
            Some("number") => ParamType::Number,
            Some("boolean") => ParamType::Boolean,
            Some("array") => ParamType::Array,
            Some("object") => ParamType::Object,
            _ => ParamType::Any,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Reads the parameters of a JSON Schema object (as published by MCP
    /// servers). Properties keep the order the schema lists them in.
    pub fn from_json_schema(schema: &Value) -> Vec<ParamSpec> {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };

        properties
            .iter()
            .map(|(name, prop)| ParamSpec {
                name: name.clone(),
                kind: ParamType::from_schema_type(prop.get("type").and_then(Value::as_str)),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                required: required.contains(&name.as_str()),
                default: prop.get("default").cloned(),
            })
            .collect()
    }
}

/// Static description of a tool, fixed at registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    /// JSON Schema object handed to model providers.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            if param.kind != ParamType::Any {
                prop.insert("type".into(), Value::String(param.kind.to_string()));
            }
            if !param.description.is_empty() {
                prop.insert("description".into(), Value::String(param.description.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks `arguments` against the declared parameters and fills in
    /// defaults. A `null` payload counts as an empty object.
    pub fn validate(&self, arguments: Value) -> Result<ToolArguments> {
        let invalid = |reason: String| QuillError::InvalidArguments {
            name: self.name.clone(),
            reason,
        };

        let mut map = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(invalid(format!("expected a JSON object, got `{other}`"))),
        };

        if let Some(unknown) = map
            .keys()
            .find(|key| !self.parameters.iter().any(|p| &p.name == *key))
        {
            return Err(invalid(format!("unexpected parameter `{unknown}`")));
        }

        for param in &self.parameters {
            match map.get(&param.name) {
                Some(value) if !value.is_null() => {
                    if !param.kind.accepts(value) {
                        return Err(invalid(format!(
                            "parameter `{}` must be of type {}, got `{value}`",
                            param.name, param.kind
                        )));
                    }
                }
                _ => {
                    if let Some(default) = &param.default {
                        map.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        return Err(invalid(format!(
                            "missing required parameter `{}`",
                            param.name
                        )));
                    }
                }
            }
        }

        Ok(ToolArguments(map))
    }
}

/// Arguments that passed validation against a [`ToolSpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments(Map<String, Value>);

impl ToolArguments {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.str(key)
            .ok_or_else(|| QuillError::Protocol(format!("missing string argument `{key}`")))
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    async fn call(&self, args: ToolArguments) -> Result<String>;
}

type Handler = Arc<dyn Fn(ToolArguments) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Tool built from a spec and an async closure.
struct FnTool {
    spec: ToolSpec,
    handler: Handler,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        self.spec.parameters.clone()
    }

    async fn call(&self, args: ToolArguments) -> Result<String> {
        (self.handler)(args).await
    }
}

struct Registered {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<Registered>>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let spec = tool.spec();
        if self.tools.contains_key(&spec.name) {
            return Err(QuillError::DuplicateTool(spec.name));
        }
        debug!(tool = %spec.name, params = spec.parameters.len(), "registered tool");
        self.tools
            .insert(spec.name.clone(), Arc::new(Registered { spec, tool }));
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, spec: ToolSpec, handler: F) -> Result<()>
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |args| -> BoxFuture<'static, Result<String>> { Box::pin(handler(args)) });
        self.register(FnTool { spec, handler })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|entry| &entry.spec)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.describe().into_iter().map(|spec| spec.name).collect()
    }

    pub fn describe(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|entry| entry.spec.clone())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<String> {
        self.invoke_with_timeout(name, arguments, self.timeout).await
    }

    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<String> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| QuillError::UnknownTool(name.to_string()))?;
        let args = entry.spec.validate(arguments)?;

        match tokio::time::timeout(timeout, entry.tool.call(args)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err @ QuillError::ToolExecution { .. })) => Err(err),
            Ok(Err(err)) => Err(QuillError::tool(name, err)),
            Err(_) => Err(QuillError::ToolTimeout {
                name: name.to_string(),
                timeout,
            }),
        }
    }
}
