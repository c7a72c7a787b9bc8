use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::agent::{Agent, AgentReply};
use crate::blog::{blog_writer_prompt, extract_html};
use crate::config::AppConfig;
use crate::error::Result;
use crate::llm::{build_model, LanguageModel};
use crate::mcp::McpTools;
use crate::message::Turn;
use crate::telemetry::{ActivityKind, ActivityLog};
use crate::tool::{ToolRegistry, ToolSpec};
use crate::tools::register_builtin_tools;

/// What a line of user input asks for. Commands are matched after trimming,
/// ignoring case, and never reach the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Clear,
    Empty,
    Message(String),
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }
        match trimmed.to_lowercase().as_str() {
            "exit" | "quit" => Command::Exit,
            "clear" => Command::Clear,
            _ => Command::Message(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionReply {
    Exit,
    Cleared,
    Ignored,
    Answer(AgentReply),
}

impl SessionReply {
    pub fn text(&self) -> String {
        match self {
            SessionReply::Exit => "Session ended.".to_string(),
            SessionReply::Cleared => "Conversation history cleared.".to_string(),
            SessionReply::Ignored => String::new(),
            SessionReply::Answer(reply) => reply.text(),
        }
    }
}

/// Builds the tool registry from `cfg`: built-in tools plus every tool of
/// every configured MCP server. The returned connections must be closed by
/// the caller.
pub async fn connect_tools(cfg: &AppConfig) -> Result<(ToolRegistry, Vec<McpTools>)> {
    let mut registry =
        ToolRegistry::new().with_timeout(Duration::from_secs(cfg.agent.tool_timeout_secs));
    register_builtin_tools(&mut registry, &cfg.tools)?;

    let mut mcp = Vec::with_capacity(cfg.mcp_servers.len());
    for server in &cfg.mcp_servers {
        let tools = McpTools::connect(server).await?;
        let count = tools.register_tools(&mut registry).await?;
        info!(server = %server.name, count, "registered MCP tools");
        mcp.push(tools);
    }
    Ok((registry, mcp))
}

/// One conversation shared by a front end: the agent behind an async mutex,
/// the activity log, the latest generated HTML and any MCP connections.
pub struct ChatSession<M: LanguageModel + ?Sized = dyn LanguageModel> {
    agent: Mutex<Agent<M>>,
    tools: Vec<ToolSpec>,
    activity: ActivityLog,
    latest_html: RwLock<Option<String>>,
    mcp: Vec<McpTools>,
}

impl ChatSession<dyn LanguageModel> {
    /// Builds the model named in `cfg` and the session around it.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model = build_model(&cfg.model)?;
        Self::with_model(cfg, model).await
    }
}

impl<M: LanguageModel + ?Sized> ChatSession<M> {
    pub fn new(agent: Agent<M>) -> Self {
        let activity = ActivityLog::default();
        let tools = agent.tools().describe();
        Self {
            agent: Mutex::new(agent.with_hook(Arc::new(activity.clone()))),
            tools,
            activity,
            latest_html: RwLock::new(None),
            mcp: Vec::new(),
        }
    }

    /// Registers the built-in and MCP tools from `cfg` and wires them to
    /// `model`.
    pub async fn with_model(cfg: &AppConfig, model: Arc<M>) -> Result<Self> {
        let (registry, mcp) = connect_tools(cfg).await?;
        let prompt = cfg
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| blog_writer_prompt(&registry.describe()));
        let agent = Agent::new(model)
            .with_system_prompt(prompt)
            .with_tools(registry)
            .with_max_steps(cfg.agent.max_steps)
            .with_memory_enabled(cfg.agent.memory_enabled);

        let mut session = Self::new(agent);
        session.mcp = mcp;
        Ok(session)
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub async fn latest_html(&self) -> Option<String> {
        self.latest_html.read().await.clone()
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.agent.lock().await.memory().snapshot()
    }

    /// Handles one line of user input. Requests are serialized per session.
    pub async fn handle(&self, input: &str) -> Result<SessionReply> {
        match Command::parse(input) {
            Command::Empty => Ok(SessionReply::Ignored),
            Command::Exit => {
                self.activity
                    .record(ActivityKind::Session, "Session ended by user.");
                Ok(SessionReply::Exit)
            }
            Command::Clear => {
                self.clear().await;
                Ok(SessionReply::Cleared)
            }
            Command::Message(message) => {
                let result = self.agent.lock().await.respond(message).await;
                match result {
                    Ok(reply) => {
                        if let Some(html) = extract_html(&reply.text()) {
                            *self.latest_html.write().await = Some(html);
                        }
                        Ok(SessionReply::Answer(reply))
                    }
                    Err(err) => {
                        warn!(error = %err, "agent request failed");
                        self.activity
                            .record(ActivityKind::Failure, format!("Error: {err}"));
                        Err(err)
                    }
                }
            }
        }
    }

    /// Empties the conversation once any in-flight request has finished.
    pub async fn clear(&self) {
        self.agent.lock().await.clear_memory();
        self.activity
            .record(ActivityKind::Session, "Conversation history cleared.");
    }

    /// Closes every MCP connection.
    pub async fn shutdown(&self) {
        for tools in &self.mcp {
            // Already logged by close().
            let _ = tools.close().await;
        }
        if !self.mcp.is_empty() {
            self.activity
                .record(ActivityKind::Session, "Closed all client sessions.");
        }
    }
}
