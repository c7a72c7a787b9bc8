use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agent::AgentReply;
use crate::config::{LogFormat, LoggingConfig};
use crate::error::Result;
use crate::hooks::AgentHook;
use crate::message::{ToolCall, Turn};

pub const ACTIVITY_CAPACITY: usize = 200;

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter.
/// Output goes to stderr so the terminal chat keeps stdout for the dialogue.
pub fn init_tracing(cfg: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = match cfg.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Request,
    ToolCall,
    ToolResult,
    Reply,
    Session,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
}

/// Bounded record of what the agent has been doing, shared with the front
/// ends as a "terminal log" and streamed to subscribers.
#[derive(Clone)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<ActivityEntry>>>,
    capacity: usize,
    sender: broadcast::Sender<ActivityEntry>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            sender,
        }
    }

    pub fn record(&self, kind: ActivityKind, message: impl Into<String>) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
        };
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        // No subscribers is fine.
        let _ = self.sender.send(entry);
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEntry> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl AgentHook for ActivityLog {
    async fn on_request(&self, input: &str) -> Result<()> {
        self.record(
            ActivityKind::Request,
            format!("Running agent for input: {input}"),
        );
        Ok(())
    }

    async fn before_tool_call(&self, call: &ToolCall) -> Result<()> {
        self.record(
            ActivityKind::ToolCall,
            format!("Calling tool `{}` with {}", call.name, call.arguments),
        );
        Ok(())
    }

    async fn after_tool_result(&self, result: &Turn) -> Result<()> {
        let name = result.tool_name.as_deref().unwrap_or("unknown");
        let message = if result.is_error {
            format!("Tool `{name}` failed: {}", result.content)
        } else {
            format!(
                "Tool `{name}` returned {} chars",
                result.content.chars().count()
            )
        };
        self.record(ActivityKind::ToolResult, message);
        Ok(())
    }

    async fn on_reply(&self, reply: &AgentReply) -> Result<()> {
        let message = if reply.is_final() {
            "Agent responded successfully.".to_string()
        } else {
            format!("Agent stopped after {} steps.", reply.steps)
        };
        self.record(ActivityKind::Reply, message);
        Ok(())
    }
}
