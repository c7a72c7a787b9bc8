//! A tool-augmented chat agent that researches a topic on the web and writes
//! HTML blog posts.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with Gemini, OpenAI and
//!   scripted backends.
//! - A validated tool interface (`Tool` and `ToolRegistry`), built-in research
//!   tools and MCP-hosted tools.
//! - An `Agent` that loops between the model and tools under a step budget.
//! - A `ChatSession` shared by the terminal loop and the HTTP server.

mod agent;
mod blog;
mod config;
mod error;
mod hooks;
mod llm;
pub mod mcp;
mod memory;
mod message;
mod repl;
#[cfg(feature = "server")]
mod server;
mod session;
mod telemetry;
mod tool;
pub mod tools;

pub use agent::{Agent, AgentOutcome, AgentReply, AgentState, StepBudget};
pub use blog::{blog_writer_prompt, extract_html};
pub use config::{
    AgentConfig, AppConfig, LogFormat, LoggingConfig, McpServerConfig, ModelConfig,
    ProviderConfig, ServerConfig, ToolsConfig, DEFAULT_CONFIG_FILE,
};
pub use error::{QuillError, Result};
pub use hooks::AgentHook;
pub use llm::{build_model, GeminiClient, LanguageModel, ModelCompletion, OpenAIClient, StubModel};
pub use memory::ConversationMemory;
pub use message::{Role, ToolCall, Turn};
pub use repl::Repl;
#[cfg(feature = "server")]
pub use server::ChatServer;
pub use session::{connect_tools, ChatSession, Command, SessionReply};
pub use telemetry::{init_tracing, ActivityEntry, ActivityKind, ActivityLog};
pub use tool::{ParamSpec, ParamType, Tool, ToolArguments, ToolRegistry, ToolSpec, DEFAULT_TOOL_TIMEOUT};
