use async_trait::async_trait;

use crate::agent::AgentReply;
use crate::error::Result;
use crate::llm::ModelCompletion;
use crate::message::{ToolCall, Turn};

/// Observer of the agent loop. Every method defaults to a no-op; an error
/// returned from a hook aborts the request.
#[async_trait]
pub trait AgentHook: Send + Sync {
    async fn on_request(&self, _input: &str) -> Result<()> {
        Ok(())
    }

    async fn before_model(&self, _turns: &[Turn]) -> Result<()> {
        Ok(())
    }

    async fn after_model(&self, _completion: &ModelCompletion) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn after_tool_result(&self, _result: &Turn) -> Result<()> {
        Ok(())
    }

    async fn on_reply(&self, _reply: &AgentReply) -> Result<()> {
        Ok(())
    }
}
