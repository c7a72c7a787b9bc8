use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QuillError, Result};
use crate::hooks::AgentHook;
use crate::llm::LanguageModel;
use crate::memory::ConversationMemory;
use crate::message::{ToolCall, Turn};
use crate::tool::ToolRegistry;

/// Where a single request currently is in the agent loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    AwaitingModel,
    ToolRequested(ToolCall),
    FinalAnswer(String),
    StepExhausted,
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Final { content: String },
    StepExhausted { partial: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReply {
    pub outcome: AgentOutcome,
    /// Model round-trips spent on the request.
    pub steps: usize,
    /// Tools invoked, in call order.
    pub tool_calls: Vec<String>,
}

impl AgentReply {
    pub fn is_final(&self) -> bool {
        matches!(self.outcome, AgentOutcome::Final { .. })
    }

    /// Text shown to the user: the answer, the last partial output, or a
    /// step-limit notice.
    pub fn text(&self) -> String {
        match &self.outcome {
            AgentOutcome::Final { content } => content.clone(),
            AgentOutcome::StepExhausted {
                partial: Some(partial),
            } => partial.clone(),
            AgentOutcome::StepExhausted { partial: None } => format!(
                "Agent stopped after {} steps without a final answer.",
                self.steps
            ),
        }
    }
}

/// Model round-trips left for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    limit: usize,
    used: usize,
}

impl StepBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            used: 0,
        }
    }

    /// Takes one step; `false` once the budget is spent.
    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }
}

/// An agent that alternates between the language model and registered tools
/// until the model answers or the step budget runs out.
pub struct Agent<M: LanguageModel + ?Sized> {
    system_prompt: String,
    model: Arc<M>,
    tools: ToolRegistry,
    memory: ConversationMemory,
    memory_enabled: bool,
    max_steps: usize,
    tool_timeout: Option<Duration>,
    hooks: Vec<Arc<dyn AgentHook>>,
}

impl<M: LanguageModel + ?Sized> Agent<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            system_prompt: "You are a helpful agent.".to_string(),
            model,
            tools: ToolRegistry::new(),
            memory: ConversationMemory::default(),
            memory_enabled: true,
            max_steps: 15,
            tool_timeout: None,
            hooks: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = memory;
        self
    }

    /// With memory disabled every request starts from an empty conversation.
    pub fn with_memory_enabled(mut self, enabled: bool) -> Self {
        self.memory_enabled = enabled;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Overrides the registry's call timeout, whatever order the builder
    /// methods run in.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout.unwrap_or_else(|| self.tools.timeout())
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run a single exchange with the agent.
    pub async fn respond(&mut self, user_input: impl Into<String>) -> Result<AgentReply> {
        let input = user_input.into();
        let Agent {
            system_prompt,
            model,
            tools,
            memory,
            memory_enabled,
            max_steps,
            tool_timeout,
            hooks,
        } = self;

        for hook in hooks.iter() {
            hook.on_request(&input).await?;
        }

        let mut scratch = ConversationMemory::default();
        let conversation = if *memory_enabled { memory } else { &mut scratch };
        conversation.append(Turn::user(input));

        let specs = tools.describe();
        let mut budget = StepBudget::new(*max_steps);
        let mut pending: VecDeque<ToolCall> = VecDeque::new();
        let mut invoked: Vec<String> = Vec::new();
        let mut partial: Option<String> = None;
        let mut lead_text: Option<String> = None;
        let tool_timeout = (*tool_timeout).unwrap_or_else(|| tools.timeout());
        let mut state = AgentState::AwaitingModel;

        let reply = loop {
            state = match state {
                AgentState::AwaitingModel => {
                    if !budget.try_consume() {
                        AgentState::StepExhausted
                    } else {
                        let request = build_request(system_prompt.as_str(), conversation);
                        for hook in hooks.iter() {
                            hook.before_model(&request).await?;
                        }
                        let completion = model.complete_chat(&request, &specs).await?;
                        for hook in hooks.iter() {
                            hook.after_model(&completion).await?;
                        }
                        debug!(
                            step = budget.used(),
                            tool_calls = completion.tool_calls.len(),
                            has_text = completion.content.is_some(),
                            "model responded"
                        );

                        if completion.tool_calls.is_empty() {
                            let content = completion.content.ok_or_else(|| {
                                QuillError::Protocol(
                                    "model response carried neither text nor a tool call".into(),
                                )
                            })?;
                            AgentState::FinalAnswer(content)
                        } else {
                            if let Some(text) = completion.content.filter(|t| !t.trim().is_empty())
                            {
                                lead_text = Some(text.clone());
                                partial = Some(text);
                            }
                            pending.extend(completion.tool_calls.into_iter().map(|mut call| {
                                if call.id.is_none() {
                                    call.id = Some(format!("call_{}", Uuid::new_v4().simple()));
                                }
                                call
                            }));
                            next_tool_state(&mut pending)
                        }
                    }
                }
                AgentState::ToolRequested(call) => {
                    for hook in hooks.iter() {
                        hook.before_tool_call(&call).await?;
                    }
                    conversation.append(Turn::tool_request(call.clone(), lead_text.take()));

                    let result = match tools
                        .invoke_with_timeout(&call.name, call.arguments.clone(), tool_timeout)
                        .await
                    {
                        Ok(output) => Turn::tool_result(&call, output),
                        Err(err) if err.is_recoverable() => {
                            warn!(tool = %call.name, error = %err, "tool call failed");
                            Turn::tool_error(&call, &err)
                        }
                        Err(err) => return Err(err),
                    };
                    for hook in hooks.iter() {
                        hook.after_tool_result(&result).await?;
                    }
                    conversation.append(result);
                    invoked.push(call.name);
                    next_tool_state(&mut pending)
                }
                AgentState::FinalAnswer(content) => {
                    conversation.append(Turn::assistant(content.clone()));
                    break AgentReply {
                        outcome: AgentOutcome::Final { content },
                        steps: budget.used(),
                        tool_calls: invoked,
                    };
                }
                AgentState::StepExhausted => {
                    warn!(steps = budget.used(), "agent reached the step limit");
                    break AgentReply {
                        outcome: AgentOutcome::StepExhausted { partial },
                        steps: budget.used(),
                        tool_calls: invoked,
                    };
                }
            };
        };

        info!(
            steps = reply.steps,
            tools = reply.tool_calls.len(),
            completed = reply.is_final(),
            "agent request finished"
        );
        for hook in hooks.iter() {
            hook.on_reply(&reply).await?;
        }
        Ok(reply)
    }
}

fn next_tool_state(pending: &mut VecDeque<ToolCall>) -> AgentState {
    pending
        .pop_front()
        .map(AgentState::ToolRequested)
        .unwrap_or(AgentState::AwaitingModel)
}

fn build_request(system_prompt: &str, conversation: &ConversationMemory) -> Vec<Turn> {
    let mut request = Vec::with_capacity(conversation.len() + 1);
    if !system_prompt.is_empty() {
        request.push(Turn::system(system_prompt));
    }
    request.extend(conversation.iter().cloned());
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::llm::ModelCompletion;
    use crate::message::Role;
    use crate::tool::{ParamSpec, ParamType, Tool, ToolArguments, ToolSpec};
    use crate::StubModel;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the `text` field back"
        }

        fn parameters(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("text", ParamType::String, "Text to echo")]
        }

        async fn call(&self, args: ToolArguments) -> Result<String> {
            Ok(args.require_str("text")?.to_string())
        }
    }

    /// Records every request and replays scripted completions.
    struct RecordingModel {
        script: Mutex<VecDeque<Result<ModelCompletion>>>,
        requests: Mutex<Vec<Vec<Turn>>>,
    }

    impl RecordingModel {
        fn new(script: Vec<Result<ModelCompletion>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Vec<Turn>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete_chat(&self, turns: &[Turn], _tools: &[ToolSpec]) -> Result<ModelCompletion> {
            self.requests.lock().unwrap().push(turns.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelCompletion::text("fallback")))
        }
    }

    fn echo_tools() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool).unwrap();
        tools
    }

    #[tokio::test]
    async fn returns_llm_response_without_tools() {
        let model = StubModel::new(vec![r#"{"action":"respond","content":"Hello!"}"#.into()]);
        let mut agent = Agent::new(model);

        let reply = agent.respond("hi").await.unwrap();

        assert_eq!(reply.text(), "Hello!");
        assert_eq!(reply.steps, 1);
        assert!(reply.tool_calls.is_empty());
        assert_eq!(agent.memory().len(), 2);
    }

    #[tokio::test]
    async fn executes_tool_then_replies() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"text":"ping"}}"#.into(),
            r#"{"action":"respond","content":"Echoed your request."}"#.into(),
        ]);
        let mut agent = Agent::new(model).with_tools(echo_tools());

        let reply = agent.respond("say ping").await.unwrap();

        assert_eq!(reply.text(), "Echoed your request.");
        assert_eq!(reply.steps, 2);
        assert_eq!(reply.tool_calls, vec!["echo"]);
        let turns = agent.memory().snapshot();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2].role, Role::Tool);
        assert_eq!(turns[2].content, "ping");
        assert_eq!(turns[1].tool_call.as_ref().unwrap().id, turns[2].tool_call_id);
    }

    #[tokio::test]
    async fn stops_when_budget_is_spent() {
        let model = RecordingModel::new(
            (0..10)
                .map(|i| {
                    Ok(ModelCompletion::tool_call(ToolCall::new(
                        "echo",
                        json!({"text": format!("round {i}")}),
                    )))
                })
                .collect(),
        );
        let mut agent = Agent::new(model.clone())
            .with_tools(echo_tools())
            .with_max_steps(3);

        let reply = agent.respond("loop forever").await.unwrap();

        assert_eq!(model.requests().len(), 3);
        assert_eq!(reply.steps, 3);
        assert_eq!(
            reply.outcome,
            AgentOutcome::StepExhausted { partial: None }
        );
        assert_eq!(
            reply.text(),
            "Agent stopped after 3 steps without a final answer."
        );
        let last = agent.memory().iter().last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "round 2");
    }

    #[tokio::test]
    async fn step_exhaustion_returns_partial_text() {
        let model = RecordingModel::new(vec![Ok(ModelCompletion {
            content: Some("Draft: otters are great".into()),
            tool_calls: vec![ToolCall::new("echo", json!({"text": "x"}))],
        })]);
        let mut agent = Agent::new(model).with_tools(echo_tools()).with_max_steps(1);

        let reply = agent.respond("write").await.unwrap();
        assert!(!reply.is_final());
        assert_eq!(reply.text(), "Draft: otters are great");
    }

    #[tokio::test]
    async fn tool_failures_are_fed_back_to_the_model() {
        let model = RecordingModel::new(vec![
            Ok(ModelCompletion::tool_call(ToolCall::new("missing", json!({})))),
            Ok(ModelCompletion::tool_call(ToolCall::new("echo", json!({"wrong": 1})))),
            Ok(ModelCompletion::text("recovered")),
        ]);
        let mut agent = Agent::new(model.clone()).with_tools(echo_tools());

        let reply = agent.respond("try tools").await.unwrap();
        assert_eq!(reply.text(), "recovered");

        let requests = model.requests();
        let after_unknown = requests[1].last().unwrap();
        assert!(after_unknown.is_error);
        assert!(after_unknown.content.starts_with("Error: tool `missing` not found"));
        let after_invalid = requests[2].last().unwrap();
        assert!(after_invalid.content.contains("invalid arguments for tool `echo`"));
    }

    #[tokio::test]
    async fn model_errors_abort_the_request() {
        let model = RecordingModel::new(vec![Err(QuillError::LanguageModel(
            "gemini request failed with 503".into(),
        ))]);
        let mut agent = Agent::new(model);

        let err = agent.respond("hi").await.unwrap_err();
        assert!(matches!(err, QuillError::LanguageModel(_)));
    }

    #[tokio::test]
    async fn empty_model_reply_is_a_protocol_error() {
        let model = RecordingModel::new(vec![Ok(ModelCompletion {
            content: None,
            tool_calls: Vec::new(),
        })]);
        let mut agent = Agent::new(model);

        let err = agent.respond("hi").await.unwrap_err();
        assert!(matches!(err, QuillError::Protocol(_)));
    }

    #[tokio::test]
    async fn system_prompt_leads_every_request() {
        let model = RecordingModel::new(vec![Ok(ModelCompletion::text("ok"))]);
        let mut agent = Agent::new(model.clone()).with_system_prompt("Write HTML blogs.");

        agent.respond("ping").await.unwrap();

        let request = &model.requests()[0];
        assert_eq!(request[0].role, Role::System);
        assert_eq!(request[0].content, "Write HTML blogs.");
        assert_eq!(request[1].content, "ping");
    }

    #[tokio::test]
    async fn memory_disabled_starts_each_request_empty() {
        let model = RecordingModel::new(vec![
            Ok(ModelCompletion::text("one")),
            Ok(ModelCompletion::text("two")),
        ]);
        let mut agent = Agent::new(model.clone())
            .with_system_prompt("")
            .with_memory_enabled(false);

        agent.respond("first").await.unwrap();
        agent.respond("second").await.unwrap();

        let requests = model.requests();
        assert_eq!(requests[1].len(), 1);
        assert_eq!(requests[1][0].content, "second");
        assert!(agent.memory().is_empty());
    }

    #[tokio::test]
    async fn memory_carries_across_requests_until_cleared() {
        let model = RecordingModel::new(vec![
            Ok(ModelCompletion::text("one")),
            Ok(ModelCompletion::text("two")),
            Ok(ModelCompletion::text("three")),
        ]);
        let mut agent = Agent::new(model.clone()).with_system_prompt("");

        agent.respond("first").await.unwrap();
        agent.respond("second").await.unwrap();
        agent.clear_memory();
        agent.respond("third").await.unwrap();

        let requests = model.requests();
        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[2].len(), 1);
    }

    #[tokio::test]
    async fn hooks_observe_the_loop_in_order() {
        #[derive(Default)]
        struct Trace(Mutex<Vec<String>>);

        #[async_trait]
        impl AgentHook for Trace {
            async fn on_request(&self, input: &str) -> Result<()> {
                self.0.lock().unwrap().push(format!("request:{input}"));
                Ok(())
            }

            async fn before_tool_call(&self, call: &ToolCall) -> Result<()> {
                self.0.lock().unwrap().push(format!("tool:{}", call.name));
                Ok(())
            }

            async fn on_reply(&self, reply: &AgentReply) -> Result<()> {
                self.0.lock().unwrap().push(format!("reply:{}", reply.text()));
                Ok(())
            }
        }

        let trace = Arc::new(Trace::default());
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"text":"a"}}"#.into(),
            r#"{"action":"respond","content":"done"}"#.into(),
        ]);
        let mut agent = Agent::new(model)
            .with_tools(echo_tools())
            .with_hook(trace.clone());

        agent.respond("go").await.unwrap();

        assert_eq!(
            *trace.0.lock().unwrap(),
            vec!["request:go", "tool:echo", "reply:done"]
        );
    }

    #[test]
    fn budget_never_drops_below_one_step() {
        let mut budget = StepBudget::new(0);
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.used(), 1);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn explicit_tool_timeout_survives_with_tools() {
        let registry = ToolRegistry::new().with_timeout(Duration::from_secs(5));

        let before = Agent::new(StubModel::new(Vec::new()))
            .with_tool_timeout(Duration::from_millis(250))
            .with_tools(registry.clone());
        let after = Agent::new(StubModel::new(Vec::new()))
            .with_tools(registry.clone())
            .with_tool_timeout(Duration::from_millis(250));
        let inherited = Agent::new(StubModel::new(Vec::new())).with_tools(registry);

        assert_eq!(before.tool_timeout(), Duration::from_millis(250));
        assert_eq!(after.tool_timeout(), Duration::from_millis(250));
        assert_eq!(inherited.tool_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn text_sent_with_a_tool_call_stays_in_context() {
        let model = RecordingModel::new(vec![
            Ok(ModelCompletion {
                content: Some("I should look this up first.".into()),
                tool_calls: vec![
                    ToolCall::new("echo", json!({"text": "a"})),
                    ToolCall::new("echo", json!({"text": "b"})),
                ],
            }),
            Ok(ModelCompletion::text("done")),
        ]);
        let mut agent = Agent::new(model.clone()).with_tools(echo_tools());

        agent.respond("go").await.unwrap();

        let follow_up = &model.requests()[1];
        let requests: Vec<&Turn> = follow_up
            .iter()
            .filter(|turn| turn.tool_call.is_some())
            .collect();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].content, "I should look this up first.");
        assert_eq!(requests[1].content, "");
    }
}
