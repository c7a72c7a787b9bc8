use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quill::{
    Agent, AgentOutcome, ChatSession, LanguageModel, ModelCompletion, QuillError, Result, Role,
    SessionReply, StubModel, ToolCall, ToolRegistry, ToolSpec, Turn,
};
use serde_json::json;

/// Requests the same tool forever and records what it was sent.
struct LoopingModel {
    tool: String,
    requests: Mutex<Vec<Vec<Turn>>>,
}

impl LoopingModel {
    fn new(tool: &str) -> Arc<Self> {
        Arc::new(Self {
            tool: tool.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> Vec<Turn> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for LoopingModel {
    async fn complete_chat(&self, turns: &[Turn], _tools: &[ToolSpec]) -> Result<ModelCompletion> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(turns.to_vec());
        Ok(ModelCompletion::tool_call(ToolCall::new(
            &self.tool,
            json!({ "round": requests.len() }),
        )))
    }
}

/// Replays completions in order, then answers "done".
struct ScriptedModel {
    script: Mutex<VecDeque<ModelCompletion>>,
    requests: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedModel {
    fn new(script: Vec<ModelCompletion>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request(&self, index: usize) -> Vec<Turn> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete_chat(&self, turns: &[Turn], _tools: &[ToolSpec]) -> Result<ModelCompletion> {
        self.requests.lock().unwrap().push(turns.to_vec());
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ModelCompletion::text("done")))
    }
}

fn counting_registry(counter: Arc<AtomicUsize>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register_fn(
            ToolSpec::new("probe", "Counts invocations").with_param(quill::ParamSpec::optional(
                "round",
                quill::ParamType::Integer,
                "Round number",
            )),
            move |args| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("probe result {}", args.u64("round").unwrap_or_default()))
                }
            },
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn never_exceeds_the_step_budget() {
    for budget in 1..=8 {
        let model = LoopingModel::new("probe");
        let counter = Arc::new(AtomicUsize::new(0));
        let mut agent = Agent::new(model.clone())
            .with_tools(counting_registry(counter.clone()))
            .with_max_steps(budget);

        let reply = agent.respond("loop").await.unwrap();

        assert_eq!(model.calls(), budget, "budget {budget}");
        assert_eq!(reply.steps, budget);
        assert_eq!(counter.load(Ordering::SeqCst), budget);
        assert!(matches!(reply.outcome, AgentOutcome::StepExhausted { .. }));
    }
}

#[tokio::test]
async fn exhausted_budget_keeps_last_tool_result_in_context() {
    let model = LoopingModel::new("probe");
    let mut agent = Agent::new(model.clone())
        .with_tools(counting_registry(Arc::new(AtomicUsize::new(0))))
        .with_max_steps(3);

    let reply = agent.respond("keep going").await.unwrap();

    assert_eq!(
        reply.text(),
        "Agent stopped after 3 steps without a final answer."
    );
    assert_eq!(reply.tool_calls, vec!["probe", "probe", "probe"]);
    let last = agent.memory().turns().last().cloned().unwrap();
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.content, "probe result 3");
    // The third request already carried the second tool result.
    assert_eq!(model.last_request().last().unwrap().content, "probe result 2");
}

#[tokio::test]
async fn first_final_answer_takes_one_round_trip() {
    let model = ScriptedModel::new(vec![ModelCompletion::text("<html>otters</html>")]);
    let counter = Arc::new(AtomicUsize::new(0));
    let mut agent = Agent::new(model.clone()).with_tools(counting_registry(counter.clone()));

    let reply = agent.respond("write about otters").await.unwrap();

    assert_eq!(reply.steps, 1);
    assert!(reply.tool_calls.is_empty());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(reply.outcome, AgentOutcome::Final { content: "<html>otters</html>".into() });
}

#[tokio::test]
async fn unknown_tools_never_reach_a_handler() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(counter.clone());

    for name in ["", "Probe", "probe ", "scrape_webpage", "exa_search"] {
        let err = registry.invoke(name, json!({})).await.unwrap_err();
        assert!(matches!(err, QuillError::UnknownTool(ref n) if n == name));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_handler_is_visible_to_next_model_call() {
    let mut registry = ToolRegistry::new();
    registry
        .register_fn(ToolSpec::new("flaky", "Always fails"), |_| async {
            Err(QuillError::Protocol("connection reset".into()))
        })
        .unwrap();
    let model = ScriptedModel::new(vec![ModelCompletion::tool_call(ToolCall::new(
        "flaky",
        json!({}),
    ))]);
    let mut agent = Agent::new(model.clone()).with_tools(registry);

    let reply = agent.respond("try it").await.unwrap();
    assert_eq!(reply.text(), "done");

    let follow_up = model.request(1);
    let tool_turn = follow_up.last().unwrap();
    assert_eq!(tool_turn.role, Role::Tool);
    assert!(tool_turn.is_error);
    assert!(tool_turn.content.contains("connection reset"));
}

#[tokio::test]
async fn timed_out_tool_becomes_a_failed_turn() {
    let mut registry = ToolRegistry::new().with_timeout(Duration::from_millis(20));
    registry
        .register_fn(ToolSpec::new("slow", "Never finishes in time"), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        })
        .unwrap();
    let model = ScriptedModel::new(vec![ModelCompletion::tool_call(ToolCall::new(
        "slow",
        json!({}),
    ))]);
    let mut agent = Agent::new(model.clone()).with_tools(registry);

    agent.respond("go").await.unwrap();

    let tool_turn = model.request(1).last().cloned().unwrap();
    assert!(tool_turn.is_error);
    assert!(tool_turn.content.contains("timed out"));
}

#[test]
fn duplicate_registration_fails() {
    let mut registry = counting_registry(Arc::new(AtomicUsize::new(0)));
    let err = registry
        .register_fn(ToolSpec::new("probe", "Second probe"), |_| async {
            Ok(String::new())
        })
        .unwrap_err();
    assert!(matches!(err, QuillError::DuplicateTool(ref n) if n == "probe"));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn clear_command_empties_history_without_model_calls() {
    let model = StubModel::new(vec!["Otters are great.".into()]);
    let session = ChatSession::new(Agent::new(model.clone()));

    session.handle("tell me about otters").await.unwrap();
    assert!(!session.history().await.is_empty());

    let reply = session.handle("  Clear  ").await.unwrap();
    assert_eq!(reply, SessionReply::Cleared);
    assert_eq!(reply.text(), "Conversation history cleared.");
    assert!(session.history().await.is_empty());
    assert_eq!(model.remaining(), 0);
}

/// Answers after a short pause and tracks how many calls overlap.
#[derive(Default)]
struct SlowModel {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl LanguageModel for SlowModel {
    async fn complete_chat(&self, _turns: &[Turn], _tools: &[ToolSpec]) -> Result<ModelCompletion> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ModelCompletion::text("noted"))
    }
}

#[tokio::test]
async fn concurrent_requests_share_one_conversation_in_turn() {
    let model = Arc::new(SlowModel::default());
    let session = Arc::new(ChatSession::new(Agent::new(model.clone())));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move { session.handle(&format!("message {i}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(model.max_in_flight.load(Ordering::SeqCst), 1);
    let history = session.history().await;
    assert_eq!(history.len(), 12);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
}
