//! Offline walkthrough of the agent loop: a scripted model asks for a tool,
//! reads its output and answers with a small HTML post.

use quill::{
    blog_writer_prompt, extract_html, Agent, ChatSession, ParamSpec, ParamType, Result,
    StubModel, ToolRegistry, ToolSpec,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register_fn(
        ToolSpec::new("fact_lookup", "Returns a short fact about an animal").with_param(
            ParamSpec::required("animal", ParamType::String, "Animal to look up"),
        ),
        |args| async move {
            let animal = args.require_str("animal")?.to_string();
            Ok(format!("{animal}s hold hands while they sleep."))
        },
    )?;

    let script = vec![
        json!({"action": "call_tool", "name": "fact_lookup", "arguments": {"animal": "otter"}})
            .to_string(),
        json!({
            "action": "respond",
            "content": "```html\n<!DOCTYPE html>\n<html><body><h1>Otters</h1><p>Otters hold hands while they sleep.</p></body></html>\n```"
        })
        .to_string(),
    ];

    let prompt = blog_writer_prompt(&tools.describe());
    let agent = Agent::new(StubModel::new(script))
        .with_system_prompt(prompt)
        .with_tools(tools)
        .with_max_steps(4);
    let session = ChatSession::new(agent);

    for line in ["write a post about otters", "clear", "exit"] {
        println!("You: {line}");
        let reply = session.handle(line).await?;
        match extract_html(&reply.text()) {
            Some(html) => println!("Assistant (html):\n{html}\n"),
            None => println!("Assistant: {}\n", reply.text()),
        }
    }

    for entry in session.activity().recent(20) {
        println!("[{}] {}", entry.timestamp.format("%H:%M:%S"), entry.message);
    }
    Ok(())
}
