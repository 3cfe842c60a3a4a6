//! A single agent driving one tool round-trip against a scripted model.
//!
//! ```sh
//! cargo run --example agent_basic
//! ```

#![allow(clippy::print_stdout)]

use serde_json::json;

use kumo::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let add = FnTool::new(
        ToolSpec::new(
            "add",
            "Adds two integers.",
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "integer"},
                    "b": {"type": "integer"}
                },
                "required": ["a", "b"]
            }),
        ),
        |input| async move {
            let a = input["a"].as_i64().unwrap_or(0);
            let b = input["b"].as_i64().unwrap_or(0);
            Ok(vec![ToolResultContent::text((a + b).to_string())])
        },
    );

    // A scripted model stands in for a real provider: first it requests the
    // add tool, then it answers with the tool's output.
    let model = MockModel::new()
        .then_tool_use("t1", "add", &json!({"a": 3, "b": 4}))
        .then_text("3 + 4 = 7");

    let mut agent = Agent::builder()
        .name("calculator")
        .model(model)
        .tool(add)
        .build()?;

    let result = agent.invoke("What is 3 + 4?").await?;
    println!("stop reason: {}", result.stop_reason);
    println!("answer: {}", result.text());
    println!("cycles: {}", result.metrics.cycle_count);
    Ok(())
}
