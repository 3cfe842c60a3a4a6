//! Two agents coordinating through the injected handoff tool.
//!
//! ```sh
//! cargo run --example swarm_handoff
//! ```

#![allow(clippy::print_stdout)]

use serde_json::json;

use kumo::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let researcher = Agent::builder()
        .name("researcher")
        .description("digs up the facts")
        .model(
            MockModel::new()
                .then_tool_use(
                    "h1",
                    HANDOFF_TOOL_NAME,
                    &json!({
                        "agent_name": "writer",
                        "message": "facts gathered, please draft the summary",
                        "context": {"source": "product docs"},
                    }),
                )
                .then_text("handing off to the writer"),
        )
        .build()?;

    let writer = Agent::builder()
        .name("writer")
        .description("turns facts into prose")
        .model(MockModel::new().then_text("summary drafted"))
        .build()?;

    let mut swarm = Swarm::builder().agent(researcher).agent(writer).build()?;

    let result = swarm.invoke("summarize the product docs").await?;
    println!("status: {:?}", result.status);
    println!("history: {:?}", result.node_history);
    println!("shared context: {:?}", result.shared_context);
    Ok(())
}
