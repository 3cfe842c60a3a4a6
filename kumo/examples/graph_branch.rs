//! A three-node graph with conditional branching on the classifier output.
//!
//! ```sh
//! cargo run --example graph_branch
//! ```

#![allow(clippy::print_stdout)]

use kumo::prelude::*;

fn scripted_agent(name: &str, reply: &str) -> anyhow::Result<Agent> {
    Ok(Agent::builder()
        .name(name)
        .model(MockModel::new().then_text(reply))
        .build()?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut graph = Graph::builder()
        .add_node(
            "classifier",
            scripted_agent("classifier", "this RFC is technical in nature")?,
        )
        .add_node("tech", scripted_agent("tech", "deep technical review")?)
        .add_node("biz", scripted_agent("biz", "business review")?)
        .add_edge_when("classifier", "tech", |state: &GraphState| {
            state
                .result_text("classifier")
                .is_some_and(|text| text.contains("technical"))
        })
        .add_edge_when("classifier", "biz", |state: &GraphState| {
            state
                .result_text("classifier")
                .is_some_and(|text| text.contains("business"))
        })
        .build()?;

    let result = graph.invoke("review RFC").await?;
    println!("execution order: {:?}", result.execution_order);
    println!(
        "completed {}/{} nodes",
        result.completed_nodes, result.total_nodes
    );
    Ok(())
}
