//! Multi-agent orchestration: common records and the runner interface.
//!
//! Orchestrators treat whole agents as nodes. Two realizations live here:
//! the deterministic [`Graph`] runner and the self-organizing [`Swarm`]
//! runner, both implementing [`MultiAgentRunner`] so either can nest as a
//! node inside the other.

pub mod graph;
pub mod swarm;

pub use graph::{Graph, GraphBuilder, GraphConfig, GraphResult, GraphState};
pub use swarm::{HANDOFF_TOOL_NAME, Swarm, SwarmBuilder, SwarmConfig, SwarmResult};

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::agent::{Agent, AgentResult, TaskInput};
use crate::context::InvocationContext;
use crate::error::Result;
use crate::usage::{Metrics, Usage};

/// Execution status of a node or an orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not started yet.
    Pending,
    /// Currently running.
    Executing,
    /// Finished successfully.
    Completed,
    /// Finished with a failure.
    Failed,
}

impl Status {
    /// Returns `true` if the run finished successfully.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns `true` if the run failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// What a node produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutput {
    /// Output of an agent executor.
    Agent(Box<AgentResult>),
    /// Output of a nested orchestrator.
    MultiAgent(Box<MultiAgentResult>),
    /// The error message of a failed node.
    Error(String),
}

/// The record produced when a node completes (or fails).
#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    /// The node's output.
    pub result: NodeOutput,
    /// Terminal status of the node.
    pub status: Status,
    /// Usage accumulated by the node.
    pub accumulated_usage: Usage,
    /// Latency accumulated by the node.
    pub accumulated_metrics: Metrics,
    /// Number of underlying executions (cycles for agents, node
    /// executions for nested orchestrators).
    pub execution_count: usize,
    /// Wall-clock execution time of the node in milliseconds.
    pub execution_time_ms: u64,
}

impl NodeResult {
    /// Wrap a completed agent result.
    #[must_use]
    pub fn from_agent(result: AgentResult, execution_time_ms: u64) -> Self {
        let metrics = result.metrics;
        Self {
            result: NodeOutput::Agent(Box::new(result)),
            status: Status::Completed,
            accumulated_usage: metrics.accumulated_usage,
            accumulated_metrics: metrics.accumulated_metrics,
            execution_count: metrics.cycle_count,
            execution_time_ms,
        }
    }

    /// Embed a nested orchestrator result.
    #[must_use]
    pub fn from_multi(result: MultiAgentResult, execution_time_ms: u64) -> Self {
        let (status, usage, metrics, count) = (
            result.status,
            result.accumulated_usage,
            result.accumulated_metrics,
            result.execution_count,
        );
        Self {
            result: NodeOutput::MultiAgent(Box::new(result)),
            status,
            accumulated_usage: usage,
            accumulated_metrics: metrics,
            execution_count: count,
            execution_time_ms,
        }
    }

    /// Record a failed node.
    #[must_use]
    pub fn failed(message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            result: NodeOutput::Error(message.into()),
            status: Status::Failed,
            accumulated_usage: Usage::zero(),
            accumulated_metrics: Metrics::default(),
            execution_count: 0,
            execution_time_ms,
        }
    }

    /// Flattened text of the node output, used when composing downstream
    /// node inputs.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.result {
            NodeOutput::Agent(result) => result.text(),
            NodeOutput::MultiAgent(result) => result.text(),
            NodeOutput::Error(message) => message.clone(),
        }
    }
}

/// The result of an orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct MultiAgentResult {
    /// Terminal status of the run.
    pub status: Status,
    /// Per-node results keyed by node id.
    pub results: HashMap<String, NodeResult>,
    /// Usage accumulated across all nodes.
    pub accumulated_usage: Usage,
    /// Latency accumulated across all nodes.
    pub accumulated_metrics: Metrics,
    /// Total underlying executions across all nodes.
    pub execution_count: usize,
    /// Wall-clock execution time of the run in milliseconds.
    pub execution_time_ms: u64,
}

impl MultiAgentResult {
    /// Flattened text of all node outputs in node-id order.
    #[must_use]
    pub fn text(&self) -> String {
        let mut ids: Vec<&String> = self.results.keys().collect();
        ids.sort();
        ids.iter()
            .map(|id| self.results[*id].text())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An orchestrator that can run a task across multiple agents.
///
/// Implemented by [`Graph`] and [`Swarm`]; the interface is what lets
/// orchestrators nest inside each other as nodes.
#[async_trait]
pub trait MultiAgentRunner: Send + Sync {
    /// Run the task to completion under the given invocation context.
    async fn run(
        &mut self,
        task: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<MultiAgentResult>;
}

/// A node's executor: a single agent or a nested orchestrator.
///
/// Executors are taken by value, so each node owns a distinct executor
/// instance by construction.
pub enum NodeExecutor {
    /// A single agent.
    Agent(Box<Agent>),
    /// A nested orchestrator.
    MultiAgent(Box<dyn MultiAgentRunner>),
}

impl NodeExecutor {
    /// The display name used when composing downstream inputs.
    #[must_use]
    pub(crate) fn display_name(&self) -> Option<&str> {
        match self {
            Self::Agent(agent) => Some(agent.name()),
            Self::MultiAgent(_) => None,
        }
    }
}

impl From<Agent> for NodeExecutor {
    fn from(agent: Agent) -> Self {
        Self::Agent(Box::new(agent))
    }
}

impl fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(agent) => f.debug_tuple("Agent").field(&agent.name()).finish(),
            Self::MultiAgent(_) => f.write_str("MultiAgent(..)"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::stream::StopReason;
    use crate::usage::EventLoopMetrics;

    fn agent_result(text: &str) -> AgentResult {
        AgentResult {
            stop_reason: StopReason::EndTurn,
            message: Message::assistant(text),
            metrics: EventLoopMetrics {
                cycle_count: 2,
                accumulated_usage: Usage::new(10, 5),
                accumulated_metrics: Metrics::new(30),
            },
            state: HashMap::new(),
        }
    }

    #[test]
    fn node_result_from_agent_copies_metrics() {
        let node = NodeResult::from_agent(agent_result("done"), 120);
        assert_eq!(node.status, Status::Completed);
        assert_eq!(node.accumulated_usage.total_tokens, 15);
        assert_eq!(node.execution_count, 2);
        assert_eq!(node.execution_time_ms, 120);
        assert_eq!(node.text(), "done");
    }

    #[test]
    fn failed_node_result_carries_message() {
        let node = NodeResult::failed("timed out", 5);
        assert!(node.status.is_failed());
        assert_eq!(node.text(), "timed out");
        assert!(node.accumulated_usage.is_empty());
    }

    #[test]
    fn multi_result_text_flattens_in_id_order() {
        let mut results = HashMap::new();
        results.insert("b".to_owned(), NodeResult::from_agent(agent_result("second"), 1));
        results.insert("a".to_owned(), NodeResult::from_agent(agent_result("first"), 1));

        let multi = MultiAgentResult {
            status: Status::Completed,
            results,
            accumulated_usage: Usage::zero(),
            accumulated_metrics: Metrics::default(),
            execution_count: 2,
            execution_time_ms: 2,
        };
        assert_eq!(multi.text(), "first\nsecond");
    }
}
