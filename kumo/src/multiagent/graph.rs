//! Deterministic DAG orchestration.
//!
//! A [`Graph`] executes nodes in level-synchronous waves: every ready node
//! runs concurrently, the wave is a barrier, and completion unlocks
//! downstream nodes whose edge conditions hold. Structure is validated at
//! build time; execution never discovers a cycle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{Instrument as _, debug, error, info, info_span};

use crate::agent::TaskInput;
use crate::context::InvocationContext;
use crate::error::{Error, Result};
use crate::message::ContentBlock;
use crate::usage::{Metrics, Usage};

use super::{MultiAgentResult, MultiAgentRunner, NodeExecutor, NodeResult, Status};

/// An edge condition evaluated against the current [`GraphState`].
pub type Condition = Arc<dyn Fn(&GraphState) -> bool + Send + Sync>;

/// A directed edge, optionally gated by a condition.
#[derive(Clone)]
pub struct GraphEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    condition: Option<Condition>,
}

impl GraphEdge {
    /// Evaluate the edge against the current state. An absent condition is
    /// always satisfied.
    #[must_use]
    pub fn is_satisfied(&self, state: &GraphState) -> bool {
        self.condition.as_ref().is_none_or(|cond| cond(state))
    }
}

impl fmt::Debug for GraphEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEdge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Shared per-invocation state, readable by edge conditions.
#[derive(Debug, Clone)]
pub struct GraphState {
    /// The task the graph was invoked with.
    pub task: TaskInput,
    /// Current status of the run.
    pub status: Status,
    /// Ids of nodes that completed.
    pub completed_nodes: HashSet<String>,
    /// Ids of nodes that failed.
    pub failed_nodes: HashSet<String>,
    /// Node ids in completion order.
    pub execution_order: Vec<String>,
    /// Per-node results keyed by node id.
    pub results: HashMap<String, NodeResult>,
    /// Usage accumulated so far.
    pub accumulated_usage: Usage,
    /// Latency accumulated so far.
    pub accumulated_metrics: Metrics,
    /// Underlying executions so far.
    pub execution_count: usize,
}

impl GraphState {
    fn new(task: TaskInput) -> Self {
        Self {
            task,
            status: Status::Executing,
            completed_nodes: HashSet::new(),
            failed_nodes: HashSet::new(),
            execution_order: Vec::new(),
            results: HashMap::new(),
            accumulated_usage: Usage::zero(),
            accumulated_metrics: Metrics::default(),
            execution_count: 0,
        }
    }

    /// Text of a completed node's result, if available.
    #[must_use]
    pub fn result_text(&self, node_id: &str) -> Option<String> {
        self.results.get(node_id).map(NodeResult::text)
    }
}

/// Closed configuration for graph execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphConfig {
    /// Outer wall-clock guard for the whole invocation. The runner does
    /// not enforce a per-node timeout; node-level limits are the member
    /// agents' own concern.
    pub execution_timeout: Option<std::time::Duration>,
}

/// The result of a graph invocation.
#[derive(Debug, Clone, Serialize)]
pub struct GraphResult {
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
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    /// Number of nodes in the graph.
    pub total_nodes: usize,
    /// Number of nodes that completed.
    pub completed_nodes: usize,
    /// Number of nodes that failed.
    pub failed_nodes: usize,
    /// Node ids in completion order.
    pub execution_order: Vec<String>,
    /// Entry point node ids.
    pub entry_points: Vec<String>,
    /// Edges as `(from, to)` pairs.
    pub edges: Vec<(String, String)>,
}

impl GraphResult {
    /// Collapse into the common orchestrator result record.
    #[must_use]
    pub fn into_multi(self) -> MultiAgentResult {
        MultiAgentResult {
            status: self.status,
            results: self.results,
            accumulated_usage: self.accumulated_usage,
            accumulated_metrics: self.accumulated_metrics,
            execution_count: self.execution_count,
            execution_time_ms: self.execution_time_ms,
        }
    }
}

struct GraphNode {
    id: String,
    executor: NodeExecutor,
    /// Initial agent state, restored at the start of every invocation.
    /// Nested orchestrators reset themselves and carry no snapshot.
    snapshot: Option<(Vec<crate::message::Message>, HashMap<String, serde_json::Value>)>,
}

/// Builder for [`Graph`].
///
/// Nodes take their executors by value, so executor instances are unique
/// across nodes by construction.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<(String, NodeExecutor)>,
    edges: Vec<GraphEdge>,
    entry_points: Vec<String>,
    config: GraphConfig,
}

impl GraphBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    #[must_use]
    pub fn add_node(mut self, id: impl Into<String>, executor: impl Into<NodeExecutor>) -> Self {
        self.nodes.push((id.into(), executor.into()));
        self
    }

    /// Add an unconditional edge.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(GraphEdge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    /// Add an edge gated by a condition over the graph state.
    #[must_use]
    pub fn add_edge_when<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&GraphState) -> bool + Send + Sync + 'static,
    {
        self.edges.push(GraphEdge {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    /// Declare an entry point. Without any declaration, entry points are
    /// derived as the nodes with zero incoming edges.
    #[must_use]
    pub fn entry_point(mut self, id: impl Into<String>) -> Self {
        self.entry_points.push(id.into());
        self
    }

    /// Set the outer wall-clock guard.
    #[must_use]
    pub const fn execution_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.execution_timeout = Some(timeout);
        self
    }

    /// Validate the structure and build the graph.
    ///
    /// # Errors
    ///
    /// [`Error::GraphValidation`] on duplicate or unknown node ids, missing
    /// entry points, or an empty graph; [`Error::GraphCycle`] when the edge
    /// set contains a cycle.
    pub fn build(self) -> Result<Graph> {
        if self.nodes.is_empty() {
            return Err(Error::graph_validation("graph has no nodes"));
        }

        let mut ids = HashSet::new();
        for (id, _) in &self.nodes {
            if !ids.insert(id.as_str()) {
                return Err(Error::graph_validation(format!("duplicate node id '{id}'")));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(Error::graph_validation(format!(
                        "edge references unknown node '{endpoint}'"
                    )));
                }
            }
        }

        for entry in &self.entry_points {
            if !ids.contains(entry.as_str()) {
                return Err(Error::graph_validation(format!(
                    "entry point '{entry}' is not a node"
                )));
            }
        }

        let entry_points = if self.entry_points.is_empty() {
            let targets: HashSet<&str> = self.edges.iter().map(|e| e.to.as_str()).collect();
            let derived: Vec<String> = self
                .nodes
                .iter()
                .map(|(id, _)| id.clone())
                .filter(|id| !targets.contains(id.as_str()))
                .collect();
            if derived.is_empty() {
                return Err(Error::graph_validation(
                    "no entry points declared and every node has incoming edges",
                ));
            }
            derived
        } else {
            self.entry_points
        };

        Self::check_acyclic(&self.nodes, &self.edges)?;

        let node_order: Vec<String> = self.nodes.iter().map(|(id, _)| id.clone()).collect();
        let index: HashMap<String, usize> = node_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let nodes = self
            .nodes
            .into_iter()
            .map(|(id, executor)| {
                let snapshot = match &executor {
                    NodeExecutor::Agent(agent) => Some(agent.snapshot()),
                    NodeExecutor::MultiAgent(_) => None,
                };
                Arc::new(Mutex::new(GraphNode {
                    id,
                    executor,
                    snapshot,
                }))
            })
            .collect();

        Ok(Graph {
            nodes,
            index,
            node_order,
            edges: self.edges,
            entry_points,
            config: self.config,
        })
    }

    /// Three-color depth-first search; gray-on-gray is a back edge.
    fn check_acyclic(nodes: &[(String, NodeExecutor)], edges: &[GraphEdge]) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            colors: &mut HashMap<&'a str, Color>,
        ) -> Result<()> {
            colors.insert(node, Color::Gray);
            for &next in adjacency.get(node).into_iter().flatten() {
                match colors.get(next).copied().unwrap_or(Color::White) {
                    Color::Gray => return Err(Error::GraphCycle(next.to_owned())),
                    Color::White => visit(next, adjacency, colors)?,
                    Color::Black => {}
                }
            }
            colors.insert(node, Color::Black);
            Ok(())
        }

        let mut colors: HashMap<&str, Color> = HashMap::new();
        for (id, _) in nodes {
            if colors.get(id.as_str()).copied().unwrap_or(Color::White) == Color::White {
                visit(id, &adjacency, &mut colors)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish_non_exhaustive()
    }
}

/// A validated, executable DAG of agents and nested orchestrators.
pub struct Graph {
    nodes: Vec<Arc<Mutex<GraphNode>>>,
    index: HashMap<String, usize>,
    node_order: Vec<String>,
    edges: Vec<GraphEdge>,
    entry_points: Vec<String>,
    config: GraphConfig,
}

impl Graph {
    /// Start building a graph.
    #[must_use]
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// The graph's entry point node ids.
    #[must_use]
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    /// Run the graph to completion.
    ///
    /// Every invocation starts fresh: member agents are reset to the
    /// conversations they were built with, and a new [`GraphState`] is
    /// created for the run.
    pub async fn invoke(&mut self, task: impl Into<TaskInput>) -> Result<GraphResult> {
        let ctx = InvocationContext::new();
        self.invoke_with_context(task.into(), &ctx).await
    }

    /// Run the graph under an existing invocation context.
    pub async fn invoke_with_context(
        &mut self,
        task: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<GraphResult> {
        match self.config.execution_timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute(task, ctx))
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.execute(task, ctx).await,
        }
    }

    /// Blocking variant of [`Graph::invoke`].
    ///
    /// Must not be called from inside an async runtime.
    pub fn invoke_blocking(&mut self, task: impl Into<TaskInput>) -> Result<GraphResult> {
        let task = task.into();
        crate::agent::block_on(self.invoke(task))
    }

    async fn execute(&self, task: TaskInput, ctx: &InvocationContext) -> Result<GraphResult> {
        let started = Instant::now();
        self.reset_nodes().await;
        let mut state = GraphState::new(task);
        let mut ready: Vec<String> = self.entry_points.clone();
        info!(entry_points = ?ready, total_nodes = self.nodes.len(), "graph run started");

        while !ready.is_empty() {
            debug!(wave = ?ready, "executing wave");

            let wave: Vec<_> = ready
                .iter()
                .map(|id| {
                    let input = self.compose_input(&state, id);
                    let node = Arc::clone(&self.nodes[self.index[id]]);
                    (id.clone(), input, node)
                })
                .collect();

            let futures = wave.into_iter().map(|(id, input, node)| {
                let ctx = ctx.clone();
                async move {
                    let node_started = Instant::now();
                    let outcome = Self::run_node(&node, input, &ctx).await;
                    (id, node_started.elapsed(), outcome)
                }
            });
            let wave_results = futures::future::join_all(futures).await;

            // The wave is a barrier: record every outcome, then surface the
            // first failure.
            let mut wave_error = None;
            for (id, elapsed, outcome) in wave_results {
                let elapsed_ms = elapsed.as_millis() as u64;
                match outcome {
                    Ok(mut node_result) => {
                        node_result.execution_time_ms = elapsed_ms;
                        state.accumulated_usage += node_result.accumulated_usage;
                        state.accumulated_metrics += node_result.accumulated_metrics;
                        state.execution_count += node_result.execution_count;
                        state.completed_nodes.insert(id.clone());
                        state.execution_order.push(id.clone());
                        state.results.insert(id, node_result);
                    }
                    Err(err) => {
                        error!(node = %id, error = %err, "graph node failed");
                        state.failed_nodes.insert(id.clone());
                        state
                            .results
                            .insert(id, NodeResult::failed(err.to_string(), elapsed_ms));
                        if wave_error.is_none() {
                            wave_error = Some(err);
                        }
                    }
                }
            }

            if let Some(err) = wave_error {
                state.status = Status::Failed;
                return Err(err);
            }

            ready = self.newly_ready(&state);
        }

        state.status = Status::Completed;
        info!(
            completed = state.completed_nodes.len(),
            order = ?state.execution_order,
            "graph run completed",
        );
        Ok(GraphResult {
            status: state.status,
            total_nodes: self.nodes.len(),
            completed_nodes: state.completed_nodes.len(),
            failed_nodes: state.failed_nodes.len(),
            execution_order: state.execution_order,
            entry_points: self.entry_points.clone(),
            edges: self
                .edges
                .iter()
                .map(|e| (e.from.clone(), e.to.clone()))
                .collect(),
            results: state.results,
            accumulated_usage: state.accumulated_usage,
            accumulated_metrics: state.accumulated_metrics,
            execution_count: state.execution_count,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Restore every agent executor to its build-time snapshot.
    async fn reset_nodes(&self) {
        for node in &self.nodes {
            let mut node = node.lock().await;
            let GraphNode {
                executor, snapshot, ..
            } = &mut *node;
            if let (NodeExecutor::Agent(agent), Some(snapshot)) = (executor, snapshot.as_ref()) {
                agent.restore(snapshot);
            }
        }
    }

    async fn run_node(
        node: &Arc<Mutex<GraphNode>>,
        input: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<NodeResult> {
        let mut node = node.lock().await;
        let span = info_span!("graph_node", node.id = %node.id);
        match &mut node.executor {
            NodeExecutor::Agent(agent) => {
                let result = agent.invoke_with_context(input, ctx).instrument(span).await?;
                Ok(NodeResult::from_agent(result, 0))
            }
            NodeExecutor::MultiAgent(runner) => {
                let result = runner.run(input, ctx).instrument(span).await?;
                Ok(NodeResult::from_multi(result, 0))
            }
        }
    }

    /// Nodes that became ready: not yet completed or failed, with at least
    /// one satisfied incoming edge from a completed source.
    fn newly_ready(&self, state: &GraphState) -> Vec<String> {
        self.node_order
            .iter()
            .filter(|id| {
                !state.completed_nodes.contains(*id) && !state.failed_nodes.contains(*id)
            })
            .filter(|id| {
                self.edges.iter().any(|edge| {
                    edge.to == **id
                        && state.completed_nodes.contains(&edge.from)
                        && edge.is_satisfied(state)
                })
            })
            .cloned()
            .collect()
    }

    /// Compose a node's input from the graph task and its satisfied
    /// dependencies' outputs.
    fn compose_input(&self, state: &GraphState, node_id: &str) -> TaskInput {
        let satisfied: Vec<&GraphEdge> = self
            .edges
            .iter()
            .filter(|edge| {
                edge.to == node_id
                    && state.completed_nodes.contains(&edge.from)
                    && edge.is_satisfied(state)
            })
            .collect();

        if satisfied.is_empty() {
            return state.task.clone();
        }

        let mut deps = String::from("Inputs from previous nodes:\n");
        for edge in &satisfied {
            deps.push_str(&format!("\nFrom {}:\n", edge.from));
            let name = self.nodes[self.index[&edge.from]]
                .try_lock()
                .ok()
                .and_then(|node| node.executor.display_name().map(str::to_owned))
                .unwrap_or_else(|| "Agent".to_owned());
            let text = state.result_text(&edge.from).unwrap_or_default();
            deps.push_str(&format!("  - {name}: {text}\n"));
        }

        match &state.task {
            TaskInput::Text(task) => {
                TaskInput::Text(format!("Original Task: {task}\n\n{deps}"))
            }
            TaskInput::Blocks(blocks) => {
                let mut content = vec![ContentBlock::text("Original Task:")];
                content.extend(blocks.iter().cloned());
                content.push(ContentBlock::text(deps));
                TaskInput::Blocks(content)
            }
        }
    }
}

#[async_trait::async_trait]
impl MultiAgentRunner for Graph {
    async fn run(
        &mut self,
        task: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<MultiAgentResult> {
        self.invoke_with_context(task, ctx)
            .await
            .map(GraphResult::into_multi)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.node_order)
            .field("edges", &self.edges.len())
            .field("entry_points", &self.entry_points)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::model::MockModel;

    fn agent(name: &str, replies: Vec<&str>) -> Agent {
        let mut model = MockModel::new();
        for reply in replies {
            model = model.then_text(reply);
        }
        Agent::builder().name(name).model(model).build().unwrap()
    }

    mod validation {
        use super::*;

        #[test]
        fn rejects_empty_graph() {
            let err = Graph::builder().build().unwrap_err();
            assert!(matches!(err, Error::GraphValidation(_)));
        }

        #[test]
        fn rejects_duplicate_ids() {
            let err = Graph::builder()
                .add_node("a", agent("first", vec![]))
                .add_node("a", agent("second", vec![]))
                .build()
                .unwrap_err();
            assert!(matches!(err, Error::GraphValidation(_)));
            assert!(err.to_string().contains("duplicate"));
        }

        #[test]
        fn rejects_unknown_edge_endpoints() {
            let err = Graph::builder()
                .add_node("a", agent("a", vec![]))
                .add_edge("a", "ghost")
                .build()
                .unwrap_err();
            assert!(matches!(err, Error::GraphValidation(_)));
        }

        #[test]
        fn rejects_unknown_entry_point() {
            let err = Graph::builder()
                .add_node("a", agent("a", vec![]))
                .entry_point("ghost")
                .build()
                .unwrap_err();
            assert!(matches!(err, Error::GraphValidation(_)));
        }

        #[test]
        fn rejects_cycles() {
            let err = Graph::builder()
                .add_node("a", agent("a", vec![]))
                .add_node("b", agent("b", vec![]))
                .add_node("c", agent("c", vec![]))
                .add_edge("a", "b")
                .add_edge("b", "c")
                .add_edge("c", "a")
                .build()
                .unwrap_err();
            assert!(matches!(err, Error::GraphCycle(_)));
        }

        #[test]
        fn rejects_self_loop() {
            let err = Graph::builder()
                .add_node("a", agent("a", vec![]))
                .add_edge("a", "a")
                .build()
                .unwrap_err();
            assert!(matches!(err, Error::GraphCycle(_)));
        }

        #[test]
        fn derives_entry_points_from_in_degree() {
            let graph = Graph::builder()
                .add_node("a", agent("a", vec![]))
                .add_node("b", agent("b", vec![]))
                .add_edge("a", "b")
                .build()
                .unwrap();
            assert_eq!(graph.entry_points(), ["a".to_owned()]);
        }

        #[test]
        fn fails_when_every_node_has_incoming_edges_and_no_entry_declared() {
            // A valid DAG shape cannot trigger this without a cycle, so the
            // cycle check fires first; declared entries bypass derivation.
            let graph = Graph::builder()
                .add_node("a", agent("a", vec![]))
                .add_node("b", agent("b", vec![]))
                .add_edge("a", "b")
                .entry_point("a")
                .build()
                .unwrap();
            assert_eq!(graph.entry_points(), ["a".to_owned()]);
        }
    }

    mod execution {
        use super::*;

        #[tokio::test]
        async fn linear_graph_runs_in_order() {
            let mut graph = Graph::builder()
                .add_node("first", agent("first", vec!["alpha"]))
                .add_node("second", agent("second", vec!["beta"]))
                .add_edge("first", "second")
                .build()
                .unwrap();

            let result = graph.invoke("do the thing").await.unwrap();
            assert!(result.status.is_completed());
            assert_eq!(result.execution_order, vec!["first", "second"]);
            assert_eq!(result.completed_nodes, 2);
            assert_eq!(result.failed_nodes, 0);
            assert_eq!(result.results["second"].text(), "beta");
        }

        #[tokio::test]
        async fn conditional_branch_selects_one_target() {
            // Seed scenario: classifier routes to the technical branch.
            let mut graph = Graph::builder()
                .add_node("classifier", agent("classifier", vec!["this is a technical RFC"]))
                .add_node("tech", agent("tech", vec!["tech review"]))
                .add_node("biz", agent("biz", vec!["biz review"]))
                .add_edge_when("classifier", "tech", |state: &GraphState| {
                    state
                        .result_text("classifier")
                        .is_some_and(|t| t.contains("technical"))
                })
                .add_edge_when("classifier", "biz", |state: &GraphState| {
                    state
                        .result_text("classifier")
                        .is_some_and(|t| t.contains("business"))
                })
                .build()
                .unwrap();

            let result = graph.invoke("review RFC").await.unwrap();
            assert_eq!(result.execution_order, vec!["classifier", "tech"]);
            assert!(!result.results.contains_key("biz"));
        }

        #[tokio::test]
        async fn fan_out_runs_concurrently_and_joins() {
            let mut graph = Graph::builder()
                .add_node("seed", agent("seed", vec!["seeded"]))
                .add_node("left", agent("left", vec!["L"]))
                .add_node("right", agent("right", vec!["R"]))
                .add_node("join", agent("join", vec!["joined"]))
                .add_edge("seed", "left")
                .add_edge("seed", "right")
                .add_edge("left", "join")
                .add_edge("right", "join")
                .build()
                .unwrap();

            let result = graph.invoke("fan out").await.unwrap();
            assert_eq!(result.completed_nodes, 4);
            assert_eq!(result.execution_order.len(), 4);
            assert_eq!(result.execution_order[0], "seed");
            assert_eq!(result.execution_order[3], "join");
        }

        #[tokio::test]
        async fn node_failure_fails_the_graph_after_the_wave() {
            // "broken" has no scripted turns, so its invocation errors.
            let mut graph = Graph::builder()
                .add_node(
                    "broken",
                    Agent::builder()
                        .name("broken")
                        .model(MockModel::new())
                        .build()
                        .unwrap(),
                )
                .add_node("next", agent("next", vec!["unreachable"]))
                .add_edge("broken", "next")
                .build()
                .unwrap();

            let err = graph.invoke("fail").await.unwrap_err();
            assert!(matches!(err, Error::Provider(_)));
        }

        #[tokio::test]
        async fn usage_accumulates_across_nodes() {
            let mut graph = Graph::builder()
                .add_node("a", agent("a", vec!["one"]))
                .add_node("b", agent("b", vec!["two"]))
                .add_edge("a", "b")
                .build()
                .unwrap();

            let result = graph.invoke("count").await.unwrap();
            // MockModel::then_text reports 2 total tokens per turn.
            assert_eq!(result.accumulated_usage.total_tokens, 4);
            assert_eq!(result.execution_count, 2);
        }

        #[tokio::test]
        async fn nested_graph_runs_as_a_node() {
            let inner = Graph::builder()
                .add_node("inner_a", agent("inner_a", vec!["inner done"]))
                .build()
                .unwrap();

            let mut outer = Graph::builder()
                .add_node("inner", NodeExecutor::MultiAgent(Box::new(inner)))
                .add_node("after", agent("after", vec!["outer done"]))
                .add_edge("inner", "after")
                .build()
                .unwrap();

            let result = outer.invoke("nest").await.unwrap();
            assert_eq!(result.execution_order, vec!["inner", "after"]);
            assert!(matches!(
                result.results["inner"].result,
                crate::multiagent::NodeOutput::MultiAgent(_)
            ));
        }

        #[tokio::test]
        async fn execution_timeout_guards_the_run() {
            let mut graph = Graph::builder()
                .add_node("a", agent("a", vec!["fast"]))
                .execution_timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap();
            // Completes well within the guard.
            assert!(graph.invoke("quick").await.is_ok());
        }
    }

    mod input_composition {
        use super::*;

        #[tokio::test]
        async fn downstream_node_receives_structured_input() {
            // Capture what the downstream node is asked by inspecting its
            // conversation after the run.
            let mut graph = Graph::builder()
                .add_node("upstream", agent("researcher", vec!["fact: water is wet"]))
                .add_node("downstream", agent("writer", vec!["report written"]))
                .add_edge("upstream", "downstream")
                .build()
                .unwrap();

            graph.invoke("write a report").await.unwrap();

            let node = graph.nodes[graph.index["downstream"]].try_lock().unwrap();
            let NodeExecutor::Agent(agent) = &node.executor else {
                panic!("expected agent executor");
            };
            let prompt = agent.messages()[0].text().unwrap();
            assert!(prompt.starts_with("Original Task: write a report"));
            assert!(prompt.contains("Inputs from previous nodes:"));
            assert!(prompt.contains("From upstream:"));
            assert!(prompt.contains("  - researcher: fact: water is wet"));
        }

        #[tokio::test]
        async fn multimodal_task_keeps_blocks() {
            let task = TaskInput::Blocks(vec![
                ContentBlock::text("describe this"),
                ContentBlock::Image {
                    format: "png".to_owned(),
                    bytes: bytes::Bytes::from_static(b"\x89PNG"),
                },
            ]);

            let mut graph = Graph::builder()
                .add_node("a", agent("a", vec!["saw it"]))
                .add_node("b", agent("b", vec!["summarized"]))
                .add_edge("a", "b")
                .build()
                .unwrap();

            graph.invoke(task).await.unwrap();

            let node = graph.nodes[graph.index["b"]].try_lock().unwrap();
            let NodeExecutor::Agent(agent) = &node.executor else {
                panic!("expected agent executor");
            };
            let first = &agent.messages()[0];
            assert_eq!(first.content[0].as_text(), Some("Original Task:"));
            assert!(matches!(first.content[2], ContentBlock::Image { .. }));
            assert!(
                first.content[3]
                    .as_text()
                    .unwrap()
                    .contains("Inputs from previous nodes:")
            );
        }
    }
}
