//! Self-organizing swarm orchestration.
//!
//! A [`Swarm`] runs one agent at a time. Agents coordinate by calling the
//! injected `handoff_to_agent` tool, which moves control to a named peer,
//! carries an optional handoff message, and merges shared context under
//! the handing-off agent's node id. An agent that finishes without handing
//! off completes the swarm.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::agent::{Agent, TaskInput};
use crate::context::InvocationContext;
use crate::error::{Error, Result};
use crate::message::{ContentBlock, Message, ToolResult};
use crate::tool::{Tool, ToolEvent, ToolSpec, ToolStream};
use crate::usage::{Metrics, Usage};

use super::{MultiAgentResult, MultiAgentRunner, NodeResult, Status};

/// Name of the injected coordination tool. Member agents must not define a
/// tool with this name themselves.
pub const HANDOFF_TOOL_NAME: &str = "handoff_to_agent";

/// Closed configuration for swarm execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwarmConfig {
    /// Stop after this many node activations have been recorded.
    pub max_handoffs: usize,
    /// Stop after this many loop iterations.
    pub max_iterations: usize,
    /// Wall-clock budget for the whole run.
    pub execution_timeout: Duration,
    /// Budget for a single node activation. On expiry the node's future is
    /// dropped, which cancels the in-flight work at its next await point,
    /// and the swarm transitions to failed.
    pub node_timeout: Duration,
    /// Window size for repetitive-handoff detection; `0` disables it.
    pub repetitive_handoff_detection_window: usize,
    /// Minimum distinct agents required within the window.
    pub repetitive_handoff_min_unique_agents: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_handoffs: 20,
            max_iterations: 20,
            execution_timeout: Duration::from_secs(900),
            node_timeout: Duration::from_secs(300),
            repetitive_handoff_detection_window: 0,
            repetitive_handoff_min_unique_agents: 0,
        }
    }
}

/// The result of a swarm invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmResult {
    /// Terminal status of the run.
    pub status: Status,
    /// Per-node results keyed by agent name.
    pub results: HashMap<String, NodeResult>,
    /// Agent names in activation order.
    pub node_history: Vec<String>,
    /// Shared context contributed through handoffs, keyed by contributor.
    pub shared_context: HashMap<String, HashMap<String, Value>>,
    /// The unconsumed handoff message, if the run ended with one pending.
    pub handoff_message: Option<String>,
    /// Why the run failed, when it did.
    pub failure_reason: Option<String>,
    /// Usage accumulated across all activations.
    pub accumulated_usage: Usage,
    /// Latency accumulated across all activations.
    pub accumulated_metrics: Metrics,
    /// Number of node activations.
    pub execution_count: usize,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
}

impl SwarmResult {
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

/// Mutable swarm state, shared with the injected handoff tools.
#[derive(Debug, Default)]
struct SwarmShared {
    status: Option<Status>,
    current_node: String,
    handoff_message: Option<String>,
    shared_context: HashMap<String, HashMap<String, Value>>,
    node_history: Vec<String>,
}

impl SwarmShared {
    fn is_executing(&self) -> bool {
        self.status == Some(Status::Executing)
    }
}

#[derive(Debug, Clone)]
struct AgentInfo {
    name: String,
    description: Option<String>,
}

/// The injected coordination tool.
struct HandoffTool {
    shared: Arc<StdMutex<SwarmShared>>,
    roster: Arc<Vec<AgentInfo>>,
}

impl HandoffTool {
    fn handoff(&self, tool_use_id: &str, input: &Value) -> ToolResult {
        let Some(agent_name) = input.get("agent_name").and_then(Value::as_str) else {
            return ToolResult::error(tool_use_id, "agent_name is required");
        };
        let Some(message) = input.get("message").and_then(Value::as_str) else {
            return ToolResult::error(tool_use_id, "message is required");
        };

        let context = match input.get("context") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => {
                if map.keys().any(|key| key.is_empty()) {
                    return ToolResult::error(
                        tool_use_id,
                        "context keys must be non-empty strings",
                    );
                }
                Some(map.clone())
            }
            Some(_) => {
                return ToolResult::error(tool_use_id, "context must be a JSON object");
            }
        };

        let mut shared = self
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !shared.is_executing() {
            // Outside an active run the tool has no effect.
            return ToolResult::success(tool_use_id, "Swarm is not active; handoff ignored");
        }

        if !self.roster.iter().any(|info| info.name == agent_name) {
            return ToolResult::error(
                tool_use_id,
                format!("Agent '{agent_name}' not found in swarm"),
            );
        }

        let previous = std::mem::replace(&mut shared.current_node, agent_name.to_owned());
        shared.handoff_message = Some(message.to_owned());
        if let Some(context) = context {
            shared
                .shared_context
                .entry(previous)
                .or_default()
                .extend(context);
        }

        ToolResult::success(tool_use_id, format!("Handed off to {agent_name}"))
    }
}

impl Tool for HandoffTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            HANDOFF_TOOL_NAME,
            "Transfer control to another agent in the swarm. The target agent \
             continues working on the task with your message and shared context.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "agent_name": {
                        "type": "string",
                        "description": "Name of the agent to hand off to"
                    },
                    "message": {
                        "type": "string",
                        "description": "Message explaining what the next agent should do"
                    },
                    "context": {
                        "type": "object",
                        "description": "Key-value knowledge to share with later agents"
                    }
                },
                "required": ["agent_name", "message"]
            }),
        )
    }

    fn run(&self, tool_use: crate::message::ToolUse, _ctx: InvocationContext) -> ToolStream {
        let result = self.handoff(&tool_use.id, &tool_use.input);
        Box::pin(async_stream::stream! {
            yield ToolEvent::Result(result);
        })
    }
}

struct SwarmNode {
    name: String,
    description: Option<String>,
    agent: Agent,
    snapshot: (Vec<Message>, HashMap<String, Value>),
}

/// Builder for [`Swarm`].
pub struct SwarmBuilder {
    agents: Vec<Agent>,
    config: SwarmConfig,
}

impl SwarmBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: Vec::new(),
            config: SwarmConfig::default(),
        }
    }

    /// Add a member agent. The first agent added receives the task.
    #[must_use]
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    /// Set the activation ceiling.
    #[must_use]
    pub const fn max_handoffs(mut self, max_handoffs: usize) -> Self {
        self.config.max_handoffs = max_handoffs;
        self
    }

    /// Set the iteration ceiling.
    #[must_use]
    pub const fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the wall-clock budget for the whole run.
    #[must_use]
    pub const fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout = timeout;
        self
    }

    /// Set the budget for a single node activation.
    #[must_use]
    pub const fn node_timeout(mut self, timeout: Duration) -> Self {
        self.config.node_timeout = timeout;
        self
    }

    /// Enable repetitive-handoff detection: fail when the last `window`
    /// activations involve fewer than `min_unique` distinct agents.
    #[must_use]
    pub const fn repetitive_handoff_detection(
        mut self,
        window: usize,
        min_unique: usize,
    ) -> Self {
        self.config.repetitive_handoff_detection_window = window;
        self.config.repetitive_handoff_min_unique_agents = min_unique;
        self
    }

    /// Validate the configuration and build the swarm.
    ///
    /// # Errors
    ///
    /// [`Error::SwarmConfig`] when the swarm is empty, agent names repeat,
    /// an agent already defines `handoff_to_agent`, or an agent carries a
    /// session manager or lifecycle hooks.
    pub fn build(self) -> Result<Swarm> {
        if self.agents.is_empty() {
            return Err(Error::swarm_config("swarm has no agents"));
        }

        let mut names = HashSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name().to_owned()) {
                return Err(Error::swarm_config(format!(
                    "duplicate agent name '{}'",
                    agent.name()
                )));
            }
            if agent.has_tool(HANDOFF_TOOL_NAME) {
                return Err(Error::swarm_config(format!(
                    "agent '{}' already defines a tool named '{HANDOFF_TOOL_NAME}'",
                    agent.name()
                )));
            }
            if agent.has_session() {
                return Err(Error::swarm_config(format!(
                    "agent '{}' must not carry a session manager in a swarm",
                    agent.name()
                )));
            }
            if agent.has_hooks() {
                return Err(Error::swarm_config(format!(
                    "agent '{}' must not carry lifecycle hooks in a swarm",
                    agent.name()
                )));
            }
        }

        let roster: Arc<Vec<AgentInfo>> = Arc::new(
            self.agents
                .iter()
                .map(|agent| AgentInfo {
                    name: agent.name().to_owned(),
                    description: agent.description().map(str::to_owned),
                })
                .collect(),
        );
        let shared = Arc::new(StdMutex::new(SwarmShared::default()));

        let mut nodes = Vec::with_capacity(self.agents.len());
        for mut agent in self.agents {
            agent.add_tool(Arc::new(HandoffTool {
                shared: Arc::clone(&shared),
                roster: Arc::clone(&roster),
            }));
            // The snapshot is the state agents are reset to before every
            // activation.
            let snapshot = agent.snapshot();
            nodes.push(SwarmNode {
                name: agent.name().to_owned(),
                description: agent.description().map(str::to_owned),
                agent,
                snapshot,
            });
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name.clone(), i))
            .collect();

        Ok(Swarm {
            nodes,
            index,
            config: self.config,
            shared,
        })
    }
}

impl Default for SwarmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SwarmBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmBuilder")
            .field("agents", &self.agents.len())
            .field("config", &self.config)
            .finish()
    }
}

/// A validated, executable swarm of agents.
pub struct Swarm {
    nodes: Vec<SwarmNode>,
    index: HashMap<String, usize>,
    config: SwarmConfig,
    shared: Arc<StdMutex<SwarmShared>>,
}

impl Swarm {
    /// Start building a swarm.
    #[must_use]
    pub fn builder() -> SwarmBuilder {
        SwarmBuilder::new()
    }

    /// Run the swarm to completion.
    pub async fn invoke(&mut self, task: impl Into<TaskInput>) -> Result<SwarmResult> {
        let ctx = InvocationContext::new();
        self.invoke_with_context(task.into(), &ctx).await
    }

    /// Run the swarm under an existing invocation context.
    pub async fn invoke_with_context(
        &mut self,
        task: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<SwarmResult> {
        self.execute(task, ctx).await
    }

    /// Blocking variant of [`Swarm::invoke`].
    ///
    /// Must not be called from inside an async runtime.
    pub fn invoke_blocking(&mut self, task: impl Into<TaskInput>) -> Result<SwarmResult> {
        let task = task.into();
        crate::agent::block_on(self.invoke(task))
    }

    async fn execute(&mut self, task: TaskInput, ctx: &InvocationContext) -> Result<SwarmResult> {
        self.reset();
        let started = Instant::now();
        let mut results: HashMap<String, NodeResult> = HashMap::new();
        let mut usage = Usage::zero();
        let mut metrics = Metrics::default();
        let mut execution_count = 0usize;
        let mut failure_reason: Option<String> = None;

        info!(
            agents = self.nodes.len(),
            first = %self.nodes[0].name,
            "swarm run started",
        );

        let final_status = loop {
            if let Some(reason) = self.stop_reason(started) {
                warn!(%reason, "swarm stopping");
                failure_reason = Some(reason);
                break Status::Failed;
            }

            let (current_name, handoff) = {
                let mut shared = self.lock();
                (shared.current_node.clone(), shared.handoff_message.take())
            };
            let input = self.build_input(&task, &current_name, handoff);

            let node_idx = self.index[&current_name];
            let node = &mut self.nodes[node_idx];
            let SwarmNode {
                agent, snapshot, ..
            } = node;
            agent.restore(snapshot);

            info!(agent = %current_name, "activating swarm node");
            let node_started = Instant::now();
            let outcome =
                tokio::time::timeout(self.config.node_timeout, agent.invoke_with_context(input, ctx))
                    .await;
            let elapsed_ms = node_started.elapsed().as_millis() as u64;

            self.lock().node_history.push(current_name.clone());

            match outcome {
                Err(_) => {
                    let reason = format!(
                        "node '{current_name}' timed out after {:?}",
                        self.config.node_timeout
                    );
                    warn!(%reason, "swarm node timed out");
                    results.insert(current_name, NodeResult::failed(&reason, elapsed_ms));
                    failure_reason = Some(reason);
                    break Status::Failed;
                }
                Ok(Err(err)) => {
                    error!(agent = %current_name, error = %err, "swarm node failed");
                    results.insert(
                        current_name,
                        NodeResult::failed(err.to_string(), elapsed_ms),
                    );
                    failure_reason = Some(err.to_string());
                    break Status::Failed;
                }
                Ok(Ok(agent_result)) => {
                    usage += agent_result.metrics.accumulated_usage;
                    metrics += agent_result.metrics.accumulated_metrics;
                    execution_count += 1;
                    results.insert(
                        current_name.clone(),
                        NodeResult::from_agent(agent_result, elapsed_ms),
                    );
                }
            }

            let new_current = self.lock().current_node.clone();
            if new_current == current_name {
                break Status::Completed;
            }
            info!(from = %current_name, to = %new_current, "handoff to agent");
        };

        let (node_history, shared_context, handoff_message) = {
            let mut shared = self.lock();
            shared.status = Some(final_status);
            (
                shared.node_history.clone(),
                shared.shared_context.clone(),
                shared.handoff_message.clone(),
            )
        };

        info!(
            status = ?final_status,
            history = ?node_history,
            "swarm run finished",
        );
        Ok(SwarmResult {
            status: final_status,
            results,
            node_history,
            shared_context,
            handoff_message,
            failure_reason,
            accumulated_usage: usage,
            accumulated_metrics: metrics,
            execution_count,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Evaluate the stop conditions. Returns the failure reason when one
    /// trips; node-level timeouts are handled at the invocation site.
    fn stop_reason(&self, started: Instant) -> Option<String> {
        let shared = self.lock();
        let history_len = shared.node_history.len();

        if history_len >= self.config.max_handoffs {
            return Some(format!(
                "max handoffs reached ({})",
                self.config.max_handoffs
            ));
        }
        if history_len >= self.config.max_iterations {
            return Some(format!(
                "max iterations reached ({})",
                self.config.max_iterations
            ));
        }
        if started.elapsed() > self.config.execution_timeout {
            return Some(format!(
                "execution timed out after {:?}",
                self.config.execution_timeout
            ));
        }

        let window = self.config.repetitive_handoff_detection_window;
        let min_unique = self.config.repetitive_handoff_min_unique_agents;
        if window > 0 && min_unique > 0 && history_len >= window {
            let unique: HashSet<&String> =
                shared.node_history[history_len - window..].iter().collect();
            if unique.len() < min_unique {
                return Some("Repetitive handoff".to_owned());
            }
        }

        None
    }

    /// Compose the text handed to the next active agent.
    fn build_input(
        &self,
        task: &TaskInput,
        current_name: &str,
        handoff_message: Option<String>,
    ) -> TaskInput {
        let mut text = String::new();

        if let Some(message) = handoff_message {
            text.push_str(&format!("Handoff Message: {message}\n\n"));
        }

        match task {
            TaskInput::Text(request) => {
                text.push_str(&format!("User Request: {request}\n"));
            }
            TaskInput::Blocks(_) => text.push_str("User Request: Multi-modal task\n"),
        }

        {
            let shared = self.lock();
            if !shared.node_history.is_empty() {
                text.push_str(&format!(
                    "Previous agents who worked on this: {}\n",
                    shared.node_history.join(" → ")
                ));
            }
            if !shared.shared_context.is_empty() {
                text.push_str("Shared knowledge from previous agents:\n");
                let mut contributors: Vec<&String> = shared.shared_context.keys().collect();
                contributors.sort();
                for contributor in contributors {
                    let json = serde_json::to_string(&shared.shared_context[contributor])
                        .unwrap_or_default();
                    text.push_str(&format!("• {contributor}: {json}\n"));
                }
            }
        }

        let others: Vec<&SwarmNode> = self
            .nodes
            .iter()
            .filter(|node| node.name != current_name)
            .collect();
        if !others.is_empty() {
            text.push_str("Other agents available for collaboration:\n");
            for node in others {
                text.push_str(&format!("Agent name: {}.", node.name));
                if let Some(description) = &node.description {
                    text.push_str(&format!(" Agent description: {description}"));
                }
                text.push('\n');
            }
        }

        text.push_str(
            "\nYou have access to swarm coordination tools if you need help from \
             other agents. If you don't hand off to another agent, the swarm will \
             consider the task complete.",
        );

        match task {
            TaskInput::Text(_) => TaskInput::Text(text),
            TaskInput::Blocks(blocks) => {
                let mut content = vec![ContentBlock::text(text)];
                content.extend(blocks.iter().cloned());
                TaskInput::Blocks(content)
            }
        }
    }

    fn reset(&self) {
        let mut shared = self.lock();
        shared.status = Some(Status::Executing);
        shared.current_node = self.nodes[0].name.clone();
        shared.handoff_message = None;
        shared.shared_context.clear();
        shared.node_history.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SwarmShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl MultiAgentRunner for Swarm {
    async fn run(
        &mut self,
        task: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<MultiAgentResult> {
        self.invoke_with_context(task, ctx)
            .await
            .map(SwarmResult::into_multi)
    }
}

impl fmt::Debug for Swarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        f.debug_struct("Swarm")
            .field("agents", &names)
            .field("config", &self.config)
            .finish()
    }
}
