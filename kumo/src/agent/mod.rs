//! The agent: a model, a tool registry, and a conversation driven by the
//! event loop.
//!
//! An [`Agent`] owns its message list exclusively; each invocation appends
//! the task as a user message, runs the event loop until a terminal stop
//! reason, and returns an [`AgentResult`]. Construction goes through
//! [`AgentBuilder`].

pub mod event_loop;
pub mod executor;
pub mod hooks;
mod hygiene;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument as _, error, info, info_span};

use crate::context::InvocationContext;
use crate::error::{Error, Result};
use crate::message::{ContentBlock, Message, Role};
use crate::model::{Model, SharedModel};
use crate::observer::{NoopObserver, SharedObserver};
use crate::session::SharedSessionManager;
use crate::stream::StopReason;
use crate::tool::{Tool, ToolRegistry};
use crate::usage::EventLoopMetrics;

use event_loop::{EventLoop, EventLoopConfig};
use hooks::{AgentHooks, NoopAgentHooks, SharedAgentHooks};

/// The task given to an agent or orchestrator invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskInput {
    /// A plain text task.
    Text(String),
    /// A multimodal task of content blocks.
    Blocks(Vec<ContentBlock>),
}

impl TaskInput {
    /// Convert the task into the opening user message.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::user(text),
            Self::Blocks(blocks) => Message::new(Role::User, blocks),
        }
    }

    /// The task text, if this is a text task.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Blocks(_) => None,
        }
    }
}

impl From<&str> for TaskInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for TaskInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentBlock>> for TaskInput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

/// The result of one agent invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    /// Why the final model turn stopped.
    pub stop_reason: StopReason,
    /// The final assistant message.
    pub message: Message,
    /// Metrics accumulated across every cycle of the invocation.
    pub metrics: EventLoopMetrics,
    /// Request state carried across cycles, as of the final cycle.
    pub state: HashMap<String, Value>,
}

impl AgentResult {
    /// Text of the final assistant message.
    #[must_use]
    pub fn text(&self) -> String {
        self.message.text().unwrap_or_default()
    }
}

/// A conversational agent.
pub struct Agent {
    name: String,
    description: Option<String>,
    model: SharedModel,
    registry: ToolRegistry,
    messages: Vec<Message>,
    state: HashMap<String, Value>,
    system_prompt: Option<String>,
    observer: SharedObserver,
    hooks: Option<SharedAgentHooks>,
    session: Option<SharedSessionManager>,
    config: EventLoopConfig,
    session_loaded: bool,
}

impl Agent {
    /// Start building an agent.
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The agent's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The agent's description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The conversation so far.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The agent's key-value state.
    #[must_use]
    pub const fn state(&self) -> &HashMap<String, Value> {
        &self.state
    }

    /// Returns `true` if a tool with the given name is registered.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Run one conversational task to completion.
    pub async fn invoke(&mut self, task: impl Into<TaskInput>) -> Result<AgentResult> {
        let ctx = InvocationContext::new().with_observer(Arc::clone(&self.observer));
        self.invoke_with_context(task.into(), &ctx).await
    }

    /// Run one conversational task under an existing invocation context.
    ///
    /// Orchestrators use this to propagate cancellation and observers into
    /// their member agents.
    pub async fn invoke_with_context(
        &mut self,
        task: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<AgentResult> {
        let span = info_span!("agent", agent.name = %self.name);
        self.invoke_inner(task, ctx).instrument(span).await
    }

    /// Blocking variant of [`Agent::invoke`].
    ///
    /// Runs the asynchronous core on a private current-thread runtime.
    /// Must not be called from inside an async runtime.
    pub fn invoke_blocking(&mut self, task: impl Into<TaskInput>) -> Result<AgentResult> {
        let task = task.into();
        block_on(self.invoke(task))
    }

    async fn invoke_inner(
        &mut self,
        task: TaskInput,
        ctx: &InvocationContext,
    ) -> Result<AgentResult> {
        if let Some(session) = &self.session
            && !self.session_loaded
        {
            let mut history = session.load().await?;
            history.append(&mut self.messages);
            self.messages = history;
            self.session_loaded = true;
        }

        let ctx = ctx.clone().with_state(self.state.clone());
        let start_len = self.messages.len();
        self.messages.push(task.into_message());

        let noop = NoopAgentHooks;
        let hooks: &dyn AgentHooks = self.hooks.as_deref().unwrap_or(&noop);
        hooks.on_start(&ctx).await;

        let event_loop = EventLoop {
            model: self.model.as_ref(),
            registry: &self.registry,
            system_prompt: self.system_prompt.as_deref(),
            hooks,
            config: &self.config,
        };

        match event_loop.run(&mut self.messages, &ctx).await {
            Ok(outcome) => {
                self.state = outcome.request_state.clone();
                if let Some(session) = &self.session {
                    session.append(&self.messages[start_len..]).await?;
                }
                hooks.on_end(&ctx).await;
                info!(
                    agent = %self.name,
                    stop_reason = %outcome.stop_reason,
                    cycles = outcome.metrics.cycle_count,
                    "agent invocation completed",
                );
                Ok(AgentResult {
                    stop_reason: outcome.stop_reason,
                    message: outcome.message,
                    metrics: outcome.metrics,
                    state: outcome.request_state,
                })
            }
            Err(err) => {
                hooks.on_error(&ctx, &err).await;
                error!(agent = %self.name, error = %err, "agent invocation failed");
                Err(err)
            }
        }
    }

    pub(crate) fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.registry.register_arc(tool);
    }

    pub(crate) fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn has_hooks(&self) -> bool {
        self.hooks.is_some()
    }

    /// Capture the executor state used by the swarm to reset agents
    /// between activations.
    pub(crate) fn snapshot(&self) -> (Vec<Message>, HashMap<String, Value>) {
        (self.messages.clone(), self.state.clone())
    }

    /// Restore a previously captured executor state.
    pub(crate) fn restore(&mut self, snapshot: &(Vec<Message>, HashMap<String, Value>)) {
        self.messages = snapshot.0.clone();
        self.state = snapshot.1.clone();
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("tools", &self.registry)
            .field("messages", &self.messages.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    name: String,
    description: Option<String>,
    model: Option<SharedModel>,
    registry: ToolRegistry,
    messages: Vec<Message>,
    state: HashMap<String, Value>,
    system_prompt: Option<String>,
    observer: SharedObserver,
    hooks: Option<SharedAgentHooks>,
    session: Option<SharedSessionManager>,
    config: EventLoopConfig,
}

impl AgentBuilder {
    /// Create a builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "agent".to_owned(),
            description: None,
            model: None,
            registry: ToolRegistry::new(),
            messages: Vec::new(),
            state: HashMap::new(),
            system_prompt: None,
            observer: Arc::new(NoopObserver),
            hooks: None,
            session: None,
            config: EventLoopConfig::default(),
        }
    }

    /// Set the agent's name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the agent's description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Model + 'static) -> Self {
        self.model = Some(Arc::new(model));
        self
    }

    /// Set a shared model.
    #[must_use]
    pub fn shared_model(mut self, model: SharedModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Register a tool.
    #[must_use]
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    /// Replace the tool registry.
    #[must_use]
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Seed the conversation with prior messages.
    #[must_use]
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Seed the agent's key-value state.
    #[must_use]
    pub fn state(mut self, state: HashMap<String, Value>) -> Self {
        self.state = state;
        self
    }

    /// Attach an observer.
    #[must_use]
    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Attach lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: SharedAgentHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Attach a session manager.
    #[must_use]
    pub fn session(mut self, session: SharedSessionManager) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the event-loop configuration.
    #[must_use]
    pub const fn config(mut self, config: EventLoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no model was configured.
    pub fn build(self) -> Result<Agent> {
        let model = self.model.ok_or_else(|| {
            Error::config(format!("agent '{}' has no model configured", self.name))
        })?;
        Ok(Agent {
            name: self.name,
            description: self.description,
            model,
            registry: self.registry,
            messages: self.messages,
            state: self.state,
            system_prompt: self.system_prompt,
            observer: self.observer,
            hooks: self.hooks,
            session: self.session,
            config: self.config,
            session_loaded: false,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.name)
            .field("has_model", &self.model.is_some())
            .finish_non_exhaustive()
    }
}

/// Run a future to completion on a private current-thread runtime.
///
/// Backs the blocking invocation wrappers; must not be called from inside
/// an async runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build blocking runtime")
        .block_on(future)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::MockModel;

    #[test]
    fn builder_requires_a_model() {
        let err = Agent::builder().name("nameless").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("nameless"));
    }

    #[tokio::test]
    async fn invoke_appends_to_conversation() {
        let mut agent = Agent::builder()
            .name("echo")
            .model(MockModel::new().then_text("hello"))
            .build()
            .unwrap();

        let result = agent.invoke("hi").await.unwrap();
        assert_eq!(result.text(), "hello");
        assert_eq!(result.stop_reason, StopReason::EndTurn);
        assert_eq!(agent.messages().len(), 2);
    }

    #[tokio::test]
    async fn conversation_persists_across_invocations() {
        let mut agent = Agent::builder()
            .model(MockModel::new().then_text("one").then_text("two"))
            .build()
            .unwrap();

        agent.invoke("first").await.unwrap();
        agent.invoke("second").await.unwrap();
        assert_eq!(agent.messages().len(), 4);
    }

    #[tokio::test]
    async fn session_history_loads_before_first_turn() {
        use crate::session::{InMemorySession, SessionManager as _};

        let session = Arc::new(InMemorySession::new());
        session
            .append(&[Message::user("earlier"), Message::assistant("noted")])
            .await
            .unwrap();

        let mut agent = Agent::builder()
            .model(MockModel::new().then_text("again"))
            .session(session.clone())
            .build()
            .unwrap();

        agent.invoke("back").await.unwrap();
        assert_eq!(agent.messages().len(), 4);
        assert_eq!(agent.messages()[0].text(), Some("earlier".to_owned()));
        // The new turn was persisted back.
        assert_eq!(session.messages().await.len(), 4);
    }

    #[test]
    fn blocking_wrapper_runs_to_completion() {
        let mut agent = Agent::builder()
            .model(MockModel::new().then_text("sync"))
            .build()
            .unwrap();

        let result = agent.invoke_blocking("hi").unwrap();
        assert_eq!(result.text(), "sync");
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips() {
        let mut agent = Agent::builder()
            .model(MockModel::new().then_text("x"))
            .build()
            .unwrap();

        let clean = agent.snapshot();
        agent.invoke("dirty the state").await.unwrap();
        assert_eq!(agent.messages().len(), 2);

        agent.restore(&clean);
        assert!(agent.messages().is_empty());
    }
}
