//! Per-agent lifecycle hooks.
//!
//! Hooks are bound to a specific agent and fire around its invocations and
//! tool calls. Every method has a default no-op body, so implementors only
//! override the events they care about. Agents carrying hooks cannot
//! participate in a swarm.

use async_trait::async_trait;

use crate::context::InvocationContext;
use crate::error::Error;
use crate::message::{ToolResult, ToolUse};

/// Lifecycle callbacks for a single agent.
///
/// Object-safe; agents hold `Arc<dyn AgentHooks>`.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Called before the agent begins an invocation.
    async fn on_start(&self, _ctx: &InvocationContext) {}

    /// Called after the agent completes an invocation.
    async fn on_end(&self, _ctx: &InvocationContext) {}

    /// Called immediately before a tool runs.
    async fn on_tool_start(&self, _ctx: &InvocationContext, _tool_use: &ToolUse) {}

    /// Called immediately after a tool completes.
    async fn on_tool_end(&self, _ctx: &InvocationContext, _result: &ToolResult) {}

    /// Called when an invocation fails.
    async fn on_error(&self, _ctx: &InvocationContext, _error: &Error) {}
}

/// A shared, thread-safe [`AgentHooks`] trait object.
pub type SharedAgentHooks = std::sync::Arc<dyn AgentHooks>;

/// An [`AgentHooks`] implementation that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAgentHooks;

#[async_trait]
impl AgentHooks for NoopAgentHooks {}
