//! Convenience re-exports of the user-facing surface.
//!
//! ```rust
//! use kumo::prelude::*;
//! ```

pub use crate::agent::event_loop::EventLoopConfig;
pub use crate::agent::executor::Concurrency;
pub use crate::agent::hooks::{AgentHooks, NoopAgentHooks, SharedAgentHooks};
pub use crate::agent::{Agent, AgentBuilder, AgentResult, TaskInput};
pub use crate::context::InvocationContext;
pub use crate::error::{Error, Result};
pub use crate::message::{
    ContentBlock, Message, Role, ToolResult, ToolResultContent, ToolResultStatus, ToolUse,
};
pub use crate::model::{MockModel, Model, ModelStream, SharedModel};
pub use crate::multiagent::{
    Graph, GraphBuilder, GraphConfig, GraphResult, GraphState, HANDOFF_TOOL_NAME,
    MultiAgentResult, MultiAgentRunner, NodeExecutor, NodeOutput, NodeResult, Status, Swarm,
    SwarmBuilder, SwarmConfig, SwarmResult,
};
pub use crate::observer::{CallbackEvent, NoopObserver, Observer, SharedObserver};
pub use crate::session::{InMemorySession, SessionManager, SharedSessionManager};
pub use crate::stream::{
    AssemblerItem, Delta, MessageAssembler, RedactContent, StopReason, StreamEvent, ToolUseStart,
    TurnOutput, assemble,
};
pub use crate::tool::{FnTool, Tool, ToolEvent, ToolRegistry, ToolSpec, ToolStream};
pub use crate::usage::{EventLoopMetrics, Metrics, Usage};
