//! Tool executor: runs the tool uses of an assistant message.
//!
//! Guarantees exactly one `tool_result` per `tool_use`, in the order of
//! the original tool-use blocks regardless of completion order. A failure
//! inside one tool never aborts its siblings or the event loop; it becomes
//! an error-status result.

use futures::StreamExt as _;
use tracing::{Instrument as _, debug, info_span, warn};

use crate::agent::hooks::AgentHooks;
use crate::context::InvocationContext;
use crate::message::{ContentBlock, Message, Role, ToolResult, ToolUse};
use crate::observer::CallbackEvent;
use crate::tool::{ToolEvent, ToolRegistry};

/// How tool invocations within a turn are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Run tools one at a time, in block order.
    Sequential,
    /// Run tools concurrently.
    Parallel {
        /// Upper bound on simultaneous invocations; `None` means all at once.
        max_concurrent: Option<usize>,
    },
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::Parallel {
            max_concurrent: None,
        }
    }
}

/// Executes the tool uses of one assistant message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolExecutor {
    concurrency: Concurrency,
}

impl ToolExecutor {
    /// Create an executor with the given scheduling mode.
    #[must_use]
    pub const fn new(concurrency: Concurrency) -> Self {
        Self { concurrency }
    }

    /// Run every tool use in `assistant`, append the bundled results as a
    /// single user message, and return the ordered results.
    ///
    /// Cancellation via `ctx` converts unfinished invocations into
    /// error-status results with the text `"cancelled"`; results that
    /// already completed are preserved.
    pub(crate) async fn run(
        &self,
        assistant: &Message,
        registry: &ToolRegistry,
        ctx: &InvocationContext,
        hooks: &dyn AgentHooks,
        messages: &mut Vec<Message>,
    ) -> Vec<ToolResult> {
        let tool_uses: Vec<ToolUse> = assistant.tool_uses().into_iter().cloned().collect();
        if tool_uses.is_empty() {
            return Vec::new();
        }
        debug!(count = tool_uses.len(), "dispatching tool uses");

        let mut results = Vec::with_capacity(tool_uses.len());
        match self.concurrency {
            Concurrency::Sequential => {
                for tool_use in &tool_uses {
                    results.push(Self::run_single(tool_use, registry, ctx, hooks).await);
                }
            }
            Concurrency::Parallel { max_concurrent } => {
                let chunk_size = max_concurrent
                    .unwrap_or(tool_uses.len())
                    .max(1);
                // join_all preserves input order, so results line up with
                // the original block positions even when completion order
                // differs.
                for chunk in tool_uses.chunks(chunk_size) {
                    let futs: Vec<_> = chunk
                        .iter()
                        .map(|tool_use| Self::run_single(tool_use, registry, ctx, hooks))
                        .collect();
                    results.extend(futures::future::join_all(futs).await);
                }
            }
        }

        let result_message = Message::new(
            Role::User,
            results
                .iter()
                .cloned()
                .map(ContentBlock::ToolResult)
                .collect(),
        );
        ctx.emit(CallbackEvent::MessageAdded {
            message: result_message.clone(),
        })
        .await;
        messages.push(result_message);

        results
    }

    /// Run one tool use to its terminal result.
    async fn run_single(
        tool_use: &ToolUse,
        registry: &ToolRegistry,
        ctx: &InvocationContext,
        hooks: &dyn AgentHooks,
    ) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error(&tool_use.id, "cancelled");
        }

        let Some(tool) = registry.resolve(&tool_use.name) else {
            warn!(tool = %tool_use.name, "tool not found in registry");
            return ToolResult::error(
                &tool_use.id,
                format!("Unknown tool: {}", tool_use.name),
            );
        };

        hooks.on_tool_start(ctx, tool_use).await;

        let span = info_span!(
            "tool",
            tool.name = %tool_use.name,
            tool.id = %tool_use.id,
        );
        let mut result = Self::drive(tool.as_ref(), tool_use, ctx).instrument(span).await;
        // Pairing is by position; the result always answers its own use.
        result.tool_use_id.clone_from(&tool_use.id);

        hooks.on_tool_end(ctx, &result).await;
        result
    }

    /// Drive a tool stream to its terminal result, forwarding progress and
    /// honoring cancellation.
    async fn drive(
        tool: &dyn crate::tool::Tool,
        tool_use: &ToolUse,
        ctx: &InvocationContext,
    ) -> ToolResult {
        let mut stream = tool.run(tool_use.clone(), ctx.clone());
        loop {
            tokio::select! {
                () = ctx.cancelled() => {
                    return ToolResult::error(&tool_use.id, "cancelled");
                }
                event = stream.next() => match event {
                    Some(ToolEvent::Progress(data)) => {
                        ctx.emit(CallbackEvent::ToolProgress {
                            tool_use_id: tool_use.id.clone(),
                            name: tool_use.name.clone(),
                            data,
                        })
                        .await;
                    }
                    Some(ToolEvent::Result(result)) => return result,
                    None => {
                        warn!(tool = %tool_use.name, "tool stream ended without a result");
                        return ToolResult::error(
                            &tool_use.id,
                            format!("tool '{}' produced no result", tool_use.name),
                        );
                    }
                },
            }
        }
    }
}
