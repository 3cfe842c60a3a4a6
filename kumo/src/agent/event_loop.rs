//! The event loop: one conversational turn after another.
//!
//! Each cycle performs preflight hygiene, invokes the model under a
//! throttle-aware retry policy, appends the assembled assistant message,
//! and dispatches tool execution when the model requests it. The loop is
//! iterative with a bounded cycle count; recursion in the abstract model
//! is just the next iteration here.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::agent::executor::{Concurrency, ToolExecutor};
use crate::agent::hooks::AgentHooks;
use crate::agent::hygiene;
use crate::context::InvocationContext;
use crate::error::{Error, Result};
use crate::message::{ContentBlock, Message, Role};
use crate::model::Model;
use crate::observer::CallbackEvent;
use crate::stream::{AssemblerItem, StopReason, TurnOutput, assemble};
use crate::tool::ToolRegistry;
use crate::usage::EventLoopMetrics;

/// Maximum model-call attempts per cycle (initial call + retries).
pub const MAX_ATTEMPTS: usize = 3;

/// Backoff before the first retry.
pub const INITIAL_DELAY: Duration = Duration::from_secs(4);

/// Backoff ceiling; doubling stops here.
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Default ceiling on event-loop cycles per invocation.
pub const MAX_CYCLES: usize = 100;

/// Closed configuration for the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLoopConfig {
    /// Ceiling on cycles per invocation; exceeding it fails with
    /// [`Error::MaxCycles`].
    pub max_cycles: usize,
    /// Model-call attempts per cycle; only throttling errors are retried.
    pub max_attempts: usize,
    /// Backoff before the first retry, doubled on each subsequent retry.
    pub initial_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Tool scheduling mode for the executor.
    pub concurrency: Concurrency,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            max_cycles: MAX_CYCLES,
            max_attempts: MAX_ATTEMPTS,
            initial_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
            concurrency: Concurrency::default(),
        }
    }
}

impl EventLoopConfig {
    /// Set the cycle ceiling.
    #[must_use]
    pub const fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Set the model-call attempt ceiling.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry backoff.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff ceiling.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the tool scheduling mode.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// The terminal output of an event-loop invocation.
#[derive(Debug, Clone)]
pub(crate) struct LoopOutcome {
    pub stop_reason: StopReason,
    pub message: Message,
    pub metrics: EventLoopMetrics,
    pub request_state: HashMap<String, Value>,
}

/// Stateless driver for the cycle loop.
///
/// All mutable per-invocation state lives in the conversation and the
/// invocation context, so the same borrowed dependencies can drive any
/// number of sequential invocations.
pub(crate) struct EventLoop<'a> {
    pub model: &'a dyn Model,
    pub registry: &'a ToolRegistry,
    pub system_prompt: Option<&'a str>,
    pub hooks: &'a dyn AgentHooks,
    pub config: &'a EventLoopConfig,
}

impl EventLoop<'_> {
    /// Run cycles until the model stops requesting tools or a limit trips.
    pub(crate) async fn run(
        &self,
        messages: &mut Vec<Message>,
        ctx: &InvocationContext,
    ) -> Result<LoopOutcome> {
        let executor = ToolExecutor::new(self.config.concurrency);
        let mut metrics = EventLoopMetrics::default();
        let mut parent_ctx = ctx.clone();

        for _ in 0..self.config.max_cycles {
            let cycle_ctx = parent_ctx.child_cycle();
            cycle_ctx
                .emit(CallbackEvent::CycleStart {
                    cycle_id: cycle_ctx.cycle_id(),
                    parent_cycle_id: cycle_ctx.parent_cycle_id(),
                })
                .await;
            debug!(cycle = %cycle_ctx.cycle_id(), "starting cycle");

            hygiene::clean_orphaned_tool_uses(messages);
            hygiene::normalize_blank_text(messages);

            let mut turn = self.stream_with_retry(messages, &cycle_ctx).await?;

            if let Some(replacement) = turn.redact_user_message.take()
                && let Some(last_user) =
                    messages.iter_mut().rev().find(|m| m.role == Role::User)
            {
                last_user.content = vec![ContentBlock::text(replacement)];
            }

            messages.push(turn.message.clone());
            cycle_ctx
                .emit(CallbackEvent::MessageAdded {
                    message: turn.message.clone(),
                })
                .await;
            metrics.add_cycle(turn.usage, turn.metrics);

            if !turn.stop_reason.is_tool_use() {
                info!(
                    stop_reason = %turn.stop_reason,
                    cycles = metrics.cycle_count,
                    input_tokens = metrics.accumulated_usage.input_tokens,
                    output_tokens = metrics.accumulated_usage.output_tokens,
                    "event loop completed",
                );
                return Ok(LoopOutcome {
                    stop_reason: turn.stop_reason,
                    message: turn.message,
                    metrics,
                    request_state: cycle_ctx.state_snapshot(),
                });
            }

            if self.registry.is_empty() {
                return Err(self
                    .force_stop(
                        &cycle_ctx,
                        "model requested tool use but no tools are configured",
                    )
                    .await);
            }

            executor
                .run(
                    &turn.message,
                    self.registry,
                    &cycle_ctx,
                    self.hooks,
                    messages,
                )
                .await;

            if cycle_ctx.is_cancelled() {
                cycle_ctx
                    .emit(CallbackEvent::ForceStop {
                        reason: "cancelled".to_owned(),
                    })
                    .await;
                return Err(Error::Cancelled);
            }

            parent_ctx = cycle_ctx;
        }

        error!(max_cycles = self.config.max_cycles, "cycle ceiling exceeded");
        Err(Error::MaxCycles(self.config.max_cycles))
    }

    /// Call the model under the retry policy.
    ///
    /// Only [`Error::Throttled`] is retried, with a doubling capped delay.
    /// Everything else, notably [`Error::ContextWindowExceeded`], surfaces
    /// immediately.
    async fn stream_with_retry(
        &self,
        messages: &[Message],
        ctx: &InvocationContext,
    ) -> Result<TurnOutput> {
        let mut delay = self.config.initial_delay;
        let mut attempt = 1;
        loop {
            match self.stream_once(messages, ctx).await {
                Ok(turn) => return Ok(turn),
                Err(Error::Throttled(reason)) if attempt < self.config.max_attempts => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "model throttled; backing off",
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.max_delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One model call: converse, assemble, forward callbacks.
    async fn stream_once(
        &self,
        messages: &[Message],
        ctx: &InvocationContext,
    ) -> Result<TurnOutput> {
        let specs = self.registry.specs();
        let events = self
            .model
            .converse(messages, &specs, self.system_prompt)
            .await?;

        let items = assemble(events);
        let mut items = std::pin::pin!(items);
        loop {
            tokio::select! {
                () = ctx.cancelled() => return Err(Error::Cancelled),
                item = futures::StreamExt::next(&mut items) => match item {
                    Some(Ok(AssemblerItem::Callback(callback))) => ctx.emit(callback).await,
                    Some(Ok(AssemblerItem::Stop(output))) => return Ok(*output),
                    Some(Err(err)) => return Err(err),
                    None => {
                        return Err(Error::provider(
                            "assembler ended without a terminal item",
                        ));
                    }
                },
            }
        }
    }

    /// Emit the force-stop callback exactly once and build the wrapping
    /// event-loop error.
    async fn force_stop(&self, ctx: &InvocationContext, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        ctx.emit(CallbackEvent::ForceStop {
            reason: reason.clone(),
        })
        .await;
        error!(%reason, "event loop force stop");
        Error::event_loop(reason, ctx.state_snapshot())
    }
}
