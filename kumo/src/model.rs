//! Model capability trait and a scripted mock for testing.
//!
//! Concrete providers map their wire protocols onto the [`StreamEvent`]
//! shape and implement [`Model`]; that mapping lives outside this crate.
//! Providers must surface throttling as [`Error::Throttled`] and context
//! window exhaustion as [`Error::ContextWindowExceeded`] so the event loop
//! can apply its retry policy.
//!
//! [`Error::Throttled`]: crate::error::Error::Throttled
//! [`Error::ContextWindowExceeded`]: crate::error::Error::ContextWindowExceeded

use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::Stream;

use crate::error::{Error, Result};
use crate::message::{Message, Role};
use crate::stream::{Delta, StopReason, StreamEvent};
use crate::tool::ToolSpec;
use crate::usage::{Metrics, Usage};

/// A lazy sequence of model stream events.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A streaming conversational model.
#[async_trait]
pub trait Model: Send + Sync {
    /// Send the conversation to the model and receive its event stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be started; failures during
    /// streaming travel through the stream as `Err` items.
    async fn converse(
        &self,
        messages: &[Message],
        tool_specs: &[ToolSpec],
        system_prompt: Option<&str>,
    ) -> Result<ModelStream>;
}

/// A shared, thread-safe [`Model`] trait object.
pub type SharedModel = std::sync::Arc<dyn Model>;

/// One scripted model response.
#[derive(Debug)]
enum MockTurn {
    /// Play back these stream items.
    Events(Vec<Result<StreamEvent>>),
    /// Fail the call itself.
    Failure(Error),
}

/// A scripted model for testing.
///
/// Each `converse` call pops the next scripted turn. Turns are either a
/// full event sequence or a typed error, letting tests exercise throttling
/// and retry behavior without a real provider.
#[derive(Debug, Default)]
pub struct MockModel {
    turns: Mutex<Vec<MockTurn>>,
    calls: AtomicUsize,
}

impl MockModel {
    /// Create a mock with no scripted turns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a turn that plays back the given stream items.
    #[must_use]
    pub fn then_items(self, items: Vec<Result<StreamEvent>>) -> Self {
        self.push(MockTurn::Events(items));
        self
    }

    /// Script a turn that plays back the given events.
    #[must_use]
    pub fn then_events(self, events: Vec<StreamEvent>) -> Self {
        self.push(MockTurn::Events(events.into_iter().map(Ok).collect()));
        self
    }

    /// Script a turn that fails with the given error.
    #[must_use]
    pub fn then_error(self, error: Error) -> Self {
        self.push(MockTurn::Failure(error));
        self
    }

    /// Script a plain text turn ending in `end_turn`.
    #[must_use]
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then_events(Self::text_events(text, Usage::new(1, 1), Metrics::new(10)))
    }

    /// Script a turn requesting a single tool use.
    #[must_use]
    pub fn then_tool_use(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: &serde_json::Value,
    ) -> Self {
        self.then_events(Self::tool_use_events(id, name, input))
    }

    /// Number of `converse` calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A canonical text-turn event sequence.
    #[must_use]
    pub fn text_events(
        text: impl Into<String>,
        usage: Usage,
        metrics: Metrics,
    ) -> Vec<StreamEvent> {
        vec![
            StreamEvent::MessageStart {
                role: Role::Assistant,
            },
            StreamEvent::ContentBlockStart { tool_use: None },
            StreamEvent::ContentBlockDelta {
                delta: Delta::Text(text.into()),
            },
            StreamEvent::ContentBlockStop,
            StreamEvent::MessageStop {
                stop_reason: StopReason::EndTurn,
            },
            StreamEvent::Metadata { usage, metrics },
        ]
    }

    /// A canonical single-tool-use event sequence.
    #[must_use]
    pub fn tool_use_events(
        id: impl Into<String>,
        name: impl Into<String>,
        input: &serde_json::Value,
    ) -> Vec<StreamEvent> {
        vec![
            StreamEvent::MessageStart {
                role: Role::Assistant,
            },
            StreamEvent::ContentBlockStart {
                tool_use: Some(crate::stream::ToolUseStart {
                    id: id.into(),
                    name: name.into(),
                }),
            },
            StreamEvent::ContentBlockDelta {
                delta: Delta::ToolUseInput(input.to_string()),
            },
            StreamEvent::ContentBlockStop,
            StreamEvent::MessageStop {
                stop_reason: StopReason::ToolUse,
            },
            StreamEvent::Metadata {
                usage: Usage::new(1, 1),
                metrics: Metrics::new(10),
            },
        ]
    }

    fn push(&self, turn: MockTurn) {
        self.turns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(turn);
    }
}

#[async_trait]
impl Model for MockModel {
    async fn converse(
        &self,
        _messages: &[Message],
        _tool_specs: &[ToolSpec],
        _system_prompt: Option<&str>,
    ) -> Result<ModelStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let turn = {
            let mut turns = self
                .turns
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if turns.is_empty() {
                None
            } else {
                Some(turns.remove(0))
            }
        };

        match turn {
            Some(MockTurn::Events(items)) => Ok(Box::pin(futures::stream::iter(items))),
            Some(MockTurn::Failure(error)) => Err(error),
            None => Err(Error::provider("mock model has no scripted turns left")),
        }
    }
}
