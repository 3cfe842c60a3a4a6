//! Observer interface for streamed progress events.
//!
//! The event loop, tool executor and orchestrators forward
//! [`CallbackEvent`]s to an [`Observer`] as work progresses. Observers are
//! informational only; the runtime functions identically when none is
//! attached (the default is [`NoopObserver`]).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::message::Message;

/// A progress event forwarded to the observer.
///
/// Events preserve stream order within a cycle. The payload is
/// serializable so observers can relay events to UIs or tracing sinks
/// without caring about the concrete variant.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CallbackEvent {
    /// A new event-loop cycle has started.
    CycleStart {
        /// Identifier of the new cycle.
        cycle_id: Uuid,
        /// Identifier of the cycle that spawned this one, if any.
        parent_cycle_id: Option<Uuid>,
    },

    /// Incremental assistant text from the model stream.
    TextDelta {
        /// The text fragment.
        text: String,
    },

    /// Incremental reasoning text from the model stream.
    ReasoningDelta {
        /// The reasoning fragment.
        text: String,
    },

    /// Incremental reasoning signature from the model stream.
    ReasoningSignatureDelta {
        /// The signature fragment.
        signature: String,
    },

    /// The model started a tool-use block.
    ToolUseStart {
        /// Tool use identifier.
        id: String,
        /// Name of the requested tool.
        name: String,
    },

    /// Incremental tool input JSON from the model stream.
    ToolUseInputDelta {
        /// Tool use identifier.
        id: String,
        /// Name of the requested tool.
        name: String,
        /// The input fragment just received.
        delta: String,
        /// Input accumulated so far, including this fragment.
        input_so_far: String,
    },

    /// A running tool reported intermediate progress.
    ToolProgress {
        /// Identifier of the tool use being executed.
        tool_use_id: String,
        /// Name of the tool.
        name: String,
        /// Tool-defined progress payload.
        data: Value,
    },

    /// A message was appended to the conversation.
    MessageAdded {
        /// The appended message.
        message: Message,
    },

    /// The loop is stopping abnormally. Emitted exactly once per failure.
    ForceStop {
        /// Reason for the forced stop.
        reason: String,
    },
}

/// Receiver for [`CallbackEvent`]s.
///
/// All methods have default no-op implementations; implementors override
/// only what they need. The trait is object-safe (`Arc<dyn Observer>`).
#[async_trait]
pub trait Observer: Send + Sync {
    /// Called for every progress event, in stream order.
    async fn on_event(&self, _event: &CallbackEvent) {}
}

/// A shared, thread-safe [`Observer`] trait object.
pub type SharedObserver = std::sync::Arc<dyn Observer>;

/// An [`Observer`] that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl Observer for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn noop_observer_accepts_events() {
        let observer: SharedObserver = Arc::new(NoopObserver);
        observer
            .on_event(&CallbackEvent::TextDelta {
                text: "hi".to_owned(),
            })
            .await;
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = CallbackEvent::ToolUseStart {
            id: "t1".to_owned(),
            name: "add".to_owned(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "tool_use_start");
        assert_eq!(json["name"], "add");
    }

    #[test]
    fn force_stop_serializes_reason() {
        let event = CallbackEvent::ForceStop {
            reason: "boom".to_owned(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"], "boom");
    }
}
