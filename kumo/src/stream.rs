//! Model stream events and the message assembler.
//!
//! A model provider surfaces its wire protocol as a lazy sequence of
//! [`StreamEvent`]s. The [`assemble`] generator consumes that sequence and
//! produces [`CallbackEvent`]s for the observer as deltas arrive, ending in
//! exactly one terminal [`AssemblerItem::Stop`] carrying the reconstructed
//! assistant message, the stop reason, and usage/latency metrics.
//!
//! Provider failures travel through the stream as typed [`Error`] items and
//! are surfaced to the caller unchanged.

use futures::{Stream, StreamExt as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::message::{ContentBlock, Message, Role, ToolUse};
use crate::observer::CallbackEvent;
use crate::usage::{Metrics, Usage};

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the assistant turn.
    EndTurn,
    /// The model requested one or more tool invocations.
    ToolUse,
    /// The maximum token limit was reached.
    MaxTokens,
    /// A configured stop sequence was produced.
    StopSequence,
    /// Content was removed by a safety filter.
    ContentFiltered,
    /// A guardrail intervened in the response.
    GuardrailIntervened,
}

impl StopReason {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::ContentFiltered => "content_filtered",
            Self::GuardrailIntervened => "guardrail_intervened",
        }
    }

    /// Returns `true` if the model requested tools.
    #[must_use]
    pub const fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start of a tool-use content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUseStart {
    /// Tool use identifier.
    pub id: String,
    /// Name of the requested tool.
    pub name: String,
}

/// An incremental content fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delta {
    /// Assistant text.
    Text(String),
    /// Partial JSON for the open tool-use block.
    ToolUseInput(String),
    /// Reasoning text.
    ReasoningText(String),
    /// Reasoning signature.
    ReasoningSignature(String),
}

/// Redaction directives from the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactContent {
    /// Replacement text for the last user message, if it must be redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redact_user_message: Option<String>,
    /// Replacement text for the in-progress assistant content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redact_assistant_message: Option<String>,
}

/// An event in a model response stream.
///
/// This is the closed set of shapes a provider must map its wire protocol
/// onto; the mapping itself lives outside the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum StreamEvent {
    /// The assistant message has started.
    MessageStart {
        /// Role of the message being produced.
        role: Role,
    },
    /// A content block has started.
    ContentBlockStart {
        /// Present when the block is a tool use.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_use: Option<ToolUseStart>,
    },
    /// An incremental fragment for the open block.
    ContentBlockDelta {
        /// The fragment.
        delta: Delta,
    },
    /// The open content block is complete.
    ContentBlockStop,
    /// The message is complete.
    MessageStop {
        /// Why the model stopped.
        stop_reason: StopReason,
    },
    /// Usage and latency metadata, typically the final event.
    Metadata {
        /// Token usage for the call.
        usage: Usage,
        /// Latency metrics for the call.
        metrics: Metrics,
    },
    /// The provider ordered content redaction.
    RedactContent(RedactContent),
}

/// The assembled output of one model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutput {
    /// Why the model stopped.
    pub stop_reason: StopReason,
    /// The reconstructed assistant message.
    pub message: Message,
    /// Token usage for the call.
    pub usage: Usage,
    /// Latency metrics for the call.
    pub metrics: Metrics,
    /// Pending user-message redaction the caller must apply, if any.
    pub redact_user_message: Option<String>,
}

/// An item produced by [`assemble`].
#[derive(Debug, Clone)]
pub enum AssemblerItem {
    /// A progress event to forward to the observer.
    Callback(CallbackEvent),
    /// The terminal item: the fully assembled turn.
    Stop(Box<TurnOutput>),
}

#[derive(Debug, Default)]
struct CurrentToolUse {
    id: String,
    name: String,
    input: String,
}

/// Incremental state machine that rebuilds an assistant message from
/// [`StreamEvent`]s.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    role: Option<Role>,
    content: Vec<ContentBlock>,
    text: String,
    current_tool_use: Option<CurrentToolUse>,
    reasoning_text: String,
    reasoning_signature: Option<String>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    metrics: Metrics,
    redact_user_message: Option<String>,
}

impl MessageAssembler {
    /// Create a fresh assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stream event, returning the callback event it produces.
    ///
    /// Block order is stable: blocks are appended as they are finalized and
    /// never reordered afterwards.
    pub fn apply(&mut self, event: &StreamEvent) -> Option<CallbackEvent> {
        match event {
            StreamEvent::MessageStart { role } => {
                self.role = Some(*role);
                None
            }
            StreamEvent::ContentBlockStart { tool_use } => {
                tool_use.as_ref().map(|start| {
                    self.current_tool_use = Some(CurrentToolUse {
                        id: start.id.clone(),
                        name: start.name.clone(),
                        input: String::new(),
                    });
                    CallbackEvent::ToolUseStart {
                        id: start.id.clone(),
                        name: start.name.clone(),
                    }
                })
            }
            StreamEvent::ContentBlockDelta { delta } => self.apply_delta(delta),
            StreamEvent::ContentBlockStop => {
                self.finalize_block();
                None
            }
            StreamEvent::MessageStop { stop_reason } => {
                self.stop_reason = Some(*stop_reason);
                None
            }
            StreamEvent::Metadata { usage, metrics } => {
                self.usage = *usage;
                self.metrics = *metrics;
                None
            }
            StreamEvent::RedactContent(redact) => {
                if let Some(replacement) = &redact.redact_assistant_message {
                    self.content = vec![ContentBlock::text(replacement)];
                    self.text.clear();
                    self.reasoning_text.clear();
                    self.reasoning_signature = None;
                    self.current_tool_use = None;
                }
                if let Some(replacement) = &redact.redact_user_message {
                    self.redact_user_message = Some(replacement.clone());
                }
                None
            }
        }
    }

    fn apply_delta(&mut self, delta: &Delta) -> Option<CallbackEvent> {
        match delta {
            Delta::Text(text) => {
                self.text.push_str(text);
                Some(CallbackEvent::TextDelta { text: text.clone() })
            }
            Delta::ToolUseInput(fragment) => {
                let Some(current) = self.current_tool_use.as_mut() else {
                    warn!("tool input delta received outside a tool-use block");
                    return None;
                };
                current.input.push_str(fragment);
                Some(CallbackEvent::ToolUseInputDelta {
                    id: current.id.clone(),
                    name: current.name.clone(),
                    delta: fragment.clone(),
                    input_so_far: current.input.clone(),
                })
            }
            Delta::ReasoningText(text) => {
                self.reasoning_text.push_str(text);
                Some(CallbackEvent::ReasoningDelta { text: text.clone() })
            }
            Delta::ReasoningSignature(signature) => {
                self.reasoning_signature
                    .get_or_insert_with(String::new)
                    .push_str(signature);
                Some(CallbackEvent::ReasoningSignatureDelta {
                    signature: signature.clone(),
                })
            }
        }
    }

    /// Finalize the open block and append it to the content list.
    ///
    /// A tool-use input that is not valid JSON collapses to an empty
    /// object; the failure is recorded but not surfaced.
    fn finalize_block(&mut self) {
        if let Some(current) = self.current_tool_use.take() {
            let input = serde_json::from_str(&current.input).unwrap_or_else(|err| {
                warn!(
                    tool = %current.name,
                    error = %err,
                    "tool input was not valid JSON; defaulting to an empty object",
                );
                serde_json::Value::Object(serde_json::Map::new())
            });
            self.content
                .push(ContentBlock::ToolUse(ToolUse::new(
                    current.id,
                    current.name,
                    input,
                )));
        } else if !self.reasoning_text.is_empty() {
            self.content.push(ContentBlock::Reasoning {
                text: std::mem::take(&mut self.reasoning_text),
                signature: self.reasoning_signature.take(),
            });
        } else {
            self.content
                .push(ContentBlock::text(std::mem::take(&mut self.text)));
        }
    }

    /// Consume the assembler and produce the turn output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if the stream ended without a message
    /// stop event (including a completely empty stream).
    pub fn finish(self) -> Result<TurnOutput> {
        let stop_reason = self.stop_reason.ok_or_else(|| {
            Error::provider("model stream ended without a message stop event")
        })?;
        let message = Message::new(self.role.unwrap_or(Role::Assistant), self.content);
        Ok(TurnOutput {
            stop_reason,
            message,
            usage: self.usage,
            metrics: self.metrics,
            redact_user_message: self.redact_user_message,
        })
    }
}

/// Drive a model event stream through a [`MessageAssembler`].
///
/// Yields one [`AssemblerItem::Callback`] per observable delta and exactly
/// one terminal [`AssemblerItem::Stop`]. Provider errors in the input
/// stream end the output stream with that error unchanged.
pub fn assemble<S>(events: S) -> impl Stream<Item = Result<AssemblerItem>>
where
    S: Stream<Item = Result<StreamEvent>>,
{
    async_stream::try_stream! {
        let mut assembler = MessageAssembler::new();
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(callback) = assembler.apply(&event) {
                yield AssemblerItem::Callback(callback);
            }
        }
        yield AssemblerItem::Stop(Box::new(assembler.finish()?));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use futures::StreamExt as _;
    use futures::stream;

    fn text_turn(text_parts: &[&str]) -> Vec<StreamEvent> {
        let mut events = vec![
            StreamEvent::MessageStart {
                role: Role::Assistant,
            },
            StreamEvent::ContentBlockStart { tool_use: None },
        ];
        for part in text_parts {
            events.push(StreamEvent::ContentBlockDelta {
                delta: Delta::Text((*part).to_owned()),
            });
        }
        events.extend([
            StreamEvent::ContentBlockStop,
            StreamEvent::MessageStop {
                stop_reason: StopReason::EndTurn,
            },
            StreamEvent::Metadata {
                usage: Usage::new(1, 1),
                metrics: Metrics::new(10),
            },
        ]);
        events
    }

    async fn run(events: Vec<StreamEvent>) -> Result<(Vec<CallbackEvent>, TurnOutput)> {
        let input = stream::iter(events.into_iter().map(Ok));
        let mut items = std::pin::pin!(assemble(input));
        let mut callbacks = Vec::new();
        while let Some(item) = items.next().await {
            match item? {
                AssemblerItem::Callback(cb) => callbacks.push(cb),
                AssemblerItem::Stop(output) => return Ok((callbacks, *output)),
            }
        }
        panic!("stream ended without a terminal item");
    }

    mod stop_reason {
        use super::*;

        #[test]
        fn as_str_all_variants() {
            assert_eq!(StopReason::EndTurn.as_str(), "end_turn");
            assert_eq!(StopReason::ToolUse.as_str(), "tool_use");
            assert_eq!(StopReason::MaxTokens.as_str(), "max_tokens");
            assert_eq!(StopReason::StopSequence.as_str(), "stop_sequence");
            assert_eq!(StopReason::ContentFiltered.as_str(), "content_filtered");
            assert_eq!(
                StopReason::GuardrailIntervened.as_str(),
                "guardrail_intervened"
            );
        }

        #[test]
        fn tool_use_detection() {
            assert!(StopReason::ToolUse.is_tool_use());
            assert!(!StopReason::EndTurn.is_tool_use());
        }

        #[test]
        fn serde_snake_case() {
            let json = serde_json::to_string(&StopReason::EndTurn).unwrap();
            assert_eq!(json, r#""end_turn""#);
        }
    }

    mod assembler {
        use super::*;

        #[tokio::test]
        async fn assembles_text_turn() {
            let (callbacks, output) = run(text_turn(&["hel", "lo"])).await.unwrap();

            assert_eq!(output.stop_reason, StopReason::EndTurn);
            assert_eq!(output.message.role, Role::Assistant);
            assert_eq!(output.message.text(), Some("hello".to_owned()));
            assert_eq!(output.usage.total_tokens, 2);
            assert_eq!(output.metrics.latency_ms, 10);
            assert_eq!(callbacks.len(), 2);
        }

        #[tokio::test]
        async fn assembles_tool_use_with_split_input() {
            let events = vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::ContentBlockStart {
                    tool_use: Some(ToolUseStart {
                        id: "t1".to_owned(),
                        name: "add".to_owned(),
                    }),
                },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ToolUseInput(r#"{"a":3,"#.to_owned()),
                },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ToolUseInput(r#""b":4}"#.to_owned()),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::ToolUse,
                },
            ];

            let (callbacks, output) = run(events).await.unwrap();
            let uses = output.message.tool_uses();
            assert_eq!(uses.len(), 1);
            assert_eq!(uses[0].id, "t1");
            assert_eq!(uses[0].input, serde_json::json!({"a": 3, "b": 4}));

            // One start + two input deltas.
            assert!(matches!(callbacks[0], CallbackEvent::ToolUseStart { .. }));
            match &callbacks[2] {
                CallbackEvent::ToolUseInputDelta { input_so_far, .. } => {
                    assert_eq!(input_so_far, r#"{"a":3,"b":4}"#);
                }
                other => panic!("unexpected callback: {other:?}"),
            }
        }

        #[tokio::test]
        async fn invalid_tool_input_defaults_to_empty_object() {
            let events = vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::ContentBlockStart {
                    tool_use: Some(ToolUseStart {
                        id: "t1".to_owned(),
                        name: "add".to_owned(),
                    }),
                },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ToolUseInput("{not json".to_owned()),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::ToolUse,
                },
            ];

            let (_, output) = run(events).await.unwrap();
            assert_eq!(output.message.tool_uses()[0].input, serde_json::json!({}));
        }

        #[tokio::test]
        async fn assembles_reasoning_with_signature() {
            let events = vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::ContentBlockStart { tool_use: None },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ReasoningText("thinking...".to_owned()),
                },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ReasoningSignature("sig".to_owned()),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::ContentBlockStart { tool_use: None },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::Text("42".to_owned()),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::EndTurn,
                },
            ];

            let (_, output) = run(events).await.unwrap();
            assert_eq!(output.message.content.len(), 2);
            match &output.message.content[0] {
                ContentBlock::Reasoning { text, signature } => {
                    assert_eq!(text, "thinking...");
                    assert_eq!(signature.as_deref(), Some("sig"));
                }
                other => panic!("expected reasoning block, got {other:?}"),
            }
            assert_eq!(output.message.content[1].as_text(), Some("42"));
        }

        #[tokio::test]
        async fn empty_stream_is_a_provider_error() {
            let input = stream::iter(Vec::<Result<StreamEvent>>::new());
            let mut items = std::pin::pin!(assemble(input));
            let err = items.next().await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Provider(_)));
        }

        #[tokio::test]
        async fn missing_message_stop_is_a_provider_error() {
            let events = vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::ContentBlockStart { tool_use: None },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::Text("truncated".to_owned()),
                },
            ];
            let input = stream::iter(events.into_iter().map(Ok));
            let mut items = std::pin::pin!(assemble(input));

            let mut saw_error = false;
            while let Some(item) = items.next().await {
                if let Err(err) = item {
                    assert!(matches!(err, Error::Provider(_)));
                    saw_error = true;
                    break;
                }
            }
            assert!(saw_error);
        }

        #[tokio::test]
        async fn provider_error_passes_through_unchanged() {
            let items: Vec<Result<StreamEvent>> = vec![
                Ok(StreamEvent::MessageStart {
                    role: Role::Assistant,
                }),
                Err(Error::throttled("slow down")),
            ];
            let mut out = std::pin::pin!(assemble(stream::iter(items)));
            let mut last_err = None;
            while let Some(item) = out.next().await {
                if let Err(err) = item {
                    last_err = Some(err);
                    break;
                }
            }
            assert!(matches!(last_err, Some(Error::Throttled(_))));
        }

        #[tokio::test]
        async fn redacts_assistant_content() {
            let mut events = text_turn(&["secret"]);
            // Redaction arrives after the text block was finalized.
            events.insert(
                4,
                StreamEvent::RedactContent(RedactContent {
                    redact_user_message: Some("[input removed]".to_owned()),
                    redact_assistant_message: Some("[output removed]".to_owned()),
                }),
            );

            let (_, output) = run(events).await.unwrap();
            assert_eq!(output.message.text(), Some("[output removed]".to_owned()));
            assert_eq!(
                output.redact_user_message.as_deref(),
                Some("[input removed]")
            );
        }

        #[tokio::test]
        async fn round_trips_text_and_tool_inputs() {
            let events = vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::ContentBlockStart { tool_use: None },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::Text("checking".to_owned()),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::ContentBlockStart {
                    tool_use: Some(ToolUseStart {
                        id: "t9".to_owned(),
                        name: "lookup".to_owned(),
                    }),
                },
                StreamEvent::ContentBlockDelta {
                    delta: Delta::ToolUseInput(r#"{"q":"rust"}"#.to_owned()),
                },
                StreamEvent::ContentBlockStop,
                StreamEvent::MessageStop {
                    stop_reason: StopReason::ToolUse,
                },
            ];

            let (_, output) = run(events).await.unwrap();
            // Block order matches emission order.
            assert_eq!(output.message.content[0].as_text(), Some("checking"));
            let tool_use = output.message.content[1].as_tool_use().unwrap();
            assert_eq!(tool_use.name, "lookup");
            assert_eq!(tool_use.input, serde_json::json!({"q": "rust"}));
        }
    }
}
