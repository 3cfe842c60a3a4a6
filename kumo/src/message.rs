//! Conversation data model.
//!
//! Defines the message format exchanged between agents and models: a
//! [`Message`] is an ordered list of [`ContentBlock`]s under a [`Role`].
//! Blocks are immutable once emitted; the event loop only ever appends
//! whole messages (or redacts content explicitly).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Base64 (de)serialization for binary block payloads.
mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(&encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// System message providing instructions.
    System,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Unique identifier for this invocation within a turn.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Input arguments as a JSON object.
    pub input: Value,
}

impl ToolUse {
    /// Create a new tool use.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Returns `true` if the input is null or an empty object.
    #[must_use]
    pub fn input_is_empty(&self) -> bool {
        match &self.input {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

/// Outcome status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    /// The tool completed successfully.
    Success,
    /// The tool failed.
    Error,
}

/// A single content item inside a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    /// Text content.
    Text {
        /// The text payload.
        text: String,
    },
    /// Structured JSON content.
    Json {
        /// The JSON payload.
        json: Value,
    },
    /// Image content.
    Image {
        /// Image format (e.g. "png", "jpeg").
        format: String,
        /// Raw image bytes.
        #[serde(with = "b64")]
        bytes: Bytes,
    },
    /// Document content.
    Document {
        /// Document format (e.g. "pdf", "txt").
        format: String,
        /// Raw document bytes.
        #[serde(with = "b64")]
        bytes: Bytes,
    },
}

impl ToolResultContent {
    /// Create a text content item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a JSON content item.
    #[must_use]
    pub const fn json(json: Value) -> Self {
        Self::Json { json }
    }

    /// Get the text payload if this is a text item.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// The result of a tool invocation, paired one-to-one with a [`ToolUse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Identifier of the tool use this result answers.
    pub tool_use_id: String,
    /// Outcome status.
    pub status: ToolResultStatus,
    /// Result content items.
    pub content: Vec<ToolResultContent>,
}

impl ToolResult {
    /// Create a successful result with a single text item.
    #[must_use]
    pub fn success(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Success,
            content: vec![ToolResultContent::text(text)],
        }
    }

    /// Create a failed result with a single text item.
    #[must_use]
    pub fn error(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Error,
            content: vec![ToolResultContent::text(text)],
        }
    }

    /// Create a successful result with arbitrary content items.
    #[must_use]
    pub fn with_content(
        tool_use_id: impl Into<String>,
        status: ToolResultStatus,
        content: Vec<ToolResultContent>,
    ) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status,
            content,
        }
    }

    /// Returns `true` if the tool succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, ToolResultStatus::Success)
    }

    /// Concatenated text of all text content items.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ToolResultContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content of a message.
///
/// Blocks are produced by the stream assembler or the tool executor and
/// are immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content.
    Text {
        /// The text payload.
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolUse(ToolUse),
    /// The result of a tool invocation.
    ToolResult(ToolResult),
    /// Model reasoning content.
    Reasoning {
        /// The reasoning text.
        text: String,
        /// Provider signature over the reasoning, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Image content.
    Image {
        /// Image format (e.g. "png", "jpeg").
        format: String,
        /// Raw image bytes.
        #[serde(with = "b64")]
        bytes: Bytes,
    },
    /// Document content.
    Document {
        /// Document format (e.g. "pdf", "txt").
        format: String,
        /// Raw document bytes.
        #[serde(with = "b64")]
        bytes: Bytes,
    },
    /// Video content.
    Video {
        /// Video format (e.g. "mp4").
        format: String,
        /// Raw video bytes.
        #[serde(with = "b64")]
        bytes: Bytes,
    },
    /// Prompt-caching marker.
    CachePoint,
}

impl ContentBlock {
    /// Create a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text payload if this is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the tool use if this is a tool-use block.
    #[must_use]
    pub const fn as_tool_use(&self) -> Option<&ToolUse> {
        match self {
            Self::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        }
    }

    /// Get the tool result if this is a tool-result block.
    #[must_use]
    pub const fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Self::ToolResult(result) => Some(result),
            _ => None,
        }
    }

    /// Returns `true` if this is a text block whose trimmed text is empty.
    #[must_use]
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Self::Text { text } if text.trim().is_empty())
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a message from a role and content blocks.
    #[must_use]
    pub const fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Create a user message with a single text block.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// Create an assistant message with a single text block.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// Create a system message with a single text block.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    /// Concatenated text of all text blocks, or `None` if there are none.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// All tool-use blocks in order.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.content
            .iter()
            .filter_map(ContentBlock::as_tool_use)
            .collect()
    }

    /// All tool-result blocks in order.
    #[must_use]
    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.content
            .iter()
            .filter_map(ContentBlock::as_tool_result)
            .collect()
    }

    /// Returns `true` if any block is a tool use.
    #[must_use]
    pub fn has_tool_use(&self) -> bool {
        !self.tool_uses().is_empty()
    }
}
