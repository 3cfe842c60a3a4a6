//! Tool capability: specs, the runner trait, and the registry.
//!
//! A tool is a stateful generator of [`ToolEvent`]s terminating in a single
//! [`ToolResult`]. Intermediate [`ToolEvent::Progress`] items are forwarded
//! to the observer by the executor; the terminal result is paired with the
//! originating tool use.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::InvocationContext;
use crate::error::Error;
use crate::message::{ToolResult, ToolResultContent, ToolResultStatus, ToolUse};

/// Specification of a tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON Schema for the tool input.
    pub input_schema: Value,
}

impl ToolSpec {
    /// Create a new tool spec.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Create a spec whose input schema is generated from a Rust type.
    ///
    /// The type must derive [`schemars::JsonSchema`]. The `$schema` meta
    /// field is stripped since model providers do not need it.
    #[must_use]
    pub fn from_type<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let root = schemars::schema_for!(T);
        let mut schema = serde_json::to_value(&root).unwrap_or_default();
        if let Value::Object(ref mut map) = schema {
            map.remove("$schema");
        }
        Self::new(name, description, schema)
    }
}

/// An event produced by a running tool.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    /// Intermediate progress, forwarded to the observer.
    Progress(Value),
    /// The terminal result. A well-behaved tool emits exactly one.
    Result(ToolResult),
}

/// A lazy sequence of tool events ending in a [`ToolEvent::Result`].
pub type ToolStream = Pin<Box<dyn Stream<Item = ToolEvent> + Send>>;

/// A runnable tool.
///
/// Object-safe; registries hold `Arc<dyn Tool>`.
pub trait Tool: Send + Sync {
    /// The tool's specification.
    fn spec(&self) -> ToolSpec;

    /// The tool's name.
    fn name(&self) -> String {
        self.spec().name
    }

    /// Run the tool against a tool use.
    ///
    /// The returned stream must end with a single [`ToolEvent::Result`];
    /// the executor converts a missing result into an error result.
    fn run(&self, tool_use: ToolUse, ctx: InvocationContext) -> ToolStream;
}

type FnToolHandler = Arc<
    dyn Fn(Value, InvocationContext) -> BoxFuture<'static, Result<Vec<ToolResultContent>, Error>>
        + Send
        + Sync,
>;

/// A tool built from a spec and an async closure.
///
/// The closure receives the parsed input and returns the result content;
/// an `Err` becomes a `tool_result` with error status.
#[derive(Clone)]
pub struct FnTool {
    spec: ToolSpec,
    handler: FnToolHandler,
}

impl FnTool {
    /// Create a tool from an async closure over the input value.
    #[must_use]
    pub fn new<F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ToolResultContent>, Error>> + Send + 'static,
    {
        Self::with_context(spec, move |input, _ctx| handler(input))
    }

    /// Create a tool whose closure also receives the invocation context.
    #[must_use]
    pub fn with_context<F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Value, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ToolResultContent>, Error>> + Send + 'static,
    {
        Self {
            spec,
            handler: Arc::new(move |input, ctx| Box::pin(handler(input, ctx))),
        }
    }
}

impl Tool for FnTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    fn run(&self, tool_use: ToolUse, ctx: InvocationContext) -> ToolStream {
        let handler = Arc::clone(&self.handler);
        Box::pin(async_stream::stream! {
            let result = match handler(tool_use.input.clone(), ctx).await {
                Ok(content) => ToolResult::with_content(
                    &tool_use.id,
                    ToolResultStatus::Success,
                    content,
                ),
                Err(err) => ToolResult::error(&tool_use.id, err.to_string()),
            };
            yield ToolEvent::Result(result);
        })
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// A registry mapping tool names to runnable tools.
///
/// Registered at agent construction; resolution happens per tool use.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool, replacing any tool with the same name.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Resolve a tool by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Returns `true` if a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered specs.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|tool| tool.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    fn add_spec() -> ToolSpec {
        ToolSpec::new(
            "add",
            "Adds two integers.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "a": {"type": "integer"},
                    "b": {"type": "integer"}
                },
                "required": ["a", "b"]
            }),
        )
    }

    fn add_tool() -> FnTool {
        FnTool::new(add_spec(), |input| async move {
            let a = input["a"].as_i64().unwrap_or(0);
            let b = input["b"].as_i64().unwrap_or(0);
            Ok(vec![ToolResultContent::text((a + b).to_string())])
        })
    }

    async fn run_to_result(tool: &dyn Tool, tool_use: ToolUse) -> ToolResult {
        let mut stream = tool.run(tool_use, InvocationContext::new());
        loop {
            match stream.next().await {
                Some(ToolEvent::Result(result)) => return result,
                Some(ToolEvent::Progress(_)) => {}
                None => panic!("tool stream ended without a result"),
            }
        }
    }

    #[test]
    fn spec_from_type_strips_meta_schema() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Args {
            query: String,
        }

        let spec = ToolSpec::from_type::<Args>("search", "Searches things.");
        assert_eq!(spec.name, "search");
        assert!(spec.input_schema.get("$schema").is_none());
        assert!(spec.input_schema["properties"]["query"].is_object());
    }

    #[tokio::test]
    async fn fn_tool_produces_success_result() {
        let tool = add_tool();
        let result = run_to_result(
            &tool,
            ToolUse::new("t1", "add", serde_json::json!({"a": 3, "b": 4})),
        )
        .await;

        assert!(result.is_success());
        assert_eq!(result.tool_use_id, "t1");
        assert_eq!(result.text(), "7");
    }

    #[tokio::test]
    async fn fn_tool_converts_error_to_error_result() {
        let tool = FnTool::new(add_spec(), |_input| async move {
            Err(Error::tool("add", "overflow"))
        });
        let result = run_to_result(&tool, ToolUse::new("t2", "add", serde_json::json!({}))).await;

        assert!(!result.is_success());
        assert!(result.text().contains("overflow"));
    }

    #[test]
    fn registry_resolves_and_lists() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(add_tool());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("add"));
        assert!(registry.resolve("add").is_some());
        assert!(registry.resolve("missing").is_none());

        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "add");
    }

    #[test]
    fn registry_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(add_tool());
        registry.register(FnTool::new(add_spec(), |_| async move {
            Ok(vec![ToolResultContent::text("replaced")])
        }));
        assert_eq!(registry.len(), 1);
    }
}
