//! Tool abstraction: declarations, the callable capability, and tool sets
//!
//! Tools are represented as a `{declaration, invoke(bytes) -> value}`
//! capability rather than a class hierarchy. The JSON Schema in the
//! declaration is authoritative; the in-language type is a projection.
//! Incoming arguments are the raw JSON bytes produced by the model.

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tool declaration exposed to models
///
/// Serializes to `{name, description, inputSchema, outputSchema?}` with the
/// schemas expressed in a JSON Schema draft-07 subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Unique tool name
    pub name: String,

    /// Human/model readable description
    pub description: String,

    /// JSON Schema of the argument object
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,

    /// Optional JSON Schema of the result
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl Declaration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// A callable tool: raw JSON argument bytes in, JSON value out
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's declaration.
    fn declaration(&self) -> &Declaration;

    /// Invoke the tool with raw JSON argument bytes.
    async fn call(&self, ctx: CancellationToken, args: &[u8]) -> Result<Value>;
}

/// A tool that produces a lazy sequence of partial outputs
#[async_trait]
pub trait StreamableTool: Tool {
    /// Invoke the tool, yielding partial outputs as they become available.
    async fn call_streaming(
        &self,
        ctx: CancellationToken,
        args: &[u8],
    ) -> Result<BoxStream<'static, Result<Value>>>;
}

/// Shared tool handle
pub type ToolRef = Arc<dyn Tool>;

/// A dynamic source of tools with cleanup on close
///
/// Remote tool servers (MCP sessions, HTTP gateways) implement this to let
/// agents discover tools at invocation time and release connections when the
/// owning agent shuts down.
#[async_trait]
pub trait ToolSet: Send + Sync {
    /// Discover the currently available tools.
    async fn tools(&self, ctx: CancellationToken) -> Vec<ToolRef>;

    /// Release underlying resources. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Executor signature used by [`FunctionTool`]
pub type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Adapter turning an async closure into a [`Tool`]
///
/// The common path for user-defined tools: parse the argument bytes into a
/// JSON value, hand it to the closure, return whatever it produces.
pub struct FunctionTool {
    declaration: Declaration,
    func: ToolFn,
}

impl FunctionTool {
    /// Wrap `func` with the given declaration.
    pub fn new<F, Fut>(declaration: Declaration, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            declaration,
            func: Arc::new(move |args| Box::pin(func(args))),
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.declaration.name)
            .field("func", &"<function>")
            .finish()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    async fn call(&self, _ctx: CancellationToken, args: &[u8]) -> Result<Value> {
        let parsed: Value = if args.is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(args)?
        };
        (self.func)(parsed).await
    }
}

/// A fixed set of tools, satisfying [`ToolSet`] for static configurations
#[derive(Default)]
pub struct StaticToolSet {
    tools: Vec<ToolRef>,
}

impl StaticToolSet {
    pub fn new(tools: Vec<ToolRef>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolSet for StaticToolSet {
    async fn tools(&self, _ctx: CancellationToken) -> Vec<ToolRef> {
        self.tools.clone()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Invoke `tool` and render the result the way the flow feeds it back to the
/// model: the JSON-encoded result on success, an error string otherwise.
pub async fn call_and_render(ctx: CancellationToken, tool: &dyn Tool, args: &[u8]) -> String {
    match tool.call(ctx, args).await {
        Ok(value) => value.to_string(),
        Err(e) => {
            tracing::warn!(tool = %tool.declaration().name, error = %e, "tool execution failed");
            format!("Error: tool execution failed: {e}")
        }
    }
}

/// Schema helper: an object schema with the given properties and required list.
pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> FunctionTool {
        FunctionTool::new(
            Declaration::new(
                "echo",
                "Echo the input back",
                object_schema(json!({"text": {"type": "string"}}), &["text"]),
            ),
            |args| async move { Ok(json!({"echoed": args["text"]})) },
        )
    }

    #[tokio::test]
    async fn test_function_tool_call() {
        let tool = echo_tool();
        let result = tool
            .call(CancellationToken::new(), br#"{"text": "hi"}"#)
            .await
            .unwrap();
        assert_eq!(result, json!({"echoed": "hi"}));
    }

    #[tokio::test]
    async fn test_function_tool_empty_args() {
        let tool = FunctionTool::new(
            Declaration::new("ping", "No-arg tool", object_schema(json!({}), &[])),
            |_| async move { Ok(json!("pong")) },
        );
        let result = tool.call(CancellationToken::new(), b"").await.unwrap();
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn test_function_tool_bad_json() {
        let tool = echo_tool();
        let err = tool
            .call(CancellationToken::new(), b"not json")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MarshalError);
    }

    #[test]
    fn test_declaration_wire_shape() {
        let decl = Declaration::new("t", "d", json!({"type": "object"}))
            .with_output_schema(json!({"type": "string"}));
        let json = serde_json::to_value(&decl).unwrap();
        assert!(json.get("inputSchema").is_some());
        assert!(json.get("outputSchema").is_some());
    }

    #[tokio::test]
    async fn test_static_tool_set() {
        let set = StaticToolSet::new(vec![Arc::new(echo_tool())]);
        let tools = set.tools(CancellationToken::new()).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].declaration().name, "echo");
        set.close().await.unwrap();
        set.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_and_render_error() {
        let tool = FunctionTool::new(
            Declaration::new("fail", "Always fails", object_schema(json!({}), &[])),
            |_| async move {
                Err(crate::error::AgentError::ToolExecution {
                    tool: "fail".to_string(),
                    error: "boom".to_string(),
                })
            },
        );
        let rendered = call_and_render(CancellationToken::new(), &tool, b"{}").await;
        assert!(rendered.starts_with("Error: tool execution failed:"));
    }
}
