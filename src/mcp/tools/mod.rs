//! Tool Registry
//!
//! Tools are registered once at startup with a descriptor (name, description,
//! input schema) and a handler. `tools/list` exposes the descriptors in
//! registration order; `tools/call` looks a handler up by name.
//!
//! # Failure Tiers
//! A handler returns `Ok(CallToolResult)` for outcomes the caller should read,
//! including tool-level failures (`isError: true`). `Err` is reserved for
//! malformed arguments and becomes a protocol error.

use serde_json::{json, Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, SharedConnection, DEFAULT_CONNECTION_KEY};
use crate::engine::{Connector, QueryLimits};
use crate::error::{GateError, Result};

pub mod describe;
pub mod query;

// ============================================================================
// Descriptors
// ============================================================================

/// One parameter of a tool's input schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolParam {
    pub name: String,
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

/// Discovery metadata for a tool, exposed verbatim by `tools/list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

impl ToolDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), params: Vec::new() }
    }

    #[must_use]
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.params.push(ToolParam {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required,
        });
        self
    }

    /// Names of the required parameters, in declaration order
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter(|p| p.required).map(|p| p.name.as_str())
    }

    /// `{name, description, inputSchema: {type, properties, required}}`
    #[must_use]
    pub fn to_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), json!({"type": p.param_type, "description": p.description})))
            .collect();

        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": {
                "type": "object",
                "properties": properties,
                "required": self.required().collect::<Vec<_>>(),
            }
        })
    }
}

// ============================================================================
// Results
// ============================================================================

/// Text content block for tool results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextContent {
    pub content_type: String,
    pub text: String,
}

impl TextContent {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { content_type: "text".to_string(), text: text.into() }
    }
}

/// Tool call result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallToolResult {
    pub content: Vec<TextContent>,
    pub is_error: bool,
}

impl CallToolResult {
    /// Successful result carrying one text block
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self { content: vec![TextContent::new(text)], is_error: false }
    }

    /// Tool-level failure carrying one text block
    #[must_use]
    pub fn error_text(text: impl Into<String>) -> Self {
        Self { content: vec![TextContent::new(text)], is_error: true }
    }

    /// Concatenated text of every content block
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.content.iter().map(|c| c.text.as_str()).collect()
    }

    /// `{content: [{type, text}...], isError}`
    #[must_use]
    pub fn to_value(&self) -> Value {
        let content: Vec<Value> =
            self.content.iter().map(|c| json!({"type": c.content_type, "text": c.text})).collect();
        json!({ "content": content, "isError": self.is_error })
    }
}

// ============================================================================
// Handler Context
// ============================================================================

/// Shared state handed to every tool call
pub struct ToolContext<C: Connector> {
    pub config: Arc<ServerConfig>,
    pub connections: Arc<ConnectionManager<C>>,
}

impl<C: Connector> ToolContext<C> {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>, connections: Arc<ConnectionManager<C>>) -> Self {
        Self { config, connections }
    }

    #[must_use]
    pub fn limits(&self) -> QueryLimits {
        self.config.query.limits()
    }

    /// The shared connection, opened or replaced as needed
    ///
    /// # Errors
    /// Propagates the connector's error when no live connection can be opened.
    pub async fn connection(&self) -> Result<SharedConnection<C::Connection>> {
        self.connections.acquire(DEFAULT_CONNECTION_KEY).await
    }

    /// Run one database call under the configured query timeout
    ///
    /// # Errors
    /// Returns the call's own error, or a timeout error once the limit passes.
    pub async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.query.timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GateError::query_timeout(timeout)),
        }
    }
}

// ============================================================================
// Handlers & Registry
// ============================================================================

/// Boxed future returned by tool handlers
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send + 'a>>;

/// A callable tool
pub trait ToolHandler<C: Connector>: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a ToolContext<C>, args: &'a Value) -> ToolFuture<'a>;
}

struct RegisteredTool<C: Connector> {
    descriptor: ToolDescriptor,
    handler: Box<dyn ToolHandler<C>>,
}

/// Tools in registration order
pub struct ToolRegistry<C: Connector> {
    tools: Vec<RegisteredTool<C>>,
}

impl<C: Connector> Default for ToolRegistry<C> {
    fn default() -> Self {
        Self { tools: Vec::new() }
    }
}

impl<C: Connector> ToolRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `query` then `describe_table`
    #[must_use]
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(query::descriptor(), query::QueryTool);
        registry.register(describe::descriptor(), describe::DescribeTableTool);
        registry
    }

    /// Add a tool; a later registration under the same name replaces the
    /// handler but keeps the original position.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: impl ToolHandler<C> + 'static) {
        let handler: Box<dyn ToolHandler<C>> = Box::new(handler);
        match self.tools.iter_mut().find(|t| t.descriptor.name == descriptor.name) {
            Some(existing) => *existing = RegisteredTool { descriptor, handler },
            None => self.tools.push(RegisteredTool { descriptor, handler }),
        }
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|t| &t.descriptor)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn ToolHandler<C>> {
        self.tools.iter().find(|t| t.descriptor.name == name).map(|t| t.handler.as_ref())
    }

    /// `{tools: [descriptor...]}`
    #[must_use]
    pub fn list_tools(&self) -> Value {
        json!({ "tools": self.descriptors().map(ToolDescriptor::to_json).collect::<Vec<_>>() })
    }
}

// ============================================================================
// Argument Helpers
// ============================================================================

/// A required string argument
///
/// # Errors
/// Invalid input when the argument is missing or not a string.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        None | Some(Value::Null) => {
            Err(GateError::invalid_input(format!("Missing required argument: {key}")))
        }
        Some(_) => Err(GateError::invalid_input(format!("Argument '{key}' must be a string"))),
    }
}

/// An optional boolean argument
///
/// # Errors
/// Invalid input when the argument is present but not a boolean.
pub fn optional_bool(args: &Value, key: &str) -> Result<Option<bool>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(GateError::invalid_input(format!("Argument '{key}' must be a boolean"))),
    }
}
