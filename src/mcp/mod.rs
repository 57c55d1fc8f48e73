//! MCP (Model Context Protocol) Server
//!
//! JSON-RPC 2.0 over stdio, one message per line.
//!
//! # Methods
//! - `initialize`: protocol version, server identity, capabilities
//! - `tools/list`: registered tool descriptors
//! - `tools/call`: run a tool (`query`, `describe_table`)
//! - `resources/list`: the tables resource
//! - `resources/read`: the table listing as JSON
//!
//! # Error Tiers
//! Protocol errors (unknown method, tool or resource, bad params, a failed
//! table listing) become envelope errors with code `-32000`. Tool failures
//! (safety denials, SQL errors) are successful responses whose tool result
//! has `isError: true`.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::engine::{Connector, DatabaseConnection, TableEntry};
use crate::error::{GateError, Result};

pub mod protocol;
pub mod session;
pub mod tools;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use session::{Session, SessionEnd};
pub use tools::{CallToolResult, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry};

/// URI of the table listing resource
pub const TABLES_RESOURCE_URI: &str = "sqlgate://tables";

const JSON_MIME_TYPE: &str = "application/json";

/// Routes requests to handlers and shapes their outcome into a response
pub struct Dispatcher<C: Connector> {
    ctx: ToolContext<C>,
    tools: ToolRegistry<C>,
}

impl<C: Connector> Dispatcher<C> {
    /// Dispatcher with the built-in tools registered
    #[must_use]
    pub fn new(config: Arc<ServerConfig>, connections: Arc<ConnectionManager<C>>) -> Self {
        Self::with_registry(config, connections, ToolRegistry::with_builtin_tools())
    }

    #[must_use]
    pub fn with_registry(
        config: Arc<ServerConfig>,
        connections: Arc<ConnectionManager<C>>,
        tools: ToolRegistry<C>,
    ) -> Self {
        Self { ctx: ToolContext::new(config, connections), tools }
    }

    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionManager<C>> {
        &self.ctx.connections
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry<C> {
        &self.tools
    }

    /// Handle one request. Never fails: every error becomes an error response.
    pub async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.response_id();

        match self.route(&request).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::warn!(
                    method = %request.method,
                    error_code = e.error_code(),
                    error = %e,
                    "request failed"
                );
                JsonRpcResponse::from_error(id, &e)
            }
        }
    }

    async fn route(&self, request: &JsonRpcRequest) -> Result<Value> {
        let params = request.params.as_ref();
        match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "tools/list" => Ok(self.tools.list_tools()),
            "tools/call" => self.call_tool(params).await,
            "resources/list" => Ok(list_resources()),
            "resources/read" => self.read_resource(params).await,
            other => Err(GateError::method_not_found(other)),
        }
    }

    /// Handle MCP initialize request
    fn initialize(&self) -> Value {
        let server = &self.ctx.config.server;
        json!({
            "protocolVersion": server.protocol_version,
            "serverInfo": {
                "name": server.name,
                "version": server.version,
            },
            "capabilities": {
                "tools": true,
                "resources": true,
            }
        })
    }

    /// Handle tools/call request
    async fn call_tool(&self, params: Option<&Value>) -> Result<Value> {
        let params = params.ok_or_else(|| GateError::invalid_input("Missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| GateError::invalid_input("Missing required field: name"))?;
        let handler = self.tools.get(name).ok_or_else(|| GateError::tool_not_found(name))?;

        let empty = Value::Object(serde_json::Map::new());
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => &empty,
            Some(args @ Value::Object(_)) => args,
            Some(_) => return Err(GateError::invalid_input("Field 'arguments' must be an object")),
        };

        tracing::debug!(tool = name, "calling tool");
        let result = handler.call(&self.ctx, arguments).await?;
        if result.is_error {
            tracing::info!(tool = name, "tool reported an error");
        }
        Ok(result.to_value())
    }

    /// Handle resources/read request
    async fn read_resource(&self, params: Option<&Value>) -> Result<Value> {
        let uri = params
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| GateError::invalid_input("Missing required field: uri"))?;

        if uri != TABLES_RESOURCE_URI {
            return Err(GateError::resource_not_found(uri));
        }

        let tables = self.list_tables().await.map_err(|e| GateError::database_error(e.detail()))?;
        let text = serde_json::to_string(&tables)
            .map_err(|e| GateError::database_error(format!("Could not encode table list: {e}")))?;

        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": JSON_MIME_TYPE,
                "text": text,
            }]
        }))
    }

    async fn list_tables(&self) -> Result<Vec<TableEntry>> {
        let connection = self.ctx.connection().await?;
        let mut connection = connection.lock().await;
        self.ctx.bounded(connection.list_tables()).await
    }
}

/// Handle resources/list request
fn list_resources() -> Value {
    json!({
        "resources": [{
            "uri": TABLES_RESOURCE_URI,
            "name": "Database Tables",
            "description": "List of all tables in the database",
            "mimeType": JSON_MIME_TYPE,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConnectionConfig, EngineConnector};
    use pretty_assertions::assert_eq;

    fn dispatcher() -> Dispatcher<EngineConnector> {
        let config = Arc::new(ServerConfig::default());
        let connector = EngineConnector::new(
            ConnectionConfig::sqlite(std::env::temp_dir().join("sqlgate_dispatch_unit_never_opened.db")),
            config.query.timeout(),
        );
        Dispatcher::new(config, Arc::new(ConnectionManager::new(connector)))
    }

    async fn call(method: &str, params: Option<Value>) -> JsonRpcResponse {
        dispatcher().dispatch(JsonRpcRequest::new(Some(json!(1)), method, params)).await
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = call("initialize", None).await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "sqlgate");
        assert_eq!(result["capabilities"], json!({"tools": true, "resources": true}));
    }

    #[tokio::test]
    async fn test_unknown_method_names_it() {
        let response = call("prompts/list", None).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "Method not found: prompts/list");
        assert_eq!(error.data, Some(json!("Unknown method: prompts/list")));
    }

    #[tokio::test]
    async fn test_unknown_tool_names_it() {
        let response = call("tools/call", Some(json!({"name": "drop_everything", "arguments": {}}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.message, "Unknown tool: drop_everything");
        assert_eq!(response.id, json!(1));
    }

    #[tokio::test]
    async fn test_tools_call_without_params_or_name() {
        let error = call("tools/call", None).await.error.unwrap();
        assert_eq!(error.message, "Invalid params: Missing params");

        let error = call("tools/call", Some(json!({"arguments": {}}))).await.error.unwrap();
        assert_eq!(error.message, "Invalid params: Missing required field: name");
    }

    #[tokio::test]
    async fn test_missing_sql_is_protocol_error() {
        let response = call("tools/call", Some(json!({"name": "query"}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.message, "Invalid params: Missing required argument: sql");
    }

    #[tokio::test]
    async fn test_denied_statement_never_touches_the_database() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .dispatch(JsonRpcRequest::new(
                Some(json!(9)),
                "tools/call",
                Some(json!({"name": "query", "arguments": {"sql": "SELECT 1; DROP TABLE x"}})),
            ))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Security violation: Possible SQL injection detected");
        assert_eq!(dispatcher.connections().cached().await, 0);
    }

    #[tokio::test]
    async fn test_resources_list() {
        let result = call("resources/list", None).await.result.unwrap();
        assert_eq!(result["resources"][0]["uri"], "sqlgate://tables");
        assert_eq!(result["resources"][0]["mimeType"], "application/json");
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let error = call("resources/read", Some(json!({"uri": "sqlgate://views"}))).await.error.unwrap();
        assert_eq!(error.message, "Resource not found: sqlgate://views");
        assert_eq!(error.data, Some(json!("Unknown resource: sqlgate://views")));
    }
}
