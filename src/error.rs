//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout sqlgate.
//! Every error maps to a stable code (used in logs) and a detail string
//! (used as the diagnostic `data` of protocol error responses).
//!
//! # Error Categories
//! - `ConnectionFailed`: Database connection errors
//! - `QueryFailed`: Statement execution errors
//! - `InvalidInput`: Malformed input or missing required parameters
//! - `EngineError`: Engine-specific catalog/driver errors
//! - `ConfigError`: Configuration file or environment errors
//! - `Timeout`: A statement or metadata call exceeded the query timeout
//! - `MethodNotFound` / `ToolNotFound` / `ResourceNotFound`: dispatch misses
//! - `DatabaseError`: A resource read failed in the database
//! - `Io`: The protocol stream could not be read or written

use thiserror::Error;

/// Main error type for sqlgate operations
#[derive(Error, Debug)]
pub enum GateError {
    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Statement execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid params: {0}")]
    InvalidInput(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Statement or metadata call exceeded the configured timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// No handler for the requested protocol method
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// `tools/call` named a tool that is not registered
    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    /// `resources/read` named an unsupported URI
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Database failure while serving a resource; the cause is the detail
    #[error("Database error")]
    DatabaseError(String),

    /// Protocol stream failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Stable error code string, suitable for log filtering
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::MethodNotFound(_) => "METHOD_NOT_FOUND",
            Self::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Self::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Human-readable error message (no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Diagnostic detail carried as the `data` of a protocol error
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::MethodNotFound(method) => format!("Unknown method: {method}"),
            Self::ToolNotFound(tool) => format!("Tool not found: {tool}"),
            Self::ResourceNotFound(uri) => format!("Unknown resource: {uri}"),
            Self::EngineError { engine, detail } => format!("{engine}: {detail}"),
            Self::ConnectionFailed(detail)
            | Self::QueryFailed(detail)
            | Self::InvalidInput(detail)
            | Self::ConfigError(detail)
            | Self::Timeout(detail)
            | Self::DatabaseError(detail) => detail.clone(),
            Self::Io(e) => e.to_string(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Timeout error for a call that ran past `limit`
    pub fn query_timeout(limit: std::time::Duration) -> Self {
        Self::timeout(format!("Operation exceeded the {}s query timeout", limit.as_secs()))
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound(method.into())
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound(tool.into())
    }

    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound(uri.into())
    }

    pub fn database_error(detail: impl Into<String>) -> Self {
        Self::DatabaseError(detail.into())
    }
}

/// Result type alias for sqlgate operations
pub type Result<T> = std::result::Result<T, GateError>;
