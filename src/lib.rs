//! sqlgate - Database Tool Server for AI Assistants
//!
//! sqlgate exposes one relational database to an AI assistant as a small set
//! of tools, spoken over line-delimited JSON-RPC 2.0 on stdio.
//!
//! # Core Principles
//! - One long-lived shared connection, probed before reuse and replaced when dead
//! - Every statement passes a lexical safety check before it reaches the database
//! - Strictly sequential: one request in, one response out, in order
//! - Tool failures are readable results; protocol failures are envelope errors
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`engine`] - Database connection traits and engine implementations
//! - [`safety`] - SQL safety classifier
//! - [`connection`] - Cached connection manager
//! - [`config`] - Configuration loading
//! - [`mcp`] - Protocol envelope, dispatcher, tools and session loop
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod safety;

// Re-export commonly used types for convenience
pub use config::{Overrides, QuerySettings, ServerConfig, ServerInfo};
pub use connection::{ConnectionManager, DEFAULT_CONNECTION_KEY};
pub use engine::{
    ColumnInfo, ConnectionConfig, Connector, DatabaseConnection, DatabaseType, EngineConnection,
    EngineConnector, IndexColumn, QueryLimits, QueryResult, Row, TableEntry,
};
pub use error::{GateError, Result};
pub use mcp::{Dispatcher, Session, SessionEnd};
pub use safety::{classify, DenialReason, Verdict};
