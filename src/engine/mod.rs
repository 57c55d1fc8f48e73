//! Database Engine Traits and Core Types
//!
//! This module defines the core abstractions for database engines.
//! Each engine (`PostgreSQL`, `MySQL`, `SQLite`) provides a [`Connector`] that
//! opens a long-lived [`DatabaseConnection`].
//!
//! # Connection Model
//! A connector is built once from configuration. Connections it opens are cached
//! by the connection manager and reused until their liveness probe fails.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions beyond the row builder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GateError, Result};

#[cfg(not(any(feature = "sqlite", feature = "postgres", feature = "mysql")))]
compile_error!("sqlgate needs at least one engine feature: sqlite, postgres or mysql");

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Supported database engine types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` database
    #[default]
    SQLite,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// Whether this build carries a driver for the engine
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        match self {
            Self::Postgres => cfg!(feature = "postgres"),
            Self::MySQL => cfg!(feature = "mysql"),
            Self::SQLite => cfg!(feature = "sqlite"),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" => Ok(Self::SQLite),
            other => Err(GateError::config_error(format!(
                "Unknown engine '{other}' (expected postgres, mysql or sqlite)"
            ))),
        }
    }
}

/// Connection parameters for database engines
///
/// Fields are engine-specific (e.g., `file` only applies to `SQLite`).
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database engine type
    pub engine: DatabaseType,

    /// Hostname (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password (for postgres/mysql)
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Name of an environment variable holding the password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Database name (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Server instance identifier, reported in connection logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Database file path (for sqlite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub fn postgres(host: String, port: u16, user: String, password: String, database: String) -> Self {
        Self {
            engine: DatabaseType::Postgres,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            ..Self::default()
        }
    }

    /// Create a new `MySQL` connection config
    #[must_use]
    pub fn mysql(host: String, port: u16, user: String, password: String, database: String) -> Self {
        Self {
            engine: DatabaseType::MySQL,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            ..Self::default()
        }
    }

    /// Create a new `SQLite` connection config
    #[must_use]
    pub fn sqlite(file: PathBuf) -> Self {
        Self { engine: DatabaseType::SQLite, file: Some(file), ..Self::default() }
    }

    /// Password to present to the server.
    ///
    /// An explicit `password` wins; otherwise `password_env` names the variable
    /// to read. An unset variable yields `None`.
    #[must_use]
    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| self.password_env.as_ref().and_then(|var| std::env::var(var).ok()))
    }

    /// Copy with every credential removed, for display
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self { password: self.password.as_ref().map(|_| "***".to_string()), ..self.clone() }
    }

    /// Short target description for logs (never includes credentials)
    #[must_use]
    pub fn target(&self) -> String {
        let place = match self.engine {
            DatabaseType::SQLite => self
                .file
                .as_ref()
                .map_or_else(|| "<no file>".to_string(), |f| f.display().to_string()),
            DatabaseType::Postgres | DatabaseType::MySQL => format!(
                "{}:{}/{}",
                self.host.as_deref().unwrap_or("<no host>"),
                self.port.map_or_else(|| "-".to_string(), |p| p.to_string()),
                self.database.as_deref().unwrap_or("")
            ),
        };
        match &self.server {
            Some(server) => format!("{} {place} ({server})", self.engine),
            None => format!("{} {place}", self.engine),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_env", &self.password_env)
            .field("database", &self.database)
            .field("server", &self.server)
            .field("file", &self.file)
            .finish()
    }
}

/// Per-statement execution limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Maximum number of rows to consume; `None` means no limit
    pub max_rows: Option<usize>,

    /// Upper bound for a single statement or catalog call
    pub timeout: Duration,
}

impl QueryLimits {
    /// Build limits from a row cap where `0` means unlimited
    #[must_use]
    pub const fn new(max_rows: usize, timeout: Duration) -> Self {
        let max_rows = if max_rows == 0 { None } else { Some(max_rows) };
        Self { max_rows, timeout }
    }

    /// True once `collected` rows fill the cap
    #[must_use]
    pub const fn is_full(&self, collected: usize) -> bool {
        match self.max_rows {
            Some(max) => collected >= max,
            None => false,
        }
    }
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(30))
    }
}

/// One result row: column name to rendered value, in result-set order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Build a row from positional values.
///
/// Duplicate column names collapse: the last value wins, the key keeps the
/// position of its first occurrence.
#[must_use]
pub fn build_row(columns: &[String], values: Vec<Option<String>>) -> Row {
    let mut row = Row::with_capacity(columns.len());
    for (name, value) in columns.iter().zip(values) {
        row.insert(name.clone(), value.map_or(serde_json::Value::Null, serde_json::Value::String));
    }
    row
}

/// Statement execution result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result set
    pub columns: Vec<String>,

    /// Result rows in result-set order
    pub rows: Vec<Row>,

    /// Number of rows affected, for statements without a result set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,

    /// The row cap stopped consumption before the result set ended
    #[serde(default)]
    pub truncated: bool,
}

impl QueryResult {
    /// Result for a statement that returned no result set
    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self { rows_affected: Some(rows_affected), ..Self::default() }
    }
}

/// Column information from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Declared column type (engine-specific)
    pub data_type: String,

    /// Declared size or precision, when the catalog reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    /// Whether column allows NULL values
    pub nullable: bool,

    /// Default value (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One catalog row of index membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    /// Index name
    pub index: String,

    /// Member column; `None` for expression or statistic entries
    pub column: Option<String>,
}

impl IndexColumn {
    #[must_use]
    pub fn new(index: impl Into<String>, column: Option<String>) -> Self {
        Self { index: index.into(), column }
    }
}

/// Table listing entry, as published by the tables resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Table name
    pub name: String,

    /// Schema (or database) the table lives in, if the engine has one
    pub schema: Option<String>,

    /// Catalog table type (`TABLE`, `VIEW`, ...)
    #[serde(rename = "type")]
    pub table_type: String,
}

/// A live database session
///
/// Catalog lookups take the table name already upper-cased; engines compare
/// it case-insensitively against catalog names.
pub trait DatabaseConnection: Send + 'static {
    /// Cheap liveness probe; `false` means the handle must be replaced
    fn is_valid(&mut self) -> impl Future<Output = bool> + Send;

    /// Execute one statement, consuming at most `limits.max_rows` rows
    fn query(
        &mut self,
        sql: &str,
        limits: &QueryLimits,
    ) -> impl Future<Output = Result<QueryResult>> + Send;

    /// Columns of a table, in declaration order
    fn columns(&mut self, table: &str) -> impl Future<Output = Result<Vec<ColumnInfo>>> + Send;

    /// Primary key columns, in key order
    fn primary_key(&mut self, table: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Index membership rows, in catalog order
    fn index_columns(&mut self, table: &str)
        -> impl Future<Output = Result<Vec<IndexColumn>>> + Send;

    /// Tables and views visible to the session
    fn list_tables(&mut self) -> impl Future<Output = Result<Vec<TableEntry>>> + Send;

    /// Release the session; later calls on this handle fail
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens connections of one kind
pub trait Connector: Send + Sync + 'static {
    type Connection: DatabaseConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Connector for whichever engine the configuration names
#[derive(Debug, Clone)]
pub struct EngineConnector {
    config: ConnectionConfig,
    timeout: Duration,
}

impl EngineConnector {
    /// `timeout` bounds connection establishment and, for `SQLite`, lock waits
    #[must_use]
    pub const fn new(config: ConnectionConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Connector for EngineConnector {
    type Connection = EngineConnection;

    async fn connect(&self) -> Result<EngineConnection> {
        match self.config.engine {
            #[cfg(feature = "sqlite")]
            DatabaseType::SQLite => {
                sqlite::SqliteConnection::open(&self.config, self.timeout).map(EngineConnection::Sqlite)
            }
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => postgres::PostgresConnection::open(&self.config, self.timeout)
                .await
                .map(EngineConnection::Postgres),
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => {
                mysql::MySqlConnection::open(&self.config, self.timeout).await.map(EngineConnection::MySql)
            }
            #[allow(unreachable_patterns)]
            other => Err(GateError::config_error(format!(
                "Engine '{other}' is not enabled in this build"
            ))),
        }
    }
}

/// A connection to any of the compiled-in engines
pub enum EngineConnection {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteConnection),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresConnection),
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlConnection),
}

macro_rules! each_engine {
    ($value:expr, $conn:ident => $body:expr) => {
        match $value {
            #[cfg(feature = "sqlite")]
            EngineConnection::Sqlite($conn) => $body,
            #[cfg(feature = "postgres")]
            EngineConnection::Postgres($conn) => $body,
            #[cfg(feature = "mysql")]
            EngineConnection::MySql($conn) => $body,
        }
    };
}

impl DatabaseConnection for EngineConnection {
    async fn is_valid(&mut self) -> bool {
        each_engine!(self, conn => conn.is_valid().await)
    }

    async fn query(&mut self, sql: &str, limits: &QueryLimits) -> Result<QueryResult> {
        each_engine!(self, conn => conn.query(sql, limits).await)
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        each_engine!(self, conn => conn.columns(table).await)
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        each_engine!(self, conn => conn.primary_key(table).await)
    }

    async fn index_columns(&mut self, table: &str) -> Result<Vec<IndexColumn>> {
        each_engine!(self, conn => conn.index_columns(table).await)
    }

    async fn list_tables(&mut self) -> Result<Vec<TableEntry>> {
        each_engine!(self, conn => conn.list_tables().await)
    }

    async fn close(&mut self) -> Result<()> {
        each_engine!(self, conn => conn.close().await)
    }
}
