//! Shared helpers for integration tests
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use sqlgate::config::{Overrides, ServerConfig, ServerInfo};
use sqlgate::mcp::{JsonRpcRequest, JsonRpcResponse};
use sqlgate::{
    ColumnInfo, ConnectionConfig, ConnectionManager, Connector, DatabaseConnection, Dispatcher,
    EngineConnector, GateError, IndexColumn, QueryLimits, QueryResult, Result, TableEntry,
};

// ============================================================================
// SQLite Fixtures
// ============================================================================

/// Fresh, unique temp file path for a test database
pub fn temp_db_path(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("sqlgate_{label}_{}_{id}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

/// Database with a `customer` table, an index, and a view
pub fn create_customer_db(label: &str) -> PathBuf {
    let path = temp_db_path(label);
    let conn = rusqlite::Connection::open(&path).expect("Failed to create temp database");
    conn.execute_batch(
        "CREATE TABLE customer (
             customer_num INTEGER NOT NULL PRIMARY KEY,
             fname VARCHAR(15),
             lname VARCHAR(15) NOT NULL,
             status CHAR(1) NOT NULL DEFAULT 'A'
         );
         CREATE INDEX ix_customer_name ON customer (lname, fname);
         CREATE VIEW active_customer AS SELECT * FROM customer WHERE status = 'A';
         INSERT INTO customer VALUES (101, 'Ludwig', 'Pauli', 'A');
         INSERT INTO customer VALUES (102, 'Carole', 'Sadler', 'A');
         INSERT INTO customer VALUES (103, NULL, 'Currie', 'I');",
    )
    .expect("Failed to seed database");
    path
}

pub fn cleanup_db(path: &Path) {
    let _ = std::fs::remove_file(path);
}

// ============================================================================
// Dispatchers
// ============================================================================

/// Config with a fixed server identity so wire snapshots stay stable
pub fn test_config(database: ConnectionConfig, overrides: Overrides) -> ServerConfig {
    let mut config = ServerConfig {
        database,
        server: ServerInfo {
            name: "sqlgate".to_string(),
            version: "0.0.0-test".to_string(),
            protocol_version: "2024-11-05".to_string(),
        },
        ..ServerConfig::default()
    };
    config = config.with_overrides(overrides);
    config
}

pub fn sqlite_dispatcher(path: &Path, overrides: Overrides) -> Dispatcher<EngineConnector> {
    let config = Arc::new(test_config(ConnectionConfig::sqlite(path.to_path_buf()), overrides));
    let connector = EngineConnector::new(config.database.clone(), config.query.timeout());
    Dispatcher::new(config, Arc::new(ConnectionManager::new(connector)))
}

pub fn mock_dispatcher(script: Arc<Script>, overrides: Overrides) -> Dispatcher<MockConnector> {
    let config = Arc::new(test_config(ConnectionConfig::default(), overrides));
    Dispatcher::new(config, Arc::new(ConnectionManager::new(MockConnector(script))))
}

/// `tools/call` request for `name` with `arguments`
pub fn tool_call(id: i64, name: &str, arguments: Value) -> JsonRpcRequest {
    JsonRpcRequest::new(
        Some(json!(id)),
        "tools/call",
        Some(json!({"name": name, "arguments": arguments})),
    )
}

/// The tool result text and `isError` flag of a successful envelope
pub fn tool_text(response: &JsonRpcResponse) -> (String, bool) {
    let result = response.result.as_ref().expect("expected a result envelope");
    let text = result["content"][0]["text"].as_str().expect("expected a text block").to_string();
    let is_error = result["isError"].as_bool().expect("expected isError");
    (text, is_error)
}

// ============================================================================
// Scripted Mock Engine
// ============================================================================

/// Knobs and counters shared by a mock connector and its connections
#[derive(Default)]
pub struct Script {
    pub refuse_connect: AtomicBool,
    pub fail_queries: AtomicBool,
    pub hang_queries: AtomicBool,
    pub connects: AtomicUsize,
    pub queries: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MockConnector(pub Arc<Script>);

pub struct MockConnection {
    script: Arc<Script>,
    open: bool,
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection> {
        if self.0.refuse_connect.load(Ordering::SeqCst) {
            return Err(GateError::connection_failed("connection refused by mock server"));
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { script: Arc::clone(&self.0), open: true })
    }
}

impl MockConnection {
    async fn step(&self) -> Result<()> {
        self.script.queries.fetch_add(1, Ordering::SeqCst);
        if self.script.hang_queries.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.script.fail_queries.load(Ordering::SeqCst) {
            return Err(GateError::query_failed("mock engine failure"));
        }
        Ok(())
    }
}

impl DatabaseConnection for MockConnection {
    async fn is_valid(&mut self) -> bool {
        self.open
    }

    async fn query(&mut self, _sql: &str, _limits: &QueryLimits) -> Result<QueryResult> {
        self.step().await?;
        Ok(QueryResult::affected(0))
    }

    async fn columns(&mut self, _table: &str) -> Result<Vec<ColumnInfo>> {
        self.step().await?;
        Ok(Vec::new())
    }

    async fn primary_key(&mut self, _table: &str) -> Result<Vec<String>> {
        self.step().await?;
        Ok(Vec::new())
    }

    async fn index_columns(&mut self, _table: &str) -> Result<Vec<IndexColumn>> {
        self.step().await?;
        Ok(Vec::new())
    }

    async fn list_tables(&mut self) -> Result<Vec<TableEntry>> {
        self.step().await?;
        Ok(vec![TableEntry { name: "mock".to_string(), schema: None, table_type: "TABLE".to_string() }])
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
