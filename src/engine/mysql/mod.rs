//! `MySQL` Database Engine Implementation
//!
//! This module implements [`DatabaseConnection`] for `MySQL` and `MariaDB`.
//!
//! # Features
//! - Client-server connections via TCP
//! - Catalog lookups via `information_schema` for the current database
//! - Streaming result consumption, so the row cap stops the transfer early
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - Statements run over the text protocol; values arrive as text or NULL
//! - Binary data that is not UTF-8 is Base64-encoded for JSON safety
//! - `MySQL` treats "schema" and "database" as synonyms

use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Row, Value};
use std::time::Duration;

use crate::engine::{
    build_row, ColumnInfo, ConnectionConfig, DatabaseConnection, DatabaseType, IndexColumn,
    QueryLimits, QueryResult, TableEntry,
};
use crate::error::{GateError, Result};

const DEFAULT_PORT: u16 = 3306;

/// A cached `MySQL` session
pub struct MySqlConnection {
    conn: Option<Conn>,
}

impl MySqlConnection {
    /// Connect, bounding the handshake by `timeout`
    pub async fn open(config: &ConnectionConfig, timeout: Duration) -> Result<Self> {
        if config.engine != DatabaseType::MySQL {
            return Err(GateError::invalid_input(format!(
                "Expected MySQL engine, got {}",
                config.engine
            )));
        }

        let opts = build_mysql_opts(config)?;

        let conn = tokio::time::timeout(timeout, Conn::new(opts))
            .await
            .map_err(|_| {
                GateError::timeout(format!("MySQL connection not established within {}s", timeout.as_secs()))
            })?
            .map_err(|e| GateError::connection_failed(format!("Failed to connect to MySQL: {e}")))?;

        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn.as_mut().ok_or_else(|| GateError::connection_failed("MySQL connection is closed"))
    }

    /// Run a catalog query bound to one table name
    async fn catalog(&mut self, query: &str, table: &str, what: &str) -> Result<Vec<Row>> {
        self.conn()?.exec(query, (table,)).await.map_err(|e| {
            GateError::engine_error("mysql", format!("Failed to query {what} for {table}: {e}"))
        })
    }
}

impl DatabaseConnection for MySqlConnection {
    async fn is_valid(&mut self) -> bool {
        match self.conn() {
            Ok(conn) => conn.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn query(&mut self, sql: &str, limits: &QueryLimits) -> Result<QueryResult> {
        let conn = self.conn()?;
        execute_query(conn, sql, limits).await
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let query = "
            SELECT COLUMN_NAME,
                   UPPER(DATA_TYPE),
                   CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION) AS SIGNED),
                   IS_NULLABLE = 'YES',
                   COLUMN_DEFAULT
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND UPPER(TABLE_NAME) = ?
            ORDER BY ORDINAL_POSITION";

        let rows = self.catalog(query, table, "columns").await?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo> {
                Ok(ColumnInfo {
                    name: column(row, 0)?,
                    data_type: column(row, 1)?,
                    size: column(row, 2)?,
                    nullable: column::<i64>(row, 3)? != 0,
                    default: column(row, 4)?,
                })
            })
            .collect()
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let query = "
            SELECT COLUMN_NAME
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE()
              AND UPPER(TABLE_NAME) = ?
              AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION";

        let rows = self.catalog(query, table, "primary key").await?;
        rows.iter().map(|row| column(row, 0)).collect()
    }

    async fn index_columns(&mut self, table: &str) -> Result<Vec<IndexColumn>> {
        // functional key parts report a NULL COLUMN_NAME
        let query = "
            SELECT INDEX_NAME, COLUMN_NAME
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND UPPER(TABLE_NAME) = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX";

        let rows = self.catalog(query, table, "indexes").await?;
        rows.iter()
            .map(|row| -> Result<IndexColumn> {
                Ok(IndexColumn::new(column::<String>(row, 0)?, column(row, 1)?))
            })
            .collect()
    }

    async fn list_tables(&mut self) -> Result<Vec<TableEntry>> {
        let query = "
            SELECT TABLE_NAME,
                   TABLE_SCHEMA,
                   CASE TABLE_TYPE WHEN 'BASE TABLE' THEN 'TABLE' ELSE TABLE_TYPE END
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME";

        let rows: Vec<Row> = self
            .conn()?
            .query(query)
            .await
            .map_err(|e| GateError::engine_error("mysql", format!("Failed to list tables: {e}")))?;

        rows.iter()
            .map(|row| -> Result<TableEntry> {
                Ok(TableEntry {
                    name: column(row, 0)?,
                    schema: column(row, 1)?,
                    table_type: column(row, 2)?,
                })
            })
            .collect()
    }

    async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => conn.disconnect().await.map_err(|e| {
                GateError::engine_error("mysql", format!("Failed to close connection: {e}"))
            }),
            None => Ok(()),
        }
    }
}

fn build_mysql_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| GateError::config_error("MySQL requires 'host' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| GateError::config_error("MySQL requires 'user' parameter"))?;

    let database = config
        .database
        .as_ref()
        .ok_or_else(|| GateError::config_error("MySQL requires 'database' parameter"))?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(config.port.unwrap_or(DEFAULT_PORT))
        .user(Some(user))
        .pass(config.resolved_password())
        .db_name(Some(database));

    Ok(opts)
}

/// Typed catalog column; a missing or mistyped value is an engine error
fn column<T: FromValue>(row: &Row, idx: usize) -> Result<T> {
    row.get_opt::<T, usize>(idx)
        .ok_or_else(|| GateError::engine_error("mysql", format!("Catalog row has no column {idx}")))?
        .map_err(|e| GateError::engine_error("mysql", format!("Unexpected catalog value: {e}")))
}

/// Server message for database errors, driver message otherwise
fn sql_error(e: mysql_async::Error) -> GateError {
    match e {
        mysql_async::Error::Server(server) => GateError::query_failed(server.message),
        other => GateError::query_failed(other.to_string()),
    }
}

/// Execute one statement, reading at most `limits.max_rows` rows off the wire
async fn execute_query(conn: &mut Conn, query: &str, limits: &QueryLimits) -> Result<QueryResult> {
    let mut result = conn.query_iter(query).await.map_err(sql_error)?;

    let columns: Vec<String> =
        result.columns_ref().iter().map(|col| col.name_str().to_string()).collect();

    if columns.is_empty() {
        // Statement without a result set (INSERT, UPDATE, DELETE, DDL)
        let rows_affected = result.affected_rows();
        result.drop_result().await.map_err(sql_error)?;
        return Ok(QueryResult::affected(rows_affected));
    }

    let mut output = QueryResult { columns, ..QueryResult::default() };
    while let Some(row) = result.next().await.map_err(sql_error)? {
        if limits.is_full(output.rows.len()) {
            output.truncated = true;
            break;
        }
        let values = (0..output.columns.len()).map(|idx| render_value(&row, idx)).collect();
        output.rows.push(build_row(&output.columns, values));
    }

    // Discard whatever the cap left unread so the connection stays usable
    result.drop_result().await.map_err(sql_error)?;

    Ok(output)
}

/// Render one column as text; `None` for SQL NULL
fn render_value(row: &Row, idx: usize) -> Option<String> {
    match row.as_ref(idx)? {
        Value::NULL => None,

        Value::Bytes(bytes) => Some(match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(bytes)
            }
        }),

        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Double(d) => Some(d.to_string()),

        Value::Date(year, month, day, hour, minute, second, micro) => Some(format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
        )),

        Value::Time(is_negative, days, hours, minutes, seconds, microseconds) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            Some(format!("{sign}{total_hours}:{minutes:02}:{seconds:02}.{microseconds:06}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: tests marked #[ignore] require a running MySQL instance:
    // cargo test --features mysql -- --ignored

    fn live_config() -> ConnectionConfig {
        ConnectionConfig::mysql(
            "localhost".to_string(),
            3306,
            "root".to_string(),
            "root".to_string(),
            "test".to_string(),
        )
    }

    #[test]
    fn test_build_opts_requires_database() {
        let mut config = live_config();
        config.database = None;

        let err = build_mysql_opts(&config).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("database"));
    }

    #[test]
    fn test_build_opts_requires_host() {
        let mut config = live_config();
        config.host = None;
        assert!(build_mysql_opts(&config).is_err());
    }

    #[tokio::test]
    async fn test_open_wrong_engine() {
        let config = ConnectionConfig::sqlite(std::path::PathBuf::from(":memory:"));
        let err = MySqlConnection::open(&config, Duration::from_secs(1)).await.err().unwrap();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_closed_handle_is_not_valid() {
        let mut conn = MySqlConnection { conn: None };
        assert!(!conn.is_valid().await);
        assert!(conn.close().await.is_ok());
        let err = conn.query("SELECT 1", &QueryLimits::default()).await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
    }

    #[tokio::test]
    #[ignore = "Requires running MySQL instance"]
    async fn test_query_truncates_and_catalog() {
        let mut conn = MySqlConnection::open(&live_config(), Duration::from_secs(5)).await.unwrap();
        assert!(conn.is_valid().await);

        let limits = QueryLimits::default();
        conn.query("DROP TABLE IF EXISTS sqlgate_my_items", &limits).await.unwrap();
        conn.query(
            "CREATE TABLE sqlgate_my_items (id INT PRIMARY KEY, name VARCHAR(20) NOT NULL, KEY idx_name (name))",
            &limits,
        )
        .await
        .unwrap();
        let inserted = conn
            .query("INSERT INTO sqlgate_my_items VALUES (1, 'a'), (2, 'b'), (3, 'c')", &limits)
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, Some(3));

        let capped = QueryLimits::new(2, Duration::from_secs(5));
        let result = conn.query("SELECT * FROM sqlgate_my_items ORDER BY id", &capped).await.unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.truncated);
        assert_eq!(result.rows[0]["id"], serde_json::json!("1"));

        // the connection must still be usable after an early stop
        assert!(conn.is_valid().await);

        assert_eq!(conn.primary_key("SQLGATE_MY_ITEMS").await.unwrap(), vec!["id"]);
        let indexes = conn.index_columns("SQLGATE_MY_ITEMS").await.unwrap();
        assert!(indexes.iter().any(|i| i.index == "idx_name" && i.column.as_deref() == Some("name")));

        conn.query("DROP TABLE sqlgate_my_items", &limits).await.unwrap();
        conn.close().await.unwrap();
    }
}
