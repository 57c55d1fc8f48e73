//! `SQLite` Database Engine Implementation
//!
//! This module implements [`DatabaseConnection`] for `SQLite` databases.
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - In-memory connections (`:memory:`)
//! - Catalog lookups via `sqlite_master` and the table-valued PRAGMA functions
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, no async needed)
//! - BLOB data is Base64-encoded for JSON safety
//! - Lock waits bounded by `busy_timeout`, running statements by a
//!   progress-handler deadline
//! - Row limits enforced in application code
//! - No explicit schema support (`SQLite` uses catalogs)

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::{
    build_row, ColumnInfo, ConnectionConfig, DatabaseConnection, DatabaseType, IndexColumn,
    QueryLimits, QueryResult, TableEntry,
};
use crate::error::{GateError, Result};

/// VM instructions between deadline checks
const PROGRESS_OPS: i32 = 1000;

/// A cached `SQLite` session
pub struct SqliteConnection {
    conn: Option<Connection>,
    timeout: Duration,
}

impl SqliteConnection {
    /// Open the configured file (created if missing)
    pub fn open(config: &ConnectionConfig, timeout: Duration) -> Result<Self> {
        if config.engine != DatabaseType::SQLite {
            return Err(GateError::invalid_input(format!(
                "Expected SQLite engine, got {}",
                config.engine
            )));
        }

        let file_path = config
            .file
            .as_ref()
            .ok_or_else(|| GateError::config_error("SQLite requires 'file' parameter"))?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(file_path, flags).map_err(|e| {
            GateError::connection_failed(format!("Failed to open SQLite database: {e}"))
        })?;

        conn.busy_timeout(timeout)
            .map_err(|e| GateError::engine_error("sqlite", format!("Failed to set timeout: {e}")))?;

        Ok(Self { conn: Some(conn), timeout })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| GateError::connection_failed("SQLite connection is closed"))
    }

    /// Run `work` with a progress handler that interrupts the current
    /// statement once `limit` has passed.
    ///
    /// The driver is synchronous, so an outer async timeout never gets a
    /// chance to fire; the deadline has to be checked from inside the VM.
    fn with_deadline<T>(&self, limit: Duration, work: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        let deadline = Instant::now() + limit;
        let expired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&expired);
        conn.progress_handler(
            PROGRESS_OPS,
            Some(move || {
                let over = Instant::now() >= deadline;
                if over {
                    flag.store(true, Ordering::Relaxed);
                }
                over
            }),
        );

        let outcome = work(conn);
        conn.progress_handler(0, None::<fn() -> bool>);

        match outcome {
            Err(_) if expired.load(Ordering::Relaxed) => Err(GateError::query_timeout(limit)),
            other => other,
        }
    }
}

impl DatabaseConnection for SqliteConnection {
    async fn is_valid(&mut self) -> bool {
        self.conn()
            .and_then(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(|e| GateError::connection_failed(e.to_string()))
            })
            .is_ok()
    }

    async fn query(&mut self, sql: &str, limits: &QueryLimits) -> Result<QueryResult> {
        self.conn()?
            .busy_timeout(limits.timeout)
            .map_err(|e| GateError::engine_error("sqlite", format!("Failed to set timeout: {e}")))?;

        self.with_deadline(limits.timeout, |conn| execute_query(conn, sql, limits))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.with_deadline(self.timeout, |conn| {
            let Some(name) = resolve_table(conn, table)? else {
                return Ok(Vec::new());
            };

            let mut stmt = conn
                .prepare(
                    "SELECT name, type, \"notnull\", dflt_value
                     FROM pragma_table_info(?1)
                     ORDER BY cid",
                )
                .map_err(|e| {
                    GateError::engine_error("sqlite", format!("Failed to prepare table_info for {name}: {e}"))
                })?;

            let columns = stmt
                .query_map([&name], |row| {
                    let declared: String = row.get::<_, Option<String>>(1)?.unwrap_or_default();
                    let (data_type, size) = split_declared_type(&declared);
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        data_type,
                        size,
                        nullable: row.get::<_, i32>(2)? == 0, // notnull column: 0 = nullable, 1 = not null
                        default: row.get(3)?,
                    })
                })
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
                .map_err(|e| {
                    GateError::engine_error("sqlite", format!("Failed to query columns for {name}: {e}"))
                })?;

            Ok(columns)
        })
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        self.with_deadline(self.timeout, |conn| {
            let Some(name) = resolve_table(conn, table)? else {
                return Ok(Vec::new());
            };

            let mut stmt = conn
                .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")
                .map_err(|e| {
                    GateError::engine_error("sqlite", format!("Failed to prepare pk query for {name}: {e}"))
                })?;

            let columns = stmt
                .query_map([&name], |row| row.get(0))
                .and_then(|rows| rows.collect::<std::result::Result<Vec<String>, _>>())
                .map_err(|e| {
                    GateError::engine_error("sqlite", format!("Failed to query primary key for {name}: {e}"))
                })?;

            Ok(columns)
        })
    }

    async fn index_columns(&mut self, table: &str) -> Result<Vec<IndexColumn>> {
        self.with_deadline(self.timeout, |conn| {
            let Some(name) = resolve_table(conn, table)? else {
                return Ok(Vec::new());
            };

            let mut stmt = conn
                .prepare(
                    "SELECT il.name, ii.name
                     FROM pragma_index_list(?1) AS il, pragma_index_info(il.name) AS ii
                     ORDER BY il.seq, ii.seqno",
                )
                .map_err(|e| {
                    GateError::engine_error("sqlite", format!("Failed to prepare index_list for {name}: {e}"))
                })?;

            let members = stmt
                .query_map([&name], |row| Ok(IndexColumn::new(row.get::<_, String>(0)?, row.get(1)?)))
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
                .map_err(|e| {
                    GateError::engine_error("sqlite", format!("Failed to query indexes for {name}: {e}"))
                })?;

            Ok(members)
        })
    }

    async fn list_tables(&mut self) -> Result<Vec<TableEntry>> {
        self.with_deadline(self.timeout, |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, upper(type) FROM sqlite_master
                     WHERE type IN ('table', 'view')
                     AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .map_err(|e| GateError::engine_error("sqlite", format!("Failed to query tables: {e}")))?;

            let tables = stmt
                .query_map([], |row| {
                    Ok(TableEntry { name: row.get(0)?, schema: None, table_type: row.get(1)? })
                })
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
                .map_err(|e| GateError::engine_error("sqlite", format!("Failed to fetch table names: {e}")))?;

            Ok(tables)
        })
    }

    async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| {
                GateError::engine_error("sqlite", format!("Failed to close connection: {e}"))
            }),
            None => Ok(()),
        }
    }
}

/// Catalog spelling of a table whose upper-cased name is `table`
fn resolve_table(conn: &Connection, table: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND upper(name) = ?1
         ORDER BY name
         LIMIT 1",
        [table],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| GateError::engine_error("sqlite", format!("Failed to look up table {table}: {e}")))
}

/// Execute one statement and collect at most `limits.max_rows` rows
fn execute_query(conn: &Connection, query: &str, limits: &QueryLimits) -> Result<QueryResult> {
    let mut stmt = conn.prepare(query).map_err(|e| GateError::query_failed(e.to_string()))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    if column_names.is_empty() {
        // Non-SELECT statement (INSERT, UPDATE, DELETE, DDL)
        let changed = stmt.execute([]).map_err(|e| GateError::query_failed(e.to_string()))?;
        return Ok(QueryResult::affected(changed as u64));
    }

    let mut rows = stmt.query([]).map_err(|e| GateError::query_failed(e.to_string()))?;
    let mut result = QueryResult { columns: column_names, ..QueryResult::default() };

    while let Some(row) = rows.next().map_err(|e| GateError::query_failed(e.to_string()))? {
        if limits.is_full(result.rows.len()) {
            result.truncated = true;
            break;
        }
        let values = render_row(row, result.columns.len())?;
        result.rows.push(build_row(&result.columns, values));
    }

    Ok(result)
}

fn render_row(row: &Row<'_>, width: usize) -> Result<Vec<Option<String>>> {
    (0..width).map(|idx| render_value(row, idx)).collect()
}

/// Render one column as text; `None` for SQL NULL
fn render_value(row: &Row<'_>, idx: usize) -> Result<Option<String>> {
    let value_ref = row.get_ref(idx).map_err(|e| GateError::query_failed(e.to_string()))?;

    Ok(match value_ref {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(s) => Some(
            std::str::from_utf8(s)
                .map_err(|e| GateError::query_failed(format!("Invalid UTF-8 in column {idx}: {e}")))?
                .to_string(),
        ),
        ValueRef::Blob(b) => {
            // Encode BLOB as Base64 for JSON safety
            use base64::Engine;
            Some(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

/// Split a declared type such as `VARCHAR(40)` into `("VARCHAR", Some(40))`.
///
/// `DECIMAL(10,2)` reports the precision. Anything unparsable keeps the full
/// declaration and no size.
fn split_declared_type(declared: &str) -> (String, Option<i64>) {
    let declared = declared.trim();
    let Some(open) = declared.find('(') else {
        return (declared.to_string(), None);
    };

    let size = declared[open + 1..]
        .split([',', ')'])
        .next()
        .and_then(|n| n.trim().parse::<i64>().ok());

    match size {
        Some(size) => (declared[..open].trim_end().to_string(), Some(size)),
        None => (declared.to_string(), None),
    }
}
