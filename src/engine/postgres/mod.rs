//! `PostgreSQL` Database Engine Implementation
//!
//! This module implements [`DatabaseConnection`] for `PostgreSQL` databases.
//!
//! # Features
//! - Client-server connections via TCP
//! - Catalog lookups via `information_schema` and `pg_index`
//! - Rich type rendering (JSON/JSONB, timestamps, UUID, NUMERIC, etc.)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - The connection task is spawned once and lives as long as the client
//! - BYTEA data is Base64-encoded for JSON safety
//! - Rows are streamed; reading stops one row past the limit and the rest
//!   of the result is discarded with the stream
//! - Catalog lookups are restricted to schemas on the search path

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::time::Duration;

use base64::Engine as _;
use futures_util::TryStreamExt;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use crate::engine::{
    build_row, ColumnInfo, ConnectionConfig, DatabaseConnection, DatabaseType, IndexColumn,
    QueryLimits, QueryResult, TableEntry,
};
use crate::error::{GateError, Result};

const DEFAULT_PORT: u16 = 5432;

/// A cached `PostgreSQL` session
pub struct PostgresConnection {
    client: Option<Client>,
}

impl PostgresConnection {
    /// Connect and spawn the driver's connection task
    pub async fn open(config: &ConnectionConfig, timeout: Duration) -> Result<Self> {
        if config.engine != DatabaseType::Postgres {
            return Err(GateError::invalid_input(format!(
                "Expected PostgreSQL engine, got {}",
                config.engine
            )));
        }

        let mut pg_config = build_pg_config(config)?;
        pg_config.connect_timeout(timeout);

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            GateError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        // Note: connection errors carry no credentials, only the server's reason
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection task ended");
            }
        });

        Ok(Self { client: Some(client) })
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .filter(|client| !client.is_closed())
            .ok_or_else(|| GateError::connection_failed("PostgreSQL connection is closed"))
    }
}

impl DatabaseConnection for PostgresConnection {
    async fn is_valid(&mut self) -> bool {
        match self.client() {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    async fn query(&mut self, sql: &str, limits: &QueryLimits) -> Result<QueryResult> {
        let client = self.client()?;
        execute_query(client, sql, limits).await
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let query = "
            SELECT column_name::text,
                   upper(data_type::text),
                   COALESCE(character_maximum_length, numeric_precision)::int4,
                   is_nullable::text = 'YES',
                   column_default::text
            FROM information_schema.columns
            WHERE upper(table_name::text) = $1
              AND table_schema::name = ANY(current_schemas(false))
            ORDER BY table_schema, ordinal_position";

        let rows = self.client()?.query(query, &[&table]).await.map_err(|e| {
            GateError::engine_error("postgres", format!("Failed to query columns for {table}: {e}"))
        })?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo> {
                Ok(ColumnInfo {
                    name: row.try_get(0).map_err(catalog_error)?,
                    data_type: row.try_get(1).map_err(catalog_error)?,
                    size: row.try_get::<_, Option<i32>>(2).map_err(catalog_error)?.map(i64::from),
                    nullable: row.try_get(3).map_err(catalog_error)?,
                    default: row.try_get(4).map_err(catalog_error)?,
                })
            })
            .collect()
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let query = "
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
            WHERE i.indisprimary
              AND upper(c.relname::text) = $1
              AND n.nspname = ANY(current_schemas(false))
            ORDER BY n.nspname, k.ord";

        let rows = self.client()?.query(query, &[&table]).await.map_err(|e| {
            GateError::engine_error("postgres", format!("Failed to query primary key for {table}: {e}"))
        })?;

        rows.iter().map(|row| row.try_get(0).map_err(catalog_error)).collect()
    }

    async fn index_columns(&mut self, table: &str) -> Result<Vec<IndexColumn>> {
        // attnum 0 marks an expression column; the LEFT JOIN leaves its name NULL
        let query = "
            SELECT ic.relname::text, a.attname::text
            FROM pg_index i
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_class ic ON ic.oid = i.indexrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
            LEFT JOIN pg_attribute a
              ON a.attrelid = c.oid AND a.attnum = k.attnum AND k.attnum > 0
            WHERE upper(c.relname::text) = $1
              AND n.nspname = ANY(current_schemas(false))
            ORDER BY n.nspname, ic.relname, k.ord";

        let rows = self.client()?.query(query, &[&table]).await.map_err(|e| {
            GateError::engine_error("postgres", format!("Failed to query indexes for {table}: {e}"))
        })?;

        rows.iter()
            .map(|row| -> Result<IndexColumn> {
                Ok(IndexColumn::new(
                    row.try_get::<_, String>(0).map_err(catalog_error)?,
                    row.try_get(1).map_err(catalog_error)?,
                ))
            })
            .collect()
    }

    async fn list_tables(&mut self) -> Result<Vec<TableEntry>> {
        let query = "
            SELECT table_name::text,
                   table_schema::text,
                   CASE table_type WHEN 'BASE TABLE' THEN 'TABLE' ELSE table_type::text END
            FROM information_schema.tables
            WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY table_schema, table_name";

        let rows = self.client()?.query(query, &[]).await.map_err(|e| {
            GateError::engine_error("postgres", format!("Failed to list tables: {e}"))
        })?;

        rows.iter()
            .map(|row| -> Result<TableEntry> {
                Ok(TableEntry {
                    name: row.try_get(0).map_err(catalog_error)?,
                    schema: row.try_get(1).map_err(catalog_error)?,
                    table_type: row.try_get(2).map_err(catalog_error)?,
                })
            })
            .collect()
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client ends the spawned connection task
        drop(self.client.take());
        Ok(())
    }
}

/// Build `PostgreSQL` connection config from `ConnectionConfig`
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| GateError::config_error("PostgreSQL requires 'host' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| GateError::config_error("PostgreSQL requires 'user' parameter"))?;

    // "*" connects to the default "postgres" database
    let db_name = match config.database.as_deref() {
        Some("*") => "postgres",
        Some(db) => db,
        None => {
            return Err(GateError::config_error(
                "PostgreSQL requires 'database' parameter (use \"*\" for default database)",
            ))
        }
    };

    let mut pg_config = Config::new();
    pg_config
        .host(host)
        .port(config.port.unwrap_or(DEFAULT_PORT))
        .user(user)
        .dbname(db_name)
        .application_name(env!("CARGO_PKG_NAME"));

    if let Some(password) = config.resolved_password() {
        pg_config.password(password);
    }

    Ok(pg_config)
}

fn catalog_error(e: tokio_postgres::Error) -> GateError {
    GateError::engine_error("postgres", format!("Unexpected catalog row: {e}"))
}

/// Server message for database errors, driver message otherwise
fn sql_error(e: &tokio_postgres::Error) -> GateError {
    let message = e.as_db_error().map_or_else(|| e.to_string(), |db| db.message().to_string());
    GateError::query_failed(message)
}

/// Execute query and return `QueryResult`
async fn execute_query(client: &Client, query: &str, limits: &QueryLimits) -> Result<QueryResult> {
    let stmt = client.prepare(query).await.map_err(|e| sql_error(&e))?;

    if stmt.columns().is_empty() {
        // Non-SELECT statement (INSERT, UPDATE, DELETE, DDL)
        let rows_affected = client.execute(&stmt, &[]).await.map_err(|e| sql_error(&e))?;
        return Ok(QueryResult::affected(rows_affected));
    }

    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
    let rows = client
        .query_raw(&stmt, std::iter::empty::<&str>())
        .await
        .map_err(|e| sql_error(&e))?;
    futures_util::pin_mut!(rows);

    let mut result = QueryResult { columns, ..QueryResult::default() };
    while let Some(row) = rows.try_next().await.map_err(|e| sql_error(&e))? {
        if limits.is_full(result.rows.len()) {
            result.truncated = true;
            break;
        }
        let values = (0..result.columns.len())
            .map(|idx| render_value(&row, idx))
            .collect::<Result<Vec<_>>>()?;
        result.rows.push(build_row(&result.columns, values));
    }

    Ok(result)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        GateError::query_failed(format!("Failed to read column '{}': {e}", row.columns()[idx].name()))
    })
}

/// Render one column as text; `None` for SQL NULL
fn render_value(row: &Row, idx: usize) -> Result<Option<String>> {
    let col_type = row.columns()[idx].type_();

    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx)?.map(|v| v.to_string()),

        Type::INT2 => get::<i16>(row, idx)?.map(|v| v.to_string()),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| v.to_string()),
        Type::INT8 => get::<i64>(row, idx)?.map(|v| v.to_string()),
        Type::OID => get::<u32>(row, idx)?.map(|v| v.to_string()),

        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| v.to_string()),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(|v| v.to_string()),
        Type::NUMERIC => get::<PgNumeric>(row, idx)?.map(|v| v.0),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => get::<String>(row, idx)?,

        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(|v| v.to_string()),

        Type::BYTEA => {
            get::<Vec<u8>>(row, idx)?.map(|v| base64::engine::general_purpose::STANDARD.encode(v))
        }

        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(|v| v.to_rfc3339()),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?.map(|v| v.format("%Y-%m-%d").to_string()),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?.map(|v| v.format("%H:%M:%S%.f").to_string()),

        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| v.to_string()),

        // Enums, domains over text and the like arrive as UTF-8; anything else
        // (arrays, ranges, geometric types) is passed through as Base64
        _ => get::<WireValue>(row, idx)?.map(|v| v.0),
    };

    Ok(value)
}

/// Any value, rendered from its binary wire form
struct WireValue(String);

impl<'a> FromSql<'a> for WireValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self(match std::str::from_utf8(raw) {
            Ok(text) => text.to_string(),
            Err(_) => base64::engine::general_purpose::STANDARD.encode(raw),
        }))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// `NUMERIC` decoded from the binary format into its exact decimal text
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(Self)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Header: ndigits, weight, sign, dscale (all 16-bit), then base-10000 digits
fn decode_numeric(raw: &[u8]) -> std::result::Result<String, Box<dyn StdError + Sync + Send>> {
    let word = |at: usize| -> Option<u16> {
        raw.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    };

    let (Some(ndigits), Some(weight), Some(sign), Some(dscale)) = (word(0), word(2), word(4), word(6))
    else {
        return Err("numeric value is truncated".into());
    };
    let weight = i32::from(weight as i16);
    let dscale = usize::from(dscale);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..usize::from(ndigits))
        .map(|i| word(8 + i * 2).ok_or("numeric digits are truncated"))
        .collect::<std::result::Result<Vec<u16>, _>>()?;
    let digit_at = |pos: i32| -> u16 {
        usize::try_from(pos).ok().and_then(|p| digits.get(p).copied()).unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        write!(out, "{}", digit_at(0))?;
        for pos in 1..=weight {
            write!(out, "{:04}", digit_at(pos))?;
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit_at(pos))?;
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}
