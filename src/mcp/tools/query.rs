//! MCP Tool: query
//!
//! Runs one SQL statement on the shared connection.
//!
//! # Flow
//! 1. Classify the statement; a denial is a tool-level error
//! 2. Acquire the shared connection
//! 3. Execute under the query timeout, consuming at most `max_rows` rows
//! 4. Summarize: row count and pretty-printed rows, or rows affected
//!
//! Connection and execution failures are tool-level errors (`SQL Error: ...`).
//! Only malformed arguments become protocol errors.

use serde_json::Value;

use super::{optional_bool, required_str, CallToolResult, ToolContext, ToolDescriptor, ToolFuture, ToolHandler};
use crate::engine::{Connector, DatabaseConnection, QueryResult};
use crate::error::{GateError, Result};
use crate::safety::{self, Verdict};

pub const NAME: &str = "query";

#[must_use]
pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(NAME, "Execute SQL queries on the database (supports all SQL operations)")
        .param("sql", "string", "SQL query to execute", true)
        .param(
            "readonly",
            "boolean",
            "Whether query is read-only (default: false, allows all operations)",
            false,
        )
}

pub struct QueryTool;

impl<C: Connector> ToolHandler<C> for QueryTool {
    fn call<'a>(&'a self, ctx: &'a ToolContext<C>, args: &'a Value) -> ToolFuture<'a> {
        Box::pin(execute(ctx, args))
    }
}

async fn execute<C: Connector>(ctx: &ToolContext<C>, args: &Value) -> Result<CallToolResult> {
    let sql = required_str(args, "sql")?;
    let readonly = optional_bool(args, "readonly")?.unwrap_or(ctx.config.query.readonly_enforced);

    if let Verdict::Denied(reason) = safety::classify(sql, readonly, ctx.config.query.readonly_mode) {
        tracing::warn!(reason = reason.title(), readonly, "statement rejected");
        return Ok(CallToolResult::error_text(reason.to_string()));
    }

    match run(ctx, sql).await {
        Ok(result) => {
            tracing::debug!(
                rows = result.rows.len(),
                truncated = result.truncated,
                affected = result.rows_affected,
                "statement executed"
            );
            Ok(CallToolResult::text(summarize(&result)?))
        }
        Err(e) => {
            tracing::warn!(error_code = e.error_code(), error = %e, "statement failed");
            Ok(CallToolResult::error_text(format!("SQL Error: {}", e.detail())))
        }
    }
}

async fn run<C: Connector>(ctx: &ToolContext<C>, sql: &str) -> Result<QueryResult> {
    let limits = ctx.limits();
    let connection = ctx.connection().await?;
    let mut connection = connection.lock().await;
    ctx.bounded(connection.query(sql, &limits)).await
}

/// Text reported for an executed statement
///
/// # Errors
/// Only fails if a row cannot be rendered as JSON.
pub fn summarize(result: &QueryResult) -> Result<String> {
    if result.columns.is_empty() {
        if let Some(affected) = result.rows_affected {
            return Ok(format!("Statement executed successfully. Rows affected: {affected}"));
        }
    }

    let count = result.rows.len();
    let mut text = format!("Query executed successfully. Rows returned: {count}");
    if result.truncated {
        text.push_str(&format!("\nResults truncated: row limit of {count} reached"));
    }
    if count > 0 {
        let rows = serde_json::to_string_pretty(&result.rows)
            .map_err(|e| GateError::query_failed(format!("Could not render rows: {e}")))?;
        text.push_str("\n\nResults:\n");
        text.push_str(&rows);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::build_row;
    use pretty_assertions::assert_eq;

    fn result(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> QueryResult {
        let columns: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|values| build_row(&columns, values.into_iter().map(|v| v.map(str::to_string)).collect()))
            .collect();
        QueryResult { columns, rows, ..QueryResult::default() }
    }

    #[test]
    fn test_summary_with_rows() {
        let text = summarize(&result(&["id", "name"], vec![vec![Some("1"), None]])).unwrap();
        insta::assert_snapshot!(text, @r#"
        Query executed successfully. Rows returned: 1

        Results:
        [
          {
            "id": "1",
            "name": null
          }
        ]
        "#);
    }

    #[test]
    fn test_summary_without_rows_has_no_results_section() {
        let text = summarize(&result(&["id"], vec![])).unwrap();
        assert_eq!(text, "Query executed successfully. Rows returned: 0");
    }

    #[test]
    fn test_summary_for_write() {
        let text = summarize(&QueryResult::affected(3)).unwrap();
        assert_eq!(text, "Statement executed successfully. Rows affected: 3");
    }

    #[test]
    fn test_summary_reports_truncation() {
        let mut capped = result(&["n"], vec![vec![Some("1")], vec![Some("2")]]);
        capped.truncated = true;

        let text = summarize(&capped).unwrap();
        assert!(text.starts_with(
            "Query executed successfully. Rows returned: 2\nResults truncated: row limit of 2 reached\n\nResults:\n"
        ));
    }

    #[test]
    fn test_descriptor() {
        let json = descriptor().to_json();
        assert_eq!(json["name"], "query");
        assert_eq!(json["inputSchema"]["properties"]["readonly"]["type"], "boolean");
        assert_eq!(json["inputSchema"]["required"], serde_json::json!(["sql"]));
    }
}
