//! MCP Tool: describe_table
//!
//! Reports a table's columns, primary key and indexes from the catalog. The
//! supplied name is upper-cased and matched case-insensitively; an unknown
//! table yields an empty column list, not an error.

use serde_json::Value;

use super::{required_str, CallToolResult, ToolContext, ToolDescriptor, ToolFuture, ToolHandler};
use crate::engine::{ColumnInfo, Connector, DatabaseConnection, IndexColumn};
use crate::error::Result;

pub const NAME: &str = "describe_table";

#[must_use]
pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(NAME, "Get table structure and metadata").param(
        "table_name",
        "string",
        "Table name to describe",
        true,
    )
}

pub struct DescribeTableTool;

impl<C: Connector> ToolHandler<C> for DescribeTableTool {
    fn call<'a>(&'a self, ctx: &'a ToolContext<C>, args: &'a Value) -> ToolFuture<'a> {
        Box::pin(execute(ctx, args))
    }
}

async fn execute<C: Connector>(ctx: &ToolContext<C>, args: &Value) -> Result<CallToolResult> {
    let table_name = required_str(args, "table_name")?;

    match describe(ctx, table_name).await {
        Ok(text) => Ok(CallToolResult::text(text)),
        Err(e) => {
            tracing::warn!(table = table_name, error_code = e.error_code(), error = %e, "describe failed");
            Ok(CallToolResult::error_text(format!("Error describing table: {}", e.detail())))
        }
    }
}

async fn describe<C: Connector>(ctx: &ToolContext<C>, table_name: &str) -> Result<String> {
    let lookup = table_name.to_uppercase();
    let connection = ctx.connection().await?;
    let mut connection = connection.lock().await;

    let columns = ctx.bounded(connection.columns(&lookup)).await?;
    let primary_key = ctx.bounded(connection.primary_key(&lookup)).await?;
    let index_columns = ctx.bounded(connection.index_columns(&lookup)).await?;

    Ok(render_description(table_name, &columns, &primary_key, &index_columns))
}

/// Group index members by index name, first-seen order, skipping null columns
#[must_use]
pub fn group_indexes(index_columns: &[IndexColumn]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for entry in index_columns {
        let Some(column) = &entry.column else { continue };
        match groups.iter_mut().find(|(name, _)| *name == entry.index) {
            Some((_, members)) => members.push(column.clone()),
            None => groups.push((entry.index.clone(), vec![column.clone()])),
        }
    }
    groups
}

#[must_use]
pub fn render_description(
    table_name: &str,
    columns: &[ColumnInfo],
    primary_key: &[String],
    index_columns: &[IndexColumn],
) -> String {
    let mut out = format!("Table: {table_name}\n\nColumns:\n");
    for column in columns {
        out.push_str(&render_column(column));
        out.push('\n');
    }

    if !primary_key.is_empty() {
        out.push_str(&format!("\nPrimary Key: {}\n", primary_key.join(", ")));
    }

    let indexes = group_indexes(index_columns);
    if !indexes.is_empty() {
        out.push_str("\nIndexes:\n");
        for (name, members) in &indexes {
            out.push_str(&format!("  {name}: {}\n", members.join(", ")));
        }
    }
    out
}

fn render_column(column: &ColumnInfo) -> String {
    let size = column.size.map(|s| format!("({s})")).unwrap_or_default();
    let nullability = if column.nullable { "NULL" } else { "NOT NULL" };
    let default = column.default.as_ref().map(|d| format!(" DEFAULT {d}")).unwrap_or_default();
    format!("  {}: {}{size} {nullability}{default}", column.name, column.data_type)
}
