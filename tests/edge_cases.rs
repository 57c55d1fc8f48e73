//! Edge Case Tests
//!
//! Failure tiers, limits and value rendering:
//! - Connection and execution failures stay tool-level
//! - A failed table listing is the one database failure that is a protocol error
//! - Timeouts, row caps and replacement of dead connections
//! - Duplicate column names, BLOBs, Unicode, denylist false positives

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::{
    cleanup_db, create_customer_db, mock_dispatcher, sqlite_dispatcher, temp_db_path, tool_call, tool_text,
    Script,
};
use sqlgate::config::Overrides;
use sqlgate::mcp::JsonRpcRequest;
use sqlgate::{DatabaseConnection, DEFAULT_CONNECTION_KEY};

fn rows_of(text: &str) -> Value {
    let (_, body) = text.split_once("\n\nResults:\n").expect("expected a results section");
    serde_json::from_str(body).unwrap()
}

// ============================================================================
// Connection Failures
// ============================================================================

#[tokio::test]
async fn test_connect_failure_is_tool_level_for_query() {
    let script = Script::new();
    Script::set(&script.refuse_connect, true);
    let dispatcher = mock_dispatcher(Arc::clone(&script), Overrides::default());

    let response = dispatcher.dispatch(tool_call(1, "query", json!({"sql": "SELECT 1"}))).await;

    assert!(response.error.is_none());
    assert_eq!(tool_text(&response), ("SQL Error: connection refused by mock server".to_string(), true));
}

#[tokio::test]
async fn test_connect_failure_is_tool_level_for_describe() {
    let script = Script::new();
    Script::set(&script.refuse_connect, true);
    let dispatcher = mock_dispatcher(script, Overrides::default());

    let response = dispatcher.dispatch(tool_call(2, "describe_table", json!({"table_name": "t"}))).await;

    assert_eq!(
        tool_text(&response),
        ("Error describing table: connection refused by mock server".to_string(), true)
    );
}

#[tokio::test]
async fn test_server_recovers_once_database_is_reachable() {
    let script = Script::new();
    Script::set(&script.refuse_connect, true);
    let dispatcher = mock_dispatcher(Arc::clone(&script), Overrides::default());

    let failed = dispatcher.dispatch(tool_call(3, "query", json!({"sql": "SELECT 1"}))).await;
    assert!(tool_text(&failed).1);

    Script::set(&script.refuse_connect, false);
    let recovered = dispatcher.dispatch(tool_call(4, "query", json!({"sql": "SELECT 1"}))).await;
    assert!(!tool_text(&recovered).1);
    assert_eq!(Script::count(&script.connects), 1);
}

#[tokio::test]
async fn test_dead_connection_is_replaced() {
    let script = Script::new();
    let dispatcher = mock_dispatcher(Arc::clone(&script), Overrides::default());

    dispatcher.dispatch(tool_call(5, "query", json!({"sql": "SELECT 1"}))).await;
    let handle = dispatcher.connections().acquire(DEFAULT_CONNECTION_KEY).await.unwrap();
    handle.lock().await.close().await.unwrap();

    let response = dispatcher.dispatch(tool_call(6, "query", json!({"sql": "SELECT 1"}))).await;
    assert!(!tool_text(&response).1);
    assert_eq!(Script::count(&script.connects), 2);
}

// ============================================================================
// Execution Failures
// ============================================================================

#[tokio::test]
async fn test_metadata_failure_is_tool_level() {
    let script = Script::new();
    Script::set(&script.fail_queries, true);
    let dispatcher = mock_dispatcher(script, Overrides::default());

    let response = dispatcher.dispatch(tool_call(7, "describe_table", json!({"table_name": "t"}))).await;
    assert_eq!(tool_text(&response), ("Error describing table: mock engine failure".to_string(), true));
}

#[tokio::test]
async fn test_table_listing_failure_is_protocol_error() {
    let script = Script::new();
    Script::set(&script.fail_queries, true);
    let dispatcher = mock_dispatcher(script, Overrides::default());

    let response = dispatcher
        .dispatch(JsonRpcRequest::new(Some(json!(8)), "resources/read", Some(json!({"uri": "sqlgate://tables"}))))
        .await;

    assert!(response.result.is_none());
    let error = response.error.unwrap();
    assert_eq!(error.code, -32000);
    assert_eq!(error.message, "Database error");
    assert_eq!(error.data, Some(json!("mock engine failure")));
}

#[tokio::test]
async fn test_hanging_statement_is_cut_off_by_timeout() {
    let script = Script::new();
    Script::set(&script.hang_queries, true);
    let dispatcher =
        mock_dispatcher(script, Overrides { timeout_secs: Some(1), ..Overrides::default() });

    let started = std::time::Instant::now();
    let response = dispatcher.dispatch(tool_call(9, "query", json!({"sql": "SELECT 1"}))).await;

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(
        tool_text(&response),
        ("SQL Error: Operation exceeded the 1s query timeout".to_string(), true)
    );
}

#[tokio::test]
async fn test_long_running_sqlite_statement_is_cut_off_by_timeout() {
    let path = temp_db_path("sqlite_timeout");
    let dispatcher = sqlite_dispatcher(&path, Overrides { timeout_secs: Some(1), ..Overrides::default() });

    let started = std::time::Instant::now();
    let response = dispatcher
        .dispatch(tool_call(
            19,
            "query",
            json!({"sql": "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000) SELECT count(*) FROM c"}),
        ))
        .await;

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(
        tool_text(&response),
        ("SQL Error: Operation exceeded the 1s query timeout".to_string(), true)
    );

    let response = dispatcher.dispatch(tool_call(20, "query", json!({"sql": "SELECT 1 AS one"}))).await;
    assert!(!tool_text(&response).1);
    cleanup_db(&path);
}

// ============================================================================
// Arguments
// ============================================================================

#[tokio::test]
async fn test_non_boolean_readonly_is_protocol_error() {
    let dispatcher = mock_dispatcher(Script::new(), Overrides::default());

    let response = dispatcher.dispatch(tool_call(10, "query", json!({"sql": "SELECT 1", "readonly": "yes"}))).await;
    assert_eq!(response.error.unwrap().message, "Invalid params: Argument 'readonly' must be a boolean");
}

#[tokio::test]
async fn test_non_object_arguments_is_protocol_error() {
    let dispatcher = mock_dispatcher(Script::new(), Overrides::default());

    let response = dispatcher
        .dispatch(JsonRpcRequest::new(
            Some(json!(11)),
            "tools/call",
            Some(json!({"name": "query", "arguments": ["SELECT 1"]})),
        ))
        .await;
    assert_eq!(response.error.unwrap().message, "Invalid params: Field 'arguments' must be an object");
}

// ============================================================================
// Row Limits
// ============================================================================

#[tokio::test]
async fn test_max_rows_truncates_and_reports() {
    let path = create_customer_db("max_rows");
    let dispatcher = sqlite_dispatcher(&path, Overrides { max_rows: Some(2), ..Overrides::default() });

    let response = dispatcher
        .dispatch(tool_call(12, "query", json!({"sql": "SELECT customer_num FROM customer ORDER BY customer_num"})))
        .await;

    let (text, is_error) = tool_text(&response);
    assert!(!is_error);
    assert!(text.starts_with(
        "Query executed successfully. Rows returned: 2\nResults truncated: row limit of 2 reached"
    ));
    assert_eq!(rows_of(&text), json!([{"customer_num": "101"}, {"customer_num": "102"}]));
    cleanup_db(&path);
}

#[tokio::test]
async fn test_zero_max_rows_is_unlimited() {
    let path = create_customer_db("unlimited_rows");
    let dispatcher = sqlite_dispatcher(&path, Overrides { max_rows: Some(0), ..Overrides::default() });

    let response = dispatcher.dispatch(tool_call(13, "query", json!({"sql": "SELECT * FROM customer"}))).await;

    let (text, _) = tool_text(&response);
    assert!(text.starts_with("Query executed successfully. Rows returned: 3\n\nResults:\n"));
    cleanup_db(&path);
}

// ============================================================================
// Value Rendering
// ============================================================================

#[tokio::test]
async fn test_duplicate_column_names_last_writer_wins() {
    let path = temp_db_path("duplicate_columns");
    let dispatcher = sqlite_dispatcher(&path, Overrides::default());

    let response = dispatcher
        .dispatch(tool_call(14, "query", json!({"sql": "SELECT 1 AS a, 2 AS b, 3 AS a"})))
        .await;

    let rows = rows_of(&tool_text(&response).0);
    assert_eq!(rows, json!([{"a": "3", "b": "2"}]));
    let keys: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["a", "b"]);
    cleanup_db(&path);
}

#[tokio::test]
async fn test_blob_and_numeric_rendering() {
    let path = temp_db_path("blob_rendering");
    let dispatcher = sqlite_dispatcher(&path, Overrides::default());

    let response = dispatcher
        .dispatch(tool_call(
            15,
            "query",
            json!({"sql": "SELECT x'DEADBEEF' AS raw, 2.5 AS price, 9007199254740993 AS big, NULL AS nothing"}),
        ))
        .await;

    assert_eq!(
        rows_of(&tool_text(&response).0),
        json!([{"raw": "3q2+7w==", "price": "2.5", "big": "9007199254740993", "nothing": null}])
    );
    cleanup_db(&path);
}

#[tokio::test]
async fn test_unicode_round_trips() {
    let path = temp_db_path("unicode");
    let dispatcher = sqlite_dispatcher(&path, Overrides::default());

    let response = dispatcher
        .dispatch(tool_call(16, "query", json!({"sql": "SELECT 'Zoë 東京 🚀' AS city"})))
        .await;

    assert_eq!(rows_of(&tool_text(&response).0), json!([{"city": "Zoë 東京 🚀"}]));
    cleanup_db(&path);
}

// ============================================================================
// Denylist False Positives
// ============================================================================

#[tokio::test]
async fn test_semicolon_inside_literal_is_still_denied() {
    let path = create_customer_db("literal_semicolon");
    let dispatcher = sqlite_dispatcher(&path, Overrides::default());

    let response = dispatcher
        .dispatch(tool_call(17, "query", json!({"sql": "SELECT * FROM customer WHERE lname = 'a;b'"})))
        .await;
    assert!(tool_text(&response).1);

    let response = dispatcher
        .dispatch(tool_call(18, "query", json!({"sql": "SELECT * FROM customer WHERE lname = 'x' OR 1=1"})))
        .await;
    assert!(tool_text(&response).1);

    assert_eq!(dispatcher.connections().cached().await, 0);
    cleanup_db(&path);
}
