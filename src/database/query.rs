//! Query results.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A single row of query results, keyed by the names in the `RETURN` clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(flatten)]
    pub columns: Map<String, Value>,
}

impl ResultRow {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a driver row into JSON.
    ///
    /// Nodes and relationships become their property maps.
    pub fn from_row(row: &neo4rs::Row) -> Result<Self, ServerError> {
        let columns = row
            .to::<Map<String, Value>>()
            .map_err(|e| ServerError::query_error(format!("Cannot decode result row: {}", e)))?;
        Ok(Self { columns })
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Insert a value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.columns.insert(column.into(), value);
    }
}

impl From<Map<String, Value>> for ResultRow {
    fn from(columns: Map<String, Value>) -> Self {
        Self { columns }
    }
}

/// Result of a query execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result rows, in the order the database returned them.
    pub rows: Vec<ResultRow>,

    /// Execution time in milliseconds.
    pub execution_time_ms: u64,

    /// Whether results were truncated due to the row limit.
    pub truncated: bool,
}

impl QueryResult {
    /// Create a result from collected rows.
    pub fn new(rows: Vec<ResultRow>, truncated: bool, elapsed: Duration) -> Self {
        Self {
            rows,
            execution_time_ms: elapsed.as_millis() as u64,
            truncated,
        }
    }

    /// Create an empty query result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column names of the first row, in `RETURN` order.
    pub fn columns(&self) -> Vec<&str> {
        self.rows
            .first()
            .map(|row| row.columns.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Truncate a string for logging purposes.
pub(crate) fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_row() {
        let mut row = ResultRow::new();
        row.insert("name", json!("Kitchen"));
        row.insert("items", json!(2));

        assert_eq!(row.get("name"), Some(&json!("Kitchen")));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_query_result_serializes_flat_rows() {
        let mut row = ResultRow::new();
        row.insert("item", json!({"name": "TV"}));
        let result = QueryResult::new(vec![row], false, Duration::from_millis(7));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["rows"][0]["item"]["name"], json!("TV"));
        assert_eq!(value["execution_time_ms"], json!(7));
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.columns(), vec!["item"]);
    }

    #[test]
    fn test_query_result_empty() {
        let result = QueryResult::empty();
        assert_eq!(result.row_count(), 0);
        assert!(result.columns().is_empty());
        assert!(!result.truncated);
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("this is a long string", 10), "this is a ...");
        assert_eq!(truncate_for_log("héllo", 2), "h...");
    }
}
