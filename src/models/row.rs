//! Rows and the events that flow through the stage pipeline

use serde_json::{Map, Value};

/// One asset: qualified field name → value, in insertion order.
pub type Row = Map<String, Value>;

/// Input to the stage pipeline: a row, or the terminal sentinel that
/// triggers every stage's stop behaviour exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum RowEvent {
    Row(Row),
    EndOfStream,
}

impl From<Row> for RowEvent {
    fn from(row: Row) -> Self {
        RowEvent::Row(row)
    }
}

/// Wrap a single value in a list unless it already is one; null becomes
/// an empty list.
pub fn listify(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Render a value for display: strings verbatim, null as empty, anything
/// else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
