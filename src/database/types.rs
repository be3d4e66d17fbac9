//! JSON to Bolt value mapping.

use crate::error::ServerError;
use crate::templates::RenderedQuery;
use neo4rs::{BoltList, BoltMap, BoltNull, BoltString, BoltType, Query};
use serde_json::Value;

/// Convert a JSON value into a Bolt parameter value.
///
/// Integers that do not fit in an `i64` are sent as floats.
pub fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => BoltType::from(s.clone()),
        Value::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(json_to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Object(map) => {
            let mut bolt = BoltMap::new();
            for (key, item) in map {
                bolt.put(BoltString::new(key), json_to_bolt(item));
            }
            BoltType::Map(bolt)
        }
    }
}

/// Build a driver query with every parameter bound natively.
pub fn to_bolt_query(rendered: &RenderedQuery) -> Result<Query, ServerError> {
    if rendered.text.trim().is_empty() {
        return Err(ServerError::invalid_input(format!(
            "Query '{}' has no text",
            rendered.template
        )));
    }

    let query = rendered
        .parameters
        .iter()
        .fold(neo4rs::query(&rendered.text), |q, (name, value)| {
            q.param(name, json_to_bolt(value))
        });
    Ok(query)
}
