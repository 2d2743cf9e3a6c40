//! JSON rendering of results and failures.

use sandcell_core::{EvaluationError, FaultKind, HostValue};
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// A failed evaluation, as printed by `--json`.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl From<&EvaluationError> for ErrorOutput {
    fn from(err: &EvaluationError) -> Self {
        Self { kind: err.kind.as_str().to_string(), message: err.to_string(), line: err.line() }
    }
}

impl ErrorOutput {
    pub fn syntax(message: String, line: Option<u32>) -> Self {
        Self { kind: "syntax".to_string(), message, line }
    }
}

/// Convert a host value to JSON. Values without a JSON shape become strings.
pub fn to_json(value: &HostValue) -> Value {
    match value {
        HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Int(i) => Value::Number((*i).into()),
        HostValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        HostValue::List(items) => Value::Array(items.iter().map(to_json).collect()),
        HostValue::Map(table) => {
            let map: Map<String, Value> =
                table.iter().map(|(k, v)| (k.to_string(), to_json(v))).collect();
            Value::Object(map)
        }
        other => Value::String(other.to_string()),
    }
}

pub fn print_value(value: &HostValue, json: bool) {
    if json {
        let doc = serde_json::json!({ "value": to_json(value), "type": value.type_name() });
        println!("{doc}");
    } else {
        println!("{value}");
    }
}

pub fn print_error(err: &ErrorOutput, json: bool) {
    if json {
        let doc = serde_json::json!({ "error": err });
        println!("{doc}");
    } else {
        match err.line {
            Some(line) => eprintln!("error[{}] line {}: {}", err.kind, line, err.message),
            None => eprintln!("error[{}]: {}", err.kind, err.message),
        }
    }
}

pub fn is_limit(kind: FaultKind) -> bool {
    matches!(kind, FaultKind::Timeout | FaultKind::StackDepth)
}
