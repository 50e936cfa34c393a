//! Positional-bind SQL fragments.

use crate::adapter::condition::{Comparison, ConditionOp};
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BindValue {
    Text(String),
    TextArray(Vec<String>),
    Int(i64),
    IntArray(Vec<i64>),
    Float(f64),
    FloatArray(Vec<f64>),
    Bool(bool),
    Json(JsonValue),
}

/// SQL text with `$n` placeholders and their values, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

pub(super) fn push_bind(bind_params: &mut Vec<BindValue>, value: BindValue) -> usize {
    bind_params.push(value);
    bind_params.len()
}

pub(super) fn push_text(bind_params: &mut Vec<BindValue>, value: String) -> usize {
    push_bind(bind_params, BindValue::Text(value))
}

pub(super) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(super) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(super) fn column(alias: &str, field: &str) -> String {
    format!("{}.{}", alias, quote_ident(field))
}

/// Text form used for key matching and text comparisons. `None` for
/// null, arrays and objects.
pub(super) fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Left-hand expression and bind for comparing `col` against a JSON value.
fn scalar_operand(col: &str, value: &JsonValue) -> (String, BindValue) {
    match value {
        JsonValue::String(s) => (format!("{}::text", col), BindValue::Text(s.clone())),
        JsonValue::Bool(b) => (col.to_string(), BindValue::Bool(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => (col.to_string(), BindValue::Int(i)),
            None => (col.to_string(), BindValue::Float(n.as_f64().unwrap_or_default())),
        },
        other => (format!("to_jsonb({})", col), BindValue::Json(other.clone())),
    }
}

/// Left-hand expression and array bind for `col = ANY($n)`.
fn list_operand(col: &str, values: &[&JsonValue]) -> (String, BindValue) {
    if values.iter().all(|v| v.is_i64()) {
        let ints = values.iter().filter_map(|v| v.as_i64()).collect();
        return (col.to_string(), BindValue::IntArray(ints));
    }
    if values.iter().all(|v| v.is_number()) {
        let floats = values.iter().filter_map(|v| v.as_f64()).collect();
        return (col.to_string(), BindValue::FloatArray(floats));
    }
    let texts = values
        .iter()
        .map(|v| scalar_text(v).unwrap_or_else(|| v.to_string()))
        .collect();
    (format!("{}::text", col), BindValue::TextArray(texts))
}

/// SQL for one parsed condition operation on `col`. `None` when the
/// operation constrains nothing.
pub(super) fn condition_sql(
    col: &str,
    op: &ConditionOp,
    bind_params: &mut Vec<BindValue>,
) -> Option<String> {
    match op {
        ConditionOp::IsNull => Some(format!("{} IS NULL", col)),
        ConditionOp::NotNull => Some(format!("{} IS NOT NULL", col)),
        ConditionOp::Compare(cmp, value) => {
            let (lhs, bind) = scalar_operand(col, value);
            let idx = push_bind(bind_params, bind);
            let clause = format!("{} {} ${}", lhs, cmp.sql(), idx);
            if *cmp == Comparison::Ne {
                // Missing values are "not equal" too.
                Some(format!("({} IS NULL OR {})", col, clause))
            } else {
                Some(clause)
            }
        }
        ConditionOp::In(values) => {
            let has_null = values.iter().any(JsonValue::is_null);
            let non_null: Vec<&JsonValue> = values.iter().filter(|v| !v.is_null()).collect();
            match (non_null.is_empty(), has_null) {
                (true, false) => Some("FALSE".to_string()),
                (true, true) => Some(format!("{} IS NULL", col)),
                (false, has_null) => {
                    let (lhs, bind) = list_operand(col, &non_null);
                    let idx = push_bind(bind_params, bind);
                    let clause = format!("{} = ANY(${})", lhs, idx);
                    if has_null {
                        Some(format!("({} OR {} IS NULL)", clause, col))
                    } else {
                        Some(clause)
                    }
                }
            }
        }
        ConditionOp::NotIn(values) => {
            let has_null = values.iter().any(JsonValue::is_null);
            let non_null: Vec<&JsonValue> = values.iter().filter(|v| !v.is_null()).collect();
            if non_null.is_empty() {
                return has_null.then(|| format!("{} IS NOT NULL", col));
            }
            let (lhs, bind) = list_operand(col, &non_null);
            let idx = push_bind(bind_params, bind);
            if has_null {
                Some(format!("({} IS NOT NULL AND NOT ({} = ANY(${})))", col, lhs, idx))
            } else {
                Some(format!("({} IS NULL OR NOT ({} = ANY(${})))", col, lhs, idx))
            }
        }
    }
}

/// `jsonb_build_object` over `keys`, chunked to stay under the 100-argument limit.
pub(super) fn json_object_sql(alias: &str, keys: &[String]) -> String {
    let chunks: Vec<String> = keys
        .chunks(50)
        .map(|chunk| {
            let args: Vec<String> = chunk
                .iter()
                .map(|k| format!("{}, {}", quote_literal(k), column(alias, k)))
                .collect();
            format!("jsonb_build_object({})", args.join(", "))
        })
        .collect();
    if chunks.is_empty() {
        format!("to_jsonb({})", alias)
    } else {
        chunks.join(" || ")
    }
}
