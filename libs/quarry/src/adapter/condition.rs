//! Condition value interpretation shared by both adapters.
//!
//! A condition value is one of:
//! - `null`: the field is null or missing
//! - an array: the field equals any element
//! - an object whose keys are all known operators (`$eq`, `$ne`, `$gt`,
//!   `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`)
//! - anything else: literal equality

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    pub fn mongo(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOp {
    Compare(Comparison, JsonValue),
    In(Vec<JsonValue>),
    NotIn(Vec<JsonValue>),
    IsNull,
    NotNull,
}

const OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists",
];

fn is_operator_object(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => {
            !map.is_empty() && map.keys().all(|k| OPERATORS.contains(&k.as_str()))
        }
        _ => false,
    }
}

fn as_list(value: &JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Interpret one condition value. All returned operations must hold.
pub fn parse_condition(value: &JsonValue) -> Vec<ConditionOp> {
    match value {
        JsonValue::Null => vec![ConditionOp::IsNull],
        JsonValue::Array(items) => vec![ConditionOp::In(items.clone())],
        JsonValue::Object(map) if is_operator_object(value) => map
            .iter()
            .map(|(op, operand)| match (op.as_str(), operand) {
                ("$eq", JsonValue::Null) => ConditionOp::IsNull,
                ("$ne", JsonValue::Null) => ConditionOp::NotNull,
                ("$eq", v) => ConditionOp::Compare(Comparison::Eq, v.clone()),
                ("$ne", v) => ConditionOp::Compare(Comparison::Ne, v.clone()),
                ("$gt", v) => ConditionOp::Compare(Comparison::Gt, v.clone()),
                ("$gte", v) => ConditionOp::Compare(Comparison::Gte, v.clone()),
                ("$lt", v) => ConditionOp::Compare(Comparison::Lt, v.clone()),
                ("$lte", v) => ConditionOp::Compare(Comparison::Lte, v.clone()),
                ("$in", v) => ConditionOp::In(as_list(v)),
                ("$nin", v) => ConditionOp::NotIn(as_list(v)),
                ("$exists", v) if v.as_bool().unwrap_or(true) => ConditionOp::NotNull,
                _ => ConditionOp::IsNull,
            })
            .collect(),
        other => vec![ConditionOp::Compare(Comparison::Eq, other.clone())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_arrays_and_null() {
        assert_eq!(
            parse_condition(&json!("active")),
            vec![ConditionOp::Compare(Comparison::Eq, json!("active"))]
        );
        assert_eq!(
            parse_condition(&json!(["a", "b"])),
            vec![ConditionOp::In(vec![json!("a"), json!("b")])]
        );
        assert_eq!(parse_condition(&json!(null)), vec![ConditionOp::IsNull]);
    }

    #[test]
    fn operator_objects() {
        let ops = parse_condition(&json!({ "$gte": 18, "$lt": 65 }));
        assert_eq!(
            ops,
            vec![
                ConditionOp::Compare(Comparison::Gte, json!(18)),
                ConditionOp::Compare(Comparison::Lt, json!(65)),
            ]
        );
        assert_eq!(
            parse_condition(&json!({ "$exists": false })),
            vec![ConditionOp::IsNull]
        );
        assert_eq!(
            parse_condition(&json!({ "$ne": null })),
            vec![ConditionOp::NotNull]
        );
        assert_eq!(
            parse_condition(&json!({ "$nin": "x" })),
            vec![ConditionOp::NotIn(vec![json!("x")])]
        );
    }

    #[test]
    fn plain_objects_are_literals() {
        let value = json!({ "city": "Lagos", "$gt": 1 });
        assert_eq!(
            parse_condition(&value),
            vec![ConditionOp::Compare(Comparison::Eq, value.clone())]
        );
    }
}
