//! Query filter documents
//!
//! `{field: value}` is an equality check; `{field: {"$op": value}}` carries
//! explicit operators (`$eq $ne $gt $gte $lt $lte $in`). An explicit null
//! equality is a null check. Conditions are conjunctive.

use serde_json::Value;

use parquedb_columnar::{matches_row, Filter, FilterOp};
use parquedb_engine::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Condition {
    pub fn matches(&self, item: &Value) -> bool {
        let Some(object) = item.as_object() else {
            return false;
        };
        matches_row(
            object,
            &Filter::new(self.field.clone(), self.op, self.value.clone()),
        )
    }
}

/// Parse a filter document into conjunctive conditions.
pub fn parse_filter(filter: &Value) -> Result<Vec<Condition>> {
    if filter.is_null() {
        return Ok(Vec::new());
    }
    let Some(object) = filter.as_object() else {
        return Err(EngineError::InvalidInput(
            "filter must be an object".to_string(),
        ));
    };

    let mut conditions = Vec::new();
    for (field, spec) in object {
        if field.starts_with('$') {
            return Err(EngineError::InvalidInput(format!(
                "unsupported top-level operator '{field}'"
            )));
        }
        match spec {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                for (op_name, operand) in ops {
                    let op = match op_name.as_str() {
                        "$eq" => FilterOp::Eq,
                        "$ne" => FilterOp::Ne,
                        "$gt" => FilterOp::Gt,
                        "$gte" => FilterOp::Gte,
                        "$lt" => FilterOp::Lt,
                        "$lte" => FilterOp::Lte,
                        "$in" => {
                            if !operand.is_array() {
                                return Err(EngineError::InvalidInput(
                                    "$in requires an array operand".to_string(),
                                ));
                            }
                            FilterOp::In
                        }
                        other => {
                            return Err(EngineError::InvalidInput(format!(
                                "unknown operator '{other}' on field '{field}'"
                            )))
                        }
                    };
                    conditions.push(to_condition(field, op, operand.clone()));
                }
            }
            Value::Null => conditions.push(Condition {
                field: field.clone(),
                op: FilterOp::IsNull,
                value: Value::Null,
            }),
            other => conditions.push(to_condition(field, FilterOp::Eq, other.clone())),
        }
    }
    Ok(conditions)
}

fn to_condition(field: &str, op: FilterOp, value: Value) -> Condition {
    // Equality against null is a null check either way
    let (op, value) = match (op, &value) {
        (FilterOp::Eq, Value::Null) => (FilterOp::IsNull, Value::Null),
        (FilterOp::Ne, Value::Null) => (FilterOp::IsNotNull, Value::Null),
        _ => (op, value),
    };
    Condition {
        field: field.to_string(),
        op,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_implicit_equality() {
        let conditions = parse_filter(&json!({"name": "ada", "age": 36})).unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].op, FilterOp::Eq);
        assert_eq!(conditions[0].field, "name");
    }

    #[test]
    fn parses_operator_documents() {
        let conditions =
            parse_filter(&json!({"age": {"$gte": 30, "$lt": 50}, "name": {"$in": ["a", "b"]}}))
                .unwrap();
        assert_eq!(conditions.len(), 3);
        assert!(conditions.iter().any(|c| c.op == FilterOp::Gte));
        assert!(conditions.iter().any(|c| c.op == FilterOp::Lt));
        assert!(conditions.iter().any(|c| c.op == FilterOp::In));
    }

    #[test]
    fn null_equality_becomes_null_check() {
        let conditions = parse_filter(&json!({"deletedAt": null})).unwrap();
        assert_eq!(conditions[0].op, FilterOp::IsNull);

        let conditions = parse_filter(&json!({"deletedAt": {"$ne": null}})).unwrap();
        assert_eq!(conditions[0].op, FilterOp::IsNotNull);
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(parse_filter(&json!("nope")).is_err());
        assert!(parse_filter(&json!({"$or": []})).is_err());
        assert!(parse_filter(&json!({"age": {"$unknown": 1}})).is_err());
        assert!(parse_filter(&json!({"age": {"$in": 5}})).is_err());
    }

    #[test]
    fn conditions_match_entity_json() {
        let item = json!({"name": "ada", "age": 36});
        let conditions = parse_filter(&json!({"age": {"$gt": 30}})).unwrap();
        assert!(conditions[0].matches(&item));

        let conditions = parse_filter(&json!({"age": {"$gt": 40}})).unwrap();
        assert!(!conditions[0].matches(&item));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(parse_filter(&json!({})).unwrap().is_empty());
        assert!(parse_filter(&Value::Null).unwrap().is_empty());
    }
}
