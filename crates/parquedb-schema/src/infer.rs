//! Schema inference from sample documents

use crate::field::{BaseType, FieldType};
use crate::parse::{FieldDef, Schema, TypeDef};

/// Infer a single-type schema from sample documents.
///
/// A field is required when every sample carries a non-null value for it.
/// RFC 3339-looking strings infer as `datetime`, nested objects as `json`,
/// arrays take the type of their first non-null element.
pub fn infer_schema(type_name: &str, samples: &[serde_json::Value]) -> Schema {
    let mut fields: Vec<(String, FieldType)> = Vec::new();
    let mut seen_count: Vec<usize> = Vec::new();

    let objects: Vec<&serde_json::Map<String, serde_json::Value>> =
        samples.iter().filter_map(|s| s.as_object()).collect();

    for object in &objects {
        for (key, value) in object.iter() {
            if key.starts_with('$') || value.is_null() {
                continue;
            }
            let base = infer_base(value);
            let is_array = value.is_array();
            match fields.iter().position(|(name, _)| name == key) {
                Some(idx) => {
                    seen_count[idx] += 1;
                    let existing = &mut fields[idx].1;
                    existing.base = widen(existing.base, base);
                    existing.is_array |= is_array;
                }
                None => {
                    fields.push((
                        key.clone(),
                        FieldType {
                            base,
                            params: Vec::new(),
                            is_array,
                            index: None,
                            required: false,
                            default: None,
                        },
                    ));
                    seen_count.push(1);
                }
            }
        }
    }

    for (idx, (_, field)) in fields.iter_mut().enumerate() {
        field.required = !objects.is_empty() && seen_count[idx] == objects.len();
    }

    let ns_uri = "parquedb://types".to_string();
    Schema {
        ns_uri: ns_uri.clone(),
        types: vec![TypeDef {
            name: type_name.to_string(),
            uri: format!("{ns_uri}/{type_name}"),
            ns_uri,
            extends: None,
            is_abstract: false,
            shred_fields: Vec::new(),
            fields: fields
                .into_iter()
                .map(|(name, ft)| (name, FieldDef::Scalar(ft)))
                .collect(),
        }],
    }
}

fn infer_base(value: &serde_json::Value) -> BaseType {
    match value {
        serde_json::Value::Bool(_) => BaseType::Boolean,
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                BaseType::Int
            } else {
                BaseType::Double
            }
        }
        serde_json::Value::String(s) => {
            if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
                BaseType::DateTime
            } else {
                BaseType::String
            }
        }
        serde_json::Value::Array(items) => items
            .iter()
            .find(|v| !v.is_null())
            .map(infer_base)
            .unwrap_or(BaseType::String),
        serde_json::Value::Object(_) => BaseType::Json,
        serde_json::Value::Null => BaseType::String,
    }
}

// Conflicting observations degrade toward the wider type.
fn widen(a: BaseType, b: BaseType) -> BaseType {
    use BaseType::*;
    if a == b {
        return a;
    }
    match (a, b) {
        (Int, Double) | (Double, Int) => Double,
        (DateTime, String) | (String, DateTime) => String,
        _ => Json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_field_types_and_optionality() {
        let samples = [
            json!({"name": "A", "age": 30, "score": 1.5, "active": true, "joined": "2024-01-15T10:00:00Z"}),
            json!({"name": "B", "age": 25, "tags": ["x", "y"]}),
        ];
        let schema = infer_schema("Person", &samples);
        let person = schema.get_type("Person").unwrap();

        let base_of = |field: &str| match person.field(field).unwrap() {
            FieldDef::Scalar(ft) => (ft.base, ft.is_array, ft.required),
            other => panic!("unexpected {other:?}"),
        };

        assert_eq!(base_of("name"), (BaseType::String, false, true));
        assert_eq!(base_of("age"), (BaseType::Int, false, true));
        assert_eq!(base_of("score"), (BaseType::Double, false, false));
        assert_eq!(base_of("active"), (BaseType::Boolean, false, false));
        assert_eq!(base_of("joined"), (BaseType::DateTime, false, false));
        assert_eq!(base_of("tags"), (BaseType::String, true, false));
    }

    #[test]
    fn widens_int_to_double_on_conflict() {
        let samples = [json!({"v": 1}), json!({"v": 2.5})];
        let schema = infer_schema("T", &samples);
        match schema.get_type("T").unwrap().field("v").unwrap() {
            FieldDef::Scalar(ft) => assert_eq!(ft.base, BaseType::Double),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_samples_give_empty_type() {
        let schema = infer_schema("T", &[]);
        assert!(schema.get_type("T").unwrap().fields.is_empty());
    }
}
