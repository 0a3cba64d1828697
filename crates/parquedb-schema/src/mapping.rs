//! Field-type to Arrow/Parquet mapping
//!
//! Governs the wire format:
//!   string|text|markdown|email|url|uuid|varchar|char|enum -> STRING (Utf8)
//!   int -> INT64, number|float|double -> DOUBLE, boolean -> BOOLEAN
//!   date -> DATE (Date32), datetime|timestamp -> TIMESTAMP_MILLIS (UTC)
//!   decimal -> DECIMAL(p,s) default (18,2)
//!   vector|binary|json -> BYTE_ARRAY (Binary)
//! Arrays map to a List of the base type. Unknown payloads are stored as
//! Variant-encoded BYTE_ARRAY.

use arrow::datatypes::{DataType, Field, TimeUnit};
use std::sync::Arc;

use crate::field::{BaseType, FieldType};

#[derive(Debug, Clone, PartialEq)]
pub struct MappedType {
    pub data_type: DataType,
    /// True for `base[]` fields; the Arrow shape is `List(base)`.
    pub repeated: bool,
}

/// Map a parsed field type onto its Arrow storage type.
pub fn mapped_type(field: &FieldType) -> MappedType {
    let base = base_data_type(field);
    if field.is_array {
        MappedType {
            data_type: DataType::List(Arc::new(Field::new("item", base, true))),
            repeated: true,
        }
    } else {
        MappedType {
            data_type: base,
            repeated: false,
        }
    }
}

fn base_data_type(field: &FieldType) -> DataType {
    match field.base {
        BaseType::String
        | BaseType::Text
        | BaseType::Markdown
        | BaseType::Email
        | BaseType::Url
        | BaseType::Uuid
        | BaseType::Varchar
        | BaseType::Char
        | BaseType::Enum => DataType::Utf8,
        BaseType::Int => DataType::Int64,
        BaseType::Number | BaseType::Float | BaseType::Double => DataType::Float64,
        BaseType::Boolean => DataType::Boolean,
        BaseType::Date => DataType::Date32,
        BaseType::DateTime | BaseType::Timestamp => {
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
        }
        BaseType::Decimal => {
            let (precision, scale) = field.decimal_precision_scale();
            DataType::Decimal128(precision, scale)
        }
        BaseType::Vector | BaseType::Binary | BaseType::Json => DataType::Binary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(spec: &str) -> MappedType {
        mapped_type(&FieldType::parse(spec).unwrap())
    }

    #[test]
    fn string_family_maps_to_utf8() {
        for spec in ["string", "text", "markdown", "email", "url", "uuid", "varchar(10)", "char(1)", "enum(a,b)"] {
            assert_eq!(map(spec).data_type, DataType::Utf8, "{spec}");
        }
    }

    #[test]
    fn numeric_and_temporal_mappings() {
        assert_eq!(map("int").data_type, DataType::Int64);
        assert_eq!(map("number").data_type, DataType::Float64);
        assert_eq!(map("float").data_type, DataType::Float64);
        assert_eq!(map("double").data_type, DataType::Float64);
        assert_eq!(map("boolean").data_type, DataType::Boolean);
        assert_eq!(map("date").data_type, DataType::Date32);
        assert_eq!(
            map("datetime").data_type,
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
        );
        assert_eq!(
            map("timestamp").data_type,
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
        );
    }

    #[test]
    fn decimal_defaults_and_params() {
        assert_eq!(map("decimal").data_type, DataType::Decimal128(18, 2));
        assert_eq!(map("decimal(10,4)").data_type, DataType::Decimal128(10, 4));
    }

    #[test]
    fn binary_family() {
        assert_eq!(map("binary").data_type, DataType::Binary);
        assert_eq!(map("json").data_type, DataType::Binary);
        assert_eq!(map("vector(768)").data_type, DataType::Binary);
    }

    #[test]
    fn arrays_become_lists() {
        let mapped = map("string[]");
        assert!(mapped.repeated);
        match mapped.data_type {
            DataType::List(inner) => assert_eq!(inner.data_type(), &DataType::Utf8),
            other => panic!("expected list, got {other:?}"),
        }
    }
}
