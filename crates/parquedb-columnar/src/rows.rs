//! Dynamic rows and their Arrow conversions
//!
//! Rows are JSON object maps. Binary columns carry base64 strings at the row
//! boundary (JSON has no byte type); timestamps and dates are milliseconds
//! since epoch, with DATE columns stored as whole days.

use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryBuilder, BooleanArray, BooleanBuilder, Date32Array,
    Date32Builder, Decimal128Array, Float64Array, Float64Builder, Int64Array, Int64Builder,
    ListArray, ListBuilder, RecordBatch, StringArray, StringBuilder, TimestampMillisecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use base64::Engine as _;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ColumnarError, Result};

pub type Row = serde_json::Map<String, Value>;

const MS_PER_DAY: i64 = 86_400_000;

/// Infer an Arrow schema from the rows themselves: the type of the first
/// non-null value per key, widened to Float64 when ints and floats mix.
/// Keys that never carry a value fall back to Utf8.
pub fn infer_write_schema(rows: &[Row]) -> SchemaRef {
    let mut fields: Vec<(String, Option<DataType>)> = Vec::new();

    for row in rows {
        for (key, value) in row {
            let idx = match fields.iter().position(|(name, _)| name == key) {
                Some(idx) => idx,
                None => {
                    fields.push((key.clone(), None));
                    fields.len() - 1
                }
            };
            if value.is_null() {
                continue;
            }
            let observed = infer_data_type(value);
            fields[idx].1 = Some(match fields[idx].1.take() {
                None => observed,
                Some(existing) => widen(existing, observed),
            });
        }
    }

    if fields.is_empty() {
        // Parquet cannot express a zero-column schema; a lone `$id` column
        // keeps empty writes syntactically valid.
        return Arc::new(Schema::new(vec![Field::new("$id", DataType::Utf8, true)]));
    }

    let fields: Vec<Field> = fields
        .into_iter()
        .map(|(name, dt)| Field::new(name, dt.unwrap_or(DataType::Utf8), true))
        .collect();
    Arc::new(Schema::new(fields))
}

fn infer_data_type(value: &Value) -> DataType {
    match value {
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => DataType::Int64,
        Value::Number(_) => DataType::Float64,
        Value::Array(items) => {
            let inner = items
                .iter()
                .find(|v| !v.is_null())
                .map(infer_data_type)
                .unwrap_or(DataType::Utf8);
            DataType::List(Arc::new(Field::new("item", inner, true)))
        }
        _ => DataType::Utf8,
    }
}

fn widen(a: DataType, b: DataType) -> DataType {
    if a == b {
        return a;
    }
    match (&a, &b) {
        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => {
            DataType::Float64
        }
        _ => DataType::Utf8,
    }
}

/// Columnarize rows into a RecordBatch for `schema`. Keys absent from a row
/// become nulls; keys absent from the schema are dropped.
pub fn rows_to_batch(schema: &SchemaRef, rows: &[Row]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        columns.push(build_column(field, rows)?);
    }
    RecordBatch::try_new(schema.clone(), columns).map_err(ColumnarError::from)
}

fn build_column(field: &Field, rows: &[Row]) -> Result<ArrayRef> {
    let name = field.name().as_str();
    let values = rows.iter().map(|row| row.get(name));

    match field.data_type() {
        DataType::Utf8 => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    Some(Value::String(s)) => builder.append_value(s),
                    Some(Value::Null) | None => builder.append_null(),
                    // Non-string scalars in a string column keep their JSON text
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for value in values {
                match value.and_then(json_i64) {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for value in values {
                match value.and_then(Value::as_f64) {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for value in values {
                match value.and_then(Value::as_bool) {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Timestamp(TimeUnit::Millisecond, tz) => {
            let raw: Vec<Option<i64>> = values.map(|v| v.and_then(json_i64)).collect();
            let array = TimestampMillisecondArray::from(raw);
            let array = match tz {
                Some(tz) => array.with_timezone(tz.as_ref()),
                None => array,
            };
            Ok(Arc::new(array))
        }
        DataType::Date32 => {
            let mut builder = Date32Builder::new();
            for value in values {
                match value.and_then(json_i64) {
                    Some(ms) => builder.append_value((ms.div_euclid(MS_PER_DAY)) as i32),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Binary => {
            let mut builder = BinaryBuilder::new();
            for value in values {
                match value {
                    Some(Value::String(s)) => {
                        let bytes = base64::engine::general_purpose::STANDARD
                            .decode(s)
                            .map_err(|_| {
                                ColumnarError::InvalidInput(format!(
                                    "column '{name}': binary values must be base64"
                                ))
                            })?;
                        builder.append_value(&bytes);
                    }
                    Some(Value::Null) | None => builder.append_null(),
                    Some(other) => {
                        return Err(ColumnarError::InvalidInput(format!(
                            "column '{name}': cannot store {other} as binary"
                        )))
                    }
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Decimal128(precision, scale) => {
            let factor = 10f64.powi(i32::from(*scale));
            let raw: Vec<Option<i128>> = values
                .map(|v| {
                    v.and_then(Value::as_f64)
                        .map(|f| (f * factor).round() as i128)
                })
                .collect();
            let array = Decimal128Array::from(raw)
                .with_precision_and_scale(*precision, *scale)
                .map_err(ColumnarError::from)?;
            Ok(Arc::new(array))
        }
        DataType::List(inner) => build_list_column(name, inner, rows),
        other => Err(ColumnarError::InvalidInput(format!(
            "column '{name}': unsupported data type {other}"
        ))),
    }
}

fn build_list_column(name: &str, inner: &Arc<Field>, rows: &[Row]) -> Result<ArrayRef> {
    macro_rules! list_of {
        ($builder:expr, $append:expr) => {{
            let mut builder = ListBuilder::new($builder);
            for row in rows {
                match row.get(name) {
                    Some(Value::Array(items)) => {
                        for item in items {
                            $append(builder.values(), item);
                        }
                        builder.append(true);
                    }
                    Some(Value::Null) | None => builder.append(false),
                    Some(_) => builder.append(false),
                }
            }
            Ok(Arc::new(builder.finish()) as ArrayRef)
        }};
    }

    match inner.data_type() {
        DataType::Utf8 => list_of!(StringBuilder::new(), |b: &mut StringBuilder, v: &Value| {
            match v {
                Value::String(s) => b.append_value(s),
                Value::Null => b.append_null(),
                other => b.append_value(other.to_string()),
            }
        }),
        DataType::Int64 => list_of!(Int64Builder::new(), |b: &mut Int64Builder, v: &Value| {
            match json_i64(v) {
                Some(i) => b.append_value(i),
                None => b.append_null(),
            }
        }),
        DataType::Float64 => {
            list_of!(Float64Builder::new(), |b: &mut Float64Builder, v: &Value| {
                match v.as_f64() {
                    Some(f) => b.append_value(f),
                    None => b.append_null(),
                }
            })
        }
        DataType::Boolean => {
            list_of!(BooleanBuilder::new(), |b: &mut BooleanBuilder, v: &Value| {
                match v.as_bool() {
                    Some(x) => b.append_value(x),
                    None => b.append_null(),
                }
            })
        }
        other => Err(ColumnarError::InvalidInput(format!(
            "column '{name}': unsupported list element type {other}"
        ))),
    }
}

fn json_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

/// Convert a batch back into rows. Every schema column appears in every row;
/// nulls stay explicit.
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<Row>> {
    let schema = batch.schema();
    let mut rows: Vec<Row> = (0..batch.num_rows()).map(|_| Row::new()).collect();

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let array = batch.column(col_idx);
        for (row_idx, row) in rows.iter_mut().enumerate() {
            row.insert(field.name().clone(), array_value(array, row_idx)?);
        }
    }
    Ok(rows)
}

fn array_value(array: &ArrayRef, idx: usize) -> Result<Value> {
    if array.is_null(idx) {
        return Ok(Value::Null);
    }
    let any = array.as_any();
    if let Some(a) = any.downcast_ref::<StringArray>() {
        return Ok(Value::String(a.value(idx).to_string()));
    }
    if let Some(a) = any.downcast_ref::<Int64Array>() {
        return Ok(Value::from(a.value(idx)));
    }
    if let Some(a) = any.downcast_ref::<Float64Array>() {
        return Ok(serde_json::Number::from_f64(a.value(idx))
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Some(a) = any.downcast_ref::<BooleanArray>() {
        return Ok(Value::Bool(a.value(idx)));
    }
    if let Some(a) = any.downcast_ref::<TimestampMillisecondArray>() {
        return Ok(Value::from(a.value(idx)));
    }
    if let Some(a) = any.downcast_ref::<Date32Array>() {
        return Ok(Value::from(i64::from(a.value(idx)) * MS_PER_DAY));
    }
    if let Some(a) = any.downcast_ref::<BinaryArray>() {
        return Ok(Value::String(
            base64::engine::general_purpose::STANDARD.encode(a.value(idx)),
        ));
    }
    if let Some(a) = any.downcast_ref::<Decimal128Array>() {
        let scale = match a.data_type() {
            DataType::Decimal128(_, s) => *s,
            _ => 0,
        };
        let value = a.value(idx) as f64 / 10f64.powi(i32::from(scale));
        return Ok(serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Some(a) = any.downcast_ref::<ListArray>() {
        let inner = a.value(idx);
        let mut items = Vec::with_capacity(inner.len());
        for i in 0..inner.len() {
            items.push(array_value(&inner, i)?);
        }
        return Ok(Value::Array(items));
    }
    Err(ColumnarError::InvalidInput(format!(
        "unsupported array type {:?}",
        array.data_type()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn infers_schema_from_rows() {
        let rows = vec![
            row(json!({"id": "1", "age": 30, "score": 1.5, "ok": true, "tags": ["a"]})),
            row(json!({"id": "2", "age": null})),
        ];
        let schema = infer_write_schema(&rows);
        assert_eq!(schema.field_with_name("id").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(schema.field_with_name("age").unwrap().data_type(), &DataType::Int64);
        assert_eq!(schema.field_with_name("score").unwrap().data_type(), &DataType::Float64);
        assert_eq!(schema.field_with_name("ok").unwrap().data_type(), &DataType::Boolean);
        match schema.field_with_name("tags").unwrap().data_type() {
            DataType::List(inner) => assert_eq!(inner.data_type(), &DataType::Utf8),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn int_float_mix_widens_to_float() {
        let rows = vec![row(json!({"v": 1})), row(json!({"v": 2.5}))];
        let schema = infer_write_schema(&rows);
        assert_eq!(schema.field_with_name("v").unwrap().data_type(), &DataType::Float64);
    }

    #[test]
    fn batch_round_trip() {
        let rows = vec![
            row(json!({"id": "1", "age": 30, "tags": ["x", "y"], "ok": true})),
            row(json!({"id": "2", "age": null, "tags": null, "ok": null})),
        ];
        let schema = infer_write_schema(&rows);
        let batch = rows_to_batch(&schema, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let back = batch_to_rows(&batch).unwrap();
        assert_eq!(back[0]["id"], json!("1"));
        assert_eq!(back[0]["age"], json!(30));
        assert_eq!(back[0]["tags"], json!(["x", "y"]));
        assert_eq!(back[1]["age"], Value::Null);
        assert_eq!(back[1]["tags"], Value::Null);
    }

    #[test]
    fn missing_keys_become_nulls() {
        let rows = vec![row(json!({"a": 1, "b": "x"})), row(json!({"a": 2}))];
        let schema = infer_write_schema(&rows);
        let batch = rows_to_batch(&schema, &rows).unwrap();
        let back = batch_to_rows(&batch).unwrap();
        assert_eq!(back[1]["b"], Value::Null);
    }

    #[test]
    fn binary_round_trips_as_base64() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
            "blob",
            DataType::Binary,
            true,
        )]));
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x00\x01\xff");
        let rows = vec![row(json!({"blob": encoded}))];
        let batch = rows_to_batch(&schema, &rows).unwrap();
        let back = batch_to_rows(&batch).unwrap();
        assert_eq!(back[0]["blob"], json!(encoded));
    }
}
