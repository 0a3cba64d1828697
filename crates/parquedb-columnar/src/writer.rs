//! Parquet writing
//!
//! Files are written whole into memory and handed to blob storage as one
//! atomic put. `append` has compact semantics: read all rows, concatenate,
//! rewrite. Row-group boundaries follow `WriterOptions::row_group_size`.

use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::ParquetMetaDataReader;

use crate::error::{ColumnarError, Result};
use crate::options::WriterOptions;
use crate::rows::{batch_to_rows, infer_write_schema, rows_to_batch, Row};

/// Outcome of a completed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub row_count: usize,
    pub row_group_count: usize,
    pub columns: Vec<String>,
    /// Hex blake3 of the file bytes; doubles as the storage ETag.
    pub etag: String,
    pub size: u64,
}

/// Write rows under an explicit schema. Empty input still produces a valid
/// zero-row file.
pub fn write_table(
    schema: &SchemaRef,
    rows: &[Row],
    opts: &WriterOptions,
) -> Result<(Bytes, WriteResult)> {
    let props = opts.writer_properties();
    let mut buffer: Vec<u8> = Vec::new();

    let mut writer = ArrowWriter::try_new(&mut buffer, schema.clone(), Some(props))?;
    // Chunked so one oversized input cannot pin the whole table in Arrow
    // form; the writer still splits row groups by max_row_group_size.
    for chunk in rows.chunks(opts.row_group_size.max(1)) {
        let batch = rows_to_batch(schema, chunk)?;
        writer.write(&batch)?;
    }
    writer.close()?;

    let bytes = Bytes::from(buffer);
    let meta = ParquetMetaDataReader::new()
        .parse_and_finish(&bytes)
        .map_err(|e| ColumnarError::Corruption(format!("reparse after write: {e}")))?;

    let result = WriteResult {
        row_count: meta.file_metadata().num_rows() as usize,
        row_group_count: meta.num_row_groups(),
        columns: schema.fields().iter().map(|f| f.name().clone()).collect(),
        etag: hex::encode(blake3::hash(&bytes).as_bytes()),
        size: bytes.len() as u64,
    };

    tracing::debug!(
        "wrote parquet table: {} rows, {} row groups, {} bytes",
        result.row_count,
        result.row_group_count,
        result.size
    );
    Ok((bytes, result))
}

/// Write rows with a schema inferred from the rows themselves.
pub fn write_table_inferred(rows: &[Row], opts: &WriterOptions) -> Result<(Bytes, WriteResult)> {
    let schema = infer_write_schema(rows);
    write_table(&schema, rows, opts)
}

/// Append rows to an existing file: read all, concatenate, rewrite.
pub fn append_table(
    existing: Option<&Bytes>,
    schema: &SchemaRef,
    rows: &[Row],
    opts: &WriterOptions,
) -> Result<(Bytes, WriteResult)> {
    let mut all_rows = match existing {
        Some(bytes) => read_all_rows_sync(bytes)?,
        None => Vec::new(),
    };
    all_rows.extend(rows.iter().cloned());
    write_table(schema, &all_rows, opts)
}

/// Rewrite a file preserving row order and values. Row-group boundaries may
/// change; content is untouched, so compaction is idempotent.
pub fn compact_table(bytes: &Bytes, opts: &WriterOptions) -> Result<(Bytes, WriteResult)> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())?;
    let schema = builder.schema().clone();
    let rows = read_all_rows_sync(bytes)?;
    write_table(&schema, &rows, opts)
}

/// Synchronous full-file row scan over in-memory bytes.
pub fn read_all_rows_sync(bytes: &Bytes) -> Result<Vec<Row>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(batch_to_rows(&batch?)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{relevant_row_groups, Filter, FilterOp};
    use crate::options::Codec;
    use serde_json::{json, Value};

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    fn people() -> Vec<Row> {
        vec![
            row(json!({"id": "1", "name": "A", "age": 30})),
            row(json!({"id": "2", "name": null, "age": 25})),
        ]
    }

    #[test]
    fn write_and_read_back() {
        let rows = people();
        let (bytes, result) = write_table_inferred(&rows, &WriterOptions::default()).unwrap();

        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(result.row_count, 2);
        assert_eq!(result.row_group_count, 1);
        assert_eq!(result.columns, ["id", "name", "age"]);
        assert_eq!(result.size, bytes.len() as u64);
        assert_eq!(result.etag.len(), 64);

        let back = read_all_rows_sync(&bytes).unwrap();
        assert_eq!(back[0]["id"], json!("1"));
        assert_eq!(back[1]["name"], Value::Null);
        assert_eq!(back[1]["age"], json!(25));
    }

    #[test]
    fn empty_input_writes_valid_file() {
        let rows: Vec<Row> = Vec::new();
        let (bytes, result) = write_table_inferred(&rows, &WriterOptions::default()).unwrap();
        assert_eq!(result.row_count, 0);
        assert_eq!(result.row_group_count, 0);
        assert_eq!(&bytes[..4], b"PAR1");
        assert!(read_all_rows_sync(&bytes).unwrap().is_empty());
    }

    #[test]
    fn every_codec_round_trips() {
        for codec in [Codec::None, Codec::Snappy, Codec::Gzip, Codec::Zstd, Codec::Lz4] {
            let opts = WriterOptions {
                codec,
                ..WriterOptions::default()
            };
            let (bytes, _) = write_table_inferred(&people(), &opts).unwrap();
            let back = read_all_rows_sync(&bytes).unwrap();
            assert_eq!(back.len(), 2, "{codec:?}");
        }
    }

    #[test]
    fn row_group_size_partitions_rows() {
        let rows: Vec<Row> = (0..5)
            .map(|i| row(json!({"n": i})))
            .collect();
        let opts = WriterOptions {
            row_group_size: 2,
            ..WriterOptions::default()
        };
        let (_, result) = write_table_inferred(&rows, &opts).unwrap();
        assert_eq!(result.row_group_count, 3);

        // Row-group size of 1 is legal
        let opts = WriterOptions {
            row_group_size: 1,
            ..WriterOptions::default()
        };
        let (_, result) = write_table_inferred(&rows, &opts).unwrap();
        assert_eq!(result.row_group_count, 5);
    }

    #[test]
    fn append_keeps_existing_rows() {
        let schema = infer_write_schema(&people());
        let (first, _) = write_table(&schema, &people(), &WriterOptions::default()).unwrap();
        let extra = vec![row(json!({"id": "3", "name": "C", "age": 40}))];
        let (bytes, result) =
            append_table(Some(&first), &schema, &extra, &WriterOptions::default()).unwrap();
        assert_eq!(result.row_count, 3);
        let back = read_all_rows_sync(&bytes).unwrap();
        assert_eq!(back[2]["id"], json!("3"));
    }

    #[test]
    fn compact_preserves_content() {
        let opts = WriterOptions {
            row_group_size: 1,
            ..WriterOptions::default()
        };
        let (bytes, first) = write_table_inferred(&people(), &opts).unwrap();
        assert_eq!(first.row_group_count, 2);

        let (compacted, result) = compact_table(&bytes, &WriterOptions::default()).unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.row_group_count, 1);
        assert_eq!(
            read_all_rows_sync(&compacted).unwrap(),
            read_all_rows_sync(&bytes).unwrap()
        );

        // Idempotent on content
        let (again, _) = compact_table(&compacted, &WriterOptions::default()).unwrap();
        assert_eq!(
            read_all_rows_sync(&again).unwrap(),
            read_all_rows_sync(&compacted).unwrap()
        );
    }

    #[test]
    fn footer_carries_key_value_metadata() {
        let opts = WriterOptions {
            key_value_metadata: vec![("parquedb.ns".to_string(), "posts".to_string())],
            ..WriterOptions::default()
        };
        let (bytes, _) = write_table_inferred(&people(), &opts).unwrap();
        let meta = ParquetMetaDataReader::new().parse_and_finish(&bytes).unwrap();
        let kv = meta.file_metadata().key_value_metadata().unwrap();
        assert!(kv
            .iter()
            .any(|e| e.key == "parquedb.ns" && e.value.as_deref() == Some("posts")));
    }

    #[test]
    fn statistics_drive_row_group_pruning() {
        // Two row groups: ages [20, 30] and [40, 50]
        let rows: Vec<Row> = [20, 30, 40, 50]
            .iter()
            .map(|age| row(json!({"age": age})))
            .collect();
        let opts = WriterOptions {
            row_group_size: 2,
            ..WriterOptions::default()
        };
        let (bytes, result) = write_table_inferred(&rows, &opts).unwrap();
        assert_eq!(result.row_group_count, 2);

        let meta = ParquetMetaDataReader::new().parse_and_finish(&bytes).unwrap();

        let prune = |op, value| relevant_row_groups(&meta, &Filter::new("age", op, value));
        assert_eq!(prune(FilterOp::Eq, json!(25)), vec![0]);
        assert_eq!(prune(FilterOp::Gt, json!(45)), vec![1]);
        assert_eq!(prune(FilterOp::Lte, json!(30)), vec![0]);
        assert_eq!(prune(FilterOp::Eq, json!(35)), Vec::<usize>::new());
        assert_eq!(prune(FilterOp::In, json!([25, 45])), vec![0, 1]);
        assert_eq!(prune(FilterOp::IsNull, Value::Null), Vec::<usize>::new());
        // Unknown column: include everything
        assert_eq!(
            relevant_row_groups(&meta, &Filter::new("ghost", FilterOp::Eq, json!(1))),
            vec![0, 1]
        );
    }

    #[test]
    fn statistics_can_be_disabled() {
        let rows: Vec<Row> = (0..4).map(|i| row(json!({"n": i}))).collect();
        let opts = WriterOptions {
            row_group_size: 2,
            statistics: false,
            ..WriterOptions::default()
        };
        let (bytes, _) = write_table_inferred(&rows, &opts).unwrap();
        let meta = ParquetMetaDataReader::new().parse_and_finish(&bytes).unwrap();
        // Without stats the pruner keeps every group
        assert_eq!(
            relevant_row_groups(&meta, &Filter::new("n", FilterOp::Eq, json!(99))),
            vec![0, 1]
        );
    }
}
