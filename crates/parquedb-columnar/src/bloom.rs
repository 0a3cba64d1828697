//! Bloom filter refinement
//!
//! Split-block bloom filters (written by the Parquet writer when enabled)
//! refine eq/in pruning on string and integer columns. The filter bytes are
//! fetched by range through the AsyncBuffer; a windowed ChunkReader presents
//! them to the parquet crate at their absolute file offsets.

use bytes::Bytes;
use parquet::basic::Type as PhysicalType;
use parquet::bloom_filter::Sbbf;
use parquet::data_type::ByteArray;
use parquet::file::metadata::{ColumnChunkMetaData, RowGroupMetaData};
use parquet::file::reader::{ChunkReader, Length};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::filter::{Filter, FilterOp};
use parquedb_storage::AsyncBuffer;

// Upper bound on the window fetched when the footer does not record the
// bloom filter length. Sbbf headers are a few bytes; filters are << 1 MiB.
const MAX_BLOOM_WINDOW: u64 = 1 << 20;

/// Whether the bloom filter for `filter.column` in this row group can prove
/// the predicate unsatisfiable. `Ok(Some(false))` means provably absent;
/// `Ok(None)` means inconclusive (no filter, unsupported type or op).
pub(crate) async fn row_group_passes_bloom(
    buffer: &Arc<dyn AsyncBuffer>,
    rg: &RowGroupMetaData,
    filter: &Filter,
) -> Result<Option<bool>> {
    if !matches!(filter.op, FilterOp::Eq | FilterOp::In) {
        return Ok(None);
    }
    let Some(column) = rg
        .columns()
        .iter()
        .find(|c| c.column_path().string() == filter.column)
    else {
        return Ok(None);
    };
    let Some(offset) = column.bloom_filter_offset() else {
        return Ok(None);
    };

    let physical = column.column_type();
    if !matches!(
        physical,
        PhysicalType::BYTE_ARRAY | PhysicalType::INT32 | PhysicalType::INT64
    ) {
        return Ok(None);
    }

    let file_len = buffer.initialize().await?;
    let start = offset as u64;
    let end = match column.bloom_filter_length() {
        Some(len) => (start + len as u64).min(file_len),
        None => (start + MAX_BLOOM_WINDOW).min(file_len),
    };
    let window = buffer.slice(start, Some(end)).await?;
    let reader = WindowChunkReader {
        window_start: start,
        bytes: window,
    };

    let Some(sbbf) = Sbbf::read_from_column_chunk(column, Arc::new(reader))? else {
        return Ok(None);
    };

    let candidates: Vec<&Value> = match filter.op {
        FilterOp::Eq => vec![&filter.value],
        FilterOp::In => match filter.value.as_array() {
            Some(values) => values.iter().collect(),
            None => return Ok(None),
        },
        _ => unreachable!(),
    };

    for value in candidates {
        match check_value(&sbbf, physical, value) {
            // A value the filter cannot express keeps the group
            None => return Ok(None),
            Some(true) => return Ok(Some(true)),
            Some(false) => continue,
        }
    }
    Ok(Some(false))
}

fn check_value(sbbf: &Sbbf, physical: PhysicalType, value: &Value) -> Option<bool> {
    match physical {
        PhysicalType::BYTE_ARRAY => value.as_str().map(|s| sbbf.check(&ByteArray::from(s))),
        PhysicalType::INT64 => value.as_i64().map(|i| sbbf.check(&i)),
        PhysicalType::INT32 => value
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(|i| sbbf.check(&i)),
        _ => None,
    }
}

/// ChunkReader over a byte window, addressed by absolute file offset.
struct WindowChunkReader {
    window_start: u64,
    bytes: Bytes,
}

impl Length for WindowChunkReader {
    fn len(&self) -> u64 {
        self.window_start + self.bytes.len() as u64
    }
}

impl ChunkReader for WindowChunkReader {
    type T = bytes::buf::Reader<Bytes>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        use bytes::Buf;
        let rel = start
            .checked_sub(self.window_start)
            .ok_or_else(|| parquet::errors::ParquetError::EOF("offset before window".into()))?;
        if rel > self.bytes.len() as u64 {
            return Err(parquet::errors::ParquetError::EOF(
                "offset past window".into(),
            ));
        }
        Ok(self.bytes.slice(rel as usize..).reader())
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        let rel = start
            .checked_sub(self.window_start)
            .ok_or_else(|| parquet::errors::ParquetError::EOF("offset before window".into()))?
            as usize;
        let end = rel.saturating_add(length);
        if end > self.bytes.len() {
            return Err(parquet::errors::ParquetError::EOF(
                "range past window".into(),
            ));
        }
        Ok(self.bytes.slice(rel..end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WriterOptions;
    use crate::writer::write_table_inferred;
    use parquedb_storage::MemoryBuffer;
    use serde_json::json;

    fn buffer_from(bytes: Bytes) -> Arc<dyn AsyncBuffer> {
        Arc::new(MemoryBuffer::new(bytes))
    }

    #[tokio::test]
    async fn bloom_rules_out_absent_strings() {
        let rows: Vec<crate::rows::Row> = ["ada", "grace", "alan"]
            .iter()
            .map(|n| json!({"name": n}).as_object().unwrap().clone())
            .collect();
        let opts = WriterOptions {
            bloom_filters: true,
            ..WriterOptions::default()
        };
        let (bytes, _) = write_table_inferred(&rows, &opts).unwrap();
        let meta = parquet::file::metadata::ParquetMetaDataReader::new()
            .parse_and_finish(&bytes)
            .unwrap();
        let buffer = buffer_from(bytes);

        let present = Filter::new("name", FilterOp::Eq, json!("grace"));
        assert_eq!(
            row_group_passes_bloom(&buffer, meta.row_group(0), &present)
                .await
                .unwrap(),
            Some(true)
        );

        let absent = Filter::new("name", FilterOp::Eq, json!("linus"));
        assert_eq!(
            row_group_passes_bloom(&buffer, meta.row_group(0), &absent)
                .await
                .unwrap(),
            Some(false)
        );

        let any_in = Filter::new("name", FilterOp::In, json!(["linus", "ada"]));
        assert_eq!(
            row_group_passes_bloom(&buffer, meta.row_group(0), &any_in)
                .await
                .unwrap(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn no_bloom_filter_is_inconclusive() {
        let rows = vec![json!({"n": 1}).as_object().unwrap().clone()];
        let (bytes, _) = write_table_inferred(&rows, &WriterOptions::default()).unwrap();
        let meta = parquet::file::metadata::ParquetMetaDataReader::new()
            .parse_and_finish(&bytes)
            .unwrap();
        let buffer = buffer_from(bytes);

        let filter = Filter::new("n", FilterOp::Eq, json!(1));
        assert_eq!(
            row_group_passes_bloom(&buffer, meta.row_group(0), &filter)
                .await
                .unwrap(),
            None
        );
    }
}
