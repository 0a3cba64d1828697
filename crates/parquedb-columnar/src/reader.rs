//! Parquet reading over ranged byte access
//!
//! The reader never assumes a file is resident: footer, page and bloom bytes
//! are fetched through the AsyncBuffer seam as needed. Row-group pruning by
//! statistics (and bloom filters for eq/in) happens before any page is
//! touched; projection limits decoding to the requested columns; `stream`
//! yields rows in file order without materializing the result.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, TryStreamExt};
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions};
use parquet::arrow::async_reader::{
    AsyncFileReader, MetadataFetch, ParquetRecordBatchStream, ParquetRecordBatchStreamBuilder,
};
use parquet::arrow::ProjectionMask;
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};
use serde_json::Value;
use std::collections::VecDeque;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::bloom::row_group_passes_bloom;
use crate::error::{ColumnarError, Result};
use crate::filter::{matches_row, relevant_row_groups, Filter};
use crate::rows::{batch_to_rows, Row};
use parquedb_storage::{AsyncBuffer, BlobBuffer, BlobStore, MemoryBuffer, StorageError};

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Column projection; absent columns surface as nulls.
    pub columns: Option<Vec<String>>,
    pub filter: Option<Filter>,
    /// Applied after filtering, in file order.
    pub limit: Option<usize>,
    pub offset: usize,
    /// Explicit row-group selection; bypasses pruning.
    pub row_groups: Option<Vec<usize>>,
}

/// Parse just the footer of a file.
pub async fn read_metadata(buffer: &Arc<dyn AsyncBuffer>) -> Result<Arc<ParquetMetaData>> {
    let len = buffer.initialize().await?;
    let fetch = BufferFetch {
        buffer: buffer.clone(),
    };
    let meta = ParquetMetaDataReader::new()
        .load_and_finish(fetch, len)
        .await
        .map_err(|e| ColumnarError::Corruption(format!("footer unreadable: {e}")))?;
    Ok(Arc::new(meta))
}

/// One readable Parquet object.
pub struct ParquetSource {
    buffer: Arc<dyn AsyncBuffer>,
    metadata: tokio::sync::OnceCell<Arc<ParquetMetaData>>,
}

impl ParquetSource {
    pub fn new(buffer: Arc<dyn AsyncBuffer>) -> Self {
        Self {
            buffer,
            metadata: tokio::sync::OnceCell::new(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Arc::new(MemoryBuffer::new(bytes.into())))
    }

    /// Open a blob-storage object. A missing object is the domain error
    /// `DatasetNotFound`, never a generic failure.
    pub async fn open(store: &BlobStore, path: &str) -> Result<Self> {
        let buffer = BlobBuffer::open(store.clone(), path).await.map_err(|e| match e {
            StorageError::NotFound { path } => ColumnarError::DatasetNotFound { path },
            other => ColumnarError::Storage(other),
        })?;
        Ok(Self::new(Arc::new(buffer)))
    }

    pub async fn metadata(&self) -> Result<Arc<ParquetMetaData>> {
        self.metadata
            .get_or_try_init(|| read_metadata(&self.buffer))
            .await
            .cloned()
    }

    /// Row groups that may satisfy `filter`: statistics pruning first, bloom
    /// refinement second. Pure given the same file and filter.
    pub async fn relevant_row_groups(&self, filter: &Filter) -> Result<Vec<usize>> {
        let meta = self.metadata().await?;
        let mut selected = relevant_row_groups(&meta, filter);

        let mut refined = Vec::with_capacity(selected.len());
        for idx in selected.drain(..) {
            match row_group_passes_bloom(&self.buffer, meta.row_group(idx), filter).await? {
                Some(false) => {
                    tracing::debug!("bloom filter pruned row group {}", idx);
                }
                _ => refined.push(idx),
            }
        }
        Ok(refined)
    }

    /// Materialize matching rows.
    pub async fn read(&self, opts: ReadOptions) -> Result<Vec<Row>> {
        self.stream(opts).await?.try_collect().await
    }

    /// Read specific row groups in full.
    pub async fn read_row_groups(&self, indices: &[usize]) -> Result<Vec<Row>> {
        let meta = self.metadata().await?;
        for &idx in indices {
            if idx >= meta.num_row_groups() {
                return Err(ColumnarError::InvalidInput(format!(
                    "row group {idx} out of range ({} groups)",
                    meta.num_row_groups()
                )));
            }
        }
        self.read(ReadOptions {
            row_groups: Some(indices.to_vec()),
            ..ReadOptions::default()
        })
        .await
    }

    /// Lazy row stream; rows decode one batch at a time as the consumer
    /// pulls.
    pub async fn stream(&self, opts: ReadOptions) -> Result<RowStream> {
        let meta = self.metadata().await?;

        let groups = match &opts.row_groups {
            Some(explicit) => {
                for &idx in explicit {
                    if idx >= meta.num_row_groups() {
                        return Err(ColumnarError::InvalidInput(format!(
                            "row group {idx} out of range ({} groups)",
                            meta.num_row_groups()
                        )));
                    }
                }
                explicit.clone()
            }
            None => match &opts.filter {
                Some(filter) => self.relevant_row_groups(filter).await?,
                None => (0..meta.num_row_groups()).collect(),
            },
        };

        let arrow_meta = ArrowReaderMetadata::try_new(meta.clone(), ArrowReaderOptions::new())?;
        let reader = BufferReader {
            buffer: self.buffer.clone(),
            metadata: Some(meta.clone()),
        };
        let mut builder = ParquetRecordBatchStreamBuilder::new_with_metadata(reader, arrow_meta);

        let mut missing = Vec::new();
        if let Some(columns) = &opts.columns {
            let schema = builder.schema().clone();
            let mut indices = Vec::new();
            for name in columns {
                match schema.index_of(name) {
                    Ok(idx) => indices.push(idx),
                    Err(_) => missing.push(name.clone()),
                }
            }
            let mask = ProjectionMask::roots(meta.file_metadata().schema_descr(), indices);
            builder = builder.with_projection(mask);
        }

        let inner = builder.with_row_groups(groups).build()?;
        Ok(RowStream {
            inner,
            pending: VecDeque::new(),
            filter: opts.filter,
            missing,
            to_skip: opts.offset,
            remaining: opts.limit,
        })
    }
}

/// AsyncFileReader over the AsyncBuffer seam.
struct BufferReader {
    buffer: Arc<dyn AsyncBuffer>,
    metadata: Option<Arc<ParquetMetaData>>,
}

fn to_parquet_err(e: StorageError) -> parquet::errors::ParquetError {
    parquet::errors::ParquetError::External(Box::new(e))
}

impl AsyncFileReader for BufferReader {
    fn get_bytes(&mut self, range: Range<u64>) -> BoxFuture<'_, parquet::errors::Result<Bytes>> {
        let buffer = self.buffer.clone();
        async move {
            buffer
                .slice(range.start, Some(range.end))
                .await
                .map_err(to_parquet_err)
        }
        .boxed()
    }

    fn get_metadata<'a>(
        &'a mut self,
        _options: Option<&'a ArrowReaderOptions>,
    ) -> BoxFuture<'a, parquet::errors::Result<Arc<ParquetMetaData>>> {
        match &self.metadata {
            Some(meta) => {
                let meta = meta.clone();
                async move { Ok(meta) }.boxed()
            }
            None => {
                let buffer = self.buffer.clone();
                async move {
                    let len = buffer.initialize().await.map_err(to_parquet_err)?;
                    let fetch = BufferFetch { buffer };
                    let meta = ParquetMetaDataReader::new().load_and_finish(fetch, len).await?;
                    Ok(Arc::new(meta))
                }
                .boxed()
            }
        }
    }
}

struct BufferFetch {
    buffer: Arc<dyn AsyncBuffer>,
}

impl MetadataFetch for BufferFetch {
    fn fetch(&mut self, range: Range<u64>) -> BoxFuture<'_, parquet::errors::Result<Bytes>> {
        let buffer = self.buffer.clone();
        async move {
            buffer
                .slice(range.start, Some(range.end))
                .await
                .map_err(to_parquet_err)
        }
        .boxed()
    }
}

/// Lazy stream of filtered, projected rows.
pub struct RowStream {
    inner: ParquetRecordBatchStream<BufferReader>,
    pending: VecDeque<Row>,
    filter: Option<Filter>,
    /// Projected columns absent from the file; surfaced as nulls.
    missing: Vec<String>,
    to_skip: usize,
    remaining: Option<usize>,
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.remaining == Some(0) {
                return Poll::Ready(None);
            }
            if let Some(row) = this.pending.pop_front() {
                if let Some(remaining) = &mut this.remaining {
                    *remaining -= 1;
                }
                return Poll::Ready(Some(Ok(row)));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e.into()))),
                Poll::Ready(Some(Ok(batch))) => {
                    let rows = match batch_to_rows(&batch) {
                        Ok(rows) => rows,
                        Err(e) => return Poll::Ready(Some(Err(e))),
                    };
                    for mut row in rows {
                        if let Some(filter) = &this.filter {
                            if !matches_row(&row, filter) {
                                continue;
                            }
                        }
                        if this.to_skip > 0 {
                            this.to_skip -= 1;
                            continue;
                        }
                        for name in &this.missing {
                            row.insert(name.clone(), Value::Null);
                        }
                        this.pending.push_back(row);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::options::{Codec, WriterOptions};
    use crate::writer::write_table_inferred;
    use futures::StreamExt;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    fn people_bytes(codec: Codec) -> Bytes {
        let rows = vec![
            row(json!({"id": "1", "name": "A", "age": 30})),
            row(json!({"id": "2", "name": null, "age": 25})),
        ];
        let opts = WriterOptions {
            codec,
            ..WriterOptions::default()
        };
        write_table_inferred(&rows, &opts).unwrap().0
    }

    #[tokio::test]
    async fn filtered_read_with_snappy() {
        let source = ParquetSource::from_bytes(people_bytes(Codec::Snappy));
        let rows = source
            .read(ReadOptions {
                filter: Some(Filter::new("age", FilterOp::Gte, json!(26))),
                ..ReadOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("1"));
        assert_eq!(rows[0]["name"], json!("A"));
        assert_eq!(rows[0]["age"], json!(30));
    }

    #[tokio::test]
    async fn projection_limits_columns_and_fills_missing() {
        let source = ParquetSource::from_bytes(people_bytes(Codec::Snappy));
        let rows = source
            .read(ReadOptions {
                columns: Some(vec!["id".to_string(), "ghost".to_string()]),
                ..ReadOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!("1"));
        assert_eq!(rows[0]["ghost"], Value::Null);
        assert!(!rows[0].contains_key("age"));
    }

    #[tokio::test]
    async fn limit_and_offset_apply_after_filter() {
        let rows: Vec<Row> = (0..10).map(|i| row(json!({"n": i}))).collect();
        let (bytes, _) = write_table_inferred(&rows, &WriterOptions::default()).unwrap();
        let source = ParquetSource::from_bytes(bytes);

        let out = source
            .read(ReadOptions {
                filter: Some(Filter::new("n", FilterOp::Gte, json!(4))),
                offset: 2,
                limit: Some(3),
                ..ReadOptions::default()
            })
            .await
            .unwrap();
        let ns: Vec<i64> = out.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, [6, 7, 8]);
    }

    #[tokio::test]
    async fn stream_yields_rows_lazily_in_file_order() {
        let rows: Vec<Row> = (0..6).map(|i| row(json!({"n": i}))).collect();
        let opts = WriterOptions {
            row_group_size: 2,
            ..WriterOptions::default()
        };
        let (bytes, _) = write_table_inferred(&rows, &opts).unwrap();
        let source = ParquetSource::from_bytes(bytes);

        let mut stream = source.stream(ReadOptions::default()).await.unwrap();
        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(item.unwrap()["n"].as_i64().unwrap());
        }
        assert_eq!(seen, [0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn read_specific_row_groups() {
        let rows: Vec<Row> = (0..6).map(|i| row(json!({"n": i}))).collect();
        let opts = WriterOptions {
            row_group_size: 2,
            ..WriterOptions::default()
        };
        let (bytes, result) = write_table_inferred(&rows, &opts).unwrap();
        assert_eq!(result.row_group_count, 3);
        let source = ParquetSource::from_bytes(bytes);

        let out = source.read_row_groups(&[1]).await.unwrap();
        let ns: Vec<i64> = out.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, [2, 3]);

        assert!(matches!(
            source.read_row_groups(&[9]).await,
            Err(ColumnarError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn pruning_skips_groups_before_decode() {
        let rows: Vec<Row> = [20, 30, 40, 50]
            .iter()
            .map(|age| row(json!({"age": age})))
            .collect();
        let opts = WriterOptions {
            row_group_size: 2,
            ..WriterOptions::default()
        };
        let (bytes, _) = write_table_inferred(&rows, &opts).unwrap();
        let source = ParquetSource::from_bytes(bytes);

        let groups = source
            .relevant_row_groups(&Filter::new("age", FilterOp::Eq, json!(25)))
            .await
            .unwrap();
        assert_eq!(groups, vec![0]);

        let groups = source
            .relevant_row_groups(&Filter::new("age", FilterOp::Gt, json!(45)))
            .await
            .unwrap();
        assert_eq!(groups, vec![1]);

        // No statistics for this column name: include everything
        let groups = source
            .relevant_row_groups(&Filter::new("ghost", FilterOp::Eq, json!(1)))
            .await
            .unwrap();
        assert_eq!(groups, vec![0, 1]);
    }

    #[tokio::test]
    async fn bloom_refines_eq_pruning() {
        let rows: Vec<Row> = ["ada", "grace"]
            .iter()
            .map(|n| row(json!({"name": n})))
            .collect();
        let opts = WriterOptions {
            bloom_filters: true,
            ..WriterOptions::default()
        };
        let (bytes, _) = write_table_inferred(&rows, &opts).unwrap();
        let source = ParquetSource::from_bytes(bytes);

        // Statistics alone cannot rule out "alan" (it sorts inside [ada, grace])
        let groups = source
            .relevant_row_groups(&Filter::new("name", FilterOp::Eq, json!("alan")))
            .await
            .unwrap();
        assert_eq!(groups, Vec::<usize>::new());

        let groups = source
            .relevant_row_groups(&Filter::new("name", FilterOp::Eq, json!("grace")))
            .await
            .unwrap();
        assert_eq!(groups, vec![0]);
    }

    #[tokio::test]
    async fn missing_object_is_dataset_not_found() {
        let store = BlobStore::memory().unwrap();
        match ParquetSource::open(&store, "data/none/data.parquet").await {
            Err(ColumnarError::DatasetNotFound { path }) => {
                assert_eq!(path, "data/none/data.parquet")
            }
            other => panic!("expected DatasetNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_file_reads_as_empty() {
        let (bytes, _) = write_table_inferred(&[], &WriterOptions::default()).unwrap();
        let source = ParquetSource::from_bytes(bytes);
        let rows = source.read(ReadOptions::default()).await.unwrap();
        assert!(rows.is_empty());
    }
}
