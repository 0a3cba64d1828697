//! Database wiring
//!
//! Builds a shard and its collaborators from a `RuntimeConfig` and exposes
//! the write-engine method set plus `find`. One `Database` is one shard;
//! callers wanting more shards open more databases over disjoint
//! namespaces.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use parquedb_cache::{CacheInvalidator, CacheStrategy};
use parquedb_columnar::{infer_write_schema, write_table, Codec, WriterOptions};
use parquedb_engine::{
    CreateOptions, DeleteOptions, DeleteResult, Entity, FlushThresholds, LinkOptions,
    Relationship, RelationshipDirection, Shard, ShardOptions, UpdateDoc, UpdateOptions, Wal,
};
use parquedb_query::{FindOptions, FindResult, MemoryQueryCache, QueryExecutor};
use parquedb_storage::BlobStore;
use parquedb_stream::{BatchThresholds, StreamView, TailProcessor, ViewSink};

use crate::config::{RuntimeConfig, StorageBackend};

pub struct Database {
    shard: Arc<Shard>,
    executor: QueryExecutor,
    strategy: CacheStrategy,
    tail: Arc<TailProcessor>,
}

impl Database {
    /// Open a shard over the configured storage, recover from its WAL, and
    /// wire the read path.
    pub async fn open(config: RuntimeConfig) -> Result<Self> {
        let store = build_store(&config)?;

        let wal = match &config.wal.path {
            Some(path) => Wal::open(path)
                .with_context(|| format!("failed to open WAL sidecar at '{path}'"))?,
            None => Wal::in_memory().context("failed to open in-memory WAL")?,
        };

        let writer = WriterOptions {
            codec: Codec::parse(&config.engine.codec).unwrap_or_default(),
            row_group_size: config.engine.row_group_size,
            ..WriterOptions::default()
        };
        let shard = Arc::new(Shard::new(
            Arc::new(wal),
            store.clone(),
            Arc::new(CacheInvalidator::new()),
            ShardOptions {
                flush: FlushThresholds {
                    max_events: config.engine.flush_max_events,
                    max_bytes: config.engine.flush_max_bytes,
                },
                entity_cache_size: config.engine.entity_cache_size,
                writer,
            },
        ));
        shard.recover().await.context("WAL recovery failed")?;

        let tail = Arc::new(TailProcessor::new(
            Arc::new(ViewStorageSink { store }),
            BatchThresholds::default(),
        ));
        shard.attach_tail_processor(tail.clone());

        let strategy = CacheStrategy::from_env().with_ttl_overrides(
            config.cache.data_ttl,
            config.cache.metadata_ttl,
            config.cache.bloom_ttl,
            config.cache.stale_while_revalidate,
        );

        let executor =
            QueryExecutor::new(shard.clone()).with_cache(Arc::new(MemoryQueryCache::default()));

        Ok(Self {
            shard,
            executor,
            strategy,
            tail,
        })
    }

    pub fn shard(&self) -> &Arc<Shard> {
        &self.shard
    }

    pub fn strategy(&self) -> &CacheStrategy {
        &self.strategy
    }

    pub fn invalidator(&self) -> &Arc<CacheInvalidator> {
        self.shard.invalidator()
    }

    /// Register a materialized view over the event tail.
    pub fn register_view(&self, view: StreamView) -> bool {
        self.tail.register(view)
    }

    // -- write-engine surface --

    pub async fn create(&self, ns: &str, doc: Value, opts: &CreateOptions) -> parquedb_engine::Result<Entity> {
        self.shard.create(ns, doc, opts).await
    }

    pub async fn create_many(
        &self,
        ns: &str,
        items: Vec<Value>,
        opts: &CreateOptions,
    ) -> parquedb_engine::Result<Vec<Entity>> {
        self.shard.create_many(ns, items, opts).await
    }

    pub fn get(&self, ns: &str, id: &str, include_deleted: bool) -> parquedb_engine::Result<Option<Entity>> {
        self.shard.get(ns, id, include_deleted)
    }

    pub async fn update(
        &self,
        ns: &str,
        id: &str,
        ops: UpdateDoc,
        opts: &UpdateOptions,
    ) -> parquedb_engine::Result<Entity> {
        self.shard.update(ns, id, ops, opts).await
    }

    pub async fn delete(
        &self,
        ns: &str,
        id: &str,
        opts: &DeleteOptions,
    ) -> parquedb_engine::Result<DeleteResult> {
        self.shard.delete(ns, id, opts).await
    }

    pub async fn restore(&self, ns: &str, id: &str, actor: &str) -> parquedb_engine::Result<Entity> {
        self.shard.restore(ns, id, actor).await
    }

    pub async fn link(
        &self,
        from: &str,
        predicate: &str,
        to: &str,
        opts: &LinkOptions,
    ) -> parquedb_engine::Result<Relationship> {
        self.shard.link(from, predicate, to, opts).await
    }

    pub async fn unlink(
        &self,
        from: &str,
        predicate: &str,
        to: &str,
        actor: &str,
    ) -> parquedb_engine::Result<DeleteResult> {
        self.shard.unlink(from, predicate, to, actor).await
    }

    pub fn get_relationships(
        &self,
        ns: &str,
        id: &str,
        predicate: Option<&str>,
        direction: RelationshipDirection,
    ) -> Vec<Relationship> {
        self.shard.get_relationships(ns, id, predicate, direction)
    }

    // -- read surface --

    pub async fn find(
        &self,
        ns: &str,
        filter: &Value,
        opts: &FindOptions,
    ) -> parquedb_engine::Result<FindResult> {
        self.executor.find(ns, filter, opts).await
    }

    // -- maintenance --

    pub fn flush_all(&self) -> parquedb_engine::Result<usize> {
        self.shard.flush_all()
    }

    pub async fn checkpoint_all(&self) -> parquedb_engine::Result<usize> {
        self.shard.flush_all()?;
        let count = self.shard.checkpoint_all().await?;
        self.tail.flush().await;
        Ok(count)
    }
}

fn build_store(config: &RuntimeConfig) -> Result<BlobStore> {
    match config.storage.backend {
        StorageBackend::Memory => BlobStore::memory().context("memory store"),
        #[cfg(feature = "services-fs")]
        StorageBackend::Fs => {
            let fs = config
                .storage
                .fs
                .as_ref()
                .context("fs config required for filesystem backend")?;
            BlobStore::fs(&fs.path).context("filesystem store")
        }
        #[cfg(not(feature = "services-fs"))]
        StorageBackend::Fs => {
            anyhow::bail!("filesystem backend requires the 'services-fs' feature")
        }
        #[cfg(feature = "services-s3")]
        StorageBackend::S3 => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .context("s3 config required for S3 backend")?;
            BlobStore::s3(&s3.bucket, &s3.region, s3.endpoint.as_deref()).context("s3 store")
        }
        #[cfg(not(feature = "services-s3"))]
        StorageBackend::S3 => anyhow::bail!("S3 backend requires the 'services-s3' feature"),
    }
}

/// Sink that materializes view batches as Parquet under `views/<view>/`.
struct ViewStorageSink {
    store: BlobStore,
}

#[async_trait]
impl ViewSink for ViewStorageSink {
    async fn emit(&self, view: &str, records: &[Value]) -> std::result::Result<(), String> {
        let rows: Vec<parquedb_columnar::Row> = records
            .iter()
            .filter_map(|r| r.as_object().cloned())
            .collect();
        if rows.is_empty() {
            return Ok(());
        }

        let path = format!("views/{view}/data.parquet");
        let existing = match self.store.get(&path).await {
            Ok(bytes) => Some(bytes),
            Err(parquedb_storage::StorageError::NotFound { .. }) => None,
            Err(e) => return Err(e.to_string()),
        };

        // Infer over old + new rows so late fields widen the schema
        let mut all = match &existing {
            Some(bytes) => {
                parquedb_columnar::read_all_rows_sync(bytes).map_err(|e| e.to_string())?
            }
            None => Vec::new(),
        };
        all.extend(rows);
        let schema = infer_write_schema(&all);
        let (bytes, _) =
            write_table(&schema, &all, &WriterOptions::default()).map_err(|e| e.to_string())?;
        self.store.put(&path, bytes).await.map_err(|e| e.to_string())?;
        Ok(())
    }
}
