// parquedb - Hybrid entity/graph database over Parquet
//
// Authoritative state is an append-only event log, periodically
// materialized into columnar Parquet artifacts on blob storage; reads are
// served from those artifacts through a tiered cache with the
// uncheckpointed WAL replayed on top. This facade wires the pieces together
// and re-exports the public surface of the member crates.

pub mod config;
mod database;
pub mod params;

pub use config::RuntimeConfig;
pub use database::Database;

pub use parquedb_cache::{
    invalidation_paths, CacheInvalidator, CacheStore, CacheStrategy, ContentType,
    InvalidationSignal, InvalidationType, Preset, WriteOp,
};
pub use parquedb_columnar::{
    Codec, ColumnarError, Filter, FilterOp, ParquetSource, ReadOptions, WriteResult, WriterOptions,
};
pub use parquedb_engine::{
    CreateOptions, DeleteOptions, DeleteResult, EngineError, Entity, Event, EventOp,
    FlushThresholds, LinkOptions, MatchMode, Relationship, RelationshipDirection, Shard,
    ShardOptions, UpdateDoc, UpdateOptions, Wal,
};
pub use parquedb_query::{
    CacheTier, FindOptions, FindResult, Projection, QueryExecutor, QueryStats, SortDir,
    TieredCache,
};
pub use parquedb_schema::{infer_schema, parse_schema, Schema, SchemaError};
pub use parquedb_storage::{AsyncBuffer, BlobStore, MemoryKv, SharedKv, StorageError};
pub use parquedb_stream::{
    BatchThresholds, ProcessResult, RefreshMode, StreamView, TailProcessor, ViewSink,
};
pub use parquedb_token::{TokenKind, TokenPayload, TokenService};
pub use parquedb_variant::{decode as variant_decode, encode as variant_encode, Variant};
