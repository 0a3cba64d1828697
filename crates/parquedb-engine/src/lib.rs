// parquedb-engine - Per-shard write engine
//
// One shard is the single writer for its namespaces. Writes append events to
// in-memory buffers, spill to a durable WAL sidecar at count/byte
// thresholds, and are periodically checkpointed into Parquet artifacts on
// blob storage. Entity state is never stored mutably: it is the fold of the
// event log, cached in a bounded LRU. Transactions snapshot the in-process
// state and restore it on rollback.

mod buffer;
mod checkpoint;
mod entity;
mod error;
mod event;
mod shard;
mod update;
mod wal;

pub use buffer::{EventBuffer, FlushThresholds};
pub use checkpoint::{
    data_path, entity_schema, entity_to_row, rels_forward_path, rels_reverse_path, row_to_entity,
    row_to_relationship, shred_columns, CheckpointRecord,
};
pub use entity::{
    decode_entity_seq, encode_entity_id, parse_entity_ref, EdgeKey, Entity, MatchMode,
    Relationship, RelationshipDirection,
};
pub use error::{EngineError, Result};
pub use event::{apply_entity_event, apply_rel_event, Event, EventBatch, EventOp};
pub use shard::{
    CreateOptions, DeleteOptions, DeleteResult, LinkOptions, Shard, ShardOptions, UpdateOptions,
};
pub use update::UpdateDoc;
pub use wal::Wal;
