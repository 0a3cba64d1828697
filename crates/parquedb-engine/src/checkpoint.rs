//! Checkpoint materialization
//!
//! A checkpoint turns the WAL's event batches for one namespace into the
//! Parquet artifact at `data/<ns>/data.parquet`, then trims the covered WAL
//! rows. Append has compact semantics: the existing artifact is read in
//! full, the events are folded on top, and the whole file is rewritten.
//! Re-running a checkpoint over the same inputs produces the same artifact.
//!
//! Entity rows shred the audit columns (plus any schema-declared fields)
//! for predicate push-down and carry the complete entity as Variant bytes
//! in `$data`, which is the authoritative lossless record.

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef, TimeUnit};
use base64::Engine as _;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use parquedb_columnar::{read_all_rows_sync, write_table, Row};
use parquedb_schema::{mapped_type, FieldDef, FieldType, Schema};
use parquedb_variant::Variant;

use crate::entity::{decode_entity_seq, Entity, Relationship};
use crate::error::{EngineError, Result};
use crate::event::{apply_entity_event, apply_rel_event};
use crate::shard::Shard;
use crate::wal::CheckpointRow;

pub type CheckpointRecord = CheckpointRow;

pub fn data_path(ns: &str) -> String {
    format!("data/{ns}/data.parquet")
}

pub fn rels_forward_path(ns: &str) -> String {
    format!("rels/forward/{ns}.parquet")
}

pub fn rels_reverse_path(ns: &str) -> String {
    format!("rels/reverse/{ns}.parquet")
}

/// Arrow schema of a namespace data file: audit columns, `$data`, and the
/// schema-declared shred columns.
pub fn entity_schema(shred: &[(String, FieldType)]) -> SchemaRef {
    let ts = || DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()));
    let mut fields = vec![
        Field::new("$id", DataType::Utf8, false),
        Field::new("$type", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("createdAt", ts(), false),
        Field::new("createdBy", DataType::Utf8, false),
        Field::new("updatedAt", ts(), false),
        Field::new("updatedBy", DataType::Utf8, false),
        Field::new("deletedAt", ts(), true),
        Field::new("deletedBy", DataType::Utf8, true),
        Field::new("version", DataType::Int64, false),
        Field::new("$data", DataType::Binary, false),
    ];
    for (name, field_type) in shred {
        if fields.iter().any(|f| f.name() == name) {
            continue;
        }
        fields.push(Field::new(name, mapped_type(field_type).data_type, true));
    }
    Arc::new(ArrowSchema::new(fields))
}

/// Flatten an entity into a Parquet row.
pub fn entity_to_row(entity: &Entity, shred: &[(String, FieldType)]) -> Result<Row> {
    let variant = Variant::from_json(&entity.to_json());
    let data_bytes = parquedb_variant::encode(&variant)
        .map_err(|e| EngineError::Fatal(format!("entity not variant-encodable: {e}")))?;

    let mut row = Row::new();
    row.insert("$id".to_string(), Value::String(entity.id.clone()));
    row.insert("$type".to_string(), Value::String(entity.entity_type.clone()));
    row.insert("name".to_string(), Value::String(entity.name.clone()));
    row.insert("createdAt".to_string(), Value::from(entity.created_at));
    row.insert("createdBy".to_string(), Value::String(entity.created_by.clone()));
    row.insert("updatedAt".to_string(), Value::from(entity.updated_at));
    row.insert("updatedBy".to_string(), Value::String(entity.updated_by.clone()));
    row.insert(
        "deletedAt".to_string(),
        entity.deleted_at.map(Value::from).unwrap_or(Value::Null),
    );
    row.insert(
        "deletedBy".to_string(),
        entity
            .deleted_by
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    row.insert("version".to_string(), Value::from(entity.version));
    row.insert(
        "$data".to_string(),
        Value::String(base64::engine::general_purpose::STANDARD.encode(&data_bytes)),
    );

    for (name, _) in shred {
        if !row.contains_key(name) {
            row.insert(
                name.clone(),
                entity.data.get(name).cloned().unwrap_or(Value::Null),
            );
        }
    }
    Ok(row)
}

/// Rebuild the full entity from a row's `$data` column.
pub fn row_to_entity(row: &Row) -> Option<Entity> {
    let encoded = row.get("$data")?.as_str()?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let variant = parquedb_variant::decode(&bytes).ok()?;
    serde_json::from_value(variant.to_json()).ok()
}

fn rel_to_row(rel: &Relationship) -> Result<Row> {
    let variant = Variant::from_json(&rel.to_json());
    let data_bytes = parquedb_variant::encode(&variant)
        .map_err(|e| EngineError::Fatal(format!("relationship not variant-encodable: {e}")))?;

    let mut row = Row::new();
    row.insert("fromNs".to_string(), Value::String(rel.from_ns.clone()));
    row.insert("fromId".to_string(), Value::String(rel.from_id.clone()));
    row.insert("predicate".to_string(), Value::String(rel.predicate.clone()));
    row.insert("reverse".to_string(), Value::String(rel.reverse.clone()));
    row.insert("toNs".to_string(), Value::String(rel.to_ns.clone()));
    row.insert("toId".to_string(), Value::String(rel.to_id.clone()));
    row.insert(
        "deletedAt".to_string(),
        rel.deleted_at.map(Value::from).unwrap_or(Value::Null),
    );
    row.insert("version".to_string(), Value::from(rel.version));
    row.insert(
        "$data".to_string(),
        Value::String(base64::engine::general_purpose::STANDARD.encode(&data_bytes)),
    );
    Ok(row)
}

pub fn row_to_relationship(row: &Row) -> Option<Relationship> {
    let encoded = row.get("$data")?.as_str()?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let variant = parquedb_variant::decode(&bytes).ok()?;
    serde_json::from_value(variant.to_json()).ok()
}

fn rel_schema() -> SchemaRef {
    let ts = || DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()));
    Arc::new(ArrowSchema::new(vec![
        Field::new("fromNs", DataType::Utf8, false),
        Field::new("fromId", DataType::Utf8, false),
        Field::new("predicate", DataType::Utf8, false),
        Field::new("reverse", DataType::Utf8, false),
        Field::new("toNs", DataType::Utf8, false),
        Field::new("toId", DataType::Utf8, false),
        Field::new("deletedAt", ts(), true),
        Field::new("version", DataType::Int64, false),
        Field::new("$data", DataType::Binary, false),
    ]))
}

/// Shred columns declared by a namespace's registered schema: every scalar
/// field named in a `$shred` list, across all types.
pub fn shred_columns(schema: Option<&Schema>) -> Vec<(String, FieldType)> {
    let Some(schema) = schema else {
        return Vec::new();
    };
    let mut out: Vec<(String, FieldType)> = Vec::new();
    for type_def in &schema.types {
        for field_name in schema.resolved_shred_fields(&type_def.name) {
            if out.iter().any(|(name, _)| *name == field_name) {
                continue;
            }
            let resolved = schema.resolved_fields(&type_def.name);
            if let Some((_, FieldDef::Scalar(field_type))) =
                resolved.iter().find(|(name, _)| *name == field_name)
            {
                out.push((field_name, (*field_type).clone()));
            }
        }
    }
    out
}

impl Shard {
    /// Materialize the namespace's WAL into its Parquet artifact and trim
    /// the covered rows. Returns `None` when there is nothing to cover.
    pub async fn checkpoint(&self, ns: &str) -> Result<Option<CheckpointRecord>> {
        let batches = self.wal().event_batches(ns)?;
        if batches.is_empty() {
            return Ok(None);
        }
        let high_water = batches.iter().map(|b| b.last_seq).max().unwrap_or(0);
        let events: Vec<_> = batches.into_iter().flat_map(|b| b.events).collect();
        let event_count = events.len() as u64;
        let first_event_id = events.first().map(|e| e.id.clone()).unwrap_or_default();
        let last_event_id = events.last().map(|e| e.id.clone()).unwrap_or_default();

        let path = data_path(ns);
        // Read-all, overlay, rewrite-all: append has compact semantics
        let mut entities: BTreeMap<u64, (String, Entity)> = BTreeMap::new();
        match self.store().get(&path).await {
            Ok(bytes) => {
                for row in read_all_rows_sync(&bytes)? {
                    if let Some(entity) = row_to_entity(&row) {
                        let local = entity.local_id().to_string();
                        entities.insert(sort_key(&local), (local, entity));
                    }
                }
            }
            Err(parquedb_storage::StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        for event in &events {
            let Some((_, local_id)) = event.target.split_once(':') else {
                continue;
            };
            let key = sort_key(local_id);
            let prior = entities.remove(&key).map(|(_, e)| e);
            if let Some(entity) = apply_entity_event(prior, event) {
                entities.insert(key, (local_id.to_string(), entity));
            }
        }

        let schema_doc = self.schema_for(ns);
        let shred = shred_columns(schema_doc.as_ref());
        let schema = entity_schema(&shred);
        let rows: Vec<Row> = entities
            .values()
            .map(|(_, entity)| entity_to_row(entity, &shred))
            .collect::<Result<_>>()?;

        let mut opts = self.options().writer.clone();
        opts.key_value_metadata
            .push(("parquedb.ns".to_string(), ns.to_string()));
        let (bytes, result) = write_table(&schema, &rows, &opts)?;
        self.store().put(&path, bytes).await?;

        // The id high-water must survive hard deletes, so fold in the event
        // targets and the previous checkpoint as well.
        let last_entity_seq = entities
            .values()
            .filter_map(|(local, _)| decode_entity_seq(local))
            .chain(events.iter().filter_map(|e| {
                e.target.split_once(':').and_then(|(_, id)| decode_entity_seq(id))
            }))
            .chain(
                self.wal()
                    .latest_checkpoint(ns)?
                    .map(|c| c.last_entity_seq),
            )
            .max()
            .unwrap_or(0);

        let record = CheckpointRow {
            ts: chrono::Utc::now().timestamp_millis(),
            ns: ns.to_string(),
            event_count,
            first_event_id,
            last_event_id,
            parquet_path: path.clone(),
            last_seq: high_water,
            last_entity_seq,
        };
        self.wal().record_checkpoint(&record)?;
        self.wal().delete_events_up_to(ns, high_water)?;
        self.wal().delete_pending_up_to(ns, high_water)?;

        tracing::info!(
            "checkpointed ns '{}': {} events into {} rows at '{}' (etag {})",
            ns,
            event_count,
            result.row_count,
            path,
            &result.etag[..12],
        );
        Ok(Some(record))
    }

    /// Materialize relationship state into the forward and reverse
    /// artifacts and trim the relationship WAL.
    pub async fn checkpoint_relationships(&self, ns: &str) -> Result<Option<u64>> {
        let batches = self.wal().rel_batches(ns)?;
        if batches.is_empty() {
            return Ok(None);
        }
        let high_water = batches.iter().map(|b| b.last_seq).max().unwrap_or(0);

        // Fold over the existing forward artifact
        let forward_path = rels_forward_path(ns);
        let mut edges: BTreeMap<String, Relationship> = BTreeMap::new();
        match self.store().get(&forward_path).await {
            Ok(bytes) => {
                for row in read_all_rows_sync(&bytes)? {
                    if let Some(rel) = row_to_relationship(&row) {
                        edges.insert(rel.key().target(), rel);
                    }
                }
            }
            Err(parquedb_storage::StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        for batch in &batches {
            for event in &batch.events {
                let prior = edges.remove(&event.target);
                if let Some(rel) = apply_rel_event(prior, event) {
                    edges.insert(event.target.clone(), rel);
                }
            }
        }

        let schema = rel_schema();
        let forward_rows: Vec<Row> = edges.values().map(rel_to_row).collect::<Result<_>>()?;

        let mut reverse: Vec<&Relationship> = edges.values().collect();
        reverse.sort_by(|a, b| {
            (&a.to_ns, &a.to_id, &a.predicate, &a.from_ns, &a.from_id)
                .cmp(&(&b.to_ns, &b.to_id, &b.predicate, &b.from_ns, &b.from_id))
        });
        let reverse_rows: Vec<Row> = reverse
            .into_iter()
            .map(rel_to_row)
            .collect::<Result<_>>()?;

        let opts = self.options().writer.clone();
        let (forward_bytes, _) = write_table(&schema, &forward_rows, &opts)?;
        let (reverse_bytes, _) = write_table(&schema, &reverse_rows, &opts)?;
        self.store().put(&forward_path, forward_bytes).await?;
        self.store()
            .put(&rels_reverse_path(ns), reverse_bytes)
            .await?;

        self.wal().delete_rels_up_to(ns, high_water)?;
        tracing::info!(
            "checkpointed relationships for ns '{}': {} edges (through seq {})",
            ns,
            edges.len(),
            high_water
        );
        Ok(Some(high_water))
    }

    /// Checkpoint every namespace with WAL rows, entities then
    /// relationships.
    pub async fn checkpoint_all(&self) -> Result<usize> {
        let namespaces = self.wal().namespaces()?;
        let mut count = 0;
        for ns in namespaces {
            if self.checkpoint(&ns).await?.is_some() {
                count += 1;
            }
            self.checkpoint_relationships(&ns).await?;
        }
        Ok(count)
    }

    /// Load checkpointed relationship state back into the live index; part
    /// of `recover`.
    pub(crate) async fn load_rel_artifacts(&self, ns: &str) -> Result<Vec<Relationship>> {
        match self.store().get(&rels_forward_path(ns)).await {
            Ok(bytes) => {
                let mut rels = Vec::new();
                for row in read_all_rows_sync(&bytes)? {
                    if let Some(rel) = row_to_relationship(&row) {
                        rels.push(rel);
                    }
                }
                Ok(rels)
            }
            Err(parquedb_storage::StorageError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

// Entities sort by allocation order; foreign ids sort after, by hash.
fn sort_key(local_id: &str) -> u64 {
    decode_entity_seq(local_id).unwrap_or_else(|| {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in local_id.bytes() {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x1000_0000_01b3);
        }
        (1 << 60) | (hash >> 4)
    })
}
