//! The single-writer shard
//!
//! All writes for a shard's namespaces serialize through this type. State
//! lives in one lock: per-namespace id and sequence counters, event buffers,
//! the bounded entity cache and the live relationship index. The lock is
//! never held across an await; durable WAL writes are synchronous and
//! ordered before the invalidation signal, which is ordered before the
//! method returns.

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parquedb_cache::{CacheInvalidator, InvalidationType};
use parquedb_columnar::WriterOptions;
use parquedb_schema::Schema;
use parquedb_storage::BlobStore;
use parquedb_stream::TailProcessor;

use crate::buffer::{EventBuffer, FlushThresholds};
use crate::entity::{
    encode_entity_id, parse_entity_ref, EdgeKey, Entity, MatchMode, Relationship,
    RelationshipDirection,
};
use crate::error::{EngineError, Result};
use crate::event::{
    apply_entity_event, apply_rel_event, Event, EventOp, HARD_DELETE_KEY,
};
use crate::update::{apply_update, UpdateDoc};
use crate::wal::Wal;

pub const DEFAULT_ENTITY_CACHE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ShardOptions {
    pub flush: FlushThresholds,
    pub entity_cache_size: usize,
    /// Writer configuration for checkpoint artifacts.
    pub writer: WriterOptions,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            flush: FlushThresholds::default(),
            entity_cache_size: DEFAULT_ENTITY_CACHE_SIZE,
            writer: WriterOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub actor: String,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            actor: "system".to_string(),
        }
    }
}

impl CreateOptions {
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub actor: Option<String>,
    pub expected_version: Option<u64>,
    pub upsert: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub actor: Option<String>,
    pub expected_version: Option<u64>,
    pub hard: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub actor: Option<String>,
    pub match_mode: Option<MatchMode>,
    pub similarity: Option<f64>,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

struct ShardState {
    entity_id_counters: HashMap<String, u64>,
    event_seq_counters: HashMap<String, u64>,
    rel_seq_counters: HashMap<String, u64>,
    ns_event_buffers: HashMap<String, EventBuffer>,
    rel_event_buffers: HashMap<String, EventBuffer>,
    entity_cache: LruCache<(String, String), Entity>,
    /// Live + soft-deleted edges keyed by origin namespace.
    rel_index: HashMap<String, HashMap<EdgeKey, Relationship>>,
    snapshot: Option<Box<Snapshot>>,
}

/// Deep copy of the in-process state taken at `begin_transaction`. WAL rows
/// are durable and deliberately not part of the snapshot.
struct Snapshot {
    entity_id_counters: HashMap<String, u64>,
    event_seq_counters: HashMap<String, u64>,
    rel_seq_counters: HashMap<String, u64>,
    ns_event_buffers: HashMap<String, EventBuffer>,
    rel_event_buffers: HashMap<String, EventBuffer>,
    /// Most-recent-first, as the LRU iterates.
    cache_entries: Vec<((String, String), Entity)>,
    rel_index: HashMap<String, HashMap<EdgeKey, Relationship>>,
}

pub struct Shard {
    wal: Arc<Wal>,
    store: BlobStore,
    invalidator: Arc<CacheInvalidator>,
    tail: Mutex<Option<Arc<TailProcessor>>>,
    schemas: Mutex<HashMap<String, Schema>>,
    state: Mutex<ShardState>,
    options: ShardOptions,
}

impl Shard {
    pub fn new(
        wal: Arc<Wal>,
        store: BlobStore,
        invalidator: Arc<CacheInvalidator>,
        options: ShardOptions,
    ) -> Self {
        let cache_size =
            NonZeroUsize::new(options.entity_cache_size.max(1)).expect("non-zero after max(1)");
        Self {
            wal,
            store,
            invalidator,
            tail: Mutex::new(None),
            schemas: Mutex::new(HashMap::new()),
            state: Mutex::new(ShardState {
                entity_id_counters: HashMap::new(),
                event_seq_counters: HashMap::new(),
                rel_seq_counters: HashMap::new(),
                ns_event_buffers: HashMap::new(),
                rel_event_buffers: HashMap::new(),
                entity_cache: LruCache::new(cache_size),
                rel_index: HashMap::new(),
                snapshot: None,
            }),
            options,
        }
    }

    pub fn invalidator(&self) -> &Arc<CacheInvalidator> {
        &self.invalidator
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub fn options(&self) -> &ShardOptions {
        &self.options
    }

    /// Attach the stream-view processor; every subsequent event is offered
    /// to it.
    pub fn attach_tail_processor(&self, processor: Arc<TailProcessor>) {
        *self.tail.lock() = Some(processor);
    }

    /// Register a parsed schema for a namespace; its shred fields become
    /// dedicated Parquet columns at checkpoint time.
    pub fn register_schema(&self, ns: &str, schema: Schema) {
        self.schemas.lock().insert(ns.to_string(), schema);
    }

    pub fn schema_for(&self, ns: &str) -> Option<Schema> {
        self.schemas.lock().get(ns).cloned()
    }

    /// Rebuild counters and the relationship index from checkpoint records,
    /// relationship artifacts and the WAL after a restart.
    pub async fn recover(&self) -> Result<()> {
        let namespaces = self.wal.namespaces()?;

        // Checkpointed relationship state is fetched before taking the
        // state lock; it seeds the live index under the WAL fold.
        let mut artifacts: HashMap<String, Vec<Relationship>> = HashMap::new();
        for ns in &namespaces {
            artifacts.insert(ns.clone(), self.load_rel_artifacts(ns).await?);
        }

        let mut state = self.state.lock();
        for ns in &namespaces {
            let mut seq = self.wal.max_event_seq(ns)?;
            let mut entity_seq = 0u64;
            if let Some(checkpoint) = self.wal.latest_checkpoint(ns)? {
                seq = seq.max(checkpoint.last_seq);
                entity_seq = checkpoint.last_entity_seq;
            }

            for batch in self.wal.event_batches(ns)? {
                for event in &batch.events {
                    if event.op == EventOp::Create {
                        if let Some((_, local_id)) = event.target.split_once(':') {
                            if let Some(n) = crate::entity::decode_entity_seq(local_id) {
                                entity_seq = entity_seq.max(n);
                            }
                        }
                    }
                }
            }

            let seq_slot = state.event_seq_counters.entry(ns.clone()).or_insert(0);
            *seq_slot = (*seq_slot).max(seq);
            let id_slot = state.entity_id_counters.entry(ns.clone()).or_insert(0);
            *id_slot = (*id_slot).max(entity_seq);

            // Relationship index: checkpointed edges first, WAL fold on top
            if let Some(rels) = artifacts.remove(ns) {
                let index = state.rel_index.entry(ns.clone()).or_default();
                for rel in rels {
                    index.insert(rel.key(), rel);
                }
            }
            let mut rel_seq = 0u64;
            for batch in self.wal.rel_batches(ns)? {
                rel_seq = rel_seq.max(batch.last_seq);
                for event in &batch.events {
                    if let Some(key) = parse_rel_target(&event.target) {
                        let index = state.rel_index.entry(ns.clone()).or_default();
                        let prior = index.remove(&key);
                        if let Some(rel) = apply_rel_event(prior, event) {
                            index.insert(key, rel);
                        }
                    }
                }
            }
            let rel_slot = state.rel_seq_counters.entry(ns.clone()).or_insert(0);
            *rel_slot = (*rel_slot).max(rel_seq);
        }

        tracing::info!("shard recovered {} namespaces from WAL", namespaces.len());
        Ok(())
    }

    // ---- entity operations ----

    pub async fn create(
        &self,
        ns: &str,
        doc: Value,
        opts: &CreateOptions,
    ) -> Result<Entity> {
        let object = doc
            .as_object()
            .ok_or_else(|| EngineError::InvalidInput("document must be an object".to_string()))?;
        let data = validate_new_entity(object)?;
        let entity_type = data.entity_type.clone();
        let name = data.name.clone();

        let (entity, event) = {
            let mut state = self.state.lock();
            let counter = state.entity_id_counters.entry(ns.to_string()).or_insert(0);
            *counter += 1;
            let local_id = encode_entity_id(*counter);
            self.build_create_locked(&mut state, ns, &local_id, entity_type, name, data.rest, &opts.actor)?
        };

        self.invalidator
            .signal(ns, InvalidationType::Entity, Some(entity.local_id().to_string()));
        self.notify_tail(ns, std::slice::from_ref(&event)).await;
        Ok(entity)
    }

    /// Sequential composition of `create`; atomicity is per item. Callers
    /// wanting all-or-nothing wrap the call in a transaction.
    pub async fn create_many(
        &self,
        ns: &str,
        items: Vec<Value>,
        opts: &CreateOptions,
    ) -> Result<Vec<Entity>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.create(ns, item, opts).await?);
        }
        Ok(out)
    }

    fn build_create_locked(
        &self,
        state: &mut ShardState,
        ns: &str,
        local_id: &str,
        entity_type: String,
        name: String,
        rest: Map<String, Value>,
        actor: &str,
    ) -> Result<(Entity, Event)> {
        let now = chrono::Utc::now().timestamp_millis();
        let entity = Entity {
            id: format!("{ns}/{local_id}"),
            entity_type,
            name,
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            updated_by: actor.to_string(),
            deleted_at: None,
            deleted_by: None,
            version: 1,
            data: rest,
        };

        let seq = next_seq(&mut state.event_seq_counters, ns);
        let mut event = Event::new(EventOp::Create, Event::entity_target(ns, local_id), seq, actor);
        event.after = Some(entity.to_json());

        self.append_entity_event_locked(state, ns, event.clone())?;
        state
            .entity_cache
            .put((ns.to_string(), local_id.to_string()), entity.clone());
        Ok((entity, event))
    }

    /// Cached entity or reconstruction from the event log. `None` for
    /// missing entities and, unless `include_deleted`, for soft-deleted
    /// ones.
    pub fn get(&self, ns: &str, id: &str, include_deleted: bool) -> Result<Option<Entity>> {
        let key = (ns.to_string(), id.to_string());
        {
            let mut state = self.state.lock();
            if let Some(entity) = state.entity_cache.get(&key) {
                return Ok(visible(entity.clone(), include_deleted));
            }
        }

        let entity = self.reconstruct_entity(ns, id)?;
        if let Some(entity) = &entity {
            self.state.lock().entity_cache.put(key, entity.clone());
        }
        Ok(entity.and_then(|e| visible(e, include_deleted)))
    }

    /// The pure event fold: WAL batches in sequence order, then the live
    /// buffer.
    fn reconstruct_entity(&self, ns: &str, id: &str) -> Result<Option<Entity>> {
        let target = Event::entity_target(ns, id);
        // State lock ordered before WAL access so a concurrent flush cannot
        // move events between the two scans.
        let state = self.state.lock();
        let mut entity = None;
        for batch in self.wal.event_batches(ns)? {
            for event in &batch.events {
                if event.target == target {
                    entity = apply_entity_event(entity, event);
                }
            }
        }
        if let Some(buffer) = state.ns_event_buffers.get(ns) {
            for event in &buffer.events {
                if event.target == target {
                    entity = apply_entity_event(entity, event);
                }
            }
        }
        Ok(entity)
    }

    pub async fn update(
        &self,
        ns: &str,
        id: &str,
        ops: UpdateDoc,
        opts: &UpdateOptions,
    ) -> Result<Entity> {
        let actor = opts.actor.clone().unwrap_or_else(|| "system".to_string());

        let Some(entity) = self.get(ns, id, false)? else {
            if opts.upsert {
                return self.upsert_create(ns, id, &ops, &actor).await;
            }
            return Err(EngineError::NotFound {
                ns: ns.to_string(),
                id: id.to_string(),
            });
        };

        if let Some(expected) = opts.expected_version {
            if expected != entity.version {
                return Err(EngineError::VersionMismatch {
                    expected,
                    actual: entity.version,
                });
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut updated = entity.clone();
        let changed = apply_update(&mut updated, &ops);
        updated.version = entity.version + 1;
        updated.updated_at = now;
        updated.updated_by = actor.clone();

        let mut after = changed.clone();
        after.insert("version".to_string(), Value::from(updated.version));
        after.insert("updatedAt".to_string(), Value::from(now));
        after.insert("updatedBy".to_string(), Value::String(actor.clone()));

        let mut before = Map::new();
        for key in changed.keys() {
            let old = match key.as_str() {
                "name" => Value::String(entity.name.clone()),
                "$type" => Value::String(entity.entity_type.clone()),
                _ => entity.data.get(key).cloned().unwrap_or(Value::Null),
            };
            before.insert(key.clone(), old);
        }
        before.insert("version".to_string(), Value::from(entity.version));

        let event = {
            let mut state = self.state.lock();
            let seq = next_seq(&mut state.event_seq_counters, ns);
            let mut event = Event::new(EventOp::Update, Event::entity_target(ns, id), seq, &actor);
            event.before = Some(Value::Object(before));
            event.after = Some(Value::Object(after));
            self.append_entity_event_locked(&mut state, ns, event.clone())?;
            state
                .entity_cache
                .put((ns.to_string(), id.to_string()), updated.clone());
            event
        };

        self.invalidator
            .signal(ns, InvalidationType::Entity, Some(id.to_string()));
        self.notify_tail(ns, std::slice::from_ref(&event)).await;
        Ok(updated)
    }

    async fn upsert_create(
        &self,
        ns: &str,
        id: &str,
        ops: &UpdateDoc,
        actor: &str,
    ) -> Result<Entity> {
        let object = ops.set.clone();
        let data = validate_new_entity(&object)?;

        let (entity, event) = {
            let mut state = self.state.lock();
            // Keep the id counter ahead of explicit ids
            if let Some(seq) = crate::entity::decode_entity_seq(id) {
                let counter = state.entity_id_counters.entry(ns.to_string()).or_insert(0);
                *counter = (*counter).max(seq);
            }
            self.build_create_locked(
                &mut state,
                ns,
                id,
                data.entity_type,
                data.name,
                data.rest,
                actor,
            )?
        };

        self.invalidator
            .signal(ns, InvalidationType::Entity, Some(id.to_string()));
        self.notify_tail(ns, std::slice::from_ref(&event)).await;
        Ok(entity)
    }

    pub async fn delete(&self, ns: &str, id: &str, opts: &DeleteOptions) -> Result<DeleteResult> {
        let actor = opts.actor.clone().unwrap_or_else(|| "system".to_string());
        let Some(entity) = self.get(ns, id, false)? else {
            return Ok(DeleteResult { deleted_count: 0 });
        };

        if let Some(expected) = opts.expected_version {
            if expected != entity.version {
                return Err(EngineError::VersionMismatch {
                    expected,
                    actual: entity.version,
                });
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut events = Vec::new();
        let mut rel_events: Vec<(String, Event)> = Vec::new();
        let cascaded;

        {
            let mut state = self.state.lock();
            let seq = next_seq(&mut state.event_seq_counters, ns);
            let mut event = Event::new(EventOp::Delete, Event::entity_target(ns, id), seq, &actor);

            if opts.hard {
                event.after = Some(serde_json::json!({ HARD_DELETE_KEY: true }));
                state.entity_cache.pop(&(ns.to_string(), id.to_string()));
            } else {
                let mut deleted = entity.clone();
                deleted.deleted_at = Some(now);
                deleted.deleted_by = Some(actor.clone());
                deleted.version = entity.version + 1;
                deleted.updated_at = now;
                deleted.updated_by = actor.clone();
                event.after = Some(serde_json::json!({
                    "deletedAt": now,
                    "deletedBy": actor,
                    "version": deleted.version,
                }));
                state
                    .entity_cache
                    .put((ns.to_string(), id.to_string()), deleted);
            }
            self.append_entity_event_locked(&mut state, ns, event.clone())?;
            events.push(event);

            // Cascade over adjacent edges, both directions. Hard deletes
            // remove even soft-deleted rows.
            let adjacent = adjacent_edges(&state.rel_index, ns, id, opts.hard);
            cascaded = !adjacent.is_empty();
            for key in adjacent {
                let origin_ns = key.from_ns.clone();
                let rel_event = if opts.hard {
                    let seq = next_seq(&mut state.rel_seq_counters, &origin_ns);
                    let mut ev = Event::new(EventOp::Delete, key.target(), seq, &actor);
                    ev.after = Some(serde_json::json!({ HARD_DELETE_KEY: true }));
                    if let Some(index) = state.rel_index.get_mut(&origin_ns) {
                        index.remove(&key);
                    }
                    ev
                } else {
                    let Some(rel) = state
                        .rel_index
                        .get(&origin_ns)
                        .and_then(|index| index.get(&key))
                        .filter(|rel| !rel.is_deleted())
                        .cloned()
                    else {
                        continue;
                    };
                    let mut soft = rel;
                    soft.deleted_at = Some(now);
                    soft.deleted_by = Some(actor.clone());
                    soft.version += 1;
                    soft.updated_at = now;
                    soft.updated_by = actor.clone();

                    let seq = next_seq(&mut state.rel_seq_counters, &origin_ns);
                    let mut ev = Event::new(EventOp::Delete, key.target(), seq, &actor);
                    ev.after = Some(serde_json::json!({
                        "deletedAt": now,
                        "deletedBy": actor,
                        "version": soft.version,
                    }));
                    state
                        .rel_index
                        .get_mut(&origin_ns)
                        .expect("index exists for adjacent edge")
                        .insert(key, soft);
                    ev
                };
                self.append_rel_event_locked(&mut state, &origin_ns, rel_event.clone())?;
                rel_events.push((origin_ns, rel_event));
            }
        }

        self.invalidator
            .signal(ns, InvalidationType::Entity, Some(id.to_string()));
        if cascaded {
            self.invalidator
                .signal(ns, InvalidationType::Relationship, None);
        }

        self.notify_tail(ns, &events).await;
        for (origin_ns, event) in &rel_events {
            self.notify_tail(origin_ns, std::slice::from_ref(event)).await;
        }
        Ok(DeleteResult { deleted_count: 1 })
    }

    /// Undo a soft delete: bumps the version and emits an UPDATE whose
    /// `before` carries the deletion markers and whose `after` does not.
    pub async fn restore(&self, ns: &str, id: &str, actor: &str) -> Result<Entity> {
        let Some(entity) = self.get(ns, id, true)? else {
            return Err(EngineError::NotFound {
                ns: ns.to_string(),
                id: id.to_string(),
            });
        };
        if !entity.is_deleted() {
            return Ok(entity);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut restored = entity.clone();
        restored.deleted_at = None;
        restored.deleted_by = None;
        restored.version = entity.version + 1;
        restored.updated_at = now;
        restored.updated_by = actor.to_string();

        let event = {
            let mut state = self.state.lock();
            let seq = next_seq(&mut state.event_seq_counters, ns);
            let mut event = Event::new(EventOp::Update, Event::entity_target(ns, id), seq, actor);
            event.before = Some(serde_json::json!({
                "deletedAt": entity.deleted_at,
                "deletedBy": entity.deleted_by,
            }));
            event.after = Some(serde_json::json!({
                "version": restored.version,
                "updatedAt": now,
                "updatedBy": actor,
            }));
            self.append_entity_event_locked(&mut state, ns, event.clone())?;
            state
                .entity_cache
                .put((ns.to_string(), id.to_string()), restored.clone());
            event
        };

        self.invalidator
            .signal(ns, InvalidationType::Entity, Some(id.to_string()));
        self.notify_tail(ns, std::slice::from_ref(&event)).await;
        Ok(restored)
    }

    // ---- relationship operations ----

    /// Create (or revive) the edge `(from) -[predicate]-> (to)`. Linking an
    /// already-live edge is a no-op returning the existing edge.
    pub async fn link(
        &self,
        from: &str,
        predicate: &str,
        to: &str,
        opts: &LinkOptions,
    ) -> Result<Relationship> {
        let (from_ns, from_id) = parse_entity_ref(from)?;
        let (to_ns, to_id) = parse_entity_ref(to)?;
        let actor = opts.actor.clone().unwrap_or_else(|| "system".to_string());
        validate_similarity(opts.match_mode, opts.similarity)?;

        let key = EdgeKey {
            from_ns: from_ns.to_string(),
            from_id: from_id.to_string(),
            predicate: predicate.to_string(),
            to_ns: to_ns.to_string(),
            to_id: to_id.to_string(),
        };

        let (rel, event) = {
            let mut state = self.state.lock();
            let existing = state
                .rel_index
                .get(from_ns)
                .and_then(|index| index.get(&key))
                .cloned();

            match existing {
                Some(rel) if !rel.is_deleted() => return Ok(rel),
                Some(deleted) => {
                    // Re-linking a soft-deleted edge restores it
                    let now = chrono::Utc::now().timestamp_millis();
                    let mut revived = deleted.clone();
                    revived.deleted_at = None;
                    revived.deleted_by = None;
                    revived.version += 1;
                    revived.updated_at = now;
                    revived.updated_by = actor.clone();
                    revived.match_mode = opts.match_mode.or(deleted.match_mode);
                    revived.similarity = opts.similarity.or(deleted.similarity);
                    if !opts.data.is_empty() {
                        revived.data = opts.data.clone();
                    }

                    let seq = next_seq(&mut state.rel_seq_counters, from_ns);
                    let mut event = Event::new(EventOp::Update, key.target(), seq, &actor);
                    event.before = Some(serde_json::json!({
                        "deletedAt": deleted.deleted_at,
                        "deletedBy": deleted.deleted_by,
                    }));
                    event.after = Some(revived.to_json());

                    self.append_rel_event_locked(&mut state, from_ns, event.clone())?;
                    state
                        .rel_index
                        .entry(from_ns.to_string())
                        .or_default()
                        .insert(key, revived.clone());
                    (revived, event)
                }
                None => {
                    let now = chrono::Utc::now().timestamp_millis();
                    let rel = Relationship {
                        from_ns: from_ns.to_string(),
                        from_id: from_id.to_string(),
                        predicate: predicate.to_string(),
                        reverse: derive_reverse(predicate),
                        to_ns: to_ns.to_string(),
                        to_id: to_id.to_string(),
                        match_mode: opts.match_mode,
                        similarity: opts.similarity,
                        data: opts.data.clone(),
                        created_at: now,
                        created_by: actor.clone(),
                        updated_at: now,
                        updated_by: actor.clone(),
                        deleted_at: None,
                        deleted_by: None,
                        version: 1,
                    };

                    let seq = next_seq(&mut state.rel_seq_counters, from_ns);
                    let mut event = Event::new(EventOp::Create, key.target(), seq, &actor);
                    event.after = Some(rel.to_json());

                    self.append_rel_event_locked(&mut state, from_ns, event.clone())?;
                    state
                        .rel_index
                        .entry(from_ns.to_string())
                        .or_default()
                        .insert(key, rel.clone());
                    (rel, event)
                }
            }
        };

        self.invalidator
            .signal(from_ns, InvalidationType::Relationship, None);
        self.notify_tail(from_ns, std::slice::from_ref(&event)).await;
        Ok(rel)
    }

    /// Soft-delete the live edge; a no-op when it is absent or already
    /// deleted.
    pub async fn unlink(
        &self,
        from: &str,
        predicate: &str,
        to: &str,
        actor: &str,
    ) -> Result<DeleteResult> {
        let (from_ns, from_id) = parse_entity_ref(from)?;
        let (to_ns, to_id) = parse_entity_ref(to)?;

        let key = EdgeKey {
            from_ns: from_ns.to_string(),
            from_id: from_id.to_string(),
            predicate: predicate.to_string(),
            to_ns: to_ns.to_string(),
            to_id: to_id.to_string(),
        };

        let event = {
            let mut state = self.state.lock();
            let Some(rel) = state
                .rel_index
                .get(from_ns)
                .and_then(|index| index.get(&key))
                .filter(|rel| !rel.is_deleted())
                .cloned()
            else {
                return Ok(DeleteResult { deleted_count: 0 });
            };

            let now = chrono::Utc::now().timestamp_millis();
            let mut soft = rel;
            soft.deleted_at = Some(now);
            soft.deleted_by = Some(actor.to_string());
            soft.version += 1;
            soft.updated_at = now;
            soft.updated_by = actor.to_string();

            let seq = next_seq(&mut state.rel_seq_counters, from_ns);
            let mut event = Event::new(EventOp::Delete, key.target(), seq, actor);
            event.after = Some(serde_json::json!({
                "deletedAt": now,
                "deletedBy": actor,
                "version": soft.version,
            }));

            self.append_rel_event_locked(&mut state, from_ns, event.clone())?;
            state
                .rel_index
                .get_mut(from_ns)
                .expect("edge came from this index")
                .insert(key, soft);
            event
        };

        self.invalidator
            .signal(from_ns, InvalidationType::Relationship, None);
        self.notify_tail(from_ns, std::slice::from_ref(&event)).await;
        Ok(DeleteResult { deleted_count: 1 })
    }

    /// Live edges touching `(ns, id)`, optionally narrowed by predicate.
    pub fn get_relationships(
        &self,
        ns: &str,
        id: &str,
        predicate: Option<&str>,
        direction: RelationshipDirection,
    ) -> Vec<Relationship> {
        let state = self.state.lock();
        let mut out = Vec::new();

        if matches!(
            direction,
            RelationshipDirection::Outbound | RelationshipDirection::Both
        ) {
            if let Some(index) = state.rel_index.get(ns) {
                out.extend(
                    index
                        .values()
                        .filter(|rel| rel.from_id == id && !rel.is_deleted())
                        .filter(|rel| predicate.is_none_or(|p| rel.predicate == p))
                        .cloned(),
                );
            }
        }
        if matches!(
            direction,
            RelationshipDirection::Inbound | RelationshipDirection::Both
        ) {
            for index in state.rel_index.values() {
                out.extend(
                    index
                        .values()
                        .filter(|rel| rel.to_ns == ns && rel.to_id == id && !rel.is_deleted())
                        .filter(|rel| predicate.is_none_or(|p| rel.predicate == p))
                        .cloned(),
                );
            }
        }

        out.sort_by(|a, b| a.key().target().cmp(&b.key().target()));
        out
    }

    // ---- buffering / flushing ----

    fn append_entity_event_locked(
        &self,
        state: &mut ShardState,
        ns: &str,
        event: Event,
    ) -> Result<()> {
        let buffer = state.ns_event_buffers.entry(ns.to_string()).or_default();
        buffer.push(event);
        if buffer.should_flush(&self.options.flush) {
            flush_buffer(&self.wal, buffer, ns, WalTable::Events)?;
        }
        Ok(())
    }

    fn append_rel_event_locked(
        &self,
        state: &mut ShardState,
        ns: &str,
        event: Event,
    ) -> Result<()> {
        let buffer = state.rel_event_buffers.entry(ns.to_string()).or_default();
        buffer.push(event);
        if buffer.should_flush(&self.options.flush) {
            flush_buffer(&self.wal, buffer, ns, WalTable::Rels)?;
        }
        Ok(())
    }

    /// Force every namespace's buffers to the WAL. Returns flushed batch
    /// count.
    pub fn flush_all(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let mut flushed = 0;

        let entity_namespaces: Vec<String> = state
            .ns_event_buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(ns, _)| ns.clone())
            .collect();
        for ns in entity_namespaces {
            let buffer = state.ns_event_buffers.get_mut(&ns).expect("listed above");
            flush_buffer(&self.wal, buffer, &ns, WalTable::Events)?;
            flushed += 1;
        }

        let rel_namespaces: Vec<String> = state
            .rel_event_buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(ns, _)| ns.clone())
            .collect();
        for ns in rel_namespaces {
            let buffer = state.rel_event_buffers.get_mut(&ns).expect("listed above");
            flush_buffer(&self.wal, buffer, &ns, WalTable::Rels)?;
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Every event not yet covered by a checkpoint: WAL rows then the live
    /// buffer, in sequence order.
    pub fn uncheckpointed_events(&self, ns: &str) -> Result<Vec<Event>> {
        let state = self.state.lock();
        let mut events = Vec::new();
        for batch in self.wal.event_batches(ns)? {
            events.extend(batch.events);
        }
        if let Some(buffer) = state.ns_event_buffers.get(ns) {
            events.extend(buffer.events.iter().cloned());
        }
        Ok(events)
    }

    pub fn uncheckpointed_rel_events(&self, ns: &str) -> Result<Vec<Event>> {
        let state = self.state.lock();
        let mut events = Vec::new();
        for batch in self.wal.rel_batches(ns)? {
            events.extend(batch.events);
        }
        if let Some(buffer) = state.rel_event_buffers.get(ns) {
            events.extend(buffer.events.iter().cloned());
        }
        Ok(events)
    }

    // ---- transactions ----

    /// Capture a deep-copy snapshot of the in-process state. Fails when a
    /// transaction is already active.
    pub fn begin_transaction(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.snapshot.is_some() {
            return Err(EngineError::TransactionActive);
        }
        state.snapshot = Some(Box::new(Snapshot {
            entity_id_counters: state.entity_id_counters.clone(),
            event_seq_counters: state.event_seq_counters.clone(),
            rel_seq_counters: state.rel_seq_counters.clone(),
            ns_event_buffers: state.ns_event_buffers.clone(),
            rel_event_buffers: state.rel_event_buffers.clone(),
            cache_entries: state
                .entity_cache
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            rel_index: state.rel_index.clone(),
        }));
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        state
            .snapshot
            .take()
            .map(|_| ())
            .ok_or(EngineError::NoTransaction)
    }

    /// Restore every snapshotted map. WAL rows written inside the
    /// transaction are not rewound; their state mutations live only in the
    /// buffers and cache being restored here, so they have no visible
    /// effect.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        let snapshot = state.snapshot.take().ok_or(EngineError::NoTransaction)?;

        state.entity_id_counters = snapshot.entity_id_counters;
        state.event_seq_counters = snapshot.event_seq_counters;
        state.rel_seq_counters = snapshot.rel_seq_counters;
        state.ns_event_buffers = snapshot.ns_event_buffers;
        state.rel_event_buffers = snapshot.rel_event_buffers;
        state.rel_index = snapshot.rel_index;

        // Rebuild the cache to its snapshot contents and recency
        let capacity = NonZeroUsize::new(self.options.entity_cache_size.max(1))
            .expect("non-zero after max(1)");
        let mut cache = LruCache::new(capacity);
        for (key, entity) in snapshot.cache_entries.into_iter().rev() {
            cache.put(key, entity);
        }
        state.entity_cache = cache;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().snapshot.is_some()
    }

    // ---- introspection (tests, invariant checks) ----

    pub fn current_seq(&self, ns: &str) -> u64 {
        self.state
            .lock()
            .event_seq_counters
            .get(ns)
            .copied()
            .unwrap_or(0)
    }

    pub fn buffer_event_count(&self, ns: &str) -> usize {
        self.state
            .lock()
            .ns_event_buffers
            .get(ns)
            .map(EventBuffer::len)
            .unwrap_or(0)
    }

    pub fn cached_entity_count(&self) -> usize {
        self.state.lock().entity_cache.len()
    }

    /// WAL ranges followed by the live buffer range, for gap checks.
    pub fn sequence_ranges(&self, ns: &str) -> Result<Vec<(u64, u64)>> {
        let state = self.state.lock();
        let mut ranges: Vec<(u64, u64)> = self
            .wal
            .event_batches(ns)?
            .iter()
            .map(|b| (b.first_seq, b.last_seq))
            .collect();
        if let Some(buffer) = state.ns_event_buffers.get(ns) {
            if !buffer.is_empty() {
                ranges.push((buffer.events[0].seq, buffer.last_seq));
            }
        }
        Ok(ranges)
    }

    async fn notify_tail(&self, ns: &str, events: &[Event]) {
        let tail = self.tail.lock().clone();
        let Some(tail) = tail else {
            return;
        };
        let values: Vec<Value> = events
            .iter()
            .filter_map(|event| {
                serde_json::to_value(event).ok().map(|mut v| {
                    if let Some(obj) = v.as_object_mut() {
                        obj.insert("ns".to_string(), Value::String(ns.to_string()));
                    }
                    v
                })
            })
            .collect();
        // Tail failures never fail the write; views surface their own counts
        let _ = tail.process_events(&values).await;
    }
}

enum WalTable {
    Events,
    Rels,
}

fn flush_buffer(wal: &Wal, buffer: &mut EventBuffer, ns: &str, table: WalTable) -> Result<()> {
    let batch = buffer.take(ns);
    let result = match table {
        WalTable::Events => wal.append_events(&batch),
        WalTable::Rels => wal.append_rels(&batch),
    };
    if let Err(e) = result {
        // Keep the events buffered; the write that triggered the flush
        // aborts without losing anything durable.
        for event in batch.events {
            buffer.push(event);
        }
        return Err(e);
    }
    Ok(())
}

fn next_seq(counters: &mut HashMap<String, u64>, ns: &str) -> u64 {
    let counter = counters.entry(ns.to_string()).or_insert(0);
    *counter += 1;
    *counter
}

fn visible(entity: Entity, include_deleted: bool) -> Option<Entity> {
    if entity.is_deleted() && !include_deleted {
        None
    } else {
        Some(entity)
    }
}

struct NewEntityFields {
    entity_type: String,
    name: String,
    rest: Map<String, Value>,
}

fn validate_new_entity(object: &Map<String, Value>) -> Result<NewEntityFields> {
    let entity_type = object
        .get("$type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(EngineError::MissingType)?
        .to_string();
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(EngineError::MissingName)?
        .to_string();

    let mut rest = Map::new();
    for (key, value) in object {
        if key == "$type" || key == "name" || key == "$id" {
            continue;
        }
        if key.starts_with('$') {
            return Err(EngineError::InvalidInput(format!(
                "field name '{key}' is reserved"
            )));
        }
        rest.insert(key.clone(), value.clone());
    }
    Ok(NewEntityFields {
        entity_type,
        name,
        rest,
    })
}

fn validate_similarity(match_mode: Option<MatchMode>, similarity: Option<f64>) -> Result<()> {
    if let Some(similarity) = similarity {
        if !(0.0..=1.0).contains(&similarity) {
            return Err(EngineError::InvalidInput(format!(
                "similarity {similarity} outside [0, 1]"
            )));
        }
        if match_mode == Some(MatchMode::Exact) && similarity != 1.0 {
            return Err(EngineError::InvalidInput(
                "exact matches only allow similarity 1.0".to_string(),
            ));
        }
    }
    Ok(())
}

fn adjacent_edges(
    rel_index: &HashMap<String, HashMap<EdgeKey, Relationship>>,
    ns: &str,
    id: &str,
    include_deleted: bool,
) -> Vec<EdgeKey> {
    let mut out = Vec::new();
    for index in rel_index.values() {
        for (key, rel) in index {
            let outbound = key.from_ns == ns && key.from_id == id;
            let inbound = key.to_ns == ns && key.to_id == id;
            if (outbound || inbound) && (include_deleted || !rel.is_deleted()) {
                out.push(key.clone());
            }
        }
    }
    out
}

fn derive_reverse(predicate: &str) -> String {
    if predicate.ends_with('s') {
        predicate.to_string()
    } else {
        format!("{predicate}s")
    }
}

fn parse_rel_target(target: &str) -> Option<EdgeKey> {
    let parts: Vec<&str> = target.split(':').collect();
    if parts.len() != 5 {
        return None;
    }
    Some(EdgeKey {
        from_ns: parts[0].to_string(),
        from_id: parts[1].to_string(),
        predicate: parts[2].to_string(),
        to_ns: parts[3].to_string(),
        to_id: parts[4].to_string(),
    })
}
