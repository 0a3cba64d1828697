// parquedb-query - Namespace-scoped reads
//
// A find runs: versioned cache key -> (on miss) data Parquet read with
// projection and push-downable filter -> overlay of uncheckpointed WAL and
// buffer events through the entity fold -> residual in-process filter ->
// sort -> skip/limit. Results report cache hits per tier.

mod cache;
mod filter;

pub use cache::{CacheTier, MemoryQueryCache, TieredCache};
pub use filter::{parse_filter, Condition};

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use parquedb_columnar::{Filter, FilterOp, ParquetSource, ReadOptions};
use parquedb_engine::{
    apply_entity_event, data_path, row_to_entity, shred_columns, EngineError, Entity,
    Result, Shard,
};
use parquedb_storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Keep the listed fields (plus `$id`).
    Include(Vec<String>),
    /// Drop the listed fields.
    Exclude(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub skip: usize,
    pub project: Option<Projection>,
    pub sort: Vec<(String, SortDir)>,
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub edge_hits: usize,
    pub cdn_hits: usize,
    pub cache_storage_hits: usize,
    pub primary_fetches: usize,
}

impl QueryStats {
    fn hit(&mut self, tier: CacheTier) {
        match tier {
            CacheTier::Edge => self.edge_hits += 1,
            CacheTier::Cdn => self.cdn_hits += 1,
            CacheTier::CacheStorage => self.cache_storage_hits += 1,
            CacheTier::Primary => self.primary_fetches += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub items: Vec<Value>,
    pub has_more: bool,
    pub stats: QueryStats,
}

pub struct QueryExecutor {
    shard: Arc<Shard>,
    cache: Option<Arc<dyn TieredCache>>,
}

impl QueryExecutor {
    pub fn new(shard: Arc<Shard>) -> Self {
        Self { shard, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn find(&self, ns: &str, filter: &Value, opts: &FindOptions) -> Result<FindResult> {
        let conditions = parse_filter(filter)?;
        let mut stats = QueryStats::default();

        let bytes = self.fetch_base(ns, &mut stats).await?;
        let overlay_events = self.shard.uncheckpointed_events(ns)?;

        // Base state from the Parquet artifact, with the push-downable
        // subset of the filter. Entities touched by overlay events are
        // fetched unfiltered in a second pass so an event can bring a
        // filtered-out row back into the result.
        let mut entities: BTreeMap<String, Entity> = BTreeMap::new();
        if let Some(bytes) = &bytes {
            let shred: Vec<String> = {
                let schema = self.shard.schema_for(ns);
                shred_columns(schema.as_ref())
                    .into_iter()
                    .map(|(name, _)| name)
                    .collect()
            };
            let pushdown = pushdown_filter(&conditions, &shred);

            let mut projection = vec!["$id".to_string(), "$data".to_string()];
            if let Some(pushed) = &pushdown {
                if !projection.contains(&pushed.column) {
                    projection.push(pushed.column.clone());
                }
            }

            let source = ParquetSource::from_bytes(bytes.clone());
            let rows = source
                .read(ReadOptions {
                    columns: Some(projection.clone()),
                    filter: pushdown.clone(),
                    ..ReadOptions::default()
                })
                .await?;
            for row in rows {
                if let Some(entity) = row_to_entity(&row) {
                    entities.insert(entity.local_id().to_string(), entity);
                }
            }

            if pushdown.is_some() && !overlay_events.is_empty() {
                let overlay_ids: Vec<Value> = overlay_events
                    .iter()
                    .filter_map(|e| e.target.split_once(':'))
                    .map(|(_, id)| Value::String(format!("{ns}/{id}")))
                    .collect();
                let rows = source
                    .read(ReadOptions {
                        columns: Some(projection),
                        filter: Some(Filter::new("$id", FilterOp::In, Value::Array(overlay_ids))),
                        ..ReadOptions::default()
                    })
                    .await?;
                for row in rows {
                    if let Some(entity) = row_to_entity(&row) {
                        entities.insert(entity.local_id().to_string(), entity);
                    }
                }
            }
        }

        // Replay uncheckpointed events on top of the artifact state
        for event in &overlay_events {
            let Some((_, id)) = event.target.split_once(':') else {
                continue;
            };
            let prior = entities.remove(id);
            if let Some(entity) = apply_entity_event(prior, event) {
                entities.insert(id.to_string(), entity);
            }
        }

        // Residual filter and visibility, in process
        let mut matching: Vec<Value> = entities
            .into_values()
            .filter(|e| opts.include_deleted || !e.is_deleted())
            .map(|e| e.to_json())
            .filter(|item| conditions.iter().all(|c| c.matches(item)))
            .collect();

        sort_items(&mut matching, &opts.sort);

        let total = matching.len();
        let skipped = matching.into_iter().skip(opts.skip);
        let items: Vec<Value> = match opts.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        };
        let has_more = opts.skip + items.len() < total;

        let items = match &opts.project {
            Some(projection) => items.into_iter().map(|i| project_item(i, projection)).collect(),
            None => items,
        };

        Ok(FindResult {
            items,
            has_more,
            stats,
        })
    }

    /// The namespace's data artifact, through the tiered cache. A namespace
    /// that has never been checkpointed has no artifact; its state lives
    /// entirely in the WAL overlay.
    async fn fetch_base(&self, ns: &str, stats: &mut QueryStats) -> Result<Option<bytes::Bytes>> {
        let path = data_path(ns);
        let key = self.shard.invalidator().versioned_key(&path, ns);

        if let Some(cache) = &self.cache {
            if let Some((bytes, tier)) = cache.get(&key).await {
                tracing::debug!("cache hit for '{}' at tier {:?}", key, tier);
                stats.hit(tier);
                return Ok(Some(bytes));
            }
        }

        match self.shard.store().get(&path).await {
            Ok(bytes) => {
                stats.hit(CacheTier::Primary);
                if let Some(cache) = &self.cache {
                    cache.put(&key, &bytes).await;
                }
                Ok(Some(bytes))
            }
            Err(StorageError::NotFound { .. }) => {
                stats.hit(CacheTier::Primary);
                Ok(None)
            }
            Err(e) => Err(EngineError::Storage(e)),
        }
    }
}

/// First condition that can run against the columnar layer: a primitive
/// predicate over a shredded column.
fn pushdown_filter(conditions: &[Condition], shred: &[String]) -> Option<Filter> {
    const BASE_COLUMNS: [&str; 8] = [
        "$id",
        "$type",
        "name",
        "createdAt",
        "updatedAt",
        "version",
        "deletedAt",
        "deletedBy",
    ];
    conditions
        .iter()
        .find(|c| {
            BASE_COLUMNS.contains(&c.field.as_str()) || shred.iter().any(|s| *s == c.field)
        })
        .map(|c| Filter::new(c.field.clone(), c.op, c.value.clone()))
}

fn sort_items(items: &mut [Value], sort: &[(String, SortDir)]) {
    if sort.is_empty() {
        return;
    }
    items.sort_by(|a, b| {
        for (field, dir) in sort {
            let ordering = compare_values(a.get(field), b.get(field));
            let ordering = match dir {
                SortDir::Asc => ordering,
                SortDir::Desc => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

// Nulls and missing fields sort last regardless of direction.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.filter(|v| !v.is_null()), b.filter(|v| !v.is_null())) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

fn project_item(item: Value, projection: &Projection) -> Value {
    let Value::Object(map) = item else {
        return item;
    };
    let projected = match projection {
        Projection::Include(fields) => map
            .into_iter()
            .filter(|(k, _)| k == "$id" || fields.contains(k))
            .collect(),
        Projection::Exclude(fields) => map
            .into_iter()
            .filter(|(k, _)| !fields.contains(k))
            .collect(),
    };
    Value::Object(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_cache::CacheInvalidator;
    use parquedb_engine::{CreateOptions, DeleteOptions, ShardOptions, UpdateDoc, UpdateOptions, Wal};
    use parquedb_storage::BlobStore;
    use serde_json::json;

    async fn seeded_shard() -> Arc<Shard> {
        let shard = Arc::new(Shard::new(
            Arc::new(Wal::in_memory().unwrap()),
            BlobStore::memory().unwrap(),
            Arc::new(CacheInvalidator::new()),
            ShardOptions::default(),
        ));
        for (name, age) in [("ada", 36), ("grace", 45), ("alan", 41)] {
            shard
                .create(
                    "people",
                    json!({"$type": "Person", "name": name, "age": age}),
                    &CreateOptions::default(),
                )
                .await
                .unwrap();
        }
        shard
    }

    #[tokio::test]
    async fn find_over_uncheckpointed_state() {
        let executor = QueryExecutor::new(seeded_shard().await);
        let result = executor
            .find(
                "people",
                &json!({"age": {"$gte": 40}}),
                &FindOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.items.len(), 2);
        assert!(!result.has_more);
        assert_eq!(result.stats.primary_fetches, 1);
    }

    #[tokio::test]
    async fn find_after_checkpoint_reads_artifact() {
        let shard = seeded_shard().await;
        shard.flush_all().unwrap();
        shard.checkpoint("people").await.unwrap().unwrap();

        let executor = QueryExecutor::new(shard.clone());
        let result = executor
            .find("people", &json!({"name": "grace"}), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0]["age"], json!(45));
    }

    #[tokio::test]
    async fn overlay_wins_over_artifact() {
        let shard = seeded_shard().await;
        shard.flush_all().unwrap();
        shard.checkpoint("people").await.unwrap().unwrap();

        // Post-checkpoint update only exists in the WAL/buffer
        shard
            .update(
                "people",
                "id1",
                UpdateDoc::default().set("age", json!(37)),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();

        let executor = QueryExecutor::new(shard);
        let result = executor
            .find("people", &json!({"name": "ada"}), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(result.items[0]["age"], json!(37));
        assert_eq!(result.items[0]["version"], json!(2));
    }

    #[tokio::test]
    async fn overlay_can_bring_rows_into_a_pushdown_filter() {
        let shard = seeded_shard().await;
        let schema = parquedb_schema::parse_schema(&json!({
            "Person": {"$shred": ["age"], "name": "string!", "age": "int?"}
        }))
        .unwrap();
        shard.register_schema("people", schema);
        shard.flush_all().unwrap();
        shard.checkpoint("people").await.unwrap().unwrap();

        // ada (36) does not match age >= 40 in the artifact, but an
        // uncheckpointed update raises her age; the shredded-column
        // pushdown must not hide her base row from the overlay
        shard
            .update(
                "people",
                "id1",
                UpdateDoc::default().set("age", json!(50)),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();

        let executor = QueryExecutor::new(shard);
        let result = executor
            .find(
                "people",
                &json!({"age": {"$gte": 40}}),
                &FindOptions::default(),
            )
            .await
            .unwrap();
        let names: Vec<&str> = result
            .items
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"ada"), "overlaid update must be visible: {names:?}");
        assert_eq!(result.items.len(), 3);
    }

    #[tokio::test]
    async fn sort_skip_limit_and_projection() {
        let executor = QueryExecutor::new(seeded_shard().await);
        let result = executor
            .find(
                "people",
                &json!({}),
                &FindOptions {
                    sort: vec![("age".to_string(), SortDir::Desc)],
                    skip: 1,
                    limit: Some(1),
                    project: Some(Projection::Include(vec!["name".to_string()])),
                    ..FindOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.items.len(), 1);
        assert!(result.has_more);
        assert_eq!(result.items[0]["name"], json!("alan"));
        assert_eq!(result.items[0]["$id"], json!("people/id3"));
        assert!(result.items[0].get("age").is_none());
    }

    #[tokio::test]
    async fn deleted_entities_hidden_by_default() {
        let shard = seeded_shard().await;
        shard
            .delete("people", "id2", &DeleteOptions::default())
            .await
            .unwrap();

        let executor = QueryExecutor::new(shard);
        let visible = executor
            .find("people", &json!({}), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(visible.items.len(), 2);

        let all = executor
            .find(
                "people",
                &json!({}),
                &FindOptions {
                    include_deleted: true,
                    ..FindOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.items.len(), 3);
    }

    #[tokio::test]
    async fn cache_tiers_are_counted() {
        let shard = seeded_shard().await;
        shard.flush_all().unwrap();
        shard.checkpoint("people").await.unwrap().unwrap();

        let cache = Arc::new(MemoryQueryCache::default());
        let executor = QueryExecutor::new(shard).with_cache(cache);

        let first = executor
            .find("people", &json!({}), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(first.stats.primary_fetches, 1);
        assert_eq!(first.stats.cache_storage_hits, 0);

        let second = executor
            .find("people", &json!({}), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(second.stats.primary_fetches, 0);
        assert_eq!(second.stats.cache_storage_hits, 1);
    }

    #[tokio::test]
    async fn empty_namespace_finds_nothing() {
        let executor = QueryExecutor::new(Arc::new(Shard::new(
            Arc::new(Wal::in_memory().unwrap()),
            BlobStore::memory().unwrap(),
            Arc::new(CacheInvalidator::new()),
            ShardOptions::default(),
        )));
        let result = executor
            .find("ghost", &json!({}), &FindOptions::default())
            .await
            .unwrap();
        assert!(result.items.is_empty());
        assert!(!result.has_more);
    }
}
