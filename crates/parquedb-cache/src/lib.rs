// parquedb-cache - Cache coherence between the write engine and read path
//
// The write engine bumps a per-namespace monotonic version on every
// successful mutation and records bounded invalidation signals; the read
// path folds the version into its cache keys so upstream caches miss
// naturally without explicit purges. The strategy half owns TTL tables,
// cache headers and staleness predicates.

mod invalidator;
mod keys;
mod strategy;

pub use invalidator::{
    invalidation_paths, CacheInvalidator, CacheStore, InvalidationSignal, InvalidationType,
    WriteOp, PENDING_SIGNAL_CAP,
};
pub use keys::{build_key, parse_key, CacheKey};
pub use strategy::{CachePolicy, CacheStrategy, ContentType, Preset};
