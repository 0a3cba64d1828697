use super::{FsConfig, RuntimeConfig, S3Config, StorageBackend};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "PARQUEDB_";

/// Abstraction over environment lookups so tests can inject values without
/// touching the process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment, with the PARQUEDB_ prefix applied. The
/// unprefixed CACHE_* variables are honored as documented.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{ENV_PREFIX}{key}"))
            .ok()
            .or_else(|| std::env::var(key).ok())
    }
}

/// Apply environment-variable overrides (highest priority).
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Engine tunables
    if let Some(val) = get_env_usize(env, "FLUSH_MAX_EVENTS")? {
        config.engine.flush_max_events = val;
    }
    if let Some(val) = get_env_usize(env, "FLUSH_MAX_BYTES")? {
        config.engine.flush_max_bytes = val;
    }
    if let Some(val) = get_env_usize(env, "ENTITY_CACHE_SIZE")? {
        config.engine.entity_cache_size = val;
    }
    if let Some(val) = env.get("CODEC") {
        config.engine.codec = val;
    }
    if let Some(val) = get_env_usize(env, "ROW_GROUP_SIZE")? {
        config.engine.row_group_size = val;
    }

    // Storage backend
    if let Some(backend) = env.get("STORAGE_BACKEND") {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid PARQUEDB_STORAGE_BACKEND value")?;
    }
    if let Some(path) = env.get("STORAGE_PATH") {
        config
            .storage
            .fs
            .get_or_insert_with(FsConfig::default)
            .path = path;
    }
    if let Some(bucket) = env.get("S3_BUCKET") {
        ensure_s3(config).bucket = bucket;
    }
    if let Some(region) = env.get("S3_REGION") {
        ensure_s3(config).region = region;
    }
    if let Some(endpoint) = env.get("S3_ENDPOINT") {
        ensure_s3(config).endpoint = Some(endpoint);
    }

    // WAL sidecar
    if let Some(path) = env.get("WAL_PATH") {
        config.wal.path = Some(path);
    }

    // Cache TTLs (documented without a prefix)
    if let Some(val) = get_env_u64(env, "CACHE_DATA_TTL")? {
        config.cache.data_ttl = Some(val);
    }
    if let Some(val) = get_env_u64(env, "CACHE_METADATA_TTL")? {
        config.cache.metadata_ttl = Some(val);
    }
    if let Some(val) = get_env_u64(env, "CACHE_BLOOM_TTL")? {
        config.cache.bloom_ttl = Some(val);
    }
    if let Some(val) = get_env_u64(env, "CACHE_STALE_WHILE_REVALIDATE")? {
        config.cache.stale_while_revalidate = Some(val);
    }

    Ok(())
}

fn ensure_s3(config: &mut RuntimeConfig) -> &mut S3Config {
    config.storage.s3.get_or_insert_with(S3Config::default)
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    env.get(key)
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| anyhow!("{ENV_PREFIX}{key} must be a non-negative integer, got '{v}'"))
        })
        .transpose()
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    env.get(key)
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| anyhow!("{key} must be a non-negative integer, got '{v}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for FakeEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    #[test]
    fn overrides_apply_over_defaults() {
        let mut config = RuntimeConfig::default();
        let env = FakeEnv(HashMap::from([
            ("FLUSH_MAX_EVENTS", "10"),
            ("STORAGE_BACKEND", "fs"),
            ("STORAGE_PATH", "/tmp/pdb"),
            ("WAL_PATH", "/tmp/pdb/wal.db"),
            ("CACHE_DATA_TTL", "15"),
        ]));
        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.engine.flush_max_events, 10);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.fs.unwrap().path, "/tmp/pdb");
        assert_eq!(config.wal.path.as_deref(), Some("/tmp/pdb/wal.db"));
        assert_eq!(config.cache.data_ttl, Some(15));
    }

    #[test]
    fn malformed_numbers_error() {
        let mut config = RuntimeConfig::default();
        let env = FakeEnv(HashMap::from([("FLUSH_MAX_EVENTS", "lots")]));
        assert!(apply_env_overrides(&mut config, &env).is_err());
    }

    #[test]
    fn unknown_backend_errors() {
        let mut config = RuntimeConfig::default();
        let env = FakeEnv(HashMap::from([("STORAGE_BACKEND", "tape")]));
        assert!(apply_env_overrides(&mut config, &env).is_err());
    }
}
