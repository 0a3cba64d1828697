// parquedb configuration
//
// Sources, in priority order:
// 1. Environment variables (highest)
// 2. Config file named by PARQUEDB_CONFIG
// 3. ./parquedb.toml
// 4. Built-in defaults (lowest)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod env_overrides;
mod validation;

pub use env_overrides::{apply_env_overrides, EnvSource, ProcessEnv};
pub use validation::validate_config;

pub const CONFIG_PATH_ENV: &str = "PARQUEDB_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "parquedb.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub wal: WalConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Write-engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub flush_max_events: usize,
    pub flush_max_bytes: usize,
    pub entity_cache_size: usize,
    /// Checkpoint artifact codec: none, snappy, gzip, zstd, lz4.
    pub codec: String,
    pub row_group_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_max_events: 100,
            flush_max_bytes: 64 * 1024,
            entity_cache_size: 1000,
            codec: "snappy".to_string(),
            row_group_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process storage; state dies with the shard. Tests and ephemera.
    #[default]
    Memory,
    Fs,
    S3,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            _ => anyhow::bail!("Unsupported storage backend: {}. Supported: memory, fs, s3", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalConfig {
    /// SQLite sidecar path; in-memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// TTL overrides layered onto the cache-strategy preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_while_revalidate: Option<u64>,
}

impl RuntimeConfig {
    /// Load with the full source priority chain and validate.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_files()?;
        apply_env_overrides(&mut config, &ProcessEnv)?;
        validate_config(&config)?;
        Ok(config)
    }

    fn from_files() -> Result<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok();
        let candidates: Vec<String> = explicit
            .into_iter()
            .chain([DEFAULT_CONFIG_FILE.to_string()])
            .collect();

        for path in candidates {
            match std::fs::read_to_string(&path) {
                Ok(contents) => {
                    tracing::debug!("loading config from '{}'", path);
                    return toml::from_str(&contents)
                        .with_context(|| format!("failed to parse config file '{path}'"));
                }
                Err(_) => continue,
            }
        }
        Ok(Self::default())
    }

    /// Parse a TOML document directly (tests, embedding).
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config = toml::from_str(contents).context("failed to parse config")?;
        validate_config(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        validate_config(&config).unwrap();
        assert_eq!(config.engine.flush_max_events, 100);
        assert_eq!(config.engine.flush_max_bytes, 64 * 1024);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.wal.path.is_none());
    }

    #[test]
    fn parses_toml_document() {
        let config = RuntimeConfig::from_toml(
            r#"
            [engine]
            flush_max_events = 50
            flush_max_bytes = 32768
            entity_cache_size = 100
            codec = "zstd"
            row_group_size = 5000

            [storage]
            backend = "fs"

            [storage.fs]
            path = "/var/lib/parquedb"

            [wal]
            path = "/var/lib/parquedb/wal.db"

            [cache]
            data_ttl = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.flush_max_events, 50);
        assert_eq!(config.engine.codec, "zstd");
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.fs.unwrap().path, "/var/lib/parquedb");
        assert_eq!(config.wal.path.as_deref(), Some("/var/lib/parquedb/wal.db"));
        assert_eq!(config.cache.data_ttl, Some(30));
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("fs".parse::<StorageBackend>().unwrap(), StorageBackend::Fs);
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!(
            "memory".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert!("gcs".parse::<StorageBackend>().is_err());
    }
}
