// Configuration validation
//
// Required fields present, values sensible.

use super::{RuntimeConfig, StorageBackend};
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    if config.engine.flush_max_events == 0 {
        bail!("engine.flush_max_events must be greater than 0");
    }
    if config.engine.flush_max_bytes == 0 {
        bail!("engine.flush_max_bytes must be greater than 0");
    }
    if config.engine.entity_cache_size == 0 {
        bail!("engine.entity_cache_size must be greater than 0");
    }
    if config.engine.row_group_size == 0 {
        bail!("engine.row_group_size must be greater than 0");
    }
    if parquedb_columnar::Codec::parse(&config.engine.codec).is_none() {
        bail!(
            "engine.codec '{}' is not one of none, snappy, gzip, zstd, lz4",
            config.engine.codec
        );
    }

    if config.engine.flush_max_events > 1_000_000 {
        warn!(
            flush_max_events = config.engine.flush_max_events,
            "engine.flush_max_events is very large; WAL batches will be big"
        );
    }

    match config.storage.backend {
        StorageBackend::Fs => {
            if config.storage.fs.is_none() {
                bail!("storage.fs config required for the fs backend");
            }
        }
        StorageBackend::S3 => {
            let Some(s3) = &config.storage.s3 else {
                bail!("storage.s3 config required for the s3 backend");
            };
            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket must not be empty");
            }
            if s3.region.is_empty() {
                bail!("storage.s3.region must not be empty");
            }
        }
        StorageBackend::Memory => {
            if config.wal.path.is_some() {
                warn!("durable WAL with memory storage: checkpoints will not survive restarts");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsConfig, S3Config};

    #[test]
    fn rejects_zero_thresholds() {
        let mut config = RuntimeConfig::default();
        config.engine.flush_max_events = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_unknown_codec() {
        let mut config = RuntimeConfig::default();
        config.engine.codec = "brotli".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn fs_backend_requires_fs_config() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::Fs;
        assert!(validate_config(&config).is_err());

        config.storage.fs = Some(FsConfig::default());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn s3_backend_requires_bucket_and_region() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3 = Some(S3Config {
            bucket: "data".to_string(),
            region: String::new(),
            endpoint: None,
        });
        assert!(validate_config(&config).is_err());

        config.storage.s3.as_mut().unwrap().region = "us-east-1".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
