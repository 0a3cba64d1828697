//! Read-path cache strategy
//!
//! Per-content-type TTL tables with workload presets, HTTP cache headers,
//! and the staleness predicates the read path uses to decide between serve,
//! revalidate and refetch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Data,
    Metadata,
    Bloom,
    Index,
    Schema,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Data => "data",
            ContentType::Metadata => "metadata",
            ContentType::Bloom => "bloom",
            ContentType::Index => "index",
            ContentType::Schema => "schema",
        }
    }

    fn mime(self) -> &'static str {
        match self {
            ContentType::Data | ContentType::Bloom | ContentType::Index => {
                "application/octet-stream"
            }
            ContentType::Metadata | ContentType::Schema => "application/json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Seconds.
    pub ttl: u64,
    pub stale_while_revalidate: u64,
    /// Whether byte-range responses are cached under range-suffixed keys.
    pub cache_ranges: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Default,
    ReadHeavy,
    WriteHeavy,
    NoCache,
}

const DEFAULT_DATA_TTL: u64 = 60;
const DEFAULT_METADATA_TTL: u64 = 300;
const DEFAULT_BLOOM_TTL: u64 = 600;
const DEFAULT_SWR: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStrategy {
    data: CachePolicy,
    metadata: CachePolicy,
    bloom: CachePolicy,
    index: CachePolicy,
    schema: CachePolicy,
}

impl Default for CacheStrategy {
    fn default() -> Self {
        Self::preset(Preset::Default)
    }
}

impl CacheStrategy {
    pub fn preset(preset: Preset) -> Self {
        let base = |ttl| CachePolicy {
            ttl,
            stale_while_revalidate: DEFAULT_SWR,
            cache_ranges: true,
        };
        let strategy = Self {
            data: base(DEFAULT_DATA_TTL),
            metadata: base(DEFAULT_METADATA_TTL),
            bloom: base(DEFAULT_BLOOM_TTL),
            index: base(DEFAULT_BLOOM_TTL),
            schema: base(DEFAULT_METADATA_TTL),
        };

        match preset {
            Preset::Default => strategy,
            Preset::ReadHeavy => strategy.map(|p| CachePolicy {
                ttl: p.ttl * 5,
                stale_while_revalidate: p.stale_while_revalidate * 5,
                ..p
            }),
            Preset::WriteHeavy => strategy.map(|p| CachePolicy {
                ttl: p.ttl / 4,
                stale_while_revalidate: 0,
                ..p
            }),
            Preset::NoCache => strategy.map(|p| CachePolicy {
                ttl: 0,
                stale_while_revalidate: 0,
                cache_ranges: false,
                ..p
            }),
        }
    }

    /// Default preset with `CACHE_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut strategy = Self::default();
        let parse = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok());

        if let Some(ttl) = parse("CACHE_DATA_TTL") {
            strategy.data.ttl = ttl;
        }
        if let Some(ttl) = parse("CACHE_METADATA_TTL") {
            strategy.metadata.ttl = ttl;
            strategy.schema.ttl = ttl;
        }
        if let Some(ttl) = parse("CACHE_BLOOM_TTL") {
            strategy.bloom.ttl = ttl;
            strategy.index.ttl = ttl;
        }
        if let Some(swr) = parse("CACHE_STALE_WHILE_REVALIDATE") {
            strategy = strategy.map(|p| CachePolicy {
                stale_while_revalidate: swr,
                ..p
            });
        }
        strategy
    }

    /// Layer explicit TTL overrides (e.g. from a config file) onto this
    /// strategy. `None` leaves the preset value untouched.
    pub fn with_ttl_overrides(
        mut self,
        data_ttl: Option<u64>,
        metadata_ttl: Option<u64>,
        bloom_ttl: Option<u64>,
        stale_while_revalidate: Option<u64>,
    ) -> Self {
        if let Some(ttl) = data_ttl {
            self.data.ttl = ttl;
        }
        if let Some(ttl) = metadata_ttl {
            self.metadata.ttl = ttl;
            self.schema.ttl = ttl;
        }
        if let Some(ttl) = bloom_ttl {
            self.bloom.ttl = ttl;
            self.index.ttl = ttl;
        }
        if let Some(swr) = stale_while_revalidate {
            self = self.map(|p| CachePolicy {
                stale_while_revalidate: swr,
                ..p
            });
        }
        self
    }

    fn map(self, f: impl Fn(CachePolicy) -> CachePolicy) -> Self {
        Self {
            data: f(self.data),
            metadata: f(self.metadata),
            bloom: f(self.bloom),
            index: f(self.index),
            schema: f(self.schema),
        }
    }

    pub fn policy(&self, content_type: ContentType) -> CachePolicy {
        match content_type {
            ContentType::Data => self.data,
            ContentType::Metadata => self.metadata,
            ContentType::Bloom => self.bloom,
            ContentType::Index => self.index,
            ContentType::Schema => self.schema,
        }
    }

    /// Response headers for a cacheable payload.
    pub fn cache_headers(
        &self,
        content_type: ContentType,
        etag: Option<&str>,
        size: Option<u64>,
    ) -> Vec<(String, String)> {
        let policy = self.policy(content_type);
        let mut cache_control = format!("public, max-age={}", policy.ttl);
        if policy.stale_while_revalidate > 0 {
            cache_control.push_str(&format!(
                ", stale-while-revalidate={}",
                policy.stale_while_revalidate
            ));
        }

        let mut headers = vec![
            ("Cache-Control".to_string(), cache_control),
            ("Content-Type".to_string(), content_type.mime().to_string()),
            (
                "X-ParqueDB-Cache-Type".to_string(),
                content_type.as_str().to_string(),
            ),
            ("X-ParqueDB-Cache-TTL".to_string(), policy.ttl.to_string()),
        ];
        if let Some(etag) = etag {
            headers.push(("ETag".to_string(), format!("\"{etag}\"")));
        }
        if let Some(size) = size {
            headers.push(("Content-Length".to_string(), size.to_string()));
        }
        headers
    }

    /// Refresh in the background once a response has burned 80% of its TTL.
    pub fn should_revalidate(&self, content_type: ContentType, age_secs: u64) -> bool {
        let ttl = self.policy(content_type).ttl;
        (age_secs as f64) >= 0.8 * (ttl as f64)
    }

    pub fn is_stale(&self, content_type: ContentType, age_secs: u64) -> bool {
        age_secs > self.policy(content_type).ttl
    }

    /// Usable either fresh or within the stale-while-revalidate window.
    pub fn can_use_while_stale(&self, content_type: ContentType, age_secs: u64) -> bool {
        let policy = self.policy(content_type);
        age_secs <= policy.ttl + policy.stale_while_revalidate
    }
}
