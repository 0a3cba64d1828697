//! Writer configuration

use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
use parquet::format::KeyValue;

pub const DEFAULT_ROW_GROUP_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    None,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl Codec {
    pub fn parse(s: &str) -> Option<Codec> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Some(Codec::None),
            "snappy" => Some(Codec::Snappy),
            "gzip" => Some(Codec::Gzip),
            "zstd" => Some(Codec::Zstd),
            "lz4" => Some(Codec::Lz4),
            _ => None,
        }
    }

    fn compression(self) -> Compression {
        match self {
            Codec::None => Compression::UNCOMPRESSED,
            Codec::Snappy => Compression::SNAPPY,
            Codec::Gzip => Compression::GZIP(GzipLevel::default()),
            Codec::Zstd => Compression::ZSTD(ZstdLevel::default()),
            Codec::Lz4 => Compression::LZ4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub codec: Codec,
    /// Rows per row group.
    pub row_group_size: usize,
    pub dictionary: bool,
    pub statistics: bool,
    pub bloom_filters: bool,
    /// Extra key/value pairs embedded in the footer.
    pub key_value_metadata: Vec<(String, String)>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            codec: Codec::Snappy,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            dictionary: true,
            statistics: true,
            bloom_filters: false,
            key_value_metadata: Vec::new(),
        }
    }
}

impl WriterOptions {
    pub(crate) fn writer_properties(&self) -> WriterProperties {
        let mut builder = WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_1_0)
            .set_compression(self.codec.compression())
            .set_max_row_group_size(self.row_group_size.max(1))
            .set_dictionary_enabled(self.dictionary)
            .set_statistics_enabled(if self.statistics {
                EnabledStatistics::Chunk
            } else {
                EnabledStatistics::None
            })
            .set_bloom_filter_enabled(self.bloom_filters);

        if !self.key_value_metadata.is_empty() {
            let metadata = self
                .key_value_metadata
                .iter()
                .map(|(key, value)| KeyValue {
                    key: key.clone(),
                    value: Some(value.clone()),
                })
                .collect();
            builder = builder.set_key_value_metadata(Some(metadata));
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_names_parse() {
        assert_eq!(Codec::parse("none"), Some(Codec::None));
        assert_eq!(Codec::parse("SNAPPY"), Some(Codec::Snappy));
        assert_eq!(Codec::parse("gzip"), Some(Codec::Gzip));
        assert_eq!(Codec::parse("zstd"), Some(Codec::Zstd));
        assert_eq!(Codec::parse("lz4"), Some(Codec::Lz4));
        assert_eq!(Codec::parse("brotli"), None);
    }

    #[test]
    fn defaults_match_contract() {
        let opts = WriterOptions::default();
        assert_eq!(opts.row_group_size, 10_000);
        assert!(opts.dictionary);
        assert!(opts.statistics);
        assert!(!opts.bloom_filters);
    }
}
