//! Map configuration
//!
//! [`Options`] is what a caller writes down (and may keep in a JSON file);
//! [`Config`] is the validated form with the hash function attached, produced
//! by [`HasherRegistry::validate`].

mod registry;

pub use registry::{
    decode_varint, encode_varint, identity_hash, multicodec, HashFn, Hasher, HasherRegistry,
};

use crate::trie::bits::extract_bits;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default number of hash bits consumed per level
pub const DEFAULT_BIT_WIDTH: u32 = 5;

/// Default maximum bucket length before a slot is pushed into a child node
pub const DEFAULT_BUCKET_SIZE: usize = 8;

fn default_bit_width() -> u32 {
    DEFAULT_BIT_WIDTH
}

fn default_bucket_size() -> usize {
    DEFAULT_BUCKET_SIZE
}

/// User-facing map options
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Multicodec identifier of a registered hash function
    pub codec: u64,
    /// Bits of the hash consumed per level, 1 to 8
    #[serde(default = "default_bit_width")]
    pub bit_width: u32,
    /// Maximum entries per bucket
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,
}

impl Options {
    pub fn new(codec: u64) -> Self {
        Options {
            codec,
            bit_width: DEFAULT_BIT_WIDTH,
            bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }

    pub fn with_bit_width(mut self, bit_width: u32) -> Self {
        self.bit_width = bit_width;
        self
    }

    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    /// Parse options from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load options from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save options to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Validated configuration shared by every node of one map
#[derive(Clone)]
pub struct Config {
    hasher: Hasher,
    bit_width: u32,
    bucket_size: usize,
}

impl Config {
    pub(crate) fn new(hasher: Hasher, bit_width: u32, bucket_size: usize) -> Self {
        Config {
            hasher,
            bit_width,
            bucket_size,
        }
    }

    /// Multicodec identifier of the hash function
    pub fn codec(&self) -> u64 {
        self.hasher.code()
    }

    /// The codec as written into root nodes
    pub fn codec_bytes(&self) -> Vec<u8> {
        encode_varint(self.hasher.code())
    }

    pub fn hash_byte_len(&self) -> usize {
        self.hasher.byte_len()
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Number of levels the hash can address: `floor(hash bits / bit width)`
    pub fn max_depth(&self) -> usize {
        self.hasher.byte_len() * 8 / self.bit_width as usize
    }

    /// Fail unless a node can live at `depth`
    pub fn check_depth(&self, depth: usize) -> Result<()> {
        let max_depth = self.max_depth();
        if depth >= max_depth {
            return Err(Error::DepthRange { depth, max_depth });
        }
        Ok(())
    }

    /// Hash a key with the configured hash function
    pub fn hash_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.hasher.hash(key)
    }

    /// Slot addressed by `hash` in a node at `depth`
    pub fn slot(&self, hash: &[u8], depth: usize) -> Result<usize> {
        self.check_depth(depth)?;
        Ok(extract_bits(
            hash,
            depth * self.bit_width as usize,
            self.bit_width,
        ))
    }

    /// The options this configuration was validated from
    pub fn options(&self) -> Options {
        Options {
            codec: self.codec(),
            bit_width: self.bit_width,
            bucket_size: self.bucket_size,
        }
    }
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.options() == other.options() && self.hash_byte_len() == other.hash_byte_len()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("codec", &format_args!("{:#x}", self.codec()))
            .field("hash_byte_len", &self.hash_byte_len())
            .field("bit_width", &self.bit_width)
            .field("bucket_size", &self.bucket_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_options_json_defaults() {
        let options = Options::from_json(r#"{"codec": 30}"#).unwrap();
        assert_eq!(options, Options::new(multicodec::BLAKE3));

        let options = Options::from_json(r#"{"codec": 0, "bitWidth": 8, "bucketSize": 3}"#).unwrap();
        assert_eq!(options.bit_width, 8);
        assert_eq!(options.bucket_size, 3);

        assert!(Options::from_json(r#"{"codec": 0, "bitWidth": "foo"}"#).is_err());
        assert!(Options::from_json(r#"{"codec": 0, "bucketSize": -1}"#).is_err());
    }

    #[test]
    fn test_options_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.json");
        let options = Options::new(multicodec::IDENTITY)
            .with_bit_width(7)
            .with_bucket_size(30);
        options.save(&path).unwrap();
        assert_eq!(Options::load(&path).unwrap(), options);
    }

    #[test]
    fn test_slot_and_depth() {
        let registry = HasherRegistry::with_defaults();
        let config = registry
            .validate(&Options::new(multicodec::IDENTITY).with_bit_width(8))
            .unwrap();
        assert_eq!(config.max_depth(), 32);
        let hash = config.hash_key(&[7, 9]).unwrap();
        assert_eq!(config.slot(&hash, 0).unwrap(), 7);
        assert_eq!(config.slot(&hash, 1).unwrap(), 9);
        assert_eq!(config.slot(&hash, 31).unwrap(), 0);
        assert!(matches!(
            config.slot(&hash, 32),
            Err(Error::DepthRange { depth: 32, max_depth: 32 })
        ));
        assert_eq!(config.codec_bytes(), vec![0]);
    }
}
