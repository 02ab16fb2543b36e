//! Hash algorithm registry
//!
//! Maps multicodec identifiers to hash functions. A registry is an explicit
//! value handed to `create`/`load`, there is no process-wide table.

use super::{Config, Options};
use crate::trie::bits::MAX_BIT_WIDTH;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Multicodec identifiers for common hash functions
pub mod multicodec {
    pub const IDENTITY: u64 = 0x00;
    pub const SHA2_256: u64 = 0x12;
    pub const BLAKE3: u64 = 0x1e;
    pub const MURMUR3_32: u64 = 0x23;
}

/// Signature of a registered hash function
pub type HashFn = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync;

/// A registered hash function together with the number of bytes it yields
#[derive(Clone)]
pub struct Hasher {
    code: u64,
    byte_len: usize,
    func: Arc<HashFn>,
}

impl Hasher {
    pub fn code(&self) -> u64 {
        self.code
    }

    /// Number of hash bytes used for addressing
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Hash a key, keeping exactly `byte_len` bytes
    pub fn hash(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut out = (self.func)(key);
        if out.len() < self.byte_len {
            return Err(Error::HashLength {
                expected: self.byte_len,
                actual: out.len(),
            });
        }
        out.truncate(self.byte_len);
        Ok(out)
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher")
            .field("code", &format_args!("{:#x}", self.code))
            .field("byte_len", &self.byte_len)
            .finish_non_exhaustive()
    }
}

/// Table of hash functions keyed by multicodec identifier
#[derive(Clone, Debug, Default)]
pub struct HasherRegistry {
    hashers: HashMap<u64, Hasher>,
}

impl HasherRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `identity` and `blake3`, both 32 bytes
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(multicodec::IDENTITY, 32, identity_hash::<32>);
        registry.register(multicodec::BLAKE3, 32, |key| {
            blake3::hash(key).as_bytes().to_vec()
        });
        registry
    }

    /// Register `hasher` under `code`, replacing any previous registration
    pub fn register<F>(&mut self, code: u64, byte_len: usize, hasher: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.hashers.insert(
            code,
            Hasher {
                code,
                byte_len,
                func: Arc::new(hasher),
            },
        );
    }

    pub fn get(&self, code: u64) -> Option<&Hasher> {
        self.hashers.get(&code)
    }

    /// Check user options against this registry and attach the hasher
    pub fn validate(&self, options: &Options) -> Result<Config> {
        if options.bit_width < 1 || options.bit_width > MAX_BIT_WIDTH {
            return Err(Error::config(format!(
                "bitWidth must be an integer between 1 and {}, got {}",
                MAX_BIT_WIDTH, options.bit_width
            )));
        }
        if options.bucket_size < 1 {
            return Err(Error::config("bucketSize must be a positive integer"));
        }
        let hasher = self.get(options.codec).ok_or_else(|| {
            Error::config(format!(
                "hash algorithm {:#x} is not registered",
                options.codec
            ))
        })?;
        if hasher.byte_len() * 8 < options.bit_width as usize {
            return Err(Error::config(format!(
                "a {}-byte hash cannot address a single level of bit width {}",
                hasher.byte_len(),
                options.bit_width
            )));
        }
        Ok(Config::new(hasher.clone(), options.bit_width, options.bucket_size))
    }
}

/// Use the key itself as its hash, zero padded or truncated to `N` bytes.
///
/// Only suitable for tests and for keys that are already uniformly
/// distributed.
pub fn identity_hash<const N: usize>(key: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; N];
    let n = key.len().min(N);
    out[..n].copy_from_slice(&key[..n]);
    out
}

/// Encode an unsigned LEB128 varint, as used for multicodec identifiers
pub fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Decode a varint that must span all of `bytes`
pub fn decode_varint(bytes: &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate() {
        if i >= 10 {
            break;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            if i + 1 != bytes.len() {
                return Err(Error::config("trailing bytes after codec varint"));
            }
            return Ok(value);
        }
    }
    Err(Error::config("codec is not a valid varint"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint() {
        assert_eq!(encode_varint(0), vec![0]);
        assert_eq!(encode_varint(0x23), vec![0x23]);
        assert_eq!(encode_varint(300), vec![0xac, 0x02]);
        assert_eq!(decode_varint(&[0xac, 0x02]).unwrap(), 300);
        assert_eq!(decode_varint(&[0x1e]).unwrap(), multicodec::BLAKE3);
        assert!(decode_varint(&[]).is_err());
        assert!(decode_varint(&[0x80]).is_err());
        assert!(decode_varint(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_identity_hash() {
        assert_eq!(identity_hash::<4>(b"ab"), vec![b'a', b'b', 0, 0]);
        assert_eq!(identity_hash::<2>(b"abcd"), vec![b'a', b'b']);
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = HasherRegistry::new();
        registry.register(multicodec::MURMUR3_32, 4, |_| vec![1, 1, 1, 1]);
        registry.register(multicodec::MURMUR3_32, 4, |_| vec![2, 2, 2, 2]);
        let hasher = registry.get(multicodec::MURMUR3_32).unwrap();
        assert_eq!(hasher.hash(b"k").unwrap(), vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_hash_truncates_and_rejects_short_output() {
        let mut registry = HasherRegistry::new();
        registry.register(1, 2, |_| vec![9, 8, 7]);
        registry.register(2, 4, |_| vec![1]);
        assert_eq!(registry.get(1).unwrap().hash(b"k").unwrap(), vec![9, 8]);
        assert!(matches!(
            registry.get(2).unwrap().hash(b"k"),
            Err(Error::HashLength { expected: 4, actual: 1 })
        ));
    }

    #[test]
    fn test_validate() {
        let registry = HasherRegistry::with_defaults();
        let config = registry.validate(&Options::new(multicodec::BLAKE3)).unwrap();
        assert_eq!(config.bit_width(), 5);
        assert_eq!(config.bucket_size(), 8);
        assert_eq!(config.max_depth(), 51);

        let bad_width = Options::new(multicodec::BLAKE3).with_bit_width(9);
        assert!(matches!(
            registry.validate(&bad_width),
            Err(Error::ConfigValidation(_))
        ));
        let zero_width = Options::new(multicodec::BLAKE3).with_bit_width(0);
        assert!(registry.validate(&zero_width).is_err());
        let bad_bucket = Options::new(multicodec::BLAKE3).with_bucket_size(0);
        assert!(registry.validate(&bad_bucket).is_err());
        assert!(registry.validate(&Options::new(multicodec::SHA2_256)).is_err());
    }
}
