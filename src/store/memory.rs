//! In-memory content-addressed block store
//!
//! Blocks are encoded with the store's [`BlobCodec`], compressed with zstd
//! and kept in a hash map keyed by the blob's BLAKE3 hash. Saving the same
//! node twice yields the same identifier and stores it once.

use super::{Blob, BlobCodec, Store};
use crate::model::Hash;
use crate::trie::SerializedNode;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// A content-addressed store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    codec: BlobCodec,
    /// Compressed blobs by hash
    objects: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store using bincode blocks
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store encoding blocks with `codec`
    pub fn with_codec(codec: BlobCodec) -> Self {
        MemoryStore {
            codec,
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn codec(&self) -> BlobCodec {
        self.codec
    }

    /// Store a blob, returns its hash
    pub fn put(&self, blob: &Blob) -> Result<Hash> {
        let hash = blob.hash();
        if self.objects.read().contains_key(&hash) {
            return Ok(hash);
        }
        let compressed = blob.compress()?;
        debug!(
            hash = %hash.short(),
            size = blob.size(),
            compressed = compressed.len(),
            "stored block"
        );
        self.objects.write().insert(hash, compressed);
        Ok(hash)
    }

    /// Store an already encoded payload as-is, bypassing node serialization
    pub fn put_raw(&self, codec: BlobCodec, data: Vec<u8>) -> Result<Hash> {
        self.put(&Blob::new(codec, data))
    }

    /// Retrieve a blob by hash
    pub fn get(&self, hash: &Hash) -> Result<Blob> {
        let objects = self.objects.read();
        let data = objects
            .get(hash)
            .ok_or_else(|| Error::NotFound(hash.to_hex()))?;
        Blob::decompress(data)
    }

    /// Check if a hash exists
    pub fn contains(&self, hash: &Hash) -> bool {
        self.objects.read().contains_key(hash)
    }

    /// Get the number of objects in the store
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

impl Store for MemoryStore {
    type Link = Hash;

    async fn save<V: Serialize>(&self, node: &SerializedNode<Hash, V>) -> Result<Hash> {
        self.put(&Blob::encode(self.codec, node)?)
    }

    async fn load<V: DeserializeOwned>(&self, link: &Hash) -> Result<SerializedNode<Hash, V>> {
        self.get(link)?.decode()
    }
}
