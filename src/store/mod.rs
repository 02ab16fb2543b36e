//! Block store capability
//!
//! The trie never decides where nodes live. A [`Store`] saves a serialized
//! node and hands back an identifier, and loads a node given one. Identifiers
//! are embedded in parent nodes as links, so they must be serializable.
//!
//! [`MemoryStore`] is a content-addressed implementation keyed by BLAKE3
//! hashes of compressed blobs.

mod blob;
mod memory;

pub use blob::{Blob, BlobCodec};
pub use memory::MemoryStore;

use crate::trie::SerializedNode;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Backing store for trie nodes
#[allow(async_fn_in_trait)]
pub trait Store {
    /// Identifier returned by `save` and accepted by `load`
    type Link: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned;

    /// Persist one node, returning its identifier
    async fn save<V: Serialize>(&self, node: &SerializedNode<Self::Link, V>) -> Result<Self::Link>;

    /// Fetch the node previously saved under `link`
    async fn load<V: DeserializeOwned>(
        &self,
        link: &Self::Link,
    ) -> Result<SerializedNode<Self::Link, V>>;

    /// Identifier equality
    fn is_equal(&self, a: &Self::Link, b: &Self::Link) -> bool {
        a == b
    }
}
