//! # iamap
//!
//! An immutable, persistent hash array mapped trie over a block store.
//!
//! Every update returns a new map version with its own root identifier while
//! sharing all unchanged nodes with the previous version. Nodes are loaded
//! and saved through a [`Store`], so the same trie can live in memory, on
//! disk or behind a network.
//!
//! ## Core Concepts
//!
//! - **Map**: one immutable version, addressed by its root node's identifier
//! - **Node**: `2^bit_width` slots, each holding a bucket of entries or a link
//! - **Store**: saves serialized nodes and hands back identifiers
//! - **Traversals**: lookup and iteration state machines that let the caller
//!   load blocks
//!
//! ## Example
//!
//! ```ignore
//! use iamap::{multicodec, HasherRegistry, Map, MemoryStore, Options};
//!
//! let store = MemoryStore::new();
//! let registry = HasherRegistry::with_defaults();
//! let map = Map::create(&store, &registry, &Options::new(multicodec::BLAKE3)).await?;
//! let map = map.set("cat", "mat".to_string()).await?;
//! assert_eq!(map.get("cat").await?, Some("mat".to_string()));
//! ```

pub mod config;
pub mod model;
pub mod store;
pub mod traverse;
pub mod trie;

mod error;

pub use config::{multicodec, Config, HasherRegistry, Options};
pub use error::{Error, Result};
pub use model::{Hash, Kv};
pub use store::{BlobCodec, MemoryStore, Store};
pub use traverse::{traverse_entries, traverse_get, EntriesTraversal, GetTraversal, Lookup};
pub use trie::{Map, SerializedElement, SerializedKv, SerializedNode};
