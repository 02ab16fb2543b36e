//! Hash array mapped trie over a block store
//!
//! This implements an immutable trie where:
//! - Each node addresses `2^bit_width` slots with bits of the key's hash
//! - A slot holds a small sorted bucket of entries or a link to a child node
//! - Updates copy the path from the root and share every untouched subtree
//! - The root's store identifier names the whole map version

pub mod bits;
mod map;
mod node;
mod serialized;

pub use bits::{extract_bits, Bitmap};
pub use map::{Entries, Ids, Keys, Map, Values};
pub use node::{Element, Insertion, Node, Probe, Removal};
pub use serialized::{is_serializable, SerializedElement, SerializedKv, SerializedNode};
