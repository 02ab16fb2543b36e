//! Store-free traversal engines
//!
//! Both engines walk the trie one block at a time and never call a store.
//! Each step either finishes or names the block it needs next; the caller
//! loads it however it likes (sequentially, batched, over a network) and
//! feeds it back with `next`.

mod entries;
mod get;

pub use entries::{traverse_entries, EntriesTraversal};
pub use get::{traverse_get, GetTraversal, Lookup};
