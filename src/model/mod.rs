//! Core data model types for iamap

mod hash;
mod kv;

pub use hash::Hash;
pub use kv::Kv;
