//! Key/value pair stored in a bucket

/// A single map entry. Keys are opaque bytes compared by exact equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kv<V> {
    pub key: Vec<u8>,
    pub value: V,
}

impl<V> Kv<V> {
    pub fn new(key: impl Into<Vec<u8>>, value: V) -> Self {
        Kv {
            key: key.into(),
            value,
        }
    }

    /// Split into `(key, value)`
    pub fn into_parts(self) -> (Vec<u8>, V) {
        (self.key, self.value)
    }
}
