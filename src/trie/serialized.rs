//! Canonical serialized form of trie nodes
//!
//! This is the shape exchanged with a [`Store`](crate::store::Store). Root
//! nodes carry the map configuration; child nodes leave those fields out and
//! inherit them from the root.
//!
//! Root node:
//! ```text
//! { codec: varint bytes, bitWidth, bucketSize, dataMap, nodeMap, elements }
//! ```
//!
//! Child node:
//! ```text
//! { dataMap, nodeMap, elements }
//! ```
//!
//! `dataMap`/`nodeMap` are the bitmap integers (see [`Bitmap`] for widths
//! past 64 slots). In JSON an element is either a bucket, written as an array
//! of `[key, value]` pairs, or the store's link value; the two are told apart
//! by shape. A bare `[key, value]` pair is read as a one-entry bucket. Binary
//! formats cannot tell shapes apart and tag each element instead.

use crate::config::{decode_varint, Options};
use crate::trie::bits::{Bitmap, MAX_BIT_WIDTH};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One trie node as written to and read from the store
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode<L, V> {
    #[serde(default)]
    pub codec: Option<Vec<u8>>,
    #[serde(default)]
    pub bit_width: Option<i64>,
    #[serde(default)]
    pub bucket_size: Option<i64>,
    pub data_map: Bitmap,
    pub node_map: Bitmap,
    pub elements: Vec<SerializedElement<L, V>>,
}

// JSON leaves absent configuration fields out; binary formats need every field
impl<L: Serialize, V: Serialize> Serialize for SerializedNode<L, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let omit = serializer.is_human_readable();
        let mut state = serializer.serialize_struct("SerializedNode", 6)?;
        if omit && self.codec.is_none() {
            state.skip_field("codec")?;
        } else {
            state.serialize_field("codec", &self.codec)?;
        }
        if omit && self.bit_width.is_none() {
            state.skip_field("bitWidth")?;
        } else {
            state.serialize_field("bitWidth", &self.bit_width)?;
        }
        if omit && self.bucket_size.is_none() {
            state.skip_field("bucketSize")?;
        } else {
            state.serialize_field("bucketSize", &self.bucket_size)?;
        }
        state.serialize_field("dataMap", &self.data_map)?;
        state.serialize_field("nodeMap", &self.node_map)?;
        state.serialize_field("elements", &self.elements)?;
        state.end()
    }
}

/// A slot's content: an inline bucket or a link to a child node
#[derive(Clone, Debug, PartialEq)]
pub enum SerializedElement<L, V> {
    Bucket(Vec<SerializedKv<V>>),
    Link(L),
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum TaggedRef<'a, L, V> {
    Bucket(&'a [SerializedKv<V>]),
    Link(&'a L),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Tagged<L, V> {
    Bucket(Vec<SerializedKv<V>>),
    Link(L),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Untagged<L, V> {
    Bucket(Vec<SerializedKv<V>>),
    Entry(SerializedKv<V>),
    Link(L),
}

impl<L: Serialize, V: Serialize> Serialize for SerializedElement<L, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match (self, serializer.is_human_readable()) {
            (SerializedElement::Bucket(bucket), true) => bucket.serialize(serializer),
            (SerializedElement::Link(link), true) => link.serialize(serializer),
            (SerializedElement::Bucket(bucket), false) => {
                TaggedRef::<L, V>::Bucket(bucket).serialize(serializer)
            }
            (SerializedElement::Link(link), false) => {
                TaggedRef::<L, V>::Link(link).serialize(serializer)
            }
        }
    }
}

impl<'de, L: Deserialize<'de>, V: Deserialize<'de>> Deserialize<'de> for SerializedElement<L, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            Ok(match Untagged::deserialize(deserializer)? {
                Untagged::Bucket(bucket) => SerializedElement::Bucket(bucket),
                Untagged::Entry(kv) => SerializedElement::Bucket(vec![kv]),
                Untagged::Link(link) => SerializedElement::Link(link),
            })
        } else {
            Ok(match Tagged::deserialize(deserializer)? {
                Tagged::Bucket(bucket) => SerializedElement::Bucket(bucket),
                Tagged::Link(link) => SerializedElement::Link(link),
            })
        }
    }
}

/// A `[key, value]` pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedKv<V>(pub Vec<u8>, pub V);

impl<L, V> SerializedNode<L, V> {
    /// True when all configuration fields are present
    pub fn is_root(&self) -> bool {
        self.codec.is_some() && self.bit_width.is_some() && self.bucket_size.is_some()
    }

    /// True when any configuration field is present
    pub fn has_root_fields(&self) -> bool {
        self.codec.is_some() || self.bit_width.is_some() || self.bucket_size.is_some()
    }

    /// Read and range-check the configuration fields of a root node
    pub fn root_options(&self) -> Result<Options> {
        let codec = self
            .codec
            .as_deref()
            .ok_or_else(|| Error::config("root node has no codec"))?;
        let codec = decode_varint(codec)?;

        let bit_width = self
            .bit_width
            .ok_or_else(|| Error::config("root node has no bitWidth"))?;
        if !(1..=i64::from(MAX_BIT_WIDTH)).contains(&bit_width) {
            return Err(Error::config(format!(
                "bitWidth must be between 1 and {}, got {}",
                MAX_BIT_WIDTH, bit_width
            )));
        }

        let bucket_size = self
            .bucket_size
            .ok_or_else(|| Error::config("root node has no bucketSize"))?;
        if bucket_size < 1 {
            return Err(Error::config(format!(
                "bucketSize must be positive, got {}",
                bucket_size
            )));
        }
        let bucket_size = usize::try_from(bucket_size)
            .map_err(|_| Error::config("bucketSize does not fit in usize"))?;

        Ok(Options {
            codec,
            bit_width: bit_width as u32,
            bucket_size,
        })
    }
}

/// Whether `value` has the shape of a serialized node
pub fn is_serializable<L: DeserializeOwned, V: DeserializeOwned>(value: &serde_json::Value) -> bool {
    SerializedNode::<L, V>::deserialize(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::multicodec;
    use serde_json::json;

    type Node = SerializedNode<u64, String>;

    fn root_json() -> serde_json::Value {
        json!({
            "codec": [0x23],
            "bitWidth": 5,
            "bucketSize": 8,
            "dataMap": 0,
            "nodeMap": 0,
            "elements": []
        })
    }

    #[test]
    fn test_root_options() {
        let node: Node = serde_json::from_value(root_json()).unwrap();
        assert!(node.is_root());
        let options = node.root_options().unwrap();
        assert_eq!(options.codec, multicodec::MURMUR3_32);
        assert_eq!(options.bit_width, 5);
        assert_eq!(options.bucket_size, 8);
    }

    #[test]
    fn test_child_has_no_config() {
        let node: Node = serde_json::from_value(json!({
            "dataMap": 0b1,
            "nodeMap": 0b10,
            "elements": [[[[1, 2], "v"]], 7]
        }))
        .unwrap();
        assert!(!node.is_root());
        assert!(!node.has_root_fields());
        assert!(node.root_options().is_err());
        assert_eq!(node.data_map, Bitmap::from_u64(1));
        assert_eq!(
            node.elements[0],
            SerializedElement::Bucket(vec![SerializedKv(vec![1, 2], "v".into())])
        );
        assert_eq!(node.elements[1], SerializedElement::Link(7));
    }

    #[test]
    fn test_elements_are_told_apart_by_shape() {
        let node = Node {
            codec: None,
            bit_width: None,
            bucket_size: None,
            data_map: Bitmap::from_u64(0b101),
            node_map: Bitmap::from_u64(0b10),
            elements: vec![
                SerializedElement::Bucket(vec![
                    SerializedKv(vec![0], "a".into()),
                    SerializedKv(vec![0, 1], "b".into()),
                ]),
                SerializedElement::Link(9),
                SerializedElement::Bucket(vec![SerializedKv(vec![2], "c".into())]),
            ],
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(
            json,
            json!({
                "dataMap": 5,
                "nodeMap": 2,
                "elements": [[[[0], "a"], [[0, 1], "b"]], 9, [[[2], "c"]]]
            })
        );
        assert_eq!(serde_json::from_value::<Node>(json).unwrap(), node);

        // a bare pair is a one-entry bucket
        let bare: SerializedElement<u64, String> = serde_json::from_value(json!([[3], "d"])).unwrap();
        assert_eq!(bare, SerializedElement::Bucket(vec![SerializedKv(vec![3], "d".into())]));

        // binary formats carry a tag
        let bytes = bincode::serialize(&node).unwrap();
        assert_eq!(bincode::deserialize::<Node>(&bytes).unwrap(), node);
    }

    #[test]
    fn test_root_option_ranges() {
        for (field, value) in [
            ("bitWidth", json!(-1)),
            ("bitWidth", json!(9)),
            ("bucketSize", json!(0)),
            ("bucketSize", json!(-1)),
        ] {
            let mut raw = root_json();
            raw[field] = value;
            let node: Node = serde_json::from_value(raw).unwrap();
            assert!(matches!(
                node.root_options(),
                Err(Error::ConfigValidation(_))
            ));
        }
    }

    #[test]
    fn test_wrong_field_types_fail_to_decode() {
        for (field, value) in [
            ("bitWidth", json!("foo")),
            ("bucketSize", json!("foo")),
            ("dataMap", json!("foo")),
            ("nodeMap", json!(1.5)),
            ("elements", json!({"nope": "nope"})),
        ] {
            let mut raw = root_json();
            raw[field] = value;
            assert!(!is_serializable::<u64, String>(&raw), "{}", field);
            assert!(serde_json::from_value::<Node>(raw).is_err(), "{}", field);
        }
        assert!(is_serializable::<u64, String>(&root_json()));
        let mut raw = root_json();
        raw["elements"] = json!([{"woot": "nope"}]);
        assert!(serde_json::from_value::<Node>(raw.clone()).is_err());
        raw["elements"] = json!([{"bucket": [[[1], "v"]]}]);
        assert!(serde_json::from_value::<Node>(raw).is_err());
    }
}
