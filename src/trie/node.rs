//! Trie node and its pure update steps
//!
//! A [`Node`] is one level of the trie. Its algorithms never touch the store:
//! when an operation reaches a slot that links to a child, it reports the
//! link and the caller (the map handle or a traversal) supplies the loaded
//! child. Updates return new nodes and leave `self` untouched.

use crate::config::Config;
use crate::model::Kv;
use crate::trie::bits::Bitmap;
use crate::trie::serialized::{SerializedElement, SerializedKv, SerializedNode};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Content of an occupied slot
#[derive(Clone, Debug, PartialEq)]
pub enum Element<L, V> {
    /// Colliding entries, sorted by key. Never empty.
    Bucket(Arc<[Kv<V>]>),
    /// Store identifier of a child node
    Link(L),
}

impl<L, V> Element<L, V> {
    pub fn as_bucket(&self) -> Option<&[Kv<V>]> {
        match self {
            Element::Bucket(bucket) => Some(bucket.as_ref()),
            Element::Link(_) => None,
        }
    }

    pub fn as_link(&self) -> Option<&L> {
        match self {
            Element::Bucket(_) => None,
            Element::Link(link) => Some(link),
        }
    }
}

/// One level of the trie
///
/// Element `j` belongs to the `j`-th set slot of `data_map | node_map`.
/// A slot set in `data_map` holds a bucket, a slot set in `node_map` holds a
/// link; no slot is set in both.
#[derive(Clone, Debug, PartialEq)]
pub struct Node<L, V> {
    depth: usize,
    data_map: Bitmap,
    node_map: Bitmap,
    elements: Vec<Element<L, V>>,
}

/// Result of a lookup step
#[derive(Debug, PartialEq)]
pub enum Probe<'a, L, V> {
    Found(&'a V),
    Missing,
    /// The key can only be in the child behind this link
    Descend(&'a L),
}

/// Result of an insert step
#[derive(Debug)]
pub enum Insertion<L, V> {
    /// Continue in the child behind this link
    Descend(L),
    /// The slot now holds the updated bucket
    Updated(Node<L, V>),
    /// The bucket overflowed and was pushed down into fresh nodes, listed
    /// shallowest first. Every node but the last is empty and must link to
    /// its successor at the key's slot; the last holds the entries. The
    /// inserting node must link to the first at the key's slot.
    Split(Vec<Node<L, V>>),
}

/// Result of a remove step
#[derive(Debug)]
pub enum Removal<L, V> {
    Descend(L),
    Unchanged,
    Removed(Node<L, V>),
}

impl<L, V> Node<L, V> {
    /// A node with no occupied slots
    pub fn empty(depth: usize) -> Self {
        Node {
            depth,
            data_map: Bitmap::EMPTY,
            node_map: Bitmap::EMPTY,
            elements: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn data_map(&self) -> Bitmap {
        self.data_map
    }

    pub fn node_map(&self) -> Bitmap {
        self.node_map
    }

    pub fn elements(&self) -> &[Element<L, V>] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.data_map.is_empty() && self.node_map.is_empty()
    }

    /// Entries held directly in this node's buckets
    pub fn direct_entry_count(&self) -> usize {
        self.buckets().map(<[Kv<V>]>::len).sum()
    }

    /// Number of child links held by this node
    pub fn direct_node_count(&self) -> usize {
        self.links().count()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &[Kv<V>]> {
        self.elements.iter().filter_map(Element::as_bucket)
    }

    pub fn links(&self) -> impl Iterator<Item = &L> {
        self.elements.iter().filter_map(Element::as_link)
    }

    /// Entries held directly by this node, in slot order
    pub fn entries(&self) -> impl Iterator<Item = &Kv<V>> {
        self.buckets().flatten()
    }

    fn index_of(&self, slot: usize) -> usize {
        (self.data_map | self.node_map).popcount_below(slot)
    }

    fn bucket_at(&self, index: usize) -> Result<&Arc<[Kv<V>]>> {
        match self.elements.get(index) {
            Some(Element::Bucket(bucket)) => Ok(bucket),
            _ => Err(Error::malformed(format!(
                "expected a bucket at element {} of node at depth {}",
                index, self.depth
            ))),
        }
    }

    fn link_at(&self, index: usize) -> Result<&L> {
        match self.elements.get(index) {
            Some(Element::Link(link)) => Ok(link),
            _ => Err(Error::malformed(format!(
                "expected a link at element {} of node at depth {}",
                index, self.depth
            ))),
        }
    }

    /// Look for `key` in this node
    pub fn lookup<'a>(&'a self, key: &[u8], hash: &[u8], config: &Config) -> Result<Probe<'a, L, V>> {
        let slot = config.slot(hash, self.depth)?;
        let index = self.index_of(slot);
        if self.data_map.test(slot) {
            let bucket = self.bucket_at(index)?;
            return Ok(match find(bucket, key) {
                Ok(pos) => Probe::Found(&bucket[pos].value),
                Err(_) => Probe::Missing,
            });
        }
        if self.node_map.test(slot) {
            return Ok(Probe::Descend(self.link_at(index)?));
        }
        Ok(Probe::Missing)
    }

    /// Point the slot at `slot` to a child link, replacing whatever the slot
    /// held before.
    pub fn with_link(&self, slot: usize, link: L) -> Self
    where
        L: Clone,
        V: Clone,
    {
        let index = self.index_of(slot);
        let mut node = self.clone();
        if node.node_map.test(slot) {
            node.elements[index] = Element::Link(link);
        } else if node.data_map.test(slot) {
            node.data_map = node.data_map.set(slot, false);
            node.node_map = node.node_map.set(slot, true);
            node.elements[index] = Element::Link(link);
        } else {
            node.node_map = node.node_map.set(slot, true);
            node.elements.insert(index, Element::Link(link));
        }
        node
    }

    /// Whether a non-root node holds few enough entries to live as a single
    /// bucket in its parent
    pub fn is_collapsible(&self, config: &Config) -> bool {
        self.direct_node_count() == 0 && self.direct_entry_count() <= config.bucket_size()
    }

    /// Reattach a changed child at `slot`, folding it into the parent when it
    /// is collapsible.
    ///
    /// Returns `None` when the child must stay a separate node; the caller
    /// saves it and uses [`Node::with_link`].
    pub fn absorb_child(&self, slot: usize, child: &Node<L, V>, config: &Config) -> Option<Self>
    where
        L: Clone,
        V: Clone,
    {
        if !child.is_collapsible(config) {
            return None;
        }
        let index = self.index_of(slot);
        let mut node = self.clone();
        node.node_map = node.node_map.set(slot, false);
        if child.is_empty() {
            node.elements.remove(index);
            return Some(node);
        }
        let bucket = match child.elements.as_slice() {
            [Element::Bucket(bucket)] => Arc::clone(bucket),
            _ => {
                let mut entries: Vec<Kv<V>> = child.entries().cloned().collect();
                entries.sort_by(|a, b| a.key.cmp(&b.key));
                entries.into()
            }
        };
        node.data_map = node.data_map.set(slot, true);
        node.elements[index] = Element::Bucket(bucket);
        Some(node)
    }

    /// Replace the bucket at `index`, or drop the slot if `entries` is empty
    fn with_bucket(&self, slot: usize, index: usize, entries: Vec<Kv<V>>) -> Self
    where
        L: Clone,
        V: Clone,
    {
        let mut node = self.clone();
        if entries.is_empty() {
            node.data_map = node.data_map.set(slot, false);
            node.elements.remove(index);
        } else {
            node.elements[index] = Element::Bucket(entries.into());
        }
        node
    }
}

impl<L: Clone, V: Clone> Node<L, V> {
    /// Insert or replace `kv`
    pub fn insert(&self, kv: &Kv<V>, hash: &[u8], config: &Config) -> Result<Insertion<L, V>> {
        let slot = config.slot(hash, self.depth)?;
        let index = self.index_of(slot);

        if self.node_map.test(slot) {
            return Ok(Insertion::Descend(self.link_at(index)?.clone()));
        }

        if !self.data_map.test(slot) {
            let mut node = self.clone();
            node.data_map = node.data_map.set(slot, true);
            node.elements
                .insert(index, Element::Bucket(Arc::from(vec![kv.clone()])));
            return Ok(Insertion::Updated(node));
        }

        let bucket = self.bucket_at(index)?;
        let mut entries = bucket.to_vec();
        match find(bucket, &kv.key) {
            Ok(pos) => entries[pos] = kv.clone(),
            Err(pos) => entries.insert(pos, kv.clone()),
        }
        if entries.len() <= config.bucket_size() {
            return Ok(Insertion::Updated(self.with_bucket(slot, index, entries)));
        }
        Ok(Insertion::Split(push_down(entries, self.depth + 1, config)?))
    }

    /// Remove `key` if it is stored in this node
    pub fn remove(&self, key: &[u8], hash: &[u8], config: &Config) -> Result<Removal<L, V>> {
        let slot = config.slot(hash, self.depth)?;
        let index = self.index_of(slot);

        if self.node_map.test(slot) {
            return Ok(Removal::Descend(self.link_at(index)?.clone()));
        }
        if !self.data_map.test(slot) {
            return Ok(Removal::Unchanged);
        }

        let bucket = self.bucket_at(index)?;
        let Ok(pos) = find(bucket, key) else {
            return Ok(Removal::Unchanged);
        };
        let mut entries = bucket.to_vec();
        entries.remove(pos);
        Ok(Removal::Removed(self.with_bucket(slot, index, entries)))
    }

    /// Instantiate a node from its serialized form, validating every field.
    ///
    /// Root nodes (`depth == 0`) must carry configuration fields matching
    /// `config`; child nodes must omit them.
    pub fn from_serializable(
        serialized: SerializedNode<L, V>,
        depth: usize,
        config: &Config,
    ) -> Result<Self> {
        config.check_depth(depth)?;
        if depth == 0 {
            if !serialized.is_root() {
                return Err(Error::malformed("root node is missing its configuration"));
            }
            if serialized.root_options()? != config.options() {
                return Err(Error::malformed(
                    "root node configuration does not match the map configuration",
                ));
            }
        } else if serialized.has_root_fields() {
            return Err(Error::malformed(format!(
                "node at depth {} must not carry configuration fields",
                depth
            )));
        }

        let (data_map, node_map) = (serialized.data_map, serialized.node_map);
        data_map.check_width(config.bit_width())?;
        node_map.check_width(config.bit_width())?;
        if !data_map.is_disjoint(&node_map) {
            return Err(Error::malformed("dataMap and nodeMap overlap"));
        }
        let occupied = data_map | node_map;
        if serialized.elements.len() != occupied.count_ones() {
            return Err(Error::malformed(format!(
                "node has {} elements but {} occupied slots",
                serialized.elements.len(),
                occupied.count_ones()
            )));
        }

        let elements = occupied
            .ones()
            .zip(serialized.elements)
            .map(|(slot, element)| match element {
                SerializedElement::Bucket(bucket) if data_map.test(slot) => {
                    decode_bucket(bucket, slot, config)
                }
                SerializedElement::Link(link) if node_map.test(slot) => Ok(Element::Link(link)),
                SerializedElement::Bucket(_) => Err(Error::malformed(format!(
                    "slot {} is a child slot but holds a bucket",
                    slot
                ))),
                SerializedElement::Link(_) => Err(Error::malformed(format!(
                    "slot {} is a data slot but holds a link",
                    slot
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Node {
            depth,
            data_map,
            node_map,
            elements,
        })
    }

    /// Serialized form; configuration fields are written for the root only
    pub fn to_serializable(&self, config: &Config) -> SerializedNode<L, V> {
        let elements = self
            .elements
            .iter()
            .map(|element| match element {
                Element::Bucket(bucket) => SerializedElement::Bucket(
                    bucket
                        .iter()
                        .map(|kv| SerializedKv(kv.key.clone(), kv.value.clone()))
                        .collect(),
                ),
                Element::Link(link) => SerializedElement::Link(link.clone()),
            })
            .collect();
        let root = self.depth == 0;
        SerializedNode {
            codec: root.then(|| config.codec_bytes()),
            bit_width: root.then(|| i64::from(config.bit_width())),
            bucket_size: root.then(|| config.bucket_size() as i64),
            data_map: self.data_map,
            node_map: self.node_map,
            elements,
        }
    }

    /// Structural checks on this node alone; children are checked by the
    /// caller that can load them, as is [`Node::is_collapsible`].
    pub fn is_locally_invariant(&self, config: &Config) -> bool {
        if !self.data_map.is_disjoint(&self.node_map) {
            return false;
        }
        let occupied = self.data_map | self.node_map;
        if self.elements.len() != occupied.count_ones() {
            return false;
        }
        occupied
            .ones()
            .zip(&self.elements)
            .all(|(slot, element)| match element {
                Element::Link(_) => self.node_map.test(slot),
                Element::Bucket(bucket) => {
                    self.data_map.test(slot)
                        && !bucket.is_empty()
                        && bucket.len() <= config.bucket_size()
                        && bucket.windows(2).all(|w| w[0].key < w[1].key)
                        && bucket.iter().all(|kv| {
                            config
                                .hash_key(&kv.key)
                                .and_then(|hash| config.slot(&hash, self.depth))
                                .map_or(false, |s| s == slot)
                        })
                }
            })
    }
}

/// Binary search a sorted bucket for `key`
fn find<V>(bucket: &[Kv<V>], key: &[u8]) -> std::result::Result<usize, usize> {
    bucket.binary_search_by(|kv| kv.key.as_slice().cmp(key))
}

fn decode_bucket<L, V>(
    bucket: Vec<SerializedKv<V>>,
    slot: usize,
    config: &Config,
) -> Result<Element<L, V>> {
    if bucket.is_empty() {
        return Err(Error::malformed(format!("bucket at slot {} is empty", slot)));
    }
    if bucket.len() > config.bucket_size() {
        return Err(Error::malformed(format!(
            "bucket at slot {} holds {} entries, bucket size is {}",
            slot,
            bucket.len(),
            config.bucket_size()
        )));
    }
    let mut entries: Vec<Kv<V>> = bucket
        .into_iter()
        .map(|SerializedKv(key, value)| Kv::new(key, value))
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    if entries.windows(2).any(|w| w[0].key == w[1].key) {
        return Err(Error::malformed(format!(
            "bucket at slot {} has duplicate keys",
            slot
        )));
    }
    Ok(Element::Bucket(entries.into()))
}

/// Distribute an overflowing bucket into fresh nodes starting at `depth`.
///
/// While every entry still shares one slot the chain grows by an empty node;
/// it ends at the first level where the entries spread into buckets that fit.
fn push_down<L, V>(entries: Vec<Kv<V>>, mut depth: usize, config: &Config) -> Result<Vec<Node<L, V>>> {
    let hashes = entries
        .iter()
        .map(|kv| config.hash_key(&kv.key))
        .collect::<Result<Vec<_>>>()?;
    let mut chain = Vec::new();
    loop {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, hash) in hashes.iter().enumerate() {
            groups.entry(config.slot(hash, depth)?).or_default().push(i);
        }
        if groups.len() == 1 {
            chain.push(Node::empty(depth));
            depth += 1;
            continue;
        }

        let mut leaf = Node::empty(depth);
        let mut entries: Vec<Option<Kv<V>>> = entries.into_iter().map(Some).collect();
        for (slot, members) in groups {
            let bucket: Vec<Kv<V>> = members
                .into_iter()
                .filter_map(|i| entries[i].take())
                .collect();
            leaf.data_map = leaf.data_map.set(slot, true);
            leaf.elements.push(Element::Bucket(bucket.into()));
        }
        chain.push(leaf);
        return Ok(chain);
    }
}
