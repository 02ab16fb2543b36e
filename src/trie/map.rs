//! Immutable map handle over a store

use super::{Insertion, Node, Removal, SerializedNode};
use crate::config::{Config, HasherRegistry, Options};
use crate::model::Kv;
use crate::store::Store;
use crate::traverse::{EntriesTraversal, GetTraversal, Lookup};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// One version of a map
///
/// Every update returns a new `Map` and leaves this one usable; versions share
/// all unchanged child nodes through the store. Cloning a handle is cheap.
pub struct Map<'s, S: Store, V> {
    store: &'s S,
    /// Store identifier of `root`, `None` for a handle built without saving
    id: Option<S::Link>,
    config: Config,
    root: Arc<Node<S::Link, V>>,
}

impl<'s, S: Store, V> Clone for Map<'s, S, V> {
    fn clone(&self) -> Self {
        Map {
            store: self.store,
            id: self.id.clone(),
            config: self.config.clone(),
            root: Arc::clone(&self.root),
        }
    }
}

impl<'s, S: Store, V> fmt::Debug for Map<'s, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("id", &self.id)
            .field("depth", &self.root.depth())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'s, S, V> Map<'s, S, V>
where
    S: Store,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Create and save an empty map
    pub async fn create(store: &'s S, registry: &HasherRegistry, options: &Options) -> Result<Self> {
        let config = registry.validate(options)?;
        let root = Node::empty(0);
        let id = save_node(store, &root, &config).await?;
        Ok(Map {
            store,
            id: Some(id),
            config,
            root: Arc::new(root),
        })
    }

    /// Load a map from the identifier of its root node
    pub async fn load(store: &'s S, registry: &HasherRegistry, id: S::Link) -> Result<Self> {
        Self::load_at(store, registry, id, 0, None).await
    }

    /// Load the node at `id` as a map of its own.
    ///
    /// At depth 0 the node carries its configuration and `options` is
    /// ignored. Deeper nodes need `options` and must not carry configuration.
    pub async fn load_at(
        store: &'s S,
        registry: &HasherRegistry,
        id: S::Link,
        depth: usize,
        options: Option<&Options>,
    ) -> Result<Self> {
        let serialized = store.load(&id).await?;
        debug!(?id, depth, "loaded map node");
        Self::from_serializable(store, Some(id), serialized, registry, options, depth)
    }

    /// Instantiate a map from a serialized node without touching the store
    pub fn from_serializable(
        store: &'s S,
        id: Option<S::Link>,
        serialized: SerializedNode<S::Link, V>,
        registry: &HasherRegistry,
        options: Option<&Options>,
        depth: usize,
    ) -> Result<Self> {
        let config = if depth == 0 {
            registry.validate(&serialized.root_options()?)?
        } else {
            let options = options.ok_or_else(|| {
                Error::config(format!("options are required for a node at depth {}", depth))
            })?;
            registry.validate(options)?
        };
        let root = Node::from_serializable(serialized, depth, &config)?;
        Ok(Map {
            store,
            id,
            config,
            root: Arc::new(root),
        })
    }

    /// Instantiate a child node of this map as a map sharing its store and
    /// configuration
    pub fn from_child_serializable(
        &self,
        id: Option<S::Link>,
        serialized: SerializedNode<S::Link, V>,
        depth: usize,
    ) -> Result<Self> {
        let root = Node::from_serializable(serialized, depth, &self.config)?;
        Ok(Map {
            store: self.store,
            id,
            config: self.config.clone(),
            root: Arc::new(root),
        })
    }

    /// Identifier of this version's root node
    pub fn id(&self) -> Option<&S::Link> {
        self.id.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn root(&self) -> &Node<S::Link, V> {
        &self.root
    }

    pub fn store(&self) -> &'s S {
        self.store
    }

    /// Return a new version with `key` set to `value`
    pub async fn set(&self, key: impl AsRef<[u8]>, value: V) -> Result<Self> {
        let key = key.as_ref();
        let hash = self.config.hash_key(key)?;
        let kv = Kv::new(key, value);

        // nodes along the path that must be relinked to their new child
        let mut path: Vec<Arc<Node<S::Link, V>>> = Vec::new();
        let mut current = Arc::clone(&self.root);
        let mut child = loop {
            match current.insert(&kv, &hash, &self.config)? {
                Insertion::Descend(link) => {
                    let next = self.load_child(&link, current.depth() + 1).await?;
                    path.push(current);
                    current = Arc::new(next);
                }
                Insertion::Updated(node) => break node,
                Insertion::Split(mut chain) => {
                    let leaf = chain
                        .pop()
                        .ok_or_else(|| Error::malformed("bucket split produced no nodes"))?;
                    path.push(current);
                    path.extend(chain.into_iter().map(Arc::new));
                    break leaf;
                }
            }
        };

        while let Some(parent) = path.pop() {
            let link = save_node(self.store, &child, &self.config).await?;
            let slot = self.config.slot(&hash, parent.depth())?;
            child = parent.with_link(slot, link);
        }
        self.commit(child).await
    }

    /// Look up `key`
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<V>> {
        let mut traversal =
            GetTraversal::from_node(Arc::clone(&self.root), key, self.config.clone())?;
        loop {
            match traversal.traverse()? {
                Lookup::Done(value) => return Ok(value),
                Lookup::NeedBlock(link) => {
                    let block = self.store.load(&link).await?;
                    debug!(?link, "loaded node for lookup");
                    traversal.next(block)?;
                }
            }
        }
    }

    pub async fn has(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Return a version without `key`; when `key` is absent this is the same
    /// version and nothing is saved
    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref();
        let hash = self.config.hash_key(key)?;

        let mut path: Vec<Arc<Node<S::Link, V>>> = Vec::new();
        let mut current = Arc::clone(&self.root);
        let mut child = loop {
            match current.remove(key, &hash, &self.config)? {
                Removal::Descend(link) => {
                    let next = self.load_child(&link, current.depth() + 1).await?;
                    path.push(current);
                    current = Arc::new(next);
                }
                Removal::Unchanged => return Ok(self.clone()),
                Removal::Removed(node) => break node,
            }
        };

        while let Some(parent) = path.pop() {
            let slot = self.config.slot(&hash, parent.depth())?;
            child = match parent.absorb_child(slot, &child, &self.config) {
                Some(collapsed) => collapsed,
                None => {
                    let link = save_node(self.store, &child, &self.config).await?;
                    parent.with_link(slot, link)
                }
            };
        }
        self.commit(child).await
    }

    /// Number of entries, loading every node
    pub async fn size(&self) -> Result<usize> {
        let mut traversal = EntriesTraversal::from_node(Arc::clone(&self.root), self.config.clone());
        let mut size = 0;
        loop {
            size += traversal.current().map_or(0, Node::direct_entry_count);
            let Some(link) = traversal.traverse() else {
                return Ok(size);
            };
            traversal.next(self.store.load(&link).await?)?;
        }
    }

    /// Lazily walk every entry
    pub fn entries(&self) -> Entries<'s, S, V> {
        Entries::new(self)
    }

    pub fn keys(&self) -> Keys<'s, S, V> {
        Keys(self.entries())
    }

    pub fn values(&self) -> Values<'s, S, V> {
        Values(self.entries())
    }

    /// Lazily walk this node's identifier followed by every descendant's
    pub fn ids(&self) -> Ids<'s, S, V> {
        Ids {
            store: self.store,
            config: self.config.clone(),
            own: self.id.clone(),
            stack: links_of(self.root.as_ref()),
            _values: std::marker::PhantomData,
        }
    }

    /// Serialized form of the root node
    pub fn to_serializable(&self) -> SerializedNode<S::Link, V> {
        self.root.to_serializable(&self.config)
    }

    /// Check the structure of the whole trie, loading every node.
    ///
    /// A structural defect, including an undecodable child, is `Ok(false)`;
    /// store failures are returned as errors.
    pub async fn is_invariant(&self) -> Result<bool> {
        if !self.root.is_locally_invariant(&self.config) {
            warn!(depth = self.root.depth(), "map root violates node invariants");
            return Ok(false);
        }
        let mut stack = links_of(self.root.as_ref());
        while let Some((link, depth)) = stack.pop() {
            let serialized: SerializedNode<S::Link, V> = self.store.load(&link).await?;
            let node = match Node::from_serializable(serialized, depth, &self.config) {
                Ok(node) => node,
                Err(err @ (Error::MalformedNode(_) | Error::DepthRange { .. })) => {
                    warn!(?link, depth, error = %err, "child node is malformed");
                    return Ok(false);
                }
                Err(err) => return Err(err),
            };
            if !node.is_locally_invariant(&self.config) || node.is_collapsible(&self.config) {
                warn!(?link, depth, "child node violates node invariants");
                return Ok(false);
            }
            stack.extend(links_of(&node));
        }
        Ok(true)
    }

    async fn load_child(&self, link: &S::Link, depth: usize) -> Result<Node<S::Link, V>> {
        let serialized = self.store.load(link).await?;
        debug!(?link, depth, "loaded child node");
        Node::from_serializable(serialized, depth, &self.config)
    }

    /// Save `root` and wrap it as the next version
    async fn commit(&self, root: Node<S::Link, V>) -> Result<Self> {
        let id = save_node(self.store, &root, &self.config).await?;
        Ok(Map {
            store: self.store,
            id: Some(id),
            config: self.config.clone(),
            root: Arc::new(root),
        })
    }
}

async fn save_node<S: Store, V: Clone + Serialize>(
    store: &S,
    node: &Node<S::Link, V>,
    config: &Config,
) -> Result<S::Link> {
    let link = store.save(&node.to_serializable(config)).await?;
    debug!(?link, depth = node.depth(), "saved node");
    Ok(link)
}

/// Child links with their depth, reversed so popping visits slot order
fn links_of<L: Clone, V>(node: &Node<L, V>) -> Vec<(L, usize)> {
    let depth = node.depth() + 1;
    let mut links: Vec<(L, usize)> = node.links().map(|l| (l.clone(), depth)).collect();
    links.reverse();
    links
}

/// Lazy sequence of every entry of a map
pub struct Entries<'s, S: Store, V> {
    store: &'s S,
    traversal: EntriesTraversal<S::Link, V>,
    pending: std::vec::IntoIter<Kv<V>>,
}

impl<'s, S, V> Entries<'s, S, V>
where
    S: Store,
    V: Clone + DeserializeOwned,
{
    fn new(map: &Map<'s, S, V>) -> Self {
        let traversal = EntriesTraversal::from_node(Arc::clone(&map.root), map.config.clone());
        let pending = traversal.entries().cloned().collect::<Vec<_>>().into_iter();
        Entries {
            store: map.store,
            traversal,
            pending,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Kv<V>>> {
        loop {
            if let Some(kv) = self.pending.next() {
                return Ok(Some(kv));
            }
            let Some(link) = self.traversal.traverse() else {
                return Ok(None);
            };
            let block = self.store.load(&link).await?;
            debug!(?link, "loaded node for iteration");
            self.traversal.next(block)?;
            self.pending = self.traversal.entries().cloned().collect::<Vec<_>>().into_iter();
        }
    }

    pub async fn try_collect(mut self) -> Result<Vec<Kv<V>>> {
        let mut out = Vec::new();
        while let Some(kv) = self.next().await? {
            out.push(kv);
        }
        Ok(out)
    }
}

/// Lazy sequence of every key of a map
pub struct Keys<'s, S: Store, V>(Entries<'s, S, V>);

impl<'s, S, V> Keys<'s, S, V>
where
    S: Store,
    V: Clone + DeserializeOwned,
{
    pub async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.0.next().await?.map(|kv| kv.key))
    }

    pub async fn try_collect(mut self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        while let Some(key) = self.next().await? {
            out.push(key);
        }
        Ok(out)
    }
}

/// Lazy sequence of every value of a map
pub struct Values<'s, S: Store, V>(Entries<'s, S, V>);

impl<'s, S, V> Values<'s, S, V>
where
    S: Store,
    V: Clone + DeserializeOwned,
{
    pub async fn next(&mut self) -> Result<Option<V>> {
        Ok(self.0.next().await?.map(|kv| kv.value))
    }

    pub async fn try_collect(mut self) -> Result<Vec<V>> {
        let mut out = Vec::new();
        while let Some(value) = self.next().await? {
            out.push(value);
        }
        Ok(out)
    }
}

/// Lazy sequence of the store identifiers of a map's nodes, pre-order
pub struct Ids<'s, S: Store, V> {
    store: &'s S,
    config: Config,
    own: Option<S::Link>,
    stack: Vec<(S::Link, usize)>,
    _values: std::marker::PhantomData<fn() -> V>,
}

impl<'s, S, V> Ids<'s, S, V>
where
    S: Store,
    V: Clone + DeserializeOwned,
{
    pub async fn next(&mut self) -> Result<Option<S::Link>> {
        if let Some(id) = self.own.take() {
            return Ok(Some(id));
        }
        let Some((link, depth)) = self.stack.pop() else {
            return Ok(None);
        };
        let serialized: SerializedNode<S::Link, V> = self.store.load(&link).await?;
        let node = Node::from_serializable(serialized, depth, &self.config)?;
        self.stack.extend(links_of(&node));
        Ok(Some(link))
    }

    pub async fn try_collect(mut self) -> Result<Vec<S::Link>> {
        let mut out = Vec::new();
        while let Some(id) = self.next().await? {
            out.push(id);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::multicodec;
    use crate::store::MemoryStore;

    fn identity() -> Options {
        Options::new(multicodec::IDENTITY)
            .with_bit_width(8)
            .with_bucket_size(2)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        let registry = HasherRegistry::with_defaults();
        let map = Map::<_, String>::create(&store, &registry, &identity()).await.unwrap();
        assert_eq!(map.depth(), 0);
        assert!(map.id().is_some());

        let map = map.set("foo", "bar".to_string()).await.unwrap();
        assert_eq!(map.get("foo").await.unwrap(), Some("bar".to_string()));
        assert!(map.has(b"foo").await.unwrap());
        assert!(!map.has(b"bar").await.unwrap());

        let empty = map.delete("foo").await.unwrap();
        assert_eq!(empty.size().await.unwrap(), 0);
        assert!(empty.root().is_empty());
    }

    #[tokio::test]
    async fn test_split_and_collapse() {
        let store = MemoryStore::new();
        let registry = HasherRegistry::with_defaults();
        let mut map = Map::<_, u32>::create(&store, &registry, &identity()).await.unwrap();
        // identity hashing sends all three keys to slot 7 at the root
        for i in 1..=3u8 {
            map = map.set([7, i], u32::from(i)).await.unwrap();
        }
        assert_eq!(map.root().direct_node_count(), 1);
        assert_eq!(map.root().direct_entry_count(), 0);
        assert_eq!(map.size().await.unwrap(), 3);
        assert!(map.is_invariant().await.unwrap());
        assert_eq!(map.ids().try_collect().await.unwrap().len(), 2);

        let map = map.delete([7, 2]).await.unwrap();
        assert_eq!(map.root().direct_node_count(), 0);
        assert_eq!(map.root().direct_entry_count(), 2);
        assert_eq!(map.get([7, 3]).await.unwrap(), Some(3));
        assert!(map.is_invariant().await.unwrap());
    }

    #[tokio::test]
    async fn test_deep_chain_when_prefixes_collide() {
        let store = MemoryStore::new();
        let registry = HasherRegistry::with_defaults();
        let mut map = Map::<_, u32>::create(&store, &registry, &identity()).await.unwrap();
        for i in 1..=3u8 {
            map = map.set([1, 1, 1, i], u32::from(i)).await.unwrap();
        }
        // root -> empty -> empty -> leaf
        assert_eq!(map.ids().try_collect().await.unwrap().len(), 4);
        assert!(map.is_invariant().await.unwrap());
        assert_eq!(map.get([1, 1, 1, 2]).await.unwrap(), Some(2));

        let map = map.delete([1, 1, 1, 1]).await.unwrap();
        assert_eq!(map.ids().try_collect().await.unwrap().len(), 1);
        assert_eq!(map.root().direct_entry_count(), 2);
        assert!(map.is_invariant().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_child_as_map() {
        let store = MemoryStore::new();
        let registry = HasherRegistry::with_defaults();
        let mut map = Map::<_, u32>::create(&store, &registry, &identity()).await.unwrap();
        for i in 1..=3u8 {
            map = map.set([4, i], u32::from(i)).await.unwrap();
        }
        let child_id = *map.root().links().next().unwrap();

        let child = Map::<_, u32>::load_at(&store, &registry, child_id, 1, Some(&identity()))
            .await
            .unwrap();
        assert_eq!(child.depth(), 1);
        assert_eq!(child.size().await.unwrap(), 3);
        assert_eq!(child.get([4, 2]).await.unwrap(), Some(2));

        let missing = Map::<_, u32>::load_at(&store, &registry, child_id, 1, None).await;
        assert!(matches!(missing, Err(Error::ConfigValidation(_))));

        let serialized: SerializedNode<_, u32> = store.load(&child_id).await.unwrap();
        let again = map.from_child_serializable(Some(child_id), serialized, 1).unwrap();
        assert_eq!(again.to_serializable(), child.to_serializable());
    }
}
