//! Point lookup, one block at a time

use crate::config::{Config, HasherRegistry};
use crate::trie::{Node, Probe, SerializedNode};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::trace;

/// State reported by [`GetTraversal::traverse`]
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup<L, V> {
    /// Load this block and hand it to [`GetTraversal::next`]
    NeedBlock(L),
    /// The lookup finished; `None` means the key is absent
    Done(Option<V>),
}

/// Lookup state machine that leaves block loading to the caller
///
/// ```ignore
/// let mut traversal = GetTraversal::new(root_block, b"key", &registry)?;
/// let value = loop {
///     match traversal.traverse()? {
///         Lookup::NeedBlock(link) => traversal.next(store.load(&link).await?)?,
///         Lookup::Done(value) => break value,
///     }
/// };
/// ```
#[derive(Debug)]
pub struct GetTraversal<L, V> {
    config: Config,
    key: Vec<u8>,
    hash: Vec<u8>,
    node: Arc<Node<L, V>>,
    awaiting: bool,
    result: Option<Option<V>>,
}

impl<L: Clone, V: Clone> GetTraversal<L, V> {
    /// Start a lookup of `key` from a serialized root block
    pub fn new(
        root_block: SerializedNode<L, V>,
        key: impl AsRef<[u8]>,
        registry: &HasherRegistry,
    ) -> Result<Self> {
        let config = registry.validate(&root_block.root_options()?)?;
        let node = Node::from_serializable(root_block, 0, &config)?;
        Self::from_node(Arc::new(node), key, config)
    }

    /// Start a lookup from an already instantiated node
    pub fn from_node(node: Arc<Node<L, V>>, key: impl AsRef<[u8]>, config: Config) -> Result<Self> {
        let key = key.as_ref().to_vec();
        let hash = config.hash_key(&key)?;
        Ok(GetTraversal {
            config,
            key,
            hash,
            node,
            awaiting: false,
            result: None,
        })
    }

    /// Advance using the current node
    pub fn traverse(&mut self) -> Result<Lookup<L, V>> {
        if let Some(result) = &self.result {
            return Ok(Lookup::Done(result.clone()));
        }
        match self.node.lookup(&self.key, &self.hash, &self.config)? {
            Probe::Found(value) => {
                trace!(depth = self.node.depth(), "lookup hit");
                self.result = Some(Some(value.clone()));
            }
            Probe::Missing => {
                trace!(depth = self.node.depth(), "lookup miss");
                self.result = Some(None);
            }
            Probe::Descend(link) => {
                trace!(depth = self.node.depth(), "lookup needs child block");
                self.awaiting = true;
                return Ok(Lookup::NeedBlock(link.clone()));
            }
        }
        Ok(Lookup::Done(self.result.clone().flatten()))
    }

    /// Supply the block last requested by [`GetTraversal::traverse`]
    pub fn next(&mut self, block: SerializedNode<L, V>) -> Result<()> {
        if !self.awaiting {
            return Err(Error::Traversal("no block was requested".into()));
        }
        let node = Node::from_serializable(block, self.node.depth() + 1, &self.config)?;
        self.node = Arc::new(node);
        self.awaiting = false;
        Ok(())
    }

    /// The value found, once the traversal is done
    pub fn value(&self) -> Option<&V> {
        self.result.as_ref().and_then(Option::as_ref)
    }

    pub fn is_done(&self) -> bool {
        self.result.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Shorthand for [`GetTraversal::new`]
pub fn traverse_get<L: Clone, V: Clone>(
    root_block: SerializedNode<L, V>,
    key: impl AsRef<[u8]>,
    registry: &HasherRegistry,
) -> Result<GetTraversal<L, V>> {
    GetTraversal::new(root_block, key, registry)
}
