//! Full depth-first walk over every entry, one block at a time

use crate::config::{Config, HasherRegistry};
use crate::model::Kv;
use crate::trie::{Element, Node, SerializedNode};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug)]
struct Frame<L, V> {
    node: Arc<Node<L, V>>,
    /// Index of the next element to scan for a link
    next: usize,
}

/// Entry walk that leaves block loading to the caller
///
/// The entries of the most recently entered node are available from
/// [`EntriesTraversal::entries`] (and `keys`/`values`) right after
/// construction and after each [`EntriesTraversal::next`]. Reading them at
/// those points visits every entry exactly once, in slot order within a node
/// and pre-order across children.
///
/// ```ignore
/// let mut traversal = EntriesTraversal::new(root_block, &registry)?;
/// loop {
///     for kv in traversal.entries() { /* ... */ }
///     match traversal.traverse() {
///         Some(link) => traversal.next(store.load(&link).await?)?,
///         None => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct EntriesTraversal<L, V> {
    config: Config,
    stack: Vec<Frame<L, V>>,
    /// Node whose buckets are currently exposed
    current: Option<Arc<Node<L, V>>>,
    /// Depth of the block requested by the last `traverse`
    awaiting: Option<usize>,
}

impl<L: Clone, V: Clone> EntriesTraversal<L, V> {
    /// Start from a serialized root block
    pub fn new(root_block: SerializedNode<L, V>, registry: &HasherRegistry) -> Result<Self> {
        let config = registry.validate(&root_block.root_options()?)?;
        let node = Node::from_serializable(root_block, 0, &config)?;
        Ok(Self::from_node(Arc::new(node), config))
    }

    /// Start from an already instantiated node
    pub fn from_node(node: Arc<Node<L, V>>, config: Config) -> Self {
        EntriesTraversal {
            config,
            stack: vec![Frame {
                node: Arc::clone(&node),
                next: 0,
            }],
            current: Some(node),
            awaiting: None,
        }
    }

    /// Identifier of the next block to load, or `None` once every node has
    /// been entered
    pub fn traverse(&mut self) -> Option<L> {
        self.current = None;
        while let Some(frame) = self.stack.last_mut() {
            let found = frame
                .node
                .elements()
                .iter()
                .enumerate()
                .skip(frame.next)
                .find_map(|(i, element)| match element {
                    Element::Link(link) => Some((i, link.clone())),
                    Element::Bucket(_) => None,
                });
            match found {
                Some((i, link)) => {
                    frame.next = i + 1;
                    let depth = frame.node.depth() + 1;
                    trace!(depth, "entries traversal needs child block");
                    self.awaiting = Some(depth);
                    return Some(link);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
        trace!("entries traversal exhausted");
        None
    }

    /// Supply the block last requested by [`EntriesTraversal::traverse`]
    pub fn next(&mut self, block: SerializedNode<L, V>) -> Result<()> {
        let depth = self
            .awaiting
            .take()
            .ok_or_else(|| Error::Traversal("no block was requested".into()))?;
        let node = Arc::new(Node::from_serializable(block, depth, &self.config)?);
        self.stack.push(Frame {
            node: Arc::clone(&node),
            next: 0,
        });
        self.current = Some(node);
        Ok(())
    }

    /// Entries held directly by the current node
    pub fn entries(&self) -> impl Iterator<Item = &Kv<V>> {
        self.current.iter().flat_map(|node| node.entries())
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries().map(|kv| kv.key.as_slice())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries().map(|kv| &kv.value)
    }

    /// The node most recently entered, until the next `traverse`
    pub fn current(&self) -> Option<&Node<L, V>> {
        self.current.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Shorthand for [`EntriesTraversal::new`]
pub fn traverse_entries<L: Clone, V: Clone>(
    root_block: SerializedNode<L, V>,
    registry: &HasherRegistry,
) -> Result<EntriesTraversal<L, V>> {
    EntriesTraversal::new(root_block, registry)
}
