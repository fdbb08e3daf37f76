//! The node arena and the content-addressed lookup over it.

use fxhash::FxHashMap;

use crate::content::NodeContent;
use crate::core::{NodeId, NodeKind};
use crate::fingerprint::{ContentHash, fingerprint};
use crate::graph::GraphError;

/// A stored template node.
///
/// `content` and `content_hash` are write-once: after creation a node is
/// only ever touched through its reference count. Structural change is
/// expressed by minting a different node and rewiring edges.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    id: NodeId,
    content: NodeContent,
    content_hash: ContentHash,
    reference_count: u32,
}

impl Node {
    /// The node's identity.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's hierarchy level.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.content.kind()
    }

    /// The node's scalar payload.
    #[must_use]
    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    /// The Merkle fingerprint of the sub-tree rooted here.
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    /// Number of live edges and root-registry entries pointing at this node.
    #[must_use]
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }
}

/// Owns every node in the graph, keyed by identity, with a secondary
/// `(kind, hash) → id` table for content-addressed lookup.
#[derive(Clone, Debug, Default)]
pub struct NodeStore {
    nodes: FxHashMap<NodeId, Node>,
    by_hash: FxHashMap<(NodeKind, ContentHash), NodeId>,
    next_id: u64,
}

impl NodeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a node. Fails with [`GraphError::NotFound`] if absent.
    pub fn get(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::NotFound { node: id })
    }

    /// Whether `id` refers to a live node.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all live nodes. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.values()
    }

    /// The node holding the given content value, if one exists.
    #[must_use]
    pub fn find_by_hash(&self, kind: NodeKind, hash: ContentHash) -> Option<NodeId> {
        self.by_hash.get(&(kind, hash)).copied()
    }

    /// Allocates a new node with `reference_count == 0`.
    ///
    /// The caller must attach an edge or root-registry reference to the new
    /// node before its operation completes; zero-reference nodes are not a
    /// valid resting state.
    pub(crate) fn create(&mut self, content: NodeContent, hash: ContentHash) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        let kind = content.kind();
        let previous = self.by_hash.insert((kind, hash), id);
        debug_assert!(previous.is_none(), "duplicate content hash for {kind}");
        self.nodes.insert(
            id,
            Node {
                id,
                content,
                content_hash: hash,
                reference_count: 0,
            },
        );
        tracing::trace!(node = %id, %kind, %hash, "created node");
        id
    }

    /// Returns the node holding `content` with the given ordered child
    /// hashes, minting it if no equal value is stored. The boolean is true
    /// when a new node was created.
    ///
    /// Never adjusts reference counts: the single point of truth for counts
    /// is the edge / root-registry mutation performed by the caller.
    pub(crate) fn resolve_or_create(
        &mut self,
        content: &NodeContent,
        child_hashes: &[ContentHash],
    ) -> (NodeId, bool) {
        let hash = fingerprint(content, child_hashes);
        match self.find_by_hash(content.kind(), hash) {
            Some(id) => (id, false),
            None => (self.create(content.clone(), hash), true),
        }
    }

    /// Increments a node's reference count, returning the new count.
    pub(crate) fn incref(&mut self, id: NodeId) -> Result<u32, GraphError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::NotFound { node: id })?;
        node.reference_count += 1;
        Ok(node.reference_count)
    }

    /// Decrements a node's reference count, returning the new count.
    ///
    /// A count of zero makes the node eligible for removal; the graph layer
    /// is responsible for purging it (and cascading to its children) within
    /// the same operation. Decrementing an already-zero count fails with
    /// [`GraphError::RefcountUnderflow`].
    pub(crate) fn decref(&mut self, id: NodeId) -> Result<u32, GraphError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::NotFound { node: id })?;
        if node.reference_count == 0 {
            return Err(GraphError::RefcountUnderflow { node: id });
        }
        node.reference_count -= 1;
        Ok(node.reference_count)
    }

    /// Removes a node from the arena and the content-addressed table.
    pub(crate) fn remove(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or(GraphError::NotFound { node: id })?;
        self.by_hash.remove(&(node.kind(), node.content_hash));
        Ok(node)
    }

    /// Restores a node row verbatim; used when loading a snapshot.
    pub(crate) fn insert_row(
        &mut self,
        id: NodeId,
        content: NodeContent,
        hash: ContentHash,
        reference_count: u32,
    ) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.by_hash.insert((content.kind(), hash), id);
        self.next_id = self.next_id.max(id.index() + 1);
        self.nodes.insert(
            id,
            Node {
                id,
                content,
                content_hash: hash,
                reference_count,
            },
        );
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::content::{BlockMeta, SetPrescription};

    fn set_content(reps: u32) -> NodeContent {
        SetPrescription::new(reps, 20_000, 60).into()
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut store = NodeStore::new();
        let (a, created_a) = store.resolve_or_create(&set_content(10), &[]);
        let (b, created_b) = store.resolve_or_create(&set_content(10), &[]);
        assert_eq!(a, b);
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn distinct_content_distinct_nodes() {
        let mut store = NodeStore::new();
        let (a, _) = store.resolve_or_create(&set_content(10), &[]);
        let (b, _) = store.resolve_or_create(&set_content(12), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn find_by_hash_respects_kind() {
        let mut store = NodeStore::new();
        let content = set_content(10);
        let (id, _) = store.resolve_or_create(&content, &[]);
        let hash = store.get(id).unwrap().content_hash();
        assert_eq!(store.find_by_hash(NodeKind::Set, hash), Some(id));
        assert_eq!(store.find_by_hash(NodeKind::Block, hash), None);
    }

    #[test]
    fn refcounts_start_at_zero_and_underflow_fails() {
        let mut store = NodeStore::new();
        let (id, _) = store.resolve_or_create(&set_content(10), &[]);
        assert_eq!(store.get(id).unwrap().reference_count(), 0);
        assert_eq!(store.incref(id).unwrap(), 1);
        assert_eq!(store.decref(id).unwrap(), 0);
        let err = store.decref(id).unwrap_err();
        assert!(matches!(err, GraphError::RefcountUnderflow { .. }));
    }

    #[test]
    fn remove_clears_hash_lookup() {
        let mut store = NodeStore::new();
        let content = NodeContent::from(BlockMeta::new("A"));
        let (id, _) = store.resolve_or_create(&content, &[]);
        let hash = store.get(id).unwrap().content_hash();
        store.remove(id).unwrap();
        assert!(!store.contains(id));
        assert_eq!(store.find_by_hash(NodeKind::Block, hash), None);
        // The value can be minted again under a fresh identity.
        let (id2, created) = store.resolve_or_create(&content, &[]);
        assert!(created);
        assert_ne!(id, id2);
    }
}
