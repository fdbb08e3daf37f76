//! Whole-store integrity audit.
//!
//! Recomputes every derived quantity — reference counts from live referents,
//! fingerprints from payloads and child hashes — and fails on the first
//! drift. This is the executable form of the store invariants; tests run it
//! after every mutation sequence, and snapshot import runs it before
//! accepting foreign data.

use std::collections::HashMap;

use fxhash::FxHashMap;
use itertools::Itertools;
use thiserror::Error;

use crate::core::{NodeId, NodeKind};
use crate::fingerprint::{ContentHash, fingerprint};
use crate::graph::registry::RootKey;
use crate::graph::TemplateGraph;

/// Integrity violations reported by [`TemplateGraph::validate`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// A stored reference count disagrees with the number of live edges and
    /// root entries pointing at the node.
    #[error("refcount drift on {node}: stored {stored}, counted {counted}")]
    RefcountDrift {
        /// The affected node.
        node: NodeId,
        /// The count carried by the node.
        stored: u32,
        /// The count derived from edges and root entries.
        counted: u32,
    },
    /// A stored fingerprint disagrees with the recomputed one.
    #[error("hash drift on {node}: stored {stored}, computed {computed}")]
    HashDrift {
        /// The affected node.
        node: NodeId,
        /// The fingerprint carried by the node.
        stored: ContentHash,
        /// The fingerprint recomputed from content and children.
        computed: ContentHash,
    },
    /// Two live nodes hold the same value.
    #[error("nodes {first} and {second} share one {kind} value")]
    DuplicateValue {
        /// The node encountered first.
        first: NodeId,
        /// The duplicate.
        second: NodeId,
        /// Their shared kind.
        kind: NodeKind,
    },
    /// An edge points at a node that is not in the store.
    #[error("edge from {parent} to missing node {child}")]
    DanglingEdge {
        /// The edge's parent.
        parent: NodeId,
        /// The missing child.
        child: NodeId,
    },
    /// A root-registry entry points at a node that is not in the store.
    #[error("{key} points at missing node {root}")]
    DanglingRoot {
        /// The registry entry.
        key: RootKey,
        /// The missing root.
        root: NodeId,
    },
    /// A node with zero references survived past the operation that dropped
    /// it to zero.
    #[error("unreferenced node {node} was not purged")]
    UnpurgedNode {
        /// The leaked node.
        node: NodeId,
    },
    /// An edge connects kinds that are not adjacent levels.
    #[error("edge from {parent} ({parent_kind}) to {child} ({child_kind}) violates the level order")]
    LevelViolation {
        /// The edge's parent.
        parent: NodeId,
        /// The parent's kind.
        parent_kind: NodeKind,
        /// The edge's child.
        child: NodeId,
        /// The child's kind.
        child_kind: NodeKind,
    },
}

impl TemplateGraph {
    /// Audits the store against its invariants, failing on the first
    /// violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut counted: FxHashMap<NodeId, u32> = FxHashMap::default();

        for (parent, _, child) in self.relations.iter_all() {
            if !self.store.contains(child) {
                return Err(ValidationError::DanglingEdge { parent, child });
            }
            let parent_kind = match self.store.get(parent) {
                Ok(node) => node.kind(),
                // A parent key that is not a live node is itself dangling.
                Err(_) => {
                    return Err(ValidationError::DanglingEdge {
                        parent,
                        child,
                    });
                }
            };
            let child_kind = self.store.get(child).expect("checked above").kind();
            if parent_kind.child() != Some(child_kind) {
                return Err(ValidationError::LevelViolation {
                    parent,
                    parent_kind,
                    child,
                    child_kind,
                });
            }
            *counted.entry(child).or_default() += 1;
        }
        for (key, root) in self.roots.roots() {
            if !self.store.contains(root) {
                return Err(ValidationError::DanglingRoot { key, root });
            }
            *counted.entry(root).or_default() += 1;
        }

        let mut seen: HashMap<(NodeKind, ContentHash), NodeId> = HashMap::new();
        for node in self.store.iter().sorted_by_key(|n| n.id()) {
            let stored = node.reference_count();
            let count = counted.get(&node.id()).copied().unwrap_or(0);
            if count == 0 {
                return Err(ValidationError::UnpurgedNode { node: node.id() });
            }
            if stored != count {
                return Err(ValidationError::RefcountDrift {
                    node: node.id(),
                    stored,
                    counted: count,
                });
            }

            let child_hashes = self
                .relations
                .children_of(node.id())
                .map(|(_, child)| self.store.get(child).expect("edges checked").content_hash())
                .collect_vec();
            let computed = fingerprint(node.content(), &child_hashes);
            if computed != node.content_hash() {
                return Err(ValidationError::HashDrift {
                    node: node.id(),
                    stored: node.content_hash(),
                    computed,
                });
            }

            if let Some(&first) = seen.get(&(node.kind(), node.content_hash())) {
                return Err(ValidationError::DuplicateValue {
                    first,
                    second: node.id(),
                    kind: node.kind(),
                });
            }
            seen.insert((node.kind(), node.content_hash()), node.id());
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::content::{PhaseMeta, ProgramMeta};
    use crate::core::Ordinal;
    use crate::graph::TreeSpec;

    #[fixture]
    fn graph() -> TemplateGraph {
        let mut graph = TemplateGraph::new();
        graph
            .publish_template(&TreeSpec::new(
                ProgramMeta::new("P", ""),
                vec![TreeSpec::new(PhaseMeta::new("W1"), vec![])],
            ))
            .unwrap();
        graph
    }

    #[rstest]
    fn clean_store_validates(graph: TemplateGraph) {
        graph.validate().unwrap();
    }

    #[rstest]
    fn forged_extra_edge_is_refcount_drift(mut graph: TemplateGraph) {
        let (_, root) = graph.templates().next().unwrap();
        let phase = graph.child_at(root, Ordinal::ZERO).unwrap();
        // Edge inserted without the matching incref.
        graph.relations.insert(root, phase, Ordinal::new(5)).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, ValidationError::RefcountDrift { .. } | ValidationError::HashDrift { .. }));
    }

    #[rstest]
    fn forged_refcount_is_detected(mut graph: TemplateGraph) {
        let (_, root) = graph.templates().next().unwrap();
        graph.store.incref(root).unwrap();
        let err = graph.validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::RefcountDrift {
                node: root,
                stored: 2,
                counted: 1,
            }
        );
    }

    #[rstest]
    fn dangling_root_is_detected(mut graph: TemplateGraph) {
        let (tpl, root) = graph.templates().next().unwrap();
        // Drop the root node out from under the registry entry.
        let phase = graph.child_at(root, Ordinal::ZERO).unwrap();
        graph.relations.remove(root, phase).unwrap();
        graph.store.remove(root).unwrap();
        let err = graph.validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::DanglingRoot {
                key: RootKey::Template(tpl),
                root,
            }
        );
    }

    #[rstest]
    fn orphaned_subtree_is_detected(mut graph: TemplateGraph) {
        let (_, root) = graph.templates().next().unwrap();
        let phase = graph.child_at(root, Ordinal::ZERO).unwrap();
        // Remove the edge but leave the child node and its count behind.
        graph.relations.remove(root, phase).unwrap();
        let err = graph.validate().unwrap_err();
        assert_eq!(err, ValidationError::UnpurgedNode { node: phase });
    }
}
