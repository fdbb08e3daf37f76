//! The copy-on-write edit engine.
//!
//! An edit names a root-registry entry, a path from its root to a target
//! node, and an operation on that target. The engine never mutates a node
//! that other referents can see: it computes the target's replacement value,
//! resolves it through the content-addressed store (which reuses an existing
//! node whenever the value already exists — including the pre-edit node
//! itself, the common no-op case), then walks the path upward resolving a
//! replacement for every ancestor, and finally swaps the registry entry's
//! single root reference. Abandoned nodes are reclaimed by the reference
//! cascade triggered by that swap.

use itertools::Itertools;

use crate::content::NodeContent;
use crate::core::{NodeId, Ordinal};
use crate::fingerprint::ContentHash;
use crate::graph::registry::RootKey;
use crate::graph::{GraphError, Interned, TemplateGraph};

/// A declarative sub-tree value: the authoring input for whole programs,
/// inserted sub-trees and upserts.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TreeSpec {
    /// Scalar payload of this node.
    pub content: NodeContent,
    /// Children in order. Must be empty for Set-kind content.
    pub children: Vec<TreeSpec>,
}

impl TreeSpec {
    /// A sub-tree with children.
    pub fn new(content: impl Into<NodeContent>, children: Vec<TreeSpec>) -> Self {
        TreeSpec {
            content: content.into(),
            children,
        }
    }

    /// A childless sub-tree.
    pub fn leaf(content: impl Into<NodeContent>) -> Self {
        TreeSpec {
            content: content.into(),
            children: Vec::new(),
        }
    }
}

/// One hop of an edit path: the parent the caller observed and the ordinal
/// of the child to descend into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PathStep {
    /// The parent node the caller saw at this level.
    pub parent: NodeId,
    /// The ordinal of the hop's child under that parent.
    pub ordinal: Ordinal,
}

impl PathStep {
    /// Creates a path step.
    #[must_use]
    pub fn new(parent: NodeId, ordinal: Ordinal) -> Self {
        PathStep { parent, ordinal }
    }
}

/// An operation on the node at the end of an edit path.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum EditOp {
    /// Insert `subtree` as a new child of the target. With `ordinal: None`
    /// the child is appended after the current maximum ordinal; otherwise
    /// the given ordinal must be vacant.
    Insert {
        /// Position for the new child, or `None` to append.
        ordinal: Option<Ordinal>,
        /// The sub-tree value to insert.
        subtree: TreeSpec,
    },
    /// Remove the child at `ordinal`. Removing the last child leaves a
    /// valid, empty container: "a block with no exercises" is a meaningful
    /// template state, not a deletion of the block.
    Remove {
        /// Position of the child to remove.
        ordinal: Ordinal,
    },
    /// Replace the target's own scalar content, keeping its children. At an
    /// empty path this edits the program's metadata itself; the replacement
    /// still resolves through the store, so two programs that become
    /// byte-identical converge to one node.
    Replace {
        /// The new scalar payload; must keep the target's kind.
        content: NodeContent,
    },
    /// Reassign the ordinals of the target's children. `moves` maps old
    /// ordinals to new ones; unnamed children keep their position.
    Reorder {
        /// `(from, to)` ordinal pairs.
        moves: Vec<(Ordinal, Ordinal)>,
    },
}

impl EditOp {
    fn name(&self) -> &'static str {
        match self {
            EditOp::Insert { .. } => "insert",
            EditOp::Remove { .. } => "remove",
            EditOp::Replace { .. } => "replace",
            EditOp::Reorder { .. } => "reorder",
        }
    }
}

/// What an applied edit did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditReport {
    /// Root the registry entry pointed at before the edit.
    pub old_root: NodeId,
    /// Root it points at now. Equal to `old_root` for a no-op edit.
    pub new_root: NodeId,
    /// The node now standing at the target position.
    pub target: NodeId,
    /// The node that stood there before.
    pub old_target: NodeId,
    /// True when `target` was freshly minted for this edit (a divergent
    /// copy), false when the edit converged to an already-existing node.
    pub cloned: bool,
}

/// Outcome of a sub-tree upsert, the content-addressed boundary contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpsertReport {
    /// The node now holding the upserted sub-tree value.
    pub id: NodeId,
    /// Its Merkle fingerprint.
    pub content_hash: ContentHash,
    /// True when a divergent value forced a new node.
    pub cloned: bool,
    /// The node's reference count after rewiring.
    pub reference_count: u32,
    /// The node previously at this position; present only when `cloned`.
    pub original_id: Option<NodeId>,
}

/// A resolved hop: `child` is what `(parent, ordinal)` pointed at when the
/// path was validated.
#[derive(Clone, Copy, Debug)]
struct Hop {
    parent: NodeId,
    ordinal: Ordinal,
    child: NodeId,
}

impl TemplateGraph {
    /// Applies an edit to the tree registered under `key`.
    ///
    /// The path is validated hop by hop against the current relation index;
    /// any mismatch with the caller's recorded view fails with
    /// [`GraphError::StalePath`] before anything is changed. On success the
    /// registry entry points at the (possibly unchanged) new root and every
    /// node abandoned by the rewrite has been reclaimed.
    pub fn apply_edit(
        &mut self,
        key: RootKey,
        path: &[PathStep],
        edit: EditOp,
    ) -> Result<EditReport, GraphError> {
        let root = self.root(key)?;
        let hops = self.resolve_path(root, path)?;
        let target = hops.last().map_or(root, |hop| hop.child);

        let op = edit.name();
        let (content, children) = self.rewrite_target(target, edit)?;
        let replacement = self.resolve_with_children(&content, &children)?;
        let report = self.commit_rewrite(key, root, &hops, target, replacement)?;
        tracing::debug!(
            %key,
            op,
            old_root = %report.old_root,
            new_root = %report.new_root,
            cloned = report.cloned,
            "applied edit"
        );
        Ok(report)
    }

    /// Content-addressed upsert of a sub-tree under the container at `path`.
    ///
    /// With `ordinal: None` the sub-tree is appended as a new child; with an
    /// occupied ordinal the child at that slot is replaced by the given
    /// value as a single edit. The report states whether a new node had to
    /// be minted (`cloned`) or an existing equal value was reused.
    pub fn upsert_subtree(
        &mut self,
        key: RootKey,
        path: &[PathStep],
        ordinal: Option<Ordinal>,
        spec: &TreeSpec,
    ) -> Result<UpsertReport, GraphError> {
        let root = self.root(key)?;
        let hops = self.resolve_path(root, path)?;
        let container = hops.last().map_or(root, |hop| hop.child);

        let container_kind = self.node(container)?.kind();
        let spec_kind = spec.content.kind();
        if container_kind.child() != Some(spec_kind) {
            return Err(GraphError::KindMismatch {
                parent: container_kind,
                child: spec_kind,
            });
        }

        let mut children = self.children(container).collect_vec();
        let (slot, replaced) = match ordinal {
            None => (
                self.relations
                    .max_ordinal(container)
                    .map_or(Ordinal::ZERO, Ordinal::next),
                None,
            ),
            Some(ordinal) => (ordinal, self.child_at(container, ordinal)),
        };

        let subtree = self.intern_tree(spec)?;
        if replaced.is_some() {
            for entry in &mut children {
                if entry.0 == slot {
                    entry.1 = subtree.id;
                }
            }
        } else {
            let at = children.partition_point(|&(o, _)| o < slot);
            children.insert(at, (slot, subtree.id));
        }

        let content = self.node(container)?.content().clone();
        let replacement = self.resolve_with_children(&content, &children)?;
        self.commit_rewrite(key, root, &hops, container, replacement)?;

        let reference_count = self.node(subtree.id)?.reference_count();
        let cloned = subtree.created;
        tracing::debug!(
            %key,
            node = %subtree.id,
            cloned,
            reference_count,
            "upserted subtree"
        );
        Ok(UpsertReport {
            id: subtree.id,
            content_hash: subtree.hash,
            cloned,
            reference_count,
            original_id: cloned.then_some(replaced).flatten(),
        })
    }

    /// Validates `path` against the current structure, returning the
    /// resolved hops.
    fn resolve_path(&self, root: NodeId, path: &[PathStep]) -> Result<Vec<Hop>, GraphError> {
        let mut hops = Vec::with_capacity(path.len());
        let mut current = root;
        for step in path {
            if step.parent != current {
                return Err(GraphError::StalePath {
                    parent: step.parent,
                    ordinal: step.ordinal,
                });
            }
            let child =
                self.child_at(step.parent, step.ordinal)
                    .ok_or(GraphError::StalePath {
                        parent: step.parent,
                        ordinal: step.ordinal,
                    })?;
            hops.push(Hop {
                parent: step.parent,
                ordinal: step.ordinal,
                child,
            });
            current = child;
        }
        Ok(hops)
    }

    /// Computes the target's replacement value: its scalar content and its
    /// ordered child list after the edit.
    fn rewrite_target(
        &mut self,
        target: NodeId,
        edit: EditOp,
    ) -> Result<(NodeContent, Vec<(Ordinal, NodeId)>), GraphError> {
        let target_kind = self.node(target)?.kind();
        let mut children = self.children(target).collect_vec();
        let content = match edit {
            EditOp::Insert { ordinal, subtree } => {
                let spec_kind = subtree.content.kind();
                if target_kind.child() != Some(spec_kind) {
                    return Err(GraphError::KindMismatch {
                        parent: target_kind,
                        child: spec_kind,
                    });
                }
                let slot = match ordinal {
                    None => self
                        .relations
                        .max_ordinal(target)
                        .map_or(Ordinal::ZERO, Ordinal::next),
                    Some(ordinal) => {
                        if self.child_at(target, ordinal).is_some() {
                            return Err(GraphError::OrdinalConflict {
                                parent: target,
                                ordinal,
                            });
                        }
                        ordinal
                    }
                };
                let interned = self.intern_tree(&subtree)?;
                let at = children.partition_point(|&(o, _)| o < slot);
                children.insert(at, (slot, interned.id));
                self.node(target)?.content().clone()
            }
            EditOp::Remove { ordinal } => {
                let before = children.len();
                children.retain(|&(o, _)| o != ordinal);
                if children.len() == before {
                    return Err(GraphError::StalePath {
                        parent: target,
                        ordinal,
                    });
                }
                self.node(target)?.content().clone()
            }
            EditOp::Replace { content } => {
                if content.kind() != target_kind {
                    return Err(GraphError::ContentKindMismatch {
                        expected: target_kind,
                        found: content.kind(),
                    });
                }
                content
            }
            EditOp::Reorder { moves } => {
                children = reordered(target, &children, &moves)?;
                self.node(target)?.content().clone()
            }
        };
        Ok((content, children))
    }

    /// Walks the path upward from the target, resolving a replacement for
    /// each ancestor, then swaps the registry entry's root reference.
    ///
    /// If at any level the replacement equals the original node the edit has
    /// converged: nothing above that level can change, and if the
    /// convergence is at the target itself the whole edit was a no-op.
    fn commit_rewrite(
        &mut self,
        key: RootKey,
        root: NodeId,
        hops: &[Hop],
        target: NodeId,
        replacement: Interned,
    ) -> Result<EditReport, GraphError> {
        let mut current_old = target;
        let mut current_new = replacement.id;
        for hop in hops.iter().rev() {
            if current_new == current_old {
                break;
            }
            debug_assert_eq!(hop.child, current_old);
            let children = self
                .children(hop.parent)
                .map(|(o, c)| (o, if o == hop.ordinal { current_new } else { c }))
                .collect_vec();
            let content = self.node(hop.parent)?.content().clone();
            let resolved = self.resolve_with_children(&content, &children)?;
            current_old = hop.parent;
            current_new = resolved.id;
        }

        let new_root = if current_old == root { current_new } else { root };
        if new_root != root {
            // Claim the new root before releasing the old one so shared
            // nodes never transiently reach zero.
            self.store.incref(new_root)?;
            self.roots.retarget(key, new_root);
            self.release(root)?;
        }
        Ok(EditReport {
            old_root: root,
            new_root,
            target: replacement.id,
            old_target: target,
            cloned: replacement.created,
        })
    }
}

/// Applies a reorder to an ordered child list, with the same validation as
/// [`RelationIndex::reorder`](crate::graph::RelationIndex).
fn reordered(
    parent: NodeId,
    children: &[(Ordinal, NodeId)],
    moves: &[(Ordinal, Ordinal)],
) -> Result<Vec<(Ordinal, NodeId)>, GraphError> {
    let mut result: Vec<(Ordinal, NodeId)> = Vec::with_capacity(children.len());
    let mut push = |ordinal: Ordinal, child: NodeId| -> Result<(), GraphError> {
        if result.iter().any(|&(o, _)| o == ordinal) {
            return Err(GraphError::OrdinalConflict { parent, ordinal });
        }
        result.push((ordinal, child));
        Ok(())
    };
    let mut moved = Vec::with_capacity(moves.len());
    for &(from, to) in moves {
        let &(_, child) = children
            .iter()
            .find(|&&(o, _)| o == from)
            .ok_or(GraphError::StalePath {
                parent,
                ordinal: from,
            })?;
        // A repeated `from` would silently duplicate the child.
        if moved.contains(&from) {
            return Err(GraphError::OrdinalConflict {
                parent,
                ordinal: from,
            });
        }
        push(to, child)?;
        moved.push(from);
    }
    for &(ordinal, child) in children {
        if !moved.contains(&ordinal) {
            push(ordinal, child)?;
        }
    }
    result.sort_by_key(|&(o, _)| o);
    Ok(result)
}
