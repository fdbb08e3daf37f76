//! The template graph: node arena, ordered relations and root registry,
//! with the copy-on-write engine and materializer layered on top.
//!
//! Nodes are held in an arena keyed by opaque identity and connected through
//! a separate edge index, never by ownership pointers between nodes. Equal
//! sub-trees are stored once: every creation path funnels through the
//! content-addressed resolver, and edits never mutate a shared node in
//! place. What looks like mutation is minting replacement nodes along the
//! edited path and swapping one root-registry reference at the end.

pub mod cow;
pub mod materialize;
pub mod registry;
pub mod relations;
pub mod serial;
pub mod store;
pub mod validate;

use chrono::NaiveDate;
use thiserror::Error;

use crate::content::NodeContent;
use crate::core::{AssignmentId, NodeId, NodeKind, Ordinal, TeamId, TemplateId};
use crate::fingerprint::ContentHash;

pub use cow::{EditOp, EditReport, PathStep, TreeSpec, UpsertReport};
pub use materialize::{FullBlock, FullExercise, FullPhase, FullProgramStructure, FullSet};
pub use registry::{RootKey, RootRegistry, TeamProgramAssignment};
pub use relations::RelationIndex;
pub use serial::{SnapshotError, StoreSnapshot};
pub use store::{Node, NodeStore};
pub use validate::ValidationError;

/// Errors raised by graph operations.
///
/// [`GraphError::is_recoverable`] separates errors a caller should handle by
/// re-reading and retrying from those that indicate an inconsistent store
/// and must abort the operation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GraphError {
    /// A referenced node id is absent from the store. Indicates a
    /// store/index inconsistency, not a caller mistake.
    #[error("node {node} is not in the store")]
    NotFound {
        /// The missing node.
        node: NodeId,
    },
    /// The named template or assignment does not exist.
    #[error("{key} is not registered")]
    RootNotFound {
        /// The unknown registry entry.
        key: RootKey,
    },
    /// The caller's path no longer matches the current structure; re-read
    /// and retry with a fresh path.
    #[error("path is stale: no matching child under {parent} at {ordinal}")]
    StalePath {
        /// Parent whose recorded hop failed to resolve.
        parent: NodeId,
        /// The ordinal recorded for the hop.
        ordinal: Ordinal,
    },
    /// The requested ordinal is already occupied under the parent.
    #[error("ordinal {ordinal} is already occupied under {parent}")]
    OrdinalConflict {
        /// The parent in question.
        parent: NodeId,
        /// The contested ordinal.
        ordinal: Ordinal,
    },
    /// No edge connects the given parent and child.
    #[error("no edge from {parent} to {child}")]
    EdgeNotFound {
        /// The alleged parent.
        parent: NodeId,
        /// The alleged child.
        child: NodeId,
    },
    /// A child's kind does not match the level below its parent.
    #[error("a {child} cannot be a child of a {parent}")]
    KindMismatch {
        /// Kind of the parent.
        parent: NodeKind,
        /// Kind of the offered child.
        child: NodeKind,
    },
    /// Replacement content would change the node's kind.
    #[error("replacement content has kind {found}, expected {expected}")]
    ContentKindMismatch {
        /// The kind required at this position.
        expected: NodeKind,
        /// The kind of the offered content.
        found: NodeKind,
    },
    /// A root-registry entry must point at a Program node.
    #[error("root entries must point at Program nodes, found {found}")]
    NotAProgramRoot {
        /// The kind actually found at the root.
        found: NodeKind,
    },
    /// Traversal revisited a node already on the current path.
    #[error("cycle detected at {node}")]
    CycleDetected {
        /// The revisited node.
        node: NodeId,
    },
    /// A reference count was about to drop below zero: a prior accounting
    /// bug.
    #[error("reference count underflow on {node}")]
    RefcountUnderflow {
        /// The affected node.
        node: NodeId,
    },
}

impl GraphError {
    /// Whether the caller should re-read current state and retry.
    ///
    /// Non-recoverable errors indicate either a caller bug or an
    /// inconsistent store and must be surfaced, never silently retried.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphError::StalePath { .. }
                | GraphError::OrdinalConflict { .. }
                | GraphError::EdgeNotFound { .. }
        )
    }

    /// A stable machine-readable code for the error, used in boundary
    /// results.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::NotFound { .. } => "not_found",
            GraphError::RootNotFound { .. } => "root_not_found",
            GraphError::StalePath { .. } => "stale_path",
            GraphError::OrdinalConflict { .. } => "ordinal_conflict",
            GraphError::EdgeNotFound { .. } => "edge_not_found",
            GraphError::KindMismatch { .. } => "kind_mismatch",
            GraphError::ContentKindMismatch { .. } => "content_kind_mismatch",
            GraphError::NotAProgramRoot { .. } => "not_a_program_root",
            GraphError::CycleDetected { .. } => "cycle_detected",
            GraphError::RefcountUnderflow { .. } => "refcount_underflow",
        }
    }
}

/// The shared template store: every program template and assignment in one
/// consistency domain.
#[derive(Clone, Debug, Default)]
pub struct TemplateGraph {
    pub(crate) store: NodeStore,
    pub(crate) relations: RelationIndex,
    pub(crate) roots: RootRegistry,
}

impl TemplateGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a node. Fails with [`GraphError::NotFound`] if absent.
    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.store.get(id)
    }

    /// Whether `id` refers to a live node.
    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.store.contains(id)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.store.len()
    }

    /// The children of `parent` in ordinal order.
    pub fn children(&self, parent: NodeId) -> impl Iterator<Item = (Ordinal, NodeId)> + '_ {
        self.relations.children_of(parent)
    }

    /// The child of `parent` at `ordinal`, if any.
    #[must_use]
    pub fn child_at(&self, parent: NodeId, ordinal: Ordinal) -> Option<NodeId> {
        self.relations.child_at(parent, ordinal)
    }

    /// The node holding the given sub-tree value, if one exists.
    #[must_use]
    pub fn find_by_hash(&self, kind: NodeKind, hash: ContentHash) -> Option<NodeId> {
        self.store.find_by_hash(kind, hash)
    }

    /// The root node a template or assignment currently points at.
    pub fn root(&self, key: RootKey) -> Result<NodeId, GraphError> {
        self.roots.root(key).ok_or(GraphError::RootNotFound { key })
    }

    /// An assignment's metadata.
    pub fn assignment(&self, id: AssignmentId) -> Result<&TeamProgramAssignment, GraphError> {
        self.roots
            .assignment(id)
            .ok_or(GraphError::RootNotFound {
                key: RootKey::Assignment(id),
            })
    }

    /// All published templates, in publication order.
    pub fn templates(&self) -> impl Iterator<Item = (TemplateId, NodeId)> + '_ {
        self.roots.templates()
    }

    /// All assignments, in assignment order.
    pub fn assignments(&self) -> impl Iterator<Item = (AssignmentId, &TeamProgramAssignment)> + '_ {
        self.roots.assignments()
    }

    /// Interns a whole sub-tree bottom-up and publishes it as a template.
    ///
    /// Sub-trees equal to anything already stored (whole or in part) are
    /// shared, not copied. The registry entry owns one reference on the
    /// root.
    pub fn publish_template(&mut self, spec: &TreeSpec) -> Result<TemplateId, GraphError> {
        if spec.content.kind() != NodeKind::Program {
            return Err(GraphError::NotAProgramRoot {
                found: spec.content.kind(),
            });
        }
        let interned = self.intern_tree(spec)?;
        self.store.incref(interned.id)?;
        let id = self.roots.insert_template(interned.id);
        tracing::debug!(template = %id, root = %interned.id, fresh = interned.created, "published template");
        Ok(id)
    }

    /// Retires a template: removes its registry entry and releases the root
    /// reference. Structure shared with other templates or assignments
    /// survives; anything else is reclaimed before this returns.
    pub fn retire_template(&mut self, id: TemplateId) -> Result<(), GraphError> {
        let key = RootKey::Template(id);
        let root = self
            .roots
            .remove(key)
            .ok_or(GraphError::RootNotFound { key })?;
        self.release(root)?;
        tracing::debug!(template = %id, "retired template");
        Ok(())
    }

    /// Assigns a template's program to a team.
    ///
    /// The assignment shares the template's root — and therefore its entire
    /// structure — until the team's first divergent edit.
    pub fn assign_to_team(
        &mut self,
        template: TemplateId,
        team: TeamId,
        start_date: NaiveDate,
    ) -> Result<AssignmentId, GraphError> {
        let root = self.root(RootKey::Template(template))?;
        self.store.incref(root)?;
        let id = self.roots.insert_assignment(team, root, start_date);
        tracing::debug!(assignment = %id, %team, root = %root, "assigned program");
        Ok(id)
    }

    /// Marks an assignment inactive, keeping its structure.
    pub fn deactivate_assignment(&mut self, id: AssignmentId) -> Result<(), GraphError> {
        let entry = self
            .roots
            .assignment_mut(id)
            .ok_or(GraphError::RootNotFound {
                key: RootKey::Assignment(id),
            })?;
        entry.active = false;
        Ok(())
    }

    /// Removes an assignment and releases its root reference.
    pub fn unassign(&mut self, id: AssignmentId) -> Result<(), GraphError> {
        let key = RootKey::Assignment(id);
        let root = self
            .roots
            .remove(key)
            .ok_or(GraphError::RootNotFound { key })?;
        self.release(root)?;
        tracing::debug!(assignment = %id, "removed assignment");
        Ok(())
    }

    /// Inserts an edge and increments the child's reference count as one
    /// step. Enforces the kind discipline between levels.
    pub(crate) fn attach(
        &mut self,
        parent: NodeId,
        child: NodeId,
        ordinal: Ordinal,
    ) -> Result<(), GraphError> {
        let parent_kind = self.store.get(parent)?.kind();
        let child_kind = self.store.get(child)?.kind();
        if parent_kind.child() != Some(child_kind) {
            return Err(GraphError::KindMismatch {
                parent: parent_kind,
                child: child_kind,
            });
        }
        self.relations.insert(parent, child, ordinal)?;
        self.store.incref(child)?;
        Ok(())
    }

    /// Removes an edge and releases the child's reference as one step,
    /// cascading if the child becomes unreachable. Returns the ordinal the
    /// edge occupied.
    pub(crate) fn detach(&mut self, parent: NodeId, child: NodeId) -> Result<Ordinal, GraphError> {
        let ordinal = self.relations.remove(parent, child)?;
        self.release(child)?;
        Ok(ordinal)
    }

    /// Releases one reference on `id`, purging the node and cascading to
    /// its children if the count reaches zero. Runs to completion before
    /// returning: no zero-reference node with live outgoing edges survives
    /// this call. Recursion is bounded by the fixed hierarchy depth.
    pub(crate) fn release(&mut self, id: NodeId) -> Result<u32, GraphError> {
        let remaining = self.store.decref(id)?;
        if remaining > 0 {
            return Ok(remaining);
        }
        let children: Vec<_> = self.relations.children_of(id).map(|(_, c)| c).collect();
        for child in children {
            self.detach(id, child)?;
        }
        self.store.remove(id)?;
        tracing::trace!(node = %id, "purged unreferenced node");
        Ok(0)
    }

    /// Interns `spec` bottom-up through the content-addressed resolver.
    ///
    /// Every level reuses an existing node when one with the same value is
    /// stored; freshly minted nodes get their child edges attached here and
    /// are returned with a zero reference count, to be claimed by the
    /// caller's edge or registry reference.
    pub(crate) fn intern_tree(&mut self, spec: &TreeSpec) -> Result<Interned, GraphError> {
        let kind = spec.content.kind();
        let mut child_ids = Vec::with_capacity(spec.children.len());
        let mut child_hashes = Vec::with_capacity(spec.children.len());
        for child in &spec.children {
            let child_kind = child.content.kind();
            if kind.child() != Some(child_kind) {
                return Err(GraphError::KindMismatch {
                    parent: kind,
                    child: child_kind,
                });
            }
            let interned = self.intern_tree(child)?;
            child_hashes.push(interned.hash);
            child_ids.push(interned.id);
        }
        let (id, created) = self.store.resolve_or_create(&spec.content, &child_hashes);
        if created {
            for (position, child) in child_ids.into_iter().enumerate() {
                self.relations
                    .insert(id, child, Ordinal::new(position as u32))?;
                self.store.incref(child)?;
            }
        }
        let hash = self.store.get(id)?.content_hash();
        Ok(Interned { id, hash, created })
    }

    /// Resolves a node with an explicit ordered child list, minting it (and
    /// attaching the children at their given ordinals) when no equal node
    /// exists.
    pub(crate) fn resolve_with_children(
        &mut self,
        content: &NodeContent,
        children: &[(Ordinal, NodeId)],
    ) -> Result<Interned, GraphError> {
        let mut child_hashes = Vec::with_capacity(children.len());
        for &(_, child) in children {
            child_hashes.push(self.store.get(child)?.content_hash());
        }
        let (id, created) = self.store.resolve_or_create(content, &child_hashes);
        if created {
            for &(ordinal, child) in children {
                self.attach(id, child, ordinal)?;
            }
        }
        let hash = self.store.get(id)?.content_hash();
        Ok(Interned { id, hash, created })
    }
}

/// Result of interning a sub-tree value.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Interned {
    pub id: NodeId,
    pub hash: ContentHash,
    pub created: bool,
}
