//! Serialized row types: the logical schema handed to the persistence
//! collaborator.
//!
//! The core performs no I/O itself. A persistence layer stores
//! [`NodeRow`]s and [`EdgeRow`]s (plus the registry rows) and must commit
//! all rows touched by one edit atomically; a whole-store snapshot can be
//! exported and later re-imported, which re-validates every invariant
//! before accepting the data.

use itertools::Itertools;
use thiserror::Error;

use crate::content::NodeContent;
use crate::core::{AssignmentId, NodeId, Ordinal, TemplateId};
use crate::fingerprint::ContentHash;
use crate::graph::registry::TeamProgramAssignment;
use crate::graph::{TemplateGraph, ValidationError};

/// One row of the node table.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeRow {
    /// Node identity.
    pub id: NodeId,
    /// Kind-specific payload.
    pub content: NodeContent,
    /// Merkle fingerprint of the sub-tree.
    pub content_hash: ContentHash,
    /// Live referent count.
    pub reference_count: u32,
}

/// One row of the edge table, keyed by `(parent, ordinal)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EdgeRow {
    /// The parent node.
    pub parent: NodeId,
    /// The child's position under the parent.
    pub ordinal: Ordinal,
    /// The child node.
    pub child: NodeId,
}

/// One row of the template registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TemplateRow {
    /// Template identity.
    pub id: TemplateId,
    /// The Program node it points at.
    pub root: NodeId,
}

/// One row of the assignment registry.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AssignmentRow {
    /// Assignment identity.
    pub id: AssignmentId,
    /// Assignment metadata, including its current root.
    #[serde(flatten)]
    pub assignment: TeamProgramAssignment,
}

/// A complete, self-contained image of the store.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoreSnapshot {
    /// All nodes, ordered by id.
    pub nodes: Vec<NodeRow>,
    /// All edges, ordered by `(parent, ordinal)`.
    pub edges: Vec<EdgeRow>,
    /// All templates, in publication order.
    pub templates: Vec<TemplateRow>,
    /// All assignments, in assignment order.
    pub assignments: Vec<AssignmentRow>,
    /// Next template id to allocate.
    pub next_template: u64,
    /// Next assignment id to allocate.
    pub next_assignment: u64,
}

/// Errors raised when importing a snapshot.
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    /// The snapshot names the same node id twice.
    #[error("duplicate node id {node} in snapshot")]
    DuplicateNode {
        /// The repeated id.
        node: NodeId,
    },
    /// The snapshot names the same `(parent, ordinal)` slot twice.
    #[error("duplicate edge under {parent} at {ordinal}")]
    DuplicateEdge {
        /// The edge's parent.
        parent: NodeId,
        /// The repeated slot.
        ordinal: Ordinal,
    },
    /// The imported store fails its integrity audit.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl TemplateGraph {
    /// Exports the whole store as a snapshot. Row order is deterministic,
    /// so equal stores produce equal snapshots.
    #[must_use]
    pub fn to_snapshot(&self) -> StoreSnapshot {
        let nodes = self
            .store
            .iter()
            .sorted_by_key(|n| n.id())
            .map(|n| NodeRow {
                id: n.id(),
                content: n.content().clone(),
                content_hash: n.content_hash(),
                reference_count: n.reference_count(),
            })
            .collect();
        let edges = self
            .relations
            .iter_all()
            .map(|(parent, ordinal, child)| EdgeRow {
                parent,
                ordinal,
                child,
            })
            .sorted_by_key(|e| (e.parent, e.ordinal))
            .collect();
        let templates = self
            .roots
            .templates()
            .map(|(id, root)| TemplateRow { id, root })
            .collect();
        let assignments = self
            .roots
            .assignments()
            .map(|(id, assignment)| AssignmentRow {
                id,
                assignment: assignment.clone(),
            })
            .collect();
        let (next_template, next_assignment) = self.roots.counters();
        StoreSnapshot {
            nodes,
            edges,
            templates,
            assignments,
            next_template,
            next_assignment,
        }
    }

    /// Rebuilds a store from a snapshot, re-validating every invariant
    /// before returning it.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, SnapshotError> {
        let mut graph = TemplateGraph::new();
        for row in snapshot.nodes {
            let id = row.id;
            if !graph
                .store
                .insert_row(id, row.content, row.content_hash, row.reference_count)
            {
                return Err(SnapshotError::DuplicateNode { node: id });
            }
        }
        for row in snapshot.edges {
            if graph
                .relations
                .insert(row.parent, row.child, row.ordinal)
                .is_err()
            {
                return Err(SnapshotError::DuplicateEdge {
                    parent: row.parent,
                    ordinal: row.ordinal,
                });
            }
        }
        for row in snapshot.templates {
            graph.roots.insert_template_row(row.id, row.root);
        }
        for row in snapshot.assignments {
            graph.roots.insert_assignment_row(row.id, row.assignment);
        }
        graph
            .roots
            .restore_counters(snapshot.next_template, snapshot.next_assignment);
        graph.validate()?;
        Ok(graph)
    }
}
