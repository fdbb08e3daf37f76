//! The ordered parent→child edge index.
//!
//! Edges are stored independently of the node arena, keyed by parent, so a
//! child identity can appear under any number of parents at possibly
//! different ordinal positions. All four hierarchy levels share this one
//! index; the kind discipline is enforced by the graph layer on attach.
//!
//! This index stores pure structure. Reference counts live in the node
//! store, and the graph layer fuses every edge mutation with the matching
//! count adjustment so the two are never observably out of step.

use std::collections::BTreeMap;

use fxhash::FxHashMap;

use crate::core::{NodeId, Ordinal};
use crate::graph::GraphError;

/// Ordered parent→child edges for the whole store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelationIndex {
    /// Children of each parent, ordered by ordinal. Parents with no children
    /// have no entry; an empty child map is never retained.
    children: FxHashMap<NodeId, BTreeMap<Ordinal, NodeId>>,
}

impl RelationIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The children of `parent` in ordinal order.
    pub fn children_of(&self, parent: NodeId) -> impl Iterator<Item = (Ordinal, NodeId)> + '_ {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|m| m.iter().map(|(&o, &c)| (o, c)))
    }

    /// The child of `parent` at `ordinal`, if the slot is occupied.
    #[must_use]
    pub fn child_at(&self, parent: NodeId, ordinal: Ordinal) -> Option<NodeId> {
        self.children.get(&parent)?.get(&ordinal).copied()
    }

    /// Number of children under `parent`.
    #[must_use]
    pub fn child_count(&self, parent: NodeId) -> usize {
        self.children.get(&parent).map_or(0, BTreeMap::len)
    }

    /// The highest occupied ordinal under `parent`.
    #[must_use]
    pub fn max_ordinal(&self, parent: NodeId) -> Option<Ordinal> {
        self.children
            .get(&parent)
            .and_then(|m| m.keys().next_back().copied())
    }

    /// Inserts an edge. Fails with [`GraphError::OrdinalConflict`] if the
    /// ordinal is already occupied under `parent`.
    pub fn insert(
        &mut self,
        parent: NodeId,
        child: NodeId,
        ordinal: Ordinal,
    ) -> Result<(), GraphError> {
        let slots = self.children.entry(parent).or_default();
        if slots.contains_key(&ordinal) {
            return Err(GraphError::OrdinalConflict { parent, ordinal });
        }
        slots.insert(ordinal, child);
        Ok(())
    }

    /// Removes the edge from `parent` to `child`, returning the ordinal it
    /// occupied. Fails with [`GraphError::EdgeNotFound`] if absent.
    pub fn remove(&mut self, parent: NodeId, child: NodeId) -> Result<Ordinal, GraphError> {
        let slots = self
            .children
            .get_mut(&parent)
            .ok_or(GraphError::EdgeNotFound { parent, child })?;
        let ordinal = slots
            .iter()
            .find(|&(_, &c)| c == child)
            .map(|(&o, _)| o)
            .ok_or(GraphError::EdgeNotFound { parent, child })?;
        slots.remove(&ordinal);
        if slots.is_empty() {
            self.children.remove(&parent);
        }
        Ok(ordinal)
    }

    /// Removes and returns all outgoing edges of `parent`, in ordinal order.
    /// Used when purging an unreferenced node.
    pub(crate) fn remove_children(&mut self, parent: NodeId) -> Vec<(Ordinal, NodeId)> {
        self.children
            .remove(&parent)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default()
    }

    /// Atomically reassigns ordinals under `parent`.
    ///
    /// `moves` maps occupied old ordinals to their new ordinals. Slots not
    /// named in `moves` keep their ordinal. Fails with
    /// [`GraphError::StalePath`] if an old ordinal is vacant and with
    /// [`GraphError::OrdinalConflict`] if the reassignment would place two
    /// children at the same ordinal; on failure the index is unchanged.
    pub fn reorder(
        &mut self,
        parent: NodeId,
        moves: &[(Ordinal, Ordinal)],
    ) -> Result<(), GraphError> {
        let slots = match self.children.get(&parent) {
            Some(slots) => slots,
            None if moves.is_empty() => return Ok(()),
            None => {
                return Err(GraphError::StalePath {
                    parent,
                    ordinal: moves[0].0,
                });
            }
        };

        let mut reassigned: BTreeMap<Ordinal, NodeId> = BTreeMap::new();
        let mut moved: Vec<Ordinal> = Vec::with_capacity(moves.len());
        for &(from, to) in moves {
            let child = *slots
                .get(&from)
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
            if reassigned.insert(to, child).is_some() {
                return Err(GraphError::OrdinalConflict {
                    parent,
                    ordinal: to,
                });
            }
            moved.push(from);
        }
        for (&ordinal, &child) in slots {
            if moved.contains(&ordinal) {
                continue;
            }
            if reassigned.insert(ordinal, child).is_some() {
                return Err(GraphError::OrdinalConflict { parent, ordinal });
            }
        }

        self.children.insert(parent, reassigned);
        Ok(())
    }

    /// All edges in the index, in `(parent, ordinal, child)` form. Order is
    /// unspecified across parents.
    pub(crate) fn iter_all(&self) -> impl Iterator<Item = (NodeId, Ordinal, NodeId)> + '_ {
        self.children
            .iter()
            .flat_map(|(&p, m)| m.iter().map(move |(&o, &c)| (p, o, c)))
    }

    /// Total number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.children.values().map(BTreeMap::len).sum()
    }
}
