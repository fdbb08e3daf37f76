//! Definitions for the core identity types used across the store.
//!
//! All identities are opaque integer newtypes allocated by the store. They
//! are re-exported in the root of the crate.

use derive_more::{Display, From};

/// A handle to a node in the template graph.
///
/// Node identities are stable for the lifetime of the node, but a node is
/// destroyed once its reference count reaches zero; a `NodeId` held across
/// edits may therefore dangle. Use [`ContentHash`](crate::ContentHash) when a
/// durable name for a sub-tree's *value* is needed.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
#[display("n{_0}")]
pub struct NodeId(u64);

/// A handle to a published program template in the root registry.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
#[display("tpl{_0}")]
pub struct TemplateId(u64);

/// A handle to a team assignment in the root registry.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
#[display("asg{_0}")]
pub struct AssignmentId(u64);

/// An identity for a team (or individual patient) that programs are assigned
/// to. Allocated by an external collaborator; opaque to the store.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
#[display("team{_0}")]
pub struct TeamId(u64);

/// The position of a child under its parent.
///
/// Ordinals are strictly ordered and unique within a parent, but need not be
/// dense: callers may leave gaps to allow insertion between siblings without
/// renumbering.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    From,
    Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
#[display("#{_0}")]
pub struct Ordinal(u32);

impl Ordinal {
    /// The first ordinal.
    pub const ZERO: Ordinal = Ordinal(0);

    /// Creates an ordinal from its raw position value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Ordinal(value)
    }

    /// The raw position value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// The ordinal immediately after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Ordinal(self.0 + 1)
    }
}

impl NodeId {
    pub(crate) fn new(index: u64) -> Self {
        NodeId(index)
    }

    pub(crate) fn index(self) -> u64 {
        self.0
    }
}

impl TemplateId {
    pub(crate) fn new(index: u64) -> Self {
        TemplateId(index)
    }

    pub(crate) fn index(self) -> u64 {
        self.0
    }
}

impl AssignmentId {
    pub(crate) fn new(index: u64) -> Self {
        AssignmentId(index)
    }

    pub(crate) fn index(self) -> u64 {
        self.0
    }
}

impl TeamId {
    /// Creates a team identity from an externally allocated index.
    #[must_use]
    pub fn new(index: u64) -> Self {
        TeamId(index)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl std::fmt::Debug for Ordinal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ordinal({})", self.0)
    }
}

impl std::fmt::Debug for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TemplateId({})", self.0)
    }
}

impl std::fmt::Debug for AssignmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AssignmentId({})", self.0)
    }
}

impl std::fmt::Debug for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TeamId({})", self.0)
    }
}

/// The level of a node in the template hierarchy.
///
/// Levels are strictly ordered: a node of one kind may only ever have
/// children of [`NodeKind::child`], so the hierarchy has a fixed depth of
/// five and cycles are structurally impossible as long as edges respect the
/// kind discipline.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, serde::Serialize, serde::Deserialize,
)]
pub enum NodeKind {
    /// The root level: a whole training program.
    Program,
    /// A phase of a program (e.g. "Accumulation", weeks 1-4).
    Phase,
    /// A block of work within a phase (e.g. "Lower body A").
    Block,
    /// A single exercise within a block.
    Exercise,
    /// A set prescription. Leaf level; sets have no children.
    Set,
}

impl NodeKind {
    /// The kind that children of this kind must have, or `None` for the leaf
    /// level.
    #[must_use]
    pub fn child(self) -> Option<NodeKind> {
        match self {
            NodeKind::Program => Some(NodeKind::Phase),
            NodeKind::Phase => Some(NodeKind::Block),
            NodeKind::Block => Some(NodeKind::Exercise),
            NodeKind::Exercise => Some(NodeKind::Set),
            NodeKind::Set => None,
        }
    }

    /// A stable single-byte tag, used for domain separation in content
    /// fingerprints. Must never be renumbered for existing stores.
    pub(crate) fn tag(self) -> u8 {
        match self {
            NodeKind::Program => 0,
            NodeKind::Phase => 1,
            NodeKind::Block => 2,
            NodeKind::Exercise => 3,
            NodeKind::Set => 4,
        }
    }

    /// The display name of the kind.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Program => "Program",
            NodeKind::Phase => "Phase",
            NodeKind::Block => "Block",
            NodeKind::Exercise => "Exercise",
            NodeKind::Set => "Set",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_levels_descend_to_leaf() {
        let mut kind = NodeKind::Program;
        let mut depth = 1;
        while let Some(child) = kind.child() {
            assert!(child > kind);
            kind = child;
            depth += 1;
        }
        assert_eq!(kind, NodeKind::Set);
        assert_eq!(depth, 5);
    }

    #[test]
    fn kind_tags_are_distinct() {
        let kinds = [
            NodeKind::Program,
            NodeKind::Phase,
            NodeKind::Block,
            NodeKind::Exercise,
            NodeKind::Set,
        ];
        for a in kinds {
            for b in kinds {
                assert_eq!(a.tag() == b.tag(), a == b);
            }
        }
    }

    #[test]
    fn id_display() {
        assert_eq!(NodeId::new(3).to_string(), "n3");
        assert_eq!(Ordinal::new(2).to_string(), "#2");
        assert_eq!(TemplateId::new(0).to_string(), "tpl0");
    }
}
