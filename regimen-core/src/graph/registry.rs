//! The root registry: durable names for Program-kind roots.
//!
//! Published templates and team assignments both resolve to a Program node
//! id, and each registry entry holds exactly one reference on its root.
//! Assignments share the template's root until their first divergent edit
//! rewires them to a private copy of the edited path.

use chrono::NaiveDate;
use derive_more::From;
use indexmap::IndexMap;

use crate::core::{AssignmentId, NodeId, TeamId, TemplateId};

/// Names a root-registry entry: either a published template or a team
/// assignment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, From, serde::Serialize, serde::Deserialize)]
pub enum RootKey {
    /// A published program template.
    Template(TemplateId),
    /// A program assigned to a team.
    Assignment(AssignmentId),
}

impl std::fmt::Display for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootKey::Template(id) => write!(f, "template {id}"),
            RootKey::Assignment(id) => write!(f, "assignment {id}"),
        }
    }
}

/// Binds a team to a program root, with assignment metadata.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TeamProgramAssignment {
    /// The assignee.
    pub team: TeamId,
    /// The Program-kind node currently representing the assignment's
    /// structure. Retargeted by every divergent edit.
    pub root: NodeId,
    /// First scheduled day of the program.
    pub start_date: NaiveDate,
    /// Whether the assignment is currently active. Deactivation keeps the
    /// structure (and its root reference) for later reactivation or review.
    pub active: bool,
}

/// Maps template and assignment identities to their current root nodes.
///
/// Iteration order is insertion order, so listings are stable across calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RootRegistry {
    templates: IndexMap<TemplateId, NodeId>,
    assignments: IndexMap<AssignmentId, TeamProgramAssignment>,
    next_template: u64,
    next_assignment: u64,
}

impl RootRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The root node an entry currently points at.
    #[must_use]
    pub fn root(&self, key: RootKey) -> Option<NodeId> {
        match key {
            RootKey::Template(id) => self.templates.get(&id).copied(),
            RootKey::Assignment(id) => self.assignments.get(&id).map(|a| a.root),
        }
    }

    /// Registers a published template. The caller owns the root reference.
    pub(crate) fn insert_template(&mut self, root: NodeId) -> TemplateId {
        let id = TemplateId::new(self.next_template);
        self.next_template += 1;
        self.templates.insert(id, root);
        id
    }

    /// Registers an assignment. The caller owns the root reference.
    pub(crate) fn insert_assignment(
        &mut self,
        team: TeamId,
        root: NodeId,
        start_date: NaiveDate,
    ) -> AssignmentId {
        let id = AssignmentId::new(self.next_assignment);
        self.next_assignment += 1;
        self.assignments.insert(
            id,
            TeamProgramAssignment {
                team,
                root,
                start_date,
                active: true,
            },
        );
        id
    }

    /// Redirects an entry to a new root. Returns the old root, or `None` if
    /// the entry does not exist.
    pub(crate) fn retarget(&mut self, key: RootKey, new_root: NodeId) -> Option<NodeId> {
        match key {
            RootKey::Template(id) => {
                let slot = self.templates.get_mut(&id)?;
                Some(std::mem::replace(slot, new_root))
            }
            RootKey::Assignment(id) => {
                let entry = self.assignments.get_mut(&id)?;
                Some(std::mem::replace(&mut entry.root, new_root))
            }
        }
    }

    /// Removes an entry, returning the root whose reference the caller must
    /// now release.
    pub(crate) fn remove(&mut self, key: RootKey) -> Option<NodeId> {
        match key {
            RootKey::Template(id) => self.templates.shift_remove(&id),
            RootKey::Assignment(id) => self.assignments.shift_remove(&id).map(|a| a.root),
        }
    }

    /// An assignment's metadata.
    #[must_use]
    pub fn assignment(&self, id: AssignmentId) -> Option<&TeamProgramAssignment> {
        self.assignments.get(&id)
    }

    pub(crate) fn assignment_mut(&mut self, id: AssignmentId) -> Option<&mut TeamProgramAssignment> {
        self.assignments.get_mut(&id)
    }

    /// All published templates with their roots, in publication order.
    pub fn templates(&self) -> impl Iterator<Item = (TemplateId, NodeId)> + '_ {
        self.templates.iter().map(|(&id, &root)| (id, root))
    }

    /// All assignments with their metadata, in assignment order.
    pub fn assignments(&self) -> impl Iterator<Item = (AssignmentId, &TeamProgramAssignment)> + '_ {
        self.assignments.iter().map(|(&id, a)| (id, a))
    }

    /// All root references held by the registry (templates and assignments).
    pub(crate) fn roots(&self) -> impl Iterator<Item = (RootKey, NodeId)> + '_ {
        self.templates
            .iter()
            .map(|(&id, &root)| (RootKey::Template(id), root))
            .chain(
                self.assignments
                    .iter()
                    .map(|(&id, a)| (RootKey::Assignment(id), a.root)),
            )
    }

    pub(crate) fn counters(&self) -> (u64, u64) {
        (self.next_template, self.next_assignment)
    }

    pub(crate) fn restore_counters(&mut self, next_template: u64, next_assignment: u64) {
        self.next_template = self.next_template.max(next_template);
        self.next_assignment = self.next_assignment.max(next_assignment);
    }

    pub(crate) fn insert_template_row(&mut self, id: TemplateId, root: NodeId) {
        self.next_template = self.next_template.max(id.index() + 1);
        self.templates.insert(id, root);
    }

    pub(crate) fn insert_assignment_row(&mut self, id: AssignmentId, entry: TeamProgramAssignment) {
        self.next_assignment = self.next_assignment.max(id.index() + 1);
        self.assignments.insert(id, entry);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn retarget_returns_previous_root() {
        let mut registry = RootRegistry::new();
        let tpl = registry.insert_template(NodeId::new(1));
        let old = registry.retarget(RootKey::Template(tpl), NodeId::new(2));
        assert_eq!(old, Some(NodeId::new(1)));
        assert_eq!(registry.root(RootKey::Template(tpl)), Some(NodeId::new(2)));
    }

    #[test]
    fn assignments_carry_metadata() {
        let mut registry = RootRegistry::new();
        let id = registry.insert_assignment(TeamId::new(7), NodeId::new(3), date());
        let entry = registry.assignment(id).unwrap();
        assert_eq!(entry.team, TeamId::new(7));
        assert!(entry.active);
        assert_eq!(registry.remove(RootKey::Assignment(id)), Some(NodeId::new(3)));
        assert!(registry.assignment(id).is_none());
    }

    #[test]
    fn roots_lists_templates_and_assignments() {
        let mut registry = RootRegistry::new();
        let tpl = registry.insert_template(NodeId::new(1));
        let asg = registry.insert_assignment(TeamId::new(1), NodeId::new(1), date());
        let roots: Vec<_> = registry.roots().collect();
        assert_eq!(
            roots,
            vec![
                (RootKey::Template(tpl), NodeId::new(1)),
                (RootKey::Assignment(asg), NodeId::new(1)),
            ]
        );
    }
}
