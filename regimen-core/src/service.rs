//! The shared, thread-safe façade over the template graph.
//!
//! External collaborators (CRUD handlers, schedulers, sync jobs) talk to the
//! core through this type. Reads take a shared lock and never block each
//! other; every mutation — including the reference cascade it may trigger —
//! runs inside one exclusive critical section, so no caller ever observes a
//! half-applied edit or a zero-reference node with live edges. Path
//! validation inside the edit remains the optimistic-concurrency guard for
//! callers that read, plan and then write.

use chrono::NaiveDate;
use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::core::{AssignmentId, NodeId, Ordinal, TeamId, TemplateId};
use crate::fingerprint::ContentHash;
use crate::graph::{
    EditOp, FullProgramStructure, GraphError, PathStep, RootKey, SnapshotError, StoreSnapshot,
    TeamProgramAssignment, TemplateGraph, TreeSpec,
};

/// Thread-safe handle to one template store.
#[derive(Debug, Default)]
pub struct RegimenService {
    graph: RwLock<TemplateGraph>,
}

/// Outcome of [`RegimenService::upsert_subtree`].
///
/// This is the externally observable proof of the dedup / copy-on-write
/// decision, so the reused-existing path is an ordinary success value, never
/// an error.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// The sub-tree is in place.
    Applied {
        /// The node holding the upserted value.
        id: NodeId,
        /// Its Merkle fingerprint.
        content_hash: ContentHash,
        /// True when a divergent value forced a new node; false when an
        /// existing equal value was reused.
        cloned: bool,
        /// The node's reference count after rewiring.
        reference_count: u32,
        /// The node previously at this position. Present only when
        /// `cloned` is true.
        #[serde(skip_serializing_if = "Option::is_none")]
        original_id: Option<NodeId>,
    },
    /// The upsert was not applied.
    Rejected {
        /// Stable machine-readable error code.
        error: SmolStr,
        /// Human-readable description.
        message: String,
    },
}

impl RegimenService {
    /// Creates a service over an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing graph.
    #[must_use]
    pub fn from_graph(graph: TemplateGraph) -> Self {
        RegimenService {
            graph: RwLock::new(graph),
        }
    }

    /// Restores a service from a persisted snapshot.
    pub fn restore(snapshot: StoreSnapshot) -> Result<Self, SnapshotError> {
        Ok(Self::from_graph(TemplateGraph::from_snapshot(snapshot)?))
    }

    /// Authors a new program template from a declarative tree.
    pub fn create_program_from_scratch(&self, spec: &TreeSpec) -> Result<TemplateId, GraphError> {
        let id = self.graph.write().publish_template(spec)?;
        tracing::info!(template = %id, "created program template");
        Ok(id)
    }

    /// Assigns a published template to a team, sharing its structure until
    /// the team's first divergent edit.
    pub fn assign_program_to_team(
        &self,
        template: TemplateId,
        team: TeamId,
        start_date: NaiveDate,
    ) -> Result<AssignmentId, GraphError> {
        let id = self
            .graph
            .write()
            .assign_to_team(template, team, start_date)?;
        tracing::info!(assignment = %id, %template, %team, "assigned program to team");
        Ok(id)
    }

    /// Applies an edit to a template's or assignment's tree, returning the
    /// new root node id.
    pub fn edit_node(
        &self,
        key: impl Into<RootKey>,
        path: &[PathStep],
        edit: EditOp,
    ) -> Result<NodeId, GraphError> {
        let report = self.graph.write().apply_edit(key.into(), path, edit)?;
        Ok(report.new_root)
    }

    /// Content-addressed upsert of a sub-tree under the container at
    /// `path`, reported as the boundary result shape.
    pub fn upsert_subtree(
        &self,
        key: impl Into<RootKey>,
        path: &[PathStep],
        ordinal: Option<Ordinal>,
        spec: &TreeSpec,
    ) -> UpsertOutcome {
        match self
            .graph
            .write()
            .upsert_subtree(key.into(), path, ordinal, spec)
        {
            Ok(report) => UpsertOutcome::Applied {
                id: report.id,
                content_hash: report.content_hash,
                cloned: report.cloned,
                reference_count: report.reference_count,
                original_id: report.original_id,
            },
            Err(err) => {
                tracing::warn!(error = %err, recoverable = err.is_recoverable(), "upsert rejected");
                UpsertOutcome::Rejected {
                    error: SmolStr::new_static(err.code()),
                    message: err.to_string(),
                }
            }
        }
    }

    /// Materializes the full structure of a template or assignment.
    pub fn read_full_structure(
        &self,
        key: impl Into<RootKey>,
    ) -> Result<FullProgramStructure, GraphError> {
        self.graph.read().materialize(key.into())
    }

    /// All published templates with their current roots.
    #[must_use]
    pub fn list_templates(&self) -> Vec<(TemplateId, NodeId)> {
        self.graph.read().templates().collect()
    }

    /// All assignments for one team.
    #[must_use]
    pub fn assignments_for_team(&self, team: TeamId) -> Vec<(AssignmentId, TeamProgramAssignment)> {
        self.graph
            .read()
            .assignments()
            .filter(|(_, a)| a.team == team)
            .map(|(id, a)| (id, a.clone()))
            .collect()
    }

    /// Marks an assignment inactive without discarding its structure.
    pub fn deactivate_assignment(&self, id: AssignmentId) -> Result<(), GraphError> {
        self.graph.write().deactivate_assignment(id)
    }

    /// Removes an assignment, reclaiming structure no other referent shares.
    pub fn unassign(&self, id: AssignmentId) -> Result<(), GraphError> {
        self.graph.write().unassign(id)
    }

    /// Retires a template, reclaiming structure no other referent shares.
    pub fn retire_template(&self, id: TemplateId) -> Result<(), GraphError> {
        self.graph.write().retire_template(id)
    }

    /// Exports the store for the persistence collaborator.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.graph.read().to_snapshot()
    }

    /// Runs the integrity audit over the current store.
    pub fn validate(&self) -> Result<(), crate::graph::ValidationError> {
        self.graph.read().validate()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::content::{
        BlockMeta, ExerciseMeta, PhaseMeta, ProgramMeta, SetPrescription,
    };

    fn chain() -> TreeSpec {
        TreeSpec::new(
            ProgramMeta::new("Return to play", "Stage 2"),
            vec![TreeSpec::new(
                PhaseMeta::new("Week 1"),
                vec![TreeSpec::new(
                    BlockMeta::new("Lower A"),
                    vec![TreeSpec::new(
                        ExerciseMeta::new("Split squat"),
                        vec![TreeSpec::leaf(SetPrescription::new(10, 20_000, 90))],
                    )],
                )],
            )],
        )
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[fixture]
    fn service() -> RegimenService {
        RegimenService::new()
    }

    fn block_path(service: &RegimenService, key: RootKey) -> Vec<PathStep> {
        let full = service.read_full_structure(key).unwrap();
        vec![
            PathStep::new(full.id, full.phases[0].ordinal),
            PathStep::new(full.phases[0].id, full.phases[0].blocks[0].ordinal),
        ]
    }

    #[rstest]
    fn upsert_reports_reuse_then_clone(service: RegimenService) {
        let tpl = service.create_program_from_scratch(&chain()).unwrap();
        let key = RootKey::Template(tpl);

        // Upserting the exercise value already present reuses its node.
        let outcome = service.upsert_subtree(
            key,
            &block_path(&service, key),
            Some(Ordinal::ZERO),
            &TreeSpec::new(
                ExerciseMeta::new("Split squat"),
                vec![TreeSpec::leaf(SetPrescription::new(10, 20_000, 90))],
            ),
        );
        let UpsertOutcome::Applied {
            cloned,
            original_id,
            reference_count,
            ..
        } = outcome
        else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert!(!cloned);
        assert_eq!(original_id, None);
        assert_eq!(reference_count, 1);

        // A divergent value forces a new node and names the one it shadowed.
        let outcome = service.upsert_subtree(
            key,
            &block_path(&service, key),
            Some(Ordinal::ZERO),
            &TreeSpec::new(
                ExerciseMeta::new("Split squat"),
                vec![TreeSpec::leaf(SetPrescription::new(12, 20_000, 90))],
            ),
        );
        let UpsertOutcome::Applied {
            cloned,
            original_id,
            ..
        } = outcome
        else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert!(cloned);
        assert!(original_id.is_some());
        service.validate().unwrap();
    }

    #[rstest]
    fn rejected_upserts_carry_code_and_message(service: RegimenService) {
        let tpl = service.create_program_from_scratch(&chain()).unwrap();
        let key = RootKey::Template(tpl);
        let bogus_path = vec![PathStep::new(NodeId::new(999), Ordinal::ZERO)];
        let outcome = service.upsert_subtree(
            key,
            &bogus_path,
            None,
            &TreeSpec::new(PhaseMeta::new("W2"), vec![]),
        );
        let UpsertOutcome::Rejected { error, message } = outcome else {
            panic!("expected Rejected, got {outcome:?}");
        };
        assert_eq!(error, "stale_path");
        assert!(message.contains("stale"));
    }

    #[rstest]
    fn upsert_outcome_serializes_with_status_tag(service: RegimenService) {
        let tpl = service.create_program_from_scratch(&chain()).unwrap();
        let key = RootKey::Template(tpl);
        let outcome = service.upsert_subtree(
            key,
            &[],
            None,
            &TreeSpec::new(PhaseMeta::new("Week 2"), vec![]),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "applied");
        assert_eq!(json["cloned"], true);
        // original_id is omitted entirely for an append.
        assert!(json.get("original_id").is_none());
    }

    #[rstest]
    fn edit_node_returns_the_new_root(service: RegimenService) {
        let tpl = service.create_program_from_scratch(&chain()).unwrap();
        let team = service
            .assign_program_to_team(tpl, TeamId::new(1), start())
            .unwrap();
        let before = service.read_full_structure(RootKey::Assignment(team)).unwrap();

        let full = before.clone();
        let path = vec![
            PathStep::new(full.id, full.phases[0].ordinal),
            PathStep::new(full.phases[0].id, full.phases[0].blocks[0].ordinal),
            PathStep::new(
                full.phases[0].blocks[0].id,
                full.phases[0].blocks[0].exercises[0].ordinal,
            ),
            PathStep::new(
                full.phases[0].blocks[0].exercises[0].id,
                full.phases[0].blocks[0].exercises[0].sets[0].ordinal,
            ),
        ];
        let new_root = service
            .edit_node(
                RootKey::Assignment(team),
                &path,
                EditOp::Replace {
                    content: SetPrescription::new(12, 20_000, 90).into(),
                },
            )
            .unwrap();
        assert_ne!(new_root, before.id);

        // The template still reads the original prescription.
        let template_view = service.read_full_structure(RootKey::Template(tpl)).unwrap();
        assert_eq!(
            template_view.phases[0].blocks[0].exercises[0].sets[0].reps,
            10
        );
        service.validate().unwrap();
    }

    #[rstest]
    fn assignment_listing_filters_by_team(service: RegimenService) {
        let tpl = service.create_program_from_scratch(&chain()).unwrap();
        let a = service
            .assign_program_to_team(tpl, TeamId::new(1), start())
            .unwrap();
        let _b = service
            .assign_program_to_team(tpl, TeamId::new(2), start())
            .unwrap();
        let team_one = service.assignments_for_team(TeamId::new(1));
        assert_eq!(team_one.len(), 1);
        assert_eq!(team_one[0].0, a);
    }

    #[rstest]
    fn concurrent_editors_preserve_the_invariants(service: RegimenService) {
        let service = Arc::new(service);
        let tpl = service.create_program_from_scratch(&chain()).unwrap();
        let assignments: Vec<_> = (0..4)
            .map(|i| {
                service
                    .assign_program_to_team(tpl, TeamId::new(i), start())
                    .unwrap()
            })
            .collect();

        let mut handles = Vec::new();
        for (worker, asg) in assignments.into_iter().enumerate() {
            let service = Arc::clone(&service);
            handles.push(std::thread::spawn(move || {
                let key = RootKey::Assignment(asg);
                for round in 0..20u32 {
                    let full = service.read_full_structure(key).unwrap();
                    let path = vec![
                        PathStep::new(full.id, full.phases[0].ordinal),
                        PathStep::new(full.phases[0].id, full.phases[0].blocks[0].ordinal),
                        PathStep::new(
                            full.phases[0].blocks[0].id,
                            full.phases[0].blocks[0].exercises[0].ordinal,
                        ),
                        PathStep::new(
                            full.phases[0].blocks[0].exercises[0].id,
                            full.phases[0].blocks[0].exercises[0].sets[0].ordinal,
                        ),
                    ];
                    let edit = EditOp::Replace {
                        content: SetPrescription::new(
                            10 + worker as u32,
                            20_000 + round * 500,
                            90,
                        )
                        .into(),
                    };
                    // Each worker edits only its own assignment, so its
                    // freshly read path cannot go stale.
                    service.edit_node(key, &path, edit).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        service.validate().unwrap();
        // The template was never edited through any assignment.
        let template_view = service.read_full_structure(RootKey::Template(tpl)).unwrap();
        assert_eq!(
            template_view.phases[0].blocks[0].exercises[0].sets[0].reps,
            10
        );
    }
}
