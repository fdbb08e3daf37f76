//! Content-addressed, copy-on-write storage for hierarchical
//! exercise-program templates.
//!
//! A program template is an ordered tree — Program → Phase → Block →
//! Exercise → Set — authored once and assigned, whole or in part, to many
//! teams and patients. Identical sub-trees are stored once, whoever uses
//! them: every node is named by a Merkle fingerprint of its value, and the
//! store refuses to hold the same value twice. Assignees share the
//! template's structure until their first divergent edit, at which point
//! only the edited path is copied; every node tracks its live referents by
//! reference count and is reclaimed the moment the last one goes away.
//!
//! It includes methods for:
//!
//! - authoring templates from declarative [`TreeSpec`] trees;
//! - assigning programs to teams and customizing each copy independently;
//! - content-addressed sub-tree upserts with an observable clone/reuse
//!   outcome;
//! - materializing fully expanded views for external readers;
//! - exporting and re-importing the store through a persistence
//!   collaborator.
//!
//! # Example
//!
//! Author a template, assign it to two teams and customize one copy; the
//! other keeps reading the shared original:
//!
//! ```
//! use regimen::{
//!     BlockMeta, EditOp, ExerciseMeta, PathStep, PhaseMeta, ProgramMeta, RegimenService,
//!     SetPrescription, TeamId, TreeSpec,
//! };
//!
//! let service = RegimenService::new();
//! let program = TreeSpec::new(
//!     ProgramMeta::new("Return to play", "ACL protocol, stage 2"),
//!     vec![TreeSpec::new(
//!         PhaseMeta::new("Week 1"),
//!         vec![TreeSpec::new(
//!             BlockMeta::new("Lower A"),
//!             vec![TreeSpec::new(
//!                 ExerciseMeta::new("Split squat"),
//!                 vec![TreeSpec::leaf(SetPrescription::new(10, 20_000, 90))],
//!             )],
//!         )],
//!     )],
//! );
//! let template = service.create_program_from_scratch(&program)?;
//!
//! let start = chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
//! let team_a = service.assign_program_to_team(template, TeamId::new(1), start)?;
//! let team_b = service.assign_program_to_team(template, TeamId::new(2), start)?;
//!
//! // Bump team A's split squat from 10 to 12 reps. The path names every
//! // hop from the root so concurrent structural changes are detected.
//! let view = service.read_full_structure(team_a)?;
//! let exercise = &view.phases[0].blocks[0].exercises[0];
//! let path = vec![
//!     PathStep::new(view.id, view.phases[0].ordinal),
//!     PathStep::new(view.phases[0].id, view.phases[0].blocks[0].ordinal),
//!     PathStep::new(view.phases[0].blocks[0].id, exercise.ordinal),
//!     PathStep::new(exercise.id, exercise.sets[0].ordinal),
//! ];
//! service.edit_node(
//!     team_a,
//!     &path,
//!     EditOp::Replace {
//!         content: SetPrescription::new(12, 20_000, 90).into(),
//!     },
//! )?;
//!
//! // Team B's copy is untouched.
//! let b = service.read_full_structure(team_b)?;
//! assert_eq!(b.phases[0].blocks[0].exercises[0].sets[0].reps, 10);
//! # Ok::<(), regimen::GraphError>(())
//! ```

// These modules are re-exported as-is. If more control is needed, define a
// new module in this crate with the desired exports.
pub use regimen_core::{content, core, fingerprint, graph, service};

// Top-level re-exports for convenience.
pub use regimen_core::{
    AssignmentId, BlockMeta, ContentHash, EditOp, EditReport, ExerciseMeta, FullProgramStructure,
    GraphError, NodeContent, NodeId, NodeKind, Ordinal, PathStep, PhaseMeta, ProgramMeta,
    RegimenService, RootKey, SetPrescription, TeamId, TeamProgramAssignment, TemplateGraph,
    TemplateId, TreeSpec, UpsertOutcome, UpsertReport,
};
