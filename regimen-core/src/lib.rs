//! Content-addressed, copy-on-write storage for hierarchical
//! exercise-program templates.
//!
//! This crate contains the core definitions for the regimen store. See the
//! [top-level crate documentation](https://docs.rs/regimen/latest/regimen/)
//! for more information.
//!
//! Programs are ordered trees (Program → Phase → Block → Exercise → Set)
//! held in an arena of nodes keyed by opaque identity, connected through a
//! separate ordered edge index and deduplicated by Merkle fingerprint:
//! identical sub-trees are stored once, however many programs contain them.
//! Every node carries a reference count equal to its live referents, and an
//! edit never mutates a shared node — it mints replacements along the edited
//! path, reuses existing nodes wherever values converge, and reclaims
//! whatever the rewrite abandoned.

pub mod content;
pub mod core;
pub mod fingerprint;
pub mod graph;
pub mod service;

pub use crate::content::{
    BlockMeta, ExerciseMeta, NodeContent, PhaseMeta, ProgramMeta, SetPrescription,
};
pub use crate::core::{AssignmentId, NodeId, NodeKind, Ordinal, TeamId, TemplateId};
pub use crate::fingerprint::{ContentHash, fingerprint};
pub use crate::graph::{
    EditOp, EditReport, FullProgramStructure, GraphError, PathStep, RootKey, TeamProgramAssignment,
    TemplateGraph, TreeSpec, UpsertReport,
};
pub use crate::service::{RegimenService, UpsertOutcome};
