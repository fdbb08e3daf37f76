//! Fully-resolved, denormalized tree snapshots for external readers.
//!
//! Materialization inlines every logical occurrence of a node, so readers
//! never see the sharing: two blocks backed by one underlying node come out
//! as two equal sub-trees. The traversal is read-only — reference counts are
//! untouched — and guards against a (never expected) cyclic relation index
//! with a per-path visited set rather than looping forever.

use fxhash::FxHashSet;
use smol_str::SmolStr;

use crate::content::NodeContent;
use crate::core::{NodeId, Ordinal};
use crate::graph::registry::RootKey;
use crate::graph::{GraphError, TemplateGraph};

/// A fully expanded program tree. Derived on read; never stored.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FullProgramStructure {
    /// Node backing this occurrence.
    pub id: NodeId,
    /// Program name.
    pub name: SmolStr,
    /// Program description.
    pub description: SmolStr,
    /// Phases in order.
    pub phases: Vec<FullPhase>,
}

/// A phase within a materialized program.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FullPhase {
    /// Node backing this occurrence.
    pub id: NodeId,
    /// Position under the program.
    pub ordinal: Ordinal,
    /// Phase name.
    pub name: SmolStr,
    /// Coaching focus, if set.
    pub focus: Option<SmolStr>,
    /// Blocks in order.
    pub blocks: Vec<FullBlock>,
}

/// A block within a materialized phase.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FullBlock {
    /// Node backing this occurrence.
    pub id: NodeId,
    /// Position under the phase.
    pub ordinal: Ordinal,
    /// Block name.
    pub name: SmolStr,
    /// Exercises in order.
    pub exercises: Vec<FullExercise>,
}

/// An exercise within a materialized block.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FullExercise {
    /// Node backing this occurrence.
    pub id: NodeId,
    /// Position under the block.
    pub ordinal: Ordinal,
    /// Exercise name.
    pub name: SmolStr,
    /// Movement cue, if set.
    pub cue: Option<SmolStr>,
    /// Sets in order.
    pub sets: Vec<FullSet>,
}

/// A set within a materialized exercise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FullSet {
    /// Node backing this occurrence.
    pub id: NodeId,
    /// Position under the exercise.
    pub ordinal: Ordinal,
    /// Repetitions.
    pub reps: u32,
    /// Load in grams.
    pub weight_grams: u32,
    /// Rest after the set, in seconds.
    pub rest_seconds: u32,
}

impl TemplateGraph {
    /// Materializes the tree registered under `key`.
    pub fn materialize(&self, key: RootKey) -> Result<FullProgramStructure, GraphError> {
        self.materialize_node(self.root(key)?)
    }

    /// Materializes the tree rooted at a Program node.
    pub fn materialize_node(&self, root: NodeId) -> Result<FullProgramStructure, GraphError> {
        let mut on_path = FxHashSet::default();
        self.full_program(root, &mut on_path)
    }

    fn full_program(
        &self,
        id: NodeId,
        on_path: &mut FxHashSet<NodeId>,
    ) -> Result<FullProgramStructure, GraphError> {
        if !on_path.insert(id) {
            return Err(GraphError::CycleDetected { node: id });
        }
        let node = self.node(id)?;
        let NodeContent::Program(meta) = node.content() else {
            return Err(GraphError::NotAProgramRoot { found: node.kind() });
        };
        let mut phases = Vec::new();
        for (ordinal, child) in self.children(id) {
            phases.push(self.full_phase(child, ordinal, on_path)?);
        }
        on_path.remove(&id);
        Ok(FullProgramStructure {
            id,
            name: meta.name.clone(),
            description: meta.description.clone(),
            phases,
        })
    }

    fn full_phase(
        &self,
        id: NodeId,
        ordinal: Ordinal,
        on_path: &mut FxHashSet<NodeId>,
    ) -> Result<FullPhase, GraphError> {
        if !on_path.insert(id) {
            return Err(GraphError::CycleDetected { node: id });
        }
        let node = self.node(id)?;
        let NodeContent::Phase(meta) = node.content() else {
            return Err(GraphError::KindMismatch {
                parent: crate::core::NodeKind::Program,
                child: node.kind(),
            });
        };
        let mut blocks = Vec::new();
        for (child_ordinal, child) in self.children(id) {
            blocks.push(self.full_block(child, child_ordinal, on_path)?);
        }
        on_path.remove(&id);
        Ok(FullPhase {
            id,
            ordinal,
            name: meta.name.clone(),
            focus: meta.focus.clone(),
            blocks,
        })
    }

    fn full_block(
        &self,
        id: NodeId,
        ordinal: Ordinal,
        on_path: &mut FxHashSet<NodeId>,
    ) -> Result<FullBlock, GraphError> {
        if !on_path.insert(id) {
            return Err(GraphError::CycleDetected { node: id });
        }
        let node = self.node(id)?;
        let NodeContent::Block(meta) = node.content() else {
            return Err(GraphError::KindMismatch {
                parent: crate::core::NodeKind::Phase,
                child: node.kind(),
            });
        };
        let mut exercises = Vec::new();
        for (child_ordinal, child) in self.children(id) {
            exercises.push(self.full_exercise(child, child_ordinal, on_path)?);
        }
        on_path.remove(&id);
        Ok(FullBlock {
            id,
            ordinal,
            name: meta.name.clone(),
            exercises,
        })
    }

    fn full_exercise(
        &self,
        id: NodeId,
        ordinal: Ordinal,
        on_path: &mut FxHashSet<NodeId>,
    ) -> Result<FullExercise, GraphError> {
        if !on_path.insert(id) {
            return Err(GraphError::CycleDetected { node: id });
        }
        let node = self.node(id)?;
        let NodeContent::Exercise(meta) = node.content() else {
            return Err(GraphError::KindMismatch {
                parent: crate::core::NodeKind::Block,
                child: node.kind(),
            });
        };
        let mut sets = Vec::new();
        for (child_ordinal, child) in self.children(id) {
            sets.push(self.full_set(child, child_ordinal)?);
        }
        on_path.remove(&id);
        Ok(FullExercise {
            id,
            ordinal,
            name: meta.name.clone(),
            cue: meta.cue.clone(),
            sets,
        })
    }

    fn full_set(&self, id: NodeId, ordinal: Ordinal) -> Result<FullSet, GraphError> {
        let node = self.node(id)?;
        let NodeContent::Set(set) = node.content() else {
            return Err(GraphError::KindMismatch {
                parent: crate::core::NodeKind::Exercise,
                child: node.kind(),
            });
        };
        Ok(FullSet {
            id,
            ordinal,
            reps: set.reps,
            weight_grams: set.weight_grams,
            rest_seconds: set.rest_seconds,
        })
    }
}

#[cfg(test)]
mod test {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::content::{
        BlockMeta, ExerciseMeta, PhaseMeta, ProgramMeta, SetPrescription,
    };
    use crate::graph::TreeSpec;

    #[fixture]
    fn graph() -> TemplateGraph {
        TemplateGraph::new()
    }

    fn two_block_program() -> TreeSpec {
        let block = TreeSpec::new(
            BlockMeta::new("Lower A"),
            vec![TreeSpec::new(
                ExerciseMeta::new("Split squat").with_cue("Slow eccentric"),
                vec![TreeSpec::leaf(SetPrescription::new(10, 20_000, 90))],
            )],
        );
        TreeSpec::new(
            ProgramMeta::new("Return to play", "Stage 2"),
            vec![TreeSpec::new(
                PhaseMeta::new("Week 1").with_focus("Control"),
                vec![block.clone(), block],
            )],
        )
    }

    #[rstest]
    fn shared_nodes_are_inlined_per_occurrence(mut graph: TemplateGraph) {
        let tpl = graph.publish_template(&two_block_program()).unwrap();
        let full = graph.materialize(RootKey::Template(tpl)).unwrap();

        assert_eq!(full.name, "Return to play");
        assert_eq!(full.phases.len(), 1);
        let phase = &full.phases[0];
        assert_eq!(phase.focus.as_deref(), Some("Control"));
        assert_eq!(phase.blocks.len(), 2);
        // One underlying node, two occurrences, distinct ordinals.
        assert_eq!(phase.blocks[0].id, phase.blocks[1].id);
        assert_ne!(phase.blocks[0].ordinal, phase.blocks[1].ordinal);
        assert_eq!(phase.blocks[0].exercises, phase.blocks[1].exercises);
        assert_eq!(
            phase.blocks[0].exercises[0].cue.as_deref(),
            Some("Slow eccentric")
        );
        assert_eq!(phase.blocks[0].exercises[0].sets[0].weight_grams, 20_000);
    }

    #[rstest]
    fn materialization_does_not_touch_refcounts(mut graph: TemplateGraph) {
        let tpl = graph.publish_template(&two_block_program()).unwrap();
        let counts: Vec<_> = {
            let mut c: Vec<_> = graph
                .store
                .iter()
                .map(|n| (n.id(), n.reference_count()))
                .collect();
            c.sort();
            c
        };
        let _ = graph.materialize(RootKey::Template(tpl)).unwrap();
        let mut after: Vec<_> = graph
            .store
            .iter()
            .map(|n| (n.id(), n.reference_count()))
            .collect();
        after.sort();
        assert_eq!(after, counts);
    }

    #[rstest]
    fn unknown_root_is_reported(graph: TemplateGraph) {
        let err = graph
            .materialize(RootKey::Template(crate::core::TemplateId::new(9)))
            .unwrap_err();
        assert!(matches!(err, GraphError::RootNotFound { .. }));
    }

    #[rstest]
    fn forged_cycle_is_detected_not_looped(mut graph: TemplateGraph) {
        let tpl = graph.publish_template(&two_block_program()).unwrap();
        let root = graph.root(RootKey::Template(tpl)).unwrap();
        let phase = graph.child_at(root, Ordinal::ZERO).unwrap();
        // Forge an edge pointing back up the path, bypassing the kind and
        // hash discipline that normally makes this impossible.
        graph
            .relations
            .insert(phase, phase, Ordinal::new(17))
            .unwrap();
        let err = graph.materialize(RootKey::Template(tpl)).unwrap_err();
        assert_eq!(err, GraphError::CycleDetected { node: phase });
    }

    #[rstest]
    fn serializes_for_external_readers(mut graph: TemplateGraph) {
        let tpl = graph.publish_template(&two_block_program()).unwrap();
        let full = graph.materialize(RootKey::Template(tpl)).unwrap();
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["phases"][0]["blocks"][0]["exercises"][0]["sets"][0]["reps"], 10);
        let back: FullProgramStructure = serde_json::from_value(json).unwrap();
        assert_eq!(back, full);
    }
}
