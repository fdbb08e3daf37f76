//! The per-level payload types carried by template nodes.
//!
//! Container levels (Program, Phase, Block, Exercise) carry only scalar
//! display metadata; their real "content" is the ordered sequence of their
//! children, which enters the node's fingerprint separately (see
//! [`fingerprint`](crate::fingerprint::fingerprint)). The leaf level
//! ([`SetPrescription`]) carries the full prescription.

use derive_more::From;
use smol_str::SmolStr;

use crate::core::NodeKind;

/// Scalar metadata of a program node.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProgramMeta {
    /// Display name of the program.
    pub name: SmolStr,
    /// Free-form description shown to assignees.
    pub description: SmolStr,
}

/// Scalar metadata of a phase node.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PhaseMeta {
    /// Display name of the phase.
    pub name: SmolStr,
    /// Optional coaching focus for the phase.
    pub focus: Option<SmolStr>,
}

/// Scalar metadata of a block node.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockMeta {
    /// Display name of the block.
    pub name: SmolStr,
}

/// Scalar metadata of an exercise node.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExerciseMeta {
    /// Display name of the exercise.
    pub name: SmolStr,
    /// Optional movement cue / instructions.
    pub cue: Option<SmolStr>,
}

/// A set prescription: the leaf payload of the hierarchy.
///
/// All quantities are integers so that equal prescriptions have equal bytes
/// and therefore equal fingerprints; weight is stored in grams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SetPrescription {
    /// Number of repetitions.
    pub reps: u32,
    /// Load in grams.
    pub weight_grams: u32,
    /// Rest after the set, in seconds.
    pub rest_seconds: u32,
}

/// The kind-specific payload of a node.
#[derive(Clone, Debug, PartialEq, Eq, From, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum NodeContent {
    /// Payload of a [`NodeKind::Program`] node.
    Program(ProgramMeta),
    /// Payload of a [`NodeKind::Phase`] node.
    Phase(PhaseMeta),
    /// Payload of a [`NodeKind::Block`] node.
    Block(BlockMeta),
    /// Payload of a [`NodeKind::Exercise`] node.
    Exercise(ExerciseMeta),
    /// Payload of a [`NodeKind::Set`] node.
    Set(SetPrescription),
}

impl NodeContent {
    /// The hierarchy level this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeContent::Program(_) => NodeKind::Program,
            NodeContent::Phase(_) => NodeKind::Phase,
            NodeContent::Block(_) => NodeKind::Block,
            NodeContent::Exercise(_) => NodeKind::Exercise,
            NodeContent::Set(_) => NodeKind::Set,
        }
    }

    /// The display name of the node, if its level carries one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeContent::Program(m) => Some(&m.name),
            NodeContent::Phase(m) => Some(&m.name),
            NodeContent::Block(m) => Some(&m.name),
            NodeContent::Exercise(m) => Some(&m.name),
            NodeContent::Set(_) => None,
        }
    }

    /// Writes the canonical byte encoding of the payload.
    ///
    /// Every variable-length field is length-prefixed and options carry an
    /// explicit presence tag, so distinct payloads always produce distinct
    /// byte strings. The encoding is independent of any serde format and must
    /// stay stable: it is the input to the content fingerprint.
    pub(crate) fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            NodeContent::Program(m) => {
                put_str(out, &m.name);
                put_str(out, &m.description);
            }
            NodeContent::Phase(m) => {
                put_str(out, &m.name);
                put_opt_str(out, m.focus.as_deref());
            }
            NodeContent::Block(m) => {
                put_str(out, &m.name);
            }
            NodeContent::Exercise(m) => {
                put_str(out, &m.name);
                put_opt_str(out, m.cue.as_deref());
            }
            NodeContent::Set(s) => {
                out.extend_from_slice(&s.reps.to_le_bytes());
                out.extend_from_slice(&s.weight_grams.to_le_bytes());
                out.extend_from_slice(&s.rest_seconds.to_le_bytes());
            }
        }
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_opt_str(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        None => out.push(0),
        Some(s) => {
            out.push(1);
            put_str(out, s);
        }
    }
}

impl ProgramMeta {
    /// Creates program metadata.
    pub fn new(name: impl Into<SmolStr>, description: impl Into<SmolStr>) -> Self {
        ProgramMeta {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl PhaseMeta {
    /// Creates phase metadata without a focus note.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        PhaseMeta {
            name: name.into(),
            focus: None,
        }
    }

    /// Attaches a coaching focus note.
    #[must_use]
    pub fn with_focus(mut self, focus: impl Into<SmolStr>) -> Self {
        self.focus = Some(focus.into());
        self
    }
}

impl BlockMeta {
    /// Creates block metadata.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        BlockMeta { name: name.into() }
    }
}

impl ExerciseMeta {
    /// Creates exercise metadata without a movement cue.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        ExerciseMeta {
            name: name.into(),
            cue: None,
        }
    }

    /// Attaches a movement cue.
    #[must_use]
    pub fn with_cue(mut self, cue: impl Into<SmolStr>) -> Self {
        self.cue = Some(cue.into());
        self
    }
}

impl SetPrescription {
    /// Creates a set prescription.
    #[must_use]
    pub fn new(reps: u32, weight_grams: u32, rest_seconds: u32) -> Self {
        SetPrescription {
            reps,
            weight_grams,
            rest_seconds,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn canonical(content: &NodeContent) -> Vec<u8> {
        let mut out = Vec::new();
        content.write_canonical(&mut out);
        out
    }

    #[test]
    fn canonical_bytes_are_field_delimited() {
        // Without length prefixes these two would collide.
        let a = NodeContent::from(ProgramMeta::new("ab", "c"));
        let b = NodeContent::from(ProgramMeta::new("a", "bc"));
        assert_ne!(canonical(&a), canonical(&b));
    }

    #[test]
    fn canonical_bytes_distinguish_absent_and_empty() {
        let absent = NodeContent::from(PhaseMeta::new("w1"));
        let empty = NodeContent::from(PhaseMeta::new("w1").with_focus(""));
        assert_ne!(canonical(&absent), canonical(&empty));
    }

    #[test]
    fn set_prescription_encodes_all_fields() {
        let a = NodeContent::from(SetPrescription::new(10, 20_000, 90));
        let b = NodeContent::from(SetPrescription::new(10, 20_000, 91));
        assert_ne!(canonical(&a), canonical(&b));
        assert_eq!(canonical(&a), canonical(&a.clone()));
    }

    #[test]
    fn serde_tags_by_kind() {
        let content = NodeContent::from(BlockMeta::new("Lower A"));
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["kind"], "Block");
        let back: NodeContent = serde_json::from_value(json).unwrap();
        assert_eq!(back, content);
    }
}
