//! Content fingerprints for template sub-trees.
//!
//! A node's fingerprint is a Merkle-style digest over its kind, its own
//! scalar payload and the ordered fingerprints of its children. Two sub-trees
//! with equal fingerprints are treated as the same value everywhere in the
//! store; a collision between distinct values is out of scope as a
//! correctness bug, not a condition to handle.

use crate::content::NodeContent;

/// A 256-bit content digest of a node and, transitively, of the whole
/// sub-tree below it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The full digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

// Digests render abbreviated; the full value is rarely useful in logs.
impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..")
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

/// Computes the fingerprint of a node from its payload and the ordered
/// fingerprints of its children.
///
/// The digest is domain-separated by the node kind and every field is
/// length-prefixed, so the encoding is prefix-free: reordering children,
/// moving bytes between adjacent fields, or changing the kind all change the
/// result. Leaf nodes pass an empty `child_hashes` slice.
#[must_use]
pub fn fingerprint(content: &NodeContent, child_hashes: &[ContentHash]) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[content.kind().tag()]);

    let mut payload = Vec::new();
    content.write_canonical(&mut payload);
    hasher.update(&(payload.len() as u64).to_le_bytes());
    hasher.update(&payload);

    hasher.update(&(child_hashes.len() as u64).to_le_bytes());
    for child in child_hashes {
        hasher.update(child.as_bytes());
    }

    ContentHash(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::content::{BlockMeta, ExerciseMeta, PhaseMeta, SetPrescription};

    fn set(reps: u32) -> ContentHash {
        fingerprint(&SetPrescription::new(reps, 20_000, 90).into(), &[])
    }

    #[test]
    fn deterministic() {
        assert_eq!(set(10), set(10));
    }

    #[test]
    fn sensitive_to_leaf_content() {
        assert_ne!(set(10), set(12));
    }

    #[test]
    fn sensitive_to_child_order() {
        let block = NodeContent::from(BlockMeta::new("A"));
        let (a, b) = (set(5), set(8));
        assert_ne!(fingerprint(&block, &[a, b]), fingerprint(&block, &[b, a]));
    }

    #[test]
    fn domain_separated_by_kind() {
        // Phase and Exercise payloads encode to identical bytes here; only
        // the kind tag tells them apart.
        let phase = NodeContent::from(PhaseMeta::new("A"));
        let exercise = NodeContent::from(ExerciseMeta::new("A"));
        assert_ne!(fingerprint(&phase, &[]), fingerprint(&exercise, &[]));
    }

    #[test]
    fn child_list_length_matters() {
        let block = NodeContent::from(BlockMeta::new("A"));
        let a = set(5);
        assert_ne!(fingerprint(&block, &[a]), fingerprint(&block, &[a, a]));
    }

    #[test]
    fn ancestor_hash_changes_with_descendant() {
        let block = NodeContent::from(BlockMeta::new("A"));
        let before = fingerprint(&block, &[set(10)]);
        let after = fingerprint(&block, &[set(12)]);
        assert_ne!(before, after);
    }
}
