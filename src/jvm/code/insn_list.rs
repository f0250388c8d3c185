use super::{Insn, Label};
use std::collections::HashMap;

/// A linear list of instructions with interleaved label markers
///
/// Fragments produced by the instruction builder are also `InsnList`s, so a
/// method body is assembled by merging fragments and single instructions
/// into one list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InsnList {
    insns: Vec<Insn>,
}

impl InsnList {
    pub fn new() -> InsnList {
        InsnList { insns: vec![] }
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Append a single instruction
    pub fn push(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    /// Append another list, consuming it
    pub fn extend(&mut self, other: InsnList) {
        self.insns.extend(other.insns);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Insn> {
        self.insns.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Insn> {
        self.insns.get(index)
    }

    pub fn as_slice(&self) -> &[Insn] {
        &self.insns
    }

    /// Index of the marker for `label`, if the list places it
    pub fn find_label(&self, label: Label) -> Option<usize> {
        self.insns
            .iter()
            .position(|insn| matches!(insn, Insn::Label(l) if *l == label))
    }

    /// Clone the whole list, rewriting label operands through `label_map`
    pub fn clone_with_labels(&self, label_map: &HashMap<Label, Label>) -> InsnList {
        self.insns
            .iter()
            .map(|insn| insn.clone_with_labels(label_map))
            .collect()
    }
}

impl From<Vec<Insn>> for InsnList {
    fn from(insns: Vec<Insn>) -> InsnList {
        InsnList { insns }
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<I: IntoIterator<Item = Insn>>(iter: I) -> InsnList {
        InsnList {
            insns: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for InsnList {
    type Item = Insn;
    type IntoIter = std::vec::IntoIter<Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.into_iter()
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = &'a Insn;
    type IntoIter = std::slice::Iter<'a, Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.iter()
    }
}
