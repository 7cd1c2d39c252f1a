//! `affects` / `affected_by` edges between elements and derivations.
//!
//! Edges come only from the references of successfully compiled
//! derivations. Both directions keep insertion order so that waves are
//! planned deterministically.

use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::ElementRef;

/// Insertion-ordered set of elements.
#[derive(Debug, Default, Clone)]
pub struct EdgeSet {
    order: Vec<ElementRef>,
    members: FxHashSet<ElementRef>,
}

impl EdgeSet {
    pub fn insert(&mut self, element: ElementRef) -> bool {
        if self.members.insert(element) {
            self.order.push(element);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, element: &ElementRef) -> bool {
        if self.members.remove(element) {
            self.order.retain(|e| e != element);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, element: &ElementRef) -> bool {
        self.members.contains(element)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementRef> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ElementRef> {
        self.order.clone()
    }
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// referenced element -> derivations reading it
    affects: FxHashMap<ElementRef, EdgeSet>,
    /// derivation target -> elements it reads
    affected_by: FxHashMap<ElementRef, EdgeSet>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the inputs of `target`.
    pub fn link(&mut self, target: ElementRef, references: &[ElementRef]) {
        self.unlink(&target);
        let mut inputs = EdgeSet::default();
        for r in references {
            inputs.insert(*r);
            self.affects.entry(*r).or_default().insert(target);
        }
        self.affected_by.insert(target, inputs);
    }

    /// Tear down the inputs of `target`; returns whether it had any.
    pub fn unlink(&mut self, target: &ElementRef) -> bool {
        let Some(inputs) = self.affected_by.remove(target) else {
            return false;
        };
        for r in inputs.iter() {
            if let Some(readers) = self.affects.get_mut(r) {
                readers.remove(target);
                if readers.is_empty() {
                    self.affects.remove(r);
                }
            }
        }
        true
    }

    /// Derivations that read `element`.
    pub fn affects(&self, element: &ElementRef) -> Option<&EdgeSet> {
        self.affects.get(element)
    }

    /// Elements `target` reads.
    pub fn affected_by(&self, target: &ElementRef) -> Option<&EdgeSet> {
        self.affected_by.get(target)
    }

    /// Derivations reading any of `elements`, deduplicated, in edge order.
    pub fn readers_of<'a>(&self, elements: impl IntoIterator<Item = &'a ElementRef>) -> Vec<ElementRef> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for element in elements {
            if let Some(readers) = self.affects.get(element) {
                for r in readers.iter() {
                    if seen.insert(*r) {
                        out.push(*r);
                    }
                }
            }
        }
        out
    }

    pub fn derivation_count(&self) -> usize {
        self.affected_by.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_common::{ColumnId, RowId, TableId};

    const T: TableId = TableId(1);

    fn col(c: u32) -> ElementRef {
        ElementRef::Column(T, ColumnId(c))
    }

    #[test]
    fn link_is_symmetric_and_relink_replaces() {
        let mut g = DependencyGraph::new();
        let target = col(3);
        g.link(target, &[col(1), col(2)]);
        assert_eq!(g.affected_by(&target).map(EdgeSet::to_vec), Some(vec![col(1), col(2)]));
        assert!(g.affects(&col(1)).is_some_and(|s| s.contains(&target)));

        g.link(target, &[col(2)]);
        assert!(g.affects(&col(1)).is_none());
        assert_eq!(g.affects(&col(2)).map(EdgeSet::len), Some(1));

        assert!(g.unlink(&target));
        assert!(!g.unlink(&target));
        assert!(g.affects(&col(2)).is_none());
        assert_eq!(g.derivation_count(), 0);
    }

    #[test]
    fn readers_keep_insertion_order() {
        let mut g = DependencyGraph::new();
        let cell = ElementRef::Cell(T, RowId(1), ColumnId(1));
        g.link(col(5), &[col(1)]);
        g.link(cell, &[col(1), col(2)]);
        g.link(col(4), &[col(2)]);
        assert_eq!(g.readers_of(&[col(1), col(2)]), vec![col(5), cell, col(4)]);
    }
}
