//! Graphlets: ordered node sets designated as a unit.

use serde::{Deserialize, Serialize};

use super::NodeId;

/// An ordered multiset of node references. The first item is the main item.
///
/// A graphlet owns no nodes; it points into some [`NodePool`](super::NodePool).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graphlet {
    items: Vec<NodeId>,
}

impl Graphlet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<NodeId>) -> Self {
        Self { items }
    }

    pub fn single(id: NodeId) -> Self {
        Self { items: vec![id] }
    }

    /// The main item, if any.
    pub fn main(&self) -> Option<NodeId> {
        self.items.first().copied()
    }

    pub fn items(&self) -> &[NodeId] {
        &self.items
    }

    pub fn push(&mut self, id: NodeId) {
        self.items.push(id);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.items.contains(&id)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.items.iter().copied()
    }

    pub(crate) fn replace(&mut self, index: usize, id: NodeId) -> Option<NodeId> {
        self.items
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, id))
    }

    /// Items of `self` that are not in `covered`, in order.
    pub fn without(&self, covered: &[NodeId]) -> Graphlet {
        Graphlet::from_items(
            self.items
                .iter()
                .copied()
                .filter(|id| !covered.contains(id))
                .collect(),
        )
    }
}

impl FromIterator<NodeId> for Graphlet {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        Self::from_items(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_is_first() {
        let g: Graphlet = [NodeId::from_index(3), NodeId::from_index(1)]
            .into_iter()
            .collect();
        assert_eq!(g.main(), Some(NodeId::from_index(3)));
        assert_eq!(Graphlet::new().main(), None);
    }

    #[test]
    fn without_keeps_order() {
        let ids: Vec<_> = (0..4).map(NodeId::from_index).collect();
        let g = Graphlet::from_items(ids.clone());
        let rest = g.without(&[ids[1], ids[3]]);
        assert_eq!(rest.items(), &[ids[0], ids[2]]);
    }
}
