//! Substitution maps from pattern nodes to images, and undo logs for
//! destructive key rewriting.

use serde::{Deserialize, Serialize};

use super::{Graphlet, NodeId, NodePool};
use tracing::warn;

use crate::error::GraphResult;

/// Pattern → image pairs, in binding order.
///
/// `expect` is the number of pattern items the matcher must bind before a
/// set counts as complete. Truncating back to an earlier length undoes
/// every binding made since, which is how the matcher backtracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings {
    pairs: Vec<(NodeId, NodeId)>,
    expect: usize,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expect(expect: usize) -> Self {
        Self {
            pairs: Vec::new(),
            expect,
        }
    }

    pub fn expect(&self) -> usize {
        self.expect
    }

    pub fn set_expect(&mut self, expect: usize) {
        self.expect = expect;
    }

    /// Image bound to a pattern node.
    pub fn lookup(&self, pattern: NodeId) -> Option<NodeId> {
        self.pairs
            .iter()
            .rev()
            .find(|(p, _)| *p == pattern)
            .map(|(_, i)| *i)
    }

    /// Pattern node bound to an image, if any.
    pub fn pattern_for(&self, image: NodeId) -> Option<NodeId> {
        self.pairs
            .iter()
            .rev()
            .find(|(_, i)| *i == image)
            .map(|(p, _)| *p)
    }

    pub fn is_bound(&self, pattern: NodeId) -> bool {
        self.lookup(pattern).is_some()
    }

    /// Record a binding. Later bindings shadow earlier ones for lookup.
    pub fn bind(&mut self, pattern: NodeId, image: NodeId) {
        self.pairs.push((pattern, image));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Drop every binding made after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.pairs.truncate(len);
    }

    pub fn pairs(&self) -> &[(NodeId, NodeId)] {
        &self.pairs
    }

    pub fn images(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pairs.iter().map(|(_, i)| *i)
    }

    /// Append every pair of `other` that is not already bound here.
    pub fn merge(&mut self, other: &Bindings) {
        for (p, i) in &other.pairs {
            if !self.is_bound(*p) {
                self.pairs.push((*p, *i));
            }
        }
    }

    /// Sorted pair list, used to compare the effect of two bindings.
    pub fn signature(&self) -> Vec<(NodeId, NodeId)> {
        let mut sig = self.pairs.clone();
        sig.sort();
        sig.dedup();
        sig
    }
}

// ---------------------------------------------------------------------------
// Substitution log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum SubstEntry {
    /// Argument `slot` of `head` used to point at `old`.
    Arg { head: NodeId, slot: usize, old: NodeId },
    /// Graphlet item `index` used to be `old`.
    Item { index: usize, old: NodeId },
}

/// Every rewrite applied to a key graphlet, so it can be reverted exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstLog {
    entries: Vec<SubstEntry>,
}

impl SubstLog {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nodes the rewrite replaced; they must outlive the log.
    pub fn originals(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|e| match e {
            SubstEntry::Arg { old, .. } | SubstEntry::Item { old, .. } => *old,
        })
    }

    /// Rewrite `key` in place, replacing every bound variable by its image.
    ///
    /// Arguments of every clause reachable from the key are visited once.
    /// On error the rewrites already made are undone before returning.
    pub fn apply(pool: &mut NodePool, key: &mut Graphlet, scope: &Bindings) -> GraphResult<Self> {
        let mut log = SubstLog::default();
        if scope.is_empty() {
            return Ok(log);
        }
        match log.rewrite(pool, key, scope) {
            Ok(()) => Ok(log),
            Err(e) => {
                if let Err(undo) = log.revert(pool, key) {
                    warn!(error = %undo, "partial key rewrite could not be undone");
                }
                Err(e)
            }
        }
    }

    fn rewrite(&mut self, pool: &mut NodePool, key: &mut Graphlet, scope: &Bindings) -> GraphResult<()> {
        let mut stack: Vec<NodeId> = key.items().to_vec();
        let mut seen: Vec<NodeId> = Vec::new();
        while let Some(head) = stack.pop() {
            if seen.contains(&head) {
                continue;
            }
            seen.push(head);
            let args = pool.node(head)?.args().to_vec();
            for (slot, (_, target)) in args.into_iter().enumerate() {
                if let Some(image) = scope.lookup(target) {
                    if image != head && image != target {
                        let old = pool.subst_arg(head, slot, image)?;
                        self.entries.push(SubstEntry::Arg { head, slot, old });
                    }
                } else if pool.node(target)?.band().is_none() {
                    stack.push(target);
                }
            }
        }
        for index in 0..key.len() {
            let item = key.items()[index];
            let Some(image) = scope.lookup(item) else {
                continue;
            };
            if image != item {
                if let Some(old) = key.replace(index, image) {
                    self.entries.push(SubstEntry::Item { index, old });
                }
            }
        }
        Ok(())
    }

    /// Undo every rewrite, newest first.
    pub fn revert(self, pool: &mut NodePool, key: &mut Graphlet) -> GraphResult<()> {
        for entry in self.entries.into_iter().rev() {
            match entry {
                SubstEntry::Arg { head, slot, old } => {
                    pool.subst_arg(head, slot, old)?;
                }
                SubstEntry::Item { index, old } => {
                    key.replace(index, old);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeName;

    #[test]
    fn lookup_and_truncate() {
        let mut b = Bindings::with_expect(2);
        let (p, q, i, j) = (
            NodeId::from_index(0),
            NodeId::from_index(1),
            NodeId::from_index(5),
            NodeId::from_index(6),
        );
        b.bind(p, i);
        let mark = b.len();
        b.bind(q, j);
        assert_eq!(b.lookup(q), Some(j));
        assert_eq!(b.pattern_for(i), Some(p));
        b.truncate(mark);
        assert_eq!(b.lookup(q), None);
        assert_eq!(b.lookup(p), Some(i));
    }

    #[test]
    fn substitution_round_trip() {
        let mut pool = NodePool::new(32, 4);
        let x = pool
            .create_named("", "", NodeName::Var("x".into()))
            .unwrap();
        let cup = pool.create("ako", "cup").unwrap();
        pool.add_arg(cup, "obj", x).unwrap();
        let mut key = Graphlet::from_items(vec![cup, x]);
        let before_key = key.clone();
        let before_args = pool.node(cup).unwrap().args().to_vec();

        let real = pool.create("", "").unwrap();
        let mut scope = Bindings::new();
        scope.bind(x, real);
        let log = SubstLog::apply(&mut pool, &mut key, &scope).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(pool.node(cup).unwrap().arg("obj"), Some(real));
        assert_eq!(key.items()[1], real);

        log.revert(&mut pool, &mut key).unwrap();
        assert_eq!(key, before_key);
        assert_eq!(pool.node(cup).unwrap().args(), before_args.as_slice());
    }

    #[test]
    fn failed_rewrite_leaves_key_untouched() {
        let mut pool = NodePool::new(32, 4);
        let x = pool.create_named("", "", NodeName::Var("x".into())).unwrap();
        let y = pool.create_named("", "", NodeName::Var("y".into())).unwrap();
        let put = pool.create("put", "").unwrap();
        pool.add_arg(put, "obj", x).unwrap();
        pool.add_arg(put, "ref", y).unwrap();
        let mut key = Graphlet::from_items(vec![put, x]);
        let before_key = key.clone();
        let before_args = pool.node(put).unwrap().args().to_vec();

        let cup = pool.create("", "").unwrap();
        let gone = pool.create("", "").unwrap();
        pool.remove(gone);
        let mut scope = Bindings::new();
        scope.bind(x, cup);
        scope.bind(y, gone);
        assert!(SubstLog::apply(&mut pool, &mut key, &scope).is_err());
        assert_eq!(key, before_key);
        assert_eq!(pool.node(put).unwrap().args(), before_args.as_slice());
        assert_eq!(pool.props_of(x, "obj"), vec![put]);
    }

    #[test]
    fn empty_scope_is_noop() {
        let mut pool = NodePool::new(8, 4);
        let a = pool.create("walk", "").unwrap();
        let mut key = Graphlet::single(a);
        let log = SubstLog::apply(&mut pool, &mut key, &Bindings::new()).unwrap();
        assert!(log.is_empty());
    }
}
