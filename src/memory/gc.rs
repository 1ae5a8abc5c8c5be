//! Mark-and-sweep collection of working-memory nodes.
//!
//! Roots are main-band and halo facts, nicknamed constants, and the seed set
//! gathered from live directives (keys, scope bindings, guesses, hypothetical
//! facts, NRI records, running methods). Marking follows arguments; a marked
//! node also keeps alive the hypothetical facts that describe it.

use std::collections::HashSet;

use tracing::debug;

use super::WorkingMemory;
use crate::graph::{Band, NodeId};

impl WorkingMemory {
    /// Remove every node unreachable from the roots. Returns how many died.
    pub fn collect(&mut self, seeds: &HashSet<NodeId>) -> usize {
        let mut marked: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = Vec::new();

        for id in self.pool.ids() {
            let Some(node) = self.pool.get(id) else {
                continue;
            };
            let root = matches!(node.band(), Some(Band::Main) | Some(Band::Halo))
                || node.nick().is_some();
            if root {
                stack.push(id);
            }
        }
        stack.extend(seeds.iter().copied().filter(|id| self.pool.contains(*id)));

        while let Some(id) = stack.pop() {
            if !marked.insert(id) {
                continue;
            }
            let Some(node) = self.pool.get(id) else {
                continue;
            };
            for (_, target) in node.args() {
                if !marked.contains(target) {
                    stack.push(*target);
                }
            }
            for user in self.pool.users_of(id) {
                let hypo = self
                    .pool
                    .get(user)
                    .is_some_and(|n| n.band() == Some(Band::Hypo));
                if hypo && !marked.contains(&user) {
                    stack.push(user);
                }
            }
        }

        let dead: Vec<NodeId> = self.pool.ids().filter(|id| !marked.contains(id)).collect();
        for id in &dead {
            self.pool.remove(*id);
        }
        if !dead.is_empty() {
            debug!(
                freed = dead.len(),
                live = self.pool.len(),
                "working memory collected"
            );
        }
        dead.len()
    }
}
