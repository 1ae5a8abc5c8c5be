//! Semantic graph: typed nodes with role-labeled edges, held in an arena.
//!
//! Nodes live in a [`NodePool`] and refer to one another by stable [`NodeId`]s,
//! so cyclic structures (key ↔ node ↔ argument) need no shared ownership.
//! Every mutation that could change a match outcome bumps the pool's version
//! counter and stamps the touched node's generation with the new version.
//!
//! - [`graphlet`]: ordered node sets designated as a unit (keys, conditions)
//! - [`bindings`]: pattern → image substitution maps and their undo logs
//! - [`text`]: the parenthesized clause language and its renderer

pub mod bindings;
pub mod graphlet;
pub mod text;

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::error::{GraphError, GraphResult};
use crate::library::RuleId;

pub use bindings::{Bindings, SubstLog};
pub use graphlet::Graphlet;

// ---------------------------------------------------------------------------
// Identifiers and small value types
// ---------------------------------------------------------------------------

/// Index of a node within its pool. The slot of a removed node is recycled
/// once every older free slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }

    /// Position in the owning pool's slot vector.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw numeric value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Grammatical tag bitmask carried by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tags(u16);

impl Tags {
    pub const NONE: Tags = Tags(0);
    pub const FEMALE: Tags = Tags(1 << 0);
    pub const MALE: Tags = Tags(1 << 1);
    pub const INANIMATE: Tags = Tags(1 << 2);
    pub const PLURAL: Tags = Tags(1 << 3);
    pub const COMPARATIVE: Tags = Tags(1 << 4);
    pub const SUPERLATIVE: Tags = Tags(1 << 5);

    const NAMES: [(Tags, &'static str); 6] = [
        (Tags::FEMALE, "female"),
        (Tags::MALE, "male"),
        (Tags::INANIMATE, "inanimate"),
        (Tags::PLURAL, "plural"),
        (Tags::COMPARATIVE, "comparative"),
        (Tags::SUPERLATIVE, "superlative"),
    ];

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Tags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Tags) -> Tags {
        Tags(self.0 | other.0)
    }

    /// Whether any gender or animacy restriction is present.
    pub fn restricts_referent(self) -> bool {
        self.0 & (Tags::FEMALE.0 | Tags::MALE.0 | Tags::INANIMATE.0) != 0
    }

    /// Parse a single tag name (`female`, `fem`, `male`, `masc`, ...).
    pub fn parse(name: &str) -> Option<Tags> {
        match name.to_ascii_lowercase().as_str() {
            "female" | "fem" | "feminine" => Some(Tags::FEMALE),
            "male" | "masc" | "masculine" => Some(Tags::MALE),
            "inanimate" | "thing" => Some(Tags::INANIMATE),
            "plural" | "pl" => Some(Tags::PLURAL),
            "comparative" | "comp" => Some(Tags::COMPARATIVE),
            "superlative" | "sup" => Some(Tags::SUPERLATIVE),
            _ => None,
        }
    }

    /// Canonical names of the tags that are set.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Tags::NAMES
            .into_iter()
            .filter(move |(t, _)| self.contains(*t))
            .map(|(_, n)| n)
    }
}

/// Working-memory band a node belongs to. Description nodes have no band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    /// Asserted facts.
    Main = 0,
    /// Rule-inferred facts, regenerated on demand.
    Halo = 1,
    /// Facts assumed by FIND/BIND.
    Hypo = 2,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Band::Main => "main",
            Band::Halo => "halo",
            Band::Hypo => "hypo",
        }
    }
}

/// How a node is referred to in text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeName {
    #[default]
    Anon,
    /// A pattern variable (`?x`).
    Var(String),
    /// A named constant (`self`, `user`, `X`).
    Nick(String),
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A semantic node: lexical form, tags, belief and ordered role-labeled arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub(crate) kind: String,
    pub(crate) lex: String,
    pub(crate) name: NodeName,
    pub(crate) tags: Tags,
    pub(crate) belief: f64,
    pub(crate) generation: u64,
    pub(crate) visible: bool,
    pub(crate) mention: u64,
    pub(crate) args: Vec<(String, NodeId)>,
    pub(crate) neg: bool,
    pub(crate) band: Option<Band>,
    pub(crate) rule: Option<RuleId>,
}

impl Node {
    fn new(kind: &str, lex: &str) -> Self {
        Self {
            kind: kind.to_string(),
            lex: lex.to_string(),
            name: NodeName::Anon,
            tags: Tags::NONE,
            belief: 1.0,
            generation: 0,
            visible: true,
            mention: 0,
            args: Vec::new(),
            neg: false,
            band: None,
            rule: None,
        }
    }

    /// Category word of the clause (`ako`, `hq`, `act`, `pick`, ...).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Lexical form, possibly empty.
    pub fn lex(&self) -> &str {
        &self.lex
    }

    pub fn name(&self) -> &NodeName {
        &self.name
    }

    pub fn tags(&self) -> Tags {
        self.tags
    }

    pub fn belief(&self) -> f64 {
        self.belief
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Tick at which the node was last mentioned in conversation (0 = never).
    pub fn mention(&self) -> u64 {
        self.mention
    }

    pub fn neg(&self) -> bool {
        self.neg
    }

    pub fn band(&self) -> Option<Band> {
        self.band
    }

    /// The rule that produced this node, for halo facts.
    pub fn rule(&self) -> Option<RuleId> {
        self.rule
    }

    /// Ordered role-labeled arguments.
    pub fn args(&self) -> &[(String, NodeId)] {
        &self.args
    }

    /// Filler of a role, if any.
    pub fn arg(&self, role: &str) -> Option<NodeId> {
        self.args.iter().find(|(r, _)| r == role).map(|(_, n)| *n)
    }

    /// Object-like nodes have no arguments; predicates have at least one.
    pub fn is_object(&self) -> bool {
        self.args.is_empty()
    }

    pub fn is_predicate(&self) -> bool {
        !self.args.is_empty()
    }

    pub fn nick(&self) -> Option<&str> {
        match &self.name {
            NodeName::Nick(n) => Some(n),
            _ => None,
        }
    }

    pub fn var(&self) -> Option<&str> {
        match &self.name {
            NodeName::Var(v) => Some(v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Node pool
// ---------------------------------------------------------------------------

/// Arena of nodes with a version counter and a reverse edge index.
#[derive(Debug, Clone)]
pub struct NodePool {
    slots: Vec<Option<Node>>,
    live: usize,
    capacity: usize,
    max_args: usize,
    version: u64,
    nicks: HashMap<String, NodeId>,
    users: HashMap<NodeId, Vec<NodeId>>,
    free: VecDeque<NodeId>,
}

impl Default for NodePool {
    fn default() -> Self {
        Self::with_config(&MemoryConfig::default())
    }
}

impl NodePool {
    /// Create an empty pool holding at most `capacity` live nodes.
    pub fn new(capacity: usize, max_args: usize) -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
            capacity,
            max_args,
            version: 0,
            nicks: HashMap::new(),
            users: HashMap::new(),
            free: VecDeque::new(),
        }
    }

    pub fn with_config(config: &MemoryConfig) -> Self {
        Self::new(config.capacity, config.max_args)
    }

    /// Current version; every node's generation is at most this value.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of allocated slots, live or free.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Create a node with the given category and lexical form.
    pub fn create(&mut self, kind: &str, lex: &str) -> GraphResult<NodeId> {
        if self.live >= self.capacity {
            return Err(GraphError::Overflow {
                what: "node pool",
                limit: self.capacity,
            });
        }
        let mut node = Node::new(kind, lex);
        self.version += 1;
        node.generation = self.version;
        let id = match self.free.pop_front() {
            Some(id) => {
                self.slots[id.index()] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                NodeId::from_index(self.slots.len() - 1)
            }
        };
        self.live += 1;
        Ok(id)
    }

    /// Create a node carrying a name (variable or nickname).
    pub fn create_named(&mut self, kind: &str, lex: &str, name: NodeName) -> GraphResult<NodeId> {
        let id = self.create(kind, lex)?;
        self.set_name(id, name)?;
        Ok(id)
    }

    /// Look up a live node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.index()).and_then(|s| s.as_ref())
    }

    /// Look up a live node, failing with `NodeNotFound`.
    pub fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.get(id)
            .ok_or(GraphError::NodeNotFound { node: id.raw() })
    }

    fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.slots
            .get_mut(id.index())
            .and_then(|s| s.as_mut())
            .ok_or(GraphError::NodeNotFound { node: id.raw() })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate over the ids of all live nodes in slot order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| NodeId::from_index(i))
    }

    /// Bump the version and stamp a node's generation with it.
    pub fn stamp(&mut self, id: NodeId) -> GraphResult<u64> {
        let version = self.version + 1;
        let node = self.node_mut(id)?;
        node.generation = version;
        self.version = version;
        Ok(version)
    }

    /// Find a node by nickname.
    pub fn by_nick(&self, nick: &str) -> Option<NodeId> {
        self.nicks.get(nick).copied()
    }

    /// Attach a name; nicknames are indexed for lookup.
    pub fn set_name(&mut self, id: NodeId, name: NodeName) -> GraphResult<()> {
        let old = std::mem::replace(&mut self.node_mut(id)?.name, name.clone());
        if let NodeName::Nick(n) = old {
            self.nicks.remove(&n);
        }
        if let NodeName::Nick(n) = name {
            self.nicks.insert(n, id);
        }
        Ok(())
    }

    pub fn set_neg(&mut self, id: NodeId, neg: bool) -> GraphResult<()> {
        self.node_mut(id)?.neg = neg;
        self.stamp(id)?;
        Ok(())
    }

    /// Assert a belief value, clamped to [0, 1].
    pub fn set_belief(&mut self, id: NodeId, belief: f64) -> GraphResult<()> {
        self.node_mut(id)?.belief = belief.clamp(0.0, 1.0);
        self.stamp(id)?;
        Ok(())
    }

    pub fn set_tags(&mut self, id: NodeId, tags: Tags) -> GraphResult<()> {
        self.node_mut(id)?.tags = tags;
        self.stamp(id)?;
        Ok(())
    }

    /// Make a node visible to matching.
    pub fn reveal(&mut self, id: NodeId) -> GraphResult<()> {
        self.node_mut(id)?.visible = true;
        self.stamp(id)?;
        Ok(())
    }

    pub fn hide(&mut self, id: NodeId) -> GraphResult<()> {
        self.node_mut(id)?.visible = false;
        self.stamp(id)?;
        Ok(())
    }

    pub(crate) fn set_band(&mut self, id: NodeId, band: Option<Band>) -> GraphResult<()> {
        self.node_mut(id)?.band = band;
        self.stamp(id)?;
        Ok(())
    }

    pub(crate) fn set_rule(&mut self, id: NodeId, rule: Option<RuleId>) -> GraphResult<()> {
        self.node_mut(id)?.rule = rule;
        Ok(())
    }

    /// Record a conversational mention (does not change match outcomes).
    pub fn mention(&mut self, id: NodeId, clock: u64) -> GraphResult<()> {
        self.node_mut(id)?.mention = clock;
        Ok(())
    }

    /// Append a role-labeled argument; insertion order is preserved.
    pub fn add_arg(&mut self, head: NodeId, role: &str, target: NodeId) -> GraphResult<()> {
        if head == target {
            return Err(GraphError::SelfLoop {
                node: head.raw(),
                role: role.to_string(),
            });
        }
        self.node(target)?;
        let max_args = self.max_args;
        let node = self.node_mut(head)?;
        if node.args.iter().any(|(r, _)| r == role) {
            return Err(GraphError::Contradiction {
                node: head.raw(),
                role: role.to_string(),
            });
        }
        if node.args.len() >= max_args {
            return Err(GraphError::Overflow {
                what: "node arguments",
                limit: max_args,
            });
        }
        node.args.push((role.to_string(), target));
        self.users.entry(target).or_default().push(head);
        self.stamp(head)?;
        Ok(())
    }

    /// Replace the filler of argument `slot`, returning the previous filler.
    pub fn subst_arg(&mut self, head: NodeId, slot: usize, target: NodeId) -> GraphResult<NodeId> {
        if head == target {
            let role = self
                .node(head)?
                .args
                .get(slot)
                .map(|(r, _)| r.clone())
                .unwrap_or_default();
            return Err(GraphError::SelfLoop {
                node: head.raw(),
                role,
            });
        }
        self.node(target)?;
        let node = self.node_mut(head)?;
        let Some(entry) = node.args.get_mut(slot) else {
            return Err(GraphError::NodeNotFound { node: head.raw() });
        };
        let old = std::mem::replace(&mut entry.1, target);
        if let Some(list) = self.users.get_mut(&old) {
            if let Some(pos) = list.iter().position(|h| *h == head) {
                list.swap_remove(pos);
            }
        }
        self.users.entry(target).or_default().push(head);
        self.stamp(head)?;
        Ok(old)
    }

    /// Nodes that use `subject` as the filler of `role` (reverse edges).
    pub fn props_of(&self, subject: NodeId, role: &str) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .users
            .get(&subject)
            .into_iter()
            .flatten()
            .copied()
            .filter(|h| {
                self.get(*h)
                    .is_some_and(|n| n.args.iter().any(|(r, t)| r == role && *t == subject))
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Every node that has `subject` as some argument.
    pub fn users_of(&self, subject: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .users
            .get(&subject)
            .into_iter()
            .flatten()
            .copied()
            .filter(|h| self.contains(*h))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Find a property of `subject` through `role` with the given category and lex.
    pub fn find_prop(&self, subject: NodeId, role: &str, kind: &str, lex: &str) -> Option<NodeId> {
        self.props_of(subject, role).into_iter().find(|p| {
            self.get(*p)
                .is_some_and(|n| n.kind == kind && n.lex == lex)
        })
    }

    /// Copy a node, optionally sharing its argument fillers.
    pub fn clone_node(&mut self, id: NodeId, share_args: bool) -> GraphResult<NodeId> {
        let src = self.node(id)?.clone();
        let copy = self.create(&src.kind, &src.lex)?;
        {
            let node = self.node_mut(copy)?;
            node.tags = src.tags;
            node.belief = src.belief;
            node.neg = src.neg;
            node.visible = src.visible;
            if let NodeName::Var(v) = &src.name {
                node.name = NodeName::Var(v.clone());
            }
        }
        if share_args {
            for (role, target) in &src.args {
                self.add_arg(copy, role, *target)?;
            }
        }
        Ok(copy)
    }

    /// Remove a node. Its slot joins the back of the free queue.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.slots.get_mut(id.index())?.take()?;
        self.live -= 1;
        if let NodeName::Nick(n) = &node.name {
            if self.nicks.get(n) == Some(&id) {
                self.nicks.remove(n);
            }
        }
        for (_, target) in &node.args {
            if let Some(list) = self.users.get_mut(target) {
                list.retain(|h| *h != id);
            }
        }
        self.users.remove(&id);
        self.free.push_back(id);
        Some(node)
    }

    /// Short human-readable name: nickname, `?var`, or `kind-id`.
    pub fn label(&self, id: NodeId) -> String {
        match self.get(id) {
            Some(n) => match &n.name {
                NodeName::Nick(s) => s.clone(),
                NodeName::Var(v) => format!("?{v}"),
                NodeName::Anon => {
                    let stem = if !n.kind.is_empty() {
                        n.kind.as_str()
                    } else if !n.lex.is_empty() {
                        n.lex.as_str()
                    } else {
                        "obj"
                    };
                    format!("{stem}-{}", id.raw())
                }
            },
            None => format!("{id}?"),
        }
    }
}
