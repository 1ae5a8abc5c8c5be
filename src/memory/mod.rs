//! Working memory: the node pool of asserted, inferred and assumed facts.
//!
//! Facts live in one of three bands. Main-band facts are asserted by NOTEs
//! and inputs; halo facts are regenerated from library rules whenever the
//! main band changes; hypothetical facts are assumed by FIND/BIND and live
//! only while a directive refers to them. Description nodes (directive keys,
//! method steps) share the pool but carry no band and are never matched as
//! facts.
//!
//! - [`matcher`]: depth-first graphlet matching
//! - [`halo`]: rule percolation and surprise measurement
//! - [`gc`]: mark-and-sweep over directive seed sets

pub mod gc;
pub mod halo;
pub mod matcher;

use crate::config::MemoryConfig;
use crate::error::{GraphError, GraphResult};
use crate::graph::{Band, Bindings, Graphlet, NodeId, NodeName, NodePool, Tags};
use crate::library::{Library, RuleId};

pub use matcher::{Flow, MatchOpts, NegMode};

/// Nickname of the agent's own node.
pub const SELF_NICK: &str = "self";
/// Nickname of the conversation partner's node.
pub const USER_NICK: &str = "user";

/// The shared fact store of one interpreter instance.
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    pool: NodePool,
    config: MemoryConfig,
    band_cap: Option<Band>,
    halo_stale: bool,
    self_node: NodeId,
    user_node: NodeId,
}

/// One pattern node's fate during [`WorkingMemory::assert`].
#[derive(Debug, Clone)]
enum Plan {
    Image(NodeId),
    Nick(String),
    Object { tags: Tags },
    Clause {
        kind: String,
        lex: String,
        neg: bool,
        belief: f64,
        args: Vec<(String, usize)>,
    },
}

impl WorkingMemory {
    pub fn new(config: &MemoryConfig) -> GraphResult<Self> {
        let mut pool = NodePool::with_config(config);
        let self_node = pool.create_named("", "", NodeName::Nick(SELF_NICK.into()))?;
        pool.set_band(self_node, Some(Band::Main))?;
        let user_node = pool.create_named("", "", NodeName::Nick(USER_NICK.into()))?;
        pool.set_band(user_node, Some(Band::Main))?;
        Ok(Self {
            pool,
            config: config.clone(),
            band_cap: None,
            halo_stale: true,
            self_node,
            user_node,
        })
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    /// Mutable pool access for description nodes. Fact changes should go
    /// through the assertion methods so the halo is invalidated.
    pub fn pool_mut(&mut self) -> &mut NodePool {
        &mut self.pool
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        self.pool.version()
    }

    pub fn self_node(&self) -> NodeId {
        self.self_node
    }

    pub fn user_node(&self) -> NodeId {
        self.user_node
    }

    // -----------------------------------------------------------------------
    // Assertion
    // -----------------------------------------------------------------------

    /// Create a main-band node.
    pub fn add_node(&mut self, kind: &str, lex: &str) -> GraphResult<NodeId> {
        let id = self.pool.create(kind, lex)?;
        self.pool.set_band(id, Some(Band::Main))?;
        self.pool.reveal(id)?;
        self.halo_stale = true;
        Ok(id)
    }

    /// Assert a one-place property of `subject`, reusing an existing one.
    pub fn add_prop(
        &mut self,
        subject: NodeId,
        role: &str,
        kind: &str,
        lex: &str,
        neg: bool,
        blf: f64,
    ) -> GraphResult<NodeId> {
        let existing = self
            .pool
            .props_of(subject, role)
            .into_iter()
            .find(|p| {
                self.pool.get(*p).is_some_and(|n| {
                    n.kind() == kind && n.lex() == lex && n.args().len() == 1 && n.band().is_some()
                })
            });
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.pool.create(kind, lex)?;
                self.pool.add_arg(id, role, subject)?;
                id
            }
        };
        self.pool.set_band(id, Some(Band::Main))?;
        self.pool.set_neg(id, neg)?;
        self.pool.set_belief(id, blf)?;
        self.pool.reveal(id)?;
        self.halo_stale = true;
        Ok(id)
    }

    /// Realize `graphlet` as facts in `band`.
    ///
    /// Pattern nodes come from `src` (`None` for this pool). Bound pattern
    /// nodes map to their images; unbound variables become fresh objects and
    /// their images are added to `bindings`. A clause whose proposition already
    /// exists updates that fact in place. Returns the number of new nodes.
    pub fn assert(
        &mut self,
        src: Option<&NodePool>,
        graphlet: &Graphlet,
        bindings: &mut Bindings,
        blf: f64,
        band: Band,
    ) -> GraphResult<usize> {
        self.assert_tagged(src, graphlet, bindings, blf, band, None)
    }

    pub(crate) fn assert_tagged(
        &mut self,
        src: Option<&NodePool>,
        graphlet: &Graphlet,
        bindings: &mut Bindings,
        blf: f64,
        band: Band,
        rule: Option<RuleId>,
    ) -> GraphResult<usize> {
        let (order, plans) = {
            let pat = src.unwrap_or(&self.pool);
            self.plan_assert(pat, src.is_none(), graphlet, bindings, blf)?
        };

        let mut images: Vec<NodeId> = Vec::with_capacity(plans.len());
        let mut created = 0;
        for (p, plan) in order.iter().zip(plans) {
            let image = match plan {
                Plan::Image(id) => id,
                Plan::Nick(nick) => {
                    created += 1;
                    let id = self.pool.create_named("", "", NodeName::Nick(nick))?;
                    self.pool.set_band(id, Some(Band::Main))?;
                    bindings.bind(*p, id);
                    id
                }
                Plan::Object { tags } => {
                    created += 1;
                    let id = self.pool.create("", "")?;
                    self.pool.set_tags(id, tags)?;
                    self.pool.set_band(id, Some(band))?;
                    bindings.bind(*p, id);
                    id
                }
                Plan::Clause {
                    kind,
                    lex,
                    neg,
                    belief,
                    args,
                } => {
                    let args: Vec<(String, NodeId)> =
                        args.into_iter().map(|(r, i)| (r, images[i])).collect();
                    let id = match self.existing_fact(&kind, &lex, &args, band) {
                        Some(id) => {
                            let current = self.pool.node(id)?.band();
                            let keep = matches!(current, Some(b) if b < band);
                            if !keep {
                                self.pool.set_band(id, Some(band))?;
                                self.pool.set_belief(id, belief)?;
                                self.pool.set_rule(id, rule)?;
                            }
                            if !keep || band == Band::Main {
                                self.pool.set_neg(id, neg)?;
                            }
                            self.pool.reveal(id)?;
                            id
                        }
                        None => {
                            created += 1;
                            let id = self.pool.create(&kind, &lex)?;
                            for (role, target) in &args {
                                self.pool.add_arg(id, role, *target)?;
                            }
                            self.pool.set_neg(id, neg)?;
                            self.pool.set_belief(id, belief)?;
                            self.pool.set_band(id, Some(band))?;
                            self.pool.set_rule(id, rule)?;
                            id
                        }
                    };
                    if !bindings.is_bound(*p) {
                        bindings.bind(*p, id);
                    }
                    id
                }
            };
            images.push(image);
        }
        if band == Band::Main {
            self.halo_stale = true;
        }
        Ok(created)
    }

    /// Read-only first phase of assertion: decide every pattern node's image,
    /// arguments before the clauses that use them.
    fn plan_assert(
        &self,
        pat: &NodePool,
        own: bool,
        graphlet: &Graphlet,
        bindings: &Bindings,
        blf: f64,
    ) -> GraphResult<(Vec<NodeId>, Vec<Plan>)> {
        let mut order: Vec<NodeId> = Vec::new();
        let mut plans: Vec<Plan> = Vec::new();
        let mut stack: Vec<(NodeId, bool)> = graphlet.iter().rev().map(|id| (id, false)).collect();
        while let Some((p, expanded)) = stack.pop() {
            if order.contains(&p) {
                continue;
            }
            let node = pat.node(p)?;
            if !expanded {
                let resolved = bindings.lookup(p).is_some()
                    || (own && node.band().is_some())
                    || (!own && node.nick().is_some());
                if !resolved && node.is_predicate() {
                    stack.push((p, true));
                    for (_, a) in node.args().iter().rev() {
                        if !order.contains(a) {
                            stack.push((*a, false));
                        }
                    }
                    continue;
                }
            }
            let plan = if let Some(img) = bindings.lookup(p) {
                Plan::Image(img)
            } else if own && node.band().is_some() {
                Plan::Image(p)
            } else if let (false, Some(nick)) = (own, node.nick()) {
                match self.pool.by_nick(nick) {
                    Some(id) => Plan::Image(id),
                    None => Plan::Nick(nick.to_string()),
                }
            } else if node.is_object() && node.kind().is_empty() {
                Plan::Object { tags: node.tags() }
            } else {
                let args = node
                    .args()
                    .iter()
                    .map(|(r, a)| {
                        order
                            .iter()
                            .position(|o| o == a)
                            .map(|i| (r.clone(), i))
                            .ok_or(GraphError::NodeNotFound { node: a.raw() })
                    })
                    .collect::<GraphResult<Vec<_>>>()?;
                Plan::Clause {
                    kind: node.kind().to_string(),
                    lex: node.lex().to_string(),
                    neg: node.neg(),
                    belief: (blf * node.belief()).clamp(0.0, 1.0),
                    args,
                }
            };
            order.push(p);
            plans.push(plan);
        }
        check_contradictions(&order, &plans)?;
        Ok((order, plans))
    }

    /// A fact (or demoted halo fact) stating the same proposition.
    fn existing_fact(
        &self,
        kind: &str,
        lex: &str,
        args: &[(String, NodeId)],
        band: Band,
    ) -> Option<NodeId> {
        let candidates: Vec<NodeId> = match args.first() {
            Some((role, target)) => self.pool.props_of(*target, role),
            None => self.pool.ids().collect(),
        };
        candidates.into_iter().find(|c| {
            self.pool.get(*c).is_some_and(|n| {
                let live = n.band().is_some()
                    || (band == Band::Halo && n.rule().is_some());
                live && n.kind() == kind
                    && n.lex() == lex
                    && n.args().len() == args.len()
                    && args.iter().all(|(r, t)| n.arg(r) == Some(*t))
            })
        })
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    /// Restrict the next match to bands up to `band`.
    pub fn set_max_band(&mut self, band: Band) {
        self.band_cap = Some(band);
    }

    /// Enumerate groundings of `pattern` after bringing the halo up to date.
    ///
    /// `src` is the pattern's pool (`None` for this pool).
    #[allow(clippy::too_many_arguments)]
    pub fn match_graph<F>(
        &mut self,
        lib: &Library,
        src: Option<&NodePool>,
        pattern: &Graphlet,
        bindings: &mut Bindings,
        opts: &MatchOpts,
        limit: usize,
        callback: F,
    ) -> GraphResult<usize>
    where
        F: FnMut(&Bindings) -> Flow,
    {
        self.ensure_halo(lib)?;
        let mut opts = opts.clone();
        if let Some(cap) = self.band_cap.take() {
            opts.max_band = opts.max_band.min(cap);
        }
        let pat = src.unwrap_or(&self.pool);
        Ok(matcher::match_graph(
            pat, pattern, &self.pool, bindings, &opts, limit, callback,
        ))
    }

    /// Every grounding of a pattern in this pool, up to `limit`.
    pub fn find_all(
        &mut self,
        lib: &Library,
        pattern: &Graphlet,
        seed: &Bindings,
        opts: &MatchOpts,
        limit: usize,
    ) -> GraphResult<Vec<Bindings>> {
        let mut found = Vec::new();
        let mut b = seed.clone();
        self.match_graph(lib, None, pattern, &mut b, opts, limit, |full| {
            found.push(full.clone());
            Flow::Continue
        })?;
        Ok(found)
    }

    /// First grounding of a pattern in this pool.
    pub fn find_first(
        &mut self,
        lib: &Library,
        pattern: &Graphlet,
        seed: &Bindings,
        opts: &MatchOpts,
    ) -> GraphResult<Option<Bindings>> {
        Ok(self.find_all(lib, pattern, seed, opts, 1)?.into_iter().next())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Re-stamp nodes so "newer than T" queries pick them up again.
    pub fn refresh(&mut self, nodes: &[NodeId]) -> GraphResult<()> {
        for id in nodes {
            self.pool.stamp(*id)?;
        }
        Ok(())
    }

    /// Check that every image in `bindings` is a main-band fact; with
    /// `promote`, move halo and hypothetical images into the main band.
    pub fn main_mem_only(&mut self, bindings: &Bindings, promote: bool) -> GraphResult<bool> {
        let mut all_main = true;
        for image in bindings.images().collect::<Vec<_>>() {
            let band = self.pool.node(image)?.band();
            match band {
                Some(Band::Main) | None => {}
                Some(_) if promote => {
                    self.pool.set_band(image, Some(Band::Main))?;
                    self.pool.set_rule(image, None)?;
                    self.pool.reveal(image)?;
                    self.halo_stale = true;
                }
                Some(_) => all_main = false,
            }
        }
        Ok(all_main)
    }

    /// True when every item is already a visible main-band fact.
    pub fn endorse(&self, graphlet: &Graphlet) -> bool {
        !graphlet.is_empty()
            && graphlet.iter().all(|id| {
                self.pool
                    .get(id)
                    .is_some_and(|n| n.band() == Some(Band::Main) && n.visible())
            })
    }

    pub fn reveal(&mut self, id: NodeId) -> GraphResult<()> {
        self.pool.reveal(id)
    }

    /// Record a conversational mention at `clock`.
    pub fn mention(&mut self, id: NodeId, clock: u64) -> GraphResult<()> {
        self.pool.mention(id, clock)
    }

    /// Main, halo and hypothetical facts, one clause per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for id in self.pool.ids() {
            let Some(node) = self.pool.get(id) else {
                continue;
            };
            let Some(band) = node.band() else {
                continue;
            };
            if node.is_object() {
                continue;
            }
            let text = crate::graph::text::render(&self.pool, &Graphlet::single(id));
            out.push_str(&format!("{:<5} {text}\n", band.label()));
        }
        out
    }
}

fn check_contradictions(order: &[NodeId], plans: &[Plan]) -> GraphResult<()> {
    for (i, a) in plans.iter().enumerate() {
        let Plan::Clause {
            kind,
            lex,
            neg,
            args,
            ..
        } = a
        else {
            continue;
        };
        for b in &plans[i + 1..] {
            if let Plan::Clause {
                kind: k2,
                lex: l2,
                neg: n2,
                args: a2,
                ..
            } = b
            {
                if kind == k2 && lex == l2 && args == a2 && neg != n2 {
                    return Err(GraphError::Contradiction {
                        node: order[i].raw(),
                        role: args.first().map(|(r, _)| r.clone()).unwrap_or_default(),
                    });
                }
            }
        }
    }
    Ok(())
}
