//! Depth-first pattern matcher.
//!
//! Finds groundings of a pattern graphlet in a target pool. Pattern and
//! target may be the same pool (input keys matched against working memory)
//! or different pools (library triggers and conditions).
//!
//! A pattern node is a *constant* when it denotes itself: in the same pool
//! that is any node that lives in a band; across pools it is a nicknamed
//! node, matched by nickname. Every other pattern node is a variable.

use crate::graph::{Band, Bindings, Graphlet, NodeId, NodePool, Tags};

/// How the `neg` flag of pattern clauses constrains candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegMode {
    /// `neg` must agree.
    #[default]
    Strict,
    /// `neg` is ignored.
    Indifferent,
    /// The main clause must have the opposite `neg`; others must agree.
    Anti,
}

/// Whether enumeration should go on after a complete binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Parameters of one match query.
#[derive(Debug, Clone)]
pub struct MatchOpts {
    /// Minimum belief of every image.
    pub threshold: f64,
    /// Highest band a candidate may live in.
    pub max_band: Band,
    pub neg: NegMode,
    /// Reject bindings whose newest image is not newer than this version.
    pub since: Option<u64>,
    /// Allow hidden and belief-0 nodes.
    pub reveal_hidden: bool,
    /// Restrict clause candidates to these nodes, ignoring bands and beliefs.
    pub within: Option<Vec<NodeId>>,
}

impl Default for MatchOpts {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            max_band: Band::Halo,
            neg: NegMode::Strict,
            since: None,
            reveal_hidden: false,
            within: None,
        }
    }
}

impl MatchOpts {
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn band(mut self, band: Band) -> Self {
        self.max_band = band;
        self
    }

    pub fn neg(mut self, neg: NegMode) -> Self {
        self.neg = neg;
        self
    }

    pub fn since(mut self, version: u64) -> Self {
        self.since = Some(version);
        self
    }

    pub fn reveal(mut self) -> Self {
        self.reveal_hidden = true;
        self
    }

    pub fn within(mut self, nodes: &[NodeId]) -> Self {
        self.within = Some(nodes.to_vec());
        self
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

struct Matcher<'a, F> {
    pat: &'a NodePool,
    target: &'a NodePool,
    same: bool,
    opts: &'a MatchOpts,
    items: Vec<NodeId>,
    main: Option<NodeId>,
    done: Vec<bool>,
    count: usize,
    limit: usize,
    callback: F,
}

/// Outcome of classifying a pattern node.
enum Term {
    Constant(NodeId),
    Missing,
    Variable,
}

impl<F: FnMut(&Bindings) -> Flow> Matcher<'_, F> {
    fn classify(&self, p: NodeId) -> Term {
        let Some(node) = self.pat.get(p) else {
            return Term::Missing;
        };
        if self.same {
            if node.band().is_some() {
                return Term::Constant(p);
            }
            return Term::Variable;
        }
        match node.nick() {
            Some(nick) => match self.target.by_nick(nick) {
                Some(id) => Term::Constant(id),
                None => Term::Missing,
            },
            None => Term::Variable,
        }
    }

    fn image(&self, p: NodeId, b: &Bindings) -> Option<NodeId> {
        if let Some(img) = b.lookup(p) {
            return Some(img);
        }
        match self.classify(p) {
            Term::Constant(id) => Some(id),
            _ => None,
        }
    }

    fn admissible(&self, c: NodeId) -> bool {
        let Some(cn) = self.target.get(c) else {
            return false;
        };
        if self.opts.within.is_some() {
            return true;
        }
        match cn.band() {
            Some(band) if band <= self.opts.max_band => {}
            _ => return false,
        }
        if !self.opts.reveal_hidden && (!cn.visible() || cn.belief() <= 0.0) {
            return false;
        }
        cn.belief() >= self.opts.threshold
    }

    fn node_ok(&self, p: NodeId, c: NodeId) -> bool {
        if self.same && p == c {
            return false;
        }
        let (Some(pn), Some(cn)) = (self.pat.get(p), self.target.get(c)) else {
            return false;
        };
        if !pn.kind().is_empty() && pn.kind() != cn.kind() {
            return false;
        }
        if !pn.lex().is_empty() && pn.lex() != cn.lex() {
            return false;
        }
        if !self.admissible(c) {
            return false;
        }
        if !pn.kind().is_empty() {
            let agree = pn.neg() == cn.neg();
            let ok = match self.opts.neg {
                NegMode::Strict => agree,
                NegMode::Indifferent => true,
                NegMode::Anti if Some(p) == self.main => !agree,
                NegMode::Anti => agree,
            };
            if !ok {
                return false;
            }
        }
        if pn.tags().restricts_referent() && !tags_ok(self.target, pn.tags(), c) {
            return false;
        }
        true
    }

    fn unify(&self, a: NodeId, ca: NodeId, b: &mut Bindings) -> bool {
        if let Some(img) = b.lookup(a) {
            return img == ca;
        }
        match self.classify(a) {
            Term::Constant(img) => img == ca,
            Term::Missing => false,
            Term::Variable => {
                if !self.node_ok(a, ca) {
                    return false;
                }
                b.bind(a, ca);
                true
            }
        }
    }

    fn unify_args(&self, p: NodeId, c: NodeId, b: &mut Bindings) -> bool {
        let (Some(pn), Some(cn)) = (self.pat.get(p), self.target.get(c)) else {
            return false;
        };
        for (role, a) in pn.args() {
            let Some(ca) = cn.arg(role) else {
                return false;
            };
            if !self.unify(*a, ca, b) {
                return false;
            }
        }
        true
    }

    /// Most-constrained unmatched item: already bound, then anchored through
    /// a known argument, then any clause, then lone variables.
    fn pick(&self, b: &Bindings) -> Option<usize> {
        let mut best: Option<(u8, usize)> = None;
        for (idx, p) in self.items.iter().enumerate() {
            if self.done[idx] {
                continue;
            }
            let Some(pn) = self.pat.get(*p) else {
                return Some(idx);
            };
            let score = if self.image(*p, b).is_some() {
                0
            } else if pn.args().iter().any(|(_, a)| self.image(*a, b).is_some()) {
                1
            } else if !pn.kind().is_empty() {
                2
            } else {
                3
            };
            if best.map_or(true, |(s, _)| score < s) {
                best = Some((score, idx));
            }
        }
        best.map(|(_, idx)| idx)
    }

    fn candidates(&self, p: NodeId, b: &Bindings) -> Vec<NodeId> {
        if let Some(within) = &self.opts.within {
            return within.clone();
        }
        let Some(pn) = self.pat.get(p) else {
            return Vec::new();
        };
        for (role, a) in pn.args() {
            if let Some(img) = self.image(*a, b) {
                return self.target.props_of(img, role);
            }
        }
        if pn.is_object() && pn.kind().is_empty() {
            return self
                .target
                .ids()
                .filter(|c| self.target.get(*c).is_some_and(|n| n.is_object()))
                .collect();
        }
        self.target
            .ids()
            .filter(|c| self.target.get(*c).is_some_and(|n| n.kind() == pn.kind()))
            .collect()
    }

    fn complete(&mut self, b: &Bindings) -> Flow {
        if let Some(since) = self.opts.since {
            let newest = self
                .items
                .iter()
                .filter_map(|p| b.lookup(*p).or_else(|| self.image(*p, b)))
                .filter_map(|c| self.target.get(c))
                .map(|n| n.generation())
                .max()
                .unwrap_or(0);
            if newest <= since {
                return Flow::Continue;
            }
        }
        self.count += 1;
        let flow = (self.callback)(b);
        if self.count >= self.limit {
            return Flow::Stop;
        }
        flow
    }

    fn search(&mut self, b: &mut Bindings) -> Flow {
        let Some(idx) = self.pick(b) else {
            return self.complete(b);
        };
        let p = self.items[idx];
        self.done[idx] = true;
        let mut flow = Flow::Continue;

        if let Some(img) = self.image(p, b) {
            let mark = b.len();
            let fixed = matches!(self.classify(p), Term::Constant(_));
            if (fixed || self.node_ok(p, img)) && self.unify_args(p, img, b) {
                flow = self.search(b);
            }
            b.truncate(mark);
            self.done[idx] = false;
            return flow;
        }

        for c in self.candidates(p, b) {
            let taken = b
                .pattern_for(c)
                .is_some_and(|other| other != p && self.items.contains(&other));
            if taken {
                continue;
            }
            if !self.node_ok(p, c) {
                continue;
            }
            let mark = b.len();
            b.bind(p, c);
            if self.unify_args(p, c, b) {
                flow = self.search(b);
            }
            b.truncate(mark);
            if flow == Flow::Stop {
                break;
            }
        }
        self.done[idx] = false;
        flow
    }
}

/// Gender and animacy test used for pronoun referents.
///
/// A referent qualifies for `female` unless it is tagged male, has
/// `(hq "male")` asserted, or has `(hq "female")` refuted; symmetrically
/// for `male`. `inanimate` excludes anything with a gender.
pub fn tags_ok(pool: &NodePool, tags: Tags, c: NodeId) -> bool {
    let Some(cn) = pool.get(c) else {
        return false;
    };
    let prop = |lex: &str, neg: bool| {
        pool.props_of(c, "obj").into_iter().any(|h| {
            pool.get(h).is_some_and(|n| {
                n.kind() == "hq" && n.lex() == lex && n.neg() == neg && n.band().is_some()
            })
        })
    };
    if tags.contains(Tags::FEMALE)
        && (cn.tags().contains(Tags::MALE) || prop("male", false) || prop("female", true))
    {
        return false;
    }
    if tags.contains(Tags::MALE)
        && (cn.tags().contains(Tags::FEMALE) || prop("female", false) || prop("male", true))
    {
        return false;
    }
    if tags.contains(Tags::INANIMATE)
        && (cn.tags().contains(Tags::FEMALE)
            || cn.tags().contains(Tags::MALE)
            || prop("female", false)
            || prop("male", false))
    {
        return false;
    }
    true
}

/// Enumerate groundings of `pattern` (nodes of `pat`) in `target`.
///
/// Pairs already in `bindings` are honoured. `callback` sees every complete
/// binding; enumeration stops after `limit` reports or when it returns
/// [`Flow::Stop`]. On return `bindings` is exactly as it was passed in.
/// Returns the number of complete bindings reported.
pub fn match_graph<F>(
    pat: &NodePool,
    pattern: &Graphlet,
    target: &NodePool,
    bindings: &mut Bindings,
    opts: &MatchOpts,
    limit: usize,
    callback: F,
) -> usize
where
    F: FnMut(&Bindings) -> Flow,
{
    if pattern.is_empty() || limit == 0 {
        return 0;
    }
    let mark = bindings.len();
    bindings.set_expect(pattern.len());
    let mut m = Matcher {
        pat,
        target,
        same: std::ptr::eq(pat, target),
        opts,
        items: pattern.items().to_vec(),
        main: pattern.main(),
        done: vec![false; pattern.len()],
        count: 0,
        limit,
        callback,
    };
    m.search(bindings);
    bindings.truncate(mark);
    m.count
}

/// First complete binding, if any.
pub fn first_match(
    pat: &NodePool,
    pattern: &Graphlet,
    target: &NodePool,
    seed: &Bindings,
    opts: &MatchOpts,
) -> Option<Bindings> {
    let mut found = None;
    let mut b = seed.clone();
    match_graph(pat, pattern, target, &mut b, opts, 1, |full| {
        found = Some(full.clone());
        Flow::Stop
    });
    found
}

/// Every complete binding, up to `limit`.
pub fn all_matches(
    pat: &NodePool,
    pattern: &Graphlet,
    target: &NodePool,
    seed: &Bindings,
    opts: &MatchOpts,
    limit: usize,
) -> Vec<Bindings> {
    let mut found = Vec::new();
    let mut b = seed.clone();
    match_graph(pat, pattern, target, &mut b, opts, limit, |full| {
        found.push(full.clone());
        Flow::Continue
    });
    found
}
