//! Parenthesized clause language for graphlets.
//!
//! ```text
//! (hq "close" :obj X)                 property of the constant X
//! (ako "cup" :obj ?x) (hq "red" ?x)   two clauses sharing a variable
//! ?e=(pick :agt self :obj ?x)         a labeled clause, reusable as ?e
//! (?x :tag female)                    an object variable with a tag mask
//! (walk :neg 1 :blf 0.8)              negated clause with a belief
//! (act "grab" :neg 1 :obj #42)        a direct reference to live node 42
//! ```
//!
//! A positional term after the head (and optional quoted lex) fills the
//! `obj` role. Bare words are nicknames; `?name` is a variable. Every clause,
//! nested or not, becomes an item of the resulting graphlet in pre-order, so
//! the first top-level clause is the main item.

use std::collections::HashMap;

use super::{Band, Graphlet, NodeId, NodeName, NodePool, Tags};
use crate::error::{SchemaError, SchemaResult};

/// Variable names in scope for one definition or script.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    vars: HashMap<String, NodeId>,
    anon: usize,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.vars.get(name).copied()
    }

    pub fn insert(&mut self, name: &str, id: NodeId) {
        self.vars.insert(name.to_string(), id);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn fresh_name(&mut self) -> String {
        self.anon += 1;
        format!("_{}", self.anon)
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Role(String),
    Var(String),
    Label(String),
    Word(String),
}

fn tokenize(text: &str, line: usize) -> SchemaResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(SchemaError::new(line, "unterminated string")),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') if chars.get(i + 1).is_some() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let start = i;
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && !matches!(chars[i], '(' | ')' | '"')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(classify(&word, line)?);
            }
        }
    }
    Ok(tokens)
}

fn classify(word: &str, line: usize) -> SchemaResult<Token> {
    if let Some(role) = word.strip_prefix(':') {
        if role.is_empty() {
            return Err(SchemaError::new(line, "empty role name"));
        }
        return Ok(Token::Role(role.to_string()));
    }
    if let Some(var) = word.strip_prefix('?') {
        if let Some(label) = var.strip_suffix('=') {
            if label.is_empty() {
                return Err(SchemaError::new(line, "empty clause label"));
            }
            return Ok(Token::Label(label.to_string()));
        }
        return Ok(Token::Var(var.to_string()));
    }
    Ok(Token::Word(word.to_string()))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Builds graphlet nodes in a pool from clause text.
///
/// `const_band` is the band given to nickname constants created on the fly:
/// `Some(Band::Main)` when parsing input into working memory, `None` when
/// parsing library definitions.
pub struct GraphletParser<'a> {
    pool: &'a mut NodePool,
    vars: &'a mut VarTable,
    const_band: Option<Band>,
    line: usize,
    tokens: Vec<Token>,
    pos: usize,
    items: Vec<NodeId>,
}

impl<'a> GraphletParser<'a> {
    pub fn new(pool: &'a mut NodePool, vars: &'a mut VarTable, const_band: Option<Band>) -> Self {
        Self {
            pool,
            vars,
            const_band,
            line: 0,
            tokens: Vec::new(),
            pos: 0,
            items: Vec::new(),
        }
    }

    /// Line number reported in errors.
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    /// Parse one or more clauses into a graphlet.
    pub fn parse(mut self, text: &str) -> SchemaResult<Graphlet> {
        self.tokens = tokenize(text, self.line)?;
        self.pos = 0;
        self.items.clear();
        if self.tokens.is_empty() {
            return Err(SchemaError::new(self.line, "empty graphlet"));
        }
        while self.pos < self.tokens.len() {
            match self.next() {
                Some(Token::Open) => {
                    self.clause(None)?;
                }
                Some(Token::Label(label)) => {
                    self.expect_open()?;
                    self.clause(Some(label))?;
                }
                Some(other) => {
                    return Err(self.err(format!("expected a clause, found {other:?}")));
                }
                None => break,
            }
        }
        Ok(Graphlet::from_items(self.items))
    }

    fn err(&self, message: impl Into<String>) -> SchemaError {
        SchemaError::new(self.line, message)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect_open(&mut self) -> SchemaResult<()> {
        match self.next() {
            Some(Token::Open) => Ok(()),
            _ => Err(self.err("expected '(' after clause label")),
        }
    }


    fn variable(&mut self, name: &str) -> SchemaResult<NodeId> {
        let name = if name.is_empty() || name == "_" {
            self.vars.fresh_name()
        } else {
            name.to_string()
        };
        if let Some(id) = self.vars.get(&name) {
            return Ok(id);
        }
        let id = lift(self.line, self.pool.create_named("", "", NodeName::Var(name.clone())))?;
        self.vars.insert(&name, id);
        Ok(id)
    }

    fn constant(&mut self, nick: &str) -> SchemaResult<NodeId> {
        if let Some(id) = self.pool.by_nick(nick) {
            return Ok(id);
        }
        let id = lift(self.line, self.pool.create_named("", "", NodeName::Nick(nick.to_string())))?;
        if let Some(band) = self.const_band {
            lift(self.line, self.pool.set_band(id, Some(band)))?;
        }
        Ok(id)
    }

    /// `#n`: an existing node of the pool, named by its raw id.
    fn reference(&mut self, raw: &str) -> SchemaResult<NodeId> {
        let id = raw
            .parse::<u32>()
            .map(|n| NodeId::from_index(n as usize))
            .map_err(|_| self.err(format!("bad node reference \"#{raw}\"")))?;
        if !self.pool.contains(id) {
            return Err(self.err(format!("node #{raw} is not live")));
        }
        Ok(id)
    }

    /// Parse a clause body; the opening parenthesis is already consumed.
    fn clause(&mut self, label: Option<String>) -> SchemaResult<NodeId> {
        let head = match self.next() {
            Some(Token::Word(w)) => w,
            Some(Token::Var(v)) => {
                if label.is_some() {
                    return Err(self.err("a variable declaration cannot be labeled"));
                }
                return self.declaration(&v);
            }
            _ => return Err(self.err("clause must start with a head word")),
        };
        let lex = match self.peek() {
            Some(Token::Str(_)) => match self.next() {
                Some(Token::Str(s)) => s,
                _ => String::new(),
            },
            _ => String::new(),
        };
        let id = lift(self.line, self.pool.create(&head, &lex))?;
        if let Some(label) = label {
            if self.vars.get(&label).is_some() {
                return Err(self.err(format!("label ?{label} is already defined")));
            }
            lift(self.line, self.pool.set_name(id, NodeName::Var(label.clone())))?;
            self.vars.insert(&label, id);
        }
        self.items.push(id);

        let mut positional = false;
        loop {
            match self.next() {
                Some(Token::Close) => break,
                Some(Token::Role(role)) => match role.as_str() {
                    "neg" => {
                        let v = self.word()?;
                        lift(self.line, self.pool.set_neg(id, v != "0"))?;
                    }
                    "blf" => {
                        let v = self.word()?;
                        let b: f64 = v
                            .parse()
                            .map_err(|_| self.err(format!("bad belief value \"{v}\"")))?;
                        lift(self.line, self.pool.set_belief(id, b))?;
                    }
                    "tag" => self.tag(id)?,
                    _ => {
                        let target = self.term()?;
                        lift(self.line, self.pool.add_arg(id, &role, target))?;
                    }
                },
                Some(_) => {
                    if positional {
                        return Err(self.err("only one positional argument is allowed"));
                    }
                    positional = true;
                    self.pos -= 1;
                    let target = self.term()?;
                    lift(self.line, self.pool.add_arg(id, "obj", target))?;
                }
                None => return Err(self.err("unbalanced parentheses")),
            }
        }
        Ok(id)
    }

    /// `(?x :tag female)` declares an object variable as a graphlet item.
    fn declaration(&mut self, name: &str) -> SchemaResult<NodeId> {
        let id = self.variable(name)?;
        self.items.push(id);
        loop {
            match self.next() {
                Some(Token::Close) => return Ok(id),
                Some(Token::Role(role)) if role == "tag" => self.tag(id)?,
                Some(Token::Role(role)) if role == "blf" => {
                    let v = self.word()?;
                    let b: f64 = v
                        .parse()
                        .map_err(|_| self.err(format!("bad belief value \"{v}\"")))?;
                    lift(self.line, self.pool.set_belief(id, b))?;
                }
                Some(_) => return Err(self.err("a variable declaration only takes :tag and :blf")),
                None => return Err(self.err("unbalanced parentheses")),
            }
        }
    }

    fn tag(&mut self, id: NodeId) -> SchemaResult<()> {
        let name = self.word()?;
        let tag = Tags::parse(&name).ok_or_else(|| self.err(format!("unknown tag \"{name}\"")))?;
        let tags = lift(self.line, self.pool.node(id))?.tags().union(tag);
        lift(self.line, self.pool.set_tags(id, tags))
    }

    fn word(&mut self) -> SchemaResult<String> {
        match self.next() {
            Some(Token::Word(w)) | Some(Token::Str(w)) => Ok(w),
            _ => Err(self.err("expected a value")),
        }
    }

    fn term(&mut self) -> SchemaResult<NodeId> {
        match self.next() {
            Some(Token::Var(v)) => self.variable(&v),
            Some(Token::Word(w)) => match w.strip_prefix('#') {
                Some(raw) => self.reference(raw),
                None => self.constant(&w),
            },
            Some(Token::Open) => self.clause(None),
            Some(Token::Label(label)) => {
                self.expect_open()?;
                self.clause(Some(label))
            }
            Some(Token::Str(s)) => Err(self.err(format!("string \"{s}\" is not a valid argument"))),
            _ => Err(self.err("expected an argument term")),
        }
    }
}

fn lift<T>(line: usize, r: crate::error::GraphResult<T>) -> SchemaResult<T> {
    r.map_err(|e| SchemaError::new(line, e.to_string()))
}

/// Term text that [`GraphletParser`] resolves back to `id` itself.
pub fn node_ref(id: NodeId) -> String {
    format!("#{}", id.raw())
}

/// Parse `text` into `pool` with a fresh variable table.
pub fn parse_graphlet(
    pool: &mut NodePool,
    const_band: Option<Band>,
    text: &str,
) -> SchemaResult<Graphlet> {
    let mut vars = VarTable::new();
    GraphletParser::new(pool, &mut vars, const_band).parse(text)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

struct Renderer<'a> {
    pool: &'a NodePool,
    items: &'a [NodeId],
    canonical: bool,
    names: HashMap<NodeId, String>,
    done: Vec<NodeId>,
}

impl Renderer<'_> {
    fn var_name(&mut self, id: NodeId, given: &str) -> String {
        if !self.canonical {
            return given.to_string();
        }
        let next = self.names.len();
        self.names
            .entry(id)
            .or_insert_with(|| format!("v{next}"))
            .clone()
    }

    fn clause(&mut self, id: NodeId, out: &mut String) {
        let Some(node) = self.pool.get(id) else {
            out.push_str("(?)");
            return;
        };
        self.done.push(id);
        if node.is_object() && node.var().is_some() && node.kind().is_empty() {
            let name = self.var_name(id, node.var().unwrap_or_default());
            out.push_str(&format!("(?{name}"));
            for t in node.tags().names() {
                out.push_str(&format!(" :tag {t}"));
            }
            out.push(')');
            return;
        }
        if let Some(v) = node.var() {
            let name = self.var_name(id, v);
            out.push_str(&format!("?{name}="));
        }
        out.push('(');
        out.push_str(node.kind());
        if !node.lex().is_empty() {
            out.push_str(&format!(" \"{}\"", node.lex().replace('"', "\\\"")));
        }
        for (role, target) in node.args() {
            out.push_str(&format!(" :{role} "));
            self.term(*target, out);
        }
        if node.neg() {
            out.push_str(" :neg 1");
        }
        if node.belief() < 1.0 {
            out.push_str(&format!(" :blf {}", trim_float(node.belief())));
        }
        for t in node.tags().names() {
            out.push_str(&format!(" :tag {t}"));
        }
        out.push(')');
    }

    fn term(&mut self, id: NodeId, out: &mut String) {
        let Some(node) = self.pool.get(id) else {
            out.push_str(&format!("{id}?"));
            return;
        };
        let nested = node.is_predicate() || self.items.contains(&id) && !node.kind().is_empty();
        if nested && !self.done.contains(&id) {
            self.clause(id, out);
            return;
        }
        match node.name() {
            NodeName::Var(v) => {
                let name = self.var_name(id, v);
                out.push_str(&format!("?{name}"));
            }
            NodeName::Nick(n) => out.push_str(n),
            NodeName::Anon => out.push_str(&self.pool.label(id)),
        }
    }
}

fn trim_float(v: f64) -> String {
    let s = format!("{v:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

fn roots(pool: &NodePool, graphlet: &Graphlet) -> Vec<NodeId> {
    graphlet
        .iter()
        .filter(|id| {
            !graphlet.iter().any(|other| {
                other != *id
                    && pool
                        .get(other)
                        .is_some_and(|n| n.args().iter().any(|(_, t)| t == id))
            })
        })
        .collect()
}

fn render_with(pool: &NodePool, graphlet: &Graphlet, canonical: bool) -> String {
    let mut r = Renderer {
        pool,
        items: graphlet.items(),
        canonical,
        names: HashMap::new(),
        done: Vec::new(),
    };
    let mut out = String::new();
    for id in roots(pool, graphlet) {
        if r.done.contains(&id) {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        r.clause(id, &mut out);
    }
    out
}

/// Render a graphlet back to clause text.
pub fn render(pool: &NodePool, graphlet: &Graphlet) -> String {
    render_with(pool, graphlet, false)
}

/// Render with variables renamed `?v0`, `?v1`, ... by first appearance.
///
/// Two graphlets that differ only in variable names render identically.
pub fn canonical(pool: &NodePool, graphlet: &Graphlet) -> String {
    render_with(pool, graphlet, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clause_with_constant() {
        let mut pool = NodePool::new(64, 8);
        let g = parse_graphlet(&mut pool, Some(Band::Main), r#"(hq "close" :obj X)"#).unwrap();
        assert_eq!(g.len(), 1);
        let main = pool.node(g.main().unwrap()).unwrap();
        assert_eq!(main.kind(), "hq");
        assert_eq!(main.lex(), "close");
        let x = main.arg("obj").unwrap();
        assert_eq!(pool.by_nick("X"), Some(x));
        assert_eq!(pool.node(x).unwrap().band(), Some(Band::Main));
        assert_eq!(main.band(), None);
    }

    #[test]
    fn shared_variables_and_positional_obj() {
        let mut pool = NodePool::new(64, 8);
        let g = parse_graphlet(&mut pool, None, r#"(ako "cup" :obj ?x) (hq "red" ?x)"#).unwrap();
        let a = pool.node(g.items()[0]).unwrap().arg("obj");
        let b = pool.node(g.items()[1]).unwrap().arg("obj");
        assert_eq!(a, b);
        assert_eq!(pool.node(a.unwrap()).unwrap().var(), Some("x"));
    }

    #[test]
    fn declaration_sets_tags() {
        let mut pool = NodePool::new(64, 8);
        let g = parse_graphlet(&mut pool, None, "(?x :tag female)").unwrap();
        let x = pool.node(g.main().unwrap()).unwrap();
        assert!(x.tags().contains(Tags::FEMALE));
        assert!(x.is_object());
    }

    #[test]
    fn neg_belief_and_label() {
        let mut pool = NodePool::new(64, 8);
        let g = parse_graphlet(
            &mut pool,
            None,
            r#"?e=(pick :agt self :obj ?x :neg 1 :blf 0.5) (want :agt user :obj ?e)"#,
        )
        .unwrap();
        let pick = pool.node(g.items()[0]).unwrap();
        assert!(pick.neg());
        assert_eq!(pick.belief(), 0.5);
        let want = pool.node(g.items()[1]).unwrap();
        assert_eq!(want.arg("obj"), Some(g.items()[0]));
    }

    #[test]
    fn nested_clause_is_an_item() {
        let mut pool = NodePool::new(64, 8);
        let g = parse_graphlet(&mut pool, None, "(want :agt user :obj (pick :obj ?x))").unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(pool.node(g.items()[1]).unwrap().kind(), "pick");
    }

    #[test]
    fn node_reference_resolves_to_live_node() {
        let mut pool = NodePool::new(64, 8);
        let cup = pool.create("", "").unwrap();
        let text = format!("(drop :obj {})", node_ref(cup));
        let g = parse_graphlet(&mut pool, Some(Band::Main), &text).unwrap();
        assert_eq!(pool.node(g.main().unwrap()).unwrap().arg("obj"), Some(cup));
        assert_eq!(pool.by_nick("#0"), None);

        assert!(parse_graphlet(&mut pool, None, "(drop :obj #99)").is_err());
        assert!(parse_graphlet(&mut pool, None, "(drop :obj #x)").is_err());
    }

    #[test]
    fn errors_carry_line() {
        let mut pool = NodePool::new(64, 8);
        let mut vars = VarTable::new();
        let err = GraphletParser::new(&mut pool, &mut vars, None)
            .at_line(7)
            .parse("(hq \"red\" :obj ?x")
            .unwrap_err();
        assert_eq!(err.line, 7);
        assert!(parse_graphlet(&mut pool, None, "(hq :tag purple)").is_err());
        assert!(parse_graphlet(&mut pool, None, "(hq :obj ?x :obj ?y)").is_err());
        assert!(parse_graphlet(&mut pool, None, "").is_err());
    }

    #[test]
    fn render_round_trip() {
        let mut pool = NodePool::new(64, 8);
        let text = r#"(ako "cup" :obj ?x) (hq "red" :obj ?x :neg 1)"#;
        let g = parse_graphlet(&mut pool, None, text).unwrap();
        assert_eq!(render(&pool, &g), text);
        let nested = "(want :agt user :obj (pick :obj ?y))";
        let g = parse_graphlet(&mut pool, None, nested).unwrap();
        assert_eq!(render(&pool, &g), nested);
    }

    #[test]
    fn canonical_ignores_var_names() {
        let mut pool = NodePool::new(64, 8);
        let a = parse_graphlet(&mut pool, None, r#"(on :obj ?a :ref ?b)"#).unwrap();
        let b = parse_graphlet(&mut pool, None, r#"(on :obj ?p :ref ?q)"#).unwrap();
        let c = parse_graphlet(&mut pool, None, r#"(on :obj ?q :ref ?q)"#).unwrap();
        assert_eq!(canonical(&pool, &a), canonical(&pool, &b));
        assert_ne!(canonical(&pool, &a), canonical(&pool, &c));
    }
}
