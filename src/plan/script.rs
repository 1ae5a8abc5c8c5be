//! Chain templates and their line-oriented text form.
//!
//! One step per line:
//!
//! ```text
//! @top  EACH (ako "cup" :obj ?x)
//!       DO (wash :obj ?x) -> @top
//!       CHK (hq "clean" :obj ?x) | @fail
//!       ADD RULE (ako "cup" :obj ?y) => (hq "clean" :obj ?y)
//!       ADD OP:DO (tidy :obj ?z) => GND (sweep :obj ?z)
//! ```
//!
//! `-> target` overrides the success link (default: next line, or `@done`
//! after the last line); `| target` sets the alternate link (default:
//! `@done`). Targets are `@label`, `@done` or `@fail`. A failing step only
//! follows its alternate link when one was written explicitly.

use std::collections::HashMap;

use super::DirKind;
use crate::error::{SchemaError, SchemaResult};
use crate::graph::text::{GraphletParser, VarTable, canonical, render};
use crate::graph::{Band, Graphlet, NodePool};

/// Where a chain goes after a step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Step(usize),
    Done,
    Fail,
}

/// Learning payload carried by an ADD step.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Rule {
        pattern: Graphlet,
        result: Graphlet,
    },
    Op {
        kind: DirKind,
        trigger: Graphlet,
        method_kind: DirKind,
        method_key: Graphlet,
    },
}

impl Payload {
    fn graphlets(&self) -> [&Graphlet; 2] {
        match self {
            Payload::Rule { pattern, result } => [pattern, result],
            Payload::Op {
                trigger,
                method_key,
                ..
            } => [trigger, method_key],
        }
    }
}

/// One step of a chain template.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub label: Option<String>,
    pub kind: DirKind,
    pub key: Graphlet,
    pub cont: Link,
    pub alt: Link,
    /// Whether `alt` was written out, which also routes failures through it.
    pub alt_explicit: bool,
    pub payload: Option<Payload>,
}

impl StepSpec {
    pub fn new(kind: DirKind, key: Graphlet) -> Self {
        Self {
            label: None,
            kind,
            key,
            cont: Link::Done,
            alt: Link::Done,
            alt_explicit: false,
            payload: None,
        }
    }
}

/// A chain template: steps with success and alternate links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainSpec {
    pub steps: Vec<StepSpec>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split `text` at the first top-level occurrence of `sep`.
fn split_top<'t>(text: &'t str, sep: &str) -> Option<(&'t str, &'t str)> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => quoted = !quoted,
            b'\\' if quoted => i += 1,
            b'(' if !quoted => depth += 1,
            b')' if !quoted => depth -= 1,
            _ if !quoted && depth == 0 && text.is_char_boundary(i) && text[i..].starts_with(sep) => {
                return Some((&text[..i], &text[i + sep.len()..]));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn split_links(text: &str) -> (&str, Option<&str>, Option<&str>) {
    let (head, alt) = match split_top(text, "|") {
        Some((h, a)) => (h, Some(a.trim())),
        None => (text, None),
    };
    let (body, cont) = match split_top(head, "->") {
        Some((b, c)) => (b, Some(c.trim())),
        None => (head, None),
    };
    (body.trim(), cont, alt)
}

fn take_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim_start()),
        None => (text, ""),
    }
}

struct StepParser<'a, 'p> {
    pool: &'p mut NodePool,
    vars: &'a mut VarTable,
    const_band: Option<Band>,
}

impl StepParser<'_, '_> {
    fn graphlet(&mut self, line: usize, text: &str) -> SchemaResult<Graphlet> {
        GraphletParser::new(self.pool, self.vars, self.const_band)
            .at_line(line)
            .parse(text)
    }

    fn payload(&mut self, line: usize, text: &str) -> SchemaResult<(Graphlet, Payload)> {
        let (what, rest) = take_word(text);
        let Some((lhs, rhs)) = split_top(rest, "=>") else {
            return Err(SchemaError::new(line, "ADD needs `<graphlet> => <graphlet>`"));
        };
        if what.eq_ignore_ascii_case("RULE") {
            let pattern = self.graphlet(line, lhs)?;
            let result = self.graphlet(line, rhs)?;
            return Ok((
                pattern.clone(),
                Payload::Rule { pattern, result },
            ));
        }
        let kind_name = what
            .strip_prefix("OP:")
            .or_else(|| what.strip_prefix("op:"))
            .ok_or_else(|| SchemaError::new(line, "ADD expects RULE or OP:<KIND>"))?;
        let kind = DirKind::parse(kind_name)
            .ok_or_else(|| SchemaError::new(line, format!("unknown directive kind \"{kind_name}\"")))?;
        let trigger = self.graphlet(line, lhs)?;
        let (mk, mkey) = take_word(rhs);
        let method_kind = DirKind::parse(mk)
            .ok_or_else(|| SchemaError::new(line, format!("unknown directive kind \"{mk}\"")))?;
        let method_key = self.graphlet(line, mkey)?;
        Ok((
            trigger.clone(),
            Payload::Op {
                kind,
                trigger,
                method_kind,
                method_key,
            },
        ))
    }

    fn step(
        &mut self,
        line: usize,
        text: &str,
    ) -> SchemaResult<(StepSpec, Option<String>, Option<String>)> {
        let (body, cont, alt) = split_links(text);
        let (mut first, mut rest) = take_word(body);
        let mut label = None;
        if let Some(name) = first.strip_prefix('@') {
            if name.is_empty() {
                return Err(SchemaError::new(line, "empty step label"));
            }
            label = Some(name.to_string());
            (first, rest) = take_word(rest);
        }
        let kind = DirKind::parse(first)
            .ok_or_else(|| SchemaError::new(line, format!("unknown directive kind \"{first}\"")))?;
        let (key, payload) = match kind {
            DirKind::Add => {
                let (key, payload) = self.payload(line, rest)?;
                (key, Some(payload))
            }
            DirKind::Punt if rest.is_empty() => (Graphlet::new(), None),
            _ => (self.graphlet(line, rest)?, None),
        };
        let mut spec = StepSpec::new(kind, key);
        spec.label = label;
        spec.payload = payload;
        spec.alt_explicit = alt.is_some();
        Ok((spec, cont.map(str::to_string), alt.map(str::to_string)))
    }
}

fn resolve(
    line: usize,
    target: &str,
    labels: &HashMap<String, usize>,
) -> SchemaResult<Link> {
    let Some(name) = target.strip_prefix('@') else {
        return Err(SchemaError::new(line, format!("link target \"{target}\" must start with @")));
    };
    match name {
        "done" => Ok(Link::Done),
        "fail" => Ok(Link::Fail),
        _ => labels
            .get(name)
            .map(|i| Link::Step(*i))
            .ok_or_else(|| SchemaError::new(line, format!("unknown step label @{name}"))),
    }
}

impl ChainSpec {
    /// Parse numbered step lines sharing one variable table.
    pub fn parse_lines(
        pool: &mut NodePool,
        vars: &mut VarTable,
        const_band: Option<Band>,
        lines: &[(usize, &str)],
    ) -> SchemaResult<Self> {
        let mut parser = StepParser {
            pool,
            vars,
            const_band,
        };
        let mut steps = Vec::new();
        let mut targets = Vec::new();
        for (line, text) in lines {
            let (spec, cont, alt) = parser.step(*line, text)?;
            steps.push(spec);
            targets.push((*line, cont, alt));
        }
        let mut labels = HashMap::new();
        for (i, s) in steps.iter().enumerate() {
            if let Some(l) = &s.label {
                if labels.insert(l.clone(), i).is_some() {
                    return Err(SchemaError::new(targets[i].0, format!("duplicate label @{l}")));
                }
            }
        }
        let n = steps.len();
        for (i, (line, cont, alt)) in targets.into_iter().enumerate() {
            steps[i].cont = match cont {
                Some(t) => resolve(line, &t, &labels)?,
                None if i + 1 < n => Link::Step(i + 1),
                None => Link::Done,
            };
            if let Some(t) = alt {
                steps[i].alt = resolve(line, &t, &labels)?;
            }
        }
        Ok(Self { steps })
    }

    /// Parse a script: one step per non-blank line, `//` comments skipped.
    pub fn parse_script(pool: &mut NodePool, const_band: Option<Band>, text: &str) -> SchemaResult<Self> {
        let lines: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with("//"))
            .collect();
        if lines.is_empty() {
            return Err(SchemaError::new(0, "empty chain"));
        }
        let mut vars = VarTable::new();
        Self::parse_lines(pool, &mut vars, const_band, &lines)
    }

    /// A one-step chain.
    pub fn single(kind: DirKind, key: Graphlet) -> Self {
        Self {
            steps: vec![StepSpec::new(kind, key)],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every graphlet the template refers to: keys and payloads.
    pub fn graphlets(&self) -> impl Iterator<Item = &Graphlet> {
        self.steps.iter().flat_map(|s| {
            std::iter::once(&s.key).chain(s.payload.iter().flat_map(|p| p.graphlets()))
        })
    }

    // -----------------------------------------------------------------------
    // Surgery
    // -----------------------------------------------------------------------

    /// Steps from `from` on, as a chain of their own. Links back before
    /// `from` end the new chain successfully.
    pub fn tail(&self, from: usize) -> ChainSpec {
        let remap = |link: Link| match link {
            Link::Step(i) if i >= from => Link::Step(i - from),
            Link::Step(_) => Link::Done,
            other => other,
        };
        ChainSpec {
            steps: self
                .steps
                .iter()
                .skip(from)
                .map(|s| StepSpec {
                    cont: remap(s.cont),
                    alt: remap(s.alt),
                    ..s.clone()
                })
                .collect(),
        }
    }

    /// Replace step `at` with `segment`. The segment starts where the step
    /// was; its successful ends continue where the step's success link went.
    pub fn splice(&mut self, at: usize, segment: &ChainSpec) {
        if at >= self.steps.len() || segment.is_empty() {
            return;
        }
        let grow = segment.len() - 1;
        let outer = |link: Link| match link {
            Link::Step(i) if i > at => Link::Step(i + grow),
            other => other,
        };
        let exit = outer(self.steps[at].cont);
        let inner = |link: Link| match link {
            Link::Step(j) => Link::Step(at + j),
            Link::Done => exit,
            Link::Fail => Link::Fail,
        };
        let mut steps: Vec<StepSpec> = Vec::with_capacity(self.steps.len() + grow);
        for s in &self.steps[..at] {
            steps.push(StepSpec {
                cont: outer(s.cont),
                alt: outer(s.alt),
                ..s.clone()
            });
        }
        for s in &segment.steps {
            steps.push(StepSpec {
                label: None,
                cont: inner(s.cont),
                alt: inner(s.alt),
                ..s.clone()
            });
        }
        for s in &self.steps[at + 1..] {
            steps.push(StepSpec {
                cont: outer(s.cont),
                alt: outer(s.alt),
                ..s.clone()
            });
        }
        self.steps = steps;
    }

    /// Append a CHK of `key` that every successful end now passes through.
    /// A false check fails the chain.
    pub fn push_check(&mut self, key: Graphlet) {
        let at = self.steps.len();
        for s in &mut self.steps {
            if s.cont == Link::Done {
                s.cont = Link::Step(at);
            }
            if s.alt == Link::Done {
                s.alt = Link::Step(at);
            }
        }
        let mut chk = StepSpec::new(DirKind::Chk, key);
        chk.alt = Link::Fail;
        chk.alt_explicit = true;
        self.steps.push(chk);
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Render one line per step.
    pub fn render(&self, pool: &NodePool) -> Vec<String> {
        let n = self.steps.len();
        let mut targeted = vec![false; n];
        for (i, s) in self.steps.iter().enumerate() {
            let default_cont = if i + 1 < n { Link::Step(i + 1) } else { Link::Done };
            if let Link::Step(t) = s.cont {
                if s.cont != default_cont {
                    targeted[t] = true;
                }
            }
            if let Link::Step(t) = s.alt {
                targeted[t] = true;
            }
        }
        let name = |i: usize| -> String {
            self.steps[i]
                .label
                .clone()
                .unwrap_or_else(|| format!("s{i}"))
        };
        let target = |link: Link| match link {
            Link::Step(i) => format!("@{}", name(i)),
            Link::Done => "@done".to_string(),
            Link::Fail => "@fail".to_string(),
        };
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut line = String::new();
                if s.label.is_some() || targeted[i] {
                    line.push_str(&format!("@{} ", name(i)));
                }
                line.push_str(s.kind.name());
                match &s.payload {
                    Some(Payload::Rule { pattern, result }) => {
                        line.push_str(&format!(
                            " RULE {} => {}",
                            render(pool, pattern),
                            render(pool, result)
                        ));
                    }
                    Some(Payload::Op {
                        kind,
                        trigger,
                        method_kind,
                        method_key,
                    }) => {
                        line.push_str(&format!(
                            " OP:{} {} => {} {}",
                            kind.name(),
                            render(pool, trigger),
                            method_kind.name(),
                            render(pool, method_key)
                        ));
                    }
                    None if !s.key.is_empty() => {
                        line.push(' ');
                        line.push_str(&render(pool, &s.key));
                    }
                    None => {}
                }
                let default_cont = if i + 1 < n { Link::Step(i + 1) } else { Link::Done };
                if s.cont != default_cont {
                    line.push_str(&format!(" -> {}", target(s.cont)));
                }
                if s.alt_explicit || s.alt != Link::Done {
                    line.push_str(&format!(" | {}", target(s.alt)));
                }
                line
            })
            .collect()
    }

    /// Structure and graphlets with variables renamed canonically.
    pub fn canonical(&self, pool: &NodePool) -> String {
        let mut all = Graphlet::new();
        for g in self.graphlets() {
            for id in g.iter() {
                all.push(id);
            }
        }
        let shape: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}{:?}{:?}", s.kind.name(), s.cont, s.alt))
            .collect();
        format!("{} {}", shape.join(","), canonical(pool, &all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> (NodePool, ChainSpec) {
        let mut pool = NodePool::new(256, 8);
        let spec = ChainSpec::parse_script(&mut pool, None, text).unwrap();
        (pool, spec)
    }

    #[test]
    fn default_links() {
        let (_, spec) = parse("DO (walk)\nDO (talk)\n");
        assert_eq!(spec.steps[0].cont, Link::Step(1));
        assert_eq!(spec.steps[1].cont, Link::Done);
        assert_eq!(spec.steps[0].alt, Link::Done);
        assert!(!spec.steps[0].alt_explicit);
    }

    #[test]
    fn labels_and_targets() {
        let (pool, spec) = parse(
            "@top EACH (ako \"cup\" :obj ?x)\nDO (wash :obj ?x) -> @top\nCHK (hq \"clean\" :obj ?x) | @fail\n",
        );
        assert_eq!(spec.steps[1].cont, Link::Step(0));
        assert_eq!(spec.steps[2].alt, Link::Fail);
        assert!(spec.steps[2].alt_explicit);
        let x0 = pool.node(spec.steps[0].key.main().unwrap()).unwrap().arg("obj");
        let x1 = pool.node(spec.steps[1].key.main().unwrap()).unwrap().arg("obj");
        assert_eq!(x0, x1);
    }

    #[test]
    fn unknown_label_and_kind() {
        let mut pool = NodePool::new(64, 8);
        assert!(ChainSpec::parse_script(&mut pool, None, "DO (walk) -> @nowhere").is_err());
        assert!(ChainSpec::parse_script(&mut pool, None, "JUMP (walk)").is_err());
        assert!(ChainSpec::parse_script(&mut pool, None, "DO").is_err());
        assert!(ChainSpec::parse_script(&mut pool, None, "@a DO (x)\n@a DO (y)").is_err());
    }

    #[test]
    fn add_payloads() {
        let (_, spec) = parse(
            "ADD RULE (ako \"cup\" :obj ?y) => (hq \"clean\" :obj ?y)\nADD OP:DO (tidy :obj ?z) => GND (sweep :obj ?z)\nPUNT\n",
        );
        assert!(matches!(spec.steps[0].payload, Some(Payload::Rule { .. })));
        match &spec.steps[1].payload {
            Some(Payload::Op {
                kind, method_kind, ..
            }) => {
                assert_eq!(*kind, DirKind::Do);
                assert_eq!(*method_kind, DirKind::Gnd);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(spec.steps[2].key.is_empty());
    }

    #[test]
    fn pipes_inside_strings_are_not_links() {
        let (pool, spec) = parse("NOTE (say \"a | b -> c\")");
        assert_eq!(spec.steps.len(), 1);
        assert_eq!(pool.node(spec.steps[0].key.main().unwrap()).unwrap().lex(), "a | b -> c");
    }

    #[test]
    fn render_round_trip() {
        let text = "@s0 EACH (ako \"cup\" :obj ?x)\nDO (wash :obj ?x) -> @s0\nCHK (hq \"clean\" :obj ?x) | @fail";
        let (pool, spec) = parse(text);
        assert_eq!(spec.render(&pool).join("\n"), text);
    }

    #[test]
    fn splice_and_tail() {
        let (_, mut spec) = parse("DO (a)\nDO (b)\nDO (c)\n");
        let (_, seg) = parse("DO (x)\nDO (y)\n");
        spec.splice(1, &seg);
        assert_eq!(spec.len(), 4);
        assert_eq!(spec.steps[0].cont, Link::Step(1));
        assert_eq!(spec.steps[1].cont, Link::Step(2));
        assert_eq!(spec.steps[2].cont, Link::Step(3));
        assert_eq!(spec.steps[3].cont, Link::Done);

        let tail = spec.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.steps[0].cont, Link::Step(1));
    }

    #[test]
    fn residual_check_closes_chain() {
        let (mut pool, mut spec) = parse("DO (fetch :obj ?x)\n");
        let key = GraphletParser::new(&mut pool, &mut VarTable::new(), None)
            .parse("(hq \"red\" :obj ?x)")
            .unwrap();
        spec.push_check(key);
        assert_eq!(spec.steps[0].cont, Link::Step(1));
        assert_eq!(spec.steps[1].kind, DirKind::Chk);
        assert_eq!(spec.steps[1].alt, Link::Fail);
    }

    #[test]
    fn canonical_ignores_names() {
        let (pool_a, a) = parse("DO (wash :obj ?x)\nCHK (hq \"clean\" :obj ?x)");
        let (pool_b, b) = parse("DO (wash :obj ?q)\nCHK (hq \"clean\" :obj ?q)");
        assert_eq!(a.canonical(&pool_a), b.canonical(&pool_b));
    }
}
