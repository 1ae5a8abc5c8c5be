//! The `OP` / `RULE` library file.
//!
//! ```text
//! // tidy up after a spill
//! OP mop-floor
//!   kind=ACH pref=0.7 budget=20
//!   trig: (hq "clean" :obj ?f)
//!   cond: (ako "floor" :obj ?f)
//!   method:
//!     FIND (ako "mop" :obj ?m)
//!     DO (wipe :obj ?f :with ?m)
//!
//! RULE cups-hold-liquid
//!   conf=0.8
//!   if: (ako "cup" :obj ?c)
//!   then: (hq "container" :obj ?c)
//! ```
//!
//! A section runs from its header to its last non-blank, non-comment line;
//! everything else (comments, blank lines) is kept as free text. Rendering
//! re-emits untouched sections and free text verbatim, so a file that was
//! only loaded renders byte-for-byte identical.

use std::path::Path;

use super::{Entry, Library, LibraryError, LibraryResult, Operator, Rule};
use crate::error::SchemaError;
use crate::graph::Graphlet;
use crate::graph::text::{GraphletParser, VarTable, render};
use crate::plan::DirKind;
use crate::plan::script::ChainSpec;

/// Format a number with at most three decimals and no trailing zeros.
pub(crate) fn fmt_num(x: f64) -> String {
    let s = format!("{x:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" { "0".to_string() } else { s.to_string() }
}

fn is_comment_or_blank(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with("//")
}

fn header(line: &str) -> Option<(&'static str, &str)> {
    if let Some(rest) = line.strip_prefix("OP ") {
        return Some(("OP", rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("RULE ") {
        return Some(("RULE", rest.trim()));
    }
    match line.trim_end() {
        "OP" => Some(("OP", "")),
        "RULE" => Some(("RULE", "")),
        _ => None,
    }
}

/// Body line of a section, classified.
enum Field<'t> {
    Meta(&'t str),
    Trig(&'t str),
    Cond(&'t str),
    Method(&'t str),
    If(&'t str),
    Then(&'t str),
    Step(&'t str),
}

fn field(text: &str) -> Field<'_> {
    if let Some(rest) = text.strip_prefix("trig:") {
        return Field::Trig(rest.trim());
    }
    if let Some(rest) = text.strip_prefix("cond:") {
        return Field::Cond(rest.trim());
    }
    if let Some(rest) = text.strip_prefix("method:") {
        return Field::Method(rest.trim());
    }
    if let Some(rest) = text.strip_prefix("if:") {
        return Field::If(rest.trim());
    }
    if let Some(rest) = text.strip_prefix("then:") {
        return Field::Then(rest.trim());
    }
    let first = text.split_whitespace().next().unwrap_or("");
    if first.contains('=') || first == "disabled" {
        Field::Meta(text)
    } else {
        Field::Step(text)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl Library {
    /// Parse library text.
    pub fn parse(text: &str) -> LibraryResult<Library> {
        let mut lib = Library::new();
        lib.trailing_newline = text.ends_with('\n') || text.is_empty();
        let lines: Vec<&str> = text.lines().collect();

        let mut free: Vec<String> = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            let Some((what, name)) = header(line) else {
                if !is_comment_or_blank(line) {
                    return Err(SchemaError::new(
                        i + 1,
                        format!("expected OP or RULE section, found \"{}\"", line.trim()),
                    )
                    .into());
                }
                free.push(line.to_string());
                i += 1;
                continue;
            };
            if name.is_empty() {
                return Err(SchemaError::new(i + 1, format!("{what} section needs a name")).into());
            }
            let start = i;
            let mut end = i + 1;
            let mut j = i + 1;
            while j < lines.len() {
                let l = lines[j];
                if is_comment_or_blank(l) {
                    j += 1;
                    continue;
                }
                if !l.starts_with(char::is_whitespace) {
                    break;
                }
                j += 1;
                end = j;
            }
            if !free.is_empty() {
                lib.layout.push(Entry::Text(std::mem::take(&mut free)));
            }
            let body: Vec<(usize, &str)> = (start + 1..end).map(|k| (k + 1, lines[k])).collect();
            let source: Vec<String> = lines[start..end].iter().map(|s| s.to_string()).collect();
            match what {
                "OP" => lib.parse_op(name, &body, source)?,
                _ => lib.parse_rule(name, &body, source)?,
            };
            i = end;
        }
        if !free.is_empty() {
            lib.layout.push(Entry::Text(free));
        }
        Ok(lib)
    }

    /// Read and parse a library file.
    pub fn load(path: &Path) -> LibraryResult<Library> {
        let text = std::fs::read_to_string(path).map_err(|source| LibraryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Library::parse(&text)
    }

    /// Write the rendered library to a file.
    pub fn save(&self, path: &Path) -> LibraryResult<()> {
        std::fs::write(path, self.render()).map_err(|source| LibraryError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn parse_op(&mut self, name: &str, body: &[(usize, &str)], source: Vec<String>) -> LibraryResult<()> {
        let invalid = |message: String| LibraryError::Invalid {
            section: "operator",
            name: name.to_string(),
            message,
        };
        let mut vars = VarTable::new();
        let mut kind = None;
        let mut pref = 0.5;
        let mut budget = 0.0;
        let mut disabled = false;
        let mut trigger = None;
        let mut cond = Graphlet::new();
        let mut steps: Vec<(usize, &str)> = Vec::new();
        let mut in_method = false;

        for (line, raw) in body {
            if is_comment_or_blank(raw) {
                continue;
            }
            match field(raw.trim()) {
                Field::Meta(text) => {
                    for tok in text.split_whitespace() {
                        if tok == "disabled" {
                            disabled = true;
                            continue;
                        }
                        let (k, v) = tok
                            .split_once('=')
                            .ok_or_else(|| invalid(format!("bad metadata \"{tok}\"")))?;
                        match k {
                            "kind" => {
                                kind = Some(
                                    DirKind::parse(v)
                                        .ok_or_else(|| invalid(format!("unknown kind \"{v}\"")))?,
                                );
                            }
                            "pref" => pref = parse_num(*line, v)?,
                            "budget" => budget = parse_num(*line, v)?,
                            _ => return Err(invalid(format!("unknown metadata \"{k}\""))),
                        }
                    }
                }
                Field::Trig(text) => {
                    trigger = Some(
                        GraphletParser::new(self.pool_mut(), &mut vars, None)
                            .at_line(*line)
                            .parse(text)?,
                    );
                }
                Field::Cond(text) => {
                    cond = GraphletParser::new(self.pool_mut(), &mut vars, None)
                        .at_line(*line)
                        .parse(text)?;
                }
                Field::Method(text) => {
                    in_method = true;
                    if !text.is_empty() {
                        steps.push((*line, text));
                    }
                }
                Field::Step(text) if in_method => steps.push((*line, text)),
                Field::Step(text) | Field::If(text) | Field::Then(text) => {
                    return Err(invalid(format!("unexpected line \"{text}\"")));
                }
            }
        }
        let kind = kind.ok_or_else(|| invalid("missing kind=".to_string()))?;
        let trigger = trigger.ok_or_else(|| invalid("missing trig:".to_string()))?;
        if steps.is_empty() {
            return Err(invalid("empty method".to_string()));
        }
        let method = ChainSpec::parse_lines(self.pool_mut(), &mut vars, None, &steps)?;
        let id = self.install_op(name, kind, trigger, cond, method, pref, budget, false, Some(source))?;
        self.set_disabled(id, disabled);
        Ok(())
    }

    fn parse_rule(&mut self, name: &str, body: &[(usize, &str)], source: Vec<String>) -> LibraryResult<()> {
        let invalid = |message: String| LibraryError::Invalid {
            section: "rule",
            name: name.to_string(),
            message,
        };
        let mut vars = VarTable::new();
        let mut conf = 1.0;
        let mut disabled = false;
        let mut pattern = None;
        let mut result = None;

        for (line, raw) in body {
            if is_comment_or_blank(raw) {
                continue;
            }
            match field(raw.trim()) {
                Field::Meta(text) => {
                    for tok in text.split_whitespace() {
                        match tok.split_once('=') {
                            Some(("conf", v)) => conf = parse_num(*line, v)?,
                            None if tok == "disabled" => disabled = true,
                            _ => return Err(invalid(format!("bad metadata \"{tok}\""))),
                        }
                    }
                }
                Field::If(text) => {
                    pattern = Some(
                        GraphletParser::new(self.pool_mut(), &mut vars, None)
                            .at_line(*line)
                            .parse(text)?,
                    );
                }
                Field::Then(text) => {
                    result = Some(
                        GraphletParser::new(self.pool_mut(), &mut vars, None)
                            .at_line(*line)
                            .parse(text)?,
                    );
                }
                Field::Trig(text) | Field::Cond(text) | Field::Method(text) | Field::Step(text) => {
                    return Err(invalid(format!("unexpected line \"{text}\"")));
                }
            }
        }
        let pattern = pattern.ok_or_else(|| invalid("missing if:".to_string()))?;
        let result = result.ok_or_else(|| invalid("missing then:".to_string()))?;
        let id = self.install_rule(name, pattern, result, conf, false, Some(source))?;
        if disabled {
            if let Some(rule) = self.rules.get_mut(id.index()) {
                rule.disabled = true;
            }
        }
        Ok(())
    }
}

fn parse_num(line: usize, v: &str) -> LibraryResult<f64> {
    v.parse()
        .map_err(|_| SchemaError::new(line, format!("bad number \"{v}\"")).into())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

impl Library {
    fn render_op(&self, op: &Operator) -> Vec<String> {
        if let Some(src) = &op.source {
            return src.clone();
        }
        let mut meta = format!("  kind={} pref={}", op.kind.name(), fmt_num(op.pref));
        if op.budget > 0.0 {
            meta.push_str(&format!(" budget={}", fmt_num(op.budget)));
        }
        if op.disabled {
            meta.push_str(" disabled");
        }
        let mut out = vec![format!("OP {}", op.name), meta];
        out.push(format!("  trig: {}", render(&self.pool, &op.trigger)));
        if !op.cond.is_empty() {
            out.push(format!("  cond: {}", render(&self.pool, &op.cond)));
        }
        out.push("  method:".to_string());
        out.extend(op.method.render(&self.pool).into_iter().map(|l| format!("    {l}")));
        out
    }

    fn render_rule(&self, rule: &Rule) -> Vec<String> {
        if let Some(src) = &rule.source {
            return src.clone();
        }
        let mut meta = format!("  conf={}", fmt_num(rule.conf));
        if rule.disabled {
            meta.push_str(" disabled");
        }
        vec![
            format!("RULE {}", rule.name),
            meta,
            format!("  if: {}", render(&self.pool, &rule.pattern)),
            format!("  then: {}", render(&self.pool, &rule.result)),
        ]
    }

    fn render_entry(&self, entry: &Entry) -> Vec<String> {
        match entry {
            Entry::Text(lines) => lines.clone(),
            Entry::Op(id) => self.op(*id).map(|o| self.render_op(o)).unwrap_or_default(),
            Entry::Rule(id) => self.rule(*id).map(|r| self.render_rule(r)).unwrap_or_default(),
        }
    }

    /// Render the whole library. Untouched definitions keep their text.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut prev_def = false;
        for entry in &self.layout {
            let is_def = !matches!(entry, Entry::Text(_));
            // Definitions added at runtime sit directly after another one.
            if is_def && prev_def {
                lines.push(String::new());
            }
            lines.extend(self.render_entry(entry));
            prev_def = is_def;
        }
        let mut out = lines.join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Render only definitions learned since loading.
    pub fn dump_learned(&self) -> String {
        let blocks: Vec<String> = self
            .layout
            .iter()
            .filter(|e| match e {
                Entry::Op(id) => self.op(*id).is_some_and(|o| o.learned),
                Entry::Rule(id) => self.rule(*id).is_some_and(|r| r.learned),
                Entry::Text(_) => false,
            })
            .map(|e| self.render_entry(e).join("\n"))
            .collect();
        if blocks.is_empty() {
            String::new()
        } else {
            format!("{}\n", blocks.join("\n\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodePool;
    use crate::graph::text::parse_graphlet;

    const TEXT: &str = "\
// household skills
OP mop-floor
  kind=ACH pref=0.7 budget=20
  trig: (hq \"clean\" :obj ?f)
  cond: (ako \"floor\" :obj ?f)
  method:
    FIND (ako \"mop\" :obj ?m)
    DO (wipe :obj ?f :with ?m)
// trailing comment

RULE cups
  conf=0.8
  if: (ako \"cup\" :obj ?c)
  then: (hq \"container\" :obj ?c)
";

    #[test]
    fn number_format() {
        assert_eq!(fmt_num(0.7), "0.7");
        assert_eq!(fmt_num(20.0), "20");
        assert_eq!(fmt_num(0.12345), "0.123");
        assert_eq!(fmt_num(0.0), "0");
    }

    #[test]
    fn parses_sections() {
        let lib = Library::parse(TEXT).unwrap();
        assert_eq!(lib.op_count(), 1);
        assert_eq!(lib.rule_count(), 1);
        let op = lib.op(lib.op_by_name("mop-floor").unwrap()).unwrap();
        assert_eq!(op.kind(), DirKind::Ach);
        assert!((op.pref() - 0.7).abs() < 1e-9);
        assert_eq!(op.budget(), 20.0);
        assert_eq!(op.cond().len(), 1);
        assert_eq!(op.method().len(), 2);
        // trig, cond and method share one variable table
        let f_trig = lib.pool().node(op.trigger().main().unwrap()).unwrap().arg("obj");
        let f_wipe = lib
            .pool()
            .node(op.method().steps[1].key.main().unwrap())
            .unwrap()
            .arg("obj");
        assert_eq!(f_trig, f_wipe);
    }

    #[test]
    fn untouched_round_trip_is_verbatim() {
        let lib = Library::parse(TEXT).unwrap();
        assert_eq!(lib.render(), TEXT);
    }

    #[test]
    fn edited_definition_is_rerendered() {
        let mut lib = Library::parse(TEXT).unwrap();
        let id = lib.rule_by_name("cups").unwrap();
        lib.reinforce_rule(id, 0.0, 0.5);
        let out = lib.render();
        assert!(out.contains("  conf=0.4\n"), "{out}");
        assert!(out.contains("  kind=ACH pref=0.7 budget=20\n"));
    }

    #[test]
    fn learned_definitions_are_dumped() {
        let mut lib = Library::parse(TEXT).unwrap();
        assert_eq!(lib.dump_learned(), "");
        let mut wm = NodePool::new(64, 8);
        let p = parse_graphlet(&mut wm, None, r#"(ako "mug" :obj ?z)"#).unwrap();
        let r = parse_graphlet(&mut wm, None, r#"(hq "container" :obj ?q)"#).unwrap();
        lib.learn_rule(&wm, &p, &r, 0.6).unwrap();
        let dump = lib.dump_learned();
        assert!(dump.starts_with("RULE learned-rule-1\n  conf=0.6\n"), "{dump}");

        let reparsed = Library::parse(&lib.render()).unwrap();
        assert_eq!(reparsed.rule_count(), 2);
    }

    #[test]
    fn rejects_bad_sections() {
        assert!(matches!(
            Library::parse("OP x\n  trig: (a :obj ?x)\n  method:\n    DO (b)\n"),
            Err(LibraryError::Invalid { .. })
        ));
        assert!(matches!(
            Library::parse("RULE r\n  if: (a :obj ?x)\n"),
            Err(LibraryError::Invalid { .. })
        ));
        assert!(matches!(
            Library::parse("bogus line\n"),
            Err(LibraryError::Schema(_))
        ));
        assert!(matches!(
            Library::parse("RULE a\n  if: (p :obj ?x)\n  then: (q :obj ?x)\nRULE b\n  if: (p :obj ?y)\n  then: (q :obj ?y)\n"),
            Err(LibraryError::Duplicate { .. })
        ));
    }

    #[test]
    fn disabled_flag() {
        let lib = Library::parse("RULE r\n  conf=0.5 disabled\n  if: (p :obj ?x)\n  then: (q :obj ?x)\n").unwrap();
        assert!(lib.rules().next().unwrap().disabled());
    }
}
