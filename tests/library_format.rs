//! Library file round trips: save, reload, learned definitions.

use deliberator::graph::text::parse_graphlet;
use deliberator::graph::NodePool;
use deliberator::library::Library;

const TEXT: &str = "\
// household skills
OP mop-floor
  kind=ACH pref=0.7 budget=20
  trig: (hq \"clean\" :obj ?f)
  cond: (ako \"floor\" :obj ?f)
  method:
    FIND (ako \"mop\" :obj ?m)
    DO (wipe :obj ?f :with ?m)

// cups hold things
RULE cups
  conf=0.9
  if: (ako \"cup\" :obj ?c)
  then: (hq \"hollow\" :obj ?c)
";

#[test]
fn untouched_library_round_trips_through_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("skills.lib");

    let lib = Library::parse(TEXT).unwrap();
    lib.save(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), TEXT);

    let again = Library::load(&path).unwrap();
    assert_eq!(again.op_count(), 1);
    assert_eq!(again.rule_count(), 1);
    assert_eq!(again.render(), TEXT);
}

#[test]
fn learned_rule_survives_reload() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("skills.lib");

    let mut lib = Library::parse(TEXT).unwrap();
    let mut wm = NodePool::new(64, 8);
    let pattern = parse_graphlet(&mut wm, None, "(ako \"plate\" :obj ?p)").unwrap();
    let result = parse_graphlet(&mut wm, None, "(hq \"flat\" :obj ?p)").unwrap();
    lib.learn_rule(&wm, &pattern, &result, 0.8).unwrap();

    let learned = lib.dump_learned();
    assert!(learned.starts_with("RULE learned-rule-1"));
    assert!(learned.contains("(hq \"flat\""));

    lib.save(&path).unwrap();
    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(saved.starts_with(TEXT.trim_end()));

    let again = Library::load(&path).unwrap();
    assert_eq!(again.rule_count(), 2);
    assert!(again.dump_learned().is_empty());
    assert!(again.rule_by_name("learned-rule-1").is_ok());
}

#[test]
fn edited_preference_is_rerendered() {
    let mut lib = Library::parse(TEXT).unwrap();
    let op = lib.op_by_name("mop-floor").unwrap();
    lib.nudge_pref(op, -0.2);
    let text = lib.render();
    assert_ne!(text, TEXT);
    assert!(text.contains("OP mop-floor"));
    assert!(text.contains("RULE cups\n  conf=0.9"));

    let again = Library::parse(&text).unwrap();
    let pref = again.op(again.op_by_name("mop-floor").unwrap()).unwrap().pref();
    assert!((pref - 0.5).abs() < 1e-9);
}

#[test]
fn malformed_library_reports_line() {
    let err = Library::parse("OP broken\n  kind=JUMP\n").unwrap_err();
    assert!(err.to_string().contains("JUMP") || err.to_string().contains("line"));
}
