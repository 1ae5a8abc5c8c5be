//! End-to-end scenarios: inputs go through the scheduler, verdicts and
//! trace lines come out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use deliberator::config::CoreConfig;
use deliberator::graph::text::parse_graphlet;
use deliberator::graph::{Band, Bindings, Graphlet, NodeId, NodePool};
use deliberator::io::{Input, Source};
use deliberator::kernel::{Kernel, KernelResult, KernelStatus};
use deliberator::library::Library;
use deliberator::memory::MatchOpts;
use deliberator::plan::Status;
use deliberator::scheduler::Scheduler;
use deliberator::trace::MemoryTracer;

fn core(lib: &str) -> (Scheduler, MemoryTracer) {
    let tracer = MemoryTracer::new();
    let lib = Library::parse(lib).expect("library parses");
    let s = Scheduler::new(CoreConfig::default(), lib)
        .expect("scheduler")
        .with_tracer(Box::new(tracer.clone()));
    (s, tracer)
}

fn fact(s: &mut Scheduler, text: &str) {
    let ctx = s.context_mut();
    let g = parse_graphlet(ctx.wmem.pool_mut(), Some(Band::Main), text).unwrap();
    ctx.wmem
        .assert(None, &g, &mut Bindings::new(), 1.0, Band::Main)
        .unwrap();
}

/// Image of `?v` in the first match of `text` (which must mention `?v`).
fn lookup(s: &mut Scheduler, text: &str, opts: &MatchOpts) -> Option<NodeId> {
    let ctx = s.context_mut();
    let g = parse_graphlet(ctx.wmem.pool_mut(), Some(Band::Main), text).unwrap();
    let var = g
        .iter()
        .flat_map(|c| ctx.wmem.pool().node(c).unwrap().args().to_vec())
        .map(|(_, a)| a)
        .find(|a| ctx.wmem.pool().node(*a).unwrap().var().is_some())?;
    let lib = Library::new();
    let b = ctx
        .wmem
        .find_first(&lib, &g, &Bindings::new(), opts)
        .unwrap()?;
    b.lookup(var)
}

fn holds(s: &mut Scheduler, text: &str) -> bool {
    let ctx = s.context_mut();
    let g = parse_graphlet(ctx.wmem.pool_mut(), Some(Band::Main), text).unwrap();
    let lib = Library::new();
    ctx.wmem
        .find_first(&lib, &g, &Bindings::new(), &MatchOpts::default())
        .unwrap()
        .is_some()
}

fn count(lines: &[String], prefix: &str) -> usize {
    lines.iter().filter(|l| l.starts_with(prefix)).count()
}

// ---------------------------------------------------------------------------
// S1: NOTE ingress
// ---------------------------------------------------------------------------

const GREET: &str = "\
OP greet
  kind=NOTE
  trig: (hq \"close\" :obj ?x)
  method:
    NOTE (hq \"greeted\" :obj ?x)
";

#[test]
fn note_ingress_fires_one_reaction() {
    let (mut s, tracer) = core(GREET);
    fact(&mut s, "(ako \"person\" :obj X)");
    let id = s
        .submit(Input::note(Source::User, "(hq \"close\" :obj X)"))
        .unwrap();

    s.run(2);
    assert_eq!(s.verdict(id), Some(Status::Done));
    assert_eq!(s.verdicts().len(), 1);
    let greet = s.context().lib.op_by_name("greet").unwrap();
    assert_eq!(s.context().lib.op(greet).unwrap().stats().successes, 1);
    assert!(holds(&mut s, "(hq \"greeted\" :obj X)"));
    assert_eq!(count(&tracer.lines(), "*** NOTE["), 1);

    s.step();
    assert!(s.foci().is_empty());
}

// ---------------------------------------------------------------------------
// S2: DO phasing
// ---------------------------------------------------------------------------

const PICK: &str = "\
OP check-reach
  kind=ANTE
  trig: (pick :obj ?x)
  method:
    NOTE (hq \"reachable\" :obj ?x)

OP pick-up
  kind=DO
  trig: (pick :obj ?x)
  method:
    NOTE (hq \"held\" :obj ?x)
";

#[test]
fn do_runs_ante_gate_do() {
    let (mut s, tracer) = core(PICK);
    fact(&mut s, "(ako \"cup\" :obj X)");
    let id = s.submit(Input::chain(Source::User, "DO (pick X)")).unwrap();
    s.run_until_idle(30);
    assert_eq!(s.verdict(id), Some(Status::Done));

    let lines = tracer.lines();
    let phases: Vec<&String> = lines.iter().filter(|l| l.starts_with("% ")).collect();
    assert_eq!(phases, ["% ANTE", "% GATE", "% DO"]);
    assert_eq!(count(&lines, "*** DO["), 1);
    assert!(holds(&mut s, "(hq \"reachable\" :obj X)"));
    assert!(holds(&mut s, "(hq \"held\" :obj X)"));
}

const CHECK_ONLY: &str = "\
OP check-reach
  kind=ANTE
  trig: (pick :obj ?x)
  method:
    NOTE (hq \"reachable\" :obj ?x)
";

#[test]
fn do_without_act_operator_fails_after_preconditions() {
    let (mut s, tracer) = core(CHECK_ONLY);
    fact(&mut s, "(ako \"cup\" :obj X)");
    let id = s.submit(Input::chain(Source::User, "DO (pick X)")).unwrap();
    s.run_until_idle(30);
    assert_eq!(s.verdict(id), Some(Status::Fail));

    let lines = tracer.lines();
    let phases: Vec<&String> = lines.iter().filter(|l| l.starts_with("% ")).collect();
    assert_eq!(phases, ["% ANTE", "% GATE", "% DO"]);
    assert_eq!(count(&lines, "*** DO["), 0);
    assert!(holds(&mut s, "(hq \"reachable\" :obj X)"));
    let lib = &s.context().lib;
    let check = lib.op(lib.op_by_name("check-reach").unwrap()).unwrap();
    assert_eq!(check.stats().successes, 1);
}

// ---------------------------------------------------------------------------
// S3: BIND fabricates, then reuses
// ---------------------------------------------------------------------------

#[test]
fn bind_fabricates_hidden_cup_and_reuses_it() {
    let (mut s, tracer) = core("");
    s.submit(Input::chain(
        Source::User,
        "BIND (ako \"cup\" :obj ?x)\nNOTE (hq \"wanted\" :obj ?x)",
    ))
    .unwrap();
    s.run_until_idle(20);

    let hidden = MatchOpts::default().band(Band::Hypo).reveal();
    let cup = lookup(&mut s, "(hq \"wanted\" :obj ?y)", &hidden).expect("cup imagined");
    {
        let pool = s.context().wmem.pool();
        let node = pool.node(cup).unwrap();
        assert!(!node.visible());
        assert!(node.belief() < 1.0);
        let is_cup = pool.props_of(cup, "obj").into_iter().any(|h| {
            let n = pool.node(h).unwrap();
            n.kind() == "ako" && n.lex() == "cup"
        });
        assert!(is_cup);
    }

    s.submit(Input::chain(
        Source::User,
        "BIND (ako \"cup\" :obj ?z)\nNOTE (hq \"again\" :obj ?z)",
    ))
    .unwrap();
    s.run_until_idle(20);
    let again = lookup(&mut s, "(hq \"again\" :obj ?w)", &hidden).expect("bound again");
    assert_eq!(again, cup);
    assert_eq!(count(&tracer.lines(), "% REPEAT"), 1);
}

// ---------------------------------------------------------------------------
// S4: non-return inhibition
// ---------------------------------------------------------------------------

const STACK: &str = "\
OP stack-by-lifting
  kind=ACH pref=0.6
  trig: (on :obj ?a :ref ?b)
  method:
    GND (lift :obj ?a)

OP stack-by-pushing
  kind=ACH pref=0.6
  trig: (on :obj ?a :ref ?b)
  method:
    GND (push :obj ?a)
";

#[test]
fn each_operator_is_tried_once() {
    let (mut s, _) = core(STACK);
    fact(&mut s, "(ako \"block\" :obj X)");
    fact(&mut s, "(ako \"block\" :obj Y)");
    let id = s
        .submit(Input::chain(Source::User, "ACH (on :obj X :ref Y)"))
        .unwrap();
    s.run_until_idle(30);
    assert_eq!(s.verdict(id), Some(Status::Fail));

    let lib = &s.context().lib;
    for name in ["stack-by-lifting", "stack-by-pushing"] {
        let op = lib.op(lib.op_by_name(name).unwrap()).unwrap();
        assert_eq!(op.stats().failures, 1, "{name}");
        assert_eq!(op.stats().successes, 0, "{name}");
        assert!(op.pref() < 0.6, "{name}");
    }
}

// ---------------------------------------------------------------------------
// S5: halting a live action
// ---------------------------------------------------------------------------

/// Never finishes; counts stops.
struct Treadmill(Arc<AtomicU64>);

impl Kernel for Treadmill {
    fn functions(&self) -> Vec<String> {
        vec!["stride".to_string()]
    }
    fn start(&mut self, _func: &str, _pool: &NodePool, _key: &Graphlet) -> KernelResult<u64> {
        Ok(7)
    }
    fn status(&mut self, _inst: u64) -> KernelStatus {
        KernelStatus::Working { progress: None }
    }
    fn stop(&mut self, _inst: u64) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

const WALK: &str = "\
OP walking
  kind=DO
  trig: (walk)
  method:
    GND (stride)
";

#[test]
fn negated_do_halts_live_walk() {
    let (mut s, _) = core(WALK);
    let stops = Arc::new(AtomicU64::new(0));
    s.register_kernel(Box::new(Treadmill(stops.clone())));

    let walk = s.submit(Input::chain(Source::User, "DO (walk)")).unwrap();
    s.run(3);
    assert_eq!(s.verdict(walk), None);

    let halt = s
        .submit(Input::chain(Source::User, "DO (walk :neg 1)"))
        .unwrap();
    s.run(3);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(s.verdict(halt), Some(Status::Done));
    assert_eq!(s.verdict(walk), Some(Status::Fail));
}

#[test]
fn negated_do_with_nothing_to_halt_fails() {
    let (mut s, _) = core("");
    let halt = s
        .submit(Input::chain(Source::User, "DO (walk :neg 1)"))
        .unwrap();
    s.run(3);
    assert_eq!(s.verdict(halt), Some(Status::Fail));
}

// ---------------------------------------------------------------------------
// S6: pronoun gender
// ---------------------------------------------------------------------------

fn find_female(s: &mut Scheduler, mark: &str) -> u64 {
    let id = s
        .submit(Input::chain(
            Source::User,
            format!("FIND (?x :tag female)\nNOTE (hq \"{mark}\" :obj ?x)"),
        ))
        .unwrap();
    s.run_until_idle(10);
    id
}

#[test]
fn feminine_find_picks_recent_unrefuted_referent() {
    let (mut s, _) = core("");
    for note in [
        "(hq \"female\" :obj Alice)",
        "(hq \"female\" :obj Dana)",
        "(hq \"male\" :obj Bob)",
        "(hq \"female\" :obj Carol :neg 1)",
    ] {
        s.submit(Input::note(Source::User, note)).unwrap();
        s.step();
    }
    let id = find_female(&mut s, "chosen");
    assert_eq!(s.verdict(id), Some(Status::Done));
    assert!(holds(&mut s, "(hq \"chosen\" :obj Dana)"));
    assert!(!holds(&mut s, "(hq \"chosen\" :obj Alice)"));
    assert!(!holds(&mut s, "(hq \"chosen\" :obj Carol)"));
    assert!(!holds(&mut s, "(hq \"chosen\" :obj Bob)"));

    // Mentioning Alice again makes her the freshest referent.
    s.submit(Input::note(Source::User, "(hq \"tall\" :obj Alice)"))
        .unwrap();
    s.step();
    let id = find_female(&mut s, "picked");
    assert_eq!(s.verdict(id), Some(Status::Done));
    assert!(holds(&mut s, "(hq \"picked\" :obj Alice)"));
    assert!(!holds(&mut s, "(hq \"picked\" :obj Dana)"));
}
