//! The tick loop.
//!
//! Each tick the scheduler
//!
//! 1. admits new inputs (queue, polled sources, kernel volunteers and the
//!    NOTEs the core fabricated last tick) as top-level chains, called foci;
//! 2. advances every live focus by one transition;
//! 3. services halt requests raised by negated DOs;
//! 4. reaps foci that finished on an earlier tick;
//! 5. collects garbage from the seeds of live foci;
//! 6. updates the mood and publishes a [`CoreStatus`].
//!
//! Everything runs on the caller's thread. Collaborators only ever touch
//! the [`InputSender`] handles.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::GraphResult;
use crate::graph::{Band, Bindings, NodeId};
use crate::io::{CoreStatus, Input, InputQueue, InputSender, InputSource, OutputSink, Source};
use crate::kernel::Kernel;
use crate::library::Library;
use crate::plan::{Chain, ChainSpec, Context, PlanResult, Status};
use crate::trace::Tracer;

/// A top-level chain and where it came from.
#[derive(Debug)]
pub struct Focus {
    id: u64,
    chain: Chain,
    source: Source,
    /// Tick on which the chain finished.
    done_tick: Option<u64>,
}

impl Focus {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn live(&self) -> bool {
        self.done_tick.is_none()
    }
}

pub struct Scheduler {
    ctx: Context,
    queue: InputQueue,
    sources: Vec<Box<dyn InputSource>>,
    sink: Option<Box<dyn OutputSink>>,
    foci: Vec<Focus>,
    next_focus: u64,
    /// Final verdicts of every focus, in completion order.
    verdicts: Vec<(u64, Status)>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("ctx", &self.ctx)
            .field("foci", &self.foci.len())
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: CoreConfig, lib: Library) -> GraphResult<Self> {
        Ok(Self {
            ctx: Context::new(config, lib)?,
            queue: InputQueue::new(),
            sources: Vec::new(),
            sink: None,
            foci: Vec::new(),
            next_focus: 0,
            verdicts: Vec::new(),
        })
    }

    pub fn with_tracer(mut self, tracer: Box<dyn Tracer>) -> Self {
        self.ctx.tracer = tracer;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn add_source(&mut self, source: Box<dyn InputSource>) {
        self.sources.push(source);
    }

    pub fn register_kernel(&mut self, kernel: Box<dyn Kernel>) {
        self.ctx.kernels.register(kernel);
    }

    /// A producer handle for collaborator threads.
    pub fn sender(&self) -> InputSender {
        self.queue.sender()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn tick(&self) -> u64 {
        self.ctx.tick
    }

    pub fn foci(&self) -> &[Focus] {
        &self.foci
    }

    /// Final verdict of focus `id`, once it finished.
    pub fn verdict(&self, id: u64) -> Option<Status> {
        self.verdicts
            .iter()
            .find(|(f, _)| *f == id)
            .map(|(_, s)| *s)
    }

    pub fn verdicts(&self) -> &[(u64, Status)] {
        &self.verdicts
    }

    /// Turn an input into a focus that runs from the next step on.
    pub fn submit(&mut self, input: Input) -> PlanResult<u64> {
        let live = self.foci.iter().filter(|f| f.live()).count();
        let max = self.ctx.config.scheduler.max_foci;
        if live >= max {
            return Err(crate::plan::PlanError::Overflow {
                what: "active foci",
                limit: max,
            });
        }
        let spec = ChainSpec::parse_script(self.ctx.wmem.pool_mut(), Some(Band::Main), &input.script)?;
        let chain = Chain::new(
            spec,
            Bindings::new(),
            None,
            input.source.label(),
            0,
            Some(input.source),
        )?;
        self.next_focus += 1;
        let id = self.next_focus;
        debug!(tick = self.ctx.tick, focus = id, source = input.source.label(), "focus admitted");
        self.foci.push(Focus {
            id,
            chain,
            source: input.source,
            done_tick: None,
        });
        Ok(id)
    }

    /// Run one tick and return the published status.
    pub fn step(&mut self) -> CoreStatus {
        let began = Instant::now();
        self.intake();

        let mut finished = Vec::new();
        for focus in self.foci.iter_mut().filter(|f| f.done_tick.is_none()) {
            let status = focus.chain.tick(&mut self.ctx);
            if status.is_final() {
                info!(
                    tick = self.ctx.tick,
                    focus = focus.id,
                    source = focus.source.label(),
                    status = ?status,
                    "focus finished"
                );
                focus.done_tick = Some(self.ctx.tick);
                self.verdicts.push((focus.id, status));
                finished.push(status.code());
            }
        }

        self.service_halts();

        let tick = self.ctx.tick;
        self.foci
            .retain(|f| f.done_tick.map_or(true, |done| done >= tick));

        let mut seeds: HashSet<NodeId> = HashSet::new();
        for focus in self.foci.iter().filter(|f| f.live()) {
            focus.chain.mark_seeds(&mut seeds);
        }
        self.ctx.mark_seeds(&mut seeds);
        let collected = self.ctx.wmem.collect(&seeds);

        self.ctx.mood.update();

        let live: Vec<&Focus> = self.foci.iter().filter(|f| f.live()).collect();
        let status = CoreStatus {
            tick,
            foci: live.len(),
            goals: live.iter().map(|f| f.chain.num_goals()).sum(),
            max_depth: live.iter().map(|f| f.chain.max_depth()).max().unwrap_or(0),
            nodes: self.ctx.wmem.pool().len(),
            version: self.ctx.wmem.version(),
            collected,
            mood: self.ctx.mood.clone(),
            finished,
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.publish(&status);
        }

        let elapsed = began.elapsed();
        if over_budget(elapsed, self.ctx.config.scheduler.cycle_budget_ms) {
            debug!(tick, elapsed = ?elapsed, "tick over budget");
        }
        self.ctx.tick += 1;
        status
    }

    /// Run `ticks` ticks.
    pub fn run(&mut self, ticks: u64) -> Vec<CoreStatus> {
        (0..ticks).map(|_| self.step()).collect()
    }

    /// Run until no focus is live and nothing is waiting to be admitted, or
    /// `max` ticks went by. Returns the number of ticks run.
    pub fn run_until_idle(&mut self, max: u64) -> u64 {
        for n in 1..=max {
            self.step();
            let idle = self.foci.iter().all(|f| !f.live()) && !self.ctx.has_notes();
            if idle {
                return n;
            }
        }
        max
    }

    fn intake(&mut self) {
        let mut inputs = self.queue.drain();
        for source in &mut self.sources {
            inputs.extend(source.poll());
        }
        inputs.extend(
            self.ctx
                .kernels
                .volunteers()
                .into_iter()
                .map(|g| Input::note(Source::Sensor, &g)),
        );
        inputs.extend(self.ctx.take_notes());
        for input in inputs {
            let source = input.source.label();
            if let Err(e) = self.submit(input) {
                warn!(tick = self.ctx.tick, source, error = %e, "input rejected");
            }
        }
    }

    /// Answer every halt request raised this tick. The requesting DO reads
    /// the answer on its next poll.
    fn service_halts(&mut self) {
        for req in self.ctx.take_halts() {
            let mut halted = 0;
            for focus in self.foci.iter_mut().filter(|f| f.done_tick.is_none()) {
                halted += focus.chain.halt_active(&mut self.ctx, &req.key, req.requester);
            }
            debug!(tick = self.ctx.tick, requester = req.requester, halted, "halt serviced");
            self.ctx.set_halt_result(req.requester, halted);
        }
    }
}

/// Whether a tick that took `elapsed` exceeded a budget of `budget_ms`.
fn over_budget(elapsed: Duration, budget_ms: u64) -> bool {
    elapsed > Duration::from_millis(budget_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ScriptedSource;
    use crate::memory::MatchOpts;

    fn sched(lib: &str) -> Scheduler {
        Scheduler::new(CoreConfig::default(), Library::parse(lib).unwrap()).unwrap()
    }

    #[test]
    fn inputs_become_foci_and_are_reaped() {
        let mut s = sched("");
        let id = s
            .submit(Input::note(Source::User, "(hq \"red\" :obj X)"))
            .unwrap();
        let first = s.step();
        assert_eq!(first.finished, vec![1]);
        assert_eq!(s.verdict(id), Some(Status::Done));
        assert_eq!(s.foci().len(), 1);
        s.step();
        assert!(s.foci().is_empty());
    }

    #[test]
    fn queue_and_sources_feed_the_loop() {
        let mut s = sched("");
        s.add_source(Box::new(ScriptedSource::new(vec![
            vec![],
            vec![Input::note(Source::Sensor, "(hq \"warm\" :obj room)")],
        ])));
        let tx = s.sender();
        assert!(tx.send(Input::note(Source::User, "(hq \"cold\" :obj door)")));
        s.run(3);
        assert_eq!(s.verdicts().len(), 2);
        let ctx = s.context_mut();
        let g = crate::graph::text::parse_graphlet(ctx.wmem.pool_mut(), Some(Band::Main), "(hq \"warm\" :obj room)")
            .unwrap();
        let lib = Library::new();
        let hit = ctx
            .wmem
            .find_first(&lib, &g, &Bindings::new(), &MatchOpts::default())
            .unwrap();
        assert!(hit.is_some());
    }

    #[test]
    fn bad_input_is_rejected_not_fatal() {
        let mut s = sched("");
        assert!(s.submit(Input::chain(Source::User, "JUMP (x)")).is_err());
        let tx = s.sender();
        tx.send(Input::chain(Source::User, "NOTE (unclosed"));
        let status = s.step();
        assert_eq!(status.foci, 0);
    }

    #[test]
    fn focus_limit() {
        let mut cfg = CoreConfig::default();
        cfg.scheduler.max_foci = 1;
        let mut s = Scheduler::new(cfg, Library::new()).unwrap();
        s.submit(Input::chain(Source::User, "WAIT (hq \"open\" :obj door)"))
            .unwrap();
        assert!(s.submit(Input::note(Source::User, "(hq \"x\" :obj y)")).is_err());
    }

    #[test]
    fn run_until_idle_stops_early() {
        let mut s = sched("");
        s.submit(Input::chain(Source::User, "NOTE (hq \"a\" :obj X)\nNOTE (hq \"b\" :obj X)"))
            .unwrap();
        let ticks = s.run_until_idle(50);
        assert_eq!(ticks, 2);
        assert_eq!(s.verdicts(), &[(1, Status::Done)]);
    }

    #[test]
    fn budget_compares_whole_durations() {
        assert!(!over_budget(Duration::from_millis(50), 50));
        assert!(over_budget(Duration::from_micros(50_001), 50));
        assert!(over_budget(Duration::MAX, u64::MAX));
        assert!(!over_budget(Duration::ZERO, 0));
    }
}
