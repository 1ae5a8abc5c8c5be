//! Benchmarks for the pattern matcher.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use deliberator::config::MemoryConfig;
use deliberator::graph::text::parse_graphlet;
use deliberator::graph::{Band, Bindings};
use deliberator::library::Library;
use deliberator::memory::{MatchOpts, WorkingMemory};

/// Working memory with `n` cups, every third one clean.
fn populated(n: usize) -> WorkingMemory {
    let mut wm = WorkingMemory::new(&MemoryConfig::default()).unwrap();
    for i in 0..n {
        let text = if i % 3 == 0 {
            format!("(ako \"cup\" :obj C{i}) (hq \"clean\" :obj C{i})")
        } else {
            format!("(ako \"cup\" :obj C{i})")
        };
        let g = parse_graphlet(wm.pool_mut(), Some(Band::Main), &text).unwrap();
        wm.assert(None, &g, &mut Bindings::new(), 1.0, Band::Main)
            .unwrap();
    }
    wm
}

fn bench_find_first(c: &mut Criterion) {
    let mut wm = populated(500);
    let lib = Library::new();
    let pattern = parse_graphlet(
        wm.pool_mut(),
        Some(Band::Main),
        "(ako \"cup\" :obj ?x) (hq \"clean\" :obj ?x)",
    )
    .unwrap();
    let opts = MatchOpts::default();

    c.bench_function("find_first_join_500", |bench| {
        bench.iter(|| {
            black_box(
                wm.find_first(&lib, &pattern, &Bindings::new(), &opts)
                    .unwrap(),
            )
        })
    });
}

fn bench_find_all(c: &mut Criterion) {
    let mut wm = populated(500);
    let lib = Library::new();
    let pattern = parse_graphlet(wm.pool_mut(), Some(Band::Main), "(ako \"cup\" :obj ?x)").unwrap();
    let opts = MatchOpts::default();

    c.bench_function("find_all_500", |bench| {
        bench.iter(|| {
            black_box(
                wm.find_all(&lib, &pattern, &Bindings::new(), &opts, 1000)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_find_first, bench_find_all);
criterion_main!(benches);
