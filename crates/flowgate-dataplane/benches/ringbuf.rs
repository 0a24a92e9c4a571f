//! Ring-buffer hand-off benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use flowgate_dataplane::{MpmcRing, SpscRing};

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(1));

    let ring = SpscRing::new(1024);
    group.bench_function("push_pop", |b| {
        b.iter(|| {
            ring.push(black_box(42u64)).unwrap();
            black_box(ring.pop().unwrap());
        })
    });

    group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc");
    group.throughput(Throughput::Elements(1));

    let ring = MpmcRing::new(1024);
    group.bench_function("push_pop", |b| {
        b.iter(|| {
            ring.push(black_box(42u64)).unwrap();
            black_box(ring.pop().unwrap());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpmc);
criterion_main!(benches);
