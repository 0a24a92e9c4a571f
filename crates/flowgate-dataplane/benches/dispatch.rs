//! Flow dispatch benchmarks: tuple hashing and ring lookup.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use flowgate_dataplane::ConsistentHashRing;
use flowgate_wire::hash::hash_tuple;
use flowgate_wire::FiveTuple;

fn bench_tuple_hash(c: &mut Criterion) {
    let tuple = FiveTuple::new(0xC0A8_0101, 0x0808_0808, 12345, 443, 6);
    c.bench_function("tuple_hash", |b| b.iter(|| hash_tuple(black_box(&tuple))));
}

fn bench_ring_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_lookup");
    for backends in [4u32, 16, 64] {
        let ring = ConsistentHashRing::new(150);
        for id in 1..=backends {
            ring.add(id, 100);
        }
        let tuple = FiveTuple::new(0xC0A8_0101, 0x0808_0808, 12345, 443, 6);
        group.bench_with_input(BenchmarkId::from_parameter(backends), &ring, |b, ring| {
            b.iter(|| ring.lookup(black_box(&tuple)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tuple_hash, bench_ring_lookup);
criterion_main!(benches);
