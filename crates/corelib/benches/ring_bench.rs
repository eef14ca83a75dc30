use std::sync::Arc;

use corelib::partitioner::{Blake3Partitioner, SipPartitioner, Xxh3Partitioner};
use corelib::{HashRing, Partitioner, DEFAULT_REPLICATION_FACTOR};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn build_ring(partitioner: Arc<dyn Partitioner>, members: usize) -> HashRing<String> {
    let mut ring = HashRing::new(partitioner, DEFAULT_REPLICATION_FACTOR).unwrap();
    for i in 0..members {
        ring.add(format!("10.0.{}.{}:9000", i / 256, i % 256)).unwrap();
    }
    ring
}

fn bench_find_n(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_n");
    for members in [3usize, 32, 256] {
        let ring = build_ring(Arc::new(SipPartitioner), members);
        for spread in [1usize, 3] {
            group.bench_with_input(
                BenchmarkId::new(format!("members={members}"), spread),
                &spread,
                |b, &spread| b.iter(|| ring.find_n(black_box(b"user-42"), spread).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_partitioners(c: &mut Criterion) {
    let partitioners: Vec<Arc<dyn Partitioner>> = vec![
        Arc::new(SipPartitioner),
        Arc::new(Xxh3Partitioner),
        Arc::new(Blake3Partitioner),
    ];

    let mut group = c.benchmark_group("add_member");
    for partitioner in partitioners {
        let ring = build_ring(Arc::clone(&partitioner), 32);
        group.bench_function(partitioner.name(), |b| {
            b.iter(|| {
                let mut ring = ring.clone();
                ring.add(black_box("10.1.0.1:9000".to_string())).unwrap();
                ring
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_find_n, bench_partitioners);
criterion_main!(benches);
