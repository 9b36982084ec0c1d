//! Benchmarks for node firing and connector throughput
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dataflow_rs::{
    Actor, BoundedQueue, Dataflow, InlineExecutor, MulticastStream, Node, StreamPublisher,
    StreamSubscriber, Subscription,
};
use std::sync::Arc;

fn inline() -> Dataflow {
    Dataflow::builder().executor(Arc::new(InlineExecutor)).build()
}

fn bench_node_firing(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_firing");

    for ports in [1usize, 8, 64].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("one_shot", ports), ports, |b, &ports| {
            b.iter(|| {
                let dataflow = inline();
                let node = Node::<usize>::new(&dataflow);
                let inputs: Vec<_> = (0..ports).map(|_| node.scalar_input::<usize>()).collect();
                node.set_action(|| Ok(1));
                node.start().unwrap();
                for (i, input) in inputs.iter().enumerate() {
                    input.post(i).unwrap();
                }
                black_box(node.result().get().unwrap())
            });
        });
    }

    group.bench_function("actor_rounds_1000", |b| {
        b.iter(|| {
            let dataflow = inline();
            let actor = Actor::<u32>::new(&dataflow);
            let mut rounds = 0;
            actor.set_action(move |ctx| {
                rounds += 1;
                if rounds == 1000 {
                    ctx.complete(rounds);
                }
                Ok(())
            });
            actor.start().unwrap();
            black_box(actor.result().get().unwrap())
        });
    });

    group.finish();
}

fn bench_queue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_throughput");

    for capacity in [1usize, 16, 256].iter() {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::new("offer_poll", capacity),
            capacity,
            |b, &capacity| {
                let queue = BoundedQueue::new(capacity).unwrap();
                b.iter(|| {
                    for i in 0..1000u64 {
                        if queue.offer(i).is_err() {
                            while queue.poll().is_some() {}
                            let _ = queue.offer(i);
                        }
                    }
                    while let Some(v) = queue.poll() {
                        black_box(v);
                    }
                });
            },
        );
    }

    group.finish();
}

struct Counting;

impl StreamSubscriber<u64> for Counting {
    fn on_subscribe(&self, subscription: Subscription) {
        let _ = subscription.request(u64::MAX);
    }

    fn on_next(&self, item: u64) {
        black_box(item);
    }
}

fn bench_multicast_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("multicast_fanout");

    for subscribers in [1usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::new("emit", subscribers),
            subscribers,
            |b, &subscribers| {
                b.iter(|| {
                    let stream = MulticastStream::<u64>::new();
                    for _ in 0..subscribers {
                        let _ = stream.subscribe(Arc::new(Counting));
                    }
                    for i in 0..1000 {
                        stream.emit(i).unwrap();
                    }
                    stream.complete();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_node_firing,
    bench_queue_throughput,
    bench_multicast_fanout
);
criterion_main!(benches);
