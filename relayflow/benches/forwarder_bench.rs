//! Benchmarks for forwarder throughput.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relayflow::prelude::*;
use relayflow::stages::BATCH_GROUP_OPTION;
use serde_json::json;

const MESSAGES: usize = 256;

async fn run_passthrough(queue_size: usize) {
    let (forwarder, mut reports) = ForwarderBuilder::new(Config::new().with_queue_size(queue_size))
        .stage(Passthrough::new())
        .run()
        .unwrap();

    for i in 0..MESSAGES {
        forwarder
            .produce(b"payload".to_vec(), Options::new(), json!(i))
            .await
            .unwrap();
    }
    for _ in 0..MESSAGES {
        reports.recv().await.unwrap();
    }
}

async fn run_batched(limit: usize) {
    let (forwarder, mut reports) = ForwarderBuilder::new(Config::new().with_queue_size(1000))
        .stage(Batcher::new(BatchConfig::new().with_limit(limit).with_timeout_ms(50)))
        .run()
        .unwrap();

    for i in 0..MESSAGES {
        let mut options = Options::new();
        options.insert(BATCH_GROUP_OPTION.into(), json!("bench"));
        forwarder
            .produce(b"payload".to_vec(), options, json!(i))
            .await
            .unwrap();
    }
    for _ in 0..MESSAGES {
        reports.recv().await.unwrap();
    }
}

fn forwarder_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("passthrough_queue");
    group.throughput(Throughput::Elements(MESSAGES as u64));
    for queue_size in [1usize, 10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(queue_size),
            &queue_size,
            |b, &queue_size| {
                b.iter(|| rt.block_on(run_passthrough(queue_size)));
            },
        );
    }
    group.finish();

    // Limits that divide the message count, so no wave waits for the
    // time window.
    let mut group = c.benchmark_group("batch_limit");
    group.throughput(Throughput::Elements(MESSAGES as u64));
    for limit in [1usize, 16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| rt.block_on(run_batched(limit)));
        });
    }
    group.finish();
}

criterion_group!(benches, forwarder_benchmark);
criterion_main!(benches);
