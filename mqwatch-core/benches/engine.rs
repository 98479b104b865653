//! Engine micro-benchmarks.
//!
//! Measures the hot paths a long-running watchdog leans on: history
//! retention, listener callbacks, and in-process delivery through the
//! test network.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use mqwatch_core::{
    testkit::TestNetwork, BoundedHistory, BrokerEndpoint, ConnectOptions, Destination,
    EventListener, Headers, Message, Session,
};

/// History capacities exercised by the retention benchmarks.
const HISTORY_CAPACITIES: &[usize] = &[16, 100, 1024];

/// Messages pushed per iteration.
const APPEND_COUNT: usize = 10_000;

fn sample_message(i: usize) -> Message {
    let mut headers = Headers::new();
    headers.insert("seq".to_owned(), i.to_string());
    Message::new(headers, format!("payload-{i:08}"))
}

/// Benchmark bounded-history retention under sustained appends.
fn bench_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");

    for &capacity in HISTORY_CAPACITIES {
        group.throughput(Throughput::Elements(APPEND_COUNT as u64));
        group.bench_with_input(
            BenchmarkId::new("append", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let mut history = BoundedHistory::new(capacity);
                    for i in 0..APPEND_COUNT {
                        history.append(i);
                    }
                    criterion::black_box(history.len())
                });
            },
        );
    }

    group.bench_function("snapshot_at_capacity", |b| {
        let mut history = BoundedHistory::new(100);
        for i in 0..200 {
            history.append(sample_message(i));
        }
        b.iter(|| criterion::black_box(history.snapshot().len()));
    });

    group.finish();
}

/// Benchmark listener callbacks feeding the histories.
fn bench_listener(c: &mut Criterion) {
    let mut group = c.benchmark_group("listener");
    let destination = Destination::new("/queue/bench").unwrap();

    group.throughput(Throughput::Elements(APPEND_COUNT as u64));
    group.bench_function("on_message", |b| {
        b.iter(|| {
            let listener = EventListener::new("bench", destination.clone(), 100);
            for i in 0..APPEND_COUNT {
                listener.on_message(sample_message(i));
            }
            criterion::black_box(listener.received_count())
        });
    });

    group.bench_function("received_count_under_poll", |b| {
        let listener = EventListener::new("bench", destination.clone(), 100);
        for i in 0..100 {
            listener.on_message(sample_message(i));
        }
        b.iter(|| criterion::black_box(listener.received_count()));
    });

    group.finish();
}

/// Benchmark in-process delivery through a session.
fn bench_delivery(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("delivery");

    for &batch in &[10usize, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("send_and_arrive", batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| async move {
                let network = TestNetwork::new();
                let destination = Destination::new("/queue/bench").unwrap();
                let mut session = Session::new(
                    "bench",
                    BrokerEndpoint::new("mq.bench", 61613),
                    ConnectOptions::default(),
                    network.factory(),
                );

                session.create_consumer(&destination, Duration::from_secs(1)).await.unwrap();
                for i in 0..batch {
                    session
                        .send_message(&destination, Headers::new(), format!("payload-{i}"))
                        .await
                        .unwrap();
                }
                // Spin on the history instead of the engine wait so the
                // measurement tracks delivery, not poll granularity.
                loop {
                    if session.messages(&destination).len() >= batch {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                criterion::black_box(session.messages(&destination).len())
            });
        });
    }

    group.finish();
}

criterion_group!(engine_benches, bench_history, bench_listener, bench_delivery);
criterion_main!(engine_benches);
