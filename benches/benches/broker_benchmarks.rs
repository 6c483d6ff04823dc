use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use subpub::{Broker, BrokerConfig, Subscription};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

fn bench_publish_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_fanout");

    for subs in [0usize, 1, 10, 100] {
        let broker = Broker::<u64>::with_config(BrokerConfig {
            backlog_warn_threshold: 1 << 20,
        });
        let _subs: Vec<Subscription<u64>> = rt.block_on(async {
            (0..subs)
                .map(|_| {
                    broker
                        .subscribe("chan", |n: u64| async move {
                            black_box(n);
                        })
                        .unwrap()
                })
                .collect()
        });

        group.bench_with_input(BenchmarkId::from_parameter(subs), &subs, |b, _| {
            b.iter(|| broker.publish("chan", black_box(42)).unwrap())
        });

        rt.block_on(async {
            let _ = broker.close(Duration::from_secs(5)).await;
        });
    }
    group.finish();
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let rt = runtime();
    let broker = Broker::<u64>::new();

    c.bench_function("subscribe_unsubscribe", |b| {
        b.to_async(&rt).iter(|| async {
            let sub = broker.subscribe("chan", |_: u64| async {}).unwrap();
            sub.unsubscribe();
        })
    });

    rt.block_on(async {
        let _ = broker.close(Duration::from_secs(5)).await;
    });
}

fn bench_close(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("close_100_idle_subscriptions", |b| {
        b.to_async(&rt).iter(|| async {
            let broker = Broker::<u64>::new();
            let _subs: Vec<_> = (0..100)
                .map(|_| broker.subscribe("chan", |_: u64| async {}).unwrap())
                .collect();
            broker.close(Duration::from_secs(5)).await.unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_publish_fanout,
    bench_subscribe_unsubscribe,
    bench_close
);
criterion_main!(benches);
