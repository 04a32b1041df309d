//! Benchmark: change propagation through observed state

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use trellis_core::flush_ticks;
use trellis_core::reactive::{observe, Object, Value, WatchOptions, Watcher};

fn state(json: serde_json::Value) -> Object {
    let value = Value::from(json);
    observe(&value, false);
    value.as_object().cloned().unwrap_or_default()
}

fn reader(obj: &Object, options: WatchOptions) -> Watcher {
    let obj = obj.clone();
    Watcher::new(move || Ok(obj.get("n").unwrap_or_default()), options)
}

fn benchmark_sync_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_fan_out");

    for size in [1usize, 10, 100] {
        let obj = state(json!({"n": 0}));
        let _watchers: Vec<Watcher> = (0..size)
            .map(|_| reader(&obj, WatchOptions::default().with_sync()))
            .collect();

        let mut n = 0;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                n += 1;
                obj.set("n", black_box(n));
            })
        });
    }

    group.finish();
}

fn benchmark_batched_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_flush");

    for size in [10usize, 100, 1000] {
        let obj = state(json!({"n": 0}));
        let _watchers: Vec<Watcher> = (0..size)
            .map(|_| reader(&obj, WatchOptions::default()))
            .collect();

        let mut n = 0;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                // Ten writes, one run per watcher
                for _ in 0..10 {
                    n += 1;
                    obj.set("n", n);
                }
                flush_ticks();
            })
        });
    }

    group.finish();
}

fn benchmark_array_push(c: &mut Criterion) {
    c.bench_function("array_push_notify", |b| {
        b.iter_batched(
            || {
                let obj = state(json!({"items": []}));
                let reader = obj.clone();
                let watcher = Watcher::new(
                    move || {
                        let items = reader.get("items").unwrap_or_default();
                        Ok(Value::from(items.as_array().map_or(0, |a| a.len())))
                    },
                    WatchOptions::default().with_sync(),
                );
                (obj, watcher)
            },
            |(obj, _watcher)| {
                let items = obj.get("items").unwrap_or_default();
                if let Some(items) = items.as_array() {
                    for i in 0..100 {
                        items.push(json!({"id": i}));
                    }
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn benchmark_deep_watch(c: &mut Criterion) {
    let rows: Vec<serde_json::Value> = (0..100).map(|i| json!({"id": i, "tags": ["a", "b"]})).collect();
    let obj = state(json!({"rows": rows}));
    let _watcher = Watcher::from_path(&obj, "rows", |_, _| Ok(()), WatchOptions::user().with_deep());

    let rows = obj.get("rows").unwrap_or_default();
    c.bench_function("deep_watch_nested_write", |b| {
        let mut n = 0;
        b.iter(|| {
            n += 1;
            if let Some(row) = rows.as_array().and_then(|a| a.get(50)) {
                if let Some(row) = row.as_object() {
                    row.set("id", n);
                }
            }
            flush_ticks();
        })
    });
}

criterion_group!(
    benches,
    benchmark_sync_fan_out,
    benchmark_batched_flush,
    benchmark_array_push,
    benchmark_deep_watch
);
criterion_main!(benches);
