// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use promcore::{Counter, CounterVec, IntCounter, Opts};
use std::collections::HashMap;

fn bench_counter_inc(c: &mut Criterion) {
    let counter = Counter::new("bench_counter", "help").unwrap();
    c.bench_function("counter_inc", |b| b.iter(|| counter.inc()));
}

fn bench_int_counter_inc(c: &mut Criterion) {
    let counter = IntCounter::new("bench_int_counter", "help").unwrap();
    c.bench_function("int_counter_inc", |b| b.iter(|| counter.inc()));
}

fn bench_counter_vec_with_label_values(c: &mut Criterion) {
    let vec = CounterVec::new(
        Opts::new("bench_counter_vec", "help"),
        &["one", "two", "three"],
    )
    .unwrap();
    c.bench_function("counter_vec_with_label_values", |b| {
        b.iter(|| {
            vec.with_label_values(black_box(&["eins", "zwei", "drei"]))
                .inc()
        })
    });
}

fn bench_counter_vec_with(c: &mut Criterion) {
    let vec = CounterVec::new(
        Opts::new("bench_counter_vec_with", "help"),
        &["one", "two", "three"],
    )
    .unwrap();
    let mut labels = HashMap::new();
    labels.insert("one", "eins");
    labels.insert("two", "zwei");
    labels.insert("three", "drei");
    c.bench_function("counter_vec_with", |b| {
        b.iter(|| vec.with(black_box(&labels)).inc())
    });
}

criterion_group!(
    benches,
    bench_counter_inc,
    bench_int_counter_inc,
    bench_counter_vec_with_label_values,
    bench_counter_vec_with
);
criterion_main!(benches);
