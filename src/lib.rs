// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

/*!
The core [Prometheus](https://prometheus.io/) instrumentation runtime:
metric types, label-partitioned vectors, and a registry that gathers
everything into a sorted snapshot for exposition.

Application code declares counters, gauges, histograms, and summaries,
registers them with a [`Registry`] (or the process-wide default one), and
observes values from any thread. An exposition layer asks the registry to
[`gather`](Registry::gather) and encodes the returned
[`MetricFamily`](model::MetricFamily) snapshots; no encoder ships with
this crate.

```
use promcore::{Opts, Registry, CounterVec};

let registry = Registry::new();
let requests = CounterVec::new(
    Opts::new("http_requests_total", "Total HTTP requests."),
    &["method", "code"],
).unwrap();
registry.register(Box::new(requests.clone())).unwrap();

requests.with_label_values(&["GET", "200"]).inc();

let families = registry.gather();
assert_eq!(families[0].name(), "http_requests_total");
```
*/

mod atomic64;
mod errors;
#[macro_use]
mod macros;
mod counter;
mod desc;
mod gauge;
mod histogram;
mod labels;
mod metrics;
mod quantile;
mod registry;
mod summary;
mod untyped;
mod value;
mod vec;

pub mod local;
pub mod model;

pub use self::atomic64::{Atomic, AtomicF64, AtomicI64, AtomicU64, Number};
pub use self::counter::{
    Counter, CounterVec, CounterVecBuilder, GenericCounter, GenericCounterVec, IntCounter,
    IntCounterVec,
};
pub use self::desc::{Desc, Describer};
pub use self::errors::{Error, ExistingCollector, MultiError, Result};
pub use self::gauge::{
    Gauge, GaugeFunc, GaugeVec, GaugeVecBuilder, GenericGauge, GenericGaugeVec, IntGauge,
    IntGaugeVec,
};
pub use self::histogram::{
    exponential_buckets, linear_buckets, Histogram, HistogramOpts, HistogramTimer, HistogramVec,
    HistogramVecBuilder, NativeHistogramOpts, BUCKET_LABEL, DEFAULT_BUCKETS,
    DEFAULT_NATIVE_ZERO_THRESHOLD, NATIVE_SCHEMA_MAX, NATIVE_SCHEMA_MIN,
};
pub use self::labels::{
    hash_label_values, hash_labels, hash_new, is_valid_label_name, is_valid_label_value,
    is_valid_metric_name, SEPARATOR_BYTE,
};
pub use self::metrics::{Collector, Metric, Opts};
pub use self::model::{MetricFamily, MetricType};
pub use self::registry::{
    default_registry, gather, register, unregister, Gathered, Gatherer, Registry,
};
pub use self::summary::{
    Summary, SummaryOpts, SummaryVec, SummaryVecBuilder, DEFAULT_AGE_BUCKETS, DEFAULT_BUF_CAP,
    DEFAULT_MAX_AGE, QUANTILE_LABEL,
};
pub use self::untyped::Untyped;
pub use self::vec::{MetricVec, MetricVecBuilder};
