// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::convert::From;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::atomic64::{Atomic, AtomicF64, AtomicI64, AtomicU64};
use crate::desc::{Desc, Describer};
use crate::errors::{Error, Result};
use crate::metrics::{Collector, Metric, Opts};
use crate::model;
use crate::model::{Bucket, BucketSpan, HistogramValue, MetricFamily, MetricType, MetricValue};
use crate::value::{make_exemplar, make_label_pairs};
use crate::vec::{MetricVec, MetricVecBuilder};

/// The default [`Histogram`] buckets. The default buckets are tailored to
/// broadly measure the response time (in seconds) of a network service.
/// Most likely, however, you will be required to define buckets customized
/// to your use case.
pub const DEFAULT_BUCKETS: &[f64; 11] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Used for the label that defines the upper bound of a bucket of a
/// histogram ("le" -> "less or equal").
pub const BUCKET_LABEL: &str = "le";

/// Smallest permitted native-histogram schema (widest buckets, factor
/// 65536 between bounds).
pub const NATIVE_SCHEMA_MIN: i32 = -4;

/// Largest permitted native-histogram schema (narrowest buckets, factor
/// 2^(1/256) between bounds).
pub const NATIVE_SCHEMA_MAX: i32 = 8;

/// Default threshold below which observations (by absolute value) land in
/// the native zero bucket: 2^-128.
pub const DEFAULT_NATIVE_ZERO_THRESHOLD: f64 = 2.938_735_877_055_718_8e-39;

#[inline]
fn check_bucket_label(label: &str) -> Result<()> {
    if label == BUCKET_LABEL {
        return Err(Error::Msg(
            "`le` is not allowed as label name in histograms".to_owned(),
        ));
    }

    Ok(())
}

// With the native representation enabled an empty bucket list stays empty;
// classic-only histograms fall back to the defaults.
fn check_and_adjust_buckets(mut buckets: Vec<f64>, native: bool) -> Result<Vec<f64>> {
    if buckets.is_empty() {
        if native {
            return Ok(buckets);
        }
        buckets = Vec::from(DEFAULT_BUCKETS as &'static [f64]);
    }

    for (i, upper_bound) in buckets.iter().enumerate() {
        if i < (buckets.len() - 1) && *upper_bound >= buckets[i + 1] {
            return Err(Error::Msg(format!(
                "histogram buckets must be in increasing \
                 order: {} >= {}",
                upper_bound,
                buckets[i + 1]
            )));
        }
    }

    let tail = *buckets.last().unwrap();
    if tail.is_sign_positive() && tail.is_infinite() {
        // The +Inf bucket is implicit. Remove it here.
        buckets.pop();
    }

    Ok(buckets)
}

/// Configuration of the exponential-bucket (native) representation of a
/// [`Histogram`].
#[derive(Clone, Debug)]
pub struct NativeHistogramOpts {
    /// Resolution of the exponential schema: bucket boundaries grow by a
    /// factor of 2^(2^-schema). Must lie in
    /// [`NATIVE_SCHEMA_MIN`]..=[`NATIVE_SCHEMA_MAX`].
    pub schema: i32,

    /// Observations with an absolute value at or below this threshold are
    /// counted in the zero bucket.
    pub zero_threshold: f64,

    /// Upper limit on the number of active buckets before the schema
    /// coarsens. 0 disables the limit.
    pub max_buckets: usize,

    /// Minimum time between two coarsening steps. Zero disables the
    /// throttle.
    pub min_reset_duration: Duration,
}

impl Default for NativeHistogramOpts {
    fn default() -> NativeHistogramOpts {
        NativeHistogramOpts {
            schema: 3,
            zero_threshold: DEFAULT_NATIVE_ZERO_THRESHOLD,
            max_buckets: 160,
            min_reset_duration: Duration::from_secs(0),
        }
    }
}

impl NativeHistogramOpts {
    /// Create native options with the given schema and the remaining
    /// fields at their defaults.
    pub fn new(schema: i32) -> NativeHistogramOpts {
        NativeHistogramOpts {
            schema,
            ..NativeHistogramOpts::default()
        }
    }

    /// `zero_threshold` sets the zero-bucket threshold.
    pub fn zero_threshold(mut self, zero_threshold: f64) -> Self {
        self.zero_threshold = zero_threshold;
        self
    }

    /// `max_buckets` sets the active-bucket limit.
    pub fn max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    /// `min_reset_duration` sets the coarsening throttle.
    pub fn min_reset_duration(mut self, min_reset_duration: Duration) -> Self {
        self.min_reset_duration = min_reset_duration;
        self
    }
}

/// A struct that bundles the options for creating a [`Histogram`] metric.
/// It is mandatory to set Name and Help to a non-empty string. All other
/// fields are optional and can safely be left at their zero value.
#[derive(Clone)]
pub struct HistogramOpts {
    pub common_opts: Opts,

    /// Defines the buckets into which observations are counted. Each
    /// element in the slice is the upper inclusive bound of a bucket. The
    /// values must be sorted in strictly increasing order. There is no
    /// need to add a highest bucket with +Inf bound, it will be added
    /// implicitly. The default value is DEFAULT_BUCKETS. Set it to an
    /// empty vector together with `native` for a purely native histogram.
    pub buckets: Vec<f64>,

    /// Enables the exponential-bucket representation alongside (or instead
    /// of) the classic buckets.
    pub native: Option<NativeHistogramOpts>,
}

impl HistogramOpts {
    /// Create a [`HistogramOpts`] with the `name` and `help` arguments.
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, help: S2) -> HistogramOpts {
        HistogramOpts {
            common_opts: Opts::new(name, help),
            buckets: Vec::from(DEFAULT_BUCKETS as &'static [f64]),
            native: None,
        }
    }

    /// `namespace` sets the namespace.
    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.common_opts.namespace = namespace.into();
        self
    }

    /// `subsystem` sets the sub system.
    pub fn subsystem<S: Into<String>>(mut self, subsystem: S) -> Self {
        self.common_opts.subsystem = subsystem.into();
        self
    }

    /// `const_labels` sets the const labels.
    pub fn const_labels(mut self, const_labels: HashMap<String, String>) -> Self {
        self.common_opts = self.common_opts.const_labels(const_labels);
        self
    }

    /// `const_label` adds a const label.
    pub fn const_label<S1: Into<String>, S2: Into<String>>(mut self, name: S1, value: S2) -> Self {
        self.common_opts = self.common_opts.const_label(name, value);
        self
    }

    /// `variable_labels` sets the variable labels.
    pub fn variable_labels(mut self, variable_labels: Vec<String>) -> Self {
        self.common_opts = self.common_opts.variable_labels(variable_labels);
        self
    }

    /// `variable_label` adds a variable label.
    pub fn variable_label<S: Into<String>>(mut self, name: S) -> Self {
        self.common_opts = self.common_opts.variable_label(name);
        self
    }

    /// `fq_name` returns the fq_name.
    pub fn fq_name(&self) -> String {
        self.common_opts.fq_name()
    }

    /// `buckets` set the buckets.
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = buckets;
        self
    }

    /// `native` enables the exponential-bucket representation. Combine
    /// with `.buckets(vec![])` to drop the classic buckets entirely.
    pub fn native(mut self, native: NativeHistogramOpts) -> Self {
        self.native = Some(native);
        self
    }
}

impl Describer for HistogramOpts {
    fn describe(&self) -> Result<Desc> {
        self.common_opts.describe()
    }
}

impl From<Opts> for HistogramOpts {
    fn from(opts: Opts) -> HistogramOpts {
        HistogramOpts {
            common_opts: opts,
            buckets: Vec::from(DEFAULT_BUCKETS as &'static [f64]),
            native: None,
        }
    }
}

#[derive(Default)]
struct NativeBuckets {
    positive: BTreeMap<i32, u64>,
    negative: BTreeMap<i32, u64>,
    zero: u64,
}

// One half of the double buffer. `count` tracks finished observations and
// is the reader's signal that all in-flight writers have drained.
struct Shard {
    sum: AtomicF64,
    count: AtomicU64,
    buckets: Vec<AtomicU64>,
    native: Mutex<NativeBuckets>,
}

impl Shard {
    fn new(num_buckets: usize) -> Shard {
        let mut buckets = Vec::with_capacity(num_buckets);
        for _ in 0..num_buckets {
            buckets.push(AtomicU64::new(0));
        }
        Shard {
            sum: AtomicF64::new(0.0),
            count: AtomicU64::new(0),
            buckets,
            native: Mutex::new(NativeBuckets::default()),
        }
    }
}

struct NativeConfig {
    schema: AtomicI64,
    zero_threshold: f64,
    max_buckets: usize,
    min_reset_duration: Duration,
    last_adjust: Mutex<Instant>,
}

const HOT_BIT: u64 = 1 << 63;
const COUNT_MASK: u64 = HOT_BIT - 1;

pub struct HistogramCore {
    desc: Desc,
    label_pairs: Vec<model::LabelPair>,

    upper_bounds: Vec<f64>,
    // One slot per classic bucket plus the implicit +Inf bucket.
    exemplars: Vec<RwLock<Option<model::Exemplar>>>,

    native: Option<NativeConfig>,

    // Bit 63 selects the hot shard; the low 63 bits count started
    // observations. Snapshots flip the bit, wait for the cold shard to
    // drain, read it, and fold it back into the hot shard.
    shard_and_count: AtomicU64,
    shards: [Shard; 2],

    // Serializes snapshots with each other and with schema maintenance.
    collect_lock: Mutex<()>,
}

impl HistogramCore {
    pub fn new(opts: &HistogramOpts, label_values: &[&str]) -> Result<HistogramCore> {
        let desc = opts.describe()?;

        for name in &desc.variable_labels {
            check_bucket_label(name)?;
        }
        for pair in &desc.const_label_pairs {
            check_bucket_label(pair.name())?;
        }
        let label_pairs = make_label_pairs(&desc, label_values)?;

        let buckets = check_and_adjust_buckets(opts.buckets.clone(), opts.native.is_some())?;

        let native = match &opts.native {
            Some(n) => {
                if n.schema < NATIVE_SCHEMA_MIN || n.schema > NATIVE_SCHEMA_MAX {
                    return Err(Error::Msg(format!(
                        "native histogram schema {} outside [{}, {}]",
                        n.schema, NATIVE_SCHEMA_MIN, NATIVE_SCHEMA_MAX
                    )));
                }
                if !(n.zero_threshold >= 0.0) {
                    return Err(Error::Msg(format!(
                        "native histogram zero threshold {} must be >= 0",
                        n.zero_threshold
                    )));
                }
                Some(NativeConfig {
                    schema: AtomicI64::new(i64::from(n.schema)),
                    zero_threshold: n.zero_threshold,
                    max_buckets: n.max_buckets,
                    min_reset_duration: n.min_reset_duration,
                    last_adjust: Mutex::new(Instant::now()),
                })
            }
            None => None,
        };

        let mut exemplars = Vec::with_capacity(buckets.len() + 1);
        for _ in 0..=buckets.len() {
            exemplars.push(RwLock::new(None));
        }

        Ok(HistogramCore {
            desc,
            label_pairs,
            shards: [Shard::new(buckets.len()), Shard::new(buckets.len())],
            upper_bounds: buckets,
            exemplars,
            native,
            shard_and_count: AtomicU64::new(0),
            collect_lock: Mutex::new(()),
        })
    }

    pub fn observe(&self, v: f64) {
        // Learn the hot shard and announce one started observation in a
        // single atomic step.
        let n = self
            .shard_and_count
            .inc_by_with_ordering(1, Ordering::Acquire);
        let hot = &self.shards[(n >> 63) as usize];

        if let Some(i) = self.find_bucket(v) {
            hot.buckets[i].inc_by(1);
        }

        let mut over_limit = false;
        if let Some(cfg) = &self.native {
            let mut nb = hot.native.lock();
            // The schema must be read under the shard lock: coarsening
            // flips it only while holding both shard locks, so a key
            // inserted here is always folded exactly once.
            let schema = cfg.schema.get() as i32;
            if v.is_nan() {
                // Carried by count and sum only.
            } else if v.abs() <= cfg.zero_threshold {
                nb.zero += 1;
            } else {
                let key = native_bucket_key(v.abs(), schema);
                let map = if v > 0.0 {
                    &mut nb.positive
                } else {
                    &mut nb.negative
                };
                *map.entry(key).or_insert(0) += 1;
            }
            over_limit = cfg.max_buckets > 0 && nb.positive.len() + nb.negative.len() > cfg.max_buckets;
        }

        hot.sum.inc_by(v);
        // Publish the finished observation to the snapshot side. This must
        // happen before any schema maintenance: a concurrent snapshot holds
        // the collect lock while it waits for this count.
        hot.count.inc_by_with_ordering(1, Ordering::Release);

        if over_limit {
            if let Some(cfg) = &self.native {
                self.coarsen_native_schema(cfg);
            }
        }
    }

    /// Observe `v` and attach an exemplar to the bucket it lands in
    /// (last-write-wins per bucket).
    pub fn observe_with_exemplar(&self, v: f64, labels: &HashMap<&str, &str>) -> Result<()> {
        let e = make_exemplar(labels, v)?;
        self.observe(v);
        let slot = self.find_bucket(v).unwrap_or(self.upper_bounds.len());
        *self.exemplars[slot].write() = Some(e);
        Ok(())
    }

    fn find_bucket(&self, v: f64) -> Option<usize> {
        self.upper_bounds.iter().position(|b| v <= *b)
    }

    // Fold a batch of locally buffered observations into the hot shard.
    // The whole batch is announced in one atomic step, so a concurrent
    // snapshot either waits for all of it or sees none of it.
    pub(crate) fn flush_local(&self, bucket_counts: &[u64], count: u64, sum: f64) {
        if count == 0 {
            return;
        }

        let n = self
            .shard_and_count
            .inc_by_with_ordering(count, Ordering::Acquire);
        let hot = &self.shards[(n >> 63) as usize];

        for (bucket, c) in hot.buckets.iter().zip(bucket_counts) {
            if *c > 0 {
                bucket.inc_by(*c);
            }
        }
        hot.sum.inc_by(sum);
        hot.count.inc_by_with_ordering(count, Ordering::Release);
    }

    // Take a self-consistent snapshot: flip the hot shard, wait for the
    // writers still inside the now-cold shard, read it, then fold the cold
    // values back into the hot shard so totals stay cumulative.
    pub fn snapshot(&self) -> HistogramValue {
        let _guard = self.collect_lock.lock();

        let old = self
            .shard_and_count
            .inc_by_with_ordering(HOT_BIT, Ordering::AcqRel);
        let started = old & COUNT_MASK;
        let cold = &self.shards[(old >> 63) as usize];
        let hot = &self.shards[((old >> 63) ^ 1) as usize];

        while cold.count.load_with_ordering(Ordering::Acquire) != started {
            thread::yield_now();
        }

        let sample_count = cold.count.get();
        let sample_sum = cold.sum.get();

        let mut cumulative = 0;
        let mut buckets = Vec::with_capacity(self.upper_bounds.len());
        for (i, upper_bound) in self.upper_bounds.iter().enumerate() {
            cumulative += cold.buckets[i].get();
            buckets.push(Bucket {
                upper_bound: *upper_bound,
                cumulative_count: cumulative,
                exemplar: self.exemplars[i].read().clone(),
            });
        }

        let mut value = HistogramValue {
            sample_count,
            sample_sum,
            buckets,
            ..HistogramValue::default()
        };

        if let Some(cfg) = &self.native {
            let mut cold_native = cold.native.lock();
            value.schema = Some(cfg.schema.get() as i32);
            value.zero_threshold = cfg.zero_threshold;
            value.zero_count = cold_native.zero;
            let (pos_spans, pos_deltas) = spans_and_deltas(&cold_native.positive);
            value.positive_spans = pos_spans;
            value.positive_deltas = pos_deltas;
            let (neg_spans, neg_deltas) = spans_and_deltas(&cold_native.negative);
            value.negative_spans = neg_spans;
            value.negative_deltas = neg_deltas;

            let mut hot_native = hot.native.lock();
            hot_native.zero += cold_native.zero;
            for (k, v) in cold_native.positive.iter() {
                *hot_native.positive.entry(*k).or_insert(0) += v;
            }
            for (k, v) in cold_native.negative.iter() {
                *hot_native.negative.entry(*k).or_insert(0) += v;
            }
            *cold_native = NativeBuckets::default();
        }

        // Fold the cold shard back into the hot one.
        hot.sum.inc_by(cold.sum.swap(0.0, Ordering::AcqRel));
        for (hot_bucket, cold_bucket) in hot.buckets.iter().zip(&cold.buckets) {
            let v = cold_bucket.get();
            cold_bucket.set(0);
            hot_bucket.inc_by(v);
        }
        let finished = cold.count.get();
        cold.count.set(0);
        hot.count.inc_by_with_ordering(finished, Ordering::Release);

        value
    }

    // Halve the native resolution: bump the schema down one step and
    // re-fold the buckets of both shards. Throttled by min_reset_duration.
    fn coarsen_native_schema(&self, cfg: &NativeConfig) {
        let _guard = self.collect_lock.lock();

        let schema = cfg.schema.get() as i32;
        if schema <= NATIVE_SCHEMA_MIN {
            return;
        }

        // Re-check the pressure under the maintenance lock; a concurrent
        // coarsening step may already have resolved it.
        let n = self.shard_and_count.load_with_ordering(Ordering::Relaxed);
        let hot = &self.shards[(n >> 63) as usize];
        {
            let nb = hot.native.lock();
            if nb.positive.len() + nb.negative.len() <= cfg.max_buckets {
                return;
            }
        }

        let now = Instant::now();
        let mut last_adjust = cfg.last_adjust.lock();
        if cfg.min_reset_duration.as_nanos() > 0
            && now.duration_since(*last_adjust) < cfg.min_reset_duration
        {
            return;
        }
        *last_adjust = now;

        // Writers read the schema under their shard's native lock and
        // never hold more than one lock, so taking both locks before the
        // schema flips leaves no window in which a writer could insert a
        // coarse key into a shard that still gets folded below.
        let mut nb0 = self.shards[0].native.lock();
        let mut nb1 = self.shards[1].native.lock();
        cfg.schema.set(i64::from(schema - 1));
        nb0.positive = coarsen_buckets(&nb0.positive);
        nb0.negative = coarsen_buckets(&nb0.negative);
        nb1.positive = coarsen_buckets(&nb1.positive);
        nb1.negative = coarsen_buckets(&nb1.negative);
    }
}

// Bucket key for |v| under the given schema. Bucket k covers the interval
// (base^(k-1), base^k] with base = 2^(2^-schema).
fn native_bucket_key(v: f64, schema: i32) -> i32 {
    if v.is_infinite() {
        return i32::MAX;
    }
    let (frac, exp) = frexp(v);
    if schema > 0 {
        let bounds = native_bounds(schema);
        let idx = match bounds.binary_search_by(|b| b.partial_cmp(&frac).unwrap()) {
            Ok(i) => i,
            Err(i) => i,
        };
        idx as i32 + (exp - 1) * bounds.len() as i32
    } else {
        let mut key = exp;
        if frac == 0.5 {
            key -= 1;
        }
        let offset = (1i32 << -schema) - 1;
        (key + offset) >> -schema
    }
}

// v = frac * 2^exp with frac in [0.5, 1). Defined for finite v > 0.
fn frexp(v: f64) -> (f64, i32) {
    const EXP_MASK: u64 = 0x7ff0_0000_0000_0000;
    let bits = v.to_bits();
    let biased = ((bits & EXP_MASK) >> 52) as i32;
    if biased == 0 {
        // Subnormal: normalize first.
        let (frac, exp) = frexp(v * 2f64.powi(54));
        return (frac, exp - 54);
    }
    let exp = biased - 1022;
    let frac = f64::from_bits((bits & !EXP_MASK) | (1022u64 << 52));
    (frac, exp)
}

// Fraction thresholds per positive schema: bounds[i] = 2^(i / 2^schema - 1),
// covering [0.5, 1).
fn native_bounds(schema: i32) -> &'static [f64] {
    lazy_static::lazy_static! {
        static ref BOUNDS: Vec<Vec<f64>> = (0..=NATIVE_SCHEMA_MAX)
            .map(|s| {
                let len = 1usize << s;
                (0..len)
                    .map(|i| 2f64.powf(i as f64 / len as f64 - 1.0))
                    .collect()
            })
            .collect();
    }
    &BOUNDS[schema as usize]
}

// Key mapping when the schema decreases by one: bucket k of the fine
// schema folds into bucket ceil(k / 2) of the coarse one.
fn coarsen_buckets(buckets: &BTreeMap<i32, u64>) -> BTreeMap<i32, u64> {
    let mut coarse = BTreeMap::new();
    for (&k, &count) in buckets {
        let nk = if k == i32::MAX {
            i32::MAX
        } else {
            (k + 1).div_euclid(2)
        };
        *coarse.entry(nk).or_insert(0) += count;
    }
    coarse
}

// Delta-encode a sparse bucket map into spans of consecutive keys.
fn spans_and_deltas(buckets: &BTreeMap<i32, u64>) -> (Vec<BucketSpan>, Vec<i64>) {
    let mut spans: Vec<BucketSpan> = Vec::new();
    let mut deltas = Vec::new();
    let mut prev_count = 0i64;
    let mut prev_key: Option<i32> = None;

    for (&key, &count) in buckets {
        match prev_key {
            Some(pk) if key == pk + 1 => {
                spans.last_mut().unwrap().length += 1;
            }
            Some(pk) => {
                spans.push(BucketSpan {
                    offset: key - pk - 1,
                    length: 1,
                });
            }
            None => {
                spans.push(BucketSpan {
                    offset: key,
                    length: 1,
                });
            }
        }
        deltas.push(count as i64 - prev_count);
        prev_count = count as i64;
        prev_key = Some(key);
    }
    (spans, deltas)
}

/// A struct represents an event being timed. When the timer goes out of
/// scope, the duration will be observed, or call `observe_duration` to
/// manually observe.
///
/// NOTICE: A timer can be observed only once (automatically or manually).
#[must_use = "Timer should be kept in a variable otherwise it cannot observe duration"]
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl HistogramTimer {
    fn new(histogram: Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram,
            start: Instant::now(),
        }
    }

    /// `observe_duration` observes the amount of time in seconds since
    /// [`Histogram::start_timer`] was called.
    pub fn observe_duration(self) {
        drop(self);
    }

    fn observe(&mut self) {
        let v = duration_to_seconds(self.start.elapsed());
        self.histogram.observe(v)
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.observe();
    }
}

/// A [`Metric`] counts individual observations from an event or sample
/// stream in configurable buckets. Similar to a
/// [`Summary`](crate::Summary), it also provides a sum of observations and
/// an observation count.
///
/// On the Prometheus server, quantiles can be calculated from a
/// [`Histogram`] using the `histogram_quantile` function in the query
/// language.
///
/// Note that Histograms, in contrast to Summaries, can be aggregated with
/// the Prometheus query language. However, Histograms require the user to
/// pre-define suitable buckets (or use the native exponential buckets),
/// and they are in general less accurate.
#[derive(Clone)]
pub struct Histogram {
    core: Arc<HistogramCore>,
}

impl Histogram {
    /// `with_opts` creates a [`Histogram`] with the `opts` options.
    pub fn with_opts(opts: HistogramOpts) -> Result<Histogram> {
        Histogram::with_opts_and_label_values(&opts, &[])
    }

    fn with_opts_and_label_values(
        opts: &HistogramOpts,
        label_values: &[&str],
    ) -> Result<Histogram> {
        let core = HistogramCore::new(opts, label_values)?;

        Ok(Histogram {
            core: Arc::new(core),
        })
    }
}

impl Histogram {
    /// Add a single observation to the [`Histogram`].
    pub fn observe(&self, v: f64) {
        self.core.observe(v)
    }

    /// Add a single observation and attach an exemplar to the bucket it
    /// falls into. The bucket's previous exemplar, if any, is replaced.
    ///
    /// # Panics
    ///
    /// Panics if an exemplar label name is invalid or the exemplar's label
    /// text exceeds the 128 byte budget.
    pub fn observe_with_exemplar(&self, v: f64, labels: &HashMap<&str, &str>) {
        self.core.observe_with_exemplar(v, labels).unwrap();
    }

    /// Return a [`HistogramTimer`] to track a duration.
    pub fn start_timer(&self) -> HistogramTimer {
        HistogramTimer::new(self.clone())
    }

    /// Return a [`LocalHistogram`](crate::local::LocalHistogram) for single
    /// thread usage.
    ///
    /// # Panics
    ///
    /// Panics if the histogram has the native representation enabled:
    /// local histograms buffer classic bucket counts only and cannot
    /// reconstruct the values a native flush would need.
    pub fn local(&self) -> LocalHistogram {
        LocalHistogram::new(self.clone())
    }
}

impl Metric for Histogram {
    fn metric(&self) -> model::Metric {
        model::Metric::new(
            self.core.label_pairs.clone(),
            MetricValue::Histogram(self.core.snapshot()),
        )
    }
}

impl Collector for Histogram {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![MetricFamily::new(
            self.core.desc.fq_name.clone(),
            self.core.desc.help.clone(),
            MetricType::Histogram,
            vec![self.metric()],
        )]
    }
}

#[derive(Clone)]
pub struct HistogramVecBuilder {}

impl MetricVecBuilder for HistogramVecBuilder {
    type M = Histogram;
    type P = HistogramOpts;

    fn build(&self, opts: &HistogramOpts, vals: &[&str]) -> Result<Histogram> {
        Histogram::with_opts_and_label_values(opts, vals)
    }
}

/// A [`Collector`] that bundles a set of Histograms that all share the same
/// [`Desc`], but have different values for their variable labels. This is
/// used if you want to count the same thing partitioned by various
/// dimensions (e.g. HTTP request latencies, partitioned by status code and
/// method).
pub type HistogramVec = MetricVec<HistogramVecBuilder>;

impl HistogramVec {
    /// Create a new [`HistogramVec`] based on the provided
    /// [`HistogramOpts`] and partitioned by the given label names. At least
    /// one label name must be provided.
    pub fn new(opts: HistogramOpts, label_names: &[&str]) -> Result<HistogramVec> {
        let variable_names = label_names.iter().map(|s| (*s).to_owned()).collect();
        let opts = opts.variable_labels(variable_names);
        MetricVec::create(MetricType::Histogram, HistogramVecBuilder {}, opts)
    }

    /// Return a [`LocalHistogramVec`](crate::local::LocalHistogramVec) for
    /// single thread usage.
    pub fn local(&self) -> LocalHistogramVec {
        LocalHistogramVec::new(self.clone())
    }
}

#[derive(Clone)]
struct LocalHistogramCore {
    histogram: Histogram,
    counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl LocalHistogramCore {
    fn new(histogram: Histogram) -> LocalHistogramCore {
        assert!(
            histogram.core.native.is_none(),
            "local histograms are not available for native histograms"
        );
        let counts = vec![0; histogram.core.upper_bounds.len()];

        LocalHistogramCore {
            histogram,
            counts,
            count: 0,
            sum: 0.0,
        }
    }

    fn observe(&mut self, v: f64) {
        if let Some(i) = self.histogram.core.find_bucket(v) {
            self.counts[i] += 1;
        }

        self.count += 1;
        self.sum += v;
    }

    fn clear(&mut self) {
        for v in &mut self.counts {
            *v = 0
        }

        self.count = 0;
        self.sum = 0.0;
    }

    fn flush(&mut self) {
        // No cached observations, return.
        if self.count == 0 {
            return;
        }

        self.histogram
            .core
            .flush_local(&self.counts, self.count, self.sum);
        self.clear()
    }
}

/// An unsync [`Histogram`]: observations go to plain fields and reach the
/// shared histogram only on an explicit (or drop-time) flush.
pub struct LocalHistogram {
    core: RefCell<LocalHistogramCore>,
}

impl Clone for LocalHistogram {
    fn clone(&self) -> LocalHistogram {
        let core = self.core.clone();
        let lh = LocalHistogram { core };
        lh.clear();
        lh
    }
}

/// An unsync [`HistogramTimer`].
#[must_use = "Timer should be kept in a variable otherwise it cannot observe duration"]
pub struct LocalHistogramTimer {
    local: LocalHistogram,
    start: Instant,
}

impl LocalHistogramTimer {
    /// `observe_duration` observes the amount of time in seconds since
    /// [`LocalHistogram::start_timer`] was called.
    pub fn observe_duration(self) {
        drop(self);
    }

    fn observe(&mut self) {
        let v = duration_to_seconds(self.start.elapsed());
        self.local.observe(v)
    }
}

impl Drop for LocalHistogramTimer {
    fn drop(&mut self) {
        self.observe()
    }
}

impl LocalHistogram {
    fn new(histogram: Histogram) -> LocalHistogram {
        let core = LocalHistogramCore::new(histogram);
        LocalHistogram {
            core: RefCell::new(core),
        }
    }

    /// Add a single observation to the local cache.
    pub fn observe(&self, v: f64) {
        self.core.borrow_mut().observe(v);
    }

    /// Return a [`LocalHistogramTimer`] to track a duration.
    pub fn start_timer(&self) -> LocalHistogramTimer {
        LocalHistogramTimer {
            local: self.clone(),
            start: Instant::now(),
        }
    }

    /// Clear the local cache without flushing.
    pub fn clear(&self) {
        self.core.borrow_mut().clear();
    }

    /// Flush the cached observations to the shared [`Histogram`].
    pub fn flush(&self) {
        self.core.borrow_mut().flush();
    }
}

impl Drop for LocalHistogram {
    fn drop(&mut self) {
        self.flush()
    }
}

/// An unsync [`HistogramVec`].
pub struct LocalHistogramVec {
    vec: HistogramVec,
    local: HashMap<u64, LocalHistogram>,
}

impl LocalHistogramVec {
    fn new(vec: HistogramVec) -> LocalHistogramVec {
        LocalHistogramVec {
            vec,
            local: HashMap::new(),
        }
    }

    /// Get a [`LocalHistogram`] by label values.
    /// See more [`MetricVec::with_label_values`].
    pub fn with_label_values<'a>(&'a mut self, vals: &[&str]) -> &'a LocalHistogram {
        let hash = self.vec.hash_label_values(vals).unwrap();
        let vec = &self.vec;
        self.local
            .entry(hash)
            .or_insert_with(|| vec.with_label_values(vals).local())
    }

    /// Remove a [`LocalHistogram`] by label values, deleting the shared
    /// child as well.
    /// See more [`MetricVec::remove_label_values`].
    pub fn remove_label_values(&mut self, vals: &[&str]) -> Result<()> {
        let hash = self.vec.hash_label_values(vals)?;
        self.local.remove(&hash);
        self.vec.remove_label_values(vals)
    }

    /// Flush all cached observations to the shared [`HistogramVec`].
    pub fn flush(&mut self) {
        for h in self.local.values() {
            h.flush();
        }
    }
}

impl Clone for LocalHistogramVec {
    fn clone(&self) -> LocalHistogramVec {
        LocalHistogramVec::new(self.vec.clone())
    }
}

/// Create `count` buckets, each `width` wide, where the lowest bucket has
/// an upper bound of `start`. The final +Inf bucket is not counted and not
/// included in the returned slice. The returned slice is meant to be used
/// for the Buckets field of [`HistogramOpts`].
///
/// The function returns an error if `count` is zero or `width` is zero or
/// negative.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>> {
    if count < 1 {
        return Err(Error::Msg(format!(
            "linear_buckets needs a positive count, count: {}",
            count
        )));
    }
    if width <= 0.0 {
        return Err(Error::Msg(format!(
            "linear_buckets needs a width greater then 0, width: {}",
            width
        )));
    }

    let mut next = start;
    let mut buckets = Vec::with_capacity(count);
    for _ in 0..count {
        buckets.push(next);
        next += width;
    }

    Ok(buckets)
}

/// Create `count` buckets, where the lowest bucket has an upper bound of
/// `start` and each following bucket's upper bound is `factor` times the
/// previous bucket's upper bound. The final +Inf bucket is not counted and
/// not included in the returned slice. The returned slice is meant to be
/// used for the Buckets field of [`HistogramOpts`].
///
/// The function returns an error if `count` is zero, if `start` is zero or
/// negative, or if `factor` is less than or equal 1.
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>> {
    if count < 1 {
        return Err(Error::Msg(format!(
            "exponential_buckets needs a positive count, count: {}",
            count
        )));
    }
    if start <= 0.0 {
        return Err(Error::Msg(format!(
            "exponential_buckets needs a positive start value, \
             start: {}",
            start
        )));
    }
    if factor <= 1.0 {
        return Err(Error::Msg(format!(
            "exponential_buckets needs a factor greater than 1, \
             factor: {}",
            factor
        )));
    }

    let mut next = start;
    let mut buckets = Vec::with_capacity(count);
    for _ in 0..count {
        buckets.push(next);
        next *= factor;
    }

    Ok(buckets)
}

/// `duration_to_seconds` converts Duration to seconds.
#[inline]
fn duration_to_seconds(d: Duration) -> f64 {
    let nanos = f64::from(d.subsec_nanos()) / 1e9;
    d.as_secs() as f64 + nanos
}
