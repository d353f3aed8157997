// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::desc::{Desc, Describer};
use crate::errors::{Error, Result};
use crate::metrics::{Collector, Metric, Opts};
use crate::model;
use crate::model::{MetricFamily, MetricType, MetricValue, Quantile, SummaryValue};
use crate::quantile::Stream;
use crate::value::make_label_pairs;
use crate::vec::{MetricVec, MetricVecBuilder};

/// Used for the label that carries the quantile rank of a summary sample
/// ("quantile" -> φ).
pub const QUANTILE_LABEL: &str = "quantile";

/// Default sliding window length of a [`Summary`].
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// Default number of tumbling windows the sliding window is divided into.
pub const DEFAULT_AGE_BUCKETS: u32 = 5;

/// Default number of buffered observations per quantile stream flush.
pub const DEFAULT_BUF_CAP: usize = 500;

#[inline]
fn check_quantile_label(label: &str) -> Result<()> {
    if label == QUANTILE_LABEL {
        return Err(Error::Msg(
            "`quantile` is not allowed as label name in summaries".to_owned(),
        ));
    }
    Ok(())
}

/// A struct that bundles the options for creating a [`Summary`] metric. It
/// is mandatory to set Name and Help to a non-empty string, and to provide
/// objectives if quantile estimates are wanted (a summary without
/// objectives only exposes count and sum).
#[derive(Clone)]
pub struct SummaryOpts {
    pub common_opts: Opts,

    /// Objectives defines the quantile rank estimates with their
    /// respective absolute errors, e.g. `(0.99, 0.001)` answers the 0.99
    /// quantile with a rank guarantee of ±0.1%.
    pub objectives: Vec<(f64, f64)>,

    /// Observations decay out of the quantile estimates after `max_age`.
    pub max_age: Duration,

    /// Number of tumbling windows `max_age` is divided into for the decay.
    /// More buckets smooth the rotation at the price of memory.
    pub age_buckets: u32,

    /// Per-window observation buffer capacity; bounds the insertion batch
    /// size of the underlying streams.
    pub buf_cap: usize,
}

impl SummaryOpts {
    /// Create a [`SummaryOpts`] with the `name` and `help` arguments.
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, help: S2) -> SummaryOpts {
        SummaryOpts {
            common_opts: Opts::new(name, help),
            objectives: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            buf_cap: DEFAULT_BUF_CAP,
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

    /// `objectives` sets the quantile objectives.
    pub fn objectives(mut self, objectives: Vec<(f64, f64)>) -> Self {
        self.objectives = objectives;
        self
    }

    /// `max_age` sets the decay window length.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// `age_buckets` sets the number of tumbling windows.
    pub fn age_buckets(mut self, age_buckets: u32) -> Self {
        self.age_buckets = age_buckets;
        self
    }

    /// `buf_cap` sets the per-window buffer capacity.
    pub fn buf_cap(mut self, buf_cap: usize) -> Self {
        self.buf_cap = buf_cap;
        self
    }
}

impl Describer for SummaryOpts {
    fn describe(&self) -> Result<Desc> {
        self.common_opts.describe()
    }
}

struct Windows {
    // Every observation goes into every stream; queries read the head,
    // which is the stream with the longest history. Rotation resets the
    // head and moves on, so the head always covers between
    // (age_buckets-1)/age_buckets * max_age and max_age of history.
    streams: Vec<Stream>,
    head_idx: usize,
    head_deadline: Instant,
    rotation_interval: Duration,
    count: u64,
    sum: f64,
}

impl Windows {
    // Rotation runs before an observation is admitted, so a sample landing
    // exactly on the deadline goes to the rotated-in window.
    fn maybe_rotate(&mut self, now: Instant) {
        while now >= self.head_deadline {
            self.streams[self.head_idx].reset();
            self.head_idx = (self.head_idx + 1) % self.streams.len();
            self.head_deadline += self.rotation_interval;
        }
    }
}

pub struct SummaryCore {
    desc: Desc,
    label_pairs: Vec<model::LabelPair>,
    // Sorted ascending by quantile.
    objectives: Vec<(f64, f64)>,
    windows: Mutex<Windows>,
}

impl SummaryCore {
    pub fn new(opts: &SummaryOpts, label_values: &[&str]) -> Result<SummaryCore> {
        let desc = opts.describe()?;

        for name in &desc.variable_labels {
            check_quantile_label(name)?;
        }
        for pair in &desc.const_label_pairs {
            check_quantile_label(pair.name())?;
        }
        let label_pairs = make_label_pairs(&desc, label_values)?;

        for &(q, e) in &opts.objectives {
            if !(q > 0.0 && q < 1.0) {
                return Err(Error::Msg(format!(
                    "summary objective quantile {} not in (0, 1)",
                    q
                )));
            }
            if !(e > 0.0 && e < 1.0) {
                return Err(Error::Msg(format!(
                    "summary objective error {} not in (0, 1)",
                    e
                )));
            }
        }
        if opts.age_buckets == 0 {
            return Err(Error::Msg("summary needs at least one age bucket".to_owned()));
        }
        if opts.max_age.as_nanos() == 0 {
            return Err(Error::Msg("summary max_age must not be zero".to_owned()));
        }

        let mut objectives = opts.objectives.clone();
        objectives.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let rotation_interval = opts.max_age / opts.age_buckets;
        let streams = (0..opts.age_buckets)
            .map(|_| Stream::targeted(&objectives, opts.buf_cap))
            .collect();

        Ok(SummaryCore {
            desc,
            label_pairs,
            objectives,
            windows: Mutex::new(Windows {
                streams,
                head_idx: 0,
                head_deadline: Instant::now() + rotation_interval,
                rotation_interval,
                count: 0,
                sum: 0.0,
            }),
        })
    }

    pub fn observe(&self, v: f64) {
        let mut w = self.windows.lock();
        w.maybe_rotate(Instant::now());
        for stream in &mut w.streams {
            stream.insert(v);
        }
        w.count += 1;
        w.sum += v;
    }

    fn summary_value(&self) -> SummaryValue {
        let mut w = self.windows.lock();
        w.maybe_rotate(Instant::now());

        let head = w.head_idx;
        let mut quantiles = Vec::with_capacity(self.objectives.len());
        for i in 0..self.objectives.len() {
            let q = self.objectives[i].0;
            let value = w.streams[head].query(q);
            quantiles.push(Quantile { quantile: q, value });
        }

        SummaryValue {
            sample_count: w.count,
            sample_sum: w.sum,
            quantiles,
        }
    }
}

/// A [`Metric`] that samples observations and reports streaming φ-quantile
/// estimates over a sliding window, together with a cumulative count and
/// sum of all observations.
///
/// Quantile estimates decay: an observation stops influencing them at most
/// `max_age` after it was recorded. Count and sum are cumulative for the
/// lifetime of the metric, as exposition requires them to behave like
/// counters.
#[derive(Clone)]
pub struct Summary {
    core: Arc<SummaryCore>,
}

impl Summary {
    /// Create a [`Summary`] with the `opts` options.
    pub fn with_opts(opts: SummaryOpts) -> Result<Summary> {
        Summary::with_opts_and_label_values(&opts, &[])
    }

    fn with_opts_and_label_values(opts: &SummaryOpts, label_values: &[&str]) -> Result<Summary> {
        let core = SummaryCore::new(opts, label_values)?;
        Ok(Summary {
            core: Arc::new(core),
        })
    }

    /// Add a single observation to the [`Summary`].
    pub fn observe(&self, v: f64) {
        self.core.observe(v)
    }
}

impl Metric for Summary {
    fn metric(&self) -> model::Metric {
        model::Metric::new(
            self.core.label_pairs.clone(),
            MetricValue::Summary(self.core.summary_value()),
        )
    }
}

impl Collector for Summary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![MetricFamily::new(
            self.core.desc.fq_name.clone(),
            self.core.desc.help.clone(),
            MetricType::Summary,
            vec![self.metric()],
        )]
    }
}

#[derive(Clone)]
pub struct SummaryVecBuilder {}

impl MetricVecBuilder for SummaryVecBuilder {
    type M = Summary;
    type P = SummaryOpts;

    fn build(&self, opts: &SummaryOpts, vals: &[&str]) -> Result<Summary> {
        Summary::with_opts_and_label_values(opts, vals)
    }
}

/// A [`Collector`] that bundles a set of [`Summary`] metrics that all share
/// the same [`Desc`], but have different values for their variable labels.
/// This is used if you want to measure the same thing partitioned by
/// various dimensions (e.g. RPC latencies, partitioned by service).
pub type SummaryVec = MetricVec<SummaryVecBuilder>;

impl SummaryVec {
    /// Create a new [`SummaryVec`] based on the provided [`SummaryOpts`]
    /// and partitioned by the given label names. At least one label name
    /// must be provided.
    pub fn new(opts: SummaryOpts, label_names: &[&str]) -> Result<SummaryVec> {
        let variable_names = label_names.iter().map(|s| (*s).to_owned()).collect();
        let opts = opts.variable_labels(variable_names);
        MetricVec::create(MetricType::Summary, SummaryVecBuilder {}, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Collector;
    use std::f64::EPSILON;
    use std::thread;
    use std::time::Duration;

    fn objectives() -> Vec<(f64, f64)> {
        vec![(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)]
    }

    #[test]
    fn test_summary() {
        let opts = SummaryOpts::new("latency", "request latency")
            .objectives(objectives())
            .const_label("service", "api");
        let summary = Summary::with_opts(opts).unwrap();

        for v in 1..=100 {
            summary.observe(f64::from(v));
        }

        let mf = summary.collect().pop().unwrap();
        assert_eq!(mf.metric_type(), MetricType::Summary);
        let m = &mf.metrics()[0];
        assert_eq!(m.labels().len(), 1);

        let s = m.summary().unwrap();
        assert_eq!(s.sample_count, 100);
        assert!((s.sample_sum - 5050.0).abs() < EPSILON);

        assert_eq!(s.quantiles.len(), 3);
        // Sorted ascending by quantile rank.
        assert!((s.quantiles[0].quantile - 0.5).abs() < EPSILON);
        assert!((s.quantiles[2].quantile - 0.99).abs() < EPSILON);

        assert!((45.0..=55.0).contains(&s.quantiles[0].value));
        assert!((89.0..=91.0).contains(&s.quantiles[1].value));
        assert!((98.9..=99.1).contains(&s.quantiles[2].value));
    }

    #[test]
    fn test_summary_without_objectives() {
        let summary =
            Summary::with_opts(SummaryOpts::new("latency", "request latency")).unwrap();
        summary.observe(2.0);
        summary.observe(3.0);

        let m = summary.metric();
        let s = m.summary().unwrap();
        assert_eq!(s.sample_count, 2);
        assert!((s.sample_sum - 5.0).abs() < EPSILON);
        assert!(s.quantiles.is_empty());
    }

    #[test]
    fn test_empty_summary_reports_nan() {
        let opts = SummaryOpts::new("latency", "help").objectives(objectives());
        let summary = Summary::with_opts(opts).unwrap();
        let m = summary.metric();
        let s = m.summary().unwrap();
        assert_eq!(s.sample_count, 0);
        for q in &s.quantiles {
            assert!(q.value.is_nan());
        }
    }

    #[test]
    fn test_summary_decay() {
        let opts = SummaryOpts::new("latency", "help")
            .objectives(vec![(0.5, 0.05)])
            .max_age(Duration::from_millis(200))
            .age_buckets(2);
        let summary = Summary::with_opts(opts).unwrap();

        summary.observe(42.0);
        let m = summary.metric();
        let s = m.summary().unwrap();
        assert!((s.quantiles[0].value - 42.0).abs() < EPSILON);

        // After the full window has passed, the estimate is gone but the
        // cumulative count and sum remain.
        thread::sleep(Duration::from_millis(500));
        let m = summary.metric();
        let s = m.summary().unwrap();
        assert!(s.quantiles[0].value.is_nan());
        assert_eq!(s.sample_count, 1);
        assert!((s.sample_sum - 42.0).abs() < EPSILON);

        // The window keeps accepting fresh observations afterwards.
        summary.observe(7.0);
        let m = summary.metric();
        let s = m.summary().unwrap();
        assert!((s.quantiles[0].value - 7.0).abs() < EPSILON);
        assert_eq!(s.sample_count, 2);
    }

    #[test]
    fn test_invalid_objectives() {
        let opts = SummaryOpts::new("latency", "help").objectives(vec![(1.5, 0.05)]);
        assert!(Summary::with_opts(opts).is_err());

        let opts = SummaryOpts::new("latency", "help").objectives(vec![(0.5, 0.0)]);
        assert!(Summary::with_opts(opts).is_err());
    }

    #[test]
    fn test_quantile_label_is_reserved() {
        let opts = SummaryOpts::new("latency", "help").const_label("quantile", "0.5");
        assert!(Summary::with_opts(opts).is_err());

        let res = SummaryVec::new(SummaryOpts::new("latency", "help"), &["quantile"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_summary_vec() {
        let vec = SummaryVec::new(
            SummaryOpts::new("latency", "help").objectives(objectives()),
            &["service"],
        )
        .unwrap();

        for v in 1..=100 {
            vec.with_label_values(&["api"]).observe(f64::from(v));
        }
        vec.with_label_values(&["worker"]).observe(1.0);

        let families = vec.collect();
        assert_eq!(families[0].metrics().len(), 2);

        let m = vec.with_label_values(&["api"]).metric();
        let s = m.summary().unwrap();
        assert_eq!(s.sample_count, 100);
        assert!((45.0..=55.0).contains(&s.quantiles[0].value));
    }

    #[test]
    fn test_summary_concurrent_observers() {
        let opts = SummaryOpts::new("latency", "help").objectives(vec![(0.5, 0.05)]);
        let summary = Summary::with_opts(opts).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let summary = summary.clone();
            handles.push(thread::spawn(move || {
                for v in 0..1000 {
                    summary.observe(f64::from(v));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let m = summary.metric();
        let s = m.summary().unwrap();
        assert_eq!(s.sample_count, 4000);
        let q50 = s.quantiles[0].value;
        assert!((350.0..=650.0).contains(&q50), "q50 = {}", q50);
    }
}
