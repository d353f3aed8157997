// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::atomic64::{Atomic, AtomicF64, AtomicI64, Number};
use crate::desc::{Desc, Describer};
use crate::errors::{Error, Result};
use crate::metrics::{Collector, Metric, Opts};
use crate::model;
use crate::model::{GaugeValue, MetricFamily, MetricType, MetricValue};
use crate::value::{Value, ValueType};
use crate::vec::{MetricVec, MetricVecBuilder};

/// The underlying implementation for [`Gauge`] and [`IntGauge`].
#[derive(Debug)]
pub struct GenericGauge<P: Atomic> {
    v: Arc<Value<P>>,
}

/// A [`Metric`] represents a single numerical value that can arbitrarily go
/// up and down.
pub type Gauge = GenericGauge<AtomicF64>;

/// The integer version of [`Gauge`]. Provides better performance if metric
/// values are all integers.
pub type IntGauge = GenericGauge<AtomicI64>;

impl<P: Atomic> Clone for GenericGauge<P> {
    fn clone(&self) -> Self {
        Self {
            v: Arc::clone(&self.v),
        }
    }
}

impl<P: Atomic> GenericGauge<P> {
    /// Create a [`GenericGauge`] with the `name` and `help` arguments.
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, help: S2) -> Result<Self> {
        let opts = Opts::new(name, help);
        Self::with_opts(opts)
    }

    /// Create a [`GenericGauge`] with the `opts` options.
    pub fn with_opts(opts: Opts) -> Result<Self> {
        Self::with_opts_and_label_values(&opts, &[])
    }

    fn with_opts_and_label_values(opts: &Opts, label_values: &[&str]) -> Result<Self> {
        let v = Value::new(opts, ValueType::Gauge, P::T::from_i64(0), label_values)?;
        Ok(Self { v: Arc::new(v) })
    }

    /// Set the gauge to an arbitrary value.
    #[inline]
    pub fn set(&self, v: P::T) {
        self.v.set(v);
    }

    /// Increase the gauge by 1.
    #[inline]
    pub fn inc(&self) {
        self.v.inc();
    }

    /// Decrease the gauge by 1.
    #[inline]
    pub fn dec(&self) {
        self.v.dec();
    }

    /// Add the given value to the gauge. (The value can be negative,
    /// resulting in a decrease of the gauge.)
    #[inline]
    pub fn add(&self, v: P::T) {
        self.v.inc_by(v);
    }

    /// Subtract the given value from the gauge. (The value can be negative,
    /// resulting in an increase of the gauge.)
    #[inline]
    pub fn sub(&self, v: P::T) {
        self.v.dec_by(v);
    }

    /// Set the gauge to the current unixtime in seconds.
    pub fn set_to_current_time(&self) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.set(P::T::from_i64(secs as i64));
    }

    /// Return the gauge value.
    #[inline]
    pub fn get(&self) -> P::T {
        self.v.get()
    }
}

impl<P: Atomic> Collector for GenericGauge<P> {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.v.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.v.collect()]
    }
}

impl<P: Atomic> Metric for GenericGauge<P> {
    fn metric(&self) -> model::Metric {
        self.v.metric()
    }
}

#[derive(Debug)]
pub struct GaugeVecBuilder<P: Atomic> {
    _phantom: PhantomData<P>,
}

impl<P: Atomic> GaugeVecBuilder<P> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<P: Atomic> Clone for GaugeVecBuilder<P> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<P: Atomic> MetricVecBuilder for GaugeVecBuilder<P> {
    type M = GenericGauge<P>;
    type P = Opts;

    fn build(&self, opts: &Opts, vals: &[&str]) -> Result<Self::M> {
        Self::M::with_opts_and_label_values(opts, vals)
    }
}

/// The underlying implementation for [`GaugeVec`] and [`IntGaugeVec`].
pub type GenericGaugeVec<P> = MetricVec<GaugeVecBuilder<P>>;

/// A [`Collector`] that bundles a set of [`Gauge`]s that all share the same
/// [`Desc`], but have different values for their variable labels. This is
/// used if you want to expose the same thing partitioned by various
/// dimensions (e.g. number of operations queued, partitioned by user and
/// operation type).
pub type GaugeVec = GenericGaugeVec<AtomicF64>;

/// The integer version of [`GaugeVec`]. Provides better performance if
/// metric values are all integers.
pub type IntGaugeVec = GenericGaugeVec<AtomicI64>;

impl<P: Atomic> GenericGaugeVec<P> {
    /// Create a new [`GenericGaugeVec`] based on the provided [`Opts`] and
    /// partitioned by the given label names. At least one label name must
    /// be provided.
    pub fn new(opts: Opts, label_names: &[&str]) -> Result<Self> {
        let variable_names = label_names.iter().map(|s| (*s).to_owned()).collect();
        let opts = opts.variable_labels(variable_names);
        MetricVec::create(MetricType::Gauge, GaugeVecBuilder::new(), opts)
    }
}

/// A read-only gauge whose value is produced by a caller-supplied function
/// invoked at collection time. No state is persisted between collections;
/// the function must be deterministic for one instant and cheap, since it
/// runs on every gather pass.
pub struct GaugeFunc {
    desc: Desc,
    f: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl GaugeFunc {
    /// Create a [`GaugeFunc`] with the `opts` options and the value
    /// function. Variable labels are not allowed: the function describes
    /// exactly one series.
    pub fn new<F>(opts: Opts, f: F) -> Result<GaugeFunc>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        let desc = opts.describe()?;
        if !desc.variable_labels.is_empty() {
            return Err(Error::Msg(
                "gauge functions cannot have variable labels".to_owned(),
            ));
        }
        Ok(GaugeFunc {
            desc,
            f: Box::new(f),
        })
    }
}

impl Collector for GaugeFunc {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let m = model::Metric::new(
            self.desc.const_label_pairs.clone(),
            MetricValue::Gauge(GaugeValue { value: (self.f)() }),
        );
        vec![MetricFamily::new(
            self.desc.fq_name.clone(),
            self.desc.help.clone(),
            MetricType::Gauge,
            vec![m],
        )]
    }
}
