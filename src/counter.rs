// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::atomic64::{Atomic, AtomicF64, AtomicI64, Number};
use crate::desc::Desc;
use crate::errors::{Error, Result};
use crate::metrics::{Collector, Metric, Opts};
use crate::model::{MetricFamily, MetricType};
use crate::value::{make_exemplar, Value, ValueType};
use crate::vec::{MetricVec, MetricVecBuilder};
use crate::model;

/// The underlying implementation for [`Counter`] and [`IntCounter`].
#[derive(Debug)]
pub struct GenericCounter<P: Atomic> {
    v: Arc<Value<P>>,
}

/// A [`Metric`] represents a single numerical value that only ever goes up.
pub type Counter = GenericCounter<AtomicF64>;

/// The integer version of [`Counter`]. Provides better performance if
/// metric values are all integers.
pub type IntCounter = GenericCounter<AtomicI64>;

impl<P: Atomic> Clone for GenericCounter<P> {
    fn clone(&self) -> Self {
        Self {
            v: Arc::clone(&self.v),
        }
    }
}

impl<P: Atomic> GenericCounter<P> {
    /// Create a [`GenericCounter`] with the `name` and `help` arguments.
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, help: S2) -> Result<Self> {
        let opts = Opts::new(name, help);
        Self::with_opts(opts)
    }

    /// Create a [`GenericCounter`] with the `opts` options.
    pub fn with_opts(opts: Opts) -> Result<Self> {
        Self::with_opts_and_label_values(&opts, &[])
    }

    fn with_opts_and_label_values(opts: &Opts, label_values: &[&str]) -> Result<Self> {
        let v = Value::new(opts, ValueType::Counter, P::T::from_i64(0), label_values)?;
        Ok(Self { v: Arc::new(v) })
    }

    /// Increase the counter by the given value.
    ///
    /// # Panics
    ///
    /// Panics if the value is < 0.
    #[inline]
    pub fn inc_by(&self, v: P::T) {
        assert!(
            v >= P::T::from_i64(0),
            "{}",
            Error::DecreaseCounter(v.into_f64())
        );
        self.v.inc_by(v);
    }

    /// Increase the counter by 1.
    #[inline]
    pub fn inc(&self) {
        self.v.inc();
    }

    /// Increase the counter by the given value, attaching an exemplar
    /// sampled from the provided label set. The previous exemplar, if any,
    /// is replaced.
    ///
    /// # Panics
    ///
    /// Panics if the value is < 0, if an exemplar label name is invalid, or
    /// if the exemplar's label text exceeds the 128 byte budget.
    pub fn inc_by_with_exemplar(&self, v: P::T, labels: &HashMap<&str, &str>) {
        self.inc_by(v);
        let e = make_exemplar(labels, v.into_f64()).unwrap();
        self.v.set_exemplar(e);
    }

    /// Return the counter value.
    #[inline]
    pub fn get(&self) -> P::T {
        self.v.get()
    }

    /// Return a [`GenericLocalCounter`] for single thread usage.
    pub fn local(&self) -> GenericLocalCounter<P> {
        GenericLocalCounter::new(self.clone())
    }
}

impl<P: Atomic> Collector for GenericCounter<P> {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.v.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.v.collect()]
    }
}

impl<P: Atomic> Metric for GenericCounter<P> {
    fn metric(&self) -> model::Metric {
        self.v.metric()
    }
}

#[derive(Debug)]
pub struct CounterVecBuilder<P: Atomic> {
    _phantom: PhantomData<P>,
}

impl<P: Atomic> CounterVecBuilder<P> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<P: Atomic> Clone for CounterVecBuilder<P> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<P: Atomic> MetricVecBuilder for CounterVecBuilder<P> {
    type M = GenericCounter<P>;
    type P = Opts;

    fn build(&self, opts: &Opts, vals: &[&str]) -> Result<Self::M> {
        Self::M::with_opts_and_label_values(opts, vals)
    }
}

/// The underlying implementation for [`CounterVec`] and [`IntCounterVec`].
pub type GenericCounterVec<P> = MetricVec<CounterVecBuilder<P>>;

/// A [`Collector`] that bundles a set of [`Counter`]s that all share the
/// same [`Desc`], but have different values for their variable labels. This
/// is used if you want to count the same thing partitioned by various
/// dimensions (e.g. number of HTTP requests, partitioned by response code
/// and method).
pub type CounterVec = GenericCounterVec<AtomicF64>;

/// The integer version of [`CounterVec`]. Provides better performance if
/// metric values are all integers.
pub type IntCounterVec = GenericCounterVec<AtomicI64>;

impl<P: Atomic> GenericCounterVec<P> {
    /// Create a new [`GenericCounterVec`] based on the provided
    /// [`Opts`] and partitioned by the given label names. At least one
    /// label name must be provided.
    pub fn new(opts: Opts, label_names: &[&str]) -> Result<Self> {
        let variable_names = label_names.iter().map(|s| (*s).to_owned()).collect();
        let opts = opts.variable_labels(variable_names);
        MetricVec::create(MetricType::Counter, CounterVecBuilder::new(), opts)
    }

    /// Return a [`GenericLocalCounterVec`] for single thread usage.
    pub fn local(&self) -> GenericLocalCounterVec<P> {
        GenericLocalCounterVec::new(self.clone())
    }
}

/// The underlying implementation for
/// [`LocalCounter`](crate::local::LocalCounter) and
/// [`LocalIntCounter`](crate::local::LocalIntCounter). An unsync counter
/// cache: increments go to a plain field and reach the shared counter only
/// on an explicit flush.
pub struct GenericLocalCounter<P: Atomic> {
    counter: GenericCounter<P>,
    val: P::T,
}

/// An unsync [`Counter`].
pub type LocalCounter = GenericLocalCounter<AtomicF64>;

/// The integer version of [`LocalCounter`](crate::local::LocalCounter).
/// Provides better performance if metric values are all integers.
pub type LocalIntCounter = GenericLocalCounter<AtomicI64>;

impl<P: Atomic> GenericLocalCounter<P> {
    fn new(counter: GenericCounter<P>) -> Self {
        Self {
            counter,
            val: P::T::from_i64(0),
        }
    }

    /// Increase the local counter by the given value.
    ///
    /// # Panics
    ///
    /// Panics if the value is < 0.
    #[inline]
    pub fn inc_by(&mut self, v: P::T) {
        assert!(
            v >= P::T::from_i64(0),
            "{}",
            Error::DecreaseCounter(v.into_f64())
        );
        self.val += v;
    }

    /// Increase the local counter by 1.
    #[inline]
    pub fn inc(&mut self) {
        self.val += P::T::from_i64(1);
    }

    /// Return the local counter value.
    #[inline]
    pub fn get(&self) -> P::T {
        self.val
    }

    /// Flush the buffered increments to the shared [`Counter`].
    #[inline]
    pub fn flush(&mut self) {
        if self.val == P::T::from_i64(0) {
            return;
        }
        self.counter.inc_by(self.val);
        self.val = P::T::from_i64(0);
    }
}

impl<P: Atomic> Clone for GenericLocalCounter<P> {
    fn clone(&self) -> Self {
        Self::new(self.counter.clone())
    }
}

/// The underlying implementation for
/// [`LocalCounterVec`](crate::local::LocalCounterVec) and
/// [`LocalIntCounterVec`](crate::local::LocalIntCounterVec).
pub struct GenericLocalCounterVec<P: Atomic> {
    vec: GenericCounterVec<P>,
    local: HashMap<u64, GenericLocalCounter<P>>,
}

/// An unsync [`CounterVec`].
pub type LocalCounterVec = GenericLocalCounterVec<AtomicF64>;

/// The integer version of
/// [`LocalCounterVec`](crate::local::LocalCounterVec). Provides better
/// performance if metric values are all integers.
pub type LocalIntCounterVec = GenericLocalCounterVec<AtomicI64>;

impl<P: Atomic> GenericLocalCounterVec<P> {
    fn new(vec: GenericCounterVec<P>) -> Self {
        Self {
            vec,
            local: HashMap::new(),
        }
    }

    /// Get a [`GenericLocalCounter`] by label values.
    /// See more [`MetricVec::with_label_values`].
    pub fn with_label_values<'a>(&'a mut self, vals: &[&str]) -> &'a mut GenericLocalCounter<P> {
        let hash = self.vec.hash_label_values(vals).unwrap();
        let vec = &self.vec;
        self.local
            .entry(hash)
            .or_insert_with(|| vec.with_label_values(vals).local())
    }

    /// Remove a [`GenericLocalCounter`] by label values, deleting the
    /// shared child as well.
    /// See more [`MetricVec::remove_label_values`].
    pub fn remove_label_values(&mut self, vals: &[&str]) -> Result<()> {
        let hash = self.vec.hash_label_values(vals)?;
        self.local.remove(&hash);
        self.vec.remove_label_values(vals)
    }

    /// Flush all buffered increments to the shared [`CounterVec`].
    pub fn flush(&mut self) {
        for h in self.local.values_mut() {
            h.flush();
        }
    }
}

impl<P: Atomic> Clone for GenericLocalCounterVec<P> {
    fn clone(&self) -> Self {
        Self::new(self.vec.clone())
    }
}
