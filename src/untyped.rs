// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use crate::atomic64::AtomicF64;
use crate::desc::Desc;
use crate::errors::Result;
use crate::metrics::{Collector, Metric, Opts};
use crate::model;
use crate::model::MetricFamily;
use crate::value::{Value, ValueType};

/// A [`Metric`] exposed with the untyped exposition type: a settable
/// float64 with no up/down contract. Use it when bridging values whose
/// semantics the scraping side should not assume anything about.
#[derive(Clone)]
pub struct Untyped {
    v: Arc<Value<AtomicF64>>,
}

impl Untyped {
    /// Create an [`Untyped`] metric with the `name` and `help` arguments.
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, help: S2) -> Result<Untyped> {
        Untyped::with_opts(Opts::new(name, help))
    }

    /// Create an [`Untyped`] metric with the `opts` options.
    pub fn with_opts(opts: Opts) -> Result<Untyped> {
        let v = Value::new(&opts, ValueType::Untyped, 0.0, &[])?;
        Ok(Untyped { v: Arc::new(v) })
    }

    /// Set the value.
    #[inline]
    pub fn set(&self, v: f64) {
        self.v.set(v);
    }

    /// Return the value.
    #[inline]
    pub fn get(&self) -> f64 {
        self.v.get()
    }
}

impl Collector for Untyped {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.v.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.v.collect()]
    }
}

impl Metric for Untyped {
    fn metric(&self) -> model::Metric {
        self.v.metric()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricType;

    #[test]
    fn test_untyped() {
        let u = Untyped::new("some_ratio", "a value with no contract").unwrap();
        u.set(0.42);
        assert!((u.get() - 0.42).abs() < std::f64::EPSILON);

        let mf = u.collect().pop().unwrap();
        assert_eq!(mf.metric_type(), MetricType::Untyped);
        let m = &mf.metrics()[0];
        assert!((m.untyped().unwrap().value - 0.42).abs() < std::f64::EPSILON);
    }
}
