// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::atomic64::{Atomic, Number};
use crate::desc::{Desc, Describer};
use crate::errors::{Error, Result};
use crate::labels::is_valid_label_name;
use crate::model::{
    CounterValue, Exemplar, GaugeValue, LabelPair, Metric, MetricFamily, MetricType, MetricValue,
    UntypedValue,
};

/// Total byte budget for an exemplar's label names and values combined.
const EXEMPLAR_LABEL_BUDGET: usize = 128;

/// `ValueType` is an enumeration of the scalar metric shapes backed by
/// [`Value`]: [`Counter`](crate::Counter), [`Gauge`](crate::Gauge) and
/// [`Untyped`](crate::Untyped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Counter,
    Gauge,
    Untyped,
}

impl ValueType {
    /// `metric_type` returns the corresponding snapshot metric type.
    pub fn metric_type(self) -> MetricType {
        match self {
            ValueType::Counter => MetricType::Counter,
            ValueType::Gauge => MetricType::Gauge,
            ValueType::Untyped => MetricType::Untyped,
        }
    }
}

/// A generic metric backing [`Counter`](crate::Counter),
/// [`Gauge`](crate::Gauge) and [`Untyped`](crate::Untyped). Its effective
/// type is determined by `ValueType`. This is a low-level building block;
/// the public metric types wrap it.
pub struct Value<P: Atomic> {
    pub desc: Desc,
    pub val: P,
    pub val_type: ValueType,
    pub label_pairs: Vec<LabelPair>,
    // Last-write-wins exemplar slot; only counters expose it.
    exemplar: RwLock<Option<Exemplar>>,
}

impl<P: Atomic> std::fmt::Debug for Value<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("desc", &self.desc)
            .field("val_type", &self.val_type)
            .field("label_pairs", &self.label_pairs)
            .finish()
    }
}

impl<P: Atomic> Value<P> {
    pub fn new<D: Describer>(
        describer: &D,
        val_type: ValueType,
        val: P::T,
        label_values: &[&str],
    ) -> Result<Value<P>> {
        let desc = describer.describe()?;
        let label_pairs = make_label_pairs(&desc, label_values)?;

        Ok(Value {
            desc,
            val: P::new(val),
            val_type,
            label_pairs,
            exemplar: RwLock::new(None),
        })
    }

    #[inline]
    pub fn get(&self) -> P::T {
        self.val.get()
    }

    #[inline]
    pub fn set(&self, val: P::T) {
        self.val.set(val);
    }

    #[inline]
    pub fn inc_by(&self, val: P::T) {
        self.val.inc_by(val);
    }

    #[inline]
    pub fn inc(&self) {
        self.inc_by(P::T::from_i64(1));
    }

    #[inline]
    pub fn dec(&self) {
        self.dec_by(P::T::from_i64(1));
    }

    #[inline]
    pub fn dec_by(&self, val: P::T) {
        self.val.dec_by(val)
    }

    /// Swap in a new exemplar for the current value of the series.
    pub fn set_exemplar(&self, e: Exemplar) {
        *self.exemplar.write() = Some(e);
    }

    pub fn metric(&self) -> Metric {
        let val = self.get().into_f64();
        let value = match self.val_type {
            ValueType::Counter => MetricValue::Counter(CounterValue {
                value: val,
                exemplar: self.exemplar.read().clone(),
            }),
            ValueType::Gauge => MetricValue::Gauge(GaugeValue { value: val }),
            ValueType::Untyped => MetricValue::Untyped(UntypedValue { value: val }),
        };
        Metric::new(self.label_pairs.clone(), value)
    }

    pub fn collect(&self) -> MetricFamily {
        MetricFamily::new(
            self.desc.fq_name.clone(),
            self.desc.help.clone(),
            self.val_type.metric_type(),
            vec![self.metric()],
        )
    }
}

/// Assemble the label-pair snapshot of one child: variable labels paired
/// with the provided values, then const pairs, sorted by name.
pub fn make_label_pairs(desc: &Desc, label_values: &[&str]) -> Result<Vec<LabelPair>> {
    if desc.variable_labels.len() != label_values.len() {
        return Err(Error::InconsistentCardinality {
            expect: desc.variable_labels.len(),
            got: label_values.len(),
        });
    }

    let total_len = desc.variable_labels.len() + desc.const_label_pairs.len();
    if total_len == 0 {
        return Ok(vec![]);
    }

    if desc.variable_labels.is_empty() {
        return Ok(desc.const_label_pairs.clone());
    }

    let mut label_pairs = Vec::with_capacity(total_len);
    for (name, value) in desc.variable_labels.iter().zip(label_values) {
        label_pairs.push(LabelPair::new(name.clone(), (*value).to_owned()));
    }

    for label_pair in &desc.const_label_pairs {
        label_pairs.push(label_pair.clone());
    }
    label_pairs.sort();
    Ok(label_pairs)
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Validate and build an exemplar out of a caller-supplied label set and
/// value, stamping it with the current wall-clock time.
pub(crate) fn make_exemplar(labels: &HashMap<&str, &str>, value: f64) -> Result<Exemplar> {
    let mut budget = 0;
    let mut pairs = Vec::with_capacity(labels.len());
    for (name, val) in labels {
        if !is_valid_label_name(name) {
            return Err(Error::InvalidExemplar(format!(
                "{:?} is not a valid label name",
                name
            )));
        }
        budget += name.len() + val.len();
        pairs.push(LabelPair::new((*name).to_owned(), (*val).to_owned()));
    }
    if budget > EXEMPLAR_LABEL_BUDGET {
        return Err(Error::InvalidExemplar(format!(
            "label set takes {} bytes, exceeding the {} byte budget",
            budget, EXEMPLAR_LABEL_BUDGET
        )));
    }
    pairs.sort();

    Ok(Exemplar {
        labels: pairs,
        value,
        timestamp_ms: epoch_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic64::AtomicF64;
    use crate::metrics::Opts;

    #[test]
    fn test_value_cardinality_check() {
        let opts = Opts::new("test", "test help").variable_label("l1");
        let res: Result<Value<AtomicF64>> = Value::new(&opts, ValueType::Counter, 0.0, &[]);
        match res {
            Err(Error::InconsistentCardinality { expect, got }) => {
                assert_eq!(expect, 1);
                assert_eq!(got, 0);
            }
            other => panic!("expected cardinality error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_make_label_pairs_sorted() {
        let opts = Opts::new("test", "test help")
            .const_label("zz", "1")
            .variable_label("aa");
        let desc = opts.describe().unwrap();
        let pairs = make_label_pairs(&desc, &["v"]).unwrap();
        let names: Vec<&str> = pairs.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["aa", "zz"]);
    }

    #[test]
    fn test_exemplar_budget() {
        let long = "v".repeat(200);
        let mut labels = HashMap::new();
        labels.insert("trace_id", long.as_str());
        assert!(make_exemplar(&labels, 1.0).is_err());

        let mut labels = HashMap::new();
        labels.insert("trace_id", "abc123");
        let e = make_exemplar(&labels, 1.0).unwrap();
        assert_eq!(e.labels.len(), 1);
        assert!(e.timestamp_ms > 0);
    }

    #[test]
    fn test_exemplar_label_name_validation() {
        let mut labels = HashMap::new();
        labels.insert("not valid", "x");
        assert!(make_exemplar(&labels, 1.0).is_err());
    }
}
