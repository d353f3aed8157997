// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::desc::{Desc, Describer};
use crate::errors::{Error, Result};
use crate::labels::{hash_label_values, hash_new};
use crate::metrics::{Collector, Metric};
use crate::model::{MetricFamily, MetricType};

// Shard count for the children map. Power of two so the hash can be
// masked straight into a shard index.
const METRIC_VEC_SHARDS: usize = 16;

/// An interface for building a child metric of a [`MetricVec`] from the
/// vector's options and a concrete label-value tuple.
pub trait MetricVecBuilder: Send + Sync + Clone {
    /// The associated Metric collected.
    type M: Metric;
    /// The associated describer (options) type.
    type P: Describer + Sync + Send + Clone;

    /// `build` builds a [`Metric`] with option and corresponding label
    /// names.
    fn build(&self, opts: &Self::P, vals: &[&str]) -> Result<Self::M>;
}

// One entry of a hash bucket. The label values are kept alongside the
// child so hash collisions can be told apart by a linear scan.
#[derive(Debug)]
struct MetricWithLabelValues<M> {
    label_values: Vec<String>,
    metric: M,
}

type Shard<M> = RwLock<HashMap<u64, Vec<MetricWithLabelValues<M>>>>;

// A variable label fixed in advance by currying: position in the
// descriptor's variable labels plus the bound value.
#[derive(Debug, Clone)]
struct CurriedLabelValue {
    index: usize,
    value: String,
}

pub(crate) struct MetricVecCore<T: MetricVecBuilder> {
    pub desc: Desc,
    pub metric_type: MetricType,
    pub new_metric: T,
    pub opts: T::P,
    shards: Vec<Shard<T::M>>,
}

impl<T: MetricVecBuilder> MetricVecCore<T> {
    fn shard(&self, h: u64) -> &Shard<T::M> {
        &self.shards[(h as usize) & (METRIC_VEC_SHARDS - 1)]
    }

    fn lookup(&self, h: u64, vals: &[&str]) -> Option<T::M> {
        let shard = self.shard(h).read();
        let bucket = shard.get(&h)?;
        bucket
            .iter()
            .find(|e| matches_label_values(&e.label_values, vals))
            .map(|e| e.metric.clone())
    }

    fn get_or_create(&self, h: u64, vals: &[&str]) -> Result<T::M> {
        if let Some(m) = self.lookup(h, vals) {
            return Ok(m);
        }

        let mut shard = self.shard(h).write();
        let bucket = shard.entry(h).or_insert_with(Vec::new);
        // Re-check: another writer may have inserted while we upgraded.
        if let Some(e) = bucket
            .iter()
            .find(|e| matches_label_values(&e.label_values, vals))
        {
            return Ok(e.metric.clone());
        }

        let metric = self.new_metric.build(&self.opts, vals)?;
        bucket.push(MetricWithLabelValues {
            label_values: vals.iter().map(|v| (*v).to_owned()).collect(),
            metric: metric.clone(),
        });
        Ok(metric)
    }

    fn delete(&self, h: u64, vals: &[&str]) -> Result<()> {
        let mut shard = self.shard(h).write();
        let bucket = match shard.get_mut(&h) {
            Some(b) => b,
            None => {
                return Err(Error::Msg(format!(
                    "missing label values {:?}",
                    vals
                )))
            }
        };

        let pos = bucket
            .iter()
            .position(|e| matches_label_values(&e.label_values, vals));
        match pos {
            Some(i) => {
                bucket.swap_remove(i);
                if bucket.is_empty() {
                    shard.remove(&h);
                }
                Ok(())
            }
            None => Err(Error::Msg(format!("missing label values {:?}", vals))),
        }
    }

    fn reset(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn collect(&self) -> MetricFamily {
        let mut family = MetricFamily::new(
            self.desc.fq_name.clone(),
            self.desc.help.clone(),
            self.metric_type,
            Vec::with_capacity(self.len()),
        );
        for shard in &self.shards {
            for bucket in shard.read().values() {
                for entry in bucket {
                    family.push_metric(entry.metric.metric());
                }
            }
        }
        family
    }
}

fn matches_label_values(stored: &[String], vals: &[&str]) -> bool {
    stored.len() == vals.len() && stored.iter().zip(vals).all(|(s, v)| s == v)
}

/// A [`Collector`] that bundles a set of metrics which all share the same
/// [`Desc`] but partition it by their variable label values. Children are
/// created lazily on first access, live until explicitly deleted, and are
/// kept in a sharded hash map so hot-path lookups only take a shard-scoped
/// read lock.
pub struct MetricVec<T: MetricVecBuilder> {
    pub(crate) v: Arc<MetricVecCore<T>>,
    // Sorted by index. Curried labels are excluded from the positional
    // argument lists of this view.
    curry: Vec<CurriedLabelValue>,
}

impl<T: MetricVecBuilder> Clone for MetricVec<T> {
    fn clone(&self) -> Self {
        MetricVec {
            v: Arc::clone(&self.v),
            curry: self.curry.clone(),
        }
    }
}

impl<T: MetricVecBuilder> MetricVec<T> {
    /// `create` creates a MetricVec with description `desc`, a metric type
    /// `metric_type` and a MetricVecBuilder `new_metric`.
    pub fn create(metric_type: MetricType, new_metric: T, opts: T::P) -> Result<MetricVec<T>> {
        let desc = opts.describe()?;

        let mut shards = Vec::with_capacity(METRIC_VEC_SHARDS);
        for _ in 0..METRIC_VEC_SHARDS {
            shards.push(RwLock::new(HashMap::new()));
        }

        Ok(MetricVec {
            v: Arc::new(MetricVecCore {
                desc,
                metric_type,
                new_metric,
                opts,
                shards,
            }),
            curry: Vec::new(),
        })
    }

    /// `get_metric_with_label_values` returns the [`Metric`] for the given
    /// slice of label values (same order as the variable labels in Desc,
    /// with curried labels skipped). If that combination of label values is
    /// accessed for the first time, a new Metric is created.
    ///
    /// An error is returned if the number of label values is not the same
    /// as the number of (un-curried) variable labels in Desc.
    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> Result<T::M> {
        let full = self.inject_curried(vals)?;
        let h = hash_label_values(hash_new(), &full);
        self.v.get_or_create(h, &full)
    }

    /// `get_metric_with` returns the [`Metric`] for the given label map
    /// (must match the un-curried variable label names exactly). If that
    /// label map is accessed for the first time, a new Metric is created.
    pub fn get_metric_with(&self, labels: &HashMap<&str, &str>) -> Result<T::M> {
        let vals = self.values_from_map(labels)?;
        self.get_metric_with_label_values(&vals)
    }

    /// `with_label_values` works as `get_metric_with_label_values`, but
    /// panics on error.
    ///
    /// # Panics
    ///
    /// Panics if the number of label values does not match the number of
    /// un-curried variable labels.
    pub fn with_label_values(&self, vals: &[&str]) -> T::M {
        self.get_metric_with_label_values(vals).unwrap()
    }

    /// `with` works as `get_metric_with`, but panics on error.
    ///
    /// # Panics
    ///
    /// Panics if the label names in the map do not match the un-curried
    /// variable labels.
    pub fn with(&self, labels: &HashMap<&str, &str>) -> T::M {
        self.get_metric_with(labels).unwrap()
    }

    /// `remove_label_values` removes the metric where the variable labels
    /// are the same as those passed in as labels (same order as the
    /// variable labels in Desc, curried labels skipped). It returns an
    /// error if the number of label values is inconsistent or no metric
    /// with the given label values exists.
    pub fn remove_label_values(&self, vals: &[&str]) -> Result<()> {
        let full = self.inject_curried(vals)?;
        let h = hash_label_values(hash_new(), &full);
        self.v.delete(h, &full)
    }

    /// `remove` removes the metric where the variable labels are the same
    /// as those passed in as labels. It returns an error if no metric with
    /// the given label map exists.
    pub fn remove(&self, labels: &HashMap<&str, &str>) -> Result<()> {
        let vals = self.values_from_map(labels)?;
        self.remove_label_values(&vals)
    }

    /// `delete_partial_match` removes every child whose labels contain all
    /// of the provided name/value pairs (names may be variable or const
    /// labels). Returns the number of children removed.
    pub fn delete_partial_match(&self, labels: &HashMap<&str, &str>) -> u64 {
        // Translate the map into positional constraints up front; a name
        // that is neither a variable label nor a matching const pair can
        // match no child at all.
        let mut constraints: Vec<(usize, &str)> = Vec::with_capacity(labels.len());
        for (name, value) in labels {
            if let Some(i) = self.v.desc.variable_labels.iter().position(|l| l == name) {
                constraints.push((i, *value));
            } else if let Some(pair) = self
                .v
                .desc
                .const_label_pairs
                .iter()
                .find(|p| p.name() == *name)
            {
                if pair.value() != *value {
                    return 0;
                }
            } else {
                return 0;
            }
        }
        // A curried view only ever reaches children carrying its bound
        // values.
        for c in &self.curry {
            constraints.push((c.index, c.value.as_str()));
        }

        let mut removed = 0;
        for shard in &self.v.shards {
            let mut shard = shard.write();
            shard.retain(|_, bucket| {
                bucket.retain(|e| {
                    let matched = constraints
                        .iter()
                        .all(|(i, v)| e.label_values[*i] == **v);
                    if matched {
                        removed += 1;
                    }
                    !matched
                });
                !bucket.is_empty()
            });
        }
        removed
    }

    /// `reset` deletes all metrics in this vector.
    pub fn reset(&self) {
        self.v.reset();
    }

    /// `curry_with` returns a vector of lower dimensionality with the
    /// provided label values bound in advance. The returned vector shares
    /// its children with this one: metrics created through either view are
    /// visible to both and to collection. A label that is already curried
    /// cannot be curried again.
    pub fn curry_with(&self, labels: &HashMap<&str, &str>) -> Result<MetricVec<T>> {
        let mut curry = self.curry.clone();
        for (name, value) in labels {
            let index = self
                .v
                .desc
                .variable_labels
                .iter()
                .position(|l| l == name)
                .ok_or_else(|| {
                    Error::Msg(format!("label name {:?} is not a variable label", name))
                })?;
            if curry.iter().any(|c| c.index == index) {
                return Err(Error::Msg(format!("label name {:?} is already curried", name)));
            }
            curry.push(CurriedLabelValue {
                index,
                value: (*value).to_owned(),
            });
        }
        curry.sort_by_key(|c| c.index);

        Ok(MetricVec {
            v: Arc::clone(&self.v),
            curry,
        })
    }

    /// The descriptor shared by every child of this vector.
    pub fn desc(&self) -> &Desc {
        &self.v.desc
    }

    // Stable key of the child a value tuple resolves to; local metric
    // caches index by it.
    pub(crate) fn hash_label_values(&self, vals: &[&str]) -> Result<u64> {
        let full = self.inject_curried(vals)?;
        Ok(hash_label_values(hash_new(), &full))
    }

    // Weave the curried values back into the positional argument list,
    // producing the full tuple in variable-label order.
    fn inject_curried<'a>(&'a self, vals: &[&'a str]) -> Result<Vec<&'a str>> {
        let total = self.v.desc.variable_labels.len();
        let expect = total - self.curry.len();
        if vals.len() != expect {
            return Err(Error::InconsistentCardinality {
                expect,
                got: vals.len(),
            });
        }
        if self.curry.is_empty() {
            return Ok(vals.to_vec());
        }

        let mut full = Vec::with_capacity(total);
        let mut curry_iter = self.curry.iter().peekable();
        let mut vals_iter = vals.iter();
        for i in 0..total {
            match curry_iter.peek() {
                Some(c) if c.index == i => {
                    full.push(curry_iter.next().unwrap().value.as_str());
                }
                _ => full.push(vals_iter.next().unwrap()),
            }
        }
        Ok(full)
    }

    // Resolve a name-keyed map into positional values over the un-curried
    // variable labels.
    fn values_from_map<'a>(&self, labels: &HashMap<&str, &'a str>) -> Result<Vec<&'a str>> {
        let curried: Vec<usize> = self.curry.iter().map(|c| c.index).collect();
        let mut vals = Vec::with_capacity(labels.len());
        for (i, name) in self.v.desc.variable_labels.iter().enumerate() {
            if curried.contains(&i) {
                if labels.contains_key(name.as_str()) {
                    return Err(Error::Msg(format!(
                        "label name {:?} is curried and cannot be passed again",
                        name
                    )));
                }
                continue;
            }
            match labels.get(name.as_str()) {
                Some(v) => vals.push(*v),
                None => {
                    return Err(Error::Msg(format!(
                        "label name {:?} missing in label map",
                        name
                    )))
                }
            }
        }
        if labels.len() != vals.len() {
            return Err(Error::InconsistentCardinality {
                expect: vals.len(),
                got: labels.len(),
            });
        }
        Ok(vals)
    }
}

impl<T: MetricVecBuilder> Collector for MetricVec<T> {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.v.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.v.collect()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterVec;
    use crate::gauge::GaugeVec;
    use crate::metrics::Opts;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_with_label_values_creates_lazily() {
        let vec = CounterVec::new(Opts::new("test", "helper"), &["l1", "l2"]).unwrap();
        assert_eq!(vec.v.len(), 0);

        vec.with_label_values(&["v1", "v2"]).inc();
        vec.with_label_values(&["v1", "v2"]).inc();
        assert_eq!(vec.v.len(), 1);
        assert_eq!(vec.with_label_values(&["v1", "v2"]).get() as u64, 2);

        vec.with_label_values(&["v3", "v4"]).inc();
        assert_eq!(vec.v.len(), 2);
    }

    #[test]
    fn test_cardinality_errors() {
        let vec = CounterVec::new(Opts::new("test", "helper"), &["l1", "l2"]).unwrap();
        assert!(vec.get_metric_with_label_values(&["v1"]).is_err());
        assert!(vec
            .get_metric_with_label_values(&["v1", "v2", "v3"])
            .is_err());

        let mut labels = HashMap::new();
        labels.insert("l1", "v1");
        assert!(vec.get_metric_with(&labels).is_err());

        labels.insert("wrong", "v2");
        assert!(vec.get_metric_with(&labels).is_err());
    }

    #[test]
    fn test_map_and_positional_agree() {
        let vec = GaugeVec::new(Opts::new("test", "helper"), &["l1", "l2"]).unwrap();

        let mut labels = HashMap::new();
        labels.insert("l2", "b");
        labels.insert("l1", "a");
        vec.with(&labels).set(42.0);

        assert_eq!(vec.with_label_values(&["a", "b"]).get() as u64, 42);
        assert_eq!(
            vec.with(&labels).desc()[0].id,
            vec.with_label_values(&["a", "b"]).desc()[0].id
        );
    }

    #[test]
    fn test_remove_label_values() {
        let vec = CounterVec::new(Opts::new("test", "helper"), &["l1", "l2"]).unwrap();
        assert!(vec.remove_label_values(&["v1", "v2"]).is_err());

        vec.with_label_values(&["v1", "v2"]).inc();
        assert!(vec.remove_label_values(&["v1", "v2"]).is_ok());
        assert!(vec.remove_label_values(&["v1", "v2"]).is_err());
        assert!(vec.remove_label_values(&["v1"]).is_err());
    }

    #[test]
    fn test_delete_partial_match() {
        let vec = CounterVec::new(Opts::new("test", "helper"), &["method", "code"]).unwrap();
        vec.with_label_values(&["get", "200"]).inc();
        vec.with_label_values(&["get", "500"]).inc();
        vec.with_label_values(&["post", "500"]).inc();

        let mut labels = HashMap::new();
        labels.insert("code", "500");
        assert_eq!(vec.delete_partial_match(&labels), 2);
        assert_eq!(vec.v.len(), 1);

        // Unknown label name matches nothing.
        let mut labels = HashMap::new();
        labels.insert("nope", "1");
        assert_eq!(vec.delete_partial_match(&labels), 0);
        assert_eq!(vec.v.len(), 1);
    }

    #[test]
    fn test_reset() {
        let vec = CounterVec::new(Opts::new("test", "helper"), &["l1"]).unwrap();
        vec.with_label_values(&["a"]).inc();
        vec.with_label_values(&["b"]).inc();
        vec.reset();
        assert_eq!(vec.v.len(), 0);
    }

    #[test]
    fn test_curry_with() {
        let vec =
            CounterVec::new(Opts::new("test", "helper"), &["method", "code", "zone"]).unwrap();

        let mut bind = HashMap::new();
        bind.insert("code", "200");
        let curried = vec.curry_with(&bind).unwrap();

        curried.with_label_values(&["get", "eu"]).inc();
        // Both views reach the same child.
        assert_eq!(
            vec.with_label_values(&["get", "200", "eu"]).get() as u64,
            1
        );

        // Children created through any view show up in one collection.
        let families = vec.collect();
        assert_eq!(families[0].metrics().len(), 1);

        // Cardinality accounts for the curried label.
        assert!(curried.get_metric_with_label_values(&["get", "200", "eu"]).is_err());

        // Re-currying the same label fails.
        assert!(curried.curry_with(&bind).is_err());

        // Map form rejects curried names.
        let mut labels = HashMap::new();
        labels.insert("method", "get");
        labels.insert("zone", "eu");
        labels.insert("code", "200");
        assert!(curried.get_metric_with(&labels).is_err());

        // ... and works without them.
        labels.remove("code");
        curried.with(&labels).inc();
        assert_eq!(
            vec.with_label_values(&["get", "200", "eu"]).get() as u64,
            2
        );
    }

    #[test]
    fn test_curried_partial_delete_scoped_to_binding() {
        let vec = CounterVec::new(Opts::new("test", "helper"), &["method", "code"]).unwrap();
        vec.with_label_values(&["get", "200"]).inc();
        vec.with_label_values(&["get", "500"]).inc();

        let mut bind = HashMap::new();
        bind.insert("code", "500");
        let curried = vec.curry_with(&bind).unwrap();

        let mut m = HashMap::new();
        m.insert("method", "get");
        assert_eq!(curried.delete_partial_match(&m), 1);
        // The child outside the binding survives.
        assert_eq!(vec.v.len(), 1);
        assert_eq!(vec.with_label_values(&["get", "200"]).get() as u64, 1);
    }

    #[test]
    fn test_concurrent_children() {
        let vec = Arc::new(
            CounterVec::new(Opts::new("test", "helper"), &["tid"]).unwrap(),
        );

        let mut handles = Vec::new();
        for tid in 0..8 {
            let vec = Arc::clone(&vec);
            handles.push(thread::spawn(move || {
                let tid = format!("{}", tid);
                for _ in 0..1000 {
                    vec.with_label_values(&[&tid]).inc();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(vec.v.len(), 8);
        for tid in 0..8 {
            let tid = format!("{}", tid);
            assert_eq!(vec.with_label_values(&[&tid]).get() as u64, 1000);
        }
    }
}
