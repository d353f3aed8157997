// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use crate::errors::{Error, ExistingCollector, MultiError, Result};
use crate::labels::{hash_add, hash_add_byte, hash_new, SEPARATOR_BYTE};
use crate::metrics::Collector;
use crate::model::{Metric, MetricFamily, MetricValue};

/// The outcome of one best-effort gather pass: the (possibly partial)
/// sorted snapshot plus every error encountered along the way. Callers
/// such as exposition handlers decide whether to serve the partial payload
/// or to fail.
#[derive(Debug)]
pub struct Gathered {
    /// Families sorted by name, each family's metrics sorted by their
    /// label values.
    pub families: Vec<MetricFamily>,
    /// Per-collector and per-metric errors. Empty for a clean pass.
    pub errors: Vec<Error>,
}

impl Gathered {
    /// Whether the pass completed without any error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn the outcome into a hard result, giving up the partial snapshot
    /// when any error occurred.
    pub fn into_result(self) -> Result<Vec<MetricFamily>> {
        if self.errors.is_empty() {
            Ok(self.families)
        } else {
            Err(Error::Multi(MultiError(self.errors)))
        }
    }
}

/// `Gatherer` is the interface for the part of a registry in charge of
/// gathering the collected metrics into a consistent snapshot.
pub trait Gatherer: Send + Sync {
    /// Collect from every registered source and assemble the snapshot.
    fn gather(&self) -> Gathered;
}

struct RegistryCore {
    collectors_by_id: HashMap<u64, Arc<dyn Collector>>,
    dim_hashes_by_name: HashMap<String, u64>,
    desc_ids: HashSet<u64>,
    // Collectors that describe no descriptors up front. They take a looser
    // validation path and stay registered for the process lifetime.
    unchecked_collectors: Vec<Arc<dyn Collector>>,
    pedantic: bool,
}

impl RegistryCore {
    fn register(&mut self, c: Arc<dyn Collector>) -> Result<()> {
        let descs: Vec<_> = c.desc().into_iter().cloned().collect();

        if descs.is_empty() {
            self.unchecked_collectors.push(c);
            return Ok(());
        }

        let mut desc_id_set = HashSet::new();
        let mut collector_id: u64 = 0;
        for desc in &descs {
            // Is the desc_id unique?
            // (In other words: Is the fqName + constLabel combination
            // unique?)
            if !desc_id_set.insert(desc.id) {
                return Err(Error::Msg(format!(
                    "a duplicate descriptor within the same collector, \
                     fully-qualified name: {:?}",
                    desc.fq_name
                )));
            }
            collector_id = collector_id.wrapping_add(desc.id);
        }

        if let Some(existing) = self.collectors_by_id.get(&collector_id) {
            return Err(Error::AlreadyReg(ExistingCollector(Arc::clone(existing))));
        }

        for desc in &descs {
            if self.desc_ids.contains(&desc.id) {
                return Err(Error::Msg(format!(
                    "descriptor {:?} already exists with the same \
                     fully-qualified name and const label values",
                    desc.fq_name
                )));
            }

            if let Some(hash) = self.dim_hashes_by_name.get(&desc.fq_name) {
                if *hash != desc.dim_hash {
                    return Err(Error::DescriptorMismatch {
                        fq_name: desc.fq_name.clone(),
                    });
                }
            }
        }

        for desc in &descs {
            self.dim_hashes_by_name
                .insert(desc.fq_name.clone(), desc.dim_hash);
            self.desc_ids.insert(desc.id);
        }
        self.collectors_by_id.insert(collector_id, c);
        Ok(())
    }

    fn unregister(&mut self, c: &dyn Collector) -> bool {
        let mut id_set = Vec::new();
        let mut collector_id: u64 = 0;
        for desc in c.desc() {
            if !id_set.contains(&desc.id) {
                id_set.push(desc.id);
                collector_id = collector_id.wrapping_add(desc.id);
            }
        }

        if self.collectors_by_id.remove(&collector_id).is_none() {
            return false;
        }

        for id in id_set {
            self.desc_ids.remove(&id);
        }
        // dim_hashes_by_name is left untouched: help strings and label
        // dimensions must stay consistent for the lifetime of the process.
        true
    }
}

/// A `Registry` registers collectors, collects their metrics, and gathers
/// them into a sorted, validated list of [`MetricFamily`] snapshots for
/// exposition.
#[derive(Clone)]
pub struct Registry {
    r: Arc<RwLock<RegistryCore>>,
}

impl Default for Registry {
    fn default() -> Registry {
        Registry {
            r: Arc::new(RwLock::new(RegistryCore {
                collectors_by_id: HashMap::new(),
                dim_hashes_by_name: HashMap::new(),
                desc_ids: HashSet::new(),
                unchecked_collectors: Vec::new(),
                pedantic: false,
            })),
        }
    }
}

impl Registry {
    /// `new` creates a Registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// A registry that additionally verifies during gathering that every
    /// family from a checked collector was declared through `desc()` at
    /// registration time. Meant for tests.
    pub fn new_pedantic() -> Registry {
        let r = Registry::default();
        r.r.write().pedantic = true;
        r
    }

    /// `register` registers a new [`Collector`] to be included in metrics
    /// collection. It returns an error if the descriptors provided by the
    /// collector are invalid or if they — in combination with descriptors
    /// of already registered collectors — do not fulfill the consistency
    /// and uniqueness criteria described in the documentation of
    /// [`Desc`](crate::Desc).
    ///
    /// If the provided collector is equal to a collector already
    /// registered (which includes the case of re-registering the same
    /// collector), the [`Error::AlreadyReg`] error is returned. The error
    /// carries an [`ExistingCollector`] handle on the registered
    /// collector, so the caller may adopt that registration — keep
    /// observing through the existing collector's metrics — instead of
    /// the instance it tried to register.
    ///
    /// A collector describing no descriptors is accepted as *unchecked*:
    /// its output skips duplicate detection and it cannot be unregistered.
    pub fn register(&self, c: Box<dyn Collector>) -> Result<()> {
        self.r.write().register(Arc::from(c))
    }

    /// `must_register` works like `register` for a batch of collectors,
    /// panicking on the first error. Intended for registration at startup.
    ///
    /// # Panics
    ///
    /// Panics when any registration fails.
    pub fn must_register(&self, cs: Vec<Box<dyn Collector>>) {
        for c in cs {
            self.register(c).unwrap();
        }
    }

    /// `unregister` unregisters the [`Collector`] whose `desc()` yields
    /// the same descriptor set as the passed collector. Returns false if
    /// no such collector is registered (which includes unchecked
    /// collectors).
    pub fn unregister(&self, c: &dyn Collector) -> bool {
        self.r.write().unregister(c)
    }

    /// `gather` calls `collect` on all registered collectors and returns
    /// the merged, sorted snapshot, discarding any per-collector errors.
    /// Use [`Gatherer::gather`] to observe the errors as well.
    pub fn gather(&self) -> Vec<MetricFamily> {
        Gatherer::gather(self).families
    }
}

impl Gatherer for Registry {
    fn gather(&self) -> Gathered {
        // Snapshot the collector set under the read lock, then collect
        // with the lock released so registration is only serialized with
        // the start of a pass.
        let (items, declared_names, pedantic) = {
            let core = self.r.read();
            let mut items: Vec<(Arc<dyn Collector>, bool)> = core
                .collectors_by_id
                .values()
                .map(|c| (Arc::clone(c), true))
                .collect();
            items.extend(
                core.unchecked_collectors
                    .iter()
                    .map(|c| (Arc::clone(c), false)),
            );
            let declared_names: HashSet<String> = if core.pedantic {
                core.dim_hashes_by_name.keys().cloned().collect()
            } else {
                HashSet::new()
            };
            (items, declared_names, core.pedantic)
        };

        let mut mf_by_name: BTreeMap<String, (MetricFamily, bool)> = BTreeMap::new();
        let mut errors: Vec<Error> = Vec::new();

        let n_workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(items.len().max(1));
        let chunk_size = (items.len() + n_workers - 1) / n_workers.max(1);

        if !items.is_empty() {
            thread::scope(|s| {
                let (tx, rx) = mpsc::channel();
                for chunk in items.chunks(chunk_size.max(1)) {
                    let tx = tx.clone();
                    s.spawn(move || {
                        for (c, checked) in chunk {
                            let outcome = catch_unwind(AssertUnwindSafe(|| c.collect()));
                            let msg = match outcome {
                                Ok(mfs) => Ok((mfs, *checked)),
                                Err(payload) => Err(panic_message(&payload)),
                            };
                            if tx.send(msg).is_err() {
                                return;
                            }
                        }
                    });
                }
                drop(tx);

                for msg in rx {
                    match msg {
                        Ok((mfs, checked)) => {
                            for mf in mfs {
                                merge_family(&mut mf_by_name, mf, checked, &mut errors);
                            }
                        }
                        Err(panic_msg) => {
                            errors.push(Error::Msg(format!(
                                "collector panicked during collect: {}",
                                panic_msg
                            )));
                        }
                    }
                }
            });
        }

        let mut families = Vec::with_capacity(mf_by_name.len());
        for (_, (mut mf, checked)) in mf_by_name {
            if pedantic && checked && !declared_names.contains(mf.name()) {
                errors.push(Error::Msg(format!(
                    "family {:?} was collected but never described",
                    mf.name()
                )));
            }
            check_family(&mut mf, &mut errors);
            mf.sort_metrics();
            families.push(mf);
        }

        Gathered { families, errors }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn merge_family(
    mf_by_name: &mut BTreeMap<String, (MetricFamily, bool)>,
    mf: MetricFamily,
    checked: bool,
    errors: &mut Vec<Error>,
) {
    match mf_by_name.entry(mf.name().to_owned()) {
        std::collections::btree_map::Entry::Vacant(entry) => {
            entry.insert((mf, checked));
        }
        std::collections::btree_map::Entry::Occupied(mut entry) => {
            let (existing, existing_checked) = entry.get_mut();
            if existing.metric_type() != mf.metric_type() {
                errors.push(Error::Msg(format!(
                    "family {:?} collected with mixed types {:?} and {:?}",
                    mf.name(),
                    existing.metric_type(),
                    mf.metric_type()
                )));
                return;
            }
            // Several collectors may legitimately feed one family (same
            // name, disjoint const-label values); the first help string
            // wins.
            *existing_checked = *existing_checked && checked;
            existing.metrics_mut().extend(mf.into_metrics());
        }
    }
}

// Structural validation of one merged family. Violations are recorded and
// the family is still returned: gathering is best-effort.
fn check_family(mf: &mut MetricFamily, errors: &mut Vec<Error>) {
    // All metrics of a family must agree on their label-name set. Metrics
    // deviating from the first one are dropped.
    let expected: Option<Vec<String>> = mf
        .metrics()
        .first()
        .map(|m| m.labels().iter().map(|lp| lp.name().to_owned()).collect());
    if let Some(expected) = expected {
        let name = mf.name().to_owned();
        let metrics = mf.metrics_mut();
        let before = metrics.len();
        metrics.retain(|m| {
            let names: Vec<String> = m.labels().iter().map(|lp| lp.name().to_owned()).collect();
            names == expected
        });
        if metrics.len() != before {
            errors.push(Error::Msg(format!(
                "family {:?} dropped {} metric(s) with inconsistent label names",
                name,
                before - metrics.len()
            )));
        }
    }

    // Duplicate series (same label-value tuple) within one pass.
    let mut seen = HashSet::new();
    for m in mf.metrics() {
        let fp = metric_fingerprint(mf.name(), m);
        if !seen.insert(fp) {
            errors.push(Error::Msg(format!(
                "family {:?} contains duplicate metrics with the same label values",
                mf.name()
            )));
            break;
        }
    }

    for m in mf.metrics() {
        match m.value() {
            MetricValue::Histogram(h) => {
                let mut prev_bound = f64::NEG_INFINITY;
                let mut prev_count = 0;
                let mut ok = true;
                for b in &h.buckets {
                    if b.upper_bound <= prev_bound || b.cumulative_count < prev_count {
                        ok = false;
                        break;
                    }
                    prev_bound = b.upper_bound;
                    prev_count = b.cumulative_count;
                }
                if ok && h.sample_count < prev_count {
                    ok = false;
                }
                if !ok {
                    errors.push(Error::Msg(format!(
                        "family {:?} contains a histogram with inconsistent buckets",
                        mf.name()
                    )));
                }
            }
            MetricValue::Summary(s) => {
                let mut prev_q = f64::NEG_INFINITY;
                for q in &s.quantiles {
                    if !(q.quantile >= 0.0 && q.quantile <= 1.0) || q.quantile <= prev_q {
                        errors.push(Error::Msg(format!(
                            "family {:?} contains a summary with invalid quantile ranks",
                            mf.name()
                        )));
                        break;
                    }
                    prev_q = q.quantile;
                    // NaN marks an empty decay window and is legal; an
                    // infinite estimate is not.
                    if q.value.is_infinite() {
                        errors.push(Error::Msg(format!(
                            "family {:?} contains a summary with an infinite quantile value",
                            mf.name()
                        )));
                        break;
                    }
                }
            }
            _ => {}
        }
    }
}

fn metric_fingerprint(name: &str, m: &Metric) -> u64 {
    let mut pairs: Vec<(&str, &str)> = m
        .labels()
        .iter()
        .map(|lp| (lp.name(), lp.value()))
        .collect();
    pairs.sort();

    let mut h = hash_add(hash_new(), name);
    h = hash_add_byte(h, SEPARATOR_BYTE);
    for (n, v) in pairs {
        h = hash_add(h, n);
        h = hash_add_byte(h, SEPARATOR_BYTE);
        h = hash_add(h, v);
        h = hash_add_byte(h, SEPARATOR_BYTE);
    }
    h
}

lazy_static::lazy_static! {
    static ref DEFAULT_REGISTRY: Registry = Registry::new();
}

/// The default registry conventionally shared by a process. It starts
/// empty; all the `register_*!` macros target it.
pub fn default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}

/// `register` registers a new [`Collector`] with the default registry.
pub fn register(c: Box<dyn Collector>) -> Result<()> {
    DEFAULT_REGISTRY.register(c)
}

/// `unregister` unregisters the [`Collector`] from the default registry.
pub fn unregister(c: &dyn Collector) -> bool {
    DEFAULT_REGISTRY.unregister(c)
}

/// `gather` returns the merged snapshot of the default registry.
pub fn gather() -> Vec<MetricFamily> {
    DEFAULT_REGISTRY.gather()
}
