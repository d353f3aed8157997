// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::{BTreeSet, HashMap};

use crate::errors::{Error, Result};
use crate::labels::{
    hash_add, hash_add_byte, hash_new, is_reserved_label_name, is_valid_label_name,
    is_valid_metric_name, SEPARATOR_BYTE,
};
use crate::model::LabelPair;

/// The descriptor used by every metric in this crate. It is the canonical
/// identity of a metric family: registries deduplicate and validate against
/// it, and collectors advertise it through
/// [`Collector::desc`](crate::Collector::desc).
///
/// Descriptors registered with the same registry have to fulfill certain
/// consistency and uniqueness criteria: they must have the same
/// fully-qualified name and const-label set to share an `id`, and equal
/// `id`s must agree on help and label dimensions.
#[derive(Clone, Debug)]
pub struct Desc {
    /// fq_name has been built from namespace, subsystem, and name of the
    /// original Opts.
    pub fq_name: String,
    /// help provides some helpful information about this metric.
    pub help: String,
    /// const_label_pairs contains precalculated label pairs, sorted by
    /// name.
    pub const_label_pairs: Vec<LabelPair>,
    /// variable_labels contains names of labels for which the metric
    /// maintains variable values, in declaration order.
    pub variable_labels: Vec<String>,
    /// id is a hash of the values of the const_label_pairs and fq_name.
    /// This must be unique among all registered descriptors and can
    /// therefore be used as an identifier of the descriptor.
    pub id: u64,
    /// dim_hash is a hash of the help string and the declared label names.
    /// Descriptors with the same fq_name but different dim_hashes are
    /// rejected at registration.
    pub dim_hash: u64,
}

impl Desc {
    /// Initialize a new [`Desc`]. Errors if the name or help string is
    /// invalid, if a label name is invalid or reserved, or if a label name
    /// appears both as a const and as a variable label.
    pub fn new(
        fq_name: String,
        help: String,
        variable_labels: Vec<String>,
        const_labels: HashMap<String, String>,
    ) -> Result<Desc> {
        if help.is_empty() {
            return Err(Error::Msg(format!(
                "empty help string for metric {:?}",
                fq_name
            )));
        }

        if !is_valid_metric_name(&fq_name) {
            return Err(Error::Msg(format!("{:?} is not a valid metric name", fq_name)));
        }

        // label_values contains the label values of const labels (in order
        // of their sorted label names) plus the fq_name (at position 0).
        let mut label_values = Vec::with_capacity(const_labels.len() + 1);
        label_values.push(fq_name.clone());

        let mut label_names = BTreeSet::new();
        for label_name in const_labels.keys() {
            check_label_name(label_name)?;
            if !label_names.insert(label_name.clone()) {
                return Err(Error::Msg(format!(
                    "duplicate const label name {:?}",
                    label_name
                )));
            }
        }

        // ... so that we can use BTreeSet's ordered iteration here.
        for label_name in &label_names {
            label_values.push(const_labels[label_name].clone());
        }

        // Now add the variable label names, but prefix them with something
        // that cannot be in a regular label name. That prevents matching
        // the label dimensions with a different mix between preset and
        // variable labels.
        let mut seen = label_names.clone();
        for label_name in &variable_labels {
            check_label_name(label_name)?;
            if !seen.insert(format!("${}", label_name)) || label_names.contains(label_name) {
                return Err(Error::Msg(format!(
                    "duplicate variable label name {:?}",
                    label_name
                )));
            }
        }

        let mut id = hash_new();
        for v in &label_values {
            id = hash_add(id, v);
            id = hash_add_byte(id, SEPARATOR_BYTE);
        }

        let mut dim_hash = hash_add(hash_new(), &help);
        dim_hash = hash_add_byte(dim_hash, SEPARATOR_BYTE);
        for label_name in &variable_labels {
            dim_hash = hash_add(dim_hash, label_name);
            dim_hash = hash_add_byte(dim_hash, SEPARATOR_BYTE);
        }
        for label_name in &label_names {
            dim_hash = hash_add(dim_hash, label_name);
            dim_hash = hash_add_byte(dim_hash, SEPARATOR_BYTE);
        }

        let mut const_label_pairs = Vec::with_capacity(const_labels.len());
        for (name, value) in const_labels {
            const_label_pairs.push(LabelPair::new(name, value));
        }
        const_label_pairs.sort();

        Ok(Desc {
            fq_name,
            help,
            const_label_pairs,
            variable_labels,
            id,
            dim_hash,
        })
    }
}

fn check_label_name(label_name: &str) -> Result<()> {
    if !is_valid_label_name(label_name) {
        return Err(Error::Msg(format!(
            "{:?} is not a valid label name",
            label_name
        )));
    }
    if is_reserved_label_name(label_name) {
        return Err(Error::Msg(format!(
            "label name {:?} is reserved for internal use",
            label_name
        )));
    }
    Ok(())
}

/// An interface for describing a metric's identity, implemented by every
/// options type.
pub trait Describer {
    /// Build a [`Desc`] from the implementor's current state.
    fn describe(&self) -> Result<Desc>;
}
