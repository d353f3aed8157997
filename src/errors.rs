// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::metrics::Collector;

/// A shared handle on the collector that already owns a descriptor set,
/// carried by [`Error::AlreadyReg`]. The losing caller can adopt the
/// existing registration through it instead of keeping its own instance.
pub struct ExistingCollector(pub(crate) Arc<dyn Collector>);

impl ExistingCollector {
    /// Borrow the collector that won the original registration.
    pub fn collector(&self) -> &dyn Collector {
        self.0.as_ref()
    }

    /// Take a shared handle on the existing collector.
    pub fn into_collector(self) -> Arc<dyn Collector> {
        self.0
    }
}

impl fmt::Debug for ExistingCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .0
            .desc()
            .into_iter()
            .map(|d| d.fq_name.as_str())
            .collect();
        f.debug_tuple("ExistingCollector").field(&names).finish()
    }
}

/// The error types for metric construction, registration and collection.
#[derive(Debug, Error)]
pub enum Error {
    /// A collector with the same descriptor set is already registered
    /// (which includes re-registering the same collector). Recoverable:
    /// the payload hands the caller the existing collector to adopt.
    #[error("duplicate metrics collector registration attempted")]
    AlreadyReg(ExistingCollector),
    /// A descriptor with the same fully-qualified name and const labels is
    /// already registered, but with a different help string or label
    /// dimensions.
    #[error("descriptor {fq_name} already registered with different help or label names")]
    DescriptorMismatch { fq_name: String },
    /// The provided label values do not match the descriptor's cardinality.
    #[error("expected {expect} label values, but got {got}")]
    InconsistentCardinality { expect: usize, got: usize },
    /// A counter was asked to decrease.
    #[error("counter cannot decrease in value (delta {0})")]
    DecreaseCounter(f64),
    /// An exemplar exceeded the label length budget or used invalid labels.
    #[error("invalid exemplar: {0}")]
    InvalidExemplar(String),
    /// Several independent errors from one gather pass.
    #[error("{0}")]
    Multi(MultiError),
    /// A custom error message.
    #[error("{0}")]
    Msg(String),
}

/// A container for the errors of a best-effort gather pass. The partial
/// snapshot is still usable when this is returned alongside it.
#[derive(Debug, Default)]
pub struct MultiError(pub Vec<Error>);

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred while gathering metrics", self.0.len())?;
        for e in &self.0 {
            write!(f, "; {}", e)?;
        }
        Ok(())
    }
}

impl MultiError {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A specialized Result type for metric operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::InconsistentCardinality { expect: 2, got: 3 };
        assert_eq!(format!("{}", e), "expected 2 label values, but got 3");

        let multi = Error::Multi(MultiError(vec![
            Error::DescriptorMismatch {
                fq_name: "requests_total".to_owned(),
            },
            Error::DecreaseCounter(-1.0),
        ]));
        let s = format!("{}", multi);
        assert!(s.starts_with("2 error(s)"));
        assert!(s.contains("counter cannot decrease"));
    }
}
