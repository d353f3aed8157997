// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

/*!
Unsync local metrics, provided by the metric types' `local()` methods.

Local metrics buffer observations in plain (non-atomic) fields owned by a
single thread and fold them into the shared metric on an explicit
`flush()` (local histograms also flush on drop). They trade freshness for
a hot path with no atomic traffic at all, which pays off in tight loops
that observe millions of times between collections.
*/

pub use super::counter::{
    GenericLocalCounter, GenericLocalCounterVec, LocalCounter, LocalCounterVec, LocalIntCounter,
    LocalIntCounterVec,
};
pub use super::histogram::{LocalHistogram, LocalHistogramTimer, LocalHistogramVec};
