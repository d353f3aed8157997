// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::cmp::*;
use std::ops::*;

cfg_if::cfg_if! {
    if #[cfg(target_has_atomic = "64")] {
        mod native;
        pub use self::native::{AtomicF64, AtomicI64, AtomicU64};
    } else {
        // Hosts without 64-bit atomic instructions get a lock-backed slot
        // with the same interface.
        mod fallback;
        pub use self::fallback::{AtomicF64, AtomicI64, AtomicU64};
    }
}

/// An interface for numbers. Used to generically model float metrics and
/// integer metrics, i.e. [`Counter`](crate::Counter) and
/// [`IntCounter`](crate::IntCounter).
pub trait Number:
    Sized + AddAssign + SubAssign + PartialOrd + PartialEq + Copy + Send + Sync
{
    /// `std::convert::From<i64> for f64` is not implemented, so that we
    /// need to implement our own.
    fn from_i64(v: i64) -> Self;
    /// Convert to a f64.
    fn into_f64(self) -> f64;
}

impl Number for i64 {
    #[inline]
    fn from_i64(v: i64) -> Self {
        v
    }

    #[inline]
    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Number for u64 {
    #[inline]
    fn from_i64(v: i64) -> Self {
        v as u64
    }

    #[inline]
    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Number for f64 {
    #[inline]
    fn from_i64(v: i64) -> Self {
        v as f64
    }

    #[inline]
    fn into_f64(self) -> f64 {
        self
    }
}

/// An interface for 64-bit atomic slots. Used to generically model float
/// metrics and integer metrics.
pub trait Atomic: Send + Sync {
    /// The numeric type associated with this atomic.
    type T: Number;
    /// Create a new atomic value.
    fn new(val: Self::T) -> Self;
    /// Set the value to the provided value.
    fn set(&self, val: Self::T);
    /// Get the value.
    fn get(&self) -> Self::T;
    /// Increment the value by a given amount.
    fn inc_by(&self, delta: Self::T);
    /// Decrement the value by a given amount.
    fn dec_by(&self, delta: Self::T);
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;
    use std::f64::{self, EPSILON};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_atomic_f64() {
        let table: Vec<f64> = vec![0.0, 1.0, PI, f64::MIN, f64::MAX];

        for f in table {
            assert!((f - AtomicF64::new(f).get()).abs() < EPSILON);
        }

        let av = AtomicF64::new(0.0);
        av.inc_by(1.5);
        av.inc_by(1.5);
        av.dec_by(1.0);
        assert!((av.get() - 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_atomic_i64() {
        let ai64 = AtomicI64::new(0);
        assert_eq!(ai64.get(), 0);

        ai64.inc_by(1);
        assert_eq!(ai64.get(), 1);

        ai64.inc_by(-5);
        assert_eq!(ai64.get(), -4);
    }

    #[test]
    fn test_atomic_u64() {
        let au64 = AtomicU64::new(0);
        assert_eq!(au64.get(), 0);

        au64.inc_by(123);
        assert_eq!(au64.get(), 123);
    }

    // The CAS loop behind `inc_by` must not lose updates under contention.
    #[test]
    fn test_atomic_f64_concurrent_adds() {
        let av = Arc::new(AtomicF64::new(0.0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let av = Arc::clone(&av);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    av.inc_by(1.0);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!((av.get() - 40_000.0).abs() < EPSILON);
    }
}
