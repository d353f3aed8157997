// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! Lock-backed stand-ins for targets without 64-bit atomic instructions.
//! Same interface as the native module, including the extended orderings
//! the histogram hot path asks for (orderings degrade to the lock's
//! sequential consistency here).

use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use super::Atomic;

macro_rules! lock_backed_atomic {
    ($name:ident, $ty:ty) => {
        #[derive(Debug)]
        pub struct $name {
            inner: Mutex<$ty>,
        }

        impl Atomic for $name {
            type T = $ty;

            fn new(val: Self::T) -> $name {
                $name {
                    inner: Mutex::new(val),
                }
            }

            fn set(&self, val: Self::T) {
                *self.inner.lock() = val;
            }

            fn get(&self) -> Self::T {
                *self.inner.lock()
            }

            fn inc_by(&self, delta: Self::T) {
                *self.inner.lock() += delta;
            }

            fn dec_by(&self, delta: Self::T) {
                *self.inner.lock() -= delta;
            }
        }
    };
}

lock_backed_atomic!(AtomicF64, f64);
lock_backed_atomic!(AtomicI64, i64);
lock_backed_atomic!(AtomicU64, u64);

impl AtomicF64 {
    pub(crate) fn swap(&self, new: f64, _ordering: Ordering) -> f64 {
        let mut guard = self.inner.lock();
        let old = *guard;
        *guard = new;
        old
    }
}

impl AtomicU64 {
    pub(crate) fn inc_by_with_ordering(&self, delta: u64, _ordering: Ordering) -> u64 {
        let mut guard = self.inner.lock();
        let old = *guard;
        *guard += delta;
        old
    }

    pub(crate) fn load_with_ordering(&self, _ordering: Ordering) -> u64 {
        *self.inner.lock()
    }
}
