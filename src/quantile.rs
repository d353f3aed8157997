// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! A streaming estimator for targeted φ-quantiles (Cormode, Korn,
//! Muthukrishnan, Srivastava: "Effective Computation of Biased Quantiles
//! over Data Streams").
//!
//! The stream keeps a compressed list of samples, each covering a range of
//! ranks (`width`) with a bounded rank uncertainty (`delta`). The
//! compression invariant `width + delta ≤ f(rank)` is chosen so a query
//! for rank φn returns a value whose true rank is within εn of it, for
//! every configured (φ, ε) objective.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    // Number of original observations this sample stands for.
    width: f64,
    // Upper bound on the spread between this sample's minimal rank and the
    // rank right after the previous sample.
    delta: f64,
}

/// A quantile stream tuned for a fixed set of (quantile, allowed error)
/// objectives. Insertion buffers observations and merges them in batches,
/// so the amortized cost per observation is O(1).
#[derive(Debug)]
pub(crate) struct Stream {
    // Sorted ascending by quantile.
    targets: Vec<(f64, f64)>,
    // Sorted ascending by value.
    samples: Vec<Sample>,
    buf: Vec<f64>,
    buf_cap: usize,
    n: f64,
}

impl Stream {
    pub fn targeted(objectives: &[(f64, f64)], buf_cap: usize) -> Stream {
        let mut targets = objectives.to_vec();
        targets.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        Stream {
            targets,
            samples: Vec::new(),
            buf: Vec::with_capacity(buf_cap),
            buf_cap,
            n: 0.0,
        }
    }

    /// Add one observation to the stream.
    pub fn insert(&mut self, v: f64) {
        self.buf.push(v);
        if self.buf.len() >= self.buf_cap {
            self.flush();
        }
    }

    /// The quantile estimate for rank `q`, or NaN when the stream is
    /// empty.
    pub fn query(&mut self, q: f64) -> f64 {
        self.flush();
        if self.samples.is_empty() {
            return f64::NAN;
        }

        let rank = q * self.n;
        let t = rank + self.invariant(rank) / 2.0;

        let mut r = 0.0;
        for i in 1..self.samples.len() {
            let p = self.samples[i - 1];
            let c = self.samples[i];
            r += p.width;
            if r + c.width + c.delta > t {
                return p.value;
            }
        }
        self.samples[self.samples.len() - 1].value
    }

    /// Drop all state, starting an empty stream with the same objectives.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buf.clear();
        self.n = 0.0;
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        self.buf
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        self.merge_buf();
        self.buf.clear();
        self.compress();
    }

    // Merge the sorted buffer into the sample list, assigning each new
    // sample the largest delta the invariant still permits. Samples landing
    // at either end are exact (delta 0).
    fn merge_buf(&mut self) {
        let mut r = 0.0;
        let mut i = 0;
        let buf = std::mem::replace(&mut self.buf, Vec::new());
        for &v in &buf {
            while i < self.samples.len() && self.samples[i].value <= v {
                r += self.samples[i].width;
                i += 1;
            }
            let delta = if i == 0 || i == self.samples.len() {
                0.0
            } else {
                (self.invariant(r).floor() - 1.0).max(0.0)
            };
            self.samples.insert(
                i,
                Sample {
                    value: v,
                    width: 1.0,
                    delta,
                },
            );
            self.n += 1.0;
            r += 1.0;
            i += 1;
        }
        self.buf = buf;
    }

    // One right-to-left pass merging neighbors whose combined rank spread
    // still fits the invariant.
    fn compress(&mut self) {
        if self.samples.len() < 2 {
            return;
        }

        let mut xi = self.samples.len() - 1;
        let mut x = self.samples[xi];
        let mut r = self.n - 1.0 - x.width;

        let mut i = self.samples.len() as isize - 2;
        while i >= 0 {
            let c = self.samples[i as usize];
            if c.width + x.width + x.delta <= self.invariant(r) {
                x.width += c.width;
                self.samples[xi] = x;
                self.samples.remove(i as usize);
                xi -= 1;
            } else {
                x = c;
                xi = i as usize;
            }
            r -= c.width;
            i -= 1;
        }
    }

    // The error function: how much rank spread a sample at rank r may
    // carry without breaking any objective.
    fn invariant(&self, r: f64) -> f64 {
        let mut m = f64::MAX;
        for &(q, e) in &self.targets {
            let f = if q * self.n <= r {
                2.0 * e * r / q
            } else {
                2.0 * e * (self.n - r) / (1.0 - q)
            };
            if f < m {
                m = f;
            }
        }
        if m < f64::MAX {
            m
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJECTIVES: &[(f64, f64)] = &[(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)];

    #[test]
    fn test_empty_stream_is_nan() {
        let mut s = Stream::targeted(OBJECTIVES, 500);
        assert!(s.query(0.5).is_nan());
    }

    #[test]
    fn test_single_observation() {
        let mut s = Stream::targeted(OBJECTIVES, 500);
        s.insert(3.14);
        assert!((s.query(0.5) - 3.14).abs() < 1e-9);
        assert!((s.query(0.99) - 3.14).abs() < 1e-9);
    }

    #[test]
    fn test_ascending_integers() {
        let mut s = Stream::targeted(OBJECTIVES, 500);
        for v in 1..=100 {
            s.insert(f64::from(v));
        }

        let q50 = s.query(0.5);
        assert!((45.0..=55.0).contains(&q50), "q50 = {}", q50);

        let q90 = s.query(0.9);
        assert!((89.0..=91.0).contains(&q90), "q90 = {}", q90);

        let q99 = s.query(0.99);
        assert!((98.9..=99.1).contains(&q99), "q99 = {}", q99);
    }

    // A deterministic permutation of 0..10_000 must stay within each
    // objective's rank tolerance.
    #[test]
    fn test_rank_accuracy_on_permuted_input() {
        let n = 10_000u64;
        let mut s = Stream::targeted(OBJECTIVES, 500);
        for i in 0..n {
            // 7919 is coprime with 10_000, so this visits every value once.
            let v = (i * 7919) % n;
            s.insert(v as f64);
        }

        for &(q, e) in OBJECTIVES {
            let got = s.query(q);
            // The true rank of value v among 0..n is v + 1.
            let rank = got + 1.0;
            let target = q * n as f64;
            let tolerance = e * n as f64 + 1.0;
            assert!(
                (rank - target).abs() <= tolerance,
                "q = {}: rank {} not within {} of {}",
                q,
                rank,
                tolerance,
                target
            );
        }
    }

    #[test]
    fn test_compression_bounds_memory() {
        let mut s = Stream::targeted(OBJECTIVES, 500);
        for i in 0..100_000u64 {
            s.insert((i % 1000) as f64);
        }
        s.flush();
        // Without compression this would hold 100k samples.
        assert!(s.samples.len() < 5_000, "kept {} samples", s.samples.len());
    }

    #[test]
    fn test_reset() {
        let mut s = Stream::targeted(OBJECTIVES, 500);
        for v in 1..=100 {
            s.insert(f64::from(v));
        }
        s.reset();
        assert!(s.query(0.5).is_nan());

        s.insert(7.0);
        assert!((s.query(0.5) - 7.0).abs() < 1e-9);
    }
}
