// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! The in-memory snapshot model handed to encoders.
//!
//! A gather pass produces a list of [`MetricFamily`] values, each holding
//! the family metadata plus one [`Metric`] per live series. Encoders
//! consume this structure; nothing in here knows about wire formats.

use std::cmp::Ordering;

/// The five exposition metric types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Counter,
    Gauge,
    Summary,
    Untyped,
    Histogram,
}

/// A single label name/value pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPair {
    name: String,
    value: String,
}

impl LabelPair {
    pub fn new<S: Into<String>>(name: S, value: S) -> LabelPair {
        LabelPair {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

// Label pairs order by name; families keep their pairs name-sorted.
impl Ord for LabelPair {
    fn cmp(&self, other: &LabelPair) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl PartialOrd for LabelPair {
    fn partial_cmp(&self, other: &LabelPair) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An observation sampled out-of-band and attached to a counter or to a
/// histogram bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    pub labels: Vec<LabelPair>,
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// Counter sample: a monotone value plus an optional exemplar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterValue {
    pub value: f64,
    pub exemplar: Option<Exemplar>,
}

/// Gauge sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaugeValue {
    pub value: f64,
}

/// Untyped sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UntypedValue {
    pub value: f64,
}

/// One φ-quantile estimate of a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

/// Summary sample: cumulative count/sum plus the configured quantile
/// estimates sorted ascending by rank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryValue {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub quantiles: Vec<Quantile>,
}

/// A classic histogram bucket: cumulative count of observations ≤
/// `upper_bound`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
    pub exemplar: Option<Exemplar>,
}

/// A run of consecutive native buckets: `offset` is relative to the end of
/// the previous span (or to bucket index 0 for the first span).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpan {
    pub offset: i32,
    pub length: u32,
}

/// Histogram sample. Classic buckets are cumulative and ascending with the
/// `+Inf` bucket implicit (`sample_count` covers it). When the native
/// representation is active, `schema` is set and the positive/negative
/// spans carry delta-encoded bucket counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramValue {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub buckets: Vec<Bucket>,

    pub schema: Option<i32>,
    pub zero_threshold: f64,
    pub zero_count: u64,
    pub positive_spans: Vec<BucketSpan>,
    pub positive_deltas: Vec<i64>,
    pub negative_spans: Vec<BucketSpan>,
    pub negative_deltas: Vec<i64>,
}

/// The value payload of one series sample.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(CounterValue),
    Gauge(GaugeValue),
    Untyped(UntypedValue),
    Summary(SummaryValue),
    Histogram(HistogramValue),
}

impl MetricValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge(_) => MetricType::Gauge,
            MetricValue::Untyped(_) => MetricType::Untyped,
            MetricValue::Summary(_) => MetricType::Summary,
            MetricValue::Histogram(_) => MetricType::Histogram,
        }
    }
}

/// One series sample: the full (const + variable) label-pair snapshot plus
/// the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    labels: Vec<LabelPair>,
    value: MetricValue,
    timestamp_ms: Option<i64>,
}

impl Metric {
    pub fn new(labels: Vec<LabelPair>, value: MetricValue) -> Metric {
        Metric {
            labels,
            value,
            timestamp_ms: None,
        }
    }

    pub fn labels(&self) -> &[LabelPair] {
        &self.labels
    }

    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    pub fn set_timestamp_ms(&mut self, ts: i64) {
        self.timestamp_ms = Some(ts);
    }

    /// Counter payload, if this sample is a counter.
    pub fn counter(&self) -> Option<&CounterValue> {
        match &self.value {
            MetricValue::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn gauge(&self) -> Option<&GaugeValue> {
        match &self.value {
            MetricValue::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn untyped(&self) -> Option<&UntypedValue> {
        match &self.value {
            MetricValue::Untyped(u) => Some(u),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&SummaryValue> {
        match &self.value {
            MetricValue::Summary(s) => Some(s),
            _ => None,
        }
    }

    pub fn histogram(&self) -> Option<&HistogramValue> {
        match &self.value {
            MetricValue::Histogram(h) => Some(h),
            _ => None,
        }
    }
}

/// The snapshot grouping of one descriptor together with all its child
/// metrics for one gather pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    name: String,
    help: String,
    metric_type: MetricType,
    metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new<S: Into<String>>(
        name: S,
        help: S,
        metric_type: MetricType,
        metrics: Vec<Metric>,
    ) -> MetricFamily {
        MetricFamily {
            name: name.into(),
            help: help.into(),
            metric_type,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut Vec<Metric> {
        &mut self.metrics
    }

    pub fn into_metrics(self) -> Vec<Metric> {
        self.metrics
    }

    pub fn push_metric(&mut self, m: Metric) {
        self.metrics.push(m);
    }

    /// Sort this family's metrics lexicographically by their label values,
    /// the order the exposition formats require. Metrics with fewer labels
    /// sort first; equal label sets tie-break on the timestamp so sorting
    /// stays reproducible even for inconsistent input.
    pub fn sort_metrics(&mut self) {
        self.metrics.sort_by(|m1, m2| {
            let lps1 = m1.labels();
            let lps2 = m2.labels();

            if lps1.len() != lps2.len() {
                return lps1.len().cmp(&lps2.len());
            }

            for (lp1, lp2) in lps1.iter().zip(lps2.iter()) {
                if lp1.value() != lp2.value() {
                    return lp1.value().cmp(lp2.value());
                }
            }

            m1.timestamp_ms().cmp(&m2.timestamp_ms())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_pair_cmp() {
        let tbl = vec![
            ("k1", "k2", Ordering::Less),
            ("k1", "k1", Ordering::Equal),
            ("k1", "k0", Ordering::Greater),
        ];
        for (l1, l2, order) in tbl {
            let lhs = LabelPair::new(l1, l1);
            let rhs = LabelPair::new(l2, l2);
            assert_eq!(lhs.cmp(&rhs), order);
        }
    }

    #[test]
    fn test_metric_type_of_value() {
        let v = MetricValue::Counter(CounterValue {
            value: 1.0,
            exemplar: None,
        });
        assert_eq!(v.metric_type(), MetricType::Counter);

        let v = MetricValue::Histogram(HistogramValue::default());
        assert_eq!(v.metric_type(), MetricType::Histogram);
    }

    #[test]
    fn test_sort_metrics_by_label_values() {
        let m = |vals: &[&str]| {
            let labels = vals
                .iter()
                .enumerate()
                .map(|(i, v)| LabelPair::new(format!("l{}", i), (*v).to_owned()))
                .collect();
            Metric::new(labels, MetricValue::Gauge(GaugeValue { value: 0.0 }))
        };

        let mut family = MetricFamily::new(
            "f",
            "h",
            MetricType::Gauge,
            vec![m(&["b", "x"]), m(&["a", "z"]), m(&["a", "y"])],
        );
        family.sort_metrics();

        let firsts: Vec<&str> = family
            .metrics()
            .iter()
            .map(|m| m.labels()[1].value())
            .collect();
        assert_eq!(firsts, vec!["y", "z", "x"]);
    }
}
