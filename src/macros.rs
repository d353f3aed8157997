// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

/// Create labels with specified name-value pairs.
///
/// # Examples
///
/// ```
/// # use promcore::labels;
/// let labels = labels!{
///     "test" => "hello",
///     "foo" => "bar",
/// };
/// assert_eq!(labels.len(), 2);
/// ```
#[macro_export]
macro_rules! labels {
    () => {
        {
            use std::collections::HashMap;

            HashMap::new()
        }
    };

    ( $( $KEY:expr => $VALUE:expr ),+ $(,)? ) => {
        {
            use std::collections::HashMap;

            let mut lbs = HashMap::new();
            $(
                lbs.insert($KEY, $VALUE);
            )+

            lbs
        }
    };
}

/// Create an [`Opts`](crate::Opts).
#[macro_export]
macro_rules! opts {
    ( $NAME:expr, $HELP:expr $(, $CONST_LABELS:expr )* $(,)? ) => {
        {
            use std::collections::HashMap;

            let opts = $crate::Opts::new($NAME, $HELP);
            let lbs = HashMap::<String, String>::new();
            $(
                let mut lbs = lbs;
                lbs.extend($CONST_LABELS.iter().map(|(k, v)| ((*k).into(), (*v).into())));
            )*

            opts.const_labels(lbs)
        }
    };
}

/// Create a [`HistogramOpts`](crate::HistogramOpts).
#[macro_export(local_inner_macros)]
macro_rules! histogram_opts {
    ( $NAME:expr, $HELP:expr $(,)? ) => {
        $crate::HistogramOpts::new($NAME, $HELP)
    };

    ( $NAME:expr, $HELP:expr, $BUCKETS:expr $(,)? ) => {
        {
            let hopts = $crate::HistogramOpts::new($NAME, $HELP);
            hopts.buckets($BUCKETS)
        }
    };

    ( $NAME:expr, $HELP:expr, $BUCKETS:expr, $CONST_LABELS:expr $(,)? ) => {
        {
            let hopts = histogram_opts!($NAME, $HELP, $BUCKETS);
            hopts.const_labels($CONST_LABELS.iter()
                .map(|(k, v)| ((*k).into(), (*v).into()))
                .collect())
        }
    };
}

/// Create a [`SummaryOpts`](crate::SummaryOpts).
#[macro_export(local_inner_macros)]
macro_rules! summary_opts {
    ( $NAME:expr, $HELP:expr $(,)? ) => {
        $crate::SummaryOpts::new($NAME, $HELP)
    };

    ( $NAME:expr, $HELP:expr, $OBJECTIVES:expr $(,)? ) => {
        {
            let sopts = $crate::SummaryOpts::new($NAME, $HELP);
            sopts.objectives($OBJECTIVES)
        }
    };

    ( $NAME:expr, $HELP:expr, $OBJECTIVES:expr, $CONST_LABELS:expr $(,)? ) => {
        {
            let sopts = summary_opts!($NAME, $HELP, $OBJECTIVES);
            sopts.const_labels($CONST_LABELS.iter()
                .map(|(k, v)| ((*k).into(), (*v).into()))
                .collect())
        }
    };
}

/// Create a [`Counter`](crate::Counter) and register it with the default
/// registry.
#[macro_export(local_inner_macros)]
macro_rules! register_counter {
    ( $NAME:expr, $HELP:expr $(, $CONST_LABELS:expr )* $(,)? ) => {
        register_counter!(opts!($NAME, $HELP $(, $CONST_LABELS )*))
    };

    ( $OPTS:expr ) => {
        {
            let counter = $crate::Counter::with_opts($OPTS).unwrap();
            $crate::register(Box::new(counter.clone())).map(|_| counter)
        }
    };
}

/// Create an [`IntCounter`](crate::IntCounter) and register it with the
/// default registry.
#[macro_export(local_inner_macros)]
macro_rules! register_int_counter {
    ( $NAME:expr, $HELP:expr $(, $CONST_LABELS:expr )* $(,)? ) => {
        register_int_counter!(opts!($NAME, $HELP $(, $CONST_LABELS )*))
    };

    ( $OPTS:expr ) => {
        {
            let counter = $crate::IntCounter::with_opts($OPTS).unwrap();
            $crate::register(Box::new(counter.clone())).map(|_| counter)
        }
    };
}

/// Create a [`CounterVec`](crate::CounterVec) and register it with the
/// default registry.
#[macro_export(local_inner_macros)]
macro_rules! register_counter_vec {
    ( $NAME:expr, $HELP:expr, $LABEL_NAMES:expr $(,)? ) => {
        register_counter_vec!(opts!($NAME, $HELP), $LABEL_NAMES)
    };

    ( $OPTS:expr, $LABEL_NAMES:expr ) => {
        {
            let counter_vec = $crate::CounterVec::new($OPTS, $LABEL_NAMES).unwrap();
            $crate::register(Box::new(counter_vec.clone())).map(|_| counter_vec)
        }
    };
}

/// Create an [`IntCounterVec`](crate::IntCounterVec) and register it with
/// the default registry.
#[macro_export(local_inner_macros)]
macro_rules! register_int_counter_vec {
    ( $NAME:expr, $HELP:expr, $LABEL_NAMES:expr $(,)? ) => {
        register_int_counter_vec!(opts!($NAME, $HELP), $LABEL_NAMES)
    };

    ( $OPTS:expr, $LABEL_NAMES:expr ) => {
        {
            let counter_vec = $crate::IntCounterVec::new($OPTS, $LABEL_NAMES).unwrap();
            $crate::register(Box::new(counter_vec.clone())).map(|_| counter_vec)
        }
    };
}

/// Create a [`Gauge`](crate::Gauge) and register it with the default
/// registry.
#[macro_export(local_inner_macros)]
macro_rules! register_gauge {
    ( $NAME:expr, $HELP:expr $(, $CONST_LABELS:expr )* $(,)? ) => {
        register_gauge!(opts!($NAME, $HELP $(, $CONST_LABELS )*))
    };

    ( $OPTS:expr ) => {
        {
            let gauge = $crate::Gauge::with_opts($OPTS).unwrap();
            $crate::register(Box::new(gauge.clone())).map(|_| gauge)
        }
    };
}

/// Create an [`IntGauge`](crate::IntGauge) and register it with the default
/// registry.
#[macro_export(local_inner_macros)]
macro_rules! register_int_gauge {
    ( $NAME:expr, $HELP:expr $(, $CONST_LABELS:expr )* $(,)? ) => {
        register_int_gauge!(opts!($NAME, $HELP $(, $CONST_LABELS )*))
    };

    ( $OPTS:expr ) => {
        {
            let gauge = $crate::IntGauge::with_opts($OPTS).unwrap();
            $crate::register(Box::new(gauge.clone())).map(|_| gauge)
        }
    };
}

/// Create a [`GaugeVec`](crate::GaugeVec) and register it with the default
/// registry.
#[macro_export(local_inner_macros)]
macro_rules! register_gauge_vec {
    ( $NAME:expr, $HELP:expr, $LABEL_NAMES:expr $(,)? ) => {
        register_gauge_vec!(opts!($NAME, $HELP), $LABEL_NAMES)
    };

    ( $OPTS:expr, $LABEL_NAMES:expr ) => {
        {
            let gauge_vec = $crate::GaugeVec::new($OPTS, $LABEL_NAMES).unwrap();
            $crate::register(Box::new(gauge_vec.clone())).map(|_| gauge_vec)
        }
    };
}

/// Create a [`Histogram`](crate::Histogram) and register it with the
/// default registry.
#[macro_export(local_inner_macros)]
macro_rules! register_histogram {
    ( $NAME:expr, $HELP:expr $(,)? ) => {
        register_histogram!(histogram_opts!($NAME, $HELP))
    };

    ( $NAME:expr, $HELP:expr, $BUCKETS:expr $(,)? ) => {
        register_histogram!(histogram_opts!($NAME, $HELP, $BUCKETS))
    };

    ( $OPTS:expr ) => {
        {
            let histogram = $crate::Histogram::with_opts($OPTS).unwrap();
            $crate::register(Box::new(histogram.clone())).map(|_| histogram)
        }
    };
}

/// Create a [`HistogramVec`](crate::HistogramVec) and register it with the
/// default registry.
#[macro_export(local_inner_macros)]
macro_rules! register_histogram_vec {
    ( $NAME:expr, $HELP:expr, $LABEL_NAMES:expr $(,)? ) => {
        register_histogram_vec!(histogram_opts!($NAME, $HELP), $LABEL_NAMES)
    };

    ( $NAME:expr, $HELP:expr, $LABEL_NAMES:expr, $BUCKETS:expr $(,)? ) => {
        register_histogram_vec!(histogram_opts!($NAME, $HELP, $BUCKETS), $LABEL_NAMES)
    };

    ( $OPTS:expr, $LABEL_NAMES:expr ) => {
        {
            let histogram_vec = $crate::HistogramVec::new($OPTS, $LABEL_NAMES).unwrap();
            $crate::register(Box::new(histogram_vec.clone())).map(|_| histogram_vec)
        }
    };
}

/// Create a [`Summary`](crate::Summary) and register it with the default
/// registry.
#[macro_export(local_inner_macros)]
macro_rules! register_summary {
    ( $NAME:expr, $HELP:expr $(,)? ) => {
        register_summary!(summary_opts!($NAME, $HELP))
    };

    ( $NAME:expr, $HELP:expr, $OBJECTIVES:expr $(,)? ) => {
        register_summary!(summary_opts!($NAME, $HELP, $OBJECTIVES))
    };

    ( $OPTS:expr ) => {
        {
            let summary = $crate::Summary::with_opts($OPTS).unwrap();
            $crate::register(Box::new(summary.clone())).map(|_| summary)
        }
    };
}

/// Create a [`SummaryVec`](crate::SummaryVec) and register it with the
/// default registry.
#[macro_export(local_inner_macros)]
macro_rules! register_summary_vec {
    ( $NAME:expr, $HELP:expr, $LABEL_NAMES:expr $(,)? ) => {
        register_summary_vec!(summary_opts!($NAME, $HELP), $LABEL_NAMES)
    };

    ( $NAME:expr, $HELP:expr, $LABEL_NAMES:expr, $OBJECTIVES:expr $(,)? ) => {
        register_summary_vec!(summary_opts!($NAME, $HELP, $OBJECTIVES), $LABEL_NAMES)
    };

    ( $OPTS:expr, $LABEL_NAMES:expr ) => {
        {
            let summary_vec = $crate::SummaryVec::new($OPTS, $LABEL_NAMES).unwrap();
            $crate::register(Box::new(summary_vec.clone())).map(|_| summary_vec)
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    #[test]
    fn test_macro_labels() {
        let labels = labels! {
            "test" => "hello",
            "foo" => "bar",
        };
        assert_eq!(labels.len(), 2);
        assert!(labels.get("test").is_some());
        assert_eq!(*(labels.get("test").unwrap()), "hello");

        let labels: HashMap<&str, &str> = labels! {};
        assert!(labels.is_empty());
    }

    #[test]
    fn test_macro_opts() {
        let name = "test_opts";
        let help = "test opts help";

        let opts = opts!(name, help);
        assert_eq!(opts.name, name);
        assert_eq!(opts.help, help);

        let opts = opts!(name, help, labels! {"test" => "hello", "foo" => "bar",});
        assert_eq!(opts.const_labels.len(), 2);
        assert!(opts.const_labels.get("foo").is_some());
        assert_eq!(opts.const_labels.get("foo").unwrap(), "bar");

        let opts = opts!(
            name,
            help,
            labels! {"test" => "hello", "foo" => "bar",},
            labels! {"ans" => "42",}
        );
        assert_eq!(opts.const_labels.len(), 3);
        assert!(opts.const_labels.get("ans").is_some());
        assert_eq!(opts.const_labels.get("ans").unwrap(), "42");
    }

    #[test]
    fn test_macro_histogram_opts() {
        let name = "test_histogram_opts";
        let help = "test opts help";

        let opts = histogram_opts!(name, help);
        assert_eq!(opts.common_opts.name, name);
        assert_eq!(opts.common_opts.help, help);

        let opts = histogram_opts!(name, help, vec![1.0, 2.0]);
        assert_eq!(opts.buckets, vec![1.0, 2.0]);

        let opts = histogram_opts!(
            name,
            help,
            crate::linear_buckets(1.0, 0.5, 4).unwrap(),
            labels! {"a" => "c",}
        );
        assert_eq!(opts.buckets.len(), 4);
        assert_eq!(opts.common_opts.const_labels.len(), 1);
    }

    #[test]
    fn test_macro_summary_opts() {
        let opts = summary_opts!("test_summary_opts", "help");
        assert!(opts.objectives.is_empty());

        let opts = summary_opts!("test_summary_opts", "help", vec![(0.5, 0.05)]);
        assert_eq!(opts.objectives.len(), 1);

        let opts = summary_opts!(
            "test_summary_opts",
            "help",
            vec![(0.5, 0.05)],
            labels! {"a" => "b",}
        );
        assert_eq!(opts.common_opts.const_labels.len(), 1);
    }

    #[test]
    fn test_macro_counter() {
        let opts = opts!(
            "test_macro_counter_1",
            "help",
            labels! {"test" => "hello", "foo" => "bar",}
        );

        let res1 = register_counter!(opts);
        assert!(res1.is_ok());

        let res2 = register_counter!("test_macro_counter_2", "help");
        assert!(res2.is_ok());

        let res3 = register_counter!("test_macro_counter_3", "help", labels! {"a" => "b",});
        assert!(res3.is_ok());

        let res4 = register_int_counter!("test_macro_int_counter", "help");
        assert!(res4.is_ok());
    }

    #[test]
    fn test_macro_counter_vec() {
        let res1 = register_counter_vec!("test_macro_counter_vec_1", "help", &["a", "b"]);
        assert!(res1.is_ok());
        res1.unwrap().with_label_values(&["1", "2"]).inc();

        let res2 = register_int_counter_vec!("test_macro_counter_vec_2", "help", &["a"]);
        assert!(res2.is_ok());
    }

    #[test]
    fn test_macro_gauge() {
        let res1 = register_gauge!("test_macro_gauge_1", "help");
        assert!(res1.is_ok());

        let res2 = register_gauge!("test_macro_gauge_2", "help", labels! {"a" => "b",});
        assert!(res2.is_ok());

        let res3 = register_int_gauge!("test_macro_int_gauge", "help");
        assert!(res3.is_ok());

        let res4 = register_gauge_vec!("test_macro_gauge_vec", "help", &["a"]);
        assert!(res4.is_ok());
    }

    #[test]
    fn test_macro_histogram() {
        let res1 = register_histogram!("test_macro_histogram_1", "help");
        assert!(res1.is_ok());

        let res2 = register_histogram!("test_macro_histogram_2", "help", vec![1.0, 2.0]);
        assert!(res2.is_ok());

        let res3 = register_histogram_vec!("test_macro_histogram_vec", "help", &["a"]);
        assert!(res3.is_ok());
        res3.unwrap().with_label_values(&["1"]).observe(1.0);
    }

    #[test]
    fn test_macro_summary() {
        let res1 = register_summary!("test_macro_summary_1", "help");
        assert!(res1.is_ok());

        let res2 = register_summary!("test_macro_summary_2", "help", vec![(0.9, 0.01)]);
        assert!(res2.is_ok());
        res2.unwrap().observe(1.0);

        let res3 = register_summary_vec!("test_macro_summary_vec", "help", &["a"]);
        assert!(res3.is_ok());
    }
}
