//! Counter registry for the three watchdog metric families.
//!
//! The registry is constructed once and handed to every watchdog, which
//! registers its series up front so they are exposed at zero before the first
//! event. Increments are lock-free; rendering takes a sorted snapshot.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Endpoint;

pub const TIMEOUT_METRIC: &str = "deadmanswitch_timeout";
pub const REPEAT_METRIC: &str = "deadmanswitch_repeats";
pub const TARGET_ERROR_METRIC: &str = "deadmanswitch_target_errors";

/// A monotonically increasing counter shared between its owner and the registry.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct CounterFamily {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    series: DashMap<Vec<String>, Counter>,
}

impl CounterFamily {
    fn new(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            labels,
            series: DashMap::new(),
        }
    }

    fn with_labels(&self, values: &[&str]) -> Counter {
        debug_assert_eq!(values.len(), self.labels.len());
        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.series.entry(key).or_default().clone()
    }

    fn render(&self, out: &mut String) {
        let mut rows: Vec<(Vec<String>, u64)> = self
            .series
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        rows.sort();

        writeln!(out, "# HELP {} {}", self.name, self.help).unwrap();
        writeln!(out, "# TYPE {} counter", self.name).unwrap();
        for (values, count) in rows {
            let labels = self
                .labels
                .iter()
                .zip(&values)
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(out, "{}{{{}}} {}", self.name, labels, count).unwrap();
        }
    }
}

/// Counter handles owned by one watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogCounters {
    pub timeouts: Counter,
    pub repeats: Counter,
    /// One per target, in configuration order.
    pub target_errors: Vec<Counter>,
}

#[derive(Debug)]
pub struct Metrics {
    timeouts: CounterFamily,
    repeats: CounterFamily,
    target_errors: CounterFamily,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            timeouts: CounterFamily::new(
                TIMEOUT_METRIC,
                "Heartbeat deadlines missed since the last reset.",
                &["endpoint"],
            ),
            repeats: CounterFamily::new(
                REPEAT_METRIC,
                "Repeated notifications while a heartbeat stays missing.",
                &["endpoint"],
            ),
            target_errors: CounterFamily::new(
                TARGET_ERROR_METRIC,
                "Failed notification deliveries per target.",
                &["endpoint", "target"],
            ),
        }
    }

    /// Register (or look up) every series belonging to `endpoint`.
    ///
    /// Two targets sharing a URL share a series, which then counts failures
    /// of both.
    pub fn watchdog_counters(&self, endpoint: &Endpoint) -> WatchdogCounters {
        let name = endpoint.name.as_str();
        WatchdogCounters {
            timeouts: self.timeouts.with_labels(&[name]),
            repeats: self.repeats.with_labels(&[name]),
            target_errors: endpoint
                .targets
                .iter()
                .map(|t| self.target_errors.with_labels(&[name, t.label()]))
                .collect(),
        }
    }

    /// Prometheus text exposition (format 0.0.4).
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);
        self.timeouts.render(&mut out);
        self.repeats.render(&mut out);
        self.target_errors.render(&mut out);
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}
