//! Runner metrics
//!
//! Each runner owns a [`RunnerMetrics`] set registered under the label
//! `runner-<id>` in a [`MetricsRegistry`]. A registry may be shared between
//! schedulers so one dump covers all of them.

use parking_lot::RwLock;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Add one
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for one runner
#[derive(Debug)]
pub struct RunnerMetrics {
    label: String,
    /// Tasks enqueued through the scheduler's submission entry
    pub tasks_submitted: Counter,
    /// Quanta executed (one per pickup from the run queue)
    pub quanta_executed: Counter,
    /// Tasks that reached `Completed` on this runner
    pub tasks_completed: Counter,
    /// Tasks that reached `Failed` through a fault on this runner
    pub tasks_failed: Counter,
    /// Quanta that ended in a yield
    pub tasks_yielded: Counter,
    /// Quanta that ended in a blocking hand-off
    pub blocking_handoffs: Counter,
    /// Tasks failed because they were still pending at shutdown
    pub tasks_abandoned: Counter,
    /// Time spent inside actor bodies
    pub busy_micros: Counter,
}

/// Point-in-time copy of a runner's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerMetricsSnapshot {
    /// Registry label, `runner-<id>`
    pub label: String,
    /// See [`RunnerMetrics::tasks_submitted`]
    pub tasks_submitted: u64,
    /// See [`RunnerMetrics::quanta_executed`]
    pub quanta_executed: u64,
    /// See [`RunnerMetrics::tasks_completed`]
    pub tasks_completed: u64,
    /// See [`RunnerMetrics::tasks_failed`]
    pub tasks_failed: u64,
    /// See [`RunnerMetrics::tasks_yielded`]
    pub tasks_yielded: u64,
    /// See [`RunnerMetrics::blocking_handoffs`]
    pub blocking_handoffs: u64,
    /// See [`RunnerMetrics::tasks_abandoned`]
    pub tasks_abandoned: u64,
    /// See [`RunnerMetrics::busy_micros`]
    pub busy_micros: u64,
}

impl RunnerMetrics {
    /// Create an unregistered counter set
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tasks_submitted: Counter::default(),
            quanta_executed: Counter::default(),
            tasks_completed: Counter::default(),
            tasks_failed: Counter::default(),
            tasks_yielded: Counter::default(),
            blocking_handoffs: Counter::default(),
            tasks_abandoned: Counter::default(),
            busy_micros: Counter::default(),
        }
    }

    /// Registry label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Counters in dump order
    pub fn counters(&self) -> [(&'static str, u64); 8] {
        [
            ("tasks_submitted", self.tasks_submitted.get()),
            ("quanta_executed", self.quanta_executed.get()),
            ("tasks_completed", self.tasks_completed.get()),
            ("tasks_failed", self.tasks_failed.get()),
            ("tasks_yielded", self.tasks_yielded.get()),
            ("blocking_handoffs", self.blocking_handoffs.get()),
            ("tasks_abandoned", self.tasks_abandoned.get()),
            ("busy_micros", self.busy_micros.get()),
        ]
    }

    /// Copy the current values
    pub fn snapshot(&self) -> RunnerMetricsSnapshot {
        RunnerMetricsSnapshot {
            label: self.label.clone(),
            tasks_submitted: self.tasks_submitted.get(),
            quanta_executed: self.quanta_executed.get(),
            tasks_completed: self.tasks_completed.get(),
            tasks_failed: self.tasks_failed.get(),
            tasks_yielded: self.tasks_yielded.get(),
            blocking_handoffs: self.blocking_handoffs.get(),
            tasks_abandoned: self.tasks_abandoned.get(),
            busy_micros: self.busy_micros.get(),
        }
    }

    /// Write every counter to `sink`
    pub fn dump(&self, sink: &mut dyn MetricsSink) -> io::Result<()> {
        for (name, value) in self.counters() {
            sink.counter(name, value)?;
        }
        Ok(())
    }
}

/// Registry of labelled runner counter sets
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    entries: RwLock<Vec<Arc<RunnerMetrics>>>,
}

impl MetricsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and register a counter set under `label`
    pub fn register(&self, label: impl Into<String>) -> Arc<RunnerMetrics> {
        let metrics = Arc::new(RunnerMetrics::new(label));
        self.entries.write().push(Arc::clone(&metrics));
        metrics
    }

    /// Number of registered counter sets
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshots in registration order
    pub fn snapshot(&self) -> Vec<RunnerMetricsSnapshot> {
        self.entries.read().iter().map(|m| m.snapshot()).collect()
    }
}

/// Destination for metrics dumps
pub trait MetricsSink {
    /// Start a titled section
    fn section(&mut self, title: &str) -> io::Result<()>;

    /// Record one counter value in the current section
    fn counter(&mut self, name: &str, value: u64) -> io::Result<()>;
}

/// Plain-text sink: `# title` lines followed by `name: value` lines
pub struct TextMetricsSink<W: Write> {
    out: W,
}

impl<W: Write> TextMetricsSink<W> {
    /// Wrap a writer
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricsSink for TextMetricsSink<W> {
    fn section(&mut self, title: &str) -> io::Result<()> {
        writeln!(self.out, "# {}", title)
    }

    fn counter(&mut self, name: &str, value: u64) -> io::Result<()> {
        writeln!(self.out, "{}: {}", name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::default();
        counter.incr();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_registry_registration_order() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_empty());

        let first = registry.register("runner-0");
        let second = registry.register("runner-1");
        first.tasks_completed.incr();
        second.tasks_completed.add(2);

        let snapshot = registry.snapshot();
        assert_eq!(registry.len(), 2);
        assert_eq!(snapshot[0].label, "runner-0");
        assert_eq!(snapshot[0].tasks_completed, 1);
        assert_eq!(snapshot[1].label, "runner-1");
        assert_eq!(snapshot[1].tasks_completed, 2);
    }

    #[test]
    fn test_text_sink_format() {
        let metrics = RunnerMetrics::new("runner-3");
        metrics.quanta_executed.add(7);

        let mut sink = TextMetricsSink::new(Vec::new());
        sink.section(metrics.label()).unwrap();
        metrics.dump(&mut sink).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# runner-3"));
        assert_eq!(lines.next(), Some("tasks_submitted: 0"));
        assert_eq!(lines.next(), Some("quanta_executed: 7"));
        assert_eq!(text.lines().count(), 9);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = RunnerMetrics::new("runner-0");
        metrics.blocking_handoffs.add(2);

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["label"], "runner-0");
        assert_eq!(json["blocking_handoffs"], 2);
        assert_eq!(json["tasks_completed"], 0);
    }
}
