// Lightweight runtime counters for remote-call health.
//
// Cheap enough to leave enabled unconditionally; the orchestrator reads a
// snapshot for its end-of-batch log line.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct OpStats {
    calls: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
}

#[derive(Default)]
struct Inner {
    per_op: DashMap<String, OpStats>,
    poll_ticks: AtomicU64,
    batches_started: AtomicU64,
    batches_finished: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpSnapshot {
    pub op: String,
    pub calls: u64,
    pub failures: u64,
    pub mean_latency: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub ops: Vec<OpSnapshot>,
    pub poll_ticks: u64,
    pub batches_started: u64,
    pub batches_finished: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_remote_call(&self, op: &str, success: bool, duration: Duration) {
        let stats = self.inner.per_op.entry(op.to_string()).or_default();
        stats.calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        stats
            .total_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_poll_tick(&self) {
        self.inner.poll_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_started(&self) {
        self.inner.batches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_finished(&self) {
        self.inner.batches_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut ops: Vec<OpSnapshot> = self
            .inner
            .per_op
            .iter()
            .map(|entry| {
                let calls = entry.calls.load(Ordering::Relaxed);
                let total = entry.total_micros.load(Ordering::Relaxed);
                OpSnapshot {
                    op: entry.key().clone(),
                    calls,
                    failures: entry.failures.load(Ordering::Relaxed),
                    mean_latency: if calls == 0 {
                        Duration::ZERO
                    } else {
                        Duration::from_micros(total / calls)
                    },
                }
            })
            .collect();
        ops.sort_by(|a, b| a.op.cmp(&b.op));
        MetricsSnapshot {
            ops,
            poll_ticks: self.inner.poll_ticks.load(Ordering::Relaxed),
            batches_started: self.inner.batches_started.load(Ordering::Relaxed),
            batches_finished: self.inner.batches_finished.load(Ordering::Relaxed),
        }
    }
}
