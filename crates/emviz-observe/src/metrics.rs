use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct DurationAgg {
    count: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl DurationAgg {
    pub fn record(&self, dur: Duration) {
        let ns = dur.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn avg_ns(&self) -> u64 {
        let count = self.count();
        if count == 0 {
            0
        } else {
            self.total_ns.load(Ordering::Relaxed) / count
        }
    }

    pub fn max_ns(&self) -> u64 {
        self.max_ns.load(Ordering::Relaxed)
    }
}

/// Records the time between construction and drop.
pub struct ScopedTimer<'a> {
    start: Instant,
    agg: &'a DurationAgg,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(agg: &'a DurationAgg) -> Self {
        Self {
            start: Instant::now(),
            agg,
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.agg.record(self.start.elapsed());
    }
}

/// Per-handler tallies of how notifications were resolved.
///
/// Every handled notification lands in exactly one of the outcome counters, so
/// `notifications == skipped + unregistered + not_ready + completed + failed`
/// once all in-flight calls have returned.
#[derive(Debug, Default)]
pub struct StageMetrics {
    pub notifications: Counter,
    pub skipped: Counter,
    pub unregistered: Counter,
    pub not_ready: Counter,
    pub completed: Counter,
    pub failed: Counter,
    pub work_time: DurationAgg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMetricsSnapshot {
    pub notifications: u64,
    pub skipped: u64,
    pub unregistered: u64,
    pub not_ready: u64,
    pub completed: u64,
    pub failed: u64,
    pub work_avg_ns: u64,
    pub work_max_ns: u64,
}

impl StageMetrics {
    pub fn snapshot(&self) -> StageMetricsSnapshot {
        StageMetricsSnapshot {
            notifications: self.notifications.get(),
            skipped: self.skipped.get(),
            unregistered: self.unregistered.get(),
            not_ready: self.not_ready.get(),
            completed: self.completed.get(),
            failed: self.failed.get(),
            work_avg_ns: self.work_time.avg_ns(),
            work_max_ns: self.work_time.max_ns(),
        }
    }

    pub fn log_summary(&self, stage: &str) {
        let s = self.snapshot();
        tracing::info!(
            target: "emviz_metrics",
            event = "stage_summary",
            stage,
            notifications = s.notifications,
            skipped = s.skipped,
            unregistered = s.unregistered,
            not_ready = s.not_ready,
            completed = s.completed,
            failed = s.failed,
            work_avg_ms = s.work_avg_ns / 1_000_000,
            work_max_ms = s.work_max_ns / 1_000_000,
            "stage summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_agg_tracks_max_and_average() {
        let agg = DurationAgg::default();
        agg.record(Duration::from_nanos(10));
        agg.record(Duration::from_nanos(30));
        assert_eq!(agg.count(), 2);
        assert_eq!(agg.avg_ns(), 20);
        assert_eq!(agg.max_ns(), 30);
    }

    #[test]
    fn scoped_timer_records_on_drop() {
        let agg = DurationAgg::default();
        {
            let _t = ScopedTimer::new(&agg);
        }
        assert_eq!(agg.count(), 1);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let m = StageMetrics::default();
        m.notifications.inc();
        m.notifications.inc();
        m.skipped.inc();
        m.completed.inc();
        let s = m.snapshot();
        assert_eq!(s.notifications, 2);
        assert_eq!(s.skipped + s.completed, 2);
        assert_eq!(s.failed, 0);
    }
}
