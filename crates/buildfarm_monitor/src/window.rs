//! Bounded rolling sample history, one ring per metric.
//!
//! Per-metric locking means readers of one metric never contend with
//! writers of another.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

/// Retention bound applied per metric: whichever limit is reached first wins,
/// matching spec's "24h or 10,000 samples, whichever is smaller."
pub struct SampleWindow {
    retention: Duration,
    max_samples: usize,
    series: RwLock<HashMap<String, Mutex<VecDeque<Sample>>>>,
}

impl SampleWindow {
    pub fn new(retention: Duration, max_samples: usize) -> Self {
        Self {
            retention,
            max_samples,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Record one sample for `metric` at `timestamp` (seconds since epoch).
    pub fn record(&self, metric: &str, timestamp: f64, value: f64) {
        {
            let series = self.series.read().expect("sample window lock poisoned");
            if let Some(ring) = series.get(metric) {
                let mut ring = ring.lock().expect("per-metric lock poisoned");
                push_bounded(&mut ring, Sample { timestamp, value }, self.max_samples, self.retention);
                return;
            }
        }
        let mut series = self.series.write().expect("sample window lock poisoned");
        let ring = series
            .entry(metric.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.max_samples.min(256))));
        let mut ring = ring.lock().expect("per-metric lock poisoned");
        push_bounded(&mut ring, Sample { timestamp, value }, self.max_samples, self.retention);
    }

    /// Most recent sample's value, if any.
    pub fn latest(&self, metric: &str) -> Option<f64> {
        let series = self.series.read().expect("sample window lock poisoned");
        let ring = series.get(metric)?.lock().expect("per-metric lock poisoned");
        ring.back().map(|s| s.value)
    }

    /// Mean of the last `count` samples (or fewer, if the ring is shorter).
    pub fn mean(&self, metric: &str, count: usize) -> Option<f64> {
        let series = self.series.read().expect("sample window lock poisoned");
        let ring = series.get(metric)?.lock().expect("per-metric lock poisoned");
        if ring.is_empty() {
            return None;
        }
        let taken: Vec<f64> = ring.iter().rev().take(count).map(|s| s.value).collect();
        Some(taken.iter().sum::<f64>() / taken.len() as f64)
    }

    /// Drop samples older than the retention window across all metrics.
    pub fn prune(&self, now: f64) {
        let series = self.series.read().expect("sample window lock poisoned");
        let cutoff = now - self.retention.as_secs_f64();
        for ring in series.values() {
            let mut ring = ring.lock().expect("per-metric lock poisoned");
            while ring.front().is_some_and(|s| s.timestamp < cutoff) {
                ring.pop_front();
            }
        }
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.series
            .read()
            .expect("sample window lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

fn push_bounded(ring: &mut VecDeque<Sample>, sample: Sample, max_samples: usize, retention: Duration) {
    ring.push_back(sample);
    while ring.len() > max_samples {
        ring.pop_front();
    }
    let cutoff = sample.timestamp - retention.as_secs_f64();
    while ring.front().is_some_and(|s| s.timestamp < cutoff) {
        ring.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reads_latest() {
        let window = SampleWindow::new(Duration::from_secs(3600), 100);
        window.record("cpu_percent", 1.0, 10.0);
        window.record("cpu_percent", 2.0, 20.0);
        assert_eq!(window.latest("cpu_percent"), Some(20.0));
    }

    #[test]
    fn bounds_by_count() {
        let window = SampleWindow::new(Duration::from_secs(3600), 3);
        for i in 0..10 {
            window.record("m", i as f64, i as f64);
        }
        assert_eq!(window.mean("m", 10), Some((7.0 + 8.0 + 9.0) / 3.0));
    }

    #[test]
    fn prunes_by_age() {
        let window = SampleWindow::new(Duration::from_secs(10), 1000);
        window.record("m", 0.0, 1.0);
        window.record("m", 5.0, 2.0);
        window.prune(100.0);
        assert_eq!(window.latest("m"), None);
    }

    #[test]
    fn unknown_metric_returns_none() {
        let window = SampleWindow::new(Duration::from_secs(10), 10);
        assert_eq!(window.latest("nope"), None);
        assert_eq!(window.mean("nope", 5), None);
    }
}
