//! Alert threshold evaluation and lifecycle.
//!
//! A metric crossing its threshold raises an alert; `recovery_intervals`
//! consecutive sub-threshold ticks resolves it and moves it to history.

use buildfarm_ids::AlertId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: AlertId,
    pub metric: String,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    consecutive_clear_ticks: u32,
}

/// Per-metric threshold crossing state, keyed by metric name.
///
/// Only one open alert is tracked per metric at a time: a second crossing
/// while an alert is already active refreshes its value rather than opening
/// a duplicate.
pub struct AlertTracker {
    recovery_intervals: u32,
    active: HashMap<String, Alert>,
    history: Vec<Alert>,
    history_cap: usize,
}

impl AlertTracker {
    pub fn new(recovery_intervals: u32) -> Self {
        Self {
            recovery_intervals: recovery_intervals.max(1),
            active: HashMap::new(),
            history: Vec::new(),
            history_cap: 1000,
        }
    }

    /// Evaluate one metric's latest value against its {warning, critical}
    /// bound. `critical_threshold` and `warning_threshold` are compared
    /// assuming "crossing upward" is the alerting direction, per spec.
    pub fn evaluate(&mut self, metric: &str, value: f64, warning: f64, critical: f64) {
        let severity = if value >= critical {
            Some(Severity::Critical)
        } else if value >= warning {
            Some(Severity::Warning)
        } else {
            None
        };

        match (severity, self.active.get_mut(metric)) {
            (Some(sev), Some(alert)) => {
                alert.severity = sev;
                alert.value = value;
                alert.threshold = if sev == Severity::Critical { critical } else { warning };
                alert.consecutive_clear_ticks = 0;
            }
            (Some(sev), None) => {
                let threshold = if sev == Severity::Critical { critical } else { warning };
                self.active.insert(
                    metric.to_string(),
                    Alert {
                        id: AlertId::new(),
                        metric: metric.to_string(),
                        severity: sev,
                        message: format!(
                            "{metric} crossed {} threshold: {value:.3} >= {threshold:.3}",
                            sev.as_str()
                        ),
                        value,
                        threshold,
                        triggered_at: Utc::now(),
                        resolved: false,
                        resolved_at: None,
                        consecutive_clear_ticks: 0,
                    },
                );
            }
            (None, Some(alert)) => {
                alert.consecutive_clear_ticks += 1;
                if alert.consecutive_clear_ticks >= self.recovery_intervals {
                    let mut resolved = self.active.remove(metric).expect("checked present above");
                    resolved.resolved = true;
                    resolved.resolved_at = Some(Utc::now());
                    self.push_history(resolved);
                }
            }
            (None, None) => {}
        }
    }

    fn push_history(&mut self, alert: Alert) {
        self.history.push(alert);
        if self.history.len() > self.history_cap {
            self.history.remove(0);
        }
    }

    /// Active alerts plus resolved alerts still within history retention.
    pub fn all(&self) -> Vec<Alert> {
        let mut out: Vec<Alert> = self.active.values().cloned().collect();
        out.extend(self.history.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raises_alert_on_threshold_cross() {
        let mut tracker = AlertTracker::new(2);
        tracker.evaluate("build_failure_rate", 0.3, 0.2, 0.5);
        let alerts = tracker.all();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert!(!alerts[0].resolved);
    }

    #[test]
    fn escalates_to_critical() {
        let mut tracker = AlertTracker::new(2);
        tracker.evaluate("build_failure_rate", 0.3, 0.2, 0.5);
        tracker.evaluate("build_failure_rate", 0.6, 0.2, 0.5);
        let alerts = tracker.all();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn resolves_after_recovery_intervals() {
        let mut tracker = AlertTracker::new(2);
        tracker.evaluate("cpu_percent", 95.0, 90.0, 99.0);
        tracker.evaluate("cpu_percent", 10.0, 90.0, 99.0);
        assert_eq!(tracker.all().len(), 1);
        assert!(!tracker.all()[0].resolved);

        tracker.evaluate("cpu_percent", 10.0, 90.0, 99.0);
        let alerts = tracker.all();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].resolved);
    }

    #[test]
    fn clear_value_without_prior_alert_is_a_no_op() {
        let mut tracker = AlertTracker::new(2);
        tracker.evaluate("cpu_percent", 10.0, 90.0, 99.0);
        assert!(tracker.all().is_empty());
    }
}
