//! Monitor — periodic collection, rolling aggregates, and alerting.
//!
//! Single-threaded event loop: one thread multiplexes the REP control
//! socket, the PULL event socket, and a periodic collection tick, with no
//! locks needed around process-local state since nothing else touches it
//! concurrently.

use crate::alerts::AlertTracker;
use crate::control::{
    AlertInfo, HealthInfo, MonitorRequest, MonitorResponse, SystemMetricsInfo, WorkerMetricsInfo,
};
use crate::window::SampleWindow;
use anyhow::{Context, Result};
use buildfarm_cache::{CacheRequest, CacheResponse};
use buildfarm_coordinator::{RequestApi, RequestApiResponse};
use buildfarm_protocol::config::MonitorConfig;
use serde::Deserialize;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

const REQ_TIMEOUT_MS: i32 = 2_000;
const RECV_POLL_MS: i32 = 100;

fn current_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
enum CoordinatorEvent {
    #[serde(rename = "build_completed")]
    BuildCompleted { build_id: u64, success: bool },
    #[serde(rename = "worker_lost")]
    WorkerLost { worker_id: String },
}

pub struct Monitor {
    config: MonitorConfig,
    context: zmq::Context,
    control_socket: zmq::Socket,
    event_pull: zmq::Socket,
    window: SampleWindow,
    alerts: AlertTracker,
    builds_succeeded: u64,
    builds_failed: u64,
    workers_seen: std::collections::HashSet<String>,
    worker_status: std::collections::HashMap<String, String>,
    workers_lost_total: u64,
    last_collection: f64,
    last_prune: f64,
    running: bool,
}

impl Monitor {
    pub fn bind(config: MonitorConfig) -> Result<Self> {
        let context = zmq::Context::new();

        let control_socket = context
            .socket(zmq::REP)
            .context("failed to create monitor REP socket")?;
        control_socket
            .bind(&config.control_addr)
            .with_context(|| format!("failed to bind monitor control socket to {}", config.control_addr))?;
        control_socket
            .set_rcvtimeo(RECV_POLL_MS)
            .context("failed to set monitor control socket timeout")?;

        let event_pull = context
            .socket(zmq::PULL)
            .context("failed to create monitor PULL socket")?;
        event_pull
            .bind(&config.event_addr)
            .with_context(|| format!("failed to bind monitor event socket to {}", config.event_addr))?;
        event_pull
            .set_rcvtimeo(RECV_POLL_MS)
            .context("failed to set monitor event socket timeout")?;

        info!(
            control_addr = %config.control_addr,
            event_addr = %config.event_addr,
            "monitor bound"
        );

        let retention = config.retention_window;
        let recovery_intervals = config.recovery_intervals;

        Ok(Self {
            config,
            context,
            control_socket,
            event_pull,
            window: SampleWindow::new(retention, 10_000),
            alerts: AlertTracker::new(recovery_intervals),
            builds_succeeded: 0,
            builds_failed: 0,
            workers_seen: std::collections::HashSet::new(),
            worker_status: std::collections::HashMap::new(),
            workers_lost_total: 0,
            last_collection: 0.0,
            last_prune: 0.0,
            running: false,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        self.run_with_shutdown_inner(None)
    }

    pub fn run_with_shutdown(&mut self, stop_rx: mpsc::Receiver<()>) -> Result<()> {
        self.run_with_shutdown_inner(Some(stop_rx))
    }

    fn run_with_shutdown_inner(&mut self, stop_rx: Option<mpsc::Receiver<()>>) -> Result<()> {
        self.running = true;
        info!("monitor event loop started");

        while self.running {
            if let Some(rx) = stop_rx.as_ref() {
                match rx.try_recv() {
                    Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                        info!("monitor received stop signal");
                        break;
                    }
                    Err(mpsc::TryRecvError::Empty) => {}
                }
            }

            if let Err(e) = self.handle_control() {
                error!(error = %e, "monitor control API error");
            }

            self.drain_events();

            let now = current_time();
            if now - self.last_collection >= self.config.collection_interval.as_secs_f64() {
                self.collect(now);
                self.last_collection = now;
            }
            if now - self.last_prune >= 60.0 {
                self.window.prune(now);
                self.last_prune = now;
            }
        }

        Ok(())
    }

    fn handle_control(&mut self) -> Result<()> {
        let bytes = match self.control_socket.recv_bytes(0) {
            Ok(b) => b,
            Err(zmq::Error::EAGAIN) => return Ok(()),
            Err(e) => return Err(e).context("monitor control recv failed"),
        };

        let response = match serde_json::from_slice::<MonitorRequest>(&bytes) {
            Ok(request) => self.handle_request(request),
            Err(e) => MonitorResponse::error("invalid_request", e.to_string()),
        };

        let payload = serde_json::to_vec(&response).unwrap_or_else(|_| {
            serde_json::to_vec(&MonitorResponse::error("internal_error", "serialization failed"))
                .expect("static error response serializes")
        });
        self.control_socket
            .send(&payload, 0)
            .context("failed to send monitor response")?;
        Ok(())
    }

    fn handle_request(&self, request: MonitorRequest) -> MonitorResponse {
        match request {
            MonitorRequest::Ping => MonitorResponse::Pong,
            MonitorRequest::Health => MonitorResponse::Health(HealthInfo {
                status: "healthy".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            }),
            MonitorRequest::Alerts => MonitorResponse::Alerts(
                self.alerts
                    .all()
                    .into_iter()
                    .map(|a| AlertInfo {
                        id: a.id.to_string(),
                        metric: a.metric,
                        severity: a.severity.as_str().to_string(),
                        message: a.message,
                        value: a.value,
                        threshold: a.threshold,
                        triggered_at: a.triggered_at.to_rfc3339(),
                        resolved: a.resolved,
                        resolved_at: a.resolved_at.map(|t| t.to_rfc3339()),
                    })
                    .collect(),
            ),
            MonitorRequest::Metrics => MonitorResponse::Metrics(self.system_metrics()),
        }
    }

    fn system_metrics(&self) -> SystemMetricsInfo {
        let total_builds = self.builds_succeeded + self.builds_failed;
        SystemMetricsInfo {
            total_builds,
            builds_succeeded: self.builds_succeeded,
            builds_failed: self.builds_failed,
            success_rate: if total_builds == 0 {
                1.0
            } else {
                self.builds_succeeded as f64 / total_builds as f64
            },
            avg_build_time_ms: self.window.mean("build_duration_ms", 100).unwrap_or(0.0),
            queue_length: self.window.latest("queue_length").unwrap_or(0.0) as usize,
            active_worker_count: self.window.latest("active_worker_count").unwrap_or(0.0) as usize,
            cache_hit_rate: self.window.latest("cache_hit_rate"),
            workers: self.last_worker_metrics(),
        }
    }

    fn last_worker_metrics(&self) -> Vec<WorkerMetricsInfo> {
        self.workers_seen
            .iter()
            .filter_map(|id| {
                let active = self.window.latest(&format!("worker.{id}.active_build_count"))?;
                Some(WorkerMetricsInfo {
                    worker_id: id.clone(),
                    status: self
                        .worker_status
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                    active_build_count: active as usize,
                    max_concurrent_builds: self
                        .window
                        .latest(&format!("worker.{id}.max_concurrent_builds"))
                        .unwrap_or(0.0) as usize,
                    mean_duration_ms: self
                        .window
                        .latest(&format!("worker.{id}.mean_duration_ms"))
                        .unwrap_or(0.0),
                    builds_completed: self
                        .window
                        .latest(&format!("worker.{id}.builds_completed"))
                        .unwrap_or(0.0) as u64,
                    builds_failed: self
                        .window
                        .latest(&format!("worker.{id}.builds_failed"))
                        .unwrap_or(0.0) as u64,
                    cpu_percent: self.window.latest(&format!("worker.{id}.cpu_percent")),
                    memory_bytes: self
                        .window
                        .latest(&format!("worker.{id}.memory_bytes"))
                        .map(|v| v as u64),
                })
            })
            .collect()
    }

    fn drain_events(&mut self) {
        loop {
            let bytes = match self.event_pull.recv_bytes(0) {
                Ok(b) => b,
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => {
                    warn!(error = %e, "monitor event recv failed");
                    break;
                }
            };

            match serde_json::from_slice::<CoordinatorEvent>(&bytes) {
                Ok(CoordinatorEvent::BuildCompleted { success, .. }) => {
                    if success {
                        self.builds_succeeded += 1;
                    } else {
                        self.builds_failed += 1;
                    }
                }
                Ok(CoordinatorEvent::WorkerLost { worker_id }) => {
                    self.workers_lost_total += 1;
                    self.workers_seen.insert(worker_id);
                }
                Err(e) => debug!(error = %e, "unrecognized monitor event, dropping"),
            }
        }
    }

    /// One collection tick: poll the coordinator (and cache, if configured),
    /// record samples, and evaluate alert thresholds.
    fn collect(&mut self, now: f64) {
        match self.poll_coordinator() {
            Ok((workers, queue_stats)) => {
                self.window.record("active_worker_count", now, workers.len() as f64);
                self.window.record("queue_length", now, queue_stats.queue_length as f64);
                self.window.record("build_duration_ms", now, queue_stats.avg_build_time_ms);

                let lost_fraction = if self.workers_seen.is_empty() {
                    0.0
                } else {
                    self.workers_lost_total as f64 / self.workers_seen.len() as f64
                };
                self.window.record("worker_liveness_fraction", now, lost_fraction);

                let total = queue_stats.builds_succeeded + queue_stats.builds_failed;
                let failure_rate = if total == 0 {
                    0.0
                } else {
                    queue_stats.builds_failed as f64 / total as f64
                };
                self.window.record("build_failure_rate", now, failure_rate);

                for worker in &workers {
                    self.workers_seen.insert(worker.id.to_string());
                    self.worker_status
                        .insert(worker.id.to_string(), worker.status.as_str().to_string());
                    self.window.record(
                        &format!("worker.{}.active_build_count", worker.id),
                        now,
                        worker.active_build_count as f64,
                    );
                    self.window.record(
                        &format!("worker.{}.max_concurrent_builds", worker.id),
                        now,
                        worker.max_concurrent_builds as f64,
                    );
                    self.window.record(
                        &format!("worker.{}.mean_duration_ms", worker.id),
                        now,
                        worker.mean_duration_ms,
                    );
                    self.window.record(
                        &format!("worker.{}.builds_completed", worker.id),
                        now,
                        worker.builds_completed as f64,
                    );
                    self.window.record(
                        &format!("worker.{}.builds_failed", worker.id),
                        now,
                        worker.builds_failed as f64,
                    );
                    if let Some(cpu) = worker.cpu_percent {
                        self.window.record(&format!("worker.{}.cpu_percent", worker.id), now, cpu);
                    }
                    if let Some(mem) = worker.memory_bytes {
                        self.window
                            .record(&format!("worker.{}.memory_bytes", worker.id), now, mem as f64);
                    }
                }
            }
            Err(e) => warn!(error = %e, "monitor collection against coordinator failed for this tick"),
        }

        if let Some(addr) = self.config.cache_request_addr.clone() {
            match self.poll_cache(&addr) {
                Ok(fraction) => self.window.record("cache_saturation_fraction", now, fraction),
                Err(e) => warn!(error = %e, "monitor collection against cache failed for this tick"),
            }
        }

        self.evaluate_alerts();
    }

    /// Standard alerts: worker liveness, build
    /// failure rate, cache saturation, and per-worker CPU.
    fn evaluate_alerts(&mut self) {
        let checks: [(&str, f64, f64); 3] = [
            ("worker_liveness_fraction", 0.5, 0.75),
            ("build_failure_rate", 0.2, 0.5),
            ("cache_saturation_fraction", 0.9, 0.98),
        ];
        for (metric, default_warning, default_critical) in checks {
            let warning = self
                .config
                .alert_thresholds
                .get(metric)
                .copied()
                .unwrap_or(default_warning);
            let critical = default_critical.max(warning);
            if let Some(value) = self.window.mean(metric, 3) {
                self.alerts.evaluate(metric, value, warning, critical);
            }
        }

        let cpu_warning = self
            .config
            .alert_thresholds
            .get("cpu_percent")
            .copied()
            .unwrap_or(90.0);
        let cpu_critical = (cpu_warning + 10.0).min(100.0).max(cpu_warning);
        for worker_id in self.workers_seen.clone() {
            let metric = format!("worker.{worker_id}.cpu_percent");
            if let Some(value) = self.window.mean(&metric, 3) {
                self.alerts.evaluate(&metric, value, cpu_warning, cpu_critical);
            }
        }
    }

    fn poll_coordinator(
        &self,
    ) -> Result<(Vec<buildfarm_coordinator::WorkerInfo>, buildfarm_coordinator::QueueStatsInfo)> {
        let workers = match self.request_coordinator(RequestApi::ListWorkers)? {
            RequestApiResponse::Workers(w) => w,
            other => anyhow::bail!("unexpected ListWorkers response: {other:?}"),
        };
        let stats = match self.request_coordinator(RequestApi::QueueStats)? {
            RequestApiResponse::QueueStats(s) => s,
            other => anyhow::bail!("unexpected QueueStats response: {other:?}"),
        };
        Ok((workers, stats))
    }

    fn request_coordinator(&self, request: RequestApi) -> Result<RequestApiResponse> {
        let socket = self
            .context
            .socket(zmq::REQ)
            .context("failed to create coordinator polling socket")?;
        socket.set_sndtimeo(REQ_TIMEOUT_MS).ok();
        socket.set_rcvtimeo(REQ_TIMEOUT_MS).ok();
        socket
            .connect(&self.config.coordinator_request_addr)
            .context("failed to connect to coordinator request API")?;
        socket.send(&serde_json::to_vec(&request)?, 0)?;
        let bytes = socket.recv_bytes(0).context("coordinator request timed out")?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns occupancy fraction (total_size_bytes / max_size_bytes).
    fn poll_cache(&self, addr: &str) -> Result<f64> {
        let socket = self
            .context
            .socket(zmq::REQ)
            .context("failed to create cache polling socket")?;
        socket.set_sndtimeo(REQ_TIMEOUT_MS).ok();
        socket.set_rcvtimeo(REQ_TIMEOUT_MS).ok();
        socket.connect(addr).context("failed to connect to cache control API")?;
        socket.send(&serde_json::to_vec(&CacheRequest::Stats)?, 0)?;
        let bytes = socket.recv_bytes(0).context("cache stats request timed out")?;
        match serde_json::from_slice(&bytes)? {
            CacheResponse::Stats(stats) if stats.max_size_bytes > 0 => {
                Ok(stats.total_size_bytes as f64 / stats.max_size_bytes as f64)
            }
            CacheResponse::Stats(_) => Ok(0.0),
            other => anyhow::bail!("unexpected cache stats response: {other:?}"),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle
    }
}

/// Placeholder handle kept for symmetry with the worker/cache binaries;
/// the monitor's own shutdown is driven by the `stop_rx` channel instead.
pub struct MonitorHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_config(control: &str, event: &str) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.control_addr = control.to_string();
        config.event_addr = event.to_string();
        config.coordinator_request_addr = "inproc://nonexistent-coordinator".to_string();
        config.cache_request_addr = None;
        config.collection_interval = StdDuration::from_secs(3600);
        config
    }

    #[test]
    fn binds_and_answers_ping() {
        let config = test_config(
            "ipc:///tmp/buildfarm-monitor-test-control.sock",
            "ipc:///tmp/buildfarm-monitor-test-event.sock",
        );
        let monitor = Monitor::bind(config).expect("bind monitor");
        assert_eq!(
            monitor.handle_request(MonitorRequest::Ping),
            MonitorResponse::Pong
        );
    }

    #[test]
    fn metrics_with_no_history_are_zeroed() {
        let config = test_config(
            "ipc:///tmp/buildfarm-monitor-test-control2.sock",
            "ipc:///tmp/buildfarm-monitor-test-event2.sock",
        );
        let monitor = Monitor::bind(config).expect("bind monitor");
        let metrics = monitor.system_metrics();
        assert_eq!(metrics.total_builds, 0);
        assert_eq!(metrics.success_rate, 1.0);
    }
}
