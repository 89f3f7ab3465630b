//! Coordinator - control plane for the build farm.
//!
//! Manages the worker pool, dispatches builds, and handles the ZMQ ROUTER
//! control protocol plus a synchronous JSON REP request API.

use crate::control::{
    BuildRecordInfo, HealthInfo, QueueStatsInfo, RequestApi, RequestApiResponse, WorkerInfo,
};
use crate::metrics::METRICS;
use anyhow::{Context, Result};
use buildfarm_ids::WorkerId;
use buildfarm_protocol::{
    config::CoordinatorConfig, error::DomainError, BuildId, BuildMetrics, BuildResult, BuildState,
    CancelCommand, DispatchCommand, Header, HeartbeatPayload, Message, OpCode, RegisterPayload,
    UnregisterPayload, WorkerStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use zmq::{Context as ZmqContext, Socket};

/// Dispatch backoff base (ms) when no builds were dispatched in a pass.
const DISPATCH_BACKOFF_BASE_MS: u64 = 50;
/// Dispatch backoff max (ms).
const DISPATCH_BACKOFF_MAX_MS: u64 = 1_000;
/// Dispatch backoff jitter cap (ms).
const DISPATCH_BACKOFF_JITTER_MS: u64 = 50;

/// How often to run stale-worker cleanup (seconds).
const CLEANUP_INTERVAL_SECS: f64 = 10.0;

/// How often to rewrite the build-table snapshot (seconds).
const SNAPSHOT_INTERVAL_SECS: f64 = 30.0;

/// Terminal builds are retained at most this long before pruning.
const RETENTION_WINDOW_SECS: i64 = 24 * 60 * 60;
/// ...or at most this many terminal builds, whichever is reached first.
const RETENTION_MAX_TERMINAL_BUILDS: usize = 10_000;

fn current_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Worker as tracked by the coordinator.
#[derive(Debug, Clone)]
struct WorkerEntry {
    id: WorkerId,
    identity: Vec<u8>,
    advertise_address: String,
    capabilities: Vec<String>,
    status: WorkerStatus,
    max_concurrent_builds: usize,
    active_builds: HashSet<BuildId>,
    last_heartbeat: f64,
    builds_completed: u64,
    builds_failed: u64,
    total_duration_ms: u64,
    cpu_percent: Option<f64>,
    memory_bytes: Option<u64>,
}

impl WorkerEntry {
    fn mean_duration_ms(&self) -> f64 {
        if self.builds_completed == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.builds_completed as f64
        }
    }

    fn is_dispatchable_for(&self, required_capabilities: &[String]) -> bool {
        self.status.is_dispatchable()
            && self.active_builds.len() < self.max_concurrent_builds
            && required_capabilities
                .iter()
                .all(|cap| self.capabilities.iter().any(|c| c == cap))
    }
}

/// Build as tracked by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BuildRecord {
    build_id: BuildId,
    project_path: String,
    task_name: String,
    options: HashMap<String, String>,
    cache_enabled: bool,
    state: BuildState,
    assigned_worker: Option<WorkerId>,
    attempt: u32,
    created_at: DateTime<Utc>,
    /// Reset each time the build (re-)enters `Queued`; used to measure how
    /// long it has gone without an eligible worker.
    queued_since: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<BuildResult>,
}

impl BuildRecord {
    fn to_info(&self) -> BuildRecordInfo {
        BuildRecordInfo {
            build_id: self.build_id,
            project_path: self.project_path.clone(),
            task_name: self.task_name.clone(),
            state: self.state,
            assigned_worker: self.assigned_worker.clone(),
            attempt: self.attempt,
            created_at: self.created_at.to_rfc3339(),
            started_at: self.started_at.map(|d| d.to_rfc3339()),
            ended_at: self.ended_at.map(|d| d.to_rfc3339()),
            result: self.result.clone(),
        }
    }
}

/// Main coordinator control plane.
pub struct Coordinator {
    config: CoordinatorConfig,
    context: ZmqContext,
    control_socket: Socket,
    request_socket: Socket,
    monitor_push: Option<Socket>,
    workers: HashMap<WorkerId, WorkerEntry>,
    identity_to_worker: HashMap<Vec<u8>, WorkerId>,
    builds: HashMap<BuildId, BuildRecord>,
    queue: VecDeque<BuildId>,
    next_build_id: u64,
    running: bool,
    last_cleanup: f64,
    last_snapshot: f64,
    dispatch_backoff_ms: u64,
    dispatch_cooldown_until: Option<Instant>,
}

impl Coordinator {
    pub fn bind(config: CoordinatorConfig) -> Result<Self> {
        let context = ZmqContext::new();

        #[cfg(unix)]
        unlink_stale_ipc_socket(&config.control_addr);

        let control_socket = context
            .socket(zmq::ROUTER)
            .context("failed to create control ROUTER socket")?;
        control_socket
            .bind(&config.control_addr)
            .with_context(|| format!("failed to bind control socket to {}", config.control_addr))?;
        control_socket
            .set_rcvtimeo(100)
            .context("failed to set control socket receive timeout")?;

        info!(addr = %config.control_addr, "coordinator control API bound");

        #[cfg(unix)]
        unlink_stale_ipc_socket(&config.request_addr);

        let request_socket = context
            .socket(zmq::REP)
            .context("failed to create request REP socket")?;
        request_socket
            .bind(&config.request_addr)
            .with_context(|| format!("failed to bind request socket to {}", config.request_addr))?;
        request_socket
            .set_rcvtimeo(10)
            .context("failed to set request socket receive timeout")?;

        info!(addr = %config.request_addr, "coordinator request API bound");

        let monitor_push = if let Some(ref addr) = config.monitor_event_addr {
            let socket = context
                .socket(zmq::PUSH)
                .context("failed to create monitor PUSH socket")?;
            socket
                .connect(addr)
                .with_context(|| format!("failed to connect monitor PUSH socket to {}", addr))?;
            info!(addr = %addr, "coordinator monitor event channel connected");
            Some(socket)
        } else {
            None
        };

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;

        Ok(Self {
            config,
            context,
            control_socket,
            request_socket,
            monitor_push,
            workers: HashMap::new(),
            identity_to_worker: HashMap::new(),
            builds: HashMap::new(),
            queue: VecDeque::new(),
            next_build_id: 1,
            running: false,
            last_cleanup: current_time(),
            last_snapshot: current_time(),
            dispatch_backoff_ms: 0,
            dispatch_cooldown_until: None,
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
        info!("coordinator event loop started");

        while self.running {
            if let Some(rx) = stop_rx.as_ref() {
                match rx.try_recv() {
                    Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                        info!("coordinator received stop signal");
                        self.running = false;
                        break;
                    }
                    Err(mpsc::TryRecvError::Empty) => {}
                }
            }

            match self.recv_control_message() {
                Ok(Some((identity, msg))) => {
                    if let Err(e) = self.handle_control_message(identity, msg) {
                        error!(error = %e, "error handling control message");
                    }
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "control recv error"),
            }

            if let Err(e) = self.handle_request_api() {
                error!(error = %e, "request API error");
            }

            self.cleanup_stale_workers();
            self.timeout_overdue_builds();
            self.fail_overdue_queued_builds();

            if let Err(e) = self.dispatch_loop() {
                error!(error = %e, "dispatch error");
            }

            if current_time() - self.last_snapshot >= SNAPSHOT_INTERVAL_SECS {
                if let Err(e) = self.write_snapshot() {
                    warn!(error = %e, "failed to write coordinator snapshot");
                }
                self.last_snapshot = current_time();
                self.prune_terminal_builds();
            }
        }

        info!("coordinator stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Worker control plane (ROUTER)
    // ------------------------------------------------------------------

    fn recv_control_message(&self) -> Result<Option<(Vec<u8>, Message)>> {
        match self.control_socket.recv_multipart(0) {
            Ok(frames) => {
                if frames.len() < 3 {
                    warn!(frame_count = frames.len(), "malformed ROUTER frame, dropping");
                    return Ok(None);
                }
                let identity = frames[0].clone();
                let msg = Message::unpack(&frames[1..])
                    .context("failed to unpack control message")?;
                Ok(Some((identity, msg)))
            }
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn send_to_worker(
        &self,
        identity: &[u8],
        opcode: OpCode,
        build_id: BuildId,
        payload: &[u8],
    ) -> Result<()> {
        let header = Header::new(opcode, build_id, payload.len() as u32);
        self.control_socket.send(identity, zmq::SNDMORE)?;
        self.control_socket.send(&header.pack()?[..], zmq::SNDMORE)?;
        self.control_socket.send(payload, 0)?;
        Ok(())
    }

    fn handle_control_message(&mut self, identity: Vec<u8>, msg: Message) -> Result<()> {
        METRICS.inc_messages_received();
        match msg.header.opcode {
            OpCode::Register => self.handle_register(identity, &msg.payload),
            OpCode::Heartbeat => self.handle_heartbeat(identity, &msg.payload),
            OpCode::Complete => self.handle_complete(identity, msg.header.build_id, &msg.payload),
            OpCode::Unregister => self.handle_unregister(identity, &msg.payload),
            other => {
                debug!(opcode = ?other, "coordinator ignoring unexpected opcode from worker");
                Ok(())
            }
        }
    }

    fn handle_register(&mut self, identity: Vec<u8>, payload: &[u8]) -> Result<()> {
        let register: RegisterPayload = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed register payload");
                return Ok(());
            }
        };

        let entry = WorkerEntry {
            id: register.worker_id.clone(),
            identity: identity.clone(),
            advertise_address: register.advertise_address,
            capabilities: register.capabilities,
            status: WorkerStatus::Active,
            max_concurrent_builds: register.max_concurrent_builds,
            active_builds: HashSet::new(),
            last_heartbeat: current_time(),
            builds_completed: 0,
            builds_failed: 0,
            total_duration_ms: 0,
            cpu_percent: None,
            memory_bytes: None,
        };

        info!(worker_id = %register.worker_id, "worker registered");
        self.identity_to_worker
            .insert(identity.clone(), register.worker_id.clone());
        self.workers.insert(register.worker_id, entry);
        METRICS.inc_workers_registered();

        self.send_to_worker(&identity, OpCode::Register, BuildId::new(0), b"{}")
    }

    fn handle_heartbeat(&mut self, identity: Vec<u8>, payload: &[u8]) -> Result<()> {
        let heartbeat: HeartbeatPayload = match serde_json::from_slice(payload) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "malformed heartbeat payload");
                return Ok(());
            }
        };

        let Some(worker_id) = self.identity_to_worker.get(&identity).cloned() else {
            debug!("heartbeat from unregistered worker, dropping");
            return Ok(());
        };

        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.last_heartbeat = current_time();
            worker.active_builds = heartbeat.active_build_ids.into_iter().collect();
            worker.cpu_percent = heartbeat.cpu_percent;
            worker.memory_bytes = heartbeat.memory_bytes;
            if worker.status != WorkerStatus::Draining {
                worker.status = if worker.active_builds.len() >= worker.max_concurrent_builds {
                    WorkerStatus::Busy
                } else {
                    WorkerStatus::Active
                };
            }
        }
        Ok(())
    }

    fn handle_complete(&mut self, identity: Vec<u8>, build_id: BuildId, payload: &[u8]) -> Result<()> {
        // The header already carries the build id; the body is a bare BuildResult.
        let result: BuildResult = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed build-complete payload");
                return Ok(());
            }
        };

        let Some(worker_id) = self.identity_to_worker.get(&identity).cloned() else {
            warn!(%build_id, "build-complete from unknown worker, discarding");
            return Ok(());
        };

        let Some(record) = self.builds.get_mut(&build_id) else {
            warn!(%build_id, "build-complete for unknown build, discarding");
            return Ok(());
        };

        // Idempotent: a build already in a terminal state discards further completions.
        if record.state.is_terminal() {
            debug!(%build_id, "duplicate build-complete, discarding");
            return Ok(());
        }

        if record.assigned_worker.as_ref() != Some(&worker_id) {
            warn!(
                %build_id,
                responding_worker = %worker_id,
                assigned_worker = ?record.assigned_worker,
                "build-complete from non-assigned worker, discarding"
            );
            return Ok(());
        }

        record.state = if result.success {
            BuildState::Succeeded
        } else {
            BuildState::Failed
        };
        record.ended_at = Some(Utc::now());
        record.result = Some(result.clone());

        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.active_builds.remove(&build_id);
            if result.success {
                worker.builds_completed += 1;
                worker.total_duration_ms += result.duration_ms;
            } else {
                worker.builds_failed += 1;
            }
        }

        if result.success {
            METRICS.inc_jobs_completed();
        } else {
            METRICS.inc_jobs_failed();
        }

        self.notify_monitor_build_completed(build_id, result.success);
        Ok(())
    }

    fn handle_unregister(&mut self, identity: Vec<u8>, payload: &[u8]) -> Result<()> {
        let unregister: UnregisterPayload = match serde_json::from_slice(payload) {
            Ok(u) => u,
            Err(_) => return Ok(()),
        };
        if let Some(worker) = self.workers.get_mut(&unregister.worker_id) {
            worker.status = WorkerStatus::Draining;
        }
        info!(worker_id = %unregister.worker_id, "worker draining");
        self.identity_to_worker.remove(&identity);
        Ok(())
    }

    /// Mark workers stale after `liveness_timeout`, requeue their in-flight
    /// builds.
    fn cleanup_stale_workers(&mut self) {
        let now = current_time();
        if now - self.last_cleanup < CLEANUP_INTERVAL_SECS {
            return;
        }
        self.last_cleanup = now;

        let timeout = self.config.liveness_timeout.as_secs_f64();
        let stale_ids: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, w)| now - w.last_heartbeat > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for worker_id in stale_ids {
            warn!(worker_id = %worker_id, "worker liveness timeout, marking lost");
            let Some(mut worker) = self.workers.remove(&worker_id) else { continue };
            worker.status = WorkerStatus::Lost;
            self.identity_to_worker.retain(|_, v| v != &worker_id);

            for build_id in std::mem::take(&mut worker.active_builds) {
                self.requeue_or_fail(build_id, "worker loss");
            }

            self.notify_monitor_worker_lost(&worker_id);
            METRICS.inc_workers_cleaned_up();
        }
    }

    /// Mark `running` builds whose wall-clock exceeds `per_build_timeout` as
    /// `timed_out`.
    fn timeout_overdue_builds(&mut self) {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.config.per_build_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(1_800));

        let overdue: Vec<BuildId> = self
            .builds
            .values()
            .filter(|b| {
                b.state == BuildState::Running
                    && b.started_at.map(|s| now - s > timeout).unwrap_or(false)
            })
            .map(|b| b.build_id)
            .collect();

        for build_id in overdue {
            warn!(build_id = %build_id, "build exceeded per_build_timeout");
            if let Some(worker_id) = self.builds.get(&build_id).and_then(|b| b.assigned_worker.clone())
            {
                if let Some(worker) = self.workers.get(&worker_id) {
                    let payload = serde_json::to_vec(&CancelCommand { build_id }).unwrap_or_default();
                    let _ = self.send_to_worker(&worker.identity, OpCode::Cancel, build_id, &payload);
                }
            }
            if let Some(record) = self.builds.get_mut(&build_id) {
                record.state = BuildState::TimedOut;
                record.ended_at = Some(Utc::now());
            }
        }
    }

    fn requeue_or_fail(&mut self, build_id: BuildId, reason: &str) {
        let Some(record) = self.builds.get_mut(&build_id) else { return };
        record.attempt += 1;
        if record.attempt > self.config.max_attempts {
            record.state = BuildState::Failed;
            record.ended_at = Some(Utc::now());
            record.result = Some(BuildResult {
                success: false,
                duration_ms: 0,
                artifacts: Vec::new(),
                error_message: Some(reason.to_string()),
                metrics: BuildMetrics::default(),
            });
            METRICS.inc_jobs_failed();
        } else {
            record.state = BuildState::Queued;
            record.assigned_worker = None;
            record.queued_since = Utc::now();
            METRICS.inc_jobs_retried();
            self.queue.push_back(build_id);
        }
    }

    /// Fail builds that have sat in the queue longer than `dispatch_timeout`
    /// with no eligible worker, rather than waiting on them forever.
    fn fail_overdue_queued_builds(&mut self) {
        let timeout = chrono::Duration::from_std(self.config.dispatch_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = Utc::now();

        let overdue: Vec<BuildId> = self
            .builds
            .values()
            .filter(|b| b.state == BuildState::Queued && now - b.queued_since > timeout)
            .map(|b| b.build_id)
            .collect();

        for build_id in overdue {
            let err = DomainError::WorkerUnavailable(format!(
                "no eligible worker within {:?}",
                self.config.dispatch_timeout
            ));
            warn!(build_id = %build_id, "dispatch timeout, no eligible worker");
            self.queue.retain(|id| *id != build_id);
            if let Some(record) = self.builds.get_mut(&build_id) {
                record.state = BuildState::Failed;
                record.ended_at = Some(now);
                record.result = Some(BuildResult {
                    success: false,
                    duration_ms: 0,
                    artifacts: Vec::new(),
                    error_message: Some(format!("{}: {}", err.code(), err)),
                    metrics: BuildMetrics::default(),
                });
            }
            METRICS.inc_jobs_failed();
        }
    }

    // ------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------

    fn dispatch_loop(&mut self) -> Result<()> {
        if let Some(cooldown) = self.dispatch_cooldown_until {
            if Instant::now() < cooldown {
                return Ok(());
            }
        }

        let mut dispatched_any = false;
        let pending: Vec<BuildId> = self.queue.iter().copied().collect();

        for build_id in pending {
            let Some(record) = self.builds.get(&build_id) else { continue };
            if record.state != BuildState::Queued {
                continue;
            }

            let required_capabilities: Vec<String> = Vec::new();
            let candidate = self
                .workers
                .values()
                .filter(|w| w.is_dispatchable_for(&required_capabilities))
                .min_by(|a, b| {
                    a.active_builds
                        .len()
                        .cmp(&b.active_builds.len())
                        .then_with(|| {
                            a.mean_duration_ms()
                                .partial_cmp(&b.mean_duration_ms())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| a.id.as_str().cmp(b.id.as_str()))
                })
                .map(|w| w.id.clone());

            let Some(worker_id) = candidate else {
                continue;
            };

            self.queue.retain(|id| *id != build_id);
            if self.assign_build(&worker_id, build_id)? {
                dispatched_any = true;
            }
        }

        if dispatched_any {
            self.dispatch_backoff_ms = 0;
            self.dispatch_cooldown_until = None;
        } else {
            self.schedule_dispatch_backoff();
        }

        Ok(())
    }

    fn assign_build(&mut self, worker_id: &WorkerId, build_id: BuildId) -> Result<bool> {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return Ok(false);
        };
        let identity = worker.identity.clone();
        worker.active_builds.insert(build_id);
        if worker.active_builds.len() >= worker.max_concurrent_builds {
            worker.status = WorkerStatus::Busy;
        }

        let Some(record) = self.builds.get_mut(&build_id) else {
            return Ok(false);
        };
        record.state = BuildState::Dispatched;
        record.assigned_worker = Some(worker_id.clone());
        record.started_at = Some(Utc::now());

        let command = DispatchCommand {
            build_id,
            project_path: record.project_path.clone(),
            task_name: record.task_name.clone(),
            options: record.options.clone(),
            cache_enabled: record.cache_enabled,
            attempt: record.attempt,
            advisory_hint: None,
        };
        let payload = serde_json::to_vec(&command)?;
        self.send_to_worker(&identity, OpCode::Dispatch, build_id, &payload)?;

        record.state = BuildState::Running;
        METRICS.inc_jobs_dispatched();
        info!(build_id = %build_id, worker_id = %worker_id, "build dispatched");
        Ok(true)
    }

    fn schedule_dispatch_backoff(&mut self) {
        let next = if self.dispatch_backoff_ms == 0 {
            DISPATCH_BACKOFF_BASE_MS
        } else {
            (self.dispatch_backoff_ms * 2).min(DISPATCH_BACKOFF_MAX_MS)
        };
        self.dispatch_backoff_ms = next;

        let jitter_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 % DISPATCH_BACKOFF_JITTER_MS)
            .unwrap_or(0);
        self.dispatch_cooldown_until =
            Some(Instant::now() + Duration::from_millis(next + jitter_ms));
    }

    // ------------------------------------------------------------------
    // Request API (REP)
    // ------------------------------------------------------------------

    fn handle_request_api(&mut self) -> Result<()> {
        let bytes = match self.request_socket.recv_bytes(0) {
            Ok(b) => b,
            Err(zmq::Error::EAGAIN) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let response = match serde_json::from_slice::<RequestApi>(&bytes) {
            Ok(request) => self.handle_request(request),
            Err(e) => RequestApiResponse::error("invalid_request", e.to_string()),
        };

        let payload = serde_json::to_vec(&response).unwrap_or_else(|_| {
            serde_json::to_vec(&RequestApiResponse::error("internal_error", "serialization failed"))
                .expect("static error response serializes")
        });
        self.request_socket.send(&payload, 0)?;
        Ok(())
    }

    fn handle_request(&mut self, request: RequestApi) -> RequestApiResponse {
        match request {
            RequestApi::Submit { project_path, task_name, options, cache_enabled } => {
                self.handle_submit(project_path, task_name, options, cache_enabled)
            }
            RequestApi::GetStatus { build_id } => {
                RequestApiResponse::Status(self.builds.get(&build_id).map(BuildRecord::to_info))
            }
            RequestApi::ListWorkers => RequestApiResponse::Workers(
                self.workers.values().map(|w| WorkerInfo {
                    id: w.id.clone(),
                    advertise_address: w.advertise_address.clone(),
                    capabilities: w.capabilities.clone(),
                    status: w.status,
                    active_build_count: w.active_builds.len(),
                    max_concurrent_builds: w.max_concurrent_builds,
                    builds_completed: w.builds_completed,
                    builds_failed: w.builds_failed,
                    mean_duration_ms: w.mean_duration_ms(),
                    last_heartbeat: DateTime::<Utc>::from(
                        UNIX_EPOCH + Duration::from_secs_f64(w.last_heartbeat),
                    )
                    .to_rfc3339(),
                    cpu_percent: w.cpu_percent,
                    memory_bytes: w.memory_bytes,
                }).collect(),
            ),
            RequestApi::QueueStats => {
                let (succeeded, failed, total_duration_ms, completed) = self
                    .builds
                    .values()
                    .filter_map(|b| b.result.as_ref())
                    .fold((0u64, 0u64, 0u64, 0u64), |(s, f, d, c), r| {
                        if r.success {
                            (s + 1, f, d + r.duration_ms, c + 1)
                        } else {
                            (s, f + 1, d, c + 1)
                        }
                    });
                RequestApiResponse::QueueStats(QueueStatsInfo {
                    queue_length: self.queue.len(),
                    total_builds: self.builds.len() as u64,
                    builds_succeeded: succeeded,
                    builds_failed: failed,
                    avg_build_time_ms: if completed == 0 {
                        0.0
                    } else {
                        total_duration_ms as f64 / completed as f64
                    },
                })
            }
            RequestApi::Health => RequestApiResponse::Health(HealthInfo {
                status: "healthy".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: Utc::now().to_rfc3339(),
            }),
        }
    }

    fn handle_submit(
        &mut self,
        project_path: String,
        task_name: String,
        options: HashMap<String, String>,
        cache_enabled: bool,
    ) -> RequestApiResponse {
        if project_path.trim().is_empty() || task_name.trim().is_empty() {
            return RequestApiResponse::error("invalid_request", "project_path and task_name are required");
        }
        if self.queue.len() >= self.config.queue_capacity {
            return RequestApiResponse::error("queue_full", "build queue is at capacity");
        }

        let build_id = BuildId::new(self.next_build_id);
        self.next_build_id += 1;

        let record = BuildRecord {
            build_id,
            project_path,
            task_name,
            options,
            cache_enabled,
            state: BuildState::Queued,
            assigned_worker: None,
            attempt: 1,
            created_at: Utc::now(),
            queued_since: Utc::now(),
            started_at: None,
            ended_at: None,
            result: None,
        };
        self.builds.insert(build_id, record);
        self.queue.push_back(build_id);

        RequestApiResponse::Submitted { build_id }
    }

    // ------------------------------------------------------------------
    // Monitor notification (fire-and-forget PUSH)
    // ------------------------------------------------------------------

    fn notify_monitor_worker_lost(&self, worker_id: &WorkerId) {
        self.push_monitor_event(&format!(r#"{{"event":"worker_lost","worker_id":"{}"}}"#, worker_id));
    }

    fn notify_monitor_build_completed(&self, build_id: BuildId, success: bool) {
        self.push_monitor_event(&format!(
            r#"{{"event":"build_completed","build_id":{},"success":{}}}"#,
            build_id.as_u64(),
            success
        ));
    }

    fn push_monitor_event(&self, json: &str) {
        if let Some(ref socket) = self.monitor_push {
            if let Err(e) = socket.send(json, zmq::DONTWAIT) {
                debug!(error = %e, "monitor event send failed, dropping");
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshot + retention
    // ------------------------------------------------------------------

    fn write_snapshot(&self) -> Result<()> {
        let path = self.config.data_dir.join("coordinator_snapshot.json");
        let records: Vec<&BuildRecord> = self.builds.values().collect();
        let json = serde_json::to_vec_pretty(&records)?;
        let tmp_path = self.config.data_dir.join("coordinator_snapshot.json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Bounded retention for terminal builds: prune anything older than
    /// `RETENTION_WINDOW_SECS`, then cap the terminal-build count at
    /// `RETENTION_MAX_TERMINAL_BUILDS` by oldest-first eviction.
    fn prune_terminal_builds(&mut self) {
        let now = Utc::now();
        self.builds.retain(|_, record| {
            if !record.state.is_terminal() {
                return true;
            }
            match record.ended_at {
                Some(ended) => (now - ended).num_seconds() < RETENTION_WINDOW_SECS,
                None => true,
            }
        });

        let terminal_count = self.builds.values().filter(|r| r.state.is_terminal()).count();
        if terminal_count > RETENTION_MAX_TERMINAL_BUILDS {
            let mut terminal_ids: Vec<(BuildId, DateTime<Utc>)> = self
                .builds
                .values()
                .filter(|r| r.state.is_terminal())
                .map(|r| (r.build_id, r.ended_at.unwrap_or(r.created_at)))
                .collect();
            terminal_ids.sort_by_key(|(_, ended)| *ended);
            let excess = terminal_count - RETENTION_MAX_TERMINAL_BUILDS;
            for (build_id, _) in terminal_ids.into_iter().take(excess) {
                self.builds.remove(&build_id);
            }
        }
    }
}

#[cfg(unix)]
fn unlink_stale_ipc_socket(addr: &str) {
    if let Some(socket_path) = addr.strip_prefix("ipc://") {
        let path = std::path::Path::new(socket_path);
        if path.exists() {
            info!(path = socket_path, "removing stale IPC socket");
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = socket_path, error = %e, "failed to remove stale socket");
            }
        }
    }
}
