//! Worker - build execution agent for the build farm.
//!
//! Connects to the coordinator over a ZMQ DEALER socket, registers its
//! capabilities, and drains dispatched builds onto a bounded pool of
//! execution threads. A dedicated thread owns the DEALER socket; execution
//! threads report results back over an `mpsc` channel rather than touching
//! the socket directly.

use crate::cancel::CancellationToken;
use crate::metrics::METRICS;
use base64::Engine;
use buildfarm_cache::control::{CacheArtifact, CacheRequest, CacheResponse};
use buildfarm_protocol::{
    config::WorkerConfig, BuildId, BuildMetrics, BuildResult, CancelCommand, DispatchCommand,
    ErrorPayload, HeartbeatPayload, Header, Message as WireMessage, OpCode, RegisterPayload,
    UnregisterPayload, WorkerLifecycle,
};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const REGISTER_BACKOFF_BASE_MS: u64 = 50;
const REGISTER_BACKOFF_MAX_MS: u64 = 1_000;
const REGISTER_BACKOFF_JITTER_MS: u64 = 50;
const RECV_TIMEOUT_MS: i32 = 100;
const MAX_CAPTURED_OUTPUT_BYTES: usize = 1 << 20;
const CHILD_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] buildfarm_protocol::error::ProtocolError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("registration with coordinator at {addr} never succeeded")]
    RegistrationFailed { addr: String },
}

type Result<T> = std::result::Result<T, WorkerError>;

/// Handle used by an external caller (e.g. a signal handler) to request the
/// worker begin draining and eventually stop.
#[derive(Clone)]
pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Message sent from an execution thread back to the socket-owning thread.
enum ExecutionEvent {
    Completed {
        build_id: BuildId,
        result: BuildResult,
    },
}

pub struct Worker {
    config: WorkerConfig,
    context: zmq::Context,
    active_builds: Arc<Mutex<HashMap<BuildId, CancellationToken>>>,
    shutdown: Arc<AtomicBool>,
    lifecycle: Mutex<WorkerLifecycle>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            context: zmq::Context::new(),
            active_builds: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(WorkerLifecycle::Starting),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    fn set_lifecycle(&self, state: WorkerLifecycle) {
        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
        if *lifecycle != state {
            debug!(worker_id = %self.config.id, from = %*lifecycle, to = %state, "worker lifecycle transition");
            *lifecycle = state;
        }
    }

    fn lifecycle(&self) -> WorkerLifecycle {
        *self.lifecycle.lock().expect("lifecycle lock poisoned")
    }

    /// Reconciles the Active/Busy split against current load, mirroring the
    /// coordinator's own worker-status toggle. Only called outside the
    /// Draining/Stopped states.
    fn refresh_busy_state(&self) {
        if matches!(self.lifecycle(), WorkerLifecycle::Draining | WorkerLifecycle::Stopped) {
            return;
        }
        let active_count = self.active_builds.lock().expect("active_builds lock poisoned").len();
        if active_count >= self.config.max_concurrent_builds {
            self.set_lifecycle(WorkerLifecycle::Busy);
        } else {
            self.set_lifecycle(WorkerLifecycle::Active);
        }
    }

    /// Connect to the coordinator, register with capped exponential backoff,
    /// then run the event loop until shutdown is requested. Never enters the
    /// active loop before registration succeeds.
    pub fn run(self) -> Result<()> {
        let socket = self.context.socket(zmq::DEALER)?;
        socket.set_identity(self.config.id.as_str().as_bytes())?;
        socket.connect(&self.config.coordinator_address)?;
        socket.set_rcvtimeo(RECV_TIMEOUT_MS)?;

        info!(
            worker_id = %self.config.id,
            coordinator = %self.config.coordinator_address,
            "worker starting, registering"
        );

        self.set_lifecycle(WorkerLifecycle::Registering);
        self.register(&socket)?;
        self.set_lifecycle(WorkerLifecycle::Active);

        info!(worker_id = %self.config.id, "registered, entering active state");

        let (tx, rx) = mpsc::channel::<ExecutionEvent>();
        let mut last_heartbeat = Instant::now();
        let mut draining = false;

        loop {
            if !draining && self.shutdown.load(Ordering::Relaxed) {
                // Tell the coordinator to stop dispatching to us before we
                // stop reading the socket, so in-flight builds dispatched
                // during the drain window are still received and rejected
                // explicitly rather than left to time out unanswered.
                self.send_unregister(&socket)?;
                draining = true;
                self.set_lifecycle(WorkerLifecycle::Draining);
                info!(worker_id = %self.config.id, "draining in-flight builds");
            }

            if let Some(frames) = self.try_recv(&socket)? {
                self.handle_frames(&socket, frames, &tx, draining)?;
            }

            while let Ok(event) = rx.try_recv() {
                self.handle_execution_event(&socket, event)?;
            }

            if draining
                && self
                    .active_builds
                    .lock()
                    .expect("active_builds lock poisoned")
                    .is_empty()
            {
                break;
            }

            if !draining && last_heartbeat.elapsed() >= self.config.heartbeat_interval {
                self.send_heartbeat(&socket)?;
                last_heartbeat = Instant::now();
            }
        }

        self.set_lifecycle(WorkerLifecycle::Stopped);
        info!(worker_id = %self.config.id, "worker stopped");
        Ok(())
    }

    fn register(&self, socket: &zmq::Socket) -> Result<()> {
        let payload = RegisterPayload {
            worker_id: self.config.id.clone(),
            advertise_address: self.config.advertise_address.clone(),
            capabilities: self.config.capabilities.clone(),
            max_concurrent_builds: self.config.max_concurrent_builds,
        };
        let body = serde_json::to_vec(&payload)?;

        let mut backoff_ms = 0u64;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(WorkerError::RegistrationFailed {
                    addr: self.config.coordinator_address.clone(),
                });
            }

            self.send(socket, OpCode::Register, BuildId::new(0), &body)?;

            if let Some(frames) = self.try_recv(socket)? {
                match WireMessage::unpack(&frames) {
                    Ok(msg) if msg.header.opcode == OpCode::Register => return Ok(()),
                    Ok(_) => warn!("coordinator rejected registration, retrying"),
                    Err(e) => warn!(error = %e, "malformed registration reply, retrying"),
                }
            }

            backoff_ms = if backoff_ms == 0 {
                REGISTER_BACKOFF_BASE_MS
            } else {
                (backoff_ms * 2).min(REGISTER_BACKOFF_MAX_MS)
            };
            let jitter_ms = rand::random::<u64>() % REGISTER_BACKOFF_JITTER_MS;
            std::thread::sleep(Duration::from_millis(backoff_ms + jitter_ms));
        }
    }

    fn try_recv(&self, socket: &zmq::Socket) -> Result<Option<Vec<Vec<u8>>>> {
        match socket.recv_multipart(0) {
            Ok(frames) => Ok(Some(frames)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(WorkerError::Zmq(e)),
        }
    }

    fn handle_frames(
        &self,
        socket: &zmq::Socket,
        frames: Vec<Vec<u8>>,
        tx: &mpsc::Sender<ExecutionEvent>,
        draining: bool,
    ) -> Result<()> {
        let msg = match WireMessage::unpack(&frames) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame from coordinator");
                return Ok(());
            }
        };

        match msg.header.opcode {
            OpCode::Dispatch => self.handle_dispatch(socket, &msg.payload, tx.clone(), draining),
            OpCode::Cancel => self.handle_cancel(&msg.payload),
            _ => {
                debug!(opcode = ?msg.header.opcode, "ignoring unexpected opcode");
                Ok(())
            }
        }
    }

    fn handle_dispatch(
        &self,
        socket: &zmq::Socket,
        payload: &[u8],
        tx: mpsc::Sender<ExecutionEvent>,
        draining: bool,
    ) -> Result<()> {
        let command: DispatchCommand = match serde_json::from_slice(payload) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "dropping malformed dispatch command");
                return Ok(());
            }
        };

        if draining {
            let err = ErrorPayload {
                code: "draining".to_string(),
                message: "worker is draining and refuses new dispatches".to_string(),
            };
            let body = serde_json::to_vec(&err)?;
            self.send(socket, OpCode::Err, command.build_id, &body)?;
            return Ok(());
        }

        let active_count = self.active_builds.lock().expect("active_builds lock poisoned").len();
        if active_count >= self.config.max_concurrent_builds {
            let err = ErrorPayload {
                code: "queue_full".to_string(),
                message: format!("worker at capacity ({} active)", active_count),
            };
            let body = serde_json::to_vec(&err)?;
            self.send(socket, OpCode::Err, command.build_id, &body)?;
            return Ok(());
        }

        let token = CancellationToken::new();
        self.active_builds
            .lock()
            .expect("active_builds lock poisoned")
            .insert(command.build_id, token.clone());
        self.refresh_busy_state();

        METRICS.inc_builds_dispatched();

        let build_root = self.config.build_root.join(command.build_id.to_string());
        let cache_address = self.config.cache_address.clone();
        let context = self.context.clone();

        std::thread::spawn(move || {
            let result =
                execute_build(&context, &build_root, cache_address.as_deref(), &command, &token);
            let _ = tx.send(ExecutionEvent::Completed {
                build_id: command.build_id,
                result,
            });
        });

        Ok(())
    }

    fn handle_cancel(&self, payload: &[u8]) -> Result<()> {
        let command: CancelCommand = match serde_json::from_slice(payload) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "dropping malformed cancel command");
                return Ok(());
            }
        };

        if let Some(token) = self
            .active_builds
            .lock()
            .expect("active_builds lock poisoned")
            .get(&command.build_id)
        {
            token.cancel();
        }
        Ok(())
    }

    fn handle_execution_event(&self, socket: &zmq::Socket, event: ExecutionEvent) -> Result<()> {
        let ExecutionEvent::Completed { build_id, result } = event;
        self.active_builds
            .lock()
            .expect("active_builds lock poisoned")
            .remove(&build_id);
        self.refresh_busy_state();

        if result.success {
            METRICS.inc_builds_succeeded();
        } else if result.error_message.as_deref() == Some("cancelled") {
            METRICS.inc_builds_cancelled();
        } else {
            METRICS.inc_builds_failed();
        }

        let body = serde_json::to_vec(&result)?;
        self.send(socket, OpCode::Complete, build_id, &body)
    }

    fn send_heartbeat(&self, socket: &zmq::Socket) -> Result<()> {
        let active = self.active_builds.lock().expect("active_builds lock poisoned");
        let payload = HeartbeatPayload {
            active_build_count: active.len(),
            active_build_ids: active.keys().copied().collect(),
            cpu_percent: None,
            memory_bytes: None,
        };
        drop(active);

        let body = serde_json::to_vec(&payload)?;
        self.send(socket, OpCode::Heartbeat, BuildId::new(0), &body)
    }

    fn send_unregister(&self, socket: &zmq::Socket) -> Result<()> {
        let payload = UnregisterPayload {
            worker_id: self.config.id.clone(),
        };
        let body = serde_json::to_vec(&payload)?;
        self.send(socket, OpCode::Unregister, BuildId::new(0), &body)
    }

    fn send(&self, socket: &zmq::Socket, opcode: OpCode, build_id: BuildId, payload: &[u8]) -> Result<()> {
        let header = Header::new(opcode, build_id, payload.len() as u32);
        let header_bytes = header.pack()?;
        socket.send(&header_bytes[..], zmq::SNDMORE)?;
        socket.send(payload, 0)?;
        Ok(())
    }
}

/// Run a single dispatched build to completion, on its own thread.
fn execute_build(
    context: &zmq::Context,
    build_root: &Path,
    cache_address: Option<&str>,
    command: &DispatchCommand,
    token: &CancellationToken,
) -> BuildResult {
    let started = Instant::now();

    if let Err(e) = std::fs::create_dir_all(build_root) {
        return BuildResult {
            success: false,
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: Vec::new(),
            error_message: Some(format!("workspace-setup: {}", e)),
            metrics: BuildMetrics::default(),
        };
    }

    let fingerprint = if command.cache_enabled {
        let options: std::collections::BTreeMap<String, String> =
            command.options.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Some(buildfarm_protocol::fingerprint_build(
            &command.project_path,
            &command.task_name,
            &options,
            command.advisory_hint.as_deref().unwrap_or(""),
        ))
    } else {
        None
    };

    if let (Some(fp), Some(addr)) = (fingerprint.as_deref(), cache_address) {
        if let Some(artifacts) = query_cache(context, addr, fp) {
            METRICS.inc_cache_hits();
            let _ = std::fs::remove_dir_all(build_root);
            let mut metrics = BuildMetrics::default();
            metrics.cache_hit = true;
            return BuildResult {
                success: true,
                duration_ms: started.elapsed().as_millis() as u64,
                artifacts: artifacts.into_iter().map(|a| a.relative_path).collect(),
                error_message: None,
                metrics,
            };
        }
        METRICS.inc_cache_misses();
    }

    let output = match run_build_tool(build_root, command, token) {
        Ok(output) => output,
        Err(e) => {
            let _ = std::fs::remove_dir_all(build_root);
            return BuildResult {
                success: false,
                duration_ms: started.elapsed().as_millis() as u64,
                artifacts: Vec::new(),
                error_message: Some(e),
                metrics: BuildMetrics::default(),
            };
        }
    };

    if token.is_cancelled() {
        let _ = std::fs::remove_dir_all(build_root);
        return BuildResult {
            success: false,
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: Vec::new(),
            error_message: Some("cancelled".to_string()),
            metrics: BuildMetrics::default(),
        };
    }

    if !output.success {
        let _ = std::fs::remove_dir_all(build_root);
        return BuildResult {
            success: false,
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: Vec::new(),
            error_message: Some(output.captured),
            metrics: BuildMetrics::default(),
        };
    }

    let artifacts = collect_artifacts(build_root);

    if let (Some(fp), Some(addr)) = (fingerprint.as_deref(), cache_address) {
        publish_to_cache(context, addr, fp, build_root, &artifacts);
    }

    let _ = std::fs::remove_dir_all(build_root);

    BuildResult {
        success: true,
        duration_ms: started.elapsed().as_millis() as u64,
        artifacts,
        error_message: None,
        metrics: BuildMetrics::default(),
    }
}

struct ToolOutput {
    success: bool,
    captured: String,
}

/// Invoke the external build tool, polling for completion so the
/// cancellation token can kill the child between polls.
fn run_build_tool(
    build_root: &Path,
    command: &DispatchCommand,
    token: &CancellationToken,
) -> std::result::Result<ToolOutput, String> {
    let mut cmd = Command::new(&command.task_name);
    cmd.current_dir(build_root);
    cmd.arg(&command.project_path);
    for (key, value) in &command.options {
        cmd.arg(format!("--{}={}", key, value));
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| format!("workspace-setup: {}", e))?;

    loop {
        if token.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(ToolOutput {
                success: false,
                captured: "cancelled".to_string(),
            });
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let mut captured = Vec::new();
                if let Some(mut stdout) = child.stdout.take() {
                    use std::io::Read;
                    let _ = stdout.read_to_end(&mut captured);
                }
                if let Some(mut stderr) = child.stderr.take() {
                    use std::io::Read;
                    let _ = stderr.read_to_end(&mut captured);
                }
                captured.truncate(MAX_CAPTURED_OUTPUT_BYTES);
                return Ok(ToolOutput {
                    success: status.success(),
                    captured: String::from_utf8_lossy(&captured).into_owned(),
                });
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS)),
            Err(e) => return Err(format!("workspace-setup: {}", e)),
        }
    }
}

fn collect_artifacts(build_root: &Path) -> Vec<String> {
    walkdir::WalkDir::new(build_root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(build_root)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect()
}

fn query_cache(
    context: &zmq::Context,
    addr: &str,
    fingerprint: &str,
) -> Option<Vec<buildfarm_cache::Artifact>> {
    let socket = context.socket(zmq::REQ).ok()?;
    socket.set_rcvtimeo(2_000).ok()?;
    socket.set_sndtimeo(2_000).ok()?;
    socket.connect(addr).ok()?;

    let request = CacheRequest::Get {
        fingerprint: fingerprint.to_string(),
    };
    let body = serde_json::to_vec(&request).ok()?;
    socket.send(&body, 0).ok()?;
    let reply = socket.recv_bytes(0).ok()?;
    let response: CacheResponse = serde_json::from_slice(&reply).ok()?;

    match response {
        CacheResponse::Entry(Some(entry)) => {
            let artifacts = entry
                .artifacts
                .into_iter()
                .filter_map(|a| {
                    let contents = base64::engine::general_purpose::STANDARD
                        .decode(&a.contents_base64)
                        .ok()?;
                    Some(buildfarm_cache::Artifact {
                        relative_path: a.relative_path,
                        contents,
                    })
                })
                .collect();
            Some(artifacts)
        }
        _ => None,
    }
}

/// Fire-and-forget publish; any failure is logged and otherwise ignored, per
/// the worker's failure semantics for cache writes.
fn publish_to_cache(
    context: &zmq::Context,
    addr: &str,
    fingerprint: &str,
    build_root: &Path,
    artifacts: &[String],
) {
    let result = (|| -> std::result::Result<(), String> {
        let socket = context.socket(zmq::REQ).map_err(|e| e.to_string())?;
        socket.set_rcvtimeo(2_000).map_err(|e| e.to_string())?;
        socket.set_sndtimeo(2_000).map_err(|e| e.to_string())?;
        socket.connect(addr).map_err(|e| e.to_string())?;

        let wire_artifacts: Vec<CacheArtifact> = artifacts
            .iter()
            .filter_map(|relative_path| {
                let contents = std::fs::read(build_root.join(relative_path)).ok()?;
                Some(CacheArtifact {
                    relative_path: relative_path.clone(),
                    contents_base64: base64::engine::general_purpose::STANDARD.encode(contents),
                })
            })
            .collect();

        let request = CacheRequest::Put {
            fingerprint: fingerprint.to_string(),
            artifacts: wire_artifacts,
            ttl_secs: None,
        };
        let body = serde_json::to_vec(&request).map_err(|e| e.to_string())?;
        socket.send(&body, 0).map_err(|e| e.to_string())?;
        let _ = socket.recv_bytes(0);
        Ok(())
    })();

    if let Err(e) = result {
        warn!(error = %e, fingerprint, "cache publish failed, continuing");
    }
}
