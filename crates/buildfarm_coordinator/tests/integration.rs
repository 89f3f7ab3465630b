//! Integration tests for the build farm coordinator.
//!
//! Each test binds a real `Coordinator` on IPC sockets in a temp directory,
//! drives its Request API with a REQ client, and simulates workers with raw
//! DEALER sockets over the control protocol. No mocks: these exercise the
//! same wire format and event loop the binary runs.

use buildfarm_coordinator::{Coordinator, RequestApi, RequestApiResponse};
use buildfarm_protocol::config::CoordinatorConfig;
use buildfarm_protocol::{
    BuildId, BuildMetrics, BuildResult, BuildState, Header, HeartbeatPayload, Message, OpCode,
    RegisterPayload, UnregisterPayload, WorkerId,
};
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

struct TestCoordinator {
    _dir: TempDir,
    stop_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    request_addr: String,
    control_addr: String,
}

impl TestCoordinator {
    fn spawn(configure: impl FnOnce(&mut CoordinatorConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = CoordinatorConfig {
            request_addr: format!("ipc://{}", dir.path().join("request.sock").display()),
            control_addr: format!("ipc://{}", dir.path().join("control.sock").display()),
            queue_capacity: 16,
            per_build_timeout: Duration::from_secs(300),
            dispatch_timeout: Duration::from_secs(300),
            max_attempts: 3,
            liveness_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(10),
            data_dir: dir.path().to_path_buf(),
            monitor_event_addr: None,
        };
        configure(&mut config);

        let request_addr = config.request_addr.clone();
        let control_addr = config.control_addr.clone();

        let mut coordinator = Coordinator::bind(config).expect("coordinator bind");
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            coordinator
                .run_with_shutdown(stop_rx)
                .expect("coordinator run");
        });

        Self {
            _dir: dir,
            stop_tx,
            handle: Some(handle),
            request_addr,
            control_addr,
        }
    }

    fn client(&self) -> RequestClient {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::REQ).expect("req socket");
        socket.set_rcvtimeo(5_000).expect("rcvtimeo");
        socket.set_sndtimeo(5_000).expect("sndtimeo");
        socket.connect(&self.request_addr).expect("connect request");
        RequestClient { _ctx: ctx, socket }
    }

    fn worker(&self, id: WorkerId) -> FakeWorker {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::DEALER).expect("dealer socket");
        socket
            .set_identity(id.as_str().as_bytes())
            .expect("set identity");
        socket.set_rcvtimeo(2_000).expect("rcvtimeo");
        socket.connect(&self.control_addr).expect("connect control");
        FakeWorker { _ctx: ctx, socket, id }
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct RequestClient {
    _ctx: zmq::Context,
    socket: zmq::Socket,
}

impl RequestClient {
    fn send(&self, req: &RequestApi) -> RequestApiResponse {
        let body = serde_json::to_vec(req).expect("serialize request");
        self.socket.send(&body, 0).expect("send request");
        let reply = self.socket.recv_bytes(0).expect("recv reply");
        serde_json::from_slice(&reply).expect("deserialize reply")
    }
}

struct FakeWorker {
    _ctx: zmq::Context,
    socket: zmq::Socket,
    id: WorkerId,
}

impl FakeWorker {
    fn send_raw(&self, opcode: OpCode, build_id: BuildId, payload: &[u8]) {
        let header = Header::new(opcode, build_id, payload.len() as u32);
        self.socket
            .send(&header.pack().expect("pack header")[..], zmq::SNDMORE)
            .expect("send header");
        self.socket.send(payload, 0).expect("send payload");
    }

    fn register(&self, max_concurrent_builds: usize) {
        let payload = RegisterPayload {
            worker_id: self.id.clone(),
            advertise_address: "test://fake".to_string(),
            capabilities: Vec::new(),
            max_concurrent_builds,
        };
        let body = serde_json::to_vec(&payload).expect("serialize register");
        self.send_raw(OpCode::Register, BuildId::new(0), &body);
        // Block for the coordinator's ack so dispatch can't race registration.
        let frames = self.socket.recv_multipart(0).expect("recv register ack");
        Message::unpack(&frames).expect("unpack register ack");
    }

    fn unregister(&self) {
        let payload = UnregisterPayload {
            worker_id: self.id.clone(),
        };
        let body = serde_json::to_vec(&payload).expect("serialize unregister");
        self.send_raw(OpCode::Unregister, BuildId::new(0), &body);
    }

    fn heartbeat(&self, active_build_ids: Vec<BuildId>) {
        let payload = HeartbeatPayload {
            active_build_count: active_build_ids.len(),
            active_build_ids,
            cpu_percent: None,
            memory_bytes: None,
        };
        let body = serde_json::to_vec(&payload).expect("serialize heartbeat");
        self.send_raw(OpCode::Heartbeat, BuildId::new(0), &body);
    }

    /// Waits for a dispatched build, returning its id.
    fn recv_dispatch(&self) -> BuildId {
        let frames = self.socket.recv_multipart(0).expect("recv dispatch");
        let msg = Message::unpack(&frames).expect("unpack dispatch");
        assert_eq!(msg.header.opcode, OpCode::Dispatch);
        msg.header.build_id
    }

    fn complete(&self, build_id: BuildId, success: bool) {
        let result = BuildResult {
            success,
            duration_ms: 42,
            artifacts: Vec::new(),
            error_message: if success { None } else { Some("boom".to_string()) },
            metrics: BuildMetrics::default(),
        };
        let body = serde_json::to_vec(&result).expect("serialize result");
        self.send_raw(OpCode::Complete, build_id, &body);
    }
}

fn submit(client: &RequestClient, task_name: &str) -> RequestApiResponse {
    client.send(&RequestApi::Submit {
        project_path: "/repo".to_string(),
        task_name: task_name.to_string(),
        options: HashMap::new(),
        cache_enabled: false,
    })
}

fn poll_status(
    client: &RequestClient,
    build_id: BuildId,
    timeout: Duration,
    mut predicate: impl FnMut(&BuildState) -> bool,
) -> BuildState {
    let deadline = Instant::now() + timeout;
    loop {
        if let RequestApiResponse::Status(Some(info)) =
            client.send(&RequestApi::GetStatus { build_id })
        {
            if predicate(&info.state) {
                return info.state;
            }
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for build {} to reach expected state", build_id);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

// ----------------------------------------------------------------------
// S1: happy path - submit, dispatch, complete, status reflects success
// ----------------------------------------------------------------------

#[test]
fn happy_path_dispatch_and_complete() {
    let coordinator = TestCoordinator::spawn(|_| {});
    let client = coordinator.client();
    let worker = coordinator.worker(WorkerId::new());
    worker.register(1);

    let submitted = submit(&client, "build");
    let build_id = match submitted {
        RequestApiResponse::Submitted { build_id } => build_id,
        other => panic!("unexpected response: {:?}", other),
    };

    let dispatched_id = worker.recv_dispatch();
    assert_eq!(dispatched_id, build_id);

    worker.complete(build_id, true);

    let state = poll_status(&client, build_id, Duration::from_secs(5), |s| s.is_terminal());
    assert_eq!(state, BuildState::Succeeded);

    let workers = match client.send(&RequestApi::ListWorkers) {
        RequestApiResponse::Workers(workers) => workers,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].builds_completed, 1);
}

// ----------------------------------------------------------------------
// S3: queue full boundary
// ----------------------------------------------------------------------

#[test]
fn queue_full_rejects_once_capacity_reached() {
    let coordinator = TestCoordinator::spawn(|cfg| cfg.queue_capacity = 2);
    let client = coordinator.client();

    // No worker registered, so both accepted builds simply sit queued.
    for _ in 0..2 {
        match submit(&client, "build") {
            RequestApiResponse::Submitted { .. } => {}
            other => panic!("expected submission to be accepted, got {:?}", other),
        }
    }

    match submit(&client, "build") {
        RequestApiResponse::Error { code, .. } => assert_eq!(code, "queue_full"),
        other => panic!("expected queue_full, got {:?}", other),
    }
}

// ----------------------------------------------------------------------
// S4: worker loss triggers requeue and redispatch to a surviving worker
// ----------------------------------------------------------------------

#[test]
fn worker_loss_requeues_and_redispatches() {
    let coordinator = TestCoordinator::spawn(|cfg| {
        cfg.liveness_timeout = Duration::from_millis(50);
    });
    let client = coordinator.client();

    let lost_worker = coordinator.worker(WorkerId::new());
    lost_worker.register(1);

    let survivor = coordinator.worker(WorkerId::new());
    survivor.register(1);

    let submitted = submit(&client, "build");
    let build_id = match submitted {
        RequestApiResponse::Submitted { build_id } => build_id,
        other => panic!("unexpected response: {:?}", other),
    };

    // One of the two workers gets the dispatch; whichever it is, stop
    // heartbeating it so the coordinator's liveness sweep marks it lost.
    let dispatched_to_lost = {
        // Race: try both with short timeouts, exactly one will receive it.
        match lost_worker.socket.recv_multipart(0) {
            Ok(frames) => {
                let msg = Message::unpack(&frames).expect("unpack dispatch");
                assert_eq!(msg.header.build_id, build_id);
                true
            }
            Err(_) => {
                let dispatched_id = survivor.recv_dispatch();
                assert_eq!(dispatched_id, build_id);
                false
            }
        }
    };

    // Stop heartbeating the worker that got the build so it goes stale;
    // the other worker keeps heartbeating so it remains eligible. The
    // coordinator's stale-worker sweep only runs on a fixed ~10s cadence
    // measured from bind, so keep the survivor alive past that mark.
    let (dead, alive) = if dispatched_to_lost {
        (&lost_worker, &survivor)
    } else {
        (&survivor, &lost_worker)
    };
    drop(dead);

    let deadline = Instant::now() + Duration::from_secs(12);
    while Instant::now() < deadline {
        alive.heartbeat(Vec::new());
        thread::sleep(Duration::from_millis(200));
    }

    let redispatched_id = alive.recv_dispatch();
    assert_eq!(redispatched_id, build_id);
    alive.complete(build_id, true);

    let state = poll_status(&client, build_id, Duration::from_secs(5), |s| s.is_terminal());
    assert_eq!(state, BuildState::Succeeded);

    let workers = match client.send(&RequestApi::ListWorkers) {
        RequestApiResponse::Workers(workers) => workers,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(workers.len(), 1, "lost worker should have been removed from the pool");
}

// ----------------------------------------------------------------------
// Idempotent duplicate completion
// ----------------------------------------------------------------------

#[test]
fn duplicate_completion_is_discarded() {
    let coordinator = TestCoordinator::spawn(|_| {});
    let client = coordinator.client();
    let worker = coordinator.worker(WorkerId::new());
    worker.register(1);

    let build_id = match submit(&client, "build") {
        RequestApiResponse::Submitted { build_id } => build_id,
        other => panic!("unexpected response: {:?}", other),
    };
    worker.recv_dispatch();

    worker.complete(build_id, true);
    poll_status(&client, build_id, Duration::from_secs(5), |s| s.is_terminal());

    // A second, contradictory completion must not override the first.
    worker.complete(build_id, false);
    thread::sleep(Duration::from_millis(200));

    match client.send(&RequestApi::GetStatus { build_id }) {
        RequestApiResponse::Status(Some(info)) => {
            assert_eq!(info.state, BuildState::Succeeded);
            assert!(info.result.expect("result present").success);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

// ----------------------------------------------------------------------
// Unknown build id
// ----------------------------------------------------------------------

#[test]
fn get_status_for_unknown_build_returns_none() {
    let coordinator = TestCoordinator::spawn(|_| {});
    let client = coordinator.client();

    match client.send(&RequestApi::GetStatus { build_id: BuildId::new(999) }) {
        RequestApiResponse::Status(None) => {}
        other => panic!("expected no record for unknown build, got {:?}", other),
    }
}

// ----------------------------------------------------------------------
// Dispatch timeout fails a build with no eligible worker
// ----------------------------------------------------------------------

#[test]
fn queued_build_fails_as_worker_unavailable_after_dispatch_timeout() {
    let coordinator = TestCoordinator::spawn(|cfg| {
        cfg.dispatch_timeout = Duration::from_millis(50);
    });
    let client = coordinator.client();

    let build_id = match submit(&client, "build") {
        RequestApiResponse::Submitted { build_id } => build_id,
        other => panic!("unexpected response: {:?}", other),
    };

    let state = poll_status(&client, build_id, Duration::from_secs(5), |s| s.is_terminal());
    assert_eq!(state, BuildState::Failed);

    match client.send(&RequestApi::GetStatus { build_id }) {
        RequestApiResponse::Status(Some(info)) => {
            let message = info.result.expect("result present").error_message.unwrap_or_default();
            assert!(message.contains("worker_unavailable"), "message was: {}", message);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

// ----------------------------------------------------------------------
// A draining worker is excluded from dispatch
// ----------------------------------------------------------------------

#[test]
fn draining_worker_is_not_dispatched_to() {
    let coordinator = TestCoordinator::spawn(|_| {});
    let client = coordinator.client();
    let worker = coordinator.worker(WorkerId::new());
    worker.register(1);
    worker.unregister();

    // Give the coordinator a moment to process the unregister before submitting.
    thread::sleep(Duration::from_millis(100));

    let build_id = match submit(&client, "build") {
        RequestApiResponse::Submitted { build_id } => build_id,
        other => panic!("unexpected response: {:?}", other),
    };

    // The draining worker must never receive it; confirm the build is still
    // queued after waiting well past a normal dispatch cycle.
    thread::sleep(Duration::from_millis(500));
    match client.send(&RequestApi::GetStatus { build_id }) {
        RequestApiResponse::Status(Some(info)) => assert_eq!(info.state, BuildState::Queued),
        other => panic!("unexpected response: {:?}", other),
    }
}
