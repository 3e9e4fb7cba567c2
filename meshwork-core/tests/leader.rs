//! Leader control-plane tests over real control connectors

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use meshwork_core::connector::{Channel, Connector, Direction, Local};
use meshwork_core::dispatch::Policy;
use meshwork_core::leader::{http, Health, RunState};
use meshwork_core::message::{ControlToken, HEALTHY_REPLY, UNHEALTHY_REPLY};
use meshwork_core::worker::{control_alias, Ports, RelayWorker, Work, Worker};
use meshwork_core::{Leader, LeaderConfig, Response};
use serde_json::json;
use tower::ServiceExt;

/// Answers STATUS with "Unhealthy", otherwise behaves
struct SickWorker {
    work: Work,
}

#[async_trait]
impl Worker for SickWorker {
    fn name(&self) -> &str {
        self.work.name()
    }

    fn ports(&self) -> &Ports {
        self.work.ports()
    }

    async fn init(&self) -> meshwork_core::Result<()> {
        Ok(())
    }

    async fn run(self: Arc<Self>) -> meshwork_core::Result<()> {
        let control = self.work.control()?;
        while let Some(token) = control.next_command().await {
            match token {
                ControlToken::Status => {
                    control.reply(UNHEALTHY_REPLY).await;
                }
                ControlToken::Metrics => {
                    control.reply(json!({"errors": 3})).await;
                }
                ControlToken::Stop => break,
            }
        }
        Ok(())
    }
}

/// Never reads its control port
struct DeafWorker {
    work: Work,
}

#[async_trait]
impl Worker for DeafWorker {
    fn name(&self) -> &str {
        self.work.name()
    }

    fn ports(&self) -> &Ports {
        self.work.ports()
    }

    async fn init(&self) -> meshwork_core::Result<()> {
        Ok(())
    }

    async fn run(self: Arc<Self>) -> meshwork_core::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Answers its first STATUS too late, and unhealthy; healthy afterwards
struct SlowWorker {
    work: Work,
    answered: AtomicBool,
}

#[async_trait]
impl Worker for SlowWorker {
    fn name(&self) -> &str {
        self.work.name()
    }

    fn ports(&self) -> &Ports {
        self.work.ports()
    }

    async fn init(&self) -> meshwork_core::Result<()> {
        Ok(())
    }

    async fn run(self: Arc<Self>) -> meshwork_core::Result<()> {
        let control = self.work.control()?;
        while let Some(token) = control.next_command().await {
            match token {
                ControlToken::Status if !self.answered.swap(true, Ordering::SeqCst) => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    control.reply(UNHEALTHY_REPLY).await;
                }
                ControlToken::Status => {
                    control.reply(HEALTHY_REPLY).await;
                }
                ControlToken::Metrics => {
                    control.reply(json!({})).await;
                }
                ControlToken::Stop => break,
            }
        }
        Ok(())
    }
}

/// Takes STOP but never returns; `live` counts runs still in progress
struct StuckWorker {
    work: Work,
    live: Arc<AtomicUsize>,
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Worker for StuckWorker {
    fn name(&self) -> &str {
        self.work.name()
    }

    fn ports(&self) -> &Ports {
        self.work.ports()
    }

    async fn init(&self) -> meshwork_core::Result<()> {
        Ok(())
    }

    async fn run(self: Arc<Self>) -> meshwork_core::Result<()> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let _guard = LiveGuard(self.live.clone());
        let control = self.work.control()?;
        while let Some(token) = control.next_command().await {
            match token {
                ControlToken::Stop => std::future::pending::<()>().await,
                _ => {
                    control.reply(HEALTHY_REPLY).await;
                }
            }
        }
        Ok(())
    }
}

/// Fails its second initialization only
struct FlakyWorker {
    work: Work,
    inits: AtomicUsize,
}

#[async_trait]
impl Worker for FlakyWorker {
    fn name(&self) -> &str {
        self.work.name()
    }

    fn ports(&self) -> &Ports {
        self.work.ports()
    }

    async fn init(&self) -> meshwork_core::Result<()> {
        if self.inits.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(meshwork_core::MeshError::Internal {
                message: "scratch space unavailable".into(),
            });
        }
        Ok(())
    }

    async fn run(self: Arc<Self>) -> meshwork_core::Result<()> {
        let control = self.work.control()?;
        while let Some(token) = control.next_command().await {
            match token {
                ControlToken::Stop => break,
                _ => {
                    control.reply(HEALTHY_REPLY).await;
                }
            }
        }
        Ok(())
    }
}

/// Worker-side ports and leader-side control connector sharing one rendezvous queue
fn control_pair(name: &str) -> (Work, Arc<dyn Connector>) {
    let alias = control_alias(name);
    let channel = Channel::rendezvous();

    let mut ports = Ports::new();
    ports.insert(
        alias.clone(),
        Arc::new(Local::with_channel(alias.clone(), channel.clone(), Direction::Control)),
    );
    let work = Work::new(name, ports, alias.clone()).unwrap();
    let leader_side: Arc<dyn Connector> = Arc::new(Local::with_channel(alias, channel, Direction::Control));

    (work, leader_side)
}

enum Kind {
    Relay,
    Sick,
    Deaf,
    Slow,
    Stuck(Arc<AtomicUsize>),
    Flaky,
}

async fn start_leader(workers: &[(&str, Kind)], timeout: Duration) -> Arc<Leader> {
    let mut built: Vec<Arc<dyn Worker>> = Vec::new();
    let mut ports: BTreeMap<String, Arc<dyn Connector>> = BTreeMap::new();

    for (name, kind) in workers {
        let (work, leader_side) = control_pair(name);
        let work = work.with_control_timeout(timeout);
        let worker: Arc<dyn Worker> = match kind {
            Kind::Relay => Arc::new(RelayWorker::new(work, Policy::Copy)),
            Kind::Sick => Arc::new(SickWorker { work }),
            Kind::Deaf => Arc::new(DeafWorker { work }),
            Kind::Slow => Arc::new(SlowWorker {
                work,
                answered: AtomicBool::new(false),
            }),
            Kind::Stuck(live) => Arc::new(StuckWorker {
                work,
                live: live.clone(),
            }),
            Kind::Flaky => Arc::new(FlakyWorker {
                work,
                inits: AtomicUsize::new(0),
            }),
        };
        built.push(worker);
        ports.insert(name.to_string(), leader_side);
    }

    let config = LeaderConfig {
        node: "test-node".into(),
        control_timeout: timeout,
        ..Default::default()
    };
    let leader = Arc::new(Leader::new(config, built, ports).unwrap());
    leader.init().await.unwrap();
    leader.run();
    leader
}

fn state_of(leader: &Leader, name: &str) -> (RunState, Health) {
    let cache = leader.cache_snapshot();
    let entry = cache.get(name).unwrap();
    (entry.state, entry.health)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_healthy() {
    let leader = start_leader(&[("w1", Kind::Relay), ("w2", Kind::Relay)], Duration::from_secs(2)).await;

    assert_eq!(leader.status().await, Response::ok("Healthy"));
    assert_eq!(state_of(&leader, "w1"), (RunState::Running, Health::Healthy));
    assert_eq!(state_of(&leader, "w2"), (RunState::Running, Health::Healthy));
    assert_eq!(leader.cache_snapshot().get("w1").unwrap().status, "Healthy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_short_circuits_on_unhealthy() {
    // Links are visited in name order; the deaf worker would time out if reached
    let leader = start_leader(&[("a-sick", Kind::Sick), ("b-deaf", Kind::Deaf)], Duration::from_millis(200)).await;

    assert_eq!(leader.status().await, Response::ok("Unhealthy"));
    assert_eq!(state_of(&leader, "a-sick"), (RunState::Running, Health::Unhealthy));
    assert_eq!(state_of(&leader, "b-deaf"), (RunState::Running, Health::Unknown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_timeout_marks_unknown() {
    let leader = start_leader(&[("deaf", Kind::Deaf)], Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    assert_eq!(leader.status().await, Response::fail("Unknown"));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(state_of(&leader, "deaf"), (RunState::Unknown, Health::Unknown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_reports_unknown_for_silent_worker() {
    let leader = start_leader(&[("deaf", Kind::Deaf), ("sick", Kind::Sick)], Duration::from_millis(100)).await;

    let response = leader.metrics().await;
    assert!(response.success);
    assert_eq!(response.message["deaf"], json!("Unknown"));
    assert_eq!(response.message["sick"], json!({"errors": 3}));

    let cache = leader.cache_snapshot();
    assert_eq!(cache.get("sick").unwrap().metric, Some(json!({"errors": 3})));
    assert_eq!(cache.get("deaf").unwrap().metric, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_start_cycle() {
    let leader = start_leader(&[("w1", Kind::Relay)], Duration::from_secs(2)).await;

    // Running workers cannot be started again
    assert_eq!(leader.start().await, Response::fail("Workers already started."));

    assert_eq!(leader.stop().await, Response::ok("Workers stopped"));
    assert_eq!(state_of(&leader, "w1").0, RunState::Stopped);
    assert!(!leader.shutdown_signal().is_triggered());

    assert_eq!(leader.start().await, Response::ok("Workers started"));
    assert_eq!(state_of(&leader, "w1").0, RunState::Running);

    let metrics = leader.metrics().await;
    assert!(metrics.success);
    assert_eq!(metrics.message["w1"]["runs"], json!(2));
    assert_eq!(metrics.message["w1"]["phase"], json!("Running"));

    assert_eq!(leader.stop().await, Response::ok("Workers stopped"));
    // Everything already stopped: the leader itself stops
    assert_eq!(leader.stop().await, Response::ok("Leader stopped"));
    assert!(leader.shutdown_signal().is_triggered());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unstoppable_worker_blocks_start() {
    let leader = start_leader(&[("deaf", Kind::Deaf)], Duration::from_millis(100)).await;

    assert_eq!(leader.stop().await, Response::ok("Workers stopped"));
    assert_eq!(state_of(&leader, "deaf").0, RunState::Unknown);
    assert_eq!(leader.start().await, Response::fail("Workers already started."));
    assert!(!leader.shutdown_signal().is_triggered());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_reply_never_answers_next_request() {
    let leader = start_leader(&[("slow", Kind::Slow)], Duration::from_millis(100)).await;

    assert_eq!(leader.status().await, Response::fail("Unknown"));
    assert_eq!(state_of(&leader, "slow"), (RunState::Unknown, Health::Unknown));

    // The abandoned "Unhealthy" reply must not be read as the answer to any later STATUS
    let mut healthy = false;
    for _ in 0..20 {
        let response = leader.status().await;
        assert_ne!(response, Response::ok("Unhealthy"));
        if response == Response::ok("Healthy") {
            healthy = true;
            break;
        }
        assert_eq!(response, Response::fail("Unknown"));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(healthy);
    assert_eq!(state_of(&leader, "slow"), (RunState::Running, Health::Healthy));

    let metrics = leader.metrics().await;
    assert_eq!(metrics.message["slow"], json!({}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_aborts_worker_stuck_after_stop() {
    let live = Arc::new(AtomicUsize::new(0));
    let leader = start_leader(&[("stuck", Kind::Stuck(live.clone()))], Duration::from_millis(100)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(live.load(Ordering::SeqCst), 1);

    assert_eq!(leader.stop().await, Response::ok("Workers stopped"));
    assert_eq!(state_of(&leader, "stuck").0, RunState::Stopped);

    assert_eq!(leader.start().await, Response::ok("Workers started"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    // The previous run was aborted before the new one was spawned
    assert_eq!(live.load(Ordering::SeqCst), 1);
    assert_eq!(leader.status().await, Response::ok("Healthy"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_reports_worker_that_failed_to_initialize() {
    let leader = start_leader(&[("flaky", Kind::Flaky), ("w1", Kind::Relay)], Duration::from_secs(2)).await;
    assert_eq!(leader.stop().await, Response::ok("Workers stopped"));

    assert_eq!(
        leader.start().await,
        Response::fail("Unable to start workers: flaky")
    );
    assert_eq!(state_of(&leader, "flaky").0, RunState::Stopped);
    assert_eq!(state_of(&leader, "w1").0, RunState::Running);

    // Stopping the rest makes every worker Stopped again, so the failed one can be retried
    assert_eq!(leader.stop().await, Response::ok("Workers stopped"));
    assert_eq!(leader.start().await, Response::ok("Workers started"));
    assert_eq!(state_of(&leader, "flaky").0, RunState::Running);
    assert_eq!(leader.status().await, Response::ok("Healthy"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cache_timestamps_never_regress() {
    let leader = start_leader(&[("w1", Kind::Relay)], Duration::from_secs(2)).await;

    let before = leader.cache_snapshot().get("w1").unwrap().timestamp;
    leader.status().await;
    let after = leader.cache_snapshot().get("w1").unwrap().timestamp;
    assert!(after >= before);

    let response = leader.cache();
    assert!(response.success);
    assert_eq!(response.message["workers"]["w1"]["state"], json!("Running"));
}

#[tokio::test]
async fn test_topology_served_from_file() {
    let leader = Leader::new(LeaderConfig::default(), Vec::new(), BTreeMap::new()).unwrap();
    assert_eq!(leader.topology().await, Response::fail("Unable to load config file."));

    let path = std::env::temp_dir().join(format!("meshwork-topology-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"gui_port": 9090, "nodes": []}"#).unwrap();

    let config = LeaderConfig {
        config_path: Some(path.clone()),
        ..Default::default()
    };
    let leader = Leader::new(config, Vec::new(), BTreeMap::new()).unwrap();
    let response = leader.topology().await;
    std::fs::remove_file(&path).unwrap();

    assert_eq!(response, Response::ok(json!({"gui_port": 9090, "nodes": []})));
}

async fn call(leader: &Arc<Leader>, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let response = http::router(leader.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_surface() {
    let leader = start_leader(&[("w1", Kind::Relay)], Duration::from_secs(2)).await;

    let (code, body) = call(&leader, "GET", "/status").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "message": "Healthy"}));

    let (_, body) = call(&leader, "POST", "/cache").await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"]["workers"]["w1"]["health"], json!("Healthy"));

    let (_, body) = call(&leader, "GET", "/config").await;
    assert_eq!(body, json!({"success": false, "message": "Unable to load config file."}));

    let (_, body) = call(&leader, "POST", "/stop").await;
    assert_eq!(body, json!({"success": true, "message": "Workers stopped"}));
    let (_, body) = call(&leader, "GET", "/stop").await;
    assert_eq!(body, json!({"success": true, "message": "Leader stopped"}));

    tokio::time::timeout(Duration::from_secs(1), leader.shutdown_signal().wait())
        .await
        .expect("shutdown signal not fired");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serve_exits_on_leader_stop() {
    let leader = start_leader(&[("w1", Kind::Relay)], Duration::from_secs(2)).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = tokio::spawn(http::serve(leader.clone(), listener));

    leader.stop().await;
    leader.stop().await;

    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
}
