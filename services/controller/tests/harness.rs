//! Test harness for controller integration tests.
//!
//! Provides a scripted attach agent on a loopback listener, attach clients
//! pointed at it, and a full controller served over real TCP.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shoal_controller::api;
use shoal_controller::config::JobDefaults;
use shoal_controller::attach::protocol::{read_frame, status};
use shoal_controller::attach::{AttachClient, AttachConfig, AttachRequest};
use shoal_controller::cluster::{HostRuntime, InMemoryCluster, JobConfig, Scheduler};
use shoal_controller::registry::StaticRegistry;
use shoal_controller::scheduler::{FormationReconciler, JobLauncher};
use shoal_controller::state::AppState;
use shoal_id::HostId;
use shoal_reconcile::{FirstHost, RoundRobin};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const ATTACH_SERVICE: &str = "shoal-host-attach";

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn host(name: &str) -> HostId {
    HostId::new(name).unwrap()
}

/// What the fake agent saw.
#[derive(Debug)]
pub struct AgentRecord {
    pub request: AttachRequest,
    /// Bytes the script read from the controller.
    pub received: Vec<u8>,
}

/// A single-connection attach agent driven by a script.
pub struct FakeAgent {
    pub addr: SocketAddr,
    handle: JoinHandle<AgentRecord>,
}

impl FakeAgent {
    /// Accept one connection, decode the attach request, then hand the
    /// connection to `script`. The script returns whatever it read.
    pub async fn spawn<F, Fut>(script: F) -> Self
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = Vec<u8>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let frame = read_frame(&mut conn).await.unwrap().unwrap();
            let request: AttachRequest = serde_json::from_slice(&frame).unwrap();
            let received = script(conn).await;
            AgentRecord { request, received }
        });
        Self { addr, handle }
    }

    /// Wait for the script to finish.
    pub async fn finish(self) -> AgentRecord {
        tokio::time::timeout(TEST_TIMEOUT, self.handle)
            .await
            .expect("agent did not finish")
            .unwrap()
    }
}

/// Read until the peer closes.
pub async fn drain(conn: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = conn.read_to_end(&mut buf).await;
    buf
}

/// Attached: send `output` and close without reading input.
pub async fn send_and_close(mut conn: TcpStream, output: &'static [u8]) -> Vec<u8> {
    conn.write_all(&[status::ATTACHED]).await.unwrap();
    conn.write_all(output).await.unwrap();
    conn.shutdown().await.unwrap();
    Vec::new()
}

/// Attached: read input until EOF, echo it back, close.
pub async fn echo_until_eof(mut conn: TcpStream) -> Vec<u8> {
    conn.write_all(&[status::ATTACHED]).await.unwrap();
    let input = drain(&mut conn).await;
    conn.write_all(&input).await.unwrap();
    conn.shutdown().await.unwrap();
    input
}

/// Registry with `h1` pointing at `addr`.
pub fn registry_for(addr: SocketAddr) -> Arc<StaticRegistry> {
    Arc::new(StaticRegistry::for_attach(
        ATTACH_SERVICE,
        &[(host("h1"), addr.to_string())],
    ))
}

pub fn attach_config() -> AttachConfig {
    AttachConfig {
        service: ATTACH_SERVICE.to_string(),
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        wait_timeout: Duration::from_secs(2),
        pipe_capacity: 4096,
    }
}

pub fn attach_client(registry: Arc<StaticRegistry>, config: AttachConfig) -> AttachClient {
    AttachClient::new(registry, config)
}

pub fn formation_template() -> JobConfig {
    JobDefaults::default().formation_template()
}

/// Build application state over an in-memory cluster.
pub fn app_state(
    cluster: Arc<InMemoryCluster>,
    runtime: Arc<dyn HostRuntime>,
    registry: Arc<StaticRegistry>,
) -> AppState {
    let scheduler: Arc<dyn Scheduler> = cluster;
    let reconciler = FormationReconciler::new(
        scheduler.clone(),
        runtime.clone(),
        Arc::new(RoundRobin),
        formation_template(),
    );
    let launcher = JobLauncher::new(
        scheduler.clone(),
        attach_client(registry, attach_config()),
        Arc::new(FirstHost),
        "ubuntu",
    );
    AppState::new(scheduler, runtime, reconciler, launcher)
}

/// Serve the controller on a loopback port.
pub async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
