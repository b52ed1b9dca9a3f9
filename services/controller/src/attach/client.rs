//! Attach agent client.
//!
//! A handshake runs through these states:
//!
//! ```text
//! Resolve -> Connect -> SendRequest -> ReadStatus -+-> Error    (fail with agent message)
//!                                                  +-> Waiting  (session returned, start awaited in background)
//!                                                  +-> Attached (session returned, streaming)
//! ```
//!
//! Once a session is returned, a background task owns the agent connection
//! and pumps bytes between it and the caller-supplied stream until the agent
//! closes its output, an I/O error occurs, or the session is cancelled.

use std::sync::Arc;
use std::time::Duration;

use shoal_id::{HostId, JobId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::AttachError;
use super::protocol::{status, write_frame, AttachFlags, AttachRequest, AttachStatus};
use crate::registry::Registry;

/// Attach client settings.
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Registry service name prefix; the per-host name is `{service}.{host}`.
    pub service: String,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// How long a waiting session may wait for its job to start.
    pub wait_timeout: Duration,
    /// Buffer size of the in-process pipe between the session and its user.
    pub pipe_capacity: usize,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            service: "shoal-host-attach".to_string(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(300),
            pipe_capacity: 64 * 1024,
        }
    }
}

/// Opens attach sessions to per-host attach agents.
#[derive(Clone)]
pub struct AttachClient {
    registry: Arc<dyn Registry>,
    config: AttachConfig,
}

impl AttachClient {
    pub fn new(registry: Arc<dyn Registry>, config: AttachConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &AttachConfig {
        &self.config
    }

    /// Registry name of the attach agent on `host`.
    pub fn service_name(&self, host: &HostId) -> String {
        format!("{}.{}", self.config.service, host)
    }

    /// Attach to `request.job_id` on `host`.
    ///
    /// Job output is written to `io`. If the request includes
    /// [`AttachFlags::STDIN`], bytes read from `io` are forwarded to the job
    /// and the agent connection's write side is shut down when `io` reaches
    /// EOF.
    ///
    /// Returns as soon as the agent has answered with a non-error status. A
    /// session that started out waiting may still fail later; that failure is
    /// reported by [`AttachSession::wait`].
    #[instrument(skip(self, request, io), fields(host_id = %host, job_id = %request.job_id))]
    pub async fn attach<S>(
        &self,
        host: &HostId,
        request: &AttachRequest,
        io: S,
    ) -> Result<AttachSession, AttachError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let addrs = self.resolve(host).await?;
        let mut conn = self.connect(&addrs).await?;

        let payload = serde_json::to_vec(request)?;
        write_frame(&mut conn, &payload)
            .await
            .map_err(AttachError::Send)?;

        let mut first = [0u8; 1];
        match timeout(self.config.handshake_timeout, conn.read_exact(&mut first)).await {
            Err(_) => {
                return Err(AttachError::Timeout {
                    stage: "reading attach status",
                    after: self.config.handshake_timeout,
                })
            }
            Ok(Err(e)) => return Err(AttachError::Read(e)),
            Ok(Ok(_)) => {}
        }

        let waiting = match AttachStatus::from_byte(first[0]) {
            AttachStatus::Error => {
                let message = read_message(&mut conn, self.config.handshake_timeout).await?;
                let _ = conn.shutdown().await;
                warn!(message = %message, "Attach agent refused session");
                return Err(AttachError::Agent(message));
            }
            AttachStatus::Waiting => true,
            AttachStatus::Attached => false,
        };

        info!(waiting, "Attach session established");
        Ok(AttachSession::spawn(
            request.job_id.clone(),
            conn,
            io,
            SessionOptions {
                waiting,
                forward_input: request.flags.contains(AttachFlags::STDIN),
                wait_timeout: self.config.wait_timeout,
                handshake_timeout: self.config.handshake_timeout,
            },
        ))
    }

    async fn resolve(&self, host: &HostId) -> Result<Vec<String>, AttachError> {
        let service = self.service_name(host);
        let addrs = self
            .registry
            .online_addrs(&service)
            .await
            .map_err(|source| AttachError::Resolve {
                service: service.clone(),
                source,
            })?;
        if addrs.is_empty() {
            return Err(AttachError::NoAddresses(service));
        }
        Ok(addrs)
    }

    /// Connect to the first reachable address.
    async fn connect(&self, addrs: &[String]) -> Result<TcpStream, AttachError> {
        let mut last_err = None;
        for addr in addrs {
            match timeout(self.config.connect_timeout, TcpStream::connect(addr.as_str())).await {
                Ok(Ok(conn)) => {
                    debug!(addr = %addr, "Connected to attach agent");
                    return Ok(conn);
                }
                Ok(Err(source)) => {
                    debug!(addr = %addr, error = %source, "Attach agent connect failed");
                    last_err = Some(AttachError::Connect {
                        addr: addr.clone(),
                        source,
                    });
                }
                Err(_) => {
                    debug!(addr = %addr, "Attach agent connect timed out");
                    last_err = Some(AttachError::Timeout {
                        stage: "connecting to attach agent",
                        after: self.config.connect_timeout,
                    });
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AttachError::NoAddresses(String::new())))
    }
}

/// Read an error message up to EOF.
async fn read_message(conn: &mut TcpStream, limit: Duration) -> Result<String, AttachError> {
    let mut message = Vec::new();
    match timeout(limit, conn.read_to_end(&mut message)).await {
        Err(_) => Err(AttachError::Timeout {
            stage: "reading attach error message",
            after: limit,
        }),
        Ok(Err(e)) => Err(AttachError::Read(e)),
        Ok(Ok(_)) => Ok(String::from_utf8_lossy(&message).into_owned()),
    }
}

// =============================================================================
// Sessions
// =============================================================================

struct SessionOptions {
    waiting: bool,
    forward_input: bool,
    wait_timeout: Duration,
    handshake_timeout: Duration,
}

/// A live attach session.
///
/// Dropping the session cancels it and releases the agent connection.
pub struct AttachSession {
    job_id: JobId,
    started_waiting: bool,
    cancel: CancellationToken,
    done: Option<oneshot::Receiver<Result<(), AttachError>>>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AttachSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachSession")
            .field("job_id", &self.job_id)
            .field("started_waiting", &self.started_waiting)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl AttachSession {
    fn spawn<S>(job_id: JobId, conn: TcpStream, io: S, options: SessionOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let started_waiting = options.waiting;

        let task = tokio::spawn({
            let cancel = cancel.clone();
            let job_id = job_id.clone();
            async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(AttachError::Cancelled),
                    result = run_session(conn, io, options) => result,
                };
                match &result {
                    Ok(()) => debug!(job_id = %job_id, "Attach session finished"),
                    Err(e) => debug!(job_id = %job_id, error = %e, "Attach session ended with error"),
                }
                let _ = done_tx.send(result);
            }
        });

        Self {
            job_id,
            started_waiting,
            cancel,
            done: Some(done_rx),
            task: Some(task),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// True if the agent answered that the job had not started yet.
    pub fn started_waiting(&self) -> bool {
        self.started_waiting
    }

    /// Wait for the job's output to end. Yields a result once.
    pub async fn wait(&mut self) -> Result<(), AttachError> {
        let Some(done) = self.done.take() else {
            return Err(AttachError::AlreadyAwaited);
        };
        done.await.unwrap_or(Err(AttachError::Cancelled))
    }

    /// Cancel the session and wait for the agent connection to be released.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for AttachSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_session<S>(mut conn: TcpStream, io: S, options: SessionOptions) -> Result<(), AttachError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if options.waiting {
        await_start(&mut conn, options.wait_timeout, options.handshake_timeout).await?;
    }
    pump(conn, io, options.forward_input).await
}

/// Read the second status byte of a waiting session.
async fn await_start(
    conn: &mut TcpStream,
    wait_timeout: Duration,
    handshake_timeout: Duration,
) -> Result<(), AttachError> {
    let mut second = [0u8; 1];
    match timeout(wait_timeout, conn.read_exact(&mut second)).await {
        Err(_) => Err(AttachError::Timeout {
            stage: "waiting for job to start",
            after: wait_timeout,
        }),
        Ok(Err(e)) => Err(AttachError::Read(e)),
        Ok(Ok(_)) if second[0] == status::ERROR => {
            let message = read_message(conn, handshake_timeout).await?;
            Err(AttachError::Agent(message))
        }
        Ok(Ok(_)) => Ok(()),
    }
}

/// Copy agent output to `io` and, if requested, `io` input to the agent.
///
/// The session ends when the output direction ends.
async fn pump<S>(conn: TcpStream, io: S, forward_input: bool) -> Result<(), AttachError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut agent_rd, mut agent_wr) = conn.into_split();
    let (mut local_rd, mut local_wr) = tokio::io::split(io);

    let output = async {
        let copied = tokio::io::copy(&mut agent_rd, &mut local_wr).await;
        let _ = local_wr.shutdown().await;
        copied
    };

    if !forward_input {
        let bytes = output.await.map_err(AttachError::Stream)?;
        debug!(bytes, "Attach output closed");
        return Ok(());
    }

    let input = async {
        let copied = tokio::io::copy(&mut local_rd, &mut agent_wr).await;
        let _ = agent_wr.shutdown().await;
        copied
    };

    tokio::pin!(output, input);
    let mut input_open = true;
    loop {
        tokio::select! {
            copied = &mut output => {
                let bytes = copied.map_err(AttachError::Stream)?;
                debug!(bytes, "Attach output closed");
                return Ok(());
            }
            copied = &mut input, if input_open => {
                input_open = false;
                match copied {
                    Ok(bytes) => debug!(bytes, "Attach input closed"),
                    Err(e) => debug!(error = %e, "Attach input copy failed"),
                }
            }
        }
    }
}
