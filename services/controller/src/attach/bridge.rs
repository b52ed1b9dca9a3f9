//! Couples an attach session to a hijacked caller connection.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tracing::debug;

use super::client::AttachSession;
use super::error::AttachError;

const COPY_BUF_LEN: usize = 8 * 1024;

/// What a finished bridge moved and how the session ended.
#[derive(Debug)]
pub struct BridgeOutcome {
    /// Bytes forwarded from the caller to the job, including pre-buffered bytes.
    pub bytes_in: u64,
    /// Bytes forwarded from the job to the caller.
    pub bytes_out: u64,
    pub result: Result<(), AttachError>,
}

/// An attach session and the local end of its pipe.
#[derive(Debug)]
pub struct StreamBridge {
    session: AttachSession,
    pipe: DuplexStream,
}

impl StreamBridge {
    pub fn new(session: AttachSession, pipe: DuplexStream) -> Self {
        Self { session, pipe }
    }

    /// Release the session without bridging.
    pub async fn close(self) {
        self.session.close().await;
    }

    /// Bridge until the job's output ends.
    ///
    /// `buffered` holds bytes the caller sent that were already read by the
    /// HTTP layer; they reach the job before anything else. When the job's
    /// output ends the caller connection is shut down and dropped, which also
    /// abandons a caller-to-job copy that is still running.
    pub async fn run<C>(self, caller: C, buffered: Bytes) -> BridgeOutcome
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let Self { mut session, pipe } = self;
        let (mut caller_rd, mut caller_wr) = tokio::io::split(caller);
        let (mut pipe_rd, mut pipe_wr) = tokio::io::split(pipe);

        let mut bytes_in = 0u64;
        let outbound = {
            let inbound = async {
                if !buffered.is_empty() {
                    pipe_wr.write_all(&buffered).await?;
                    bytes_in += buffered.len() as u64;
                }
                let mut buf = vec![0u8; COPY_BUF_LEN];
                loop {
                    let n = caller_rd.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    pipe_wr.write_all(&buf[..n]).await?;
                    bytes_in += n as u64;
                }
                pipe_wr.shutdown().await
            };
            let outbound = tokio::io::copy(&mut pipe_rd, &mut caller_wr);

            tokio::pin!(inbound, outbound);
            let mut inbound_open = true;
            loop {
                tokio::select! {
                    copied = &mut outbound => break copied,
                    copied = &mut inbound, if inbound_open => {
                        inbound_open = false;
                        if let Err(e) = copied {
                            debug!(error = %e, "Caller input copy ended");
                        }
                    }
                }
            }
        };

        let (bytes_out, result) = match outbound {
            Ok(bytes) => (bytes, session.wait().await),
            Err(e) => {
                debug!(error = %e, "Caller output copy failed");
                (0, Err(AttachError::Stream(e)))
            }
        };

        let _ = caller_wr.shutdown().await;
        drop(caller_wr);
        drop(caller_rd);
        session.close().await;

        BridgeOutcome {
            bytes_in,
            bytes_out,
            result,
        }
    }
}
