//! Taking over an HTTP connection for a raw attach stream.
//!
//! The caller asks for `Connection: Upgrade` with `Upgrade: shoal-attach`.
//! The server answers `101 Switching Protocols` and, once hyper hands the
//! connection over, it is bridged to the job's attach session. Bytes the
//! caller sent right after the request body may already sit in hyper's read
//! buffer; they are recovered and forwarded before anything else.

use axum::body::Body;
use axum::http::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use shoal_id::JobId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use crate::attach::StreamBridge;

/// Upgrade protocol token for attach streams.
pub const ATTACH_PROTOCOL: &str = "shoal-attach";

/// Content type of a hijacked attach response.
pub const HIJACK_CONTENT_TYPE: &str = "application/vnd.shoal.hijack";

/// A raw, bidirectional caller connection.
pub trait RawConn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawConn for T {}

/// True if the request asked to upgrade to an attach stream.
pub fn wants_attach_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let attach_protocol = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(ATTACH_PROTOCOL));
    connection_upgrade && attach_protocol
}

/// The `101 Switching Protocols` response that starts a hijack.
pub fn switching_protocols() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static(ATTACH_PROTOCOL));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(HIJACK_CONTENT_TYPE));
    response
}

/// Recover the raw connection and any bytes hyper had already buffered.
pub fn into_raw(upgraded: Upgraded) -> (Box<dyn RawConn>, Bytes) {
    match upgraded.downcast::<TokioIo<TcpStream>>() {
        Ok(parts) => (Box::new(parts.io.into_inner()), parts.read_buf),
        // Upgraded replays its own buffer first.
        Err(upgraded) => (Box::new(TokioIo::new(upgraded)), Bytes::new()),
    }
}

/// Wait for the upgrade to complete, then bridge the connection.
pub async fn serve_attached(on_upgrade: OnUpgrade, bridge: StreamBridge, job_id: JobId, request_id: String) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            error!(job_id = %job_id, request_id = %request_id, error = %e, "Connection upgrade failed");
            bridge.close().await;
            return;
        }
    };

    let (conn, buffered) = into_raw(upgraded);
    let outcome = bridge.run(conn, buffered).await;
    match outcome.result {
        Ok(()) => info!(
            job_id = %job_id,
            request_id = %request_id,
            bytes_in = outcome.bytes_in,
            bytes_out = outcome.bytes_out,
            "Attach stream finished"
        ),
        Err(e) => warn!(
            job_id = %job_id,
            request_id = %request_id,
            bytes_in = outcome.bytes_in,
            bytes_out = outcome.bytes_out,
            kind = ?e.kind(),
            error = %e,
            "Attach stream ended with error"
        ),
    }
}
