//! HTTP readiness probe.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Empty;
use tracing::debug;

/// Issue a single `GET path` to `addr` with the given `Host` header.
///
/// Returns the response status, or `None` if no response arrived within
/// `timeout` (connection refused, handshake failure, malformed request).
pub async fn http_status(
    addr: SocketAddr,
    host: &str,
    path: &str,
    timeout: Duration,
) -> Option<StatusCode> {
    let path = format!("/{}", path.trim_start_matches('/'));
    let host = format!("{host}:{}", addr.port());

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(addr).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %addr, "probe connection failed");
                return None;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %addr, "probe handshake failed");
                return None;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&path)
            .header("host", &host)
            .header("user-agent", "skiff/0.1")
            .body(Empty::<Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %path, "probe request malformed");
                return None;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => Some(resp.status()),
            Err(e) => {
                debug!(error = %e, %addr, "probe request failed");
                None
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%addr, "probe timed out");
        None
    })
}
