//! Health probe implementations.
//!
//! A probe runs one typed check against a target address (`host:port`)
//! and reports healthy or unhealthy with a reason. Probes never return
//! errors; connection problems are reported as `Failed`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The check passed.
    Healthy,
    /// The target answered, but not the way the check expects.
    Unhealthy(String),
    /// The probe could not be executed (connection error, timeout).
    Failed(String),
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeResult::Healthy)
    }

    /// Why the probe did not pass, if it didn't.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ProbeResult::Healthy => None,
            ProbeResult::Unhealthy(r) | ProbeResult::Failed(r) => Some(r),
        }
    }
}

/// A named, typed health check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Short name used in logs and failure reasons.
    fn name(&self) -> &str;

    async fn check(&self, target: &str) -> ProbeResult;
}

// ── HTTP ───────────────────────────────────────────────────────────

/// GET `path` on the target; 2xx is healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    path: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn name(&self) -> &str {
        "http"
    }

    async fn check(&self, target: &str) -> ProbeResult {
        match http_request(target, "GET", &self.path, self.timeout).await {
            Ok(status) if (200..300).contains(&status) => ProbeResult::Healthy,
            Ok(status) => ProbeResult::Unhealthy(format!("GET {} returned {status}", self.path)),
            Err(reason) => ProbeResult::Failed(reason),
        }
    }
}

/// Send one HTTP/1.1 request and return the response status code.
///
/// Uses a raw TCP connection + hyper handshake, bounded by `timeout`.
pub async fn http_request(
    address: &str,
    method: &str,
    path: &str,
    timeout: Duration,
) -> Result<u16, String> {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| format!("connect {address}: {e}"))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| format!("handshake {address}: {e}"))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method(method)
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "switchyard-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| format!("build request {uri}: {e}"))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| format!("{method} {uri}: {e}"))?;
        Ok(resp.status().as_u16())
    })
    .await;

    match result {
        Ok(outcome) => {
            if let Err(reason) = &outcome {
                debug!(%reason, "http probe failed");
            }
            outcome
        }
        Err(_) => {
            debug!(%uri, "http probe timed out");
            Err(format!("{method} {uri} timed out after {timeout:?}"))
        }
    }
}

// ── TCP ────────────────────────────────────────────────────────────

/// Healthy when a TCP connection can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn check(&self, target: &str) -> ProbeResult {
        match tokio::time::timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => ProbeResult::Healthy,
            Ok(Err(e)) => ProbeResult::Failed(format!("connect {target}: {e}")),
            Err(_) => ProbeResult::Failed(format!("connect {target} timed out")),
        }
    }
}

// ── Cache ping ─────────────────────────────────────────────────────

/// Sends an inline `PING` to a Redis-protocol cache and expects `+PONG`.
#[derive(Debug, Clone)]
pub struct CachePingProbe {
    timeout: Duration,
}

impl CachePingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for CachePingProbe {
    fn name(&self) -> &str {
        "cache"
    }

    async fn check(&self, target: &str) -> ProbeResult {
        let ping = async {
            let mut stream = TcpStream::connect(target)
                .await
                .map_err(|e| format!("connect {target}: {e}"))?;
            stream
                .write_all(b"PING\r\n")
                .await
                .map_err(|e| format!("write PING: {e}"))?;
            let mut line = String::new();
            BufReader::new(stream)
                .read_line(&mut line)
                .await
                .map_err(|e| format!("read reply: {e}"))?;
            Ok::<_, String>(line)
        };

        match tokio::time::timeout(self.timeout, ping).await {
            Ok(Ok(line)) if line.trim_end() == "+PONG" => ProbeResult::Healthy,
            Ok(Ok(line)) => ProbeResult::Unhealthy(format!("unexpected reply {:?}", line.trim_end())),
            Ok(Err(reason)) => ProbeResult::Failed(reason),
            Err(_) => ProbeResult::Failed(format!("PING {target} timed out")),
        }
    }
}

// ── Synthetic transaction ──────────────────────────────────────────

/// One request in a synthetic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticStep {
    pub name: String,
    pub method: String,
    pub path: String,
    pub expected_status: u16,
}

impl SyntheticStep {
    pub fn get(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            expected_status: 200,
        }
    }

    pub fn expect(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }
}

/// Runs a scripted sequence of HTTP requests; every step must return its
/// expected status. Stops at the first mismatch.
#[derive(Debug, Clone)]
pub struct SyntheticProbe {
    name: String,
    steps: Vec<SyntheticStep>,
    timeout: Duration,
}

impl SyntheticProbe {
    pub fn new(name: impl Into<String>, steps: Vec<SyntheticStep>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            steps,
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for SyntheticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, target: &str) -> ProbeResult {
        for step in &self.steps {
            match http_request(target, &step.method, &step.path, self.timeout).await {
                Ok(status) if status == step.expected_status => {}
                Ok(status) => {
                    return ProbeResult::Unhealthy(format!(
                        "step {} expected {} got {status}",
                        step.name, step.expected_status
                    ));
                }
                Err(reason) => return ProbeResult::Failed(format!("step {}: {reason}", step.name)),
            }
        }
        ProbeResult::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve `count` connections, answering each with the next status code.
    async fn http_stub(statuses: Vec<u16>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            for status in statuses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let resp = format!("HTTP/1.1 {status} X\r\ncontent-length: 0\r\n\r\n");
                sock.write_all(resp.as_bytes()).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn http_probe_healthy_on_2xx() {
        let addr = http_stub(vec![204]).await;
        let probe = HttpProbe::new("/health", Duration::from_secs(2));
        assert_eq!(probe.check(&addr).await, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn http_probe_unhealthy_on_5xx() {
        let addr = http_stub(vec![503]).await;
        let probe = HttpProbe::new("/health", Duration::from_secs(2));
        let result = probe.check(&addr).await;
        assert!(matches!(result, ProbeResult::Unhealthy(ref r) if r.contains("503")));
    }

    #[tokio::test]
    async fn tcp_probe_fails_on_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let result = TcpProbe::new(Duration::from_secs(1)).check(&addr).await;
        assert!(matches!(result, ProbeResult::Failed(_)));
        assert!(result.reason().is_some());
    }

    #[tokio::test]
    async fn tcp_probe_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let result = TcpProbe::new(Duration::from_secs(1)).check(&addr).await;
        assert!(result.is_healthy());
    }

    #[tokio::test]
    async fn cache_probe_expects_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"+PONG\r\n").await.unwrap();
        });
        let result = CachePingProbe::new(Duration::from_secs(1)).check(&addr).await;
        assert_eq!(result, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn synthetic_probe_reports_failing_step() {
        let addr = http_stub(vec![200, 500]).await;
        let probe = SyntheticProbe::new(
            "checkout",
            vec![
                SyntheticStep::get("home", "/"),
                SyntheticStep::get("cart", "/cart"),
            ],
            Duration::from_secs(2),
        );
        let result = probe.check(&addr).await;
        assert_eq!(
            result,
            ProbeResult::Unhealthy("step cart expected 200 got 500".to_string())
        );
    }
}
