//! Host probe logic.
//!
//! A health check is a TCP reachability probe against the host's control
//! port followed by an API-level probe (`GET /_ping`). The two results are
//! folded into a [`ProbeOutcome`]. [`HealthTracker`] keeps per-host
//! consecutive counts and an exponential re-probe backoff.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use fleet_state::{HostNode, ProbeOutcome};

#[async_trait]
pub trait Probe: Send + Sync {
    /// Can a TCP connection be opened to the control endpoint?
    async fn tcp_reachable(&self, host: &HostNode, timeout: Duration) -> bool;

    /// Does the container-management API answer its ping endpoint?
    async fn api_healthy(&self, host: &HostNode, timeout: Duration) -> bool;
}

/// Run both probes and classify the result.
pub async fn classify(probe: &dyn Probe, host: &HostNode, timeout: Duration) -> ProbeOutcome {
    if !probe.tcp_reachable(host, timeout).await {
        return ProbeOutcome::Unreachable;
    }
    if probe.api_healthy(host, timeout).await {
        ProbeOutcome::Success
    } else {
        ProbeOutcome::NetworkIssue
    }
}

/// Probes real hosts over the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkProbe;

#[async_trait]
impl Probe for NetworkProbe {
    async fn tcp_reachable(&self, host: &HostNode, timeout: Duration) -> bool {
        let address = host.control_endpoint();
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host_id = %host.id, %address, error = %e, "tcp probe failed");
                false
            }
            Err(_) => {
                debug!(host_id = %host.id, %address, "tcp probe timed out");
                false
            }
        }
    }

    async fn api_healthy(&self, host: &HostNode, timeout: Duration) -> bool {
        http_ping(&host.control_endpoint(), timeout).await
    }
}

/// `GET /_ping` against a Docker-compatible API. True on any 2xx.
pub async fn http_ping(address: &str, timeout: Duration) -> bool {
    let uri = format!("http://{address}/_ping");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "ping connection failed");
                return false;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "ping handshake failed");
                return false;
            }
        };
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "fleet-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, %uri, "invalid ping request");
                return false;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "ping non-2xx");
                false
            }
            Err(e) => {
                debug!(error = %e, %uri, "ping request failed");
                false
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%uri, "ping timed out");
        false
    })
}

/// Consecutive probe results for one host, with re-probe backoff.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    consecutive_failures: u32,
    consecutive_successes: u32,
    current_backoff: Duration,
    base_interval: Duration,
    max_backoff: Duration,
    /// Unix seconds before which the host should not be probed again.
    next_due: u64,
}

impl HealthTracker {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes: 0,
            current_backoff: base_interval,
            base_interval,
            max_backoff: Duration::from_secs(60).max(base_interval),
            next_due: 0,
        }
    }

    /// Record an outcome observed at `now` (unix seconds).
    pub fn record(&mut self, outcome: ProbeOutcome, now: u64) {
        if outcome.is_healthy() {
            if self.consecutive_failures > 0 {
                debug!(failures = self.consecutive_failures, "host recovered");
            }
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            self.current_backoff = self.base_interval;
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
        }
        self.next_due = now + self.current_backoff.as_secs();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn next_interval(&self) -> Duration {
        self.current_backoff
    }

    pub fn is_due(&self, now: u64) -> bool {
        now >= self.next_due
    }
}
