//! One-shot endpoint reachability probe.
//!
//! Issues a single `HEAD` request with a bounded timeout and reports
//! reachability plus round-trip latency. Status-code interpretation is
//! left to the callers: preflight treats any response as reachable,
//! diagnostics treats `>= 500` as reachable-but-unhealthy.

use std::time::{Duration, Instant};

/// Wall-clock limit for a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of probing a single endpoint.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether the endpoint produced any HTTP response at all.
    pub responded: bool,
    /// HTTP status code of the response, when one arrived.
    pub status: Option<u16>,
    /// Round-trip latency in milliseconds, when a response arrived.
    pub latency_ms: Option<u64>,
    /// Short failure code for non-responses (timeout, connect error, DNS).
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Reachable in the diagnostics sense: responded with a status below 500.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.responded && self.status.is_some_and(|s| s < 500)
    }
}

/// Probe `url` with a `HEAD` request bounded by [`PROBE_TIMEOUT`].
///
/// Any response, regardless of status code, counts as "responded".
/// Connection errors, DNS failures, and timeouts yield a short error code.
pub async fn probe_endpoint(url: &str) -> ProbeOutcome {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            return ProbeOutcome {
                responded: false,
                status: None,
                latency_ms: None,
                error: Some(format!("client_error: {err}")),
            };
        }
    };

    let started = Instant::now();
    match client.head(url).send().await {
        Ok(resp) => ProbeOutcome {
            responded: true,
            status: Some(resp.status().as_u16()),
            latency_ms: Some(elapsed_ms(started)),
            error: None,
        },
        Err(err) => ProbeOutcome {
            responded: false,
            status: None,
            latency_ms: None,
            error: Some(probe_error_code(&err)),
        },
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Collapse a reqwest error into a short stable code for error messages.
fn probe_error_code(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timeout".to_owned()
    } else if err.is_connect() {
        "connection_error".to_owned()
    } else if err.is_builder() || err.is_request() {
        "invalid_url".to_owned()
    } else {
        err.to_string()
    }
}
