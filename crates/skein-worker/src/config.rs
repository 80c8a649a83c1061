//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_DISOWN_TIMEOUT: Duration = Duration::from_secs(60);

fn env_secs(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
}

/// Identity and liveness parameters of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Application name this worker serves.
    pub app: String,
    /// Instance id assigned by the runtime; sent in the handshake.
    pub uuid: String,
    /// Runtime endpoints, tried in order.
    pub endpoints: Vec<SocketAddr>,
    /// How often to emit a heartbeat while active.
    pub heartbeat_interval: Duration,
    /// How long to tolerate silence from the runtime before the worker
    /// considers itself abandoned.
    pub disown_timeout: Duration,
    /// Keep re-arming the heartbeat timer after a failed send. The
    /// observed runtime behavior; set to false to stop on the first
    /// heartbeat write error instead.
    pub heartbeat_despite_errors: bool,
}

impl WorkerConfig {
    /// Defaults: 10s heartbeats, 60s disown, keep beating on errors.
    /// `SKEIN_HEARTBEAT_SECS` and `SKEIN_DISOWN_SECS` override the timers.
    pub fn new(app: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            uuid: uuid.into(),
            endpoints: Vec::new(),
            heartbeat_interval: env_secs("SKEIN_HEARTBEAT_SECS")
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            disown_timeout: env_secs("SKEIN_DISOWN_SECS").unwrap_or(DEFAULT_DISOWN_TIMEOUT),
            heartbeat_despite_errors: true,
        }
    }

    pub fn endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn endpoints(mut self, endpoints: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn disown_timeout(mut self, timeout: Duration) -> Self {
        self.disown_timeout = timeout;
        self
    }

    pub fn heartbeat_despite_errors(mut self, keep: bool) -> Self {
        self.heartbeat_despite_errors = keep;
        self
    }
}
