// ABOUTME: Bounded TCP connectivity probe for waiting on a freshly started instance
// The only retry loop in perry: fixed interval, fixed attempt ceiling, then a hard error

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

pub const SSH_PORT: u16 = 22;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{host}:{port} has not opened after {attempts} attempts")]
    NotOpened {
        host: String,
        port: u16,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortProbe {
    pub interval: Duration,
    /// Failed checks tolerated before giving up (at least one check always runs)
    pub max_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for PortProbe {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PortProbe {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub async fn is_port_open(&self, host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    /// Wait for `host:port` to accept TCP connections. Returns the number of checks made.
    pub async fn wait_until_open(&self, host: &str, port: u16) -> Result<u32, ProbeError> {
        info!("Waiting for {}:{} to open", host, port);
        self.poll(host, port, move || self.is_port_open(host, port)).await
    }

    /// Run `check` until it reports open, sleeping `interval` between failures.
    /// Fails on exactly the `max_attempts`-th failed check.
    pub async fn poll<F, Fut>(&self, host: &str, port: u16, mut check: F) -> Result<u32, ProbeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut failures = 0;
        loop {
            if check().await {
                debug!("{}:{} is open", host, port);
                return Ok(failures + 1);
            }
            failures += 1;
            if failures >= self.max_attempts {
                return Err(ProbeError::NotOpened {
                    host: host.to_string(),
                    port,
                    attempts: failures,
                });
            }
            debug!(
                "{}:{} not open (attempt {}/{}), retrying in {:?}",
                host, port, failures, self.max_attempts, self.interval
            );
            tokio::time::sleep(self.interval).await;
        }
    }
}
