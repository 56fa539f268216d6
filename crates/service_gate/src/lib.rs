use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Invalid redis endpoint '{0}': expected redis://host[:port]")]
    InvalidEndpoint(String),
}

// ============================================================================
// Probe trait - one reachability check per upstream service
// ============================================================================

/// A reachability check against one upstream service.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Human-readable target, e.g. "MariaDB at db:3306".
    fn target(&self) -> String;

    /// A single reachability attempt. Any failure, including a missing
    /// client binary, just means "not ready yet".
    async fn check(&self) -> bool;
}

/// How the gate waits. The interval is two seconds; tests shrink it via
/// a paused clock rather than a config knob.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub enabled: bool,
    pub verbose: bool,
    pub interval: Duration,
}

impl WaitOptions {
    pub fn new(enabled: bool, verbose: bool) -> Self {
        Self {
            enabled,
            verbose,
            interval: Duration::from_secs(2),
        }
    }
}

/// Blocks until the probe reports its target reachable. Returns immediately
/// when waiting is disabled. There is deliberately no retry bound: startup
/// blocks until the dependency exists, or the operator kills the process.
pub async fn wait_until_ready(probe: &dyn Probe, options: &WaitOptions) {
    if !options.enabled {
        return;
    }

    println!("[WAIT] {} ...", probe.target());
    loop {
        if probe.check().await {
            println!("[OK] {} reachable.", probe.target());
            return;
        }
        if options.verbose {
            println!("[DEBUG] {} not ready, retrying ...", probe.target());
        }
        sleep(options.interval).await;
    }
}

// ============================================================================
// MariaDbProbe - mysqladmin ping
// ============================================================================

pub struct MariaDbProbe {
    host: String,
    port: String,
    user: String,
    password: String,
}

impl MariaDbProbe {
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl Probe for MariaDbProbe {
    fn target(&self) -> String {
        format!("MariaDB at {}:{}", self.host, self.port)
    }

    async fn check(&self) -> bool {
        let output = Command::new("mysqladmin")
            .args(["ping", "-h", &self.host, "-P", &self.port, "-u", &self.user])
            .arg(format!("-p{}", self.password))
            .arg("--silent")
            .output()
            .await;

        matches!(output, Ok(out) if out.status.success())
    }
}

// ============================================================================
// RedisProbe - redis-cli ping
// ============================================================================

pub struct RedisProbe {
    host: String,
    port: String,
}

impl RedisProbe {
    /// Parses `redis://host[:port]`; the port defaults to 6379. A URL the
    /// pattern cannot read is an error instead of an empty host the gate
    /// would probe forever.
    pub fn from_url(url: &str) -> Result<Self, GateError> {
        let re = Regex::new(r"^redis://([^:/]+)(?::(\d+))?").expect("static redis url regex");
        let captures = re
            .captures(url)
            .ok_or_else(|| GateError::InvalidEndpoint(url.to_string()))?;

        let host = captures[1].to_string();
        let port = captures
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "6379".to_string());

        Ok(Self { host, port })
    }
}

#[async_trait]
impl Probe for RedisProbe {
    fn target(&self) -> String {
        format!("Redis at {}:{}", self.host, self.port)
    }

    async fn check(&self) -> bool {
        let output = Command::new("redis-cli")
            .args(["-h", &self.host, "-p", &self.port, "ping"])
            .output()
            .await;

        matches!(output, Ok(out) if out.status.success())
    }
}

// ============================================================================
// Test-Utilities
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::Probe;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Probe that fails a configurable number of times before succeeding.
    pub struct MockProbe {
        remaining_failures: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl MockProbe {
        pub fn ready() -> Self {
            Self::ready_after(0)
        }

        pub fn ready_after(failures: u32) -> Self {
            Self {
                remaining_failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Probe for MockProbe {
        fn target(&self) -> String {
            "mock service".to_string()
        }

        async fn check(&self) -> bool {
            *self.calls.lock().unwrap() += 1;
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining == 0 {
                true
            } else {
                *remaining -= 1;
                false
            }
        }
    }
}
