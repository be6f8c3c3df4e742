//! Configuration for the playground server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use cjbox_core::SessionConfig;
use cjbox_engine::SandboxPolicy;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Configuration for the cjbox server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Sandbox image reference.
    pub image: String,

    /// Sandbox memory ceiling in MiB (default: 512).
    pub memory_mib: u32,

    /// Sandbox CPU share in units of 1e-9 CPUs (default: one CPU).
    pub nano_cpus: i64,

    /// Host memory that must be available to admit a request, in MiB (default: 512).
    pub min_available_mib: u64,

    /// Upper bound for one-shot jobs (default: 5s).
    pub job_timeout: Duration,

    /// Largest accepted request body (default: 1 MiB).
    pub max_body_bytes: usize,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("sandbox image must not be empty")]
    EmptyImage,

    #[error("sandbox memory must be at least 6 MiB, got {0}")]
    MemoryTooSmall(u32),

    #[error("nano_cpus must be positive, got {0}")]
    InvalidCpus(i64),

    #[error("job timeout must be positive")]
    ZeroTimeout,

    #[error("request body limit must be positive")]
    ZeroBodyLimit,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            image: "cangjie".into(),
            memory_mib: 512,
            nano_cpus: 1_000_000_000,
            min_available_mib: 512,
            job_timeout: Duration::from_secs(5),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CJBOX_HTTP_HOST` | `0.0.0.0` |
    /// | `CJBOX_HTTP_PORT` | `8080` |
    /// | `CJBOX_IMAGE` | `cangjie` |
    /// | `CJBOX_MEMORY_MIB` | `512` |
    /// | `CJBOX_NANO_CPUS` | `1000000000` |
    /// | `CJBOX_MIN_AVAILABLE_MIB` | `512` |
    /// | `CJBOX_JOB_TIMEOUT_SECS` | `5` |
    /// | `CJBOX_MAX_BODY_BYTES` | `1048576` |
    ///
    /// Unparsable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        let http_host: IpAddr = parse_var(&var, "CJBOX_HTTP_HOST").unwrap_or(default.http_addr.ip());
        let http_port: u16 = parse_var(&var, "CJBOX_HTTP_PORT").unwrap_or(default.http_addr.port());

        Self {
            http_addr: SocketAddr::new(http_host, http_port),
            image: var("CJBOX_IMAGE").unwrap_or(default.image),
            memory_mib: parse_var(&var, "CJBOX_MEMORY_MIB").unwrap_or(default.memory_mib),
            nano_cpus: parse_var(&var, "CJBOX_NANO_CPUS").unwrap_or(default.nano_cpus),
            min_available_mib: parse_var(&var, "CJBOX_MIN_AVAILABLE_MIB")
                .unwrap_or(default.min_available_mib),
            job_timeout: parse_var(&var, "CJBOX_JOB_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.job_timeout),
            max_body_bytes: parse_var(&var, "CJBOX_MAX_BODY_BYTES")
                .unwrap_or(default.max_body_bytes),
        }
    }

    /// Check the values before anything is built from them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.trim().is_empty() {
            return Err(ConfigError::EmptyImage);
        }
        if self.memory_mib < 6 {
            return Err(ConfigError::MemoryTooSmall(self.memory_mib));
        }
        if self.nano_cpus <= 0 {
            return Err(ConfigError::InvalidCpus(self.nano_cpus));
        }
        if self.job_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }
        Ok(())
    }

    /// Admission threshold in bytes.
    pub fn min_available_bytes(&self) -> u64 {
        self.min_available_mib * MIB
    }

    /// Sandbox policy applied to every container.
    pub fn sandbox_policy(&self) -> cjbox_engine::Result<SandboxPolicy> {
        SandboxPolicy::builder()
            .image(self.image.clone())
            .memory_mib(self.memory_mib)
            .nano_cpus(self.nano_cpus)
            .build()
    }

    /// Session timing with the configured job bound.
    pub fn session_config(&self) -> cjbox_core::Result<SessionConfig> {
        SessionConfig::builder()
            .job_timeout(self.job_timeout)
            .build()
    }
}

/// Read `name` through `var` and parse it, `None` when unset or unparsable.
fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    var(name).and_then(|v| v.trim().parse().ok())
}
