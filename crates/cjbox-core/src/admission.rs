//! Host resource admission.
//!
//! Every job and session passes through [`AdmissionGate::admit`] before a
//! sandbox is created. Checks are serialized so concurrent requests each see a
//! consistent memory snapshot.

use crate::error::{CoreError, Result};
use std::sync::{Arc, Mutex};
use sysinfo::System;

/// Default minimum available host memory (512 MiB).
pub const DEFAULT_MIN_AVAILABLE_BYTES: u64 = 512 * 1024 * 1024;

/// Source of the host's available memory.
pub trait MemoryProbe: Send + Sync {
    /// Available memory in bytes.
    fn available_bytes(&self) -> Result<u64>;
}

/// Probe reading `/proc/meminfo` (or the platform equivalent) through sysinfo.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    /// Create a probe.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn available_bytes(&self) -> Result<u64> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| CoreError::Probe("probe state poisoned".into()))?;
        system.refresh_memory();
        // sysinfo reports zeros when the platform source is unreadable
        if system.total_memory() == 0 {
            return Err(CoreError::Probe("host memory information unavailable".into()));
        }
        Ok(system.available_memory())
    }
}

/// Probe returning a fixed value, or failing.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(Option<u64>);

impl StaticProbe {
    /// Always report `bytes` available.
    pub fn new(bytes: u64) -> Self {
        Self(Some(bytes))
    }

    /// Always fail to read.
    pub fn failing() -> Self {
        Self(None)
    }
}

impl MemoryProbe for StaticProbe {
    fn available_bytes(&self) -> Result<u64> {
        self.0
            .ok_or_else(|| CoreError::Probe("static probe configured to fail".into()))
    }
}

/// Serialized host memory check.
pub struct AdmissionGate {
    probe: Arc<dyn MemoryProbe>,
    min_available_bytes: u64,
    lock: tokio::sync::Mutex<()>,
}

impl AdmissionGate {
    /// Gate rejecting requests while less than `min_available_bytes` is free.
    pub fn new(probe: Arc<dyn MemoryProbe>, min_available_bytes: u64) -> Self {
        Self {
            probe,
            min_available_bytes,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Threshold in bytes.
    pub fn min_available_bytes(&self) -> u64 {
        self.min_available_bytes
    }

    /// Admit or reject one request.
    ///
    /// # Errors
    /// [`CoreError::Rejected`] when memory is short or cannot be read.
    pub async fn admit(&self) -> Result<()> {
        let _guard = self.lock.lock().await;

        let available = match self.probe.available_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Memory probe failed, rejecting");
                return Err(CoreError::Rejected(format!("cannot read host memory: {e}")));
            }
        };

        if available < self.min_available_bytes {
            tracing::warn!(
                available_mib = available / (1024 * 1024),
                required_mib = self.min_available_bytes / (1024 * 1024),
                "Insufficient host memory, rejecting"
            );
            return Err(CoreError::Rejected("insufficient system memory".into()));
        }

        tracing::trace!(available_mib = available / (1024 * 1024), "Admitted");
        Ok(())
    }
}
