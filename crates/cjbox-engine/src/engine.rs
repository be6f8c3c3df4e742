//! Container engine boundary.

use crate::config::SandboxSpec;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Engine-assigned container identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    /// Wrap an engine identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as passed to the engine.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, as shown by `docker ps`.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// One decoded frame of the combined attach stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    /// Bytes the container wrote to stdout.
    Stdout(Bytes),
    /// Bytes the container wrote to stderr.
    Stderr(Bytes),
}

/// Combined stdout/stderr stream of an attached container.
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<OutputFrame>> + Send>>;

/// Writable end of an attached container's stdin.
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Attached stdio of a running container.
///
/// Dropping `input` closes the container's stdin.
pub struct Attachment {
    /// Interleaved output frames, in the order the container produced them.
    pub output: OutputStream,
    /// Container stdin.
    pub input: InputSink,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment").finish_non_exhaustive()
    }
}

/// Listing entry returned by [`ContainerEngine::list_by_label`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container identifier.
    pub id: ContainerId,
    /// Container name, when it has one.
    pub name: Option<String>,
    /// All labels on the container.
    pub labels: HashMap<String, String>,
}

/// Operations cjbox needs from a container engine.
///
/// Implementations report a missing container as
/// [`EngineError::NotFound`](crate::EngineError::NotFound) from `stop`,
/// `remove` and `wait`, so callers can treat it as already cleaned up.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a container from `spec` without starting it.
    async fn create(&self, spec: &SandboxSpec) -> Result<ContainerId>;

    /// Start a created container.
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Attach to stdin, stdout and stderr, replaying output produced so far.
    async fn attach(&self, id: &ContainerId) -> Result<Attachment>;

    /// Block until the container is no longer running and return its exit code.
    async fn wait(&self, id: &ContainerId) -> Result<i64>;

    /// Stop the container, killing it after `grace`.
    async fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()>;

    /// Forcibly remove the container.
    async fn remove(&self, id: &ContainerId) -> Result<()>;

    /// List containers (running or not) carrying label `key=value`.
    async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<ContainerSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_display_is_short() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.to_string(), "0123456789ab");
        assert_eq!(id.as_str(), "0123456789abcdef0123");
        assert_eq!(ContainerId::new("mock-1").to_string(), "mock-1");
    }
}
