//! Sandbox policy and per-sandbox container specs.

use crate::error::{EngineError, Result};
use std::collections::HashMap;

/// Label marking every container created by cjbox.
pub const MANAGED_BY_LABEL: &str = "managed-by";
/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "cjbox";
/// Label carrying the session that owns a container.
pub const SESSION_LABEL: &str = "cjbox.session";

/// Deployment-wide limits applied to every sandbox.
///
/// Read once at start-up; clients never influence these values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    /// Image reference (default: `cangjie`).
    pub image: String,
    /// Command override. Empty uses the image's entrypoint.
    pub cmd: Vec<String>,
    /// Memory ceiling in bytes (default: 512 MiB).
    pub memory_bytes: i64,
    /// CPU share in units of 1e-9 CPUs (default: one CPU).
    pub nano_cpus: i64,
    /// Docker security options (default: `no-new-privileges`).
    pub security_opt: Vec<String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            image: "cangjie".into(),
            cmd: Vec::new(),
            memory_bytes: 512 * 1024 * 1024,
            nano_cpus: 1_000_000_000,
            security_opt: vec!["no-new-privileges".into()],
        }
    }
}

impl SandboxPolicy {
    /// Create a new policy builder.
    pub fn builder() -> SandboxPolicyBuilder {
        SandboxPolicyBuilder::default()
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(EngineError::Config("image is required".into()));
        }
        // Docker refuses memory limits below 6 MiB
        if self.memory_bytes < 6 * 1024 * 1024 {
            return Err(EngineError::Config("memory_bytes must be >= 6 MiB".into()));
        }
        if self.nano_cpus <= 0 {
            return Err(EngineError::Config("nano_cpus must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for SandboxPolicy.
#[derive(Debug, Default)]
pub struct SandboxPolicyBuilder {
    policy: SandboxPolicy,
}

impl SandboxPolicyBuilder {
    /// Set the image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.policy.image = image.into();
        self
    }

    /// Override the container command.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Set the memory ceiling in MiB.
    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.policy.memory_bytes = i64::from(mib) * 1024 * 1024;
        self
    }

    /// Set the CPU share in nano CPUs.
    pub fn nano_cpus(mut self, nano_cpus: i64) -> Self {
        self.policy.nano_cpus = nano_cpus;
        self
    }

    /// Add a security option.
    pub fn security_opt(mut self, opt: impl Into<String>) -> Self {
        self.policy.security_opt.push(opt.into());
        self
    }

    /// Build the policy, validating all fields.
    pub fn build(self) -> Result<SandboxPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Everything the engine needs to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Limits shared by all sandboxes.
    pub policy: SandboxPolicy,
    /// Container name. `None` lets the engine pick one.
    pub name: Option<String>,
    /// Remove the container as soon as it exits.
    pub auto_remove: bool,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

impl SandboxSpec {
    /// Spec for a sandbox owned by `session`, carrying the cjbox labels.
    pub fn new(policy: SandboxPolicy, session: impl Into<String>) -> Self {
        let labels = HashMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (SESSION_LABEL.to_string(), session.into()),
        ]);
        Self {
            policy,
            name: None,
            auto_remove: false,
            labels,
        }
    }

    /// Give the container a name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Remove the container on exit.
    pub fn auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    /// Session label value.
    pub fn session(&self) -> Option<&str> {
        self.labels.get(SESSION_LABEL).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = SandboxPolicy::default();
        assert_eq!(policy.image, "cangjie");
        assert_eq!(policy.memory_bytes, 536_870_912);
        assert_eq!(policy.nano_cpus, 1_000_000_000);
        assert_eq!(policy.security_opt, vec!["no-new-privileges".to_string()]);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_builder_validation() {
        assert!(SandboxPolicy::builder().image(" ").build().is_err());
        assert!(SandboxPolicy::builder().memory_mib(1).build().is_err());
        assert!(SandboxPolicy::builder().nano_cpus(0).build().is_err());

        let policy = SandboxPolicy::builder()
            .image("cangjie:0.53")
            .memory_mib(256)
            .cmd(["cjbox-agent"])
            .build()
            .expect("should build successfully");
        assert_eq!(policy.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(policy.cmd, vec!["cjbox-agent".to_string()]);
    }

    #[test]
    fn test_spec_labels() {
        let spec = SandboxSpec::new(SandboxPolicy::default(), "abc")
            .named("cangjie-lsp-x")
            .auto_remove(true);
        assert_eq!(spec.session(), Some("abc"));
        assert_eq!(
            spec.labels.get(MANAGED_BY_LABEL).map(String::as_str),
            Some(MANAGED_BY_VALUE)
        );
        assert_eq!(spec.name.as_deref(), Some("cangjie-lsp-x"));
        assert!(spec.auto_remove);
    }
}
