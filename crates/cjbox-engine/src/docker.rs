//! Docker implementation of [`ContainerEngine`] over bollard.

use crate::config::SandboxSpec;
use crate::engine::{Attachment, ContainerEngine, ContainerId, ContainerSummary, OutputFrame};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Container engine backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Wrap an existing bollard client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn container_config(spec: &SandboxSpec) -> Config<String> {
    let policy = &spec.policy;
    let host_config = HostConfig {
        auto_remove: Some(spec.auto_remove),
        memory: Some(policy.memory_bytes),
        nano_cpus: Some(policy.nano_cpus),
        security_opt: Some(policy.security_opt.clone()),
        ..Default::default()
    };

    Config {
        image: Some(policy.image.clone()),
        cmd: (!policy.cmd.is_empty()).then(|| policy.cmd.clone()),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(true),
        stdin_once: Some(true),
        tty: Some(false),
        labels: Some(spec.labels.clone()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create(&self, spec: &SandboxSpec) -> Result<ContainerId> {
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| EngineError::Create(e.to_string()))?;

        for warning in &response.warnings {
            tracing::warn!(container_id = %response.id, warning = %warning, "Docker create warning");
        }
        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.docker
            .start_container::<String>(id.as_str(), None)
            .await
            .map_err(|e| EngineError::Start(e.to_string()))
    }

    async fn attach(&self, id: &ContainerId) -> Result<Attachment> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };
        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(id.as_str(), Some(options))
            .await
            .map_err(|e| EngineError::Attach(e.to_string()))?;

        let output = output.filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(OutputFrame::Stdout(message)))
                }
                Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::Stderr(message))),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(EngineError::Stream(e.to_string()))),
            }
        });

        Ok(Attachment {
            output: Box::pin(output),
            input,
        })
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id.as_str(), Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) if status_code(&e) == Some(404) => {
                Err(EngineError::NotFound(id.as_str().to_string()))
            }
            Some(Err(e)) => Err(EngineError::Wait(e.to_string())),
            None => Err(EngineError::Wait("wait stream ended without a status".into())),
        }
    }

    async fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => match status_code(&e) {
                // already stopped
                Some(304) => Ok(()),
                Some(404) => Err(EngineError::NotFound(id.as_str().to_string())),
                _ => Err(EngineError::Stop(e.to_string())),
            },
        }
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => match status_code(&e) {
                Some(404) => Err(EngineError::NotFound(id.as_str().to_string())),
                // auto-removal already in progress
                Some(409) => Ok(()),
                _ => Err(EngineError::Remove(e.to_string())),
            },
        }
    }

    async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<ContainerSummary>> {
        let filters = HashMap::from([("label".to_string(), vec![format!("{key}={value}")])]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string());
                Some(ContainerSummary {
                    id: ContainerId::new(id),
                    name,
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .collect())
    }
}
