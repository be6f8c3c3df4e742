//! In-memory container engine for tests.
//!
//! Each started container runs a scripted behaviour on the tokio runtime. The
//! behaviour reads the container's stdin, writes output frames and returns an
//! exit code. Output is buffered until somebody attaches, mirroring Docker's log
//! replay.

use crate::config::SandboxSpec;
use crate::engine::{Attachment, ContainerEngine, ContainerId, ContainerSummary, OutputFrame};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Exit code reported for containers killed by `stop`.
pub const KILLED_EXIT_CODE: i64 = 137;

const STDIN_BUFFER: usize = 64 * 1024;

type Behaviour = Arc<dyn Fn(MockProcess) -> BoxFuture<'static, i64> + Send + Sync>;

/// Lifecycle step a [`MockEngine`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    /// `create` returns [`EngineError::Create`].
    Create,
    /// `start` returns [`EngineError::Start`].
    Start,
    /// `attach` returns [`EngineError::Attach`].
    Attach,
}

/// Output side of a mock container.
#[derive(Clone)]
pub struct MockOutput {
    tx: mpsc::UnboundedSender<OutputFrame>,
}

impl MockOutput {
    /// Write bytes to stdout.
    pub fn stdout(&self, data: impl Into<Bytes>) {
        let _ = self.tx.send(OutputFrame::Stdout(data.into()));
    }

    /// Write bytes to stderr.
    pub fn stderr(&self, data: impl Into<Bytes>) {
        let _ = self.tx.send(OutputFrame::Stderr(data.into()));
    }
}

/// The inside of a mock container, handed to its behaviour.
///
/// Output ends once every [`MockOutput`] handle is dropped.
pub struct MockProcess {
    /// Container side of stdin. Reads return EOF once the host closes it.
    pub stdin: DuplexStream,
    output: MockOutput,
    spec: SandboxSpec,
}

impl MockProcess {
    /// Write bytes to stdout.
    pub fn stdout(&self, data: impl Into<Bytes>) {
        self.output.stdout(data);
    }

    /// Write bytes to stderr.
    pub fn stderr(&self, data: impl Into<Bytes>) {
        self.output.stderr(data);
    }

    /// Spec the container was created from.
    pub fn spec(&self) -> &SandboxSpec {
        &self.spec
    }

    /// Separate stdin from the output handle so both can be used at once.
    pub fn split(self) -> (DuplexStream, MockOutput) {
        (self.stdin, self.output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockState {
    Created,
    Running,
    Exited,
}

struct MockContainer {
    spec: SandboxSpec,
    state: MockState,
    exit: watch::Sender<Option<i64>>,
    process: Option<MockProcess>,
    stdio: Option<(DuplexStream, mpsc::UnboundedReceiver<OutputFrame>)>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, MockContainer>,
    created: Vec<SandboxSpec>,
    removals: usize,
    next_id: u64,
}

/// Scriptable in-memory [`ContainerEngine`].
///
/// ```
/// use cjbox_engine::MockEngine;
///
/// // every container exits immediately with code 0
/// let engine = MockEngine::new(|_process| async { 0 });
/// assert_eq!(engine.container_count(), 0);
/// ```
#[derive(Clone)]
pub struct MockEngine {
    inner: Arc<Mutex<Inner>>,
    behaviour: Behaviour,
    fail_at: Option<FailAt>,
}

impl MockEngine {
    /// Engine whose containers run `behaviour` when started.
    pub fn new<F, Fut>(behaviour: F) -> Self
    where
        F: Fn(MockProcess) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = i64> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            behaviour: Arc::new(move |process| Box::pin(behaviour(process))),
            fail_at: None,
        }
    }

    /// Make one lifecycle step fail for every container.
    pub fn failing_at(mut self, step: FailAt) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Containers that currently exist (not yet removed).
    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Number of containers removed, explicitly or by auto-removal.
    pub fn removals(&self) -> usize {
        self.lock().removals
    }

    /// Specs of every successful `create`, in order.
    pub fn created_specs(&self) -> Vec<SandboxSpec> {
        self.lock().created.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    fn fails_at(&self, step: FailAt) -> bool {
        self.fail_at == Some(step)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // a panicking behaviour must not wedge the engine for later assertions
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Record an exit and apply auto-removal.
fn finish(inner: &Mutex<Inner>, id: &str, code: i64) {
    let mut inner = lock(inner);
    let Some(container) = inner.containers.get_mut(id) else {
        return;
    };
    if container.state != MockState::Running {
        return;
    }
    container.state = MockState::Exited;
    container.exit.send_replace(Some(code));
    if container.spec.auto_remove {
        inner.containers.remove(id);
        inner.removals += 1;
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn create(&self, spec: &SandboxSpec) -> Result<ContainerId> {
        if self.fails_at(FailAt::Create) {
            return Err(EngineError::Create("mock: create refused".into()));
        }
        let mut inner = self.lock();
        if let Some(name) = &spec.name {
            if inner
                .containers
                .values()
                .any(|c| c.spec.name.as_ref() == Some(name))
            {
                return Err(EngineError::Create(format!("mock: name {name} in use")));
            }
        }

        inner.next_id += 1;
        let id = format!("mock-{}", inner.next_id);

        let (host_stdin, container_stdin) = tokio::io::duplex(STDIN_BUFFER);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit, _) = watch::channel(None);

        inner.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                state: MockState::Created,
                exit,
                process: Some(MockProcess {
                    stdin: container_stdin,
                    output: MockOutput { tx: output_tx },
                    spec: spec.clone(),
                }),
                stdio: Some((host_stdin, output_rx)),
                task: None,
            },
        );
        inner.created.push(spec.clone());
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        if self.fails_at(FailAt::Start) {
            return Err(EngineError::Start("mock: start refused".into()));
        }
        let mut inner = self.lock();
        let container = inner
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::NotFound(id.as_str().to_string()))?;
        let process = container
            .process
            .take()
            .ok_or_else(|| EngineError::Start("mock: already started".into()))?;
        container.state = MockState::Running;

        let run = (self.behaviour)(process);
        let shared = Arc::clone(&self.inner);
        let key = id.as_str().to_string();
        container.task = Some(tokio::spawn(async move {
            let code = run.await;
            finish(&shared, &key, code);
        }));
        Ok(())
    }

    async fn attach(&self, id: &ContainerId) -> Result<Attachment> {
        if self.fails_at(FailAt::Attach) {
            return Err(EngineError::Attach("mock: attach refused".into()));
        }
        let mut inner = self.lock();
        let container = inner
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::NotFound(id.as_str().to_string()))?;
        let (input, output) = container
            .stdio
            .take()
            .ok_or_else(|| EngineError::Attach("mock: already attached".into()))?;

        let output = futures::stream::unfold(output, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        Ok(Attachment {
            output: Box::pin(output),
            input: Box::pin(input),
        })
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        let mut exit = {
            let inner = self.lock();
            inner
                .containers
                .get(id.as_str())
                .ok_or_else(|| EngineError::NotFound(id.as_str().to_string()))?
                .exit
                .subscribe()
        };
        let code = *exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::NotFound(id.as_str().to_string()))?;
        Ok(code.unwrap_or(KILLED_EXIT_CODE))
    }

    async fn stop(&self, id: &ContainerId, _grace: Duration) -> Result<()> {
        let mut inner = self.lock();
        let container = inner
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::NotFound(id.as_str().to_string()))?;
        if container.state != MockState::Running {
            return Ok(());
        }
        if let Some(task) = container.task.take() {
            task.abort();
        }
        container.state = MockState::Exited;
        container.exit.send_replace(Some(KILLED_EXIT_CODE));
        if container.spec.auto_remove {
            inner.containers.remove(id.as_str());
            inner.removals += 1;
        }
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let mut inner = self.lock();
        let container = inner
            .containers
            .remove(id.as_str())
            .ok_or_else(|| EngineError::NotFound(id.as_str().to_string()))?;
        if let Some(task) = container.task {
            task.abort();
        }
        inner.removals += 1;
        Ok(())
    }

    async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<ContainerSummary>> {
        let inner = self.lock();
        let mut found: Vec<_> = inner
            .containers
            .iter()
            .filter(|(_, c)| c.spec.labels.get(key).map(String::as_str) == Some(value))
            .map(|(id, c)| ContainerSummary {
                id: ContainerId::new(id.clone()),
                name: c.spec.name.clone(),
                labels: c.spec.labels.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(found)
    }
}
