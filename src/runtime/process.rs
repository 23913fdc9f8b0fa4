use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Everything needed to launch a child process.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub env: FxHashMap<String, String>,
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
}

impl SpawnRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Rough command line for events and capability checks.
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Signals the executor can deliver during cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// Polite request; the grace window runs after this.
    Term,
    /// Forced kill once the grace window expires.
    Kill,
}

/// Handle to a running child.
///
/// Stdout/stderr readers are taken once; the executor drains them
/// concurrently with `wait` to avoid pipe deadlocks.
#[async_trait]
pub trait ChildHandle: Send {
    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>>;
    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>>;
    async fn wait(&mut self) -> io::Result<ExitStatus>;
    fn kill(&mut self, signal: KillSignal) -> io::Result<()>;
    fn id(&self) -> Option<u32>;
}

/// Process launcher abstraction.
#[async_trait]
pub trait ProcessSpawner: Send + Sync + std::fmt::Debug {
    async fn spawn(&self, request: SpawnRequest) -> io::Result<Box<dyn ChildHandle>>;
}

/// Real spawner on `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

#[async_trait]
impl ProcessSpawner for TokioSpawner {
    async fn spawn(&self, request: SpawnRequest) -> io::Result<Box<dyn ChildHandle>> {
        let mut cmd = tokio::process::Command::new(&request.command);
        cmd.args(&request.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn()?;

        if let Some(input) = request.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // Write stdin in a detached task; closing the pipe signals EOF.
                tokio::spawn(async move {
                    let _ = stdin.write_all(input.as_bytes()).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        Ok(Box::new(TokioChild { child }))
    }
}

struct TokioChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildHandle for TokioChild {
    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        Ok(ExitStatus {
            code: status.code().unwrap_or(-1),
        })
    }

    fn kill(&mut self, signal: KillSignal) -> io::Result<()> {
        match signal {
            KillSignal::Term => {
                #[cfg(unix)]
                if let Some(pid) = self.child.id() {
                    // SAFETY: plain kill(2) on a pid we own; no memory involved.
                    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                    if rc != 0 {
                        return Err(io::Error::last_os_error());
                    }
                    return Ok(());
                }
                self.child.start_kill()
            }
            KillSignal::Kill => self.child.start_kill(),
        }
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Canned response a [`MockSpawner`] returns for one spawn.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit: i32,
}

impl MockResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit: 0,
        }
    }

    pub fn failing(exit: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit,
        }
    }
}

type MockHandler = dyn Fn(&SpawnRequest) -> MockResponse + Send + Sync;

/// Test spawner: answers every request through a handler closure and keeps
/// a record of the requests it saw.
pub struct MockSpawner {
    handler: Box<MockHandler>,
    requests: ParkingMutex<Vec<SpawnRequest>>,
}

impl std::fmt::Debug for MockSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSpawner")
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}

impl MockSpawner {
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&SpawnRequest) -> MockResponse + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: ParkingMutex::new(Vec::new()),
        }
    }

    /// Spawner that answers every request with the same stdout and exit 0.
    pub fn always(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self::with_handler(move |_| MockResponse::ok(stdout.clone()))
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ProcessSpawner for MockSpawner {
    async fn spawn(&self, request: SpawnRequest) -> io::Result<Box<dyn ChildHandle>> {
        let response = (self.handler)(&request);
        self.requests.lock().push(request);
        Ok(Box::new(MockChild {
            stdout: Some(response.stdout),
            stderr: Some(response.stderr),
            exit: response.exit,
            killed: false,
        }))
    }
}

/// Child handle produced by [`MockSpawner`].
pub struct MockChild {
    stdout: Option<String>,
    stderr: Option<String>,
    exit: i32,
    killed: bool,
}

#[async_trait]
impl ChildHandle for MockChild {
    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.stdout
            .take()
            .map(|s| Box::new(std::io::Cursor::new(s.into_bytes())) as _)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.stderr
            .take()
            .map(|s| Box::new(std::io::Cursor::new(s.into_bytes())) as _)
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        Ok(ExitStatus {
            code: if self.killed { -9 } else { self.exit },
        })
    }

    fn kill(&mut self, _signal: KillSignal) -> io::Result<()> {
        self.killed = true;
        Ok(())
    }

    fn id(&self) -> Option<u32> {
        None
    }
}
