//! Supervision of the inference server child process.
//!
//! ```text
//! NotStarted ──start──▶ Starting ──probe ok──▶ Ready ──mark_serving──▶ Serving
//!                          │                     │                       │
//!                          └──── child exits ────┴───────────────────────┴──▶ Crashed
//!
//! Starting | Ready | Serving ──stop──▶ Stopping ──▶ Stopped
//! ```
//!
//! The supervisor is shared behind an `Arc`. Locks guarding the child handle
//! are never held across an await point, so `is_alive` stays cheap while
//! `start` or `stop` are in progress.

mod launch;
mod readiness;

pub use launch::LaunchConfig;
pub use readiness::{wait_until_ready, ReadinessPolicy, ReadinessProbe};

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExitCode, Result, WorkerError};
use crate::log_relay::LogRelay;

/// How long `stop` waits for the child after a forced kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How long `stop` waits for the log relays to drain.
const RELAY_DRAIN: Duration = Duration::from_secs(2);

/// Lifecycle state of the inference server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Ready,
    Serving,
    Stopping,
    Stopped,
    Crashed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::NotStarted => "not_started",
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Serving => "serving",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Crashed => "crashed",
        }
    }

    /// Whether requests may be dispatched in this state.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServerState::Ready | ServerState::Serving)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::Crashed)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the supervised process.
#[derive(Debug, Clone)]
pub struct ServerProcess {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub exited: bool,
    pub launch: LaunchConfig,
    spawned: Instant,
}

impl ServerProcess {
    pub fn uptime(&self) -> Duration {
        self.spawned.elapsed()
    }
}

/// Non-blocking liveness check consulted before every dispatch.
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// Owns the inference server process for the lifetime of the worker.
pub struct ProcessSupervisor {
    launch: LaunchConfig,
    state: RwLock<ServerState>,
    transitions: Mutex<Vec<ServerState>>,
    child: Mutex<Option<Child>>,
    process: RwLock<Option<ServerProcess>>,
    relay: Mutex<Option<LogRelay>>,
    started: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(launch: LaunchConfig) -> Self {
        Self {
            launch,
            state: RwLock::new(ServerState::NotStarted),
            transitions: Mutex::new(vec![ServerState::NotStarted]),
            child: Mutex::new(None),
            process: RwLock::new(None),
            relay: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn launch_config(&self) -> &LaunchConfig {
        &self.launch
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Every state the supervisor has been in, oldest first.
    pub fn transitions(&self) -> Vec<ServerState> {
        self.transitions.lock().clone()
    }

    pub fn process(&self) -> Option<ServerProcess> {
        self.process.read().clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.read().as_ref().map(|p| p.pid)
    }

    fn transition(&self, next: ServerState) {
        let mut state = self.state.write();
        let previous = *state;
        if previous == next {
            return;
        }
        *state = next;
        self.transitions.lock().push(next);
        drop(state);

        info!(from = %previous, to = %next, server = %self.launch.name, "Inference server state changed");
    }

    /// Spawn the server and wait until `probe` succeeds.
    ///
    /// Must be called once, before any request is dispatched. Any error is
    /// fatal to the worker; the caller is expected to `stop` and exit.
    pub async fn start(
        &self,
        probe: &dyn ReadinessProbe,
        policy: &ReadinessPolicy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        info!(
            server = %self.launch.name,
            parallelism = ?self.launch.parallelism,
            command = %self.launch,
            "Launching inference server"
        );

        let mut child = self.spawn_child()?;
        let pid = child.id().ok_or_else(|| {
            WorkerError::Spawn(format!("spawned {} but no PID available", self.launch.name))
        })?;

        let relay = LogRelay::spawn(&self.launch.name, child.stdout.take(), child.stderr.take());
        *self.relay.lock() = Some(relay);
        *self.process.write() = Some(ServerProcess {
            pid,
            started_at: Utc::now(),
            exit_code: None,
            exited: false,
            launch: self.launch.clone(),
            spawned: Instant::now(),
        });
        *self.child.lock() = Some(child);
        self.transition(ServerState::Starting);

        info!(pid = %pid, timeout = ?policy.timeout, "Waiting for inference server to become ready");

        let result = wait_until_ready(policy, probe, || self.reap().map(|s| s.code()), cancel).await;
        match result {
            Ok(polls) => {
                self.transition(ServerState::Ready);
                info!(pid = %pid, polls = polls, "Inference server is ready");
                Ok(())
            }
            Err(e @ WorkerError::ServerCrashedDuringStartup { .. }) => {
                self.transition(ServerState::Crashed);
                error!(pid = %pid, error = %e, "Inference server exited during startup");
                Err(e)
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Inference server did not become ready");
                Err(e)
            }
        }
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.launch.executable);
        cmd.args(&self.launch.args);

        if let Some(ref dir) = self.launch.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.launch.env {
            cmd.env(key, value);
        }

        // The handle is the last line of defence if the worker unwinds.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| {
            WorkerError::Spawn(format!(
                "failed to spawn {} ({}): {}",
                self.launch.name,
                self.launch.executable.display(),
                e
            ))
        })
    }

    /// Poll the child without blocking. Returns its exit status once it has exited.
    fn reap(&self) -> Option<ExitStatus> {
        let status = {
            let mut guard = self.child.lock();
            let child = guard.as_mut()?;
            match child.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    warn!(error = %e, "Failed to poll inference server status");
                    None
                }
            }
        }?;
        self.record_exit(status);
        Some(status)
    }

    fn record_exit(&self, status: ExitStatus) {
        if let Some(process) = self.process.write().as_mut() {
            if !process.exited {
                process.exited = true;
                process.exit_code = status.code();
            }
        }
    }

    /// Whether the server is ready and its process has not exited.
    ///
    /// Only consults the OS, never the HTTP endpoint. An exit observed while
    /// ready or serving moves the supervisor to `Crashed`.
    pub fn is_alive(&self) -> bool {
        if !self.state().accepts_requests() {
            return false;
        }
        match self.reap() {
            None => self.child.lock().is_some(),
            Some(status) => {
                let was_serving = {
                    let state = self.state();
                    state.accepts_requests()
                };
                if was_serving {
                    self.transition(ServerState::Crashed);
                    error!(
                        pid = ?self.pid(),
                        status = %ExitCode(&status.code()),
                        "Inference server exited unexpectedly"
                    );
                }
                false
            }
        }
    }

    /// `Ready → Serving` once the worker starts taking jobs.
    pub fn mark_serving(&self) {
        let mut state = self.state.write();
        if *state == ServerState::Ready {
            *state = ServerState::Serving;
            self.transitions.lock().push(ServerState::Serving);
            drop(state);
            info!(server = %self.launch.name, "Inference server is serving requests");
        }
    }

    /// Terminate the child: SIGTERM, wait up to `timeout`, then SIGKILL.
    ///
    /// Idempotent and bounded. Calling it with no process, or after it has
    /// already stopped or crashed, only releases the handle.
    pub async fn stop(&self, timeout: Duration) {
        let Some(mut child) = self.child.lock().take() else {
            debug!("Stop requested with no inference server process");
            return;
        };
        let relay = self.relay.lock().take();

        if self.state() == ServerState::Crashed {
            debug!("Inference server already crashed; releasing handle");
            drain(relay).await;
            return;
        }

        let pid = self.pid();
        if let Ok(Some(status)) = child.try_wait() {
            self.record_exit(status);
            // Exited before we signalled it: nobody asked it to stop.
            if matches!(
                self.state(),
                ServerState::Starting | ServerState::Ready | ServerState::Serving
            ) {
                self.transition(ServerState::Crashed);
                error!(
                    pid = ?pid,
                    status = %ExitCode(&status.code()),
                    "Inference server exited unexpectedly before shutdown"
                );
            } else {
                info!(pid = ?pid, status = %ExitCode(&status.code()), "Inference server had already exited");
                self.transition(ServerState::Stopped);
            }
            drain(relay).await;
            return;
        }

        self.transition(ServerState::Stopping);
        info!(pid = ?pid, timeout = ?timeout, "Stopping inference server");
        terminate(&mut child, pid);

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                self.record_exit(status);
                info!(pid = ?pid, status = %ExitCode(&status.code()), "Inference server stopped");
            }
            Ok(Err(e)) => {
                warn!(pid = ?pid, error = %e, "Error waiting for inference server");
            }
            Err(_) => {
                warn!(pid = ?pid, "Inference server ignored SIGTERM for {:?}; killing", timeout);
                kill_child(&mut child);
                match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                    Ok(Ok(status)) => self.record_exit(status),
                    Ok(Err(e)) => warn!(pid = ?pid, error = %e, "Error waiting for killed inference server"),
                    Err(_) => warn!(pid = ?pid, "Inference server still running after kill"),
                }
            }
        }

        self.transition(ServerState::Stopped);
        drain(relay).await;
    }
}

impl Liveness for ProcessSupervisor {
    fn is_alive(&self) -> bool {
        ProcessSupervisor::is_alive(self)
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("name", &self.launch.name)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

/// Ask the child to shut down gracefully.
#[cfg(unix)]
fn terminate(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // PIDs are always positive and fit in i32 on Unix
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()).filter(|&p| p > 0) else {
        kill_child(child);
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e != nix::errno::Errno::ESRCH {
            warn!(pid = %pid, error = %e, "Failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _pid: Option<u32>) {
    kill_child(child);
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(pid = ?child.id(), error = %e, "Failed to send kill signal");
    }
}

async fn drain(relay: Option<LogRelay>) {
    if let Some(relay) = relay {
        if let Some(lines) = relay.join(RELAY_DRAIN).await {
            debug!(lines = lines, "Inference server output drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ServerState::Ready.accepts_requests());
        assert!(ServerState::Serving.accepts_requests());
        assert!(!ServerState::Starting.accepts_requests());
        assert!(!ServerState::Crashed.accepts_requests());
        assert!(ServerState::Stopped.is_terminal());
        assert!(!ServerState::Stopping.is_terminal());
        assert_eq!(ServerState::NotStarted.to_string(), "not_started");
    }

    #[test]
    fn test_new_supervisor_is_idle() {
        let supervisor = ProcessSupervisor::new(LaunchConfig::new("idle", "true"));
        assert_eq!(supervisor.state(), ServerState::NotStarted);
        assert_eq!(supervisor.transitions(), vec![ServerState::NotStarted]);
        assert!(!supervisor.is_alive());
        assert!(supervisor.process().is_none());
    }

    #[test]
    fn test_mark_serving_requires_ready() {
        let supervisor = ProcessSupervisor::new(LaunchConfig::new("idle", "true"));
        supervisor.mark_serving();
        assert_eq!(supervisor.state(), ServerState::NotStarted);
    }

    #[tokio::test]
    async fn test_stop_without_process_is_noop() {
        let supervisor = ProcessSupervisor::new(LaunchConfig::new("idle", "true"));
        supervisor.stop(Duration::from_secs(1)).await;
        supervisor.stop(Duration::from_secs(1)).await;
        assert_eq!(supervisor.state(), ServerState::NotStarted);
    }

    #[tokio::test]
    async fn test_kill_after_exit_is_reported_not_raised() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();
        // Killing a reaped child fails; the failure is logged and swallowed.
        assert!(child.start_kill().is_err());
        kill_child(&mut child);
    }
}
