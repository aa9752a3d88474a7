//! Child test-runner process supervision
//!
//! At most one child runs at a time. Its stdout/stderr are split into lines
//! and fed to the [`RunController`]; the exit status finalizes the run.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use specdeck_common::lines::LineSplitter;
use specdeck_common::{base_url, Error, LogStream, Result, RunController, RunPlan, RunState};

use crate::config::{CommandConfig, RunnerConfig};

const READ_CHUNK: usize = 8 * 1024;

/// How long output is still drained once the child has exited. Processes the
/// child left behind may hold its pipes open indefinitely.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Handle on the live child, tagged with the run it belongs to
struct ChildHandle {
    generation: u64,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

struct Inner {
    command: CommandConfig,
    project_root: PathBuf,
    controller: Mutex<RunController>,
    child: Mutex<Option<ChildHandle>>,
}

/// Owns the run controller and the (at most one) child process.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                command: config.command.clone(),
                project_root: config.project_root.clone(),
                controller: Mutex::new(RunController::new(config.default_base_domain.clone())),
                child: Mutex::new(None),
            }),
        }
    }

    pub fn snapshot(&self) -> RunState {
        self.inner.controller.lock().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.controller.lock().is_running()
    }

    /// Start a run for `plan`.
    ///
    /// Fails with a conflict if a run is active. A child that cannot be
    /// spawned is not an error here: the run is recorded as errored and the
    /// generation is still returned.
    pub fn start(&self, plan: &RunPlan) -> Result<u64> {
        let mut controller = self.inner.controller.lock();
        let generation = controller.begin(plan)?;

        let args = self.inner.command.args_for(&plan.specs);
        let url = base_url(&plan.base_domain);
        controller.system_log(
            generation,
            format!(
                "[runner] Starting run: {} {}",
                self.inner.command.program,
                args.join(" ")
            ),
        );
        controller.system_log(generation, format!("[runner] Base URL: {url}"));

        let mut cmd = Command::new(&self.inner.command.program);
        cmd.args(&args)
            .current_dir(&self.inner.project_root)
            .envs(&self.inner.command.env)
            .env("RUNNER_TASKS", plan.task_ids.join(","))
            .env("PLAYWRIGHT_BASE_URL", &url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group so stop reaches the browsers the runner launches.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.inner.command.program, error = %e, "failed to spawn test runner");
                controller.spawn_failed(generation, &Error::Spawn(e.to_string()));
                return Ok(generation);
            }
        };

        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        *self.inner.child.lock() = Some(ChildHandle {
            generation,
            pid,
            kill: Some(kill_tx),
        });
        drop(controller);

        info!(generation, pid = ?pid, specs = %plan.spec_label(), base_url = %url, "test run started");
        tokio::spawn(supervise(self.inner.clone(), generation, child, kill_rx));
        Ok(generation)
    }

    /// Stop the active run.
    ///
    /// The state is finalized immediately; the child is signalled and its
    /// eventual exit is only logged.
    pub fn stop(&self) -> Result<()> {
        let generation = self.inner.controller.lock().stop()?;
        info!(generation, "run stopped by user");

        let mut guard = self.inner.child.lock();
        let Some(handle) = guard.as_mut().filter(|h| h.generation == generation) else {
            debug!(generation, "no child process to signal");
            return Ok(());
        };

        if !terminate(handle.pid) {
            if let Some(kill) = handle.kill.take() {
                let _ = kill.send(());
            }
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.controller.lock().clear()
    }
}

/// Send SIGTERM to the child's process group. Returns whether a signal was
/// delivered.
#[cfg(unix)]
fn terminate(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };

    match kill(Pid::from_raw(-pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(group_err) => {
            debug!(pid, error = %group_err, "process group signal failed, signalling child");
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => true,
                Err(e) => {
                    warn!(pid, error = %e, "failed to signal test runner");
                    false
                }
            }
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) -> bool {
    false
}

async fn supervise(
    inner: Arc<Inner>,
    generation: u64,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
) {
    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump(inner.clone(), generation, LogStream::Stdout, out)));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump(inner.clone(), generation, LogStream::Stderr, err)));

    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!(generation, error = %e, "failed to kill test runner");
            }
            child.wait().await
        }
    };

    // Drain remaining output before the exit is applied, but never wait on
    // pipes inherited by leftover descendants past the grace period.
    let drain_deadline = tokio::time::Instant::now() + OUTPUT_GRACE;
    for mut pump in [stdout, stderr].into_iter().flatten() {
        match tokio::time::timeout_at(drain_deadline, &mut pump).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(generation, error = %e, "output reader task failed"),
            Err(_) => {
                debug!(generation, "output still open after exit, detaching reader");
                pump.abort();
            }
        }
    }

    {
        let mut slot = inner.child.lock();
        if slot.as_ref().is_some_and(|h| h.generation == generation) {
            *slot = None;
        }
    }

    let exit_code = match status {
        Ok(status) => {
            info!(generation, status = %status, "test runner exited");
            status.code()
        }
        Err(e) => {
            warn!(generation, error = %e, "failed to wait for test runner");
            None
        }
    };
    inner.controller.lock().finish(generation, exit_code);
}

async fn pump<R>(inner: Arc<Inner>, generation: u64, stream: LogStream, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    forward(&inner, generation, stream, &line);
                }
            }
            Err(e) => {
                debug!(generation, %stream, error = %e, "output stream read failed");
                break;
            }
        }
    }

    if let Some(rest) = splitter.finish() {
        forward(&inner, generation, stream, &rest);
    }
}

fn forward(inner: &Inner, generation: u64, stream: LogStream, line: &str) {
    info!(target: "specdeck::child", %stream, "{}", line.trim_end_matches('\r'));
    inner.controller.lock().ingest(generation, stream, line);
}
