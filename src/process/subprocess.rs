//! Workers as external commands.
//!
//! Each worker is a separate OS process running a configured command,
//! typically `redisq consume`, which builds its own receiver and connection.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::CreateProcessArgs;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SubprocessManager {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    grace_period: Duration,
}

impl SubprocessManager {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Split a whitespace-separated command line into program and arguments.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("worker command is empty".to_string()))?;
        Ok(Self::new(program).args(parts))
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// How long a worker may take to exit after SIGTERM before it is killed.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Launch the command. The receiver and handler in `args` are not
    /// shared with the child; it builds its own.
    pub fn create_process(&self, _args: CreateProcessArgs) -> Result<ChildHandle> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {}: {e}", self.program)))?;

        let id = Uuid::new_v4();
        debug!(worker = %id, pid = child.id(), program = %self.program, "worker spawned");
        Ok(ChildHandle { id, child })
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL.
    pub async fn kill_process(&self, mut handle: ChildHandle) -> Result<()> {
        let Some(pid) = handle.child.id() else {
            // Already reaped.
            return Ok(());
        };
        terminate(pid)?;

        match tokio::time::timeout(self.grace_period, handle.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(worker = %handle.id, pid, %status, "worker exited");
                Ok(())
            }
            Err(_) => {
                warn!(
                    worker = %handle.id,
                    pid,
                    grace_ms = self.grace_period.as_millis() as u64,
                    "worker ignored SIGTERM, killing"
                );
                handle
                    .child
                    .kill()
                    .await
                    .map_err(|e| Error::Process(format!("failed to kill worker {pid}: {e}")))
            }
        }
    }
}

fn terminate(pid: u32) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::Process(format!("pid {pid} out of range")))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(Error::Process(format!("failed to signal worker {pid}: {err}")))
}

pub struct ChildHandle {
    id: Uuid,
    child: Child,
}

impl ChildHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}
