//! A child process wired to the server through two non-blocking pipes.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use anyhow::{anyhow, bail, Context};
use mio::unix::pipe::{Receiver, Sender};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    ExitSuccess,
    /// Non-zero exit or killed by a signal.
    ExitFailure,
}

pub struct Subprocess {
    child: Child,
    input: Option<Sender>,
    output: Option<Receiver>,
    exit: Option<ExitStatus>,
}

impl Subprocess {
    /// Spawns `args[0]` with `args[1..]`, exactly the environment `env`,
    /// and `cwd` as working directory. Standard error is inherited.
    pub fn spawn<I, K, V>(args: &[impl AsRef<OsStr>], env: I, cwd: &Path) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let (program, rest) = args.split_first().ok_or_else(|| anyhow!("empty argument list"))?;

        let mut child = Command::new(program)
            .args(rest)
            .env_clear()
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.as_ref().to_string_lossy()))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            bail!("child pipes missing");
        };

        let process = Self {
            child,
            input: Some(Sender::from(stdin)),
            output: Some(Receiver::from(stdout)),
            exit: None,
        };
        if let Some(input) = &process.input {
            input.set_nonblocking(true).context("failed to make child stdin non-blocking")?;
        }
        if let Some(output) = &process.output {
            output.set_nonblocking(true).context("failed to make child stdout non-blocking")?;
        }

        debug!(pid = process.child.id(), "spawned child process");
        Ok(process)
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The child's stdin, until closed.
    pub fn input(&mut self) -> Option<&mut Sender> {
        self.input.as_mut()
    }

    /// The child's stdout, until closed.
    pub fn output(&mut self) -> Option<&mut Receiver> {
        self.output.as_mut()
    }

    /// Closes our end of the child's stdin, signalling end of input.
    pub fn close_input(&mut self) {
        self.input = None;
    }

    pub fn close_output(&mut self) {
        self.output = None;
    }

    /// Polls the child without blocking; the exit is remembered once seen.
    pub fn status(&mut self) -> anyhow::Result<ProcessStatus> {
        if self.exit.is_none() {
            self.exit = self
                .child
                .try_wait()
                .context("failed to query child status")?;
        }
        Ok(match self.exit {
            None => ProcessStatus::Running,
            Some(status) if status.success() => ProcessStatus::ExitSuccess,
            Some(_) => ProcessStatus::ExitFailure,
        })
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        self.input = None;
        self.output = None;
        if self.exit.is_some() {
            return;
        }
        let pid = self.child.id();
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!(pid, error = %e, "failed to kill child process");
            }
        }
        // Reap so no zombie is left behind.
        if let Err(e) = self.child.wait() {
            warn!(pid, error = %e, "failed to reap child process");
        }
    }
}
