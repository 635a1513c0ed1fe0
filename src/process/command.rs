//! Child process spawning and control.
//!
//! This module provides a builder for configuring and spawning the bridged
//! CLI process, along with control methods for the running process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::classify::Mode;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The executable was not found.
    #[error("executable not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("permission denied")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Builder for configuring the bridged process launch.
#[derive(Debug, Clone)]
pub struct LaunchBuilder {
    executable: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    mode: Mode,
}

impl LaunchBuilder {
    /// Create a new builder for the given executable.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            mode: Mode::Normal,
        }
    }

    /// Set the argument list.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory for the process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the permission mode the process is launched in.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Get the executable path.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Build the command-line arguments, including the mode flag.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(flag) = self.mode.permission_flag() {
            args.push(flag.to_string());
        }
        args
    }

    /// The directory the process will run in.
    ///
    /// Defaults to the directory containing the executable when no explicit
    /// working directory was set; a bare executable name inherits the
    /// caller's directory.
    #[must_use]
    pub fn effective_working_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.working_dir {
            return Some(dir.clone());
        }
        self.executable
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }
}

/// A running bridged process with piped stdio.
#[derive(Debug)]
pub struct BridgedProcess {
    child: Child,
}

impl BridgedProcess {
    /// Spawn a process with the given builder configuration.
    ///
    /// All three stdio streams are piped: input is relayed to stdin, and
    /// stdout/stderr feed the classifier.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(builder: &LaunchBuilder) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(builder.executable());
        cmd.args(builder.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = builder.effective_working_dir() {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(SpawnError::from_io)?;

        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn terminate(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        #[cfg(unix)]
        {
            self.terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.child.kill().await?;
            Ok(self.child.try_wait()?)
        }
    }

    #[cfg(unix)]
    async fn terminate_unix(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            // Process already exited
            return Ok(self.child.try_wait()?);
        };

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        let _ = kill(nix_pid, Signal::SIGTERM);

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Ok(Some(status)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // Timeout elapsed, force kill
                self.child.kill().await?;
                Ok(self.child.try_wait()?)
            }
        }
    }
}
