//! Launching and supervising the Alloy language server process.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use alloy_config::ServerConfig;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("could not find `{runtime}` on PATH: {source}")]
    RuntimeNotFound {
        runtime: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    /// Message suitable for the editor's notification area.
    pub fn user_message(&self) -> String {
        match self {
            SupervisorError::RuntimeNotFound { runtime, .. } => format!(
                "Could not start the Alloy language server: `{runtime}` was not found. \
                 Make sure a Java runtime is installed and on your PATH."
            ),
            SupervisorError::Spawn { program, source } => format!(
                "Could not start `{program}` ({source}). \
                 Make sure a Java runtime is installed and on your PATH."
            ),
        }
    }
}

/// How the process ended once the session let go of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before termination was requested.
    AlreadyExited(Option<ExitStatus>),
    /// The process exited on its own within the grace period.
    Exited(ExitStatus),
    /// The grace period elapsed and the process was killed.
    Killed,
}

/// Starts something that ends up connecting to the session port.
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, port: u16) -> Result<ServerProcess, SupervisorError>;
}

/// Opens the standalone Alloy editor outside of any session.
pub trait StandaloneEditor: Send + Sync + 'static {
    fn open(&self, file: Option<&Path>) -> Result<(), SupervisorError>;
}

/// `<runtime> -jar <archive> ...` invocations of the Alloy distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarCommand {
    pub runtime: String,
    pub jar: PathBuf,
}

impl JarCommand {
    pub fn new(runtime: impl Into<String>, jar: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            jar: jar.into(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.runtime.clone(), config.jar.clone())
    }

    pub fn language_server_args(&self, port: u16) -> Vec<OsString> {
        vec![
            "-jar".into(),
            self.jar.clone().into_os_string(),
            "ls".into(),
            port.to_string().into(),
        ]
    }

    pub fn standalone_editor_args(&self, file: Option<&Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-jar".into(), self.jar.clone().into_os_string()];
        if let Some(file) = file {
            args.push(file.as_os_str().to_owned());
        }
        args
    }

    fn resolve_runtime(&self) -> Result<PathBuf, SupervisorError> {
        which::which(&self.runtime).map_err(|source| SupervisorError::RuntimeNotFound {
            runtime: self.runtime.clone(),
            source,
        })
    }

    /// Launch the Alloy GUI, independent of any session.
    pub fn spawn_standalone_editor(&self, file: Option<&Path>) -> Result<(), SupervisorError> {
        let runtime = self.resolve_runtime()?;
        let mut command = Command::new(&runtime);
        command
            .args(self.standalone_editor_args(file))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: runtime.display().to_string(),
            source,
        })?;
        info!(pid = child.id(), file = ?file, "standalone Alloy editor started");
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("standalone Alloy editor exited with {}", describe_exit(&status)),
                Err(err) => warn!("failed to wait for the standalone Alloy editor: {err}"),
            }
        });
        Ok(())
    }
}

impl StandaloneEditor for JarCommand {
    fn open(&self, file: Option<&Path>) -> Result<(), SupervisorError> {
        self.spawn_standalone_editor(file)
    }
}

impl Launcher for JarCommand {
    fn launch(&self, port: u16) -> Result<ServerProcess, SupervisorError> {
        let runtime = self.resolve_runtime()?;
        let mut command = Command::new(&runtime);
        command.args(self.language_server_args(port));
        ServerProcess::spawn(command)
    }
}

/// The supervised language server process.
///
/// Consumed by [`ServerProcess::terminate`], so it is terminated at most once. Dropping
/// it without terminating kills the process.
pub struct ServerProcess {
    pid: Option<u32>,
    terminate: Option<oneshot::Sender<Duration>>,
    monitor: JoinHandle<Termination>,
}

impl ServerProcess {
    /// Spawn `command` with piped output and start supervising it.
    pub fn spawn(mut command: Command) -> Result<Self, SupervisorError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program: program.clone(), source })?;
        let pid = child.id();
        info!(pid, %program, "language server process started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, true));
        }

        let (terminate_tx, terminate_rx) = oneshot::channel();
        let monitor = tokio::spawn(supervise(child, terminate_rx));
        Ok(Self {
            pid,
            terminate: Some(terminate_tx),
            monitor,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.monitor.is_finished()
    }

    /// Give the process `grace` to exit on its own, then kill it.
    pub async fn terminate(mut self, grace: Duration) -> Termination {
        if let Some(terminate) = self.terminate.take() {
            // Fails only when the monitor already observed the exit.
            let _ = terminate.send(grace);
        }
        match (&mut self.monitor).await {
            Ok(termination) => termination,
            Err(err) => {
                warn!("language server monitor failed: {err}");
                Termination::Killed
            }
        }
    }
}

async fn supervise(mut child: Child, terminate: oneshot::Receiver<Duration>) -> Termination {
    tokio::select! {
        status = child.wait() => {
            let status = match status {
                Ok(status) => {
                    info!("language server process exited with {}", describe_exit(&status));
                    Some(status)
                }
                Err(err) => {
                    warn!("failed to wait for the language server process: {err}");
                    None
                }
            };
            Termination::AlreadyExited(status)
        }
        grace = terminate => {
            let grace = grace.unwrap_or_default();
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("language server process exited with {}", describe_exit(&status));
                    Termination::Exited(status)
                }
                Ok(Err(err)) => {
                    warn!("failed to wait for the language server process: {err}");
                    force_kill(&mut child).await
                }
                Err(_) => {
                    warn!(?grace, "language server did not exit in time, killing it");
                    force_kill(&mut child).await
                }
            }
        }
    }
}

async fn force_kill(child: &mut Child) -> Termination {
    if let Err(err) = child.kill().await {
        warn!("failed to kill the language server process: {err}");
    }
    Termination::Killed
}

async fn forward_lines<R>(stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(target: "alloy::server", "Server err: {line}"),
            Ok(Some(line)) => info!(target: "alloy::server", "Server: {line}"),
            Ok(None) => break,
            Err(err) => {
                debug!("stopped reading language server output: {err}");
                break;
            }
        }
    }
}

pub fn describe_exit(status: &ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return match status.code() {
                Some(code) => format!("code {code} (signal {signal})"),
                None => format!("signal {signal}"),
            };
        }
    }
    match status.code() {
        Some(code) => format!("code {code}"),
        None => "an unknown status".to_string(),
    }
}
