use std::borrow::Cow;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::sink::LogSink;

/// Exit code reported when the external program could not be launched
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// Exit code reported when waiting on a launched program failed
pub const WAIT_FAILED_EXIT_CODE: i32 = -2;

/// Default time allowed for output readers to finish after the program exits
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for launching the external program
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// How long to keep reading output after the program exits. Descendants
    /// that inherited the pipes can hold them open past this point.
    pub drain_grace: Duration,
}

impl JobSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// How a job ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The process exited on its own with a status code
    Exited { code: i32 },
    /// The process was terminated by a signal (unix only)
    Signalled { signal: i32 },
    /// The process was never started
    SpawnFailed,
    /// The process started but its exit status could not be collected
    WaitFailed,
}

impl JobOutcome {
    /// Exit code as reported through the status snapshot.
    ///
    /// Signals map to `128 + signal`, so real outcomes are never negative and
    /// the sentinel codes stay distinct.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Self::Exited { code } => code,
            Self::Signalled { signal } => 128 + signal,
            Self::SpawnFailed => SPAWN_FAILED_EXIT_CODE,
            Self::WaitFailed => WAIT_FAILED_EXIT_CODE,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

impl From<ExitStatus> for JobOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited { code };
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signalled { signal };
            }
        }
        // Neither a code nor a signal: treat as a generic failure
        Self::Exited { code: 1 }
    }
}

/// Which output stream a line came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Messages that can be sent to a running job
#[derive(Debug)]
pub(crate) enum JobMessage {
    /// Ask the process to exit. Advisory: the process may ignore it.
    Terminate,
}

/// One launched external process and the tasks relaying its output
pub struct JobProcess {
    child: Child,
    pid: Option<u32>,
    readers: Vec<JoinHandle<()>>,
    drain_grace: Duration,
}

impl JobProcess {
    /// Launch the program with stdout and stderr captured line by line into `sink`
    pub fn spawn(spec: &JobSpec, sink: Arc<LogSink>) -> Result<Self, SupervisorError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so termination also reaches background descendants
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &spec.working_dir {
            debug!("Setting working directory: {}", dir.display());
            cmd.current_dir(dir);
        }

        info!(
            "Spawning job command: {} with args: {:?}",
            spec.program, spec.args
        );

        let mut child = cmd.spawn().map_err(|source| {
            error!("Failed to spawn command '{}': {}", spec.program, source);
            SupervisorError::SpawnFailed {
                program: spec.program.clone(),
                source,
            }
        })?;

        let pid = child.id();
        info!("Job process started with PID: {:?}", pid);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(relay_lines(
                stdout,
                StreamKind::Stdout,
                sink.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(relay_lines(stderr, StreamKind::Stderr, sink)));
        }

        Ok(Self {
            child,
            pid,
            readers,
            drain_grace: spec.drain_grace,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the job to exit.
    ///
    /// On unix this sends SIGTERM to the job's process group, so descendants
    /// that outlived the program are included. Elsewhere it is a forced kill of
    /// the program itself. A no-op once nothing is left to signal.
    pub fn terminate(&mut self) -> Result<(), SupervisorError> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            let Some(pgid) = self.pid else {
                return Ok(());
            };
            return match killpg(Pid::from_raw(pgid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(SupervisorError::Signal(format!(
                    "SIGTERM to process group {}: {}",
                    pgid, e
                ))),
            };
        }
        #[cfg(not(unix))]
        {
            if self.child.id().is_none() {
                return Ok(());
            }
            return self
                .child
                .start_kill()
                .map_err(|e| SupervisorError::Signal(e.to_string()));
        }
    }

    fn handle(&mut self, msg: JobMessage) {
        match msg {
            JobMessage::Terminate => {
                info!("Sending termination request to PID {:?}", self.pid);
                if let Err(e) = self.terminate() {
                    warn!("Failed to terminate PID {:?}: {}", self.pid, e);
                }
            }
        }
    }

    /// Wait for exit, then for both readers to drain their streams
    pub async fn wait(self) -> JobOutcome {
        let (_tx, rx) = mpsc::unbounded_channel();
        self.run(rx).await
    }

    /// Drive the process to completion, honoring termination requests on the way.
    ///
    /// After the program exits, its readers get `drain_grace` to reach end of
    /// stream. Termination requests are still served in that window; once it
    /// ends, the remaining readers are abandoned so the job can complete.
    pub(crate) async fn run(mut self, mut control: mpsc::UnboundedReceiver<JobMessage>) -> JobOutcome {
        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,
                Some(msg) = control.recv() => self.handle(msg),
            }
        };

        let mut readers = std::mem::take(&mut self.readers);
        let deadline = tokio::time::sleep(self.drain_grace);
        tokio::pin!(deadline);
        'drain: for reader in readers.iter_mut() {
            loop {
                tokio::select! {
                    joined = &mut *reader => {
                        if let Err(e) = joined {
                            warn!("Job output reader failed: {}", e);
                        }
                        break;
                    }
                    Some(msg) = control.recv() => self.handle(msg),
                    _ = &mut deadline => {
                        warn!(
                            "Output of PID {:?} still open {}s after exit, abandoning readers",
                            self.pid,
                            self.drain_grace.as_secs_f32()
                        );
                        break 'drain;
                    }
                }
            }
        }
        for reader in &readers {
            reader.abort();
        }

        match status {
            Ok(status) => JobOutcome::from(status),
            Err(e) => {
                error!("Failed to wait for PID {:?}: {}", self.pid, e);
                JobOutcome::WaitFailed
            }
        }
    }
}

async fn relay_lines<R>(stream: R, kind: StreamKind, sink: Arc<LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => sink.push(decode_line(&buf, kind)),
            Err(e) => {
                warn!("Error reading job {}: {}", kind, e);
                break;
            }
        }
    }
    debug!("Job {} reader exiting", kind);
}

/// Decode one raw line, substituting U+FFFD for undecodable bytes and
/// dropping the line terminator and trailing whitespace.
fn decode_line(raw: &[u8], kind: StreamKind) -> String {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => Cow::Borrowed(text),
        Err(e) => {
            debug!("Replacing undecodable bytes in job {}: {}", kind, e);
            String::from_utf8_lossy(raw)
        }
    };
    text.trim_end().to_string()
}
