use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::job::{JobMessage, JobOutcome, JobProcess, JobSpec};
use crate::sink::LogSink;

/// Unique identifier for one job run
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Parameters for one job run, passed to the program as `SOURCE_DIR` / `OUTPUT_DIR`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Point-in-time view of the supervisor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub running: bool,
    /// Exit code of the most recent finished job, if any
    pub exit_code: Option<i32>,
}

/// Internal handle to the active job's supervision task
struct JobHandle {
    id: JobId,
    control: mpsc::UnboundedSender<JobMessage>,
    _task: JoinHandle<()>,
}

#[derive(Default)]
struct SupervisorState {
    running: bool,
    exit_code: Option<i32>,
    active: Option<JobHandle>,
}

impl SupervisorState {
    fn snapshot(&self) -> JobStatus {
        JobStatus {
            running: self.running,
            exit_code: self.exit_code,
        }
    }
}

/// Runs at most one instance of an external program at a time
pub struct Supervisor {
    spec: JobSpec,
    state: Arc<Mutex<SupervisorState>>,
    sink: Arc<LogSink>,
    status_tx: Arc<watch::Sender<JobStatus>>,
    next_id: AtomicU64,
}

impl Supervisor {
    /// Create a supervisor that launches `spec` for every accepted start
    pub fn new(spec: JobSpec) -> Self {
        let (status_tx, _) = watch::channel(JobStatus::default());
        Self {
            spec,
            state: Arc::new(Mutex::new(SupervisorState::default())),
            sink: Arc::new(LogSink::new()),
            status_tx: Arc::new(status_tx),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        lock(&self.state)
    }

    /// Start a job in the background.
    ///
    /// The source path is checked without holding the lock. The running check
    /// and the transition to running then happen under one lock acquisition,
    /// so concurrent starts cannot both succeed. Spawn failures are not
    /// returned here: they surface as a log line and the `-1` exit code once
    /// the job completes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: JobRequest) -> Result<JobId, SupervisorError> {
        // A busy supervisor reports that first, whatever the path
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning);
        }
        if !request.source_dir.exists() {
            return Err(SupervisorError::InvalidInput {
                path: request.source_dir,
            });
        }

        let mut state = self.lock_state();
        if state.running {
            return Err(SupervisorError::AlreadyRunning);
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let spec = self
            .spec
            .clone()
            .with_env("SOURCE_DIR", request.source_dir.to_string_lossy())
            .with_env("OUTPUT_DIR", request.output_dir.to_string_lossy());

        self.sink.reset();
        state.running = true;
        state.exit_code = None;

        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(supervise(
            id,
            spec,
            self.sink.clone(),
            self.state.clone(),
            self.status_tx.clone(),
            control_rx,
        ));
        state.active = Some(JobHandle {
            id,
            control,
            _task: task,
        });
        self.status_tx.send_replace(state.snapshot());

        info!(
            "Started {} (source: {}, output: {})",
            id,
            request.source_dir.display(),
            request.output_dir.display()
        );
        Ok(id)
    }

    /// Ask the running job to exit and return without waiting.
    ///
    /// On unix this is a SIGTERM to the job's process group. It is advisory:
    /// the program may ignore or delay it, and there is no escalation to a
    /// forced kill after a grace period. On other platforms the program is
    /// killed outright, since there is no gentler request to send.
    pub fn stop(&self) -> Result<JobId, SupervisorError> {
        let state = self.lock_state();
        let handle = match &state.active {
            Some(handle) if state.running => handle,
            _ => return Err(SupervisorError::NotRunning),
        };

        if handle.control.send(JobMessage::Terminate).is_err() {
            debug!("{} is already finishing, stop request dropped", handle.id);
        }
        info!("Stop signal sent to {}", handle.id);
        Ok(handle.id)
    }

    pub fn status(&self) -> JobStatus {
        self.lock_state().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Watch status transitions (start and completion)
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// Take all output lines captured since the last drain
    pub fn drain_logs(&self) -> Vec<String> {
        self.sink.drain_all()
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }
}

fn lock(state: &Mutex<SupervisorState>) -> MutexGuard<'_, SupervisorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn supervise(
    id: JobId,
    spec: JobSpec,
    sink: Arc<LogSink>,
    state: Arc<Mutex<SupervisorState>>,
    status_tx: Arc<watch::Sender<JobStatus>>,
    control: mpsc::UnboundedReceiver<JobMessage>,
) {
    let outcome = match JobProcess::spawn(&spec, sink.clone()) {
        Ok(job) => {
            debug!("{} running as PID {:?}", id, job.pid());
            job.run(control).await
        }
        Err(e) => {
            error!("Failed to start process for {}: {}", id, e);
            sink.push(format!("Error starting process: {}", e));
            JobOutcome::SpawnFailed
        }
    };

    match outcome {
        JobOutcome::Exited { code: 0 } => info!("{} finished successfully", id),
        JobOutcome::Exited { code } => warn!("{} exited with code {}", id, code),
        JobOutcome::Signalled { signal } => warn!("{} terminated by signal {}", id, signal),
        JobOutcome::SpawnFailed | JobOutcome::WaitFailed => {}
    }

    complete(&state, &status_tx, id, outcome);
}

/// Record a job's outcome. Applies only while `id` is still the active job,
/// so it takes effect at most once per job.
fn complete(
    state: &Mutex<SupervisorState>,
    status_tx: &watch::Sender<JobStatus>,
    id: JobId,
    outcome: JobOutcome,
) {
    let mut state = lock(state);
    if state.active.as_ref().map(|h| h.id) != Some(id) {
        warn!("Ignoring completion of inactive {}", id);
        return;
    }

    state.running = false;
    state.exit_code = Some(outcome.exit_code());
    state.active = None;
    status_tx.send_replace(state.snapshot());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SPAWN_FAILED_EXIT_CODE;
    use std::time::Duration;

    fn request(source: &std::path::Path) -> JobRequest {
        JobRequest {
            source_dir: source.to_path_buf(),
            output_dir: source.join("out"),
        }
    }

    async fn wait_idle(supervisor: &Supervisor) -> JobStatus {
        let mut rx = supervisor.subscribe();
        let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| !s.running))
            .await
            .expect("job should finish")
            .expect("status channel open");
        *status
    }

    #[test]
    fn job_id_display() {
        assert_eq!(JobId(7).to_string(), "job-7");
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected_without_side_effects() {
        let supervisor = Supervisor::new(JobSpec::new("true"));
        let before = supervisor.status();

        assert!(matches!(supervisor.stop(), Err(SupervisorError::NotRunning)));
        assert_eq!(supervisor.status(), before);
        assert!(supervisor.drain_logs().is_empty());
    }

    #[tokio::test]
    async fn start_with_missing_source_is_rejected() {
        let supervisor = Supervisor::new(JobSpec::new("true"));
        let result = supervisor.start(JobRequest {
            source_dir: PathBuf::from("/definitely/not/here"),
            output_dir: PathBuf::from("/tmp/out"),
        });

        assert!(matches!(
            result,
            Err(SupervisorError::InvalidInput { ref path }) if path == std::path::Path::new("/definitely/not/here")
        ));
        assert_eq!(supervisor.status(), JobStatus::default());
        assert!(supervisor.drain_logs().is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_reports_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(JobSpec::new("/nonexistent/convert-tool"));

        supervisor.start(request(tmp.path())).unwrap();
        let status = wait_idle(&supervisor).await;

        assert!(!status.running);
        assert_eq!(status.exit_code, Some(SPAWN_FAILED_EXIT_CODE));
        assert_eq!(supervisor.status(), status);

        let logs = supervisor.drain_logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("Error starting process:"));
        assert!(logs[0].contains("/nonexistent/convert-tool"));
    }

    #[tokio::test]
    async fn failed_job_leaves_supervisor_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(JobSpec::new("/nonexistent/convert-tool"));

        supervisor.start(request(tmp.path())).unwrap();
        wait_idle(&supervisor).await;

        supervisor.start(request(tmp.path())).unwrap();
        wait_idle(&supervisor).await;
        // The second start reset the sink, so only its own failure line remains
        assert_eq!(supervisor.drain_logs().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn status_right_after_start_is_running() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(JobSpec::new("sh").with_args(["-c", "exec sleep 30"]));

        supervisor.start(request(tmp.path())).unwrap();
        assert_eq!(
            supervisor.status(),
            JobStatus {
                running: true,
                exit_code: None
            }
        );
        assert!(matches!(
            supervisor.start(request(tmp.path())),
            Err(SupervisorError::AlreadyRunning)
        ));

        supervisor.stop().unwrap();
        let status = wait_idle(&supervisor).await;
        assert_eq!(status.exit_code, Some(128 + 15));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn busy_supervisor_rejects_before_checking_path() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(JobSpec::new("sh").with_args(["-c", "exec sleep 30"]));
        supervisor.start(request(tmp.path())).unwrap();

        let result = supervisor.start(JobRequest {
            source_dir: PathBuf::from("/definitely/not/here"),
            output_dir: PathBuf::from("/tmp/out"),
        });
        assert!(matches!(result, Err(SupervisorError::AlreadyRunning)));

        supervisor.stop().unwrap();
        wait_idle(&supervisor).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn completion_ignores_stale_job_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(JobSpec::new("sh").with_args(["-c", "exec sleep 30"]));
        let id = supervisor.start(request(tmp.path())).unwrap();

        complete(
            &supervisor.state,
            &supervisor.status_tx,
            JobId(id.0 + 100),
            JobOutcome::Exited { code: 9 },
        );
        assert!(supervisor.is_running());

        supervisor.stop().unwrap();
        wait_idle(&supervisor).await;
    }
}
