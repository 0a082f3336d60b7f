//! Job Supervisor - single-job external process supervision
//!
//! Runs at most one instance of an external program at a time, captures its
//! stdout and stderr line by line into a shared [`LogSink`], and exposes a
//! lock-protected status snapshot. It has no HTTP dependencies.
//!
//! # Example
//!
//! ```no_run
//! use job_supervisor::{JobRequest, JobSpec, Supervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Supervisor::new(
//!         JobSpec::new("node").with_args(["scripts/convert_to_pdf.js"]),
//!     );
//!
//!     supervisor
//!         .start(JobRequest {
//!             source_dir: "/data/books".into(),
//!             output_dir: "/data/pdfs".into(),
//!         })
//!         .unwrap();
//!
//!     // Poll output and wait for the job to finish
//!     let mut status = supervisor.subscribe();
//!     status.wait_for(|s| !s.running).await.unwrap();
//!     for line in supervisor.drain_logs() {
//!         println!("{}", line);
//!     }
//!     println!("exit code: {:?}", supervisor.status().exit_code);
//! }
//! ```

mod error;
pub mod job;
mod sink;
mod supervisor;

pub use error::SupervisorError;
pub use job::{
    DEFAULT_DRAIN_GRACE, JobOutcome, JobProcess, JobSpec, SPAWN_FAILED_EXIT_CODE, StreamKind,
    WAIT_FAILED_EXIT_CODE,
};
pub use sink::LogSink;
pub use supervisor::{JobId, JobRequest, JobStatus, Supervisor};
