//! One-shot analysis runs: invoke the report program, wait, capture everything.

use job_supervisor::JobOutcome;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, info};

use crate::error::ApiError;

/// How to launch the analysis program
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// Captured result of one analysis run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
}

/// Run the analysis program to completion.
///
/// This is independent of the supervised conversion job and may run while
/// one is active. A non-zero exit is reported in the result, not as an error;
/// only a failure to launch or wait for the program is an error.
pub async fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisReport, ApiError> {
    let mut cmd = tokio::process::Command::new(&config.program);
    cmd.args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    debug!("Running analysis: {} {:?}", config.program, config.args);
    let output = cmd
        .output()
        .await
        .map_err(|e| ApiError::Analysis(format!("Failed to run analysis: {}", e)))?;

    let report = AnalysisReport {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        return_code: JobOutcome::from(output.status).exit_code(),
    };
    info!("Analysis finished with code {}", report.return_code);
    Ok(report)
}
