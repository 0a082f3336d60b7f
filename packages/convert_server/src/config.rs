use job_supervisor::JobSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analyze::AnalysisConfig;

// =============================================================================
// Unified config (figment-deserialized from defaults / convertd.toml / env vars)
// =============================================================================
//
//   convertd.toml:   [job]
//                    program = "node"
//
//   env var:         CONVERTD_JOB__PROGRAM=node   (double underscore = nesting)

pub const DEFAULT_CONFIG_FILE: &str = "convertd.toml";
pub const ENV_PREFIX: &str = "CONVERTD_";

/// Top-level configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub job: JobFileConfig,
    #[serde(default)]
    pub analysis: AnalysisFileConfig,
}

/// HTTP server settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served under `/static`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// The conversion program (lives under `[job]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobFileConfig {
    #[serde(default = "default_job_program")]
    pub program: String,
    #[serde(default = "default_job_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for JobFileConfig {
    fn default() -> Self {
        Self {
            program: default_job_program(),
            args: default_job_args(),
            working_dir: None,
        }
    }
}

impl JobFileConfig {
    pub fn to_spec(&self) -> JobSpec {
        let spec = JobSpec::new(&self.program).with_args(self.args.iter().cloned());
        match &self.working_dir {
            Some(dir) => spec.with_working_dir(dir),
            None => spec,
        }
    }
}

/// The analysis report program (lives under `[analysis]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisFileConfig {
    #[serde(default = "default_analysis_program")]
    pub program: String,
    #[serde(default = "default_analysis_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for AnalysisFileConfig {
    fn default() -> Self {
        Self {
            program: default_analysis_program(),
            args: default_analysis_args(),
            working_dir: None,
        }
    }
}

impl AnalysisFileConfig {
    pub fn to_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            program: self.program.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8001
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_job_program() -> String {
    "node".to_string()
}
fn default_job_args() -> Vec<String> {
    vec!["scripts/convert_to_pdf.js".to_string()]
}
fn default_analysis_program() -> String {
    "python".to_string()
}
fn default_analysis_args() -> Vec<String> {
    vec!["scripts/analyze_pdfs.py".to_string()]
}

/// Build a figment that layers: defaults → TOML file → CONVERTD_* env vars.
///
/// `config_path` defaults to `convertd.toml` in the working directory; a
/// missing file is not an error.
///
/// Env vars use double-underscore for nesting into sections:
///   `CONVERTD_SERVER__PORT=9000`  →  `server.port = 9000`
///   `CONVERTD_JOB__PROGRAM=deno`  →  `job.program = "deno"`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}
