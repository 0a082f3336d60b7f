use std::path::PathBuf;

/// Errors that can occur while supervising a job
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// A job is already running
    #[error("a job is already running")]
    AlreadyRunning,
    /// No job is running
    #[error("no job is running")]
    NotRunning,
    /// The requested source path does not exist
    #[error("source path not found: {}", path.display())]
    InvalidInput { path: PathBuf },
    /// The external program could not be launched
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// A termination request could not be delivered
    #[error("failed to signal job: {0}")]
    Signal(String),
}

impl SupervisorError {
    /// Whether the caller caused this error (as opposed to the environment)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning | Self::NotRunning | Self::InvalidInput { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors() {
        assert!(SupervisorError::AlreadyRunning.is_client_error());
        assert!(SupervisorError::NotRunning.is_client_error());
        assert!(
            SupervisorError::InvalidInput {
                path: PathBuf::from("/missing")
            }
            .is_client_error()
        );

        let spawn = SupervisorError::SpawnFailed {
            program: "node".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!spawn.is_client_error());
        assert!(!SupervisorError::Signal("EPERM".into()).is_client_error());
    }

    #[test]
    fn display_includes_context() {
        let err = SupervisorError::InvalidInput {
            path: PathBuf::from("/data/books"),
        };
        assert_eq!(err.to_string(), "source path not found: /data/books");

        let err = SupervisorError::SpawnFailed {
            program: "node".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.to_string(), "failed to spawn 'node': not found");

        let err = SupervisorError::Signal("SIGTERM to process group 42: EPERM".into());
        assert_eq!(
            err.to_string(),
            "failed to signal job: SIGTERM to process group 42: EPERM"
        );
    }
}
