//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kubeutils::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid secrets file {path}: {message}")]
    SecretsFile { path: PathBuf, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    pub fn secrets_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::SecretsFile {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_errors_keep_their_message() {
        let err: Error = kubeutils::Error::ApiNotInitialized.into();
        assert_eq!(err.to_string(), kubeutils::Error::ApiNotInitialized.to_string());
    }

    #[test]
    fn secrets_file_error_names_the_path() {
        let err = Error::secrets_file("/etc/kubeutils/secrets.yaml", "expected a mapping");
        assert!(err.to_string().contains("/etc/kubeutils/secrets.yaml"));
        assert!(err.to_string().contains("expected a mapping"));
    }
}
