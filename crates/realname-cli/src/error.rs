//! CLI error types with exit code handling
//!
//! Library errors are folded into [`CliError`] so every failure maps to
//! one exit code and renders through miette.

use miette::Diagnostic;
use realname_core::CoreError;
use realname_kube::KubeError;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Incompatible options or invalid input, caught before any cluster call
    #[error("{message}")]
    #[diagnostic(code(realname_diff::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Local manifests could not be read or parsed
    #[error("{message}")]
    #[diagnostic(code(realname_diff::cli::manifest))]
    Manifest { message: String },

    /// Failure talking to the cluster
    #[error("{message}")]
    #[diagnostic(
        code(realname_diff::cli::cluster),
        help("check your kubeconfig, context and access rights")
    )]
    Cluster { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(realname_diff::cli::io))]
    Io { message: String },

    /// Anything else
    #[error("{message}")]
    #[diagnostic(code(realname_diff::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Manifest { .. } => exit_codes::ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    /// Create a validation error with help text
    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::MissingSource | CoreError::ConflictingSources => {
                CliError::validation_with_help(
                    message,
                    "pass manifests with -f FILENAME (- for stdin) or a kustomization with -k DIR",
                )
            }
            CoreError::KustomizeWithRecursive | CoreError::InvalidSelector { .. } => {
                CliError::validation(message)
            }
            CoreError::PathNotFound { .. } | CoreError::Io(_) => CliError::Io { message },
            _ => CliError::Manifest { message },
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let message = err.to_string();
        match err.root() {
            KubeError::Validation(_) | KubeError::NamespaceMismatch { .. } => {
                CliError::validation(message)
            }
            KubeError::InvalidManifest(_) => CliError::Manifest { message },
            KubeError::Io(_) => CliError::Io { message },
            _ if err.is_cluster_error() => CliError::Cluster { message },
            _ => CliError::Other { message },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
