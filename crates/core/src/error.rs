use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;

/// Every failure of the bootstrap. None of them are retried: the first one
/// aborts the run.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The presence check for the provisioning tool could not run at all.
    #[error("failed to check whether {tool} is installed: {source}")]
    ToolCheck { tool: String, #[source] source: std::io::Error },

    #[error("failed to install {tool} ({command}): {reason}")]
    Install { tool: String, command: String, reason: String },

    #[error("failed to list clusters ({command}): {reason}")]
    Query { command: String, reason: String },

    #[error("failed to render {what}: {reason}")]
    Render { what: String, reason: String },

    #[error("{context}: {source}")]
    Io { context: String, #[source] source: std::io::Error },

    #[error("failed to create cluster {name}: {reason}")]
    CreateCluster { name: String, reason: String },

    #[error("failed to apply {target}: {reason}")]
    Apply { target: String, reason: String },

    #[error("invalid cluster spec: {0}")]
    InvalidSpec(String),
}

/// Stable, payload-free name of a [`BootstrapError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ToolCheckError,
    InstallError,
    QueryError,
    RenderError,
    IoError,
    CreateClusterError,
    ApplyError,
    InvalidSpec,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::ToolCheck { .. } => ErrorKind::ToolCheckError,
            BootstrapError::Install { .. } => ErrorKind::InstallError,
            BootstrapError::Query { .. } => ErrorKind::QueryError,
            BootstrapError::Render { .. } => ErrorKind::RenderError,
            BootstrapError::Io { .. } => ErrorKind::IoError,
            BootstrapError::CreateCluster { .. } => ErrorKind::CreateClusterError,
            BootstrapError::Apply { .. } => ErrorKind::ApplyError,
            BootstrapError::InvalidSpec(_) => ErrorKind::InvalidSpec,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BootstrapError::Io { context: context.into(), source }
    }
}
