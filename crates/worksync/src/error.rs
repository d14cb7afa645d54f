//! Error types for workspace synchronization.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while managing or synchronizing workspaces.
#[derive(Error, Debug)]
pub enum WorksyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    RepositoryState(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Workspace '{0}' is not a git workspace")]
    NotGitWorkspace(String),

    #[error("The default workspace cannot be {0}")]
    DefaultWorkspaceImmutable(&'static str),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Git operation timed out after {0}s")]
    GitTimeout(u64),

    #[error("Remote ref not advertised: {0}")]
    RefNotAdvertised(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Failed to parse '{path}': {message}")]
    ParseJson { path: PathBuf, message: String },

    #[error("Failed to serialize JSON: {0}")]
    SerializeJson(#[from] serde_json::Error),

    #[error("Registry lock poisoned")]
    RegistryPoisoned,
}

/// Coarse error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; nothing was changed.
    Validation,
    /// Preconditions of the operation were not met; the repository is untouched.
    RepositoryState,
    /// Timeout, unreachable remote or rejected credentials.
    Network,
    /// The remote does not carry the requested branch.
    RefNotAdvertised,
    /// Filesystem, serialization or unexpected libgit2 failures.
    Internal,
}

impl From<std::io::Error> for WorksyncError {
    fn from(err: std::io::Error) -> Self {
        WorksyncError::FileOperation(err.to_string())
    }
}

impl From<git2::Error> for WorksyncError {
    fn from(err: git2::Error) -> Self {
        classify_git_error(&err)
    }
}

impl WorksyncError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorksyncError::Validation(_) | WorksyncError::DefaultWorkspaceImmutable(_) => {
                ErrorKind::Validation
            }
            WorksyncError::RepositoryState(_)
            | WorksyncError::WorkspaceNotFound(_)
            | WorksyncError::NotGitWorkspace(_) => ErrorKind::RepositoryState,
            WorksyncError::GitNetworkError(_)
            | WorksyncError::GitAuthFailed(_)
            | WorksyncError::GitTimeout(_) => ErrorKind::Network,
            WorksyncError::RefNotAdvertised(_) => ErrorKind::RefNotAdvertised,
            _ => ErrorKind::Internal,
        }
    }

    /// Returns true for failures that a mutating operation reports as a failed result
    /// instead of propagating.
    pub fn is_operation_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RepositoryState | ErrorKind::Network
        )
    }

    /// Returns true if the error came from talking to the remote.
    pub fn is_network(&self) -> bool {
        self.kind() == ErrorKind::Network
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        WorksyncError::RepositoryState(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        WorksyncError::Validation(message.into())
    }
}

/// Returns true if a transport message describes a remote ref the server does not have.
///
/// Local lookups such as a missing `refs/remotes/...` ref do not match.
pub fn is_ref_not_advertised(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not advertised")
        || lower.contains("did not advertise")
        || lower.contains("couldn't find remote ref")
        || lower.contains("could not find remote ref")
}

/// Classifies a libgit2 error into a more specific error variant.
pub fn classify_git_error(err: &git2::Error) -> WorksyncError {
    use git2::{ErrorClass, ErrorCode};

    let message = err.message().trim().to_string();
    let lower = message.to_lowercase();

    if is_ref_not_advertised(&message) {
        return WorksyncError::RefNotAdvertised(message);
    }

    if err.code() == ErrorCode::Auth
        || err.code() == ErrorCode::Certificate
        || lower.contains("authentication")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
    {
        return WorksyncError::GitAuthFailed(message);
    }

    if lower.contains("timed out") || lower.contains("timeout") {
        return WorksyncError::GitNetworkError(message);
    }

    if matches!(
        err.class(),
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl
    ) || lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("failed to connect")
        || lower.contains("unexpected http status")
        || lower.contains("failed to resolve address")
    {
        return WorksyncError::GitNetworkError(message);
    }

    WorksyncError::GitOperation(message)
}

/// Result type for workspace synchronization.
pub type Result<T> = std::result::Result<T, WorksyncError>;
