//! Error types for the vault engine and its git client.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the vault facade.
///
/// `Clone` is required: a single failed refresh is delivered to every caller
/// waiting on the same in-flight sync.
#[derive(Debug, Clone, Error)]
pub enum VaultError {
    /// Clone/fetch/reset/clean failed, including after destructive recovery
    #[error("Failed to synchronize vault replica: {message}")]
    SyncFailure { message: String },

    /// All push attempts were exhausted; the local commit is kept
    #[error("Failed to push changes to {} after {attempts} attempt(s): {message}", paths.join(", "))]
    PushFailure {
        paths: Vec<String>,
        attempts: u32,
        message: String,
    },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    /// Path escapes the working copy or targets version-control metadata
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Is a directory: {path}")]
    IsDirectory { path: String },

    #[error("Not a directory: {path}")]
    NotDirectory { path: String },

    /// Content changed since the caller last read it
    #[error("Content changed since last read for {path}: expected hash {expected}, found {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The bounded fetch step of a warm sync ran out of time
    #[error("Fetch timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },
}

/// Discriminant of [`VaultError`] for structured reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyncFailure,
    PushFailure,
    NotFound,
    AlreadyExists,
    InvalidPath,
    IsDirectory,
    NotDirectory,
    HashMismatch,
    Timeout,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SyncFailure => "sync_failure",
            ErrorKind::PushFailure => "push_failure",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::IsDirectory => "is_directory",
            ErrorKind::NotDirectory => "not_directory",
            ErrorKind::HashMismatch => "hash_mismatch",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
        }
    }
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::SyncFailure { .. } => ErrorKind::SyncFailure,
            VaultError::PushFailure { .. } => ErrorKind::PushFailure,
            VaultError::NotFound { .. } => ErrorKind::NotFound,
            VaultError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            VaultError::InvalidPath { .. } => ErrorKind::InvalidPath,
            VaultError::IsDirectory { .. } => ErrorKind::IsDirectory,
            VaultError::NotDirectory { .. } => ErrorKind::NotDirectory,
            VaultError::HashMismatch { .. } => ErrorKind::HashMismatch,
            VaultError::Timeout { .. } => ErrorKind::Timeout,
            VaultError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Paths involved in the failure, if any.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            VaultError::PushFailure { paths, .. } => paths.iter().map(String::as_str).collect(),
            VaultError::NotFound { path }
            | VaultError::AlreadyExists { path }
            | VaultError::InvalidPath { path, .. }
            | VaultError::IsDirectory { path }
            | VaultError::NotDirectory { path }
            | VaultError::HashMismatch { path, .. }
            | VaultError::Io { path, .. } => vec![path.as_str()],
            VaultError::SyncFailure { .. } | VaultError::Timeout { .. } => Vec::new(),
        }
    }

    /// Filesystem-contract violations are reported as-is and never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::AlreadyExists
                | ErrorKind::InvalidPath
                | ErrorKind::IsDirectory
                | ErrorKind::NotDirectory
                | ErrorKind::HashMismatch
        )
    }

    /// Map an I/O error on `path` to the closest contract error.
    pub fn from_io(path: &str, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => VaultError::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::AlreadyExists => VaultError::AlreadyExists {
                path: path.to_string(),
            },
            _ => VaultError::Io {
                path: path.to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        VaultError::SyncFailure {
            message: format!("sync task did not complete: {}", e),
        }
    }
}

/// Errors reported by a [`RemoteRepository`](crate::remote::RemoteRepository).
#[derive(Debug, Clone, Error)]
pub enum GitError {
    /// The git process could not be started
    #[error("Failed to run git {command}: {message}")]
    Spawn { command: String, message: String },

    /// git exited unsuccessfully
    #[error("git {command} failed ({}): {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Local filesystem work around a git operation failed
    #[error("I/O error during git {command}: {message}")]
    Io { command: String, message: String },
}

impl GitError {
    pub fn command(&self) -> &str {
        match self {
            GitError::Spawn { command, .. }
            | GitError::Failed { command, .. }
            | GitError::Io { command, .. } => command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_paths() {
        let err = VaultError::PushFailure {
            paths: vec!["a.md".into(), "b.md".into()],
            attempts: 3,
            message: "rejected".into(),
        };
        assert_eq!(err.kind(), ErrorKind::PushFailure);
        assert_eq!(err.paths(), vec!["a.md", "b.md"]);
        assert!(err.to_string().contains("a.md, b.md"));
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_from_io_maps_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = VaultError::from_io("notes/x.md", io);
        assert!(matches!(err, VaultError::NotFound { ref path } if path == "notes/x.md"));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_timeout_display() {
        let err = VaultError::Timeout {
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Fetch timed out after 1500ms");
        assert!(err.paths().is_empty());
    }

    #[test]
    fn test_git_error_display() {
        let err = GitError::Failed {
            command: "push".into(),
            code: Some(1),
            stderr: "rejected".into(),
        };
        assert_eq!(err.to_string(), "git push failed (1): rejected");
        assert_eq!(err.command(), "push");
    }
}
