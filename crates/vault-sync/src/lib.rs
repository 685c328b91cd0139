//! vault-sync: a git repository mirrored into a local working copy and
//! exposed as a filesystem.
//!
//! This crate provides:
//! - A replica state machine (clone, sync, destructive recovery)
//! - Single-flight refreshes shared by concurrent callers
//! - Serialized commit+push of each logical mutation, with bounded retry
//! - The `Vault` facade with read/write/delete/move/mkdir/list operations
//! - The `RemoteRepository` abstraction with a `git` CLI implementation

pub mod config;
pub mod content_hash;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod git_cli;
pub mod paths;
pub mod remote;
pub mod replica;
pub mod retry;
pub mod single_flight;
pub mod testing;
pub mod vault;
pub mod working_copy;

pub use config::{CommitterIdentity, VaultConfig};
pub use content_hash::ContentHash;
pub use coordinator::{CommitOutcome, MutationCoordinator, MutationPermit, PendingMutation};
pub use credentials::{Credentials, GitProvider};
pub use error::{ErrorKind, GitError, VaultError};
pub use git_cli::GitCli;
pub use remote::{CleanOptions, RemoteRepository, ResetMode};
pub use replica::{Replica, ReplicaState};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use single_flight::SingleFlight;
pub use vault::{MutationReport, Vault, VaultStatus};
pub use working_copy::{FileEntry, ListOptions};
