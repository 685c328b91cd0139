//! Remote repository client abstraction.
//!
//! Implementations:
//! - `GitCli` - Runs the `git` executable
//! - `FakeRemote` (in `testing`) - In-memory remote for tests
//!
//! Every operation except `clone_branch` acts on an existing working copy.

use std::path::Path;

use async_trait::async_trait;

use crate::error::GitError;

pub type Result<T> = std::result::Result<T, GitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Index and working tree both match the target
    Hard,
}

/// Options for removing files git does not track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanOptions {
    pub force: bool,
    /// Remove untracked directories too
    pub directories: bool,
    /// Remove ignored files too
    pub ignored: bool,
}

impl CleanOptions {
    /// Everything git doesn't track goes: `clean -f -d -x`.
    pub fn everything() -> Self {
        Self {
            force: true,
            directories: true,
            ignored: true,
        }
    }
}

/// The git primitives the replica engine depends on.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Shallow, single-branch clone of `branch` from `url` into `dest`.
    async fn clone_branch(&self, url: &str, dest: &Path, branch: &str, depth: u32) -> Result<()>;

    /// Fetch `branch` from the named remote.
    async fn fetch(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()>;

    /// Reset HEAD (and per `mode`, the index and tree) to `reference`.
    async fn reset(&self, workdir: &Path, mode: ResetMode, reference: &str) -> Result<()>;

    /// Replay local commits on top of `upstream`. On conflict the rebase is
    /// aborted and HEAD, the index and the tree are left as they were.
    async fn rebase(&self, workdir: &Path, upstream: &str) -> Result<()>;

    /// Remove files git does not track.
    async fn clean(&self, workdir: &Path, options: CleanOptions) -> Result<()>;

    /// Stage additions, modifications and removals under `paths`, including
    /// paths an ignore file would exclude. An empty slice stages everything
    /// that is not ignored.
    async fn stage(&self, workdir: &Path, paths: &[String]) -> Result<()>;

    /// Paths with staged changes relative to HEAD.
    async fn staged_changes(&self, workdir: &Path) -> Result<Vec<String>>;

    /// Commit the index with `message`.
    async fn commit(&self, workdir: &Path, message: &str) -> Result<()>;

    /// Push the current branch to `remote`/`branch`.
    async fn push(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()>;

    /// Point the named remote at `url` (credentials included).
    async fn set_remote_url(&self, workdir: &Path, remote: &str, url: &str) -> Result<()>;
}
