//! Serialized commit+push of logical mutations.
//!
//! Every stage/commit/push sequence runs while holding a [`MutationPermit`],
//! a guard on the index lock. The lock is a FIFO `tokio::sync::Mutex`, so
//! mutations are committed and pushed in the order they asked for the permit.
//! Refreshes take the same lock, so a sync never resets the working copy
//! underneath a mutation that has not been pushed yet.

use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::VaultConfig;
use crate::error::{GitError, VaultError};
use crate::remote::RemoteRepository;
use crate::retry::{RetryError, Sleeper, retry};

/// Paths touched by one logical mutation and the summary to commit it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub paths: Vec<String>,
    pub summary: String,
}

impl PendingMutation {
    pub fn new(paths: Vec<String>, summary: impl Into<String>) -> Self {
        Self {
            paths,
            summary: summary.into(),
        }
    }
}

/// What happened to a mutation after it was handed to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Nothing was staged, so nothing was committed or pushed
    Unchanged,
    /// Committed and pushed after this many attempts
    Pushed { attempts: u32 },
}

/// Exclusive right to modify the index, held across stage/commit/push.
pub struct MutationPermit {
    _guard: OwnedMutexGuard<()>,
}

/// Local commits whose push exhausted its retries.
#[derive(Debug, Default)]
struct Retained {
    commits: usize,
    paths: Vec<String>,
}

/// Serializes commit+push sequences against each other and against refreshes.
pub struct MutationCoordinator {
    config: Arc<VaultConfig>,
    remote: Arc<dyn RemoteRepository>,
    sleeper: Arc<dyn Sleeper>,
    index_lock: Arc<Mutex<()>>,
    retained: std::sync::Mutex<Retained>,
}

impl MutationCoordinator {
    pub fn new(
        config: Arc<VaultConfig>,
        remote: Arc<dyn RemoteRepository>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            config,
            remote,
            sleeper,
            index_lock: Arc::new(Mutex::new(())),
            retained: std::sync::Mutex::new(Retained::default()),
        }
    }

    /// Wait for the index lock. Permits are granted in request order.
    pub async fn acquire(&self) -> MutationPermit {
        MutationPermit {
            _guard: Arc::clone(&self.index_lock).lock_owned().await,
        }
    }

    fn retained(&self) -> std::sync::MutexGuard<'_, Retained> {
        self.retained.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of local commits waiting for a successful push.
    pub fn pending_pushes(&self) -> usize {
        self.retained().commits
    }

    /// Paths changed by the commits waiting for a successful push.
    pub fn retained_paths(&self) -> Vec<String> {
        self.retained().paths.clone()
    }

    /// Forget retained commits once a reset or clone has discarded them.
    pub(crate) fn discard_pending(&self, _permit: &mut MutationPermit) {
        *self.retained() = Retained::default();
    }

    /// `PushFailure` naming every path whose commit is still local.
    pub(crate) fn retained_failure(&self, attempts: u32, message: impl Into<String>) -> VaultError {
        VaultError::PushFailure {
            paths: self.retained_paths(),
            attempts,
            message: message.into(),
        }
    }

    fn retain(&self, paths: &[String]) {
        let mut retained = self.retained();
        retained.commits += 1;
        for path in paths {
            if !retained.paths.contains(path) {
                retained.paths.push(path.clone());
            }
        }
    }

    /// Acquire a permit, then commit and push `mutation` under it.
    pub async fn commit_and_push(&self, mutation: PendingMutation) -> Result<CommitOutcome, VaultError> {
        let mut permit = self.acquire().await;
        self.commit_and_push_locked(&mut permit, mutation).await
    }

    /// Stage the mutation's paths, commit them if anything changed, and push.
    ///
    /// The caller must already hold `permit` and should have held it since
    /// before the filesystem change was made.
    pub async fn commit_and_push_locked(
        &self,
        permit: &mut MutationPermit,
        mutation: PendingMutation,
    ) -> Result<CommitOutcome, VaultError> {
        let workdir = self.config.local_path.as_path();
        let local_failure = |e: GitError| VaultError::Io {
            path: mutation.paths.join(", "),
            message: e.to_string(),
        };

        self.remote
            .stage(workdir, &mutation.paths)
            .await
            .map_err(local_failure)?;

        let staged = self
            .remote
            .staged_changes(workdir)
            .await
            .map_err(local_failure)?;
        if staged.is_empty() {
            tracing::debug!("No changes to commit for: {}", mutation.summary);
            return Ok(CommitOutcome::Unchanged);
        }

        self.remote
            .commit(workdir, &mutation.summary)
            .await
            .map_err(local_failure)?;
        self.retain(&mutation.paths);
        tracing::debug!("Committed {} path(s): {}", staged.len(), mutation.summary);

        match self.push_pending(permit).await {
            Ok(attempts) => Ok(CommitOutcome::Pushed { attempts }),
            Err(e) => {
                tracing::error!(
                    "Giving up on push of '{}' after {} attempt(s): {}",
                    mutation.summary,
                    e.attempts,
                    e.last_error
                );
                Err(self.retained_failure(e.attempts, e.last_error.to_string()))
            }
        }
    }

    /// Push local commits under the retry policy, reasserting the
    /// authenticated remote URL before every attempt.
    pub(crate) async fn push_pending(
        &self,
        _permit: &mut MutationPermit,
    ) -> Result<u32, RetryError<GitError>> {
        let workdir = self.config.local_path.as_path();
        let remote_name = self.config.remote_name.as_str();
        let branch = self.config.branch.as_str();
        let url = self.config.authenticated_url();
        let remote = &self.remote;

        let ((), attempts) = retry(&self.config.retry, self.sleeper.as_ref(), |attempt| {
            let url = url.clone();
            async move {
                tracing::debug!("Push attempt {}", attempt);
                remote.set_remote_url(workdir, remote_name, &url).await?;
                remote.push(workdir, remote_name, branch).await
            }
        })
        .await?;

        let pushed = std::mem::take(&mut *self.retained()).commits;
        tracing::info!(
            "Pushed {} commit(s) to {} after {} attempt(s)",
            pushed,
            self.config.tracking_ref(),
            attempts
        );
        Ok(attempts)
    }
}
