//! Lifecycle of the local working copy.
//!
//! ```text
//!            clone ok                  sync ok
//!   Absent ──────────► Ready ◄──────────────────┐
//!     ▲                  │ sync fails            │ recovery ok
//!     │                  ▼                       │
//!     └─────────────── Degraded ─────────────────┘
//!      recovery fails
//! ```
//!
//! Every transition passes through `Refreshing`. Refreshes are funneled
//! through a [`SingleFlight`] so concurrent callers share one clone or sync.
//! Each refresh holds the index lock for its whole sequence, and the tree
//! lock exclusively so no read sees a half-reset working copy.
//!
//! Commits whose push was exhausted are never thrown away by a refresh. They
//! are rebased onto the fetched tip and pushed again; if that fails the
//! refresh fails with `PushFailure` and the working copy keeps them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, RwLockReadGuard};

use crate::config::VaultConfig;
use crate::coordinator::{MutationCoordinator, MutationPermit};
use crate::error::{GitError, VaultError};
use crate::remote::{CleanOptions, RemoteRepository, ResetMode};
use crate::single_flight::SingleFlight;
use crate::working_copy::WorkingCopy;

/// Clones are shallow: only the branch tip is needed.
const CLONE_DEPTH: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    /// No usable working copy
    Absent,
    /// A clone or sync is in progress
    Refreshing,
    /// The working copy mirrors the remote branch
    Ready,
    /// The last sync failed; the next refresh tries again
    Degraded,
}

#[derive(Debug)]
struct Status {
    state: ReplicaState,
    last_synced: Option<Instant>,
}

struct ReplicaInner {
    config: Arc<VaultConfig>,
    remote: Arc<dyn RemoteRepository>,
    working_copy: WorkingCopy,
    coordinator: Arc<MutationCoordinator>,
    /// Shared by reads of the working copy, exclusive for refreshes
    tree_lock: RwLock<()>,
    status: Mutex<Status>,
}

/// The local replica and the state machine that keeps it in step with the
/// remote branch.
pub struct Replica {
    inner: Arc<ReplicaInner>,
    flight: Arc<SingleFlight<(), VaultError>>,
}

impl Replica {
    pub fn new(
        config: Arc<VaultConfig>,
        remote: Arc<dyn RemoteRepository>,
        coordinator: Arc<MutationCoordinator>,
    ) -> Self {
        let working_copy = WorkingCopy::new(config.local_path.clone());
        Self {
            inner: Arc::new(ReplicaInner {
                config,
                remote,
                working_copy,
                coordinator,
                tree_lock: RwLock::new(()),
                status: Mutex::new(Status {
                    state: ReplicaState::Absent,
                    last_synced: None,
                }),
            }),
            flight: Arc::new(SingleFlight::new()),
        }
    }

    pub fn state(&self) -> ReplicaState {
        self.inner.status().state
    }

    /// Time since the last successful clone or sync.
    pub fn since_last_sync(&self) -> Option<Duration> {
        self.inner.status().last_synced.map(|at| at.elapsed())
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.inner.working_copy
    }

    /// Hold off refreshes while the working copy is being read.
    pub async fn read_access(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.tree_lock.read().await
    }

    /// Bring the working copy up to date with the remote branch.
    ///
    /// Concurrent callers share one refresh. A refresh keeps running even if
    /// every caller waiting on it is dropped.
    pub async fn ensure_ready(&self) -> Result<(), VaultError> {
        if self.is_fresh() {
            tracing::debug!("Replica synced recently, skipping refresh");
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        self.flight.run(move || async move { inner.refresh().await }).await
    }

    fn is_fresh(&self) -> bool {
        let interval = self.inner.config.refresh_interval;
        if interval.is_zero() {
            return false;
        }
        let status = self.inner.status();
        status.state == ReplicaState::Ready
            && status
                .last_synced
                .is_some_and(|at| at.elapsed() < interval)
    }
}

fn sync_failure(e: GitError) -> VaultError {
    VaultError::SyncFailure {
        message: e.to_string(),
    }
}

fn into_sync_failure(e: VaultError) -> VaultError {
    match e {
        VaultError::SyncFailure { .. } => e,
        other => VaultError::SyncFailure {
            message: other.to_string(),
        },
    }
}

impl ReplicaInner {
    fn status(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ReplicaState) {
        let mut status = self.status();
        if state == ReplicaState::Ready {
            status.last_synced = Some(Instant::now());
        }
        tracing::debug!("Replica {:?} -> {:?}", status.state, state);
        status.state = state;
    }

    async fn refresh(&self) -> Result<(), VaultError> {
        let mut permit = self.coordinator.acquire().await;
        let _tree = self.tree_lock.write().await;

        let previous = self.status().state;
        self.set_state(ReplicaState::Refreshing);

        match previous {
            ReplicaState::Ready | ReplicaState::Degraded => {
                match self.warm_sync(&mut permit).await {
                    Ok(()) => {
                        self.set_state(ReplicaState::Ready);
                        Ok(())
                    }
                    Err(e) if self.coordinator.pending_pushes() > 0 => {
                        // A fresh clone would drop the retained commits
                        self.set_state(ReplicaState::Degraded);
                        tracing::error!(
                            "Sync failed with {} unpushed commit(s), keeping the working copy: {}",
                            self.coordinator.pending_pushes(),
                            e
                        );
                        Err(match e {
                            VaultError::PushFailure { .. } => e,
                            other => self.coordinator.retained_failure(0, other.to_string()),
                        })
                    }
                    Err(e) => {
                        self.set_state(ReplicaState::Degraded);
                        tracing::warn!("Sync failed, recovering with a fresh clone: {}", e);
                        self.recover(&mut permit, e).await
                    }
                }
            }
            ReplicaState::Absent | ReplicaState::Refreshing => {
                match self.cold_clone(&mut permit).await {
                    Ok(()) => {
                        self.set_state(ReplicaState::Ready);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!("Clone failed: {}", e);
                        self.abandon().await;
                        Err(into_sync_failure(e))
                    }
                }
            }
        }
    }

    /// Empty the local path and clone the branch tip into it.
    async fn cold_clone(&self, permit: &mut MutationPermit) -> Result<(), VaultError> {
        let config = &self.config;
        self.working_copy.remove_all().await?;
        self.coordinator.discard_pending(permit);

        if let Some(parent) = config.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::Io {
                    path: parent.display().to_string(),
                    message: e.to_string(),
                })?;
        }

        tracing::info!(
            "Cloning {} ({}) into {}",
            config.remote_url,
            config.branch,
            config.local_path.display()
        );
        self.remote
            .clone_branch(
                &config.authenticated_url(),
                &config.local_path,
                &config.branch,
                CLONE_DEPTH,
            )
            .await
            .map_err(sync_failure)?;

        tracing::info!("Clone of {} complete", config.tracking_ref());
        Ok(())
    }

    /// Fetch, hard-reset and clean so the working copy matches the remote
    /// branch exactly. Retained commits are replayed on top of the fetched
    /// tip and pushed first.
    async fn warm_sync(&self, permit: &mut MutationPermit) -> Result<(), VaultError> {
        let config = &self.config;
        let workdir = config.local_path.as_path();

        self.remote
            .set_remote_url(workdir, &config.remote_name, &config.authenticated_url())
            .await
            .map_err(sync_failure)?;

        tokio::time::timeout(
            config.fetch_timeout,
            self.remote.fetch(workdir, &config.remote_name, &config.branch),
        )
        .await
        .map_err(|_| VaultError::Timeout {
            after: config.fetch_timeout,
        })?
        .map_err(sync_failure)?;

        if self.coordinator.pending_pushes() > 0 {
            return self.carry_forward(permit).await;
        }

        self.remote
            .reset(workdir, ResetMode::Hard, &config.tracking_ref())
            .await
            .map_err(sync_failure)?;
        self.coordinator.discard_pending(permit);

        self.remote
            .clean(workdir, CleanOptions::everything())
            .await
            .map_err(sync_failure)?;

        tracing::debug!("Synced with {}", config.tracking_ref());
        Ok(())
    }

    /// Drop uncommitted changes, rebase the retained commits onto the fetched
    /// tip and push them. On failure the commits stay in the working copy.
    async fn carry_forward(&self, permit: &mut MutationPermit) -> Result<(), VaultError> {
        let config = &self.config;
        let workdir = config.local_path.as_path();
        let tracking = config.tracking_ref();
        tracing::info!(
            "Replaying {} retained commit(s) onto {}",
            self.coordinator.pending_pushes(),
            tracking
        );

        self.remote
            .reset(workdir, ResetMode::Hard, "HEAD")
            .await
            .map_err(sync_failure)?;
        self.remote
            .clean(workdir, CleanOptions::everything())
            .await
            .map_err(sync_failure)?;

        self.remote.rebase(workdir, &tracking).await.map_err(|e| {
            self.coordinator
                .retained_failure(0, format!("Could not rebase onto {}: {}", tracking, e))
        })?;

        self.coordinator.push_pending(permit).await.map_err(|e| {
            self.coordinator
                .retained_failure(e.attempts, e.last_error.to_string())
        })?;

        tracing::debug!("Synced with {} after pushing retained commits", tracking);
        Ok(())
    }

    /// Throw the working copy away and clone again.
    async fn recover(&self, permit: &mut MutationPermit, cause: VaultError) -> Result<(), VaultError> {
        match self.cold_clone(permit).await {
            Ok(()) => {
                tracing::info!("Recovered replica with a fresh clone");
                self.set_state(ReplicaState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Recovery failed: {}", e);
                self.abandon().await;
                Err(VaultError::SyncFailure {
                    message: format!("{} (recovery failed: {})", cause, e),
                })
            }
        }
    }

    /// Remove whatever a failed clone left behind and fall back to `Absent`.
    async fn abandon(&self) {
        if let Err(e) = self.working_copy.remove_all().await {
            tracing::warn!("Failed to remove partial working copy: {}", e);
        }
        self.set_state(ReplicaState::Absent);
    }
}
