//! The vault facade: filesystem-shaped operations over a git replica.
//!
//! Every call validates its paths first, then makes sure the replica is
//! fresh. Mutations hold a [`MutationPermit`] from before they touch the
//! filesystem until their push has finished, so each one lands as its own
//! commit in acceptance order. Reads hold the replica's read access so a
//! refresh started by another caller cannot reset the tree underneath them.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::VaultConfig;
use crate::content_hash::ContentHash;
use crate::coordinator::{CommitOutcome, MutationCoordinator, MutationPermit, PendingMutation};
use crate::error::VaultError;
use crate::paths::{normalize_file_path, normalize_relative_path};
use crate::remote::RemoteRepository;
use crate::replica::{Replica, ReplicaState};
use crate::retry::{Sleeper, TokioSleeper};
use crate::working_copy::{FileEntry, ListOptions, WorkingCopy};

pub type Result<T> = std::result::Result<T, VaultError>;

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    /// Paths touched, relative to the vault root
    pub paths: Vec<String>,
    #[serde(flatten)]
    pub outcome: CommitOutcome,
}

/// Point-in-time view of the replica. Gathering it performs no I/O.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultStatus {
    pub state: ReplicaState,
    #[serde(rename = "since_last_sync_ms", serialize_with = "serialize_millis")]
    pub since_last_sync: Option<Duration>,
    /// Local commits whose push was exhausted and awaits the next sync
    pub pending_pushes: usize,
}

fn serialize_millis<S>(value: &Option<Duration>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

/// A git-backed vault exposed as a filesystem.
pub struct Vault {
    config: Arc<VaultConfig>,
    replica: Replica,
    coordinator: Arc<MutationCoordinator>,
}

impl Vault {
    pub fn new(config: VaultConfig, remote: Arc<dyn RemoteRepository>) -> Self {
        Self::with_sleeper(config, remote, Arc::new(TokioSleeper))
    }

    /// Vault whose push retries wait through `sleeper`.
    pub fn with_sleeper(
        config: VaultConfig,
        remote: Arc<dyn RemoteRepository>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let config = Arc::new(config);
        let coordinator = Arc::new(MutationCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&remote),
            sleeper,
        ));
        let replica = Replica::new(Arc::clone(&config), remote, Arc::clone(&coordinator));
        Self {
            config,
            replica,
            coordinator,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn state(&self) -> ReplicaState {
        self.replica.state()
    }

    pub fn status(&self) -> VaultStatus {
        VaultStatus {
            state: self.replica.state(),
            since_last_sync: self.replica.since_last_sync(),
            pending_pushes: self.coordinator.pending_pushes(),
        }
    }

    fn working_copy(&self) -> &WorkingCopy {
        self.replica.working_copy()
    }

    /// Refresh the replica without performing any operation on it.
    pub async fn sync(&self) -> Result<()> {
        self.replica.ensure_ready().await
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        let rel = normalize_file_path(path)?;
        self.replica.ensure_ready().await?;
        let _reading = self.replica.read_access().await;
        self.working_copy().read(&rel).await
    }

    /// Create or overwrite a file, then commit and push it.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<MutationReport> {
        let rel = normalize_file_path(path)?;
        self.replica.ensure_ready().await?;

        let mut permit = self.begin_mutation().await?;
        self.working_copy().write(&rel, content).await?;

        let summary = format!("update {}", rel);
        self.finish_mutation(&mut permit, vec![rel], summary).await
    }

    /// Like [`write_file`](Self::write_file), but only if the current content
    /// still hashes to `expected_hash`. A missing file never matches.
    pub async fn write_file_checked(
        &self,
        path: &str,
        content: &str,
        expected_hash: &str,
    ) -> Result<MutationReport> {
        let rel = normalize_file_path(path)?;
        self.replica.ensure_ready().await?;

        let mut permit = self.begin_mutation().await?;
        let actual = match self.working_copy().read(&rel).await {
            Ok(current) => Some(ContentHash::from_content(&current)),
            Err(VaultError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        if !actual.as_ref().is_some_and(|hash| hash.matches(expected_hash)) {
            return Err(VaultError::HashMismatch {
                path: rel,
                expected: expected_hash.to_string(),
                actual: actual.map_or_else(|| "missing".to_string(), |hash| hash.to_string()),
            });
        }

        self.working_copy().write(&rel, content).await?;
        let summary = format!("update {}", rel);
        self.finish_mutation(&mut permit, vec![rel], summary).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<MutationReport> {
        let rel = normalize_file_path(path)?;
        self.replica.ensure_ready().await?;

        let mut permit = self.begin_mutation().await?;
        self.working_copy().delete(&rel).await?;

        let summary = format!("delete {}", rel);
        self.finish_mutation(&mut permit, vec![rel], summary).await
    }

    /// Rename `source` to `destination`, committed as a single change.
    pub async fn move_file(&self, source: &str, destination: &str) -> Result<MutationReport> {
        let from = normalize_file_path(source)?;
        let to = normalize_file_path(destination)?;
        self.replica.ensure_ready().await?;

        let mut permit = self.begin_mutation().await?;
        self.working_copy().rename(&from, &to).await?;

        let summary = format!("move {} -> {}", from, to);
        self.finish_mutation(&mut permit, vec![from, to], summary).await
    }

    /// Create a directory. Directories are not tracked by git, so nothing
    /// is committed.
    pub async fn create_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let rel = normalize_file_path(path)?;
        self.replica.ensure_ready().await?;
        let _reading = self.replica.read_access().await;
        self.working_copy().create_dir(&rel, recursive).await
    }

    /// List entries under `path`; the empty string lists the vault root.
    pub async fn list_files(&self, path: &str, options: &ListOptions) -> Result<Vec<FileEntry>> {
        let rel = normalize_relative_path(path)?;
        self.replica.ensure_ready().await?;
        let _reading = self.replica.read_access().await;
        self.working_copy().list(&rel, options).await
    }

    /// Take the mutation permit and check the replica survived any refresh
    /// that ran while we waited for it.
    async fn begin_mutation(&self) -> Result<MutationPermit> {
        let permit = self.coordinator.acquire().await;
        if self.replica.state() == ReplicaState::Absent || !self.working_copy().is_present().await {
            return Err(VaultError::SyncFailure {
                message: "Vault replica is not available".to_string(),
            });
        }
        Ok(permit)
    }

    async fn finish_mutation(
        &self,
        permit: &mut MutationPermit,
        paths: Vec<String>,
        summary: String,
    ) -> Result<MutationReport> {
        let outcome = self
            .coordinator
            .commit_and_push_locked(permit, PendingMutation::new(paths.clone(), summary))
            .await?;
        Ok(MutationReport { paths, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, RecordingSleeper};
    use tempfile::TempDir;

    fn vault(temp: &TempDir, remote: Arc<FakeRemote>) -> Vault {
        let config = VaultConfig::new("fake://vault", "main", temp.path().join("vault"));
        Vault::with_sleeper(config, remote, Arc::new(RecordingSleeper::new()))
    }

    #[tokio::test]
    async fn test_read_file() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::with_files(&[("notes/a.md", "hello")]));
        let vault = vault(&temp, remote);

        assert_eq!(vault.read_file("notes/a.md").await.unwrap(), "hello");
        assert_eq!(vault.read_file("/notes/a.md").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_read_missing_and_directory() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::with_files(&[("notes/a.md", "hello")]));
        let vault = vault(&temp, remote);

        assert!(matches!(
            vault.read_file("nope.md").await,
            Err(VaultError::NotFound { .. })
        ));
        assert!(matches!(
            vault.read_file("notes").await,
            Err(VaultError::IsDirectory { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_pushes() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let vault = vault(&temp, remote.clone());

        let report = vault.write_file("deep/nested/n.md", "body").await.unwrap();

        assert_eq!(report.paths, vec!["deep/nested/n.md".to_string()]);
        assert_eq!(report.outcome, CommitOutcome::Pushed { attempts: 1 });
        assert_eq!(remote.remote_file("deep/nested/n.md").as_deref(), Some("body"));
        assert_eq!(
            remote.remote_commits().last().unwrap().message,
            "update deep/nested/n.md"
        );
    }

    #[tokio::test]
    async fn test_identical_write_is_unchanged() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::with_files(&[("a.md", "same")]));
        let vault = vault(&temp, remote.clone());

        let report = vault.write_file("a.md", "same").await.unwrap();

        assert_eq!(report.outcome, CommitOutcome::Unchanged);
        assert_eq!(remote.calls().push, 0);
        assert_eq!(remote.remote_commits().len(), 1);
    }

    #[tokio::test]
    async fn test_checked_write() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::with_files(&[("a.md", "v1")]));
        let vault = vault(&temp, remote.clone());

        let stale = ContentHash::from_content("v0");
        let err = vault
            .write_file_checked("a.md", "v2", stale.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::HashMismatch { .. }));
        assert_eq!(remote.remote_file("a.md").as_deref(), Some("v1"));

        let current = ContentHash::from_content("v1");
        vault
            .write_file_checked("a.md", "v2", current.as_str())
            .await
            .unwrap();
        assert_eq!(remote.remote_file("a.md").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_checked_write_to_missing_file_mismatches() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let vault = vault(&temp, remote);

        let hash = ContentHash::from_content("");
        assert!(matches!(
            vault.write_file_checked("new.md", "x", hash.as_str()).await,
            Err(VaultError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::with_files(&[("a.md", "A"), ("dir/b.md", "B")]));
        let vault = vault(&temp, remote.clone());

        vault.delete_file("a.md").await.unwrap();
        assert!(remote.remote_file("a.md").is_none());
        assert_eq!(remote.remote_commits().last().unwrap().message, "delete a.md");

        assert!(matches!(
            vault.delete_file("a.md").await,
            Err(VaultError::NotFound { .. })
        ));
        assert!(matches!(
            vault.delete_file("dir").await,
            Err(VaultError::IsDirectory { .. })
        ));
    }

    #[tokio::test]
    async fn test_move_file_is_one_commit() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::with_files(&[("a.md", "A"), ("b.md", "B")]));
        let vault = vault(&temp, remote.clone());

        let report = vault.move_file("a.md", "archive/a.md").await.unwrap();
        assert_eq!(report.paths, vec!["a.md".to_string(), "archive/a.md".to_string()]);

        let last = remote.remote_commits().last().unwrap().clone();
        assert_eq!(last.message, "move a.md -> archive/a.md");
        assert_eq!(last.changed, vec!["a.md".to_string(), "archive/a.md".to_string()]);
        assert_eq!(remote.remote_file("archive/a.md").as_deref(), Some("A"));

        assert!(matches!(
            vault.move_file("missing.md", "c.md").await,
            Err(VaultError::NotFound { .. })
        ));
        assert!(matches!(
            vault.move_file("b.md", "archive/a.md").await,
            Err(VaultError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_directory_is_not_committed() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let vault = vault(&temp, remote.clone());

        vault.create_directory("projects", false).await.unwrap();
        assert!(matches!(
            vault.create_directory("projects", false).await,
            Err(VaultError::AlreadyExists { .. })
        ));
        assert!(matches!(
            vault.create_directory("x/y/z", false).await,
            Err(VaultError::NotFound { .. })
        ));
        vault.create_directory("x/y/z", true).await.unwrap();
        assert_eq!(remote.calls().commit, 0);
    }

    #[tokio::test]
    async fn test_list_files() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::with_files(&[
            ("a.md", "A"),
            ("img.PNG", "png"),
            ("notes/b.md", "B"),
            (".obsidian/app.json", "{}"),
        ]));
        let vault = vault(&temp, remote);

        let shallow = vault.list_files("", &ListOptions::default()).await.unwrap();
        let paths: Vec<&str> = shallow.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "img.PNG"]);

        let options = ListOptions {
            recursive: true,
            include_directories: true,
            extensions: Some(vec!["md".to_string()]),
        };
        let deep = vault.list_files("/", &options).await.unwrap();
        let paths: Vec<&str> = deep.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "notes", "notes/b.md"]);

        assert!(matches!(
            vault.list_files("a.md", &ListOptions::default()).await,
            Err(VaultError::NotDirectory { .. })
        ));
    }

    #[tokio::test]
    async fn test_escaping_paths_do_no_io() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let vault = vault(&temp, remote.clone());

        assert!(matches!(
            vault.read_file("../etc/passwd").await,
            Err(VaultError::InvalidPath { .. })
        ));
        assert!(matches!(
            vault.write_file(".git/config", "x").await,
            Err(VaultError::InvalidPath { .. })
        ));
        assert!(matches!(
            vault.move_file("a.md", "../../b.md").await,
            Err(VaultError::InvalidPath { .. })
        ));
        assert_eq!(remote.calls(), Default::default());
        assert_eq!(vault.state(), ReplicaState::Absent);
    }

    #[tokio::test]
    async fn test_status() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let vault = vault(&temp, remote);

        let before = vault.status();
        assert_eq!(before.state, ReplicaState::Absent);
        assert!(before.since_last_sync.is_none());

        vault.sync().await.unwrap();
        let after = vault.status();
        assert_eq!(after.state, ReplicaState::Ready);
        assert!(after.since_last_sync.is_some());
        assert_eq!(after.pending_pushes, 0);
    }
}
