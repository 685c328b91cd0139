//! In-memory test doubles for the remote repository and the retry clock.
//!
//! `FakeRemote` keeps the remote's history in memory and simulates one local
//! clone's HEAD and index on top of a real directory, so the engine's
//! filesystem work is exercised for real while every git primitive is
//! counted and can be made to fail or stall.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GitError;
use crate::remote::{CleanOptions, RemoteRepository, ResetMode, Result};
use crate::retry::Sleeper;

type Tree = BTreeMap<String, String>;

/// Sleeper that records requested delays instead of waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// A commit on the fake remote.
#[derive(Debug, Clone)]
pub struct RemoteCommit {
    pub message: String,
    /// Paths added, modified or removed by this commit
    pub changed: Vec<String>,
    tree: Tree,
}

/// How many times each primitive was invoked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub clone: usize,
    pub fetch: usize,
    pub reset: usize,
    pub rebase: usize,
    pub clean: usize,
    pub stage: usize,
    pub commit: usize,
    pub push: usize,
    pub set_remote_url: usize,
}

struct LocalRepo {
    workdir: PathBuf,
    head: Tree,
    index: Tree,
    /// Remote tip and history length as of the last fetch
    fetched: Option<(Tree, usize)>,
    /// Remote history length HEAD is based on
    base: usize,
    unpushed: Vec<RemoteCommit>,
    remote_url: String,
}

#[derive(Default)]
struct State {
    commits: Vec<RemoteCommit>,
    local: Option<LocalRepo>,
    calls: CallCounts,
    /// Primitives in the order they took effect
    events: Vec<&'static str>,
    fail_clones: u32,
    fail_fetches: u32,
    fail_pushes: u32,
    clone_delay: Duration,
    fetch_delay: Duration,
    push_delay: Duration,
}

impl State {
    fn tip(&self) -> Tree {
        self.commits
            .last()
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    fn local_mut(&mut self, workdir: &Path, command: &str) -> Result<&mut LocalRepo> {
        match self.local.as_mut() {
            Some(local) if local.workdir == workdir => Ok(local),
            _ => Err(failed(command, "not a git repository")),
        }
    }
}

fn failed(command: &str, stderr: &str) -> GitError {
    GitError::Failed {
        command: command.to_string(),
        code: Some(128),
        stderr: stderr.to_string(),
    }
}

fn io_error(command: &str, e: std::io::Error) -> GitError {
    GitError::Io {
        command: command.to_string(),
        message: e.to_string(),
    }
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn under(path: &str, prefix: &str) -> bool {
    prefix.is_empty() || path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Read every file under `workdir` except the `.git` directory.
fn scan(workdir: &Path) -> std::io::Result<Tree> {
    fn walk(dir: &Path, rel: &str, tree: &mut Tree) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if rel.is_empty() && name == ".git" {
                continue;
            }
            let path = if rel.is_empty() {
                name
            } else {
                format!("{}/{}", rel, name)
            };
            if entry.file_type()?.is_dir() {
                walk(&entry.path(), &path, tree)?;
            } else {
                tree.insert(path, std::fs::read_to_string(entry.path())?);
            }
        }
        Ok(())
    }

    let mut tree = Tree::new();
    walk(workdir, "", &mut tree)?;
    Ok(tree)
}

fn write_tree(workdir: &Path, tree: &Tree) -> std::io::Result<()> {
    for (path, content) in tree {
        let full = workdir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, content)?;
    }
    Ok(())
}

/// Remove directories under `dir` that contain no files.
fn remove_empty_dirs(dir: &Path, is_root: bool) -> std::io::Result<bool> {
    let mut empty = true;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if is_root && entry.file_name() == ".git" {
            empty = false;
            continue;
        }
        if entry.file_type()?.is_dir() {
            if remove_empty_dirs(&entry.path(), false)? {
                std::fs::remove_dir(entry.path())?;
            } else {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    Ok(empty)
}

fn diff(a: &Tree, b: &Tree) -> Vec<String> {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    keys.into_iter()
        .filter(|k| a.get(*k) != b.get(*k))
        .cloned()
        .collect()
}

/// In-memory remote with one simulated local clone.
pub struct FakeRemote {
    state: Mutex<State>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    /// Remote whose branch has a single empty commit.
    pub fn new() -> Self {
        let remote = Self {
            state: Mutex::new(State::default()),
        };
        remote.lock().commits.push(RemoteCommit {
            message: "initial".to_string(),
            changed: Vec::new(),
            tree: Tree::new(),
        });
        remote
    }

    /// Remote whose first commit contains `files`.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let remote = Self::new();
        {
            let mut state = remote.lock();
            let initial = &mut state.commits[0];
            for (path, content) in files {
                initial.tree.insert(path.to_string(), content.to_string());
                initial.changed.push(path.to_string());
            }
        }
        remote
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit directly on the remote, as another client would.
    /// `None` content deletes the path.
    pub fn push_external(&self, changes: &[(&str, Option<&str>)], message: &str) {
        let mut state = self.lock();
        let mut tree = state.tip();
        for (path, content) in changes {
            match content {
                Some(content) => {
                    tree.insert(path.to_string(), content.to_string());
                }
                None => {
                    tree.remove(*path);
                }
            }
        }
        state.commits.push(RemoteCommit {
            message: message.to_string(),
            changed: changes.iter().map(|(p, _)| p.to_string()).collect(),
            tree,
        });
    }

    /// File content at the remote branch tip.
    pub fn remote_file(&self, path: &str) -> Option<String> {
        self.lock().tip().get(path).cloned()
    }

    /// Paths present at the remote branch tip.
    pub fn remote_paths(&self) -> Vec<String> {
        self.lock().tip().keys().cloned().collect()
    }

    /// Remote history, oldest first.
    pub fn remote_commits(&self) -> Vec<RemoteCommit> {
        self.lock().commits.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Names of the primitives that took effect, oldest first. Fetches and
    /// pushes are recorded when they finish, after any injected delay.
    pub fn events(&self) -> Vec<&'static str> {
        self.lock().events.clone()
    }

    /// Local commits not yet on the remote.
    pub fn local_unpushed(&self) -> usize {
        self.lock()
            .local
            .as_ref()
            .map(|l| l.unpushed.len())
            .unwrap_or(0)
    }

    /// URL most recently configured for the local clone's remote.
    pub fn local_remote_url(&self) -> Option<String> {
        self.lock().local.as_ref().map(|l| l.remote_url.clone())
    }

    pub fn fail_next_clones(&self, n: u32) {
        self.lock().fail_clones = n;
    }

    pub fn fail_next_fetches(&self, n: u32) {
        self.lock().fail_fetches = n;
    }

    pub fn fail_next_pushes(&self, n: u32) {
        self.lock().fail_pushes = n;
    }

    pub fn set_clone_delay(&self, delay: Duration) {
        self.lock().clone_delay = delay;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.lock().fetch_delay = delay;
    }

    pub fn set_push_delay(&self, delay: Duration) {
        self.lock().push_delay = delay;
    }
}

#[async_trait]
impl RemoteRepository for FakeRemote {
    async fn clone_branch(&self, url: &str, dest: &Path, _branch: &str, _depth: u32) -> Result<()> {
        let (delay, fail, tree, base) = {
            let mut state = self.lock();
            state.calls.clone += 1;
            let fail = take_failure(&mut state.fail_clones);
            (state.clone_delay, fail, state.tip(), state.commits.len())
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(failed("clone", "injected clone failure"));
        }

        let occupied = std::fs::read_dir(dest)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if occupied {
            return Err(failed(
                "clone",
                "destination path already exists and is not an empty directory",
            ));
        }

        std::fs::create_dir_all(dest.join(".git")).map_err(|e| io_error("clone", e))?;
        write_tree(dest, &tree).map_err(|e| io_error("clone", e))?;

        let mut state = self.lock();
        state.events.push("clone");
        state.local = Some(LocalRepo {
            workdir: dest.to_path_buf(),
            head: tree.clone(),
            index: tree,
            fetched: None,
            base,
            unpushed: Vec::new(),
            remote_url: url.to_string(),
        });
        Ok(())
    }

    async fn fetch(&self, workdir: &Path, _remote: &str, _branch: &str) -> Result<()> {
        let (delay, fail) = {
            let mut state = self.lock();
            state.calls.fetch += 1;
            let fail = take_failure(&mut state.fail_fetches);
            (state.fetch_delay, fail)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(failed("fetch", "injected fetch failure"));
        }

        let mut state = self.lock();
        state.events.push("fetch");
        let snapshot = (state.tip(), state.commits.len());
        state.local_mut(workdir, "fetch")?.fetched = Some(snapshot);
        Ok(())
    }

    async fn reset(&self, workdir: &Path, _mode: ResetMode, reference: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.reset += 1;
        state.events.push("reset");
        let local = state.local_mut(workdir, "reset")?;

        let to_head = reference == "HEAD";
        let (target, base) = match &local.fetched {
            Some((tree, base)) if !to_head => (tree.clone(), *base),
            _ => (local.head.clone(), local.base),
        };

        for path in local.head.keys().chain(local.index.keys()) {
            if !target.contains_key(path) {
                let _ = std::fs::remove_file(workdir.join(path));
            }
        }
        write_tree(workdir, &target).map_err(|e| io_error("reset", e))?;

        local.head = target.clone();
        local.index = target;
        if !to_head {
            local.base = base;
            local.unpushed.clear();
        }
        Ok(())
    }

    async fn rebase(&self, workdir: &Path, _upstream: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.rebase += 1;
        state.events.push("rebase");

        let base = state.local_mut(workdir, "rebase")?.base;
        let base_tree = state
            .commits
            .get(base.wrapping_sub(1))
            .map(|c| c.tree.clone())
            .unwrap_or_default();
        let local = state.local_mut(workdir, "rebase")?;

        let (upstream, upstream_len) = match &local.fetched {
            Some((tree, len)) if *len != local.base => (tree.clone(), *len),
            _ => return Ok(()),
        };

        // Replay each commit's changes; a path both sides changed differently
        // is a conflict and leaves everything untouched.
        let mut tree = upstream.clone();
        let mut replayed = Vec::with_capacity(local.unpushed.len());
        for commit in &local.unpushed {
            for path in &commit.changed {
                let ours = commit.tree.get(path);
                if upstream.get(path) != base_tree.get(path) && upstream.get(path) != ours {
                    return Err(GitError::Failed {
                        command: "rebase".to_string(),
                        code: Some(1),
                        stderr: format!("CONFLICT (content): Merge conflict in {}", path),
                    });
                }
                match ours {
                    Some(content) => tree.insert(path.clone(), content.clone()),
                    None => tree.remove(path),
                };
            }
            replayed.push(RemoteCommit {
                message: commit.message.clone(),
                changed: commit.changed.clone(),
                tree: tree.clone(),
            });
        }

        for path in local.head.keys() {
            if !tree.contains_key(path) {
                let _ = std::fs::remove_file(workdir.join(path));
            }
        }
        write_tree(workdir, &tree).map_err(|e| io_error("rebase", e))?;

        local.head = tree.clone();
        local.index = tree;
        local.base = upstream_len;
        local.unpushed = replayed;
        Ok(())
    }

    async fn clean(&self, workdir: &Path, options: CleanOptions) -> Result<()> {
        let mut state = self.lock();
        state.calls.clean += 1;
        state.events.push("clean");
        let local = state.local_mut(workdir, "clean")?;

        let on_disk = scan(workdir).map_err(|e| io_error("clean", e))?;
        for path in on_disk.keys() {
            if !local.index.contains_key(path) {
                std::fs::remove_file(workdir.join(path)).map_err(|e| io_error("clean", e))?;
            }
        }
        if options.directories {
            remove_empty_dirs(workdir, true).map_err(|e| io_error("clean", e))?;
        }
        Ok(())
    }

    async fn stage(&self, workdir: &Path, paths: &[String]) -> Result<()> {
        let mut state = self.lock();
        state.calls.stage += 1;
        state.events.push("stage");
        let local = state.local_mut(workdir, "add")?;

        let on_disk = scan(workdir).map_err(|e| io_error("add", e))?;
        let prefixes: Vec<&str> = if paths.is_empty() {
            vec![""]
        } else {
            paths.iter().map(String::as_str).collect()
        };

        for prefix in prefixes {
            let matched_disk: Vec<(&String, &String)> =
                on_disk.iter().filter(|(p, _)| under(p, prefix)).collect();
            let matched_index: Vec<String> = local
                .index
                .keys()
                .filter(|p| under(p, prefix))
                .cloned()
                .collect();

            if !prefix.is_empty() && matched_disk.is_empty() && matched_index.is_empty() {
                return Err(failed(
                    "add",
                    &format!("pathspec '{}' did not match any files", prefix),
                ));
            }

            for path in matched_index {
                if !on_disk.contains_key(&path) {
                    local.index.remove(&path);
                }
            }
            for (path, content) in matched_disk {
                local.index.insert(path.clone(), content.clone());
            }
        }
        Ok(())
    }

    async fn staged_changes(&self, workdir: &Path) -> Result<Vec<String>> {
        let mut state = self.lock();
        let local = state.local_mut(workdir, "diff")?;
        Ok(diff(&local.head, &local.index))
    }

    async fn commit(&self, workdir: &Path, message: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.commit += 1;
        state.events.push("commit");
        let local = state.local_mut(workdir, "commit")?;

        let changed = diff(&local.head, &local.index);
        if changed.is_empty() {
            return Err(GitError::Failed {
                command: "commit".to_string(),
                code: Some(1),
                stderr: "nothing to commit, working tree clean".to_string(),
            });
        }

        local.head = local.index.clone();
        local.unpushed.push(RemoteCommit {
            message: message.to_string(),
            changed,
            tree: local.head.clone(),
        });
        Ok(())
    }

    async fn push(&self, workdir: &Path, _remote: &str, _branch: &str) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push += 1;
            state.push_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.events.push("push");
        if take_failure(&mut state.fail_pushes) {
            return Err(failed("push", "injected push failure"));
        }

        let remote_len = state.commits.len();
        let local = state.local_mut(workdir, "push")?;
        if local.unpushed.is_empty() {
            return Ok(());
        }
        if local.base != remote_len {
            return Err(GitError::Failed {
                command: "push".to_string(),
                code: Some(1),
                stderr: "! [rejected] (non-fast-forward)".to_string(),
            });
        }

        let pushed: Vec<RemoteCommit> = local.unpushed.drain(..).collect();
        local.base = remote_len + pushed.len();
        state.commits.extend(pushed);
        Ok(())
    }

    async fn set_remote_url(&self, workdir: &Path, _remote: &str, url: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.set_remote_url += 1;
        state.local_mut(workdir, "remote set-url")?.remote_url = url.to_string();
        Ok(())
    }
}
