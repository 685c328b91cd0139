//! `RemoteRepository` implementation that shells out to the `git` executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{CommitterIdentity, VaultConfig};
use crate::credentials::redact;
use crate::error::GitError;
use crate::remote::{CleanOptions, RemoteRepository, ResetMode, Result};

/// Git client backed by the `git` command-line tool.
///
/// Child processes are killed when their future is dropped, so a timed-out
/// fetch does not linger in the background.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    committer: CommitterIdentity,
    /// Token scrubbed from any stderr captured into an error
    secret: Option<String>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
            committer: CommitterIdentity::default(),
            secret: None,
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client with the committer identity and secret taken from `config`.
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            program: PathBuf::from("git"),
            committer: config.committer.clone(),
            secret: config.secret().map(str::to_string),
        }
    }

    /// Use a specific git binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn identity(&self) -> [String; 2] {
        [
            format!("user.name={}", self.committer.name),
            format!("user.email={}", self.committer.email),
        ]
    }

    /// Run git with `args`, optionally inside `workdir`, returning stdout.
    async fn run(&self, workdir: Option<&Path>, command: &str, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        if let Some(dir) = workdir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(["-c", "core.quotePath=false", "--literal-pathspecs"])
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("git {}", command);

        let output = cmd.output().await.map_err(|e| GitError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Failed {
                command: command.to_string(),
                code: output.status.code(),
                stderr: redact(stderr.trim(), self.secret.as_deref()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RemoteRepository for GitCli {
    async fn clone_branch(&self, url: &str, dest: &Path, branch: &str, depth: u32) -> Result<()> {
        let depth = depth.to_string();
        let dest = dest.to_string_lossy();
        self.run(
            None,
            "clone",
            &[
                "clone",
                "--depth",
                &depth,
                "--single-branch",
                "--branch",
                branch,
                "--",
                url,
                &dest,
            ],
        )
        .await?;
        Ok(())
    }

    async fn fetch(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{}:refs/remotes/{}/{}", branch, remote, branch);
        self.run(Some(workdir), "fetch", &["fetch", "--quiet", remote, &refspec])
            .await?;
        Ok(())
    }

    async fn reset(&self, workdir: &Path, mode: ResetMode, reference: &str) -> Result<()> {
        let flag = match mode {
            ResetMode::Hard => "--hard",
        };
        self.run(Some(workdir), "reset", &["reset", "--quiet", flag, reference])
            .await?;
        Ok(())
    }

    async fn rebase(&self, workdir: &Path, upstream: &str) -> Result<()> {
        let [name, email] = self.identity();
        let result = self
            .run(
                Some(workdir),
                "rebase",
                &[
                    "-c",
                    &name,
                    "-c",
                    &email,
                    "-c",
                    "commit.gpgsign=false",
                    "rebase",
                    "--quiet",
                    upstream,
                ],
            )
            .await;

        if let Err(e) = result {
            if let Err(abort) = self.run(Some(workdir), "rebase --abort", &["rebase", "--abort"]).await {
                tracing::warn!("Failed to abort rebase: {}", abort);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn clean(&self, workdir: &Path, options: CleanOptions) -> Result<()> {
        let mut args = vec!["clean", "--quiet"];
        if options.force {
            args.push("-f");
        }
        if options.directories {
            args.push("-d");
        }
        if options.ignored {
            args.push("-x");
        }
        self.run(Some(workdir), "clean", &args).await?;
        Ok(())
    }

    async fn stage(&self, workdir: &Path, paths: &[String]) -> Result<()> {
        let mut args = vec!["add", "-A"];
        if !paths.is_empty() {
            // Named paths are staged even when .gitignore matches them
            args.push("--force");
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.run(Some(workdir), "add", &args).await?;
        Ok(())
    }

    async fn staged_changes(&self, workdir: &Path) -> Result<Vec<String>> {
        let stdout = self
            .run(
                Some(workdir),
                "diff",
                &["diff", "--cached", "--name-only", "--no-renames"],
            )
            .await?;
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn commit(&self, workdir: &Path, message: &str) -> Result<()> {
        let [name, email] = self.identity();
        self.run(
            Some(workdir),
            "commit",
            &[
                "-c",
                &name,
                "-c",
                &email,
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--quiet",
                "-m",
                message,
            ],
        )
        .await?;
        Ok(())
    }

    async fn push(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.run(Some(workdir), "push", &["push", "--quiet", remote, &refspec])
            .await?;
        Ok(())
    }

    async fn set_remote_url(&self, workdir: &Path, remote: &str, url: &str) -> Result<()> {
        self.run(
            Some(workdir),
            "remote set-url",
            &["remote", "set-url", remote, url],
        )
        .await?;
        Ok(())
    }
}
