//! Filesystem operations scoped beneath the working-copy root.
//!
//! Callers pass paths already normalized by [`crate::paths`]; this layer
//! additionally refuses anything that resolves outside the root through a
//! symlink.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Serialize;
use tokio::fs;

use crate::error::VaultError;
use crate::paths::{matches_extension, METADATA_DIRS};

type Result<T> = std::result::Result<T, VaultError>;

/// A file or directory found by [`WorkingCopy::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Path relative to the vault root, `/`-separated
    pub path: String,
    pub is_dir: bool,
}

/// Options for directory listings.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Walk subdirectories
    pub recursive: bool,
    /// Include directory entries in the result
    pub include_directories: bool,
    /// Only return files with one of these extensions
    pub extensions: Option<Vec<String>>,
}

/// The local directory tree mirroring the vault.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    root: PathBuf,
}

impl WorkingCopy {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Whether the working copy directory exists at all.
    pub async fn is_present(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Delete the entire working copy.
    pub async fn remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::Io {
                path: self.root.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Reject paths whose nearest existing ancestor resolves outside the root.
    async fn contained(&self, rel: &str) -> Result<PathBuf> {
        let path = self.full_path(rel);
        let root = fs::canonicalize(&self.root)
            .await
            .map_err(|e| VaultError::from_io("", e))?;

        let mut probe = path.clone();
        loop {
            match fs::canonicalize(&probe).await {
                Ok(real) if real.starts_with(&root) => return Ok(path),
                Ok(_) => {
                    return Err(VaultError::InvalidPath {
                        path: rel.to_string(),
                        reason: "Path resolves outside the vault root".to_string(),
                    });
                }
                Err(_) => {
                    if !probe.pop() {
                        return Ok(path);
                    }
                }
            }
        }
    }

    pub async fn read(&self, rel: &str) -> Result<String> {
        let path = self.contained(rel).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| VaultError::from_io(rel, e))?;
        if metadata.is_dir() {
            return Err(VaultError::IsDirectory {
                path: rel.to_string(),
            });
        }
        fs::read_to_string(&path)
            .await
            .map_err(|e| VaultError::from_io(rel, e))
    }

    /// Write `content`, creating parent directories as needed.
    pub async fn write(&self, rel: &str, content: &str) -> Result<()> {
        let path = self.contained(rel).await?;

        if let Ok(metadata) = fs::metadata(&path).await {
            if metadata.is_dir() {
                return Err(VaultError::IsDirectory {
                    path: rel.to_string(),
                });
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::from_io(rel, e))?;
        }

        atomic_write(&path, content)
            .await
            .map_err(|e| VaultError::from_io(rel, e))
    }

    pub async fn delete(&self, rel: &str) -> Result<()> {
        let path = self.contained(rel).await?;
        let metadata = fs::symlink_metadata(&path)
            .await
            .map_err(|e| VaultError::from_io(rel, e))?;
        if metadata.is_dir() {
            return Err(VaultError::IsDirectory {
                path: rel.to_string(),
            });
        }
        fs::remove_file(&path)
            .await
            .map_err(|e| VaultError::from_io(rel, e))
    }

    /// Rename `from` to `to`, creating the destination's parents.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.contained(from).await?;
        let to_path = self.contained(to).await?;

        if fs::symlink_metadata(&from_path).await.is_err() {
            return Err(VaultError::NotFound {
                path: from.to_string(),
            });
        }
        if fs::symlink_metadata(&to_path).await.is_ok() {
            return Err(VaultError::AlreadyExists {
                path: to.to_string(),
            });
        }

        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::from_io(to, e))?;
        }

        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| VaultError::from_io(from, e))
    }

    pub async fn create_dir(&self, rel: &str, recursive: bool) -> Result<()> {
        let path = self.contained(rel).await?;

        let result = if recursive {
            if let Ok(metadata) = fs::metadata(&path).await {
                if !metadata.is_dir() {
                    return Err(VaultError::AlreadyExists {
                        path: rel.to_string(),
                    });
                }
            }
            fs::create_dir_all(&path).await
        } else {
            fs::create_dir(&path).await
        };
        result.map_err(|e| VaultError::from_io(rel, e))
    }

    /// List entries under `rel` (the root when empty), sorted by path.
    pub async fn list(&self, rel: &str, options: &ListOptions) -> Result<Vec<FileEntry>> {
        let path = self.contained(rel).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| VaultError::from_io(rel, e))?;
        if !metadata.is_dir() {
            return Err(VaultError::NotDirectory {
                path: rel.to_string(),
            });
        }

        let mut entries = Vec::new();
        self.list_recursive(&path, rel, options, &mut entries).await?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn list_recursive(
        &self,
        dir: &Path,
        rel_dir: &str,
        options: &ListOptions,
        entries: &mut Vec<FileEntry>,
    ) -> Result<()> {
        let mut reader = fs::read_dir(dir)
            .await
            .map_err(|e| VaultError::from_io(rel_dir, e))?;

        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| VaultError::from_io(rel_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let rel = if rel_dir.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel_dir, name)
            };

            let file_type = entry
                .file_type()
                .await
                .map_err(|e| VaultError::from_io(&rel, e))?;

            if file_type.is_dir() {
                if METADATA_DIRS.contains(&name.as_str()) {
                    continue;
                }
                if options.include_directories {
                    entries.push(FileEntry {
                        path: rel.clone(),
                        is_dir: true,
                    });
                }
                if options.recursive {
                    Box::pin(self.list_recursive(&entry.path(), &rel, options, entries)).await?;
                }
            } else {
                let wanted = options
                    .extensions
                    .as_ref()
                    .map(|exts| matches_extension(&name, exts))
                    .unwrap_or(true);
                if wanted {
                    entries.push(FileEntry {
                        path: rel,
                        is_dir: false,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Generate a random hex string for temp file names.
fn random_hex() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Atomic write using temp file + rename.
///
/// The file is either fully written or not modified at all.
async fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension(format!("{}.tmp", random_hex()));

    if let Err(e) = fs::write(&temp_path, content).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_copy() -> (TempDir, WorkingCopy) {
        let temp_dir = TempDir::new().unwrap();
        let copy = WorkingCopy::new(temp_dir.path().to_path_buf());
        (temp_dir, copy)
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let (temp, copy) = create_test_copy();

        copy.write("knowledge/deep/Note.md", "hello").await.unwrap();

        assert!(temp.path().join("knowledge/deep/Note.md").exists());
        assert_eq!(copy.read("knowledge/deep/Note.md").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let (temp, copy) = create_test_copy();

        copy.write("Note.md", "one").await.unwrap();
        copy.write("Note.md", "two").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Note.md"]);
    }

    #[tokio::test]
    async fn test_read_missing_and_directory() {
        let (temp, copy) = create_test_copy();
        std::fs::create_dir(temp.path().join("dir")).unwrap();

        assert!(matches!(
            copy.read("missing.md").await,
            Err(VaultError::NotFound { .. })
        ));
        assert!(matches!(
            copy.read("dir").await,
            Err(VaultError::IsDirectory { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_rejects_directory() {
        let (temp, copy) = create_test_copy();
        std::fs::create_dir(temp.path().join("dir")).unwrap();
        std::fs::write(temp.path().join("file.md"), "x").unwrap();

        assert!(matches!(
            copy.delete("dir").await,
            Err(VaultError::IsDirectory { .. })
        ));
        copy.delete("file.md").await.unwrap();
        assert!(!temp.path().join("file.md").exists());
        assert!(matches!(
            copy.delete("file.md").await,
            Err(VaultError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_rules() {
        let (temp, copy) = create_test_copy();
        std::fs::write(temp.path().join("a.md"), "a").unwrap();
        std::fs::write(temp.path().join("b.md"), "b").unwrap();

        assert!(matches!(
            copy.rename("a.md", "b.md").await,
            Err(VaultError::AlreadyExists { .. })
        ));
        assert!(matches!(
            copy.rename("missing.md", "c.md").await,
            Err(VaultError::NotFound { .. })
        ));

        copy.rename("a.md", "archive/2024/a.md").await.unwrap();
        assert!(!temp.path().join("a.md").exists());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("archive/2024/a.md")).unwrap(),
            "a"
        );
    }

    #[tokio::test]
    async fn test_create_dir() {
        let (temp, copy) = create_test_copy();

        assert!(matches!(
            copy.create_dir("a/b", false).await,
            Err(VaultError::NotFound { .. })
        ));
        copy.create_dir("a/b", true).await.unwrap();
        assert!(temp.path().join("a/b").is_dir());
        // mkdir -p is idempotent, plain mkdir is not
        copy.create_dir("a/b", true).await.unwrap();
        assert!(matches!(
            copy.create_dir("a/b", false).await,
            Err(VaultError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (temp, copy) = create_test_copy();
        let root = temp.path();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::create_dir_all(root.join(".obsidian")).unwrap();
        std::fs::create_dir_all(root.join("knowledge/sub")).unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(root.join(".obsidian/app.json"), "{}").unwrap();
        std::fs::write(root.join("Log.md"), "").unwrap();
        std::fs::write(root.join("image.png"), "").unwrap();
        std::fs::write(root.join("knowledge/Rust.md"), "").unwrap();
        std::fs::write(root.join("knowledge/sub/Deep.md"), "").unwrap();

        let shallow = copy.list("", &ListOptions::default()).await.unwrap();
        let paths: Vec<_> = shallow.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Log.md", "image.png"]);

        let options = ListOptions {
            recursive: true,
            include_directories: true,
            extensions: Some(vec!["md".to_string()]),
        };
        let deep = copy.list("", &options).await.unwrap();
        assert_eq!(
            deep,
            vec![
                FileEntry { path: "Log.md".into(), is_dir: false },
                FileEntry { path: "knowledge".into(), is_dir: true },
                FileEntry { path: "knowledge/Rust.md".into(), is_dir: false },
                FileEntry { path: "knowledge/sub".into(), is_dir: true },
                FileEntry { path: "knowledge/sub/Deep.md".into(), is_dir: false },
            ]
        );

        let sub = copy.list("knowledge", &ListOptions::default()).await.unwrap();
        assert_eq!(sub, vec![FileEntry { path: "knowledge/Rust.md".into(), is_dir: false }]);
    }

    #[tokio::test]
    async fn test_list_errors() {
        let (temp, copy) = create_test_copy();
        std::fs::write(temp.path().join("file.md"), "").unwrap();

        assert!(matches!(
            copy.list("missing", &ListOptions::default()).await,
            Err(VaultError::NotFound { .. })
        ));
        assert!(matches!(
            copy.list("file.md", &ListOptions::default()).await,
            Err(VaultError::NotDirectory { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let (temp, copy) = create_test_copy();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.md"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        assert!(matches!(
            copy.read("link/secret.md").await,
            Err(VaultError::InvalidPath { .. })
        ));
        assert!(matches!(
            copy.write("link/new.md", "x").await,
            Err(VaultError::InvalidPath { .. })
        ));
    }
}
