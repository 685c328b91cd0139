//! Lexical path validation for paths relative to the working-copy root.
//!
//! These are pure functions with no I/O, so a rejected path never touches the
//! filesystem or the network.

use std::path::{Component, Path};

use crate::error::VaultError;

/// Directory names that belong to version control or vault tooling, never to
/// the vault's content.
pub const METADATA_DIRS: &[&str] = &[".git", ".obsidian", ".trash"];

/// Normalize a caller-supplied path into a clean, `/`-separated relative path.
///
/// - A leading `/` is stripped (paths are always relative to the vault root)
/// - `.` components are dropped and `..` components pop the previous one
/// - Anything that climbs above the root is rejected
/// - Paths into `.git` are rejected; the index belongs to the engine
///
/// The empty string (or `/`, `.`) denotes the root itself.
pub fn normalize_relative_path(path: &str) -> Result<String, VaultError> {
    let invalid = |reason: &str| VaultError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.contains('\0') {
        return Err(invalid("Path contains a NUL byte"));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(_) => return Err(invalid("Path is absolute")),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(invalid("Path escapes the vault root"));
                }
            }
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| invalid("Path is not valid UTF-8"))?;
                parts.push(part);
            }
        }
    }

    if parts.first() == Some(&".git") {
        return Err(invalid("Path points into version-control metadata"));
    }

    Ok(parts.join("/"))
}

/// Like [`normalize_relative_path`], but the root itself is not a valid target.
pub fn normalize_file_path(path: &str) -> Result<String, VaultError> {
    let clean = normalize_relative_path(path)?;
    if clean.is_empty() {
        return Err(VaultError::InvalidPath {
            path: path.to_string(),
            reason: "Path refers to the vault root".to_string(),
        });
    }
    Ok(clean)
}

/// Check whether a file name matches an extension filter.
///
/// Extensions are compared case-insensitively and may be given with or
/// without the leading dot.
pub fn matches_extension(name: &str, extensions: &[String]) -> bool {
    let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_normal_path() {
        assert_eq!(
            normalize_relative_path("knowledge/Note.md").unwrap(),
            "knowledge/Note.md"
        );
    }

    #[test]
    fn test_strips_leading_slash() {
        assert_eq!(
            normalize_relative_path("/knowledge/Note.md").unwrap(),
            "knowledge/Note.md"
        );
    }

    #[test]
    fn test_resolves_inner_parent_components() {
        assert_eq!(
            normalize_relative_path("a/./b/../c.md").unwrap(),
            "a/c.md"
        );
    }

    #[test]
    fn test_rejects_escape() {
        for path in ["../outside", "a/../../outside", "..", "/../etc/passwd"] {
            let result = normalize_relative_path(path);
            assert!(
                matches!(result, Err(VaultError::InvalidPath { .. })),
                "expected {} to be rejected",
                path
            );
        }
    }

    #[test]
    fn test_rejects_git_metadata() {
        assert!(matches!(
            normalize_relative_path(".git/config"),
            Err(VaultError::InvalidPath { .. })
        ));
        assert!(matches!(
            normalize_relative_path("notes/../.git"),
            Err(VaultError::InvalidPath { .. })
        ));
        // Only the top-level .git belongs to the replica
        assert!(normalize_relative_path("notes/.gitkeep").is_ok());
    }

    #[test]
    fn test_root_is_empty() {
        assert_eq!(normalize_relative_path("").unwrap(), "");
        assert_eq!(normalize_relative_path("/").unwrap(), "");
        assert_eq!(normalize_relative_path("./").unwrap(), "");
        assert!(matches!(
            normalize_file_path("/"),
            Err(VaultError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_matches_extension() {
        let exts = vec!["md".to_string(), ".CANVAS".to_string()];
        assert!(matches_extension("Note.md", &exts));
        assert!(matches_extension("Board.canvas", &exts));
        assert!(!matches_extension("image.png", &exts));
        assert!(!matches_extension("README", &exts));
    }
}
