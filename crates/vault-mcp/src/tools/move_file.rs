//! MoveFile tool - move or rename a file as a single commit.

use rmcp::model::{CallToolResult, Content, ErrorData};
use vault_sync::Vault;

use super::{describe, to_error_data};

/// Execute the MoveFile tool.
///
/// Fails if the source is missing or the destination already exists.
pub async fn execute(vault: &Vault, from: &str, to: &str) -> Result<CallToolResult, ErrorData> {
    let report = vault.move_file(from, to).await.map_err(to_error_data)?;

    Ok(CallToolResult::success(vec![Content::text(describe(
        "Moved", &report,
    ))]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{create_test_vault, text_of};

    #[tokio::test]
    async fn test_move_file() {
        let (_temp_dir, remote, vault) = create_test_vault(&[("draft.md", "text")]);

        let result = execute(&vault, "draft.md", "published/post.md")
            .await
            .expect("should succeed");

        assert!(text_of(&result).contains("Moved draft.md -> published/post.md"));
        assert!(remote.remote_file("draft.md").is_none());
        assert_eq!(remote.remote_file("published/post.md").as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_move_onto_existing_file() {
        let (_temp_dir, remote, vault) = create_test_vault(&[("a.md", "A"), ("b.md", "B")]);

        let err = execute(&vault, "a.md", "b.md").await.unwrap_err();

        let data = err.data.expect("data");
        assert_eq!(data["kind"], "already_exists");
        assert_eq!(data["paths"][0], "b.md");
        assert_eq!(remote.remote_file("a.md").as_deref(), Some("A"));
    }
}
