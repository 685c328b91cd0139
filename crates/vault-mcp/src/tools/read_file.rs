//! ReadFile tool - read file content with a content hash for optimistic writes.

use rmcp::model::{CallToolResult, ErrorData};
use serde::Serialize;
use vault_sync::{ContentHash, Vault};

use super::{json_result, to_error_data};

/// Response from ReadFile tool.
#[derive(Serialize)]
pub struct ReadFileResponse {
    /// The content of the file
    pub content: String,
    /// Content hash for optimistic locking - pass this to write_file
    pub content_hash: String,
}

/// Execute the ReadFile tool.
pub async fn execute(vault: &Vault, path: &str) -> Result<CallToolResult, ErrorData> {
    let content = vault.read_file(path).await.map_err(to_error_data)?;
    let content_hash = ContentHash::from_content(&content);

    json_result(&ReadFileResponse {
        content,
        content_hash: content_hash.as_str().to_string(),
    })
}
