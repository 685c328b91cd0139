//! CreateDirectory tool - create a directory in the working copy.

use rmcp::model::{CallToolResult, Content, ErrorData};
use vault_sync::Vault;

use super::to_error_data;

/// Execute the CreateDirectory tool.
///
/// Git does not track empty directories, so nothing is committed.
pub async fn execute(vault: &Vault, path: &str, recursive: bool) -> Result<CallToolResult, ErrorData> {
    vault
        .create_directory(path, recursive)
        .await
        .map_err(to_error_data)?;

    Ok(CallToolResult::success(vec![Content::text(format!(
        "Created directory {}",
        path
    ))]))
}
