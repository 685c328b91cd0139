//! DeleteFile tool - delete a file from the vault.

use rmcp::model::{CallToolResult, Content, ErrorData};
use vault_sync::Vault;

use super::{describe, to_error_data};

/// Execute the DeleteFile tool.
///
/// Returns an error if the file doesn't exist or is a directory.
pub async fn execute(vault: &Vault, path: &str) -> Result<CallToolResult, ErrorData> {
    let report = vault.delete_file(path).await.map_err(to_error_data)?;

    Ok(CallToolResult::success(vec![Content::text(describe(
        "Deleted", &report,
    ))]))
}
