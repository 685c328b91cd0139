//! ListFiles tool - list files and directories in the vault.

use rmcp::model::{CallToolResult, ErrorData};
use vault_sync::{ListOptions, Vault};

use super::{json_result, to_error_data};

/// Execute the ListFiles tool.
///
/// Returns a JSON array of `{ path, is_dir }` sorted by path.
pub async fn execute(vault: &Vault, path: &str, options: ListOptions) -> Result<CallToolResult, ErrorData> {
    let entries = vault.list_files(path, &options).await.map_err(to_error_data)?;
    json_result(&entries)
}
