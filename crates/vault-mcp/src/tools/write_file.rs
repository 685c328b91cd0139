//! WriteFile tool - create or overwrite a file, committed and pushed.

use rmcp::model::{CallToolResult, Content, ErrorData};
use vault_sync::Vault;

use super::{describe, to_error_data};

/// Execute the WriteFile tool.
///
/// With `content_hash`, the write only happens if the file still has the
/// content that hash was computed from.
pub async fn execute(
    vault: &Vault,
    path: &str,
    content: &str,
    content_hash: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let report = match content_hash {
        Some(hash) => vault.write_file_checked(path, content, hash).await,
        None => vault.write_file(path, content).await,
    }
    .map_err(to_error_data)?;

    Ok(CallToolResult::success(vec![Content::text(describe(
        "Wrote", &report,
    ))]))
}
