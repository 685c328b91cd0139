//! VaultStatus tool - report the replica's sync state.

use rmcp::model::{CallToolResult, ErrorData};
use vault_sync::Vault;

use super::json_result;

/// Execute the VaultStatus tool. Performs no I/O.
pub fn execute(vault: &Vault) -> Result<CallToolResult, ErrorData> {
    json_result(&vault.status())
}
