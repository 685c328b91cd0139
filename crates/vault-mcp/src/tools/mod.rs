//! MCP tool implementations.
//!
//! Each tool is an `execute` function over a [`Vault`](vault_sync::Vault)
//! returning the MCP result directly, so tools can be tested without a
//! running server.

pub mod create_directory;
pub mod delete_file;
pub mod list_files;
pub mod move_file;
pub mod read_file;
pub mod vault_status;
pub mod write_file;

use rmcp::model::{CallToolResult, Content, ErrorData};
use serde::Serialize;
use vault_sync::{MutationReport, VaultError};

/// Map a vault error to an MCP error.
///
/// Filesystem-contract violations are the caller's to fix and become
/// `invalid_params`; sync, push and I/O failures become `internal_error`.
/// Both carry `{ kind, paths }` so clients can react without parsing text.
pub fn to_error_data(e: VaultError) -> ErrorData {
    let data = serde_json::json!({
        "kind": e.kind().as_str(),
        "paths": e.paths(),
    });
    if e.is_contract_violation() {
        ErrorData::invalid_params(e.to_string(), Some(data))
    } else {
        ErrorData::internal_error(e.to_string(), Some(data))
    }
}

/// Serialize `value` as the tool's single JSON text result.
pub fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, ErrorData> {
    let json = serde_json::to_string(value).map_err(|e| {
        ErrorData::internal_error(format!("Failed to serialize response: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Human-readable line describing what happened to a mutation.
pub fn describe(action: &str, report: &MutationReport) -> String {
    match report.outcome {
        vault_sync::CommitOutcome::Unchanged => {
            format!("{} {} (no changes to commit)", action, report.paths.join(" -> "))
        }
        vault_sync::CommitOutcome::Pushed { attempts } => format!(
            "{} {} (committed and pushed, {} attempt{})",
            action,
            report.paths.join(" -> "),
            attempts,
            if attempts == 1 { "" } else { "s" }
        ),
    }
}
