use rmcp::{
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vault_sync::{GitCli, ListOptions, Vault};

#[cfg(feature = "http")]
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};

mod config;
mod tools;

use config::Config;

/// Parameters for the ReadFile tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    /// Path relative to the vault root, e.g. "knowledge/Rust.md"
    pub path: String,
}

/// Parameters for the WriteFile tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    /// Path relative to the vault root. Missing parent directories are created.
    pub path: String,
    /// The full new content of the file
    pub content: String,
    /// Hash returned by read_file. When given, the write fails if the file changed since that read.
    #[serde(default)]
    pub content_hash: Option<String>,
}

/// Parameters for the DeleteFile tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFileParams {
    /// Path relative to the vault root
    pub path: String,
}

/// Parameters for the MoveFile tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveFileParams {
    /// Source path
    pub from: String,
    /// Destination path. Must not exist yet.
    pub to: String,
}

/// Parameters for the CreateDirectory tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateDirectoryParams {
    /// Path relative to the vault root
    pub path: String,
    /// Create missing parent directories too (default: false)
    #[serde(default)]
    pub recursive: bool,
}

/// Parameters for the ListFiles tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesParams {
    /// Directory relative to the vault root (default: the root)
    #[serde(default)]
    pub path: String,
    /// Walk subdirectories (default: false)
    #[serde(default)]
    pub recursive: bool,
    /// Include directories in the listing (default: false)
    #[serde(default)]
    pub include_directories: bool,
    /// Only list files with these extensions, e.g. ["md", "canvas"]
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
}

/// The MCP server. Cheap to clone: every session shares one vault.
#[derive(Clone)]
pub struct VaultServer {
    vault: Arc<Vault>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl VaultServer {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self {
            vault,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Read a file from the vault. The vault is synced with its git remote first. Returns JSON with the content and a content_hash to pass to write_file.")]
    async fn read_file(&self, params: Parameters<ReadFileParams>) -> Result<CallToolResult, ErrorData> {
        tools::read_file::execute(&self.vault, &params.0.path).await
    }

    #[tool(description = "Create or overwrite a file. The change is committed and pushed to the git remote as its own commit. Pass content_hash from read_file to avoid overwriting concurrent edits.")]
    async fn write_file(&self, params: Parameters<WriteFileParams>) -> Result<CallToolResult, ErrorData> {
        tools::write_file::execute(
            &self.vault,
            &params.0.path,
            &params.0.content,
            params.0.content_hash.as_deref(),
        )
        .await
    }

    #[tool(description = "Permanently delete a file from the vault. The deletion is committed and pushed. Returns an error if the file doesn't exist.")]
    async fn delete_file(&self, params: Parameters<DeleteFileParams>) -> Result<CallToolResult, ErrorData> {
        tools::delete_file::execute(&self.vault, &params.0.path).await
    }

    #[tool(description = "Move or rename a file. Committed and pushed as a single change. Fails if the destination already exists.")]
    async fn move_file(&self, params: Parameters<MoveFileParams>) -> Result<CallToolResult, ErrorData> {
        tools::move_file::execute(&self.vault, &params.0.from, &params.0.to).await
    }

    #[tool(description = "Create a directory in the vault. Empty directories are not tracked by git and are not pushed.")]
    async fn create_directory(&self, params: Parameters<CreateDirectoryParams>) -> Result<CallToolResult, ErrorData> {
        tools::create_directory::execute(&self.vault, &params.0.path, params.0.recursive).await
    }

    #[tool(description = "List files in a vault directory. Skips .git, .obsidian and .trash. Returns a JSON array of { path, is_dir } sorted by path.")]
    async fn list_files(&self, params: Parameters<ListFilesParams>) -> Result<CallToolResult, ErrorData> {
        let params = params.0;
        let options = ListOptions {
            recursive: params.recursive,
            include_directories: params.include_directories,
            extensions: params.extensions,
        };
        tools::list_files::execute(&self.vault, &params.path, options).await
    }

    #[tool(description = "Report the vault replica's sync state, time since the last successful sync, and commits waiting to be pushed.")]
    async fn vault_status(&self) -> Result<CallToolResult, ErrorData> {
        tools::vault_status::execute(&self.vault)
    }
}

#[tool_handler]
impl rmcp::ServerHandler for VaultServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "vault-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Git-backed vault MCP server - read and modify files in a vault that is kept in sync with a git remote. Every change is committed and pushed."
                    .into(),
            ),
        }
    }
}

/// CLI arguments for the MCP server.
#[cfg(feature = "http")]
#[derive(clap::Parser)]
#[command(name = "vault-mcp")]
#[command(about = "MCP server for a git-backed vault")]
struct Cli {
    /// Run in HTTP mode instead of stdio
    #[arg(long)]
    http: bool,

    /// Port to listen on in HTTP mode
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Address to bind to in HTTP mode. Use 0.0.0.0 for all interfaces (unsafe without auth).
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,
}

#[cfg(feature = "http")]
const DEFAULT_HTTP_PORT: u16 = 3000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout belongs to the stdio transport
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Vault {} ({}) at {}",
        config.vault.remote_url,
        config.vault.branch,
        config.vault.local_path.display()
    );

    let remote = Arc::new(GitCli::from_config(&config.vault));
    let vault = Arc::new(Vault::new(config.vault, remote));

    #[cfg(feature = "http")]
    {
        use clap::Parser;
        let cli = Cli::parse();

        if cli.http {
            return run_http_server(vault, &cli.bind, cli.port).await;
        }
    }

    // Default: Run with STDIO transport
    run_stdio_server(vault).await
}

/// Run the server with STDIO transport (default mode).
async fn run_stdio_server(vault: Arc<Vault>) -> anyhow::Result<()> {
    let server = VaultServer::new(vault);

    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("Error starting server: {}", e);
    })?;

    tracing::info!("Vault MCP server started (stdio)");
    service.waiting().await?;

    Ok(())
}

/// Run the server with HTTP transport.
#[cfg(feature = "http")]
async fn run_http_server(vault: Arc<Vault>, bind: &str, port: u16) -> anyhow::Result<()> {
    use anyhow::Context;

    // Every session gets its own server over the one shared vault, so
    // single-flight syncs and commit ordering span all clients.
    let service = StreamableHttpService::new(
        move || Ok(VaultServer::new(vault.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    // Parse bind address - default to localhost for safety
    let bind_addr: std::net::IpAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;
    let addr = std::net::SocketAddr::from((bind_addr, port));

    if bind_addr.is_unspecified() {
        tracing::info!(
            "Binding to all interfaces ({}). Ensure a reverse proxy handles authentication.",
            bind
        );
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}:{}", bind, port))?;

    tracing::info!("Vault MCP server started (HTTP) at http://{}/mcp", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix).
#[cfg(feature = "http")]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
