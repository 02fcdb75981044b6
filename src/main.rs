//! Pincer - Main entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pincer::audit::AuditLog;
use pincer::callers::CallerRegistry;
use pincer::cli::{run_admin_command, Cli, Command};
use pincer::config::Config;
use pincer::gateway::Gateway;
use pincer::secrets::{OsKeychain, VaultStore};
use pincer::tools::{builtin_tools, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pincer=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            let keychain = Arc::new(OsKeychain::new());
            let store = Arc::new(VaultStore::open(&config.vault_db_path, keychain)?);
            let audit = AuditLog::open(&config.audit_log_path)?;
            let gateway = Gateway::new(
                store,
                ToolRegistry::new(builtin_tools()),
                CallerRegistry::with_builtin(),
                audit,
            );

            tracing::info!(
                vault = %config.vault_db_path.display(),
                audit = %config.audit_log_path.display(),
                "gateway serving on stdio"
            );
            pincer::server::run(gateway).await
        }
        other => run_admin_command(other, &config).await,
    }
}
