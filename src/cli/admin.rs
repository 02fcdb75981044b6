//! Control-plane command implementations.
//!
//! Each command is a thin transaction over the vault store and the keychain.
//! Destructive commands (`clear`, `destroy`) print a dry-run description
//! unless `--yes` is passed. The store handle is closed on every path so the
//! cached master key is always zeroed before exit.

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::cli::{AgentCommand, Command};
use crate::config::Config;
use crate::error::PincerError;
use crate::gateway::injector::secret_name_for;
use crate::secrets::{
    generate_master_key, is_valid_proxy_token, Keychain, OsKeychain, VaultStore,
};

/// Run a non-serve command. Errors map to a non-zero exit in `main`.
pub async fn run_admin_command(command: Command, config: &Config) -> anyhow::Result<()> {
    let keychain = Arc::new(OsKeychain::new());

    match command {
        Command::Serve => unreachable!("serve is dispatched before admin handling"),

        Command::Init => {
            let key = generate_master_key();
            keychain.write(&key).await?;
            println!();
            println!("  ✓ Master key created in the OS credential store");
            println!("    Vault database: {}", config.vault_db_path.display());
            println!();
            Ok(())
        }

        Command::Reset => {
            let existed = keychain.delete().await?;
            println!();
            if existed {
                println!("  ✓ Master key deleted");
                println!("    Stored secrets can no longer be decrypted until `pincer init`.");
            } else {
                println!("  Master key was not present; nothing to delete.");
            }
            println!();
            Ok(())
        }

        Command::Clear { yes: false } => {
            println!();
            println!("  Would delete every secret, proxy token, and grant from");
            println!("  {} (the master key is kept).", config.vault_db_path.display());
            println!();
            println!("  Re-run with --yes to confirm.");
            println!();
            Ok(())
        }

        Command::Destroy { yes: false } => {
            println!();
            println!("  Would delete the master key from the OS credential store and");
            println!("  remove {} with its sidecar files.", config.vault_db_path.display());
            println!();
            println!("  Re-run with --yes to confirm.");
            println!();
            Ok(())
        }

        Command::Audit { verify, limit } => run_audit(config, verify, limit),

        other => {
            let store = VaultStore::open(&config.vault_db_path, keychain)?;
            let result = run_store_command(other, &store).await;
            store.close().await;
            result
        }
    }
}

/// Commands that need an open vault store. The caller closes the store.
async fn run_store_command(command: Command, store: &VaultStore) -> anyhow::Result<()> {
    match command {
        Command::Set { tool, value, label } => {
            store.set_secret(&tool, &label, &value).await?;
            println!();
            println!("  ✓ Secret stored for '{tool}' (label '{label}')");
            println!();
        }

        Command::List => {
            let secrets = store.list_secrets()?;
            println!();
            if secrets.is_empty() {
                println!("  No secrets stored.");
                println!();
                println!("  Add one with:");
                println!("    pincer set <tool> <value> [--label <label>]");
            } else {
                println!("  Stored secrets:");
                println!();
                for (tool, labels) in secrets {
                    println!("  ● {} [{}]", tool, labels.join(", "));
                }
            }
            println!();
        }

        Command::Agent(agent_command) => run_agent_command(agent_command, store).await?,

        Command::Clear { yes: true } => {
            store.clear_all()?;
            println!();
            println!("  ✓ Vault cleared (master key kept)");
            println!();
        }

        Command::Destroy { yes: true } => {
            let key_existed = store.destroy().await?;
            println!();
            println!("  ✓ Vault destroyed (master key existed: {key_existed})");
            println!();
        }

        _ => unreachable!("dispatched in run_admin_command"),
    }
    Ok(())
}

async fn run_agent_command(command: AgentCommand, store: &VaultStore) -> anyhow::Result<()> {
    match command {
        AgentCommand::Add { id, token } => {
            if let Some(ref custom) = token {
                if !is_valid_proxy_token(custom) {
                    return Err(PincerError::BadTokenFormat.into());
                }
            }
            let issued = store.add_agent(&id, token.as_deref())?;
            println!();
            println!("  ✓ Agent '{id}' registered");
            println!("    Proxy token: {issued}");
            println!("    Hand this token to the agent; it never sees real API keys.");
            println!();
        }

        AgentCommand::Authorize { id, tool, key } => {
            store.set_mapping(&id, &tool, &key)?;
            println!();
            println!("  ✓ Agent '{id}' may now call '{tool}' (label '{key}')");

            let secret_name = secret_name_for(&tool);
            if store.get_secret(secret_name, &key).await.is_err() {
                println!();
                println!("  ⚠ No secret is stored for '{secret_name}' (label '{key}') yet;");
                println!(
                    "    calls will fail until `pincer set {secret_name} <value> --label {key}`."
                );
            }
            println!();
        }

        AgentCommand::List => {
            let agents = store.list_agents()?;
            println!();
            if agents.is_empty() {
                println!("  No agents registered.");
                println!();
                println!("  Add one with:");
                println!("    pincer agent add <id>");
            } else {
                println!("  Registered agents:");
                println!();
                for agent in agents {
                    println!("  ● {} ({})", agent.agent_id, agent.proxy_token);
                    for grant in agent.grants {
                        println!("      {} → label '{}'", grant.tool_name, grant.key_label);
                    }
                }
            }
            println!();
        }

        AgentCommand::Revoke { id, tool } => {
            store.revoke(&id, &tool)?;
            println!();
            println!("  ✓ Revoked '{tool}' from agent '{id}'");
            println!();
        }

        AgentCommand::Remove { id } => {
            store.remove_agent(&id)?;
            println!();
            println!("  ✓ Agent '{id}' removed with all its grants");
            println!();
        }
    }
    Ok(())
}

fn run_audit(config: &Config, verify: bool, limit: Option<usize>) -> anyhow::Result<()> {
    let audit = AuditLog::open(&config.audit_log_path)?;

    if verify {
        match audit.verify()? {
            None => {
                println!();
                println!("  ✓ Audit chain verifies");
                println!();
                Ok(())
            }
            Some(index) => anyhow::bail!("audit chain broken at entry {index}"),
        }
    } else {
        let entries = audit.read_entries()?;
        let skip = limit.map(|l| entries.len().saturating_sub(l)).unwrap_or(0);
        println!();
        for entry in &entries[skip..] {
            println!("{}", serde_json::to_string(entry)?);
        }
        println!();
        Ok(())
    }
}
