//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the gateway (`serve`)
//! - Vault lifecycle (`init`, `reset`, `clear`, `destroy`)
//! - Managing secrets (`set`, `list`)
//! - Managing agents (`agent add`, `agent authorize`, `agent list`,
//!   `agent revoke`, `agent remove`)
//! - Reading the audit log (`audit`)

mod admin;

pub use admin::run_admin_command;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pincer")]
#[command(about = "Credential-isolation gateway between autonomous agents and external APIs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the gateway over stdio
    Serve,

    /// Create the master key in the OS credential store
    Init,

    /// Store a secret for a tool
    Set {
        /// Vault secret name (e.g. "gemini_api_key")
        tool: String,

        /// The secret value
        value: String,

        /// Label distinguishing multiple secrets for the same tool
        #[arg(long, default_value = "default")]
        label: String,
    },

    /// List stored secrets (names and labels only)
    List,

    /// Manage agents and their grants
    #[command(subcommand)]
    Agent(AgentCommand),

    /// Delete the master key (secrets become undecryptable until re-init)
    Reset,

    /// Remove all secrets, tokens, and grants (keeps the master key)
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Delete the master key, the vault database, and its sidecar files
    Destroy {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show audit log entries
    Audit {
        /// Verify the hash chain instead of printing entries
        #[arg(long)]
        verify: bool,

        /// Maximum number of entries to print (most recent last)
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AgentCommand {
    /// Register an agent and issue its proxy token
    Add {
        /// Agent id (globally unique)
        id: String,

        /// Use this token instead of generating one
        #[arg(long)]
        token: Option<String>,
    },

    /// Grant an agent access to a tool
    Authorize {
        /// Agent id
        id: String,

        /// Tool name (e.g. "gemini_generate")
        tool: String,

        /// Secret label the agent should use for this tool
        #[arg(long = "key", default_value = "default")]
        key: String,
    },

    /// List agents with their tokens and grants
    List,

    /// Withdraw an agent's access to a tool
    Revoke {
        /// Agent id
        id: String,

        /// Tool name
        tool: String,
    },

    /// Remove an agent and all its grants
    Remove {
        /// Agent id
        id: String,
    },
}
