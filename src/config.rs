//! Configuration for the gateway.
//!
//! Everything is environment-driven with `.env` support. Paths default to
//! `~/.pincer/`.

use std::path::PathBuf;

/// Environment variable overriding the vault database path.
pub const VAULT_DB_PATH_ENV: &str = "VAULT_DB_PATH";

/// Environment variable overriding the audit log path.
pub const AUDIT_LOG_PATH_ENV: &str = "AUDIT_LOG_PATH";

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the vault database file.
    pub vault_db_path: PathBuf,
    /// Path of the append-only audit log.
    pub audit_log_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults under `~/.pincer/`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            vault_db_path: optional_env(VAULT_DB_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| pincer_dir().join("vault.db")),
            audit_log_path: optional_env(AUDIT_LOG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| pincer_dir().join("audit.jsonl")),
        }
    }
}

/// Base directory for gateway state (`~/.pincer`).
pub fn pincer_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pincer")
}

fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_land_under_pincer_dir() {
        let config = Config {
            vault_db_path: pincer_dir().join("vault.db"),
            audit_log_path: pincer_dir().join("audit.jsonl"),
        };
        assert!(config.vault_db_path.ends_with(".pincer/vault.db"));
        assert!(config.audit_log_path.ends_with(".pincer/audit.jsonl"));
    }
}
