//! Persistent vault store: encrypted secrets, proxy tokens, agent grants.
//!
//! Backed by a local SQLite file (WAL mode, foreign keys on). The master key
//! is fetched through the [`Keychain`] on first use and cached in a zeroizing
//! buffer; [`VaultStore::close`] drops both the cache and the connection and
//! must run on every shutdown path.
//!
//! Row access maps columns by name into typed structs — the schema and the
//! structs can only drift apart loudly, not silently.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use secrecy::SecretString;
use zeroize::Zeroize;

use crate::error::PincerError;
use crate::secrets::cipher::{self, SealedSecret, NONCE_LENGTH, TAG_LENGTH};
use crate::secrets::keychain::{Keychain, MasterKey};

/// Prefix of every proxy token.
pub const TOKEN_PREFIX: &str = "pxr_";

/// Characters a generated token draws from (URL-safe alphabet).
const TOKEN_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Random characters after the prefix in a generated token.
const TOKEN_RANDOM_LENGTH: usize = 21;

/// Label used when a secret or grant does not specify one.
pub const DEFAULT_LABEL: &str = "default";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS secrets (
    tool_name TEXT NOT NULL,
    key_label TEXT NOT NULL,
    ciphertext BLOB NOT NULL,
    nonce BLOB NOT NULL,
    auth_tag BLOB NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(tool_name, key_label)
);

CREATE TABLE IF NOT EXISTS proxy_tokens (
    agent_id TEXT NOT NULL UNIQUE,
    proxy_token TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_proxy_tokens_token ON proxy_tokens(proxy_token);

CREATE TABLE IF NOT EXISTS agent_mappings (
    agent_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    key_label TEXT NOT NULL DEFAULT 'default',
    UNIQUE(agent_id, tool_name)
);

CREATE INDEX IF NOT EXISTS idx_agent_mappings_lookup ON agent_mappings(agent_id, tool_name);
"#;

/// Generate a fresh proxy token: `pxr_` + 21 URL-safe random characters.
pub fn generate_proxy_token() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TOKEN_RANDOM_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_ALPHABET.len());
            TOKEN_ALPHABET[idx] as char
        })
        .collect();
    format!("{TOKEN_PREFIX}{suffix}")
}

/// Check the proxy-token wire format: `pxr_` followed by at least 21
/// characters from `[A-Za-z0-9_-]`.
pub fn is_valid_proxy_token(token: &str) -> bool {
    let Some(suffix) = token.strip_prefix(TOKEN_PREFIX) else {
        return false;
    };
    suffix.len() >= TOKEN_RANDOM_LENGTH
        && suffix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// One agent as reported by `list_agents`.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub agent_id: String,
    pub proxy_token: String,
    pub grants: Vec<AgentGrant>,
}

/// One (tool, label) grant an agent holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentGrant {
    pub tool_name: String,
    pub key_label: String,
}

/// The vault: secrets, tokens, and grants behind one SQLite handle.
pub struct VaultStore {
    conn: Mutex<Option<Connection>>,
    keychain: std::sync::Arc<dyn Keychain>,
    master_key: tokio::sync::Mutex<Option<MasterKey>>,
    db_path: Option<PathBuf>,
}

impl VaultStore {
    /// Open (or create) the vault database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        keychain: std::sync::Arc<dyn Keychain>,
    ) -> Result<Self, PincerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| PincerError::Storage(format!("failed to open vault db: {e}")))?;
        Self::prepare(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            keychain,
            master_key: tokio::sync::Mutex::new(None),
            db_path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory vault (tests).
    pub fn open_in_memory(keychain: std::sync::Arc<dyn Keychain>) -> Result<Self, PincerError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PincerError::Storage(format!("failed to open in-memory vault: {e}")))?;
        Self::prepare(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            keychain,
            master_key: tokio::sync::Mutex::new(None),
            db_path: None,
        })
    }

    fn prepare(conn: &Connection) -> Result<(), PincerError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
            .map_err(|e| PincerError::Storage(format!("pragma error: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| PincerError::Storage(format!("failed to create schema: {e}")))?;
        Ok(())
    }

    /// Run a closure against the connection. The guard never crosses an
    /// await, so enclosing futures stay `Send`.
    fn with_conn<F, T>(&self, f: F) -> Result<T, PincerError>
    where
        F: FnOnce(&Connection) -> Result<T, PincerError>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| PincerError::Storage(e.to_string()))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| PincerError::Storage("vault store is closed".to_string()))?;
        f(conn)
    }

    /// Run a closure with the cached master key, fetching it from the
    /// keychain on first use.
    async fn with_master_key<F, T>(&self, f: F) -> Result<T, PincerError>
    where
        F: FnOnce(&[u8; 32]) -> Result<T, PincerError>,
    {
        let mut cached = self.master_key.lock().await;
        if cached.is_none() {
            *cached = Some(self.keychain.read().await?);
        }
        let key = cached.as_ref().ok_or(PincerError::NotInitialized)?;
        f(key)
    }

    // ── Secrets ─────────────────────────────────────────────────

    /// Encrypt `plaintext` and upsert it under (tool, label).
    pub async fn set_secret(
        &self,
        tool_name: &str,
        key_label: &str,
        plaintext: &str,
    ) -> Result<(), PincerError> {
        let sealed = self
            .with_master_key(|key| cipher::encrypt(key, plaintext.as_bytes()))
            .await?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO secrets
                     (tool_name, key_label, ciphertext, nonce, auth_tag, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tool_name,
                    key_label,
                    sealed.ciphertext,
                    sealed.nonce.as_slice(),
                    sealed.tag.as_slice(),
                    now_iso(),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(tool = tool_name, label = key_label, "secret stored");
        Ok(())
    }

    /// Load and decrypt the secret for (tool, label).
    pub async fn get_secret(
        &self,
        tool_name: &str,
        key_label: &str,
    ) -> Result<SecretString, PincerError> {
        let sealed = self.load_sealed(tool_name, key_label)?.ok_or_else(|| {
            PincerError::SecretMissing {
                tool: tool_name.to_string(),
                label: key_label.to_string(),
            }
        })?;

        let plaintext = self
            .with_master_key(|key| cipher::decrypt(key, &sealed))
            .await?;

        match String::from_utf8(plaintext) {
            Ok(secret) => Ok(SecretString::from(secret)),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                Err(PincerError::Storage(
                    "stored secret is not valid UTF-8".to_string(),
                ))
            }
        }
    }

    fn load_sealed(
        &self,
        tool_name: &str,
        key_label: &str,
    ) -> Result<Option<SealedSecret>, PincerError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT ciphertext, nonce, auth_tag FROM secrets
                     WHERE tool_name = ?1 AND key_label = ?2",
                    params![tool_name, key_label],
                    |row| {
                        // Columns are mapped by name, not position.
                        let ciphertext: Vec<u8> = row.get("ciphertext")?;
                        let nonce: Vec<u8> = row.get("nonce")?;
                        let tag: Vec<u8> = row.get("auth_tag")?;
                        Ok((ciphertext, nonce, tag))
                    },
                )
                .optional()?;

            let Some((ciphertext, nonce_vec, tag_vec)) = row else {
                return Ok(None);
            };

            if nonce_vec.len() != NONCE_LENGTH || tag_vec.len() != TAG_LENGTH {
                return Err(PincerError::Storage(
                    "secret record has malformed nonce or tag".to_string(),
                ));
            }
            let mut nonce = [0u8; NONCE_LENGTH];
            nonce.copy_from_slice(&nonce_vec);
            let mut tag = [0u8; TAG_LENGTH];
            tag.copy_from_slice(&tag_vec);

            Ok(Some(SealedSecret {
                ciphertext,
                nonce,
                tag,
            }))
        })
    }

    /// List stored secrets grouped as `(tool, [labels…])`, sorted by tool
    /// then label.
    pub fn list_secrets(&self) -> Result<Vec<(String, Vec<String>)>, PincerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tool_name, key_label FROM secrets ORDER BY tool_name, key_label",
            )?;
            let rows = stmt.query_map([], |row| {
                let tool: String = row.get("tool_name")?;
                let label: String = row.get("key_label")?;
                Ok((tool, label))
            })?;

            let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
            for row in rows {
                let (tool, label) = row?;
                match grouped.last_mut() {
                    Some((last_tool, labels)) if *last_tool == tool => labels.push(label),
                    _ => grouped.push((tool, vec![label])),
                }
            }
            Ok(grouped)
        })
    }

    // ── Agents and tokens ───────────────────────────────────────

    /// Register an agent, generating a proxy token unless one is supplied.
    /// Returns the token. Fails with [`PincerError::Conflict`] if the agent
    /// id or the token already exists.
    pub fn add_agent(
        &self,
        agent_id: &str,
        custom_token: Option<&str>,
    ) -> Result<String, PincerError> {
        let token = match custom_token {
            Some(t) => t.to_string(),
            None => generate_proxy_token(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO proxy_tokens (agent_id, proxy_token, created_at) VALUES (?1, ?2, ?3)",
                params![agent_id, token, now_iso()],
            )
            .map_err(|e| match PincerError::from(e) {
                PincerError::Conflict(_) => PincerError::Conflict(format!(
                    "agent '{agent_id}' or its token is already registered"
                )),
                other => other,
            })?;
            Ok(())
        })?;

        tracing::info!(agent = agent_id, "agent registered");
        Ok(token)
    }

    /// Resolve a proxy token to its agent id.
    pub fn get_agent_by_token(&self, token: &str) -> Result<Option<String>, PincerError> {
        self.with_conn(|conn| {
            let agent = conn
                .query_row(
                    "SELECT agent_id FROM proxy_tokens WHERE proxy_token = ?1",
                    params![token],
                    |row| row.get::<_, String>("agent_id"),
                )
                .optional()?;
            Ok(agent)
        })
    }

    /// Grant (or re-label) an agent's access to a tool.
    pub fn set_mapping(
        &self,
        agent_id: &str,
        tool_name: &str,
        key_label: &str,
    ) -> Result<(), PincerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO agent_mappings (agent_id, tool_name, key_label)
                 VALUES (?1, ?2, ?3)",
                params![agent_id, tool_name, key_label],
            )?;
            Ok(())
        })?;

        tracing::info!(agent = agent_id, tool = tool_name, label = key_label, "grant added");
        Ok(())
    }

    /// Whether the agent holds a grant for the tool. This existence check is
    /// the authorization gate; `get_mapping_label` is not.
    pub fn is_authorized(&self, agent_id: &str, tool_name: &str) -> Result<bool, PincerError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM agent_mappings WHERE agent_id = ?1 AND tool_name = ?2",
                params![agent_id, tool_name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// The key label the agent is entitled to for the tool, defaulting to
    /// `"default"` when no mapping exists. Callers must check authorization
    /// separately.
    pub fn get_mapping_label(&self, agent_id: &str, tool_name: &str) -> Result<String, PincerError> {
        self.with_conn(|conn| {
            let label = conn
                .query_row(
                    "SELECT key_label FROM agent_mappings WHERE agent_id = ?1 AND tool_name = ?2",
                    params![agent_id, tool_name],
                    |row| row.get::<_, String>("key_label"),
                )
                .optional()?;
            Ok(label.unwrap_or_else(|| DEFAULT_LABEL.to_string()))
        })
    }

    /// List all agents with their tokens and grants.
    pub fn list_agents(&self) -> Result<Vec<AgentRecord>, PincerError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT agent_id, proxy_token FROM proxy_tokens ORDER BY agent_id")?;
            let agents = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>("agent_id")?,
                        row.get::<_, String>("proxy_token")?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut records = Vec::with_capacity(agents.len());
            let mut grant_stmt = conn.prepare(
                "SELECT tool_name, key_label FROM agent_mappings
                 WHERE agent_id = ?1 ORDER BY tool_name",
            )?;
            for (agent_id, proxy_token) in agents {
                let grants = grant_stmt
                    .query_map(params![agent_id], |row| {
                        Ok(AgentGrant {
                            tool_name: row.get("tool_name")?,
                            key_label: row.get("key_label")?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                records.push(AgentRecord {
                    agent_id,
                    proxy_token,
                    grants,
                });
            }
            Ok(records)
        })
    }

    /// Withdraw one grant. Fails with [`PincerError::NotFound`] if absent.
    pub fn revoke(&self, agent_id: &str, tool_name: &str) -> Result<(), PincerError> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM agent_mappings WHERE agent_id = ?1 AND tool_name = ?2",
                params![agent_id, tool_name],
            )?;
            if deleted == 0 {
                return Err(PincerError::NotFound(format!(
                    "no grant for agent '{agent_id}' on tool '{tool_name}'"
                )));
            }
            Ok(())
        })?;

        tracing::info!(agent = agent_id, tool = tool_name, "grant revoked");
        Ok(())
    }

    /// Remove an agent: all grants, then the token record, in one
    /// transaction. Fails with [`PincerError::NotFound`] if the agent did
    /// not exist.
    pub fn remove_agent(&self, agent_id: &str) -> Result<(), PincerError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM agent_mappings WHERE agent_id = ?1",
                params![agent_id],
            )?;
            let deleted = tx.execute(
                "DELETE FROM proxy_tokens WHERE agent_id = ?1",
                params![agent_id],
            )?;
            if deleted == 0 {
                return Err(PincerError::NotFound(format!(
                    "agent '{agent_id}' is not registered"
                )));
            }
            tx.commit()?;
            Ok(())
        })?;

        tracing::info!(agent = agent_id, "agent removed");
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Truncate secrets, tokens, and grants, keeping the master key.
    pub fn clear_all(&self) -> Result<(), PincerError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM secrets", [])?;
            tx.execute("DELETE FROM proxy_tokens", [])?;
            tx.execute("DELETE FROM agent_mappings", [])?;
            tx.commit()?;
            Ok(())
        })?;

        tracing::warn!("vault cleared");
        Ok(())
    }

    /// Destroy the vault: close the store, delete the master key from the
    /// keychain, and remove the database file and its sidecars. Returns
    /// whether a keychain record existed.
    pub async fn destroy(&self) -> Result<bool, PincerError> {
        self.close().await;
        let existed = self.keychain.delete().await?;

        if let Some(path) = &self.db_path {
            remove_file_if_present(path)?;
            remove_file_if_present(&sidecar(path, "-wal"))?;
            remove_file_if_present(&sidecar(path, "-shm"))?;
        }

        tracing::warn!(key_existed = existed, "vault destroyed");
        Ok(existed)
    }

    /// Close the database handle and zero the cached master key. Must run on
    /// every shutdown path.
    pub async fn close(&self) {
        // Zeroizing drops clear the key bytes.
        self.master_key.lock().await.take();
        if let Ok(mut guard) = self.conn.lock() {
            guard.take();
        }
    }

    /// Whether the master key exists in the keychain (without caching it).
    pub async fn is_initialized(&self) -> bool {
        self.keychain.read().await.is_ok()
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_file_if_present(path: &Path) -> Result<(), PincerError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
