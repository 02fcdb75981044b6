//! Tamper-evident audit log.
//!
//! One JSON object per line. Every entry carries `prevHash` and `chainHash`,
//! where `chainHash` is the first 16 hex characters of
//! `SHA-256(prevHash ‖ serialized base entry)` and the base entry is the
//! record without the two hash fields. The first entry chains from a fixed
//! genesis value, so any in-place edit breaks verification from that entry
//! onward.
//!
//! Appends are serialized behind one mutex: the `last_hash` read, the hash
//! computation, and the file write happen as a unit.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PincerError;

/// `prevHash` of the first entry in a fresh log.
pub const GENESIS_HASH: &str = "0000000000000000";

/// Hex characters kept from the SHA-256 digest.
const CHAIN_HASH_LENGTH: usize = 16;

/// Outcome of a tool call as recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Error,
}

/// What the orchestrator reports per tool-call attempt.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub agent_id: String,
    pub tool: String,
    pub duration_ms: u64,
    pub status: AuditStatus,
    /// Short textual summary on error; never the secret or a full backtrace.
    pub error: Option<String>,
}

/// Base entry: every field except the two hash fields, in the serialization
/// order the chain hash is computed over.
#[derive(Serialize)]
struct BaseEntry<'a> {
    timestamp_utc: &'a str,
    timestamp_local: &'a str,
    #[serde(rename = "agentId")]
    agent_id: &'a str,
    tool: &'a str,
    duration: u64,
    status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// A full entry as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp_utc: String,
    pub timestamp_local: String,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub tool: String,
    pub duration: u64,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    #[serde(rename = "chainHash")]
    pub chain_hash: String,
}

impl AuditEntry {
    fn base_json(&self) -> Result<String, PincerError> {
        serde_json::to_string(&BaseEntry {
            timestamp_utc: &self.timestamp_utc,
            timestamp_local: &self.timestamp_local,
            agent_id: &self.agent_id,
            tool: &self.tool,
            duration: self.duration,
            status: self.status,
            error: self.error.as_deref(),
        })
        .map_err(|e| PincerError::Storage(format!("failed to serialize audit entry: {e}")))
    }
}

struct AuditInner {
    path: PathBuf,
    last_hash: String,
}

/// Append-only hash-chained log.
pub struct AuditLog {
    inner: Mutex<AuditInner>,
}

impl AuditLog {
    /// Open the log at `path`, resuming the chain from the last line. A
    /// missing file starts from the genesis hash; an unparseable last line
    /// also restarts from genesis, with a warning (operators accept the
    /// restart over refusing to boot).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PincerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let last_hash = load_last_hash(&path)?;
        Ok(Self {
            inner: Mutex::new(AuditInner { path, last_hash }),
        })
    }

    /// Stamp, chain, and append one event.
    pub fn log(&self, event: AuditEvent) -> Result<AuditEntry, PincerError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PincerError::Storage("audit log lock poisoned".to_string()))?;

        let now_utc = chrono::Utc::now();
        let now_local = chrono::Local::now();

        let mut entry = AuditEntry {
            timestamp_utc: now_utc.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            timestamp_local: now_local.format("%Y-%m-%d %H:%M:%S %:z").to_string(),
            agent_id: event.agent_id,
            tool: event.tool,
            duration: event.duration_ms,
            status: event.status,
            error: event.error,
            prev_hash: inner.last_hash.clone(),
            chain_hash: String::new(),
        };
        entry.chain_hash = chain_hash(&inner.last_hash, &entry.base_json()?);

        let line = serde_json::to_string(&entry)
            .map_err(|e| PincerError::Storage(format!("failed to serialize audit entry: {e}")))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        inner.last_hash = entry.chain_hash.clone();
        Ok(entry)
    }

    /// Read every entry from disk, oldest first.
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>, PincerError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| PincerError::Storage("audit log lock poisoned".to_string()))?;
        read_entries(&inner.path)
    }

    /// Walk the chain and return the zero-based index of the first entry
    /// whose hashes do not verify, or `None` if the whole chain holds.
    pub fn verify(&self) -> Result<Option<usize>, PincerError> {
        let entries = self.read_entries()?;
        let mut expected_prev = GENESIS_HASH.to_string();

        for (index, entry) in entries.iter().enumerate() {
            if entry.prev_hash != expected_prev {
                return Ok(Some(index));
            }
            let recomputed = chain_hash(&entry.prev_hash, &entry.base_json()?);
            if recomputed != entry.chain_hash {
                return Ok(Some(index));
            }
            expected_prev = entry.chain_hash.clone();
        }
        Ok(None)
    }
}

fn chain_hash(prev_hash: &str, base_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(base_json.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..CHAIN_HASH_LENGTH].to_string()
}

fn load_last_hash(path: &Path) -> Result<String, PincerError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(GENESIS_HASH.to_string());
        }
        Err(e) => return Err(e.into()),
    };

    let Some(last_line) = content.lines().filter(|l| !l.trim().is_empty()).last() else {
        return Ok(GENESIS_HASH.to_string());
    };

    match serde_json::from_str::<AuditEntry>(last_line) {
        Ok(entry) => Ok(entry.chain_hash),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "audit log last line is unparseable; restarting chain from genesis"
            );
            Ok(GENESIS_HASH.to_string())
        }
    }
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, PincerError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| PincerError::Storage(format!("corrupt audit entry: {e}")))
        })
        .collect()
}
