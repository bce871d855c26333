//! Append-only hash-chained audit log.
//!
//! One JSON object per line, fsync'd per entry. Each entry's `hash` is the
//! SHA-256 of the canonical entry with the `hash` field removed, and its
//! `previousHash` is the predecessor's `hash` (the all-zero digest anchors
//! sequence 1). Truncation, reordering, or edits anywhere in the file are
//! detected by [`AuditChain::verify`].
//!
//! # Invariants
//!
//! - `seq` is strictly monotone, starting at 1.
//! - A failed append poisons the chain; the surrounding operation must
//!   abort before any downstream side effect.
//! - Single writer; the file handle lives behind one mutex.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sentinel_core::{canonical, Clock, Result, SentinelError, ZERO_HASH_HEX};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One tamper-evident audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Strictly monotone sequence number, starting at 1.
    pub sequence: u64,
    /// Append time.
    pub timestamp: DateTime<Utc>,
    /// Dotted action name, e.g. `approval.issued`.
    pub action: String,
    /// Action payload.
    pub payload: Value,
    /// Operational metadata (actor, channel, request id).
    pub metadata: Value,
    /// Hash of the predecessor entry; all-zero for sequence 1.
    pub previous_hash: String,
    /// SHA-256 over the canonical entry with this field removed.
    pub hash: String,
}

impl AuditEntry {
    /// Recompute this entry's hash from its other fields.
    pub fn compute_hash(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("hash");
        }
        canonical::canonical_hash_hex(&value)
            .map_err(|e| SentinelError::integrity(format!("audit entry canonicalization: {e}")))
    }
}

/// Result of walking the chain from sequence 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Whether every entry re-hashed and linked correctly.
    pub ok: bool,
    /// Earliest sequence whose hash or linkage is wrong.
    pub first_broken_seq: Option<u64>,
    /// Number of entries examined.
    pub entries: u64,
}

/// Export encodings for the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON object per line, byte-for-byte as stored.
    Jsonl,
    /// ArcSight Common Event Format.
    Cef,
}

impl std::str::FromStr for ExportFormat {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonl" => Ok(Self::Jsonl),
            "cef" => Ok(Self::Cef),
            other => Err(SentinelError::validation(format!(
                "unknown export format: {other}"
            ))),
        }
    }
}

struct ChainInner {
    file: File,
    last_seq: u64,
    last_hash: String,
    poisoned: bool,
}

/// Single-writer hash-chained audit log.
pub struct AuditChain {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    inner: Mutex<ChainInner>,
}

impl std::fmt::Debug for AuditChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditChain")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AuditChain {
    /// Open or create the chain at `path`, verifying any existing entries
    /// and resuming from the tail.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (last_seq, last_hash) = if path.exists() {
            let verification = verify_file(&path)?;
            if !verification.ok {
                return Err(SentinelError::integrity(format!(
                    "audit chain broken at sequence {:?}",
                    verification.first_broken_seq
                )));
            }
            tail_of(&path)?
        } else {
            (0, ZERO_HASH_HEX.to_string())
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            clock,
            inner: Mutex::new(ChainInner {
                file,
                last_seq,
                last_hash,
                poisoned: false,
            }),
        })
    }

    /// Append an action to the chain.
    ///
    /// The entry is durable (written and fsync'd) before this returns. Any
    /// persistence failure poisons the chain and every later append fails
    /// with an integrity error.
    pub fn append(&self, action: &str, payload: Value, metadata: Value) -> Result<AuditEntry> {
        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(SentinelError::integrity(
                "audit chain is poisoned; operator intervention required",
            ));
        }
        let mut entry = AuditEntry {
            sequence: inner.last_seq + 1,
            timestamp: self.clock.now(),
            action: action.to_string(),
            payload,
            metadata,
            previous_hash: inner.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;

        let line = serde_json::to_string(&entry)
            .map_err(|e| SentinelError::integrity(format!("audit entry serialization: {e}")))?;
        let write_result = inner
            .file
            .write_all(line.as_bytes())
            .and_then(|()| inner.file.write_all(b"\n"))
            .and_then(|()| inner.file.sync_all());
        if let Err(e) = write_result {
            inner.poisoned = true;
            tracing::error!(error = %e, "audit append failed; chain poisoned");
            return Err(SentinelError::integrity(format!("audit append failed: {e}")));
        }

        inner.last_seq = entry.sequence;
        inner.last_hash = entry.hash.clone();
        Ok(entry)
    }

    /// Walk the on-disk chain from sequence 1 and report the earliest
    /// break, if any.
    pub fn verify(&self) -> Result<ChainVerification> {
        // Hold the writer lock so verification sees a consistent prefix.
        let _guard = self.inner.lock();
        verify_file(&self.path)
    }

    /// Export entries with `sequence > since` in the requested format.
    pub fn export(&self, since: u64, format: ExportFormat) -> Result<String> {
        let _guard = self.inner.lock();
        let entries = read_entries(&self.path)?;
        let mut out = String::new();
        for entry in entries.into_iter().filter(|e| e.sequence > since) {
            match format {
                ExportFormat::Jsonl => {
                    out.push_str(&serde_json::to_string(&entry)?);
                    out.push('\n');
                }
                ExportFormat::Cef => {
                    out.push_str(&to_cef(&entry));
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }

    /// Sequence of the newest entry; 0 when the chain is empty.
    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().last_seq
    }

    /// Whether the chain can still accept appends.
    pub fn healthy(&self) -> bool {
        !self.inner.lock().poisoned
    }
}

/// CEF line: header plus `seq/act/end/hash/prevHash` extensions.
fn to_cef(entry: &AuditEntry) -> String {
    format!(
        "CEF:0|Aureus|Sentinel|1.0|{action}|{action}|5|seq={seq} act={action} end={end} hash={hash} prevHash={prev}",
        action = entry.action,
        seq = entry.sequence,
        end = entry.timestamp.timestamp_millis(),
        hash = entry.hash,
        prev = entry.previous_hash,
    )
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| {
            SentinelError::integrity(format!("audit line {} unparseable: {e}", idx + 1))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn tail_of(path: &Path) -> Result<(u64, String)> {
    let entries = read_entries(path)?;
    Ok(entries
        .last()
        .map(|e| (e.sequence, e.hash.clone()))
        .unwrap_or((0, ZERO_HASH_HEX.to_string())))
}

/// Verify a chain file without opening it for writing.
pub fn verify_file(path: &Path) -> Result<ChainVerification> {
    let entries = match read_entries(path) {
        Ok(entries) => entries,
        Err(_) => {
            // Unparseable content is a broken chain, not an I/O error:
            // report the first bad line as the break point.
            let parseable = count_parseable(path)?;
            return Ok(ChainVerification {
                ok: false,
                first_broken_seq: Some(parseable + 1),
                entries: parseable,
            });
        }
    };
    let mut prev_hash = ZERO_HASH_HEX.to_string();
    for (idx, entry) in entries.iter().enumerate() {
        let expected_seq = idx as u64 + 1;
        let recomputed = entry.compute_hash()?;
        if entry.sequence != expected_seq
            || entry.previous_hash != prev_hash
            || entry.hash != recomputed
        {
            return Ok(ChainVerification {
                ok: false,
                first_broken_seq: Some(expected_seq),
                entries: entries.len() as u64,
            });
        }
        prev_hash = entry.hash.clone();
    }
    Ok(ChainVerification {
        ok: true,
        first_broken_seq: None,
        entries: entries.len() as u64,
    })
}

fn count_parseable(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut count = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if serde_json::from_str::<AuditEntry>(&line).is_err() {
            break;
        }
        count += 1;
    }
    Ok(count)
}
