//! Audit hand-off.
//!
//! Every processed frame produces one [`AuditRecord`], passed by value to an
//! [`AuditStore`]. The store owns the record from then on.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::header::ParsedHeader;
use crate::outcome::AckOutcome;

// ── AuditRecord ──────────────────────────────────────────────────

/// Identifier assigned by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditId(pub u64);

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub raw: String,
    pub header: ParsedHeader,
    pub outcome: AckOutcome,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(raw: impl Into<String>, header: ParsedHeader, outcome: AckOutcome) -> Self {
        Self {
            raw: raw.into(),
            header,
            outcome,
            created_at: Utc::now(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.header.sending_application
    }

    pub fn receiver(&self) -> &str {
        &self.header.receiving_application
    }

    pub fn message_type(&self) -> String {
        self.header.message_type()
    }
}

// ── AuditStore ───────────────────────────────────────────────────

/// Persists audit records. Shared across sessions, so implementations must
/// accept concurrent calls.
#[async_trait]
pub trait AuditStore: Send + Sync + Debug {
    async fn save(&self, record: AuditRecord) -> Result<AuditId, PersistenceError>;
}

// ── MemoryAuditStore ─────────────────────────────────────────────

/// Records kept by [`MemoryAuditStore::new`].
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Keeps the most recent records in memory. Ids start at 1 and keep
/// counting after old records are evicted.
#[derive(Debug)]
pub struct MemoryAuditStore {
    capacity: usize,
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: VecDeque<(AuditId, AuditRecord)>,
    next_id: u64,
    evicted: u64,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Keep at most `capacity` records (minimum 1); older ones are dropped.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(MemoryInner {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.inner.lock().map(|i| i.evicted).unwrap_or_default()
    }

    pub fn get(&self, id: AuditId) -> Option<AuditRecord> {
        let inner = self.inner.lock().ok()?;
        inner
            .records
            .iter()
            .find(|(rid, _)| *rid == id)
            .map(|(_, r)| r.clone())
    }

    /// Copy of every retained record, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.inner
            .lock()
            .map(|i| i.records.iter().map(|(_, rec)| rec.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn save(&self, record: AuditRecord) -> Result<AuditId, PersistenceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PersistenceError::Unavailable("audit store lock poisoned".into()))?;
        let id = AuditId(inner.next_id);
        inner.next_id += 1;
        if inner.records.len() >= self.capacity {
            inner.records.pop_front();
            inner.evicted += 1;
        }
        inner.records.push_back((id, record));
        Ok(id)
    }
}

// ── JsonlAuditStore ──────────────────────────────────────────────

/// Appends one JSON object per record to a file.
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct JsonlLine<'a> {
    id: AuditId,
    #[serde(flatten)]
    record: &'a AuditRecord,
}

#[derive(Deserialize)]
struct StoredId {
    id: AuditId,
}

impl JsonlAuditStore {
    /// Open `path` for appending, creating it if needed. Ids continue after
    /// the highest one already in the file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let (last_id, unterminated) = Self::scan(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if unterminated {
            file.write_all(b"\n").await?;
        }
        debug!(path = %path.display(), last_id, "audit file opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
            next_id: AtomicU64::new(last_id + 1),
        })
    }

    /// Highest stored id, and whether the last line lacks its newline.
    async fn scan(path: &Path) -> Result<(u64, bool), PersistenceError> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, false)),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut highest = 0;
        let mut unterminated = false;
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            unterminated = !line.ends_with('\n');
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredId>(text) {
                Ok(stored) => highest = highest.max(stored.id.0),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable audit line"),
            }
        }
        Ok((highest, unterminated))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn save(&self, record: AuditRecord) -> Result<AuditId, PersistenceError> {
        let id = AuditId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut line = serde_json::to_vec(&JsonlLine {
            id,
            record: &record,
        })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(id)
    }
}
