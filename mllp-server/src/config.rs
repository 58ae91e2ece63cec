//! Configuration for the MLLP listener service.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mllp_core::audit::DEFAULT_MEMORY_CAPACITY;
use mllp_core::{AuditStore, JsonlAuditStore, ListenerConfig, MemoryAuditStore, PersistenceError};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Audit storage.
    pub audit: AuditConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the listener on.
    pub bind_address: String,
    /// TCP port to accept MLLP connections on.
    pub port: u16,
    /// Maximum concurrent sessions.
    pub workers: usize,
    /// Connections allowed to wait for a free worker.
    pub max_queued: usize,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Read timeout in milliseconds. 0 waits forever.
    pub read_timeout_ms: u64,
    /// Grace period for in-flight sessions on shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
}

/// Where audit records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    /// Keep the most recent `capacity` records in process memory.
    Memory,
    /// Append JSON lines to `path`.
    Jsonl,
}

/// Audit storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: AuditBackend,
    /// File used by the `jsonl` backend.
    pub path: PathBuf,
    /// Records retained by the `memory` backend.
    pub capacity: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let core = ListenerConfig::default();
        Self {
            bind_address: core.bind_address,
            port: core.port,
            workers: core.workers,
            max_queued: core.max_queued,
            max_frame_size: core.max_frame_size,
            read_timeout_ms: 0,
            shutdown_grace_ms: core.shutdown_grace.as_millis() as u64,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Memory,
            path: PathBuf::from("mllp-audit.jsonl"),
            capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Convert network settings into the core `ListenerConfig`.
    pub fn to_listener_config(&self) -> ListenerConfig {
        let net = &self.network;
        ListenerConfig {
            bind_address: net.bind_address.clone(),
            port: net.port,
            workers: net.workers.max(1),
            max_queued: net.max_queued,
            max_frame_size: net.max_frame_size.max(1),
            read_timeout: (net.read_timeout_ms > 0).then(|| Duration::from_millis(net.read_timeout_ms)),
            shutdown_grace: Duration::from_millis(net.shutdown_grace_ms),
        }
    }

    /// Open the configured audit store.
    pub async fn open_store(&self) -> Result<Arc<dyn AuditStore>, PersistenceError> {
        Ok(match self.audit.backend {
            AuditBackend::Memory => Arc::new(MemoryAuditStore::with_capacity(self.audit.capacity)),
            AuditBackend::Jsonl => Arc::new(JsonlAuditStore::open(&self.audit.path).await?),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
