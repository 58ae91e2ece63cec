//! # mllp-core
//!
//! Protocol engine for an HL7 v2 acknowledgment listener over MLLP.
//!
//! This crate contains:
//! - **Codec**: `MllpCodec` for framed TCP I/O via `tokio_util`
//! - **Header**: `ParsedHeader` and the bounds-checked `MshFields` accessor
//! - **Classifier**: validation tiers, pluggable `SemanticParser`
//! - **Ack**: acknowledgment composition (`MSH` + `MSA`)
//! - **Audit**: `AuditStore` trait with in-memory and JSON-lines stores
//! - **Session**: one-frame, one-ack connection lifecycle
//! - **Listener**: accept loop with a bounded `WorkerPool`
//! - **Error**: `MllpError`, a typed, `thiserror`-based error hierarchy

pub mod ack;
pub mod audit;
pub mod classifier;
pub mod codec;
pub mod error;
pub mod header;
pub mod listener;
pub mod outcome;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use ack::{compose, compose_at, fallback};
pub use audit::{AuditId, AuditRecord, AuditStore, JsonlAuditStore, MemoryAuditStore};
pub use classifier::{Classification, Classifier, MshParser, SemanticParser, classify};
pub use codec::{MllpCodec, RawFrame, decode_frame, encode_frame};
pub use error::{FramingError, MllpError, ParseFault, PersistenceError};
pub use header::{MshFields, ParsedHeader, SENTINEL};
pub use listener::{Listener, ListenerConfig, PoolStats, WorkerPool};
pub use outcome::{AckOutcome, AckStatus, Detail};
pub use session::{Session, SessionContext, SessionPhase, SessionReport};
