//! One accept-to-close exchange.
//!
//! A session reads exactly one frame, classifies it, hands an audit copy to
//! the store, writes one acknowledgment and closes. Validated phase
//! transitions return `Result` instead of panicking.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::ack;
use crate::audit::{AuditId, AuditRecord, AuditStore};
use crate::classifier::{Classification, Classifier};
use crate::codec::{DEFAULT_MAX_FRAME_SIZE, MllpCodec, RawFrame};
use crate::error::{FramingError, MllpError};
use crate::outcome::{AckOutcome, AckStatus};

// ── SessionPhase ─────────────────────────────────────────────────

/// ```text
///  AwaitingFrame ──► Parsing ──► Classifying ──► AckSent ──► Closed
///        │              │              │                       ▲
///        └──────────────┴──────────────┴───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    AwaitingFrame,
    Parsing,
    Classifying,
    AckSent,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingFrame => write!(f, "AwaitingFrame"),
            Self::Parsing => write!(f, "Parsing"),
            Self::Classifying => write!(f, "Classifying"),
            Self::AckSent => write!(f, "AckSent"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Valid from: `AwaitingFrame`.
    pub fn begin_parsing(&mut self) -> Result<(), MllpError> {
        match self {
            Self::AwaitingFrame => {
                *self = Self::Parsing;
                Ok(())
            }
            _ => Err(MllpError::ProtocolViolation(
                "cannot parse: not awaiting a frame",
            )),
        }
    }

    /// Valid from: `Parsing`.
    pub fn begin_classifying(&mut self) -> Result<(), MllpError> {
        match self {
            Self::Parsing => {
                *self = Self::Classifying;
                Ok(())
            }
            _ => Err(MllpError::ProtocolViolation(
                "cannot classify: frame not parsed",
            )),
        }
    }

    /// Valid from: `Classifying`.
    pub fn ack_sent(&mut self) -> Result<(), MllpError> {
        match self {
            Self::Classifying => {
                *self = Self::AckSent;
                Ok(())
            }
            _ => Err(MllpError::ProtocolViolation(
                "cannot acknowledge: message not classified",
            )),
        }
    }

    /// Valid from: any phase. Every exit path ends here.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

// ── SessionContext ───────────────────────────────────────────────

/// Collaborators and limits shared by every session of a listener.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub classifier: Arc<Classifier>,
    pub store: Arc<dyn AuditStore>,
    pub max_frame_size: usize,
    /// `None` waits forever for a stalled peer.
    pub read_timeout: Option<Duration>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            classifier: Arc::new(Classifier::new()),
            store,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

// ── SessionReport ────────────────────────────────────────────────

/// What happened during one session.
#[derive(Debug, Default)]
pub struct SessionReport {
    pub phase: SessionPhase,
    /// Outcome carried by the acknowledgment, when one was composed.
    pub outcome: Option<AckOutcome>,
    pub control_id: Option<String>,
    pub audit_id: Option<AuditId>,
    /// The fault that ended the session early.
    pub error: Option<MllpError>,
}

impl SessionReport {
    pub fn acknowledged(&self) -> bool {
        self.error.is_none() && self.outcome.is_some()
    }
}

// ── Session ──────────────────────────────────────────────────────

pub struct Session<S> {
    framed: Framed<S, MllpCodec>,
    phase: SessionPhase,
    ctx: SessionContext,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, ctx: SessionContext) -> Self {
        let codec = MllpCodec::with_max_frame_size(ctx.max_frame_size);
        Self {
            framed: Framed::new(stream, codec),
            phase: SessionPhase::AwaitingFrame,
            ctx,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Drive the session to `Closed`. The stream is shut down and dropped
    /// on every path.
    pub async fn run(mut self) -> SessionReport {
        let mut report = SessionReport::default();

        if let Err(e) = self.exchange(&mut report).await {
            self.fail(&e).await;
            report.error = Some(e);
        }

        self.close().await;
        report.phase = self.phase;
        report
    }

    async fn exchange(&mut self, report: &mut SessionReport) -> Result<(), MllpError> {
        let frame = self.read_frame().await?;
        self.phase.begin_parsing()?;

        debug!(bytes = frame.len(), "frame received");
        let text = frame.into_text();
        let text = text.trim();
        debug!(message = %text, "message text");

        self.phase.begin_classifying()?;
        let Classification {
            header,
            mut outcome,
            ..
        } = self.ctx.classifier.classify(text);

        let record = AuditRecord::new(text, header.clone(), outcome.clone());
        match self.ctx.store.save(record).await {
            Ok(id) => {
                debug!(%id, "audit record stored");
                report.audit_id = Some(id);
            }
            Err(e) => {
                warn!(error = %e, "audit store failed");
                outcome = outcome.downgrade(format!("persistence error: {e}"));
            }
        }

        let control_id = Some(header.control_id.as_str()).filter(|c| !c.is_empty());
        let ack = ack::compose(&header, &outcome, control_id);
        report.outcome = Some(outcome.clone());
        report.control_id = control_id.map(str::to_owned);

        self.framed.send(ack).await?;
        self.phase.ack_sent()?;

        info!(
            control_id = control_id.unwrap_or_default(),
            message_type = %header.message_type(),
            status = %outcome.status(),
            "acknowledgment sent"
        );
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<RawFrame, MllpError> {
        let next = match self.ctx.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.framed.next())
                .await
                .map_err(|_| MllpError::Timeout(limit))?,
            None => self.framed.next().await,
        };

        match next {
            Some(result) => result,
            None => Err(FramingError::NoStartMarker.into()),
        }
    }

    /// Error edge: log, then attempt a generic error acknowledgment unless
    /// the fault came from the envelope or the socket.
    async fn fail(&mut self, e: &MllpError) {
        match e {
            MllpError::Framing(_) => warn!(error = %e, phase = %self.phase, "dropping unframed input"),
            MllpError::Transport(_) | MllpError::Timeout(_) => {
                warn!(error = %e, phase = %self.phase, "transport failure")
            }
            _ => error!(error = %e, phase = %self.phase, "session failed"),
        }

        if !e.allows_error_ack() || self.phase == SessionPhase::AckSent {
            return;
        }
        let ack = ack::fallback(AckStatus::Error, &e.to_string());
        if let Err(send_err) = self.framed.send(ack).await {
            debug!(error = %send_err, "error acknowledgment not delivered");
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.framed.get_mut().shutdown().await {
            debug!(error = %e, "shutdown failed");
        }
        self.phase.close();
        debug!("session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditStore;
    use crate::codec::{decode_frame, encode_frame};
    use crate::error::PersistenceError;
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    const ADT: &str = "MSH|^~\\&|AppA|FacA|AppB|FacB|20240101000000||ADT^A01|CTRL123|P|2.5\rPID|1||555";

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl AuditStore for BrokenStore {
        async fn save(&self, _record: AuditRecord) -> Result<AuditId, PersistenceError> {
            Err(PersistenceError::Unavailable("disk\r\nfull".into()))
        }
    }

    /// Run a session over an in-memory pipe and return the raw reply bytes.
    async fn exchange(ctx: SessionContext, inbound: &[u8]) -> (SessionReport, Vec<u8>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let session = tokio::spawn(Session::new(server, ctx).run());
        client.write_all(inbound).await.unwrap();
        client.shutdown().await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        (session.await.unwrap(), reply)
    }

    fn msa(reply: &[u8]) -> Vec<String> {
        let text = decode_frame(reply).unwrap().into_text();
        let msa = text.split('\r').find(|s| s.starts_with("MSA")).unwrap();
        msa.split('|').map(str::to_owned).collect()
    }

    // ── Phase transitions ─────────────────────────────────────────

    #[test]
    fn happy_path_phases() {
        let mut phase = SessionPhase::default();
        assert_eq!(phase, SessionPhase::AwaitingFrame);
        phase.begin_parsing().unwrap();
        phase.begin_classifying().unwrap();
        phase.ack_sent().unwrap();
        assert_eq!(phase, SessionPhase::AckSent);
        phase.close();
        assert!(phase.is_closed());
    }

    #[test]
    fn invalid_transitions() {
        let mut phase = SessionPhase::AwaitingFrame;
        assert!(phase.begin_classifying().is_err());
        assert!(phase.ack_sent().is_err());

        let mut phase = SessionPhase::Closed;
        assert!(phase.begin_parsing().is_err());
    }

    #[test]
    fn close_from_any_phase() {
        for mut phase in [
            SessionPhase::AwaitingFrame,
            SessionPhase::Parsing,
            SessionPhase::Classifying,
            SessionPhase::AckSent,
        ] {
            phase.close();
            assert!(phase.is_closed());
        }
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionPhase::AwaitingFrame.to_string(), "AwaitingFrame");
        assert_eq!(SessionPhase::AckSent.to_string(), "AckSent");
    }

    // ── Exchanges ─────────────────────────────────────────────────

    #[tokio::test]
    async fn valid_message_is_accepted_and_audited() {
        let store = Arc::new(MemoryAuditStore::new());
        let ctx = SessionContext::new(store.clone());
        let (report, reply) = exchange(ctx, &encode_frame(ADT)).await;

        assert!(report.acknowledged());
        assert_eq!(report.phase, SessionPhase::Closed);
        assert_eq!(report.outcome, Some(AckOutcome::Accepted));
        assert_eq!(report.control_id.as_deref(), Some("CTRL123"));
        assert_eq!(msa(&reply), vec!["MSA", "AA", "CTRL123"]);
        assert!(reply.ends_with(&[0x1C, 0x0D]));

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw, ADT);
        assert_eq!(records[0].header.control_id, "CTRL123");
    }

    #[tokio::test]
    async fn surrounding_whitespace_trimmed() {
        let store = Arc::new(MemoryAuditStore::new());
        let ctx = SessionContext::new(store.clone());
        let (_, reply) = exchange(ctx, &encode_frame(&format!("\n {ADT}\r\n"))).await;
        assert_eq!(msa(&reply)[1], "AA");
        assert_eq!(store.records()[0].raw, ADT);
    }

    #[tokio::test]
    async fn rejected_message_still_acknowledged() {
        let ctx = SessionContext::new(Arc::new(MemoryAuditStore::new()));
        let (report, reply) = exchange(ctx, &encode_frame("PID|1|2")).await;
        assert!(report.acknowledged());
        let text = decode_frame(&reply).unwrap().into_text();
        assert!(text.starts_with("MSH|^~\\&|ACK_SERVER|"));
        assert_eq!(msa(&reply), vec!["MSA", "AR", "", "missing MSH header"]);
    }

    #[tokio::test]
    async fn persistence_fault_downgrades_to_error() {
        let ctx = SessionContext::new(Arc::new(BrokenStore));
        let (report, reply) = exchange(ctx, &encode_frame(ADT)).await;

        assert!(report.acknowledged());
        assert!(report.audit_id.is_none());
        let fields = msa(&reply);
        assert_eq!(fields[1], "AE");
        assert_eq!(fields[2], "CTRL123");
        assert!(fields[3].contains("disk full"));
    }

    #[tokio::test]
    async fn persistence_fault_keeps_rejection() {
        let ctx = SessionContext::new(Arc::new(BrokenStore));
        let header_only = "MSH|^~\\&|A|B|C|D|2024||ADT^A01|X1|P|2.5";
        let (_, reply) = exchange(ctx, &encode_frame(header_only)).await;
        assert_eq!(msa(&reply), vec!["MSA", "AR", "X1", "structure too short"]);
    }

    #[tokio::test]
    async fn no_start_marker_gets_no_reply() {
        let store = Arc::new(MemoryAuditStore::new());
        let ctx = SessionContext::new(store.clone());
        let (report, reply) = exchange(ctx, b"MSH|^~\\&|A\x1c\x0d").await;
        assert!(reply.is_empty());
        assert!(matches!(
            report.error,
            Some(MllpError::Framing(FramingError::NoStartMarker))
        ));
        assert_eq!(report.phase, SessionPhase::Closed);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn incomplete_frame_gets_no_reply() {
        let stream = tokio_test::io::Builder::new()
            .read(b"\x0bMSH|^~\\&|A|B")
            .build();
        let ctx = SessionContext::new(Arc::new(MemoryAuditStore::new()));
        let report = Session::new(stream, ctx).run().await;
        assert!(matches!(
            report.error,
            Some(MllpError::Framing(FramingError::IncompleteFrame))
        ));
        assert!(report.outcome.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_dropped() {
        let ctx = SessionContext::new(Arc::new(MemoryAuditStore::new())).with_max_frame_size(8);
        let (report, reply) = exchange(ctx, &encode_frame(ADT)).await;
        assert!(reply.is_empty());
        assert!(report.error.unwrap().is_framing());
    }

    #[tokio::test]
    async fn read_failure_suppresses_ack() {
        let stream = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let ctx = SessionContext::new(Arc::new(MemoryAuditStore::new()));
        let report = Session::new(stream, ctx).run().await;
        assert!(report.error.unwrap().is_transport());
        assert_eq!(report.phase, SessionPhase::Closed);
    }

    #[tokio::test]
    async fn write_failure_is_not_retried() {
        let stream = tokio_test::io::Builder::new()
            .read(&encode_frame(ADT))
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let store = Arc::new(MemoryAuditStore::new());
        let ctx = SessionContext::new(store.clone());
        let report = Session::new(stream, ctx).run().await;
        assert!(report.error.unwrap().is_transport());
        assert_eq!(report.outcome, Some(AckOutcome::Accepted));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn read_timeout_closes_session() {
        let (_client, server) = tokio::io::duplex(1024);
        let ctx = SessionContext::new(Arc::new(MemoryAuditStore::new()))
            .with_read_timeout(Some(Duration::from_millis(20)));
        let report = Session::new(server, ctx).run().await;
        assert!(matches!(report.error, Some(MllpError::Timeout(_))));
        assert_eq!(report.phase, SessionPhase::Closed);
    }

    // ── Error edge ────────────────────────────────────────────────

    #[tokio::test]
    async fn error_edge_sends_generic_error_ack() {
        let (mut client, server) = tokio::io::duplex(4096);
        let ctx = SessionContext::new(Arc::new(MemoryAuditStore::new()));
        let mut session = Session::new(server, ctx);
        session.phase.begin_parsing().unwrap();

        let fault = MllpError::ProtocolViolation("cannot acknowledge: message not classified");
        session.fail(&fault).await;
        session.close().await;
        assert!(session.phase().is_closed());
        drop(session);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply.iter().filter(|&&b| b == 0x0B).count(), 1);
        let text = decode_frame(&reply).unwrap().into_text();
        assert!(text.starts_with("MSH|^~\\&|ACK_SERVER|"));
        let fields = msa(&reply);
        assert_eq!(fields[..3], ["MSA", "AE", ""]);
        assert!(fields[3].contains("protocol violation"));
    }

    /// Run `fail` from `phase` over a pipe and return what the peer saw.
    async fn fail_from(phase: SessionPhase, fault: MllpError) -> Vec<u8> {
        let (mut client, server) = tokio::io::duplex(4096);
        let ctx = SessionContext::new(Arc::new(MemoryAuditStore::new()));
        let mut session = Session::new(server, ctx);
        session.phase = phase;
        session.fail(&fault).await;
        session.close().await;
        drop(session);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn error_edge_after_ack_writes_nothing() {
        let reply = fail_from(SessionPhase::AckSent, MllpError::ProtocolViolation("late fault")).await;
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn error_edge_skips_transport_and_framing_faults() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        for fault in [
            MllpError::Transport(reset),
            MllpError::Timeout(Duration::from_millis(5)),
            FramingError::IncompleteFrame.into(),
        ] {
            assert!(fail_from(SessionPhase::Parsing, fault).await.is_empty());
        }
    }

    #[tokio::test]
    async fn error_edge_answers_persistence_fault() {
        let fault = MllpError::Persistence(PersistenceError::Unavailable("db down".into()));
        let reply = fail_from(SessionPhase::Classifying, fault).await;
        let fields = msa(&reply);
        assert_eq!(fields[1], "AE");
        assert!(fields[3].contains("db down"));
    }
}
