//! Acknowledgment composition.
//!
//! ```text
//! MSH|^~\&|<recv app>|<recv fac>|<send app>|<send fac>|<yyyyMMddHHmmss>||ACK^<trigger>|<control id>|P|2.5<CR>
//! MSA|<AA|AR|AE>|<control id>[|<detail>]<CR>
//! ```
//!
//! Addressing is swapped so the acknowledgment goes back to the sender.

use std::fmt::Write;

use chrono::{DateTime, Local};

use crate::header::{ENCODING_CHARACTERS, ParsedHeader, SENTINEL, is_missing};
use crate::outcome::{AckOutcome, AckStatus, sanitize};

/// Segment terminator.
pub const SEGMENT_TERMINATOR: char = '\r';
pub const PROCESSING_ID: &str = "P";
pub const VERSION_ID: &str = "2.5";
/// Trigger event used when the inbound one is unknown.
pub const DEFAULT_TRIGGER: &str = "A01";
/// Sending application of the fallback acknowledgment.
pub const FALLBACK_APPLICATION: &str = "ACK_SERVER";
/// Detail of the fallback acknowledgment when none is available.
pub const FALLBACK_DETAIL: &str = "message could not be processed";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Compose the acknowledgment for `header` at the current local time.
pub fn compose(header: &ParsedHeader, outcome: &AckOutcome, control_id: Option<&str>) -> String {
    compose_at(header, outcome, control_id, Local::now())
}

/// Compose with an explicit timestamp.
pub fn compose_at(
    header: &ParsedHeader,
    outcome: &AckOutcome,
    control_id: Option<&str>,
    at: DateTime<Local>,
) -> String {
    if !header.is_parsed() {
        let detail = outcome
            .detail()
            .map(|d| d.as_str())
            .filter(|d| !d.is_empty())
            .unwrap_or(FALLBACK_DETAIL);
        return fallback_at(AckStatus::Reject, detail, at);
    }

    // Inbound values were split on the sender's separator and may still
    // contain ours.
    let control_id = sanitize(control_id.unwrap_or(SENTINEL));
    let trigger = if is_missing(&header.trigger_event) {
        DEFAULT_TRIGGER.to_string()
    } else {
        sanitize(&header.trigger_event)
    };

    let mut ack = String::with_capacity(128);
    let _ = write!(
        ack,
        "MSH|{ENCODING_CHARACTERS}|{}|{}|{}|{}|{}||ACK^{trigger}|{control_id}|{PROCESSING_ID}|{VERSION_ID}{SEGMENT_TERMINATOR}",
        sanitize(&header.receiving_application),
        sanitize(&header.receiving_facility),
        sanitize(&header.sending_application),
        sanitize(&header.sending_facility),
        at.format(TIMESTAMP_FORMAT),
    );
    push_msa(&mut ack, outcome.status(), &control_id, outcome.detail().map(|d| d.as_str()));
    ack
}

/// Fixed acknowledgment used when there is no header to address.
pub fn fallback(status: AckStatus, detail: &str) -> String {
    fallback_at(status, detail, Local::now())
}

pub fn fallback_at(status: AckStatus, detail: &str, at: DateTime<Local>) -> String {
    let detail = sanitize(detail);
    let mut ack = String::with_capacity(96);
    let _ = write!(
        ack,
        "MSH|{ENCODING_CHARACTERS}|{FALLBACK_APPLICATION}|||{}||ACK^{DEFAULT_TRIGGER}||{PROCESSING_ID}|{VERSION_ID}{SEGMENT_TERMINATOR}",
        at.format(TIMESTAMP_FORMAT),
    );
    push_msa(&mut ack, status, "", Some(&detail));
    ack
}

fn push_msa(ack: &mut String, status: AckStatus, control_id: &str, detail: Option<&str>) {
    let _ = write!(ack, "MSA|{}|{control_id}", status.code());
    if let Some(detail) = detail.filter(|d| !d.is_empty()) {
        let _ = write!(ack, "|{detail}");
    }
    ack.push(SEGMENT_TERMINATOR);
}
