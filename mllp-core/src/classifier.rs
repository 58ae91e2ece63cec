//! Header extraction and validation tiers.
//!
//! Classification never fails: malformed input maps to a `Rejected` or
//! `Errored` outcome. Header extraction sits behind [`SemanticParser`] so a
//! deeper parser can replace the built-in [`MshParser`].

use std::fmt::Debug;
use std::sync::Arc;

use tracing::debug;

use crate::error::ParseFault;
use crate::header::{
    COMPONENT_SEPARATOR, FIELD_SEPARATOR, MshFields, ParsedHeader, SENTINEL, is_missing,
};
use crate::outcome::AckOutcome;

/// Segment identifier of the message header.
pub const MSH: &str = "MSH";

pub const EMPTY_MESSAGE: &str = "empty message";
pub const MISSING_MSH: &str = "missing MSH header";
pub const MESSAGE_TYPE_MISSING: &str = "message type missing or unknown";
pub const CONTROL_ID_MISSING: &str = "control id missing";
pub const STRUCTURE_TOO_SHORT: &str = "structure too short";

/// Split message text into non-empty segments on `\r\n`, `\r` or `\n`.
pub fn split_segments(text: &str) -> Vec<&str> {
    text.split(['\r', '\n']).filter(|s| !s.is_empty()).collect()
}

// ── SemanticParser ───────────────────────────────────────────────

/// Extracts a [`ParsedHeader`] from message text.
///
/// Implementations are shared by every session and must tolerate
/// concurrent calls.
pub trait SemanticParser: Send + Sync + Debug {
    fn parse(&self, text: &str) -> Result<ParsedHeader, ParseFault>;
}

/// Built-in parser that reads the MSH segment field by field.
#[derive(Debug, Default, Clone, Copy)]
pub struct MshParser;

impl MshParser {
    /// Field separator declared right after the `MSH` token.
    fn field_separator(segment: &str) -> Result<Option<char>, ParseFault> {
        match segment[MSH.len()..].chars().next() {
            None => Ok(None),
            Some(c) if c.is_alphanumeric() || c.is_whitespace() => {
                Err(ParseFault::InvalidFieldSeparator(c))
            }
            Some(c) => Ok(Some(c)),
        }
    }

    fn component_separator(encoding: &str, field_separator: char) -> Result<char, ParseFault> {
        if encoding == SENTINEL {
            return Ok(COMPONENT_SEPARATOR);
        }
        match encoding.chars().next() {
            None => Ok(COMPONENT_SEPARATOR),
            Some(c) if c.is_alphanumeric() || c.is_whitespace() || c == field_separator => {
                Err(ParseFault::InvalidEncodingCharacters(encoding.to_string()))
            }
            Some(c) => Ok(c),
        }
    }
}

impl SemanticParser for MshParser {
    fn parse(&self, text: &str) -> Result<ParsedHeader, ParseFault> {
        let segment = split_segments(text)
            .into_iter()
            .next()
            .filter(|s| s.starts_with(MSH))
            .ok_or(ParseFault::Other(MISSING_MSH.to_string()))?;

        let separator = Self::field_separator(segment)?.unwrap_or(FIELD_SEPARATOR);
        let fields = MshFields::split(segment, separator);
        let component = Self::component_separator(fields.get(1), separator)?;

        Ok(ParsedHeader::from_fields(&fields, component))
    }
}

// ── Classification ───────────────────────────────────────────────

/// Header plus verdict for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub header: ParsedHeader,
    pub outcome: AckOutcome,
    pub segment_count: usize,
}

impl Classification {
    fn new(header: ParsedHeader, outcome: AckOutcome, segment_count: usize) -> Self {
        Self {
            header,
            outcome,
            segment_count,
        }
    }
}

/// Applies the validation tiers to a parsed header, first match wins.
pub fn validate(header: &ParsedHeader, segment_count: usize) -> AckOutcome {
    if is_missing(&header.message_code) {
        AckOutcome::errored(MESSAGE_TYPE_MISSING)
    } else if is_missing(&header.control_id) {
        AckOutcome::errored(CONTROL_ID_MISSING)
    } else if segment_count < 2 {
        AckOutcome::rejected(STRUCTURE_TOO_SHORT)
    } else {
        AckOutcome::Accepted
    }
}

// ── Classifier ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Classifier {
    parser: Arc<dyn SemanticParser>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Classifier backed by the built-in [`MshParser`].
    pub fn new() -> Self {
        Self::with_parser(Arc::new(MshParser))
    }

    pub fn with_parser(parser: Arc<dyn SemanticParser>) -> Self {
        Self { parser }
    }

    pub fn classify(&self, text: &str) -> Classification {
        let segments = split_segments(text);
        let segment_count = segments.len();

        let Some(first) = segments.first() else {
            return Classification::new(
                ParsedHeader::unparsed(),
                AckOutcome::rejected(EMPTY_MESSAGE),
                0,
            );
        };
        if !first.starts_with(MSH) {
            return Classification::new(
                ParsedHeader::unparsed(),
                AckOutcome::rejected(MISSING_MSH),
                segment_count,
            );
        }

        let header = match self.parser.parse(text) {
            Ok(header) => header,
            Err(fault) => {
                debug!(%fault, "header extraction failed");
                return Classification::new(
                    ParsedHeader::builder().build(),
                    AckOutcome::errored(fault.to_string()),
                    segment_count,
                );
            }
        };

        let outcome = validate(&header, segment_count);
        debug!(
            message_type = %header.message_type(),
            control_id = %header.control_id,
            segments = segment_count,
            status = %outcome.status(),
            "message classified"
        );
        Classification::new(header, outcome, segment_count)
    }
}

/// Classify with the built-in parser.
pub fn classify(text: &str) -> (ParsedHeader, AckOutcome) {
    let Classification { header, outcome, .. } = Classifier::new().classify(text);
    (header, outcome)
}
