//! MSH header fields.
//!
//! Field numbering: element 0 is the literal `MSH` token and element 1 is
//! the encoding-characters field, so the sending application sits at 2 and
//! the control id at 9. Every component that indexes the header goes
//! through [`MshFields`].

use serde::{Deserialize, Serialize};

/// Placeholder for a field that is absent or out of range.
pub const SENTINEL: &str = "UNKNOWN";

/// Default field separator.
pub const FIELD_SEPARATOR: char = '|';
/// Default component separator.
pub const COMPONENT_SEPARATOR: char = '^';
/// Default encoding characters (component, repetition, escape, subcomponent).
pub const ENCODING_CHARACTERS: &str = "^~\\&";

pub const SENDING_APPLICATION: usize = 2;
pub const SENDING_FACILITY: usize = 3;
pub const RECEIVING_APPLICATION: usize = 4;
pub const RECEIVING_FACILITY: usize = 5;
pub const MESSAGE_TYPE: usize = 8;
pub const CONTROL_ID: usize = 9;

/// Whether `value` is empty or the sentinel.
pub fn is_missing(value: &str) -> bool {
    value.is_empty() || value == SENTINEL
}

// ── MshFields ────────────────────────────────────────────────────

/// An MSH segment split on its field separator, empty fields preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MshFields<'a> {
    fields: Vec<&'a str>,
}

impl<'a> MshFields<'a> {
    pub fn split(segment: &'a str, separator: char) -> Self {
        Self {
            fields: segment.split(separator).collect(),
        }
    }

    /// The field at `index`, or [`SENTINEL`] when out of range.
    pub fn get(&self, index: usize) -> &'a str {
        self.fields.get(index).copied().unwrap_or(SENTINEL)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── ParsedHeader ─────────────────────────────────────────────────

/// Routing and identity fields of an inbound message.
///
/// Every field is always populated; missing values hold [`SENTINEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedHeader {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
    pub message_code: String,
    pub trigger_event: String,
    pub control_id: String,
    /// `false` when no MSH segment was found at all.
    #[serde(default = "present")]
    msh_present: bool,
}

fn present() -> bool {
    true
}

impl Default for ParsedHeader {
    fn default() -> Self {
        Self::unparsed()
    }
}

impl ParsedHeader {
    /// All-sentinel header for a message without an MSH segment.
    pub fn unparsed() -> Self {
        Self {
            sending_application: SENTINEL.into(),
            sending_facility: SENTINEL.into(),
            receiving_application: SENTINEL.into(),
            receiving_facility: SENTINEL.into(),
            message_code: SENTINEL.into(),
            trigger_event: SENTINEL.into(),
            control_id: SENTINEL.into(),
            msh_present: false,
        }
    }

    /// Extract the header from split MSH fields.
    pub fn from_fields(fields: &MshFields<'_>, component_separator: char) -> Self {
        let (message_code, trigger_event) =
            split_message_type(fields.get(MESSAGE_TYPE), component_separator);

        Self {
            sending_application: fields.get(SENDING_APPLICATION).into(),
            sending_facility: fields.get(SENDING_FACILITY).into(),
            receiving_application: fields.get(RECEIVING_APPLICATION).into(),
            receiving_facility: fields.get(RECEIVING_FACILITY).into(),
            message_code,
            trigger_event,
            control_id: fields.get(CONTROL_ID).into(),
            msh_present: true,
        }
    }

    /// Build a header from already-extracted values, as a pluggable parser
    /// would.
    pub fn builder() -> ParsedHeaderBuilder {
        ParsedHeaderBuilder::default()
    }

    pub fn is_parsed(&self) -> bool {
        self.msh_present
    }

    /// `code^trigger`, or just the code when no trigger event is present.
    pub fn message_type(&self) -> String {
        if is_missing(&self.trigger_event) {
            self.message_code.clone()
        } else {
            format!(
                "{}{COMPONENT_SEPARATOR}{}",
                self.message_code, self.trigger_event
            )
        }
    }
}

fn split_message_type(raw: &str, component_separator: char) -> (String, String) {
    if raw == SENTINEL {
        return (SENTINEL.into(), SENTINEL.into());
    }
    match raw.split_once(component_separator) {
        Some((code, rest)) => {
            // Trailing components (message structure) are not part of the trigger.
            let trigger = rest.split(component_separator).next().unwrap_or_default();
            (code.into(), trigger.into())
        }
        None => (raw.into(), SENTINEL.into()),
    }
}

// ── Builder ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ParsedHeaderBuilder {
    sending_application: Option<String>,
    sending_facility: Option<String>,
    receiving_application: Option<String>,
    receiving_facility: Option<String>,
    message_code: Option<String>,
    trigger_event: Option<String>,
    control_id: Option<String>,
}

impl ParsedHeaderBuilder {
    pub fn sending_application(mut self, v: impl Into<String>) -> Self {
        self.sending_application = Some(v.into());
        self
    }

    pub fn sending_facility(mut self, v: impl Into<String>) -> Self {
        self.sending_facility = Some(v.into());
        self
    }

    pub fn receiving_application(mut self, v: impl Into<String>) -> Self {
        self.receiving_application = Some(v.into());
        self
    }

    pub fn receiving_facility(mut self, v: impl Into<String>) -> Self {
        self.receiving_facility = Some(v.into());
        self
    }

    pub fn message_code(mut self, v: impl Into<String>) -> Self {
        self.message_code = Some(v.into());
        self
    }

    pub fn trigger_event(mut self, v: impl Into<String>) -> Self {
        self.trigger_event = Some(v.into());
        self
    }

    pub fn control_id(mut self, v: impl Into<String>) -> Self {
        self.control_id = Some(v.into());
        self
    }

    pub fn build(self) -> ParsedHeader {
        let or_sentinel = |v: Option<String>| v.unwrap_or_else(|| SENTINEL.into());
        ParsedHeader {
            sending_application: or_sentinel(self.sending_application),
            sending_facility: or_sentinel(self.sending_facility),
            receiving_application: or_sentinel(self.receiving_application),
            receiving_facility: or_sentinel(self.receiving_facility),
            message_code: or_sentinel(self.message_code),
            trigger_event: or_sentinel(self.trigger_event),
            control_id: or_sentinel(self.control_id),
            msh_present: true,
        }
    }
}
