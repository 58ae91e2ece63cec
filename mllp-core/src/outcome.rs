//! Acknowledgment outcomes.
//!
//! Uses proper enums with `TryFrom` for the wire status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── AckStatus ────────────────────────────────────────────────────

/// MSA-1 acknowledgment code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckStatus {
    /// `AA`: application accept.
    #[serde(rename = "AA")]
    Accept,
    /// `AR`: application reject (structurally invalid).
    #[serde(rename = "AR")]
    Reject,
    /// `AE`: application error (processing fault).
    #[serde(rename = "AE")]
    Error,
}

impl AckStatus {
    pub fn code(&self) -> &'static str {
        match self {
            AckStatus::Accept => "AA",
            AckStatus::Reject => "AR",
            AckStatus::Error => "AE",
        }
    }
}

impl TryFrom<&str> for AckStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "AA" => Ok(AckStatus::Accept),
            "AR" => Ok(AckStatus::Reject),
            "AE" => Ok(AckStatus::Error),
            other => Err(format!("unknown acknowledgment code {other:?}")),
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── Detail ───────────────────────────────────────────────────────

/// Human-readable outcome detail, safe to embed as an MSA field.
///
/// Runs of CR/LF collapse to one space; field separators become spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Detail(String);

impl Detail {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self(sanitize(text.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Make `text` safe to place inside a single outgoing segment field.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        match c {
            '\r' | '\n' => {
                if !in_break {
                    out.push(' ');
                }
                in_break = true;
            }
            '|' => {
                out.push(' ');
                in_break = false;
            }
            c => {
                out.push(c);
                in_break = false;
            }
        }
    }
    out
}

// ── AckOutcome ───────────────────────────────────────────────────

/// The verdict for one processed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail")]
pub enum AckOutcome {
    Accepted,
    Rejected(Detail),
    Errored(Detail),
}

impl AckOutcome {
    pub fn rejected(detail: impl AsRef<str>) -> Self {
        AckOutcome::Rejected(Detail::new(detail))
    }

    pub fn errored(detail: impl AsRef<str>) -> Self {
        AckOutcome::Errored(Detail::new(detail))
    }

    pub fn status(&self) -> AckStatus {
        match self {
            AckOutcome::Accepted => AckStatus::Accept,
            AckOutcome::Rejected(_) => AckStatus::Reject,
            AckOutcome::Errored(_) => AckStatus::Error,
        }
    }

    pub fn detail(&self) -> Option<&Detail> {
        match self {
            AckOutcome::Accepted => None,
            AckOutcome::Rejected(d) | AckOutcome::Errored(d) => Some(d),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, AckOutcome::Accepted)
    }

    /// Apply a persistence fault. An already rejected or errored outcome is
    /// kept as is.
    pub fn downgrade(self, detail: impl AsRef<str>) -> Self {
        match self {
            AckOutcome::Accepted => AckOutcome::errored(detail),
            worse => worse,
        }
    }
}

impl fmt::Display for AckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(d) if !d.is_empty() => write!(f, "{} ({d})", self.status()),
            _ => write!(f, "{}", self.status()),
        }
    }
}
