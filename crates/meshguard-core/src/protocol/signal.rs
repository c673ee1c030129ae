//! Connection-setup descriptors
//!
//! A link produces and consumes full [`SessionDescription`]s. Only the handful
//! of fields another device needs to reach us survive into a [`Signal`], which
//! is what travels out of band. Expanding a Signal back into a description
//! synthesizes every other line.

use core::fmt;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum number of host/IPv4 candidates carried by a signal
pub const MAX_HOST_CANDIDATES: usize = 5;

/// Number of candidates of any kind kept when no host/IPv4 candidate exists
pub const FALLBACK_CANDIDATES: usize = 3;

/// Address used in the synthesized header when no candidate names one
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

const UFRAG_PREFIX: &str = "a=ice-ufrag:";
const PWD_PREFIX: &str = "a=ice-pwd:";
const FINGERPRINT_PREFIX: &str = "a=fingerprint:";
const CANDIDATE_PREFIX: &str = "a=candidate:";
const SETUP_PREFIX: &str = "a=setup:";

pub type Candidates = SmallVec<[String; MAX_HOST_CANDIDATES]>;

// ----------------------------------------------------------------------------
// Signal Kind
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

impl SignalKind {
    /// Single-character type tag used in the compact record
    pub fn tag(&self) -> &'static str {
        match self {
            SignalKind::Offer => "1",
            SignalKind::Answer => "2",
        }
    }

    /// ICE role attribute a description of this kind carries
    pub fn setup_role(&self) -> &'static str {
        match self {
            SignalKind::Offer => "actpass",
            SignalKind::Answer => "active",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
        }
    }
}

// ----------------------------------------------------------------------------
// Session Description
// ----------------------------------------------------------------------------

/// Full transport description as produced or consumed by a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SignalKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    /// A description with a kind but no body
    pub fn is_degenerate(&self) -> bool {
        self.sdp.trim().is_empty()
    }

    /// Iterate body lines regardless of CRLF or LF separators
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.sdp.lines().map(|line| line.trim_end_matches('\r'))
    }

    /// Value of the first line starting with `prefix`, trimmed
    pub fn attribute(&self, prefix: &str) -> Option<&str> {
        self.lines()
            .find(|line| line.starts_with(prefix))
            .map(|line| line[prefix.len()..].trim())
    }

    /// All candidate lines with the `a=candidate:` prefix removed
    pub fn candidates(&self) -> Vec<&str> {
        self.lines()
            .filter(|line| line.starts_with(CANDIDATE_PREFIX))
            .map(|line| line[CANDIDATE_PREFIX.len()..].trim())
            .collect()
    }

    /// Setup role attribute (`actpass`, `active`, ...)
    pub fn setup_role(&self) -> Option<&str> {
        self.attribute(SETUP_PREFIX)
    }
}

// ----------------------------------------------------------------------------
// Signal
// ----------------------------------------------------------------------------

/// Minimal connection-setup record exchanged out of band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub fingerprint: String,
    pub candidates: Candidates,
}

impl Signal {
    /// A signal that carries only its kind
    pub fn degenerate(kind: SignalKind) -> Self {
        Self {
            kind,
            ice_ufrag: String::new(),
            ice_pwd: String::new(),
            fingerprint: String::new(),
            candidates: Candidates::new(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == SignalKind::Offer
    }

    /// No credentials survived, so the description cannot be reconstructed
    pub fn is_degenerate(&self) -> bool {
        self.ice_ufrag.is_empty()
    }

    /// Project a full description down to the fields a peer needs
    pub fn from_description(description: &SessionDescription) -> Self {
        if description.is_degenerate() {
            return Self::degenerate(description.kind);
        }

        let fingerprint = description
            .attribute(FINGERPRINT_PREFIX)
            .and_then(|value| value.split(' ').nth(1))
            .unwrap_or_default()
            .to_string();

        Self {
            kind: description.kind,
            ice_ufrag: description
                .attribute(UFRAG_PREFIX)
                .unwrap_or_default()
                .to_string(),
            ice_pwd: description
                .attribute(PWD_PREFIX)
                .unwrap_or_default()
                .to_string(),
            fingerprint,
            candidates: prioritize_candidates(&description.candidates()),
        }
    }

    /// Rebuild a transport description using the current time for the header
    pub fn to_description(&self) -> SessionDescription {
        self.to_description_at(Timestamp::now())
    }

    /// Rebuild a transport description with an explicit header timestamp
    pub fn to_description_at(&self, now: Timestamp) -> SessionDescription {
        if self.is_degenerate() {
            return SessionDescription::new(self.kind, "");
        }

        let first = self
            .candidates
            .iter()
            .find(|c| !c.trim().is_empty())
            .map(String::as_str)
            .unwrap_or_default();
        let parts: Vec<&str> = first.split(' ').collect();
        let ip_version = if parts.get(5) == Some(&"IP6") { "6" } else { "4" };
        let address = match parts.get(4) {
            Some(addr) if !addr.is_empty() && *addr != "0.0.0.0" => *addr,
            _ => LOOPBACK_ADDRESS,
        };
        let secs = now.as_secs();

        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- {secs} {secs} IN IP4 {address}"),
            "s=-".to_string(),
            "t=0 0".to_string(),
            "a=msid-semantic: WMS".to_string(),
            "m=application 9 UDP/DTLS/SCTP webrtc-datachannel".to_string(),
            format!("c=IN IP{ip_version} {address}"),
            format!("{UFRAG_PREFIX}{}", self.ice_ufrag),
            format!("{PWD_PREFIX}{}", self.ice_pwd),
            format!("{FINGERPRINT_PREFIX}sha-256 {}", self.fingerprint),
            format!("{SETUP_PREFIX}{}", self.kind.setup_role()),
            "a=mid:0".to_string(),
            "a=sctp-port:5000".to_string(),
            "a=max-message-size:262144".to_string(),
        ];
        lines.extend(
            self.candidates
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| format!("{CANDIDATE_PREFIX}{c}")),
        );

        let mut sdp = lines.join("\r\n");
        sdp.push_str("\r\n");
        SessionDescription::new(self.kind, sdp)
    }
}

/// Keep up to five host/IPv4 candidates, else the first three of any kind
pub fn prioritize_candidates(candidates: &[&str]) -> Candidates {
    let preferred: Candidates = candidates
        .iter()
        .filter(|c| c.contains("host") && c.contains("IP4"))
        .take(MAX_HOST_CANDIDATES)
        .map(|c| c.to_string())
        .collect();

    if !preferred.is_empty() {
        return preferred;
    }

    candidates
        .iter()
        .take(FALLBACK_CANDIDATES)
        .map(|c| c.to_string())
        .collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
