use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trickle ICE candidate in the browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Deserialize)]
struct NestedCandidate {
    candidate: IceCandidate,
}

/// Parses a candidate payload as sent by the signaling service.
///
/// Accepted shapes, tried in order:
/// - flat `{ "candidate": "candidate:...", "sdpMid": ..., "sdpMLineIndex": ... }`
/// - nested `{ "candidate": { "candidate": "candidate:...", ... } }`
/// - a flat object whose `candidate` field is itself JSON-encoded
/// - a bare candidate line or a JSON-encoded object inside a string
///
/// Returns `None` for anything else, including an empty candidate line.
pub fn parse_ice_candidate(value: &Value) -> Option<IceCandidate> {
    parse_with_depth(value, 0)
}

fn parse_with_depth(value: &Value, depth: u8) -> Option<IceCandidate> {
    if depth > 2 {
        return None;
    }

    if let Ok(flat) = IceCandidate::deserialize(value) {
        if looks_encoded(&flat.candidate) {
            return parse_encoded(&flat.candidate, depth);
        }
        return non_empty(flat);
    }

    if let Ok(nested) = NestedCandidate::deserialize(value) {
        return non_empty(nested.candidate);
    }

    match value {
        Value::String(s) if looks_encoded(s) => parse_encoded(s, depth),
        Value::String(s) => non_empty(IceCandidate::new(s.trim())),
        _ => None,
    }
}

fn looks_encoded(s: &str) -> bool {
    s.trim_start().starts_with('{')
}

fn parse_encoded(s: &str, depth: u8) -> Option<IceCandidate> {
    let inner: Value = serde_json::from_str(s).ok()?;
    parse_with_depth(&inner, depth + 1)
}

fn non_empty(candidate: IceCandidate) -> Option<IceCandidate> {
    if candidate.candidate.trim().is_empty() {
        None
    } else {
        Some(candidate)
    }
}
