//! Signal code codec
//!
//! Packs a [`Signal`] into the compact `{t,u,p,f,c}` record and compresses it
//! with LZ-String's URI-safe variant so it fits a low-density scannable code.
//! The layout is shared with codes generated by earlier app versions and must
//! not change.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::CodecError;
use crate::protocol::signal::{Candidates, SessionDescription, Signal, SignalKind};

/// Separator between candidates in the `c` field
pub const CANDIDATE_SEPARATOR: char = ';';

/// Compact record; field order is part of the wire format
#[derive(Debug, Serialize)]
struct PackedSignal<'a> {
    t: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    u: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    f: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    c: Option<String>,
}

/// Encode a signal into transportable text
pub fn encode(signal: &Signal) -> Result<String, CodecError> {
    let packed = if signal.is_degenerate() {
        PackedSignal {
            t: signal.kind.tag(),
            u: None,
            p: None,
            f: None,
            c: None,
        }
    } else {
        PackedSignal {
            t: signal.kind.tag(),
            u: Some(&signal.ice_ufrag),
            p: Some(&signal.ice_pwd),
            f: Some(&signal.fingerprint),
            c: Some(signal.candidates.join(";")),
        }
    };
    compress(&packed)
}

/// Encode the signal carried by a full transport description
pub fn encode_description(description: &SessionDescription) -> Result<String, CodecError> {
    encode(&Signal::from_description(description))
}

fn compress<T: Serialize>(record: &T) -> Result<String, CodecError> {
    let json =
        serde_json::to_string(record).map_err(|e| CodecError::NotEncodable(e.to_string()))?;
    Ok(lz_str::compress_to_encoded_uri_component(json.as_str()))
}

/// Decode transportable text back into a signal
///
/// Only text that does not decompress is an error. A record without
/// credentials yields a degenerate signal so the caller can report something
/// more specific than a format error.
pub fn decode(text: &str) -> Result<Signal, CodecError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CodecError::Empty);
    }

    let json = lz_str::decompress_from_encoded_uri_component(text)
        .and_then(|wide| String::from_utf16(&wide).ok())
        .filter(|json| !json.is_empty())
        .ok_or(CodecError::NotDecompressible)?;

    let record = match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(map)) => map,
        // Older codes carried nothing but the type tag
        Ok(Value::String(tag)) => legacy_record(&tag),
        Ok(_) | Err(_) => legacy_record(json.trim()),
    };

    Ok(unpack(&record))
}

/// Decode straight to a transport description a link can consume
pub fn decode_description(text: &str) -> Result<SessionDescription, CodecError> {
    decode(text).map(|signal| signal.to_description())
}

fn legacy_record(tag: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("t".to_string(), Value::String(tag.to_string()));
    map
}

fn field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn unpack(record: &Map<String, Value>) -> Signal {
    let is_offer = field(record, "t").as_deref() == Some(SignalKind::Offer.tag())
        || field(record, "type").as_deref() == Some("offer");
    let kind = if is_offer {
        SignalKind::Offer
    } else {
        SignalKind::Answer
    };

    let ice_ufrag = match field(record, "u") {
        Some(u) if !u.is_empty() => u,
        _ => return Signal::degenerate(kind),
    };

    let candidates: Candidates = field(record, "c")
        .unwrap_or_default()
        .split(CANDIDATE_SEPARATOR)
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string)
        .collect();

    Signal {
        kind,
        ice_ufrag,
        ice_pwd: field(record, "p").unwrap_or_default(),
        fingerprint: field(record, "f").unwrap_or_default(),
        candidates,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_signal(kind: SignalKind) -> Signal {
        Signal {
            kind,
            ice_ufrag: "Ab3d".into(),
            ice_pwd: "pWd0123456789abcdefghij".into(),
            fingerprint: "AA:BB:CC:DD:EE:FF".into(),
            candidates: ["1 1 udp 2113937151 192.168.1.20 54400 typ host IP4"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    #[test]
    fn test_round_trip_offer_and_answer() {
        for kind in [SignalKind::Offer, SignalKind::Answer] {
            let signal = sample_signal(kind);
            let decoded = decode(&encode(&signal).unwrap()).unwrap();
            assert_eq!(decoded, signal);
        }
    }

    #[test]
    fn test_encoded_text_is_url_safe() {
        let text = encode(&sample_signal(SignalKind::Offer)).unwrap();
        assert!(text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '$')));
        assert!(text.len() < 300);
    }

    #[test]
    fn test_record_layout() {
        let signal = sample_signal(SignalKind::Answer);
        let text = encode(&signal).unwrap();
        let json = lz_str::decompress_from_encoded_uri_component(text.as_str())
            .map(|wide| String::from_utf16(&wide).unwrap())
            .unwrap();
        assert!(json.starts_with(r#"{"t":"2","u":"Ab3d","p":"#));
        assert!(json.ends_with(r#""c":"1 1 udp 2113937151 192.168.1.20 54400 typ host IP4"}"#));
    }

    #[test]
    fn test_legacy_single_character_payload() {
        let text = lz_str::compress_to_encoded_uri_component("1");
        let signal = decode(&text).unwrap();
        assert_eq!(signal.kind, SignalKind::Offer);
        assert!(signal.is_degenerate());

        let text = lz_str::compress_to_encoded_uri_component("a");
        assert_eq!(decode(&text).unwrap().kind, SignalKind::Answer);
    }

    #[test]
    fn test_verbose_type_field_is_honoured() {
        let text = lz_str::compress_to_encoded_uri_component(r#"{"type":"offer","u":"x"}"#);
        let signal = decode(&text).unwrap();
        assert!(signal.is_offer());
        assert_eq!(signal.ice_ufrag, "x");
        assert!(signal.candidates.is_empty());
    }

    #[test]
    fn test_credential_less_record_is_degenerate() {
        let text = lz_str::compress_to_encoded_uri_component(r#"{"t":"2"}"#);
        let signal = decode(&text).unwrap();
        assert_eq!(signal, Signal::degenerate(SignalKind::Answer));
        assert!(decode_description(&text).unwrap().is_degenerate());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(decode(""), Err(CodecError::Empty));
        assert_eq!(decode("   "), Err(CodecError::Empty));
        assert!(decode("!!!!").is_err());
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let signal = sample_signal(SignalKind::Offer);
        let text = format!("  {}\n", encode(&signal).unwrap());
        assert_eq!(decode(&text).unwrap(), signal);
    }

    #[test]
    fn test_unserializable_record_is_an_error() {
        use std::collections::BTreeMap;

        // JSON object keys must be strings
        let record: BTreeMap<(u8, u8), u8> = [((1, 2), 3)].into_iter().collect();
        assert!(matches!(
            compress(&record),
            Err(CodecError::NotEncodable(reason)) if reason.contains("key must be a string")
        ));
    }
}
