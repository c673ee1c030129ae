//! Link credentials
//!
//! A link authenticates its remote side with an ICE-style username fragment
//! and password, and advertises a SHA-256 fingerprint of its local key
//! material. Links that do not run DTLS still carry the fingerprint so their
//! descriptions survive the code round trip unchanged.

use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use super::signal::{Candidates, Signal, SignalKind};

/// Length of a generated username fragment
pub const UFRAG_LEN: usize = 4;

/// Length of a generated password
pub const PWD_LEN: usize = 22;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCredentials {
    pub ufrag: String,
    pub pwd: String,
    pub fingerprint: String,
}

impl LinkCredentials {
    pub fn generate() -> Self {
        let mut key_material = [0u8; 32];
        OsRng.fill_bytes(&mut key_material);
        Self {
            ufrag: random_token(UFRAG_LEN),
            pwd: random_token(PWD_LEN),
            fingerprint: fingerprint_of(&key_material),
        }
    }

    /// Whether a remote hello proves knowledge of these credentials
    pub fn matches(&self, ufrag: &str, pwd: &str) -> bool {
        self.ufrag == ufrag && self.pwd == pwd
    }

    /// Signal advertising these credentials and the given candidates
    pub fn to_signal(&self, kind: SignalKind, candidates: Candidates) -> Signal {
        Signal {
            kind,
            ice_ufrag: self.ufrag.clone(),
            ice_pwd: self.pwd.clone(),
            fingerprint: self.fingerprint.clone(),
            candidates,
        }
    }
}

/// Host candidate line for an IPv4 endpoint
pub fn host_candidate(transport: &str, address: std::net::Ipv4Addr, port: u16) -> String {
    format!("1 1 {transport} 2113937151 {address} {port} typ host IP4")
}

/// Colon-separated uppercase hex digest, as found in `a=fingerprint` lines
pub fn fingerprint_of(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Alphanumeric token drawn from the OS generator
fn random_token(len: usize) -> String {
    // Bytes at or above this bound are rejected so every symbol is equally likely
    let bound = (256 / TOKEN_ALPHABET.len() * TOKEN_ALPHABET.len()) as u8;
    let mut token = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while token.len() < len {
        OsRng.fill_bytes(&mut buf);
        for byte in buf.iter().filter(|b| **b < bound) {
            if token.len() == len {
                break;
            }
            token.push(TOKEN_ALPHABET[*byte as usize % TOKEN_ALPHABET.len()] as char);
        }
    }
    token
}
