//! Encoded-PII candidate extraction.
//!
//! Finds substrings that look like base64, hex, or percent-encoded payloads,
//! decodes them, and hands the decoded plaintext back to the detector so the
//! regular entity patterns can run over it. Oversized payloads are rejected
//! before decoding.

use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Upper bound on decoded payload size, in bytes.
pub const MAX_DECODED_BYTES: usize = 10_000;

/// One decodable region of the original text.
#[derive(Debug, Clone)]
pub struct EncodedCandidate {
    pub start: usize,
    pub end: usize,
    pub decoded: String,
}

static BASE64_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9+/]{16,}={0,2}").expect("static base64 pattern compiles")
});

static HEX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:[0-9a-fA-F]{2}){8,}\b").expect("static hex pattern compiles"));

static PERCENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:%[0-9A-Fa-f]{2}){4,}").expect("static percent pattern compiles")
});

/// Scan for encoded regions and return those that decode to valid UTF-8.
///
/// A region matched by more than one encoding is reported once; hex is tried
/// before base64 because every long hex string is also valid base64 alphabet.
pub fn find_candidates(text: &str) -> Vec<EncodedCandidate> {
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut candidates = Vec::new();

    for m in HEX_PATTERN.find_iter(text) {
        if let Some(decoded) = decode_hex(m.as_str()) {
            if seen.insert((m.start(), m.end())) {
                candidates.push(EncodedCandidate {
                    start: m.start(),
                    end: m.end(),
                    decoded,
                });
            }
        }
    }

    for m in BASE64_PATTERN.find_iter(text) {
        if seen.contains(&(m.start(), m.end())) {
            continue;
        }
        if let Some(decoded) = decode_base64(m.as_str()) {
            seen.insert((m.start(), m.end()));
            candidates.push(EncodedCandidate {
                start: m.start(),
                end: m.end(),
                decoded,
            });
        }
    }

    for m in PERCENT_PATTERN.find_iter(text) {
        if seen.contains(&(m.start(), m.end())) {
            continue;
        }
        if let Some(decoded) = decode_percent(m.as_str()) {
            seen.insert((m.start(), m.end()));
            candidates.push(EncodedCandidate {
                start: m.start(),
                end: m.end(),
                decoded,
            });
        }
    }

    candidates
}

fn decode_base64(raw: &str) -> Option<String> {
    // 3 decoded bytes per 4 encoded characters; reject before allocating.
    if raw.len() / 4 * 3 > MAX_DECODED_BYTES {
        return None;
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    printable(&decoded).then_some(decoded)
}

fn decode_hex(raw: &str) -> Option<String> {
    if raw.len() / 2 > MAX_DECODED_BYTES {
        return None;
    }
    let mut bytes = Vec::with_capacity(raw.len() / 2);
    let chars: Vec<char> = raw.chars().collect();
    for pair in chars.chunks(2) {
        let hi = pair[0].to_digit(16)?;
        let lo = pair.get(1)?.to_digit(16)?;
        bytes.push((hi * 16 + lo) as u8);
    }
    let decoded = String::from_utf8(bytes).ok()?;
    printable(&decoded).then_some(decoded)
}

fn decode_percent(raw: &str) -> Option<String> {
    if raw.len() / 3 > MAX_DECODED_BYTES {
        return None;
    }
    let mut bytes = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        let hex = rest.get(1..3)?;
        bytes.push(u8::from_str_radix(hex, 16).ok()?);
        rest = &rest[3..];
    }
    let decoded = String::from_utf8(bytes).ok()?;
    printable(&decoded).then_some(decoded)
}

// Binary payloads decode to control-character soup; only keep plausible text.
fn printable(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| !c.is_control() || c.is_whitespace())
}
