#![forbid(unsafe_code)]

//! Payload compression for storage channels.
//!
//! Payloads above [`CompressionConfig::threshold_bytes`] are DEFLATE
//! compressed, base64 encoded, and tagged with [`COMPRESSED_PREFIX`]. The
//! compressed form is kept only when it saves at least
//! [`CompressionConfig::min_savings`] of the original size; otherwise the
//! original string is stored as-is.
//!
//! Readers call [`decompress`], which passes untagged strings through
//! unchanged. For every string `s`, `decompress(compress(s)) == s`: an input
//! that already starts with the tag is always compressed, so an untagged
//! payload can never be mistaken for a tagged one.

use std::borrow::Cow;
use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use super::RelayError;

/// Marks a compressed payload.
pub const COMPRESSED_PREFIX: &str = "PFZ1:";

/// Compression knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    /// Master switch.
    pub enabled: bool,
    /// Payloads at or below this size are never compressed.
    pub threshold_bytes: usize,
    /// Minimum fraction of the original size that must be saved.
    pub min_savings: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 1024,
            min_savings: 0.10,
        }
    }
}

impl CompressionConfig {
    /// Never compress (except inputs that collide with the tag).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Whether `s` carries the compression tag.
#[must_use]
pub fn is_compressed(s: &str) -> bool {
    s.starts_with(COMPRESSED_PREFIX)
}

fn encode(input: &str) -> Result<String, RelayError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input.as_bytes())?;
    let bytes = encoder.finish()?;
    Ok(format!("{COMPRESSED_PREFIX}{}", STANDARD.encode(bytes)))
}

/// Compress `input` if it is large enough and compression pays off.
pub fn compress<'a>(input: &'a str, config: &CompressionConfig) -> Result<Cow<'a, str>, RelayError> {
    if is_compressed(input) {
        return encode(input).map(Cow::Owned);
    }
    if !config.enabled || input.len() <= config.threshold_bytes {
        return Ok(Cow::Borrowed(input));
    }

    let packed = encode(input)?;
    let limit = input.len() as f64 * (1.0 - config.min_savings);
    if (packed.len() as f64) <= limit {
        tracing::trace!(
            target: "pageforge.relay",
            original = input.len(),
            compressed = packed.len(),
            "payload compressed"
        );
        Ok(Cow::Owned(packed))
    } else {
        Ok(Cow::Borrowed(input))
    }
}

/// Reverse [`compress`]. Untagged input is returned unchanged.
pub fn decompress(input: &str) -> Result<Cow<'_, str>, RelayError> {
    let Some(body) = input.strip_prefix(COMPRESSED_PREFIX) else {
        return Ok(Cow::Borrowed(input));
    };
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| RelayError::Corrupt(format!("compressed payload is not base64: {e}")))?;
    let mut out = String::new();
    DeflateDecoder::new(bytes.as_slice())
        .read_to_string(&mut out)
        .map_err(|e| RelayError::Corrupt(format!("compressed payload does not inflate: {e}")))?;
    Ok(Cow::Owned(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive_json(n: usize) -> String {
        let item = r#"{"id":"w","type":"widget","widgetType":"text","content":{"text":"hello world"}}"#;
        format!("[{}]", vec![item; n].join(","))
    }

    #[test]
    fn small_payload_is_untouched() {
        let s = "[]";
        let out = compress(s, &CompressionConfig::default()).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn large_repetitive_payload_is_compressed() {
        let s = repetitive_json(100);
        let out = compress(&s, &CompressionConfig::default()).unwrap();
        assert!(is_compressed(&out));
        assert!(out.len() < s.len() / 2);
        assert_eq!(decompress(&out).unwrap(), s);
    }

    #[test]
    fn incompressible_payload_is_kept() {
        // Base64 of pseudo-random bytes does not deflate by 10%.
        let mut x: u64 = 0x9E37_79B9_7F4A_7C15;
        let bytes: Vec<u8> = (0..4096)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                x as u8
            })
            .collect();
        let s = STANDARD.encode(bytes);
        let out = compress(&s, &CompressionConfig::default()).unwrap();
        assert!(!is_compressed(&out));
        assert_eq!(decompress(&out).unwrap(), s);
    }

    #[test]
    fn disabled_config_skips_compression() {
        let s = repetitive_json(100);
        let out = compress(&s, &CompressionConfig::disabled()).unwrap();
        assert_eq!(out, s);
    }

    #[test]
    fn input_colliding_with_tag_round_trips() {
        let s = format!("{COMPRESSED_PREFIX}not really compressed");
        let out = compress(&s, &CompressionConfig::disabled()).unwrap();
        assert_ne!(out, s);
        assert_eq!(decompress(&out).unwrap(), s);
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let err = decompress("PFZ1:!!!not base64").unwrap_err();
        assert!(matches!(err, RelayError::Corrupt(_)));
    }
}
