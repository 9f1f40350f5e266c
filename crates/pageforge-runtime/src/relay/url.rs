#![forbid(unsafe_code)]

//! Trees embedded in preview URLs.
//!
//! The serialized tree is base64 encoded and appended to the preview URL as
//! the [`DATA_PARAM`] query parameter. URLs are bounded; encoding fails with
//! [`RelayError::UrlTooLong`] instead of producing a URL a browser would
//! truncate.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pageforge_core::{ElementTree, from_payload};
use url::Url;

use super::RelayError;

/// Query parameter carrying the payload.
pub const DATA_PARAM: &str = "data";

/// Default maximum URL length (32 KiB).
pub const DEFAULT_MAX_URL_BYTES: usize = 32 * 1024;

/// Build a preview URL carrying `payload`.
///
/// An existing `data` parameter on `base` is replaced; other parameters are
/// kept.
pub fn encode_preview_url(base: &str, payload: &str, max_len: usize) -> Result<Url, RelayError> {
    let mut url = Url::parse(base)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != DATA_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept);
        pairs.append_pair(DATA_PARAM, &STANDARD.encode(payload));
    }

    let len = url.as_str().len();
    if len > max_len {
        return Err(RelayError::UrlTooLong { len, max: max_len });
    }
    Ok(url)
}

/// Extract the payload from a preview URL. `Ok(None)` when the parameter is
/// absent.
pub fn decode_preview_url(url: &Url) -> Result<Option<String>, RelayError> {
    let Some((_, encoded)) = url.query_pairs().find(|(k, _)| k == DATA_PARAM) else {
        return Ok(None);
    };
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| RelayError::Corrupt(format!("data parameter is not base64: {e}")))?;
    let payload = String::from_utf8(bytes)
        .map_err(|e| RelayError::Corrupt(format!("data parameter is not UTF-8: {e}")))?;
    Ok(Some(payload))
}

/// Extract and parse the tree from a preview URL.
pub fn tree_from_url(url: &Url) -> Result<Option<ElementTree>, RelayError> {
    match decode_preview_url(url)? {
        Some(payload) => Ok(Some(from_payload(&payload)?)),
        None => Ok(None),
    }
}
