#![forbid(unsafe_code)]

//! Sanitization and payload (de)serialization.
//!
//! Every tree that leaves the editor (relay write, template export, explicit
//! save) passes through [`sanitize_tree`] first:
//!
//! - host callbacks and host handles are removed at any depth,
//! - `data:` URIs larger than [`SanitizeOptions::inline_data_limit`] are
//!   replaced by a reference marker so a single pasted image cannot blow the
//!   storage quota.
//!
//! Sanitizing is idempotent: a sanitized tree sanitizes to itself.

use std::fmt;

use crate::element::{ElementTree, PageElement, PropMap, PropValue};

/// Prefix of the marker that replaces oversized inline data.
pub const INLINE_DATA_MARKER: &str = "pageforge:inline-data-omitted";

/// Default cap for inline `data:` URIs kept in payloads (64 KiB).
pub const DEFAULT_INLINE_DATA_LIMIT: usize = 64 * 1024;

/// Sanitization knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// `data:` URIs longer than this many bytes are replaced by a marker.
    pub inline_data_limit: usize,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            inline_data_limit: DEFAULT_INLINE_DATA_LIMIT,
        }
    }
}

/// What a sanitize pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeStats {
    /// Non-serializable values dropped.
    pub stripped: usize,
    /// Inline data URIs replaced by markers.
    pub truncated: usize,
}

/// Errors decoding or encoding a payload.
#[derive(Debug)]
pub enum PayloadError {
    /// JSON encode/decode failure.
    Json(serde_json::Error),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "payload JSON error: {e}"),
        }
    }
}

impl std::error::Error for PayloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for PayloadError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

struct Pass {
    opts: SanitizeOptions,
    stats: SanitizeStats,
}

impl Pass {
    fn value(&mut self, value: &PropValue) -> Option<PropValue> {
        match value {
            PropValue::Callback(_) | PropValue::HostRef(_) => {
                self.stats.stripped += 1;
                None
            }
            PropValue::String(s) if is_oversized_data_uri(s, self.opts.inline_data_limit) => {
                self.stats.truncated += 1;
                Some(PropValue::String(inline_data_marker(s)))
            }
            PropValue::Array(items) => Some(PropValue::Array(
                items.iter().filter_map(|v| self.value(v)).collect(),
            )),
            PropValue::Object(map) => Some(PropValue::Object(self.map(map))),
            other => Some(other.clone()),
        }
    }

    fn map(&mut self, map: &PropMap) -> PropMap {
        let mut out = PropMap::new();
        for (k, v) in map.iter() {
            if let Some(v) = self.value(v) {
                out.insert(k.clone(), v);
            }
        }
        out
    }

    fn element(&mut self, el: &PageElement) -> PageElement {
        PageElement {
            id: el.id.clone(),
            kind: el.kind,
            widget_type: el.widget_type.clone(),
            children: el.children.iter().map(|c| self.element(c)).collect(),
            content: self.map(&el.content),
            styles: self.map(&el.styles),
            props: self.map(&el.props),
        }
    }
}

fn is_oversized_data_uri(s: &str, limit: usize) -> bool {
    s.len() > limit && s.starts_with("data:")
}

fn inline_data_marker(s: &str) -> String {
    let header = &s["data:".len()..];
    let mime = header
        .split([';', ','])
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream");
    format!("{INLINE_DATA_MARKER};mime={mime};bytes={}", s.len())
}

/// Sanitize a single element and its subtree.
#[must_use]
pub fn sanitize_element(el: &PageElement, opts: &SanitizeOptions) -> PageElement {
    Pass {
        opts: *opts,
        stats: SanitizeStats::default(),
    }
    .element(el)
}

/// Sanitize a whole tree, reporting what was removed.
#[must_use]
pub fn sanitize_tree_with_stats(
    tree: &ElementTree,
    opts: &SanitizeOptions,
) -> (ElementTree, SanitizeStats) {
    let mut pass = Pass {
        opts: *opts,
        stats: SanitizeStats::default(),
    };
    let out: ElementTree = tree.roots().iter().map(|el| pass.element(el)).collect();
    #[cfg(feature = "tracing")]
    if pass.stats != SanitizeStats::default() {
        tracing::debug!(
            target: "pageforge.sanitize",
            stripped = pass.stats.stripped,
            truncated = pass.stats.truncated,
            "sanitized element tree"
        );
    }
    (out, pass.stats)
}

/// Sanitize a whole tree.
#[must_use]
pub fn sanitize_tree(tree: &ElementTree, opts: &SanitizeOptions) -> ElementTree {
    sanitize_tree_with_stats(tree, opts).0
}

/// Sanitize and serialize a tree to its JSON payload form.
pub fn to_payload(tree: &ElementTree, opts: &SanitizeOptions) -> Result<String, PayloadError> {
    Ok(serde_json::to_string(&sanitize_tree(tree, opts))?)
}

/// Parse a JSON payload back into a tree.
pub fn from_payload(payload: &str) -> Result<ElementTree, PayloadError> {
    Ok(serde_json::from_str(payload)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Callback, HostRef};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn dirty_tree() -> ElementTree {
        let nested = PropMap::new()
            .with("title", "Card")
            .with("handler", Callback::new("h", |_| {}))
            .with("tags", PropValue::from(json!(["a", "b"])));
        ElementTree::from_roots([PageElement::section().with_id("s").with_child(
            PageElement::widget("button")
                .with_id("b")
                .with_content("label", "Buy")
                .with_content("meta", nested)
                .with_style("padding", 12i64)
                .with_prop("onClick", Callback::new("click", |_| {}))
                .with_prop("ref", HostRef::new("HTMLButtonElement", 3)),
        )])
    }

    #[test]
    fn strips_opaque_values_at_any_depth() {
        let (clean, stats) = sanitize_tree_with_stats(&dirty_tree(), &SanitizeOptions::default());
        assert_eq!(stats.stripped, 3);
        let button = clean.find(&"b".into()).unwrap();
        assert!(button.props.is_empty());
        assert!(!button.content.contains_opaque());
        let meta = button.content.get("meta").unwrap();
        assert_eq!(meta.to_json().unwrap(), json!({"title": "Card", "tags": ["a", "b"]}));
    }

    #[test]
    fn round_trip_matches_sanitized_tree_and_is_idempotent() {
        let opts = SanitizeOptions::default();
        let payload = to_payload(&dirty_tree(), &opts).unwrap();
        let parsed = from_payload(&payload).unwrap();
        assert_eq!(parsed, sanitize_tree(&dirty_tree(), &opts));

        let again = to_payload(&parsed, &opts).unwrap();
        assert_eq!(again, payload);
    }

    #[test]
    fn oversized_data_uri_becomes_marker() {
        let big = format!("data:image/png;base64,{}", "A".repeat(200));
        let tree = ElementTree::from_roots([PageElement::widget("image")
            .with_id("i")
            .with_content("src", big.as_str())
            .with_content("alt", "logo")]);
        let opts = SanitizeOptions {
            inline_data_limit: 100,
        };
        let (clean, stats) = sanitize_tree_with_stats(&tree, &opts);
        assert_eq!(stats.truncated, 1);
        let src = clean.roots()[0].content.get("src").and_then(PropValue::as_str).unwrap();
        assert_eq!(
            src,
            format!("{INLINE_DATA_MARKER};mime=image/png;bytes={}", big.len())
        );
        // Marker is short, so a second pass leaves it alone.
        assert_eq!(sanitize_tree(&clean, &opts), clean);
    }

    #[test]
    fn small_data_uri_is_kept() {
        let tree = ElementTree::from_roots([PageElement::widget("image")
            .with_id("i")
            .with_content("src", "data:image/gif;base64,R0lG")]);
        assert_eq!(sanitize_tree(&tree, &SanitizeOptions::default()), tree);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(matches!(from_payload("{not json"), Err(PayloadError::Json(_))));
        assert!(from_payload("[]").unwrap().is_empty());
    }
}
