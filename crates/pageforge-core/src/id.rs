#![forbid(unsafe_code)]

//! Element identifiers.
//!
//! An [`ElementId`] is an opaque string assigned once when a node is created
//! and never reused. Generated ids combine a per-process nonce (derived from
//! the wall clock at first use) with a monotonic counter, so two editors
//! writing to the same shared store do not mint colliding ids.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static PROCESS_NONCE: OnceLock<u64> = OnceLock::new();

fn process_nonce() -> u64 {
    *PROCESS_NONCE.get_or_init(|| {
        web_time::SystemTime::now()
            .duration_since(web_time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    })
}

/// Opaque, unique identifier of a [`PageElement`](crate::element::PageElement).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Wrap an existing id string (e.g. one read back from storage).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id that has never been handed out by this process.
    ///
    /// The `prefix` is informational (usually the element kind).
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("{prefix}-{:x}-{seq}", process_nonce()))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| ElementId::generate("widget")).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn generated_id_carries_prefix() {
        let id = ElementId::generate("section");
        assert!(id.as_str().starts_with("section-"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ElementId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: ElementId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
