#![forbid(unsafe_code)]

//! Linear undo/redo history over element-tree snapshots.
//!
//! [`HistoryManager`] keeps an ordered list of [`HistoryEntry`] snapshots and
//! a cursor pointing at the entry that matches the live tree:
//!
//! - **Bounded**: at most `max_entries` snapshots; the oldest is evicted first
//! - **Linear**: pushing while the cursor is behind the tail discards the
//!   abandoned redo branch
//! - **Independent copies**: snapshots are persistent trees, so the copies
//!   handed out by [`undo`](HistoryManager::undo) and
//!   [`redo`](HistoryManager::redo) can be edited freely without touching
//!   stored history
//!
//! # Invariants
//!
//! 1. `entries` is never empty; the first entry is the initial snapshot.
//! 2. `cursor < entries.len()` after any operation.
//! 3. `entries.len() <= config.max_entries` after any operation.
//! 4. The entry at `cursor` is the one most recently pushed, undone to, or
//!    redone to.
//!
//! ```text
//! push(s3)
//! ┌──────────────────────────────────────────────┐
//! │ Entries: [s0, s1, s2, s3]   cursor: 3         │
//! └──────────────────────────────────────────────┘
//!
//! undo() x2
//! ┌──────────────────────────────────────────────┐
//! │ Entries: [s0, s1, s2, s3]   cursor: 1         │
//! └──────────────────────────────────────────────┘
//!
//! push(s4)  <-- new branch, s2 and s3 dropped
//! ┌──────────────────────────────────────────────┐
//! │ Entries: [s0, s1, s4]       cursor: 2         │
//! └──────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::fmt;

use pageforge_core::ElementTree;
use web_time::SystemTime;

/// Description used when a push carries none.
pub const DEFAULT_DESCRIPTION: &str = "Update elements";
/// Description of the snapshot a history starts from.
pub const INITIAL_DESCRIPTION: &str = "Initial state";
/// Returned by [`HistoryManager::undo_description`] at the earliest entry.
pub const NOTHING_TO_UNDO: &str = "Nothing to undo";
/// Returned by [`HistoryManager::redo_description`] at the latest entry.
pub const NOTHING_TO_REDO: &str = "Nothing to redo";

/// Configuration for the history manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum number of snapshots kept, including the current one.
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 50 }
    }
}

impl HistoryConfig {
    /// Create a configuration with a custom bound. A bound of zero is
    /// treated as one.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
        }
    }

    /// Configuration that never evicts entries.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_entries: usize::MAX,
        }
    }
}

/// One recorded snapshot.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Root element sequence at this point.
    pub elements: ElementTree,
    /// Label of the mutation that produced this snapshot.
    pub description: String,
    /// When the snapshot was recorded. Informational only.
    pub timestamp: SystemTime,
}

impl HistoryEntry {
    fn new(elements: ElementTree, description: &str) -> Self {
        Self {
            elements,
            description: description.to_owned(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Result of a successful undo or redo.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStep {
    /// Independent copy of the elements now current.
    pub elements: ElementTree,
    /// Description of the entry now current.
    pub description: String,
    /// Description of the mutation that was reverted (undo) or re-applied
    /// (redo). Suited for "Undid: ..." notices.
    pub action: String,
}

/// Bounded linear undo/redo over [`ElementTree`] snapshots.
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    config: HistoryConfig,
}

impl fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryManager")
            .field("size", &self.entries.len())
            .field("cursor", &self.cursor)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(ElementTree::new(), HistoryConfig::default())
    }
}

impl HistoryManager {
    /// Start a history from a single initial snapshot.
    #[must_use]
    pub fn new(initial: ElementTree, config: HistoryConfig) -> Self {
        let config = HistoryConfig::new(config.max_entries);
        let mut entries = VecDeque::new();
        entries.push_back(HistoryEntry::new(initial, INITIAL_DESCRIPTION));
        Self {
            entries,
            cursor: 0,
            config,
        }
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Record a new snapshot.
    ///
    /// Entries after the cursor are discarded first (new branch). The cursor
    /// moves to the new tail. If the bound is exceeded the oldest entry is
    /// evicted and the cursor keeps pointing at the same logical entry.
    pub fn push(&mut self, elements: ElementTree, description: Option<&str>) {
        let description = description.unwrap_or(DEFAULT_DESCRIPTION);

        let discarded = self.entries.len() - (self.cursor + 1);
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(HistoryEntry::new(elements, description));
        self.cursor = self.entries.len() - 1;

        let mut evicted = 0usize;
        while self.entries.len() > self.config.max_entries {
            self.entries.pop_front();
            self.cursor -= 1;
            evicted += 1;
        }

        tracing::debug!(
            target: "pageforge.history",
            description,
            discarded,
            evicted,
            size = self.entries.len(),
            cursor = self.cursor,
            "history push"
        );
    }

    /// Step back one entry.
    ///
    /// Returns `None` (a no-op) at the earliest entry.
    pub fn undo(&mut self) -> Option<HistoryStep> {
        if !self.can_undo() {
            return None;
        }
        let action = self.entries[self.cursor].description.clone();
        self.cursor -= 1;
        let entry = &self.entries[self.cursor];
        tracing::debug!(target: "pageforge.history", action = %action, cursor = self.cursor, "undo");
        Some(HistoryStep {
            elements: entry.elements.clone(),
            description: entry.description.clone(),
            action,
        })
    }

    /// Step forward one entry.
    ///
    /// Returns `None` (a no-op) at the latest entry.
    pub fn redo(&mut self) -> Option<HistoryStep> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        let entry = &self.entries[self.cursor];
        tracing::debug!(
            target: "pageforge.history",
            action = %entry.description,
            cursor = self.cursor,
            "redo"
        );
        Some(HistoryStep {
            elements: entry.elements.clone(),
            description: entry.description.clone(),
            action: entry.description.clone(),
        })
    }

    /// Check if undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    /// Check if redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Description of the mutation [`undo`](Self::undo) would revert.
    #[must_use]
    pub fn undo_description(&self) -> &str {
        if self.can_undo() {
            &self.entries[self.cursor].description
        } else {
            NOTHING_TO_UNDO
        }
    }

    /// Description of the mutation [`redo`](Self::redo) would re-apply.
    #[must_use]
    pub fn redo_description(&self) -> &str {
        if self.can_redo() {
            &self.entries[self.cursor + 1].description
        } else {
            NOTHING_TO_REDO
        }
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn history_size(&self) -> usize {
        self.entries.len()
    }

    /// Index of the current snapshot.
    #[must_use]
    pub fn current_position(&self) -> usize {
        self.cursor
    }

    /// The current snapshot.
    #[must_use]
    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.cursor]
    }

    /// Descriptions of all entries, oldest first, for a history panel.
    pub fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.description.as_str())
    }

    /// Get the current configuration.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop everything and start over from `elements`.
    pub fn reset(&mut self, elements: ElementTree) {
        self.entries.clear();
        self.entries
            .push_back(HistoryEntry::new(elements, INITIAL_DESCRIPTION));
        self.cursor = 0;
        tracing::debug!(target: "pageforge.history", "history reset");
    }

    /// Discard entries after the cursor.
    pub fn clear_redo(&mut self) {
        self.entries.truncate(self.cursor + 1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pageforge_core::{ElementId, PageElement, PropValue};

    fn tree_with(n: usize) -> ElementTree {
        ElementTree::from_roots((0..n).map(|i| PageElement::section().with_id(format!("s{i}"))))
    }

    #[test]
    fn starts_with_initial_snapshot() {
        let mgr = HistoryManager::default();
        assert_eq!(mgr.history_size(), 1);
        assert_eq!(mgr.current_position(), 0);
        assert!(!mgr.can_undo());
        assert!(!mgr.can_redo());
        assert_eq!(mgr.current().description, INITIAL_DESCRIPTION);
    }

    #[test]
    fn push_enables_undo() {
        let mut mgr = HistoryManager::default();
        mgr.push(tree_with(1), Some("Add section"));
        assert!(mgr.can_undo());
        assert!(!mgr.can_redo());
        assert_eq!(mgr.history_size(), 2);
        assert_eq!(mgr.current_position(), 1);
    }

    #[test]
    fn unlimited_config_never_evicts() {
        let mut mgr = HistoryManager::new(tree_with(0), HistoryConfig::unlimited());
        for i in 1..=200 {
            mgr.push(tree_with(i), None);
        }
        assert_eq!(mgr.history_size(), 201);
        assert_eq!(mgr.current_position(), 200);
    }

    #[test]
    fn push_without_description_uses_default() {
        let mut mgr = HistoryManager::default();
        mgr.push(tree_with(1), None);
        assert_eq!(mgr.current().description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn undo_returns_previous_snapshot() {
        let mut mgr = HistoryManager::new(tree_with(0), HistoryConfig::default());
        mgr.push(tree_with(1), Some("Add section"));
        mgr.push(tree_with(2), Some("Add another"));

        let step = mgr.undo().unwrap();
        assert_eq!(step.elements, tree_with(1));
        assert_eq!(step.description, "Add section");
        assert_eq!(step.action, "Add another");
        assert!(mgr.can_redo());
    }

    #[test]
    fn undo_at_start_is_noop() {
        let mut mgr = HistoryManager::default();
        assert!(mgr.undo().is_none());
        assert_eq!(mgr.current_position(), 0);
    }

    #[test]
    fn redo_at_end_is_noop() {
        let mut mgr = HistoryManager::default();
        mgr.push(tree_with(1), None);
        assert!(mgr.redo().is_none());
        assert_eq!(mgr.current_position(), 1);
    }

    #[test]
    fn redo_reapplies() {
        let mut mgr = HistoryManager::default();
        mgr.push(tree_with(1), Some("Add section"));
        mgr.undo();
        let step = mgr.redo().unwrap();
        assert_eq!(step.elements, tree_with(1));
        assert_eq!(step.action, "Add section");
        assert!(!mgr.can_redo());
    }

    #[test]
    fn push_after_undo_discards_redo_branch() {
        let mut mgr = HistoryManager::default();
        mgr.push(tree_with(1), Some("a"));
        mgr.push(tree_with(2), Some("b"));
        mgr.undo();
        mgr.push(tree_with(3), Some("c"));

        assert!(!mgr.can_redo());
        assert!(mgr.redo().is_none());
        assert_eq!(mgr.descriptions().collect::<Vec<_>>(), [INITIAL_DESCRIPTION, "a", "c"]);
    }

    #[test]
    fn bound_evicts_oldest_and_keeps_cursor_on_tail() {
        let mut mgr = HistoryManager::new(tree_with(0), HistoryConfig::new(3));
        for i in 1..=5 {
            mgr.push(tree_with(i), Some(format!("push {i}").as_str()));
        }
        assert_eq!(mgr.history_size(), 3);
        assert_eq!(mgr.current_position(), 2);
        assert_eq!(mgr.current().elements, tree_with(5));

        mgr.undo();
        let oldest = mgr.undo().unwrap();
        assert_eq!(oldest.elements, tree_with(3));
        assert!(mgr.undo().is_none());
    }

    #[test]
    fn descriptions_and_fallbacks() {
        let mut mgr = HistoryManager::default();
        assert_eq!(mgr.undo_description(), NOTHING_TO_UNDO);
        assert_eq!(mgr.redo_description(), NOTHING_TO_REDO);

        mgr.push(tree_with(1), Some("Add heading"));
        assert_eq!(mgr.undo_description(), "Add heading");

        mgr.undo();
        assert_eq!(mgr.undo_description(), NOTHING_TO_UNDO);
        assert_eq!(mgr.redo_description(), "Add heading");
    }

    #[test]
    fn returned_snapshot_is_independent() {
        let mut mgr = HistoryManager::default();
        let tree = ElementTree::from_roots([PageElement::widget("text")
            .with_id("t")
            .with_content("text", "original")]);
        mgr.push(tree, Some("a"));
        mgr.push(tree_with(1), Some("b"));

        let mut step = mgr.undo().unwrap();
        step.elements.roots_mut()[0].content.insert("text", "tampered");

        let again = mgr.current().elements.find(&ElementId::new("t")).unwrap();
        assert_eq!(again.content.get("text").and_then(PropValue::as_str), Some("original"));
    }

    #[test]
    fn reset_starts_over() {
        let mut mgr = HistoryManager::default();
        mgr.push(tree_with(1), None);
        mgr.push(tree_with(2), None);
        mgr.reset(tree_with(7));
        assert_eq!(mgr.history_size(), 1);
        assert_eq!(mgr.current().elements, tree_with(7));
    }

    #[test]
    fn clear_redo_truncates() {
        let mut mgr = HistoryManager::default();
        mgr.push(tree_with(1), None);
        mgr.push(tree_with(2), None);
        mgr.undo();
        mgr.clear_redo();
        assert_eq!(mgr.history_size(), 2);
        assert!(!mgr.can_redo());
    }

    #[test]
    fn zero_bound_is_clamped() {
        let mut mgr = HistoryManager::new(tree_with(0), HistoryConfig::new(0));
        mgr.push(tree_with(1), None);
        assert_eq!(mgr.history_size(), 1);
        assert_eq!(mgr.current_position(), 0);
    }

    #[test]
    fn debug_impl() {
        let debug_str = format!("{:?}", HistoryManager::default());
        assert!(debug_str.contains("HistoryManager"));
        assert!(debug_str.contains("cursor"));
    }
}
