#![forbid(unsafe_code)]

//! Undo/redo history for the page builder.
//!
//! The builder records a full snapshot of the root element sequence after
//! every committed mutation. Snapshots are persistent trees (see
//! [`pageforge_core::element`]), so recording is O(1) and consecutive
//! snapshots share every subtree the mutation did not touch.
//!
//! # Module Structure
//!
//! - [`history`]: the bounded, linear [`HistoryManager`]
//!
//! # Design Notes
//!
//! ## Snapshots, not commands
//!
//! Every mutation already produces a whole new tree (copy-on-write), so
//! storing snapshots is as cheap as storing reversible commands would be and
//! cannot drift: undo restores exactly the tree that was live before.
//!
//! ## Memory Budget
//!
//! History is bounded by entry count (default 50). The oldest snapshot is
//! evicted when the bound is exceeded.

pub mod history;

pub use history::{
    DEFAULT_DESCRIPTION, HistoryConfig, HistoryEntry, HistoryManager, HistoryStep,
    INITIAL_DESCRIPTION, NOTHING_TO_REDO, NOTHING_TO_UNDO,
};
