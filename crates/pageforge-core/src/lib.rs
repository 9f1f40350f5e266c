#![forbid(unsafe_code)]

//! Core: the page element tree, its edits, sanitization, and widget lookup.
//!
//! # Role in PageForge
//! `pageforge-core` is pure data. It owns the [`PageElement`] tree, the
//! copy-on-write edit operations on it, the sanitization rules applied at
//! every serialization boundary, and the widget dispatch table.
//!
//! # How it fits in the system
//! The runtime (`pageforge-runtime`) records snapshots of [`ElementTree`]s in
//! its undo history, relays sanitized payloads to preview consumers, and
//! renders previews through the [`WidgetRegistry`]. Nothing here performs I/O.

pub mod element;
pub mod id;
pub mod registry;
pub mod sanitize;
pub mod tree;

pub use element::{Callback, ElementKind, ElementTree, HostRef, PageElement, PropMap, PropValue};
pub use id::ElementId;
pub use registry::{
    EditorField, FieldControl, PropNamespace, RenderFn, WidgetDefinition, WidgetRegistry,
    escape_html,
};
pub use sanitize::{
    PayloadError, SanitizeOptions, SanitizeStats, from_payload, sanitize_element, sanitize_tree,
    sanitize_tree_with_stats, to_payload,
};
pub use tree::{ElementPatch, TreeError};
