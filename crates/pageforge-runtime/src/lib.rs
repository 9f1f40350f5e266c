#![forbid(unsafe_code)]
#![recursion_limit = "256"]

//! Runtime: history, relay, previews, and the editor funnel.
//!
//! # Role in PageForge
//! `pageforge-runtime` is where the element tree from `pageforge-core`
//! meets the outside world. It records undo snapshots, moves serialized
//! trees to preview consumers through a fallback chain of storage channels,
//! and drives the preview state machine.
//!
//! # Primary responsibilities
//! - **HistoryManager**: bounded linear undo/redo over tree snapshots.
//! - **StorageRelay**: ordered channel strategies with compression and
//!   quota-aware fallback.
//! - **PreviewConsumer**: non-blocking loader/renderer for preview windows.
//! - **EditorShell**: the single mutation funnel.
//! - **BuilderConfig**: every tunable as data (TOML or JSON).
//!
//! # How it fits in the system
//! Hosts construct an [`EditorShell`] for the editing surface and one
//! [`PreviewConsumer`] per preview. Browser primitives (storage, window
//! messaging, DOM events) are traits with in-process implementations, so
//! the same code runs under tests, native tools, and wasm shells.

pub mod config;
pub mod editor;
pub mod preview;
pub mod relay;
pub mod undo;

pub use config::{BuilderConfig, ConfigError, KeysSection, RelayConfig};
pub use editor::{EditorShell, Notice, TemplateDocument};
pub use preview::{
    MarkupRenderer, PreviewConsumer, PreviewRenderer, PreviewSource, PreviewState, PreviewView,
    placeholder_tree,
};
pub use relay::{
    ChannelKind, ChannelStatus, EventBus, RelayChannel, RelayError, RelayRead, RelayWriteResult,
    StorageRelay, WindowLink, WindowMessage,
};
pub use undo::{HistoryConfig, HistoryEntry, HistoryManager, HistoryStep};
