#![forbid(unsafe_code)]

//! PageForge public facade crate.
//!
//! Re-exports the element model from `pageforge-core` and the history,
//! relay, preview, and editor runtime from `pageforge-runtime`, plus a
//! prelude for day-to-day use.
//!
//! ```rust,ignore
//! use pageforge::prelude::*;
//!
//! pageforge::init_logging();
//! let mut editor = EditorShell::in_memory(BuilderConfig::default());
//! let heading = editor.new_element(ElementKind::Widget, Some("heading")).unwrap();
//! editor.add_element(None, None, PageElement::section().with_child(heading))?;
//! ```

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use pageforge_core::{
    Callback, ElementId, ElementKind, ElementPatch, ElementTree, HostRef, PageElement, PropMap,
    PropValue, SanitizeOptions, TreeError, WidgetDefinition, WidgetRegistry,
};

// --- Runtime re-exports ----------------------------------------------------

pub use pageforge_runtime::{
    BuilderConfig, ChannelKind, ConfigError, EditorShell, EventBus, HistoryManager,
    MarkupRenderer, Notice, PreviewConsumer, PreviewSource, PreviewState, RelayError,
    RelayWriteResult, StorageRelay, WindowLink, WindowMessage,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for PageForge hosts.
#[derive(Debug)]
pub enum Error {
    /// Invalid tree edit.
    Tree(TreeError),
    /// Relay or transport failure.
    Relay(RelayError),
    /// Configuration could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree(err) => write!(f, "{err}"),
            Self::Relay(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(err) => Some(err),
            Self::Relay(err) => Some(err),
            Self::Config(err) => Some(err),
        }
    }
}

impl From<TreeError> for Error {
    fn from(err: TreeError) -> Self {
        Self::Tree(err)
    }
}

impl From<RelayError> for Error {
    fn from(err: RelayError) -> Self {
        Self::Relay(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// Standard result type for PageForge APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Logging ---------------------------------------------------------------

/// Environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "PAGEFORGE_LOG";

/// Filter used when [`LOG_ENV_VAR`] is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "pageforge=info";

/// Install a global `fmt` subscriber filtered by `PAGEFORGE_LOG`
/// (e.g. `PAGEFORGE_LOG=pageforge.relay=debug`).
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(target: "pageforge", "logging initialized");
    }
    installed
}

pub mod prelude {
    //! Common imports for hosts.

    pub use crate::{
        BuilderConfig, ChannelKind, EditorShell, ElementId, ElementKind, ElementPatch, ElementTree,
        Error, EventBus, MarkupRenderer, Notice, PageElement, PreviewConsumer, PreviewSource,
        PreviewState, PropMap, PropValue, Result, StorageRelay, WidgetRegistry, WindowLink,
    };

    pub use crate::{core, runtime};
}

pub use pageforge_core as core;
pub use pageforge_runtime as runtime;
