#![forbid(unsafe_code)]

//! Builder configuration as data.
//!
//! Every tunable of the history, the relay, and the preview lives in one
//! [`BuilderConfig`] that can be loaded from TOML or JSON at startup.
//!
//! # Loading
//!
//! ```toml
//! # pageforge.toml
//! [history]
//! max_entries = 100
//!
//! [relay]
//! quota_bytes = 2097152
//!
//! [keys]
//! live_preview = "my-site-preview"
//! ```
//!
//! ```rust,ignore
//! let config = BuilderConfig::from_toml_file("pageforge.toml")?;
//! let config = BuilderConfig::from_json_str(json)?;
//! ```
//!
//! Sections and fields left out keep their defaults.

use std::path::Path;
use std::time::Duration;

use pageforge_core::SanitizeOptions;
use serde::{Deserialize, Serialize};

use crate::relay::CompressionConfig;
use crate::undo::HistoryConfig;

/// Default key for the live preview payload.
pub const DEFAULT_LIVE_PREVIEW_KEY: &str = "pageforge-preview-data";

/// Default key for explicitly saved elements.
pub const DEFAULT_SAVED_KEY: &str = "pageforge-saved-elements";

// ---------------------------------------------------------------------------
// Top-level BuilderConfig
// ---------------------------------------------------------------------------

/// Top-level configuration of the builder runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Undo history.
    pub history: HistorySection,
    /// Storage relay.
    pub relay: RelayConfig,
    /// Preview consumer.
    pub preview: PreviewSection,
    /// Storage keys.
    pub keys: KeysSection,
}

impl BuilderConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.history.max_entries == 0 {
            errors.push("history.max_entries must be at least 1".into());
        }

        let r = &self.relay;
        if r.quota_bytes == 0 {
            errors.push("relay.quota_bytes must be positive".into());
        }
        if r.safety_margin_bytes >= r.quota_bytes {
            errors.push(format!(
                "relay.safety_margin_bytes ({}) must be below relay.quota_bytes ({})",
                r.safety_margin_bytes, r.quota_bytes
            ));
        }
        if !(0.0..1.0).contains(&r.min_compression_savings) {
            errors.push(format!(
                "relay.min_compression_savings must be in [0, 1), got {}",
                r.min_compression_savings
            ));
        }
        if r.max_url_bytes < 64 {
            errors.push(format!(
                "relay.max_url_bytes must be at least 64, got {}",
                r.max_url_bytes
            ));
        }
        if r.object_store_version == 0 {
            errors.push("relay.object_store_version must be at least 1".into());
        }
        if r.object_store_name.is_empty() || r.object_store_table.is_empty() {
            errors.push("relay.object_store_name and relay.object_store_table must be non-empty".into());
        }

        if self.preview.handshake_timeout_ms == 0 {
            errors.push("preview.handshake_timeout_ms must be positive".into());
        }

        if self.keys.live_preview.is_empty() || self.keys.saved.is_empty() {
            errors.push("keys.live_preview and keys.saved must be non-empty".into());
        }
        if self.keys.live_preview == self.keys.saved {
            errors.push("keys.live_preview and keys.saved must differ".into());
        }

        errors
    }

    /// Validate, turning any errors into [`ConfigError::Validation`].
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Build a [`HistoryConfig`].
    #[must_use]
    pub fn to_history_config(&self) -> HistoryConfig {
        HistoryConfig::new(self.history.max_entries)
    }

    /// Build a [`SanitizeOptions`].
    #[must_use]
    pub fn to_sanitize_options(&self) -> SanitizeOptions {
        SanitizeOptions {
            inline_data_limit: self.relay.inline_data_limit_bytes,
        }
    }

    /// Handshake deadline of the preview consumer.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.preview.handshake_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Undo history parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// Maximum number of snapshots kept. Default: 50.
    pub max_entries: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self { max_entries: 50 }
    }
}

/// Storage relay parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Quota of the primary key-value store. Default: 5 MiB.
    pub quota_bytes: usize,
    /// Headroom kept free in the key-value store. Default: 1024.
    pub safety_margin_bytes: usize,
    /// Whether payloads are compressed at all. Default: true.
    pub compression_enabled: bool,
    /// Payloads above this size are compressed. Default: 1024.
    pub compression_threshold_bytes: usize,
    /// Minimum fraction compression must save. Default: 0.10.
    pub min_compression_savings: f64,
    /// Maximum preview URL length. Default: 32 KiB.
    pub max_url_bytes: usize,
    /// `data:` URIs above this size are replaced by a marker. Default: 64 KiB.
    pub inline_data_limit_bytes: usize,
    /// Object store database name. Default: "pageforge".
    pub object_store_name: String,
    /// Object store database version. Default: 1.
    pub object_store_version: u32,
    /// Object store table name. Default: "elements".
    pub object_store_table: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            quota_bytes: crate::relay::kv::DEFAULT_QUOTA_BYTES,
            safety_margin_bytes: crate::relay::channels::DEFAULT_SAFETY_MARGIN_BYTES,
            compression_enabled: true,
            compression_threshold_bytes: 1024,
            min_compression_savings: 0.10,
            max_url_bytes: crate::relay::url::DEFAULT_MAX_URL_BYTES,
            inline_data_limit_bytes: pageforge_core::sanitize::DEFAULT_INLINE_DATA_LIMIT,
            object_store_name: "pageforge".into(),
            object_store_version: 1,
            object_store_table: "elements".into(),
        }
    }
}

impl RelayConfig {
    /// Build a [`CompressionConfig`].
    #[must_use]
    pub fn compression(&self) -> CompressionConfig {
        CompressionConfig {
            enabled: self.compression_enabled,
            threshold_bytes: self.compression_threshold_bytes,
            min_savings: self.min_compression_savings,
        }
    }
}

/// Preview consumer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    /// How long a window request may stay unanswered. Default: 2000.
    pub handshake_timeout_ms: u64,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 2000,
        }
    }
}

/// Storage keys shared by editor and previews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysSection {
    /// Key of the live preview payload.
    pub live_preview: String,
    /// Key of the explicit save.
    pub saved: String,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            live_preview: DEFAULT_LIVE_PREVIEW_KEY.into(),
            saved: DEFAULT_SAVED_KEY.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when loading a builder configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    Toml(toml::de::Error),
    /// JSON parse error.
    Json(serde_json::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Toml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates_clean() {
        let errors = BuilderConfig::default().validate();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn defaults_match_component_defaults() {
        let config = BuilderConfig::default();
        assert_eq!(config.to_history_config(), HistoryConfig::default());
        assert_eq!(config.relay.compression(), CompressionConfig::default());
        assert_eq!(config.to_sanitize_options(), SanitizeOptions::default());
        assert_eq!(config.handshake_timeout(), Duration::from_secs(2));
        assert_eq!(config.keys.live_preview, "pageforge-preview-data");
        assert_eq!(config.keys.saved, "pageforge-saved-elements");
        assert_eq!(config.relay.max_url_bytes, 32 * 1024);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BuilderConfig::from_toml_str(
            r#"
            [history]
            max_entries = 10

            [relay]
            quota_bytes = 2097152
            "#,
        )
        .unwrap();
        assert_eq!(config.history.max_entries, 10);
        assert_eq!(config.relay.quota_bytes, 2 * 1024 * 1024);
        assert_eq!(config.relay.safety_margin_bytes, 1024);
        assert_eq!(config.preview.handshake_timeout_ms, 2000);
    }

    #[test]
    fn json_loads() {
        let config =
            BuilderConfig::from_json_str(r#"{"keys":{"live_preview":"a","saved":"b"}}"#).unwrap();
        assert_eq!(config.keys.live_preview, "a");
        assert_eq!(config.history.max_entries, 50);
    }

    #[test]
    fn toml_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pageforge.toml");
        std::fs::write(&path, "[preview]\nhandshake_timeout_ms = 500\n").unwrap();
        let config = BuilderConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.handshake_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = BuilderConfig::from_json_file("/nonexistent/pageforge.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn bad_toml_is_reported() {
        let err = BuilderConfig::from_toml_str("[history\nmax_entries = ").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn multiple_validation_errors_collected() {
        let mut config = BuilderConfig::default();
        config.history.max_entries = 0;
        config.relay.min_compression_savings = 1.5;
        config.keys.saved = config.keys.live_preview.clone();
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(matches!(config.validated(), Err(ConfigError::Validation(_))));
    }
}
