#![forbid(unsafe_code)]

//! Storage relay: moves the latest serialized tree from the editor to its
//! preview consumers.
//!
//! # Channels
//!
//! Storage-backed channels implement [`RelayChannel`] and are tried in
//! order by one dispatcher, [`StorageRelay`]:
//!
//! | Channel | Module | Browser analogue |
//! |---------|--------|------------------|
//! | [`KeyValueChannel`] | [`channels`] over [`kv`] | `localStorage` |
//! | [`ObjectStoreChannel`] | [`channels`] over [`object_store`] | IndexedDB |
//! | [`MemoryChannel`] | [`channels`] | in-page global |
//!
//! The first channel that accepts a write wins. A failing channel is logged
//! and skipped; it never aborts the write. The key is then cleared from
//! every channel ahead of the winner, so a superseded payload there cannot
//! shadow the new one. Reads walk the same order and return the first hit,
//! decompressing transparently.
//!
//! Three push-style transports sit beside the dispatcher because they carry
//! a tree to a specific consumer rather than storing it under a key:
//!
//! - [`url`]: the tree embedded in a preview URL query parameter
//! - [`messaging`]: request/response and update messages between windows
//! - [`broadcast`]: same-window update events
//!
//! # Compression
//!
//! Every stored payload passes through [`compress::compress`] first. See
//! [`compress`] for the tagging scheme.

pub mod broadcast;
pub mod channels;
pub mod compress;
pub mod kv;
pub mod messaging;
pub mod object_store;
pub mod url;

use std::fmt;
use std::sync::Arc;

use pageforge_core::{ElementTree, PayloadError, SanitizeOptions, from_payload, to_payload};

pub use broadcast::{BusSubscription, ELEMENTS_UPDATED_EVENT, ElementsUpdated, EventBus};
pub use channels::{KeyValueChannel, MemoryChannel, ObjectStoreChannel};
pub use compress::{COMPRESSED_PREFIX, CompressionConfig, compress, decompress, is_compressed};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use messaging::{WindowLink, WindowMessage};
pub use object_store::{MemoryObjectStore, ObjectStore, OpenOutcome};

// ============================================================================
// Errors
// ============================================================================

/// Errors from relay channels and transports.
#[derive(Debug)]
pub enum RelayError {
    /// The write does not fit in the remaining quota.
    QuotaExceeded {
        /// Bytes the write needs, including any safety margin.
        needed: usize,
        /// Bytes left in the store.
        available: usize,
    },
    /// The channel cannot be used right now.
    Unavailable(String),
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// A stored value could not be decoded.
    Corrupt(String),
    /// The preview URL would exceed the configured maximum length.
    UrlTooLong {
        /// Length the URL would have.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The base URL did not parse.
    Url(::url::ParseError),
    /// The tree could not be (de)serialized.
    Payload(PayloadError),
    /// The other end of a window link is gone.
    Disconnected,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded { needed, available } => write!(
                f,
                "quota exceeded: need {needed} bytes, {available} available"
            ),
            Self::Unavailable(why) => write!(f, "channel unavailable: {why}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corrupt(why) => write!(f, "corrupt payload: {why}"),
            Self::UrlTooLong { len, max } => {
                write!(f, "preview URL too long: {len} bytes (max {max})")
            }
            Self::Url(e) => write!(f, "invalid URL: {e}"),
            Self::Payload(e) => write!(f, "{e}"),
            Self::Disconnected => write!(f, "window link disconnected"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Url(e) => Some(e),
            Self::Payload(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<::url::ParseError> for RelayError {
    fn from(e: ::url::ParseError) -> Self {
        Self::Url(e)
    }
}

impl From<PayloadError> for RelayError {
    fn from(e: PayloadError) -> Self {
        Self::Payload(e)
    }
}

// ============================================================================
// Channel Strategy
// ============================================================================

/// Which transport carried a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Synchronous quota-limited key-value store.
    KeyValue,
    /// Structured object store.
    ObjectStore,
    /// In-process memory map.
    Memory,
    /// Preview URL query parameter.
    Url,
    /// Cross-window message.
    Message,
    /// Same-window broadcast event.
    Broadcast,
}

impl ChannelKind {
    /// Stable name, matching the browser primitive each channel models.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeyValue => "localStorage",
            Self::ObjectStore => "indexedDB",
            Self::Memory => "memory",
            Self::Url => "url",
            Self::Message => "postMessage",
            Self::Broadcast => "customEvent",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One storage strategy in the relay's fallback chain.
///
/// Values handed to a channel are already compressed; channels store and
/// return them verbatim.
pub trait RelayChannel: Send {
    /// Which transport this is.
    fn kind(&self) -> ChannelKind;

    /// Store `value` under `key`.
    fn try_write(&mut self, key: &str, value: &str) -> Result<(), RelayError>;

    /// Read the value under `key`. `Ok(None)` means the channel works but
    /// holds nothing for the key.
    fn try_read(&mut self, key: &str) -> Result<Option<String>, RelayError>;

    /// Delete the value under `key`.
    fn try_remove(&mut self, key: &str) -> Result<(), RelayError>;

    /// Cheap availability probe. Unavailable channels are skipped.
    fn is_available(&self) -> bool {
        true
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of a relay write.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayWriteResult {
    /// Whether any channel accepted the payload.
    pub success: bool,
    /// The channel that accepted it.
    pub method: Option<ChannelKind>,
    /// Bytes actually stored (after compression).
    pub size: usize,
    /// Bytes of the serialized payload before compression.
    pub original_size: usize,
    /// Whether the stored form is compressed.
    pub compressed: bool,
    /// Last channel error when every channel failed.
    pub error: Option<String>,
}

impl RelayWriteResult {
    pub(crate) fn failed(original_size: usize, error: String) -> Self {
        Self {
            success: false,
            method: None,
            size: 0,
            original_size,
            compressed: false,
            error: Some(error),
        }
    }
}

/// A payload read back from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRead {
    /// The decompressed payload.
    pub payload: String,
    /// The channel it came from.
    pub method: ChannelKind,
}

/// Per-channel diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Channel kind.
    pub kind: ChannelKind,
    /// Result of the availability probe.
    pub available: bool,
    /// Whether the channel currently holds the key.
    pub has_key: bool,
    /// Size of the stored (possibly compressed) value.
    pub stored_bytes: Option<usize>,
    /// Read error, if the probe read failed.
    pub error: Option<String>,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Ordered fallback chain of storage channels.
pub struct StorageRelay {
    channels: Vec<Box<dyn RelayChannel>>,
    compression: CompressionConfig,
}

impl StorageRelay {
    /// Empty relay. Add channels with [`with_channel`](Self::with_channel).
    #[must_use]
    pub fn new(compression: CompressionConfig) -> Self {
        Self {
            channels: Vec::new(),
            compression,
        }
    }

    /// Append a channel to the end of the fallback chain.
    #[must_use]
    pub fn with_channel(mut self, channel: impl RelayChannel + 'static) -> Self {
        self.channels.push(Box::new(channel));
        self
    }

    /// Append a boxed channel.
    pub fn push_channel(&mut self, channel: Box<dyn RelayChannel>) {
        self.channels.push(channel);
    }

    /// The standard chain: key-value store, object store, memory.
    #[must_use]
    pub fn standard(
        kv: Arc<dyn KeyValueStore>,
        objects: Box<dyn ObjectStore>,
        memory: MemoryChannel,
        config: &crate::config::RelayConfig,
    ) -> Self {
        Self::new(config.compression())
            .with_channel(KeyValueChannel::new(kv, config.safety_margin_bytes))
            .with_channel(ObjectStoreChannel::new(
                objects,
                &config.object_store_name,
                config.object_store_version,
                &config.object_store_table,
            ))
            .with_channel(memory)
    }

    /// The standard chain over fresh in-process stores.
    #[must_use]
    pub fn in_memory(config: &crate::config::RelayConfig) -> Self {
        Self::standard(
            Arc::new(MemoryKeyValueStore::with_quota(config.quota_bytes)),
            Box::new(MemoryObjectStore::new()),
            MemoryChannel::new(),
            config,
        )
    }

    /// Channel kinds in fallback order.
    #[must_use]
    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        self.channels.iter().map(|c| c.kind()).collect()
    }

    /// Compression settings.
    #[must_use]
    pub fn compression(&self) -> &CompressionConfig {
        &self.compression
    }

    /// Store `payload` under `key` through the first channel that accepts it.
    pub fn write(&mut self, key: &str, payload: &str) -> RelayWriteResult {
        let span = tracing::debug_span!(
            target: "pageforge.relay",
            "relay.write",
            key,
            size = payload.len(),
            method = tracing::field::Empty
        );
        let _guard = span.enter();

        let stored = match compress(payload, &self.compression) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target: "pageforge.relay", error = %e, "compression failed");
                return RelayWriteResult::failed(payload.len(), e.to_string());
            }
        };
        let compressed = is_compressed(&stored);

        let mut last_error = None;
        let mut written = None;
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let kind = channel.kind();
            if !channel.is_available() {
                tracing::debug!(target: "pageforge.relay", channel = %kind, "channel unavailable, skipping");
                last_error = Some(format!("{kind}: unavailable"));
                continue;
            }
            match channel.try_write(key, &stored) {
                Ok(()) => {
                    span.record("method", kind.as_str());
                    tracing::debug!(
                        target: "pageforge.relay",
                        channel = %kind,
                        stored = stored.len(),
                        compressed,
                        "payload written"
                    );
                    written = Some((index, kind));
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "pageforge.relay",
                        channel = %kind,
                        error = %e,
                        "channel write failed, falling back"
                    );
                    last_error = Some(format!("{kind}: {e}"));
                }
            }
        }

        if let Some((index, kind)) = written {
            self.evict_ahead_of(index, key);
            return RelayWriteResult {
                success: true,
                method: Some(kind),
                size: stored.len(),
                original_size: payload.len(),
                compressed,
                error: None,
            };
        }

        let error = last_error.unwrap_or_else(|| "no relay channels configured".to_owned());
        tracing::warn!(target: "pageforge.relay", error = %error, "all relay channels failed");
        RelayWriteResult::failed(payload.len(), error)
    }

    /// Drop `key` from the channels before `index`. Readers take the first
    /// hit, so a superseded payload left there would shadow the new one.
    fn evict_ahead_of(&mut self, index: usize, key: &str) {
        for channel in &mut self.channels[..index] {
            let kind = channel.kind();
            let available = channel.is_available();
            if let Err(e) = channel.try_remove(key) {
                if !available {
                    tracing::debug!(target: "pageforge.relay", channel = %kind, "channel unavailable, stale payload kept");
                    continue;
                }
                tracing::warn!(
                    target: "pageforge.relay",
                    channel = %kind,
                    error = %e,
                    "could not clear superseded payload"
                );
            }
        }
    }

    /// Sanitize, serialize, and store a tree.
    pub fn write_tree(
        &mut self,
        key: &str,
        tree: &ElementTree,
        opts: &SanitizeOptions,
    ) -> RelayWriteResult {
        match to_payload(tree, opts) {
            Ok(payload) => self.write(key, &payload),
            Err(e) => {
                tracing::warn!(target: "pageforge.relay", error = %e, "tree serialization failed");
                RelayWriteResult::failed(0, e.to_string())
            }
        }
    }

    /// Walk the channels in order and return the first value `accept`
    /// takes. Channel errors and rejected values count as misses.
    fn read_first<T>(
        &mut self,
        key: &str,
        mut accept: impl FnMut(String) -> Result<T, RelayError>,
    ) -> Option<(T, ChannelKind)> {
        let span = tracing::debug_span!(
            target: "pageforge.relay",
            "relay.read",
            key,
            method = tracing::field::Empty
        );
        let _guard = span.enter();

        for channel in &mut self.channels {
            let kind = channel.kind();
            if !channel.is_available() {
                continue;
            }
            let raw = match channel.try_read(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(target: "pageforge.relay", channel = %kind, error = %e, "channel read failed");
                    continue;
                }
            };
            let value = decompress(&raw).map(|s| s.into_owned()).and_then(&mut accept);
            match value {
                Ok(v) => {
                    span.record("method", kind.as_str());
                    tracing::debug!(target: "pageforge.relay", channel = %kind, "payload read");
                    return Some((v, kind));
                }
                Err(e) => {
                    tracing::warn!(
                        target: "pageforge.relay",
                        channel = %kind,
                        error = %e,
                        "stored payload is malformed, treating as a miss"
                    );
                }
            }
        }
        None
    }

    /// Read the payload under `key` from the first channel holding it.
    pub fn read(&mut self, key: &str) -> Option<RelayRead> {
        self.read_first(key, Ok)
            .map(|(payload, method)| RelayRead { payload, method })
    }

    /// Read and parse the tree under `key`. A value that does not parse as a
    /// tree is a miss and the next channel is tried.
    pub fn read_tree(&mut self, key: &str) -> Option<(ElementTree, ChannelKind)> {
        self.read_first(key, |payload| from_payload(&payload).map_err(RelayError::from))
    }

    /// Clear `key` in every channel. Returns the number of channels that
    /// failed to remove it.
    pub fn remove(&mut self, key: &str) -> usize {
        let mut failures = 0;
        for channel in &mut self.channels {
            if !channel.is_available() {
                continue;
            }
            if let Err(e) = channel.try_remove(key) {
                tracing::warn!(
                    target: "pageforge.relay",
                    channel = %channel.kind(),
                    error = %e,
                    "channel remove failed"
                );
                failures += 1;
            }
        }
        failures
    }

    /// Per-channel availability and whether each holds `key`.
    pub fn diagnostics(&mut self, key: &str) -> Vec<ChannelStatus> {
        self.channels
            .iter_mut()
            .map(|channel| {
                let kind = channel.kind();
                let available = channel.is_available();
                let mut status = ChannelStatus {
                    kind,
                    available,
                    has_key: false,
                    stored_bytes: None,
                    error: None,
                };
                if available {
                    match channel.try_read(key) {
                        Ok(Some(v)) => {
                            status.has_key = true;
                            status.stored_bytes = Some(v.len());
                        }
                        Ok(None) => {}
                        Err(e) => status.error = Some(e.to_string()),
                    }
                }
                status
            })
            .collect()
    }
}

impl fmt::Debug for StorageRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRelay")
            .field("channels", &self.channel_kinds())
            .field("compression", &self.compression)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
