#![forbid(unsafe_code)]

//! Cross-window messaging.
//!
//! A [`WindowLink`] is one end of a bidirectional channel between the editor
//! window and a preview window. Messages travel as JSON strings, the way
//! `postMessage` payloads cross a window boundary; anything that does not
//! decode as a [`WindowMessage`] is ignored by the receiver.
//!
//! Protocol:
//! 1. The preview posts [`WindowMessage::RequestPreviewData`] on load.
//! 2. The editor answers with [`WindowMessage::PreviewDataResponse`].
//! 3. After every committed change the editor posts
//!    [`WindowMessage::PreviewDataUpdate`].

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use pageforge_core::ElementTree;
use serde::{Deserialize, Serialize};

use super::RelayError;

/// A message between editor and preview windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WindowMessage {
    /// Preview asks the editor for the current tree.
    RequestPreviewData,
    /// Editor answers a request.
    PreviewDataResponse {
        /// Sanitized root sequence.
        elements: ElementTree,
    },
    /// Editor pushes a change.
    PreviewDataUpdate {
        /// Sanitized root sequence.
        elements: ElementTree,
    },
}

/// One end of a window-to-window channel.
#[derive(Debug)]
pub struct WindowLink {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl WindowLink {
    /// Two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel();
        let (tx_b, rx_a) = mpsc::channel();
        (Self { tx: tx_a, rx: rx_a }, Self { tx: tx_b, rx: rx_b })
    }

    /// Serialize and send a message.
    pub fn post(&self, message: &WindowMessage) -> Result<(), RelayError> {
        let raw = serde_json::to_string(message)
            .map_err(|e| RelayError::Payload(pageforge_core::PayloadError::Json(e)))?;
        self.post_raw(raw)
    }

    /// Send an already-encoded message.
    pub fn post_raw(&self, raw: String) -> Result<(), RelayError> {
        self.tx.send(raw).map_err(|_| RelayError::Disconnected)
    }

    /// Next decodable message, if any. Undecodable messages are dropped.
    /// Returns `Err(Disconnected)` once the other end is gone and the queue
    /// is empty.
    pub fn try_recv(&self) -> Result<Option<WindowMessage>, RelayError> {
        loop {
            match self.rx.try_recv() {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => {
                        tracing::debug!(target: "pageforge.relay", error = %e, "ignoring foreign window message");
                    }
                },
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(RelayError::Disconnected),
            }
        }
    }

    /// All currently queued decodable messages.
    pub fn drain(&self) -> Vec<WindowMessage> {
        let mut out = Vec::new();
        while let Ok(Some(message)) = self.try_recv() {
            out.push(message);
        }
        out
    }
}
