#![forbid(unsafe_code)]

//! Editor shell: the one funnel every tree mutation goes through.
//!
//! # Funnel
//!
//! [`EditorShell::update_elements`] is the only way the live tree changes.
//! A tree that fails validation (duplicate ids, a widget without a widget
//! type) is rejected up front. Otherwise, in order, it:
//!
//! 1. replaces the live tree,
//! 2. records a history snapshot,
//! 3. sanitizes the tree and writes it to the relay under the live-preview
//!    key,
//! 4. on a successful write, broadcasts the sanitized tree on the event bus
//!    and posts it to every connected preview window.
//!
//! When every relay channel fails, a [`Notice::Warning`] is queued for the
//! UI instead. History and the live tree are already updated at that point,
//! so a failed write never makes them diverge.
//!
//! The mutation helpers (`add_element`, `update_element`, ...) compute the
//! new tree with the copy-on-write operations of
//! [`pageforge_core::tree`] and hand it to the funnel. Undo and redo
//! restore a snapshot and relay it without recording a new one.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use pageforge_core::{
    ElementId, ElementKind, ElementPatch, ElementTree, PageElement, PayloadError, SanitizeOptions,
    TreeError, WidgetRegistry, sanitize_tree,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::BuilderConfig;
use crate::relay::url::encode_preview_url;
use crate::relay::{
    ElementsUpdated, EventBus, RelayError, RelayWriteResult, StorageRelay, WindowLink,
    WindowMessage,
};
use crate::undo::{HistoryManager, HistoryStep};

/// A non-blocking message for the editor UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Something worth telling the user.
    Info(String),
    /// Something went wrong but editing can continue.
    Warning(String),
}

/// Format version of exported templates.
pub const TEMPLATE_FORMAT_VERSION: u32 = 1;

/// A saved page template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDocument {
    /// Template name.
    pub name: String,
    /// Format version for future migrations.
    pub format_version: u32,
    /// Sanitized root sequence.
    pub elements: ElementTree,
}

impl TemplateDocument {
    /// Parse an exported template.
    pub fn from_json(s: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// The editor's state and mutation funnel.
pub struct EditorShell {
    elements: ElementTree,
    history: HistoryManager,
    relay: StorageRelay,
    bus: EventBus,
    previews: Vec<WindowLink>,
    registry: Arc<WidgetRegistry>,
    config: BuilderConfig,
    sanitize: SanitizeOptions,
    notices: VecDeque<Notice>,
}

impl EditorShell {
    /// Editor over `relay` with an empty page.
    #[must_use]
    pub fn new(config: BuilderConfig, relay: StorageRelay, registry: Arc<WidgetRegistry>) -> Self {
        let history = HistoryManager::new(ElementTree::new(), config.to_history_config());
        let sanitize = config.to_sanitize_options();
        Self {
            elements: ElementTree::new(),
            history,
            relay,
            bus: EventBus::new(),
            previews: Vec::new(),
            registry,
            config,
            sanitize,
            notices: VecDeque::new(),
        }
    }

    /// Editor over fresh in-process stores and the stock widgets.
    #[must_use]
    pub fn in_memory(config: BuilderConfig) -> Self {
        let relay = StorageRelay::in_memory(&config.relay);
        Self::new(config, relay, Arc::new(WidgetRegistry::with_builtin()))
    }

    /// Use `bus` for same-window broadcasts instead of a private one.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The live tree.
    #[must_use]
    pub fn elements(&self) -> &ElementTree {
        &self.elements
    }

    /// Undo history.
    #[must_use]
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    /// The relay.
    #[must_use]
    pub fn relay(&self) -> &StorageRelay {
        &self.relay
    }

    /// The relay, mutably (diagnostics, reads).
    pub fn relay_mut(&mut self) -> &mut StorageRelay {
        &mut self.relay
    }

    /// The same-window event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The widget registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<WidgetRegistry> {
        &self.registry
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Number of connected preview windows.
    #[must_use]
    pub fn preview_count(&self) -> usize {
        self.previews.len()
    }

    /// Take all queued notices.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    // ------------------------------------------------------------------------
    // Funnel
    // ------------------------------------------------------------------------

    /// Commit `elements` as the new live tree.
    ///
    /// A tree that fails [`ElementTree::validate`] is rejected before any
    /// state changes.
    pub fn update_elements(
        &mut self,
        elements: ElementTree,
        description: Option<&str>,
    ) -> Result<RelayWriteResult, TreeError> {
        elements.validate()?;
        self.elements = elements.clone();
        self.history.push(elements, description);
        tracing::debug!(
            target: "pageforge.editor",
            description = self.history.current().description.as_str(),
            nodes = self.elements.node_count(),
            "elements updated"
        );
        Ok(self.publish())
    }

    /// Replace the page wholesale and start a fresh history (after loading
    /// a page or applying a template). Invalid trees are rejected.
    pub fn load_page(&mut self, elements: ElementTree) -> Result<RelayWriteResult, TreeError> {
        elements.validate()?;
        self.elements = elements.clone();
        self.history.reset(elements);
        Ok(self.publish())
    }

    fn publish(&mut self) -> RelayWriteResult {
        let sanitized = sanitize_tree(&self.elements, &self.sanitize);
        let key = self.config.keys.live_preview.clone();
        let result = match serde_json::to_string(&sanitized) {
            Ok(payload) => self.relay.write(&key, &payload),
            Err(e) => RelayWriteResult::failed(0, PayloadError::Json(e).to_string()),
        };

        if result.success {
            let event = ElementsUpdated {
                elements: sanitized.clone(),
            };
            self.bus.emit(&event);
            self.post_to_previews(&WindowMessage::PreviewDataUpdate {
                elements: sanitized,
            });
        } else {
            let why = result.error.as_deref().unwrap_or("unknown error");
            tracing::warn!(target: "pageforge.editor", error = why, "preview data could not be stored");
            self.notices.push_back(Notice::Warning(format!(
                "Live preview could not be updated: {why}"
            )));
        }
        result
    }

    fn post_to_previews(&mut self, message: &WindowMessage) {
        self.previews.retain(|link| match link.post(message) {
            Ok(()) => true,
            Err(RelayError::Disconnected) => {
                tracing::debug!(target: "pageforge.editor", "preview window disconnected");
                false
            }
            Err(e) => {
                tracing::warn!(target: "pageforge.editor", error = %e, "posting to preview window failed");
                true
            }
        });
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Insert `element` under `parent` (or at the root) at `index` (or at
    /// the end).
    pub fn add_element(
        &mut self,
        parent: Option<&ElementId>,
        index: Option<usize>,
        element: PageElement,
    ) -> Result<RelayWriteResult, TreeError> {
        let description = format!("Add {}", label(&element));
        let next = self.elements.insert(parent, index, element)?;
        self.update_elements(next, Some(description.as_str()))
    }

    /// Merge `patch` into the element `id`.
    pub fn update_element(
        &mut self,
        id: &ElementId,
        patch: &ElementPatch,
    ) -> Result<RelayWriteResult, TreeError> {
        let description = self.describe("Update", id)?;
        let next = self.elements.update(id, patch)?;
        self.update_elements(next, Some(description.as_str()))
    }

    /// Move `id` under `new_parent` (or to the root) at `index`.
    pub fn move_element(
        &mut self,
        id: &ElementId,
        new_parent: Option<&ElementId>,
        index: Option<usize>,
    ) -> Result<RelayWriteResult, TreeError> {
        let description = self.describe("Move", id)?;
        let next = self.elements.move_to(id, new_parent, index)?;
        self.update_elements(next, Some(description.as_str()))
    }

    /// Remove `id` and its subtree.
    pub fn delete_element(&mut self, id: &ElementId) -> Result<RelayWriteResult, TreeError> {
        let description = self.describe("Delete", id)?;
        let (next, _removed) = self.elements.remove(id)?;
        self.update_elements(next, Some(description.as_str()))
    }

    /// Copy `id` with fresh ids, placed right after the original. Returns
    /// the copy's id.
    pub fn duplicate_element(
        &mut self,
        id: &ElementId,
    ) -> Result<(ElementId, RelayWriteResult), TreeError> {
        let description = self.describe("Duplicate", id)?;
        let (next, copy) = self.elements.duplicate(id)?;
        let result = self.update_elements(next, Some(description.as_str()))?;
        Ok((copy, result))
    }

    fn describe(&self, verb: &str, id: &ElementId) -> Result<String, TreeError> {
        let el = self
            .elements
            .find(id)
            .ok_or_else(|| TreeError::NotFound(id.clone()))?;
        Ok(format!("{verb} {}", label(el)))
    }

    /// Undo the last mutation. `None` at the oldest entry.
    pub fn undo(&mut self) -> Option<HistoryStep> {
        let step = self.history.undo()?;
        self.elements = step.elements.clone();
        tracing::debug!(target: "pageforge.editor", action = step.action.as_str(), "undo");
        self.publish();
        Some(step)
    }

    /// Redo the last undone mutation. `None` at the newest entry.
    pub fn redo(&mut self) -> Option<HistoryStep> {
        let step = self.history.redo()?;
        self.elements = step.elements.clone();
        tracing::debug!(target: "pageforge.editor", action = step.action.as_str(), "redo");
        self.publish();
        Some(step)
    }

    // ------------------------------------------------------------------------
    // Persistence and previews
    // ------------------------------------------------------------------------

    /// Write the live tree under the explicit-save key.
    pub fn save(&mut self) -> RelayWriteResult {
        let key = self.config.keys.saved.clone();
        let result = self.relay.write_tree(&key, &self.elements, &self.sanitize);
        if result.success {
            self.notices.push_back(Notice::Info("Page saved".into()));
        } else {
            let why = result.error.as_deref().unwrap_or("unknown error");
            tracing::warn!(target: "pageforge.editor", error = why, "save failed");
            self.notices
                .push_back(Notice::Warning(format!("Page could not be saved: {why}")));
        }
        result
    }

    /// URL opening a preview of the live tree in a new window.
    pub fn preview_url(&self, base: &str) -> Result<Url, RelayError> {
        let sanitized = sanitize_tree(&self.elements, &self.sanitize);
        let payload = serde_json::to_string(&sanitized).map_err(PayloadError::Json)?;
        encode_preview_url(base, &payload, self.config.relay.max_url_bytes)
    }

    /// Register a preview window. It receives every committed update.
    pub fn connect_preview(&mut self, link: WindowLink) {
        self.previews.push(link);
        tracing::debug!(
            target: "pageforge.editor",
            previews = self.previews.len(),
            "preview window connected"
        );
    }

    /// Answer pending preview requests. Returns the number answered.
    pub fn pump_messages(&mut self) -> usize {
        let mut answered = 0;
        let mut sanitized = None;
        let elements = &self.elements;
        let opts = &self.sanitize;
        self.previews.retain(|link| {
            loop {
                match link.try_recv() {
                    Ok(Some(WindowMessage::RequestPreviewData)) => {
                        let tree = sanitized
                            .get_or_insert_with(|| sanitize_tree(elements, opts))
                            .clone();
                        match link.post(&WindowMessage::PreviewDataResponse { elements: tree }) {
                            Ok(()) => answered += 1,
                            Err(_) => return false,
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => return true,
                    Err(_) => return false,
                }
            }
        });
        if answered > 0 {
            tracing::debug!(target: "pageforge.editor", answered, "answered preview requests");
        }
        answered
    }

    /// Export the live tree as a template document.
    pub fn export_template(&self, name: &str) -> Result<String, PayloadError> {
        let document = TemplateDocument {
            name: name.to_owned(),
            format_version: TEMPLATE_FORMAT_VERSION,
            elements: sanitize_tree(&self.elements, &self.sanitize),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// A new element with registry defaults. `None` for a widget type the
    /// registry does not know, or a widget without a type.
    #[must_use]
    pub fn new_element(&self, kind: ElementKind, widget_type: Option<&str>) -> Option<PageElement> {
        match kind {
            ElementKind::Widget => self.registry.create(widget_type?),
            _ => Some(PageElement::new(kind)),
        }
    }
}

fn label(el: &PageElement) -> &str {
    el.widget_type.as_deref().unwrap_or(el.kind.as_str())
}

impl fmt::Debug for EditorShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorShell")
            .field("nodes", &self.elements.node_count())
            .field("history", &self.history)
            .field("relay", &self.relay)
            .field("previews", &self.previews.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
