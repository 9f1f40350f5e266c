#![forbid(unsafe_code)]

//! Preview consumer: finds the latest tree, renders it, and keeps it fresh.
//!
//! # State Machine
//!
//! ```text
//!            start()
//!              │
//!              ▼
//!          ┌────────┐  tree found / timeout   ┌──────────┐
//!          │Loading │ ───────────────────────▶│ Rendered │◀─┐ update
//!          └────────┘                         └──────────┘──┘
//!              │ corrupt tree
//!              ▼
//!          ┌────────┐
//!          │ Error  │ ── retry() ──▶ Loading
//!          └────────┘
//! ```
//!
//! # Loading Order
//!
//! 1. the `data` parameter of the preview URL
//! 2. the relay's live-preview key
//! 3. the relay's explicit-save key
//! 4. a window request, answered within the handshake deadline
//! 5. placeholder content
//!
//! A malformed payload at any step counts as a miss and the next step runs.
//! Step 4 does not block: it posts the request and leaves the consumer in
//! `Loading`; [`PreviewConsumer::poll`] picks up the answer or, once the
//! deadline passes, falls through to step 5.
//!
//! # Updates
//!
//! Broadcast listeners only queue events. Queued events and window messages
//! are applied by `poll`, so all rendering happens on the host's thread.
//! A corrupt update while rendered is logged and dropped; the current view
//! stays. Once in `Error`, everything still queued is discarded until
//! [`PreviewConsumer::retry`].

use std::collections::VecDeque;
use std::fmt;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pageforge_core::{ElementKind, ElementTree, PageElement, WidgetRegistry, escape_html};
use url::Url;
use web_time::Instant;

use crate::config::{BuilderConfig, KeysSection};
use crate::relay::url::tree_from_url;
use crate::relay::{
    BusSubscription, ChannelKind, ElementsUpdated, EventBus, RelayError, StorageRelay, WindowLink,
    WindowMessage,
};

// ============================================================================
// Rendering
// ============================================================================

/// Turns a tree into the preview's visible output.
pub trait PreviewRenderer: Send {
    /// Render the whole page.
    fn render(&self, tree: &ElementTree) -> String;
}

/// Renders a tree to HTML-like markup through a [`WidgetRegistry`].
#[derive(Debug, Clone)]
pub struct MarkupRenderer {
    registry: Arc<WidgetRegistry>,
}

impl MarkupRenderer {
    /// Renderer over `registry`.
    #[must_use]
    pub fn new(registry: Arc<WidgetRegistry>) -> Self {
        Self { registry }
    }

    /// Renderer over the stock widgets.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(Arc::new(WidgetRegistry::with_builtin()))
    }

    fn render_element(&self, el: &PageElement, out: &mut String) {
        let (tag, class) = match el.kind {
            ElementKind::Section => ("section", "pf-section"),
            ElementKind::Column => ("div", "pf-column"),
            ElementKind::FlexContainer => ("div", "pf-flex"),
            ElementKind::Widget => ("div", "pf-widget"),
        };
        let _ = write!(
            out,
            "<{tag} class=\"{class}\" data-id=\"{}\"",
            escape_html(el.id.as_str())
        );
        let style = inline_style(el);
        if !style.is_empty() {
            let _ = write!(out, " style=\"{}\"", escape_html(&style));
        }
        out.push('>');
        if el.kind == ElementKind::Widget {
            out.push_str(&self.registry.render_widget(el));
        } else {
            for child in &el.children {
                self.render_element(child, out);
            }
        }
        let _ = write!(out, "</{tag}>");
    }
}

fn inline_style(el: &PageElement) -> String {
    let mut style = String::new();
    for (key, value) in el.styles.iter() {
        if let Some(s) = value.as_str() {
            let _ = write!(style, "{key}:{s};");
        } else if let Some(n) = value.as_f64() {
            let _ = write!(style, "{key}:{n}px;");
        }
    }
    style
}

impl PreviewRenderer for MarkupRenderer {
    fn render(&self, tree: &ElementTree) -> String {
        let mut out = String::new();
        for root in tree.roots() {
            self.render_element(root, &mut out);
        }
        out
    }
}

/// Content shown when no tree can be found anywhere.
#[must_use]
pub fn placeholder_tree() -> ElementTree {
    ElementTree::from_roots([PageElement::section()
        .with_id("pf-placeholder-section")
        .with_child(
            PageElement::column()
                .with_id("pf-placeholder-column")
                .with_child(
                    PageElement::widget("heading")
                        .with_id("pf-placeholder-heading")
                        .with_content("text", "Preview")
                        .with_prop("level", 1i64),
                )
                .with_child(
                    PageElement::widget("text")
                        .with_id("pf-placeholder-text")
                        .with_content("text", "Nothing to preview yet. Add elements in the editor."),
                ),
        )])
}

// ============================================================================
// State
// ============================================================================

/// Where the currently shown tree came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSource {
    /// The preview URL's `data` parameter.
    Url,
    /// The live-preview key, through the given channel.
    Relay(ChannelKind),
    /// The explicit-save key, through the given channel.
    SavedRelay(ChannelKind),
    /// A window message.
    Message,
    /// A broadcast event.
    Broadcast,
    /// Nothing was found.
    Placeholder,
}

/// What the preview currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewView {
    /// The tree being shown.
    pub elements: ElementTree,
    /// Its rendered output.
    pub markup: String,
}

/// Preview lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewState {
    /// Looking for data.
    Loading,
    /// Showing a tree.
    Rendered {
        /// What is shown.
        view: PreviewView,
        /// Where it came from.
        source: PreviewSource,
    },
    /// Loading failed; [`PreviewConsumer::retry`] starts over.
    Error(String),
}

impl PreviewState {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Rendered { .. } => "rendered",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// A preview window's loader and renderer.
pub struct PreviewConsumer {
    state: PreviewState,
    renderer: Box<dyn PreviewRenderer>,
    keys: KeysSection,
    handshake_timeout: Duration,
    url: Option<Url>,
    relay: Option<StorageRelay>,
    link: Option<WindowLink>,
    bus: Option<EventBus>,
    subscription: Option<BusSubscription>,
    inbox: Arc<Mutex<VecDeque<ElementsUpdated>>>,
    deadline: Option<Instant>,
}

impl PreviewConsumer {
    /// Consumer with no data sources. Attach sources with the `with_*`
    /// builders, then call [`start`](Self::start).
    #[must_use]
    pub fn new(config: &BuilderConfig, renderer: impl PreviewRenderer + 'static) -> Self {
        Self {
            state: PreviewState::Loading,
            renderer: Box::new(renderer),
            keys: config.keys.clone(),
            handshake_timeout: config.handshake_timeout(),
            url: None,
            relay: None,
            link: None,
            bus: None,
            subscription: None,
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            deadline: None,
        }
    }

    /// The URL this preview was opened with.
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// A relay reading the editor's stores.
    #[must_use]
    pub fn with_relay(mut self, relay: StorageRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    /// A link to the editor window.
    #[must_use]
    pub fn with_link(mut self, link: WindowLink) -> Self {
        self.link = Some(link);
        self
    }

    /// The same-window event bus.
    #[must_use]
    pub fn with_bus(mut self, bus: &EventBus) -> Self {
        self.bus = Some(bus.clone());
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    /// The shown view, if rendered.
    #[must_use]
    pub fn view(&self) -> Option<&PreviewView> {
        match &self.state {
            PreviewState::Rendered { view, .. } => Some(view),
            _ => None,
        }
    }

    /// Source of the shown view, if rendered.
    #[must_use]
    pub fn source(&self) -> Option<PreviewSource> {
        match &self.state {
            PreviewState::Rendered { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// Whether a window request is outstanding.
    #[must_use]
    pub fn is_awaiting_response(&self) -> bool {
        self.deadline.is_some()
    }

    /// Start loading now.
    pub fn start(&mut self) -> &PreviewState {
        self.start_at(Instant::now())
    }

    /// Start loading, measuring the handshake deadline from `now`.
    pub fn start_at(&mut self, now: Instant) -> &PreviewState {
        self.transition(PreviewState::Loading);
        self.deadline = None;
        self.ensure_subscribed();

        if let Some(tree) = self.load_from_url() {
            self.show(tree, PreviewSource::Url);
            return &self.state;
        }
        let live = self.keys.live_preview.clone();
        if let Some((tree, kind)) = self.load_from_relay(&live) {
            self.show(tree, PreviewSource::Relay(kind));
            return &self.state;
        }
        let saved = self.keys.saved.clone();
        if let Some((tree, kind)) = self.load_from_relay(&saved) {
            self.show(tree, PreviewSource::SavedRelay(kind));
            return &self.state;
        }
        if self.request_from_editor() {
            self.deadline = Some(now + self.handshake_timeout);
            tracing::debug!(
                target: "pageforge.preview",
                timeout_ms = self.handshake_timeout.as_millis() as u64,
                "requested preview data from editor window"
            );
            return &self.state;
        }
        self.show(placeholder_tree(), PreviewSource::Placeholder);
        &self.state
    }

    /// Apply queued updates and check the handshake deadline.
    pub fn poll(&mut self) -> &PreviewState {
        self.poll_at(Instant::now())
    }

    /// [`poll`](Self::poll) with an explicit clock.
    pub fn poll_at(&mut self, now: Instant) -> &PreviewState {
        if matches!(self.state, PreviewState::Error(_)) {
            self.discard_pending();
            return &self.state;
        }

        for message in self.receive_messages() {
            match message {
                WindowMessage::PreviewDataResponse { elements }
                | WindowMessage::PreviewDataUpdate { elements } => {
                    self.apply_update(elements, PreviewSource::Message);
                }
                WindowMessage::RequestPreviewData => {}
            }
            if matches!(self.state, PreviewState::Error(_)) {
                self.discard_pending();
                return &self.state;
            }
        }

        let events: Vec<ElementsUpdated> = {
            let mut inbox = self.inbox.lock().unwrap_or_else(|e| e.into_inner());
            inbox.drain(..).collect()
        };
        for event in events {
            self.apply_update(event.elements, PreviewSource::Broadcast);
            if matches!(self.state, PreviewState::Error(_)) {
                self.discard_pending();
                return &self.state;
            }
        }

        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.deadline = None;
            tracing::debug!(
                target: "pageforge.preview",
                "editor did not answer the preview request in time"
            );
            self.show(placeholder_tree(), PreviewSource::Placeholder);
        }
        &self.state
    }

    /// Leave `Error` and load again. No-op in other states.
    pub fn retry(&mut self) -> &PreviewState {
        self.retry_at(Instant::now())
    }

    /// [`retry`](Self::retry) with an explicit clock.
    pub fn retry_at(&mut self, now: Instant) -> &PreviewState {
        if matches!(self.state, PreviewState::Error(_)) {
            tracing::debug!(target: "pageforge.preview", "retrying");
            self.start_at(now)
        } else {
            &self.state
        }
    }

    /// Deregister every listener and drop the window link.
    pub fn teardown(&mut self) {
        self.subscription = None;
        self.link = None;
        self.deadline = None;
        self.discard_pending();
        tracing::debug!(target: "pageforge.preview", "preview torn down");
    }

    // ------------------------------------------------------------------------

    fn ensure_subscribed(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        if let Some(bus) = &self.bus {
            let inbox = Arc::clone(&self.inbox);
            self.subscription = Some(bus.subscribe(move |event| {
                inbox
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_back(event.clone());
            }));
        }
    }

    fn discard_pending(&mut self) {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).clear();
        if let Some(link) = &self.link {
            let _ = link.drain();
        }
    }

    fn load_from_url(&self) -> Option<ElementTree> {
        let url = self.url.as_ref()?;
        match tree_from_url(url) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(target: "pageforge.preview", error = %e, "preview URL payload is malformed");
                None
            }
        }
    }

    fn load_from_relay(&mut self, key: &str) -> Option<(ElementTree, ChannelKind)> {
        self.relay.as_mut()?.read_tree(key)
    }

    fn request_from_editor(&mut self) -> bool {
        let Some(link) = &self.link else {
            return false;
        };
        match link.post(&WindowMessage::RequestPreviewData) {
            Ok(()) => true,
            Err(RelayError::Disconnected) => {
                tracing::debug!(target: "pageforge.preview", "editor window is gone");
                self.link = None;
                false
            }
            Err(e) => {
                tracing::warn!(target: "pageforge.preview", error = %e, "preview request failed");
                false
            }
        }
    }

    fn receive_messages(&mut self) -> Vec<WindowMessage> {
        let Some(link) = &self.link else {
            return Vec::new();
        };
        let mut out = Vec::new();
        loop {
            match link.try_recv() {
                Ok(Some(message)) => out.push(message),
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(target: "pageforge.preview", "editor window disconnected");
                    self.link = None;
                    break;
                }
            }
        }
        out
    }

    /// A pushed tree. While rendered, a corrupt one is dropped and the
    /// current view stays.
    fn apply_update(&mut self, elements: ElementTree, source: PreviewSource) {
        if matches!(self.state, PreviewState::Rendered { .. }) {
            if let Err(e) = elements.validate() {
                tracing::warn!(
                    target: "pageforge.preview",
                    error = %e,
                    source = ?source,
                    "dropping corrupt update"
                );
                return;
            }
        }
        self.deadline = None;
        self.show(elements, source);
    }

    fn show(&mut self, elements: ElementTree, source: PreviewSource) {
        if let Err(e) = elements.validate() {
            tracing::warn!(target: "pageforge.preview", error = %e, "received a corrupt tree");
            self.deadline = None;
            self.transition(PreviewState::Error(format!("corrupt page data: {e}")));
            return;
        }
        let markup = self.renderer.render(&elements);
        tracing::debug!(
            target: "pageforge.preview",
            source = ?source,
            nodes = elements.node_count(),
            "preview rendered"
        );
        self.transition(PreviewState::Rendered {
            view: PreviewView { elements, markup },
            source,
        });
    }

    fn transition(&mut self, next: PreviewState) {
        if self.state.name() != next.name() {
            tracing::debug!(
                target: "pageforge.preview",
                from = self.state.name(),
                to = next.name(),
                "preview state change"
            );
        }
        self.state = next;
    }
}

impl fmt::Debug for PreviewConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewConsumer")
            .field("state", &self.state.name())
            .field("has_url", &self.url.is_some())
            .field("has_relay", &self.relay.is_some())
            .field("has_link", &self.link.is_some())
            .field("subscribed", &self.subscription.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{CompressionConfig, MemoryChannel};
    use pageforge_core::{SanitizeOptions, to_payload};

    fn page() -> ElementTree {
        ElementTree::from_roots([PageElement::section()
            .with_id("s")
            .with_child(PageElement::widget("heading").with_id("h").with_content("text", "Hello"))])
    }

    fn consumer() -> PreviewConsumer {
        PreviewConsumer::new(&BuilderConfig::default(), MarkupRenderer::builtin())
    }

    #[test]
    fn no_sources_renders_placeholder() {
        let mut preview = consumer();
        preview.start();
        assert_eq!(preview.source(), Some(PreviewSource::Placeholder));
        assert!(preview.view().unwrap().markup.contains("Nothing to preview yet"));
    }

    #[test]
    fn markup_uses_registry() {
        let markup = MarkupRenderer::builtin().render(&page());
        assert_eq!(
            markup,
            "<section class=\"pf-section\" data-id=\"s\"><div class=\"pf-widget\" data-id=\"h\"><h2>Hello</h2></div></section>"
        );
    }

    #[test]
    fn styles_become_inline_style() {
        let tree = ElementTree::from_roots([PageElement::section()
            .with_id("s")
            .with_style("padding", 8i64)
            .with_style("color", "red")]);
        let markup = MarkupRenderer::builtin().render(&tree);
        assert!(markup.contains("style=\"color:red;padding:8px;\""), "{markup}");
    }

    #[test]
    fn url_wins_over_relay() {
        let memory = MemoryChannel::new();
        memory.insert("pageforge-preview-data", "[]");
        let relay = StorageRelay::new(CompressionConfig::default()).with_channel(memory);
        let payload = to_payload(&page(), &SanitizeOptions::default()).unwrap();
        let url = crate::relay::url::encode_preview_url("https://example.com/preview", &payload, 32 * 1024)
            .unwrap();

        let mut preview = consumer().with_relay(relay).with_url(url);
        preview.start();
        assert_eq!(preview.source(), Some(PreviewSource::Url));
        assert_eq!(preview.view().unwrap().elements, page());
    }

    #[test]
    fn saved_key_is_used_when_live_key_is_empty() {
        let memory = MemoryChannel::new();
        let payload = to_payload(&page(), &SanitizeOptions::default()).unwrap();
        memory.insert("pageforge-saved-elements", &payload);
        let relay = StorageRelay::new(CompressionConfig::default()).with_channel(memory);

        let mut preview = consumer().with_relay(relay);
        preview.start();
        assert_eq!(preview.source(), Some(PreviewSource::SavedRelay(ChannelKind::Memory)));
    }

    #[test]
    fn corrupt_tree_errors_and_retry_recovers() {
        let memory = MemoryChannel::new();
        memory.insert(
            "pageforge-preview-data",
            r#"[{"id":"a","type":"section"},{"id":"a","type":"section"}]"#,
        );
        let relay = StorageRelay::new(CompressionConfig::default()).with_channel(memory.clone());
        let mut preview = consumer().with_relay(relay);
        preview.start();
        assert!(matches!(preview.state(), PreviewState::Error(_)));

        memory.insert("pageforge-preview-data", r#"[{"id":"a","type":"section"}]"#);
        preview.retry();
        assert_eq!(preview.source(), Some(PreviewSource::Relay(ChannelKind::Memory)));
    }

    #[test]
    fn retry_outside_error_is_noop() {
        let mut preview = consumer();
        preview.start();
        let before = preview.state().clone();
        preview.retry();
        assert_eq!(preview.state(), &before);
    }

    #[test]
    fn broadcast_replaces_view_on_poll() {
        let bus = EventBus::new();
        let mut preview = consumer().with_bus(&bus);
        preview.start();
        assert_eq!(bus.listener_count(), 1);

        bus.emit(&ElementsUpdated { elements: page() });
        // Not applied until pumped.
        assert_eq!(preview.source(), Some(PreviewSource::Placeholder));
        preview.poll();
        assert_eq!(preview.source(), Some(PreviewSource::Broadcast));
        assert_eq!(preview.view().unwrap().elements, page());

        preview.teardown();
        assert_eq!(bus.listener_count(), 0);
    }

    fn twins() -> ElementTree {
        ElementTree::from_roots([
            PageElement::section().with_id("a"),
            PageElement::section().with_id("a"),
        ])
    }

    #[test]
    fn rendered_preview_drops_corrupt_update() {
        let bus = EventBus::new();
        let mut preview = consumer().with_bus(&bus);
        preview.start();

        bus.emit(&ElementsUpdated { elements: twins() });
        preview.poll();
        assert_eq!(preview.source(), Some(PreviewSource::Placeholder));

        bus.emit(&ElementsUpdated { elements: twins() });
        bus.emit(&ElementsUpdated { elements: page() });
        preview.poll();
        assert_eq!(preview.source(), Some(PreviewSource::Broadcast));
        assert_eq!(preview.view().unwrap().elements, page());
    }

    #[test]
    fn corrupt_response_errors_and_later_updates_wait_for_retry() {
        let (editor, preview_end) = WindowLink::pair();
        let mut preview = consumer().with_link(preview_end);
        let t0 = Instant::now();
        preview.start_at(t0);

        editor
            .post(&WindowMessage::PreviewDataResponse { elements: twins() })
            .unwrap();
        editor
            .post(&WindowMessage::PreviewDataUpdate { elements: page() })
            .unwrap();
        preview.poll_at(t0 + Duration::from_millis(10));
        assert!(matches!(preview.state(), PreviewState::Error(_)));

        editor
            .post(&WindowMessage::PreviewDataUpdate { elements: page() })
            .unwrap();
        preview.poll_at(t0 + Duration::from_millis(20));
        assert!(matches!(preview.state(), PreviewState::Error(_)));
    }

    #[test]
    fn handshake_times_out_to_placeholder() {
        let (_editor, preview_end) = WindowLink::pair();
        let mut preview = consumer().with_link(preview_end);
        let t0 = Instant::now();
        preview.start_at(t0);
        assert_eq!(preview.state(), &PreviewState::Loading);
        assert!(preview.is_awaiting_response());

        preview.poll_at(t0 + Duration::from_millis(1999));
        assert_eq!(preview.state(), &PreviewState::Loading);

        preview.poll_at(t0 + Duration::from_millis(2000));
        assert_eq!(preview.source(), Some(PreviewSource::Placeholder));
        assert!(!preview.is_awaiting_response());
    }

    #[test]
    fn handshake_response_renders() {
        let (editor, preview_end) = WindowLink::pair();
        let mut preview = consumer().with_link(preview_end);
        let t0 = Instant::now();
        preview.start_at(t0);

        assert_eq!(editor.try_recv().unwrap(), Some(WindowMessage::RequestPreviewData));
        editor
            .post(&WindowMessage::PreviewDataResponse { elements: page() })
            .unwrap();
        preview.poll_at(t0 + Duration::from_millis(10));
        assert_eq!(preview.source(), Some(PreviewSource::Message));
    }

    #[test]
    fn disconnected_editor_falls_through_to_placeholder() {
        let (editor, preview_end) = WindowLink::pair();
        drop(editor);
        let mut preview = consumer().with_link(preview_end);
        preview.start();
        assert_eq!(preview.source(), Some(PreviewSource::Placeholder));
    }
}
