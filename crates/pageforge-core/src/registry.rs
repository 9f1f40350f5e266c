#![forbid(unsafe_code)]

//! Widget dispatch table.
//!
//! A widget's concrete kind is a string discriminator (`widget_type`). All
//! per-kind behavior lives in one [`WidgetDefinition`] looked up once by that
//! string: defaults for new instances, the fields its properties editor
//! exposes, and its markup renderer.
//!
//! The registry is an ordinary value. Construct it at startup (usually via
//! [`WidgetRegistry::with_builtin`]), extend it, and pass it to whatever needs
//! widget lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::element::{PageElement, PropMap, PropValue};

/// Renders a widget to markup.
pub type RenderFn = Arc<dyn Fn(&PageElement) -> String + Send + Sync>;

/// Which property map an editor field writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropNamespace {
    /// `content`
    Content,
    /// `styles`
    Styles,
    /// `props`
    Props,
}

/// Input control used by the properties editor.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldControl {
    /// Single-line text.
    Text,
    /// Multi-line text.
    TextArea,
    /// Numeric input with optional bounds.
    Number { min: Option<f64>, max: Option<f64> },
    /// Color picker.
    Color,
    /// One of a fixed set of values.
    Select(Vec<String>),
    /// On/off.
    Toggle,
    /// Media library picker (image/video URL).
    Media,
}

/// One field in a widget's properties editor.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorField {
    /// Key inside the target map.
    pub key: String,
    /// Label shown in the editor.
    pub label: String,
    /// Target map.
    pub namespace: PropNamespace,
    /// Input control.
    pub control: FieldControl,
}

impl EditorField {
    /// Create a field.
    #[must_use]
    pub fn new(key: &str, label: &str, namespace: PropNamespace, control: FieldControl) -> Self {
        Self {
            key: key.to_owned(),
            label: label.to_owned(),
            namespace,
            control,
        }
    }
}

/// Everything the builder knows about one widget kind.
#[derive(Clone)]
pub struct WidgetDefinition {
    /// Discriminator stored in `widget_type`.
    pub widget_type: String,
    /// Human-readable name for the widget panel.
    pub label: String,
    /// Content for new instances.
    pub default_content: PropMap,
    /// Styles for new instances.
    pub default_styles: PropMap,
    /// Props for new instances.
    pub default_props: PropMap,
    /// Fields exposed by the properties editor.
    pub fields: Vec<EditorField>,
    render: RenderFn,
}

impl WidgetDefinition {
    /// Create a definition with a renderer and empty defaults.
    pub fn new(
        widget_type: &str,
        label: &str,
        render: impl Fn(&PageElement) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            widget_type: widget_type.to_owned(),
            label: label.to_owned(),
            default_content: PropMap::new(),
            default_styles: PropMap::new(),
            default_props: PropMap::new(),
            fields: Vec::new(),
            render: Arc::new(render),
        }
    }

    /// Set default content.
    #[must_use]
    pub fn with_content(mut self, content: PropMap) -> Self {
        self.default_content = content;
        self
    }

    /// Set default styles.
    #[must_use]
    pub fn with_styles(mut self, styles: PropMap) -> Self {
        self.default_styles = styles;
        self
    }

    /// Set default props.
    #[must_use]
    pub fn with_props(mut self, props: PropMap) -> Self {
        self.default_props = props;
        self
    }

    /// Add an editor field.
    #[must_use]
    pub fn with_field(mut self, field: EditorField) -> Self {
        self.fields.push(field);
        self
    }

    /// Render `el` with this definition.
    #[must_use]
    pub fn render(&self, el: &PageElement) -> String {
        (self.render)(el)
    }

    /// A fresh instance with this definition's defaults.
    #[must_use]
    pub fn instantiate(&self) -> PageElement {
        let mut el = PageElement::widget(&self.widget_type);
        el.content = self.default_content.clone();
        el.styles = self.default_styles.clone();
        el.props = self.default_props.clone();
        el
    }
}

impl fmt::Debug for WidgetDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetDefinition")
            .field("widget_type", &self.widget_type)
            .field("label", &self.label)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// Lookup table from `widget_type` to [`WidgetDefinition`].
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    defs: HashMap<String, Arc<WidgetDefinition>>,
}

impl WidgetRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the stock widgets: heading, text, button,
    /// image, spacer, divider.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        for def in builtin_widgets() {
            reg.register(def);
        }
        reg
    }

    /// Add or replace a definition. Returns the replaced one, if any.
    pub fn register(&mut self, def: WidgetDefinition) -> Option<Arc<WidgetDefinition>> {
        self.defs.insert(def.widget_type.clone(), Arc::new(def))
    }

    /// Look up a definition.
    #[must_use]
    pub fn get(&self, widget_type: &str) -> Option<&Arc<WidgetDefinition>> {
        self.defs.get(widget_type)
    }

    /// Whether `widget_type` is registered.
    #[must_use]
    pub fn contains(&self, widget_type: &str) -> bool {
        self.defs.contains_key(widget_type)
    }

    /// Registered discriminators, sorted.
    #[must_use]
    pub fn widget_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.defs.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// New widget instance with registry defaults.
    #[must_use]
    pub fn create(&self, widget_type: &str) -> Option<PageElement> {
        self.get(widget_type).map(|d| d.instantiate())
    }

    /// Render a widget element. Unknown or missing discriminators render a
    /// visible placeholder instead of failing.
    #[must_use]
    pub fn render_widget(&self, el: &PageElement) -> String {
        match el.widget_type.as_deref().and_then(|t| self.get(t)) {
            Some(def) => def.render(el),
            None => format!(
                "<div class=\"pf-unknown-widget\" data-widget-type=\"{}\"></div>",
                escape_html(el.widget_type.as_deref().unwrap_or(""))
            ),
        }
    }
}

/// Minimal HTML escaping for text and attribute values.
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn text_of<'a>(map: &'a PropMap, key: &str) -> &'a str {
    map.get(key).and_then(PropValue::as_str).unwrap_or("")
}

fn builtin_widgets() -> Vec<WidgetDefinition> {
    vec![
        WidgetDefinition::new("heading", "Heading", |el| {
            let level = el
                .props
                .get("level")
                .and_then(PropValue::as_f64)
                .map_or(2, |l| l.clamp(1.0, 6.0) as u8);
            format!("<h{level}>{}</h{level}>", escape_html(text_of(&el.content, "text")))
        })
        .with_content(PropMap::new().with("text", "Heading"))
        .with_props(PropMap::new().with("level", 2i64))
        .with_field(EditorField::new("text", "Text", PropNamespace::Content, FieldControl::Text))
        .with_field(EditorField::new(
            "level",
            "Level",
            PropNamespace::Props,
            FieldControl::Number {
                min: Some(1.0),
                max: Some(6.0),
            },
        ))
        .with_field(EditorField::new("color", "Color", PropNamespace::Styles, FieldControl::Color)),
        WidgetDefinition::new("text", "Text", |el| {
            format!("<p>{}</p>", escape_html(text_of(&el.content, "text")))
        })
        .with_content(PropMap::new().with("text", "Lorem ipsum dolor sit amet."))
        .with_field(EditorField::new(
            "text",
            "Text",
            PropNamespace::Content,
            FieldControl::TextArea,
        )),
        WidgetDefinition::new("button", "Button", |el| {
            format!(
                "<a class=\"pf-button\" href=\"{}\">{}</a>",
                escape_html(text_of(&el.content, "url")),
                escape_html(text_of(&el.content, "label"))
            )
        })
        .with_content(PropMap::new().with("label", "Click me").with("url", "#"))
        .with_field(EditorField::new("label", "Label", PropNamespace::Content, FieldControl::Text))
        .with_field(EditorField::new("url", "Link", PropNamespace::Content, FieldControl::Text)),
        WidgetDefinition::new("image", "Image", |el| {
            format!(
                "<img src=\"{}\" alt=\"{}\">",
                escape_html(text_of(&el.content, "src")),
                escape_html(text_of(&el.content, "alt"))
            )
        })
        .with_content(PropMap::new().with("src", "").with("alt", ""))
        .with_field(EditorField::new("src", "Image", PropNamespace::Content, FieldControl::Media))
        .with_field(EditorField::new("alt", "Alt text", PropNamespace::Content, FieldControl::Text)),
        WidgetDefinition::new("spacer", "Spacer", |el| {
            let height = el.styles.get("height").and_then(PropValue::as_f64).unwrap_or(24.0);
            format!("<div class=\"pf-spacer\" style=\"height:{height}px\"></div>")
        })
        .with_styles(PropMap::new().with("height", 24i64))
        .with_field(EditorField::new(
            "height",
            "Height",
            PropNamespace::Styles,
            FieldControl::Number {
                min: Some(0.0),
                max: None,
            },
        )),
        WidgetDefinition::new("divider", "Divider", |_| "<hr>".to_owned()),
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_stock_widgets() {
        let reg = WidgetRegistry::with_builtin();
        assert_eq!(
            reg.widget_types(),
            ["button", "divider", "heading", "image", "spacer", "text"]
        );
    }

    #[test]
    fn create_applies_defaults() {
        let reg = WidgetRegistry::with_builtin();
        let h = reg.create("heading").unwrap();
        assert!(h.is_widget("heading"));
        assert_eq!(h.content.get("text").and_then(PropValue::as_str), Some("Heading"));
        assert!(reg.create("carousel").is_none());
    }

    #[test]
    fn render_escapes_content() {
        let reg = WidgetRegistry::with_builtin();
        let el = PageElement::widget("heading")
            .with_content("text", "<b>&</b>")
            .with_prop("level", 1i64);
        assert_eq!(reg.render_widget(&el), "<h1>&lt;b&gt;&amp;&lt;/b&gt;</h1>");
    }

    #[test]
    fn unknown_widget_renders_placeholder() {
        let reg = WidgetRegistry::new();
        let html = reg.render_widget(&PageElement::widget("map"));
        assert!(html.contains("data-widget-type=\"map\""));
    }

    #[test]
    fn register_replaces_definition() {
        let mut reg = WidgetRegistry::with_builtin();
        let old = reg.register(WidgetDefinition::new("divider", "Rule", |_| "<hr class=x>".into()));
        assert!(old.is_some());
        assert_eq!(reg.render_widget(&PageElement::widget("divider")), "<hr class=x>");
    }
}
