#![forbid(unsafe_code)]

//! The page element tree.
//!
//! A page is an ordered sequence of root [`PageElement`]s. Each element owns
//! its children exclusively and carries three orthogonal property maps:
//!
//! - `content`: data shown to the visitor (text, image source, link target)
//! - `styles`: presentation (colors, spacing, typography)
//! - `props`: structural/behavioral configuration (column width, tag, gap)
//!
//! # Structural sharing
//!
//! Children and property maps use persistent collections from [`im`]. Cloning
//! an element or a whole [`ElementTree`] is O(1) and shares every node; a
//! later mutation of either copy rewrites only the path it touches. A clone
//! handed out by the history is therefore independent of the live tree
//! without a deep copy.
//!
//! # Non-serializable values
//!
//! A live editor can attach host callbacks ([`PropValue::Callback`]) or host
//! handles ([`PropValue::HostRef`]) to an element. These never cross a
//! serialization boundary: serializing a [`PropMap`] omits them, and
//! [`sanitize`](crate::sanitize) strips them from the tree.

use std::fmt;
use std::sync::Arc;

use im::{OrdMap, Vector};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::id::ElementId;

// ---------------------------------------------------------------------------
// Element kinds
// ---------------------------------------------------------------------------

/// Closed set of structural node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementKind {
    /// Full-width page band; the usual root node.
    Section,
    /// Column inside a section.
    Column,
    /// Leaf content node; its concrete kind is the `widget_type` discriminator.
    Widget,
    /// Flexbox container holding widgets or nested containers.
    FlexContainer,
}

impl ElementKind {
    /// Stable wire name (`"section"`, `"flex-container"`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Column => "column",
            Self::Widget => "widget",
            Self::FlexContainer => "flex-container",
        }
    }

    /// Whether nodes of this kind may hold children.
    #[must_use]
    pub const fn is_container(self) -> bool {
        !matches!(self, Self::Widget)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Property values
// ---------------------------------------------------------------------------

/// A host function attached to an element (event handler, computed value).
///
/// Callbacks compare by identity and are never serialized.
#[derive(Clone)]
pub struct Callback {
    name: Arc<str>,
    func: Arc<dyn Fn(&PageElement) + Send + Sync>,
}

impl Callback {
    /// Wrap a host function under a diagnostic name.
    pub fn new(name: &str, func: impl Fn(&PageElement) + Send + Sync + 'static) -> Self {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the callback for `element`.
    pub fn call(&self, element: &PageElement) {
        (self.func)(element);
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.name)
    }
}

/// Opaque handle to a host object (a DOM node, a canvas, a media element).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRef {
    /// Host object kind, e.g. `"HTMLDivElement"`.
    pub kind: Arc<str>,
    /// Host-assigned handle.
    pub handle: u64,
}

impl HostRef {
    /// Create a host handle.
    #[must_use]
    pub fn new(kind: &str, handle: u64) -> Self {
        Self {
            kind: Arc::from(kind),
            handle,
        }
    }
}

/// A value stored in `content`, `styles`, or `props`.
#[derive(Clone, PartialEq)]
pub enum PropValue {
    /// JSON `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (integer or float), JSON semantics.
    Number(serde_json::Number),
    /// String.
    String(String),
    /// Ordered list of values.
    Array(Vector<PropValue>),
    /// Nested string-keyed object.
    Object(PropMap),
    /// Host callback. Not serializable.
    Callback(Callback),
    /// Host object handle. Not serializable.
    HostRef(HostRef),
}

impl PropValue {
    /// Whether this value may cross a serialization boundary as-is.
    ///
    /// Containers are serializable even when they hold opaque values; those
    /// inner values are dropped on the way out.
    #[must_use]
    pub fn is_serializable(&self) -> bool {
        !matches!(self, Self::Callback(_) | Self::HostRef(_))
    }

    /// Whether this value or anything nested inside it is non-serializable.
    #[must_use]
    pub fn contains_opaque(&self) -> bool {
        match self {
            Self::Callback(_) | Self::HostRef(_) => true,
            Self::Array(items) => items.iter().any(Self::contains_opaque),
            Self::Object(map) => map.contains_opaque(),
            _ => false,
        }
    }

    /// Convert to a JSON value, omitting non-serializable values.
    ///
    /// Returns `None` if `self` is itself non-serializable.
    #[must_use]
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        Some(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().filter_map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(map.to_json()),
            Self::Callback(_) | Self::HostRef(_) => return None,
        })
    }

    /// Borrow as a string slice if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as `f64` if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Read as `bool` if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Object(map) => map.fmt(f),
            Self::Callback(cb) => cb.fmt(f),
            Self::HostRef(r) => r.fmt(f),
        }
    }
}

impl From<serde_json::Value> for PropValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(PropMap::from_json(map)),
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for PropValue {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<PropMap> for PropValue {
    fn from(map: PropMap) -> Self {
        Self::Object(map)
    }
}

impl From<Callback> for PropValue {
    fn from(cb: Callback) -> Self {
        Self::Callback(cb)
    }
}

impl From<HostRef> for PropValue {
    fn from(r: HostRef) -> Self {
        Self::HostRef(r)
    }
}

impl Serialize for PropValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null | Self::Callback(_) | Self::HostRef(_) => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let kept: Vec<&PropValue> = items.iter().filter(|v| v.is_serializable()).collect();
                let mut seq = serializer.serialize_seq(Some(kept.len()))?;
                for item in kept {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PropValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

// ---------------------------------------------------------------------------
// Property maps
// ---------------------------------------------------------------------------

/// Ordered string-keyed map of [`PropValue`]s with structural sharing.
#[derive(Clone, Default, PartialEq)]
pub struct PropMap(OrdMap<String, PropValue>);

impl PropMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Option<PropValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a key.
    pub fn remove(&mut self, key: &str) -> Option<PropValue> {
        self.0.remove(key)
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.0.get(key)
    }

    /// Number of entries, including non-serializable ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropValue)> {
        self.0.iter()
    }

    /// Shallow merge: keys from `other` overwrite keys in `self`.
    #[must_use]
    pub fn merged(&self, other: &PropMap) -> PropMap {
        PropMap(other.0.clone().union(self.0.clone()))
    }

    /// Whether any value (at any depth) is non-serializable.
    #[must_use]
    pub fn contains_opaque(&self) -> bool {
        self.0.values().any(PropValue::contains_opaque)
    }

    /// Convert to a JSON object, omitting non-serializable values.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
            .collect()
    }

    /// Build from a JSON object.
    #[must_use]
    pub fn from_json(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(
            map.into_iter()
                .map(|(k, v)| (k, PropValue::from(v)))
                .collect(),
        )
    }

    pub(crate) fn retain_serializable(&self) -> PropMap {
        PropMap(
            self.0
                .iter()
                .filter_map(|(k, v)| strip_opaque(v).map(|v| (k.clone(), v)))
                .collect(),
        )
    }
}

/// Recursively drop non-serializable values. `None` if `value` itself is opaque.
pub(crate) fn strip_opaque(value: &PropValue) -> Option<PropValue> {
    match value {
        PropValue::Callback(_) | PropValue::HostRef(_) => None,
        PropValue::Array(items) => Some(PropValue::Array(
            items.iter().filter_map(strip_opaque).collect(),
        )),
        PropValue::Object(map) => Some(PropValue::Object(map.retain_serializable())),
        other => Some(other.clone()),
    }
}

impl fmt::Debug for PropMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<PropValue>> FromIterator<(K, V)> for PropMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Serialize for PropMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kept: Vec<(&String, &PropValue)> =
            self.0.iter().filter(|(_, v)| v.is_serializable()).collect();
        let mut map = serializer.serialize_map(Some(kept.len()))?;
        for (k, v) in kept {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PropMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Map::<String, serde_json::Value>::deserialize(deserializer).map(Self::from_json)
    }
}

// ---------------------------------------------------------------------------
// Elements
// ---------------------------------------------------------------------------

/// A node in the page element tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    /// Unique, stable identifier.
    pub id: ElementId,
    /// Structural node type.
    #[serde(rename = "type")]
    pub kind: ElementKind,
    /// Widget discriminator; present only for [`ElementKind::Widget`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<String>,
    /// Owned children in render order.
    #[serde(default)]
    pub children: Vector<PageElement>,
    /// Data shown to the visitor.
    #[serde(default)]
    pub content: PropMap,
    /// Presentation.
    #[serde(default)]
    pub styles: PropMap,
    /// Structural/behavioral configuration.
    #[serde(default)]
    pub props: PropMap,
}

impl PageElement {
    /// Create a node of `kind` with a freshly generated id.
    #[must_use]
    pub fn new(kind: ElementKind) -> Self {
        Self {
            id: ElementId::generate(kind.as_str()),
            kind,
            widget_type: None,
            children: Vector::new(),
            content: PropMap::new(),
            styles: PropMap::new(),
            props: PropMap::new(),
        }
    }

    /// New section.
    #[must_use]
    pub fn section() -> Self {
        Self::new(ElementKind::Section)
    }

    /// New column.
    #[must_use]
    pub fn column() -> Self {
        Self::new(ElementKind::Column)
    }

    /// New flex container.
    #[must_use]
    pub fn flex_container() -> Self {
        Self::new(ElementKind::FlexContainer)
    }

    /// New widget of the given discriminator (`"heading"`, `"image"`, ...).
    #[must_use]
    pub fn widget(widget_type: &str) -> Self {
        let mut el = Self::new(ElementKind::Widget);
        el.id = ElementId::generate(widget_type);
        el.widget_type = Some(widget_type.to_owned());
        el
    }

    /// Replace the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ElementId>) -> Self {
        self.id = id.into();
        self
    }

    /// Append a child.
    #[must_use]
    pub fn with_child(mut self, child: PageElement) -> Self {
        self.children.push_back(child);
        self
    }

    /// Set a content value.
    #[must_use]
    pub fn with_content(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.content.insert(key, value);
        self
    }

    /// Set a style value.
    #[must_use]
    pub fn with_style(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.styles.insert(key, value);
        self
    }

    /// Set a prop value.
    #[must_use]
    pub fn with_prop(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.props.insert(key, value);
        self
    }

    /// Whether this node is a widget of the given discriminator.
    #[must_use]
    pub fn is_widget(&self, widget_type: &str) -> bool {
        self.kind == ElementKind::Widget && self.widget_type.as_deref() == Some(widget_type)
    }

    /// Depth-first pre-order iterator over this node and its descendants.
    pub fn descendants(&self) -> impl Iterator<Item = &PageElement> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}

/// The ordered root-level element sequence of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementTree(Vector<PageElement>);

impl ElementTree {
    /// Empty page.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from root elements.
    #[must_use]
    pub fn from_roots(roots: impl IntoIterator<Item = PageElement>) -> Self {
        Self(roots.into_iter().collect())
    }

    /// Root elements in render order.
    #[must_use]
    pub fn roots(&self) -> &Vector<PageElement> {
        &self.0
    }

    /// Mutable access to the root sequence. Copy-on-write if shared.
    pub fn roots_mut(&mut self) -> &mut Vector<PageElement> {
        &mut self.0
    }

    /// Number of root elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the page has no root elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Depth-first pre-order iterator over every node of the page.
    pub fn iter_all(&self) -> impl Iterator<Item = &PageElement> {
        self.0.iter().flat_map(PageElement::descendants)
    }

    /// Total node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.iter_all().count()
    }
}

impl From<Vector<PageElement>> for ElementTree {
    fn from(v: Vector<PageElement>) -> Self {
        Self(v)
    }
}

impl FromIterator<PageElement> for ElementTree {
    fn from_iter<I: IntoIterator<Item = PageElement>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
