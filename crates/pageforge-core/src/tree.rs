#![forbid(unsafe_code)]

//! Copy-on-write tree operations.
//!
//! Every operation takes `&self` and returns a new [`ElementTree`]; the input
//! is never mutated. Because children live in persistent vectors, the new
//! tree shares all untouched subtrees with the old one and only the nodes on
//! the path from the root to the edited node are copied.
//!
//! # Invariants checked by [`ElementTree::validate`]
//!
//! 1. Ids are unique across the whole tree.
//! 2. Widgets carry a `widget_type`; other kinds do not.
//! 3. Widgets have no children.

use std::collections::HashSet;
use std::fmt;

use im::Vector;

use crate::element::{ElementTree, PageElement};
use crate::id::ElementId;

/// Errors from tree edits and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// No element with this id exists.
    NotFound(ElementId),
    /// An id appears more than once.
    DuplicateId(ElementId),
    /// The target parent cannot hold children.
    InvalidParent(ElementId),
    /// A widget node lacks its discriminator.
    MissingWidgetType(ElementId),
    /// A non-widget node carries a widget discriminator.
    UnexpectedWidgetType(ElementId),
    /// Moving a node into its own subtree.
    CycleMove(ElementId),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "element not found: {id}"),
            Self::DuplicateId(id) => write!(f, "duplicate element id: {id}"),
            Self::InvalidParent(id) => write!(f, "element cannot hold children: {id}"),
            Self::MissingWidgetType(id) => write!(f, "widget without widgetType: {id}"),
            Self::UnexpectedWidgetType(id) => {
                write!(f, "widgetType set on non-widget element: {id}")
            }
            Self::CycleMove(id) => write!(f, "cannot move element into its own subtree: {id}"),
        }
    }
}

impl std::error::Error for TreeError {}

/// A partial update applied by [`ElementTree::update`].
///
/// Map fields are merged key by key into the existing maps; `children`, when
/// present, replaces the child list wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPatch {
    /// New widget discriminator (widgets only).
    pub widget_type: Option<String>,
    /// Content keys to set.
    pub content: Option<crate::element::PropMap>,
    /// Style keys to set.
    pub styles: Option<crate::element::PropMap>,
    /// Prop keys to set.
    pub props: Option<crate::element::PropMap>,
    /// Replacement children.
    pub children: Option<Vector<PageElement>>,
}

impl ElementPatch {
    /// Patch that sets a single content key.
    #[must_use]
    pub fn content(key: &str, value: impl Into<crate::element::PropValue>) -> Self {
        Self {
            content: Some(crate::element::PropMap::new().with(key, value)),
            ..Self::default()
        }
    }

    /// Patch that sets a single style key.
    #[must_use]
    pub fn style(key: &str, value: impl Into<crate::element::PropValue>) -> Self {
        Self {
            styles: Some(crate::element::PropMap::new().with(key, value)),
            ..Self::default()
        }
    }

    /// Patch that sets a single prop key.
    #[must_use]
    pub fn prop(key: &str, value: impl Into<crate::element::PropValue>) -> Self {
        Self {
            props: Some(crate::element::PropMap::new().with(key, value)),
            ..Self::default()
        }
    }

    fn apply(&self, el: &mut PageElement) {
        if let Some(wt) = &self.widget_type {
            el.widget_type = Some(wt.clone());
        }
        if let Some(c) = &self.content {
            el.content = el.content.merged(c);
        }
        if let Some(s) = &self.styles {
            el.styles = el.styles.merged(s);
        }
        if let Some(p) = &self.props {
            el.props = el.props.merged(p);
        }
        if let Some(children) = &self.children {
            el.children = children.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn find_path(nodes: &Vector<PageElement>, id: &ElementId, path: &mut Vec<usize>) -> bool {
    for (i, node) in nodes.iter().enumerate() {
        path.push(i);
        if &node.id == id || find_path(&node.children, id, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn node_at<'a>(roots: &'a Vector<PageElement>, path: &[usize]) -> Option<&'a PageElement> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.get(*first)?;
    for &i in rest {
        node = node.children.get(i)?;
    }
    Some(node)
}

fn node_at_mut<'a>(roots: &'a mut Vector<PageElement>, path: &[usize]) -> Option<&'a mut PageElement> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.get_mut(*first)?;
    for &i in rest {
        node = node.children.get_mut(i)?;
    }
    Some(node)
}

impl ElementTree {
    /// Index path from the root sequence to `id`.
    #[must_use]
    pub fn path_to(&self, id: &ElementId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        find_path(self.roots(), id, &mut path).then_some(path)
    }

    /// Find an element anywhere in the tree.
    #[must_use]
    pub fn find(&self, id: &ElementId) -> Option<&PageElement> {
        node_at(self.roots(), &self.path_to(id)?)
    }

    /// Whether an element with `id` exists.
    #[must_use]
    pub fn contains(&self, id: &ElementId) -> bool {
        self.path_to(id).is_some()
    }

    /// Id of the parent of `id`; `Some(None)` for a root element.
    #[must_use]
    pub fn parent_of(&self, id: &ElementId) -> Option<Option<ElementId>> {
        let mut path = self.path_to(id)?;
        path.pop();
        if path.is_empty() {
            return Some(None);
        }
        node_at(self.roots(), &path).map(|p| Some(p.id.clone()))
    }

    /// Apply `f` to the element `id`, copying only the path to it.
    ///
    /// Fails with [`TreeError::DuplicateId`] when `f` leaves an id that is
    /// already used elsewhere (a renamed node or replacement children).
    pub fn update_with(
        &self,
        id: &ElementId,
        f: impl FnOnce(&mut PageElement),
    ) -> Result<ElementTree, TreeError> {
        let path = self.path_to(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;
        let mut next = self.clone();
        let node = node_at_mut(next.roots_mut(), &path)
            .ok_or_else(|| TreeError::NotFound(id.clone()))?;
        f(node);
        next.ensure_unique_ids()?;
        Ok(next)
    }

    /// Apply a partial update to element `id`.
    pub fn update(&self, id: &ElementId, patch: &ElementPatch) -> Result<ElementTree, TreeError> {
        self.update_with(id, |el| patch.apply(el))
    }

    /// Insert `element` under `parent` (or at root level) at `index`.
    ///
    /// `None` appends; an index past the end is clamped.
    pub fn insert(
        &self,
        parent: Option<&ElementId>,
        index: Option<usize>,
        element: PageElement,
    ) -> Result<ElementTree, TreeError> {
        let existing = self.id_set();
        for node in element.descendants() {
            if existing.contains(&node.id) {
                return Err(TreeError::DuplicateId(node.id.clone()));
            }
        }

        let mut next = self.clone();
        let siblings = match parent {
            None => next.roots_mut(),
            Some(pid) => {
                let path = self.path_to(pid).ok_or_else(|| TreeError::NotFound(pid.clone()))?;
                let node = node_at_mut(next.roots_mut(), &path)
                    .ok_or_else(|| TreeError::NotFound(pid.clone()))?;
                if !node.kind.is_container() {
                    return Err(TreeError::InvalidParent(pid.clone()));
                }
                &mut node.children
            }
        };
        let at = index.map_or(siblings.len(), |i| i.min(siblings.len()));
        siblings.insert(at, element);
        Ok(next)
    }

    /// Remove element `id`, returning the new tree and the removed subtree.
    pub fn remove(&self, id: &ElementId) -> Result<(ElementTree, PageElement), TreeError> {
        let mut path = self.path_to(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;
        let Some(last) = path.pop() else {
            return Err(TreeError::NotFound(id.clone()));
        };
        let mut next = self.clone();
        let siblings = if path.is_empty() {
            next.roots_mut()
        } else {
            &mut node_at_mut(next.roots_mut(), &path)
                .ok_or_else(|| TreeError::NotFound(id.clone()))?
                .children
        };
        let removed = siblings.remove(last);
        Ok((next, removed))
    }

    /// Move element `id` under `new_parent` at `index`.
    ///
    /// Reordering within the same parent is a move to the same parent. The
    /// index refers to the sibling list after `id` has been taken out.
    pub fn move_to(
        &self,
        id: &ElementId,
        new_parent: Option<&ElementId>,
        index: Option<usize>,
    ) -> Result<ElementTree, TreeError> {
        if let Some(pid) = new_parent {
            let moving = self.find(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;
            if moving.descendants().any(|n| &n.id == pid) {
                return Err(TreeError::CycleMove(id.clone()));
            }
        }
        let (without, node) = self.remove(id)?;
        without.insert(new_parent, index, node)
    }

    /// Deep-copy element `id` with fresh ids and insert it right after the
    /// original. Returns the new tree and the id of the copy.
    pub fn duplicate(&self, id: &ElementId) -> Result<(ElementTree, ElementId), TreeError> {
        let original = self.find(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;
        let copy = reassign_ids(original);
        let copy_id = copy.id.clone();

        let mut path = self.path_to(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;
        let index = path.pop().map(|i| i + 1);
        let parent = self.parent_of(id).flatten();
        let next = self.insert(parent.as_ref(), index, copy)?;
        Ok((next, copy_id))
    }

    /// All ids in the tree.
    #[must_use]
    pub fn id_set(&self) -> HashSet<ElementId> {
        self.iter_all().map(|n| n.id.clone()).collect()
    }

    fn ensure_unique_ids(&self) -> Result<(), TreeError> {
        let mut seen = HashSet::new();
        match self.iter_all().find(|node| !seen.insert(&node.id)) {
            Some(node) => Err(TreeError::DuplicateId(node.id.clone())),
            None => Ok(()),
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), TreeError> {
        let mut seen = HashSet::new();
        for node in self.iter_all() {
            if !seen.insert(&node.id) {
                return Err(TreeError::DuplicateId(node.id.clone()));
            }
            match (node.kind.is_container(), node.widget_type.is_some()) {
                (false, false) => return Err(TreeError::MissingWidgetType(node.id.clone())),
                (true, true) => return Err(TreeError::UnexpectedWidgetType(node.id.clone())),
                _ => {}
            }
            if !node.kind.is_container() && !node.children.is_empty() {
                return Err(TreeError::InvalidParent(node.id.clone()));
            }
        }
        Ok(())
    }
}

fn reassign_ids(el: &PageElement) -> PageElement {
    let prefix = el.widget_type.as_deref().unwrap_or(el.kind.as_str());
    let mut copy = el.clone();
    copy.id = ElementId::generate(prefix);
    copy.children = el.children.iter().map(reassign_ids).collect();
    copy
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::PropValue;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> ElementId {
        ElementId::new(s)
    }

    fn page() -> ElementTree {
        ElementTree::from_roots([
            PageElement::section().with_id("s1").with_child(
                PageElement::column()
                    .with_id("c1")
                    .with_child(PageElement::widget("heading").with_id("h1").with_content("text", "Hi"))
                    .with_child(PageElement::widget("text").with_id("t1")),
            ),
            PageElement::section().with_id("s2"),
        ])
    }

    #[test]
    fn find_nested() {
        let tree = page();
        assert_eq!(tree.find(&id("t1")).map(|e| e.kind), Some(crate::ElementKind::Widget));
        assert!(tree.find(&id("nope")).is_none());
        assert_eq!(tree.path_to(&id("t1")), Some(vec![0, 0, 1]));
    }

    #[test]
    fn parent_of_root_and_nested() {
        let tree = page();
        assert_eq!(tree.parent_of(&id("s2")), Some(None));
        assert_eq!(tree.parent_of(&id("h1")), Some(Some(id("c1"))));
        assert_eq!(tree.parent_of(&id("zz")), None);
    }

    #[test]
    fn update_leaves_original_untouched() {
        let tree = page();
        let next = tree.update(&id("h1"), &ElementPatch::content("text", "Bye")).unwrap();
        assert_eq!(
            tree.find(&id("h1")).unwrap().content.get("text").and_then(PropValue::as_str),
            Some("Hi")
        );
        assert_eq!(
            next.find(&id("h1")).unwrap().content.get("text").and_then(PropValue::as_str),
            Some("Bye")
        );
        // Sibling section is structurally unchanged.
        assert_eq!(tree.roots()[1], next.roots()[1]);
    }

    #[test]
    fn update_missing_is_not_found() {
        let err = page().update(&id("x"), &ElementPatch::default()).unwrap_err();
        assert_eq!(err, TreeError::NotFound(id("x")));
    }

    #[test]
    fn update_rejects_ids_already_in_use() {
        let tree = page();
        let patch = ElementPatch {
            children: Some(
                [PageElement::widget("text").with_id("h1")]
                    .into_iter()
                    .collect(),
            ),
            ..ElementPatch::default()
        };
        assert_eq!(tree.update(&id("s2"), &patch), Err(TreeError::DuplicateId(id("h1"))));

        let renamed = tree.update_with(&id("t1"), |el| el.id = id("s2"));
        assert_eq!(renamed, Err(TreeError::DuplicateId(id("s2"))));

        // Replacing children with fresh ids is fine.
        let patch = ElementPatch {
            children: Some([PageElement::column().with_id("c2")].into_iter().collect()),
            ..ElementPatch::default()
        };
        let next = tree.update(&id("s2"), &patch).unwrap();
        next.validate().unwrap();
    }

    #[test]
    fn insert_appends_and_clamps() {
        let tree = page();
        let next = tree
            .insert(Some(&id("c1")), Some(99), PageElement::widget("button").with_id("b1"))
            .unwrap();
        assert_eq!(next.path_to(&id("b1")), Some(vec![0, 0, 2]));

        let next = tree.insert(None, Some(0), PageElement::section().with_id("s0")).unwrap();
        assert_eq!(next.roots()[0].id, id("s0"));
    }

    #[test]
    fn insert_rejects_duplicate_and_widget_parent() {
        let tree = page();
        assert_eq!(
            tree.insert(None, None, PageElement::section().with_id("h1")),
            Err(TreeError::DuplicateId(id("h1")))
        );
        assert_eq!(
            tree.insert(Some(&id("h1")), None, PageElement::widget("text")),
            Err(TreeError::InvalidParent(id("h1")))
        );
    }

    #[test]
    fn remove_returns_subtree() {
        let (next, removed) = page().remove(&id("c1")).unwrap();
        assert_eq!(removed.children.len(), 2);
        assert!(!next.contains(&id("h1")));
        assert_eq!(next.node_count(), 2);
    }

    #[test]
    fn move_reorders_within_parent() {
        let next = page().move_to(&id("t1"), Some(&id("c1")), Some(0)).unwrap();
        let order: Vec<_> = next.roots()[0].children[0]
            .children
            .iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(order, ["t1", "h1"]);
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        assert_eq!(
            page().move_to(&id("s1"), Some(&id("c1")), None),
            Err(TreeError::CycleMove(id("s1")))
        );
    }

    #[test]
    fn duplicate_assigns_fresh_ids() {
        let tree = page();
        let (next, copy_id) = tree.duplicate(&id("c1")).unwrap();
        assert_ne!(copy_id, id("c1"));
        assert_eq!(next.path_to(&copy_id), Some(vec![0, 1]));
        assert_eq!(next.node_count(), tree.node_count() + 3);
        next.validate().unwrap();
    }

    #[test]
    fn validate_detects_violations() {
        page().validate().unwrap();

        let dup = ElementTree::from_roots([
            PageElement::section().with_id("a"),
            PageElement::section().with_id("a"),
        ]);
        assert_eq!(dup.validate(), Err(TreeError::DuplicateId(id("a"))));

        let mut bare = PageElement::widget("text").with_id("w");
        bare.widget_type = None;
        assert_eq!(
            ElementTree::from_roots([bare]).validate(),
            Err(TreeError::MissingWidgetType(id("w")))
        );
    }
}
