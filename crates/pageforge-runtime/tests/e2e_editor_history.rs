//! End-to-end tests for the editor funnel and undo history.
//!
//! Scenarios:
//! - Add a heading to a page, undo it, redo it.
//! - Nested update-by-id shares untouched subtrees and keeps snapshots
//!   independent.
//! - A preview in the same process follows every commit, undo, and redo.

use std::sync::Arc;

use pageforge_core::{ElementId, ElementPatch, ElementTree, PageElement, PropValue};
use pageforge_runtime::config::BuilderConfig;
use pageforge_runtime::editor::EditorShell;
use pageforge_runtime::preview::{MarkupRenderer, PreviewConsumer, PreviewSource};
use pageforge_runtime::relay::{EventBus, MemoryChannel, MemoryKeyValueStore, MemoryObjectStore, StorageRelay};
use pretty_assertions::assert_eq;

fn heading_text(tree: &ElementTree) -> Option<String> {
    tree.iter_all()
        .find(|el| el.is_widget("heading"))
        .and_then(|el| el.content.get("text").and_then(PropValue::as_str).map(str::to_owned))
}

#[test]
fn add_undo_redo_heading() {
    let mut editor = EditorShell::in_memory(BuilderConfig::default());
    editor
        .load_page(ElementTree::from_roots([PageElement::section().with_id("root")]))
        .unwrap();

    let heading = PageElement::widget("heading")
        .with_id("h1")
        .with_content("text", "Hello");
    let next = editor
        .elements()
        .insert(Some(&ElementId::new("root")), None, heading)
        .unwrap();
    let result = editor.update_elements(next, Some("Add heading")).unwrap();
    assert!(result.success);

    assert_eq!(editor.history().history_size(), 2);
    assert!(editor.history().can_undo());
    assert_eq!(editor.history().undo_description(), "Add heading");

    let step = editor.undo().unwrap();
    assert_eq!(heading_text(&step.elements), None);
    assert_eq!(heading_text(editor.elements()), None);
    assert_eq!(step.action, "Add heading");

    let step = editor.redo().unwrap();
    assert_eq!(heading_text(&step.elements).as_deref(), Some("Hello"));
    assert_eq!(heading_text(editor.elements()).as_deref(), Some("Hello"));
    assert!(!editor.history().can_redo());
    assert_eq!(editor.history().redo_description(), "Nothing to redo");
}

#[test]
fn nested_update_keeps_snapshots_independent() {
    let mut editor = EditorShell::in_memory(BuilderConfig::default());
    let page = ElementTree::from_roots([
        PageElement::section().with_id("s1").with_child(
            PageElement::column()
                .with_id("c1")
                .with_child(PageElement::widget("text").with_id("t1").with_content("text", "one")),
        ),
        PageElement::section().with_id("s2"),
    ]);
    editor.load_page(page.clone()).unwrap();

    editor
        .update_element(&ElementId::new("t1"), &ElementPatch::content("text", "two"))
        .unwrap();

    // Siblings and ancestors are preserved.
    let live = editor.elements();
    assert_eq!(live.find(&ElementId::new("s2")), page.find(&ElementId::new("s2")));
    let t1 = live.find(&ElementId::new("t1")).unwrap();
    assert_eq!(t1.content.get("text").and_then(PropValue::as_str), Some("two"));

    // Mutating what undo returned touches neither the live tree nor history.
    let mut step = editor.undo().unwrap();
    assert_eq!(step.elements, page);
    step.elements.roots_mut().clear();
    assert_eq!(editor.elements(), &page);
    assert_eq!(editor.history().current().elements, page);

    let redo = editor.redo().unwrap();
    let t1 = redo.elements.find(&ElementId::new("t1")).unwrap();
    assert_eq!(t1.content.get("text").and_then(PropValue::as_str), Some("two"));
}

#[test]
fn history_is_bounded_through_the_funnel() {
    let mut config = BuilderConfig::default();
    config.history.max_entries = 5;
    let mut editor = EditorShell::in_memory(config);
    for i in 0..10 {
        editor
            .add_element(None, None, PageElement::section().with_id(format!("s{i}")))
            .unwrap();
    }
    assert_eq!(editor.history().history_size(), 5);
    let mut undone = 0;
    while editor.undo().is_some() {
        undone += 1;
    }
    assert_eq!(undone, 4);
    assert_eq!(editor.elements().len(), 6);
}

#[test]
fn in_process_preview_follows_the_editor() {
    let config = BuilderConfig::default();
    let kv = Arc::new(MemoryKeyValueStore::with_quota(config.relay.quota_bytes));
    let objects = MemoryObjectStore::new();
    let memory = MemoryChannel::new();
    let bus = EventBus::new();

    let editor_relay =
        StorageRelay::standard(kv.clone(), Box::new(objects.clone()), memory.clone(), &config.relay);
    let mut editor = EditorShell::new(
        config.clone(),
        editor_relay,
        Arc::new(pageforge_core::WidgetRegistry::with_builtin()),
    )
    .with_bus(bus.clone());
    editor
        .add_element(None, None, PageElement::section().with_id("s"))
        .unwrap();

    let preview_relay = StorageRelay::standard(kv, Box::new(objects), memory, &config.relay);
    let mut preview = PreviewConsumer::new(&config, MarkupRenderer::builtin())
        .with_relay(preview_relay)
        .with_bus(&bus);
    preview.start();
    assert_eq!(
        preview.source(),
        Some(PreviewSource::Relay(pageforge_runtime::ChannelKind::KeyValue))
    );
    assert_eq!(preview.view().unwrap().elements.len(), 1);

    editor
        .add_element(None, None, PageElement::section().with_id("s2"))
        .unwrap();
    preview.poll();
    assert_eq!(preview.source(), Some(PreviewSource::Broadcast));
    assert_eq!(preview.view().unwrap().elements.len(), 2);

    editor.undo().unwrap();
    preview.poll();
    assert_eq!(preview.view().unwrap().elements.len(), 1);

    preview.teardown();
    assert_eq!(bus.listener_count(), 0);
}
