//! Render-Tree Adapter for the Block Compiler
//!
//! Blocks never touch a concrete tree directly; they go through this small
//! set of primitives over `markup5ever_rcdom` nodes. Event listeners are
//! kept in a per-thread registry keyed by node identity since rcdom nodes
//! carry no listener storage of their own.

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::{ElementFlags, TreeSink};
use html5ever::{parse_fragment, Attribute, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tendril::StrTendril;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// An event delivered to listeners attached with [`add_event_listener`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: String,
    pub detail: serde_json::Value,
}

impl Event {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            detail: serde_json::Value::Null,
        }
    }
}

pub type Listener = Rc<dyn Fn(&Event)>;

struct ListenerEntry {
    node: Weak<Node>,
    kind: String,
    callback: Listener,
}

thread_local! {
    static LISTENERS: RefCell<Vec<ListenerEntry>> = const { RefCell::new(Vec::new()) };
}

pub fn add_event_listener(node: &Handle, kind: &str, callback: Listener) {
    LISTENERS.with(|listeners| {
        let mut listeners = listeners.borrow_mut();
        listeners.retain(|entry| entry.node.strong_count() > 0);
        listeners.push(ListenerEntry {
            node: Rc::downgrade(node),
            kind: kind.to_string(),
            callback,
        });
    });
}

/// Invoke every listener of `node` registered for `event.kind`, returning
/// how many ran.
pub fn dispatch_event(node: &Handle, event: &Event) -> usize {
    // collected first so a listener may register or dispatch in turn
    let callbacks: Vec<Listener> = LISTENERS.with(|listeners| {
        listeners
            .borrow()
            .iter()
            .filter(|entry| entry.kind == event.kind)
            .filter(|entry| entry.node.upgrade().is_some_and(|n| Rc::ptr_eq(&n, node)))
            .map(|entry| entry.callback.clone())
            .collect()
    });
    for callback in &callbacks {
        callback(event);
    }
    callbacks.len()
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE CREATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn html_name(tag: &str) -> QualName {
    QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag))
}

fn attribute(name: &str, value: &str) -> Attribute {
    Attribute {
        name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
        value: StrTendril::from(value),
    }
}

pub fn create_element(tag: &str, attrs: &[(String, String)]) -> Handle {
    let attrs = attrs.iter().map(|(k, v)| attribute(k, v)).collect();
    let mut sink = RcDom::default();
    sink.create_element(html_name(tag), attrs, ElementFlags::default())
}

pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

pub fn create_comment(text: &str) -> Handle {
    Node::new(NodeData::Comment {
        contents: StrTendril::from(text),
    })
}

/// A detached element used to hold nodes while serializing or parsing.
pub fn create_container() -> Handle {
    create_element("div", &[])
}

/// Deep copy of a node and its subtree, detached from any parent.
pub fn clone_node(node: &Handle) -> Handle {
    let copy = match &node.data {
        NodeData::Element { name, attrs, .. } => {
            let mut sink = RcDom::default();
            sink.create_element(name.clone(), attrs.borrow().clone(), ElementFlags::default())
        }
        NodeData::Text { contents } => create_text(&contents.borrow()),
        NodeData::Comment { contents } => create_comment(contents),
        NodeData::Document => Node::new(NodeData::Document),
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => Node::new(NodeData::Doctype {
            name: name.clone(),
            public_id: public_id.clone(),
            system_id: system_id.clone(),
        }),
        NodeData::ProcessingInstruction { target, contents } => {
            Node::new(NodeData::ProcessingInstruction {
                target: target.clone(),
                contents: contents.clone(),
            })
        }
    };
    for child in node.children.borrow().iter() {
        append_child(&copy, &clone_node(child));
    }
    copy
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE STRUCTURE
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parent(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

fn index_in_parent(parent: &Handle, node: &Handle) -> Option<usize> {
    parent
        .children
        .borrow()
        .iter()
        .position(|child| Rc::ptr_eq(child, node))
}

pub fn first_child(node: &Handle) -> Option<Handle> {
    node.children.borrow().first().cloned()
}

pub fn next_sibling(node: &Handle) -> Option<Handle> {
    let parent = parent(node)?;
    let index = index_in_parent(&parent, node)?;
    let sibling = parent.children.borrow().get(index + 1).cloned();
    sibling
}

pub fn children(node: &Handle) -> Vec<Handle> {
    node.children.borrow().clone()
}

/// Detach `node` from its parent, if it has one.
pub fn remove_node(node: &Handle) {
    if let Some(parent) = parent(node) {
        if let Some(index) = index_in_parent(&parent, node) {
            parent.children.borrow_mut().remove(index);
        }
    }
    node.parent.set(None);
}

pub fn append_child(parent: &Handle, node: &Handle) {
    remove_node(node);
    node.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(node.clone());
}

/// Insert `node` right before `anchor`. An anchor without a parent is a
/// caller bug; the insertion is skipped and logged.
pub fn insert_before(anchor: &Handle, node: &Handle) {
    remove_node(node);
    let Some(parent) = parent(anchor) else {
        log::error!("insert_before called with a detached anchor");
        return;
    };
    let Some(index) = index_in_parent(&parent, anchor) else {
        log::error!("anchor is not among its parent's children");
        return;
    };
    node.parent.set(Some(Rc::downgrade(&parent)));
    parent.children.borrow_mut().insert(index, node.clone());
}

/// Replace `old` with `new` in `old`'s parent.
pub fn replace_node(old: &Handle, new: &Handle) {
    insert_before(old, new);
    remove_node(old);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTENT AND ATTRIBUTES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn tag_name(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

/// Set the text of a text node, or replace an element's children with a
/// single text node.
pub fn set_text_content(node: &Handle, text: &str) {
    match &node.data {
        NodeData::Text { contents } => {
            *contents.borrow_mut() = StrTendril::from(text);
        }
        NodeData::Element { .. } => {
            for child in children(node) {
                remove_node(&child);
            }
            if !text.is_empty() {
                append_child(node, &create_text(text));
            }
        }
        _ => {}
    }
}

pub fn text_content(node: &Handle) -> String {
    match &node.data {
        NodeData::Text { contents } => contents.borrow().to_string(),
        NodeData::Comment { .. } | NodeData::ProcessingInstruction { .. } => String::new(),
        _ => node.children.borrow().iter().map(text_content).collect(),
    }
}

pub fn get_attribute(node: &Handle, name: &str) -> Option<String> {
    let NodeData::Element { attrs, .. } = &node.data else {
        return None;
    };
    let value = attrs
        .borrow()
        .iter()
        .find(|attr| &*attr.name.local == name)
        .map(|attr| attr.value.to_string());
    value
}

pub fn set_attribute(node: &Handle, name: &str, value: &str) {
    let NodeData::Element { attrs, .. } = &node.data else {
        return;
    };
    let mut attrs = attrs.borrow_mut();
    match attrs.iter_mut().find(|attr| &*attr.name.local == name) {
        Some(attr) => attr.value = StrTendril::from(value),
        None => attrs.push(attribute(name, value)),
    }
}

pub fn remove_attribute(node: &Handle, name: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        attrs.borrow_mut().retain(|attr| &*attr.name.local != name);
    }
}

pub fn add_class(node: &Handle, class: &str) {
    let current = get_attribute(node, "class").unwrap_or_default();
    if current.split_whitespace().any(|c| c == class) {
        return;
    }
    let updated = if current.trim().is_empty() {
        class.to_string()
    } else {
        format!("{} {}", current.trim_end(), class)
    };
    set_attribute(node, "class", &updated);
}

pub fn remove_class(node: &Handle, class: &str) {
    let Some(current) = get_attribute(node, "class") else {
        return;
    };
    let remaining: Vec<&str> = current.split_whitespace().filter(|c| *c != class).collect();
    if remaining.is_empty() {
        remove_attribute(node, "class");
    } else {
        set_attribute(node, "class", &remaining.join(" "));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP
// ═══════════════════════════════════════════════════════════════════════════════

/// Serialize the children of `node` as HTML.
pub fn inner_html(node: &Handle) -> String {
    let mut bytes = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
        ..Default::default()
    };
    if let Err(e) = serialize(&mut bytes, &handle, opts) {
        log::error!("failed to serialize render tree: {}", e);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Serialize `node` itself, including its own tag.
pub fn outer_html(node: &Handle) -> String {
    let container = create_container();
    append_child(&container, &clone_node(node));
    inner_html(&container)
}

/// Parse an HTML fragment into detached sibling nodes.
pub fn parse_html(markup: &str) -> Vec<Handle> {
    let dom = parse_fragment(
        RcDom::default(),
        ParseOpts::default(),
        html_name("body"),
        vec![],
    )
    .one(markup);
    let Some(root) = first_element(&dom.document) else {
        return vec![];
    };
    let nodes = children(&root);
    for node in &nodes {
        remove_node(node);
    }
    nodes
}

/// First element child of `node`.
pub fn first_element(node: &Handle) -> Option<Handle> {
    let found = node
        .children
        .borrow()
        .iter()
        .find(|child| matches!(child.data, NodeData::Element { .. }))
        .cloned();
    found
}

/// Find the first descendant element with the given tag, in document order.
pub fn find_element(node: &Handle, tag: &str) -> Option<Handle> {
    for child in node.children.borrow().iter() {
        if tag_name(child).as_deref() == Some(tag) {
            return Some(child.clone());
        }
        if let Some(found) = find_element(child, tag) {
            return Some(found);
        }
    }
    None
}
