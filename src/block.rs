//! Block Module for the Block Compiler
//!
//! The five block variants a render function produces. A block is built with
//! its data already known, mounted once, then patched against freshly built
//! blocks of the same shape or removed. Nothing is ever read back from the
//! render tree except through the nodes a block created itself.

use markup5ever_rcdom::Handle;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::codegen::{StaticFragment, UpdateOp};
use crate::dom::{self, Event};
use crate::eval::{is_truthy, to_display_string};

/// Event handler stored in a block's handler slot.
pub type Handler = Rc<dyn Fn(&Event)>;

#[derive(Debug)]
pub enum Block {
    Static(StaticContentBlock),
    Multi(MultiBlock),
    Collection(CollectionBlock),
    Text(TextBlock),
    Raw(RawFragmentBlock),
}

impl Block {
    /// Mount as the last children of `parent`.
    pub fn mount(&mut self, parent: &Handle) {
        let anchor = dom::create_text("");
        dom::append_child(parent, &anchor);
        self.mount_before(&anchor);
        dom::remove_node(&anchor);
    }

    pub fn mount_before(&mut self, anchor: &Handle) {
        match self {
            Block::Static(block) => block.mount_before(anchor),
            Block::Multi(block) => block.mount_before(anchor),
            Block::Collection(block) => block.mount_before(anchor),
            Block::Text(block) => block.mount_before(anchor),
            Block::Raw(block) => block.mount_before(anchor),
        }
    }

    /// Bring the mounted tree in line with `next`. Blocks of another shape
    /// (variant, fragment or slot count) replace this one in place.
    pub fn patch(&mut self, next: Block) {
        let next = match (&mut *self, next) {
            (Block::Static(old), Block::Static(new)) if Rc::ptr_eq(&old.fragment, &new.fragment) => {
                return old.patch(new);
            }
            (Block::Multi(old), Block::Multi(new)) if old.children.len() == new.children.len() => {
                return old.patch(new);
            }
            (Block::Collection(old), Block::Collection(new)) => return old.patch(new),
            (Block::Text(old), Block::Text(new)) => return old.patch(new),
            (Block::Raw(old), Block::Raw(new)) => return old.patch(new),
            (_, next) => next,
        };
        self.replace(next);
    }

    fn replace(&mut self, mut next: Block) {
        match self.first_node() {
            Some(first) => next.mount_before(&first),
            None => log::error!("cannot replace a block that is not mounted"),
        }
        self.remove();
        *self = next;
    }

    pub fn remove(&mut self) {
        match self {
            Block::Static(block) => block.remove(),
            Block::Multi(block) => block.remove(),
            Block::Collection(block) => block.remove(),
            Block::Text(block) => block.remove(),
            Block::Raw(block) => block.remove(),
        }
    }

    /// Top-level nodes owned by the block, in tree order.
    pub fn nodes(&self) -> Vec<Handle> {
        match self {
            Block::Static(block) => block.root.iter().cloned().collect(),
            Block::Multi(block) => block.nodes(),
            Block::Collection(block) => block.nodes(),
            Block::Text(block) => block.node.iter().cloned().collect(),
            Block::Raw(block) => block.nodes(),
        }
    }

    pub fn first_node(&self) -> Option<Handle> {
        self.nodes().into_iter().next()
    }

    fn move_before(&self, reference: &Handle) {
        for node in self.nodes() {
            dom::insert_before(reference, &node);
        }
    }

    /// Same block, not mounted anywhere.
    pub fn unmounted_copy(&self) -> Block {
        match self {
            Block::Static(block) => Block::Static(StaticContentBlock {
                fragment: block.fragment.clone(),
                data: block.data.clone(),
                children: copy_children(&block.children),
                handlers: Rc::new(RefCell::new(block.handlers.borrow().clone())),
                root: None,
                anchors: Vec::new(),
                targets: Vec::new(),
            }),
            Block::Multi(block) => Block::Multi(MultiBlock {
                children: copy_children(&block.children),
                anchors: Vec::new(),
            }),
            Block::Collection(block) => Block::Collection(CollectionBlock {
                items: block
                    .items
                    .iter()
                    .map(|item| CollectionItem::new(item.key.clone(), item.block.unmounted_copy()))
                    .collect(),
                anchor: None,
            }),
            Block::Text(block) => Block::Text(TextBlock::new(&block.text)),
            Block::Raw(block) => Block::Raw(RawFragmentBlock::new(&block.html)),
        }
    }
}

fn copy_children(children: &[Option<Block>]) -> Vec<Option<Block>> {
    children
        .iter()
        .map(|child| child.as_ref().map(Block::unmounted_copy))
        .collect()
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let container = dom::create_container();
        let mut copy = self.unmounted_copy();
        copy.mount(&container);
        f.write_str(&dom::inner_html(&container))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC CONTENT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct StaticContentBlock {
    fragment: Rc<StaticFragment>,
    data: Vec<Value>,
    children: Vec<Option<Block>>,
    handlers: Rc<RefCell<Vec<Option<Handler>>>>,
    root: Option<Handle>,
    anchors: Vec<Handle>,
    targets: Vec<Option<Handle>>,
}

impl StaticContentBlock {
    /// Empty instance: null data, no children, no handlers.
    pub fn new(fragment: Rc<StaticFragment>) -> Self {
        let data = vec![Value::Null; fragment.data_count()];
        let children = (0..fragment.child_count()).map(|_| None).collect();
        let handlers = vec![None; fragment.handler_count()];
        Self {
            fragment,
            data,
            children,
            handlers: Rc::new(RefCell::new(handlers)),
            root: None,
            anchors: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn fragment(&self) -> &Rc<StaticFragment> {
        &self.fragment
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub fn set_data(&mut self, slot: usize, value: Value) {
        match self.data.get_mut(slot) {
            Some(current) => *current = value,
            None => log::error!("{}: no data slot {}", self.fragment.name(), slot),
        }
    }

    pub fn set_handler(&mut self, slot: usize, handler: Handler) {
        match self.handlers.borrow_mut().get_mut(slot) {
            Some(current) => *current = Some(handler),
            None => log::error!("{}: no handler slot {}", self.fragment.name(), slot),
        }
    }

    pub fn children(&self) -> &[Option<Block>] {
        &self.children
    }

    pub fn child_slot_mut(&mut self, slot: usize) -> Option<&mut Option<Block>> {
        self.children.get_mut(slot)
    }

    pub fn mount_before(&mut self, anchor: &Handle) {
        let (root, anchors) = self.fragment.instantiate();

        let mut targets = Vec::with_capacity(self.fragment.updates().instructions.len());
        for (target, op) in self.fragment.updates().targets(&root, &anchors) {
            match &target {
                Some(node) => apply_update(op, node, &self.data, None),
                None => log::error!("{}: update target not found for {:?}", self.fragment.name(), op),
            }
            targets.push(target);
        }

        for (target, slot) in self.fragment.handlers().targets(&root, &anchors) {
            let (Some(node), Some(event)) = (target, self.fragment.handler_event(*slot)) else {
                log::error!("{}: handler target not found for slot {}", self.fragment.name(), slot);
                continue;
            };
            let handlers = Rc::downgrade(&self.handlers);
            let slot = *slot;
            dom::add_event_listener(
                &node,
                event,
                Rc::new(move |event: &Event| {
                    let handler = handlers.upgrade().and_then(|handlers| {
                        let current = handlers.borrow().get(slot).cloned().flatten();
                        current
                    });
                    if let Some(handler) = handler {
                        handler(event);
                    }
                }),
            );
        }

        for (child, child_anchor) in self.children.iter_mut().zip(&anchors) {
            if let Some(child) = child {
                child.mount_before(child_anchor);
            }
        }
        dom::insert_before(anchor, &root);

        self.root = Some(root);
        self.anchors = anchors;
        self.targets = targets;
    }

    pub fn patch(&mut self, mut next: StaticContentBlock) {
        if self.root.is_none() {
            log::error!("{}: patch on a block that is not mounted", self.fragment.name());
            *self = next;
            return;
        }

        let instructions = &self.fragment.updates().instructions;
        for ((_, op), target) in instructions.iter().zip(&self.targets) {
            let slot = update_slot(op);
            if self.data.get(slot) == next.data.get(slot) {
                continue;
            }
            if let Some(node) = target {
                apply_update(op, node, &next.data, Some(&self.data));
            }
        }
        self.data = std::mem::take(&mut next.data);

        let handlers = std::mem::take(&mut *next.handlers.borrow_mut());
        *self.handlers.borrow_mut() = handlers;

        for (index, new) in next.children.into_iter().enumerate() {
            let Some(current) = self.children.get_mut(index) else {
                break;
            };
            match (current.as_mut(), new) {
                (Some(old), Some(new)) => old.patch(new),
                (None, Some(mut new)) => {
                    if let Some(anchor) = self.anchors.get(index) {
                        new.mount_before(anchor);
                    }
                    *current = Some(new);
                }
                (Some(old), None) => {
                    old.remove();
                    *current = None;
                }
                (None, None) => {}
            }
        }
    }

    pub fn remove(&mut self) {
        if let Some(root) = self.root.take() {
            dom::remove_node(&root);
        }
        self.anchors.clear();
        self.targets.clear();
    }
}

impl fmt::Debug for StaticContentBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticContentBlock")
            .field("fragment", &self.fragment.name())
            .field("data", &self.data)
            .field("children", &self.children)
            .field("handlers", &self.handlers.borrow().len())
            .field("mounted", &self.root.is_some())
            .finish()
    }
}

fn update_slot(op: &UpdateOp) -> usize {
    match op {
        UpdateOp::Text { slot } | UpdateOp::Attribute { slot, .. } | UpdateOp::Class { slot, .. } => {
            *slot
        }
    }
}

fn apply_update(op: &UpdateOp, node: &Handle, data: &[Value], previous: Option<&[Value]>) {
    let slot = update_slot(op);
    let value = data.get(slot).unwrap_or(&Value::Null);
    match op {
        UpdateOp::Text { .. } => dom::set_text_content(node, &to_display_string(value)),
        UpdateOp::Attribute { name, .. } => match value {
            Value::Null | Value::Bool(false) => dom::remove_attribute(node, name),
            Value::String(text) if text.is_empty() => dom::remove_attribute(node, name),
            Value::Bool(true) => dom::set_attribute(node, name, ""),
            other => dom::set_attribute(node, name, &to_display_string(other)),
        },
        UpdateOp::Class { fixed, .. } => {
            let tokens = class_tokens(value);
            if let Some(old) = previous.and_then(|p| p.get(slot)) {
                for stale in class_tokens(old) {
                    if !tokens.contains(&stale) && !fixed.contains(&stale) {
                        dom::remove_class(node, &stale);
                    }
                }
            }
            for token in &tokens {
                dom::add_class(node, token);
            }
        }
    }
}

/// Class tokens of a value: a string is split on whitespace, an object
/// contributes its keys whose value is truthy.
pub fn class_tokens(value: &Value) -> Vec<String> {
    match value {
        Value::Null | Value::Bool(false) => vec![],
        Value::Object(map) => map
            .iter()
            .filter(|(_, enabled)| is_truthy(enabled))
            .flat_map(|(key, _)| key.split_whitespace().map(str::to_string))
            .collect(),
        other => to_display_string(other)
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MULTI
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct MultiBlock {
    children: Vec<Option<Block>>,
    anchors: Vec<Handle>,
}

impl MultiBlock {
    pub fn new(size: usize) -> Self {
        Self {
            children: (0..size).map(|_| None).collect(),
            anchors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[Option<Block>] {
        &self.children
    }

    pub fn child_slot_mut(&mut self, slot: usize) -> Option<&mut Option<Block>> {
        self.children.get_mut(slot)
    }

    pub fn mount_before(&mut self, anchor: &Handle) {
        // an empty multi still needs one node to be positioned by
        let count = self.children.len().max(1);
        self.anchors = (0..count)
            .map(|_| {
                let slot_anchor = dom::create_text("");
                dom::insert_before(anchor, &slot_anchor);
                slot_anchor
            })
            .collect();
        for (child, slot_anchor) in self.children.iter_mut().zip(&self.anchors) {
            if let Some(child) = child {
                child.mount_before(slot_anchor);
            }
        }
    }

    pub fn patch(&mut self, next: MultiBlock) {
        for (index, new) in next.children.into_iter().enumerate() {
            let Some(current) = self.children.get_mut(index) else {
                break;
            };
            match (current.as_mut(), new) {
                (Some(old), Some(new)) => old.patch(new),
                (None, Some(mut new)) => {
                    if let Some(anchor) = self.anchors.get(index) {
                        new.mount_before(anchor);
                    }
                    *current = Some(new);
                }
                (Some(old), None) => {
                    old.remove();
                    *current = None;
                }
                (None, None) => {}
            }
        }
    }

    pub fn remove(&mut self) {
        for child in self.children.iter_mut().flatten() {
            child.remove();
        }
        for anchor in self.anchors.drain(..) {
            dom::remove_node(&anchor);
        }
    }

    fn nodes(&self) -> Vec<Handle> {
        let mut nodes = Vec::new();
        for (index, anchor) in self.anchors.iter().enumerate() {
            if let Some(Some(child)) = self.children.get(index) {
                nodes.extend(child.nodes());
            }
            nodes.push(anchor.clone());
        }
        nodes
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// One element of a collection, with the serialized `t-key` value if any.
#[derive(Debug)]
pub struct CollectionItem {
    pub key: Option<String>,
    pub block: Block,
}

impl CollectionItem {
    pub fn new(key: Option<String>, block: Block) -> Self {
        Self { key, block }
    }
}

#[derive(Debug)]
pub struct CollectionBlock {
    items: Vec<CollectionItem>,
    anchor: Option<Handle>,
}

impl CollectionBlock {
    pub fn new(items: Vec<CollectionItem>) -> Self {
        Self { items, anchor: None }
    }

    pub fn items(&self) -> &[CollectionItem] {
        &self.items
    }

    pub fn mount_before(&mut self, anchor: &Handle) {
        let own = dom::create_text("");
        dom::insert_before(anchor, &own);
        for item in &mut self.items {
            item.block.mount_before(&own);
        }
        self.anchor = Some(own);
    }

    /// Keyed items are matched by key wherever they moved, unkeyed ones by
    /// position. Matches are patched and moved into place, the rest of the
    /// new items mounted and the unmatched old ones removed.
    pub fn patch(&mut self, next: CollectionBlock) {
        let Some(own) = self.anchor.clone() else {
            log::error!("patch on a collection that is not mounted");
            *self = next;
            return;
        };

        let mut old: Vec<Option<CollectionItem>> =
            std::mem::take(&mut self.items).into_iter().map(Some).collect();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for (index, item) in old.iter().enumerate() {
            if let Some(key) = item.as_ref().and_then(|item| item.key.clone()) {
                by_key.entry(key).or_insert(index);
            }
        }

        let mut result: Vec<(CollectionItem, bool)> = Vec::with_capacity(next.items.len());
        for (position, item) in next.items.into_iter().enumerate() {
            let matched = match &item.key {
                Some(key) => by_key.remove(key).and_then(|index| old[index].take()),
                None => match old.get_mut(position) {
                    Some(slot) if slot.as_ref().is_some_and(|o| o.key.is_none()) => slot.take(),
                    _ => None,
                },
            };
            match matched {
                Some(mut existing) => {
                    existing.block.patch(item.block);
                    result.push((existing, true));
                }
                None => result.push((item, false)),
            }
        }

        for mut stale in old.into_iter().flatten() {
            stale.block.remove();
        }

        let mut reference = own;
        for (item, mounted) in result.iter_mut().rev() {
            if *mounted {
                item.block.move_before(&reference);
            } else {
                item.block.mount_before(&reference);
            }
            if let Some(first) = item.block.first_node() {
                reference = first;
            }
        }
        self.items = result.into_iter().map(|(item, _)| item).collect();
    }

    pub fn remove(&mut self) {
        for item in &mut self.items {
            item.block.remove();
        }
        if let Some(anchor) = self.anchor.take() {
            dom::remove_node(&anchor);
        }
    }

    fn nodes(&self) -> Vec<Handle> {
        let mut nodes: Vec<Handle> = self.items.iter().flat_map(|item| item.block.nodes()).collect();
        nodes.extend(self.anchor.iter().cloned());
        nodes
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXT AND RAW
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct TextBlock {
    text: String,
    node: Option<Handle>,
}

impl TextBlock {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            node: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mount_before(&mut self, anchor: &Handle) {
        let node = dom::create_text(&self.text);
        dom::insert_before(anchor, &node);
        self.node = Some(node);
    }

    pub fn patch(&mut self, next: TextBlock) {
        if self.text == next.text {
            return;
        }
        if let Some(node) = &self.node {
            dom::set_text_content(node, &next.text);
        }
        self.text = next.text;
    }

    pub fn remove(&mut self) {
        if let Some(node) = self.node.take() {
            dom::remove_node(&node);
        }
    }
}

#[derive(Debug)]
pub struct RawFragmentBlock {
    html: String,
    nodes: Vec<Handle>,
    anchor: Option<Handle>,
}

impl RawFragmentBlock {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            nodes: Vec::new(),
            anchor: None,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn mount_before(&mut self, anchor: &Handle) {
        let own = dom::create_text("");
        dom::insert_before(anchor, &own);
        self.nodes = dom::parse_html(&self.html);
        for node in &self.nodes {
            dom::insert_before(&own, node);
        }
        self.anchor = Some(own);
    }

    pub fn patch(&mut self, next: RawFragmentBlock) {
        if self.html == next.html {
            return;
        }
        for node in self.nodes.drain(..) {
            dom::remove_node(&node);
        }
        self.html = next.html;
        if let Some(own) = &self.anchor {
            self.nodes = dom::parse_html(&self.html);
            for node in &self.nodes {
                dom::insert_before(own, node);
            }
        }
    }

    pub fn remove(&mut self) {
        for node in self.nodes.drain(..) {
            dom::remove_node(&node);
        }
        if let Some(anchor) = self.anchor.take() {
            dom::remove_node(&anchor);
        }
    }

    fn nodes(&self) -> Vec<Handle> {
        let mut nodes = self.nodes.clone();
        nodes.extend(self.anchor.iter().cloned());
        nodes
    }
}
