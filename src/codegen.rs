//! Codegen Module for the Block Compiler
//!
//! Turns the static part of a template into a [`StaticFragment`]: a node tree
//! cloned once per block instance, plus the navigation program that finds
//! every dynamic location inside a fresh clone.
//!
//! Locations are recorded as paths of `firstChild`/`nextSibling` steps from
//! the fragment root, or from a child anchor when the location follows one
//! (nodes mounted before an anchor would shift sibling counts). All paths of
//! a fragment are folded into a trie; any trie node shared by several
//! instructions that either branches or is itself a target is looked up
//! once into a named intermediate, everything else is walked inline.

use markup5ever_rcdom::Handle;
use std::fmt::Write as _;

use crate::dom;

/// Tag of the placeholder standing for a child slot in a fragment template.
pub const CHILD_PLACEHOLDER: &str = "block-child";

// ═══════════════════════════════════════════════════════════════════════════════
// PATHS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    FirstChild,
    NextSibling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The cloned fragment root
    Root,
    /// The anchor of child slot `n`
    Anchor(usize),
    /// Intermediate lookup `n` of the same program
    Named(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    pub origin: Origin,
    pub steps: Vec<Step>,
}

impl NodePath {
    pub fn new(origin: Origin, steps: Vec<Step>) -> Self {
        Self { origin, steps }
    }

    pub fn root() -> Self {
        Self::new(Origin::Root, vec![])
    }

    fn then(&self, step: Step) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self::new(self.origin, steps)
    }

    /// Walk the path inside a mounted fragment clone.
    pub fn resolve(&self, root: &Handle, anchors: &[Handle], named: &[Handle]) -> Option<Handle> {
        let mut node = match self.origin {
            Origin::Root => root.clone(),
            Origin::Anchor(n) => anchors.get(n)?.clone(),
            Origin::Named(n) => named.get(n)?.clone(),
        };
        for step in &self.steps {
            node = match step {
                Step::FirstChild => dom::first_child(&node)?,
                Step::NextSibling => dom::next_sibling(&node)?,
            };
        }
        Some(node)
    }
}

/// What an update instruction writes into its target node.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Text { slot: usize },
    Attribute { name: String, slot: usize },
    /// Class tokens merged with the element's static `fixed` classes
    Class { slot: usize, fixed: Vec<String> },
}

/// Compressed navigation program: intermediates are resolved in order
/// (each may start from an earlier one), then every instruction's target.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPlan<T> {
    pub intermediates: Vec<NodePath>,
    pub instructions: Vec<(NodePath, T)>,
}

impl<T> AccessPlan<T> {
    /// Resolve every instruction target, in declaration order.
    pub fn targets(&self, root: &Handle, anchors: &[Handle]) -> Vec<(Option<Handle>, &T)> {
        let mut named: Vec<Handle> = Vec::with_capacity(self.intermediates.len());
        for path in &self.intermediates {
            match path.resolve(root, anchors, &named) {
                Some(node) => named.push(node),
                None => {
                    log::error!("intermediate {:?} does not resolve in fragment", path);
                    break;
                }
            }
        }
        self.instructions
            .iter()
            .map(|(path, op)| (path.resolve(root, anchors, &named), op))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATH COMPRESSION
// ═══════════════════════════════════════════════════════════════════════════════

struct TrieNode {
    parent: Option<usize>,
    step: Option<Step>,
    origin: Option<Origin>,
    children: Vec<(Step, usize)>,
    users: usize,
    ends: usize,
    name: Option<usize>,
}

impl TrieNode {
    fn new(parent: Option<usize>, step: Option<Step>, origin: Option<Origin>) -> Self {
        Self {
            parent,
            step,
            origin,
            children: Vec::new(),
            users: 0,
            ends: 0,
            name: None,
        }
    }
}

/// Fold raw paths (rooted at the fragment root or an anchor) into a
/// compressed [`AccessPlan`].
pub fn compress_paths<T>(paths: Vec<(NodePath, T)>) -> AccessPlan<T> {
    let mut nodes: Vec<TrieNode> = Vec::new();
    let mut roots: Vec<(Origin, usize)> = Vec::new();
    let mut ends = Vec::with_capacity(paths.len());

    for (path, _) in &paths {
        let root = match roots.iter().find(|(o, _)| *o == path.origin) {
            Some((_, index)) => *index,
            None => {
                nodes.push(TrieNode::new(None, None, Some(path.origin)));
                roots.push((path.origin, nodes.len() - 1));
                nodes.len() - 1
            }
        };
        let mut current = root;
        nodes[current].users += 1;
        for step in &path.steps {
            let existing = nodes[current]
                .children
                .iter()
                .find(|(s, _)| s == step)
                .map(|(_, i)| *i);
            current = match existing {
                Some(child) => child,
                None => {
                    nodes.push(TrieNode::new(Some(current), Some(*step), None));
                    let child = nodes.len() - 1;
                    nodes[current].children.push((*step, child));
                    child
                }
            };
            nodes[current].users += 1;
        }
        nodes[current].ends += 1;
        ends.push(current);
    }

    // names in preorder so every intermediate only refers to earlier ones
    let mut intermediates = Vec::new();
    let mut stack: Vec<usize> = roots.iter().rev().map(|(_, i)| *i).collect();
    while let Some(index) = stack.pop() {
        let node = &nodes[index];
        let shared = node.users >= 2 && node.children.len() + node.ends >= 2;
        if node.parent.is_some() && shared {
            let path = path_to(&nodes, index);
            nodes[index].name = Some(intermediates.len());
            intermediates.push(path);
        }
        stack.extend(nodes[index].children.iter().rev().map(|(_, i)| *i));
    }

    let instructions = paths
        .into_iter()
        .zip(ends)
        .map(|((_, op), end)| match nodes[end].name {
            Some(name) => (NodePath::new(Origin::Named(name), vec![]), op),
            None => (path_to(&nodes, end), op),
        })
        .collect();

    AccessPlan {
        intermediates,
        instructions,
    }
}

/// Path to `index` from its nearest named ancestor, or from its origin.
fn path_to(nodes: &[TrieNode], index: usize) -> NodePath {
    let mut steps = Vec::new();
    let mut current = index;
    let origin = loop {
        let node = &nodes[current];
        let Some(parent) = node.parent else {
            break node.origin.unwrap_or(Origin::Root);
        };
        if let Some(step) = node.step {
            steps.push(step);
        }
        if let Some(name) = nodes[parent].name {
            break Origin::Named(name);
        }
        current = parent;
    };
    steps.reverse();
    NodePath::new(origin, steps)
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC FRAGMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable description of one block shape, shared by every instance.
#[derive(Debug)]
pub struct StaticFragment {
    name: String,
    template: Handle,
    markup: String,
    data_count: usize,
    child_count: usize,
    handler_events: Vec<String>,
    updates: AccessPlan<UpdateOp>,
    handlers: AccessPlan<usize>,
}

impl StaticFragment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Markup of the template, with `<block-text>` marking text slots and
    /// `<block-child>` marking child slots.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn data_count(&self) -> usize {
        self.data_count
    }

    pub fn child_count(&self) -> usize {
        self.child_count
    }

    pub fn handler_count(&self) -> usize {
        self.handler_events.len()
    }

    pub fn handler_event(&self, index: usize) -> Option<&str> {
        self.handler_events.get(index).map(String::as_str)
    }

    pub fn updates(&self) -> &AccessPlan<UpdateOp> {
        &self.updates
    }

    pub fn handlers(&self) -> &AccessPlan<usize> {
        &self.handlers
    }

    /// Clone the template and swap each child placeholder for an empty text
    /// anchor. Returns the root and the anchors in slot order.
    pub fn instantiate(&self) -> (Handle, Vec<Handle>) {
        let root = dom::clone_node(&self.template);
        let mut placeholders = Vec::with_capacity(self.child_count);
        collect_placeholders(&root, &mut placeholders);
        let anchors = placeholders
            .iter()
            .map(|placeholder| {
                let anchor = dom::create_text("");
                dom::replace_node(placeholder, &anchor);
                anchor
            })
            .collect();
        (root, anchors)
    }
}

fn collect_placeholders(node: &Handle, found: &mut Vec<Handle>) {
    for child in dom::children(node) {
        if dom::tag_name(&child).as_deref() == Some(CHILD_PLACEHOLDER) {
            found.push(child);
        } else {
            collect_placeholders(&child, found);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAGMENT BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum DomDesc {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<usize>,
    },
    Text(String),
    Comment(String),
    TextSlot,
    Anchor,
}

#[derive(Debug)]
struct Level {
    node: usize,
    path: NodePath,
    last: Option<NodePath>,
}

/// Accumulates one fragment while the compiler walks the template.
#[derive(Debug)]
pub struct FragmentBuilder {
    name: String,
    nodes: Vec<DomDesc>,
    root: Option<usize>,
    stack: Vec<Level>,
    data_count: usize,
    child_count: usize,
    handler_events: Vec<String>,
    updates: Vec<(NodePath, UpdateOp)>,
    handlers: Vec<(NodePath, usize)>,
}

impl FragmentBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            root: None,
            stack: Vec::new(),
            data_count: 0,
            child_count: 0,
            handler_events: Vec::new(),
            updates: Vec::new(),
            handlers: Vec::new(),
        }
    }

    fn append(&mut self, desc: DomDesc) -> NodePath {
        let index = self.nodes.len();
        self.nodes.push(desc);
        let Some(level) = self.stack.last_mut() else {
            if self.root.is_some() {
                log::error!("fragment {} already has a root", self.name);
            }
            self.root = Some(index);
            return NodePath::root();
        };
        if let DomDesc::Element { children, .. } = &mut self.nodes[level.node] {
            children.push(index);
        }
        let path = match &level.last {
            None => level.path.then(Step::FirstChild),
            Some(previous) => previous.then(Step::NextSibling),
        };
        level.last = Some(path.clone());
        path
    }

    fn current_path(&self) -> NodePath {
        self.stack
            .last()
            .map(|level| level.path.clone())
            .unwrap_or_else(NodePath::root)
    }

    pub fn open_element(&mut self, tag: &str, attrs: Vec<(String, String)>) {
        let path = self.append(DomDesc::Element {
            tag: tag.to_string(),
            attrs,
            children: Vec::new(),
        });
        let node = self.nodes.len() - 1;
        self.stack.push(Level {
            node,
            path,
            last: None,
        });
    }

    pub fn close_element(&mut self) {
        self.stack.pop();
    }

    pub fn text(&mut self, value: &str) {
        self.append(DomDesc::Text(value.to_string()));
    }

    pub fn comment(&mut self, value: &str) {
        self.append(DomDesc::Comment(value.to_string()));
    }

    /// Empty text node whose content comes from a data slot.
    pub fn text_slot(&mut self) -> usize {
        let slot = self.next_data_slot();
        let path = self.append(DomDesc::TextSlot);
        self.updates.push((path, UpdateOp::Text { slot }));
        slot
    }

    /// Data slot writing attribute `name` of the open element.
    pub fn attribute_slot(&mut self, name: &str) -> usize {
        let slot = self.next_data_slot();
        let path = self.current_path();
        let op = if name == "class" {
            UpdateOp::Class {
                slot,
                fixed: self.open_element_classes(),
            }
        } else {
            UpdateOp::Attribute {
                name: name.to_string(),
                slot,
            }
        };
        self.updates.push((path, op));
        slot
    }

    /// Handler slot listening for `event` on the open element.
    pub fn handler_slot(&mut self, event: &str) -> usize {
        let index = self.handler_events.len();
        self.handler_events.push(event.to_string());
        let path = self.current_path();
        self.handlers.push((path, index));
        index
    }

    /// Child slot anchored at the current position.
    pub fn child_slot(&mut self) -> usize {
        let slot = self.child_count;
        self.child_count += 1;
        self.append(DomDesc::Anchor);
        if let Some(level) = self.stack.last_mut() {
            level.last = Some(NodePath::new(Origin::Anchor(slot), vec![]));
        }
        slot
    }

    fn next_data_slot(&mut self) -> usize {
        self.data_count += 1;
        self.data_count - 1
    }

    fn open_element_classes(&self) -> Vec<String> {
        let Some(level) = self.stack.last() else {
            return vec![];
        };
        match &self.nodes[level.node] {
            DomDesc::Element { attrs, .. } => attrs
                .iter()
                .filter(|(name, _)| name == "class")
                .flat_map(|(_, value)| value.split_whitespace().map(str::to_string))
                .collect(),
            _ => vec![],
        }
    }

    fn build_node(&self, index: usize) -> Handle {
        match &self.nodes[index] {
            DomDesc::Element {
                tag,
                attrs,
                children,
            } => {
                let element = dom::create_element(tag, attrs);
                for child in children {
                    dom::append_child(&element, &self.build_node(*child));
                }
                element
            }
            DomDesc::Text(value) => dom::create_text(value),
            DomDesc::Comment(value) => dom::create_comment(value),
            DomDesc::TextSlot => dom::create_text(""),
            DomDesc::Anchor => dom::create_element(CHILD_PLACEHOLDER, &[]),
        }
    }

    fn write_markup(&self, index: usize, out: &mut String) {
        match &self.nodes[index] {
            DomDesc::Element {
                tag,
                attrs,
                children,
            } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    let _ = write!(out, " {}=\"{}\"", name, escape_attribute(value));
                }
                out.push('>');
                for child in children {
                    self.write_markup(*child, out);
                }
                let _ = write!(out, "</{}>", tag);
            }
            DomDesc::Text(value) => out.push_str(&escape_text(value)),
            DomDesc::Comment(value) => {
                let _ = write!(out, "<!--{}-->", value);
            }
            DomDesc::TextSlot => out.push_str("<block-text></block-text>"),
            DomDesc::Anchor => {
                let _ = write!(out, "<{0}></{0}>", CHILD_PLACEHOLDER);
            }
        }
    }

    pub fn finish(self) -> StaticFragment {
        let (template, markup) = match self.root {
            Some(root) => {
                let mut markup = String::new();
                self.write_markup(root, &mut markup);
                (self.build_node(root), markup)
            }
            None => (dom::create_text(""), String::new()),
        };
        log::trace!("fragment {}: {}", self.name, markup);
        StaticFragment {
            name: self.name,
            template,
            markup,
            data_count: self.data_count,
            child_count: self.child_count,
            handler_events: self.handler_events,
            updates: compress_paths(self.updates),
            handlers: compress_paths(self.handlers),
        }
    }
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
