//! Parse Module for the Block Compiler
//!
//! Template text goes through three stages: a tag-balance check that reports
//! malformed markup with a position, an HTML5 parse (html5ever, in a
//! `<template>` context so table parts parse anywhere) into a small owned
//! tree, and the directive pass that turns that tree into [`TemplateNode`]s.

use html5ever::tendril::TendrilSink;
use html5ever::{parse_fragment, ParseOpts};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::config::CompileOptions;
use crate::dom::html_name;
use crate::validate::{
    validate_branches, AttributeIR, AttributeValue, CallNode, CommentNode, CompilerError,
    ElementNode, ElifBranch, EscNode, EventBinding, ForEachNode, IfNode, KeyNode, MultiNode,
    RawNode, SetNode, TemplateNode, TextNode, ERR_INVALID_XML, ERR_LOOP_WITHOUT_ALIAS,
    ERR_UNSUPPORTED_ATTRIBUTE,
};

// ═══════════════════════════════════════════════════════════════════════════════
// SVG ATTRIBUTE CASE MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// html5ever lowercases attribute names; SVG needs these back in camelCase.
    static ref SVG_ATTR_CASE_MAP: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("viewbox", "viewBox");
        m.insert("preserveaspectratio", "preserveAspectRatio");
        m.insert("gradienttransform", "gradientTransform");
        m.insert("gradientunits", "gradientUnits");
        m.insert("markerheight", "markerHeight");
        m.insert("markerwidth", "markerWidth");
        m.insert("pathlength", "pathLength");
        m.insert("patterntransform", "patternTransform");
        m.insert("patternunits", "patternUnits");
        m.insert("refx", "refX");
        m.insert("refy", "refY");
        m.insert("stddeviation", "stdDeviation");
        m.insert("textlength", "textLength");
        m.insert("clippathunits", "clipPathUnits");
        m
    };

    static ref SVG_TAGS: HashSet<&'static str> = [
        "svg", "path", "circle", "ellipse", "line", "polyline", "polygon", "rect", "g",
        "defs", "use", "symbol", "clippath", "mask", "pattern", "marker",
        "lineargradient", "radialgradient", "stop", "filter", "text", "tspan",
        "textpath", "image",
    ]
    .into_iter()
    .collect();

    static ref VOID_ELEMENTS: HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
        "param", "source", "track", "wbr",
    ]
    .into_iter()
    .collect();

    /// Any markup construct the balance check has to step over or track.
    static ref MARKUP_RE: Regex = Regex::new(concat!(
        r#"<!--[\s\S]*?-->|<!\[CDATA\[[\s\S]*?\]\]>|<![^>]*>|<\?[\s\S]*?\?>"#,
        r#"|</\s*([A-Za-z][\w:.-]*)\s*>"#,
        r#"|<([A-Za-z][\w:.-]*)((?:\s+[^\s=/>]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))?)*)\s*(/?)>"#,
    ))
    .unwrap();

    static ref SELF_CLOSING_RE: Regex = Regex::new(
        r#"<([A-Za-z][\w:.-]*)((?:\s+[^\s=/>]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))?)*)\s*/>"#
    )
    .unwrap();

    static ref LINE_BREAK_RE: Regex = Regex::new(r"[\r\n]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Restore camelCase for SVG attributes html5ever lowercased.
fn correct_svg_attribute_name(attr_name: &str, tag_name: &str) -> String {
    if SVG_TAGS.contains(tag_name.to_lowercase().as_str()) {
        if let Some(&corrected) = SVG_ATTR_CASE_MAP.get(attr_name.to_lowercase().as_str()) {
            return corrected.to_string();
        }
    }
    attr_name.to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP TREE
// ═══════════════════════════════════════════════════════════════════════════════

/// Parsed markup before directives are interpreted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
}

impl XmlNode {
    /// Comments and whitespace-only text, which may sit between branches.
    pub(crate) fn is_ignorable(&self) -> bool {
        match self {
            XmlNode::Comment(_) => true,
            XmlNode::Text(text) => text.trim().is_empty(),
            XmlNode::Element(_) => false,
        }
    }

    fn text_content(&self) -> String {
        match self {
            XmlNode::Text(text) => text.clone(),
            XmlNode::Comment(_) => String::new(),
            XmlNode::Element(element) => element.text_content(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmlElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub(crate) fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n == name)
    }

    pub(crate) fn take_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attrs.iter().position(|(n, _)| n == name)?;
        Some(self.attrs.remove(index).1)
    }

    /// Opening tag as written, for error context.
    pub(crate) fn describe(&self) -> String {
        let attrs: String = self
            .attrs
            .iter()
            .map(|(name, value)| format!(" {}=\"{}\"", name, value))
            .collect();
        format!("<{}{}>", self.tag, attrs)
    }

    fn text_content(&self) -> String {
        self.children.iter().map(XmlNode::text_content).collect()
    }

    fn has_only_text(&self) -> bool {
        self.children.iter().all(|child| matches!(child, XmlNode::Text(_)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WELL-FORMEDNESS
// ═══════════════════════════════════════════════════════════════════════════════

fn position_of(text: &str, offset: usize) -> (u32, u32) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map(|newline| before[newline + 1..].chars().count())
        .unwrap_or_else(|| before.chars().count())
        + 1;
    (line as u32, column as u32)
}

fn invalid_xml(text: &str, offset: usize, reason: &str) -> CompilerError {
    let (line, column) = position_of(text, offset);
    let source_line = text.lines().nth(line as usize - 1).unwrap_or_default();
    let pointer = format!("{}^", "-".repeat(column.saturating_sub(1) as usize));
    CompilerError::with_details(
        ERR_INVALID_XML,
        &format!(
            "Invalid XML in template. {} (line {} column {})",
            reason, line, column
        ),
        "",
        line,
        column,
        Some(format!("{}\n{}", source_line, pointer)),
        vec!["Close every tag, or self-close it as in <t t-esc=\"value\"/>".to_string()],
    )
}

/// Reject unbalanced or mismatched tags. HTML void elements need no closing
/// tag; comments, CDATA and declarations are skipped.
fn check_well_formed(text: &str) -> Result<(), CompilerError> {
    let mut open: Vec<(String, usize)> = Vec::new();
    for caps in MARKUP_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if let Some(closing) = caps.get(1) {
            let name = closing.as_str();
            match open.pop() {
                Some((expected, _)) if expected == name => {}
                Some((expected, _)) => {
                    return Err(invalid_xml(
                        text,
                        whole.start(),
                        &format!("Expected </{}> but found </{}>.", expected, name),
                    ))
                }
                None => {
                    return Err(invalid_xml(
                        text,
                        whole.start(),
                        &format!("Unexpected closing tag </{}>.", name),
                    ))
                }
            }
        } else if let Some(opening) = caps.get(2) {
            let name = opening.as_str();
            let self_closing = caps.get(4).is_some_and(|m| !m.as_str().is_empty());
            if !self_closing && !VOID_ELEMENTS.contains(name.to_lowercase().as_str()) {
                open.push((name.to_string(), whole.start()));
            }
        }
    }
    match open.pop() {
        Some((name, offset)) => Err(invalid_xml(
            text,
            offset,
            &format!("Tag <{}> is never closed.", name),
        )),
        None => Ok(()),
    }
}

/// HTML ignores `/>` on non-void elements, so spell those out as pairs.
fn expand_self_closing(text: &str) -> String {
    SELF_CLOSING_RE
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            let attrs = &caps[2];
            if VOID_ELEMENTS.contains(name.to_lowercase().as_str()) {
                format!("<{}{}>", name, attrs)
            } else {
                format!("<{}{}></{}>", name, attrs, name)
            }
        })
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTML PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse template text into markup nodes, branch chains validated.
pub(crate) fn parse_markup(text: &str) -> Result<Vec<XmlNode>, CompilerError> {
    check_well_formed(text)?;
    let expanded = expand_self_closing(text);

    let dom = parse_fragment(
        RcDom::default(),
        ParseOpts::default(),
        html_name("template"),
        vec![],
    )
    .one(expanded.as_str());

    let root = dom
        .document
        .children
        .borrow()
        .iter()
        .find(|child| matches!(child.data, NodeData::Element { .. }))
        .cloned();
    let mut nodes = match root {
        Some(root) => convert_children(&root),
        None => vec![],
    };
    validate_branches(&mut nodes)?;
    Ok(nodes)
}

fn convert_children(handle: &Handle) -> Vec<XmlNode> {
    handle.children.borrow().iter().filter_map(convert_node).collect()
}

fn convert_node(handle: &Handle) -> Option<XmlNode> {
    match &handle.data {
        NodeData::Text { contents } => Some(XmlNode::Text(contents.borrow().to_string())),
        NodeData::Comment { contents } => Some(XmlNode::Comment(contents.to_string())),
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let tag = name.local.to_string();
            let attrs = attrs
                .borrow()
                .iter()
                .map(|attr| {
                    (
                        correct_svg_attribute_name(&attr.name.local, &tag),
                        attr.value.to_string(),
                    )
                })
                .collect();
            // <template> keeps its content in a separate fragment
            let children = match template_contents.borrow().as_ref() {
                Some(contents) => convert_children(contents),
                None => convert_children(handle),
            };
            Some(XmlNode::Element(XmlElement {
                tag,
                attrs,
                children,
            }))
        }
        NodeData::Document
        | NodeData::Doctype { .. }
        | NodeData::ProcessingInstruction { .. } => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct ParseContext {
    in_pre: bool,
    preserve_whitespace: bool,
}

/// Parse a template into its syntax tree. The text is read as the content
/// of an implicit `<t>` root.
pub fn parse_template(text: &str, options: &CompileOptions) -> Result<TemplateNode, CompilerError> {
    let nodes = parse_markup(text).map_err(|e| e.in_file(options.name()))?;
    let root = XmlElement {
        tag: "t".to_string(),
        attrs: vec![],
        children: nodes,
    };
    let ctx = ParseContext {
        in_pre: false,
        preserve_whitespace: options.preserve_whitespace,
    };
    let ast = parse_element(root, ctx).map_err(|e| e.in_file(options.name()))?;
    Ok(ast.unwrap_or_else(|| text_node("")))
}

fn text_node(value: &str) -> TemplateNode {
    TemplateNode::Text(TextNode {
        value: value.to_string(),
    })
}

fn parse_children(children: Vec<XmlNode>, ctx: ParseContext) -> Result<Vec<TemplateNode>, CompilerError> {
    let mut result = Vec::new();
    let mut nodes = children.into_iter().peekable();
    while let Some(node) = nodes.next() {
        let parsed = match node {
            XmlNode::Element(element) if element.has_attr("t-if") => {
                let mut elifs = Vec::new();
                while let Some(XmlNode::Element(elif)) =
                    nodes.next_if(|next| is_element_with(next, "t-elif"))
                {
                    elifs.push(elif);
                }
                let otherwise = match nodes.next_if(|next| is_element_with(next, "t-else")) {
                    Some(XmlNode::Element(element)) => Some(element),
                    _ => None,
                };
                parse_if(element, elifs, otherwise, ctx)?
            }
            XmlNode::Element(element) => parse_element(element, ctx)?,
            XmlNode::Text(text) => parse_text(&text, ctx),
            XmlNode::Comment(comment) => Some(TemplateNode::Comment(CommentNode { value: comment })),
        };
        result.extend(parsed);
    }
    Ok(result)
}

fn is_element_with(node: &XmlNode, attr: &str) -> bool {
    matches!(node, XmlNode::Element(element) if element.has_attr(attr))
}

fn parse_text(text: &str, ctx: ParseContext) -> Option<TemplateNode> {
    if ctx.in_pre || ctx.preserve_whitespace {
        return Some(text_node(text));
    }
    if LINE_BREAK_RE.is_match(text) && text.trim().is_empty() {
        return None;
    }
    Some(text_node(&WHITESPACE_RE.replace_all(text, " ")))
}

fn parse_element(mut element: XmlElement, ctx: ParseContext) -> Result<Option<TemplateNode>, CompilerError> {
    if element.has_attr("t-if") {
        return parse_if(element, vec![], None, ctx);
    }
    if let Some(expr) = element.take_attr("t-esc") {
        return parse_esc(expr, element, ctx);
    }
    if let Some(name) = element.take_attr("t-call") {
        return parse_call(name, element, ctx);
    }
    if let Some(collection) = element.take_attr("t-foreach") {
        return parse_foreach(collection, element, ctx);
    }
    if let Some(expr) = element.take_attr("t-key") {
        let Some(content) = parse_element(element, ctx)? else {
            return Ok(None);
        };
        return Ok(Some(TemplateNode::Key(KeyNode {
            expr,
            content: Box::new(content),
        })));
    }
    if let Some(expr) = element.take_attr("t-raw") {
        return parse_raw(expr, element, ctx);
    }
    if element.tag != "t" {
        return parse_dom(element, ctx).map(Some);
    }
    if let Some(name) = element.take_attr("t-set") {
        return parse_set(name, element, ctx).map(Some);
    }
    let mut children = parse_children(element.children, ctx)?;
    Ok(match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(TemplateNode::Multi(MultiNode { content: children })),
    })
}

fn parse_if(
    mut element: XmlElement,
    elifs: Vec<XmlElement>,
    otherwise: Option<XmlElement>,
    ctx: ParseContext,
) -> Result<Option<TemplateNode>, CompilerError> {
    let condition = element.take_attr("t-if").unwrap_or_default();
    let content = parse_element(element, ctx)?.unwrap_or_else(|| text_node(""));

    let mut branches = Vec::with_capacity(elifs.len());
    for mut elif in elifs {
        let condition = elif.take_attr("t-elif").unwrap_or_default();
        if let Some(content) = parse_element(elif, ctx)? {
            branches.push(ElifBranch { condition, content });
        }
    }

    let else_branch = match otherwise {
        Some(mut element) => {
            element.take_attr("t-else");
            parse_element(element, ctx)?.map(Box::new)
        }
        None => None,
    };

    Ok(Some(TemplateNode::If(IfNode {
        condition,
        content: Box::new(content),
        elifs: branches,
        else_branch,
    })))
}

fn parse_esc(expr: String, element: XmlElement, ctx: ParseContext) -> Result<Option<TemplateNode>, CompilerError> {
    let esc = TemplateNode::Esc(EscNode {
        expr,
        default_value: element.text_content(),
    });
    match parse_element(element, ctx)? {
        Some(TemplateNode::Element(mut dom)) => {
            dom.children = vec![esc];
            Ok(Some(TemplateNode::Element(dom)))
        }
        _ => Ok(Some(esc)),
    }
}

fn parse_call(name: String, element: XmlElement, ctx: ParseContext) -> Result<Option<TemplateNode>, CompilerError> {
    if element.tag != "t" {
        if let Some(TemplateNode::Element(mut dom)) = parse_element(element.clone(), ctx)? {
            dom.children = vec![TemplateNode::Call(CallNode { name, body: None })];
            return Ok(Some(TemplateNode::Element(dom)));
        }
    }
    let body = parse_children(element.children, ctx)?;
    Ok(Some(TemplateNode::Call(CallNode {
        name,
        body: if body.is_empty() { None } else { Some(body) },
    })))
}

fn parse_foreach(
    collection: String,
    mut element: XmlElement,
    ctx: ParseContext,
) -> Result<Option<TemplateNode>, CompilerError> {
    let item = match element.take_attr("t-as") {
        Some(item) if !item.trim().is_empty() => item.trim().to_string(),
        _ => {
            return Err(CompilerError::at_node(
                ERR_LOOP_WITHOUT_ALIAS,
                &format!("t-foreach=\"{}\" needs a t-as attribute", collection),
                &element,
            ))
        }
    };
    let Some(body) = parse_element(element, ctx)? else {
        return Ok(None);
    };
    Ok(Some(TemplateNode::ForEach(ForEachNode {
        collection,
        item,
        body: Box::new(body),
    })))
}

fn parse_raw(expr: String, mut element: XmlElement, ctx: ParseContext) -> Result<Option<TemplateNode>, CompilerError> {
    let children = std::mem::take(&mut element.children);
    let body = parse_children(children, ctx)?;
    let raw = TemplateNode::Raw(RawNode {
        expr,
        body: if body.is_empty() { None } else { Some(body) },
    });
    if element.tag == "t" {
        return Ok(Some(raw));
    }
    let TemplateNode::Element(mut dom) = parse_dom(element, ctx)? else {
        return Ok(Some(raw));
    };
    dom.children = vec![raw];
    Ok(Some(TemplateNode::Element(dom)))
}

fn parse_dom(element: XmlElement, ctx: ParseContext) -> Result<TemplateNode, CompilerError> {
    let mut attributes = Vec::new();
    let mut on = Vec::new();
    for (name, value) in &element.attrs {
        if name == "t-att" || name == "t-attf" {
            return Err(CompilerError::at_node(
                ERR_UNSUPPORTED_ATTRIBUTE,
                &format!("{} needs an attribute name, as in {}-title", name, name),
                &element,
            ));
        }
        if let Some(event) = name.strip_prefix("t-on-") {
            on.push(EventBinding {
                event: event.to_string(),
                handler: value.clone(),
            });
            continue;
        }
        let attribute = if let Some(target) = name.strip_prefix("t-attf-") {
            AttributeIR {
                name: correct_svg_attribute_name(target, &element.tag),
                value: AttributeValue::Format(value.clone()),
            }
        } else if let Some(target) = name.strip_prefix("t-att-") {
            AttributeIR {
                name: correct_svg_attribute_name(target, &element.tag),
                value: AttributeValue::Expression(value.clone()),
            }
        } else if name == "class" && value.is_empty() {
            continue;
        } else {
            AttributeIR {
                name: name.clone(),
                value: AttributeValue::Static(value.clone()),
            }
        };
        attributes.push(attribute);
    }

    let ctx = ParseContext {
        in_pre: ctx.in_pre || element.tag == "pre",
        ..ctx
    };
    let children = parse_children(element.children, ctx)?;
    Ok(TemplateNode::Element(ElementNode {
        tag: element.tag,
        attributes,
        on,
        children,
    }))
}

fn parse_set(name: String, mut element: XmlElement, ctx: ParseContext) -> Result<TemplateNode, CompilerError> {
    let value = element.take_attr("t-value").filter(|v| !v.is_empty());
    let (default_value, body) = if element.has_only_text() {
        let text = element.text_content();
        (if text.is_empty() { None } else { Some(text) }, None)
    } else {
        (None, Some(parse_children(element.children, ctx)?))
    };
    Ok(TemplateNode::Set(SetNode {
        name,
        value,
        default_value,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_position_of() {
        let text = "<div>\n  <p>\n</div>";
        assert_eq!(position_of(text, 0), (1, 1));
        assert_eq!(position_of(text, 8), (2, 3));
    }

    #[test]
    fn test_expand_self_closing_keeps_void_elements() {
        assert_eq!(
            expand_self_closing(r#"<t t-esc="a"/><br/><div class="x" />"#),
            r#"<t t-esc="a"></t><br><div class="x"></div>"#
        );
    }

    #[test]
    fn test_self_closing_with_slash_in_attribute() {
        assert_eq!(
            expand_self_closing(r#"<t t-esc="a / b"/>"#),
            r#"<t t-esc="a / b"></t>"#
        );
    }

    #[test]
    fn test_well_formed_accepts_void_and_comments() {
        assert!(check_well_formed("<div><br><input type=\"text\"/><!-- <p> --></div>").is_ok());
    }

    #[test]
    fn test_mismatched_tag_reports_position() {
        let err = check_well_formed("<div>\n  <span></div>").unwrap_err();
        assert_eq!(err.code, ERR_INVALID_XML);
        assert_eq!((err.line, err.column), (2, 9));
        assert!(err.message.starts_with("Invalid XML in template."));
        assert_eq!(err.context.as_deref(), Some("  <span></div>\n--------^"));
    }

    #[test]
    fn test_unclosed_tag() {
        let err = check_well_formed("<div><p>text</div>").unwrap_err();
        assert!(err.message.contains("Expected </p> but found </div>"));
        let err = check_well_formed("<div>").unwrap_err();
        assert!(err.message.contains("Tag <div> is never closed."));
    }

    #[test]
    fn test_svg_attribute_case_restored() {
        let nodes = parse_markup(r#"<svg viewBox="0 0 10 10"></svg>"#).unwrap();
        let XmlNode::Element(svg) = &nodes[0] else {
            panic!("expected an element");
        };
        assert_eq!(svg.attrs, vec![("viewBox".to_string(), "0 0 10 10".to_string())]);
    }

    #[test]
    fn test_table_parts_parse_in_template_context() {
        let nodes = parse_markup("<tr><td>1</td></tr>").unwrap();
        let XmlNode::Element(row) = &nodes[0] else {
            panic!("expected an element");
        };
        assert_eq!(row.tag, "tr");
    }
}
