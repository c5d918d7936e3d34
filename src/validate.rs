//! Validate Module for the Block Compiler
//!
//! Template syntax tree, compile error type and the structural checks run on
//! parsed markup before directives are interpreted.

use serde::{Deserialize, Serialize};

use crate::parse::{XmlElement, XmlNode};

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_INVALID_XML: &str = "TPL001";
pub const ERR_BRANCH_WITHOUT_OPENER: &str = "TPL002";
pub const ERR_MULTIPLE_BRANCH_DIRECTIVES: &str = "TPL003";
pub const ERR_BRANCH_WITH_LOOP: &str = "TPL004";
pub const ERR_TEXT_BETWEEN_BRANCHES: &str = "TPL005";
pub const ERR_LOOP_WITHOUT_ALIAS: &str = "TPL006";
pub const ERR_INVALID_EXPRESSION: &str = "TPL007";
pub const ERR_UNSUPPORTED_HANDLER: &str = "TPL008";
pub const ERR_UNSUPPORTED_ATTRIBUTE: &str = "TPL009";

const BRANCH_DIRECTIVES: [&str; 3] = ["t-if", "t-elif", "t-else"];

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_INVALID_XML => "Templates are well-formed markup with balanced tags.",
        ERR_BRANCH_WITHOUT_OPENER => {
            "Every t-elif and t-else belongs to a chain opened by a t-if."
        }
        ERR_MULTIPLE_BRANCH_DIRECTIVES => "A node takes part in at most one branch of a chain.",
        ERR_BRANCH_WITH_LOOP => "A branch chain never shares a node with a loop.",
        ERR_TEXT_BETWEEN_BRANCHES => "Branch chains are contiguous sibling elements.",
        ERR_LOOP_WITHOUT_ALIAS => "Every loop names the variable bound to its items.",
        ERR_INVALID_EXPRESSION => "Every expression is parsed before the template renders.",
        ERR_UNSUPPORTED_HANDLER => "Event handlers name a method of the owner.",
        ERR_UNSUPPORTED_ATTRIBUTE => "Dynamic attributes name the attribute they write.",
        crate::config::ERR_INVALID_OPTIONS => "Compile options match the documented shape.",
        crate::discovery::ERR_TEMPLATE_DIR => "Template directories exist before they are scanned.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {message}")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: "TEMPLATE_ERROR".to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line,
            column,
            context,
            hints,
        }
    }

    /// Error without a source position, pointing at the offending node.
    pub(crate) fn at_node(code: &str, message: &str, node: &XmlElement) -> Self {
        Self::with_details(code, message, "", 0, 0, Some(node.describe()), vec![])
    }

    pub fn in_file(mut self, file: &str) -> Self {
        if self.file.is_empty() {
            self.file = file.to_string();
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTAX TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Text(TextNode),
    Comment(CommentNode),
    Element(ElementNode),
    Multi(MultiNode),
    Esc(EscNode),
    Raw(RawNode),
    If(IfNode),
    Set(SetNode),
    Call(CallNode),
    ForEach(ForEachNode),
    Key(KeyNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNode {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum AttributeValue {
    /// Written verbatim into the static fragment
    Static(String),
    /// `t-att-NAME`: an expression
    Expression(String),
    /// `t-attf-NAME`: text with `{{ }}` interpolations
    Format(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeIR {
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBinding {
    pub event: String,
    pub handler: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    pub attributes: Vec<AttributeIR>,
    pub on: Vec<EventBinding>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiNode {
    pub content: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscNode {
    pub expr: String,
    pub default_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub expr: String,
    pub body: Option<Vec<TemplateNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElifBranch {
    pub condition: String,
    pub content: TemplateNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfNode {
    pub condition: String,
    pub content: Box<TemplateNode>,
    pub elifs: Vec<ElifBranch>,
    pub else_branch: Option<Box<TemplateNode>>,
}

impl IfNode {
    /// Number of branches, and so of slots the conditional occupies.
    pub fn branch_count(&self) -> usize {
        1 + self.elifs.len() + usize::from(self.else_branch.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetNode {
    pub name: String,
    pub value: Option<String>,
    pub default_value: Option<String>,
    pub body: Option<Vec<TemplateNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallNode {
    pub name: String,
    pub body: Option<Vec<TemplateNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEachNode {
    pub collection: String,
    pub item: String,
    pub body: Box<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyNode {
    pub expr: String,
    pub content: Box<TemplateNode>,
}

impl TemplateNode {
    pub fn is_set(&self) -> bool {
        matches!(self, TemplateNode::Set(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BRANCH VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Check every branch chain in the tree and drop the whitespace text and
/// comments sitting between chained elements.
pub(crate) fn validate_branches(nodes: &mut Vec<XmlNode>) -> Result<(), CompilerError> {
    for node in nodes.iter_mut() {
        if let XmlNode::Element(element) = node {
            check_branch_directives(element)?;
            validate_branches(&mut element.children)?;
        }
    }

    let mut index = 0;
    while index < nodes.len() {
        let XmlNode::Element(element) = &nodes[index] else {
            index += 1;
            continue;
        };
        if element.has_attr("t-elif") || element.has_attr("t-else") {
            return Err(CompilerError::at_node(
                ERR_BRANCH_WITHOUT_OPENER,
                "t-elif and t-else directives must be preceded by a t-if or t-elif directive",
                element,
            ));
        }
        if element.has_attr("t-if") {
            index = validate_chain(nodes, index)?;
        } else {
            index += 1;
        }
    }
    Ok(())
}

fn check_branch_directives(element: &XmlElement) -> Result<(), CompilerError> {
    let count = BRANCH_DIRECTIVES
        .iter()
        .filter(|name| element.has_attr(name))
        .count();
    if count > 1 {
        return Err(CompilerError::at_node(
            ERR_MULTIPLE_BRANCH_DIRECTIVES,
            "Only one conditional branching directive is allowed per node",
            element,
        ));
    }
    if element.has_attr("t-foreach") && (element.has_attr("t-elif") || element.has_attr("t-else"))
    {
        return Err(CompilerError::at_node(
            ERR_BRANCH_WITH_LOOP,
            "t-elif and t-else cannot stay at the same level as t-foreach",
            element,
        ));
    }
    Ok(())
}

/// Walk the chain opened at `start`, returning the index right after it.
fn validate_chain(nodes: &mut Vec<XmlNode>, start: usize) -> Result<usize, CompilerError> {
    let mut current = start;
    loop {
        let mut next = current + 1;
        while next < nodes.len() && nodes[next].is_ignorable() {
            next += 1;
        }
        let continues = matches!(
            nodes.get(next),
            Some(XmlNode::Element(e)) if e.has_attr("t-elif") || e.has_attr("t-else")
        );
        if !continues {
            if let Some(XmlNode::Text(text)) = nodes.get(next) {
                if followed_by_branch(nodes, next) {
                    return Err(CompilerError::with_details(
                        ERR_TEXT_BETWEEN_BRANCHES,
                        "text is not allowed between branching directives",
                        "",
                        0,
                        0,
                        Some(text.trim().to_string()),
                        vec![],
                    ));
                }
            }
            return Ok(current + 1);
        }

        if let XmlNode::Element(opener) = &nodes[current] {
            if opener.has_attr("t-foreach") {
                return Err(CompilerError::at_node(
                    ERR_BRANCH_WITH_LOOP,
                    "t-if cannot stay at the same level as t-foreach when using t-elif or t-else",
                    opener,
                ));
            }
            if opener.has_attr("t-else") {
                // an else closes its chain
                if let XmlNode::Element(stray) = &nodes[next] {
                    return Err(CompilerError::at_node(
                        ERR_BRANCH_WITHOUT_OPENER,
                        "t-elif and t-else directives must be preceded by a t-if or t-elif directive",
                        stray,
                    ));
                }
            }
        }

        nodes.drain(current + 1..next);
        current += 1;
    }
}

/// Whether a branch element follows `index`, looking past text and comments.
fn followed_by_branch(nodes: &[XmlNode], index: usize) -> bool {
    nodes[index..]
        .iter()
        .find_map(|node| match node {
            XmlNode::Element(e) => Some(e.has_attr("t-elif") || e.has_attr("t-else")),
            _ => None,
        })
        .unwrap_or(false)
}
