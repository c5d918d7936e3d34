//! Compiler Module for the Block Compiler
//!
//! One recursive walk over the syntax tree. Each node is compiled either
//! into a slot of the enclosing block (a new block is built there) or inline
//! into the fragment currently being accumulated. Static markup piles up in
//! the open fragment until something dynamic needs a slot of its own.

use serde_json::Value;
use std::rc::Rc;

use crate::codegen::{FragmentBuilder, StaticFragment};
use crate::config::CompileOptions;
use crate::expression::{compile_expression, interpolate, is_interpolated, Expr};
use crate::parse::parse_template;
use crate::render::{
    BindValue, BlockPlan, Fallback, HandlerPlan, LoopPlan, Op, RenderFunction, Slot, TemplateName,
    ValueExpr,
};
use crate::scope::ZERO;
use crate::validate::{
    AttributeValue, CallNode, CompilerError, ElementNode, EscNode, IfNode, MultiNode, RawNode, SetNode,
    TemplateNode, ERR_UNSUPPORTED_HANDLER,
};

/// Where the node being compiled ends up.
enum Position<'f> {
    /// A new block in this slot of the enclosing block
    Slot(Slot),
    /// Appended to the fragment under construction
    Inline(&'f mut FragmentBuilder),
}

pub struct CompilationContext {
    name: String,
    fragments: Vec<Rc<StaticFragment>>,
    block_count: usize,
    loop_depth: usize,
    protect_scope: bool,
}

impl CompilationContext {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fragments: Vec::new(),
            block_count: 0,
            loop_depth: 0,
            protect_scope: false,
        }
    }

    pub fn compile(mut self, ast: &TemplateNode) -> Result<RenderFunction, CompilerError> {
        let mut body = Vec::new();
        self.compile_node(ast, Position::Slot(Slot::Root), &mut body)?;
        log::debug!(
            "compiled {}: {} fragment(s), scope {}",
            self.name,
            self.fragments.len(),
            if self.protect_scope { "protected" } else { "shared" }
        );
        log::trace!("{} plan: {:?}", self.name, body);
        Ok(RenderFunction::new(
            &self.name,
            self.fragments,
            body,
            self.protect_scope,
        ))
    }

    fn compile_node(
        &mut self,
        node: &TemplateNode,
        position: Position<'_>,
        ops: &mut Vec<Op>,
    ) -> Result<(), CompilerError> {
        match position {
            Position::Slot(slot) => self.compile_in_slot(node, slot, ops),
            Position::Inline(builder) => self.compile_inline(node, builder, ops),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NEW BLOCKS
    // ═══════════════════════════════════════════════════════════════════════════

    fn compile_in_slot(&mut self, node: &TemplateNode, slot: Slot, ops: &mut Vec<Op>) -> Result<(), CompilerError> {
        match node {
            TemplateNode::Text(text) => ops.push(Op::Build {
                slot,
                block: BlockPlan::Text(ValueExpr::Expr(Expr::Literal(Value::String(
                    text.value.clone(),
                )))),
            }),
            TemplateNode::Comment(_) | TemplateNode::Element(_) => {
                self.block_count += 1;
                let mut builder = FragmentBuilder::new(&format!("Block{}", self.block_count));
                let mut block_ops = Vec::new();
                self.compile_node(node, Position::Inline(&mut builder), &mut block_ops)?;
                self.fragments.push(Rc::new(builder.finish()));
                ops.push(Op::Build {
                    slot,
                    block: BlockPlan::Static {
                        fragment: self.fragments.len() - 1,
                        ops: block_ops,
                    },
                });
            }
            TemplateNode::Esc(esc) => ops.push(Op::Build {
                slot,
                block: BlockPlan::Text(esc_value(esc)?),
            }),
            TemplateNode::Raw(raw) => {
                let value = self.raw_value(raw)?;
                ops.push(Op::Build {
                    slot,
                    block: BlockPlan::Raw(value),
                });
            }
            TemplateNode::If(conditional) => {
                // one slot per branch, so switching branches never changes the shape
                let op = self.compile_if(conditional, |index| Position::Slot(Slot::Child(index)))?;
                ops.push(Op::Build {
                    slot,
                    block: BlockPlan::Multi {
                        size: conditional.branch_count(),
                        ops: vec![op],
                    },
                });
            }
            TemplateNode::ForEach(foreach) => {
                self.loop_depth += 1;
                if !matches!(*foreach.body, TemplateNode::Key(_)) {
                    log::debug!(
                        "{}: loop over {} (depth {}) has no t-key, items are matched by position",
                        self.name,
                        foreach.collection,
                        self.loop_depth
                    );
                }
                let mut body = Vec::new();
                let compiled = self.compile_in_slot(&foreach.body, Slot::Item, &mut body);
                self.loop_depth -= 1;
                compiled?;
                ops.push(Op::Build {
                    slot,
                    block: BlockPlan::Collection(LoopPlan {
                        collection: compile_expression(&foreach.collection)?,
                        item: foreach.item.clone(),
                        body,
                    }),
                });
            }
            TemplateNode::Key(key) => {
                let mut keyed = Vec::new();
                self.compile_in_slot(&key.content, slot, &mut keyed)?;
                ops.push(Op::Keyed {
                    key: compile_expression(&key.expr)?,
                    ops: keyed,
                });
            }
            TemplateNode::Multi(multi) => {
                let dynamic = multi.content.iter().filter(|n| !n.is_set()).count();
                if dynamic <= 1 {
                    for child in &multi.content {
                        self.compile_in_slot(child, slot, ops)?;
                    }
                    return Ok(());
                }
                let mut multi_ops = Vec::new();
                let mut index = 0;
                for child in &multi.content {
                    if child.is_set() {
                        self.compile_in_slot(child, slot, &mut multi_ops)?;
                    } else {
                        self.compile_in_slot(child, Slot::Child(index), &mut multi_ops)?;
                        index += 1;
                    }
                }
                ops.push(Op::Build {
                    slot,
                    block: BlockPlan::Multi {
                        size: dynamic,
                        ops: multi_ops,
                    },
                });
            }
            TemplateNode::Call(call) => self.compile_call(call, slot, ops)?,
            TemplateNode::Set(set) => ops.push(self.compile_set(set)?),
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INLINE CONTENT
    // ═══════════════════════════════════════════════════════════════════════════

    fn compile_inline(
        &mut self,
        node: &TemplateNode,
        builder: &mut FragmentBuilder,
        ops: &mut Vec<Op>,
    ) -> Result<(), CompilerError> {
        match node {
            TemplateNode::Text(text) => builder.text(&text.value),
            TemplateNode::Comment(comment) => builder.comment(&comment.value),
            TemplateNode::Esc(esc) => {
                let index = builder.text_slot();
                ops.push(Op::SetData {
                    index,
                    value: esc_value(esc)?,
                });
            }
            TemplateNode::Element(element) => self.compile_element(element, builder, ops)?,
            TemplateNode::If(conditional) => {
                let op =
                    self.compile_if(conditional, |_| Position::Slot(Slot::Child(builder.child_slot())))?;
                ops.push(op);
            }
            TemplateNode::Multi(multi) => {
                for child in &multi.content {
                    self.compile_inline(child, builder, ops)?;
                }
            }
            TemplateNode::Set(set) => ops.push(self.compile_set(set)?),
            TemplateNode::Raw(_)
            | TemplateNode::ForEach(_)
            | TemplateNode::Call(_)
            | TemplateNode::Key(_) => {
                let index = builder.child_slot();
                self.compile_in_slot(node, Slot::Child(index), ops)?;
            }
        }
        Ok(())
    }

    fn compile_element(
        &mut self,
        element: &ElementNode,
        builder: &mut FragmentBuilder,
        ops: &mut Vec<Op>,
    ) -> Result<(), CompilerError> {
        let static_attrs = element
            .attributes
            .iter()
            .filter_map(|attr| match &attr.value {
                AttributeValue::Static(value) => Some((attr.name.clone(), value.clone())),
                _ => None,
            })
            .collect();
        builder.open_element(&element.tag, static_attrs);

        for attr in &element.attributes {
            let expr = match &attr.value {
                AttributeValue::Static(_) => continue,
                AttributeValue::Expression(expr) => compile_expression(expr)?,
                AttributeValue::Format(text) => interpolate(text)?,
            };
            let index = builder.attribute_slot(&attr.name);
            ops.push(Op::SetData {
                index,
                value: ValueExpr::Expr(expr),
            });
        }

        for binding in &element.on {
            let (method, args) = compile_handler(&binding.handler)?;
            let index = builder.handler_slot(&binding.event);
            ops.push(Op::SetHandler {
                index,
                handler: HandlerPlan {
                    event: binding.event.clone(),
                    method,
                    args,
                },
            });
        }

        for child in &element.children {
            self.compile_inline(child, builder, ops)?;
        }
        builder.close_element();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DIRECTIVES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compile every branch of a conditional. `branch_position` gives the
    /// position of branch `k`; the returned op selects the branch at render time.
    fn compile_if<'f>(
        &mut self,
        conditional: &IfNode,
        mut branch_position: impl FnMut(usize) -> Position<'f>,
    ) -> Result<Op, CompilerError> {
        let mut conditions = vec![(&conditional.condition, &*conditional.content)];
        conditions.extend(conditional.elifs.iter().map(|elif| (&elif.condition, &elif.content)));

        let mut branches = Vec::with_capacity(conditions.len());
        for (index, (condition, content)) in conditions.into_iter().enumerate() {
            let mut branch = Vec::new();
            self.compile_node(content, branch_position(index), &mut branch)?;
            branches.push((compile_expression(condition)?, branch));
        }

        let otherwise = match &conditional.else_branch {
            Some(content) => {
                let mut branch = Vec::new();
                self.compile_node(content, branch_position(branches.len()), &mut branch)?;
                Some(branch)
            }
            None => None,
        };
        Ok(Op::If {
            branches,
            otherwise,
        })
    }

    fn compile_call(&mut self, call: &CallNode, slot: Slot, ops: &mut Vec<Op>) -> Result<(), CompilerError> {
        let name = if is_interpolated(&call.name) {
            TemplateName::Dynamic(interpolate(&call.name)?)
        } else {
            TemplateName::Static(call.name.clone())
        };
        let build = Op::Build {
            slot,
            block: BlockPlan::Call { name },
        };
        let Some(body) = &call.body else {
            ops.push(build);
            return Ok(());
        };

        // the body renders in its own scope; its t-set bindings reach the callee
        let mut scoped = Vec::new();
        let mut content = Vec::new();
        for node in body {
            match node {
                TemplateNode::Set(set) => scoped.push(self.compile_set(set)?),
                other => content.push(other.clone()),
            }
        }
        if !content.is_empty() {
            let body_ops = self.compile_body(content)?;
            scoped.push(Op::Bind {
                name: ZERO.to_string(),
                value: BindValue {
                    expr: None,
                    fallback: Fallback::Body(body_ops),
                },
            });
        }
        scoped.push(build);
        ops.push(Op::Scoped(scoped));
        Ok(())
    }

    fn compile_set(&mut self, set: &SetNode) -> Result<Op, CompilerError> {
        self.protect_scope = true;
        let expr = match &set.value {
            Some(value) => Some(compile_expression(value)?),
            None => None,
        };
        let fallback = match (&set.default_value, &set.body) {
            (_, Some(body)) => Fallback::Body(self.compile_body(body.clone())?),
            (Some(text), None) => Fallback::Text(text.clone()),
            (None, None) => Fallback::None,
        };
        Ok(Op::Bind {
            name: set.name.clone(),
            value: BindValue { expr, fallback },
        })
    }

    fn raw_value(&mut self, raw: &RawNode) -> Result<ValueExpr, CompilerError> {
        let expr = value_expression(&raw.expr)?;
        Ok(match &raw.body {
            Some(body) => ValueExpr::OrBody(expr, self.compile_body(body.clone())?),
            None => ValueExpr::WithDefault(expr, String::new()),
        })
    }

    /// Ops building nodes rendered to markup: call bodies, set bodies and
    /// raw defaults.
    fn compile_body(&mut self, mut nodes: Vec<TemplateNode>) -> Result<Vec<Op>, CompilerError> {
        let node = if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            TemplateNode::Multi(MultiNode { content: nodes })
        };
        let mut ops = Vec::new();
        self.compile_in_slot(&node, Slot::Root, &mut ops)?;
        Ok(ops)
    }
}

/// `t-esc="0"` and `t-raw="0"` read the enclosing call's body.
fn value_expression(expr: &str) -> Result<Expr, CompilerError> {
    if expr.trim() == ZERO {
        Ok(Expr::zero())
    } else {
        compile_expression(expr)
    }
}

fn esc_value(esc: &EscNode) -> Result<ValueExpr, CompilerError> {
    Ok(ValueExpr::WithDefault(
        value_expression(&esc.expr)?,
        esc.default_value.clone(),
    ))
}

/// `t-on-*` values: `method` or `method(args)`.
fn compile_handler(handler: &str) -> Result<(String, Vec<Expr>), CompilerError> {
    let unsupported = || {
        CompilerError::with_details(
            ERR_UNSUPPORTED_HANDLER,
            &format!("Unsupported event handler \"{}\"", handler),
            "",
            0,
            0,
            Some(handler.to_string()),
            vec!["Use a method name, optionally called with arguments: onClick(item.id)".to_string()],
        )
    };
    match compile_expression(handler)? {
        Expr::Var(method) => Ok((method, vec![])),
        Expr::Call(callee, args) => match *callee {
            Expr::Var(method) => Ok((method, args)),
            _ => Err(unsupported()),
        },
        _ => Err(unsupported()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn compile_template(ast: &TemplateNode, options: &CompileOptions) -> Result<RenderFunction, CompilerError> {
    CompilationContext::new(options.name())
        .compile(ast)
        .map_err(|e| e.in_file(options.name()))
}

/// Compile template text into a render function usable on its own.
pub fn compile(text: &str) -> Result<RenderFunction, CompilerError> {
    compile_with_options(text, &CompileOptions::default())
}

pub fn compile_with_options(text: &str, options: &CompileOptions) -> Result<RenderFunction, CompilerError> {
    let ast = parse_template(text, options)?;
    compile_template(&ast, options)
}
